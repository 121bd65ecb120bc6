//! Collection sets of the supported manager types.

use nimbus_inventory::{CollectionSpec, ManagerDefinition, TAGS_COLLECTION};

/// Collection names shared by definitions and mapping steps
pub mod names {
    pub const AVAILABILITY_ZONES: &str = "availability_zones";
    pub const CLOUD_TENANTS: &str = "cloud_tenants";
    pub const FLAVORS: &str = "flavors";
    pub const KEY_PAIRS: &str = "key_pairs";
    pub const CLOUD_SERVICES: &str = "cloud_services";
    pub const HOST_AGGREGATES: &str = "host_aggregates";
    pub const ORCHESTRATION_TEMPLATES: &str = "orchestration_templates";
    pub const ORCHESTRATION_STACKS: &str = "orchestration_stacks";
    pub const ORCHESTRATION_STACKS_RESOURCES: &str = "orchestration_stacks_resources";
    pub const ORCHESTRATION_STACKS_OUTPUTS: &str = "orchestration_stacks_outputs";
    pub const ORCHESTRATION_STACKS_PARAMETERS: &str = "orchestration_stacks_parameters";
    pub const MIQ_TEMPLATES: &str = "miq_templates";
    pub const VMS: &str = "vms";
    pub const HARDWARES: &str = "hardwares";
    pub const OPERATING_SYSTEMS: &str = "operating_systems";
    pub const DISKS: &str = "disks";
    pub const CLOUD_RESOURCE_QUOTAS: &str = "cloud_resource_quotas";
    pub const TAGS: &str = super::TAGS_COLLECTION;
    pub const VM_AND_TEMPLATE_LABELS: &str = "vm_and_template_labels";
    pub const VM_AND_TEMPLATE_TAGGINGS: &str = "vm_and_template_taggings";

    pub const CLOUD_VOLUME_TYPES: &str = "cloud_volume_types";
    pub const CLOUD_VOLUMES: &str = "cloud_volumes";
    pub const CLOUD_VOLUME_SNAPSHOTS: &str = "cloud_volume_snapshots";
    pub const CLOUD_VOLUME_BACKUPS: &str = "cloud_volume_backups";
}

use names::*;

pub const CLOUD_MANAGER: &str = "cloud_manager";
pub const STORAGE_MANAGER: &str = "storage_manager";

fn disks() -> CollectionSpec {
    CollectionSpec::complete(DISKS)
        .manager_ref(["hardware", "device_name"])
        .depends_on([HARDWARES])
}

/// Compute manager of one cloud account and region
pub fn cloud_manager() -> ManagerDefinition {
    ManagerDefinition::new(CLOUD_MANAGER)
        .collection(CollectionSpec::complete(AVAILABILITY_ZONES))
        .collection(CollectionSpec::complete(CLOUD_TENANTS))
        .collection(CollectionSpec::complete(FLAVORS).depends_on([CLOUD_TENANTS]))
        .collection(CollectionSpec::complete(KEY_PAIRS))
        .collection(CollectionSpec::complete(CLOUD_SERVICES).depends_on([AVAILABILITY_ZONES]))
        .collection(CollectionSpec::complete(HOST_AGGREGATES))
        .collection(CollectionSpec::complete(ORCHESTRATION_TEMPLATES))
        .collection(
            CollectionSpec::complete(ORCHESTRATION_STACKS)
                .depends_on([CLOUD_TENANTS, ORCHESTRATION_TEMPLATES]),
        )
        .collection(CollectionSpec::complete(MIQ_TEMPLATES).depends_on([CLOUD_TENANTS]))
        .collection(CollectionSpec::complete(VMS).depends_on([
            AVAILABILITY_ZONES,
            CLOUD_TENANTS,
            FLAVORS,
            KEY_PAIRS,
            ORCHESTRATION_STACKS,
            MIQ_TEMPLATES,
        ]))
        .collection(
            CollectionSpec::complete(HARDWARES)
                .manager_ref(["vm_or_template"])
                .depends_on([VMS, MIQ_TEMPLATES]),
        )
        .collection(
            CollectionSpec::complete(OPERATING_SYSTEMS)
                .manager_ref(["vm_or_template"])
                .depends_on([VMS, MIQ_TEMPLATES]),
        )
        .collection(disks())
        .collection(CollectionSpec::complete(ORCHESTRATION_STACKS_RESOURCES).depends_on([ORCHESTRATION_STACKS]))
        .collection(CollectionSpec::complete(ORCHESTRATION_STACKS_OUTPUTS).depends_on([ORCHESTRATION_STACKS]))
        .collection(CollectionSpec::complete(ORCHESTRATION_STACKS_PARAMETERS).depends_on([ORCHESTRATION_STACKS]))
        .collection(CollectionSpec::complete(CLOUD_RESOURCE_QUOTAS).depends_on([CLOUD_TENANTS]))
        .collection(CollectionSpec::targeted(TAGS))
        .collection(
            CollectionSpec::complete(VM_AND_TEMPLATE_LABELS)
                .manager_ref(["resource", "name"])
                .depends_on([VMS]),
        )
        .collection(
            CollectionSpec::complete(VM_AND_TEMPLATE_TAGGINGS)
                .manager_ref(["taggable", "tag"])
                .depends_on([VMS, TAGS]),
        )
}

/// Block storage sub-manager sharing compute collections with its parent
pub fn storage_manager() -> ManagerDefinition {
    ManagerDefinition::new(STORAGE_MANAGER)
        .collection(CollectionSpec::shared(VMS))
        .collection(CollectionSpec::shared(AVAILABILITY_ZONES))
        .collection(CollectionSpec::shared(HARDWARES).manager_ref(["vm_or_template"]))
        .collection(CollectionSpec::shared(CLOUD_TENANTS))
        .collection(
            CollectionSpec::targeted(DISKS)
                .parent_scoped()
                .manager_ref(["hardware", "device_name"])
                .depends_on([HARDWARES]),
        )
        .collection(CollectionSpec::complete(CLOUD_VOLUME_TYPES))
        .collection(CollectionSpec::complete(CLOUD_VOLUMES).depends_on([
            CLOUD_VOLUME_TYPES,
            AVAILABILITY_ZONES,
            CLOUD_TENANTS,
        ]))
        .collection(CollectionSpec::complete(CLOUD_VOLUME_SNAPSHOTS).depends_on([CLOUD_VOLUMES]))
        .collection(CollectionSpec::complete(CLOUD_VOLUME_BACKUPS).depends_on([CLOUD_VOLUMES]))
}

/// Definition for a manager type name
pub fn by_name(name: &str) -> Option<ManagerDefinition> {
    match name {
        CLOUD_MANAGER => Some(cloud_manager()),
        STORAGE_MANAGER => Some(storage_manager()),
        _ => None,
    }
}
