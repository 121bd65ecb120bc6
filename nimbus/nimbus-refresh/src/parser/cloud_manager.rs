//! Mapping steps of the compute (cloud) manager.

use super::{ParseContext, Parser, VENDOR, device_basename, gigabytes, megabytes, short_host};
use crate::definitions::CLOUD_MANAGER;
use crate::definitions::names::*;
use nimbus_core::error::{NimbusError, Result};
use nimbus_core::record::RawRecord;
use nimbus_core::traits::Collector;
use nimbus_core::types::{InventoryKey, ObjectRef, Value};
use std::collections::HashMap;

/// Resource type used when mapping server labels to tags
pub const VM_RESOURCE_TYPE: &str = "VmTelefonica";

/// Quota entries that are not modelled as quotas
const QUOTA_EXCLUDED: [&str; 10] = [
    "id",
    "tenant_id",
    "service_name",
    "metadata_items",
    "injected_file_content_bytes",
    "injected_files",
    "injected_file_path_bytes",
    "server_groups",
    "server_group_members",
    "rbac_policy",
];

pub fn parser() -> Parser {
    Parser::new(CLOUD_MANAGER)
        .step("availability_zones", availability_zones)
        .step("cloud_services", cloud_services)
        .step("flavors", flavors)
        .step("miq_templates", miq_templates)
        .step("key_pairs", key_pairs)
        .step("orchestration_stacks", orchestration_stacks)
        .step("quotas", quotas)
        .step("vms", vms)
        .step("cloud_tenants", cloud_tenants)
        .step("vnfs", vnfs)
        .step("vnfds", vnfds)
        .step("host_aggregates", host_aggregates)
        .step("volume_snapshot_templates", volume_snapshot_templates)
}

// ============================================================================
// Zones, Services, Flavors
// ============================================================================

fn availability_zones(ctx: &mut ParseContext<'_>) -> Result<()> {
    ctx.each_record("availability_zones", |ctx, az| {
        let name = az.text("zoneName");
        ctx.persister
            .find_or_build(AVAILABILITY_ZONES, name.clone())?
            .set("ems_ref", name.clone())
            .set("name", name);
        Ok(())
    })
}

fn cloud_services(ctx: &mut ParseContext<'_>) -> Result<()> {
    ctx.each_record("cloud_services", |ctx, s| {
        let zone = ctx.lazy_or_null(AVAILABILITY_ZONES, s.text("zone"))?;
        ctx.persister
            .find_or_build(CLOUD_SERVICES, s.text("id"))?
            .set("ems_ref", s.text("id"))
            .set("source", "compute")
            .set("executable_name", s.text("binary"))
            .set("hostname", s.text("host"))
            .set("status", s.text("state"))
            .set("scheduling_disabled", s.str("status") == Some("disabled"))
            .set("scheduling_disabled_reason", s.text("disabled_reason"))
            .set("availability_zone", zone);
        Ok(())
    })
}

fn flavors(ctx: &mut ParseContext<'_>) -> Result<()> {
    ctx.each_record("flavors", |ctx, f| make_flavor(ctx, f))
}

fn make_flavor(ctx: &mut ParseContext<'_>, f: &RawRecord) -> Result<()> {
    let public = f.bool("is_public");
    let tenants = flavor_tenants(ctx, f, public.unwrap_or(false))?;
    let ephemeral = f.i64("ephemeral");

    ctx.persister
        .find_or_build(FLAVORS, f.text("id"))?
        .set("name", f.text("name"))
        .set("enabled", !f.bool("disabled").unwrap_or(false))
        .set("cpus", f.i64("vcpus"))
        .set("memory", f.i64("ram").map(megabytes))
        .set("publicly_available", public)
        .set("root_disk_size", gigabytes(f.i64("disk").unwrap_or(0)))
        .set("swap_disk_size", megabytes(f.i64("swap").unwrap_or(0)))
        .set("ephemeral_disk_size", ephemeral.map(gigabytes))
        .set("ephemeral_disk_count", ephemeral.map(|e| i64::from(e > 0)))
        .set("cloud_tenants", tenants);
    Ok(())
}

/// Public flavors belong to every tenant; private ones to the tenants granted access
fn flavor_tenants(ctx: &ParseContext<'_>, f: &RawRecord, public: bool) -> Result<Vec<Value>> {
    if public {
        return all_tenants(ctx);
    }
    let flavor_id = f.text("id");
    ctx.collector
        .records("flavor_access")
        .iter()
        .filter(|access| access.text("flavor_id") == flavor_id)
        .filter_map(|access| access.text("tenant_id"))
        .map(|tenant_id| ctx.lazy(CLOUD_TENANTS, tenant_id))
        .collect()
}

fn all_tenants(ctx: &ParseContext<'_>) -> Result<Vec<Value>> {
    ctx.collector
        .records("tenants")
        .iter()
        .filter_map(|t| t.text("id"))
        .map(|id| ctx.lazy(CLOUD_TENANTS, id))
        .collect()
}

// ============================================================================
// Images
// ============================================================================

fn miq_templates(ctx: &mut ParseContext<'_>) -> Result<()> {
    ctx.each_record("images", |ctx, image| {
        let public = public_image(image);
        let tenants = image_tenants(ctx, image, public)?;
        let tenant = ctx.lazy_or_null(CLOUD_TENANTS, image.text("owner"))?;
        let parent = ctx.lazy_or_null(VMS, image_parent_id(image))?;
        let guest_os = normalize_os_name(image.text("os_distro").as_deref().unwrap_or("unknown"));

        let template = ctx.persister.find_or_build(MIQ_TEMPLATES, image.text("id"))?;
        template
            .set("type", "template")
            .set("uid_ems", image.text("id"))
            .set("name", image.text("name").or_else(|| image.text("id")))
            .set("vendor", VENDOR)
            .set("raw_power_state", "never")
            .set("template", true)
            .set("publicly_available", public)
            .set("cloud_tenants", tenants)
            .set("location", "unknown")
            .set("cloud_tenant", tenant)
            .set("genealogy_parent", parent);
        let owner = Value::Link(template.object_ref());

        ctx.persister
            .find_or_build_by(HARDWARES, &[("vm_or_template", owner.clone())])?
            .set("guest_os", guest_os.as_str())
            .set("bitness", image_architecture(image))
            .set("disk_size_minimum", image.i64("min_disk").map(gigabytes))
            .set("memory_mb_minimum", image.i64("min_ram"))
            .set("root_device_type", image.text("disk_format"))
            .set("size_on_disk", image.i64("size"))
            .set("virtualization_type", image_property(image, "hypervisor_type"));

        ctx.persister
            .find_or_build_by(OPERATING_SYSTEMS, &[("vm_or_template", owner)])?
            .set("product_name", guest_os)
            .set("distribution", image.text("os_distro"))
            .set("version", image.text("os_version"));
        Ok(())
    })
}

/// The legacy `is_public` flag wins; otherwise anything but private visibility is public
pub fn public_image(image: &RawRecord) -> bool {
    if let Some(is_public) = image.bool("is_public") {
        return is_public;
    }
    image
        .text("visibility")
        .is_some_and(|visibility| visibility != "private")
}

fn image_property(image: &RawRecord, name: &str) -> Option<String> {
    image
        .path_text(&["properties", name])
        .or_else(|| image.text(name))
}

/// 64 or 32 bits, from the image architecture
pub fn image_architecture(image: &RawRecord) -> Option<i64> {
    image_property(image, "architecture").map(|arch| if arch.contains("64") { 64 } else { 32 })
}

/// Server the image was snapshotted from, if any
pub fn image_parent_id(image: &RawRecord) -> Option<String> {
    image
        .path_text(&["copy_from", "id"])
        .or_else(|| image.text("instance_uuid"))
        .or_else(|| image.path_text(&["properties", "instance_uuid"]))
        .or_else(|| image.path_text(&["server", "id"]))
}

fn image_tenants(ctx: &ParseContext<'_>, image: &RawRecord, public: bool) -> Result<Vec<Value>> {
    if public {
        return all_tenants(ctx);
    }
    let mut tenants = Vec::new();
    if let Some(owner) = image.text("owner") {
        tenants.push(ctx.lazy(CLOUD_TENANTS, owner)?);
    }
    for member in image.records("members") {
        if let Some(member_id) = member.text("member_id") {
            tenants.push(ctx.lazy(CLOUD_TENANTS, member_id)?);
        }
    }
    Ok(tenants)
}

/// Canonical guest OS name for a distribution string
pub fn normalize_os_name(distro: &str) -> String {
    let distro = distro.to_lowercase();
    let known = [
        ("windows", "windows_generic"),
        ("ubuntu", "linux_ubuntu"),
        ("centos", "linux_centos"),
        ("rhel", "linux_redhat"),
        ("red hat", "linux_redhat"),
        ("debian", "linux_debian"),
        ("fedora", "linux_fedora"),
        ("suse", "linux_suse"),
        ("linux", "linux_generic"),
    ];
    known
        .iter()
        .find(|(needle, _)| distro.contains(needle))
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

// ============================================================================
// Key Pairs, Stacks, Quotas
// ============================================================================

fn key_pairs(ctx: &mut ParseContext<'_>) -> Result<()> {
    ctx.each_record("key_pairs", |ctx, kp| {
        ctx.persister
            .find_or_build(KEY_PAIRS, kp.text("name"))?
            .set("name", kp.text("name"))
            .set("fingerprint", kp.text("fingerprint"));
        Ok(())
    })
}

fn orchestration_stacks(ctx: &mut ParseContext<'_>) -> Result<()> {
    ctx.each_record("orchestration_stacks", |ctx, stack| {
        let parent = ctx.lazy_or_null(ORCHESTRATION_STACKS, stack.text("parent"))?;
        // stack parameters can miss the project, fall back to the owning tenant
        let tenant_id = stack
            .path_text(&["parameters", "OS::project_id"])
            .or_else(|| stack.text("tenant_id"));
        let tenant = ctx.lazy_or_null(CLOUD_TENANTS, tenant_id)?;

        let stack_ref = ctx
            .persister
            .find_or_build(ORCHESTRATION_STACKS, stack.text("id"))?
            .set("type", "orchestration_stack")
            .set("name", stack.text("stack_name"))
            .set("description", stack.text("description"))
            .set("status", stack.text("stack_status"))
            .set("status_reason", stack.text("stack_status_reason"))
            .set("parent", parent)
            .set("cloud_tenant", tenant)
            .object_ref();

        let template = orchestration_template(ctx, stack, &stack_ref)?;
        ctx.persister
            .find_or_build(ORCHESTRATION_STACKS, &stack_ref)?
            .set("orchestration_template", template);

        orchestration_stack_resources(ctx, stack, &stack_ref)?;
        orchestration_stack_outputs(ctx, stack, &stack_ref)?;
        orchestration_stack_parameters(ctx, stack, &stack_ref)
    })
}

fn orchestration_template(
    ctx: &mut ParseContext<'_>,
    stack: &RawRecord,
    stack_ref: &ObjectRef,
) -> Result<Option<ObjectRef>> {
    let Some(template) = stack.record("template") else {
        return Ok(None);
    };
    let template_ref = ctx
        .persister
        .find_or_build(ORCHESTRATION_TEMPLATES, stack_ref)?
        .set("type", "orchestration_template")
        .set("name", stack.text("stack_name"))
        .set("description", template.text("description"))
        .set("content", template.value("content"))
        .set("orderable", false)
        .object_ref();
    Ok(Some(template_ref))
}

fn orchestration_stack_resources(
    ctx: &mut ParseContext<'_>,
    stack: &RawRecord,
    stack_ref: &ObjectRef,
) -> Result<()> {
    // resources without a physical id failed to be created
    for resource in stack.records("resources") {
        let Some(uid) = resource.text("physical_resource_id") else {
            continue;
        };
        ctx.persister
            .find_or_build(ORCHESTRATION_STACKS_RESOURCES, uid.as_str())?
            .set("ems_ref", uid.as_str())
            .set("logical_resource", resource.text("logical_resource_id"))
            .set("physical_resource", uid.as_str())
            .set("resource_category", resource.text("resource_type"))
            .set("resource_status", resource.text("resource_status"))
            .set("resource_status_reason", resource.text("resource_status_reason"))
            .set("last_updated", resource.text("updated_time"))
            .set("stack", stack_ref.clone());
    }
    Ok(())
}

/// Id of the stack that created the server, if any
fn server_stack(collector: &dyn Collector, server_id: &str) -> Option<String> {
    collector
        .records("orchestration_stacks")
        .iter()
        .find(|stack| {
            stack
                .records("resources")
                .iter()
                .any(|r| r.text("physical_resource_id").as_deref() == Some(server_id))
        })
        .and_then(|stack| stack.text("id"))
}

fn orchestration_stack_outputs(
    ctx: &mut ParseContext<'_>,
    stack: &RawRecord,
    stack_ref: &ObjectRef,
) -> Result<()> {
    for output in stack.records("outputs") {
        let Some(output_key) = output.text("output_key") else {
            continue;
        };
        let uid = format!("{}_{}", stack_ref.key, output_key);
        ctx.persister
            .find_or_build(ORCHESTRATION_STACKS_OUTPUTS, uid.as_str())?
            .set("ems_ref", uid.as_str())
            .set("key", output_key)
            .set("value", output.value("output_value"))
            .set("description", output.text("description"))
            .set("stack", stack_ref.clone());
    }
    Ok(())
}

fn orchestration_stack_parameters(
    ctx: &mut ParseContext<'_>,
    stack: &RawRecord,
    stack_ref: &ObjectRef,
) -> Result<()> {
    let Some(parameters) = stack.record("parameters") else {
        return Ok(());
    };
    for (name, value) in parameters.fields() {
        let uid = format!("{}_{}", stack_ref.key, name);
        ctx.persister
            .find_or_build(ORCHESTRATION_STACKS_PARAMETERS, uid.as_str())?
            .set("ems_ref", uid.as_str())
            .set("name", name.as_str())
            .set("value", Value::from(value))
            .set("stack", stack_ref.clone());
    }
    Ok(())
}

fn quotas(ctx: &mut ParseContext<'_>) -> Result<()> {
    ctx.each_record("quotas", |ctx, q| {
        let Some(id) = q.text("id").or_else(|| q.text("tenant_id")) else {
            return Err(NimbusError::identity("quota without id or tenant_id"));
        };
        let tenant = ctx.lazy_or_null(CLOUD_TENANTS, q.text("tenant_id"))?;

        for (name, value) in q.fields() {
            if QUOTA_EXCLUDED.contains(&name.as_str()) {
                continue;
            }
            let key = InventoryKey::composite([id.as_str(), name.as_str()])?;
            ctx.persister
                .find_or_build(CLOUD_RESOURCE_QUOTAS, key)?
                .set("service_name", q.text("service_name"))
                .set("ems_ref", vec![id.clone(), name.clone()])
                .set("name", name.as_str())
                .set("value", quota_value(value))
                .set("cloud_tenant", tenant.clone());
        }
        Ok(())
    })
}

/// Integer quota value; anything non-numeric counts as zero
fn quota_value(value: &serde_json::Value) -> i64 {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

// ============================================================================
// Servers
// ============================================================================

fn vms(ctx: &mut ParseContext<'_>) -> Result<()> {
    ctx.each_record("vms", |ctx, server| make_vm(ctx, server))
}

fn make_vm(ctx: &mut ParseContext<'_>, s: &RawRecord) -> Result<()> {
    let collector = ctx.collector;
    let id = s.text("id");
    let image_id = s.path_text(&["image", "id"]);
    let flavor_id = s.path_text(&["flavor", "id"]);
    let zone = s
        .text("availability_zone")
        .or_else(|| s.text("OS-EXT-AZ:availability_zone"))
        .unwrap_or_else(|| "null_az".to_string());

    let availability_zone = ctx.lazy(AVAILABILITY_ZONES, zone)?;
    let key_pairs = match s.text("key_name") {
        Some(name) => vec![ctx.lazy(KEY_PAIRS, name)?],
        None => Vec::new(),
    };
    let tenant = ctx.lazy_or_null(CLOUD_TENANTS, s.text("tenant_id"))?;
    let template = ctx.lazy_or_null(MIQ_TEMPLATES, image_id.clone())?;
    let flavor_link = ctx.lazy_or_null(FLAVORS, flavor_id.clone())?;
    let stack = ctx.lazy_or_null(
        ORCHESTRATION_STACKS,
        id.as_deref().and_then(|id| server_stack(collector, id)),
    )?;

    // hardware needs flavor details the server record lacks
    let flavor = flavor_id
        .as_deref()
        .and_then(|fid| collector.find_by_id("flavors", fid));
    if let Some(f) = flavor {
        make_flavor(ctx, f)?;
    }

    let vm_ref = ctx
        .persister
        .find_or_build(VMS, id.clone())?
        .set("uid_ems", id)
        .set("name", s.text("name"))
        .set("vendor", VENDOR)
        .set("raw_power_state", raw_power_state(s))
        .set("connection_state", "connected")
        .set("location", "unknown")
        .set("availability_zone", availability_zone)
        .set("key_pairs", key_pairs)
        .set("cloud_tenant", tenant)
        .set("genealogy_parent", template)
        .set("flavor", flavor_link)
        .set("orchestration_stack", stack)
        .object_ref();

    let flavor_i64 = |field: &str| flavor.and_then(|f| f.i64(field));
    let vcpus = flavor_i64("vcpus");
    let root = gigabytes(flavor_i64("disk").unwrap_or(0));
    let ephemeral = gigabytes(flavor_i64("ephemeral").unwrap_or(0));
    let swap = megabytes(flavor_i64("swap").unwrap_or(0));

    let owner = Value::Link(vm_ref.clone());
    let guest_os = project(ctx, HARDWARES, image_id.as_deref(), "guest_os")?;
    let hardware_ref = ctx
        .persister
        .find_or_build_by(HARDWARES, &[("vm_or_template", owner.clone())])?
        .set("cpu_sockets", vcpus)
        .set("cpu_cores_per_socket", 1)
        .set("cpu_total_cores", vcpus)
        .set("memory_mb", flavor_i64("ram"))
        .set("disk_capacity", root.saturating_add(swap).saturating_add(ephemeral))
        .set("guest_os", guest_os)
        .object_ref();

    let product_name = project(ctx, OPERATING_SYSTEMS, image_id.as_deref(), "product_name")?;
    let distribution = project(ctx, OPERATING_SYSTEMS, image_id.as_deref(), "distribution")?;
    let version = project(ctx, OPERATING_SYSTEMS, image_id.as_deref(), "version")?;
    ctx.persister
        .find_or_build_by(OPERATING_SYSTEMS, &[("vm_or_template", owner)])?
        .set("product_name", product_name)
        .set("distribution", distribution)
        .set("version", version);

    let hardware = Value::Link(hardware_ref);
    let attachment_names = instance_disks(ctx, &hardware, root, ephemeral, swap)?;
    volume_attachment_disks(ctx, s, &hardware, &attachment_names)?;

    let labels = labels(s);
    for (name, value) in &labels {
        ctx.persister
            .find_or_build_by(
                VM_AND_TEMPLATE_LABELS,
                &[("resource", Value::Link(vm_ref.clone())), ("name", Value::from(name.as_str()))],
            )?
            .set("section", "labels")
            .set("value", value.as_str())
            .set("source", VENDOR);
    }

    for tag in ctx.persister.map_labels(VM_RESOURCE_TYPE, &labels)? {
        ctx.persister.find_or_build_by(
            VM_AND_TEMPLATE_TAGGINGS,
            &[("taggable", Value::Link(vm_ref.clone())), ("tag", Value::Link(tag))],
        )?;
    }
    Ok(())
}

/// Power state as reported by the provider
pub fn raw_power_state(s: &RawRecord) -> String {
    s.text("state")
        .or_else(|| s.text("status"))
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

/// Lazy projection of an attribute of the template's row, or null without an image
fn project(ctx: &ParseContext<'_>, collection: &str, image_id: Option<&str>, attribute: &str) -> Result<Value> {
    let Some(image_id) = image_id else {
        return Ok(Value::Null);
    };
    let template = ctx.lazy(MIQ_TEMPLATES, image_id)?;
    Ok(Value::Lazy(
        ctx.persister
            .lazy_find_by(collection, &[("vm_or_template", template)])?
            .project(attribute),
    ))
}

/// Root, ephemeral and swap disks of an instance; returns device names by location
fn instance_disks(
    ctx: &mut ParseContext<'_>,
    hardware: &Value,
    root: i64,
    ephemeral: i64,
    swap: i64,
) -> Result<HashMap<String, &'static str>> {
    let mut names = HashMap::new();
    let root = if root == 0 { gigabytes(1) } else { root };
    make_instance_disk(ctx, hardware, root, "vda", "Root disk")?;
    names.insert("vda".to_string(), "Root disk");

    let mut location = "vda".to_string();
    if ephemeral > 0 {
        location = "vdb".to_string();
        make_instance_disk(ctx, hardware, ephemeral, &location, "Ephemeral disk")?;
        names.insert(location.clone(), "Ephemeral disk");
    }
    if swap > 0 {
        location = next_device(&location);
        make_instance_disk(ctx, hardware, swap, &location, "Swap disk")?;
        names.insert(location, "Swap disk");
    }
    Ok(names)
}

fn make_instance_disk(
    ctx: &mut ParseContext<'_>,
    hardware: &Value,
    size: i64,
    location: &str,
    name: &str,
) -> Result<()> {
    ctx.persister
        .find_or_build_by(
            DISKS,
            &[("hardware", hardware.clone()), ("device_name", Value::from(name))],
        )?
        .set("location", location)
        .set("size", size)
        .set("device_type", "disk")
        .set("controller_type", VENDOR);
    Ok(())
}

/// One disk per attached volume; volume details come from the storage manager
fn volume_attachment_disks(
    ctx: &mut ParseContext<'_>,
    s: &RawRecord,
    hardware: &Value,
    names: &HashMap<String, &'static str>,
) -> Result<()> {
    if s.records("os-extended-volumes:volumes_attached").is_empty() {
        return Ok(());
    }
    for attachment in s.records("volume_attachments") {
        let Some(device) = attachment.text("device") else {
            continue;
        };
        let location = device_basename(&device);
        // instances booted from a volume reuse the instance disk names
        let device_name = names.get(location).copied().unwrap_or(location);
        ctx.persister
            .find_or_build_by(
                DISKS,
                &[("hardware", hardware.clone()), ("device_name", Value::from(device_name))],
            )?
            .set("location", location)
            .set("device_type", "disk")
            .set("controller_type", VENDOR);
    }
    Ok(())
}

/// Next device name, e.g. `vdb` -> `vdc`
fn next_device(location: &str) -> String {
    let mut chars: Vec<char> = location.chars().collect();
    match chars.last_mut() {
        Some(last) if *last < 'z' => {
            *last = (*last as u8 + 1) as char;
            chars.into_iter().collect()
        }
        _ => format!("{}a", location),
    }
}

/// Server metadata as label pairs; accepts a map or a list of key/value records
pub fn labels(s: &RawRecord) -> Vec<(String, String)> {
    match s.get("metadata") {
        Some(serde_json::Value::Object(map)) => map
            .iter()
            .filter_map(|(key, value)| json_text(value).map(|v| (key.clone(), v)))
            .collect(),
        Some(serde_json::Value::Array(_)) => s
            .records("metadata")
            .iter()
            .filter_map(|item| Some((item.text("key")?, item.text("value")?)))
            .collect(),
        _ => Vec::new(),
    }
}

fn json_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ============================================================================
// Tenants, NFV, Aggregates, Snapshot Templates
// ============================================================================

fn cloud_tenants(ctx: &mut ParseContext<'_>) -> Result<()> {
    ctx.each_record("tenants", |ctx, t| {
        let parent = ctx.lazy_or_null(CLOUD_TENANTS, t.text("parent_id"))?;
        ctx.persister
            .find_or_build(CLOUD_TENANTS, t.text("id"))?
            .set("name", t.text("name"))
            .set("description", t.text("description"))
            .set("enabled", t.bool("enabled"))
            .set("ems_ref", t.text("id"))
            .set("parent", parent);
        Ok(())
    })
}

fn vnfs(ctx: &mut ParseContext<'_>) -> Result<()> {
    ctx.each_record("vnfs", |ctx, v| {
        let tenant = ctx.lazy_or_null(CLOUD_TENANTS, v.text("tenant_id"))?;
        let vnf_ref = ctx
            .persister
            .find_or_build(ORCHESTRATION_STACKS, v.text("id"))?
            .set("type", "vnf")
            .set("name", v.text("name"))
            .set("description", v.text("description"))
            .set("status", v.text("status"))
            .set("cloud_tenant", tenant)
            .object_ref();

        let uid = format!("{}mgmt_url", vnf_ref.key);
        ctx.persister
            .find_or_build(ORCHESTRATION_STACKS_OUTPUTS, uid.as_str())?
            .set("key", "mgmt_url")
            .set("value", v.value("mgmt_url"))
            .set("stack", vnf_ref);
        Ok(())
    })
}

fn vnfds(ctx: &mut ParseContext<'_>) -> Result<()> {
    ctx.each_record("vnfds", |ctx, v| {
        ctx.persister
            .find_or_build(ORCHESTRATION_TEMPLATES, v.text("id"))?
            .set("type", "vnfd_template")
            .set("name", v.text("name").or_else(|| v.text("id")))
            .set("description", v.text("description"))
            .set(
                "content",
                v.path(&["vnf_attributes", "vnfd"]).map(Value::from).unwrap_or_default(),
            )
            .set("orderable", true);
        Ok(())
    })
}

fn host_aggregates(ctx: &mut ParseContext<'_>) -> Result<()> {
    ctx.each_record("host_aggregates", |ctx, ha| {
        let mut hosts: Vec<String> = Vec::new();
        if let Some(serde_json::Value::Array(items)) = ha.get("hosts") {
            for host in items.iter().filter_map(|h| h.as_str()) {
                let host = short_host(host).to_string();
                if !hosts.contains(&host) {
                    hosts.push(host);
                }
            }
        }
        ctx.persister
            .find_or_build(HOST_AGGREGATES, ha.text("id"))?
            .set("ems_ref", ha.text("id"))
            .set("name", ha.text("name"))
            .set("metadata", ha.value("metadata"))
            .set("hosts", hosts);
        Ok(())
    })
}

fn volume_snapshot_templates(ctx: &mut ParseContext<'_>) -> Result<()> {
    ctx.each_record("volume_snapshot_templates", |ctx, vt| {
        let tenant = ctx.lazy_or_null(
            CLOUD_TENANTS,
            vt.text("os-extended-snapshot-attributes:project_id"),
        )?;
        let name = vt
            .text("display_name")
            .or_else(|| vt.text("name"))
            .or_else(|| vt.text("id"));
        ctx.persister
            .find_or_build(MIQ_TEMPLATES, vt.text("id"))?
            .set("type", "volume_snapshot_template")
            .set("name", name)
            .set("cloud_tenant", tenant)
            .set("location", "N/A")
            .set("vendor", VENDOR);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> RawRecord {
        RawRecord::from_json(value).unwrap()
    }

    #[test]
    fn test_public_image_rules() {
        assert!(public_image(&record(json!({"is_public": true, "visibility": "private"}))));
        assert!(!public_image(&record(json!({"is_public": false, "visibility": "public"}))));
        assert!(public_image(&record(json!({"visibility": "shared"}))));
        assert!(!public_image(&record(json!({"visibility": "private"}))));
        assert!(!public_image(&record(json!({}))));
    }

    #[test]
    fn test_image_architecture() {
        assert_eq!(image_architecture(&record(json!({"architecture": "x86_64"}))), Some(64));
        assert_eq!(
            image_architecture(&record(json!({"properties": {"architecture": "i686"}}))),
            Some(32)
        );
        assert_eq!(image_architecture(&record(json!({"architecture": ""}))), None);
    }

    #[test]
    fn test_image_parent_id_precedence() {
        let image = record(json!({
            "copy_from": {"id": "s1"},
            "instance_uuid": "s2",
            "server": {"id": "s3"}
        }));
        assert_eq!(image_parent_id(&image), Some("s1".to_string()));
        assert_eq!(image_parent_id(&record(json!({"server": {"id": "s3"}}))), Some("s3".to_string()));
        assert_eq!(image_parent_id(&record(json!({}))), None);
    }

    #[test]
    fn test_normalize_os_name() {
        assert_eq!(normalize_os_name("Ubuntu"), "linux_ubuntu");
        assert_eq!(normalize_os_name("windows"), "windows_generic");
        assert_eq!(normalize_os_name("unknown"), "unknown");
    }

    #[test]
    fn test_next_device() {
        assert_eq!(next_device("vda"), "vdb");
        assert_eq!(next_device("vdb"), "vdc");
        assert_eq!(next_device("vdz"), "vdza");
    }

    #[test]
    fn test_labels_from_map_and_list() {
        let map = record(json!({"metadata": {"env": "prod", "tier": 2}}));
        let mut pairs = labels(&map);
        pairs.sort();
        assert_eq!(
            pairs,
            vec![("env".to_string(), "prod".to_string()), ("tier".to_string(), "2".to_string())]
        );

        let list = record(json!({"metadata": [{"key": "env", "value": "prod"}, {"key": "x"}]}));
        assert_eq!(labels(&list), vec![("env".to_string(), "prod".to_string())]);
    }

    #[test]
    fn test_raw_power_state_prefers_state() {
        assert_eq!(raw_power_state(&record(json!({"state": "running", "status": "ACTIVE"}))), "running");
        assert_eq!(raw_power_state(&record(json!({"status": "ACTIVE"}))), "ACTIVE");
        assert_eq!(raw_power_state(&record(json!({}))), "UNKNOWN");
    }

    #[test]
    fn test_quota_value() {
        assert_eq!(quota_value(&json!(10)), 10);
        assert_eq!(quota_value(&json!("20")), 20);
        assert_eq!(quota_value(&json!("lots")), 0);
        assert_eq!(quota_value(&json!(null)), 0);
    }

    #[test]
    fn test_step_order() {
        assert_eq!(
            parser().step_names(),
            vec![
                "availability_zones",
                "cloud_services",
                "flavors",
                "miq_templates",
                "key_pairs",
                "orchestration_stacks",
                "quotas",
                "vms",
                "cloud_tenants",
                "vnfs",
                "vnfds",
                "host_aggregates",
                "volume_snapshot_templates",
            ]
        );
    }
}
