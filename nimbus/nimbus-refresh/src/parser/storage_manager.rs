//! Mapping steps of the block storage sub-manager.

use super::{ParseContext, Parser, device_basename, gigabytes};
use crate::definitions::STORAGE_MANAGER;
use crate::definitions::names::*;
use nimbus_core::error::Result;
use nimbus_core::types::Value;

pub fn parser() -> Parser {
    Parser::new(STORAGE_MANAGER)
        .step("volume_types", volume_types)
        .step("volumes", volumes)
        .step("volume_snapshots", volume_snapshots)
        .step("volume_backups", volume_backups)
}

fn volume_types(ctx: &mut ParseContext<'_>) -> Result<()> {
    ctx.each_record("volume_types", |ctx, vt| {
        ctx.persister
            .find_or_build(CLOUD_VOLUME_TYPES, vt.text("id"))?
            .set("ems_ref", vt.text("id"))
            .set("name", vt.text("name"))
            .set("description", vt.text("description"))
            .set("backend_name", vt.path_text(&["extra_specs", "volume_backend_name"]))
            .set("public", vt.bool("is_public"));
        Ok(())
    })
}

fn volumes(ctx: &mut ParseContext<'_>) -> Result<()> {
    ctx.each_record("volumes", |ctx, v| {
        let tenant = ctx.lazy_or_null(CLOUD_TENANTS, v.text("os-vol-tenant-attr:tenant_id"))?;
        let zone = ctx.lazy_or_null(AVAILABILITY_ZONES, v.text("availability_zone"))?;
        let volume_type = ctx.lazy_or_null(CLOUD_VOLUME_TYPES, v.text("volume_type"))?;
        let base_snapshot = ctx.lazy_or_null(CLOUD_VOLUME_SNAPSHOTS, v.text("snapshot_id"))?;
        let size = v.i64("size").map(gigabytes);

        let volume_ref = ctx
            .persister
            .find_or_build(CLOUD_VOLUMES, v.text("id"))?
            .set("type", "cloud_volume")
            .set("ems_ref", v.text("id"))
            .set("name", v.text("name").or_else(|| v.text("display_name")).or_else(|| v.text("id")))
            .set("status", v.text("status"))
            .set("bootable", v.bool("bootable"))
            .set("creation_time", v.text("created_at"))
            .set("description", v.text("description").or_else(|| v.text("display_description")))
            .set("volume_type", volume_type)
            .set("size", size)
            .set("base_snapshot", base_snapshot)
            .set("cloud_tenant", tenant)
            .set("availability_zone", zone)
            .object_ref();

        for attachment in v.records("attachments") {
            let (Some(server_id), Some(device)) = (attachment.text("server_id"), attachment.text("device")) else {
                continue;
            };
            let vm = ctx.lazy(VMS, server_id)?;
            let hardware = Value::Lazy(
                ctx.persister
                    .lazy_find_by(HARDWARES, &[("vm_or_template", vm)])?,
            );
            let device_name = device_basename(&device);
            ctx.persister
                .find_or_build_by(
                    DISKS,
                    &[("hardware", hardware), ("device_name", Value::from(device_name))],
                )?
                .set("location", device_name)
                .set("size", size)
                .set("device_type", "disk")
                .set("backing_volume", volume_ref.clone());
        }
        Ok(())
    })
}

fn volume_snapshots(ctx: &mut ParseContext<'_>) -> Result<()> {
    ctx.each_record("volume_snapshots", |ctx, s| {
        let volume = ctx.lazy_or_null(CLOUD_VOLUMES, s.text("volume_id"))?;
        let tenant = ctx.lazy_or_null(
            CLOUD_TENANTS,
            s.text("os-extended-snapshot-attributes:project_id"),
        )?;
        ctx.persister
            .find_or_build(CLOUD_VOLUME_SNAPSHOTS, s.text("id"))?
            .set("type", "cloud_volume_snapshot")
            .set("ems_ref", s.text("id"))
            .set("name", s.text("name").or_else(|| s.text("display_name")))
            .set("status", s.text("status"))
            .set("creation_time", s.text("created_at"))
            .set("description", s.text("description").or_else(|| s.text("display_description")))
            .set("size", s.i64("size").map(gigabytes))
            .set("cloud_tenant", tenant)
            .set("cloud_volume", volume);
        Ok(())
    })
}

fn volume_backups(ctx: &mut ParseContext<'_>) -> Result<()> {
    ctx.each_record("volume_backups", |ctx, b| {
        let volume = ctx.lazy_or_null(CLOUD_VOLUMES, b.text("volume_id"))?;
        let zone = ctx.lazy_or_null(AVAILABILITY_ZONES, b.text("availability_zone"))?;
        ctx.persister
            .find_or_build(CLOUD_VOLUME_BACKUPS, b.text("id"))?
            .set("type", "cloud_volume_backup")
            .set("ems_ref", b.text("id"))
            .set("name", b.text("name"))
            .set("status", b.text("status"))
            .set("creation_time", b.text("created_at"))
            .set("description", b.text("description"))
            .set("size", b.i64("size").map(gigabytes))
            .set("object_count", b.i64("object_count"))
            .set("is_incremental", b.bool("is_incremental"))
            .set("has_dependent_backups", b.bool("has_dependent_backups"))
            .set("availability_zone", zone)
            .set("cloud_volume", volume);
        Ok(())
    })
}
