//! Namespace management over the label storage area.
//!
//! A namespace is described by one label per member DIMM of its region. Label
//! writes follow a two-pass protocol: every member first receives the label
//! flagged as updating, then a second pass clears the flag. A crash or
//! command failure between the passes leaves a detectable partial state, and
//! [`Inventory::resync_namespaces`] surfaces it as a broken namespace instead
//! of silently dropping capacity.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::error::{fw_status_to_code, transport_error_to_code};
use crate::inventory::{Inventory, RegionId};
use dcpmm_sdk::limits::MIB;
use dcpmm_sdk::status::{CommandStatus, NvmStatusCode, ObjectType};
use dcpmm_transport::command::{subop, FwCmd, Opcode};
use dcpmm_transport::PassThru;
use uuid::Uuid;

/// Namespace label index format carried in each DIMM's label storage area.
pub const NSINDEX_MAJOR: u16 = 1;
pub const NSINDEX_MINOR: u16 = 2;

/// Sector sizes the driver stack accepts, with and without out-of-band bytes.
pub const SUPPORTED_BLOCK_SIZES: [u32; 7] = [512, 520, 528, 4096, 4104, 4112, 4160];

/// Smallest namespace that can host a block translation table.
pub const BTT_NAMESPACE_MIN_SIZE: u64 = 16 * MIB;

/// One namespace label as stored on a member DIMM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub guid: Uuid,
    pub name: String,
    pub block_size: u32,
    /// Total blocks in the namespace. Every member label carries the same
    /// count so the set reassembles exactly, whatever the member split.
    pub block_count: u64,
    pub btt: bool,
    pub region_id: RegionId,
    /// How many DIMMs carry a label for this namespace.
    pub member_count: u16,
    /// This DIMM's position within the set.
    pub position: u16,
    /// Set during the first pass of a label update, cleared by the second.
    pub updating: bool,
}

/// The label storage area of one DIMM.
#[derive(Debug, Clone)]
pub struct LabelStorage {
    pub major: u16,
    pub minor: u16,
    labels: Vec<Label>,
}

impl Default for LabelStorage {
    fn default() -> Self {
        Self { major: NSINDEX_MAJOR, minor: NSINDEX_MINOR, labels: Vec::new() }
    }
}

impl LabelStorage {
    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }

    pub fn get(&self, guid: Uuid) -> Option<&Label> {
        self.labels.iter().find(|l| l.guid == guid)
    }

    /// Inserts or replaces the label with the same namespace GUID.
    pub fn upsert(&mut self, label: Label) {
        match self.labels.iter_mut().find(|l| l.guid == label.guid) {
            Some(existing) => *existing = label,
            None => self.labels.push(label),
        }
    }

    pub fn remove(&mut self, guid: Uuid) {
        self.labels.retain(|l| l.guid != guid);
    }

    pub fn supports_rename(&self) -> bool {
        (self.major, self.minor) >= (NSINDEX_MAJOR, NSINDEX_MINOR)
    }
}

/// One assembled namespace, rebuilt from member labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub id: u32,
    pub guid: Uuid,
    pub name: String,
    pub block_size: u32,
    pub block_count: u64,
    pub btt: bool,
    pub region_id: RegionId,
    /// Label set is incomplete or was caught mid-update.
    pub broken: bool,
}

impl Namespace {
    pub fn capacity(&self) -> u64 {
        self.block_size as u64 * self.block_count
    }
}

// Label storage record tags within the platform config data payload.
const RECORD_UPSERT: u8 = 2;
const RECORD_REMOVE: u8 = 3;

fn encode_label(label: &Label) -> Vec<u8> {
    let mut out = Vec::with_capacity(48 + label.name.len());
    out.push(RECORD_UPSERT);
    out.extend_from_slice(label.guid.as_bytes());
    out.push(label.updating as u8);
    out.extend_from_slice(&label.position.to_le_bytes());
    out.extend_from_slice(&label.member_count.to_le_bytes());
    out.extend_from_slice(&label.block_size.to_le_bytes());
    out.extend_from_slice(&label.block_count.to_le_bytes());
    out.push(label.btt as u8);
    out.extend_from_slice(&label.region_id.0.to_le_bytes());
    out.push(label.name.len() as u8);
    out.extend_from_slice(label.name.as_bytes());
    out
}

fn send_label_record<T: PassThru>(
    transport: &mut T,
    device_handle: u32,
    payload: Vec<u8>,
) -> Result<(), NvmStatusCode> {
    let mut cmd =
        FwCmd::new(device_handle, Opcode::SetAdminFeatures, subop::PLATFORM_DATA_INFO).with_input(payload);
    transport.pass_thru(&mut cmd).map_err(transport_error_to_code)?;
    if cmd.status.is_error() {
        return Err(fw_status_to_code(cmd.status));
    }
    Ok(())
}

fn validate_create(
    inventory: &Inventory,
    region_id: RegionId,
    block_size: u32,
    block_count: u64,
    btt: bool,
) -> Result<(), NvmStatusCode> {
    if inventory.region(region_id).is_none() {
        return Err(NvmStatusCode::ErrRegionNotFound);
    }
    if !SUPPORTED_BLOCK_SIZES.contains(&block_size) {
        return Err(NvmStatusCode::ErrUnsupportedBlockSize);
    }
    let capacity = block_size as u64 * block_count;
    if capacity == 0 {
        return Err(NvmStatusCode::ErrInvalidNamespaceCapacity);
    }
    if btt && capacity < BTT_NAMESPACE_MIN_SIZE {
        return Err(NvmStatusCode::ErrNamespaceTooSmallForBtt);
    }
    if capacity > inventory.region_free_capacity(region_id) {
        return Err(NvmStatusCode::ErrNotEnoughFreeSpace);
    }
    Ok(())
}

/// Creates a namespace on a region and installs its labels on every member
/// DIMM.
///
/// If any label write fails mid-protocol the partial label state is left on
/// media, the in-memory view is resynchronized, and the namespace surfaces
/// as broken rather than usable.
pub fn create_namespace<T: PassThru>(
    transport: &mut T,
    inventory: &mut Inventory,
    region_id: RegionId,
    name: &str,
    block_size: u32,
    block_count: u64,
    btt: bool,
    status: &mut CommandStatus,
) -> Result<u32, NvmStatusCode> {
    status.object_type = ObjectType::Namespace;
    if let Err(code) = validate_create(inventory, region_id, block_size, block_count, btt) {
        status.update_general_status(code);
        return Err(code);
    }
    let Some(region) = inventory.region(region_id) else {
        return Err(NvmStatusCode::ErrRegionNotFound);
    };
    let members = region.dimm_ids.clone();
    let guid = Uuid::new_v4();
    let member_count = members.len() as u16;

    let mut label = Label {
        guid,
        name: name.to_string(),
        block_size,
        block_count,
        btt,
        region_id,
        member_count,
        position: 0,
        updating: true,
    };

    // Pass one: install every label with the updating flag set.
    for (position, &id) in members.iter().enumerate() {
        let Some(dimm) = inventory.get(id) else {
            return Err(NvmStatusCode::ErrDimmNotFound);
        };
        let device_handle = dimm.device_handle;
        label.position = position as u16;
        if let Err(code) = send_label_record(transport, device_handle, encode_label(&label)) {
            log::error!("label install failed on dimm {id}: {code}");
            inventory.resync_namespaces();
            status.update_general_status(NvmStatusCode::ErrNamespaceConfigurationBroken);
            return Err(NvmStatusCode::ErrNamespaceCouldNotInstall);
        }
        if let Some(dimm) = inventory.get_mut(id) {
            dimm.labels.upsert(label.clone());
        }
    }
    // Pass two: clear the updating flag everywhere.
    label.updating = false;
    for (position, &id) in members.iter().enumerate() {
        let Some(dimm) = inventory.get(id) else {
            return Err(NvmStatusCode::ErrDimmNotFound);
        };
        let device_handle = dimm.device_handle;
        label.position = position as u16;
        if let Err(code) = send_label_record(transport, device_handle, encode_label(&label)) {
            log::error!("label commit failed on dimm {id}: {code}");
            inventory.resync_namespaces();
            status.update_general_status(NvmStatusCode::ErrNamespaceConfigurationBroken);
            return Err(NvmStatusCode::ErrNamespaceCouldNotInstall);
        }
        if let Some(dimm) = inventory.get_mut(id) {
            dimm.labels.upsert(label.clone());
        }
    }

    let id = inventory.allocate_namespace_id();
    inventory.namespaces_mut().push(Namespace {
        id,
        guid,
        name: name.to_string(),
        block_size,
        block_count,
        btt,
        region_id,
        broken: false,
    });
    status.set_object_status(id, NvmStatusCode::Success);
    Ok(id)
}

fn find_namespace(inventory: &Inventory, namespace_id: u32) -> Result<Namespace, NvmStatusCode> {
    inventory
        .namespaces()
        .find(|ns| ns.id == namespace_id)
        .cloned()
        .ok_or(NvmStatusCode::ErrNamespaceDoesNotExist)
}

/// Deletes a namespace by removing its labels from every member DIMM.
pub fn delete_namespace<T: PassThru>(
    transport: &mut T,
    inventory: &mut Inventory,
    namespace_id: u32,
    status: &mut CommandStatus,
) -> Result<(), NvmStatusCode> {
    status.object_type = ObjectType::Namespace;
    let namespace = find_namespace(inventory, namespace_id).inspect_err(|&code| {
        status.update_general_status(code);
    })?;
    let members = inventory
        .region(namespace.region_id)
        .map(|r| r.dimm_ids.clone())
        .unwrap_or_else(|| {
            // Region is gone but labels may linger; address every DIMM that
            // still carries one.
            inventory
                .dimms()
                .filter(|d| d.labels.get(namespace.guid).is_some())
                .map(|d| d.id)
                .collect()
        });

    let mut payload = vec![RECORD_REMOVE];
    payload.extend_from_slice(namespace.guid.as_bytes());
    for &id in &members {
        let Some(dimm) = inventory.get(id) else {
            return Err(NvmStatusCode::ErrDimmNotFound);
        };
        if dimm.labels.get(namespace.guid).is_none() {
            continue;
        }
        let device_handle = dimm.device_handle;
        if let Err(code) = send_label_record(transport, device_handle, payload.clone()) {
            log::error!("label removal failed on dimm {id}: {code}");
            inventory.resync_namespaces();
            status.update_general_status(NvmStatusCode::ErrNamespaceConfigurationBroken);
            return Err(NvmStatusCode::ErrNamespaceCouldNotUninstall);
        }
        if let Some(dimm) = inventory.get_mut(id) {
            dimm.labels.remove(namespace.guid);
        }
    }
    inventory.namespaces_mut().retain(|ns| ns.id != namespace_id);
    status.set_object_status(namespace_id, NvmStatusCode::Success);
    Ok(())
}

/// Renames a namespace, rewriting the label on every member DIMM with the
/// same two-pass protocol as creation.
pub fn modify_namespace<T: PassThru>(
    transport: &mut T,
    inventory: &mut Inventory,
    namespace_id: u32,
    new_name: &str,
    status: &mut CommandStatus,
) -> Result<(), NvmStatusCode> {
    status.object_type = ObjectType::Namespace;
    let namespace = find_namespace(inventory, namespace_id).inspect_err(|&code| {
        status.update_general_status(code);
    })?;
    let members: Vec<_> = inventory
        .dimms()
        .filter(|d| d.labels.get(namespace.guid).is_some())
        .map(|d| d.id)
        .collect();
    for &id in &members {
        let Some(dimm) = inventory.get(id) else {
            return Err(NvmStatusCode::ErrDimmNotFound);
        };
        if !dimm.labels.supports_rename() {
            status.update_general_status(NvmStatusCode::ErrRenameNamespaceNotSupported);
            return Err(NvmStatusCode::ErrRenameNamespaceNotSupported);
        }
    }

    for pass_updating in [true, false] {
        for &id in &members {
            let Some(dimm) = inventory.get(id) else {
                return Err(NvmStatusCode::ErrDimmNotFound);
            };
            let Some(mut label) = dimm.labels.get(namespace.guid).cloned() else {
                continue;
            };
            let device_handle = dimm.device_handle;
            label.name = new_name.to_string();
            label.updating = pass_updating;
            if let Err(code) = send_label_record(transport, device_handle, encode_label(&label)) {
                inventory.resync_namespaces();
                status.update_general_status(NvmStatusCode::ErrNamespaceConfigurationBroken);
                return Err(NvmStatusCode::ErrNamespaceConfigurationBroken);
            }
            if let Some(dimm) = inventory.get_mut(id) {
                dimm.labels.upsert(label);
            }
        }
    }
    if let Some(ns) = inventory.namespaces_mut().iter_mut().find(|ns| ns.id == namespace_id) {
        ns.name = new_name.to_string();
    }
    status.set_object_status(namespace_id, NvmStatusCode::Success);
    Ok(())
}
