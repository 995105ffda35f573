//! DIMM inventory.
//!
//! The inventory is built once at startup from platform enumeration data
//! (NFIT/SMBIOS-derived topology records) and owns every [`Dimm`] record in a
//! stable-index arena. All other components hold [`DimmId`] handles and look
//! records up by id; nothing holds a reference across operations. DIMMs that
//! only respond on SMBUS (DDRT interface untrained) live in a separate
//! uninitialized list.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::goal::GoalConfig;
use crate::namespace::{Label, LabelStorage, Namespace};
use core::fmt::Display;
use dcpmm_sdk::limits::GIB;
use dcpmm_sdk::types::ConfigStatus;
use dcpmm_sdk::{ApiVersion, BootStatusRegister, FwVersion, SecurityMask, SkuFlags};
use std::collections::HashMap;

/// Vendor id of supported modules.
pub const VENDOR_ID_INTEL: u16 = 0x8089;

/// NFIT interface format code for DCPMM modules.
pub const SUPPORTED_INTERFACE_FORMAT_CODE: u16 = 0x0301;

/// Stable handle of one DIMM record in the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DimmId(pub u32);

impl Display for DimmId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Stable handle of one committed region (interleave set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionId(pub u16);

/// One enumerated module, as produced by ACPI/SMBIOS parsing.
#[derive(Debug, Clone, Default)]
pub struct DimmTopology {
    pub device_handle: u32,
    pub socket_id: u16,
    pub imc_id: u8,
    pub channel_id: u8,
    pub channel_pos: u8,
    pub vendor_id: u16,
    pub subsystem_device_id: u16,
    pub interface_format_code: u16,
    pub raw_capacity: u64,
    pub sku: SkuFlags,
    pub security: SecurityMask,
    pub fw_version: FwVersion,
    pub fw_api_version: ApiVersion,
    pub boot_status: BootStatusRegister,
    pub config_status: ConfigStatus,
    /// Committed AppDirect pieces: (interleave set cookie, size on this DIMM).
    pub committed_appdirect: Vec<(u64, u64)>,
    pub mapped_volatile_capacity: u64,
}

/// One physical NVDIMM. Created at inventory build, mutated in place by the
/// planner, security, and firmware engines, never destroyed mid-run.
#[derive(Debug, Clone)]
pub struct Dimm {
    pub id: DimmId,
    pub device_handle: u32,
    pub socket_id: u16,
    pub imc_id: u8,
    pub channel_id: u8,
    pub channel_pos: u8,
    pub vendor_id: u16,
    pub subsystem_device_id: u16,
    pub interface_format_code: u16,
    pub raw_capacity: u64,
    pub mapped_volatile_capacity: u64,
    pub mapped_persistent_capacity: u64,
    pub sku: SkuFlags,
    pub security: SecurityMask,
    pub config_status: ConfigStatus,
    pub fw_version: FwVersion,
    pub fw_api_version: ApiVersion,
    pub staged_fw_version: FwVersion,
    pub boot_status: BootStatusRegister,
    pub reboot_needed: bool,
    /// Pending goal configuration, applied by BIOS at next boot.
    pub goal: Option<GoalConfig>,
    /// Namespace label storage area, mirroring on-media state.
    pub labels: LabelStorage,
    /// Committed AppDirect pieces as (interleave set cookie, size) pairs.
    pub committed_appdirect: Vec<(u64, u64)>,
}

impl Dimm {
    fn from_topology(id: DimmId, t: &DimmTopology) -> Self {
        let mapped_persistent_capacity = t.committed_appdirect.iter().map(|(_, size)| size).sum();
        Self {
            id,
            device_handle: t.device_handle,
            socket_id: t.socket_id,
            imc_id: t.imc_id,
            channel_id: t.channel_id,
            channel_pos: t.channel_pos,
            vendor_id: t.vendor_id,
            subsystem_device_id: t.subsystem_device_id,
            interface_format_code: t.interface_format_code,
            raw_capacity: t.raw_capacity,
            mapped_volatile_capacity: t.mapped_volatile_capacity,
            mapped_persistent_capacity,
            sku: t.sku,
            security: t.security,
            config_status: t.config_status,
            fw_version: t.fw_version,
            fw_api_version: t.fw_api_version,
            staged_fw_version: FwVersion::default(),
            boot_status: t.boot_status,
            reboot_needed: false,
            goal: None,
            labels: LabelStorage::default(),
            committed_appdirect: t.committed_appdirect.clone(),
        }
    }

    /// A DIMM is manageable when the vendor matches, the interface format
    /// code is one we speak, and the firmware API version is in the
    /// supported range.
    pub fn is_manageable(&self) -> bool {
        self.vendor_id == VENDOR_ID_INTEL
            && self.interface_format_code == SUPPORTED_INTERFACE_FORMAT_CODE
            && is_fw_api_version_supported(self.fw_api_version)
    }

    /// Whether BIOS has applied a configuration to this DIMM.
    pub fn is_configured(&self) -> bool {
        self.config_status == ConfigStatus::Success
    }
}

/// Supported firmware mailbox API range: 1.2 up to any 3.x.
pub fn is_fw_api_version_supported(api: ApiVersion) -> bool {
    match api.major {
        1 => api.minor >= 2,
        2 | 3 => true,
        _ => false,
    }
}

/// A committed interleave set: capacity from one or more DIMMs mapped into a
/// single contiguous address range.
#[derive(Debug, Clone)]
pub struct Region {
    pub id: RegionId,
    pub socket_id: u16,
    pub cookie: u64,
    pub dimm_ids: Vec<DimmId>,
    pub capacity: u64,
}

/// Per-socket SKU limit on total mapped (volatile + AppDirect) capacity.
#[derive(Debug, Clone, Copy)]
pub struct SocketSkuLimit {
    pub socket_id: u16,
    pub mapped_memory_limit: u64,
}

/// Platform capability data from the PCAT, captured at inventory build.
#[derive(Debug, Clone, Default)]
pub struct PlatformCapabilities {
    /// BIOS allows configuration changes through management software.
    pub mgmt_sw_config_supported: bool,
    /// Platform supports 2LM (Memory Mode).
    pub memory_mode_supported: bool,
    /// Platform supports AppDirect.
    pub app_direct_supported: bool,
    /// BIOS currently operates in 2LM mode; volatile goals only take effect
    /// when it does.
    pub current_mode_2lm: bool,
    /// Platform supports security operations on DIMMs.
    pub security_supported: bool,
    /// Recommended interleave format (imc ways, channel ways).
    pub recommended_interleave: (u8, u8),
    pub socket_sku_limits: Vec<SocketSkuLimit>,
}

impl PlatformCapabilities {
    pub fn socket_limit(&self, socket_id: u16) -> Option<u64> {
        self.socket_sku_limits.iter().find(|l| l.socket_id == socket_id).map(|l| l.mapped_memory_limit)
    }
}

/// Capacity alignment units the BIOS enforces on partition requests.
#[derive(Debug, Clone, Copy)]
pub struct PartitionAlignments {
    pub volatile_alignment: u64,
    pub persistent_alignment: u64,
    pub partition_alignment: u64,
}

impl Default for PartitionAlignments {
    fn default() -> Self {
        Self { volatile_alignment: GIB, persistent_alignment: GIB, partition_alignment: GIB }
    }
}

/// The device inventory: exclusive owner of all DIMM, region, and namespace
/// records.
#[derive(Debug, Default)]
pub struct Inventory {
    dimms: Vec<Dimm>,
    index: HashMap<DimmId, usize>,
    uninitialized: Vec<Dimm>,
    uninitialized_index: HashMap<DimmId, usize>,
    regions: Vec<Region>,
    namespaces: Vec<Namespace>,
    next_namespace_id: u32,
}

impl Inventory {
    /// Builds the inventory from enumeration data. `initialized` are DIMMs
    /// reachable over DDRT; `uninitialized` are SMBUS-only modules.
    pub fn new(initialized: Vec<DimmTopology>, uninitialized: Vec<DimmTopology>) -> Self {
        let mut inventory = Inventory { next_namespace_id: 1, ..Default::default() };
        for (i, topology) in initialized.iter().enumerate() {
            let id = DimmId(i as u32 + 1);
            inventory.index.insert(id, inventory.dimms.len());
            inventory.dimms.push(Dimm::from_topology(id, topology));
        }
        let base = initialized.len() as u32;
        for (i, topology) in uninitialized.iter().enumerate() {
            let id = DimmId(base + i as u32 + 1);
            inventory.uninitialized_index.insert(id, inventory.uninitialized.len());
            inventory.uninitialized.push(Dimm::from_topology(id, topology));
        }
        inventory.rebuild_regions();
        inventory
    }

    pub fn get(&self, id: DimmId) -> Option<&Dimm> {
        self.index.get(&id).map(|&i| &self.dimms[i])
    }

    pub fn get_mut(&mut self, id: DimmId) -> Option<&mut Dimm> {
        self.index.get(&id).copied().map(move |i| &mut self.dimms[i])
    }

    pub fn get_uninitialized(&self, id: DimmId) -> Option<&Dimm> {
        self.uninitialized_index.get(&id).map(|&i| &self.uninitialized[i])
    }

    pub fn get_uninitialized_mut(&mut self, id: DimmId) -> Option<&mut Dimm> {
        self.uninitialized_index.get(&id).copied().map(move |i| &mut self.uninitialized[i])
    }

    pub fn dimms(&self) -> impl Iterator<Item = &Dimm> {
        self.dimms.iter()
    }

    pub fn uninitialized_dimms(&self) -> impl Iterator<Item = &Dimm> {
        self.uninitialized.iter()
    }

    pub fn dimm_count(&self) -> usize {
        self.dimms.len()
    }

    pub fn manageable_ids(&self) -> Vec<DimmId> {
        self.dimms.iter().filter(|d| d.is_manageable()).map(|d| d.id).collect()
    }

    pub fn uninitialized_ids(&self) -> Vec<DimmId> {
        self.uninitialized.iter().map(|d| d.id).collect()
    }

    pub fn socket_exists(&self, socket_id: u16) -> bool {
        self.dimms.iter().any(|d| d.socket_id == socket_id)
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.iter()
    }

    pub fn namespaces_mut(&mut self) -> &mut Vec<Namespace> {
        &mut self.namespaces
    }

    pub fn allocate_namespace_id(&mut self) -> u32 {
        let id = self.next_namespace_id;
        self.next_namespace_id += 1;
        id
    }

    /// Free capacity of a region: its size minus every namespace carved from it.
    pub fn region_free_capacity(&self, id: RegionId) -> u64 {
        let Some(region) = self.region(id) else { return 0 };
        let used: u64 = self
            .namespaces
            .iter()
            .filter(|ns| ns.region_id == id)
            .map(|ns| ns.block_size as u64 * ns.block_count)
            .sum();
        region.capacity.saturating_sub(used)
    }

    /// Rebuilds the region list from committed per-DIMM label storage and
    /// partition data. Regions are interleave sets grouped by cookie.
    pub fn rebuild_regions(&mut self) {
        self.regions.clear();
        let mut by_cookie: HashMap<u64, (u16, Vec<DimmId>, u64)> = HashMap::new();
        let mut order: Vec<u64> = Vec::new();
        for dimm in &self.dimms {
            for &(cookie, size) in &dimm.committed_appdirect {
                let entry = by_cookie.entry(cookie).or_insert_with(|| {
                    order.push(cookie);
                    (dimm.socket_id, Vec::new(), 0)
                });
                entry.1.push(dimm.id);
                entry.2 += size;
            }
        }
        for (i, cookie) in order.iter().enumerate() {
            if let Some((socket_id, dimm_ids, capacity)) = by_cookie.remove(cookie) {
                self.regions.push(Region {
                    id: RegionId(i as u16 + 1),
                    socket_id,
                    cookie: *cookie,
                    dimm_ids,
                    capacity,
                });
            }
        }
    }

    /// Rebuilds the namespace list from the label storage areas of all DIMMs.
    ///
    /// A namespace whose labels are incomplete (fewer members than the label
    /// claims) or still flagged as updating is kept but marked broken. This
    /// is the resynchronization step after a partial label write.
    pub fn resync_namespaces(&mut self) {
        let mut grouped: HashMap<uuid::Uuid, Vec<(DimmId, Label)>> = HashMap::new();
        let mut order: Vec<uuid::Uuid> = Vec::new();
        for dimm in &self.dimms {
            for label in dimm.labels.labels() {
                if !grouped.contains_key(&label.guid) {
                    order.push(label.guid);
                }
                grouped.entry(label.guid).or_default().push((dimm.id, label.clone()));
            }
        }

        let existing_ids: HashMap<uuid::Uuid, u32> = self.namespaces.iter().map(|ns| (ns.guid, ns.id)).collect();
        self.namespaces.clear();
        for guid in order {
            let Some(members) = grouped.remove(&guid) else { continue };
            let Some(first) = members.first().map(|(_, l)| l) else { continue };
            let complete =
                members.len() as u16 == first.member_count && members.iter().all(|(_, l)| !l.updating);
            let id = existing_ids.get(&guid).copied().unwrap_or_else(|| {
                let id = self.next_namespace_id;
                self.next_namespace_id += 1;
                id
            });
            self.namespaces.push(Namespace {
                id,
                guid,
                name: first.name.clone(),
                block_size: first.block_size,
                block_count: first.block_count,
                btt: first.btt,
                region_id: first.region_id,
                broken: !complete,
            });
        }
    }
}
