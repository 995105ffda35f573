//! Region goal provisioning.
//!
//! A goal is a pending capacity configuration staged into each DIMM's
//! platform config data. BIOS applies it at the next boot; until then the
//! goal can be inspected, dumped to text, or deleted. Creation validates the
//! whole request up front, plans each socket with the capacity planner, and
//! only then touches hardware, rolling back already-written DIMMs if a later
//! write fails so a socket is never left half-configured.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::error::{fw_status_to_code, transport_error_to_code};
use crate::inventory::{DimmId, Inventory, PartitionAlignments, PlatformCapabilities};
use crate::planner::{self, AppDirectPiece, DimmPlan};
use crate::resolver::{verify_target_dimms, DimmSelection};
use dcpmm_sdk::status::{CommandStatus, NvmStatusCode};
use dcpmm_sdk::types::{InterleaveSetType, PersistentMemType, SkuFlags};
use dcpmm_transport::command::{subop, FwCmd, Opcode};
use dcpmm_transport::PassThru;
use std::collections::BTreeMap;

/// Version tag of the goal dump text format.
const DUMP_FORMAT_HEADER: &str = "#dcpmm_goal_config v1";

/// A capacity provisioning request.
#[derive(Debug, Clone)]
pub struct GoalRequest {
    pub dimm_ids: Vec<DimmId>,
    pub socket_ids: Vec<u16>,
    /// Percent of raw capacity to map as volatile memory.
    pub volatile_percent: u8,
    /// Percent of raw capacity to hold back as unmapped storage.
    pub reserved_percent: u8,
    pub persistent_mem_type: PersistentMemType,
    /// Hold the last DIMM of each socket out of the mapped configuration.
    pub reserve_dimm: bool,
    /// Validate and plan the request without staging anything. Warnings such
    /// as a SKU-limit reduction are still reported.
    pub examine: bool,
}

/// Per-DIMM capacities a goal request would achieve, reported without
/// staging the goal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionGoalCapacities {
    pub dimm_id: DimmId,
    pub volatile_size: u64,
    pub appdirect_size: u64,
    pub reserved_size: u64,
    pub inaccessible_size: u64,
}

/// One DIMM's staged goal, mirroring what was written to its platform
/// config data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalConfig {
    pub volatile_size: u64,
    pub reserved_size: u64,
    pub appdirect: Vec<AppDirectPiece>,
}

impl GoalConfig {
    fn from_plan(plan: &DimmPlan) -> Self {
        Self {
            volatile_size: plan.volatile_size,
            reserved_size: plan.reserved_size,
            appdirect: plan.appdirect.clone(),
        }
    }

    /// Encodes the goal into the platform config data record format. The
    /// first byte marks presence so an empty record deletes the goal.
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.push(1u8);
        out.extend_from_slice(&self.volatile_size.to_le_bytes());
        out.extend_from_slice(&self.reserved_size.to_le_bytes());
        out.push(self.appdirect.len() as u8);
        for piece in &self.appdirect {
            out.extend_from_slice(&piece.size.to_le_bytes());
            out.extend_from_slice(&piece.set_index.to_le_bytes());
            out.push(match piece.interleave {
                InterleaveSetType::Interleaved => 1,
                InterleaveSetType::NonInterleaved => 0,
            });
        }
        out
    }
}

/// Writes one DIMM's platform config data record; `None` clears it.
fn write_goal_record<T: PassThru>(
    transport: &mut T,
    device_handle: u32,
    goal: Option<&GoalConfig>,
) -> Result<(), NvmStatusCode> {
    let payload = match goal {
        Some(goal) => goal.encode(),
        None => vec![0u8],
    };
    let mut cmd =
        FwCmd::new(device_handle, Opcode::SetAdminFeatures, subop::PLATFORM_DATA_INFO).with_input(payload);
    transport.pass_thru(&mut cmd).map_err(transport_error_to_code)?;
    if cmd.status.is_error() {
        return Err(fw_status_to_code(cmd.status));
    }
    Ok(())
}

fn wants_appdirect(request: &GoalRequest) -> bool {
    request.persistent_mem_type != PersistentMemType::Storage
        && (request.volatile_percent as u16 + request.reserved_percent as u16) < 100
}

fn validate_platform(
    request: &GoalRequest,
    capabilities: &PlatformCapabilities,
) -> Result<(), NvmStatusCode> {
    if !capabilities.mgmt_sw_config_supported {
        return Err(NvmStatusCode::ErrPlatformNotSupportManagementSoft);
    }
    if request.volatile_percent > 0 && !capabilities.memory_mode_supported {
        return Err(NvmStatusCode::ErrPlatformNotSupport2lmMode);
    }
    if wants_appdirect(request) && !capabilities.app_direct_supported {
        return Err(NvmStatusCode::ErrPlatformNotSupportPmMode);
    }
    Ok(())
}

fn validate_dimm_for_goal(
    inventory: &Inventory,
    id: DimmId,
    request: &GoalRequest,
) -> Result<(), NvmStatusCode> {
    let dimm = inventory.get(id).ok_or(NvmStatusCode::ErrDimmNotFound)?;
    if dimm.goal.is_some() {
        return Err(NvmStatusCode::ErrRegionCurrConfExists);
    }
    if !dimm.security.allows_goal_config() {
        return Err(NvmStatusCode::ErrCreateGoalNotAllowed);
    }
    if request.volatile_percent > 0 && !dimm.sku.contains(SkuFlags::MEMORY_MODE_ENABLED) {
        return Err(NvmStatusCode::ErrConfigNotSupportedByCurrentSku);
    }
    if wants_appdirect(request) && !dimm.sku.contains(SkuFlags::APP_DIRECT_MODE_ENABLED) {
        return Err(NvmStatusCode::ErrConfigNotSupportedByCurrentSku);
    }
    let on_namespace = inventory.namespaces().any(|ns| {
        inventory.region(ns.region_id).map(|r| r.dimm_ids.contains(&id)).unwrap_or(false)
    });
    if on_namespace {
        return Err(NvmStatusCode::ErrRegionGoalNamespaceExists);
    }
    Ok(())
}

/// A new AppDirect goal must not contradict the interleave format already
/// committed to regions elsewhere on the platform or staged on DIMMs outside
/// the target set; BIOS programs one format platform-wide.
fn check_appdirect_settings(
    inventory: &Inventory,
    capabilities: &PlatformCapabilities,
    targets: &[DimmId],
    request: &GoalRequest,
) -> Result<(), NvmStatusCode> {
    if !wants_appdirect(request) {
        return Ok(());
    }
    let requested = match request.persistent_mem_type {
        PersistentMemType::AppDirect => InterleaveSetType::Interleaved,
        PersistentMemType::AppDirectNonInterleaved => InterleaveSetType::NonInterleaved,
        PersistentMemType::Storage => return Ok(()),
    };
    // (0, 0) means BIOS published no recommendation; (1, 1) recommends the
    // by-one format only.
    if requested == InterleaveSetType::Interleaved && capabilities.recommended_interleave == (1, 1) {
        return Err(NvmStatusCode::ErrRegionConfUnsupportedConfig);
    }
    for region in inventory.regions() {
        if region.dimm_ids.iter().any(|id| targets.contains(id)) {
            continue;
        }
        let existing = if region.dimm_ids.len() > 1 {
            InterleaveSetType::Interleaved
        } else {
            InterleaveSetType::NonInterleaved
        };
        if existing != requested {
            return Err(NvmStatusCode::ErrRegionConfUnsupportedConfig);
        }
    }
    for dimm in inventory.dimms() {
        if targets.contains(&dimm.id) {
            continue;
        }
        let Some(goal) = &dimm.goal else { continue };
        if goal.appdirect.is_empty() {
            continue;
        }
        // Asymmetric plans stage a non-interleaved remainder next to the
        // interleaved set, so any interleaved piece marks the whole goal.
        let staged = if goal
            .appdirect
            .iter()
            .any(|p| p.interleave == InterleaveSetType::Interleaved)
        {
            InterleaveSetType::Interleaved
        } else {
            InterleaveSetType::NonInterleaved
        };
        if staged != requested {
            return Err(NvmStatusCode::ErrRegionConfUnsupportedConfig);
        }
    }
    Ok(())
}

fn group_by_socket(inventory: &Inventory, targets: &[DimmId]) -> BTreeMap<u16, Vec<(DimmId, u64)>> {
    let mut sockets: BTreeMap<u16, Vec<(DimmId, u64)>> = BTreeMap::new();
    for &id in targets {
        if let Some(dimm) = inventory.get(id) {
            sockets.entry(dimm.socket_id).or_default().push((id, dimm.raw_capacity));
        }
    }
    sockets
}

/// Commits a list of per-DIMM plans, rolling back every already-written
/// record if one write fails.
fn commit_plans<T: PassThru>(
    transport: &mut T,
    inventory: &mut Inventory,
    plans: &[DimmPlan],
    status: &mut CommandStatus,
) -> Result<(), NvmStatusCode> {
    let mut committed: Vec<DimmId> = Vec::new();
    for plan in plans {
        let Some(dimm) = inventory.get(plan.dimm_id) else {
            return Err(NvmStatusCode::ErrDimmNotFound);
        };
        let device_handle = dimm.device_handle;
        let goal = GoalConfig::from_plan(plan);
        if let Err(code) = write_goal_record(transport, device_handle, Some(&goal)) {
            log::error!("goal write failed on dimm {}: {code}, rolling back {} dimm(s)",
                plan.dimm_id, committed.len());
            for &written in &committed {
                if let Some(dimm) = inventory.get(written) {
                    let handle = dimm.device_handle;
                    if let Err(rollback) = write_goal_record(transport, handle, None) {
                        log::warn!("rollback failed on dimm {written}: {rollback}");
                    }
                }
                if let Some(dimm) = inventory.get_mut(written) {
                    dimm.goal = None;
                    dimm.reboot_needed = false;
                }
            }
            status.set_object_status(plan.dimm_id.0, code);
            status.update_general_status(NvmStatusCode::ErrRegionConfApplyingFailed);
            return Err(NvmStatusCode::ErrRegionConfApplyingFailed);
        }
        committed.push(plan.dimm_id);
        if let Some(dimm) = inventory.get_mut(plan.dimm_id) {
            dimm.goal = Some(goal);
            dimm.reboot_needed = true;
        }
        status.set_object_status(plan.dimm_id.0, NvmStatusCode::Success);
    }
    Ok(())
}

/// Runs the full validation and planning pipeline for a goal request without
/// touching hardware. Returns the per-DIMM plans and whether a socket SKU
/// limit reduced the mapped capacity.
fn plan_goal_request(
    inventory: &Inventory,
    capabilities: &PlatformCapabilities,
    alignments: &PartitionAlignments,
    request: &GoalRequest,
    status: &mut CommandStatus,
) -> Result<(Vec<DimmPlan>, bool), NvmStatusCode> {
    if request.volatile_percent as u16 + request.reserved_percent as u16 > 100 {
        status.update_general_status(NvmStatusCode::ErrInvalidParameter);
        return Err(NvmStatusCode::ErrInvalidParameter);
    }
    let targets = verify_target_dimms(
        inventory,
        &request.dimm_ids,
        &request.socket_ids,
        DimmSelection::Initialized,
        status,
    )?;
    validate_platform(request, capabilities).inspect_err(|&code| status.update_general_status(code))?;
    check_appdirect_settings(inventory, capabilities, &targets, request)
        .inspect_err(|&code| status.update_general_status(code))?;
    for &id in &targets {
        if let Err(code) = validate_dimm_for_goal(inventory, id, request) {
            status.set_object_status(id.0, code);
            return Err(code);
        }
    }

    let mut all_plans: Vec<DimmPlan> = Vec::new();
    let mut reduced = false;
    for (socket, dimms) in group_by_socket(inventory, &targets) {
        let mut plans = planner::plan_socket(
            &dimms,
            request.volatile_percent,
            request.reserved_percent,
            request.persistent_mem_type,
            request.reserve_dimm,
            alignments,
        )
        .inspect_err(|&code| status.update_general_status(code))?;
        if let Some(limit) = capabilities.socket_limit(socket) {
            reduced |= planner::apply_socket_sku_limit(&mut plans, limit, alignments);
        }
        all_plans.extend(plans);
    }
    Ok((all_plans, reduced))
}

/// Creates and stages a region goal across the requested DIMMs. With
/// `examine` set the request is validated and planned but nothing is staged.
pub fn create_goal_config<T: PassThru>(
    transport: &mut T,
    inventory: &mut Inventory,
    capabilities: &PlatformCapabilities,
    alignments: &PartitionAlignments,
    request: &GoalRequest,
    status: &mut CommandStatus,
) -> Result<(), NvmStatusCode> {
    let (all_plans, reduced) = plan_goal_request(inventory, capabilities, alignments, request, status)?;

    if request.examine {
        for plan in &all_plans {
            status.set_object_status(plan.dimm_id.0, NvmStatusCode::Success);
        }
    } else {
        commit_plans(transport, inventory, &all_plans, status)?;
    }

    if reduced {
        status.update_general_status(NvmStatusCode::WarnMappedMemReducedDueToCpuSku);
    }
    // Volatile goals only take effect once BIOS actually runs in 2LM mode.
    if request.volatile_percent > 0 && !capabilities.current_mode_2lm {
        status.update_general_status(NvmStatusCode::WarnTwoLmModeOff);
    }
    Ok(())
}

/// Reports the capacities a goal request would actually achieve after
/// alignment and SKU-limit reduction, one entry per target DIMM.
pub fn get_actual_region_goal_capacities(
    inventory: &Inventory,
    capabilities: &PlatformCapabilities,
    alignments: &PartitionAlignments,
    request: &GoalRequest,
    status: &mut CommandStatus,
) -> Result<Vec<RegionGoalCapacities>, NvmStatusCode> {
    let (plans, reduced) = plan_goal_request(inventory, capabilities, alignments, request, status)?;
    if reduced {
        status.update_general_status(NvmStatusCode::WarnMappedMemReducedDueToCpuSku);
    }
    Ok(plans
        .iter()
        .map(|plan| RegionGoalCapacities {
            dimm_id: plan.dimm_id,
            volatile_size: plan.volatile_size,
            appdirect_size: plan.appdirect_size(),
            reserved_size: plan.reserved_size,
            inaccessible_size: plan.inaccessible,
        })
        .collect())
}

/// Deletes the staged goal from each target DIMM.
pub fn delete_goal_config<T: PassThru>(
    transport: &mut T,
    inventory: &mut Inventory,
    dimm_ids: &[DimmId],
    socket_ids: &[u16],
    status: &mut CommandStatus,
) -> Result<(), NvmStatusCode> {
    let targets =
        verify_target_dimms(inventory, dimm_ids, socket_ids, DimmSelection::Initialized, status)?;
    for &id in &targets {
        let dimm = inventory.get(id).ok_or(NvmStatusCode::ErrDimmNotFound)?;
        if dimm.goal.is_none() {
            status.set_object_status(id.0, NvmStatusCode::ErrRegionGoalNoExistsOnDimm);
            return Err(NvmStatusCode::ErrRegionGoalNoExistsOnDimm);
        }
        if !dimm.security.allows_goal_config() {
            status.set_object_status(id.0, NvmStatusCode::ErrCreateGoalNotAllowed);
            return Err(NvmStatusCode::ErrCreateGoalNotAllowed);
        }
    }
    for &id in &targets {
        let Some(dimm) = inventory.get(id) else {
            return Err(NvmStatusCode::ErrDimmNotFound);
        };
        let device_handle = dimm.device_handle;
        if let Err(code) = write_goal_record(transport, device_handle, None) {
            status.set_object_status(id.0, code);
            return Err(code);
        }
        if let Some(dimm) = inventory.get_mut(id) {
            dimm.goal = None;
            dimm.reboot_needed = true;
        }
        status.set_object_status(id.0, NvmStatusCode::Success);
    }
    Ok(())
}

/// Returns the staged goal of every target DIMM that has one.
pub fn get_goal_configs(inventory: &Inventory, targets: &[DimmId]) -> Vec<(DimmId, GoalConfig)> {
    targets
        .iter()
        .filter_map(|&id| inventory.get(id).and_then(|d| d.goal.clone().map(|g| (id, g))))
        .collect()
}

/// Serializes every staged goal into the versioned text dump format.
pub fn dump_goal_config(inventory: &Inventory) -> Result<String, NvmStatusCode> {
    let mut lines = vec![DUMP_FORMAT_HEADER.to_string()];
    let mut found = false;
    for dimm in inventory.dimms() {
        let Some(goal) = &dimm.goal else { continue };
        found = true;
        let pieces = goal
            .appdirect
            .iter()
            .map(|p| {
                let tag = match p.interleave {
                    InterleaveSetType::Interleaved => 'I',
                    InterleaveSetType::NonInterleaved => 'N',
                };
                format!("{}:{}:{}", p.size, p.set_index, tag)
            })
            .collect::<Vec<_>>()
            .join(",");
        lines.push(format!(
            "{} {:#06x} {} {} {}",
            dimm.socket_id,
            dimm.device_handle,
            goal.volatile_size,
            goal.reserved_size,
            if pieces.is_empty() { "-".to_string() } else { pieces },
        ));
    }
    if !found {
        return Err(NvmStatusCode::ErrDumpNoConfiguredDimms);
    }
    Ok(lines.join("\n"))
}

fn parse_dump_line(line: &str) -> Result<(u16, u32, GoalConfig), NvmStatusCode> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(NvmStatusCode::ErrLoadInvalidDataInFile);
    }
    let socket: u16 = fields[0].parse().map_err(|_| NvmStatusCode::ErrLoadInvalidDataInFile)?;
    let handle = u32::from_str_radix(fields[1].trim_start_matches("0x"), 16)
        .map_err(|_| NvmStatusCode::ErrLoadInvalidDataInFile)?;
    let volatile_size: u64 = fields[2].parse().map_err(|_| NvmStatusCode::ErrLoadInvalidDataInFile)?;
    let reserved_size: u64 = fields[3].parse().map_err(|_| NvmStatusCode::ErrLoadInvalidDataInFile)?;
    let mut appdirect = Vec::new();
    if fields[4] != "-" {
        for piece in fields[4].split(',') {
            let parts: Vec<&str> = piece.split(':').collect();
            if parts.len() != 3 {
                return Err(NvmStatusCode::ErrLoadInvalidDataInFile);
            }
            let size: u64 = parts[0].parse().map_err(|_| NvmStatusCode::ErrLoadInvalidDataInFile)?;
            let set_index: u16 = parts[1].parse().map_err(|_| NvmStatusCode::ErrLoadInvalidDataInFile)?;
            let interleave = match parts[2] {
                "I" => InterleaveSetType::Interleaved,
                "N" => InterleaveSetType::NonInterleaved,
                _ => return Err(NvmStatusCode::ErrLoadInvalidDataInFile),
            };
            appdirect.push(AppDirectPiece { size, set_index, interleave });
        }
    }
    Ok((socket, handle, GoalConfig { volatile_size, reserved_size, appdirect }))
}

/// Restores a previously dumped goal configuration.
///
/// Each socket is applied independently: a socket whose DIMM population no
/// longer matches the dump fails without disturbing sockets already applied.
pub fn load_goal_config<T: PassThru>(
    transport: &mut T,
    inventory: &mut Inventory,
    capabilities: &PlatformCapabilities,
    dump: &str,
    status: &mut CommandStatus,
) -> Result<(), NvmStatusCode> {
    if !capabilities.mgmt_sw_config_supported {
        status.update_general_status(NvmStatusCode::ErrPlatformNotSupportManagementSoft);
        return Err(NvmStatusCode::ErrPlatformNotSupportManagementSoft);
    }
    let mut lines = dump.lines();
    match lines.next() {
        Some(header) if header.trim() == DUMP_FORMAT_HEADER => {}
        Some(_) => {
            status.update_general_status(NvmStatusCode::ErrLoadVersion);
            return Err(NvmStatusCode::ErrLoadVersion);
        }
        None => {
            status.update_general_status(NvmStatusCode::ErrLoadInvalidDataInFile);
            return Err(NvmStatusCode::ErrLoadInvalidDataInFile);
        }
    }

    let mut by_socket: BTreeMap<u16, Vec<(u32, GoalConfig)>> = BTreeMap::new();
    for line in lines.filter(|l| !l.trim().is_empty() && !l.starts_with('#')) {
        let (socket, handle, goal) =
            parse_dump_line(line).inspect_err(|&code| status.update_general_status(code))?;
        by_socket.entry(socket).or_default().push((handle, goal));
    }
    if by_socket.is_empty() {
        status.update_general_status(NvmStatusCode::ErrLoadInvalidDataInFile);
        return Err(NvmStatusCode::ErrLoadInvalidDataInFile);
    }

    let mut first_error: Option<NvmStatusCode> = None;
    for (socket, entries) in by_socket {
        if let Err(code) = load_socket(transport, inventory, socket, entries, status) {
            status.update_general_status(code);
            first_error.get_or_insert(code);
        }
    }
    match first_error {
        Some(code) => Err(code),
        None => Ok(()),
    }
}

/// Validates and applies one socket's worth of dump entries. A write failure
/// rolls back the records already written for this socket so it is never
/// left half-configured; other sockets are unaffected.
fn load_socket<T: PassThru>(
    transport: &mut T,
    inventory: &mut Inventory,
    socket: u16,
    entries: Vec<(u32, GoalConfig)>,
    status: &mut CommandStatus,
) -> Result<(), NvmStatusCode> {
    let present = inventory
        .dimms()
        .filter(|d| d.socket_id == socket && d.is_manageable())
        .count();
    if present != entries.len() {
        return Err(NvmStatusCode::ErrLoadDimmCountMismatch);
    }
    let mut socket_plan: Vec<(DimmId, GoalConfig)> = Vec::new();
    for (handle, goal) in entries {
        let Some(dimm) = inventory.dimms().find(|d| d.device_handle == handle) else {
            return Err(NvmStatusCode::ErrLoadDimmCountMismatch);
        };
        let total = goal.volatile_size
            + goal.reserved_size
            + goal.appdirect.iter().map(|p| p.size).sum::<u64>();
        if total > dimm.raw_capacity {
            return Err(NvmStatusCode::ErrLoadImproperConfigInFile);
        }
        socket_plan.push((dimm.id, goal));
    }

    let mut written: Vec<DimmId> = Vec::new();
    for (id, goal) in socket_plan {
        let Some(dimm) = inventory.get(id) else {
            return Err(NvmStatusCode::ErrDimmNotFound);
        };
        let device_handle = dimm.device_handle;
        if let Err(code) = write_goal_record(transport, device_handle, Some(&goal)) {
            log::error!(
                "goal load failed on dimm {id}: {code}, rolling back socket {socket}"
            );
            for &done in &written {
                if let Some(dimm) = inventory.get(done) {
                    let handle = dimm.device_handle;
                    if let Err(rollback) = write_goal_record(transport, handle, None) {
                        log::warn!("rollback failed on dimm {done}: {rollback}");
                    }
                }
                if let Some(dimm) = inventory.get_mut(done) {
                    dimm.goal = None;
                    dimm.reboot_needed = false;
                }
            }
            status.set_object_status(id.0, code);
            return Err(NvmStatusCode::ErrRegionConfApplyingFailed);
        }
        written.push(id);
        if let Some(dimm) = inventory.get_mut(id) {
            dimm.goal = Some(goal);
            dimm.reboot_needed = true;
        }
        status.set_object_status(id.0, NvmStatusCode::Success);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::tests::topology;
    use dcpmm_sdk::limits::GIB;
    use dcpmm_sdk::types::SecurityMask;
    use dcpmm_transport::command::FwStatus;
    use dcpmm_transport::MockPassThru;

    fn provisioning_inventory() -> Inventory {
        let dimms = (0..2)
            .map(|i| {
                let mut t = topology(0x10 + i, 0, 128 * GIB);
                t.sku = SkuFlags::MEMORY_MODE_ENABLED | SkuFlags::APP_DIRECT_MODE_ENABLED;
                t
            })
            .collect();
        Inventory::new(dimms, vec![])
    }

    fn full_capabilities() -> PlatformCapabilities {
        PlatformCapabilities {
            mgmt_sw_config_supported: true,
            memory_mode_supported: true,
            app_direct_supported: true,
            current_mode_2lm: true,
            ..Default::default()
        }
    }

    fn request(volatile: u8, reserved: u8) -> GoalRequest {
        GoalRequest {
            dimm_ids: vec![],
            socket_ids: vec![],
            volatile_percent: volatile,
            reserved_percent: reserved,
            persistent_mem_type: PersistentMemType::AppDirect,
            reserve_dimm: false,
            examine: false,
        }
    }

    #[test]
    fn creates_goal_on_all_dimms() {
        let mut inventory = provisioning_inventory();
        let mut transport = MockPassThru::new();
        transport.expect_pass_thru().times(2).returning(|cmd| {
            assert_eq!(cmd.opcode, Opcode::SetAdminFeatures);
            assert_eq!(cmd.input_payload[0], 1);
            Ok(())
        });

        let mut status = CommandStatus::default();
        create_goal_config(
            &mut transport,
            &mut inventory,
            &full_capabilities(),
            &PartitionAlignments::default(),
            &request(25, 0),
            &mut status,
        )
        .unwrap();

        for dimm in inventory.dimms() {
            let goal = dimm.goal.as_ref().unwrap();
            assert_eq!(goal.volatile_size, 32 * GIB);
            assert_eq!(goal.appdirect.len(), 1);
            assert!(dimm.reboot_needed);
        }
        assert!(status.is_success_for_all_objects());
    }

    #[test]
    fn examine_plans_without_touching_hardware() {
        let mut inventory = provisioning_inventory();
        let mut transport = MockPassThru::new();
        transport.expect_pass_thru().never();

        let mut status = CommandStatus::default();
        let request = GoalRequest { examine: true, ..request(25, 0) };
        create_goal_config(
            &mut transport,
            &mut inventory,
            &full_capabilities(),
            &PartitionAlignments::default(),
            &request,
            &mut status,
        )
        .unwrap();

        assert!(inventory.dimms().all(|d| d.goal.is_none() && !d.reboot_needed));
        assert!(status.is_success_for_all_objects());
    }

    #[test]
    fn examine_still_reports_sku_reduction() {
        use crate::inventory::SocketSkuLimit;

        let mut inventory = provisioning_inventory();
        let mut transport = MockPassThru::new();
        transport.expect_pass_thru().never();
        let capabilities = PlatformCapabilities {
            socket_sku_limits: vec![SocketSkuLimit { socket_id: 0, mapped_memory_limit: 64 * GIB }],
            ..full_capabilities()
        };

        let mut status = CommandStatus::default();
        let request = GoalRequest { examine: true, ..request(50, 0) };
        create_goal_config(
            &mut transport,
            &mut inventory,
            &capabilities,
            &PartitionAlignments::default(),
            &request,
            &mut status,
        )
        .unwrap();
        assert_eq!(status.general_status(), NvmStatusCode::WarnMappedMemReducedDueToCpuSku);
        assert!(inventory.dimms().all(|d| d.goal.is_none()));
    }

    #[test]
    fn capacity_report_conserves_raw_capacity() {
        let inventory = provisioning_inventory();
        let mut status = CommandStatus::default();
        let capacities = get_actual_region_goal_capacities(
            &inventory,
            &full_capabilities(),
            &PartitionAlignments::default(),
            &request(25, 5),
            &mut status,
        )
        .unwrap();

        assert_eq!(capacities.len(), 2);
        for entry in &capacities {
            assert_eq!(entry.volatile_size, 32 * GIB);
            assert_eq!(entry.reserved_size, 6 * GIB);
            assert_eq!(
                entry.volatile_size
                    + entry.appdirect_size
                    + entry.reserved_size
                    + entry.inaccessible_size,
                128 * GIB
            );
        }
        // The report stages nothing.
        assert!(inventory.dimms().all(|d| d.goal.is_none()));
    }

    #[test]
    fn overcommitted_percent_split_rejected_before_any_write() {
        let mut inventory = provisioning_inventory();
        let mut transport = MockPassThru::new();
        transport.expect_pass_thru().never();

        let mut status = CommandStatus::default();
        let result = create_goal_config(
            &mut transport,
            &mut inventory,
            &full_capabilities(),
            &PartitionAlignments::default(),
            &request(60, 50),
            &mut status,
        );
        assert_eq!(result, Err(NvmStatusCode::ErrInvalidParameter));
        assert_eq!(status.general_status(), NvmStatusCode::ErrInvalidParameter);
        assert!(inventory.dimms().all(|d| d.goal.is_none() && !d.reboot_needed));
    }

    #[test]
    fn interleave_conflict_with_committed_region_rejected() {
        // A third DIMM on another socket already carries a non-interleaved
        // region; an interleaved request for the first two must not proceed.
        let mut dimms: Vec<_> = (0..2)
            .map(|i| {
                let mut t = topology(0x10 + i, 0, 128 * GIB);
                t.sku = SkuFlags::MEMORY_MODE_ENABLED | SkuFlags::APP_DIRECT_MODE_ENABLED;
                t
            })
            .collect();
        let mut other = topology(0x20, 1, 128 * GIB);
        other.committed_appdirect = vec![(0xABCD, 64 * GIB)];
        dimms.push(other);
        let mut inventory = Inventory::new(dimms, vec![]);

        let mut transport = MockPassThru::new();
        transport.expect_pass_thru().never();
        let mut status = CommandStatus::default();
        let request = GoalRequest {
            dimm_ids: vec![DimmId(1), DimmId(2)],
            ..request(25, 0)
        };
        let result = create_goal_config(
            &mut transport,
            &mut inventory,
            &full_capabilities(),
            &PartitionAlignments::default(),
            &request,
            &mut status,
        );
        assert_eq!(result, Err(NvmStatusCode::ErrRegionConfUnsupportedConfig));
        assert!(inventory.dimms().all(|d| d.goal.is_none()));
    }

    #[test]
    fn warns_when_2lm_is_off() {
        let mut inventory = provisioning_inventory();
        let mut transport = MockPassThru::new();
        transport.expect_pass_thru().returning(|_| Ok(()));
        let capabilities = PlatformCapabilities { current_mode_2lm: false, ..full_capabilities() };

        let mut status = CommandStatus::default();
        create_goal_config(
            &mut transport,
            &mut inventory,
            &capabilities,
            &PartitionAlignments::default(),
            &request(50, 0),
            &mut status,
        )
        .unwrap();
        assert_eq!(status.general_status(), NvmStatusCode::WarnTwoLmModeOff);
    }

    #[test]
    fn existing_goal_blocks_creation() {
        let mut inventory = provisioning_inventory();
        inventory.get_mut(DimmId(1)).unwrap().goal =
            Some(GoalConfig { volatile_size: GIB, reserved_size: 0, appdirect: vec![] });

        let mut transport = MockPassThru::new();
        let mut status = CommandStatus::default();
        let result = create_goal_config(
            &mut transport,
            &mut inventory,
            &full_capabilities(),
            &PartitionAlignments::default(),
            &request(25, 0),
            &mut status,
        );
        assert_eq!(result, Err(NvmStatusCode::ErrRegionCurrConfExists));
    }

    #[test]
    fn locked_dimm_blocks_creation() {
        let mut inventory = provisioning_inventory();
        inventory.get_mut(DimmId(2)).unwrap().security = SecurityMask::ENABLED | SecurityMask::LOCKED;

        let mut transport = MockPassThru::new();
        let mut status = CommandStatus::default();
        let result = create_goal_config(
            &mut transport,
            &mut inventory,
            &full_capabilities(),
            &PartitionAlignments::default(),
            &request(25, 0),
            &mut status,
        );
        assert_eq!(result, Err(NvmStatusCode::ErrCreateGoalNotAllowed));
        // Nothing was written; neither DIMM carries a goal.
        assert!(inventory.dimms().all(|d| d.goal.is_none()));
    }

    #[test]
    fn failed_write_rolls_back_earlier_dimms() {
        let mut inventory = provisioning_inventory();
        let mut transport = MockPassThru::new();
        transport.expect_pass_thru().returning(|cmd| {
            // First DIMM accepts its record, the second reports busy, and the
            // rollback clear for the first is the third call.
            if cmd.dimm_id == 0x11 && cmd.input_payload[0] == 1 {
                cmd.status = FwStatus::DEVICE_BUSY;
            }
            Ok(())
        });

        let mut status = CommandStatus::default();
        let result = create_goal_config(
            &mut transport,
            &mut inventory,
            &full_capabilities(),
            &PartitionAlignments::default(),
            &request(25, 0),
            &mut status,
        );
        assert_eq!(result, Err(NvmStatusCode::ErrRegionConfApplyingFailed));
        assert!(inventory.dimms().all(|d| d.goal.is_none() && !d.reboot_needed));
    }

    #[test]
    fn delete_requires_a_goal() {
        let mut inventory = provisioning_inventory();
        let mut transport = MockPassThru::new();
        let mut status = CommandStatus::default();
        let result = delete_goal_config(&mut transport, &mut inventory, &[], &[], &mut status);
        assert_eq!(result, Err(NvmStatusCode::ErrRegionGoalNoExistsOnDimm));
    }

    #[test]
    fn dump_and_load_round_trip() {
        let mut inventory = provisioning_inventory();
        let mut transport = MockPassThru::new();
        transport.expect_pass_thru().returning(|_| Ok(()));
        let mut status = CommandStatus::default();
        create_goal_config(
            &mut transport,
            &mut inventory,
            &full_capabilities(),
            &PartitionAlignments::default(),
            &request(25, 5),
            &mut status,
        )
        .unwrap();

        let dump = dump_goal_config(&inventory).unwrap();
        assert!(dump.starts_with(DUMP_FORMAT_HEADER));
        let saved: Vec<GoalConfig> = inventory.dimms().filter_map(|d| d.goal.clone()).collect();

        // Restore into a fresh, unconfigured inventory.
        let mut fresh = provisioning_inventory();
        let mut transport = MockPassThru::new();
        transport.expect_pass_thru().times(2).returning(|_| Ok(()));
        let mut status = CommandStatus::default();
        load_goal_config(&mut transport, &mut fresh, &full_capabilities(), &dump, &mut status).unwrap();
        let restored: Vec<GoalConfig> = fresh.dimms().filter_map(|d| d.goal.clone()).collect();
        assert_eq!(saved, restored);
    }

    #[test]
    fn load_failure_rolls_back_its_socket_and_continues() {
        let mut dimms: Vec<_> =
            (0..2).map(|i| topology(0x10 + i, 0, 128 * GIB)).collect();
        dimms.push(topology(0x20, 1, 128 * GIB));
        let mut inventory = Inventory::new(dimms, vec![]);

        let mut transport = MockPassThru::new();
        transport.expect_pass_thru().times(4).returning(|cmd| {
            // Socket 0: first record lands, second reports busy, then the
            // first is cleared again. Socket 1 still gets its record.
            if cmd.dimm_id == 0x11 && cmd.input_payload[0] == 1 {
                cmd.status = FwStatus::DEVICE_BUSY;
            }
            Ok(())
        });

        let dump = format!(
            "{DUMP_FORMAT_HEADER}\n0 0x0010 {g} 0 -\n0 0x0011 {g} 0 -\n1 0x0020 {g} 0 -",
            g = GIB
        );
        let mut status = CommandStatus::default();
        let result =
            load_goal_config(&mut transport, &mut inventory, &full_capabilities(), &dump, &mut status);
        assert_eq!(result, Err(NvmStatusCode::ErrRegionConfApplyingFailed));

        // Socket 0 is fully rolled back, socket 1 fully applied.
        assert!(inventory.get(DimmId(1)).unwrap().goal.is_none());
        assert!(!inventory.get(DimmId(1)).unwrap().reboot_needed);
        assert!(inventory.get(DimmId(2)).unwrap().goal.is_none());
        assert!(inventory.get(DimmId(3)).unwrap().goal.is_some());
        assert!(inventory.get(DimmId(3)).unwrap().reboot_needed);
    }

    #[test]
    fn load_rejects_unknown_version() {
        let mut inventory = provisioning_inventory();
        let mut transport = MockPassThru::new();
        let mut status = CommandStatus::default();
        let result = load_goal_config(
            &mut transport,
            &mut inventory,
            &full_capabilities(),
            "#dcpmm_goal_config v9\n0 0x0010 0 0 -",
            &mut status,
        );
        assert_eq!(result, Err(NvmStatusCode::ErrLoadVersion));
    }

    #[test]
    fn load_rejects_population_mismatch() {
        let mut inventory = provisioning_inventory();
        let mut transport = MockPassThru::new();
        let mut status = CommandStatus::default();
        let dump = format!("{DUMP_FORMAT_HEADER}\n0 {:#06x} {} 0 -", 0x10, GIB);
        let result =
            load_goal_config(&mut transport, &mut inventory, &full_capabilities(), &dump, &mut status);
        assert_eq!(result, Err(NvmStatusCode::ErrLoadDimmCountMismatch));
    }
}
