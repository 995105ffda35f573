//! The management service facade.
//!
//! [`ConfigService`] owns the transport and the inventory and exposes the
//! public operation surface: inventory queries, security transitions, goal
//! provisioning, namespace management, and firmware updates. Engines report
//! through a per-operation [`CommandStatus`]; the facade returns it on
//! success and folds it into an [`NvmError`] on failure so callers always
//! see the per-object detail.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::error::{fw_status_to_code, transport_error_to_code, NvmError};
use crate::firmware::{self, FwUpdateStatus, LongOpStatus};
use crate::goal::{self, GoalConfig, GoalRequest, RegionGoalCapacities};
use crate::inventory::{Dimm, DimmId, Inventory, PartitionAlignments, PlatformCapabilities, Region};
use crate::namespace::{self, Namespace};
use crate::resolver::{verify_target_dimms, DimmSelection};
use crate::security::{self, SecurityOperation};
use dcpmm_sdk::status::{CommandStatus, NvmStatusCode, ObjectType};
use dcpmm_sdk::types::SecurityMask;
use dcpmm_sdk::FwVersion;
use dcpmm_transport::command::{subop, FwCmd, Opcode};
use dcpmm_transport::PassThru;
use std::time::Duration;

/// Error kinds accepted by the error injection command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedError {
    Poison { address: u64 },
    Temperature { celsius: u16 },
    PackageSparing,
    PercentageRemaining { percent: u8 },
    DirtyShutdown,
}

/// Volatile/persistent split currently programmed into one DIMM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionInfo {
    pub volatile_capacity: u64,
    pub persistent_capacity: u64,
    pub volatile_start: u64,
    pub persistent_start: u64,
}

/// Owns the device inventory and a mailbox transport, and runs every
/// management operation against them.
pub struct ConfigService<T: PassThru> {
    transport: T,
    inventory: Inventory,
    capabilities: PlatformCapabilities,
    alignments: PartitionAlignments,
}

fn finish(status: CommandStatus, result: Result<(), NvmStatusCode>) -> Result<CommandStatus, NvmError> {
    match result {
        Ok(()) => Ok(status),
        Err(code) => Err(NvmError::new(code, status)),
    }
}

impl<T: PassThru> ConfigService<T> {
    pub fn new(
        transport: T,
        inventory: Inventory,
        capabilities: PlatformCapabilities,
        alignments: PartitionAlignments,
    ) -> Self {
        log::info!(
            "management service started: {} dimm(s), {} uninitialized",
            inventory.dimm_count(),
            inventory.uninitialized_ids().len()
        );
        Self { transport, inventory, capabilities, alignments }
    }

    // Inventory queries.

    pub fn dimms(&self) -> impl Iterator<Item = &Dimm> {
        self.inventory.dimms()
    }

    pub fn dimm(&self, id: DimmId) -> Option<&Dimm> {
        self.inventory.get(id)
    }

    pub fn uninitialized_dimms(&self) -> impl Iterator<Item = &Dimm> {
        self.inventory.uninitialized_dimms()
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.inventory.regions()
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.inventory.namespaces()
    }

    pub fn capabilities(&self) -> &PlatformCapabilities {
        &self.capabilities
    }

    // Security.

    /// Runs one security operation across the selected DIMMs.
    pub fn set_security_state(
        &mut self,
        dimm_ids: &[DimmId],
        socket_ids: &[u16],
        op: SecurityOperation,
        passphrase: Option<&str>,
        new_passphrase: Option<&str>,
    ) -> Result<CommandStatus, NvmError> {
        let mut status = CommandStatus::new(ObjectType::Dimm);
        let result = verify_target_dimms(
            &self.inventory,
            dimm_ids,
            socket_ids,
            DimmSelection::Initialized,
            &mut status,
        )
        .and_then(|targets| {
            security::set_security_state(
                &mut self.transport,
                &mut self.inventory,
                &self.capabilities,
                &targets,
                op,
                passphrase,
                new_passphrase,
                &mut status,
            )
        });
        finish(status, result)
    }

    /// Reads the live security state of one DIMM and refreshes the cache.
    pub fn get_security_state(&mut self, id: DimmId) -> Result<SecurityMask, NvmError> {
        let dimm = self
            .inventory
            .get(id)
            .ok_or_else(|| NvmError::new(NvmStatusCode::ErrDimmNotFound, CommandStatus::default()))?;
        let handle = dimm.device_handle;
        let mask = security::read_security_state(&mut self.transport, handle)
            .map_err(|code| NvmError::new(code, CommandStatus::default()))?;
        if let Some(dimm) = self.inventory.get_mut(id) {
            dimm.security = mask;
        }
        Ok(mask)
    }

    // Goal provisioning.

    pub fn create_goal_config(&mut self, request: &GoalRequest) -> Result<CommandStatus, NvmError> {
        let mut status = CommandStatus::new(ObjectType::Dimm);
        let result = goal::create_goal_config(
            &mut self.transport,
            &mut self.inventory,
            &self.capabilities,
            &self.alignments,
            request,
            &mut status,
        );
        finish(status, result)
    }

    /// Reports what a goal request would achieve per DIMM without staging
    /// anything, along with any planning warnings.
    pub fn get_actual_region_goal_capacities(
        &self,
        request: &GoalRequest,
    ) -> Result<(Vec<RegionGoalCapacities>, CommandStatus), NvmError> {
        let mut status = CommandStatus::new(ObjectType::Dimm);
        match goal::get_actual_region_goal_capacities(
            &self.inventory,
            &self.capabilities,
            &self.alignments,
            request,
            &mut status,
        ) {
            Ok(capacities) => Ok((capacities, status)),
            Err(code) => Err(NvmError::new(code, status)),
        }
    }

    pub fn delete_goal_config(
        &mut self,
        dimm_ids: &[DimmId],
        socket_ids: &[u16],
    ) -> Result<CommandStatus, NvmError> {
        let mut status = CommandStatus::new(ObjectType::Dimm);
        let result = goal::delete_goal_config(
            &mut self.transport,
            &mut self.inventory,
            dimm_ids,
            socket_ids,
            &mut status,
        );
        finish(status, result)
    }

    pub fn get_goal_configs(
        &self,
        dimm_ids: &[DimmId],
        socket_ids: &[u16],
    ) -> Result<Vec<(DimmId, GoalConfig)>, NvmError> {
        let mut status = CommandStatus::new(ObjectType::Dimm);
        let targets = verify_target_dimms(
            &self.inventory,
            dimm_ids,
            socket_ids,
            DimmSelection::Initialized,
            &mut status,
        )
        .map_err(|code| NvmError::new(code, status))?;
        Ok(goal::get_goal_configs(&self.inventory, &targets))
    }

    pub fn dump_goal_config(&self) -> Result<String, NvmError> {
        goal::dump_goal_config(&self.inventory)
            .map_err(|code| NvmError::new(code, CommandStatus::default()))
    }

    pub fn load_goal_config(&mut self, dump: &str) -> Result<CommandStatus, NvmError> {
        let mut status = CommandStatus::new(ObjectType::Dimm);
        let result = goal::load_goal_config(
            &mut self.transport,
            &mut self.inventory,
            &self.capabilities,
            dump,
            &mut status,
        );
        finish(status, result)
    }

    // Namespaces.

    pub fn create_namespace(
        &mut self,
        region_id: crate::inventory::RegionId,
        name: &str,
        block_size: u32,
        block_count: u64,
        btt: bool,
    ) -> Result<(u32, CommandStatus), NvmError> {
        let mut status = CommandStatus::new(ObjectType::Namespace);
        match namespace::create_namespace(
            &mut self.transport,
            &mut self.inventory,
            region_id,
            name,
            block_size,
            block_count,
            btt,
            &mut status,
        ) {
            Ok(id) => Ok((id, status)),
            Err(code) => Err(NvmError::new(code, status)),
        }
    }

    pub fn delete_namespace(&mut self, namespace_id: u32) -> Result<CommandStatus, NvmError> {
        let mut status = CommandStatus::new(ObjectType::Namespace);
        let result = namespace::delete_namespace(
            &mut self.transport,
            &mut self.inventory,
            namespace_id,
            &mut status,
        );
        finish(status, result)
    }

    pub fn modify_namespace(&mut self, namespace_id: u32, new_name: &str) -> Result<CommandStatus, NvmError> {
        let mut status = CommandStatus::new(ObjectType::Namespace);
        let result = namespace::modify_namespace(
            &mut self.transport,
            &mut self.inventory,
            namespace_id,
            new_name,
            &mut status,
        );
        finish(status, result)
    }

    // Firmware.

    /// Stages a firmware image across the selected DIMMs.
    pub fn update_fw(
        &mut self,
        dimm_ids: &[DimmId],
        socket_ids: &[u16],
        image: &[u8],
        examine_only: bool,
        force: bool,
    ) -> Result<(Vec<FwUpdateStatus>, CommandStatus), NvmError> {
        let mut status = CommandStatus::new(ObjectType::Dimm);
        let targets = verify_target_dimms(
            &self.inventory,
            dimm_ids,
            socket_ids,
            DimmSelection::Initialized,
            &mut status,
        )
        .map_err(|code| NvmError::new(code, status.clone()))?;
        match firmware::update_fw(
            &mut self.transport,
            &mut self.inventory,
            &targets,
            image,
            examine_only,
            force,
            false,
            &mut status,
        ) {
            Ok(results) => Ok((results, status)),
            Err(code) => Err(NvmError::new(code, status)),
        }
    }

    /// Stages a firmware image on SMBUS-only DIMMs through a recovery
    /// transport. The DDRT interface of such a DIMM is down, so the caller
    /// supplies the out-of-band transport explicitly.
    pub fn update_recovery_fw<R: PassThru>(
        &mut self,
        recovery_transport: &mut R,
        dimm_ids: &[DimmId],
        image: &[u8],
        force: bool,
    ) -> Result<(Vec<FwUpdateStatus>, CommandStatus), NvmError> {
        let mut status = CommandStatus::new(ObjectType::Dimm);
        let targets = verify_target_dimms(
            &self.inventory,
            dimm_ids,
            &[],
            DimmSelection::Uninitialized,
            &mut status,
        )
        .map_err(|code| NvmError::new(code, status.clone()))?;
        match firmware::update_fw(
            recovery_transport,
            &mut self.inventory,
            &targets,
            image,
            false,
            force,
            true,
            &mut status,
        ) {
            Ok(results) => Ok((results, status)),
            Err(code) => Err(NvmError::new(code, status)),
        }
    }

    pub fn get_fw_image_info(&mut self, id: DimmId) -> Result<FwVersion, NvmError> {
        let handle = self.device_handle(id)?;
        firmware::get_fw_image_info(&mut self.transport, handle)
            .map_err(|code| NvmError::new(code, CommandStatus::default()))
    }

    pub fn get_long_op_status(&mut self, id: DimmId) -> Result<LongOpStatus, NvmError> {
        let handle = self.device_handle(id)?;
        firmware::get_long_op_status(&mut self.transport, handle)
            .map_err(|code| NvmError::new(code, CommandStatus::default()))
    }

    /// Polls one DIMM's long operation status until it completes or
    /// `timeout` elapses.
    pub fn poll_long_op_status(
        &mut self,
        id: DimmId,
        timeout: Duration,
    ) -> Result<LongOpStatus, NvmError> {
        let handle = self.device_handle(id)?;
        firmware::poll_long_op_status(&mut self.transport, handle, timeout)
            .map_err(|code| NvmError::new(code, CommandStatus::default()))
    }

    // Diagnostics.

    /// Reads the volatile/persistent partition layout of one DIMM.
    pub fn get_partition_info(&mut self, id: DimmId) -> Result<PartitionInfo, NvmError> {
        let handle = self.device_handle(id)?;
        let mut cmd = FwCmd::new(handle, Opcode::GetAdminFeatures, subop::DIMM_PARTITION_INFO);
        self.pass_thru_checked(&mut cmd)?;
        if cmd.output_payload.len() < 32 {
            return Err(NvmError::new(NvmStatusCode::ErrDataTransfer, CommandStatus::default()));
        }
        let field = |at: usize| {
            u64::from_le_bytes([
                cmd.output_payload[at],
                cmd.output_payload[at + 1],
                cmd.output_payload[at + 2],
                cmd.output_payload[at + 3],
                cmd.output_payload[at + 4],
                cmd.output_payload[at + 5],
                cmd.output_payload[at + 6],
                cmd.output_payload[at + 7],
            ])
        };
        Ok(PartitionInfo {
            volatile_capacity: field(0),
            volatile_start: field(8),
            persistent_capacity: field(16),
            persistent_start: field(24),
        })
    }

    /// Injects an artificial error condition for validation purposes.
    pub fn inject_error(&mut self, id: DimmId, error: InjectedError) -> Result<CommandStatus, NvmError> {
        let handle = self.device_handle(id)?;
        let (sub_opcode, payload) = match error {
            InjectedError::Poison { address } => (subop::ERROR_POISON, address.to_le_bytes().to_vec()),
            InjectedError::Temperature { celsius } => {
                (subop::ERROR_TEMPERATURE, celsius.to_le_bytes().to_vec())
            }
            InjectedError::PackageSparing => (subop::ERROR_PACKAGE_SPARING, vec![]),
            InjectedError::PercentageRemaining { percent } => {
                (subop::ERROR_PERCENTAGE_REMAINING, vec![percent])
            }
            InjectedError::DirtyShutdown => (subop::ERROR_DIRTY_SHUTDOWN, vec![]),
        };
        let mut cmd = FwCmd::new(handle, Opcode::InjectError, sub_opcode).with_input(payload);
        self.pass_thru_checked(&mut cmd)?;
        let mut status = CommandStatus::new(ObjectType::Dimm);
        status.set_object_status(id.0, NvmStatusCode::Success);
        Ok(status)
    }

    fn device_handle(&self, id: DimmId) -> Result<u32, NvmError> {
        self.inventory
            .get(id)
            .map(|d| d.device_handle)
            .ok_or_else(|| NvmError::new(NvmStatusCode::ErrDimmNotFound, CommandStatus::default()))
    }

    fn pass_thru_checked(&mut self, cmd: &mut FwCmd) -> Result<(), NvmError> {
        self.transport
            .pass_thru(cmd)
            .map_err(|e| NvmError::new(transport_error_to_code(e), CommandStatus::default()))?;
        if cmd.status.is_error() {
            return Err(NvmError::new(fw_status_to_code(cmd.status), CommandStatus::default()));
        }
        Ok(())
    }
}
