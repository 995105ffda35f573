//! DIMM security state machine.
//!
//! Drives passphrase, lock, erase, and freeze operations over the `SetSecInfo`
//! mailbox command. Every transition is validated against the cached security
//! state before any command is issued, and the state is re-read from hardware
//! after each successful command so the cache never goes stale.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::error::{fw_status_to_code, transport_error_to_code};
use crate::inventory::{DimmId, Inventory, PlatformCapabilities};
use dcpmm_sdk::limits::MAX_PASSPHRASE_LEN;
use dcpmm_sdk::status::{CommandStatus, NvmStatusCode};
use dcpmm_sdk::types::SkuFlags;
use dcpmm_sdk::SecurityMask;
use dcpmm_transport::command::{subop, FwCmd, Opcode};
use dcpmm_transport::{PassThru, PT_LONG_OP_TIMEOUT_INTERVAL};

/// Fixed size of the `SetSecInfo` input payload: two 32 byte passphrase slots.
const SECURITY_PAYLOAD_SIZE: usize = 2 * MAX_PASSPHRASE_LEN;

/// A security operation on one or more DIMMs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityOperation {
    SetPassphrase,
    ChangePassphrase,
    SetMasterPassphrase,
    DisablePassphrase,
    Unlock,
    Erase,
    Freeze,
    Overwrite,
}

impl SecurityOperation {
    fn sub_opcode(self) -> u8 {
        match self {
            SecurityOperation::SetPassphrase | SecurityOperation::ChangePassphrase => subop::SET_PASSPHRASE,
            SecurityOperation::SetMasterPassphrase => subop::SET_MASTER_PASSPHRASE,
            SecurityOperation::DisablePassphrase => subop::DISABLE_PASSPHRASE,
            SecurityOperation::Unlock => subop::UNLOCK_UNIT,
            SecurityOperation::Erase => subop::SEC_ERASE_UNIT,
            SecurityOperation::Freeze => subop::SEC_FREEZE_LOCK,
            SecurityOperation::Overwrite => subop::OVERWRITE_DIMM,
        }
    }

    /// Erase and overwrite rewrite media keys and may run long.
    fn is_long_running(self) -> bool {
        matches!(self, SecurityOperation::Erase | SecurityOperation::Overwrite)
    }

    /// Erase and overwrite destroy namespace data and are refused while any
    /// namespace still maps capacity from the DIMM.
    fn destroys_data(self) -> bool {
        matches!(self, SecurityOperation::Erase | SecurityOperation::Overwrite)
    }
}

/// Validates one transition against the current security state.
///
/// Count-expired blocks everything until a power cycle, and a frozen lock
/// blocks every state change until reset.
pub fn check_transition(op: SecurityOperation, state: SecurityMask) -> Result<(), NvmStatusCode> {
    if state.contains(SecurityMask::NOT_SUPPORTED) {
        return Err(NvmStatusCode::ErrInvalidSecurityOperation);
    }
    if state.contains(SecurityMask::COUNT_EXPIRED) {
        return Err(NvmStatusCode::ErrSecurityCountExpired);
    }
    if state.contains(SecurityMask::FROZEN) {
        return Err(NvmStatusCode::ErrInvalidSecurityState);
    }
    let enabled = state.contains(SecurityMask::ENABLED);
    let locked = state.contains(SecurityMask::LOCKED);
    let allowed = match op {
        SecurityOperation::SetPassphrase => !enabled && !locked,
        SecurityOperation::ChangePassphrase
        | SecurityOperation::DisablePassphrase
        | SecurityOperation::SetMasterPassphrase => enabled && !locked,
        SecurityOperation::Unlock => enabled && locked,
        SecurityOperation::Erase | SecurityOperation::Overwrite => !locked,
        SecurityOperation::Freeze => !locked,
    };
    if allowed { Ok(()) } else { Err(NvmStatusCode::ErrInvalidSecurityState) }
}

fn validate_passphrases(
    op: SecurityOperation,
    passphrase: Option<&str>,
    new_passphrase: Option<&str>,
) -> Result<(), NvmStatusCode> {
    for p in [passphrase, new_passphrase].into_iter().flatten() {
        if p.len() > MAX_PASSPHRASE_LEN {
            return Err(NvmStatusCode::ErrPassphraseTooLong);
        }
    }
    match op {
        SecurityOperation::SetPassphrase
        | SecurityOperation::ChangePassphrase
        | SecurityOperation::SetMasterPassphrase => {
            if new_passphrase.is_none() {
                return Err(NvmStatusCode::ErrNewPassphraseNotProvided);
            }
            if op != SecurityOperation::SetPassphrase && passphrase.is_none() {
                return Err(NvmStatusCode::ErrPassphraseNotProvided);
            }
        }
        SecurityOperation::DisablePassphrase | SecurityOperation::Unlock => {
            if passphrase.is_none() {
                return Err(NvmStatusCode::ErrPassphraseNotProvided);
            }
        }
        SecurityOperation::Erase | SecurityOperation::Overwrite | SecurityOperation::Freeze => {}
    }
    Ok(())
}

/// Builds the two-slot passphrase payload: current passphrase in the first
/// 32 bytes, new passphrase in the second 32.
fn build_payload(passphrase: Option<&str>, new_passphrase: Option<&str>) -> Vec<u8> {
    let mut payload = vec![0u8; SECURITY_PAYLOAD_SIZE];
    if let Some(p) = passphrase {
        let bytes = p.as_bytes();
        payload[..bytes.len()].copy_from_slice(bytes);
    }
    if let Some(p) = new_passphrase {
        let bytes = p.as_bytes();
        payload[MAX_PASSPHRASE_LEN..MAX_PASSPHRASE_LEN + bytes.len()].copy_from_slice(bytes);
    }
    payload
}

/// Reads the security state register of one DIMM over the mailbox.
pub fn read_security_state<T: PassThru>(
    transport: &mut T,
    device_handle: u32,
) -> Result<SecurityMask, NvmStatusCode> {
    let mut cmd = FwCmd::new(device_handle, Opcode::GetSecInfo, subop::GET_SEC_STATE);
    transport.pass_thru(&mut cmd).map_err(transport_error_to_code)?;
    if cmd.status.is_error() {
        return Err(fw_status_to_code(cmd.status));
    }
    if cmd.output_payload.len() < 4 {
        return Err(NvmStatusCode::ErrUnableToGetSecurityState);
    }
    let raw = u32::from_le_bytes([
        cmd.output_payload[0],
        cmd.output_payload[1],
        cmd.output_payload[2],
        cmd.output_payload[3],
    ]);
    Ok(SecurityMask::from_bits_truncate(raw))
}

fn dimm_has_namespace(inventory: &Inventory, id: DimmId) -> bool {
    inventory.namespaces().any(|ns| {
        inventory.region(ns.region_id).map(|r| r.dimm_ids.contains(&id)).unwrap_or(false)
    })
}

/// Applies one security operation to each target DIMM in order.
///
/// Processing is fail-fast: the first DIMM that rejects the transition,
/// fails the command, or comes back count-expired stops the loop, and the
/// remaining targets are left untouched. Each completed DIMM keeps its
/// refreshed state regardless of later failures.
pub fn set_security_state<T: PassThru>(
    transport: &mut T,
    inventory: &mut Inventory,
    capabilities: &PlatformCapabilities,
    targets: &[DimmId],
    op: SecurityOperation,
    passphrase: Option<&str>,
    new_passphrase: Option<&str>,
    status: &mut CommandStatus,
) -> Result<(), NvmStatusCode> {
    if !capabilities.security_supported {
        status.update_general_status(NvmStatusCode::ErrInvalidSecurityOperation);
        return Err(NvmStatusCode::ErrInvalidSecurityOperation);
    }
    validate_passphrases(op, passphrase, new_passphrase).inspect_err(|&code| {
        status.update_general_status(code);
    })?;

    for &id in targets {
        let dimm = inventory.get(id).ok_or(NvmStatusCode::ErrDimmNotFound)?;
        let device_handle = dimm.device_handle;

        if !dimm.sku.contains(SkuFlags::STANDARD_SECURITY) {
            let code = if op == SecurityOperation::SetPassphrase {
                NvmStatusCode::ErrEnableSecurityNotAllowed
            } else {
                NvmStatusCode::ErrCommandNotSupportedBySku
            };
            status.set_object_status(id.0, code);
            return Err(code);
        }
        if op.destroys_data() && dimm_has_namespace(inventory, id) {
            status.set_object_status(id.0, NvmStatusCode::ErrSecureEraseNamespaceExists);
            return Err(NvmStatusCode::ErrSecureEraseNamespaceExists);
        }
        if let Err(code) = check_transition(op, dimm.security) {
            status.set_object_status(id.0, code);
            return Err(code);
        }

        let mut cmd = FwCmd::new(device_handle, Opcode::SetSecInfo, op.sub_opcode());
        if op != SecurityOperation::Freeze {
            cmd = cmd.with_input(build_payload(passphrase, new_passphrase));
        }
        if op.is_long_running() {
            cmd = cmd.with_timeout(PT_LONG_OP_TIMEOUT_INTERVAL);
        }
        if let Err(e) = transport.pass_thru(&mut cmd) {
            let code = transport_error_to_code(e);
            status.set_object_status(id.0, code);
            return Err(code);
        }
        if cmd.status.is_error() {
            let code = fw_status_to_code(cmd.status);
            log::error!("security command {op:?} on dimm {id} failed, fw status {:#04x}", cmd.status.0);
            status.set_object_status(id.0, code);
            return Err(code);
        }

        // Some firmware revisions report success for a passphrase command
        // that tripped the retry counter. Re-reading the state catches that
        // and keeps the cache accurate at the same time.
        let refreshed = match read_security_state(transport, device_handle) {
            Ok(mask) => mask,
            Err(code) => {
                status.set_object_status(id.0, NvmStatusCode::ErrUnableToGetSecurityState);
                return Err(code);
            }
        };
        if let Some(dimm) = inventory.get_mut(id) {
            dimm.security = refreshed;
        }
        if refreshed.contains(SecurityMask::COUNT_EXPIRED) {
            status.set_object_status(id.0, NvmStatusCode::ErrSecurityCountExpired);
            return Err(NvmStatusCode::ErrSecurityCountExpired);
        }
        status.set_object_status(id.0, NvmStatusCode::Success);
    }
    Ok(())
}
