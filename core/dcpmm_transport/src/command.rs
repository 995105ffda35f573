//! Mailbox command structure and the firmware opcode/status spaces.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::PT_TIMEOUT_INTERVAL;
use core::time::Duration;

/// Size of the small input payload register window, in bytes.
pub const IN_PAYLOAD_SIZE: usize = 128;

/// Size of the small output payload register window, in bytes.
pub const OUT_PAYLOAD_SIZE: usize = 128;

/// Size of the large input/output mailbox windows, in bytes.
pub const LARGE_PAYLOAD_SIZE: usize = 1 << 20;

/// Mailbox command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Retrieve physical inventory data for a DIMM.
    IdentifyDimm = 0x01,
    /// Retrieve security information.
    GetSecInfo = 0x02,
    /// Send a security related command.
    SetSecInfo = 0x03,
    GetFeatures = 0x04,
    SetFeatures = 0x05,
    /// Get the advanced DIMM settings (partition info, PCD).
    GetAdminFeatures = 0x06,
    /// Set the advanced DIMM settings.
    SetAdminFeatures = 0x07,
    /// Retrieve administrative data, error info, long operation status.
    GetLog = 0x08,
    /// Move a firmware image to the DIMM.
    UpdateFw = 0x09,
    /// Validation-only command to trigger error conditions.
    InjectError = 0x0A,
}

/// Sub-opcode values, grouped by parent opcode.
pub mod subop {
    // GetSecInfo
    pub const GET_SEC_STATE: u8 = 0x00;

    // SetSecInfo
    pub const OVERWRITE_DIMM: u8 = 0x01;
    pub const SET_MASTER_PASSPHRASE: u8 = 0xF0;
    pub const SET_PASSPHRASE: u8 = 0xF1;
    pub const DISABLE_PASSPHRASE: u8 = 0xF2;
    pub const UNLOCK_UNIT: u8 = 0xF3;
    pub const SEC_ERASE_UNIT: u8 = 0xF5;
    pub const SEC_FREEZE_LOCK: u8 = 0xF6;

    // GetAdminFeatures / SetAdminFeatures
    pub const PLATFORM_DATA_INFO: u8 = 0x01;
    pub const DIMM_PARTITION_INFO: u8 = 0x02;

    // GetLog
    pub const FW_IMAGE_INFO: u8 = 0x01;
    pub const LONG_OPERATION_STATUS: u8 = 0x04;

    // UpdateFw
    pub const UPDATE_FW: u8 = 0x00;
    pub const EXECUTE_FW: u8 = 0x01;

    // InjectError
    pub const ERROR_POISON: u8 = 0x01;
    pub const ERROR_TEMPERATURE: u8 = 0x02;
    pub const ERROR_PACKAGE_SPARING: u8 = 0x03;
    pub const ERROR_PERCENTAGE_REMAINING: u8 = 0x04;
    pub const ERROR_DIRTY_SHUTDOWN: u8 = 0x05;
}

/// Firmware status byte returned in the mailbox status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FwStatus(pub u8);

impl FwStatus {
    pub const SUCCESS: FwStatus = FwStatus(0x00);
    pub const INVALID_COMMAND_PARAMETER: FwStatus = FwStatus(0x01);
    pub const DATA_TRANSFER_ERROR: FwStatus = FwStatus(0x02);
    pub const INTERNAL_DEVICE_ERROR: FwStatus = FwStatus(0x03);
    pub const UNSUPPORTED_COMMAND: FwStatus = FwStatus(0x04);
    pub const DEVICE_BUSY: FwStatus = FwStatus(0x05);
    pub const INCORRECT_PASSPHRASE: FwStatus = FwStatus(0x06);
    pub const AUTH_FAILED: FwStatus = FwStatus(0x07);
    pub const INVALID_SECURITY_STATE: FwStatus = FwStatus(0x08);
    pub const DATA_NOT_SET: FwStatus = FwStatus(0x0A);
    pub const ABORTED: FwStatus = FwStatus(0x0B);
    pub const REVISION_FAILURE: FwStatus = FwStatus(0x0D);
    pub const INJECTION_NOT_ENABLED: FwStatus = FwStatus(0x0E);
    pub const INVALID_ALIGNMENT: FwStatus = FwStatus(0x10);
    pub const MEDIA_DISABLED: FwStatus = FwStatus(0x14);
    pub const UPDATE_ALREADY_OCCURED: FwStatus = FwStatus(0x15);
    pub const NO_RESOURCES: FwStatus = FwStatus(0x16);

    pub fn is_error(self) -> bool {
        self != FwStatus::SUCCESS
    }
}

/// One mailbox command, carrying request and response state.
///
/// The original interface exposes both a register-sized small payload and a
/// separate large payload window; commands use one or the other.
#[derive(Debug, Clone)]
pub struct FwCmd {
    pub dimm_id: u32,
    pub opcode: Opcode,
    pub sub_opcode: u8,
    pub input_payload: Vec<u8>,
    pub large_input_payload: Vec<u8>,
    pub output_payload: Vec<u8>,
    pub large_output_payload: Vec<u8>,
    pub status: FwStatus,
    pub timeout: Duration,
}

impl FwCmd {
    pub fn new(dimm_id: u32, opcode: Opcode, sub_opcode: u8) -> Self {
        Self {
            dimm_id,
            opcode,
            sub_opcode,
            input_payload: Vec::new(),
            large_input_payload: Vec::new(),
            output_payload: Vec::new(),
            large_output_payload: Vec::new(),
            status: FwStatus::SUCCESS,
            timeout: PT_TIMEOUT_INTERVAL,
        }
    }

    pub fn with_input(mut self, payload: Vec<u8>) -> Self {
        self.input_payload = payload;
        self
    }

    pub fn with_large_input(mut self, payload: Vec<u8>) -> Self {
        self.large_input_payload = payload;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fw_status_error_classification() {
        assert!(!FwStatus::SUCCESS.is_error());
        assert!(FwStatus::DEVICE_BUSY.is_error());
        assert!(FwStatus::UPDATE_ALREADY_OCCURED.is_error());
        assert!(FwStatus(0x42).is_error());
    }

    #[test]
    fn cmd_builder_defaults() {
        let cmd = FwCmd::new(7, Opcode::GetSecInfo, subop::GET_SEC_STATE);
        assert_eq!(cmd.dimm_id, 7);
        assert_eq!(cmd.timeout, PT_TIMEOUT_INTERVAL);
        assert!(cmd.input_payload.is_empty());
        assert_eq!(cmd.status, FwStatus::SUCCESS);
    }
}
