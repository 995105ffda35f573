//! Operation errors.
//!
//! The façade collapses the original dual error channel (a coarse return code
//! plus an out-parameter status structure) into one type: an [`NvmError`]
//! carries the general status code and the full per-object [`CommandStatus`]
//! it was raised with.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::fmt::Display;
use dcpmm_sdk::status::{CommandStatus, NvmStatusCode};
use dcpmm_transport::{FwStatus, TransportError};

/// A failed management operation: the general cause plus the per-object
/// detail accumulated before the failure.
#[derive(Debug, Clone)]
pub struct NvmError {
    pub code: NvmStatusCode,
    pub status: CommandStatus,
}

impl NvmError {
    pub fn new(code: NvmStatusCode, status: CommandStatus) -> Self {
        Self { code, status }
    }
}

impl Display for NvmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "operation failed: {}", self.code)
    }
}

impl std::error::Error for NvmError {}

/// Maps a transport failure onto the NVM status code space.
pub fn transport_error_to_code(error: TransportError) -> NvmStatusCode {
    match error {
        TransportError::Timeout => NvmStatusCode::ErrTimeout,
        TransportError::PayloadTooLarge => NvmStatusCode::ErrDataTransfer,
        TransportError::BusError => NvmStatusCode::ErrDataTransfer,
        TransportError::NotReady => NvmStatusCode::ErrBusyDevice,
    }
}

/// Maps a firmware status byte onto the NVM status code space.
pub fn fw_status_to_code(status: FwStatus) -> NvmStatusCode {
    match status {
        FwStatus::SUCCESS => NvmStatusCode::Success,
        FwStatus::DEVICE_BUSY => NvmStatusCode::ErrBusyDevice,
        FwStatus::INCORRECT_PASSPHRASE => NvmStatusCode::ErrInvalidPassphrase,
        FwStatus::INVALID_SECURITY_STATE => NvmStatusCode::ErrInvalidSecurityState,
        FwStatus::UNSUPPORTED_COMMAND => NvmStatusCode::ErrApiNotSupported,
        FwStatus::DATA_TRANSFER_ERROR => NvmStatusCode::ErrDataTransfer,
        FwStatus::INTERNAL_DEVICE_ERROR => NvmStatusCode::ErrGeneralDevFailure,
        FwStatus::INVALID_COMMAND_PARAMETER => NvmStatusCode::ErrInvalidParameter,
        _ => NvmStatusCode::ErrOperationFailed,
    }
}
