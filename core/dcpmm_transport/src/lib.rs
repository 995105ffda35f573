//! DCPMM Mailbox Transport
//!
//! The host talks to DIMM firmware through a synchronous command/response
//! mailbox. This crate defines the command structure ([`FwCmd`]), the opcode
//! space, the firmware status byte space, and the [`PassThru`] trait with its
//! two implementations: [`DdrtMailbox`] for the in-band DDRT interface and
//! [`SmbusMailbox`] for the out-of-band SMBUS interface used before DDRT
//! training completes. The implementation is chosen at construction time.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
pub mod command;
pub mod ddrt;
pub mod smbus;

pub use command::{FwCmd, FwStatus, Opcode, subop};
pub use ddrt::{DdrtMailbox, MailboxRegisters, PayloadWindow};
pub use smbus::{SmbusIo, SmbusMailbox};

use core::fmt::Display;
use core::time::Duration;

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;

/// Protocol timeout for ordinary mailbox commands.
pub const PT_TIMEOUT_INTERVAL: Duration = Duration::from_secs(1);

/// Protocol timeout for firmware update commands.
pub const PT_UPDATEFW_TIMEOUT_INTERVAL: Duration = Duration::from_secs(4);

/// Protocol timeout for secure erase and other long security commands.
pub const PT_LONG_OP_TIMEOUT_INTERVAL: Duration = Duration::from_secs(10);

/// Transport-level failures. Firmware-reported errors are not transport
/// failures; they come back in [`FwCmd::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The mailbox did not complete within the command timeout.
    Timeout,
    /// The command payload does not fit the transport's payload window.
    PayloadTooLarge,
    /// The device did not respond on the bus.
    BusError,
    /// The mailbox is not ready to accept commands.
    NotReady,
}

impl Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "mailbox command timed out"),
            TransportError::PayloadTooLarge => write!(f, "payload exceeds transport window"),
            TransportError::BusError => write!(f, "bus error"),
            TransportError::NotReady => write!(f, "mailbox not ready"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Synchronous mailbox command channel to one DIMM.
///
/// A call blocks the caller for up to the command timeout. Commands to the
/// same DIMM never overlap; batch operations issue strictly sequentially.
/// `Ok(())` means the mailbox transaction completed; the firmware verdict is
/// in [`FwCmd::status`] and may still be an error.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait PassThru {
    fn pass_thru(&mut self, cmd: &mut FwCmd) -> Result<(), TransportError>;

    /// Whether this transport offers the large (1 MiB) payload windows.
    /// Without them, bulk transfers fall back to small-payload packets.
    fn large_payload_available(&self) -> bool;
}
