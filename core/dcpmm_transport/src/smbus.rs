//! SMBUS (out-of-band) mailbox implementation.
//!
//! SMBUS reaches DIMMs whose DDRT interface has not trained, so it is the
//! recovery path for uninitialized DIMMs. Only the small payload registers
//! exist on this interface; commands needing the large payload windows are
//! rejected and callers fall back to packetized transfers.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::command::{FwCmd, FwStatus, IN_PAYLOAD_SIZE, OUT_PAYLOAD_SIZE};
use crate::{PassThru, TransportError};
use core::time::Duration;
use std::time::Instant;

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;

/// Raw SMBUS access beneath the mailbox. `handle` is the DIMM device handle;
/// the implementation resolves it to the module's SMBUS slave address.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait SmbusIo {
    fn send_command(&mut self, handle: u32, opcode: u8, sub_opcode: u8, payload: &[u8]) -> Result<(), TransportError>;

    /// Reads the mailbox status. `None` while the command is still running.
    fn read_status(&mut self, handle: u32) -> Result<Option<u8>, TransportError>;

    fn read_output(&mut self, handle: u32, len: usize) -> Result<Vec<u8>, TransportError>;
}

/// SMBUS transactions are slow; poll sparsely.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Out-of-band mailbox transport, small payloads only.
pub struct SmbusMailbox<S: SmbusIo> {
    io: S,
}

impl<S: SmbusIo> SmbusMailbox<S> {
    pub fn new(io: S) -> Self {
        Self { io }
    }

    fn poll_completion(&mut self, handle: u32, timeout: Duration) -> Result<FwStatus, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.io.read_status(handle)? {
                return Ok(FwStatus(status));
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl<S: SmbusIo> PassThru for SmbusMailbox<S> {
    fn pass_thru(&mut self, cmd: &mut FwCmd) -> Result<(), TransportError> {
        if !cmd.large_input_payload.is_empty() {
            return Err(TransportError::PayloadTooLarge);
        }
        if cmd.input_payload.len() > IN_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge);
        }

        let handle = cmd.dimm_id;
        self.io.send_command(handle, cmd.opcode as u8, cmd.sub_opcode, &cmd.input_payload)?;
        cmd.status = self.poll_completion(handle, cmd.timeout)?;
        log::debug!(
            "SMBUS mailbox: dimm {:#x} opcode {:#04x}/{:#04x} fw status {:#04x}",
            handle,
            cmd.opcode as u8,
            cmd.sub_opcode,
            cmd.status.0
        );

        if !cmd.status.is_error() {
            cmd.output_payload = self.io.read_output(handle, OUT_PAYLOAD_SIZE)?;
        }
        Ok(())
    }

    fn large_payload_available(&self) -> bool {
        false
    }
}
