//! DDRT (in-band) mailbox implementation.
//!
//! The DDRT mailbox is a set of memory-mapped registers per DIMM: input
//! payload registers, a command register, a doorbell, a status register, and
//! output payload registers, plus 1 MiB large payload windows. A transaction
//! writes the payload and command, rings the doorbell, then polls the status
//! register until the complete bit is set or the command timeout expires.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::command::{FwCmd, FwStatus, IN_PAYLOAD_SIZE, LARGE_PAYLOAD_SIZE, OUT_PAYLOAD_SIZE};
use crate::{PassThru, TransportError};
use core::time::Duration;
use std::time::Instant;

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;

/// Which payload register window a read/write addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadWindow {
    SmallInput,
    SmallOutput,
    LargeInput,
    LargeOutput,
}

/// Raw register access beneath the DDRT mailbox, one instance per system.
///
/// `handle` is the DIMM device handle from NFIT; the implementation maps it
/// to the DIMM's control region.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait MailboxRegisters {
    fn write_payload(&mut self, handle: u32, window: PayloadWindow, data: &[u8]) -> Result<(), TransportError>;

    fn write_command(&mut self, handle: u32, opcode: u8, sub_opcode: u8) -> Result<(), TransportError>;

    fn ring_doorbell(&mut self, handle: u32) -> Result<(), TransportError>;

    /// Reads the status register. `None` while the complete bit is clear,
    /// otherwise the firmware status byte.
    fn read_status(&mut self, handle: u32) -> Result<Option<u8>, TransportError>;

    fn read_payload(&mut self, handle: u32, window: PayloadWindow, len: usize) -> Result<Vec<u8>, TransportError>;
}

/// Interval between status register polls.
const POLL_INTERVAL: Duration = Duration::from_micros(100);

/// DDRT mailbox transport. Supports the full command set including the large
/// payload windows.
pub struct DdrtMailbox<R: MailboxRegisters> {
    registers: R,
}

impl<R: MailboxRegisters> DdrtMailbox<R> {
    pub fn new(registers: R) -> Self {
        Self { registers }
    }

    fn poll_completion(&mut self, handle: u32, timeout: Duration) -> Result<FwStatus, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.registers.read_status(handle)? {
                return Ok(FwStatus(status));
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl<R: MailboxRegisters> PassThru for DdrtMailbox<R> {
    fn pass_thru(&mut self, cmd: &mut FwCmd) -> Result<(), TransportError> {
        if cmd.input_payload.len() > IN_PAYLOAD_SIZE || cmd.large_input_payload.len() > LARGE_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge);
        }

        let handle = cmd.dimm_id;
        if !cmd.input_payload.is_empty() {
            self.registers.write_payload(handle, PayloadWindow::SmallInput, &cmd.input_payload)?;
        }
        if !cmd.large_input_payload.is_empty() {
            self.registers.write_payload(handle, PayloadWindow::LargeInput, &cmd.large_input_payload)?;
        }
        self.registers.write_command(handle, cmd.opcode as u8, cmd.sub_opcode)?;
        self.registers.ring_doorbell(handle)?;

        cmd.status = self.poll_completion(handle, cmd.timeout)?;
        log::debug!(
            "DDRT mailbox: dimm {:#x} opcode {:#04x}/{:#04x} fw status {:#04x}",
            handle,
            cmd.opcode as u8,
            cmd.sub_opcode,
            cmd.status.0
        );

        if !cmd.status.is_error() {
            cmd.output_payload = self.registers.read_payload(handle, PayloadWindow::SmallOutput, OUT_PAYLOAD_SIZE)?;
        }
        Ok(())
    }

    fn large_payload_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{subop, Opcode};
    use mockall::predicate::eq;

    #[test]
    fn transaction_sequence_and_status() {
        let mut registers = MockMailboxRegisters::new();
        registers
            .expect_write_payload()
            .withf(|handle, window, data| *handle == 0x10 && *window == PayloadWindow::SmallInput && data == [1u8, 2, 3])
            .once()
            .returning(|_, _, _| Ok(()));
        registers.expect_write_command().with(eq(0x10), eq(0x02), eq(0x00)).once().returning(|_, _, _| Ok(()));
        registers.expect_ring_doorbell().with(eq(0x10)).once().returning(|_| Ok(()));
        registers.expect_read_status().with(eq(0x10)).once().returning(|_| Ok(Some(0x00)));
        registers
            .expect_read_payload()
            .with(eq(0x10), eq(PayloadWindow::SmallOutput), eq(OUT_PAYLOAD_SIZE))
            .once()
            .returning(|_, _, len| Ok(vec![0xAB; len]));

        let mut mailbox = DdrtMailbox::new(registers);
        let mut cmd = FwCmd::new(0x10, Opcode::GetSecInfo, subop::GET_SEC_STATE).with_input(vec![1, 2, 3]);
        mailbox.pass_thru(&mut cmd).unwrap();
        assert_eq!(cmd.status, FwStatus::SUCCESS);
        assert_eq!(cmd.output_payload.len(), OUT_PAYLOAD_SIZE);
    }

    #[test]
    fn firmware_error_skips_output_read() {
        let mut registers = MockMailboxRegisters::new();
        registers.expect_write_command().returning(|_, _, _| Ok(()));
        registers.expect_ring_doorbell().returning(|_| Ok(()));
        registers.expect_read_status().returning(|_| Ok(Some(FwStatus::DEVICE_BUSY.0)));
        registers.expect_read_payload().never();

        let mut mailbox = DdrtMailbox::new(registers);
        let mut cmd = FwCmd::new(1, Opcode::UpdateFw, subop::UPDATE_FW);
        mailbox.pass_thru(&mut cmd).unwrap();
        assert_eq!(cmd.status, FwStatus::DEVICE_BUSY);
    }

    #[test]
    fn times_out_when_complete_bit_never_sets() {
        let mut registers = MockMailboxRegisters::new();
        registers.expect_write_command().returning(|_, _, _| Ok(()));
        registers.expect_ring_doorbell().returning(|_| Ok(()));
        registers.expect_read_status().returning(|_| Ok(None));

        let mut mailbox = DdrtMailbox::new(registers);
        let mut cmd =
            FwCmd::new(1, Opcode::IdentifyDimm, 0).with_timeout(Duration::from_millis(2));
        assert_eq!(mailbox.pass_thru(&mut cmd), Err(TransportError::Timeout));
    }

    #[test]
    fn oversized_payload_rejected_before_any_write() {
        let mut registers = MockMailboxRegisters::new();
        registers.expect_write_payload().never();
        registers.expect_write_command().never();

        let mut mailbox = DdrtMailbox::new(registers);
        let mut cmd = FwCmd::new(1, Opcode::SetSecInfo, subop::SET_PASSPHRASE).with_input(vec![0; IN_PAYLOAD_SIZE + 1]);
        assert_eq!(mailbox.pass_thru(&mut cmd), Err(TransportError::PayloadTooLarge));
    }
}
