//! Firmware update engine.
//!
//! Stages a validated image onto each target DIMM, over the large mailbox
//! window where the transport supports one, or as a stream of 64-byte
//! packets otherwise. Updates are batched but independent: one DIMM failing
//! to stage never stops the rest of the batch.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::error::{fw_status_to_code, transport_error_to_code};
use crate::inventory::{Dimm, DimmId, Inventory};
use dcpmm_sdk::fw_image::{FwImage, UPDATE_PACKET_DATA_SIZE};
use dcpmm_sdk::status::{CommandStatus, NvmStatusCode};
use dcpmm_sdk::types::BootStatusRegister;
use dcpmm_sdk::{ApiVersion, FwVersion};
use dcpmm_transport::command::{subop, FwCmd, FwStatus, Opcode};
use dcpmm_transport::{PassThru, PT_LONG_OP_TIMEOUT_INTERVAL, PT_UPDATEFW_TIMEOUT_INTERVAL};
use std::time::{Duration, Instant};

/// Oldest firmware mailbox API an image may carry and still be staged.
pub const MIN_UPDATE_API_VERSION: ApiVersion = ApiVersion { major: 1, minor: 2 };

/// A staged image is at least the two header packets plus one data packet.
const MIN_UPDATE_PACKETS: usize = 3;

/// How many times a busy DIMM gets the same packet again before giving up.
const BUSY_RETRY_LIMIT: u32 = 3;

/// Interval between reads while polling a long operation.
const LONG_OP_POLL_INTERVAL: Duration = Duration::from_millis(100);

// Packet transaction markers, in the low two bits of the packet header.
const TRANSACTION_INIT: u16 = 0b00;
const TRANSACTION_CONTINUE: u16 = 0b01;
const TRANSACTION_END: u16 = 0b10;

/// Per-DIMM outcome of an update batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FwUpdateStatus {
    pub dimm_id: DimmId,
    pub code: NvmStatusCode,
    /// Version staged for activation at the next reset, if any.
    pub staged_version: FwVersion,
}

/// Progress of a firmware-side long operation (sanitize, overwrite).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongOpStatus {
    pub opcode: u8,
    pub sub_opcode: u8,
    pub percent_complete: u8,
    pub eta_seconds: u32,
    pub fw_status: FwStatus,
}

impl LongOpStatus {
    pub fn is_done(&self) -> bool {
        self.percent_complete >= 100
    }
}

/// Checks an image against one DIMM's running firmware.
///
/// Product numbers must match outright. Downgrades of the revision or build
/// need `force`; a security version downgrade additionally needs the opt-in
/// bit set in the boot status register.
pub fn validate_image_for_dimm(image: &FwImage, dimm: &Dimm, force: bool) -> Result<(), NvmStatusCode> {
    let staged = image.header.image_version;
    let running = dimm.fw_version;

    if image.header.fw_api_version < MIN_UPDATE_API_VERSION {
        return Err(NvmStatusCode::ErrFirmwareApiNotValid);
    }
    if running.is_undefined() {
        // Recovery path: nothing to compare against.
        return Ok(());
    }
    if staged.product != running.product {
        return Err(NvmStatusCode::ErrFirmwareVersionNotValid);
    }
    if staged.security_version < running.security_version {
        let opt_in = dimm.boot_status.contains(BootStatusRegister::OPT_IN_ENABLE);
        if !opt_in || !force {
            return Err(NvmStatusCode::ErrFirmwareTooLowForceRequired);
        }
        return Ok(());
    }
    let downgrade = staged.revision < running.revision
        || (staged.revision == running.revision
            && staged.security_version == running.security_version
            && staged.build < running.build);
    if downgrade && !force {
        return Err(NvmStatusCode::ErrFirmwareTooLowForceRequired);
    }
    Ok(())
}

fn send_packet<T: PassThru>(
    transport: &mut T,
    device_handle: u32,
    header: u16,
    data: &[u8],
    retried_after_busy: &mut bool,
) -> Result<(), NvmStatusCode> {
    let mut payload = Vec::with_capacity(2 + data.len());
    payload.extend_from_slice(&header.to_le_bytes());
    payload.extend_from_slice(data);

    let mut attempts = 0;
    loop {
        let mut cmd = FwCmd::new(device_handle, Opcode::UpdateFw, subop::UPDATE_FW)
            .with_input(payload.clone())
            .with_timeout(PT_UPDATEFW_TIMEOUT_INTERVAL);
        transport.pass_thru(&mut cmd).map_err(transport_error_to_code)?;
        match cmd.status {
            FwStatus::SUCCESS => return Ok(()),
            FwStatus::DEVICE_BUSY if attempts < BUSY_RETRY_LIMIT => {
                attempts += 1;
                *retried_after_busy = true;
            }
            // After a busy retry the DIMM may have staged the earlier
            // attempt already; that is a completed transfer, not a failure.
            FwStatus::UPDATE_ALREADY_OCCURED if *retried_after_busy => return Ok(()),
            FwStatus::UPDATE_ALREADY_OCCURED => return Err(NvmStatusCode::ErrFirmwareAlreadyLoaded),
            other => return Err(fw_status_to_code(other)),
        }
    }
}

/// Moves the image onto one DIMM.
fn transfer_image<T: PassThru>(
    transport: &mut T,
    device_handle: u32,
    image: &FwImage,
) -> Result<(), NvmStatusCode> {
    if transport.large_payload_available() {
        let mut cmd = FwCmd::new(device_handle, Opcode::UpdateFw, subop::UPDATE_FW)
            .with_large_input(image.data().to_vec())
            .with_timeout(PT_UPDATEFW_TIMEOUT_INTERVAL);
        transport.pass_thru(&mut cmd).map_err(transport_error_to_code)?;
        if cmd.status == FwStatus::UPDATE_ALREADY_OCCURED {
            return Err(NvmStatusCode::ErrFirmwareAlreadyLoaded);
        }
        if cmd.status.is_error() {
            return Err(fw_status_to_code(cmd.status));
        }
        return Ok(());
    }

    let packets = image.packet_count();
    let mut retried_after_busy = false;
    for (number, chunk) in image.data().chunks(UPDATE_PACKET_DATA_SIZE).enumerate() {
        let transaction = if number == 0 {
            TRANSACTION_INIT
        } else if number == packets - 1 {
            TRANSACTION_END
        } else {
            TRANSACTION_CONTINUE
        };
        let header = transaction | ((number as u16) << 2);
        send_packet(transport, device_handle, header, chunk, &mut retried_after_busy)?;
    }
    Ok(())
}

/// Records the image rejection against every target DIMM so the batch
/// report shows which devices the bad file was meant for.
fn reject_image(targets: &[DimmId], examine_only: bool, status: &mut CommandStatus) -> NvmStatusCode {
    let code = if examine_only {
        NvmStatusCode::ErrImageExamineInvalid
    } else {
        NvmStatusCode::ErrImageFileNotValid
    };
    for &id in targets {
        status.set_object_status(id.0, code);
    }
    code
}

/// Stages a firmware image on every target DIMM.
///
/// The image is parsed and bounds-checked once up front; version checks run
/// per DIMM. With `examine_only` nothing is transferred and each DIMM just
/// reports whether the image would be accepted. Each DIMM's outcome is
/// independent of the others.
#[allow(clippy::too_many_arguments)]
pub fn update_fw<T: PassThru>(
    transport: &mut T,
    inventory: &mut Inventory,
    targets: &[DimmId],
    image_bytes: &[u8],
    examine_only: bool,
    force: bool,
    recovery: bool,
    status: &mut CommandStatus,
) -> Result<Vec<FwUpdateStatus>, NvmStatusCode> {
    let image = match FwImage::parse(image_bytes) {
        Ok(image) => image,
        Err(e) => {
            log::error!("firmware image rejected: {e}");
            return Err(reject_image(targets, examine_only, status));
        }
    };
    if image.packet_count() < MIN_UPDATE_PACKETS {
        return Err(reject_image(targets, examine_only, status));
    }

    let mut results = Vec::with_capacity(targets.len());
    for &id in targets {
        let lookup = if recovery { inventory.get_uninitialized(id) } else { inventory.get(id) };
        let Some(dimm) = lookup else {
            return Err(NvmStatusCode::ErrDimmNotFound);
        };
        let device_handle = dimm.device_handle;

        if let Err(code) = validate_image_for_dimm(&image, dimm, force) {
            status.set_object_status(id.0, code);
            results.push(FwUpdateStatus { dimm_id: id, code, staged_version: FwVersion::default() });
            continue;
        }
        if examine_only {
            status.set_object_status(id.0, NvmStatusCode::SuccessImageExamineOk);
            results.push(FwUpdateStatus {
                dimm_id: id,
                code: NvmStatusCode::SuccessImageExamineOk,
                staged_version: FwVersion::default(),
            });
            continue;
        }

        match transfer_image(transport, device_handle, &image) {
            Ok(()) => {
                let staged = image.header.image_version;
                let dimm = if recovery { inventory.get_uninitialized_mut(id) } else { inventory.get_mut(id) };
                if let Some(dimm) = dimm {
                    dimm.staged_fw_version = staged;
                    dimm.reboot_needed = true;
                }
                status.set_object_status(id.0, NvmStatusCode::SuccessFwResetRequired);
                results.push(FwUpdateStatus {
                    dimm_id: id,
                    code: NvmStatusCode::SuccessFwResetRequired,
                    staged_version: staged,
                });
            }
            Err(code) => {
                log::error!("firmware staging failed on dimm {id}: {code}");
                status.set_object_status(id.0, code);
                results.push(FwUpdateStatus { dimm_id: id, code, staged_version: FwVersion::default() });
            }
        }
    }
    Ok(results)
}

/// Reads the staged firmware version from a DIMM's image info log.
pub fn get_fw_image_info<T: PassThru>(
    transport: &mut T,
    device_handle: u32,
) -> Result<FwVersion, NvmStatusCode> {
    let mut cmd = FwCmd::new(device_handle, Opcode::GetLog, subop::FW_IMAGE_INFO);
    transport.pass_thru(&mut cmd).map_err(transport_error_to_code)?;
    if cmd.status.is_error() {
        return Err(fw_status_to_code(cmd.status));
    }
    if cmd.output_payload.len() < 5 {
        return Err(NvmStatusCode::ErrDataTransfer);
    }
    let build = u16::from_le_bytes([cmd.output_payload[0], cmd.output_payload[1]]);
    Ok(FwVersion::new(cmd.output_payload[4], cmd.output_payload[3], cmd.output_payload[2], build))
}

/// Queries the progress of the firmware's current long operation.
pub fn get_long_op_status<T: PassThru>(
    transport: &mut T,
    device_handle: u32,
) -> Result<LongOpStatus, NvmStatusCode> {
    let mut cmd = FwCmd::new(device_handle, Opcode::GetLog, subop::LONG_OPERATION_STATUS)
        .with_timeout(PT_LONG_OP_TIMEOUT_INTERVAL);
    transport.pass_thru(&mut cmd).map_err(transport_error_to_code)?;
    if cmd.status == FwStatus::DATA_NOT_SET {
        return Err(NvmStatusCode::ErrOperationNotStarted);
    }
    if cmd.status.is_error() {
        return Err(fw_status_to_code(cmd.status));
    }
    if cmd.output_payload.len() < 8 {
        return Err(NvmStatusCode::ErrDataTransfer);
    }
    Ok(LongOpStatus {
        opcode: cmd.output_payload[0],
        sub_opcode: cmd.output_payload[1],
        percent_complete: cmd.output_payload[2],
        fw_status: FwStatus(cmd.output_payload[3]),
        eta_seconds: u32::from_le_bytes([
            cmd.output_payload[4],
            cmd.output_payload[5],
            cmd.output_payload[6],
            cmd.output_payload[7],
        ]),
    })
}

/// Polls a DIMM's long operation status until the firmware reports
/// completion or `timeout` elapses.
pub fn poll_long_op_status<T: PassThru>(
    transport: &mut T,
    device_handle: u32,
    timeout: Duration,
) -> Result<LongOpStatus, NvmStatusCode> {
    let deadline = Instant::now() + timeout;
    loop {
        let progress = get_long_op_status(transport, device_handle)?;
        if progress.is_done() {
            return Ok(progress);
        }
        if Instant::now() >= deadline {
            return Err(NvmStatusCode::ErrTimeout);
        }
        std::thread::sleep(LONG_OP_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::tests::topology;
    use dcpmm_sdk::fw_image::{
        compute_checksum, FW_IMAGE_HEADER_SIZE, IMAGE_TYPE_PRODUCTION, MODULE_TYPE_CSS,
        MODULE_VENDOR_INTEL, OFFSET_CHECKSUM, OFFSET_FW_API_VERSION, OFFSET_IMAGE_TYPE,
        OFFSET_IMAGE_VERSION, OFFSET_MODULE_TYPE, OFFSET_MODULE_VENDOR,
    };
    use dcpmm_sdk::limits::GIB;
    use dcpmm_transport::MockPassThru;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn build_image(version: FwVersion, api: ApiVersion, body_packets: usize) -> Vec<u8> {
        let mut image = vec![0u8; FW_IMAGE_HEADER_SIZE + body_packets * UPDATE_PACKET_DATA_SIZE];
        image[OFFSET_MODULE_TYPE..OFFSET_MODULE_TYPE + 4].copy_from_slice(&MODULE_TYPE_CSS.to_le_bytes());
        image[OFFSET_MODULE_VENDOR..OFFSET_MODULE_VENDOR + 4]
            .copy_from_slice(&MODULE_VENDOR_INTEL.to_le_bytes());
        image[OFFSET_IMAGE_TYPE] = IMAGE_TYPE_PRODUCTION;
        image[OFFSET_IMAGE_VERSION..OFFSET_IMAGE_VERSION + 2].copy_from_slice(&version.build.to_le_bytes());
        image[OFFSET_IMAGE_VERSION + 2] = version.security_version;
        image[OFFSET_IMAGE_VERSION + 3] = version.revision;
        image[OFFSET_IMAGE_VERSION + 4] = version.product;
        let api_raw = ((api.major as u16) << 8) | api.minor as u16;
        image[OFFSET_FW_API_VERSION..OFFSET_FW_API_VERSION + 2].copy_from_slice(&api_raw.to_le_bytes());
        let checksum = compute_checksum(&image);
        image[OFFSET_CHECKSUM..OFFSET_CHECKSUM + 4].copy_from_slice(&checksum.to_le_bytes());
        image
    }

    fn update_inventory(count: u32) -> Inventory {
        // Running firmware 01.02.00.0100 on every DIMM.
        Inventory::new((0..count).map(|i| topology(0x10 + i, 0, GIB)).collect(), vec![])
    }

    #[test]
    fn small_payload_transfer_uses_packet_markers() {
        let mut inventory = update_inventory(1);
        let image = build_image(FwVersion::new(1, 3, 0, 200), ApiVersion::new(2, 1), 2);
        let packets = image.len() / UPDATE_PACKET_DATA_SIZE;

        let seen = Arc::new(AtomicU32::new(0));
        let seen_in_mock = seen.clone();
        let mut transport = MockPassThru::new();
        transport.expect_large_payload_available().return_const(false);
        transport.expect_pass_thru().times(packets).returning(move |cmd| {
            let number = seen_in_mock.fetch_add(1, Ordering::SeqCst) as u16;
            let header = u16::from_le_bytes([cmd.input_payload[0], cmd.input_payload[1]]);
            let expected = if number == 0 {
                TRANSACTION_INIT
            } else if number as usize == packets - 1 {
                TRANSACTION_END
            } else {
                TRANSACTION_CONTINUE
            };
            assert_eq!(header & 0b11, expected);
            assert_eq!(header >> 2, number);
            assert_eq!(cmd.input_payload.len(), 2 + UPDATE_PACKET_DATA_SIZE);
            Ok(())
        });

        let mut status = CommandStatus::default();
        let results = update_fw(
            &mut transport, &mut inventory, &[DimmId(1)], &image, false, false, false, &mut status,
        )
        .unwrap();
        assert_eq!(results[0].code, NvmStatusCode::SuccessFwResetRequired);
        assert_eq!(results[0].staged_version, FwVersion::new(1, 3, 0, 200));
        let dimm = inventory.get(DimmId(1)).unwrap();
        assert!(dimm.reboot_needed);
        assert_eq!(dimm.staged_fw_version, FwVersion::new(1, 3, 0, 200));
    }

    #[test]
    fn busy_then_already_occurred_counts_as_staged() {
        let mut inventory = update_inventory(1);
        let image = build_image(FwVersion::new(1, 3, 0, 200), ApiVersion::new(2, 1), 1);

        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_mock = calls.clone();
        let mut transport = MockPassThru::new();
        transport.expect_large_payload_available().return_const(false);
        transport.expect_pass_thru().returning(move |cmd| {
            match calls_in_mock.fetch_add(1, Ordering::SeqCst) {
                // First packet goes through, second reports busy, and the
                // retry learns the image already landed.
                0 => {}
                1 => cmd.status = FwStatus::DEVICE_BUSY,
                2 => cmd.status = FwStatus::UPDATE_ALREADY_OCCURED,
                _ => {}
            }
            Ok(())
        });

        let mut status = CommandStatus::default();
        let results = update_fw(
            &mut transport, &mut inventory, &[DimmId(1)], &image, false, false, false, &mut status,
        )
        .unwrap();
        assert_eq!(results[0].code, NvmStatusCode::SuccessFwResetRequired);
    }

    #[test]
    fn already_occurred_without_retry_is_an_error() {
        let mut inventory = update_inventory(1);
        let image = build_image(FwVersion::new(1, 3, 0, 200), ApiVersion::new(2, 1), 1);

        let mut transport = MockPassThru::new();
        transport.expect_large_payload_available().return_const(false);
        transport.expect_pass_thru().returning(|cmd| {
            cmd.status = FwStatus::UPDATE_ALREADY_OCCURED;
            Ok(())
        });

        let mut status = CommandStatus::default();
        let results = update_fw(
            &mut transport, &mut inventory, &[DimmId(1)], &image, false, false, false, &mut status,
        )
        .unwrap();
        assert_eq!(results[0].code, NvmStatusCode::ErrFirmwareAlreadyLoaded);
        assert!(!inventory.get(DimmId(1)).unwrap().reboot_needed);
    }

    #[test]
    fn version_gates() {
        let inventory = update_inventory(1);
        let dimm = inventory.get(DimmId(1)).unwrap();

        // Different product line.
        let other_product = build_image(FwVersion::new(2, 0, 0, 1), ApiVersion::new(2, 1), 1);
        let image = FwImage::parse(&other_product).unwrap();
        assert_eq!(
            validate_image_for_dimm(&image, dimm, false),
            Err(NvmStatusCode::ErrFirmwareVersionNotValid)
        );

        // Mailbox API below the supported floor.
        let old_api = build_image(FwVersion::new(1, 3, 0, 1), ApiVersion::new(1, 1), 1);
        let image = FwImage::parse(&old_api).unwrap();
        assert_eq!(
            validate_image_for_dimm(&image, dimm, false),
            Err(NvmStatusCode::ErrFirmwareApiNotValid)
        );

        // Revision downgrade needs force.
        let downgrade = build_image(FwVersion::new(1, 1, 0, 1), ApiVersion::new(2, 1), 1);
        let image = FwImage::parse(&downgrade).unwrap();
        assert_eq!(
            validate_image_for_dimm(&image, dimm, false),
            Err(NvmStatusCode::ErrFirmwareTooLowForceRequired)
        );
        assert!(validate_image_for_dimm(&image, dimm, true).is_ok());
    }

    #[test]
    fn security_downgrade_needs_opt_in_and_force() {
        let mut t = topology(0x10, 0, GIB);
        t.fw_version = FwVersion::new(1, 2, 5, 100);
        let mut inventory = Inventory::new(vec![t], vec![]);

        let lower_security = build_image(FwVersion::new(1, 3, 4, 200), ApiVersion::new(2, 1), 1);
        let image = FwImage::parse(&lower_security).unwrap();

        let dimm = inventory.get(DimmId(1)).unwrap();
        assert_eq!(
            validate_image_for_dimm(&image, dimm, true),
            Err(NvmStatusCode::ErrFirmwareTooLowForceRequired)
        );

        inventory.get_mut(DimmId(1)).unwrap().boot_status |= BootStatusRegister::OPT_IN_ENABLE;
        let dimm = inventory.get(DimmId(1)).unwrap();
        assert_eq!(
            validate_image_for_dimm(&image, dimm, false),
            Err(NvmStatusCode::ErrFirmwareTooLowForceRequired)
        );
        assert!(validate_image_for_dimm(&image, dimm, true).is_ok());
    }

    #[test]
    fn batch_keeps_going_after_one_dimm_fails() {
        let mut inventory = update_inventory(2);
        let image = build_image(FwVersion::new(1, 3, 0, 200), ApiVersion::new(2, 1), 1);

        let mut transport = MockPassThru::new();
        transport.expect_large_payload_available().return_const(true);
        transport.expect_pass_thru().returning(|cmd| {
            if cmd.dimm_id == 0x10 {
                cmd.status = FwStatus::INTERNAL_DEVICE_ERROR;
            }
            Ok(())
        });

        let mut status = CommandStatus::default();
        let results = update_fw(
            &mut transport,
            &mut inventory,
            &[DimmId(1), DimmId(2)],
            &image,
            false,
            false,
            false,
            &mut status,
        )
        .unwrap();
        assert_eq!(results[0].code, NvmStatusCode::ErrGeneralDevFailure);
        assert_eq!(results[1].code, NvmStatusCode::SuccessFwResetRequired);
        assert!(!inventory.get(DimmId(1)).unwrap().reboot_needed);
        assert!(inventory.get(DimmId(2)).unwrap().reboot_needed);
    }

    #[test]
    fn examine_only_never_transfers() {
        let mut inventory = update_inventory(1);
        let image = build_image(FwVersion::new(1, 3, 0, 200), ApiVersion::new(2, 1), 1);
        let mut transport = MockPassThru::new();

        let mut status = CommandStatus::default();
        let results = update_fw(
            &mut transport, &mut inventory, &[DimmId(1)], &image, true, false, false, &mut status,
        )
        .unwrap();
        assert_eq!(results[0].code, NvmStatusCode::SuccessImageExamineOk);
        assert!(!inventory.get(DimmId(1)).unwrap().reboot_needed);
    }

    #[test]
    fn bad_image_marks_every_target() {
        let mut inventory = update_inventory(2);
        let mut transport = MockPassThru::new();
        transport.expect_pass_thru().never();
        let targets = [DimmId(1), DimmId(2)];

        let mut status = CommandStatus::default();
        let result = update_fw(
            &mut transport, &mut inventory, &targets, &[0u8; 16], false, false, false, &mut status,
        );
        assert_eq!(result, Err(NvmStatusCode::ErrImageFileNotValid));
        for id in [1u32, 2] {
            assert!(status.object_status(id).unwrap().contains(NvmStatusCode::ErrImageFileNotValid));
        }

        // Under examine the rejection carries the examine flavor.
        let mut status = CommandStatus::default();
        let result = update_fw(
            &mut transport, &mut inventory, &targets, &[0u8; 16], true, false, false, &mut status,
        );
        assert_eq!(result, Err(NvmStatusCode::ErrImageExamineInvalid));
        assert!(status.object_status(1).unwrap().contains(NvmStatusCode::ErrImageExamineInvalid));
    }

    #[test]
    fn refused_downgrade_transfers_nothing() {
        let mut inventory = update_inventory(1);
        let downgrade = build_image(FwVersion::new(1, 1, 0, 1), ApiVersion::new(2, 1), 1);

        let mut transport = MockPassThru::new();
        transport.expect_large_payload_available().never();
        transport.expect_pass_thru().never();

        let mut status = CommandStatus::default();
        let results = update_fw(
            &mut transport, &mut inventory, &[DimmId(1)], &downgrade, false, false, false, &mut status,
        )
        .unwrap();
        assert_eq!(results[0].code, NvmStatusCode::ErrFirmwareTooLowForceRequired);
        let dimm = inventory.get(DimmId(1)).unwrap();
        assert!(!dimm.reboot_needed);
        assert!(dimm.staged_fw_version.is_undefined());
    }

    #[test]
    fn poll_waits_for_completion() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_mock = calls.clone();
        let mut transport = MockPassThru::new();
        transport.expect_pass_thru().times(2).returning(move |cmd| {
            let percent = if calls_in_mock.fetch_add(1, Ordering::SeqCst) == 0 { 50 } else { 100 };
            cmd.output_payload = vec![0x09, 0x00, percent, 0x00, 0, 0, 0, 0];
            Ok(())
        });

        let progress =
            poll_long_op_status(&mut transport, 0x10, Duration::from_secs(5)).unwrap();
        assert!(progress.is_done());
        assert_eq!(progress.percent_complete, 100);
    }

    #[test]
    fn poll_times_out_when_operation_stalls() {
        let mut transport = MockPassThru::new();
        transport.expect_pass_thru().returning(|cmd| {
            cmd.output_payload = vec![0x09, 0x00, 50, 0x00, 30, 0, 0, 0];
            Ok(())
        });
        assert_eq!(
            poll_long_op_status(&mut transport, 0x10, Duration::ZERO),
            Err(NvmStatusCode::ErrTimeout)
        );
    }

    #[test]
    fn long_op_status_parses_payload() {
        let mut transport = MockPassThru::new();
        transport.expect_pass_thru().returning(|cmd| {
            cmd.output_payload = vec![0x09, 0x00, 75, 0x00, 30, 0, 0, 0];
            Ok(())
        });
        let progress = get_long_op_status(&mut transport, 0x10).unwrap();
        assert_eq!(progress.opcode, 0x09);
        assert_eq!(progress.percent_complete, 75);
        assert_eq!(progress.eta_seconds, 30);
        assert!(!progress.is_done());
    }

    #[test]
    fn long_op_status_not_running() {
        let mut transport = MockPassThru::new();
        transport.expect_pass_thru().returning(|cmd| {
            cmd.status = FwStatus::DATA_NOT_SET;
            Ok(())
        });
        assert_eq!(
            get_long_op_status(&mut transport, 0x10),
            Err(NvmStatusCode::ErrOperationNotStarted)
        );
    }
}
