//! Firmware image file handling.
//!
//! A firmware image is a 128-byte Intel CSS header followed by the raw
//! firmware binary. The header carries the image version, the firmware API
//! version (BCD), the module vendor and type, and a CRC32 over the whole file
//! computed with the checksum field zeroed. Everything is little-endian.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::limits::KIB;
use crate::version::{ApiVersion, FwVersion};
use core::fmt::Display;
use scroll::{Pread, LE};

/// Size of the CSS header at the front of every image.
pub const FW_IMAGE_HEADER_SIZE: usize = 128;

/// The persistent memory module type code carried in a CSS header.
pub const MODULE_TYPE_CSS: u32 = 0x6;

/// Module vendor expected in a valid image.
pub const MODULE_VENDOR_INTEL: u32 = 0x8086;

/// The maximum file size a firmware image can have, in bytes.
pub const MAX_FIRMWARE_IMAGE_SIZE: u64 = 788 * KIB;

/// Transfer granularity: images must be a whole number of update packets.
pub const UPDATE_PACKET_DATA_SIZE: usize = 64;

/// Image types reported in the header.
pub const IMAGE_TYPE_PRODUCTION: u8 = 0x1D;
pub const IMAGE_TYPE_DFX: u8 = 0x1E;
pub const IMAGE_TYPE_DEBUG: u8 = 0x1F;

// Header field offsets.
pub const OFFSET_MODULE_TYPE: usize = 0;
pub const OFFSET_MODULE_VENDOR: usize = 16;
pub const OFFSET_DATE: usize = 20;
pub const OFFSET_SIZE_DWORDS: usize = 24;
pub const OFFSET_IMAGE_TYPE: usize = 40;
pub const OFFSET_IMAGE_VERSION: usize = 41;
pub const OFFSET_FW_API_VERSION: usize = 58;
pub const OFFSET_CHECKSUM: usize = 72;

/// Parsed CSS header fields the update engine needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FwImageHeader {
    pub module_vendor: u32,
    pub date: u32,
    pub size_dwords: u32,
    pub image_type: u8,
    pub image_version: FwVersion,
    pub fw_api_version: ApiVersion,
}

/// A validated firmware image, ready for transfer.
#[derive(Debug, Clone)]
pub struct FwImage {
    pub header: FwImageHeader,
    data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FwImageError {
    /// Smaller than the CSS header or larger than [`MAX_FIRMWARE_IMAGE_SIZE`].
    WrongSize,
    /// Not a whole number of 64-byte update packets.
    NotPacketAligned,
    /// Module vendor is not Intel.
    VendorNotCompatible,
    /// Module type is not the persistent memory CSS type.
    ModuleTypeNotCompatible,
    /// The stored CRC32 does not match the image contents.
    ChecksumMismatch,
}

impl Display for FwImageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FwImageError::WrongSize => write!(f, "image has a wrong size"),
            FwImageError::NotPacketAligned => {
                write!(f, "image size is not aligned to {UPDATE_PACKET_DATA_SIZE} bytes")
            }
            FwImageError::VendorNotCompatible => write!(f, "image vendor is not compatible with the module"),
            FwImageError::ModuleTypeNotCompatible => write!(f, "image module type is not compatible"),
            FwImageError::ChecksumMismatch => write!(f, "image checksum mismatch"),
        }
    }
}

impl std::error::Error for FwImageError {}

/// CRC32 over the image with the checksum dword zeroed.
pub fn compute_checksum(image: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&image[..OFFSET_CHECKSUM]);
    hasher.update(&[0u8; 4]);
    hasher.update(&image[OFFSET_CHECKSUM + 4..]);
    hasher.finalize()
}

impl FwImage {
    /// Parses and validates an image file.
    ///
    /// A passing parse means the image is plausible for an update; the DIMM
    /// performs its own signature and CRC checks and may still reject it.
    pub fn parse(bytes: &[u8]) -> Result<Self, FwImageError> {
        if bytes.len() < FW_IMAGE_HEADER_SIZE || bytes.len() as u64 > MAX_FIRMWARE_IMAGE_SIZE {
            return Err(FwImageError::WrongSize);
        }
        if bytes.len() % UPDATE_PACKET_DATA_SIZE != 0 {
            return Err(FwImageError::NotPacketAligned);
        }

        // The offsets are all inside the 128-byte header; pread cannot fail
        // past the length check above.
        let module_type: u32 = bytes.pread_with(OFFSET_MODULE_TYPE, LE).map_err(|_: scroll::Error| FwImageError::WrongSize)?;
        let module_vendor: u32 = bytes.pread_with(OFFSET_MODULE_VENDOR, LE).map_err(|_: scroll::Error| FwImageError::WrongSize)?;
        let date: u32 = bytes.pread_with(OFFSET_DATE, LE).map_err(|_: scroll::Error| FwImageError::WrongSize)?;
        let size_dwords: u32 = bytes.pread_with(OFFSET_SIZE_DWORDS, LE).map_err(|_: scroll::Error| FwImageError::WrongSize)?;
        let image_type: u8 = bytes.pread_with(OFFSET_IMAGE_TYPE, LE).map_err(|_: scroll::Error| FwImageError::WrongSize)?;
        let build: u16 = bytes.pread_with(OFFSET_IMAGE_VERSION, LE).map_err(|_: scroll::Error| FwImageError::WrongSize)?;
        let security_version: u8 =
            bytes.pread_with(OFFSET_IMAGE_VERSION + 2, LE).map_err(|_: scroll::Error| FwImageError::WrongSize)?;
        let revision: u8 =
            bytes.pread_with(OFFSET_IMAGE_VERSION + 3, LE).map_err(|_: scroll::Error| FwImageError::WrongSize)?;
        let product: u8 =
            bytes.pread_with(OFFSET_IMAGE_VERSION + 4, LE).map_err(|_: scroll::Error| FwImageError::WrongSize)?;
        let api_raw: u16 = bytes.pread_with(OFFSET_FW_API_VERSION, LE).map_err(|_: scroll::Error| FwImageError::WrongSize)?;
        let checksum: u32 = bytes.pread_with(OFFSET_CHECKSUM, LE).map_err(|_: scroll::Error| FwImageError::WrongSize)?;

        if module_vendor != MODULE_VENDOR_INTEL {
            return Err(FwImageError::VendorNotCompatible);
        }
        if module_type != MODULE_TYPE_CSS {
            return Err(FwImageError::ModuleTypeNotCompatible);
        }
        if checksum != compute_checksum(bytes) {
            return Err(FwImageError::ChecksumMismatch);
        }

        Ok(Self {
            header: FwImageHeader {
                module_vendor,
                date,
                size_dwords,
                image_type,
                image_version: FwVersion::new(product, revision, security_version, build),
                fw_api_version: ApiVersion::from_raw(api_raw),
            },
            data: bytes.to_vec(),
        })
    }

    /// The full staged payload, header included.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of 64-byte data packets a small-payload transfer needs.
    pub fn packet_count(&self) -> usize {
        self.data.len() / UPDATE_PACKET_DATA_SIZE
    }
}
