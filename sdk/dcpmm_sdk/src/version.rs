//! Firmware version and firmware API version types.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::fmt::Display;

/// A DIMM firmware version, displayed as `aa.bb.cc.dddd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FwVersion {
    pub product: u8,
    pub revision: u8,
    pub security_version: u8,
    pub build: u16,
}

impl FwVersion {
    pub fn new(product: u8, revision: u8, security_version: u8, build: u16) -> Self {
        Self { product, revision, security_version, build }
    }

    /// A version with all fields zero means no firmware version is known.
    pub fn is_undefined(&self) -> bool {
        self.product == 0 && self.revision == 0 && self.security_version == 0 && self.build == 0
    }
}

impl Display for FwVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_undefined() {
            write!(f, "N/A")
        } else {
            write!(f, "{:02}.{:02}.{:02}.{:04}", self.product, self.revision, self.security_version, self.build)
        }
    }
}

/// A firmware mailbox API version, BCD-encoded on the wire as `aa.bb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ApiVersion {
    pub major: u8,
    pub minor: u8,
}

impl ApiVersion {
    pub fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Decodes the two-byte wire form: minor in the low byte, major in the high byte.
    pub fn from_raw(raw: u16) -> Self {
        Self { major: (raw >> 8) as u8, minor: (raw & 0xFF) as u8 }
    }
}

impl Display for ApiVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.major == 0 && self.minor == 0 {
            write!(f, "N/A")
        } else {
            write!(f, "{:02}.{:02}", self.major, self.minor)
        }
    }
}
