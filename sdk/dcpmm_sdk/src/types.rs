//! DIMM state bitfields and shared enums.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use bitflags::bitflags;

bitflags! {
    /// Per-DIMM security state as reported by the Get Security State command.
    ///
    /// The flags are independent; the legal security operations depend on the
    /// current combination.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SecurityMask: u32 {
        const ENABLED = 1 << 1;
        const LOCKED = 1 << 2;
        const FROZEN = 1 << 3;
        const COUNT_EXPIRED = 1 << 4;
        const NOT_SUPPORTED = 1 << 5;
    }
}

impl SecurityMask {
    /// Whether provisioning (goal creation) is allowed in this state:
    /// security disabled, or enabled but unlocked.
    pub fn allows_goal_config(&self) -> bool {
        !self.contains(SecurityMask::ENABLED)
            || (self.contains(SecurityMask::ENABLED) && !self.contains(SecurityMask::LOCKED))
    }
}

bitflags! {
    /// DIMM SKU capability bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SkuFlags: u32 {
        const MEMORY_MODE_ENABLED = 1 << 0;
        const APP_DIRECT_MODE_ENABLED = 1 << 2;
        const STORAGE_MODE_ENABLED = 1 << 1;
        const PACKAGE_SPARING_CAPABLE = 1 << 3;
        const SOFT_PROGRAMMABLE_SKU = 1 << 4;
        const STANDARD_SECURITY = 1 << 5;
        const ENCRYPTION_ENABLED = 1 << 6;
    }
}

bitflags! {
    /// Boot Status Register bits relevant to management operations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BootStatusRegister: u64 {
        const MEDIA_READY = 1 << 0;
        const DDRT_IO_INIT_COMPLETE = 1 << 1;
        const MAILBOX_READY = 1 << 2;
        /// Opt-in-enable: firmware downgrade below the current security
        /// version is permitted.
        const OPT_IN_ENABLE = 1 << 3;
        const MEDIA_DISABLED = 1 << 4;
    }
}

/// How a DIMM's current on-media configuration was applied by BIOS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigStatus {
    #[default]
    New,
    Success,
    OldConfigUsed,
    BadConfig,
    BrokenInterleave,
    Reverted,
    Unsupported,
}

/// Requested persistent-memory type for goal creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistentMemType {
    /// AppDirect, interleaved across the DIMMs of a socket.
    AppDirect,
    /// AppDirect, one non-interleaved region per DIMM.
    AppDirectNonInterleaved,
    /// No AppDirect regions; remaining persistent capacity is raw storage.
    Storage,
}

/// Interleave-set shape of one region goal template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterleaveSetType {
    Interleaved,
    NonInterleaved,
}
