//! DCPMM Management SDK
//!
//! Shared types used across the DCPMM management stack: the NVM status code
//! space, the per-operation `CommandStatus` aggregate, firmware version and
//! image types, security and SKU bitfields, and platform limits.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
pub mod fw_image;
pub mod limits;
pub mod status;
pub mod types;
pub mod version;

pub use status::{CommandStatus, NvmStatusCode, ObjectStatus, ObjectType};
pub use types::{BootStatusRegister, SecurityMask, SkuFlags};
pub use version::{ApiVersion, FwVersion};
