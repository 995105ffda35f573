//! Platform limits for DCPMM topologies.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

/// Maximum number of DCPMMs a single platform can hold.
pub const MAX_DIMMS: usize = 128;

/// Maximum number of CPU sockets.
pub const MAX_SOCKETS: usize = 16;

pub const MAX_IMCS_PER_SOCKET: usize = 4;
pub const MAX_CHANNELS_PER_IMC: usize = 3;
pub const MAX_DIMMS_PER_CHANNEL: usize = 2;
pub const MAX_DIMMS_PER_SOCKET: usize = MAX_IMCS_PER_SOCKET * MAX_CHANNELS_PER_IMC * MAX_DIMMS_PER_CHANNEL;

/// Maximum number of interleave sets a single DIMM can participate in.
pub const MAX_IS_PER_DIMM: usize = 2;

/// Maximum passphrase length accepted by DIMM firmware, in bytes.
pub const MAX_PASSPHRASE_LEN: usize = 32;

pub const KIB: u64 = 1 << 10;
pub const MIB: u64 = 1 << 20;
pub const GIB: u64 = 1 << 30;
