//! DCPMM Management Engine
//!
//! The driver-level management stack for DC Persistent Memory Modules: a DIMM
//! inventory built from platform enumeration data, a target resolver, a
//! per-DIMM security state machine, the region goal capacity planner, a
//! namespace manager with transactional label writes, and the firmware update
//! engine. [`service::ConfigService`] ties these together behind the
//! configuration protocol surface.
//!
//! All engines are synchronous and single-caller: exclusive access to the
//! [`inventory::Inventory`] flows through `&mut` borrows, which enforces the
//! one-command-at-a-time discipline the mailbox protocol requires.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
pub mod error;
pub mod firmware;
pub mod goal;
pub mod inventory;
pub mod namespace;
pub mod planner;
pub mod resolver;
pub mod security;
pub mod service;

pub use error::NvmError;
pub use inventory::{Dimm, DimmId, Inventory, PartitionAlignments, PlatformCapabilities};
pub use service::ConfigService;
