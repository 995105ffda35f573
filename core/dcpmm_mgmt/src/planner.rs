//! Capacity planning for region goals.
//!
//! Pure arithmetic: turns a percentage split request over a socket's DIMMs
//! into per-DIMM capacity plans and interleave-set templates. No hardware is
//! touched here; the goal engine commits the result.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::inventory::{DimmId, PartitionAlignments};
use dcpmm_sdk::limits::MAX_IS_PER_DIMM;
use dcpmm_sdk::status::NvmStatusCode;
use dcpmm_sdk::types::{InterleaveSetType, PersistentMemType};

/// One AppDirect interleave set to be created on a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionGoalTemplate {
    /// Total size across all participating DIMMs.
    pub size: u64,
    pub interleave: InterleaveSetType,
}

/// One DIMM's share of an interleave-set template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppDirectPiece {
    pub size: u64,
    /// Index into the socket's template list.
    pub set_index: u16,
    pub interleave: InterleaveSetType,
}

/// The planned capacity split for one DIMM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimmPlan {
    pub dimm_id: DimmId,
    pub raw_capacity: u64,
    pub volatile_size: u64,
    pub reserved_size: u64,
    pub appdirect: Vec<AppDirectPiece>,
    /// Capacity lost to alignment; never mapped anywhere.
    pub inaccessible: u64,
}

impl DimmPlan {
    pub fn appdirect_size(&self) -> u64 {
        self.appdirect.iter().map(|p| p.size).sum()
    }

    /// Capacity mapped into the system address space.
    pub fn mapped_size(&self) -> u64 {
        self.volatile_size + self.appdirect_size()
    }
}

fn round_down(value: u64, alignment: u64) -> u64 {
    if alignment == 0 { value } else { value - value % alignment }
}

/// Splits one DIMM's raw capacity by the requested percentages.
///
/// Every piece is rounded down to its alignment unit and the remainder is
/// accounted as inaccessible, so the four parts always sum to the raw
/// capacity exactly.
pub fn split_capacity(
    raw: u64,
    volatile_percent: u8,
    reserved_percent: u8,
    alignments: &PartitionAlignments,
) -> (u64, u64, u64, u64) {
    let volatile = round_down(raw * volatile_percent as u64 / 100, alignments.volatile_alignment);
    let reserved = round_down(raw * reserved_percent as u64 / 100, alignments.partition_alignment);
    let persistent = round_down(raw - volatile - reserved, alignments.persistent_alignment);
    let inaccessible = raw - volatile - reserved - persistent;
    (volatile, reserved, persistent, inaccessible)
}

/// Maps per-DIMM persistent capacities to interleave-set templates.
///
/// Interleaved AppDirect takes the smallest persistent capacity symmetrically
/// across every DIMM, and whatever is left on larger DIMMs becomes one
/// non-interleaved set per DIMM. Non-interleaved AppDirect gives each DIMM
/// its own set outright.
pub fn map_to_templates(
    persistent: &[(DimmId, u64)],
    pm_type: PersistentMemType,
) -> Result<(Vec<RegionGoalTemplate>, Vec<(DimmId, Vec<AppDirectPiece>)>), NvmStatusCode> {
    let mut templates: Vec<RegionGoalTemplate> = Vec::new();
    let mut pieces: Vec<(DimmId, Vec<AppDirectPiece>)> =
        persistent.iter().map(|&(id, _)| (id, Vec::new())).collect();

    match pm_type {
        PersistentMemType::Storage => {}
        PersistentMemType::AppDirectNonInterleaved => {
            for (i, &(_, size)) in persistent.iter().enumerate() {
                if size == 0 {
                    continue;
                }
                let set_index = templates.len() as u16;
                templates.push(RegionGoalTemplate { size, interleave: InterleaveSetType::NonInterleaved });
                pieces[i].1.push(AppDirectPiece {
                    size,
                    set_index,
                    interleave: InterleaveSetType::NonInterleaved,
                });
            }
        }
        PersistentMemType::AppDirect => {
            let nonzero = persistent.iter().filter(|&&(_, s)| s > 0).count();
            if nonzero == 0 {
                return Ok((templates, pieces));
            }
            // An interleave set spans the whole socket; a DIMM with nothing
            // to contribute makes the request unsatisfiable.
            if nonzero != persistent.len() {
                return Err(NvmStatusCode::ErrPersMemMustBeAppliedToAllDimms);
            }
            let symmetric = persistent.iter().map(|&(_, s)| s).min().unwrap_or(0);
            templates.push(RegionGoalTemplate {
                size: symmetric * persistent.len() as u64,
                interleave: InterleaveSetType::Interleaved,
            });
            for (i, &(_, size)) in persistent.iter().enumerate() {
                pieces[i].1.push(AppDirectPiece {
                    size: symmetric,
                    set_index: 0,
                    interleave: InterleaveSetType::Interleaved,
                });
                let leftover = size - symmetric;
                if leftover > 0 {
                    let set_index = templates.len() as u16;
                    templates.push(RegionGoalTemplate {
                        size: leftover,
                        interleave: InterleaveSetType::NonInterleaved,
                    });
                    pieces[i].1.push(AppDirectPiece {
                        size: leftover,
                        set_index,
                        interleave: InterleaveSetType::NonInterleaved,
                    });
                }
            }
        }
    }

    if pieces.iter().any(|(_, p)| p.len() > MAX_IS_PER_DIMM) {
        return Err(NvmStatusCode::ErrRegionConfUnsupportedConfig);
    }
    Ok((templates, pieces))
}

/// Plans the capacity split for one socket.
///
/// With `reserve_dimm` set, the last DIMM on the socket is held out of the
/// mapped configuration entirely; its whole capacity becomes reserved storage.
pub fn plan_socket(
    dimms: &[(DimmId, u64)],
    volatile_percent: u8,
    reserved_percent: u8,
    pm_type: PersistentMemType,
    reserve_dimm: bool,
    alignments: &PartitionAlignments,
) -> Result<Vec<DimmPlan>, NvmStatusCode> {
    if reserve_dimm && dimms.len() < 2 {
        return Err(NvmStatusCode::ErrReserveDimmRequiresAtLeastTwoDimms);
    }
    // A full volatile+reserved split leaves no persistent capacity, so any
    // AppDirect request degenerates to storage.
    let pm_type = if volatile_percent as u16 + reserved_percent as u16 >= 100 {
        PersistentMemType::Storage
    } else {
        pm_type
    };

    let (mapped, held_out) = if reserve_dimm {
        dimms.split_at(dimms.len() - 1)
    } else {
        (dimms, &[][..])
    };

    let mut plans: Vec<DimmPlan> = Vec::new();
    let mut persistent: Vec<(DimmId, u64)> = Vec::new();
    for &(id, raw) in mapped {
        let (volatile, reserved, pers, inaccessible) =
            split_capacity(raw, volatile_percent, reserved_percent, alignments);
        persistent.push((id, pers));
        plans.push(DimmPlan {
            dimm_id: id,
            raw_capacity: raw,
            volatile_size: volatile,
            reserved_size: reserved,
            appdirect: Vec::new(),
            inaccessible,
        });
    }

    let (_, pieces) = map_to_templates(&persistent, pm_type)?;
    for (plan, (id, dimm_pieces)) in plans.iter_mut().zip(pieces) {
        debug_assert_eq!(plan.dimm_id, id);
        let appdirect_total: u64 = dimm_pieces.iter().map(|p| p.size).sum();
        let (_, pers) = persistent.iter().find(|&&(pid, _)| pid == plan.dimm_id).copied().unwrap_or((id, 0));
        // Persistent capacity not claimed by any set stays reserved.
        plan.reserved_size += pers - appdirect_total;
        plan.appdirect = dimm_pieces;
    }

    for &(id, raw) in held_out {
        plans.push(DimmPlan {
            dimm_id: id,
            raw_capacity: raw,
            volatile_size: 0,
            reserved_size: raw,
            appdirect: Vec::new(),
            inaccessible: 0,
        });
    }
    Ok(plans)
}

/// Shrinks volatile allocations until the socket's mapped capacity fits the
/// CPU SKU limit. Returns true when anything was cut.
pub fn apply_socket_sku_limit(plans: &mut [DimmPlan], limit: u64, alignments: &PartitionAlignments) -> bool {
    let mapped: u64 = plans.iter().map(|p| p.mapped_size()).sum();
    if mapped <= limit {
        return false;
    }
    let mut excess = mapped - limit;
    for plan in plans.iter_mut() {
        if excess == 0 {
            break;
        }
        let cut = round_up(excess.min(plan.volatile_size), alignments.volatile_alignment)
            .min(plan.volatile_size);
        plan.volatile_size -= cut;
        plan.reserved_size += cut;
        excess = excess.saturating_sub(cut);
    }
    true
}

fn round_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 || value % alignment == 0 {
        value
    } else {
        value + alignment - value % alignment
    }
}
