//! Target DIMM resolution.
//!
//! Every operation that accepts DIMM or socket selectors funnels through
//! [`verify_target_dimms`], which expands the selectors into a concrete list
//! of DIMM handles and rejects malformed requests before any hardware is
//! touched.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::inventory::{DimmId, Inventory};
use dcpmm_sdk::limits::MAX_DIMMS;
use dcpmm_sdk::status::{CommandStatus, NvmStatusCode, ObjectType};

/// Which DIMM population a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimmSelection {
    /// DIMMs with a trained DDRT interface, the normal case.
    Initialized,
    /// SMBUS-only DIMMs awaiting firmware recovery.
    Uninitialized,
}

/// Expands DIMM and socket selectors into a verified list of DIMM handles.
///
/// Both selector lists empty means "all manageable DIMMs" of the selected
/// population. Validation is fail-fast: the first problem found is recorded
/// in `status` and returned, and no list is produced.
pub fn verify_target_dimms(
    inventory: &Inventory,
    dimm_ids: &[DimmId],
    socket_ids: &[u16],
    selection: DimmSelection,
    status: &mut CommandStatus,
) -> Result<Vec<DimmId>, NvmStatusCode> {
    if let Some(dup) = first_duplicate(dimm_ids) {
        status.set_object_status(dup.0, NvmStatusCode::ErrDimmIdDuplicated);
        return Err(NvmStatusCode::ErrDimmIdDuplicated);
    }
    if let Some(dup) = first_duplicate(socket_ids) {
        status.object_type = ObjectType::Socket;
        status.set_object_status(dup as u32, NvmStatusCode::ErrSocketIdDuplicated);
        return Err(NvmStatusCode::ErrSocketIdDuplicated);
    }
    // Socket selectors only make sense for the trained population; recovery
    // targets are always addressed directly.
    if selection == DimmSelection::Uninitialized && !socket_ids.is_empty() {
        return Err(NvmStatusCode::ErrInvalidParameter);
    }

    for &socket in socket_ids {
        if !inventory.socket_exists(socket) {
            status.object_type = ObjectType::Socket;
            status.set_object_status(socket as u32, NvmStatusCode::ErrSocketIdNotValid);
            return Err(NvmStatusCode::ErrSocketIdNotValid);
        }
    }

    let mut targets: Vec<DimmId> = Vec::new();
    if !dimm_ids.is_empty() {
        for &id in dimm_ids {
            match selection {
                DimmSelection::Initialized => match inventory.get(id) {
                    None => {
                        status.set_object_status(id.0, NvmStatusCode::ErrDimmNotFound);
                        return Err(NvmStatusCode::ErrDimmNotFound);
                    }
                    Some(dimm) if !dimm.is_manageable() => {
                        status.set_object_status(id.0, NvmStatusCode::ErrManageableDimmNotFound);
                        return Err(NvmStatusCode::ErrManageableDimmNotFound);
                    }
                    // A socket list alongside explicit DIMM ids restricts the
                    // ids to members of those sockets.
                    Some(dimm)
                        if !socket_ids.is_empty() && !socket_ids.contains(&dimm.socket_id) =>
                    {
                        status.set_object_status(id.0, NvmStatusCode::ErrDimmNotFound);
                        return Err(NvmStatusCode::ErrDimmNotFound);
                    }
                    Some(_) => targets.push(id),
                },
                DimmSelection::Uninitialized => {
                    if inventory.get_uninitialized(id).is_none() {
                        status.set_object_status(id.0, NvmStatusCode::ErrDimmNotFound);
                        return Err(NvmStatusCode::ErrDimmNotFound);
                    }
                    targets.push(id);
                }
            }
        }
    } else if !socket_ids.is_empty() {
        for dimm in inventory.dimms() {
            if socket_ids.contains(&dimm.socket_id) && dimm.is_manageable() {
                targets.push(dimm.id);
            }
        }
    } else {
        targets = match selection {
            DimmSelection::Initialized => inventory.manageable_ids(),
            DimmSelection::Uninitialized => inventory.uninitialized_ids(),
        };
    }

    if targets.is_empty() {
        return Err(NvmStatusCode::ErrManageableDimmNotFound);
    }
    if targets.len() > MAX_DIMMS {
        return Err(NvmStatusCode::ErrInvalidParameter);
    }
    Ok(targets)
}

fn first_duplicate<T: Copy + PartialEq>(items: &[T]) -> Option<T> {
    for (i, item) in items.iter().enumerate() {
        if items[..i].contains(item) {
            return Some(*item);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::tests::topology;
    use dcpmm_sdk::limits::GIB;
    use dcpmm_sdk::ApiVersion;

    fn two_socket_inventory() -> Inventory {
        Inventory::new(
            vec![topology(0x10, 0, GIB), topology(0x11, 0, GIB), topology(0x20, 1, GIB)],
            vec![topology(0x30, 1, GIB)],
        )
    }

    #[test]
    fn empty_selectors_expand_to_all_manageable() {
        let inventory = two_socket_inventory();
        let mut status = CommandStatus::default();
        let targets =
            verify_target_dimms(&inventory, &[], &[], DimmSelection::Initialized, &mut status).unwrap();
        assert_eq!(targets, vec![DimmId(1), DimmId(2), DimmId(3)]);
    }

    #[test]
    fn socket_selector_picks_socket_members() {
        let inventory = two_socket_inventory();
        let mut status = CommandStatus::default();
        let targets =
            verify_target_dimms(&inventory, &[], &[1], DimmSelection::Initialized, &mut status).unwrap();
        assert_eq!(targets, vec![DimmId(3)]);
    }

    #[test]
    fn duplicate_dimm_id_rejected_before_lookup() {
        let inventory = two_socket_inventory();
        let mut status = CommandStatus::default();
        let result = verify_target_dimms(
            &inventory,
            &[DimmId(1), DimmId(1)],
            &[],
            DimmSelection::Initialized,
            &mut status,
        );
        assert_eq!(result, Err(NvmStatusCode::ErrDimmIdDuplicated));
        assert!(status.object_status(1).unwrap().contains(NvmStatusCode::ErrDimmIdDuplicated));
    }

    #[test]
    fn unknown_dimm_id_rejected() {
        let inventory = two_socket_inventory();
        let mut status = CommandStatus::default();
        let result = verify_target_dimms(
            &inventory,
            &[DimmId(99)],
            &[],
            DimmSelection::Initialized,
            &mut status,
        );
        assert_eq!(result, Err(NvmStatusCode::ErrDimmNotFound));
    }

    #[test]
    fn dimm_id_outside_socket_list_rejected() {
        let inventory = two_socket_inventory();
        let mut status = CommandStatus::default();
        // DimmId(3) sits on socket 1; restricting to socket 0 must reject it.
        let result = verify_target_dimms(
            &inventory,
            &[DimmId(3)],
            &[0],
            DimmSelection::Initialized,
            &mut status,
        );
        assert_eq!(result, Err(NvmStatusCode::ErrDimmNotFound));
        assert!(status.object_status(3).unwrap().contains(NvmStatusCode::ErrDimmNotFound));

        // The same id passes when its own socket is in the list.
        let mut status = CommandStatus::default();
        let targets = verify_target_dimms(
            &inventory,
            &[DimmId(3)],
            &[1],
            DimmSelection::Initialized,
            &mut status,
        )
        .unwrap();
        assert_eq!(targets, vec![DimmId(3)]);
    }

    #[test]
    fn unknown_socket_rejected() {
        let inventory = two_socket_inventory();
        let mut status = CommandStatus::default();
        let result =
            verify_target_dimms(&inventory, &[], &[7], DimmSelection::Initialized, &mut status);
        assert_eq!(result, Err(NvmStatusCode::ErrSocketIdNotValid));
    }

    #[test]
    fn unmanageable_dimm_rejected_by_id() {
        let mut t = topology(0x10, 0, GIB);
        t.fw_api_version = ApiVersion::new(1, 0);
        let inventory = Inventory::new(vec![t], vec![]);
        let mut status = CommandStatus::default();
        let result = verify_target_dimms(
            &inventory,
            &[DimmId(1)],
            &[],
            DimmSelection::Initialized,
            &mut status,
        );
        assert_eq!(result, Err(NvmStatusCode::ErrManageableDimmNotFound));
    }

    #[test]
    fn uninitialized_selection_uses_recovery_list() {
        let inventory = two_socket_inventory();
        let mut status = CommandStatus::default();
        let targets =
            verify_target_dimms(&inventory, &[], &[], DimmSelection::Uninitialized, &mut status).unwrap();
        assert_eq!(targets, vec![DimmId(4)]);

        let result =
            verify_target_dimms(&inventory, &[], &[1], DimmSelection::Uninitialized, &mut status);
        assert_eq!(result, Err(NvmStatusCode::ErrInvalidParameter));
    }
}
