//! NVM status codes and per-operation status aggregation.
//!
//! Every operation that addresses multiple DIMMs or sockets reports its result
//! through a [`CommandStatus`]: one [`ObjectStatus`] per addressed object plus
//! an overall general status. The general status keeps the first error seen;
//! later errors never overwrite it.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::fmt::Display;
use std::collections::BTreeSet;

/// The NVM operation status code space.
///
/// Discriminant values match the firmware management interface definition so
/// that codes can be surfaced to callers unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum NvmStatusCode {
    Success = 0,
    SuccessFwResetRequired = 1,
    ErrOperationNotStarted = 2,
    ErrOperationFailed = 3,
    ErrForceRequired = 4,
    ErrInvalidParameter = 5,
    ErrCommandNotSupportedBySku = 9,
    ErrDimmNotFound = 11,
    ErrDimmIdDuplicated = 12,
    ErrSocketIdNotValid = 13,
    ErrSocketIdDuplicated = 15,
    ErrConfigNotSupportedByCurrentSku = 16,
    ErrManageableDimmNotFound = 17,

    ErrPassphraseNotProvided = 30,
    ErrNewPassphraseNotProvided = 31,
    ErrPassphrasesDoNotMatch = 32,
    ErrPassphraseTooLong = 34,
    ErrEnableSecurityNotAllowed = 35,
    ErrCreateGoalNotAllowed = 36,
    ErrInvalidSecurityState = 37,
    ErrInvalidSecurityOperation = 38,
    ErrUnableToGetSecurityState = 39,
    ErrInconsistentSecurityState = 40,
    ErrInvalidPassphrase = 41,
    ErrSecurityCountExpired = 42,
    ErrSecureEraseNamespaceExists = 44,

    SuccessImageExamineOk = 61,
    ErrImageFileNotValid = 62,
    ErrImageExamineLowerVersion = 63,
    ErrImageExamineInvalid = 64,
    ErrFirmwareApiNotValid = 65,
    ErrFirmwareVersionNotValid = 66,
    ErrFirmwareTooLowForceRequired = 67,
    ErrFirmwareAlreadyLoaded = 68,
    ErrFirmwareFailedToStage = 69,

    WarnTwoLmModeOff = 103,
    WarnImcDdrPmmNotPaired = 104,
    ErrRegionConfApplyingFailed = 109,
    ErrRegionConfUnsupportedConfig = 110,
    ErrRegionNotFound = 111,
    ErrPlatformNotSupportManagementSoft = 112,
    ErrPlatformNotSupport2lmMode = 113,
    ErrPlatformNotSupportPmMode = 114,
    ErrRegionCurrConfExists = 115,
    ErrRegionGoalNoExistsOnDimm = 122,
    ErrReserveDimmRequiresAtLeastTwoDimms = 123,
    ErrRegionGoalNamespaceExists = 124,
    ErrPersMemMustBeAppliedToAllDimms = 126,
    WarnMappedMemReducedDueToCpuSku = 127,

    ErrDumpNoConfiguredDimms = 131,
    ErrLoadVersion = 140,
    ErrLoadInvalidDataInFile = 141,
    ErrLoadImproperConfigInFile = 142,
    ErrLoadDimmCountMismatch = 148,

    ErrUnsupportedBlockSize = 171,
    ErrInvalidNamespaceCapacity = 174,
    ErrNotEnoughFreeSpace = 175,
    ErrNamespaceConfigurationBroken = 176,
    ErrNamespaceDoesNotExist = 177,
    ErrNamespaceCouldNotUninstall = 178,
    ErrNamespaceCouldNotInstall = 179,
    ErrNamespaceTooSmallForBtt = 183,
    ErrRenameNamespaceNotSupported = 187,
    ErrFailedToInitNsLabels = 188,

    ErrOperationNotSupportedByMixedSku = 263,
    ErrApiNotSupported = 266,
    ErrUnknown = 267,
    ErrBusyDevice = 270,
    ErrTimeout = 274,
    ErrDataTransfer = 275,
    ErrGeneralDevFailure = 276,
}

impl NvmStatusCode {
    /// Returns true for every code that reports a failed operation.
    ///
    /// Reset-required and examine-ok are success codes; warnings are not
    /// errors either, the operation completed.
    pub fn is_error(self) -> bool {
        !matches!(
            self,
            NvmStatusCode::Success
                | NvmStatusCode::SuccessFwResetRequired
                | NvmStatusCode::SuccessImageExamineOk
                | NvmStatusCode::WarnTwoLmModeOff
                | NvmStatusCode::WarnImcDdrPmmNotPaired
                | NvmStatusCode::WarnMappedMemReducedDueToCpuSku
        )
    }

    /// Returns true for warning codes: the operation completed but with a caveat.
    pub fn is_warning(self) -> bool {
        matches!(
            self,
            NvmStatusCode::WarnTwoLmModeOff
                | NvmStatusCode::WarnImcDdrPmmNotPaired
                | NvmStatusCode::WarnMappedMemReducedDueToCpuSku
        )
    }
}

impl Display for NvmStatusCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The kind of object a [`CommandStatus`] entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectType {
    #[default]
    Unknown,
    Dimm,
    Socket,
    Region,
    Namespace,
}

/// Status accumulated for one addressed object (DIMM, socket, namespace).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStatus {
    pub object_id: u32,
    statuses: BTreeSet<NvmStatusCode>,
}

impl ObjectStatus {
    fn new(object_id: u32) -> Self {
        Self { object_id, statuses: BTreeSet::new() }
    }

    pub fn contains(&self, code: NvmStatusCode) -> bool {
        self.statuses.contains(&code)
    }

    pub fn is_error(&self) -> bool {
        self.statuses.iter().any(|code| code.is_error())
    }

    pub fn codes(&self) -> impl Iterator<Item = NvmStatusCode> + '_ {
        self.statuses.iter().copied()
    }
}

/// Per-operation result aggregator.
///
/// Invariant: an operation never reports overall success until every addressed
/// object carries an explicit status.
#[derive(Debug, Clone, Default)]
pub struct CommandStatus {
    pub object_type: ObjectType,
    general_status: Option<NvmStatusCode>,
    objects: Vec<ObjectStatus>,
}

impl CommandStatus {
    pub fn new(object_type: ObjectType) -> Self {
        Self { object_type, general_status: None, objects: Vec::new() }
    }

    /// The overall status of the operation. Defaults to
    /// [`NvmStatusCode::ErrOperationNotStarted`] until something is recorded.
    pub fn general_status(&self) -> NvmStatusCode {
        self.general_status.unwrap_or(NvmStatusCode::ErrOperationNotStarted)
    }

    /// Records a status against one object, creating the entry on first use,
    /// and folds the code into the general status with first-error-wins
    /// semantics.
    pub fn set_object_status(&mut self, object_id: u32, code: NvmStatusCode) {
        match self.objects.iter_mut().find(|o| o.object_id == object_id) {
            Some(object) => {
                object.statuses.insert(code);
            }
            None => {
                let mut object = ObjectStatus::new(object_id);
                object.statuses.insert(code);
                self.objects.push(object);
            }
        }
        self.update_general_status(code);
    }

    /// Folds a code into the general status. The first error recorded wins;
    /// warnings stick unless an error arrives; success never overwrites
    /// anything but an earlier success.
    pub fn update_general_status(&mut self, code: NvmStatusCode) {
        match self.general_status {
            None => self.general_status = Some(code),
            Some(current) => {
                if current.is_error() {
                    return;
                }
                if code.is_error() || (code.is_warning() && !current.is_warning()) {
                    self.general_status = Some(code);
                }
            }
        }
    }

    /// Discards all object statuses and forces the general status.
    ///
    /// Used when an operation fails before any object was addressed.
    pub fn reset_with(&mut self, code: NvmStatusCode) {
        self.objects.clear();
        self.general_status = Some(code);
    }

    pub fn object_status(&self, object_id: u32) -> Option<&ObjectStatus> {
        self.objects.iter().find(|o| o.object_id == object_id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectStatus> {
        self.objects.iter()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn is_error(&self) -> bool {
        self.general_status().is_error()
    }

    /// True when every addressed object reported a non-error status and the
    /// general status is non-error.
    pub fn is_success_for_all_objects(&self) -> bool {
        !self.is_error() && !self.objects.is_empty() && self.objects.iter().all(|o| !o.is_error())
    }
}
