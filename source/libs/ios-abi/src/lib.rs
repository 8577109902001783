// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Shared IOS ABI definitions used by the FS and ES services
//! OWNERS: @runtime
//! PUBLIC API: ReturnCode, IpcResult, process ids, well-known titles, NAND path helpers
//! DEPENDS_ON: thiserror
//! INVARIANTS: ReturnCode discriminants are the raw values seen by emulated software
//! ADR: docs/adr/0001-ios-service-architecture.md

mod codes;
pub mod paths;
pub mod titles;

pub use codes::{to_raw, IpcResult, ReturnCode};

/// Process ids of the IOS modules.
pub mod pid {
    /// Kernel.
    pub const PID_KERNEL: u32 = 0;
    /// ES module.
    pub const PID_ES: u32 = 1;
    /// FS module.
    pub const PID_FS: u32 = 2;
    /// DI module.
    pub const PID_DI: u32 = 3;
    /// OH0 module.
    pub const PID_OH0: u32 = 4;
    /// OH1 module.
    pub const PID_OH1: u32 = 5;
    /// EHCI module.
    pub const PID_EHCI: u32 = 6;
    /// SDI module.
    pub const PID_SDI: u32 = 7;
    /// USB ethernet module.
    pub const PID_USBETH: u32 = 8;
    /// Network module.
    pub const PID_NET: u32 = 9;
    /// WD module.
    pub const PID_WD: u32 = 10;
    /// WL module.
    pub const PID_WL: u32 = 11;
    /// KD module.
    pub const PID_KD: u32 = 12;
    /// NCD module.
    pub const PID_NCD: u32 = 13;
    /// STM module.
    pub const PID_STM: u32 = 14;
    /// PPC boot loader.
    pub const PID_PPCBOOT: u32 = 15;
    /// SSL module.
    pub const PID_SSL: u32 = 16;
    /// USB module.
    pub const PID_USB: u32 = 17;
    /// P2P module.
    pub const PID_P2P: u32 = 18;
    /// WFS process on vWii.
    pub const PID_UNKNOWN: u32 = 19;
}

/// UID assigned to the system menu.
pub const SYSMENU_UID: u32 = 0x1000;
/// GID assigned to the system menu.
pub const SYSMENU_GID: u16 = 1;
/// First uid handed out to PPC titles.
pub const FIRST_PPC_UID: u32 = 0x1000;
