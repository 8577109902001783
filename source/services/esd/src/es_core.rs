// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! ES state and boot-time NAND layout.

use core_timing::Tick;
use ios_abi::pid::PID_UNKNOWN;
use ios_abi::{SYSMENU_GID, SYSMENU_UID};
use log::error;
use nand_fs::{FileAttribute, FileSystem, FsError, Gid, Mode, Modes, Uid};

use crate::content_table::ContentTable;
use crate::device::{EsContext, ES_CONTEXT_COUNT};
use crate::title_context::TitleContext;
use crate::{KERNEL_GID, KERNEL_UID};

struct DirectoryToCreate {
    path: &'static str,
    attribute: FileAttribute,
    modes: Modes,
    uid: Uid,
    gid: Gid,
}

const PUBLIC: Modes = Modes::public();
const RW_RW_NONE: Modes = Modes::new(Mode::ReadWrite, Mode::ReadWrite, Mode::None);

const DIRECTORIES_TO_CREATE: [DirectoryToCreate; 9] = [
    DirectoryToCreate { path: "/sys", attribute: 0, modes: RW_RW_NONE, uid: KERNEL_UID, gid: KERNEL_GID },
    DirectoryToCreate { path: "/ticket", attribute: 0, modes: RW_RW_NONE, uid: KERNEL_UID, gid: KERNEL_GID },
    DirectoryToCreate {
        path: "/title",
        attribute: 0,
        modes: Modes::new(Mode::ReadWrite, Mode::ReadWrite, Mode::Read),
        uid: KERNEL_UID,
        gid: KERNEL_GID,
    },
    DirectoryToCreate { path: "/shared1", attribute: 0, modes: RW_RW_NONE, uid: KERNEL_UID, gid: KERNEL_GID },
    DirectoryToCreate { path: "/shared2", attribute: 0, modes: PUBLIC, uid: KERNEL_UID, gid: KERNEL_GID },
    DirectoryToCreate { path: "/tmp", attribute: 0, modes: PUBLIC, uid: KERNEL_UID, gid: KERNEL_GID },
    DirectoryToCreate { path: "/import", attribute: 0, modes: RW_RW_NONE, uid: KERNEL_UID, gid: KERNEL_GID },
    DirectoryToCreate { path: "/meta", attribute: 0, modes: PUBLIC, uid: SYSMENU_UID, gid: SYSMENU_GID },
    DirectoryToCreate {
        path: "/wfs",
        attribute: 0,
        modes: Modes::new(Mode::ReadWrite, Mode::None, Mode::None),
        uid: PID_UNKNOWN,
        gid: PID_UNKNOWN as Gid,
    },
];

/// Creates the system directories and fixes their owners and modes.
///
/// ES accesses the NAND as uid 0 even though it runs as `PID_ES`.
pub(crate) fn create_system_directories(fs: &mut dyn FileSystem) {
    for dir in &DIRECTORIES_TO_CREATE {
        match fs.create_directory(KERNEL_UID, KERNEL_GID, dir.path, dir.attribute, dir.modes) {
            Ok(()) | Err(FsError::AlreadyExists) => {}
            Err(err) => error!("es: failed to create {}: {err}", dir.path),
        }
        if let Err(err) = fs.set_metadata(KERNEL_UID, dir.path, dir.uid, dir.gid, dir.attribute, dir.modes) {
            error!("es: failed to set metadata of {}: {err}", dir.path);
        }
    }
}

/// Time ES takes to come up on a given IOS version.
pub const fn es_boot_ticks(ios_version: u32) -> Tick {
    if ios_version < 28 {
        return 22_000_000;
    }
    // IOS28+ loads extra modules at start.
    if ios_version < 57 {
        return 33_000_000;
    }
    if matches!(ios_version, 57..=59) {
        return 39_000_000;
    }
    37_000_000
}

/// Mutable ES state; rebuilt on every IOS reload.
#[derive(Debug, Default)]
pub struct EsCore {
    pub(crate) content_table: ContentTable,
    pub(crate) title_context: TitleContext,
    pub(crate) contexts: [EsContext; ES_CONTEXT_COUNT],
    pub(crate) pending_ppc_boot_content_path: Option<String>,
}

impl EsCore {
    /// Active title.
    pub fn title_context(&self) -> &TitleContext {
        &self.title_context
    }

    /// Content table.
    pub fn content_table(&self) -> &ContentTable {
        &self.content_table
    }

    /// Boot content queued for the next PPC bootstrap.
    pub fn pending_ppc_boot_content_path(&self) -> Option<&str> {
        self.pending_ppc_boot_content_path.as_deref()
    }
}
