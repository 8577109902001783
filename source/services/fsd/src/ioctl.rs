// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! `/dev/fs` ioctl surface.

use core_timing::Ticks;
use log::debug;
use nand_fs::{
    DirectoryStats, FileAttribute, FileStatus, FsError, Gid, Metadata, Modes, NandStats, Result,
    Uid,
};

use crate::fs_core::FsCore;

/// Numeric ioctl commands of `/dev/fs`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsIoctlCommand {
    /// Wipe the NAND.
    Format = 1,
    /// Whole-device usage.
    GetStats = 2,
    /// Create a directory.
    CreateDirectory = 3,
    /// List a directory.
    ReadDirectory = 4,
    /// Change owner, attribute and modes.
    SetAttribute = 5,
    /// Read metadata.
    GetAttribute = 6,
    /// Delete an entry.
    Delete = 7,
    /// Move an entry.
    Rename = 8,
    /// Create a file.
    CreateFile = 9,
    /// Accepted and ignored.
    SetFileVersionControl = 10,
    /// Offset and size of an open file.
    GetFileStats = 11,
    /// Usage of a directory tree.
    GetUsage = 12,
    /// Flush before power off.
    Shutdown = 13,
}

impl TryFrom<u32> for FsIoctlCommand {
    type Error = FsError;

    fn try_from(raw: u32) -> Result<Self> {
        Ok(match raw {
            1 => Self::Format,
            2 => Self::GetStats,
            3 => Self::CreateDirectory,
            4 => Self::ReadDirectory,
            5 => Self::SetAttribute,
            6 => Self::GetAttribute,
            7 => Self::Delete,
            8 => Self::Rename,
            9 => Self::CreateFile,
            10 => Self::SetFileVersionControl,
            11 => Self::GetFileStats,
            12 => Self::GetUsage,
            13 => Self::Shutdown,
            _ => return Err(FsError::Invalid),
        })
    }
}

/// Decoded ioctl with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsRequest<'a> {
    /// See [`FsIoctlCommand::Format`].
    Format,
    /// See [`FsIoctlCommand::GetStats`].
    GetStats,
    /// See [`FsIoctlCommand::CreateDirectory`].
    CreateDirectory {
        /// Target path.
        path: &'a str,
        /// Attribute byte.
        attribute: FileAttribute,
        /// Access modes.
        modes: Modes,
    },
    /// See [`FsIoctlCommand::ReadDirectory`]. Without a limit only the
    /// entry count is returned.
    ReadDirectory {
        /// Directory path.
        path: &'a str,
        /// Maximum number of names to return.
        max_entries: Option<u32>,
    },
    /// See [`FsIoctlCommand::SetAttribute`].
    SetAttribute {
        /// Target path.
        path: &'a str,
        /// New owner.
        uid: Uid,
        /// New group.
        gid: Gid,
        /// New attribute byte.
        attribute: FileAttribute,
        /// New modes.
        modes: Modes,
    },
    /// See [`FsIoctlCommand::GetAttribute`].
    GetAttribute {
        /// Target path.
        path: &'a str,
    },
    /// See [`FsIoctlCommand::Delete`].
    Delete {
        /// Target path.
        path: &'a str,
    },
    /// See [`FsIoctlCommand::Rename`].
    Rename {
        /// Source path.
        old: &'a str,
        /// Destination path.
        new: &'a str,
    },
    /// See [`FsIoctlCommand::CreateFile`].
    CreateFile {
        /// Target path.
        path: &'a str,
        /// Attribute byte.
        attribute: FileAttribute,
        /// Access modes.
        modes: Modes,
    },
    /// See [`FsIoctlCommand::SetFileVersionControl`].
    SetFileVersionControl {
        /// Target path.
        path: &'a str,
    },
    /// See [`FsIoctlCommand::GetFileStats`]; issued on a file handle.
    GetFileStats,
    /// See [`FsIoctlCommand::GetUsage`].
    GetUsage {
        /// Directory path.
        path: &'a str,
    },
    /// See [`FsIoctlCommand::Shutdown`].
    Shutdown,
}

impl FsRequest<'_> {
    /// Numeric command of this request.
    pub fn command(&self) -> FsIoctlCommand {
        match self {
            Self::Format => FsIoctlCommand::Format,
            Self::GetStats => FsIoctlCommand::GetStats,
            Self::CreateDirectory { .. } => FsIoctlCommand::CreateDirectory,
            Self::ReadDirectory { .. } => FsIoctlCommand::ReadDirectory,
            Self::SetAttribute { .. } => FsIoctlCommand::SetAttribute,
            Self::GetAttribute { .. } => FsIoctlCommand::GetAttribute,
            Self::Delete { .. } => FsIoctlCommand::Delete,
            Self::Rename { .. } => FsIoctlCommand::Rename,
            Self::CreateFile { .. } => FsIoctlCommand::CreateFile,
            Self::SetFileVersionControl { .. } => FsIoctlCommand::SetFileVersionControl,
            Self::GetFileStats => FsIoctlCommand::GetFileStats,
            Self::GetUsage { .. } => FsIoctlCommand::GetUsage,
            Self::Shutdown => FsIoctlCommand::Shutdown,
        }
    }
}

/// Reply payload of an ioctl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsReply {
    /// No payload.
    Done,
    /// Reply to `GetStats`.
    Stats(NandStats),
    /// Reply to `ReadDirectory`.
    Entries {
        /// Returned names, empty when no limit was given.
        names: Vec<String>,
        /// Number of names returned, or all entries when no limit was given.
        count: u32,
    },
    /// Reply to `GetAttribute`.
    Attribute(Metadata),
    /// Reply to `GetFileStats`.
    FileStats(FileStatus),
    /// Reply to `GetUsage`.
    Usage(DirectoryStats),
}

impl FsCore {
    /// Executes an ioctl on `fd`. Everything except `GetFileStats` needs a
    /// `/dev/fs` control handle.
    pub fn ioctl(&mut self, fd: u32, request: FsRequest<'_>, ticks: &mut Ticks) -> Result<FsReply> {
        let command = request.command();
        if command == FsIoctlCommand::GetFileStats {
            return self.get_file_status(fd, ticks).map(FsReply::FileStats);
        }
        if !self.is_control_handle(fd)? {
            ticks.add(self.timing().ipc_overhead);
            return Err(FsError::Invalid);
        }
        let (uid, gid) = self.handle_owner(fd)?;
        debug!("fs: ioctl {command:?} from uid {uid:#x}");
        match request {
            FsRequest::Format => self.format(uid, ticks).map(|()| FsReply::Done),
            FsRequest::GetStats => self.get_nand_stats(ticks).map(FsReply::Stats),
            FsRequest::CreateDirectory { path, attribute, modes } => {
                self.create_directory(uid, gid, path, attribute, modes, ticks).map(|()| FsReply::Done)
            }
            FsRequest::ReadDirectory { path, max_entries } => {
                let mut names = self.read_directory(uid, gid, path, ticks)?;
                match max_entries {
                    Some(max) => {
                        names.truncate(max as usize);
                        let count = names.len() as u32;
                        Ok(FsReply::Entries { names, count })
                    }
                    None => Ok(FsReply::Entries { count: names.len() as u32, names: Vec::new() }),
                }
            }
            FsRequest::SetAttribute { path, uid: owner, gid: group, attribute, modes } => self
                .set_metadata(uid, path, owner, group, attribute, modes, ticks)
                .map(|()| FsReply::Done),
            FsRequest::GetAttribute { path } => {
                self.get_metadata(uid, gid, path, ticks).map(FsReply::Attribute)
            }
            FsRequest::Delete { path } => self.delete_file(uid, gid, path, ticks).map(|()| FsReply::Done),
            FsRequest::Rename { old, new } => {
                self.rename_file(uid, gid, old, new, ticks).map(|()| FsReply::Done)
            }
            FsRequest::CreateFile { path, attribute, modes } => {
                self.create_file(uid, gid, path, attribute, modes, ticks).map(|()| FsReply::Done)
            }
            FsRequest::SetFileVersionControl { path } => {
                self.get_metadata(uid, gid, path, ticks)?;
                debug!("fs: ignoring version control for {path}");
                Ok(FsReply::Done)
            }
            FsRequest::GetFileStats => Err(FsError::Invalid),
            FsRequest::GetUsage { path } => self.get_directory_stats(path, ticks).map(FsReply::Usage),
            FsRequest::Shutdown => {
                ticks.add(self.timing().ipc_overhead);
                self.flush(ticks);
                Ok(FsReply::Done)
            }
        }
    }
}
