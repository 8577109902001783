// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: NAND file system contract shared by the FS and ES services
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests for path rules and the in-memory backend
//!
//! PUBLIC API:
//!   - FileSystem: uid/gid-checked backend operations
//!   - FsError + convert_result: backend results and their IPC mapping
//!   - MemFileSystem: in-memory backend used by hosts and tests
//!
//! DEPENDENCIES:
//!   - ios-abi: ReturnCode target of the result conversion
//!   - thiserror: FsError
//!
//! ADR: docs/adr/0001-ios-service-architecture.md

mod memfs;
mod types;

pub use memfs::MemFileSystem;
pub use types::{
    DirectoryStats, Fd, FileAttribute, FileStatus, Gid, Metadata, Mode, Modes, NandStats,
    SeekMode, Uid,
};

use ios_abi::ReturnCode;
use thiserror::Error;

/// Longest accepted path, in bytes.
pub const MAX_PATH_LENGTH: usize = 64;
/// Longest accepted path component.
pub const MAX_FILENAME_LENGTH: usize = 12;
/// Deepest accepted path.
pub const MAX_PATH_DEPTH: usize = 8;
/// Size of one NAND cluster.
pub const CLUSTER_DATA_SIZE: u32 = 0x4000;

/// Backend result codes.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum FsError {
    /// Invalid argument or path.
    #[error("invalid argument")]
    Invalid = 1,
    /// Caller lacks the requested mode.
    #[error("access denied")]
    AccessDenied = 2,
    /// Superblock could not be written.
    #[error("superblock write failed")]
    SuperblockWriteFailed = 3,
    /// Superblock could not be initialised.
    #[error("superblock init failed")]
    SuperblockInitFailed = 4,
    /// Entry already exists.
    #[error("already exists")]
    AlreadyExists = 5,
    /// Entry not found.
    #[error("not found")]
    NotFound = 6,
    /// File system table is full.
    #[error("fst full")]
    FstFull = 7,
    /// No free clusters.
    #[error("no free space")]
    NoFreeSpace = 8,
    /// No free file handle.
    #[error("no free handle")]
    NoFreeHandle = 9,
    /// Path is too deep.
    #[error("too many path components")]
    TooManyPathComponents = 10,
    /// Entry is open.
    #[error("in use")]
    InUse = 11,
    /// Bad block.
    #[error("bad block")]
    BadBlock = 12,
    /// Correctable ECC error.
    #[error("ecc error")]
    EccError = 13,
    /// Uncorrectable ECC error.
    #[error("critical ecc error")]
    CriticalEccError = 14,
    /// Directory is not empty.
    #[error("file not empty")]
    FileNotEmpty = 15,
    /// HMAC check failed.
    #[error("check failed")]
    CheckFailed = 16,
    /// Unknown failure.
    #[error("unknown error")]
    UnknownError = 17,
    /// Short read.
    #[error("short read")]
    ShortRead = 18,
}

impl FsError {
    /// Raw result code.
    pub const fn code(self) -> u32 {
        self as u32
    }
}

/// Result alias for backend operations.
pub type Result<T> = core::result::Result<T, FsError>;

/// Maps a backend error into the IPC error space (`-(code + 100)`).
pub fn convert_result(err: FsError) -> ReturnCode {
    match err {
        FsError::Invalid => ReturnCode::FsInvalid,
        FsError::AccessDenied => ReturnCode::FsAccessDenied,
        FsError::SuperblockWriteFailed => ReturnCode::FsSuperblockWriteFailed,
        FsError::SuperblockInitFailed => ReturnCode::FsSuperblockInitFailed,
        FsError::AlreadyExists => ReturnCode::FsAlreadyExists,
        FsError::NotFound => ReturnCode::FsNotFound,
        FsError::FstFull => ReturnCode::FsFstFull,
        FsError::NoFreeSpace => ReturnCode::FsNoFreeSpace,
        FsError::NoFreeHandle => ReturnCode::FsNoFreeHandle,
        FsError::TooManyPathComponents => ReturnCode::FsTooManyPathComponents,
        FsError::InUse => ReturnCode::FsInUse,
        FsError::BadBlock => ReturnCode::FsBadBlock,
        FsError::EccError => ReturnCode::FsEccError,
        FsError::CriticalEccError => ReturnCode::FsCriticalEccError,
        FsError::FileNotEmpty => ReturnCode::FsFileNotEmpty,
        FsError::CheckFailed => ReturnCode::FsCheckFailed,
        FsError::UnknownError => ReturnCode::FsUnknownError,
        FsError::ShortRead => ReturnCode::FsShortRead,
    }
}

impl From<FsError> for ReturnCode {
    fn from(err: FsError) -> Self {
        convert_result(err)
    }
}

/// `/` or a valid non-root path.
pub fn is_valid_path(path: &str) -> bool {
    path == "/" || is_valid_non_root_path(path)
}

/// Absolute, at most [`MAX_PATH_LENGTH`] bytes, no trailing slash.
pub fn is_valid_non_root_path(path: &str) -> bool {
    path.len() > 1 && path.len() <= MAX_PATH_LENGTH && path.starts_with('/') && !path.ends_with('/')
}

/// Splits `/a/b/c` into `("/a/b", "c")`; the parent of `/a` is `/`.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

/// Uid/gid-checked NAND operations.
///
/// Every call names the caller `(uid, gid)`; the backend checks the
/// owner/group/other modes of the entries involved. uid 0 bypasses the
/// checks.
pub trait FileSystem {
    /// Wipes everything except `/`.
    fn format(&mut self, uid: Uid) -> Result<()>;

    /// Opens a file.
    fn open_file(&mut self, uid: Uid, gid: Gid, path: &str, mode: Mode) -> Result<Fd>;

    /// Closes a file.
    fn close(&mut self, fd: Fd) -> Result<()>;

    /// Reads at the current offset; returns the number of bytes read.
    fn read_bytes_from_file(&mut self, fd: Fd, buf: &mut [u8]) -> Result<u32>;

    /// Writes at the current offset; returns the number of bytes written.
    fn write_bytes_to_file(&mut self, fd: Fd, data: &[u8]) -> Result<u32>;

    /// Moves the offset; returns the new offset.
    fn seek_file(&mut self, fd: Fd, offset: u32, mode: SeekMode) -> Result<u32>;

    /// Offset and size of an open file.
    fn get_file_status(&mut self, fd: Fd) -> Result<FileStatus>;

    /// Creates an empty file owned by the caller.
    fn create_file(&mut self, uid: Uid, gid: Gid, path: &str, attribute: FileAttribute, modes: Modes)
        -> Result<()>;

    /// Creates a directory owned by the caller.
    fn create_directory(
        &mut self,
        uid: Uid,
        gid: Gid,
        path: &str,
        attribute: FileAttribute,
        modes: Modes,
    ) -> Result<()>;

    /// Deletes a file or a directory tree.
    fn delete(&mut self, uid: Uid, gid: Gid, path: &str) -> Result<()>;

    /// Moves `old` to `new`, replacing an existing entry of the same kind.
    fn rename(&mut self, uid: Uid, gid: Gid, old: &str, new: &str) -> Result<()>;

    /// Names of the direct children of a directory, sorted.
    fn read_directory(&self, uid: Uid, gid: Gid, path: &str) -> Result<Vec<String>>;

    /// Metadata of an entry.
    fn get_metadata(&self, uid: Uid, gid: Gid, path: &str) -> Result<Metadata>;

    /// Changes owner, attribute and modes of an entry.
    fn set_metadata(
        &mut self,
        caller_uid: Uid,
        path: &str,
        uid: Uid,
        gid: Gid,
        attribute: FileAttribute,
        modes: Modes,
    ) -> Result<()>;

    /// Whole-device usage.
    fn get_nand_stats(&self) -> Result<NandStats>;

    /// Usage of a directory tree.
    fn get_directory_stats(&self, path: &str) -> Result<DirectoryStats>;

    /// Creates every missing parent directory of `path` (not `path` itself).
    fn create_full_path(
        &mut self,
        uid: Uid,
        gid: Gid,
        path: &str,
        attribute: FileAttribute,
        modes: Modes,
    ) -> Result<()> {
        let mut position = 1;
        while let Some(rel) = path.get(position..).and_then(|rest| rest.find('/')) {
            let prefix = &path[..position + rel];
            position += rel + 1;
            match self.get_metadata(uid, gid, prefix) {
                Ok(meta) if meta.is_file => return Err(FsError::Invalid),
                Ok(_) => continue,
                Err(FsError::NotFound) => {}
                Err(err) => return Err(err),
            }
            self.create_directory(uid, gid, prefix, attribute, modes)?;
        }
        Ok(())
    }

    /// Creates `path` if missing and opens it read/write.
    fn create_and_open_file(&mut self, uid: Uid, gid: Gid, path: &str, modes: Modes) -> Result<Fd> {
        match self.create_file(uid, gid, path, 0, modes) {
            Ok(()) | Err(FsError::AlreadyExists) => {}
            Err(err) => return Err(err),
        }
        self.open_file(uid, gid, path, Mode::ReadWrite)
    }

    /// Reads a whole file.
    fn read_file(&mut self, uid: Uid, gid: Gid, path: &str) -> Result<Vec<u8>> {
        let fd = self.open_file(uid, gid, path, Mode::Read)?;
        let result = self.get_file_status(fd).and_then(|status| {
            let mut data = vec![0u8; status.size as usize];
            let read = self.read_bytes_from_file(fd, &mut data)?;
            if read as usize != data.len() {
                return Err(FsError::ShortRead);
            }
            Ok(data)
        });
        self.close(fd)?;
        result
    }

    /// Replaces the contents of `path`, creating it with `modes` if needed.
    fn write_file(&mut self, uid: Uid, gid: Gid, path: &str, data: &[u8], modes: Modes) -> Result<()> {
        match self.delete(uid, gid, path) {
            Ok(()) | Err(FsError::NotFound) => {}
            Err(err) => return Err(err),
        }
        self.create_file(uid, gid, path, 0, modes)?;
        let fd = self.open_file(uid, gid, path, Mode::Write)?;
        let result = self.write_bytes_to_file(fd, data).and_then(|written| {
            if written as usize == data.len() {
                Ok(())
            } else {
                Err(FsError::NoFreeSpace)
            }
        });
        self.close(fd)?;
        result
    }
}
