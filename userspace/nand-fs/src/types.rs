// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Value types of the file system contract.

/// Caller or owner user id.
pub type Uid = u32;
/// Caller or owner group id.
pub type Gid = u16;
/// Backend file descriptor.
pub type Fd = u64;
/// Opaque attribute byte.
pub type FileAttribute = u8;

/// Access mode bits.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    /// No access.
    #[default]
    None = 0,
    /// Read access.
    Read = 1,
    /// Write access.
    Write = 2,
    /// Read and write access.
    ReadWrite = 3,
}

impl Mode {
    /// Decodes the low two bits.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            1 => Self::Read,
            2 => Self::Write,
            3 => Self::ReadWrite,
            _ => Self::None,
        }
    }

    /// Raw bits.
    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Whether every bit of `requested` is granted.
    pub const fn allows(self, requested: Mode) -> bool {
        self.bits() & requested.bits() == requested.bits()
    }
}

/// Owner, group and other access modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Modes {
    /// Owner mode.
    pub owner: Mode,
    /// Group mode.
    pub group: Mode,
    /// Everyone else.
    pub other: Mode,
}

impl Modes {
    /// Builds a mode triple.
    pub const fn new(owner: Mode, group: Mode, other: Mode) -> Self {
        Self { owner, group, other }
    }

    /// Read/write for everyone.
    pub const fn public() -> Self {
        Self::new(Mode::ReadWrite, Mode::ReadWrite, Mode::ReadWrite)
    }
}

/// Entry metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Owner uid.
    pub uid: Uid,
    /// Owner gid.
    pub gid: Gid,
    /// Attribute byte.
    pub attribute: FileAttribute,
    /// Access modes.
    pub modes: Modes,
    /// File or directory.
    pub is_file: bool,
    /// File size, 0 for directories.
    pub size: u32,
    /// Index in the file system table.
    pub fst_index: u16,
}

/// Position of an open file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStatus {
    /// Current offset.
    pub offset: u32,
    /// File size.
    pub size: u32,
}

/// Origin of a seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// From the start.
    Set,
    /// From the current offset.
    Current,
    /// From the end.
    End,
}

/// Whole-device usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NandStats {
    /// Bytes per cluster.
    pub cluster_size: u32,
    /// Free user clusters.
    pub free_clusters: u32,
    /// Used user clusters.
    pub used_clusters: u32,
    /// Bad clusters.
    pub bad_clusters: u32,
    /// Clusters reserved for the system.
    pub reserved_clusters: u32,
    /// Free inodes.
    pub free_inodes: u32,
    /// Used inodes.
    pub used_inodes: u32,
}

/// Usage of a directory tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectoryStats {
    /// Clusters used by files in the tree.
    pub used_clusters: u32,
    /// Entries in the tree, the directory included.
    pub used_inodes: u32,
}
