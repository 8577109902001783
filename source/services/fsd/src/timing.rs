// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tick costs of FS operations.

use core_timing::Tick;

/// How a path is resolved; create/delete style operations split off the
/// last component and pay a different lookup cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLookupMode {
    /// Full-path lookup (open, readdir).
    Normal,
    /// Parent lookup plus name (create, delete, rename, attributes).
    Split,
}

/// Tick costs for one IOS version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingProfile {
    /// Charged by every request.
    pub ipc_overhead: Tick,
    /// Rewriting the superblock.
    pub superblock_write: Tick,
    /// Reading one cluster into the cache.
    pub cluster_read: Tick,
    /// Writing one cluster back.
    pub cluster_write: Tick,
    /// When false, only `ipc_overhead` is charged.
    pub simulate: bool,
}

impl TimingProfile {
    /// Costs measured for `ios_version`.
    pub fn for_ios(ios_version: u32, simulate: bool) -> Self {
        let superblock_write = if ios_version == 28 || ios_version == 80 {
            3_350_000
        } else if ios_version < 28 {
            4_100_000
        } else {
            3_170_000
        };
        let (cluster_read, cluster_write) = if ios_version == 28 || ios_version == 80 {
            (24_000, 310_000)
        } else {
            (22_000, 300_000)
        };
        Self { ipc_overhead: 2_700, superblock_write, cluster_read, cluster_write, simulate }
    }

    /// Superblock rewrite cost, 0 when simulation is off.
    pub fn superblock(&self) -> Tick {
        if self.simulate {
            self.superblock_write
        } else {
            0
        }
    }

    /// Cluster read cost, 0 when simulation is off.
    pub fn read_cluster(&self) -> Tick {
        if self.simulate {
            self.cluster_read
        } else {
            0
        }
    }

    /// Cluster write cost, 0 when simulation is off.
    pub fn write_cluster(&self) -> Tick {
        if self.simulate {
            self.cluster_write
        } else {
            0
        }
    }

    /// Copy cost between the cache and the request buffer.
    pub fn memcpy(&self, size: u32) -> Tick {
        if self.simulate {
            Tick::from(size / 4) * 3
        } else {
            0
        }
    }

    /// Path resolution cost; scales with the number of components.
    pub fn lookup(&self, path: &str, mode: FileLookupMode) -> Tick {
        if !self.simulate {
            return 0;
        }
        let components = path.matches('/').count() as Tick;
        if components == 0 {
            return 0;
        }
        if path.ends_with('/') {
            return 300;
        }
        match mode {
            FileLookupMode::Normal => 680 * components,
            FileLookupMode::Split => 1000 + 340 * components,
        }
    }
}
