// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: FS core, the timed and handle-bounded front of the NAND backend
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests for fd table, cache simulation and ioctl dispatch
//!
//! PUBLIC API:
//!   - FsCore: open/close/read/write/seek and timed CRUD over a FileSystem
//!   - FsRequest / FsReply / FsIoctlCommand: ioctl surface of `/dev/fs`
//!   - TimingProfile: per-IOS-version tick costs
//!
//! DEPENDENCIES:
//!   - nand-fs: backend contract and result codes
//!   - core-timing: per-request tick accumulation
//!   - log: handle and superblock tracing
//!
//! INVARIANTS:
//! - At most FS_FD_TABLE_SIZE live handles; the next open fails with NoFreeHandle
//! - Invalid fds, over-long paths and exhaustion never reach the backend
//! - One (fd, cluster) pair is cached at a time; switching flushes a dirty cache first
//!
//! ADR: docs/adr/0001-ios-service-architecture.md

mod fs_core;
mod ioctl;
mod timing;

pub use fs_core::{FsCore, FS_FD_TABLE_SIZE};
pub use ioctl::{FsIoctlCommand, FsReply, FsRequest};
pub use timing::{FileLookupMode, TimingProfile};
