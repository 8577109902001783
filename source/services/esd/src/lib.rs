// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: ES, the title and trust service, and the IOS driver that hosts it
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module; end-to-end flows in tests/es_host
//!
//! PUBLIC API:
//!   - Ios: kernel driver (reloads, timeline continuations, host hooks)
//!   - EsRequest / EsReply / EsIoctlv: ioctlv surface of `/dev/es`
//!   - TitleImportExport: per-context import/export state
//!   - IosConfig: TOML configuration
//!
//! DEPENDENCIES:
//!   - fsd: timed NAND access
//!   - es-formats: TMD, ticket and certificate readers
//!   - iosc: crypto capability service
//!   - serde/toml/thiserror: configuration loading
//!   - log: launch, import and verification tracing
//!
//! INVARIANTS:
//! - A failed launch phase leaves the title context inactive
//! - Content table and ES context pools are fixed; exhaustion is an error, never a wait
//! - Issuer and CA certificates reach the store only after the whole chain verified
//! - Every persisted map rewrite goes through /tmp and a rename
//!
//! ADR: docs/adr/0001-ios-service-architecture.md

pub mod config;
mod content_access;
mod content_table;
mod device;
mod es_core;
mod kernel;
mod launch;
mod nand_utils;
mod shared_content_map;
mod stream_key;
mod title_context;
mod title_management;
mod uid_map;
mod verify;
mod views;

use nand_fs::{Gid, Uid};

/// ES touches the NAND as the kernel even though it runs as `PID_ES`.
pub(crate) const KERNEL_UID: Uid = 0;
pub(crate) const KERNEL_GID: Gid = 0;

pub use config::{ConfigError, IosConfig};
pub use content_table::{ContentTable, OpenedContent, CONTENT_TABLE_SIZE};
pub use device::{EsContext, EsIoctlv, EsReply, EsRequest, ES_CONTEXT_COUNT};
pub use es_core::{es_boot_ticks, EsCore};
pub use kernel::{HangPpc, Ios, IosEvent, Kernel, PpcHost};
pub use shared_content_map::SharedContentMap;
pub use title_context::TitleContext;
pub use title_management::{ContentImport, TitleImportExport};
pub use uid_map::UidMap;
pub use verify::{VerifyContainerType, VerifyMode};
