// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Typed readers over signed ES blobs (TMD, ticket, certificate)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests per reader + TMD content round-trip property
//!
//! PUBLIC API:
//!   - SignedBlobReader: signature type, issuer, signed-region digest
//!   - TmdReader / Content: title metadata and its content records
//!   - TicketReader / TicketView: tickets (v0 multi-record and v1) and their views
//!   - CertReader / parse_cert_chain: certificates and chains
//!
//! DEPENDENCIES:
//!   - sha1: digest of the signed region
//!   - iosc: ticket unpersonalisation
//!
//! INVARIANTS:
//! - All multi-byte fields are big-endian
//! - `is_valid` is structural only; trust is established by the verifier
//! - Accessors never panic on short buffers; missing bytes read as zero

mod cert;
mod signed_blob;
mod ticket;
mod tmd;

pub use cert::{parse_cert_chain, CertReader, PublicKeyType};
pub use signed_blob::{SignatureType, SignedBlobReader};
pub use ticket::{TicketReader, TicketView, TICKET_SIZE, TICKET_VIEW_SIZE};
pub use tmd::{
    Content, TmdReader, CONTENT_RECORD_SIZE, CONTENT_VIEW_SIZE, MAX_TMD_SIZE, TMD_HEADER_SIZE,
    TITLE_TYPE_0X4, TITLE_TYPE_DATA, TITLE_TYPE_DEFAULT, TITLE_TYPE_WFS_MAYBE,
};

use sha1::{Digest, Sha1};

/// SHA-1 digest of `data`.
pub fn sha1_digest(data: &[u8]) -> [u8; 20] {
    Sha1::digest(data).into()
}

pub(crate) fn read_u8(bytes: &[u8], offset: usize) -> u8 {
    bytes.get(offset).copied().unwrap_or(0)
}

pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    let mut raw = [0u8; 2];
    if let Some(src) = bytes.get(offset..offset + 2) {
        raw.copy_from_slice(src);
    }
    u16::from_be_bytes(raw)
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    if let Some(src) = bytes.get(offset..offset + 4) {
        raw.copy_from_slice(src);
    }
    u32::from_be_bytes(raw)
}

pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    if let Some(src) = bytes.get(offset..offset + 8) {
        raw.copy_from_slice(src);
    }
    u64::from_be_bytes(raw)
}

/// Reads a NUL-terminated string stored in a fixed `len`-byte field.
pub(crate) fn read_fixed_str(bytes: &[u8], offset: usize, len: usize) -> String {
    let end = bytes.len().min(offset.saturating_add(len));
    let field = bytes.get(offset..end).unwrap_or(&[]);
    let field = field.split(|b| *b == 0).next().unwrap_or(&[]);
    String::from_utf8_lossy(field).into_owned()
}
