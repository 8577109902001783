// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Common layout of every signed ES structure.

use crate::{read_fixed_str, read_u32, sha1_digest};

const ISSUER_SIZE: usize = 0x40;

/// Signature algorithm tag stored in the first word of a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    /// RSA-4096 with SHA-1.
    Rsa4096,
    /// RSA-2048 with SHA-1.
    Rsa2048,
    /// ECC-233 with SHA-1.
    Ecc,
}

impl SignatureType {
    /// Decodes the raw tag.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0x0001_0000 => Some(Self::Rsa4096),
            0x0001_0001 => Some(Self::Rsa2048),
            0x0001_0002 => Some(Self::Ecc),
            _ => None,
        }
    }

    /// Raw tag.
    pub const fn raw(self) -> u32 {
        match self {
            Self::Rsa4096 => 0x0001_0000,
            Self::Rsa2048 => 0x0001_0001,
            Self::Ecc => 0x0001_0002,
        }
    }

    /// Size of the signature itself.
    pub const fn signature_size(self) -> usize {
        match self {
            Self::Rsa4096 => 0x200,
            Self::Rsa2048 => 0x100,
            Self::Ecc => 0x3c,
        }
    }

    /// Offset of the issuer field: tag, signature and padding.
    pub const fn issuer_offset(self) -> usize {
        match self {
            Self::Rsa4096 => 0x240,
            Self::Rsa2048 => 0x140,
            Self::Ecc => 0x80,
        }
    }
}

/// Owned bytes of a signed blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedBlobReader {
    bytes: Vec<u8>,
}

impl SignedBlobReader {
    /// Wraps `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut Vec<u8> {
        &mut self.bytes
    }

    /// Consumes the reader.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Signature tag, `None` if unknown or truncated.
    pub fn signature_type(&self) -> Option<SignatureType> {
        if self.bytes.len() < 4 {
            return None;
        }
        SignatureType::from_raw(read_u32(&self.bytes, 0))
    }

    /// Whether the buffer is large enough for its declared signature layout.
    pub fn is_signature_valid(&self) -> bool {
        match self.signature_type() {
            Some(ty) => self.bytes.len() >= ty.issuer_offset() + ISSUER_SIZE,
            None => false,
        }
    }

    /// Signature bytes.
    pub fn signature_data(&self) -> &[u8] {
        match self.signature_type() {
            Some(ty) => self.bytes.get(4..4 + ty.signature_size()).unwrap_or(&[]),
            None => &[],
        }
    }

    /// Issuer chain string, e.g. `Root-CA00000001-CP00000004`.
    pub fn issuer(&self) -> String {
        match self.signature_type() {
            Some(ty) => read_fixed_str(&self.bytes, ty.issuer_offset(), ISSUER_SIZE),
            None => String::new(),
        }
    }

    /// SHA-1 of the signed region (issuer to end).
    pub fn sha1(&self) -> [u8; 20] {
        let start = self.signature_type().map_or(self.bytes.len(), SignatureType::issuer_offset);
        sha1_digest(self.bytes.get(start..).unwrap_or(&[]))
    }
}
