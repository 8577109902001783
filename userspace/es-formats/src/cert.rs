// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Certificates and certificate chains.

use std::collections::BTreeMap;

use crate::{read_fixed_str, read_u32, SignatureType, SignedBlobReader};

const NAME_SIZE: usize = 0x40;
const OFF_KEY_TYPE: usize = 0x40;
const OFF_NAME: usize = 0x44;
const OFF_PUBLIC_KEY: usize = 0x88;

/// Public key algorithm of a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicKeyType {
    /// RSA-4096.
    Rsa4096,
    /// RSA-2048.
    Rsa2048,
    /// ECC-233.
    Ecc,
}

impl PublicKeyType {
    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Rsa4096),
            1 => Some(Self::Rsa2048),
            2 => Some(Self::Ecc),
            _ => None,
        }
    }

    /// Raw tag.
    pub const fn raw(self) -> u32 {
        match self {
            Self::Rsa4096 => 0,
            Self::Rsa2048 => 1,
            Self::Ecc => 2,
        }
    }

    const fn key_size(self) -> usize {
        match self {
            Self::Rsa4096 => 0x200,
            Self::Rsa2048 => 0x100,
            Self::Ecc => 0x3c,
        }
    }
}

/// Accepted `(signature, key)` shapes and their total sizes, tried in order.
const SHAPES: [(SignatureType, PublicKeyType, usize); 4] = [
    (SignatureType::Rsa4096, PublicKeyType::Rsa2048, 0x400),
    (SignatureType::Rsa2048, PublicKeyType::Rsa2048, 0x300),
    (SignatureType::Rsa2048, PublicKeyType::Ecc, 0x240),
    (SignatureType::Ecc, PublicKeyType::Ecc, 0x180),
];

/// Reader over a single certificate.
///
/// Construction truncates the buffer to the matched shape, so a reader
/// built from the head of a chain owns exactly one certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertReader {
    blob: SignedBlobReader,
    valid: bool,
}

impl CertReader {
    /// Parses the certificate at the start of `bytes`.
    pub fn new(mut bytes: Vec<u8>) -> Self {
        let head = SignedBlobReader::new(bytes);
        let shape = head.signature_type().filter(|_| head.is_signature_valid()).and_then(|sig| {
            let key = PublicKeyType::from_raw(read_u32(head.bytes(), sig.issuer_offset() + OFF_KEY_TYPE))?;
            SHAPES
                .iter()
                .find(|(s, k, size)| *s == sig && *k == key && head.bytes().len() >= *size)
                .map(|(_, _, size)| *size)
        });
        bytes = head.into_bytes();
        match shape {
            Some(size) => {
                bytes.truncate(size);
                Self { blob: SignedBlobReader::new(bytes), valid: true }
            }
            None => Self { blob: SignedBlobReader::new(bytes), valid: false },
        }
    }

    /// Whether the buffer matched one of the known shapes.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Signed blob view.
    pub fn blob(&self) -> &SignedBlobReader {
        &self.blob
    }

    /// Raw bytes (exactly one certificate when valid).
    pub fn bytes(&self) -> &[u8] {
        self.blob.bytes()
    }

    fn base(&self) -> usize {
        self.blob.signature_type().map_or(0, SignatureType::issuer_offset)
    }

    /// Certificate name, e.g. `CP00000004`.
    pub fn name(&self) -> String {
        read_fixed_str(self.bytes(), self.base() + OFF_NAME, NAME_SIZE)
    }

    /// Public key type.
    pub fn public_key_type(&self) -> Option<PublicKeyType> {
        PublicKeyType::from_raw(read_u32(self.bytes(), self.base() + OFF_KEY_TYPE))
    }

    /// Public key bytes.
    pub fn public_key(&self) -> &[u8] {
        let Some(key_type) = self.public_key_type() else {
            return &[];
        };
        let start = self.base() + OFF_PUBLIC_KEY;
        self.bytes().get(start..start + key_type.key_size()).unwrap_or(&[])
    }

    /// RSA public exponent, `None` for ECC keys.
    pub fn public_key_exponent(&self) -> Option<&[u8]> {
        match self.public_key_type()? {
            PublicKeyType::Ecc => None,
            key_type => {
                let start = self.base() + OFF_PUBLIC_KEY + key_type.key_size();
                self.bytes().get(start..start + 4)
            }
        }
    }
}

/// Splits a concatenated chain into certificates keyed by name.
///
/// Parsing stops at the first malformed certificate; the first
/// certificate seen for a name wins.
pub fn parse_cert_chain(chain: &[u8]) -> BTreeMap<String, CertReader> {
    let mut certs = BTreeMap::new();
    let mut processed = 0;
    while processed < chain.len() {
        let cert = CertReader::new(chain[processed..].to_vec());
        if !cert.is_valid() {
            break;
        }
        processed += cert.bytes().len();
        certs.entry(cert.name()).or_insert(cert);
    }
    certs
}
