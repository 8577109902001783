// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tickets and ticket views.

use ios_abi::pid::PID_ES;
use ios_abi::{IpcResult, ReturnCode};
use iosc::{Iosc, ObjectGuard, ObjectSubType, ObjectType, HANDLE_CONSOLE_KEY};

use crate::{read_u16, read_u32, read_u64, read_u8, SignedBlobReader};

/// Size of one fixed ticket record.
pub const TICKET_SIZE: usize = 0x2a4;
/// Size of a ticket view.
pub const TICKET_VIEW_SIZE: usize = 0xd8;

const OFF_SERVER_PUBLIC_KEY: usize = 0x180;
const SERVER_PUBLIC_KEY_SIZE: usize = 0x3c;
const OFF_VERSION: usize = 0x1bc;
const OFF_TITLE_KEY: usize = 0x1bf;
const OFF_TICKET_ID: usize = 0x1d0;
const OFF_DEVICE_ID: usize = 0x1d8;
const OFF_TITLE_ID: usize = 0x1dc;
const OFF_ACCESS_MASK: usize = 0x1e4;
const OFF_TICKET_VERSION: usize = 0x1e6;
const OFF_PERMITTED_TITLE_MASK: usize = 0x1e8;
const OFF_PERMITTED_TITLE_ID: usize = 0x1ec;
const OFF_EXPORT_ALLOWED: usize = 0x1f0;
const OFF_COMMON_KEY_INDEX: usize = 0x1f1;
const OFF_CONTENT_ACCESS: usize = 0x222;

/// Offset of the v1 size field (after u16 version and u16 header size).
const OFF_V1_TICKET_SIZE: usize = TICKET_SIZE + 4;
const V1_HEADER_SIZE: usize = 0x14;

/// Reader over one or more tickets.
///
/// v0 files hold any number of fixed records back to back. A v1 file
/// holds exactly one record followed by a variable-length v1 section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketReader {
    blob: SignedBlobReader,
}

impl TicketReader {
    /// Wraps `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { blob: SignedBlobReader::new(bytes) }
    }

    /// Signed blob view of the first record.
    pub fn blob(&self) -> &SignedBlobReader {
        &self.blob
    }

    /// Raw bytes.
    pub fn bytes(&self) -> &[u8] {
        self.blob.bytes()
    }

    /// Whether the first record is a v1 ticket.
    pub fn is_v1_ticket(&self) -> bool {
        read_u8(self.bytes(), OFF_VERSION) == 1
    }

    fn v1_ticket_size(&self) -> usize {
        read_u32(self.bytes(), OFF_V1_TICKET_SIZE) as usize
    }

    /// Structural check for both layouts.
    pub fn is_valid(&self) -> bool {
        let len = self.bytes().len();
        if len < TICKET_SIZE {
            return false;
        }
        if self.is_v1_ticket() {
            len >= TICKET_SIZE + V1_HEADER_SIZE && len >= TICKET_SIZE + self.v1_ticket_size()
        } else {
            len % TICKET_SIZE == 0
        }
    }

    /// Number of records.
    pub fn number_of_tickets(&self) -> usize {
        if self.is_v1_ticket() {
            1
        } else {
            self.bytes().len() / TICKET_SIZE
        }
    }

    fn record(&self, n: usize) -> Option<&[u8]> {
        let start = n.checked_mul(TICKET_SIZE)?;
        self.bytes().get(start..start + TICKET_SIZE)
    }

    /// Fixed record whose ticket id matches, empty if none.
    pub fn raw_ticket(&self, ticket_id: u64) -> Vec<u8> {
        (0..self.number_of_tickets())
            .filter_map(|n| self.record(n))
            .find(|record| read_u64(record, OFF_TICKET_ID) == ticket_id)
            .map(<[u8]>::to_vec)
            .unwrap_or_default()
    }

    /// View of record `n`: version word followed by the tail from the ticket id on.
    pub fn raw_ticket_view(&self, n: usize) -> Vec<u8> {
        let Some(record) = self.record(n) else {
            return Vec::new();
        };
        let mut view = Vec::with_capacity(TICKET_VIEW_SIZE);
        view.extend_from_slice(&u32::from(read_u8(self.bytes(), OFF_VERSION)).to_be_bytes());
        view.extend_from_slice(&record[OFF_TICKET_ID..]);
        view
    }

    /// Ticket ids of every record.
    pub fn ticket_ids(&self) -> Vec<u64> {
        (0..self.number_of_tickets())
            .filter_map(|n| self.record(n))
            .map(|record| read_u64(record, OFF_TICKET_ID))
            .collect()
    }

    /// Public key of the server that personalised the ticket.
    pub fn server_public_key(&self) -> &[u8] {
        self.bytes()
            .get(OFF_SERVER_PUBLIC_KEY..OFF_SERVER_PUBLIC_KEY + SERVER_PUBLIC_KEY_SIZE)
            .unwrap_or(&[])
    }

    /// Encrypted title key.
    pub fn title_key(&self) -> [u8; 16] {
        let mut key = [0u8; 16];
        if let Some(src) = self.bytes().get(OFF_TITLE_KEY..OFF_TITLE_KEY + 16) {
            key.copy_from_slice(src);
        }
        key
    }

    /// Mutable title key of the first record.
    pub fn title_key_mut(&mut self) -> Option<&mut [u8]> {
        self.blob.bytes_mut().get_mut(OFF_TITLE_KEY..OFF_TITLE_KEY + 16)
    }

    /// Ticket id.
    pub fn ticket_id(&self) -> u64 {
        read_u64(self.bytes(), OFF_TICKET_ID)
    }

    /// Device the ticket is personalised for, 0 for common tickets.
    pub fn device_id(&self) -> u32 {
        read_u32(self.bytes(), OFF_DEVICE_ID)
    }

    /// Title id.
    pub fn title_id(&self) -> u64 {
        read_u64(self.bytes(), OFF_TITLE_ID)
    }

    /// Access mask.
    pub fn access_mask(&self) -> u16 {
        read_u16(self.bytes(), OFF_ACCESS_MASK)
    }

    /// Ticket version.
    pub fn ticket_version(&self) -> u16 {
        read_u16(self.bytes(), OFF_TICKET_VERSION)
    }

    /// Mask applied to the running title id before comparing.
    pub fn permitted_title_mask(&self) -> u32 {
        read_u32(self.bytes(), OFF_PERMITTED_TITLE_MASK)
    }

    /// Title id (low word) allowed to use this ticket.
    pub fn permitted_title_id(&self) -> u32 {
        read_u32(self.bytes(), OFF_PERMITTED_TITLE_ID)
    }

    /// Export flags; the low nibble is 5 when the ticket may be exported.
    pub fn title_export_allowed(&self) -> u8 {
        read_u8(self.bytes(), OFF_EXPORT_ALLOWED)
    }

    /// Index into the common key table.
    pub fn common_key_index(&self) -> u8 {
        read_u8(self.bytes(), OFF_COMMON_KEY_INDEX)
    }

    /// Whether the content-access bitmap grants content `index`.
    pub fn can_access_content(&self, index: u16) -> bool {
        let byte = read_u8(self.bytes(), OFF_CONTENT_ACCESS + usize::from(index / 8));
        byte & (1 << (index % 8)) != 0
    }

    /// Decrypts the title key of a personalised ticket in place.
    ///
    /// The key is derived from the server public key and the console
    /// private key; the ticket id (zero-extended) is the IV.
    pub fn unpersonalise<I: Iosc + ?Sized>(&mut self, iosc: &mut I) -> IpcResult<()> {
        let server_key = self.server_public_key().to_vec();
        if server_key.len() != SERVER_PUBLIC_KEY_SIZE {
            return Err(ReturnCode::EsInvalidTicket);
        }

        let mut public =
            ObjectGuard::create(iosc, ObjectType::PublicKey, ObjectSubType::Ecc233, PID_ES)?;
        let public_handle = public.handle();
        public.iosc().import_public_key(public_handle, &server_key, None, PID_ES)?;

        let mut shared =
            ObjectGuard::create(public.iosc(), ObjectType::SecretKey, ObjectSubType::Aes128, PID_ES)?;
        let shared_handle = shared.handle();
        shared.iosc().compute_shared_key(shared_handle, HANDLE_CONSOLE_KEY, public_handle, PID_ES)?;

        let mut iv = [0u8; 16];
        iv[..8].copy_from_slice(&self.ticket_id().to_be_bytes());
        let decrypted = shared.iosc().decrypt(shared_handle, &iv, &self.title_key(), PID_ES)?;
        let key = self.title_key_mut().ok_or(ReturnCode::EsInvalidTicket)?;
        let plain = decrypted.get(..16).ok_or(ReturnCode::EsInvalidTicket)?;
        key.copy_from_slice(plain);
        Ok(())
    }
}

/// Decoded ticket view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TicketView {
    /// View format version.
    pub version: u32,
    /// Ticket id.
    pub ticket_id: u64,
    /// Device id.
    pub device_id: u32,
    /// Title id.
    pub title_id: u64,
    /// Access mask.
    pub access_mask: u16,
    /// Ticket version.
    pub ticket_version: u16,
    /// Permitted title mask.
    pub permitted_title_mask: u32,
    /// Permitted title id.
    pub permitted_title_id: u32,
    /// Export flag.
    pub title_export_allowed: u8,
    /// Common key index.
    pub common_key_index: u8,
}

impl TicketView {
    /// Decodes a view; `None` if `bytes` is shorter than a view.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < TICKET_VIEW_SIZE {
            return None;
        }
        Some(Self {
            version: read_u32(bytes, 0),
            ticket_id: read_u64(bytes, 4),
            device_id: read_u32(bytes, 12),
            title_id: read_u64(bytes, 16),
            access_mask: read_u16(bytes, 24),
            ticket_version: read_u16(bytes, 26),
            permitted_title_mask: read_u32(bytes, 28),
            permitted_title_id: read_u32(bytes, 32),
            title_export_allowed: read_u8(bytes, 36),
            common_key_index: read_u8(bytes, 37),
        })
    }
}
