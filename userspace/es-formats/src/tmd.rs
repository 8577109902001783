// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Title metadata.

use crate::{read_u16, read_u32, read_u64, read_u8, SignedBlobReader};

/// Size of the TMD header, signature included.
pub const TMD_HEADER_SIZE: usize = 0x1e4;
/// Size of one content record.
pub const CONTENT_RECORD_SIZE: usize = 0x24;
/// Size of one content record inside a TMD view.
pub const CONTENT_VIEW_SIZE: usize = 16;
/// Largest TMD IOS accepts: header plus 512 content records.
pub const MAX_TMD_SIZE: usize = 0x49e4;

/// Title flag: regular title.
pub const TITLE_TYPE_DEFAULT: u32 = 0x1;
/// Title flag set on some system titles.
pub const TITLE_TYPE_0X4: u32 = 0x4;
/// Title flag: data title.
pub const TITLE_TYPE_DATA: u32 = 0x8;
/// Title flag carried by titles talking to the WFS process.
pub const TITLE_TYPE_WFS_MAYBE: u32 = 0x20;

const OFF_TMD_VERSION: usize = 0x180;
const OFF_VWII: usize = 0x183;
const OFF_IOS_ID: usize = 0x184;
const OFF_TITLE_ID: usize = 0x18c;
const OFF_TITLE_FLAGS: usize = 0x194;
const OFF_GROUP_ID: usize = 0x198;
const OFF_REGION: usize = 0x19c;
const OFF_ACCESS_RIGHTS: usize = 0x1d8;
const OFF_TITLE_VERSION: usize = 0x1dc;
const OFF_NUM_CONTENTS: usize = 0x1de;
const OFF_BOOT_INDEX: usize = 0x1e0;

/// One content record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Content {
    /// Content id, also the private file name.
    pub id: u32,
    /// Position in the TMD.
    pub index: u16,
    /// Type flags.
    pub ty: u16,
    /// Decrypted size.
    pub size: u64,
    /// SHA-1 of the decrypted payload.
    pub sha1: [u8; 20],
}

impl Content {
    /// Content stored once under `/shared1` and addressed by hash.
    pub const TYPE_SHARED: u16 = 0x8000;
    /// Content a title may be installed without.
    pub const TYPE_OPTIONAL: u16 = 0x4000;

    /// Whether the payload is shared between titles.
    pub fn is_shared(&self) -> bool {
        self.ty & Self::TYPE_SHARED != 0
    }

    /// Whether the payload is optional.
    pub fn is_optional(&self) -> bool {
        self.ty & Self::TYPE_OPTIONAL != 0
    }

    /// Decodes a record; `bytes` must hold at least one record.
    pub fn parse(bytes: &[u8]) -> Self {
        let mut sha1 = [0u8; 20];
        if let Some(src) = bytes.get(16..36) {
            sha1.copy_from_slice(src);
        }
        Self {
            id: read_u32(bytes, 0),
            index: read_u16(bytes, 4),
            ty: read_u16(bytes, 6),
            size: read_u64(bytes, 8),
            sha1,
        }
    }

    /// Encodes the record.
    pub fn to_bytes(&self) -> [u8; CONTENT_RECORD_SIZE] {
        let mut out = [0u8; CONTENT_RECORD_SIZE];
        out[0..4].copy_from_slice(&self.id.to_be_bytes());
        out[4..6].copy_from_slice(&self.index.to_be_bytes());
        out[6..8].copy_from_slice(&self.ty.to_be_bytes());
        out[8..16].copy_from_slice(&self.size.to_be_bytes());
        out[16..36].copy_from_slice(&self.sha1);
        out
    }
}

/// Reader over a TMD.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TmdReader {
    blob: SignedBlobReader,
}

impl TmdReader {
    /// Wraps `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { blob: SignedBlobReader::new(bytes) }
    }

    /// Signed blob view.
    pub fn blob(&self) -> &SignedBlobReader {
        &self.blob
    }

    /// Raw bytes.
    pub fn bytes(&self) -> &[u8] {
        self.blob.bytes()
    }

    /// Header and content table fit in the buffer.
    pub fn is_valid(&self) -> bool {
        let len = self.bytes().len();
        len >= TMD_HEADER_SIZE
            && len >= TMD_HEADER_SIZE + usize::from(self.num_contents()) * CONTENT_RECORD_SIZE
    }

    /// TMD format version.
    pub fn tmd_version(&self) -> u8 {
        read_u8(self.bytes(), OFF_TMD_VERSION)
    }

    /// Whether the title targets vWii.
    pub fn is_vwii(&self) -> bool {
        read_u8(self.bytes(), OFF_VWII) != 0
    }

    /// IOS the title runs on.
    pub fn ios_id(&self) -> u64 {
        read_u64(self.bytes(), OFF_IOS_ID)
    }

    /// Title id.
    pub fn title_id(&self) -> u64 {
        read_u64(self.bytes(), OFF_TITLE_ID)
    }

    /// Title flags (`TITLE_TYPE_*`).
    pub fn title_flags(&self) -> u32 {
        read_u32(self.bytes(), OFF_TITLE_FLAGS)
    }

    /// Group id, used as the PPC gid.
    pub fn group_id(&self) -> u16 {
        read_u16(self.bytes(), OFF_GROUP_ID)
    }

    /// Region code.
    pub fn region(&self) -> u16 {
        read_u16(self.bytes(), OFF_REGION)
    }

    /// Access rights word.
    pub fn access_rights(&self) -> u32 {
        read_u32(self.bytes(), OFF_ACCESS_RIGHTS)
    }

    /// Title version.
    pub fn title_version(&self) -> u16 {
        read_u16(self.bytes(), OFF_TITLE_VERSION)
    }

    /// Declared content count.
    pub fn num_contents(&self) -> u16 {
        read_u16(self.bytes(), OFF_NUM_CONTENTS)
    }

    /// Index of the boot content.
    pub fn boot_index(&self) -> u16 {
        read_u16(self.bytes(), OFF_BOOT_INDEX)
    }

    fn record(&self, position: usize) -> Option<&[u8]> {
        let start = TMD_HEADER_SIZE + position * CONTENT_RECORD_SIZE;
        self.bytes().get(start..start + CONTENT_RECORD_SIZE)
    }

    /// Content at table position `index`.
    pub fn content(&self, index: u16) -> Option<Content> {
        if index >= self.num_contents() {
            return None;
        }
        self.record(usize::from(index)).map(Content::parse)
    }

    /// All content records in table order.
    pub fn contents(&self) -> Vec<Content> {
        (0..self.num_contents()).filter_map(|index| self.content(index)).collect()
    }

    /// Content with the given id.
    pub fn find_content_by_id(&self, id: u32) -> Option<Content> {
        self.contents().into_iter().find(|content| content.id == id)
    }

    /// Abbreviated view: header fields plus 16-byte records without hashes.
    pub fn raw_view(&self) -> Vec<u8> {
        let bytes = self.bytes();
        let mut view = Vec::with_capacity(
            0x5c + usize::from(self.num_contents()) * CONTENT_VIEW_SIZE,
        );
        view.extend_from_slice(bytes.get(OFF_TMD_VERSION..OFF_ACCESS_RIGHTS).unwrap_or(&[]));
        view.extend_from_slice(&self.title_version().to_be_bytes());
        view.extend_from_slice(&self.num_contents().to_be_bytes());
        for position in 0..usize::from(self.num_contents()) {
            if let Some(record) = self.record(position) {
                view.extend_from_slice(&record[..CONTENT_VIEW_SIZE]);
            }
        }
        view
    }
}
