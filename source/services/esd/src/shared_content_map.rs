// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! `/shared1/content.map`: SHA-1 to shared content file name.

use ios_abi::paths::{parse_hex_component, shared_content_path, temp_path_for, CONTENT_MAP};
use ios_abi::{IpcResult, ReturnCode};
use log::{debug, error};
use nand_fs::{FileSystem, FsError, Mode, Modes};

use crate::{KERNEL_GID, KERNEL_UID};

const ENTRY_SIZE: usize = 28;
const ID_SIZE: usize = 8;

pub(crate) const INTERNAL_MODES: Modes = Modes::new(Mode::ReadWrite, Mode::ReadWrite, Mode::None);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    id: [u8; ID_SIZE],
    sha1: [u8; 20],
}

impl Entry {
    fn id_str(&self) -> String {
        String::from_utf8_lossy(&self.id).into_owned()
    }
}

/// Loaded content map bound to a backend for the duration of one operation.
pub struct SharedContentMap<'a> {
    fs: &'a mut dyn FileSystem,
    entries: Vec<Entry>,
    next_id: u32,
}

impl<'a> SharedContentMap<'a> {
    /// Loads the map; a missing file is an empty map.
    pub fn new(fs: &'a mut dyn FileSystem) -> Self {
        let data = match fs.read_file(KERNEL_UID, KERNEL_GID, CONTENT_MAP) {
            Ok(data) => data,
            Err(FsError::NotFound) => Vec::new(),
            Err(err) => {
                error!("es: failed to read {CONTENT_MAP}: {err}");
                Vec::new()
            }
        };
        let entries: Vec<Entry> = data
            .chunks_exact(ENTRY_SIZE)
            .map(|chunk| {
                let mut id = [0u8; ID_SIZE];
                let mut sha1 = [0u8; 20];
                id.copy_from_slice(&chunk[..ID_SIZE]);
                sha1.copy_from_slice(&chunk[ID_SIZE..]);
                Entry { id, sha1 }
            })
            .collect();
        let next_id = entries
            .iter()
            .filter_map(|entry| parse_hex_component(&entry.id_str()))
            .max()
            .map_or(0, |max| max.saturating_add(1));
        Self { fs, entries, next_id }
    }

    /// Path of the shared content with this hash.
    pub fn get_filename_from_sha1(&self, sha1: &[u8; 20]) -> Option<String> {
        self.entries
            .iter()
            .find(|entry| &entry.sha1 == sha1)
            .map(|entry| shared_content_path(&entry.id_str()))
    }

    /// Hashes of every shared content, in map order.
    pub fn hashes(&self) -> Vec<[u8; 20]> {
        self.entries.iter().map(|entry| entry.sha1).collect()
    }

    /// Path for `sha1`, adding a new entry if the hash is unknown.
    pub fn add_shared_content(&mut self, sha1: &[u8; 20]) -> IpcResult<String> {
        if let Some(path) = self.get_filename_from_sha1(sha1) {
            return Ok(path);
        }
        let name = format!("{:08x}", self.next_id);
        let mut id = [0u8; ID_SIZE];
        id.copy_from_slice(name.as_bytes());
        self.entries.push(Entry { id, sha1: *sha1 });
        self.next_id = self.next_id.saturating_add(1);
        self.write_entries()?;
        debug!("es: shared content {name} added");
        Ok(shared_content_path(&name))
    }

    /// Drops every entry with this hash.
    pub fn delete_shared_content(&mut self, sha1: &[u8; 20]) -> IpcResult<()> {
        self.entries.retain(|entry| &entry.sha1 != sha1);
        self.write_entries()
    }

    fn write_entries(&mut self) -> IpcResult<()> {
        let mut data = Vec::with_capacity(self.entries.len() * ENTRY_SIZE);
        for entry in &self.entries {
            data.extend_from_slice(&entry.id);
            data.extend_from_slice(&entry.sha1);
        }
        let temp = temp_path_for(CONTENT_MAP);
        let result = self
            .fs
            .write_file(KERNEL_UID, KERNEL_GID, &temp, &data, INTERNAL_MODES)
            .and_then(|()| self.fs.rename(KERNEL_UID, KERNEL_GID, &temp, CONTENT_MAP));
        result.map_err(|err| {
            error!("es: failed to write {CONTENT_MAP}: {err}");
            ReturnCode::EsIo
        })
    }
}
