// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! `/sys/uid.sys`: title id to PPC uid assignments.

use std::collections::BTreeMap;

use ios_abi::paths::UID_SYS;
use ios_abi::titles::SYSTEM_MENU;
use ios_abi::{IpcResult, ReturnCode, FIRST_PPC_UID};
use log::{error, info};
use nand_fs::{FileSystem, FsError, SeekMode};

use crate::shared_content_map::INTERNAL_MODES;
use crate::{KERNEL_GID, KERNEL_UID};

const ENTRY_SIZE: usize = 12;

/// Loaded uid map bound to a backend for the duration of one operation.
///
/// An empty map gets the system menu inserted on load, so the system
/// menu always owns [`FIRST_PPC_UID`].
pub struct UidMap<'a> {
    fs: &'a mut dyn FileSystem,
    /// uid -> title id
    entries: BTreeMap<u32, u64>,
}

impl<'a> UidMap<'a> {
    /// Loads the map.
    pub fn new(fs: &'a mut dyn FileSystem) -> Self {
        let data = match fs.read_file(KERNEL_UID, KERNEL_GID, UID_SYS) {
            Ok(data) => data,
            Err(FsError::NotFound) => Vec::new(),
            Err(err) => {
                error!("es: failed to read {UID_SYS}: {err}");
                Vec::new()
            }
        };
        let entries = data
            .chunks_exact(ENTRY_SIZE)
            .map(|chunk| {
                let mut title = [0u8; 8];
                let mut uid = [0u8; 4];
                title.copy_from_slice(&chunk[..8]);
                uid.copy_from_slice(&chunk[8..]);
                (u32::from_be_bytes(uid), u64::from_be_bytes(title))
            })
            .collect();
        let mut map = Self { fs, entries };
        if map.entries.is_empty() {
            if let Err(err) = map.get_or_insert_uid_for_title(SYSTEM_MENU) {
                error!("es: failed to seed {UID_SYS}: {err}");
            }
        }
        map
    }

    /// uid of `title_id`, if assigned.
    pub fn get_uid_from_title(&self, title_id: u64) -> Option<u32> {
        self.entries.iter().find(|(_, title)| **title == title_id).map(|(uid, _)| *uid)
    }

    /// Title owning `uid`, if any.
    pub fn get_title_from_uid(&self, uid: u32) -> Option<u64> {
        self.entries.get(&uid).copied()
    }

    /// uid the next new title will get.
    pub fn get_next_uid(&self) -> u32 {
        self.entries.keys().next_back().map_or(FIRST_PPC_UID, |last| last + 1)
    }

    /// Existing uid of `title_id`, or a freshly appended one.
    pub fn get_or_insert_uid_for_title(&mut self, title_id: u64) -> IpcResult<u32> {
        if let Some(uid) = self.get_uid_from_title(title_id) {
            return Ok(uid);
        }
        let uid = self.get_next_uid();
        let mut record = [0u8; ENTRY_SIZE];
        record[..8].copy_from_slice(&title_id.to_be_bytes());
        record[8..].copy_from_slice(&uid.to_be_bytes());
        self.append(&record).map_err(|err| {
            error!("es: failed to append {title_id:016x} to {UID_SYS}: {err}");
            ReturnCode::EsShortRead
        })?;
        self.entries.insert(uid, title_id);
        info!("es: assigned uid {uid:#x} to {title_id:016x}");
        Ok(uid)
    }

    fn append(&mut self, record: &[u8]) -> nand_fs::Result<()> {
        let fd = self.fs.create_and_open_file(KERNEL_UID, KERNEL_GID, UID_SYS, INTERNAL_MODES)?;
        let result = self.fs.seek_file(fd, 0, SeekMode::End).and_then(|_| {
            let written = self.fs.write_bytes_to_file(fd, record)?;
            if written as usize == record.len() {
                Ok(())
            } else {
                Err(FsError::NoFreeSpace)
            }
        });
        self.fs.close(fd)?;
        result
    }
}
