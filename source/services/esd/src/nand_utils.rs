// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Title lookups on the NAND and the import staging protocol.
//!
//! An import moves the live `content` directory of a title under
//! `/import` before anything is written, and moves it back once every
//! content is in place. A crash between the two leaves a staged directory
//! that [`Ios::finish_all_stale_imports`] repairs at the next boot.

use std::collections::BTreeSet;

use core_timing::Ticks;
use es_formats::{sha1_digest, Content, TicketReader, TmdReader};
use fsd::FsCore;
use ios_abi::paths::{
    import_content_path, import_title_path, import_tmd_path, parse_hex_component,
    private_content_path, temp_path_for, ticket_file_name, title_content_path, title_data_path,
    tmd_file_name, IMPORT_DIR,
};
use ios_abi::titles::SYSTEM_MENU;
use ios_abi::{IpcResult, ReturnCode};
use log::{error, info, warn};
use nand_fs::{FileSystem, FsError, Mode, Modes};

use crate::kernel::Ios;
use crate::shared_content_map::{SharedContentMap, INTERNAL_MODES};
use crate::uid_map::UidMap;
use crate::{KERNEL_GID, KERNEL_UID};

pub(crate) const TITLE_DIR_MODES: Modes = Modes::new(Mode::ReadWrite, Mode::ReadWrite, Mode::Read);
pub(crate) const DATA_DIR_MODES: Modes = Modes::new(Mode::ReadWrite, Mode::None, Mode::None);

/// Reads a whole file through the FS core so the access is charged.
pub(crate) fn read_file_timed(fs: &mut FsCore, path: &str, ticks: &mut Ticks) -> nand_fs::Result<Vec<u8>> {
    let fd = fs.open(KERNEL_UID, KERNEL_GID, path, Mode::Read, ticks)?;
    let result = fs.get_file_status(fd, ticks).and_then(|status| {
        let mut data = vec![0u8; status.size as usize];
        let read = fs.read(fd, &mut data, ticks)?;
        if read as usize != data.len() {
            return Err(FsError::ShortRead);
        }
        Ok(data)
    });
    let closed = fs.close(fd, ticks);
    let data = result?;
    closed?;
    Ok(data)
}

/// Title ids under `root` (`/title` or `/import`) that have a content
/// directory. The system menu, when present, comes first.
fn titles_in(fs: &dyn FileSystem, root: &str) -> Vec<u64> {
    let Ok(types) = fs.read_directory(KERNEL_UID, KERNEL_GID, root) else {
        return Vec::new();
    };
    let mut title_ids = Vec::new();
    for ty in types {
        let Some(hi) = parse_hex_component(&ty) else {
            continue;
        };
        let type_dir = format!("{root}/{ty}");
        let Ok(titles) = fs.read_directory(KERNEL_UID, KERNEL_GID, &type_dir) else {
            continue;
        };
        for title in titles {
            let Some(lo) = parse_hex_component(&title) else {
                continue;
            };
            let content_dir = format!("{type_dir}/{title}/content");
            if fs.read_directory(KERNEL_UID, KERNEL_GID, &content_dir).is_ok() {
                title_ids.push((u64::from(hi) << 32) | u64::from(lo));
            }
        }
    }
    if let Some(position) = title_ids.iter().position(|&id| id == SYSTEM_MENU) {
        title_ids.swap(0, position);
    }
    title_ids
}

/// Deletes the directory `path` if it is empty.
fn delete_if_empty(fs: &mut dyn FileSystem, path: &str) {
    if fs.read_directory(KERNEL_UID, KERNEL_GID, path).is_ok_and(|entries| entries.is_empty()) {
        if let Err(err) = fs.delete(KERNEL_UID, KERNEL_GID, path) {
            warn!("es: failed to delete empty {path}: {err}");
        }
    }
}

pub(crate) fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map_or("/", |(parent, _)| parent)
}

impl Ios {
    fn find_tmd(&mut self, path: &str, ticks: &mut Ticks) -> TmdReader {
        match read_file_timed(&mut self.kernel.fs, path, ticks) {
            Ok(bytes) => TmdReader::new(bytes),
            Err(_) => TmdReader::default(),
        }
    }

    /// Staged TMD of an import; invalid if there is none.
    pub(crate) fn find_import_tmd(&mut self, title_id: u64, ticks: &mut Ticks) -> TmdReader {
        self.find_tmd(&import_tmd_path(title_id), ticks)
    }

    /// Installed TMD of a title; invalid if there is none.
    pub fn find_installed_tmd(&mut self, title_id: u64, ticks: &mut Ticks) -> TmdReader {
        self.find_tmd(&tmd_file_name(title_id), ticks)
    }

    /// Installed ticket file of a title; invalid if there is none.
    pub fn find_signed_ticket(&mut self, title_id: u64) -> TicketReader {
        match self.kernel.fs.backend_mut().read_file(KERNEL_UID, KERNEL_GID, &ticket_file_name(title_id)) {
            Ok(bytes) => TicketReader::new(bytes),
            Err(_) => TicketReader::default(),
        }
    }

    /// Installed titles, system menu first.
    pub fn installed_titles(&self) -> Vec<u64> {
        titles_in(self.kernel.fs.backend(), "/title")
    }

    /// Titles with a staged import.
    pub fn title_imports(&self) -> Vec<u64> {
        titles_in(self.kernel.fs.backend(), IMPORT_DIR)
    }

    /// Titles with an installed ticket file.
    pub fn titles_with_tickets(&self) -> Vec<u64> {
        let fs = self.kernel.fs.backend();
        let Ok(types) = fs.read_directory(KERNEL_UID, KERNEL_GID, "/ticket") else {
            return Vec::new();
        };
        let mut title_ids = Vec::new();
        for ty in types {
            let Some(hi) = parse_hex_component(&ty) else {
                continue;
            };
            let Ok(files) = fs.read_directory(KERNEL_UID, KERNEL_GID, &format!("/ticket/{ty}")) else {
                continue;
            };
            for file in files {
                let Some(lo) = file.strip_suffix(".tik").and_then(parse_hex_component) else {
                    continue;
                };
                title_ids.push((u64::from(hi) << 32) | u64::from(lo));
            }
        }
        if let Some(position) = title_ids.iter().position(|&id| id == SYSTEM_MENU) {
            title_ids.swap(0, position);
        }
        title_ids
    }

    /// NAND path of a content: private contents by id, shared contents
    /// through the content map.
    pub(crate) fn content_path(&mut self, title_id: u64, content: &Content) -> Option<String> {
        if content.is_shared() {
            return SharedContentMap::new(self.kernel.fs.backend_mut()).get_filename_from_sha1(&content.sha1);
        }
        Some(private_content_path(title_id, content.id))
    }

    /// Contents of `tmd` present on the NAND; with `check_hashes` only
    /// those whose data matches the recorded SHA-1.
    pub fn stored_contents_from_tmd(&mut self, tmd: &TmdReader, check_hashes: bool) -> Vec<Content> {
        let title_id = tmd.title_id();
        let mut stored = Vec::new();
        for content in tmd.contents() {
            let Some(path) = self.content_path(title_id, &content) else {
                continue;
            };
            let fs = self.kernel.fs.backend_mut();
            let present = if check_hashes {
                fs.read_file(KERNEL_UID, KERNEL_GID, &path)
                    .is_ok_and(|data| data.len() as u64 == content.size && sha1_digest(&data) == content.sha1)
            } else {
                fs.get_metadata(KERNEL_UID, KERNEL_GID, &path).is_ok_and(|meta| meta.is_file)
            };
            if present {
                stored.push(content);
            }
        }
        stored
    }

    /// Prepares the NAND for importing `tmd`: title and staging
    /// directories, uid, data directory. An installed title has its
    /// content directory moved to the staging area.
    pub(crate) fn init_import(&mut self, tmd: &TmdReader) -> IpcResult<()> {
        let title_id = tmd.title_id();
        let content_dir = title_content_path(title_id);
        let import_content_dir = import_content_path(title_id);
        let fs = self.kernel.fs.backend_mut();

        for dir in [&content_dir, &import_content_dir] {
            fs.create_full_path(KERNEL_UID, KERNEL_GID, &format!("{dir}/"), 0, TITLE_DIR_MODES)
                .inspect_err(|err| error!("es: failed to create {dir}: {err}"))?;
        }

        let uid = UidMap::new(fs).get_or_insert_uid_for_title(title_id)?;

        let data_dir = title_data_path(title_id);
        match fs.create_directory(KERNEL_UID, KERNEL_GID, &data_dir, 0, DATA_DIR_MODES) {
            Ok(()) | Err(FsError::AlreadyExists) => {}
            Err(err) => {
                error!("es: failed to create {data_dir}: {err}");
                return Err(err.into());
            }
        }
        fs.set_metadata(KERNEL_UID, &data_dir, uid, tmd.group_id(), 0, DATA_DIR_MODES)?;

        if fs.get_metadata(KERNEL_UID, KERNEL_GID, &tmd_file_name(title_id)).is_err() {
            return Ok(());
        }
        fs.rename(KERNEL_UID, KERNEL_GID, &content_dir, &import_content_dir)
            .inspect_err(|err| error!("es: failed to stage {content_dir}: {err}"))?;
        Ok(())
    }

    /// Writes `tmd` into the staging area.
    pub(crate) fn write_import_tmd(&mut self, tmd: &TmdReader) -> IpcResult<()> {
        let dest = import_tmd_path(tmd.title_id());
        let temp = temp_path_for(&dest);
        let fs = self.kernel.fs.backend_mut();
        fs.write_file(KERNEL_UID, KERNEL_GID, &temp, tmd.bytes(), INTERNAL_MODES)
            .and_then(|()| fs.rename(KERNEL_UID, KERNEL_GID, &temp, &dest))
            .map_err(|err| {
                error!("es: failed to write {dest}: {err}");
                ReturnCode::EsIo
            })
    }

    /// Drops staged entries `tmd` does not list, then promotes the staged
    /// content directory to the live one.
    pub(crate) fn finish_import(&mut self, tmd: &TmdReader) -> IpcResult<()> {
        let title_id = tmd.title_id();
        let import_content_dir = import_content_path(title_id);
        let fs = self.kernel.fs.backend_mut();

        let mut expected: BTreeSet<String> = tmd.contents().iter().map(|c| format!("{:08x}.app", c.id)).collect();
        expected.insert("title.tmd".to_string());

        let entries = fs.read_directory(KERNEL_UID, KERNEL_GID, &import_content_dir)?;
        for name in entries {
            let path = format!("{import_content_dir}/{name}");
            let is_file = fs.get_metadata(KERNEL_UID, KERNEL_GID, &path).is_ok_and(|meta| meta.is_file);
            if !is_file || !expected.contains(&name) {
                if let Err(err) = fs.delete(KERNEL_UID, KERNEL_GID, &path) {
                    error!("es: failed to delete unexpected {path}: {err}");
                }
            }
        }

        let content_dir = title_content_path(title_id);
        fs.rename(KERNEL_UID, KERNEL_GID, &import_content_dir, &content_dir)
            .inspect_err(|err| error!("es: failed to promote {import_content_dir}: {err}"))?;
        let staged = import_title_path(title_id);
        delete_if_empty(fs, &staged);
        delete_if_empty(fs, parent_of(&staged));
        info!("es: import of {title_id:016x} finished, TMD installed");
        Ok(())
    }

    /// Completes an interrupted import if its TMD was staged, otherwise
    /// discards it.
    pub(crate) fn finish_stale_import(&mut self, title_id: u64) {
        let mut ticks = Ticks::new();
        let tmd = self.find_import_tmd(title_id, &mut ticks);
        if tmd.is_valid() {
            if let Err(err) = self.finish_import(&tmd) {
                error!("es: failed to finish stale import of {title_id:016x}: {err}");
            }
            return;
        }
        let staged = import_title_path(title_id);
        let fs = self.kernel.fs.backend_mut();
        match fs.delete(KERNEL_UID, KERNEL_GID, &staged) {
            Ok(()) | Err(FsError::NotFound) => {}
            Err(err) => error!("es: failed to discard {staged}: {err}"),
        }
        delete_if_empty(fs, parent_of(&staged));
    }

    /// Repairs every staged import and recreates an empty `/import`.
    pub(crate) fn finish_all_stale_imports(&mut self) {
        for title_id in self.title_imports() {
            info!("es: finishing stale import of {title_id:016x}");
            self.finish_stale_import(title_id);
        }
        let fs = self.kernel.fs.backend_mut();
        match fs.delete(KERNEL_UID, KERNEL_GID, IMPORT_DIR) {
            Ok(()) | Err(FsError::NotFound) => {}
            Err(err) => error!("es: failed to delete {IMPORT_DIR}: {err}"),
        }
        let modes = Modes::new(Mode::ReadWrite, Mode::ReadWrite, Mode::None);
        if let Err(err) = fs.create_directory(KERNEL_UID, KERNEL_GID, IMPORT_DIR, 0, modes) {
            error!("es: failed to recreate {IMPORT_DIR}: {err}");
        }
    }
}
