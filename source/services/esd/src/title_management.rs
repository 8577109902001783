// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Ticket and title import, title export, and deletion.

use core_timing::Ticks;
use es_formats::{sha1_digest, TicketReader, TicketView, TmdReader, TICKET_SIZE};
use iosc::{Handle, Iosc, ObjectSubType, ObjectType, COMMON_KEY_HANDLES};
use ios_abi::paths::{
    import_private_content_path, private_content_path, temp_path_for, ticket_file_name,
    title_content_path, title_path,
};
use ios_abi::pid::PID_ES;
use ios_abi::titles::{is_title_type, TitleType};
use ios_abi::{IpcResult, ReturnCode};
use log::{error, info, warn};
use nand_fs::{FileSystem, FsError, Mode, Modes};

use crate::kernel::Ios;
use crate::nand_utils::parent_of;
use crate::shared_content_map::{SharedContentMap, INTERNAL_MODES};
use crate::verify::{read_cert_store, verify_container, VerifyContainerType, VerifyMode};
use crate::{KERNEL_GID, KERNEL_UID};

const TICKET_MODES: Modes = Modes::new(Mode::ReadWrite, Mode::ReadWrite, Mode::None);

/// Content being imported or exported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentImport {
    /// A content transfer is in progress.
    pub valid: bool,
    /// Content id.
    pub id: u32,
    /// CBC IV: the content index, big-endian, zero-extended.
    pub iv: [u8; 16],
    /// Encrypted data received so far.
    pub buffer: Vec<u8>,
}

/// Import or export in progress on one ES handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleImportExport {
    /// A title transfer is in progress.
    pub valid: bool,
    /// TMD of the title being transferred.
    pub tmd: TmdReader,
    /// Title key object.
    pub key_handle: Option<Handle>,
    /// Current content.
    pub content: ContentImport,
}

impl TitleImportExport {
    /// Drops the transfer and its title key.
    pub fn reset(&mut self, iosc: &mut dyn Iosc) {
        if let Some(handle) = self.key_handle.take() {
            if let Err(err) = iosc.delete_object(handle, PID_ES) {
                warn!("es: failed to delete title key {handle}: {err}");
            }
        }
        *self = Self::default();
    }
}

/// IOS keeps system titles up to MIOS.
fn can_delete_title(title_id: u64) -> bool {
    !is_title_type(title_id, TitleType::System) || (title_id as u32) > 0x101
}

fn iv_from_title_id(title_id: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..8].copy_from_slice(&title_id.to_be_bytes());
    iv
}

fn records_except(ticket: &TicketReader, ticket_id: u64) -> Vec<u8> {
    ticket
        .bytes()
        .chunks_exact(TICKET_SIZE)
        .filter(|record| TicketReader::new(record.to_vec()).ticket_id() != ticket_id)
        .flatten()
        .copied()
        .collect()
}

/// Creates the AES object holding the title key of `ticket`.
fn init_title_key(iosc: &mut dyn Iosc, ticket: &TicketReader, state: &mut TitleImportExport) -> IpcResult<()> {
    let handle = iosc.create_object(ObjectType::SecretKey, ObjectSubType::Aes128, PID_ES)?;
    state.key_handle = Some(handle);
    let common_key = COMMON_KEY_HANDLES
        .get(usize::from(ticket.common_key_index()))
        .copied()
        .ok_or(ReturnCode::EsInvalidTicket)?;
    iosc.import_secret_key(handle, common_key, &iv_from_title_id(ticket.title_id()), &ticket.title_key(), PID_ES)
}

/// Writes `data` to `/tmp` and renames it over `path`.
fn write_via_tmp(fs: &mut dyn FileSystem, path: &str, data: &[u8]) -> IpcResult<()> {
    let temp = temp_path_for(path);
    fs.write_file(KERNEL_UID, KERNEL_GID, &temp, data, INTERNAL_MODES)
        .and_then(|()| fs.rename(KERNEL_UID, KERNEL_GID, &temp, path))
        .map_err(|err| {
            error!("es: failed to write {path}: {err}");
            ReturnCode::EsIo
        })
}

impl Ios {
    /// Installs a ticket. Personalised tickets must match this console and
    /// are stored unpersonalised. Records with other ticket ids already in
    /// the title's ticket file are kept.
    pub fn import_ticket(&mut self, ticket_bytes: &[u8], cert_chain: &[u8]) -> IpcResult<()> {
        let mut ticket = TicketReader::new(ticket_bytes.to_vec());
        if !ticket.is_valid() {
            return Err(ReturnCode::EsInvalid);
        }
        let (fs, iosc) = self.kernel.fs_and_iosc();
        verify_container(iosc, fs, VerifyContainerType::Ticket, VerifyMode::UpdateCertStore, ticket.blob(), cert_chain)?;

        let ticket_device_id = ticket.device_id();
        if ticket_device_id != 0 {
            if ticket_device_id != iosc.device_id() {
                error!("es: ticket is personalised for {ticket_device_id:08x}");
                return Err(ReturnCode::EsDeviceIdMismatch);
            }
            ticket.unpersonalise(iosc)?;
        }

        let title_id = ticket.title_id();
        let path = ticket_file_name(title_id);
        let mut merged = match fs.read_file(KERNEL_UID, KERNEL_GID, &path) {
            Ok(existing) if !ticket.is_v1_ticket() => records_except(&TicketReader::new(existing), ticket.ticket_id()),
            _ => Vec::new(),
        };
        merged.extend_from_slice(ticket.bytes());

        fs.create_full_path(KERNEL_UID, KERNEL_GID, &path, 0, TICKET_MODES)?;
        fs.write_file(KERNEL_UID, KERNEL_GID, &path, &merged, TICKET_MODES).map_err(|err| {
            error!("es: failed to write {path}: {err}");
            ReturnCode::EsIo
        })?;
        info!("es: imported ticket {:016x} for {title_id:016x}", ticket.ticket_id());
        Ok(())
    }

    /// Stages a TMD verified against the cert store, without a ticket.
    pub fn import_tmd(&mut self, state: &mut TitleImportExport, tmd_bytes: &[u8]) -> IpcResult<()> {
        state.reset(self.kernel.iosc.as_mut());
        state.tmd = TmdReader::new(tmd_bytes.to_vec());
        if !state.tmd.is_valid() {
            return Err(ReturnCode::EsInvalid);
        }
        let (fs, iosc) = self.kernel.fs_and_iosc();
        let cert_store = read_cert_store(fs)?;
        verify_container(iosc, fs, VerifyContainerType::Tmd, VerifyMode::UpdateCertStore, state.tmd.blob(), &cert_store)?;
        let tmd = state.tmd.clone();
        self.init_import(&tmd).map_err(|_| ReturnCode::EsIo)?;
        state.valid = true;
        Ok(())
    }

    /// Starts a title import: finishes any stale import of the title,
    /// verifies the TMD and the installed ticket, stages the title and
    /// loads the title key.
    pub fn import_title_init(
        &mut self,
        state: &mut TitleImportExport,
        tmd_bytes: &[u8],
        cert_chain: &[u8],
    ) -> IpcResult<()> {
        state.reset(self.kernel.iosc.as_mut());
        state.tmd = TmdReader::new(tmd_bytes.to_vec());
        if !state.tmd.is_valid() {
            return Err(ReturnCode::EsInvalid);
        }
        let title_id = state.tmd.title_id();
        self.finish_stale_import(title_id);

        let (fs, iosc) = self.kernel.fs_and_iosc();
        verify_container(iosc, fs, VerifyContainerType::Tmd, VerifyMode::UpdateCertStore, state.tmd.blob(), cert_chain)?;

        let ticket = self.find_signed_ticket(title_id);
        if !ticket.is_valid() {
            return Err(ReturnCode::EsNoTicket);
        }
        let (fs, iosc) = self.kernel.fs_and_iosc();
        let cert_store = read_cert_store(fs)?;
        verify_container(iosc, fs, VerifyContainerType::Ticket, VerifyMode::UpdateCertStore, ticket.blob(), &cert_store)?;

        let tmd = state.tmd.clone();
        self.init_import(&tmd).map_err(|_| ReturnCode::EsIo)?;
        self.write_import_tmd(&tmd)?;
        init_title_key(self.kernel.iosc.as_mut(), &ticket, state)?;
        state.valid = true;
        info!("es: importing {title_id:016x}");
        Ok(())
    }

    /// Starts importing one content; returns the content fd (always 0).
    pub fn import_content_begin(&mut self, state: &mut TitleImportExport, title_id: u64, content_id: u32) -> IpcResult<u32> {
        if state.content.valid {
            error!("es: content {:08x} is still being imported", state.content.id);
            return Err(ReturnCode::EsInvalid);
        }
        if !state.valid || state.tmd.title_id() != title_id {
            return Err(ReturnCode::EsInvalid);
        }
        let content = state.tmd.find_content_by_id(content_id).ok_or(ReturnCode::EsInvalid)?;
        let mut iv = [0u8; 16];
        iv[..2].copy_from_slice(&content.index.to_be_bytes());
        state.content = ContentImport { valid: true, id: content_id, iv, buffer: Vec::new() };
        Ok(0)
    }

    /// Buffers encrypted content data.
    pub fn import_content_data(&mut self, state: &mut TitleImportExport, _content_fd: u32, data: &[u8]) -> IpcResult<()> {
        if !state.content.valid {
            return Err(ReturnCode::EsInvalid);
        }
        state.content.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Decrypts the buffered content, checks its hash and stores it:
    /// shared contents under `/shared1`, private ones in the staging area.
    pub fn import_content_end(&mut self, state: &mut TitleImportExport, _content_fd: u32) -> IpcResult<()> {
        if !state.valid || !state.content.valid {
            return Err(ReturnCode::EsInvalid);
        }
        let key = state.key_handle.ok_or(ReturnCode::EsInvalid)?;
        let (fs, iosc) = self.kernel.fs_and_iosc();
        let decrypted = iosc.decrypt(key, &state.content.iv, &state.content.buffer, PID_ES)?;

        let content = state.tmd.find_content_by_id(state.content.id).ok_or(ReturnCode::EsInvalid)?;
        let size = usize::try_from(content.size).map_err(|_| ReturnCode::EsInvalid)?;
        let Some(data) = decrypted.get(..size).filter(|data| sha1_digest(data) == content.sha1) else {
            error!("es: hash mismatch for content {:08x}", content.id);
            return Err(ReturnCode::EsHashMismatch);
        };

        let path = if content.is_shared() {
            SharedContentMap::new(fs).add_shared_content(&content.sha1)?
        } else {
            import_private_content_path(state.tmd.title_id(), content.id)
        };
        write_via_tmp(fs, &path, data)?;
        state.content = ContentImport::default();
        Ok(())
    }

    /// Commits the import once every required content is present.
    pub fn import_title_done(&mut self, state: &mut TitleImportExport) -> IpcResult<()> {
        if !state.valid || state.content.valid {
            return Err(ReturnCode::EsInvalid);
        }
        let title_id = state.tmd.title_id();
        let contents = state.tmd.contents();
        let fs = self.kernel.fs.backend_mut();
        let map = SharedContentMap::new(fs);
        let shared_missing = contents
            .iter()
            .filter(|content| !content.is_optional() && content.is_shared())
            .any(|content| map.get_filename_from_sha1(&content.sha1).is_none());
        drop(map);
        // The title still lives under /import until the import is finished.
        let private_missing = contents.iter().filter(|content| !content.is_optional() && !content.is_shared()).any(|content| {
            let path = import_private_content_path(title_id, content.id);
            !fs.get_metadata(KERNEL_UID, KERNEL_GID, &path).is_ok_and(|meta| meta.is_file)
        });
        let complete = !shared_missing && !private_missing;
        if !complete {
            error!("es: import of {title_id:016x} is missing required contents");
            return Err(ReturnCode::EsInvalid);
        }

        let tmd = state.tmd.clone();
        self.write_import_tmd(&tmd)?;
        self.finish_import(&tmd).map_err(|_| ReturnCode::EsIo)?;
        info!("es: imported title {title_id:016x}");
        state.reset(self.kernel.iosc.as_mut());
        Ok(())
    }

    /// Abandons the import. Whatever was staged is finalised the same way
    /// an interrupted import is on boot.
    pub fn import_title_cancel(&mut self, state: &mut TitleImportExport) -> IpcResult<()> {
        if state.tmd.bytes().is_empty() || state.content.valid {
            return Err(ReturnCode::EsInvalid);
        }
        if state.valid {
            let title_id = state.tmd.title_id();
            self.finish_stale_import(title_id);
            info!("es: import of {title_id:016x} cancelled");
        }
        state.reset(self.kernel.iosc.as_mut());
        Ok(())
    }

    /// Starts exporting an installed title; returns its TMD, which must
    /// fit `tmd_size` exactly.
    pub fn export_title_init(
        &mut self,
        state: &mut TitleImportExport,
        title_id: u64,
        tmd_size: usize,
        ticks: &mut Ticks,
    ) -> IpcResult<Vec<u8>> {
        if state.valid {
            return Err(ReturnCode::EsInvalid);
        }
        let tmd = self.find_installed_tmd(title_id, ticks);
        if !tmd.is_valid() {
            return Err(ReturnCode::FsNotFound);
        }
        state.reset(self.kernel.iosc.as_mut());
        state.tmd = tmd;

        let ticket = self.find_signed_ticket(title_id);
        if !ticket.is_valid() {
            return Err(ReturnCode::EsNoTicket);
        }
        if ticket.title_id() != state.tmd.title_id() {
            return Err(ReturnCode::EsInvalid);
        }
        init_title_key(self.kernel.iosc.as_mut(), &ticket, state)?;
        if tmd_size != state.tmd.bytes().len() {
            return Err(ReturnCode::EsInvalid);
        }
        state.valid = true;
        Ok(state.tmd.bytes().to_vec())
    }

    /// Opens a content for export; returns its content fd.
    pub fn export_content_begin(
        &mut self,
        state: &mut TitleImportExport,
        title_id: u64,
        content_id: u32,
        ticks: &mut Ticks,
    ) -> IpcResult<u32> {
        state.content = ContentImport::default();
        if !state.valid || state.tmd.title_id() != title_id {
            return Err(ReturnCode::EsInvalid);
        }
        let content = state.tmd.find_content_by_id(content_id).ok_or(ReturnCode::EsInvalid)?;
        let tmd = state.tmd.clone();
        let cfd = match self.open_content_from_tmd(&tmd, content.index, 0, ticks) {
            Ok(cfd) => cfd,
            Err(err) => {
                state.reset(self.kernel.iosc.as_mut());
                return Err(err);
            }
        };
        let mut iv = [0u8; 16];
        iv[..2].copy_from_slice(&content.index.to_be_bytes());
        state.content = ContentImport { valid: true, id: content_id, iv, buffer: Vec::new() };
        Ok(cfd)
    }

    /// Reads and encrypts the next `size` bytes of the exported content,
    /// padded to 32 bytes. The IV chains across calls.
    pub fn export_content_data(
        &mut self,
        state: &mut TitleImportExport,
        content_fd: u32,
        size: usize,
        ticks: &mut Ticks,
    ) -> IpcResult<Vec<u8>> {
        let close_and_reset = |ios: &mut Self, state: &mut TitleImportExport, ticks: &mut Ticks| {
            // The content may already be closed.
            let _ = ios.es.content_table.close(&mut ios.kernel.fs, content_fd, 0, ticks);
            state.reset(ios.kernel.iosc.as_mut());
        };
        if !state.valid || !state.content.valid || size == 0 {
            close_and_reset(self, state, ticks);
            return Err(ReturnCode::EsInvalid);
        }
        let mut buffer = vec![0u8; size];
        if self.es.content_table.read(&mut self.kernel.fs, content_fd, 0, &mut buffer, ticks).is_err() {
            close_and_reset(self, state, ticks);
            return Err(ReturnCode::EsShortRead);
        }
        buffer.resize(size.next_multiple_of(32), 0);

        let key = state.key_handle.ok_or(ReturnCode::EsInvalid)?;
        let output = self.kernel.iosc.encrypt(key, &state.content.iv, &buffer, PID_ES)?;
        if let Some(last_block) = output.len().checked_sub(16).and_then(|start| output.get(start..)) {
            state.content.iv.copy_from_slice(last_block);
        }
        Ok(output)
    }

    /// Closes the exported content.
    pub fn export_content_end(&mut self, state: &mut TitleImportExport, content_fd: u32, ticks: &mut Ticks) -> IpcResult<()> {
        if !state.valid || !state.content.valid {
            return Err(ReturnCode::EsInvalid);
        }
        self.es.content_table.close(&mut self.kernel.fs, content_fd, 0, ticks)
    }

    /// Ends the export.
    pub fn export_title_done(&mut self, state: &mut TitleImportExport) -> IpcResult<()> {
        state.reset(self.kernel.iosc.as_mut());
        Ok(())
    }

    /// Deletes a title's whole directory.
    pub fn delete_title(&mut self, title_id: u64) -> IpcResult<()> {
        if !can_delete_title(title_id) {
            return Err(ReturnCode::EsInvalid);
        }
        self.kernel.fs.backend_mut().delete(KERNEL_UID, KERNEL_GID, &title_path(title_id))?;
        info!("es: deleted title {title_id:016x}");
        Ok(())
    }

    /// Deletes the ticket record named by `view`; the ticket file and its
    /// directory go away once empty.
    pub fn delete_ticket(&mut self, view: &[u8]) -> IpcResult<()> {
        let view = TicketView::parse(view).ok_or(ReturnCode::EsInvalid)?;
        if !can_delete_title(view.title_id) {
            return Err(ReturnCode::EsInvalid);
        }
        let ticket = self.find_signed_ticket(view.title_id);
        if !ticket.is_valid() {
            return Err(ReturnCode::FsNotFound);
        }
        let remaining = records_except(&ticket, view.ticket_id);
        let path = ticket_file_name(view.title_id);
        let fs = self.kernel.fs.backend_mut();
        if remaining.is_empty() {
            if let Err(err) = fs.delete(KERNEL_UID, KERNEL_GID, &path) {
                warn!("es: failed to delete {path}: {err}");
            }
        } else {
            fs.write_file(KERNEL_UID, KERNEL_GID, &path, &remaining, TICKET_MODES).map_err(|err| {
                error!("es: failed to rewrite {path}: {err}");
                ReturnCode::EsIo
            })?;
        }
        let parent = parent_of(&path);
        if fs.read_directory(KERNEL_UID, KERNEL_GID, parent).is_ok_and(|entries| entries.is_empty()) {
            if let Err(err) = fs.delete(KERNEL_UID, KERNEL_GID, parent) {
                warn!("es: failed to delete {parent}: {err}");
            }
        }
        Ok(())
    }

    /// Deletes every `.app` file of a title, keeping its TMD.
    pub fn delete_title_content(&mut self, title_id: u64) -> IpcResult<()> {
        if !can_delete_title(title_id) {
            return Err(ReturnCode::EsInvalid);
        }
        let content_dir = title_content_path(title_id);
        let fs = self.kernel.fs.backend_mut();
        for name in fs.read_directory(KERNEL_UID, KERNEL_GID, &content_dir)? {
            if name.len() == 12 && name.ends_with(".app") {
                let path = format!("{content_dir}/{name}");
                if let Err(err) = fs.delete(KERNEL_UID, KERNEL_GID, &path) {
                    warn!("es: failed to delete {path}: {err}");
                }
            }
        }
        Ok(())
    }

    /// Deletes one private content listed in the installed TMD.
    pub fn delete_content(&mut self, title_id: u64, content_id: u32, ticks: &mut Ticks) -> IpcResult<()> {
        if !can_delete_title(title_id) {
            return Err(ReturnCode::EsInvalid);
        }
        let tmd = self.find_installed_tmd(title_id, ticks);
        if !tmd.is_valid() {
            return Err(ReturnCode::FsNotFound);
        }
        if tmd.find_content_by_id(content_id).is_none() {
            return Err(ReturnCode::EsInvalid);
        }
        let path = private_content_path(title_id, content_id);
        self.kernel.fs.backend_mut().delete(KERNEL_UID, KERNEL_GID, &path)?;
        Ok(())
    }

    /// Deletes a shared content unless a system title uses it.
    pub fn delete_shared_content(&mut self, sha1: &[u8; 20]) -> IpcResult<()> {
        let path = SharedContentMap::new(self.kernel.fs.backend_mut())
            .get_filename_from_sha1(sha1)
            .ok_or(ReturnCode::EsInvalid)?;

        let mut ticks = Ticks::new();
        for title_id in self.installed_titles() {
            if !is_title_type(title_id, TitleType::System) {
                continue;
            }
            let tmd = self.find_installed_tmd(title_id, &mut ticks);
            if !tmd.is_valid() || tmd.contents().iter().any(|content| &content.sha1 == sha1) {
                error!("es: shared content {path} is used by system title {title_id:016x}");
                return Err(ReturnCode::EsInvalid);
            }
        }

        let fs = self.kernel.fs.backend_mut();
        match fs.delete(KERNEL_UID, KERNEL_GID, &path) {
            Ok(()) => {}
            Err(FsError::NotFound) => warn!("es: shared content {path} was already gone"),
            Err(err) => return Err(err.into()),
        }
        SharedContentMap::new(fs).delete_shared_content(sha1)
    }
}
