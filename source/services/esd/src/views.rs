// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Read-only queries: ticket and TMD views, stored TMDs and contents, and
//! the ES crypto passthroughs.

use core_timing::Ticks;
use es_formats::{TicketReader, TicketView, TmdReader, TICKET_SIZE};
use iosc::Handle;
use ios_abi::titles::is_emulated;
use ios_abi::{IpcResult, ReturnCode};
use log::{debug, error};

use crate::kernel::Ios;
use crate::shared_content_map::SharedContentMap;
use crate::verify::{read_cert_store, verify_container, VerifyContainerType, VerifyMode};

/// Copies a blob into a caller buffer that must be exactly its size.
fn exact(bytes: &[u8], size: usize) -> IpcResult<Vec<u8>> {
    if bytes.len() != size {
        return Err(ReturnCode::EsInvalid);
    }
    Ok(bytes.to_vec())
}

fn chained_iv(block_source: &[u8], fallback: [u8; 16]) -> [u8; 16] {
    let mut iv = fallback;
    if let Some(last) = block_source.len().checked_sub(16).and_then(|start| block_source.get(start..)) {
        iv.copy_from_slice(last);
    }
    iv
}

impl Ios {
    /// Number of ticket records installed for a title.
    pub fn ticket_view_count(&mut self, title_id: u64) -> IpcResult<u32> {
        if !is_emulated(title_id) {
            error!("es: {title_id:016x} is not an emulated IOS, reporting no views");
            return Ok(0);
        }
        let ticket = self.find_signed_ticket(title_id);
        Ok(if ticket.is_valid() { ticket.number_of_tickets() as u32 } else { 0 })
    }

    /// Up to `max` ticket views of a title, back to back.
    pub fn ticket_views(&mut self, title_id: u64, max: usize) -> IpcResult<Vec<u8>> {
        if !is_emulated(title_id) {
            return Ok(Vec::new());
        }
        let ticket = self.find_signed_ticket(title_id);
        if !ticket.is_valid() {
            return Ok(Vec::new());
        }
        let count = ticket.number_of_tickets().min(max);
        Ok((0..count).flat_map(|n| ticket.raw_ticket_view(n)).collect())
    }

    /// Installed ticket record named by a view, if the active title may
    /// export it.
    fn exportable_ticket_for_view(&mut self, view: &[u8]) -> IpcResult<Vec<u8>> {
        let view = TicketView::parse(view).ok_or(ReturnCode::EsInvalid)?;
        let installed = self.find_signed_ticket(view.title_id);
        if !installed.is_valid() {
            return Err(ReturnCode::EsNoTicket);
        }
        let record = installed.raw_ticket(view.ticket_id);
        if record.is_empty() {
            return Err(ReturnCode::EsNoTicket);
        }
        if !self.es.title_context.active {
            return Err(ReturnCode::EsInvalid);
        }

        let ticket = TicketReader::new(record);
        let title_identifier = self.es.title_context.tmd.title_id() as u32;
        let permitted = title_identifier != 0
            && (title_identifier & !ticket.permitted_title_mask()) == ticket.permitted_title_id();
        if !permitted || ticket.title_export_allowed() & 0xf != 5 {
            return Err(ReturnCode::EsAccessDenied);
        }
        Ok(ticket.bytes().to_vec())
    }

    /// Installed ticket record named by a view; `size` must hold it.
    pub fn ticket_from_view(&mut self, view: &[u8], size: usize) -> IpcResult<Vec<u8>> {
        let ticket = self.exportable_ticket_for_view(view)?;
        if size < ticket.len() {
            return Err(ReturnCode::EsInvalid);
        }
        Ok(ticket)
    }

    /// Size of the installed ticket record named by a view.
    pub fn ticket_size_from_view(&mut self, view: &[u8]) -> IpcResult<u32> {
        self.exportable_ticket_for_view(view).map(|ticket| ticket.len() as u32)
    }

    /// Installed v0 ticket record named by a view.
    pub fn v0_ticket_from_view(&mut self, view: &[u8]) -> IpcResult<Vec<u8>> {
        self.ticket_from_view(view, TICKET_SIZE)
    }

    fn installed_tmd_or_enoent(&mut self, title_id: u64, ticks: &mut Ticks) -> IpcResult<TmdReader> {
        let tmd = self.find_installed_tmd(title_id, ticks);
        if !tmd.is_valid() {
            return Err(ReturnCode::FsNotFound);
        }
        Ok(tmd)
    }

    /// Size of an installed title's TMD view.
    pub fn tmd_view_size(&mut self, title_id: u64, ticks: &mut Ticks) -> IpcResult<u32> {
        let tmd = self.installed_tmd_or_enoent(title_id, ticks)?;
        Ok(tmd.raw_view().len() as u32)
    }

    /// TMD view of an installed title.
    pub fn tmd_view(&mut self, title_id: u64, size: usize, ticks: &mut Ticks) -> IpcResult<Vec<u8>> {
        let tmd = self.installed_tmd_or_enoent(title_id, ticks)?;
        exact(&tmd.raw_view(), size)
    }

    fn active_title_context(&self) -> IpcResult<(&TmdReader, &TicketReader)> {
        let context = &self.es.title_context;
        if !context.active {
            return Err(ReturnCode::EsInvalid);
        }
        Ok((&context.tmd, &context.ticket))
    }

    /// Size of the active title's TMD view.
    pub fn di_tmd_view_size(&self) -> IpcResult<u32> {
        let (tmd, _) = self.active_title_context()?;
        Ok(tmd.raw_view().len() as u32)
    }

    /// Active title's TMD view.
    pub fn di_tmd_view(&self, size: usize) -> IpcResult<Vec<u8>> {
        let (tmd, _) = self.active_title_context()?;
        exact(&tmd.raw_view(), size)
    }

    /// View of `ticket`, or of the active title's ticket.
    pub fn di_ticket_view(&self, ticket: Option<&[u8]>) -> IpcResult<Vec<u8>> {
        if let Some(bytes) = ticket {
            let ticket = TicketReader::new(bytes.to_vec());
            if !ticket.is_valid() {
                return Err(ReturnCode::EsInvalid);
            }
            return Ok(ticket.raw_ticket_view(0));
        }
        let (_, ticket) = self.active_title_context()?;
        Ok(ticket.raw_ticket_view(0))
    }

    /// Size of the active title's TMD.
    pub fn di_tmd_size(&self) -> IpcResult<u32> {
        let (tmd, _) = self.active_title_context()?;
        Ok(tmd.bytes().len() as u32)
    }

    /// Active title's TMD.
    pub fn di_tmd(&self, size: usize) -> IpcResult<Vec<u8>> {
        let (tmd, _) = self.active_title_context()?;
        exact(tmd.bytes(), size)
    }

    /// Size of an installed TMD.
    pub fn stored_tmd_size(&mut self, title_id: u64, ticks: &mut Ticks) -> IpcResult<u32> {
        let tmd = self.installed_tmd_or_enoent(title_id, ticks)?;
        Ok(tmd.bytes().len() as u32)
    }

    /// Installed TMD.
    pub fn stored_tmd(&mut self, title_id: u64, size: usize, ticks: &mut Ticks) -> IpcResult<Vec<u8>> {
        let tmd = self.installed_tmd_or_enoent(title_id, ticks)?;
        exact(tmd.bytes(), size)
    }

    /// Ids of the contents of an installed title that are on the NAND.
    pub fn stored_contents(&mut self, title_id: u64, ticks: &mut Ticks) -> IpcResult<Vec<u32>> {
        let tmd = self.installed_tmd_or_enoent(title_id, ticks)?;
        Ok(self.stored_contents_from_tmd(&tmd, false).iter().map(|content| content.id).collect())
    }

    /// Number of contents of a caller TMD that are on the NAND.
    pub fn tmd_stored_contents_count(&mut self, tmd_bytes: &[u8]) -> IpcResult<u32> {
        let tmd = TmdReader::new(tmd_bytes.to_vec());
        if !tmd.is_valid() {
            return Err(ReturnCode::EsInvalid);
        }
        Ok(self.stored_contents_from_tmd(&tmd, false).len() as u32)
    }

    /// Ids of the contents of a caller TMD whose data on the NAND matches.
    /// The TMD must verify against the cert store.
    pub fn tmd_stored_contents(&mut self, tmd_bytes: &[u8]) -> IpcResult<Vec<u32>> {
        let tmd = TmdReader::new(tmd_bytes.to_vec());
        if !tmd.is_valid() {
            return Err(ReturnCode::EsInvalid);
        }
        let (fs, iosc) = self.kernel.fs_and_iosc();
        let cert_store = read_cert_store(fs)?;
        verify_container(iosc, fs, VerifyContainerType::Tmd, VerifyMode::UpdateCertStore, tmd.blob(), &cert_store)?;
        Ok(self.stored_contents_from_tmd(&tmd, true).iter().map(|content| content.id).collect())
    }

    /// Hashes of every shared content.
    pub fn shared_contents(&mut self) -> Vec<[u8; 20]> {
        SharedContentMap::new(self.kernel.fs.backend_mut()).hashes()
    }

    /// Console device id.
    pub fn device_id(&self) -> u32 {
        self.kernel.iosc.device_id()
    }

    /// AES-CBC encrypts with an IOSC key owned by `uid`; returns the output
    /// and the IV for the next block.
    pub fn encrypt(&mut self, uid: u32, key: Handle, iv: [u8; 16], data: &[u8]) -> IpcResult<(Vec<u8>, [u8; 16])> {
        let output = self.kernel.iosc.encrypt(key, &iv, data, uid)?;
        let next = chained_iv(&output, iv);
        debug!("es: encrypted {} bytes with key {key}", data.len());
        Ok((output, next))
    }

    /// AES-CBC decrypts with an IOSC key owned by `uid`; returns the output
    /// and the IV for the next block.
    pub fn decrypt(&mut self, uid: u32, key: Handle, iv: [u8; 16], data: &[u8]) -> IpcResult<(Vec<u8>, [u8; 16])> {
        let output = self.kernel.iosc.decrypt(key, &iv, data, uid)?;
        debug!("es: decrypted {} bytes with key {key}", data.len());
        Ok((output, chained_iv(data, iv)))
    }
}
