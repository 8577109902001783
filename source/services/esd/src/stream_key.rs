// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Title keys handed out to WFS titles for streaming decryption.

use es_formats::{
    TicketReader, TicketView, TmdReader, MAX_TMD_SIZE, TICKET_VIEW_SIZE, TITLE_TYPE_0X4, TITLE_TYPE_WFS_MAYBE,
};
use iosc::{Handle, ObjectGuard, ObjectSubType, ObjectType, COMMON_KEY_HANDLES};
use ios_abi::pid::{PID_ES, PID_PPCBOOT, PID_UNKNOWN};
use ios_abi::{IpcResult, ReturnCode, FIRST_PPC_UID};
use log::{error, info};

use crate::kernel::Ios;
use crate::title_context::TitleContext;
use crate::verify::{read_cert_store, verify_container, VerifyContainerType, VerifyMode};

/// Whether the active title is allowed by the permitted-title fields of a
/// ticket view.
pub(crate) fn is_active_title_permitted_by_ticket(context: &TitleContext, view: &TicketView) -> bool {
    if !context.active {
        return false;
    }
    let title_identifier = context.tmd.title_id() as u32;
    title_identifier != 0 && (title_identifier & !view.permitted_title_mask) == view.permitted_title_id
}

fn check_stream_key_permissions(
    context: &TitleContext,
    uid: u32,
    view: &TicketView,
    tmd: &TmdReader,
) -> IpcResult<()> {
    let flags = tmd.title_flags();
    // The exact title type test IOS does; only WFS-class titles pass.
    const WFS_AND_0X4: u32 = TITLE_TYPE_0X4 | TITLE_TYPE_WFS_MAYBE;
    if (flags & TITLE_TYPE_0X4 == 0 && !(flags >> 5) & 1 != 0) || flags & WFS_AND_0X4 == WFS_AND_0X4 {
        return Err(ReturnCode::EsInvalid);
    }

    // Internal callers other than WFS are refused.
    if uid < FIRST_PPC_UID && uid != PID_UNKNOWN {
        return Err(ReturnCode::EsInvalid);
    }
    if flags & TITLE_TYPE_WFS_MAYBE != 0 && uid != PID_UNKNOWN {
        return Err(ReturnCode::EsInvalid);
    }

    if view.title_id != tmd.title_id() {
        return Err(ReturnCode::EsInvalid);
    }

    if (uid == PID_UNKNOWN && (!view.permitted_title_mask & 0x13) != view.permitted_title_id)
        || !is_active_title_permitted_by_ticket(context, view)
    {
        return Err(ReturnCode::EsAccessDenied);
    }
    Ok(())
}

impl Ios {
    /// Loads the title key of the ticket named by `view` into a new AES
    /// object owned by the caller. The TMD and ticket must verify.
    pub fn set_up_stream_key(&mut self, uid: u32, view: &[u8], tmd_bytes: &[u8]) -> IpcResult<Handle> {
        if view.len() != TICKET_VIEW_SIZE || tmd_bytes.len() > MAX_TMD_SIZE {
            return Err(ReturnCode::EsInvalid);
        }
        let view = TicketView::parse(view).ok_or(ReturnCode::EsInvalid)?;
        let tmd = TmdReader::new(tmd_bytes.to_vec());
        if !tmd.is_valid() {
            return Err(ReturnCode::EsInvalid);
        }

        check_stream_key_permissions(&self.es.title_context, uid, &view, &tmd)?;

        let installed = self.find_signed_ticket(view.title_id);
        if !installed.is_valid() {
            return Err(ReturnCode::FsNotFound);
        }
        let record = installed.raw_ticket(view.ticket_id);
        if record.is_empty() {
            return Err(ReturnCode::EsNoTicket);
        }
        let ticket = TicketReader::new(record);

        let (fs, iosc) = self.kernel.fs_and_iosc();
        let cert_store = read_cert_store(fs)?;
        verify_container(iosc, fs, VerifyContainerType::Tmd, VerifyMode::UpdateCertStore, tmd.blob(), &cert_store)?;
        verify_container(
            iosc,
            fs,
            VerifyContainerType::Ticket,
            VerifyMode::UpdateCertStore,
            installed.blob(),
            &cert_store,
        )?;

        let mut key = ObjectGuard::create(iosc, ObjectType::SecretKey, ObjectSubType::Aes128, PID_ES)?;
        let handle = key.handle();
        let owner = if uid >= FIRST_PPC_UID { PID_PPCBOOT } else { uid };
        key.iosc().set_ownership(handle, 1 << owner, PID_ES)?;

        let common_key = COMMON_KEY_HANDLES
            .get(usize::from(ticket.common_key_index()))
            .copied()
            .ok_or(ReturnCode::EsInvalidTicket)?;
        let mut iv = [0u8; 16];
        iv[..8].copy_from_slice(&view.title_id.to_be_bytes());
        key.iosc()
            .import_secret_key(handle, common_key, &iv, &ticket.title_key(), PID_ES)
            .inspect_err(|err| error!("es: importing stream key for {:016x} failed: {err}", view.title_id))?;

        info!("es: stream key {handle} set up for {:016x}", view.title_id);
        Ok(key.release())
    }

    /// Frees a stream key.
    pub fn delete_stream_key(&mut self, handle: Handle) -> IpcResult<()> {
        self.kernel.iosc.delete_object(handle, PID_ES)
    }
}
