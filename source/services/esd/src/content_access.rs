// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Opening title contents into the content table.

use core_timing::Ticks;
use es_formats::TmdReader;
use ios_abi::{IpcResult, ReturnCode};
use log::debug;
use nand_fs::Mode;

use crate::kernel::Ios;
use crate::uid_map::UidMap;
use crate::{KERNEL_GID, KERNEL_UID};

impl Ios {
    /// Opens content `content_index` of `tmd` for `uid`; returns the slot.
    pub(crate) fn open_content_from_tmd(
        &mut self,
        tmd: &TmdReader,
        content_index: u16,
        uid: u32,
        ticks: &mut Ticks,
    ) -> IpcResult<u32> {
        let title_id = tmd.title_id();
        let content = tmd.content(content_index).ok_or(ReturnCode::EsInvalid)?;
        let slot = self.es.content_table.free_slot()?;
        let path = self.content_path(title_id, &content).ok_or(ReturnCode::FsNotFound)?;
        let fd = self.kernel.fs.open(KERNEL_UID, KERNEL_GID, &path, Mode::Read, ticks)?;
        self.es.content_table.bind(slot, title_id, content, fd, uid);
        debug!("es: opened {path} as content fd {slot}");
        Ok(slot as u32)
    }

    /// Opens a content of an installed title.
    pub fn open_content(&mut self, title_id: u64, content_index: u16, uid: u32, ticks: &mut Ticks) -> IpcResult<u32> {
        let tmd = self.find_installed_tmd(title_id, ticks);
        if !tmd.is_valid() {
            return Err(ReturnCode::FsNotFound);
        }
        self.open_content_from_tmd(&tmd, content_index, uid, ticks)
    }

    /// Opens a content of the active title. Only the kernel and the
    /// title's own uid may do so.
    pub fn open_active_title_content(&mut self, content_index: u16, uid: u32, ticks: &mut Ticks) -> IpcResult<u32> {
        if !self.es.title_context.active {
            return Err(ReturnCode::EsInvalid);
        }
        let tmd = self.es.title_context.tmd.clone();
        let title_uid = UidMap::new(self.kernel.fs.backend_mut())
            .get_or_insert_uid_for_title(tmd.title_id())?;
        if uid != 0 && uid != title_uid {
            return Err(ReturnCode::EsAccessDenied);
        }
        self.open_content_from_tmd(&tmd, content_index, uid, ticks)
    }
}
