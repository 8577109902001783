// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fixed pool of opened contents.

use core_timing::Ticks;
use es_formats::Content;
use fsd::FsCore;
use ios_abi::{IpcResult, ReturnCode};
use nand_fs::SeekMode;

/// Number of content slots.
pub const CONTENT_TABLE_SIZE: usize = 16;

/// One slot of the content table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenedContent {
    /// Slot in use.
    pub opened: bool,
    /// Title the content belongs to.
    pub title_id: u64,
    /// Content record.
    pub content: Content,
    /// FS core fd backing the slot.
    pub fd: u32,
    /// Caller that opened the slot.
    pub uid: u32,
}

/// The content table. Every access names the caller uid, which must
/// match the uid the slot was opened with.
#[derive(Debug, Default)]
pub struct ContentTable {
    slots: [OpenedContent; CONTENT_TABLE_SIZE],
}

impl ContentTable {
    /// First free slot; exhaustion is `FS_EFDEXHAUSTED`, never a wait.
    pub fn free_slot(&self) -> IpcResult<usize> {
        self.slots.iter().position(|slot| !slot.opened).ok_or(ReturnCode::FsNoFreeHandle)
    }

    /// Claims `index` for an opened content.
    pub(crate) fn bind(&mut self, index: usize, title_id: u64, content: Content, fd: u32, uid: u32) {
        self.slots[index] = OpenedContent { opened: true, title_id, content, fd, uid };
    }

    /// Number of occupied slots.
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.opened).count()
    }

    /// Slot `cfd` if `uid` owns it.
    pub fn entry(&self, cfd: u32, uid: u32) -> IpcResult<&OpenedContent> {
        let entry = self.slots.get(cfd as usize).ok_or(ReturnCode::EsInvalid)?;
        if entry.uid != uid {
            return Err(ReturnCode::EsAccessDenied);
        }
        if !entry.opened {
            return Err(ReturnCode::Invalid);
        }
        Ok(entry)
    }

    /// Reads from an opened content.
    pub fn read(&self, fs: &mut FsCore, cfd: u32, uid: u32, buf: &mut [u8], ticks: &mut Ticks) -> IpcResult<u32> {
        let fd = self.entry(cfd, uid)?.fd;
        Ok(fs.read(fd, buf, ticks)?)
    }

    /// Seeks within an opened content.
    pub fn seek(
        &self,
        fs: &mut FsCore,
        cfd: u32,
        uid: u32,
        offset: u32,
        mode: SeekMode,
        ticks: &mut Ticks,
    ) -> IpcResult<u32> {
        let fd = self.entry(cfd, uid)?.fd;
        Ok(fs.seek(fd, offset, mode, ticks)?)
    }

    /// Closes an opened content and frees its slot.
    pub fn close(&mut self, fs: &mut FsCore, cfd: u32, uid: u32, ticks: &mut Ticks) -> IpcResult<()> {
        let fd = self.entry(cfd, uid)?.fd;
        let closed = fs.close(fd, ticks);
        self.slots[cfd as usize] = OpenedContent::default();
        Ok(closed?)
    }
}
