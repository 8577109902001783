// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Handle table, cache simulation and timed operations.

use core_timing::{Tick, Ticks};
use log::{debug, warn};
use nand_fs::{
    DirectoryStats, Fd, FileAttribute, FileStatus, FileSystem, FsError, Gid, Metadata, Mode,
    Modes, NandStats, Result, SeekMode, Uid, CLUSTER_DATA_SIZE, MAX_PATH_LENGTH,
};

use crate::timing::{FileLookupMode, TimingProfile};

/// Number of live FS handles.
pub const FS_FD_TABLE_SIZE: usize = 16;

#[derive(Debug, Clone)]
struct Handle {
    uid: Uid,
    gid: Gid,
    /// `None` for `/dev/fs` control handles.
    fs_fd: Option<Fd>,
    path: String,
    superblock_flush_needed: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct FileCache {
    fd: Option<u32>,
    chain_index: u32,
    dirty: bool,
}

/// Timed front of a [`FileSystem`] backend.
pub struct FsCore {
    fs: Box<dyn FileSystem>,
    fd_map: [Option<Handle>; FS_FD_TABLE_SIZE],
    cache: FileCache,
    timing: TimingProfile,
}

fn check_path(path: &str) -> Result<()> {
    if path.len() > MAX_PATH_LENGTH {
        return Err(FsError::Invalid);
    }
    Ok(())
}

impl FsCore {
    /// Wraps `fs` and resets `/tmp`.
    pub fn new(fs: Box<dyn FileSystem>, timing: TimingProfile) -> Self {
        let mut core = Self { fs, fd_map: std::array::from_fn(|_| None), cache: FileCache::default(), timing };
        core.reset_tmp();
        core
    }

    /// Restarts the core over the same backend: every handle is closed,
    /// the cache is dropped and `/tmp` is recreated.
    pub fn reset(&mut self, timing: TimingProfile) {
        for slot in self.fd_map.iter_mut() {
            if let Some(Handle { fs_fd: Some(fs_fd), path, .. }) = slot.take() {
                if let Err(err) = self.fs.close(fs_fd) {
                    warn!("fs: failed to close {path} on reset: {err}");
                }
            }
        }
        self.cache = FileCache::default();
        self.timing = timing;
        self.reset_tmp();
    }

    fn reset_tmp(&mut self) {
        match self.fs.delete(0, 0, "/tmp") {
            Ok(()) | Err(FsError::NotFound) => {}
            Err(err) => warn!("fs: failed to clear /tmp: {err}"),
        }
        if let Err(err) = self.fs.create_directory(0, 0, "/tmp", 0, Modes::public()) {
            warn!("fs: failed to create /tmp: {err}");
        }
    }

    /// Gives the backend back, dropping every handle.
    pub fn into_backend(self) -> Box<dyn FileSystem> {
        self.fs
    }

    /// Untimed access to the backend.
    pub fn backend(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    /// Untimed mutable access to the backend.
    pub fn backend_mut(&mut self) -> &mut dyn FileSystem {
        self.fs.as_mut()
    }

    /// Tick costs in use.
    pub fn timing(&self) -> &TimingProfile {
        &self.timing
    }

    /// Number of live handles.
    pub fn open_handles(&self) -> usize {
        self.fd_map.iter().filter(|slot| slot.is_some()).count()
    }

    fn free_slot(&self) -> Result<usize> {
        self.fd_map.iter().position(Option::is_none).ok_or(FsError::NoFreeHandle)
    }

    fn handle(&self, fd: u32) -> Result<&Handle> {
        self.fd_map.get(fd as usize).and_then(Option::as_ref).ok_or(FsError::Invalid)
    }

    fn file_fd(&self, fd: u32) -> Result<Fd> {
        self.handle(fd)?.fs_fd.ok_or(FsError::Invalid)
    }

    pub(crate) fn is_control_handle(&self, fd: u32) -> Result<bool> {
        Ok(self.handle(fd)?.fs_fd.is_none())
    }

    fn mark_flush_needed(&mut self, fd: u32) {
        if let Some(Some(handle)) = self.fd_map.get_mut(fd as usize) {
            handle.superblock_flush_needed = true;
        }
    }

    /// Opens the `/dev/fs` control handle used for ioctls.
    pub fn open_device(&mut self, uid: Uid, gid: Gid, ticks: &mut Ticks) -> Result<u32> {
        ticks.add(self.timing.ipc_overhead);
        let slot = self.free_slot()?;
        self.fd_map[slot] = Some(Handle {
            uid,
            gid,
            fs_fd: None,
            path: "/dev/fs".to_string(),
            superblock_flush_needed: false,
        });
        Ok(slot as u32)
    }

    /// Caller identity of an open handle.
    pub fn handle_owner(&self, fd: u32) -> Result<(Uid, Gid)> {
        let handle = self.handle(fd)?;
        Ok((handle.uid, handle.gid))
    }

    /// Opens a file and returns its fd.
    pub fn open(&mut self, uid: Uid, gid: Gid, path: &str, mode: Mode, ticks: &mut Ticks) -> Result<u32> {
        ticks.add(self.timing.ipc_overhead);
        check_path(path)?;
        let slot = self.free_slot()?;
        ticks.add(self.timing.lookup(path, FileLookupMode::Normal));
        let fs_fd = self.fs.open_file(uid, gid, path, mode)?;
        self.fd_map[slot] = Some(Handle {
            uid,
            gid,
            fs_fd: Some(fs_fd),
            path: path.to_string(),
            superblock_flush_needed: false,
        });
        debug!("fs: open {path} -> fd {slot}");
        Ok(slot as u32)
    }

    /// Closes a handle, charging any pending cache and superblock flush.
    pub fn close(&mut self, fd: u32, ticks: &mut Ticks) -> Result<()> {
        ticks.add(self.timing.ipc_overhead);
        let fs_fd = self.handle(fd)?.fs_fd;
        if let Some(fs_fd) = fs_fd {
            if self.cache.fd == Some(fd) {
                ticks.add(self.flush_file_cache());
                self.cache.fd = None;
            }
            if self.handle(fd)?.superblock_flush_needed {
                ticks.add(self.timing.superblock());
            }
            let result = self.fs.close(fs_fd);
            self.fd_map[fd as usize] = None;
            return result;
        }
        self.fd_map[fd as usize] = None;
        Ok(())
    }

    fn has_cache_for(&self, fd: u32, offset: u32) -> bool {
        self.cache.fd == Some(fd) && self.cache.chain_index == offset / CLUSTER_DATA_SIZE
    }

    fn flush_file_cache(&mut self) -> Tick {
        let Some(fd) = self.cache.fd else {
            return 0;
        };
        if !self.cache.dirty {
            return 0;
        }
        self.cache.dirty = false;
        self.mark_flush_needed(fd);
        self.timing.write_cluster()
    }

    fn populate_file_cache(&mut self, fd: u32, offset: u32, file_size: u32) -> Tick {
        if self.has_cache_for(fd, offset) {
            return 0;
        }
        let mut cost = self.flush_file_cache();
        if (offset % CLUSTER_DATA_SIZE != 0 || offset != file_size) && offset < file_size {
            cost += self.timing.read_cluster();
        }
        self.cache.fd = Some(fd);
        self.cache.chain_index = offset / CLUSTER_DATA_SIZE;
        cost
    }

    fn estimate_read_write(&mut self, fd: u32, fs_fd: Fd, is_write: bool, size: u32) -> Result<Tick> {
        let status = self.fs.get_file_status(fs_fd)?;
        let mut offset = status.offset;
        let mut remaining =
            if is_write { size } else { size.min(status.size.saturating_sub(status.offset)) };
        let mut cost: Tick = 0;
        while remaining != 0 {
            let copied;
            if !self.has_cache_for(fd, offset) && remaining >= CLUSTER_DATA_SIZE && offset % CLUSTER_DATA_SIZE == 0 {
                cost += if is_write { self.timing.write_cluster() } else { self.timing.read_cluster() };
                copied = CLUSTER_DATA_SIZE;
                if is_write {
                    self.mark_flush_needed(fd);
                }
            } else {
                cost += self.populate_file_cache(fd, offset, status.size);
                let start = offset - self.cache.chain_index * CLUSTER_DATA_SIZE;
                copied = remaining.min(CLUSTER_DATA_SIZE - start);
                cost += self.timing.memcpy(copied);
                self.cache.dirty = is_write;
                if is_write && (offset + copied) % CLUSTER_DATA_SIZE == 0 {
                    cost += self.flush_file_cache();
                }
            }
            offset += copied;
            remaining -= copied;
        }
        Ok(cost)
    }

    /// Reads into `buf`; returns the number of bytes read.
    pub fn read(&mut self, fd: u32, buf: &mut [u8], ticks: &mut Ticks) -> Result<u32> {
        ticks.add(self.timing.ipc_overhead);
        let fs_fd = self.file_fd(fd)?;
        ticks.add(self.estimate_read_write(fd, fs_fd, false, buf.len() as u32)?);
        self.fs.read_bytes_from_file(fs_fd, buf)
    }

    /// Writes `data`; returns the number of bytes written.
    pub fn write(&mut self, fd: u32, data: &[u8], ticks: &mut Ticks) -> Result<u32> {
        ticks.add(self.timing.ipc_overhead);
        let fs_fd = self.file_fd(fd)?;
        ticks.add(self.estimate_read_write(fd, fs_fd, true, data.len() as u32)?);
        self.fs.write_bytes_to_file(fs_fd, data)
    }

    /// Moves the offset of an open file.
    pub fn seek(&mut self, fd: u32, offset: u32, mode: SeekMode, ticks: &mut Ticks) -> Result<u32> {
        ticks.add(self.timing.ipc_overhead);
        let fs_fd = self.file_fd(fd)?;
        self.fs.seek_file(fs_fd, offset, mode)
    }

    /// Offset and size of an open file.
    pub fn get_file_status(&mut self, fd: u32, ticks: &mut Ticks) -> Result<FileStatus> {
        ticks.add(self.timing.ipc_overhead);
        let fs_fd = self.file_fd(fd)?;
        self.fs.get_file_status(fs_fd)
    }

    fn charge_superblock_on_success<T>(&self, result: &Result<T>, ticks: &mut Ticks) {
        if result.is_ok() {
            ticks.add(self.timing.superblock());
        }
    }

    /// Creates a file.
    pub fn create_file(
        &mut self,
        uid: Uid,
        gid: Gid,
        path: &str,
        attribute: FileAttribute,
        modes: Modes,
        ticks: &mut Ticks,
    ) -> Result<()> {
        ticks.add(self.timing.ipc_overhead);
        check_path(path)?;
        ticks.add(self.timing.lookup(path, FileLookupMode::Split));
        let result = self.fs.create_file(uid, gid, path, attribute, modes);
        self.charge_superblock_on_success(&result, ticks);
        result
    }

    /// Creates a directory.
    pub fn create_directory(
        &mut self,
        uid: Uid,
        gid: Gid,
        path: &str,
        attribute: FileAttribute,
        modes: Modes,
        ticks: &mut Ticks,
    ) -> Result<()> {
        ticks.add(self.timing.ipc_overhead);
        check_path(path)?;
        ticks.add(self.timing.lookup(path, FileLookupMode::Split));
        let result = self.fs.create_directory(uid, gid, path, attribute, modes);
        self.charge_superblock_on_success(&result, ticks);
        result
    }

    /// Deletes a file or directory tree.
    pub fn delete_file(&mut self, uid: Uid, gid: Gid, path: &str, ticks: &mut Ticks) -> Result<()> {
        ticks.add(self.timing.ipc_overhead);
        check_path(path)?;
        ticks.add(self.timing.lookup(path, FileLookupMode::Split));
        let result = self.fs.delete(uid, gid, path);
        self.charge_superblock_on_success(&result, ticks);
        result
    }

    /// Renames `old` to `new`.
    pub fn rename_file(&mut self, uid: Uid, gid: Gid, old: &str, new: &str, ticks: &mut Ticks) -> Result<()> {
        ticks.add(self.timing.ipc_overhead);
        check_path(old)?;
        check_path(new)?;
        ticks.add(self.timing.lookup(old, FileLookupMode::Split));
        ticks.add(self.timing.lookup(new, FileLookupMode::Split));
        let result = self.fs.rename(uid, gid, old, new);
        self.charge_superblock_on_success(&result, ticks);
        result
    }

    /// Lists a directory.
    pub fn read_directory(&mut self, uid: Uid, gid: Gid, path: &str, ticks: &mut Ticks) -> Result<Vec<String>> {
        ticks.add(self.timing.ipc_overhead);
        check_path(path)?;
        ticks.add(self.timing.lookup(path, FileLookupMode::Normal));
        self.fs.read_directory(uid, gid, path)
    }

    /// Metadata of an entry.
    pub fn get_metadata(&mut self, uid: Uid, gid: Gid, path: &str, ticks: &mut Ticks) -> Result<Metadata> {
        ticks.add(self.timing.ipc_overhead);
        check_path(path)?;
        ticks.add(self.timing.lookup(path, FileLookupMode::Split));
        self.fs.get_metadata(uid, gid, path)
    }

    /// Changes owner, attribute and modes.
    #[allow(clippy::too_many_arguments)]
    pub fn set_metadata(
        &mut self,
        caller_uid: Uid,
        path: &str,
        uid: Uid,
        gid: Gid,
        attribute: FileAttribute,
        modes: Modes,
        ticks: &mut Ticks,
    ) -> Result<()> {
        ticks.add(self.timing.ipc_overhead);
        check_path(path)?;
        ticks.add(self.timing.lookup(path, FileLookupMode::Split));
        let result = self.fs.set_metadata(caller_uid, path, uid, gid, attribute, modes);
        self.charge_superblock_on_success(&result, ticks);
        result
    }

    /// Whole-device usage.
    pub fn get_nand_stats(&mut self, ticks: &mut Ticks) -> Result<NandStats> {
        ticks.add(self.timing.ipc_overhead);
        self.fs.get_nand_stats()
    }

    /// Usage of a directory tree.
    pub fn get_directory_stats(&mut self, path: &str, ticks: &mut Ticks) -> Result<DirectoryStats> {
        ticks.add(self.timing.ipc_overhead);
        check_path(path)?;
        ticks.add(self.timing.lookup(path, FileLookupMode::Normal));
        self.fs.get_directory_stats(path)
    }

    /// Formats the NAND; only uid 0 may do this.
    pub fn format(&mut self, uid: Uid, ticks: &mut Ticks) -> Result<()> {
        ticks.add(self.timing.ipc_overhead);
        if uid != 0 {
            return Err(FsError::AccessDenied);
        }
        let result = self.fs.format(uid);
        self.charge_superblock_on_success(&result, ticks);
        result
    }

    /// Writes back the cache; used on shutdown.
    pub fn flush(&mut self, ticks: &mut Ticks) {
        ticks.add(self.flush_file_cache());
    }

    /// Path recorded for an fd.
    pub fn handle_path(&self, fd: u32) -> Result<&str> {
        Ok(self.handle(fd)?.path.as_str())
    }
}
