// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory NAND backend.

use std::collections::BTreeMap;

use log::debug;

use crate::types::{
    DirectoryStats, Fd, FileAttribute, FileStatus, Gid, Metadata, Mode, Modes, NandStats,
    SeekMode, Uid,
};
use crate::{
    is_valid_non_root_path, is_valid_path, split_path, FileSystem, FsError, Result,
    CLUSTER_DATA_SIZE, MAX_FILENAME_LENGTH, MAX_PATH_DEPTH,
};

const MAX_OPEN_FILES: usize = 64;
const USER_CLUSTERS: u32 = 0x6ec0;
const RESERVED_CLUSTERS: u32 = 0x1140;
const TOTAL_INODES: u32 = 0x17ff;

#[derive(Debug, Clone)]
enum NodeKind {
    File(Vec<u8>),
    Directory,
}

#[derive(Debug, Clone)]
struct Node {
    uid: Uid,
    gid: Gid,
    attribute: FileAttribute,
    modes: Modes,
    kind: NodeKind,
}

impl Node {
    fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File(_))
    }

    fn size(&self) -> u32 {
        match &self.kind {
            NodeKind::File(data) => data.len() as u32,
            NodeKind::Directory => 0,
        }
    }

    fn allows(&self, uid: Uid, gid: Gid, requested: Mode) -> bool {
        if uid == 0 {
            return true;
        }
        let granted = if self.uid == uid {
            self.modes.owner
        } else if self.gid == gid {
            self.modes.group
        } else {
            self.modes.other
        };
        granted.allows(requested)
    }
}

#[derive(Debug, Clone)]
struct OpenFile {
    path: String,
    mode: Mode,
    offset: u32,
}

/// Permission-checked file tree held in memory.
///
/// Files are addressed by full path; renames keep the file name of files
/// and replace an existing destination of the same kind wholesale.
#[derive(Debug, Clone)]
pub struct MemFileSystem {
    nodes: BTreeMap<String, Node>,
    handles: BTreeMap<Fd, OpenFile>,
    next_fd: Fd,
}

fn is_same_or_child(candidate: &str, path: &str) -> bool {
    candidate == path
        || (candidate.len() > path.len()
            && candidate.starts_with(path)
            && candidate.as_bytes()[path.len()] == b'/')
}

fn clusters_for(size: u32) -> u32 {
    size.div_ceil(CLUSTER_DATA_SIZE)
}

impl MemFileSystem {
    /// Creates a file system holding only `/`.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Self::root());
        Self { nodes, handles: BTreeMap::new(), next_fd: 1 }
    }

    fn root() -> Node {
        Node { uid: 0, gid: 0, attribute: 0, modes: Modes::public(), kind: NodeKind::Directory }
    }

    fn subtree(&self, path: &str) -> Vec<String> {
        self.nodes
            .range(path.to_string()..)
            .take_while(|(key, _)| key.starts_with(path))
            .filter(|(key, _)| is_same_or_child(key, path))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn in_use(&self, path: &str) -> bool {
        self.handles.values().any(|open| is_same_or_child(&open.path, path))
    }

    fn writable_parent(&self, uid: Uid, gid: Gid, path: &str) -> Result<()> {
        let (parent, _) = split_path(path);
        let node = self.nodes.get(parent).ok_or(FsError::NotFound)?;
        if node.is_file() {
            return Err(FsError::NotFound);
        }
        if !node.allows(uid, gid, Mode::Write) {
            return Err(FsError::AccessDenied);
        }
        Ok(())
    }

    fn create_entry(
        &mut self,
        uid: Uid,
        gid: Gid,
        path: &str,
        attribute: FileAttribute,
        modes: Modes,
        kind: NodeKind,
    ) -> Result<()> {
        if !is_valid_non_root_path(path) {
            return Err(FsError::Invalid);
        }
        let (_, name) = split_path(path);
        if name.len() > MAX_FILENAME_LENGTH {
            return Err(FsError::Invalid);
        }
        if path.matches('/').count() > MAX_PATH_DEPTH {
            return Err(FsError::TooManyPathComponents);
        }
        self.writable_parent(uid, gid, path)?;
        if self.nodes.contains_key(path) {
            return Err(FsError::AlreadyExists);
        }
        self.nodes.insert(path.to_string(), Node { uid, gid, attribute, modes, kind });
        Ok(())
    }

    fn open_mut(&mut self, fd: Fd) -> Result<(&mut OpenFile, &mut Node)> {
        let open = self.handles.get_mut(&fd).ok_or(FsError::Invalid)?;
        let node = self.nodes.get_mut(&open.path).ok_or(FsError::NotFound)?;
        Ok((open, node))
    }
}

impl Default for MemFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MemFileSystem {
    fn format(&mut self, uid: Uid) -> Result<()> {
        if uid != 0 {
            return Err(FsError::AccessDenied);
        }
        self.handles.clear();
        self.nodes.clear();
        self.nodes.insert("/".to_string(), Self::root());
        Ok(())
    }

    fn open_file(&mut self, uid: Uid, gid: Gid, path: &str, mode: Mode) -> Result<Fd> {
        if !is_valid_non_root_path(path) {
            return Err(FsError::Invalid);
        }
        let node = self.nodes.get(path).ok_or(FsError::NotFound)?;
        if !node.is_file() {
            return Err(FsError::Invalid);
        }
        if !node.allows(uid, gid, mode) {
            return Err(FsError::AccessDenied);
        }
        if self.handles.len() >= MAX_OPEN_FILES {
            return Err(FsError::NoFreeHandle);
        }
        let fd = self.next_fd;
        self.next_fd += 1;
        self.handles.insert(fd, OpenFile { path: path.to_string(), mode, offset: 0 });
        Ok(fd)
    }

    fn close(&mut self, fd: Fd) -> Result<()> {
        self.handles.remove(&fd).map(|_| ()).ok_or(FsError::Invalid)
    }

    fn read_bytes_from_file(&mut self, fd: Fd, buf: &mut [u8]) -> Result<u32> {
        let (open, node) = self.open_mut(fd)?;
        if !open.mode.allows(Mode::Read) {
            return Err(FsError::AccessDenied);
        }
        let NodeKind::File(data) = &node.kind else {
            return Err(FsError::Invalid);
        };
        let start = (open.offset as usize).min(data.len());
        let count = buf.len().min(data.len() - start);
        buf[..count].copy_from_slice(&data[start..start + count]);
        open.offset += count as u32;
        Ok(count as u32)
    }

    fn write_bytes_to_file(&mut self, fd: Fd, bytes: &[u8]) -> Result<u32> {
        let (open, node) = self.open_mut(fd)?;
        if !open.mode.allows(Mode::Write) {
            return Err(FsError::AccessDenied);
        }
        let NodeKind::File(data) = &mut node.kind else {
            return Err(FsError::Invalid);
        };
        let start = open.offset as usize;
        let end = start + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        open.offset = end as u32;
        Ok(bytes.len() as u32)
    }

    fn seek_file(&mut self, fd: Fd, offset: u32, mode: SeekMode) -> Result<u32> {
        let (open, node) = self.open_mut(fd)?;
        let size = node.size();
        let target = match mode {
            SeekMode::Set => Some(offset),
            SeekMode::Current => open.offset.checked_add(offset),
            SeekMode::End => size.checked_add(offset),
        };
        match target {
            Some(position) if position <= size => {
                open.offset = position;
                Ok(position)
            }
            _ => Err(FsError::Invalid),
        }
    }

    fn get_file_status(&mut self, fd: Fd) -> Result<FileStatus> {
        let (open, node) = self.open_mut(fd)?;
        Ok(FileStatus { offset: open.offset, size: node.size() })
    }

    fn create_file(
        &mut self,
        uid: Uid,
        gid: Gid,
        path: &str,
        attribute: FileAttribute,
        modes: Modes,
    ) -> Result<()> {
        self.create_entry(uid, gid, path, attribute, modes, NodeKind::File(Vec::new()))
    }

    fn create_directory(
        &mut self,
        uid: Uid,
        gid: Gid,
        path: &str,
        attribute: FileAttribute,
        modes: Modes,
    ) -> Result<()> {
        self.create_entry(uid, gid, path, attribute, modes, NodeKind::Directory)
    }

    fn delete(&mut self, uid: Uid, gid: Gid, path: &str) -> Result<()> {
        if !is_valid_non_root_path(path) {
            return Err(FsError::Invalid);
        }
        self.writable_parent(uid, gid, path)?;
        if !self.nodes.contains_key(path) {
            return Err(FsError::NotFound);
        }
        if self.in_use(path) {
            return Err(FsError::InUse);
        }
        for key in self.subtree(path) {
            self.nodes.remove(&key);
        }
        Ok(())
    }

    fn rename(&mut self, uid: Uid, gid: Gid, old: &str, new: &str) -> Result<()> {
        if !is_valid_non_root_path(old) || !is_valid_non_root_path(new) {
            return Err(FsError::Invalid);
        }
        self.writable_parent(uid, gid, old)?;
        self.writable_parent(uid, gid, new)?;
        let source = self.nodes.get(old).ok_or(FsError::NotFound)?;
        let source_is_file = source.is_file();
        if source_is_file && split_path(old).1 != split_path(new).1 {
            return Err(FsError::Invalid);
        }
        if old == new {
            return Ok(());
        }
        if is_same_or_child(new, old) {
            return Err(FsError::Invalid);
        }
        if self.in_use(old) || self.in_use(new) {
            return Err(FsError::InUse);
        }
        if let Some(target) = self.nodes.get(new) {
            if target.is_file() != source_is_file {
                return Err(FsError::Invalid);
            }
            debug!("memfs: rename {old} replaces {new}");
            for key in self.subtree(new) {
                self.nodes.remove(&key);
            }
        }
        for key in self.subtree(old) {
            if let Some(node) = self.nodes.remove(&key) {
                let moved = format!("{new}{}", &key[old.len()..]);
                self.nodes.insert(moved, node);
            }
        }
        Ok(())
    }

    fn read_directory(&self, uid: Uid, gid: Gid, path: &str) -> Result<Vec<String>> {
        if !is_valid_path(path) {
            return Err(FsError::Invalid);
        }
        let node = self.nodes.get(path).ok_or(FsError::NotFound)?;
        if node.is_file() {
            return Err(FsError::Invalid);
        }
        if !node.allows(uid, gid, Mode::Read) {
            return Err(FsError::AccessDenied);
        }
        let prefix = if path == "/" { "/".to_string() } else { format!("{path}/") };
        Ok(self
            .nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| &key[prefix.len()..])
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    fn get_metadata(&self, _uid: Uid, _gid: Gid, path: &str) -> Result<Metadata> {
        if !is_valid_path(path) {
            return Err(FsError::Invalid);
        }
        let node = self.nodes.get(path).ok_or(FsError::NotFound)?;
        let fst_index = self.nodes.range(..path.to_string()).count() as u16;
        Ok(Metadata {
            uid: node.uid,
            gid: node.gid,
            attribute: node.attribute,
            modes: node.modes,
            is_file: node.is_file(),
            size: node.size(),
            fst_index,
        })
    }

    fn set_metadata(
        &mut self,
        caller_uid: Uid,
        path: &str,
        uid: Uid,
        gid: Gid,
        attribute: FileAttribute,
        modes: Modes,
    ) -> Result<()> {
        if !is_valid_path(path) {
            return Err(FsError::Invalid);
        }
        let node = self.nodes.get_mut(path).ok_or(FsError::NotFound)?;
        if caller_uid != 0 && (caller_uid != node.uid || uid != node.uid) {
            return Err(FsError::AccessDenied);
        }
        node.uid = uid;
        node.gid = gid;
        node.attribute = attribute;
        node.modes = modes;
        Ok(())
    }

    fn get_nand_stats(&self) -> Result<NandStats> {
        let used_clusters: u32 = self.nodes.values().map(|node| clusters_for(node.size())).sum();
        let used_inodes = self.nodes.len() as u32;
        Ok(NandStats {
            cluster_size: CLUSTER_DATA_SIZE,
            free_clusters: USER_CLUSTERS.saturating_sub(used_clusters),
            used_clusters,
            bad_clusters: 0,
            reserved_clusters: RESERVED_CLUSTERS,
            free_inodes: TOTAL_INODES.saturating_sub(used_inodes),
            used_inodes,
        })
    }

    fn get_directory_stats(&self, path: &str) -> Result<DirectoryStats> {
        let node = self.nodes.get(path).ok_or(FsError::NotFound)?;
        if node.is_file() {
            return Err(FsError::Invalid);
        }
        let keys = if path == "/" { self.nodes.keys().cloned().collect() } else { self.subtree(path) };
        let used_clusters = keys
            .iter()
            .filter_map(|key| self.nodes.get(key))
            .map(|node| clusters_for(node.size()))
            .sum();
        Ok(DirectoryStats { used_clusters, used_inodes: keys.len() as u32 })
    }
}
