// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! NAND path layout shared by ES and its persistent stores.

/// UID map.
pub const UID_SYS: &str = "/sys/uid.sys";
/// Launch marker written between the two phases of a PPC title launch.
pub const LAUNCH_FILE: &str = "/sys/launch.sys";
/// Placeholder reserving space for the launch marker.
pub const SPACE_FILE: &str = "/sys/space.sys";
/// Persistent certificate store.
pub const CERT_STORE: &str = "/sys/cert.sys";
/// Shared content map.
pub const CONTENT_MAP: &str = "/shared1/content.map";
/// Shared content directory.
pub const SHARED_CONTENT_DIR: &str = "/shared1";
/// Scratch directory used for write-then-rename.
pub const TMP_DIR: &str = "/tmp";
/// Import staging root.
pub const IMPORT_DIR: &str = "/import";

fn hi(title_id: u64) -> u32 {
    (title_id >> 32) as u32
}

fn lo(title_id: u64) -> u32 {
    title_id as u32
}

/// `/title/<hi>/<lo>`.
pub fn title_path(title_id: u64) -> String {
    format!("/title/{:08x}/{:08x}", hi(title_id), lo(title_id))
}

/// `/title/<hi>/<lo>/content`.
pub fn title_content_path(title_id: u64) -> String {
    format!("{}/content", title_path(title_id))
}

/// `/title/<hi>/<lo>/data`.
pub fn title_data_path(title_id: u64) -> String {
    format!("{}/data", title_path(title_id))
}

/// Installed TMD of a title.
pub fn tmd_file_name(title_id: u64) -> String {
    format!("{}/title.tmd", title_content_path(title_id))
}

/// Installed private content file.
pub fn private_content_path(title_id: u64, content_id: u32) -> String {
    format!("{}/{:08x}.app", title_content_path(title_id), content_id)
}

/// Installed ticket of a title.
pub fn ticket_file_name(title_id: u64) -> String {
    format!("/ticket/{:08x}/{:08x}.tik", hi(title_id), lo(title_id))
}

/// `/import/<hi>/<lo>`.
pub fn import_title_path(title_id: u64) -> String {
    format!("{}/{:08x}/{:08x}", IMPORT_DIR, hi(title_id), lo(title_id))
}

/// `/import/<hi>/<lo>/content`.
pub fn import_content_path(title_id: u64) -> String {
    format!("{}/content", import_title_path(title_id))
}

/// Staged TMD of an import.
pub fn import_tmd_path(title_id: u64) -> String {
    format!("{}/title.tmd", import_content_path(title_id))
}

/// Staged private content file.
pub fn import_private_content_path(title_id: u64, content_id: u32) -> String {
    format!("{}/{:08x}.app", import_content_path(title_id), content_id)
}

/// Shared content file for a content map id.
pub fn shared_content_path(id: &str) -> String {
    format!("{SHARED_CONTENT_DIR}/{id}.app")
}

/// Scratch path used to stage `path` before renaming it into place.
pub fn temp_path_for(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    format!("{TMP_DIR}/{name}")
}

/// Parses an 8-digit lowercase hex path component.
pub fn parse_hex_component(name: &str) -> Option<u32> {
    if name.len() != 8 || !name.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(name, 16).ok()
}
