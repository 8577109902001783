// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Integration tests for ES queries, content access and stream keys
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 11 tests
//!
//! TEST_SCOPE:
//!   - Ticket and TMD views of installed titles
//!   - Stored content queries with and without hash checks
//!   - SetUid permissions
//!   - Active title content access by uid
//!   - Stream keys and the ES crypto passthroughs
//!   - Ticket export from a view
//!   - Driver configuration from a TOML file
//!   - FS control ioctls on the booted NAND
//!
//! TEST_SCENARIOS:
//!   - test_views_of_installed_title(): TMD view, stored TMD, ticket views
//!   - test_stored_contents_check_hashes(): presence vs verified data
//!   - test_set_uid_only_from_system_menu(): caller uid gate
//!   - test_active_title_content_is_uid_bound(): open, seek, read, foreign uid
//!   - test_content_table_exhaustion(): all slots taken, one freed and reused
//!   - test_stream_key_lifecycle(): owner, key, encrypt/decrypt, delete
//!   - test_stream_key_needs_wfs_title(): plain titles refused
//!   - test_ticket_from_view(): size, v0 record, export gates
//!   - test_config_file_selects_kernel(): IOS80 from a TOML file
//!   - test_fs_ioctls_on_installed_title(): directory listing through /dev/fs
//!   - test_installed_content_reads_back(): property over content payloads
//!
//! ADR: docs/adr/0001-ios-service-architecture.md

use std::io::Write;

use core_timing::Ticks;
use es_formats::{TicketReader, TmdReader, TICKET_SIZE, TICKET_VIEW_SIZE};
use es_host_tests::{
    cbc_encrypt, install_cert_store, install_title, write_nand_file, FakeIosc, FixtureContent, Harness,
    TicketBuilder, TmdBuilder,
};
use esd::{EsReply, EsRequest, IosConfig, CONTENT_TABLE_SIZE};
use fsd::{FsReply, FsRequest};
use ios_abi::paths::{private_content_path, title_content_path, title_data_path};
use ios_abi::pid::PID_PPCBOOT;
use ios_abi::{ReturnCode, SYSMENU_UID};
use nand_fs::{MemFileSystem, SeekMode};
use proptest::prelude::*;
use tempfile::NamedTempFile;

const TITLE: u64 = 0x0001_0001_4d45_4e55;
const WFS_TITLE: u64 = 0x0001_0001_5746_5321;
const BOOT: &[u8] = b"0123456789abcdef boot content";
const EXTRA: &[u8] = b"second content";

fn title() -> (TmdBuilder, TicketBuilder) {
    let tmd = TmdBuilder::new(TITLE)
        .content(FixtureContent::new(0x20, 0, 1, BOOT))
        .content(FixtureContent::new(0x21, 1, 1, EXTRA));
    (tmd, TicketBuilder::new(TITLE, 0x77))
}

fn wfs_title(export: u8) -> (TmdBuilder, TicketBuilder) {
    let mut tmd = TmdBuilder::new(WFS_TITLE).content(FixtureContent::new(1, 0, 1, b"wfs"));
    tmd.title_flags = 0x4;
    let mut ticket = TicketBuilder::new(WFS_TITLE, 0x99);
    ticket.permitted_title_mask = 0xffff_0000;
    ticket.permitted_title_id = 0x5321;
    ticket.export = export;
    (tmd, ticket)
}

fn boot_with_title(tmd: &TmdBuilder, ticket: &TicketBuilder) -> Harness {
    let mut nand = MemFileSystem::new();
    install_cert_store(&mut nand);
    install_title(&mut nand, tmd, ticket);
    Harness::boot(nand)
}

/// Boots with the title installed and active, then opens fd 1 as the
/// title's uid.
fn boot_active(tmd: &TmdBuilder, ticket: &TicketBuilder) -> (Harness, u32) {
    let mut h = boot_with_title(tmd, ticket);
    let verified = h.ios.di_verify(&TmdReader::new(tmd.build()), &TicketReader::new(ticket.build()));
    assert_eq!(verified, Ok(()));
    let uid = h.ios.kernel().uid_for_ppc();
    h.open_es(1, uid);
    (h, uid)
}

fn first_view(h: &mut Harness, title_id: u64) -> Vec<u8> {
    match h.es(1, EsRequest::GetTicketViews { title_id, max: 1 }) {
        Ok(EsReply::Data(view)) => view,
        other => panic!("unexpected reply {other:?}"),
    }
}

#[test]
fn test_views_of_installed_title() {
    let (tmd, ticket) = title();
    let mut h = boot_with_title(&tmd, &ticket);
    h.open_es(1, 0);
    let tmd_bytes = tmd.build();
    let view = TmdReader::new(tmd_bytes.clone()).raw_view();

    assert_eq!(h.es(1, EsRequest::GetTmdViewSize { title_id: TITLE }), Ok(EsReply::Count(view.len() as u32)));
    assert_eq!(h.es(1, EsRequest::GetTmdViews { title_id: TITLE, size: view.len() }), Ok(EsReply::Data(view)));
    assert_eq!(
        h.es(1, EsRequest::GetStoredTmdSize { title_id: TITLE }),
        Ok(EsReply::Count(tmd_bytes.len() as u32))
    );
    assert_eq!(
        h.es(1, EsRequest::GetStoredTmd { title_id: TITLE, size: tmd_bytes.len() }),
        Ok(EsReply::Data(tmd_bytes.clone()))
    );
    assert_eq!(
        h.es(1, EsRequest::GetStoredTmd { title_id: TITLE, size: tmd_bytes.len() + 4 }),
        Err(ReturnCode::EsInvalid)
    );
    assert_eq!(h.es(1, EsRequest::GetStoredTmdSize { title_id: TITLE + 1 }), Err(ReturnCode::FsNotFound));
    assert_eq!(h.es(1, EsRequest::GetTmdViewSize { title_id: TITLE + 1 }), Err(ReturnCode::FsNotFound));

    let ticket_view = first_view(&mut h, TITLE);
    assert_eq!(ticket_view.len(), TICKET_VIEW_SIZE);
    assert_eq!(ticket_view, TicketReader::new(ticket.build()).raw_ticket_view(0));
    assert_eq!(h.es(1, EsRequest::GetTicketViewCount { title_id: TITLE }), Ok(EsReply::Count(1)));

    // An IOS this driver cannot run reports no tickets at all.
    let foreign_ios = 0x0000_0001_0000_00fe;
    assert_eq!(h.es(1, EsRequest::GetTicketViewCount { title_id: foreign_ios }), Ok(EsReply::Count(0)));
    assert_eq!(h.es(1, EsRequest::GetTicketViews { title_id: foreign_ios, max: 4 }), Ok(EsReply::Data(vec![])));

    assert_eq!(h.es(1, EsRequest::GetConsumption { title_id: TITLE }), Ok(EsReply::Count(0)));
    assert_eq!(
        h.es(1, EsRequest::GetTitleDirectory { title_id: TITLE }),
        Ok(EsReply::Path(title_data_path(TITLE)))
    );
}

#[test]
fn test_stored_contents_check_hashes() {
    let (tmd, ticket) = title();
    let mut h = boot_with_title(&tmd, &ticket);
    h.open_es(1, 0);
    let tmd_bytes = tmd.build();

    write_nand_file(
        h.ios.kernel_mut().fs_mut().backend_mut(),
        &private_content_path(TITLE, 0x21),
        b"tampered bytes",
    );

    assert_eq!(h.es(1, EsRequest::GetStoredContentsCount { title_id: TITLE }), Ok(EsReply::Count(2)));
    assert_eq!(
        h.es(1, EsRequest::GetStoredContents { title_id: TITLE, max: 1 }),
        Ok(EsReply::ContentIds(vec![0x20]))
    );
    assert_eq!(h.es(1, EsRequest::GetTmdStoredContentsCount { tmd: &tmd_bytes }), Ok(EsReply::Count(2)));
    assert_eq!(
        h.es(1, EsRequest::GetTmdStoredContents { tmd: &tmd_bytes, max: 8 }),
        Ok(EsReply::ContentIds(vec![0x20]))
    );
    assert_eq!(h.es(1, EsRequest::GetTmdStoredContentsCount { tmd: &[0u8; 8] }), Err(ReturnCode::EsInvalid));

    h.iosc.reject_signatures(true);
    assert_eq!(
        h.es(1, EsRequest::GetTmdStoredContents { tmd: &tmd_bytes, max: 8 }),
        Err(ReturnCode::IoscFailCheckValue)
    );
}

#[test]
fn test_set_uid_only_from_system_menu() {
    let (tmd, ticket) = title();
    let mut h = boot_with_title(&tmd, &ticket);
    h.open_es(1, SYSMENU_UID);
    h.open_es(2, SYSMENU_UID + 7);

    assert_eq!(h.es(2, EsRequest::SetUid { title_id: TITLE }), Err(ReturnCode::EsInvalid));
    assert_eq!(h.es(1, EsRequest::SetUid { title_id: TITLE + 1 }), Err(ReturnCode::FsNotFound));
    assert_eq!(h.es(1, EsRequest::SetUid { title_id: TITLE }), Ok(EsReply::Done));

    assert_eq!(h.ios.kernel().uid_for_ppc(), SYSMENU_UID + 1);
    assert_eq!(h.ios.kernel().gid_for_ppc(), 0x3031);
    // The assignment is stable.
    assert_eq!(h.es(1, EsRequest::SetUid { title_id: TITLE }), Ok(EsReply::Done));
    assert_eq!(h.ios.kernel().uid_for_ppc(), SYSMENU_UID + 1);
}

#[test]
fn test_active_title_content_is_uid_bound() {
    let (tmd, ticket) = title();
    let (mut h, uid) = boot_active(&tmd, &ticket);
    h.open_es(2, uid + 1);

    let cfd = match h.es(1, EsRequest::OpenActiveTitleContent { content_index: 0 }) {
        Ok(EsReply::Fd(cfd)) => cfd,
        other => panic!("unexpected reply {other:?}"),
    };
    assert_eq!(h.es(1, EsRequest::ReadContent { cfd, size: 4 }), Ok(EsReply::Data(BOOT[..4].to_vec())));
    assert_eq!(
        h.es(1, EsRequest::SeekContent { cfd, offset: 10, mode: SeekMode::Set }),
        Ok(EsReply::Position(10))
    );
    assert_eq!(h.es(1, EsRequest::ReadContent { cfd, size: 64 }), Ok(EsReply::Data(BOOT[10..].to_vec())));

    assert_eq!(h.es(2, EsRequest::ReadContent { cfd, size: 4 }), Err(ReturnCode::EsAccessDenied));
    assert_eq!(h.es(2, EsRequest::CloseContent { cfd }), Err(ReturnCode::EsAccessDenied));
    assert_eq!(
        h.es(2, EsRequest::OpenActiveTitleContent { content_index: 0 }),
        Err(ReturnCode::EsAccessDenied)
    );
    assert_eq!(
        h.es(1, EsRequest::OpenActiveTitleContent { content_index: 9 }),
        Err(ReturnCode::EsInvalid)
    );

    assert_eq!(h.es(1, EsRequest::CloseContent { cfd }), Ok(EsReply::Done));
    assert_eq!(h.es(1, EsRequest::OpenActiveTitleContent { content_index: 1 }), Ok(EsReply::Fd(cfd)));
}

#[test]
fn test_content_table_exhaustion() {
    let (tmd, ticket) = title();
    let mut h = boot_with_title(&tmd, &ticket);
    h.open_es(1, 0);
    let open = EsRequest::OpenContent { title_id: TITLE, content_index: 1 };

    let mut cfds = Vec::new();
    for _ in 0..CONTENT_TABLE_SIZE {
        match h.es(1, open.clone()) {
            Ok(EsReply::Fd(cfd)) => cfds.push(cfd),
            other => panic!("unexpected reply {other:?}"),
        }
    }
    assert_eq!(cfds, (0..CONTENT_TABLE_SIZE as u32).collect::<Vec<_>>());
    assert_eq!(h.es(1, open.clone()), Err(ReturnCode::FsNoFreeHandle));

    assert_eq!(h.es(1, EsRequest::CloseContent { cfd: 5 }), Ok(EsReply::Done));
    assert_eq!(h.es(1, open.clone()), Ok(EsReply::Fd(5)));
    assert_eq!(h.es(1, open), Err(ReturnCode::FsNoFreeHandle));
    assert_eq!(h.es(1, EsRequest::ReadContent { cfd: 5, size: 64 }), Ok(EsReply::Data(EXTRA.to_vec())));
}

#[test]
fn test_stream_key_lifecycle() {
    let (tmd, ticket) = wfs_title(5);
    let (mut h, _) = boot_active(&tmd, &ticket);
    h.open_es(2, 0);
    let baseline = h.iosc.live_objects();
    let view = first_view(&mut h, WFS_TITLE);
    let tmd_bytes = tmd.build();

    let handle = match h.es(1, EsRequest::SetUpStreamKey { view: &view, tmd: &tmd_bytes }) {
        Ok(EsReply::Handle(handle)) => handle,
        other => panic!("unexpected reply {other:?}"),
    };
    assert_eq!(h.iosc.live_objects(), baseline + 1);
    assert_eq!(h.iosc.owner_of(handle), Some(1 << PID_PPCBOOT));
    assert_eq!(h.iosc.key_of(handle), Some(ticket.title_key.to_vec()));

    let plain = [0x42u8; 32];
    let iv = [0x01u8; 16];
    let (cipher, next_iv) = match h.es(1, EsRequest::Encrypt { key: handle, iv, data: &plain }) {
        Ok(EsReply::Crypted { data, iv }) => (data, iv),
        other => panic!("unexpected reply {other:?}"),
    };
    assert_eq!(cipher, cbc_encrypt(&ticket.title_key, &iv, &plain));
    assert_eq!(&next_iv[..], &cipher[16..]);
    assert_eq!(
        h.es(1, EsRequest::Decrypt { key: handle, iv, data: &cipher }),
        Ok(EsReply::Crypted { data: plain.to_vec(), iv: next_iv })
    );

    // The key belongs to the PPC; another caller cannot use it.
    assert_eq!(
        h.es(2, EsRequest::Encrypt { key: handle, iv, data: &plain }),
        Err(ReturnCode::IoscAccessDenied)
    );

    assert_eq!(h.es(1, EsRequest::DeleteStreamKey { handle }), Ok(EsReply::Done));
    assert_eq!(h.iosc.live_objects(), baseline);
    assert_eq!(h.es(1, EsRequest::DeleteStreamKey { handle }), Err(ReturnCode::IoscInvalid));
}

#[test]
fn test_stream_key_needs_wfs_title() {
    let (tmd, ticket) = wfs_title(5);
    let (mut h, _) = boot_active(&tmd, &ticket);
    let baseline = h.iosc.live_objects();
    let view = first_view(&mut h, WFS_TITLE);

    let mut plain = tmd.clone();
    plain.title_flags = 0x1;
    let plain = plain.build();
    assert_eq!(h.es(1, EsRequest::SetUpStreamKey { view: &view, tmd: &plain }), Err(ReturnCode::EsInvalid));
    assert_eq!(
        h.es(1, EsRequest::SetUpStreamKey { view: &view[..16], tmd: &tmd.build() }),
        Err(ReturnCode::EsInvalid)
    );
    assert_eq!(h.iosc.live_objects(), baseline);
}

#[test]
fn test_ticket_from_view() {
    let (tmd, ticket) = wfs_title(5);
    let (mut h, _) = boot_active(&tmd, &ticket);
    let view = first_view(&mut h, WFS_TITLE);

    assert_eq!(h.es(1, EsRequest::GetTicketSizeFromView { view: &view }), Ok(EsReply::Count(TICKET_SIZE as u32)));
    assert_eq!(h.es(1, EsRequest::GetV0TicketFromView { view: &view }), Ok(EsReply::Data(ticket.build())));
    assert_eq!(
        h.es(1, EsRequest::GetTicketFromView { view: &view, size: TICKET_SIZE - 1 }),
        Err(ReturnCode::EsInvalid)
    );
    let mut unknown = view.clone();
    unknown[4..12].copy_from_slice(&0x1234u64.to_be_bytes());
    assert_eq!(h.es(1, EsRequest::GetTicketSizeFromView { view: &unknown }), Err(ReturnCode::EsNoTicket));

    let (tmd, ticket) = wfs_title(0);
    let (mut h, _) = boot_active(&tmd, &ticket);
    let view = first_view(&mut h, WFS_TITLE);
    assert_eq!(h.es(1, EsRequest::GetTicketSizeFromView { view: &view }), Err(ReturnCode::EsAccessDenied));

    // Without an active title nothing may be exported.
    let (tmd, ticket) = wfs_title(5);
    let mut h = boot_with_title(&tmd, &ticket);
    h.open_es(1, 0);
    let view = first_view(&mut h, WFS_TITLE);
    assert_eq!(h.es(1, EsRequest::GetTicketSizeFromView { view: &view }), Err(ReturnCode::EsInvalid));
}

#[test]
fn test_config_file_selects_kernel() {
    let mut file = NamedTempFile::new().expect("temp file");
    writeln!(file, "[ios]\nversion = 80\ncore_running = false").expect("write config");
    let config = IosConfig::load(file.path()).expect("load config");

    let mut h = Harness::boot_with(MemFileSystem::new(), config, FakeIosc::new());

    assert_eq!(h.ios.kernel().version(), 80);
    assert_eq!(h.ios.timeline().pending(), 0);
    h.open_es(1, 0);
    assert_eq!(h.es(1, EsRequest::GetDeviceId), Ok(EsReply::DeviceId(es_host_tests::DEVICE_ID)));
}

#[test]
fn test_fs_ioctls_on_installed_title() {
    let tmd = TmdBuilder::new(TITLE).content(FixtureContent::new(0x20, 0, 1, BOOT));
    let mut h = boot_with_title(&tmd, &TicketBuilder::new(TITLE, 1));
    let fs = h.ios.kernel_mut().fs_mut();
    let mut ticks = Ticks::new();
    let dev = fs.open_device(0, 0, &mut ticks).expect("open /dev/fs");

    let content_dir = title_content_path(TITLE);
    assert_eq!(
        fs.ioctl(dev, FsRequest::ReadDirectory { path: &content_dir, max_entries: None }, &mut ticks),
        Ok(FsReply::Entries { names: vec![], count: 2 })
    );
    match fs.ioctl(dev, FsRequest::GetAttribute { path: &private_content_path(TITLE, 0x20) }, &mut ticks) {
        Ok(FsReply::Attribute(meta)) => assert!(meta.is_file),
        other => panic!("unexpected reply {other:?}"),
    }
    assert_eq!(fs.close(dev, &mut ticks), Ok(()));
    assert!(ticks.get() > 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_installed_content_reads_back(data in proptest::collection::vec(any::<u8>(), 1..2048)) {
        let tmd = TmdBuilder::new(TITLE).content(FixtureContent::new(0x30, 0, 1, &data));
        let mut h = boot_with_title(&tmd, &TicketBuilder::new(TITLE, 1));
        h.open_es(1, 0);

        let cfd = match h.es(1, EsRequest::OpenContent { title_id: TITLE, content_index: 0 }) {
            Ok(EsReply::Fd(cfd)) => cfd,
            other => panic!("unexpected reply {other:?}"),
        };
        prop_assert_eq!(h.es(1, EsRequest::ReadContent { cfd, size: data.len() + 16 }), Ok(EsReply::Data(data)));
        prop_assert_eq!(h.es(1, EsRequest::CloseContent { cfd }), Ok(EsReply::Done));
    }
}
