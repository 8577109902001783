// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Integration tests for title launches across IOS reloads
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 14 tests
//!
//! TEST_SCOPE:
//!   - Two-phase PPC launch, inline and through the timeline
//!   - IOS, BC and MIOS launches
//!   - Shop redirect with default credentials
//!   - Title context and PPC ids after a launch
//!   - Disc title activation
//!
//! TEST_SCENARIOS:
//!   - test_ppc_launch_inline(): reload, relaunch and bootstrap in one call
//!   - test_ppc_launch_on_timeline(): same flow driven by scheduled events
//!   - test_missing_title_alerts(): FsNotFound, alert, inactive context
//!   - test_missing_boot_index_clears_context(): boot index outside the TMD
//!   - test_unreadable_boot_content_clears_context(): inline bootstrap fails
//!   - test_scheduled_bootstrap_failure_clears_context(): same on the timeline
//!   - test_ios_launch_reloads_kernel(): IOS80 boot closes ES handles
//!   - test_bc_needs_mios_on_nand(): alert when MIOS is absent
//!   - test_bc_boots_installed_mios(): MIOS image handed to the host
//!   - test_shop_with_default_id_returns_to_menu(): redirect to the system menu
//!   - test_launch_of_unknown_ios_is_refused(): non-emulated IOS
//!   - test_di_verify_installs_tmd(): disc TMD, data dir ownership
//!   - test_di_verify_reuses_data_dir(): existing saves kept, ownership moved
//!   - test_di_verify_rejects_mismatch(): ticket for another title
//!
//! ADR: docs/adr/0001-ios-service-architecture.md

use es_formats::{TicketReader, TmdReader, MAX_TMD_SIZE, TICKET_VIEW_SIZE};
use es_host_tests::{
    install_cert_store, install_title, write_nand_file, FakeIosc, FixtureContent, Harness, TicketBuilder,
    TmdBuilder,
};
use esd::{es_boot_ticks, EsReply, EsRequest, HangPpc, IosConfig, IosEvent};
use ios_abi::paths::{private_content_path, title_data_path, tmd_file_name, LAUNCH_FILE, SPACE_FILE};
use ios_abi::titles::{MIOS, SHOP};
use ios_abi::{ReturnCode, FIRST_PPC_UID};
use nand_fs::{FileSystem, MemFileSystem};

const GAME: u64 = 0x0001_0000_5245_4c53;
const IOS58: u64 = 0x0000_0001_0000_003a;
const IOS80: u64 = 0x0000_0001_0000_0050;
const BOOT_DOL: &[u8] = b"\x00\x00\x01\x00boot image of the game";

fn game() -> (TmdBuilder, TicketBuilder) {
    let tmd = TmdBuilder::new(GAME)
        .content(FixtureContent::new(0, 0, 1, BOOT_DOL))
        .content(FixtureContent::new(1, 1, 1, b"banner"));
    (tmd, TicketBuilder::new(GAME, 0x1234))
}

fn nand_with_game() -> MemFileSystem {
    let mut nand = MemFileSystem::new();
    install_cert_store(&mut nand);
    let (tmd, ticket) = game();
    install_title(&mut nand, &tmd, &ticket);
    nand
}

#[test]
fn test_ppc_launch_inline() {
    let mut h = Harness::boot(nand_with_game());
    h.open_es(1, 0);

    assert_eq!(h.es(1, EsRequest::Launch { title_id: GAME }), Ok(EsReply::Launched));

    {
        let log = h.host.log();
        assert_eq!(log.loads, vec![(IOS58, HangPpc::Yes, None)]);
        assert_eq!(log.bootstraps, vec![BOOT_DOL.to_vec()]);
        assert!(log.alerts.is_empty());
    }
    assert_eq!(h.ios.kernel().version(), 58);
    assert_eq!(h.ios.es().title_context().title_id(), Some(GAME));
    // The system menu is seeded first.
    assert_eq!(h.ios.kernel().uid_for_ppc(), FIRST_PPC_UID + 1);
    assert_eq!(h.ios.kernel().gid_for_ppc(), 0x3031);
    assert!(!h.nand_exists(LAUNCH_FILE));
    let space = h.nand_file(SPACE_FILE).expect("space file");
    assert_eq!(space.len(), 8 + TICKET_VIEW_SIZE + MAX_TMD_SIZE);
    assert!(space.iter().all(|&b| b == 0));
}

#[test]
fn test_ppc_launch_on_timeline() {
    let config = IosConfig::default();
    assert!(config.ios.core_running);
    let mut h = Harness::boot_with(nand_with_game(), config, FakeIosc::new());
    assert!(h.ios.timeline().is_pending(&IosEvent::EsFinishInit));
    h.ios.advance(es_boot_ticks(58));
    assert_eq!(h.ios.timeline().pending(), 0);

    h.open_es(1, 0);
    assert_eq!(h.es(1, EsRequest::Launch { title_id: GAME }), Ok(EsReply::Launched));
    assert!(h.host.log().loads.is_empty());
    assert!(h.ios.timeline().is_pending(&IosEvent::ReloadIosForPpcLaunch { ios_id: IOS58 }));
    let launch_file = h.nand_file(LAUNCH_FILE).expect("launch file");
    assert_eq!(&launch_file[..8], &GAME.to_be_bytes());
    assert_eq!(&launch_file[8 + TICKET_VIEW_SIZE..], &game().0.build()[..]);

    // Reload, ES boot on the new kernel, then the PPC bootstrap.
    h.ios.advance(1_000_000_000);

    let log = h.host.log();
    assert_eq!(log.loads, vec![(IOS58, HangPpc::Yes, None)]);
    assert_eq!(log.bootstraps, vec![BOOT_DOL.to_vec()]);
    drop(log);
    assert_eq!(h.ios.timeline().pending(), 0);
    assert_eq!(h.ios.es().title_context().title_id(), Some(GAME));
    assert!(!h.nand_exists(LAUNCH_FILE));
}

#[test]
fn test_missing_title_alerts() {
    let mut nand = MemFileSystem::new();
    install_cert_store(&mut nand);
    let mut h = Harness::boot(nand);
    h.open_es(1, 0);

    assert_eq!(h.es(1, EsRequest::Launch { title_id: GAME }), Err(ReturnCode::FsNotFound));

    let log = h.host.log();
    assert_eq!(log.alerts.len(), 1);
    assert!(log.alerts[0].contains("0001000052454c53"));
    assert!(log.loads.is_empty());
    drop(log);
    assert!(!h.ios.es().title_context().active);
    assert_eq!(h.es(1, EsRequest::GetTitleId), Err(ReturnCode::EsInvalid));
}

fn assert_launch_left_no_title(h: &Harness) {
    assert!(!h.ios.es().title_context().active);
    assert!(h.host.log().bootstraps.is_empty());
    assert!(!h.nand_exists(LAUNCH_FILE));
}

#[test]
fn test_missing_boot_index_clears_context() {
    let mut nand = MemFileSystem::new();
    install_cert_store(&mut nand);
    let (mut tmd, ticket) = game();
    tmd.boot_index = 5;
    install_title(&mut nand, &tmd, &ticket);
    let mut h = Harness::boot(nand);
    h.open_es(1, 0);

    assert_eq!(h.es(1, EsRequest::Launch { title_id: GAME }), Err(ReturnCode::FsNotFound));

    assert_eq!(h.host.log().loads, vec![(IOS58, HangPpc::Yes, None)]);
    assert_launch_left_no_title(&h);
}

#[test]
fn test_unreadable_boot_content_clears_context() {
    let mut nand = nand_with_game();
    nand.delete(0, 0, &private_content_path(GAME, 0)).expect("remove boot content");
    let mut h = Harness::boot(nand);
    h.open_es(1, 0);

    assert_eq!(h.es(1, EsRequest::Launch { title_id: GAME }), Err(ReturnCode::FsNotFound));

    assert_launch_left_no_title(&h);
}

#[test]
fn test_scheduled_bootstrap_failure_clears_context() {
    let mut nand = nand_with_game();
    nand.delete(0, 0, &private_content_path(GAME, 0)).expect("remove boot content");
    let mut h = Harness::boot_with(nand, IosConfig::default(), FakeIosc::new());
    h.ios.advance(es_boot_ticks(58));
    h.open_es(1, 0);

    assert_eq!(h.es(1, EsRequest::Launch { title_id: GAME }), Ok(EsReply::Launched));
    h.ios.advance(1_000_000_000);

    assert_eq!(h.ios.timeline().pending(), 0);
    assert_launch_left_no_title(&h);
}

#[test]
fn test_ios_launch_reloads_kernel() {
    let mut h = Harness::boot(MemFileSystem::new());
    h.open_es(1, 0);

    assert_eq!(h.es(1, EsRequest::Launch { title_id: IOS80 }), Ok(EsReply::Launched));

    assert_eq!(h.host.log().loads, vec![(IOS80, HangPpc::No, None)]);
    assert_eq!(h.ios.kernel().version(), 80);
    // The reload dropped every ES handle.
    assert_eq!(h.es(1, EsRequest::GetDeviceId), Err(ReturnCode::EsInvalid));
    h.open_es(1, 0);
    assert_eq!(h.es(1, EsRequest::GetDeviceId), Ok(EsReply::DeviceId(es_host_tests::DEVICE_ID)));
}

#[test]
fn test_bc_needs_mios_on_nand() {
    let mut h = Harness::boot(MemFileSystem::new());
    h.open_es(1, 0);

    assert_eq!(h.es(1, EsRequest::LaunchBc), Err(ReturnCode::FsNotFound));

    let log = h.host.log();
    assert!(log.loads.is_empty());
    assert_eq!(log.alerts.len(), 1);
    assert!(log.alerts[0].contains("0000000100000101"));
}

#[test]
fn test_bc_boots_installed_mios() {
    let mut nand = MemFileSystem::new();
    let mios = TmdBuilder::new(MIOS).content(FixtureContent::new(7, 0, 1, b"mios image"));
    install_title(&mut nand, &mios, &TicketBuilder::new(MIOS, 1));
    let mut h = Harness::boot(nand);
    h.open_es(1, 0);

    assert_eq!(h.es(1, EsRequest::LaunchBc), Ok(EsReply::Launched));

    assert_eq!(h.host.log().loads, vec![(MIOS, HangPpc::No, Some(b"mios image".to_vec()))]);
    // MIOS hands the PPC to GameCube mode; the kernel does not reload.
    assert_eq!(h.ios.kernel().version(), 58);
}

#[test]
fn test_shop_with_default_id_returns_to_menu() {
    let iosc = FakeIosc::new();
    iosc.set_default_id(true);
    let mut config = IosConfig::default();
    config.ios.core_running = false;
    let mut h = Harness::boot_with(MemFileSystem::new(), config, iosc);
    h.open_es(1, 0);

    assert_eq!(h.es(1, EsRequest::Launch { title_id: SHOP }), Err(ReturnCode::FsNotFound));

    let log = h.host.log();
    assert_eq!(log.alerts.len(), 2);
    assert!(log.alerts[0].contains("Shop"));
    assert!(log.alerts[1].contains("Wii Menu"));
    assert!(log.loads.is_empty());
}

#[test]
fn test_launch_of_unknown_ios_is_refused() {
    let mut h = Harness::boot(MemFileSystem::new());
    h.open_es(1, 0);

    assert_eq!(h.es(1, EsRequest::Launch { title_id: 0x0000_0001_0000_00fe }), Err(ReturnCode::FsNotFound));
    assert!(h.host.log().loads.is_empty());
}

#[test]
fn test_di_verify_installs_tmd() {
    let mut nand = MemFileSystem::new();
    install_cert_store(&mut nand);
    let mut h = Harness::boot(nand);
    let (tmd, ticket) = game();
    let tmd = TmdReader::new(tmd.build());
    let ticket = TicketReader::new(ticket.build());

    assert_eq!(h.ios.di_verify(&tmd, &ticket), Ok(()));

    assert_eq!(h.nand_file(&tmd_file_name(GAME)).as_deref(), Some(tmd.bytes()));
    assert_eq!(h.ios.es().title_context().title_id(), Some(GAME));
    let data_dir = h.ios.kernel().fs().backend().get_metadata(0, 0, &title_data_path(GAME)).expect("data dir");
    assert_eq!(data_dir.uid, h.ios.kernel().uid_for_ppc());
    assert_eq!(data_dir.gid, 0x3031);

    h.open_es(1, 0);
    assert_eq!(h.es(1, EsRequest::GetTitleId), Ok(EsReply::TitleId(GAME)));
    assert_eq!(h.es(1, EsRequest::DiGetTmdSize), Ok(EsReply::Count(tmd.bytes().len() as u32)));
    assert_eq!(h.es(1, EsRequest::DiGetTmd { size: tmd.bytes().len() }), Ok(EsReply::Data(tmd.bytes().to_vec())));
    assert_eq!(h.es(1, EsRequest::DiGetTmd { size: 4 }), Err(ReturnCode::EsInvalid));
    assert_eq!(
        h.es(1, EsRequest::DiGetTmdViewSize),
        Ok(EsReply::Count(tmd.raw_view().len() as u32))
    );
    assert_eq!(
        h.es(1, EsRequest::DiGetTicketView { ticket: None }),
        Ok(EsReply::Data(ticket.raw_ticket_view(0)))
    );
}

#[test]
fn test_di_verify_reuses_data_dir() {
    let mut nand = MemFileSystem::new();
    install_cert_store(&mut nand);
    let save = format!("{}/banner.bin", title_data_path(GAME));
    write_nand_file(&mut nand, &save, b"save data");
    let mut h = Harness::boot(nand);
    let (tmd, ticket) = game();
    let tmd = TmdReader::new(tmd.build());
    let ticket = TicketReader::new(ticket.build());

    assert_eq!(h.ios.di_verify(&tmd, &ticket), Ok(()));
    assert_eq!(h.ios.di_verify(&tmd, &ticket), Ok(()));

    assert_eq!(h.nand_file(&save).as_deref(), Some(&b"save data"[..]));
    let data_dir = h.ios.kernel().fs().backend().get_metadata(0, 0, &title_data_path(GAME)).expect("data dir");
    assert_eq!(data_dir.uid, h.ios.kernel().uid_for_ppc());
    assert_eq!(h.ios.es().title_context().title_id(), Some(GAME));
}

#[test]
fn test_di_verify_rejects_mismatch() {
    let mut h = Harness::boot(MemFileSystem::new());
    let (tmd, _) = game();
    let tmd = TmdReader::new(tmd.build());
    let other = TicketReader::new(TicketBuilder::new(GAME + 1, 1).build());

    assert_eq!(h.ios.di_verify(&tmd, &other), Err(ReturnCode::EsInvalid));
    assert!(!h.ios.es().title_context().active);
    assert!(!h.nand_exists(&tmd_file_name(GAME)));
}
