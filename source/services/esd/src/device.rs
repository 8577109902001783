// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! `/dev/es`: IPC contexts and ioctlv dispatch.

use core_timing::Ticks;
use iosc::Handle;
use ios_abi::{IpcResult, ReturnCode};
use log::{debug, error, info};
use nand_fs::{Gid, SeekMode, Uid};

use crate::kernel::Ios;
use crate::title_management::TitleImportExport;

/// Number of simultaneously open `/dev/es` handles.
pub const ES_CONTEXT_COUNT: usize = 3;

/// State of one open `/dev/es` handle.
#[derive(Debug, Default)]
pub struct EsContext {
    /// Slot in use.
    pub active: bool,
    /// Caller uid captured at open.
    pub uid: Uid,
    /// Caller gid captured at open.
    pub gid: Gid,
    /// IPC fd the context answers to.
    pub ipc_fd: u32,
    /// Import or export in progress on this handle.
    pub title_import_export: TitleImportExport,
}

/// Numeric ioctlv commands of `/dev/es`.
#[repr(u32)]
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EsIoctlv {
    AddTicket = 0x01,
    AddTitleStart = 0x02,
    AddContentStart = 0x03,
    AddContentData = 0x04,
    AddContentFinish = 0x05,
    AddTitleFinish = 0x06,
    GetDeviceId = 0x07,
    Launch = 0x08,
    OpenContent = 0x09,
    ReadContent = 0x0a,
    CloseContent = 0x0b,
    GetOwnedTitleCount = 0x0c,
    GetOwnedTitles = 0x0d,
    GetTitleCount = 0x0e,
    GetTitles = 0x0f,
    GetTitleContentsCount = 0x10,
    GetTitleContents = 0x11,
    GetViewCount = 0x12,
    GetViews = 0x13,
    GetTmdViewCount = 0x14,
    GetTmdViews = 0x15,
    GetConsumption = 0x16,
    DeleteTitle = 0x17,
    DeleteTicket = 0x18,
    DiGetTmdViewSize = 0x19,
    DiGetTmdView = 0x1a,
    DiGetTicketView = 0x1b,
    DiVerify = 0x1c,
    GetTitleDir = 0x1d,
    GetDeviceCert = 0x1e,
    ImportBoot = 0x1f,
    GetTitleId = 0x20,
    SetUid = 0x21,
    DeleteTitleContent = 0x22,
    SeekContent = 0x23,
    OpenActiveTitleContent = 0x24,
    LaunchBc = 0x25,
    ExportTitleInit = 0x26,
    ExportContentBegin = 0x27,
    ExportContentData = 0x28,
    ExportContentEnd = 0x29,
    ExportTitleDone = 0x2a,
    AddTmd = 0x2b,
    Encrypt = 0x2c,
    Decrypt = 0x2d,
    GetBoot2Version = 0x2e,
    AddTitleCancel = 0x2f,
    Sign = 0x30,
    VerifySign = 0x31,
    GetStoredContentCount = 0x32,
    GetStoredContents = 0x33,
    GetStoredTmdSize = 0x34,
    GetStoredTmd = 0x35,
    GetSharedContentCount = 0x36,
    GetSharedContents = 0x37,
    DeleteSharedContent = 0x38,
    DiGetTmdSize = 0x39,
    DiGetTmd = 0x3a,
    DiVerifyWithView = 0x3b,
    SetUpStreamKey = 0x3c,
    DeleteStreamKey = 0x3d,
    DeleteContent = 0x3e,
    Invalid3f = 0x3f,
    GetV0TicketFromView = 0x40,
    Unknown41 = 0x41,
    Unknown42 = 0x42,
    GetTicketSizeFromView = 0x43,
    GetTicketFromView = 0x44,
    CheckKoreaRegion = 0x45,
}

impl TryFrom<u32> for EsIoctlv {
    type Error = ReturnCode;

    fn try_from(raw: u32) -> IpcResult<Self> {
        use EsIoctlv::*;
        const TABLE: [EsIoctlv; 0x45] = [
            AddTicket, AddTitleStart, AddContentStart, AddContentData, AddContentFinish,
            AddTitleFinish, GetDeviceId, Launch, OpenContent, ReadContent, CloseContent,
            GetOwnedTitleCount, GetOwnedTitles, GetTitleCount, GetTitles, GetTitleContentsCount,
            GetTitleContents, GetViewCount, GetViews, GetTmdViewCount, GetTmdViews,
            GetConsumption, DeleteTitle, DeleteTicket, DiGetTmdViewSize, DiGetTmdView,
            DiGetTicketView, DiVerify, GetTitleDir, GetDeviceCert, ImportBoot, GetTitleId, SetUid,
            DeleteTitleContent, SeekContent, OpenActiveTitleContent, LaunchBc, ExportTitleInit,
            ExportContentBegin, ExportContentData, ExportContentEnd, ExportTitleDone, AddTmd,
            Encrypt, Decrypt, GetBoot2Version, AddTitleCancel, Sign, VerifySign,
            GetStoredContentCount, GetStoredContents, GetStoredTmdSize, GetStoredTmd,
            GetSharedContentCount, GetSharedContents, DeleteSharedContent, DiGetTmdSize, DiGetTmd,
            DiVerifyWithView, SetUpStreamKey, DeleteStreamKey, DeleteContent, Invalid3f,
            GetV0TicketFromView, Unknown41, Unknown42, GetTicketSizeFromView, GetTicketFromView,
            CheckKoreaRegion,
        ];
        raw.checked_sub(1)
            .and_then(|index| TABLE.get(index as usize).copied())
            .ok_or(ReturnCode::Invalid)
    }
}

/// Decoded ioctlv with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EsRequest<'a> {
    /// Install a ticket.
    AddTicket {
        /// Signed ticket.
        ticket: &'a [u8],
        /// Certificates for the ticket issuer.
        cert_chain: &'a [u8],
    },
    /// Stage a TMD without a ticket.
    AddTmd {
        /// Signed TMD.
        tmd: &'a [u8],
    },
    /// Begin a title import.
    AddTitleStart {
        /// Signed TMD.
        tmd: &'a [u8],
        /// Certificates for the TMD issuer.
        cert_chain: &'a [u8],
    },
    /// Begin importing one content.
    AddContentStart {
        /// Title being imported.
        title_id: u64,
        /// Content id from the TMD.
        content_id: u32,
    },
    /// Encrypted content payload.
    AddContentData {
        /// Fd from `AddContentStart`.
        content_fd: u32,
        /// Encrypted bytes.
        data: &'a [u8],
    },
    /// Verify and store the content.
    AddContentFinish {
        /// Fd from `AddContentStart`.
        content_fd: u32,
    },
    /// Commit the import.
    AddTitleFinish,
    /// Abandon the import.
    AddTitleCancel,
    /// Begin exporting a title.
    ExportTitleInit {
        /// Title to export.
        title_id: u64,
        /// Size of the caller's TMD buffer.
        tmd_size: usize,
    },
    /// Begin exporting one content.
    ExportContentBegin {
        /// Title being exported.
        title_id: u64,
        /// Content id from the TMD.
        content_id: u32,
    },
    /// Read encrypted content.
    ExportContentData {
        /// Fd from `ExportContentBegin`.
        content_fd: u32,
        /// Bytes wanted.
        size: usize,
    },
    /// Finish exporting a content.
    ExportContentEnd {
        /// Fd from `ExportContentBegin`.
        content_fd: u32,
    },
    /// Finish the export.
    ExportTitleDone,
    /// Console device id.
    GetDeviceId,
    /// Launch a title; on success no reply is sent.
    Launch {
        /// Title to launch.
        title_id: u64,
    },
    /// Launch the GameCube compatibility layer.
    LaunchBc,
    /// Open a content of an installed title.
    OpenContent {
        /// Title owning the content.
        title_id: u64,
        /// Content index.
        content_index: u16,
    },
    /// Open a content of the active title.
    OpenActiveTitleContent {
        /// Content index.
        content_index: u16,
    },
    /// Read from an opened content.
    ReadContent {
        /// Content fd.
        cfd: u32,
        /// Bytes wanted.
        size: usize,
    },
    /// Seek within an opened content.
    SeekContent {
        /// Content fd.
        cfd: u32,
        /// Offset.
        offset: u32,
        /// Origin.
        mode: SeekMode,
    },
    /// Close an opened content.
    CloseContent {
        /// Content fd.
        cfd: u32,
    },
    /// Number of titles with a ticket.
    GetOwnedTitleCount,
    /// Titles with a ticket.
    GetOwnedTitles {
        /// Maximum number of ids.
        max: usize,
    },
    /// Number of installed titles.
    GetTitleCount,
    /// Installed titles.
    GetTitles {
        /// Maximum number of ids.
        max: usize,
    },
    /// Number of contents present for an installed title.
    GetStoredContentsCount {
        /// Title id.
        title_id: u64,
    },
    /// Content ids present for an installed title.
    GetStoredContents {
        /// Title id.
        title_id: u64,
        /// Maximum number of ids.
        max: usize,
    },
    /// Number of contents of a caller TMD that are present.
    GetTmdStoredContentsCount {
        /// TMD bytes.
        tmd: &'a [u8],
    },
    /// Content ids of a caller TMD that are present.
    GetTmdStoredContents {
        /// TMD bytes.
        tmd: &'a [u8],
        /// Maximum number of ids.
        max: usize,
    },
    /// Number of shared contents.
    GetSharedContentsCount,
    /// Hashes of shared contents.
    GetSharedContents {
        /// Maximum number of hashes.
        max: usize,
    },
    /// Number of ticket views for a title.
    GetTicketViewCount {
        /// Title id.
        title_id: u64,
    },
    /// Ticket views for a title.
    GetTicketViews {
        /// Title id.
        title_id: u64,
        /// Maximum number of views.
        max: usize,
    },
    /// Size of an installed title's TMD view.
    GetTmdViewSize {
        /// Title id.
        title_id: u64,
    },
    /// TMD view of an installed title.
    GetTmdViews {
        /// Title id.
        title_id: u64,
        /// Caller buffer size.
        size: usize,
    },
    /// Always empty.
    GetConsumption {
        /// Title id.
        title_id: u64,
    },
    /// Remove a title.
    DeleteTitle {
        /// Title id.
        title_id: u64,
    },
    /// Remove one ticket record.
    DeleteTicket {
        /// Ticket view naming the record.
        view: &'a [u8],
    },
    /// Remove a title's private contents.
    DeleteTitleContent {
        /// Title id.
        title_id: u64,
    },
    /// Remove one private content.
    DeleteContent {
        /// Title id.
        title_id: u64,
        /// Content id.
        content_id: u32,
    },
    /// Remove a shared content.
    DeleteSharedContent {
        /// Content hash.
        sha1: [u8; 20],
    },
    /// Size of the active title's TMD view.
    DiGetTmdViewSize,
    /// Active title's TMD view.
    DiGetTmdView {
        /// Caller buffer size.
        size: usize,
    },
    /// View of the active title's ticket, or of a caller ticket.
    DiGetTicketView {
        /// Caller ticket; the active ticket when absent.
        ticket: Option<&'a [u8]>,
    },
    /// Size of the active title's TMD.
    DiGetTmdSize,
    /// Active title's TMD.
    DiGetTmd {
        /// Caller buffer size.
        size: usize,
    },
    /// Internal to DI; refused over IPC.
    DiVerify,
    /// Data directory of a title.
    GetTitleDirectory {
        /// Title id.
        title_id: u64,
    },
    /// Active title id.
    GetTitleId,
    /// Switch the PPC to a title's uid and gid.
    SetUid {
        /// Title id.
        title_id: u64,
    },
    /// Size of an installed TMD.
    GetStoredTmdSize {
        /// Title id.
        title_id: u64,
    },
    /// Installed TMD.
    GetStoredTmd {
        /// Title id.
        title_id: u64,
        /// Caller buffer size.
        size: usize,
    },
    /// AES encryption with an IOSC key.
    Encrypt {
        /// Key handle.
        key: Handle,
        /// Initial vector.
        iv: [u8; 16],
        /// Plaintext.
        data: &'a [u8],
    },
    /// AES decryption with an IOSC key.
    Decrypt {
        /// Key handle.
        key: Handle,
        /// Initial vector.
        iv: [u8; 16],
        /// Ciphertext.
        data: &'a [u8],
    },
    /// Derive a title key object for a WFS title.
    SetUpStreamKey {
        /// Ticket view.
        view: &'a [u8],
        /// TMD bytes.
        tmd: &'a [u8],
    },
    /// Drop a stream key.
    DeleteStreamKey {
        /// Key handle.
        handle: Handle,
    },
    /// Installed v0 ticket matching a view.
    GetV0TicketFromView {
        /// Ticket view.
        view: &'a [u8],
    },
    /// Size of the installed ticket matching a view.
    GetTicketSizeFromView {
        /// Ticket view.
        view: &'a [u8],
    },
    /// Installed ticket matching a view.
    GetTicketFromView {
        /// Ticket view.
        view: &'a [u8],
        /// Caller buffer size.
        size: usize,
    },
    /// A command this ES does not implement.
    Unsupported(EsIoctlv),
}

/// Reply payload of an ioctlv.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EsReply {
    /// No payload.
    Done,
    /// The launch went through; IOS acks from the new kernel instead.
    Launched,
    /// A count.
    Count(u32),
    /// A content or import fd.
    Fd(u32),
    /// A byte buffer.
    Data(Vec<u8>),
    /// Title ids.
    TitleIds(Vec<u64>),
    /// Content ids.
    ContentIds(Vec<u32>),
    /// Content hashes.
    Hashes(Vec<[u8; 20]>),
    /// Console device id.
    DeviceId(u32),
    /// A title id.
    TitleId(u64),
    /// New position within a content.
    Position(u32),
    /// An IOSC handle.
    Handle(Handle),
    /// A NAND path.
    Path(String),
    /// Output of an AES operation and the IV to continue with.
    Crypted {
        /// Output bytes.
        data: Vec<u8>,
        /// Chained IV.
        iv: [u8; 16],
    },
}

impl Ios {
    fn find_active_context(&self, fd: u32) -> Option<usize> {
        self.es.contexts.iter().position(|context| context.active && context.ipc_fd == fd)
    }

    /// Opens `/dev/es` for a caller.
    pub fn open_es(&mut self, uid: Uid, gid: Gid, ipc_fd: u32) -> IpcResult<()> {
        let context = self
            .es
            .contexts
            .iter_mut()
            .find(|context| !context.active)
            .ok_or(ReturnCode::EsFdExhausted)?;
        context.active = true;
        context.uid = uid;
        context.gid = gid;
        context.ipc_fd = ipc_fd;
        debug!("es: opened fd {ipc_fd} for uid {uid:#x}");
        Ok(())
    }

    /// Closes an ES handle. Any import or export in progress is abandoned.
    pub fn close_es(&mut self, fd: u32) -> IpcResult<()> {
        let index = self.find_active_context(fd).ok_or(ReturnCode::EsInvalid)?;
        let mut state = std::mem::take(&mut self.es.contexts[index]);
        state.title_import_export.reset(self.kernel.iosc.as_mut());
        info!("es: close fd {fd}");
        Ok(())
    }

    fn with_import_export<T>(
        &mut self,
        index: usize,
        op: impl FnOnce(&mut Self, &mut TitleImportExport) -> IpcResult<T>,
    ) -> IpcResult<T> {
        let mut state = std::mem::take(&mut self.es.contexts[index].title_import_export);
        let result = op(self, &mut state);
        if let Some(context) = self.es.contexts.get_mut(index).filter(|context| context.active) {
            context.title_import_export = state;
        }
        result
    }

    /// Executes an ioctlv on the ES handle `fd`.
    pub fn ioctlv(&mut self, fd: u32, request: EsRequest<'_>, ticks: &mut Ticks) -> IpcResult<EsReply> {
        let index = self.find_active_context(fd).ok_or(ReturnCode::EsInvalid)?;
        let uid = self.es.contexts[index].uid;
        debug!("es: ioctlv {request:?}");

        match request {
            EsRequest::AddTicket { ticket, cert_chain } => {
                self.import_ticket(ticket, cert_chain).map(|()| EsReply::Done)
            }
            EsRequest::AddTmd { tmd } => {
                self.with_import_export(index, |ios, ctx| ios.import_tmd(ctx, tmd)).map(|()| EsReply::Done)
            }
            EsRequest::AddTitleStart { tmd, cert_chain } => self
                .with_import_export(index, |ios, ctx| ios.import_title_init(ctx, tmd, cert_chain))
                .map(|()| EsReply::Done),
            EsRequest::AddContentStart { title_id, content_id } => self
                .with_import_export(index, |ios, ctx| ios.import_content_begin(ctx, title_id, content_id))
                .map(EsReply::Fd),
            EsRequest::AddContentData { content_fd, data } => self
                .with_import_export(index, |ios, ctx| ios.import_content_data(ctx, content_fd, data))
                .map(|()| EsReply::Done),
            EsRequest::AddContentFinish { content_fd } => self
                .with_import_export(index, |ios, ctx| ios.import_content_end(ctx, content_fd))
                .map(|()| EsReply::Done),
            EsRequest::AddTitleFinish => {
                self.with_import_export(index, |ios, ctx| ios.import_title_done(ctx)).map(|()| EsReply::Done)
            }
            EsRequest::AddTitleCancel => {
                self.with_import_export(index, |ios, ctx| ios.import_title_cancel(ctx)).map(|()| EsReply::Done)
            }
            EsRequest::ExportTitleInit { title_id, tmd_size } => self
                .with_import_export(index, |ios, ctx| ios.export_title_init(ctx, title_id, tmd_size, ticks))
                .map(EsReply::Data),
            EsRequest::ExportContentBegin { title_id, content_id } => self
                .with_import_export(index, |ios, ctx| ios.export_content_begin(ctx, title_id, content_id, ticks))
                .map(EsReply::Fd),
            EsRequest::ExportContentData { content_fd, size } => self
                .with_import_export(index, |ios, ctx| ios.export_content_data(ctx, content_fd, size, ticks))
                .map(EsReply::Data),
            EsRequest::ExportContentEnd { content_fd } => self
                .with_import_export(index, |ios, ctx| ios.export_content_end(ctx, content_fd, ticks))
                .map(|()| EsReply::Done),
            EsRequest::ExportTitleDone => {
                self.with_import_export(index, |ios, ctx| ios.export_title_done(ctx)).map(|()| EsReply::Done)
            }
            EsRequest::GetDeviceId => Ok(EsReply::DeviceId(self.device_id())),
            EsRequest::Launch { title_id } => self.launch(title_id).map(|()| EsReply::Launched),
            EsRequest::LaunchBc => self.launch_bc().map(|()| EsReply::Launched),
            EsRequest::OpenContent { title_id, content_index } => {
                self.open_content(title_id, content_index, uid, ticks).map(EsReply::Fd)
            }
            EsRequest::OpenActiveTitleContent { content_index } => {
                self.open_active_title_content(content_index, uid, ticks).map(EsReply::Fd)
            }
            EsRequest::ReadContent { cfd, size } => {
                let mut buf = vec![0u8; size];
                let read = self.es.content_table.read(&mut self.kernel.fs, cfd, uid, &mut buf, ticks)?;
                buf.truncate(read as usize);
                Ok(EsReply::Data(buf))
            }
            EsRequest::SeekContent { cfd, offset, mode } => self
                .es
                .content_table
                .seek(&mut self.kernel.fs, cfd, uid, offset, mode, ticks)
                .map(EsReply::Position),
            EsRequest::CloseContent { cfd } => {
                self.es.content_table.close(&mut self.kernel.fs, cfd, uid, ticks).map(|()| EsReply::Done)
            }
            EsRequest::GetOwnedTitleCount => Ok(EsReply::Count(self.titles_with_tickets().len() as u32)),
            EsRequest::GetOwnedTitles { max } => {
                Ok(EsReply::TitleIds(self.titles_with_tickets().into_iter().take(max).collect()))
            }
            EsRequest::GetTitleCount => Ok(EsReply::Count(self.installed_titles().len() as u32)),
            EsRequest::GetTitles { max } => {
                Ok(EsReply::TitleIds(self.installed_titles().into_iter().take(max).collect()))
            }
            EsRequest::GetStoredContentsCount { title_id } => {
                self.stored_contents(title_id, ticks).map(|ids| EsReply::Count(ids.len() as u32))
            }
            EsRequest::GetStoredContents { title_id, max } => self
                .stored_contents(title_id, ticks)
                .map(|ids| EsReply::ContentIds(ids.into_iter().take(max).collect())),
            EsRequest::GetTmdStoredContentsCount { tmd } => self.tmd_stored_contents_count(tmd).map(EsReply::Count),
            EsRequest::GetTmdStoredContents { tmd, max } => self
                .tmd_stored_contents(tmd)
                .map(|ids| EsReply::ContentIds(ids.into_iter().take(max).collect())),
            EsRequest::GetSharedContentsCount => Ok(EsReply::Count(self.shared_contents().len() as u32)),
            EsRequest::GetSharedContents { max } => {
                Ok(EsReply::Hashes(self.shared_contents().into_iter().take(max).collect()))
            }
            EsRequest::GetTicketViewCount { title_id } => self.ticket_view_count(title_id).map(EsReply::Count),
            EsRequest::GetTicketViews { title_id, max } => self.ticket_views(title_id, max).map(EsReply::Data),
            EsRequest::GetTmdViewSize { title_id } => self.tmd_view_size(title_id, ticks).map(EsReply::Count),
            EsRequest::GetTmdViews { title_id, size } => self.tmd_view(title_id, size, ticks).map(EsReply::Data),
            EsRequest::GetConsumption { title_id } => {
                info!("es: consumption for {title_id:016x}");
                Ok(EsReply::Count(0))
            }
            EsRequest::DeleteTitle { title_id } => self.delete_title(title_id).map(|()| EsReply::Done),
            EsRequest::DeleteTicket { view } => self.delete_ticket(view).map(|()| EsReply::Done),
            EsRequest::DeleteTitleContent { title_id } => {
                self.delete_title_content(title_id).map(|()| EsReply::Done)
            }
            EsRequest::DeleteContent { title_id, content_id } => {
                self.delete_content(title_id, content_id, ticks).map(|()| EsReply::Done)
            }
            EsRequest::DeleteSharedContent { sha1 } => self.delete_shared_content(&sha1).map(|()| EsReply::Done),
            EsRequest::DiGetTmdViewSize => self.di_tmd_view_size().map(EsReply::Count),
            EsRequest::DiGetTmdView { size } => self.di_tmd_view(size).map(EsReply::Data),
            EsRequest::DiGetTicketView { ticket } => self.di_ticket_view(ticket).map(EsReply::Data),
            EsRequest::DiGetTmdSize => self.di_tmd_size().map(EsReply::Count),
            EsRequest::DiGetTmd { size } => self.di_tmd(size).map(EsReply::Data),
            EsRequest::DiVerify => Err(ReturnCode::EsInvalid),
            EsRequest::GetTitleDirectory { title_id } => Ok(EsReply::Path(self.title_directory(title_id))),
            EsRequest::GetTitleId => self.title_id().map(EsReply::TitleId),
            EsRequest::SetUid { title_id } => self.set_uid(uid, title_id, ticks).map(|()| EsReply::Done),
            EsRequest::GetStoredTmdSize { title_id } => self.stored_tmd_size(title_id, ticks).map(EsReply::Count),
            EsRequest::GetStoredTmd { title_id, size } => self.stored_tmd(title_id, size, ticks).map(EsReply::Data),
            EsRequest::Encrypt { key, iv, data } => {
                self.encrypt(uid, key, iv, data).map(|(data, iv)| EsReply::Crypted { data, iv })
            }
            EsRequest::Decrypt { key, iv, data } => {
                self.decrypt(uid, key, iv, data).map(|(data, iv)| EsReply::Crypted { data, iv })
            }
            EsRequest::SetUpStreamKey { view, tmd } => self.set_up_stream_key(uid, view, tmd).map(EsReply::Handle),
            EsRequest::DeleteStreamKey { handle } => self.delete_stream_key(handle).map(|()| EsReply::Done),
            EsRequest::GetV0TicketFromView { view } => self.v0_ticket_from_view(view).map(EsReply::Data),
            EsRequest::GetTicketSizeFromView { view } => self.ticket_size_from_view(view).map(EsReply::Count),
            EsRequest::GetTicketFromView { view, size } => {
                self.ticket_from_view(view, size).map(EsReply::Data)
            }
            EsRequest::Unsupported(command) => {
                error!("es: unimplemented ioctlv {command:?} ({:#x})", command as u32);
                Err(ReturnCode::Invalid)
            }
        }
    }
}
