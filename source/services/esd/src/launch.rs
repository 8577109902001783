// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Title launches, uid switching and disc title activation.
//!
//! A PPC launch is split across an IOS reload: the first call writes
//! `/sys/launch.sys` and reloads into the title's IOS, and the relaunch
//! from [`Ios::finish_init`] finds that file and bootstraps the PPC.

use core_timing::Ticks;
use es_formats::{TicketReader, TmdReader, MAX_TMD_SIZE, TICKET_VIEW_SIZE};
use ios_abi::paths::{temp_path_for, title_content_path, title_data_path, tmd_file_name, LAUNCH_FILE, SPACE_FILE};
use ios_abi::titles::{is_emulated, is_title_type, TitleType, BC, KOREAN_SHOP, MIOS, SHOP, SYSTEM_MENU};
use ios_abi::{IpcResult, ReturnCode};
use log::{error, info, warn};
use nand_fs::{FsError, Mode, Modes};

use crate::kernel::{HangPpc, Ios, IosEvent};
use crate::nand_utils::DATA_DIR_MODES;
use crate::shared_content_map::INTERNAL_MODES;
use crate::uid_map::UidMap;
use crate::{KERNEL_GID, KERNEL_UID};

const SPACE_FILE_SIZE: usize = 8 + TICKET_VIEW_SIZE + MAX_TMD_SIZE;
const DI_VERIFY_TMD_TEMP: &str = "/tmp/title.tmd";
const TMD_PARENT_MODES: Modes = Modes::new(Mode::ReadWrite, Mode::ReadWrite, Mode::Read);
const IOS_MIOS_VERSION: u32 = 0x101;
const WIIU_TRANSFER_TOOL: u64 = 0x0001_0001_4843_53ff;

impl Ios {
    /// Completes ES start-up; relaunches the title recorded in the launch
    /// file, if any.
    pub(crate) fn finish_init(&mut self) {
        let pending = match self.kernel.fs.backend_mut().read_file(KERNEL_UID, KERNEL_GID, LAUNCH_FILE) {
            Ok(data) => data.get(..8).and_then(|id| id.try_into().ok()).map(u64::from_be_bytes),
            Err(_) => None,
        };
        if let Some(title_id) = pending {
            info!("es: relaunching {title_id:016x} after IOS reload");
            self.launch_title(title_id, HangPpc::No);
        }
    }

    pub(crate) fn clear_title_context(&mut self) {
        self.es.title_context.clear();
        info!("es: title context changed: (none)");
    }

    /// Launches a title. Clears the title context first, whatever happens.
    pub(crate) fn launch_title(&mut self, title_id: u64, hang_ppc: HangPpc) -> bool {
        self.clear_title_context();
        info!("es: launching title {title_id:016x}");

        if (title_id == SHOP || title_id == KOREAN_SHOP) && self.kernel.iosc.is_using_default_id() {
            error!("es: refusing to launch the shop channel with default device credentials");
            self.host_mut().alert(
                "The Wii Shop Channel needs this console's own device credentials. \
                 Returning to the Wii Menu.",
            );
            return self.launch_title(SYSTEM_MENU, hang_ppc);
        }

        if is_title_type(title_id, TitleType::System) && title_id != SYSTEM_MENU {
            return self.launch_ios(title_id, hang_ppc);
        }
        self.launch_ppc_title(title_id)
    }

    fn launch_ios(&mut self, ios_id: u64, hang_ppc: HangPpc) -> bool {
        // BC only ever ends up in MIOS through boot2.
        if ios_id == BC {
            info!("es: BC, launching MIOS");
            return self.launch_ios(MIOS, hang_ppc);
        }

        if ios_id != MIOS {
            return self.boot_ios(ios_id, hang_ppc, None);
        }

        // MIOS is the only IOS whose binary is required.
        let mut ticks = Ticks::new();
        let tmd = self.find_installed_tmd(ios_id, &mut ticks);
        let ticket = self.find_signed_ticket(ios_id);
        let boot_content_path = if tmd.is_valid() && ticket.is_valid() {
            tmd.content(tmd.boot_index()).and_then(|content| self.content_path(ios_id, &content))
        } else {
            None
        };
        let booted = match boot_content_path {
            Some(path) => self.boot_ios(ios_id, hang_ppc, Some(&path)),
            None => false,
        };
        if !booted {
            error!("es: IOS {ios_id:016x} is missing from the NAND");
            let message = format!("Could not launch IOS {ios_id:016x} because it is missing from the NAND.");
            self.host_mut().alert(&message);
        }
        booted
    }

    fn launch_ppc_title(&mut self, title_id: u64) -> bool {
        let mut ticks = Ticks::new();
        let tmd = self.find_installed_tmd(title_id, &mut ticks);
        let ticket = self.find_signed_ticket(title_id);

        if !tmd.is_valid() || !ticket.is_valid() {
            let message = if title_id == SYSTEM_MENU {
                "Could not launch the Wii Menu because it is missing from the NAND.".to_owned()
            } else {
                format!("Could not launch title {title_id:016x} because it is missing from the NAND.")
            };
            error!("es: {message}");
            self.host_mut().alert(&message);
            return false;
        }

        // No launch file yet: reload into the title's IOS first, even when
        // it is the one already running.
        match self.kernel.fs.open(KERNEL_UID, KERNEL_GID, LAUNCH_FILE, Mode::Read, &mut ticks) {
            Err(_) => return self.begin_ppc_launch(&tmd, ticks),
            Ok(fd) => {
                if let Err(err) = self.kernel.fs.close(fd, &mut ticks) {
                    warn!("es: failed to close {LAUNCH_FILE}: {err}");
                }
            }
        }

        if let Err(err) = self.kernel.fs.delete_file(KERNEL_UID, KERNEL_GID, LAUNCH_FILE, &mut ticks) {
            warn!("es: failed to delete {LAUNCH_FILE}: {err}");
        }
        if let Err(err) = self.write_system_file(SPACE_FILE, &vec![0; SPACE_FILE_SIZE], &mut ticks) {
            warn!("es: failed to write {SPACE_FILE}: {err}");
        }

        let Some(content) = tmd.content(tmd.boot_index()) else {
            error!("es: {title_id:016x} has no boot content");
            return false;
        };
        let Some(path) = self.content_path(title_id, &content) else {
            error!("es: boot content {:08x} of {title_id:016x} is not on the NAND", content.id);
            return false;
        };

        if !self.es.title_context.update(&tmd, &ticket) {
            return false;
        }
        info!("es: title context changed: {title_id:016x}");

        if !self.update_uid_and_gid(&tmd) {
            self.clear_title_context();
            return false;
        }
        self.es.pending_ppc_boot_content_path = Some(path);

        if !self.is_core_running() {
            return self.bootstrap_ppc();
        }
        self.schedule(ticks.get(), IosEvent::BootstrapPpcForLaunch);
        true
    }

    fn begin_ppc_launch(&mut self, tmd: &TmdReader, mut ticks: Ticks) -> bool {
        if let Err(err) = self.write_launch_file(tmd, &mut ticks) {
            error!("es: failed to write {LAUNCH_FILE}: {err}");
            return false;
        }
        let ios_id = tmd.ios_id();
        if !self.is_core_running() {
            // The relaunch on the new kernel ran inline; it left the
            // context active only if the PPC was started.
            return self.launch_title(ios_id, HangPpc::Yes) && self.es.title_context.active;
        }
        self.schedule(ticks.get(), IosEvent::ReloadIosForPpcLaunch { ios_id });
        true
    }

    /// Title id, an empty ticket view, then the TMD.
    fn write_launch_file(&mut self, tmd: &TmdReader, ticks: &mut Ticks) -> IpcResult<()> {
        match self.kernel.fs.delete_file(KERNEL_UID, KERNEL_GID, SPACE_FILE, ticks) {
            Ok(()) | Err(FsError::NotFound) => {}
            Err(err) => warn!("es: failed to delete {SPACE_FILE}: {err}"),
        }
        let mut data = Vec::with_capacity(8 + TICKET_VIEW_SIZE + tmd.bytes().len());
        data.extend_from_slice(&tmd.title_id().to_be_bytes());
        data.resize(8 + TICKET_VIEW_SIZE, 0);
        data.extend_from_slice(tmd.bytes());
        self.write_system_file(LAUNCH_FILE, &data, ticks)
    }

    /// Writes a kernel-owned file through `/tmp`, charging FS time.
    fn write_system_file(&mut self, path: &str, data: &[u8], ticks: &mut Ticks) -> IpcResult<()> {
        let temp = temp_path_for(path);
        let fs = &mut self.kernel.fs;
        match fs.delete_file(KERNEL_UID, KERNEL_GID, &temp, ticks) {
            Ok(()) | Err(FsError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }
        fs.create_file(KERNEL_UID, KERNEL_GID, &temp, 0, INTERNAL_MODES, ticks)?;
        let fd = fs.open(KERNEL_UID, KERNEL_GID, &temp, Mode::Write, ticks)?;
        let written = fs.write(fd, data, ticks);
        fs.close(fd, ticks)?;
        if written? as usize != data.len() {
            return Err(ReturnCode::EsIo);
        }
        fs.rename_file(KERNEL_UID, KERNEL_GID, &temp, path, ticks)?;
        Ok(())
    }

    /// Switches the PPC to the uid of `tmd`'s title and its group.
    fn update_uid_and_gid(&mut self, tmd: &TmdReader) -> bool {
        let title_id = tmd.title_id();
        match UidMap::new(self.kernel.fs.backend_mut()).get_or_insert_uid_for_title(title_id) {
            Ok(uid) if uid != 0 => {
                self.kernel.set_ppc_ids(uid, tmd.group_id());
                true
            }
            _ => {
                error!("es: failed to get a uid for {title_id:016x}");
                false
            }
        }
    }

    fn check_allowed_to_set_uid(&mut self, caller_uid: u32) -> IpcResult<()> {
        let system_menu_uid = UidMap::new(self.kernel.fs.backend_mut())
            .get_or_insert_uid_for_title(SYSTEM_MENU)
            .map_err(|_| ReturnCode::EsShortRead)?;
        if caller_uid == system_menu_uid {
            return Ok(());
        }
        let tmd = &self.es.title_context.tmd;
        if self.kernel.version() == 62 && tmd.is_valid() && (tmd.title_id() | 0xff) == WIIU_TRANSFER_TOOL {
            return Ok(());
        }
        Err(ReturnCode::EsInvalid)
    }

    /// Makes the PPC run as `title_id`. Only the system menu (and the Wii U
    /// transfer tool on IOS62) may do this.
    pub fn set_uid(&mut self, caller_uid: u32, title_id: u64, ticks: &mut Ticks) -> IpcResult<()> {
        self.check_allowed_to_set_uid(caller_uid)
            .inspect_err(|err| error!("es: set uid permission check failed: {err}"))?;
        let tmd = self.find_installed_tmd(title_id, ticks);
        if !tmd.is_valid() {
            return Err(ReturnCode::FsNotFound);
        }
        if !self.update_uid_and_gid(&tmd) {
            return Err(ReturnCode::EsShortRead);
        }
        Ok(())
    }

    /// Title id of the active title.
    pub fn title_id(&self) -> IpcResult<u64> {
        self.es.title_context.title_id().ok_or(ReturnCode::EsInvalid)
    }

    /// Data directory of a title.
    pub fn title_directory(&self, title_id: u64) -> String {
        title_data_path(title_id)
    }

    /// IPC launch. On success IOS acks from the new kernel instead of
    /// replying.
    pub fn launch(&mut self, title_id: u64) -> IpcResult<()> {
        info!("es: launch {title_id:016x}");
        if !is_emulated(title_id) || !self.launch_title(title_id, HangPpc::No) {
            return Err(ReturnCode::FsNotFound);
        }
        Ok(())
    }

    /// IPC launch of BC, which ends up in MIOS.
    pub fn launch_bc(&mut self) -> IpcResult<()> {
        if self.kernel.version() == IOS_MIOS_VERSION {
            return Err(ReturnCode::EsInvalid);
        }
        if !self.launch_title(BC, HangPpc::No) {
            return Err(ReturnCode::FsNotFound);
        }
        Ok(())
    }

    /// Activates a disc title. The TMD and ticket are not signature
    /// checked, and the TMD is installed if the title has none yet.
    pub fn di_verify(&mut self, tmd: &TmdReader, ticket: &TicketReader) -> IpcResult<()> {
        self.clear_title_context();

        if !tmd.is_valid() || !ticket.is_valid() || tmd.title_id() != ticket.title_id() {
            return Err(ReturnCode::EsInvalid);
        }
        if !self.es.title_context.update(tmd, ticket) {
            return Err(ReturnCode::EsInvalid);
        }
        let title_id = tmd.title_id();
        info!("es: title context changed: {title_id:016x}");

        if !self.find_installed_tmd(title_id, &mut Ticks::new()).is_valid() {
            self.write_tmd_for_di_verify(tmd)
                .inspect_err(|err| error!("es: failed to write disc TMD to the NAND: {err}"))?;
        }

        if !self.update_uid_and_gid(tmd) {
            return Err(ReturnCode::EsShortRead);
        }

        let data_dir = title_data_path(title_id);
        let (uid, gid) = (self.kernel.uid_for_ppc(), self.kernel.gid_for_ppc());
        let fs = self.kernel.fs.backend_mut();
        // May exist already; only the ownership change has to succeed.
        match fs.create_directory(KERNEL_UID, KERNEL_GID, &data_dir, 0, DATA_DIR_MODES) {
            Ok(()) | Err(FsError::AlreadyExists) => {}
            Err(err) => warn!("es: failed to create {data_dir}: {err}"),
        }
        fs.set_metadata(KERNEL_UID, &data_dir, uid, gid, 0, DATA_DIR_MODES)?;
        Ok(())
    }

    fn write_tmd_for_di_verify(&mut self, tmd: &TmdReader) -> IpcResult<()> {
        let fs = self.kernel.fs.backend_mut();
        match fs.delete(KERNEL_UID, KERNEL_GID, DI_VERIFY_TMD_TEMP) {
            Ok(()) | Err(FsError::NotFound) => {}
            Err(err) => warn!("es: failed to delete {DI_VERIFY_TMD_TEMP}: {err}"),
        }
        fs.write_file(KERNEL_UID, KERNEL_GID, DI_VERIFY_TMD_TEMP, tmd.bytes(), INTERNAL_MODES)?;

        let tmd_dir = title_content_path(tmd.title_id());
        let tmd_path = tmd_file_name(tmd.title_id());
        fs.create_full_path(KERNEL_UID, KERNEL_GID, &tmd_path, 0, TMD_PARENT_MODES)?;
        if let Err(err) = fs.set_metadata(KERNEL_UID, &tmd_dir, KERNEL_UID, KERNEL_GID, 0, INTERNAL_MODES) {
            warn!("es: failed to set metadata of {tmd_dir}: {err}");
        }
        fs.rename(KERNEL_UID, KERNEL_GID, DI_VERIFY_TMD_TEMP, &tmd_path)?;
        Ok(())
    }
}
