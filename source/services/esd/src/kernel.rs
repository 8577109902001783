// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! IOS kernel driver: owns the NAND, the crypto service, the timeline and
//! the host hooks, and rebuilds FS/ES on IOS reloads.

use core_timing::{Tick, Timeline};
use fsd::{FsCore, TimingProfile};
use ios_abi::titles::MIOS;
use iosc::Iosc;
use log::{error, info, warn};
use nand_fs::{FileSystem, Gid, Uid};

use crate::config::IosConfig;
use crate::es_core::{create_system_directories, es_boot_ticks, EsCore};
use crate::{KERNEL_GID, KERNEL_UID};

/// Whether the PPC is held in reset while IOS reloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HangPpc {
    /// Keep the PPC running.
    No,
    /// Stop the PPC until it is bootstrapped again.
    Yes,
}

/// Host side of an IOS reload or PPC launch.
pub trait PpcHost {
    /// Loads IOS `title_id`. `image` holds the boot content for titles that
    /// must be installed (MIOS). Returns false if the host cannot boot it.
    fn load_ios(&mut self, title_id: u64, hang_ppc: HangPpc, image: Option<&[u8]>) -> bool;

    /// Starts the PPC on the given boot content.
    fn bootstrap_ppc(&mut self, dol: &[u8]) -> bool;

    /// Shows a user-visible error.
    fn alert(&mut self, message: &str);
}

/// Continuations scheduled on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IosEvent {
    /// ES finished booting.
    EsFinishInit,
    /// Phase one of a PPC title launch: reload into the title's IOS.
    ReloadIosForPpcLaunch {
        /// IOS title to boot.
        ios_id: u64,
    },
    /// Phase two of a PPC title launch: start the PPC.
    BootstrapPpcForLaunch,
}

/// Resources shared by the running IOS modules.
pub struct Kernel {
    version: u32,
    pub(crate) fs: FsCore,
    pub(crate) iosc: Box<dyn Iosc>,
    ppc_uid: Uid,
    ppc_gid: Gid,
}

impl Kernel {
    /// Running IOS version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// FS core.
    pub fn fs(&self) -> &FsCore {
        &self.fs
    }

    /// Mutable FS core.
    pub fn fs_mut(&mut self) -> &mut FsCore {
        &mut self.fs
    }

    /// Crypto service.
    pub fn iosc(&self) -> &dyn Iosc {
        self.iosc.as_ref()
    }

    /// uid the PPC runs as.
    pub fn uid_for_ppc(&self) -> Uid {
        self.ppc_uid
    }

    /// gid the PPC runs as.
    pub fn gid_for_ppc(&self) -> Gid {
        self.ppc_gid
    }

    pub(crate) fn set_ppc_ids(&mut self, uid: Uid, gid: Gid) {
        self.ppc_uid = uid;
        self.ppc_gid = gid;
    }

    /// Untimed backend and crypto service, borrowed together.
    pub(crate) fn fs_and_iosc(&mut self) -> (&mut dyn FileSystem, &mut dyn Iosc) {
        (self.fs.backend_mut(), self.iosc.as_mut())
    }
}

/// The emulated IOS.
pub struct Ios {
    pub(crate) kernel: Kernel,
    pub(crate) es: EsCore,
    timeline: Timeline<IosEvent>,
    host: Box<dyn PpcHost>,
    config: IosConfig,
}

impl Ios {
    /// Boots IOS over `nand`. With `core_running` set, ES finishes its
    /// initialisation after its boot time; otherwise immediately.
    pub fn new(
        config: IosConfig,
        nand: Box<dyn FileSystem>,
        iosc: Box<dyn Iosc>,
        host: Box<dyn PpcHost>,
    ) -> Self {
        let version = config.ios.version;
        let fs = FsCore::new(nand, TimingProfile::for_ios(version, config.fs.simulate_timing));
        let kernel = Kernel { version, fs, iosc, ppc_uid: 0, ppc_gid: 0 };
        let mut ios =
            Self { kernel, es: EsCore::default(), timeline: Timeline::new(), host, config };
        info!("ios: booting IOS{version}");
        ios.start_es();
        ios
    }

    /// Kernel resources.
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Mutable kernel resources.
    pub fn kernel_mut(&mut self) -> &mut Kernel {
        &mut self.kernel
    }

    /// ES state.
    pub fn es(&self) -> &EsCore {
        &self.es
    }

    /// Pending continuations.
    pub fn timeline(&self) -> &Timeline<IosEvent> {
        &self.timeline
    }

    /// Whether continuations are deferred to the timeline.
    pub fn is_core_running(&self) -> bool {
        self.config.ios.core_running
    }

    /// Switches between deferred and immediate continuations.
    pub fn set_core_running(&mut self, running: bool) {
        self.config.ios.core_running = running;
    }

    /// Hands the NAND back, shutting IOS down.
    pub fn into_nand(self) -> Box<dyn FileSystem> {
        self.kernel.fs.into_backend()
    }

    pub(crate) fn host_mut(&mut self) -> &mut dyn PpcHost {
        self.host.as_mut()
    }

    pub(crate) fn schedule(&mut self, delay: Tick, event: IosEvent) {
        self.timeline.reschedule(delay, event);
    }

    /// Runs every continuation due within the next `ticks`.
    pub fn advance(&mut self, ticks: Tick) {
        let target = self.timeline.now().saturating_add(ticks);
        while let Some(event) = self.timeline.pop_due(target) {
            self.handle_event(event);
        }
        self.timeline.advance_to(target);
    }

    fn handle_event(&mut self, event: IosEvent) {
        info!("ios: {event:?} at tick {}", self.timeline.now());
        match event {
            IosEvent::EsFinishInit => self.finish_init(),
            IosEvent::ReloadIosForPpcLaunch { ios_id } => {
                if !self.launch_title(ios_id, HangPpc::Yes) {
                    error!("ios: reload into {ios_id:016x} for PPC launch failed");
                }
            }
            IosEvent::BootstrapPpcForLaunch => {
                if !self.bootstrap_ppc() {
                    error!("ios: PPC bootstrap failed");
                }
            }
        }
    }

    fn start_es(&mut self) {
        create_system_directories(self.kernel.fs.backend_mut());
        self.finish_all_stale_imports();
        if self.is_core_running() {
            self.schedule(es_boot_ticks(self.kernel.version), IosEvent::EsFinishInit);
        } else {
            self.finish_init();
        }
    }

    fn reload(&mut self, version: u32) {
        info!("ios: reloading into IOS{version}");
        self.kernel.version = version;
        self.kernel.set_ppc_ids(0, 0);
        self.kernel.fs.reset(TimingProfile::for_ios(version, self.config.fs.simulate_timing));
        self.es = EsCore::default();
        self.start_es();
    }

    /// Boots an IOS title, reading `boot_content_path` from the NAND when
    /// the title has to be installed.
    pub(crate) fn boot_ios(&mut self, title_id: u64, hang_ppc: HangPpc, boot_content_path: Option<&str>) -> bool {
        let image = match boot_content_path {
            Some(path) => match self.kernel.fs.backend_mut().read_file(KERNEL_UID, KERNEL_GID, path) {
                Ok(image) => Some(image),
                Err(err) => {
                    error!("ios: failed to read {path}: {err}");
                    return false;
                }
            },
            None => None,
        };
        if !self.host.load_ios(title_id, hang_ppc, image.as_deref()) {
            warn!("ios: host refused to load {title_id:016x}");
            return false;
        }
        if title_id == MIOS {
            info!("ios: MIOS loaded, PPC runs in GameCube mode");
            return true;
        }
        self.reload(title_id as u32);
        true
    }

    /// Starts the PPC on the boot content resolved by the last launch.
    pub(crate) fn bootstrap_ppc(&mut self) -> bool {
        let Some(path) = self.es.pending_ppc_boot_content_path.take() else {
            error!("ios: no boot content pending");
            self.clear_title_context();
            return false;
        };
        let started = match self.kernel.fs.backend_mut().read_file(KERNEL_UID, KERNEL_GID, &path) {
            Ok(dol) => {
                info!("ios: bootstrapping PPC from {path}");
                self.host.bootstrap_ppc(&dol)
            }
            Err(err) => {
                error!("ios: failed to read boot content {path}: {err}");
                false
            }
        };
        if !started {
            self.clear_title_context();
        }
        started
    }
}
