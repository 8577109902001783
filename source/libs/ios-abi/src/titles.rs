// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Well-known title ids and title-type classification.

/// System menu.
pub const SYSTEM_MENU: u64 = 0x0000_0001_0000_0002;
/// GameCube compatibility boot pseudo-title.
pub const BC: u64 = 0x0000_0001_0000_0100;
/// GameCube compatibility IOS.
pub const MIOS: u64 = 0x0000_0001_0000_0101;
/// Shop channel.
pub const SHOP: u64 = 0x0001_0002_4841_4241;
/// Korean shop channel.
pub const KOREAN_SHOP: u64 = 0x0001_0002_4841_424b;

/// Title type, taken from the upper 32 bits of a title id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleType {
    /// IOS, boot2 and the system menu.
    System,
    /// Disc games.
    Game,
    /// Downloadable channels.
    Channel,
    /// Channels shipped with the system.
    SystemChannel,
    /// Disc games installing a channel.
    GameWithChannel,
    /// Downloadable content.
    Dlc,
    /// Hidden channels.
    HiddenChannel,
}

impl TitleType {
    /// Upper title id word for this type.
    pub const fn code(self) -> u32 {
        match self {
            Self::System => 0x0000_0001,
            Self::Game => 0x0001_0000,
            Self::Channel => 0x0001_0001,
            Self::SystemChannel => 0x0001_0002,
            Self::GameWithChannel => 0x0001_0004,
            Self::Dlc => 0x0001_0005,
            Self::HiddenChannel => 0x0001_0008,
        }
    }

    /// Classifies `title_id`, `None` for unknown upper words.
    pub fn of(title_id: u64) -> Option<Self> {
        match (title_id >> 32) as u32 {
            0x0000_0001 => Some(Self::System),
            0x0001_0000 => Some(Self::Game),
            0x0001_0001 => Some(Self::Channel),
            0x0001_0002 => Some(Self::SystemChannel),
            0x0001_0004 => Some(Self::GameWithChannel),
            0x0001_0005 => Some(Self::Dlc),
            0x0001_0008 => Some(Self::HiddenChannel),
            _ => None,
        }
    }
}

/// Returns whether `title_id` has the given type.
pub fn is_title_type(title_id: u64, ty: TitleType) -> bool {
    (title_id >> 32) as u32 == ty.code()
}

/// IOS versions the kernel knows how to boot.
const EMULATED_IOS: &[u32] = &[
    4, 9, 10, 11, 12, 13, 14, 15, 16, 17, 20, 21, 22, 28, 30, 31, 33, 34, 35, 36, 37, 38, 40,
    41, 43, 45, 46, 48, 50, 51, 52, 53, 55, 56, 57, 58, 59, 60, 61, 62, 70, 80,
];

/// Returns whether `title_id` can be booted: every non-system title, the
/// system menu, BC/MIOS and the known IOS versions.
pub fn is_emulated(title_id: u64) -> bool {
    if title_id == SYSTEM_MENU || title_id == BC || title_id == MIOS {
        return true;
    }
    if !is_title_type(title_id, TitleType::System) {
        return true;
    }
    EMULATED_IOS.contains(&(title_id as u32))
}
