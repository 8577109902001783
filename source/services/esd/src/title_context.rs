// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! The currently active title.

use es_formats::{TicketReader, TmdReader};
use log::error;

/// TMD and ticket of the running title; the authority for permission
/// checks that depend on what is running.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleContext {
    /// TMD of the active title.
    pub tmd: TmdReader,
    /// Ticket of the active title.
    pub ticket: TicketReader,
    /// Whether a title is active.
    pub active: bool,
}

impl TitleContext {
    /// Back to inactive.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Activates `tmd`/`ticket`; structurally invalid input leaves the
    /// context untouched and returns false.
    pub fn update(&mut self, tmd: &TmdReader, ticket: &TicketReader) -> bool {
        if !tmd.is_valid() || !ticket.is_valid() {
            error!("es: TMD or ticket is not valid, refusing to update title context");
            return false;
        }
        self.tmd = tmd.clone();
        self.ticket = ticket.clone();
        self.active = true;
        true
    }

    /// Title id of the active title.
    pub fn title_id(&self) -> Option<u64> {
        self.active.then(|| self.tmd.title_id())
    }
}
