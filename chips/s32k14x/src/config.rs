// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Compile-time configuration for the chip crate.
//!
//! Options live in a typed `const` rather than behind `#[cfg]` attributes so
//! that every code path is type-checked regardless of which features a board
//! enables. Disabled branches fold away after constant propagation. This is
//! the only file in the crate that reads cargo features.

use crate::dma::DmaHardwareSource;

/// Iteration budgets for the bounded busy-waits.
///
/// The budgets count polls of the channel's DONE flag, not time. How long
/// one poll takes depends on the core clock, the optimization level, and the
/// `BusyWait` hook installed on the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollBudget {
    /// Polls allowed per byte of a blocking LPUART transfer.
    pub per_byte: u32,
    /// Polls allowed for a whole `Dma::mem_copy`.
    pub mem_copy: u32,
}

impl PollBudget {
    /// Budget the engine starts with.
    pub const DEFAULT: PollBudget = PollBudget {
        per_byte: 10_000,
        mem_copy: 1_000_000,
    };

    /// Polls allowed for a blocking transfer of `len` bytes.
    pub fn for_bytes(&self, len: usize) -> u32 {
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        self.per_byte.saturating_mul(len)
    }
}

/// Compile-time configuration options.
pub(crate) struct Config {
    /// Whether every configure, start, and completion is logged at `trace`
    /// level.
    ///
    /// Off by default: a trace line per transfer is far too much output for
    /// a UART that is itself moved by DMA.
    pub(crate) trace_transfers: bool,

    /// Polling budget installed by `Dma::new`.
    pub(crate) poll_budget: PollBudget,

    /// Always-on DMAMUX slot used for software-started memory copies.
    pub(crate) mem_copy_source: DmaHardwareSource,
}

/// The configuration used by this crate.
pub(crate) const CONFIG: Config = Config {
    trace_transfers: cfg!(feature = "trace_dma"),
    poll_budget: PollBudget::DEFAULT,
    mem_copy_source: DmaHardwareSource::AlwaysOn60,
};
