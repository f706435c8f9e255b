// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Peripheral drivers for the NXP S32K14x family: the eDMA engine, its
//! channel multiplexer, and the LPUART DMA adapter.

#![cfg_attr(not(test), no_std)]

pub mod chip;
pub mod config;
pub mod dma;
pub mod errorcode;
pub mod lpuart;
pub mod nvic;
pub mod pcc;
pub mod static_ref;

#[cfg(test)]
mod emu;

pub use crate::errorcode::ErrorCode;
pub use crate::static_ref::StaticRef;
