// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Named constants for NVIC ids

pub const DMA0: u32 = 0;
pub const DMA1: u32 = 1;
pub const DMA2: u32 = 2;
pub const DMA3: u32 = 3;
pub const DMA4: u32 = 4;
pub const DMA5: u32 = 5;
pub const DMA6: u32 = 6;
pub const DMA7: u32 = 7;
pub const DMA8: u32 = 8;
pub const DMA9: u32 = 9;
pub const DMA10: u32 = 10;
pub const DMA11: u32 = 11;
pub const DMA12: u32 = 12;
pub const DMA13: u32 = 13;
pub const DMA14: u32 = 14;
pub const DMA15: u32 = 15;
pub const DMA_ERROR: u32 = 16;
pub const LPUART0_RXTX: u32 = 31;
pub const LPUART1_RXTX: u32 = 33;
pub const LPUART2_RXTX: u32 = 35;
