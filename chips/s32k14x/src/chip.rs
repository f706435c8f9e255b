// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Peripheral set and interrupt dispatch.

use crate::dma::Dma;
use crate::lpuart::Lpuart;
use crate::nvic;
use crate::pcc::Pcc;

/// Dispatches NVIC interrupts to the drivers that own them.
pub trait InterruptService {
    /// Service `interrupt`. Returns `false` if no driver owns it.
    ///
    /// # Safety
    ///
    /// Must only be called from the interrupt's bottom half, with the
    /// peripheral set fully initialized.
    unsafe fn service_interrupt(&self, interrupt: u32) -> bool;
}

pub struct S32k14xDefaultPeripherals<'a> {
    pub pcc: &'a Pcc,
    pub dma: Dma<'a>,
    pub lpuart0: Lpuart<'a>,
    pub lpuart1: Lpuart<'a>,
    pub lpuart2: Lpuart<'a>,
}

impl<'a> S32k14xDefaultPeripherals<'a> {
    pub const fn new(pcc: &'a Pcc) -> Self {
        Self {
            pcc,
            dma: Dma::new(pcc),
            lpuart0: Lpuart::new_lpuart0(pcc),
            lpuart1: Lpuart::new_lpuart1(pcc),
            lpuart2: Lpuart::new_lpuart2(pcc),
        }
    }

    /// Point every UART at the DMA engine.
    pub fn setup_dma(&'a self) {
        self.lpuart0.set_dma(&self.dma);
        self.lpuart1.set_dma(&self.dma);
        self.lpuart2.set_dma(&self.dma);
    }
}

impl InterruptService for S32k14xDefaultPeripherals<'_> {
    unsafe fn service_interrupt(&self, interrupt: u32) -> bool {
        match interrupt {
            nvic::DMA0..=nvic::DMA15 => self
                .dma
                .handle_interrupt((interrupt - nvic::DMA0) as usize),
            nvic::DMA_ERROR => self.dma.handle_error_interrupt(),
            _ => {
                return false;
            }
        }
        true
    }
}
