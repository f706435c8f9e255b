// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Low Power UART, DMA side.
//!
//! Each LPUART instance owns one transmit and one receive DMAMUX slot. The
//! DMA transfers built here move one byte per peripheral request between a
//! buffer and the DATA register, and disable their own request once the
//! last byte has moved.

use core::cell::Cell;

use log::{debug, trace};
use tock_registers::fields::Field;
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

use crate::config::CONFIG;
use crate::dma::{self, BusyWait, ChannelConfig, Dma, DmaElement, DmaHardwareSource, Spin};
use crate::errorcode::ErrorCode;
use crate::pcc::{self, ClockInterface};
use crate::static_ref::StaticRef;

register_structs! {
    /// LP Universal asynchronous receiver transmitter
    pub(crate) LpuartRegisters {
        (0x00 => _reserved0),
        /// LPUART Global Register
        (0x08 => global: ReadWrite<u32, GLOBAL::Register>),
        (0x0C => _reserved1),
        /// LPUART Baud Rate Register
        (0x10 => pub(crate) baud: ReadWrite<u32, BAUD::Register>),
        /// LPUART Status Register
        (0x14 => pub(crate) stat: ReadWrite<u32, STAT::Register>),
        /// LPUART Control Register
        (0x18 => pub(crate) ctrl: ReadWrite<u32, CTRL::Register>),
        /// LPUART Data Register
        (0x1C => pub(crate) data: ReadWrite<u32>),
        (0x20 => _reserved2),
        /// LPUART FIFO Register
        (0x28 => fifo: ReadWrite<u32, FIFO::Register>),
        (0x2C => _reserved3),
        (0x30 => @END),
    }
}

register_bitfields![u32,
    GLOBAL [
        /// Software reset
        RST OFFSET(1) NUMBITS(1) []
    ],

    pub(crate) BAUD [
        /// 10-bit Mode select
        M10 OFFSET(29) NUMBITS(1) [],
        /// Oversampling Ratio, minus one
        OSR OFFSET(24) NUMBITS(5) [],
        /// Transmitter DMA Enable
        TDMAE OFFSET(23) NUMBITS(1) [],
        /// Receiver Full DMA Enable
        RDMAE OFFSET(21) NUMBITS(1) [],
        /// Both Edge Sampling
        BOTHEDGE OFFSET(17) NUMBITS(1) [],
        /// Stop Bit Number Select
        SBNS OFFSET(13) NUMBITS(1) [],
        /// Baud Rate Modulo Divisor
        SBR OFFSET(0) NUMBITS(13) []
    ],

    pub(crate) STAT [
        /// Transmit Data Register Empty Flag
        TDRE OFFSET(23) NUMBITS(1) [],
        /// Transmission Complete Flag
        TC OFFSET(22) NUMBITS(1) []
    ],

    pub(crate) CTRL [
        /// Transmitter Enable
        TE OFFSET(19) NUMBITS(1) [],
        /// Receiver Enable
        RE OFFSET(18) NUMBITS(1) [],
        /// 9-Bit or 8-Bit Mode Select
        M OFFSET(4) NUMBITS(1) [],
        /// Parity Enable
        PE OFFSET(1) NUMBITS(1) [],
        /// Parity Type
        PT OFFSET(0) NUMBITS(1) []
    ],

    FIFO [
        /// Transmit FIFO Flush
        TXFLUSH OFFSET(15) NUMBITS(1) [],
        /// Receive FIFO Flush
        RXFLUSH OFFSET(14) NUMBITS(1) [],
        /// Transmit FIFO Enable
        TXFE OFFSET(7) NUMBITS(1) [],
        /// Receive FIFO Enable
        RXFE OFFSET(3) NUMBITS(1) []
    ]
];

const LPUART0_BASE: StaticRef<LpuartRegisters> =
    unsafe { StaticRef::new(0x4006_A000 as *const LpuartRegisters) };
const LPUART1_BASE: StaticRef<LpuartRegisters> =
    unsafe { StaticRef::new(0x4006_B000 as *const LpuartRegisters) };
const LPUART2_BASE: StaticRef<LpuartRegisters> =
    unsafe { StaticRef::new(0x4006_C000 as *const LpuartRegisters) };

const MIN_OSR: u32 = 4;
const MAX_OSR: u32 = 32;
const MAX_SBR: u32 = (1 << 13) - 1;

/// Largest accepted baud rate error, in percent.
const MAX_BAUD_ERROR_PERCENT: u64 = 3;

/// Direction of a DMA transfer, seen from the UART.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Transmit,
    Receive,
}

/// DMAMUX slot for `direction` on LPUART `instance`.
pub const fn dma_source(instance: usize, direction: Direction) -> Option<DmaHardwareSource> {
    match (instance, direction) {
        (0, Direction::Receive) => Some(DmaHardwareSource::Lpuart0Receive),
        (0, Direction::Transmit) => Some(DmaHardwareSource::Lpuart0Transmit),
        (1, Direction::Receive) => Some(DmaHardwareSource::Lpuart1Receive),
        (1, Direction::Transmit) => Some(DmaHardwareSource::Lpuart1Transmit),
        (2, Direction::Receive) => Some(DmaHardwareSource::Lpuart2Receive),
        (2, Direction::Transmit) => Some(DmaHardwareSource::Lpuart2Transmit),
        _ => None,
    }
}

/// Pick the oversampling ratio and divisor closest to `baud_rate`.
///
/// Returns `(osr, sbr)` with `osr` as a ratio, not a register value.
fn baud_divisors(baud_rate: u32, clock_hz: u32) -> Result<(u32, u32), ErrorCode> {
    if baud_rate == 0 || clock_hz == 0 {
        return Err(ErrorCode::FAIL);
    }
    let baud_rate = u64::from(baud_rate);
    let clock_hz = u64::from(clock_hz);

    let mut best: Option<(u64, u32, u32)> = None;
    for osr in MIN_OSR..=MAX_OSR {
        let sbr = (clock_hz / (baud_rate * u64::from(osr))) as u32;
        for candidate in [sbr, sbr + 1] {
            if candidate == 0 || candidate > MAX_SBR {
                continue;
            }
            let actual = clock_hz / (u64::from(osr) * u64::from(candidate));
            let error = actual.abs_diff(baud_rate);
            if best.is_none_or(|(best_error, _, _)| error < best_error) {
                best = Some((error, osr, candidate));
            }
        }
    }

    match best {
        Some((error, osr, sbr)) if error * 100 <= baud_rate * MAX_BAUD_ERROR_PERCENT => {
            Ok((osr, sbr))
        }
        _ => Err(ErrorCode::FAIL),
    }
}

pub struct Lpuart<'a> {
    registers: StaticRef<LpuartRegisters>,
    clock: pcc::PeripheralClock<'a>,
    instance: usize,
    dma: Cell<Option<&'a Dma<'a>>>,
}

impl<'a> Lpuart<'a> {
    pub const fn new_lpuart0(pcc: &'a pcc::Pcc) -> Self {
        Lpuart::new(
            LPUART0_BASE,
            pcc::PeripheralClock::new(pcc, pcc::ClockGate::Lpuart0),
            0,
        )
    }

    pub const fn new_lpuart1(pcc: &'a pcc::Pcc) -> Self {
        Lpuart::new(
            LPUART1_BASE,
            pcc::PeripheralClock::new(pcc, pcc::ClockGate::Lpuart1),
            1,
        )
    }

    pub const fn new_lpuart2(pcc: &'a pcc::Pcc) -> Self {
        Lpuart::new(
            LPUART2_BASE,
            pcc::PeripheralClock::new(pcc, pcc::ClockGate::Lpuart2),
            2,
        )
    }

    pub(crate) const fn new(
        registers: StaticRef<LpuartRegisters>,
        clock: pcc::PeripheralClock<'a>,
        instance: usize,
    ) -> Lpuart<'a> {
        Lpuart {
            registers,
            clock,
            instance,
            dma: Cell::new(None),
        }
    }

    /// Set the DMA engine used for this UART's transfers.
    pub fn set_dma(&self, dma: &'a Dma<'a>) {
        self.dma.set(Some(dma));
    }

    pub fn instance(&self) -> usize {
        self.instance
    }

    pub fn is_enabled_clock(&self) -> bool {
        self.clock.is_enabled()
    }

    pub fn enable_clock(&self) {
        self.clock.enable();
    }

    pub fn disable_clock(&self) {
        self.clock.disable();
    }

    /// Configure 8N1 framing at `baud_rate`, given the frequency of the
    /// functional clock selected for this instance, and enable the
    /// transmitter and receiver.
    pub fn configure(&self, baud_rate: u32, clock_hz: u32) -> Result<(), ErrorCode> {
        let (osr, sbr) = baud_divisors(baud_rate, clock_hz)?;

        self.enable_clock();
        self.registers.global.modify(GLOBAL::RST::SET);
        self.registers.global.modify(GLOBAL::RST::CLEAR);

        // Baud settings may only change while TE and RE are clear.
        self.registers.ctrl.modify(CTRL::TE::CLEAR + CTRL::RE::CLEAR);
        self.registers.baud.modify(
            BAUD::OSR.val(osr - 1)
                + BAUD::SBR.val(sbr)
                + BAUD::BOTHEDGE.val((osr < 8) as u32)
                + BAUD::M10::CLEAR
                + BAUD::SBNS::CLEAR,
        );
        self.registers
            .ctrl
            .modify(CTRL::PE::CLEAR + CTRL::PT::CLEAR + CTRL::M::CLEAR);

        self.registers
            .fifo
            .modify(FIFO::TXFE::CLEAR + FIFO::RXFE::CLEAR);
        self.registers
            .fifo
            .modify(FIFO::TXFLUSH::SET + FIFO::RXFLUSH::SET);

        self.registers.ctrl.modify(CTRL::TE::SET + CTRL::RE::SET);
        debug!(
            "lpuart{}: {} baud (osr {}, sbr {})",
            self.instance, baud_rate, osr, sbr
        );
        Ok(())
    }

    /// Returns true if the transmitter is enabled.
    pub fn is_transmit_enabled(&self) -> bool {
        self.registers.ctrl.is_set(CTRL::TE)
    }

    /// Returns true if the receiver is enabled.
    pub fn is_receive_enabled(&self) -> bool {
        self.registers.ctrl.is_set(CTRL::RE)
    }

    /// Write one byte without DMA, for use by panic output.
    ///
    /// Each wait is bounded by `PollBudget::per_byte` polls of the attached
    /// engine, or of the built-in budget if no engine is attached.
    pub fn send_byte(&self, byte: u8) -> Result<(), ErrorCode> {
        self.poll_status(STAT::TDRE)?;
        self.registers.data.set(byte.into());
        self.poll_status(STAT::TC)
    }

    fn poll_status(&self, flag: Field<u32, STAT::Register>) -> Result<(), ErrorCode> {
        let dma = self.dma.get();
        let budget = dma.map_or(CONFIG.poll_budget, Dma::poll_budget);
        for _ in 0..budget.per_byte {
            if self.registers.stat.is_set(flag) {
                return Ok(());
            }
            match dma {
                Some(dma) => dma.relax(),
                None => Spin.relax(),
            }
        }
        Err(ErrorCode::TIMEOUT)
    }

    /// Bus address of the DATA register.
    pub(crate) fn data_register_address(&self) -> u32 {
        &self.registers.data as *const _ as u32
    }

    pub fn dma_source(&self, direction: Direction) -> Option<DmaHardwareSource> {
        dma_source(self.instance, direction)
    }

    fn enable_dma_requests(&self, channel: usize, direction: Direction) -> Result<(), ErrorCode> {
        if channel >= dma::NUM_CHANNELS {
            return Err(ErrorCode::FAIL);
        }
        let source = self.dma_source(direction).ok_or(ErrorCode::FAIL)?;
        match direction {
            Direction::Transmit => self.registers.baud.modify(BAUD::TDMAE::SET),
            Direction::Receive => self.registers.baud.modify(BAUD::RDMAE::SET),
        }
        if CONFIG.trace_transfers {
            trace!(
                "lpuart{}: {:?} requests on slot {} for channel {}",
                self.instance,
                direction,
                source.slot(),
                channel
            );
        }
        Ok(())
    }

    /// Make the transmitter request DMA service whenever DATA is empty.
    pub fn config_tx_dma(&self, channel: usize) -> Result<(), ErrorCode> {
        self.enable_dma_requests(channel, Direction::Transmit)
    }

    /// Make the receiver request DMA service whenever DATA is full.
    pub fn config_rx_dma(&self, channel: usize) -> Result<(), ErrorCode> {
        self.enable_dma_requests(channel, Direction::Receive)
    }

    /// Stop transmit DMA requests. The channel itself is left alone.
    pub fn disable_tx_dma(&self) {
        self.registers.baud.modify(BAUD::TDMAE::CLEAR);
    }

    /// Stop receive DMA requests. The channel itself is left alone.
    pub fn disable_rx_dma(&self) {
        self.registers.baud.modify(BAUD::RDMAE::CLEAR);
    }

    pub fn is_tx_dma_enabled(&self) -> bool {
        self.registers.baud.is_set(BAUD::TDMAE)
    }

    pub fn is_rx_dma_enabled(&self) -> bool {
        self.registers.baud.is_set(BAUD::RDMAE)
    }

    /// Program and arm `channel` to move `len` bytes between the buffer at
    /// `buffer_address` and DATA.
    fn start_transfer(
        &self,
        channel: usize,
        direction: Direction,
        buffer_address: u32,
        len: usize,
    ) -> Result<&'a Dma<'a>, ErrorCode> {
        let dma = self.dma.get().ok_or(ErrorCode::FAIL)?;
        dma.validate_channel(channel)?;
        let source = self.dma_source(direction).ok_or(ErrorCode::FAIL)?;
        let major_loop_count = dma::major_loop_count(len)?;

        let data = self.data_register_address();
        let (source_address, source_offset, destination_address, destination_offset) =
            match direction {
                Direction::Transmit => (buffer_address, 1, data, 0),
                Direction::Receive => (data, 0, buffer_address, 1),
            };
        let config = ChannelConfig {
            source_address,
            source_offset,
            destination_address,
            destination_offset,
            transfer_size: u8::TRANSFER_SIZE,
            minor_loop_bytes: u8::TRANSFER_SIZE.bytes(),
            major_loop_count,
            interrupt_on_completion: false,
            disable_on_completion: true,
            ..ChannelConfig::new(channel, source)
        };
        dma.configure_channel(&config)?;
        dma.start_channel(channel)?;
        Ok(dma)
    }

    /// Start sending `buffer` on `channel` and return immediately.
    ///
    /// # Safety
    ///
    /// The engine reads `buffer` after this returns. It must stay valid and
    /// unmodified until the channel is done or stopped.
    pub unsafe fn send_dma(&self, channel: usize, buffer: &[u8]) -> Result<(), ErrorCode> {
        self.start_transfer(
            channel,
            Direction::Transmit,
            buffer.as_ptr() as u32,
            buffer.len(),
        )
        .map(|_| ())
    }

    /// Start filling `buffer` from `channel` and return immediately.
    ///
    /// # Safety
    ///
    /// The engine writes `buffer` after this returns. It must stay valid and
    /// must not be accessed until the channel is done or stopped.
    pub unsafe fn receive_dma(&self, channel: usize, buffer: &mut [u8]) -> Result<(), ErrorCode> {
        self.start_transfer(
            channel,
            Direction::Receive,
            buffer.as_mut_ptr() as u32,
            buffer.len(),
        )
        .map(|_| ())
    }

    /// Send `buffer` and wait for the last byte to be handed to the UART.
    ///
    /// Waits at most `PollBudget::per_byte` polls per byte, then stops the
    /// channel and returns `TIMEOUT`.
    pub fn send_dma_blocking(&self, channel: usize, buffer: &[u8]) -> Result<(), ErrorCode> {
        let dma = self.start_transfer(
            channel,
            Direction::Transmit,
            buffer.as_ptr() as u32,
            buffer.len(),
        )?;
        dma.wait_for_done(channel, dma.poll_budget().for_bytes(buffer.len()))
    }

    /// Fill `buffer` from the receiver, with the same bound as
    /// [`Lpuart::send_dma_blocking`].
    pub fn receive_dma_blocking(&self, channel: usize, buffer: &mut [u8]) -> Result<(), ErrorCode> {
        let len = buffer.len();
        let dma = self.start_transfer(
            channel,
            Direction::Receive,
            buffer.as_mut_ptr() as u32,
            len,
        )?;
        dma.wait_for_done(channel, dma.poll_budget().for_bytes(len))
    }
}
