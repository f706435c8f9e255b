// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Enhanced Direct Memory Access (eDMA) engine and DMA channel multiplexer.
//!
//! ## DMAMUX Channel Configuration
//!
//! | ENBL | TRIG | Function                                      |
//! |------|------|-----------------------------------------------|
//! |   0  |   X  | Channel disabled                              |
//! |   1  |   0  | Source routed straight to the channel         |
//! |   1  |   1  | Source gated by the channel's periodic trigger |
//!
//! Slots 60 through 63 are "always on": they have no peripheral behind them,
//! so a channel bound to one of them only runs when software sets the TCD
//! START bit. [`Dma::start_channel`] does that automatically.
//!
//! Implementation assumptions:
//!
//! - Minor loop mapping is disabled (CR\[EMLM\] = 0), so NBYTES is a plain
//!   32-bit byte count.
//! - Channel linking and scatter/gather are never enabled, so the major loop
//!   count is limited to 15 bits.
//! - Arbitration is round robin. Priorities are still written to DCHPRI so a
//!   board can switch to fixed priority without reconfiguring channels.
//!
//! Channel ownership is advisory. Nothing stops two drivers from using the
//! same channel index; the last configuration wins.

use core::cell::Cell;
use core::ops::Index;

use log::{debug, trace, warn};
use tock_registers::fields::FieldValue;
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};
use tock_registers::{register_bitfields, register_structs};

use crate::config::{PollBudget, CONFIG};
use crate::errorcode::ErrorCode;
use crate::pcc::{self, ClockInterface};
use crate::static_ref::StaticRef;

/// Number of DMA channels on the S32K14x.
pub const NUM_CHANNELS: usize = 16;

/// Highest channel arbitration priority.
pub const MAX_PRIORITY: u8 = 15;

/// Largest major loop count when channel linking is disabled.
pub const MAX_MAJOR_LOOP_COUNT: u16 = 0x7FFF;

register_structs! {
    /// DMA channel multiplexer.
    pub(crate) DmaMuxRegisters {
        /// Channel configuration registers, one per channel.
        (0x00 => pub(crate) chcfg: [ReadWrite<u8, ChannelConfiguration::Register>; 16]),
        (0x10 => @END),
    }
}

const DMA_MUX_BASE: StaticRef<DmaMuxRegisters> =
    unsafe { StaticRef::new(0x4002_1000 as *const DmaMuxRegisters) };

register_bitfields![u8,
    /// Routing of one request slot to one DMA channel.
    ///
    /// The source or trigger must only be changed while ENBL is clear.
    pub(crate) ChannelConfiguration [
        /// Channel enable
        ENBL OFFSET(7) NUMBITS(1) [],
        /// Periodic trigger enable
        TRIG OFFSET(6) NUMBITS(1) [],
        /// Request source slot
        SOURCE OFFSET(0) NUMBITS(6) []
    ]
];

/// One transfer control descriptor.
#[repr(C, align(32))]
pub(crate) struct TransferControlDescriptor {
    pub(crate) saddr: ReadWrite<u32>,
    pub(crate) soff: ReadWrite<u16>, // Signed number
    pub(crate) attr: ReadWrite<u16, TransferAttributes::Register>,
    pub(crate) nbytes: ReadWrite<u32>, // EMLM = 0
    pub(crate) slast: ReadWrite<u32>,  // Signed number
    pub(crate) daddr: ReadWrite<u32>,
    pub(crate) doff: ReadWrite<u16>, // Signed number
    pub(crate) citer: ReadWrite<u16>,
    pub(crate) dlast_sga: ReadWrite<u32>, // Signed number
    pub(crate) csr: ReadWrite<u16, ControlAndStatus::Register>,
    pub(crate) biter: ReadWrite<u16>,
}

impl TransferControlDescriptor {
    fn reset(&self) {
        self.saddr.set(0);
        self.soff.set(0);
        self.attr.set(0);
        self.nbytes.set(0);
        self.slast.set(0);
        self.daddr.set(0);
        self.doff.set(0);
        self.citer.set(0);
        self.dlast_sga.set(0);
        self.csr.set(0);
        self.biter.set(0);
    }
}

const _: () = assert!(core::mem::size_of::<TransferControlDescriptor>() == 32);

register_bitfields![u16,
    pub(crate) TransferAttributes [
        /// Source address modulo
        SMOD OFFSET(11) NUMBITS(5) [],
        /// Source data transfer size
        SSIZE OFFSET(8) NUMBITS(3) [],
        /// Destination address modulo
        DMOD OFFSET(3) NUMBITS(5) [],
        /// Destination data transfer size
        DSIZE OFFSET(0) NUMBITS(3) []
    ],

    pub(crate) ControlAndStatus [
        /// Bandwidth control
        BWC OFFSET(14) NUMBITS(2) [],
        /// Major loop link channel number
        MAJORLINKCH OFFSET(8) NUMBITS(4) [],
        /// Channel done.
        ///
        /// Set by hardware when the major loop count is exhausted. Software
        /// must clear it before the channel is restarted.
        DONE OFFSET(7) NUMBITS(1) [],
        /// Channel active
        ACTIVE OFFSET(6) NUMBITS(1) [],
        /// Enable channel-to-channel linking on major loop completion
        MAJORELINK OFFSET(5) NUMBITS(1) [],
        /// Enable scatter/gather
        ESG OFFSET(4) NUMBITS(1) [],
        /// Disable request.
        ///
        /// If set, hardware clears the channel's ERQ bit when the major loop
        /// completes.
        DREQ OFFSET(3) NUMBITS(1) [],
        /// Interrupt when the major count is half complete
        INTHALF OFFSET(2) NUMBITS(1) [],
        /// Interrupt when the major count is complete
        INTMAJOR OFFSET(1) NUMBITS(1) [],
        /// Channel start.
        ///
        /// Software request for service; cleared by hardware once the
        /// channel begins executing.
        START OFFSET(0) NUMBITS(1) []
    ]
];

/// DCHPRI registers, indexed by channel number.
///
/// The registers are laid out in big-endian byte order within each word,
/// so channel `n` does not live at byte `n`.
#[repr(transparent)]
pub(crate) struct ChannelPriorityRegisters([ReadWrite<u8, ChannelPriority::Register>; 16]);

impl Index<usize> for ChannelPriorityRegisters {
    type Output = ReadWrite<u8, ChannelPriority::Register>;

    fn index(&self, channel: usize) -> &ReadWrite<u8, ChannelPriority::Register> {
        // 3, 2, 1, 0, 7, 6, 5, 4, 11, 10, 9, 8, ...
        let idx = 4 * (channel / 4) + (3 - (channel % 4));
        &self.0[idx]
    }
}

register_structs! {
    /// eDMA controller registers.
    pub(crate) DmaRegisters {
        /// Control Register
        (0x000 => pub(crate) cr: ReadWrite<u32, Control::Register>),
        /// Error Status Register
        (0x004 => pub(crate) es: ReadOnly<u32, ErrorStatus::Register>),
        (0x008 => _reserved0),
        /// Enable Request Register
        (0x00C => pub(crate) erq: ReadWrite<u32>),
        (0x010 => _reserved1),
        /// Enable Error Interrupt Register
        (0x014 => pub(crate) eei: ReadWrite<u32>),
        /// Clear Enable Error Interrupt Register
        (0x018 => pub(crate) ceei: WriteOnly<u8, MemoryMappedChannel::Register>),
        /// Set Enable Error Interrupt Register
        (0x019 => pub(crate) seei: WriteOnly<u8, MemoryMappedChannel::Register>),
        /// Clear Enable Request Register
        (0x01A => pub(crate) cerq: WriteOnly<u8, MemoryMappedChannel::Register>),
        /// Set Enable Request Register
        (0x01B => pub(crate) serq: WriteOnly<u8, MemoryMappedChannel::Register>),
        /// Clear DONE Status Bit Register
        (0x01C => pub(crate) cdne: WriteOnly<u8, MemoryMappedChannel::Register>),
        /// Set START Bit Register
        (0x01D => pub(crate) ssrt: WriteOnly<u8, MemoryMappedChannel::Register>),
        /// Clear Error Register
        (0x01E => pub(crate) cerr: WriteOnly<u8, MemoryMappedChannel::Register>),
        /// Clear Interrupt Request Register
        (0x01F => pub(crate) cint: WriteOnly<u8, MemoryMappedChannel::Register>),
        (0x020 => _reserved2),
        /// Interrupt Request Register
        (0x024 => pub(crate) int: ReadWrite<u32>),
        (0x028 => _reserved3),
        /// Error Register
        (0x02C => pub(crate) err: ReadWrite<u32>),
        (0x030 => _reserved4),
        /// Hardware Request Status Register
        (0x034 => pub(crate) hrs: ReadOnly<u32>),
        (0x038 => _reserved5),
        /// Enable Asynchronous Request in Stop Register
        (0x044 => pub(crate) ears: ReadWrite<u32>),
        (0x048 => _reserved6),
        /// Channel Priority Registers
        (0x100 => pub(crate) dchpri: ChannelPriorityRegisters),
        (0x110 => _reserved7),
        /// Transfer Control Descriptors
        (0x1000 => pub(crate) tcd: [TransferControlDescriptor; 16]),
        (0x1200 => @END),
    }
}

register_bitfields![u8,
    pub(crate) ChannelPriority [
        /// Enable channel preemption
        ECP OFFSET(7) NUMBITS(1) [],
        /// Disable preempt ability
        DPA OFFSET(6) NUMBITS(1) [],
        /// Channel arbitration priority
        CHPRI OFFSET(0) NUMBITS(4) []
    ],
    /// Layout shared by CEEI, SEEI, CERQ, SERQ, CDNE, SSRT, CERR and CINT.
    pub(crate) MemoryMappedChannel [
        /// No operation; ignore the other fields
        NOP OFFSET(7) NUMBITS(1) [],
        /// Apply the operation to every channel
        ALL OFFSET(6) NUMBITS(1) [],
        /// Channel to act on
        CHANNEL OFFSET(0) NUMBITS(4) []
    ]
];

register_bitfields![u32,
    pub(crate) Control [
        /// DMA active status
        ACTIVE OFFSET(31) NUMBITS(1) [],
        /// Cancel transfer
        CX OFFSET(17) NUMBITS(1) [],
        /// Error cancel transfer
        ECX OFFSET(16) NUMBITS(1) [],
        /// Enable minor loop mapping
        EMLM OFFSET(7) NUMBITS(1) [],
        /// Continuous link mode
        CLM OFFSET(6) NUMBITS(1) [],
        /// Halt DMA operations.
        ///
        /// Stalls the start of new channels; executing channels may
        /// complete.
        HALT OFFSET(5) NUMBITS(1) [],
        /// Halt on error
        HOE OFFSET(4) NUMBITS(1) [],
        /// Enable round robin channel arbitration
        ERCA OFFSET(2) NUMBITS(1) [],
        /// Stall the start of new channels while the core is halted in debug
        EDBG OFFSET(1) NUMBITS(1) []
    ],
    pub(crate) ErrorStatus [
        /// At least one ERR bit is set
        VLD OFFSET(31) NUMBITS(1) [],
        /// Transfer cancelled
        ECX OFFSET(16) NUMBITS(1) [],
        /// Channel priority error
        CPE OFFSET(14) NUMBITS(1) [],
        /// Channel of the last recorded error
        ERRCHN OFFSET(8) NUMBITS(4) [],
        /// Source address error
        SAE OFFSET(7) NUMBITS(1) [],
        /// Source offset error
        SOE OFFSET(6) NUMBITS(1) [],
        /// Destination address error
        DAE OFFSET(5) NUMBITS(1) [],
        /// Destination offset error
        DOE OFFSET(4) NUMBITS(1) [],
        /// NBYTES/CITER configuration error
        NCE OFFSET(3) NUMBITS(1) [],
        /// Scatter/gather configuration error
        SGE OFFSET(2) NUMBITS(1) [],
        /// Source bus error
        SBE OFFSET(1) NUMBITS(1) [],
        /// Destination bus error
        DBE OFFSET(0) NUMBITS(1) []
    ]
];

const DMA_BASE: StaticRef<DmaRegisters> =
    unsafe { StaticRef::new(0x4000_8000 as *const DmaRegisters) };

/// DMAMUX request slots.
///
/// Peripheral slots follow the "DMA request mapping" table of the S32K14x
/// reference manual. Add peripherals here as drivers gain DMA support.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DmaHardwareSource {
    Lpuart0Receive = 2,
    Lpuart0Transmit = 3,
    Lpuart1Receive = 4,
    Lpuart1Transmit = 5,
    Lpuart2Receive = 6,
    Lpuart2Transmit = 7,
    AlwaysOn60 = 60,
    AlwaysOn61 = 61,
    AlwaysOn62 = 62,
    AlwaysOn63 = 63,
}

impl DmaHardwareSource {
    /// First always-on slot.
    pub const ALWAYS_ON_THRESHOLD: u8 = 60;

    /// The DMAMUX slot number.
    pub const fn slot(self) -> u8 {
        self as u8
    }

    /// Returns `true` if the slot has no peripheral behind it.
    pub const fn is_always_on(self) -> bool {
        Self::is_always_on_slot(self.slot())
    }

    pub const fn is_always_on_slot(slot: u8) -> bool {
        slot >= Self::ALWAYS_ON_THRESHOLD
    }
}

/// Size of one read or write issued by the engine.
///
/// The discriminant is the 3-bit SSIZE/DSIZE code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum TransferSize {
    Bits8 = 0,
    Bits16 = 1,
    Bits32 = 2,
    Bytes16 = 4,
    Bytes32 = 5,
}

impl TransferSize {
    /// Number of bytes moved per read/write.
    pub const fn bytes(self) -> u32 {
        match self {
            TransferSize::Bits8 => 1,
            TransferSize::Bits16 => 2,
            TransferSize::Bits32 => 4,
            TransferSize::Bytes16 => 16,
            TransferSize::Bytes32 => 32,
        }
    }

    const fn code(self) -> u16 {
        self as u16
    }
}

/// A type that can be moved by the engine in a single read/write.
///
/// This trait is sealed; it cannot be implemented outside this crate.
pub trait DmaElement: private::Sealed {
    const TRANSFER_SIZE: TransferSize;
}

mod private {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
}

impl DmaElement for u8 {
    const TRANSFER_SIZE: TransferSize = TransferSize::Bits8;
}

impl DmaElement for u16 {
    const TRANSFER_SIZE: TransferSize = TransferSize::Bits16;
}

impl DmaElement for u32 {
    const TRANSFER_SIZE: TransferSize = TransferSize::Bits32;
}

/// Converts an element count into a major loop count.
pub(crate) fn major_loop_count(len: usize) -> Result<u16, ErrorCode> {
    match u16::try_from(len) {
        Ok(count) if count > 0 && count <= MAX_MAJOR_LOOP_COUNT => Ok(count),
        _ => Err(ErrorCode::FAIL),
    }
}

/// Everything needed to program one channel for one transfer.
///
/// Addresses are bus addresses. The same `transfer_size` is used for the
/// source and the destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    pub channel: usize,
    /// DMAMUX slot that paces the transfer.
    pub source: DmaHardwareSource,
    /// Arbitration priority, 0 (lowest) to 15.
    pub priority: u8,
    pub source_address: u32,
    /// Added to the source address after each read.
    pub source_offset: i16,
    pub destination_address: u32,
    /// Added to the destination address after each write.
    pub destination_offset: i16,
    pub transfer_size: TransferSize,
    /// Bytes moved per service request.
    pub minor_loop_bytes: u32,
    /// Service requests per transfer.
    pub major_loop_count: u16,
    /// Added to the source address once the major loop completes.
    pub source_last_adjustment: i32,
    /// Added to the destination address once the major loop completes.
    pub destination_last_adjustment: i32,
    pub interrupt_on_completion: bool,
    /// Clear the channel's request enable when the major loop completes.
    pub disable_on_completion: bool,
}

impl ChannelConfig {
    /// A single-byte, single-iteration transfer between two fixed
    /// addresses of zero. Meant to be completed with struct update syntax.
    pub const fn new(channel: usize, source: DmaHardwareSource) -> Self {
        ChannelConfig {
            channel,
            source,
            priority: 0,
            source_address: 0,
            source_offset: 0,
            destination_address: 0,
            destination_offset: 0,
            transfer_size: TransferSize::Bits8,
            minor_loop_bytes: 1,
            major_loop_count: 1,
            source_last_adjustment: 0,
            destination_last_adjustment: 0,
            interrupt_on_completion: false,
            disable_on_completion: true,
        }
    }
}

/// A type that responds to DMA completion events.
///
/// The implementing object is the context of the registration: whatever
/// state the client needs is reachable through `self`.
pub trait DmaClient {
    /// Called from the DMA interrupt once `channel` finished its major loop
    /// (`Ok`), or stopped on a transfer error (`Err(ErrorCode::FAIL)`).
    fn transfer_complete(&self, channel: usize, result: Result<(), ErrorCode>);
}

/// Hook run on every iteration of a bounded completion wait.
pub trait BusyWait {
    fn relax(&self);
}

/// A `BusyWait` that only hints the core that it is spinning.
pub struct Spin;

impl BusyWait for Spin {
    fn relax(&self) {
        core::hint::spin_loop();
    }
}

/// Register-level handle to one DMA channel.
struct DmaChannel<'a> {
    base: StaticRef<DmaRegisters>,
    mux: StaticRef<DmaMuxRegisters>,
    channel: usize,
    client: Cell<Option<&'a dyn DmaClient>>,
}

impl<'a> DmaChannel<'a> {
    const fn new(
        base: StaticRef<DmaRegisters>,
        mux: StaticRef<DmaMuxRegisters>,
        channel: usize,
    ) -> Self {
        DmaChannel {
            base,
            mux,
            channel,
            client: Cell::new(None),
        }
    }

    fn tcd(&self) -> &TransferControlDescriptor {
        &self.base.tcd[self.channel]
    }

    fn mask(&self) -> u32 {
        1 << self.channel
    }

    fn channel_number(&self) -> u8 {
        self.channel as u8
    }

    /// Return the channel to its reset state. The caller clears the
    /// request enables.
    fn reset(&self) {
        self.mux.chcfg[self.channel].set(0);
        self.tcd().reset();
        self.client.set(None);
    }

    /// Bind `source` to this channel and enable the binding.
    fn route(&self, source: DmaHardwareSource) {
        let chcfg = &self.mux.chcfg[self.channel];
        chcfg.set(0);
        chcfg.write(
            ChannelConfiguration::ENBL::SET + ChannelConfiguration::SOURCE.val(source.slot()),
        );
    }

    fn is_routed_always_on(&self) -> bool {
        let slot = self.mux.chcfg[self.channel].read(ChannelConfiguration::SOURCE);
        DmaHardwareSource::is_always_on_slot(slot)
    }

    /// Stop honoring service requests. A minor loop already granted by the
    /// engine still runs to completion.
    fn stop(&self) {
        self.disable_request();
        self.mux.chcfg[self.channel].modify(ChannelConfiguration::ENBL::CLEAR);
    }

    fn command(&self) -> FieldValue<u8, MemoryMappedChannel::Register> {
        MemoryMappedChannel::CHANNEL.val(self.channel_number())
    }

    // ERQ and CSR are also updated by the engine, so they are only changed
    // through the byte-wide command registers.
    fn enable_request(&self) {
        self.base.serq.write(self.command());
    }

    fn disable_request(&self) {
        self.base.cerq.write(self.command());
    }

    fn start(&self) {
        self.base.ssrt.write(self.command());
    }

    fn is_done(&self) -> bool {
        self.tcd().csr.is_set(ControlAndStatus::DONE)
    }

    fn clear_done(&self) {
        self.base.cdne.write(self.command());
    }

    fn is_active(&self) -> bool {
        self.tcd().csr.is_set(ControlAndStatus::ACTIVE)
    }

    fn clear_interrupt(&self) {
        self.base.cint.write(self.command());
    }

    fn is_error(&self) -> bool {
        self.base.err.get() & self.mask() != 0
    }

    fn clear_error(&self) {
        self.base.cerr.write(self.command());
    }

    fn is_hardware_signaling(&self) -> bool {
        self.base.hrs.get() & self.mask() != 0
    }

    fn set_error_interrupt(&self, enable: bool) {
        if enable {
            self.base.seei.write(self.command());
        } else {
            self.base.ceei.write(self.command());
        }
    }

    fn priority(&self) -> u8 {
        self.base.dchpri[self.channel].read(ChannelPriority::CHPRI)
    }

    fn set_priority(&self, priority: u8) {
        self.base.dchpri[self.channel].modify(ChannelPriority::CHPRI.val(priority));
    }

    /// Zero the TCD, then program it from `config`. CITER and BITER get the
    /// same count.
    fn write_descriptor(&self, config: &ChannelConfig) {
        let tcd = self.tcd();
        let size = config.transfer_size.code();
        tcd.reset();
        tcd.saddr.set(config.source_address);
        tcd.soff.set(config.source_offset as u16);
        tcd.attr
            .write(TransferAttributes::SSIZE.val(size) + TransferAttributes::DSIZE.val(size));
        tcd.nbytes.set(config.minor_loop_bytes);
        tcd.slast.set(config.source_last_adjustment as u32);
        tcd.daddr.set(config.destination_address);
        tcd.doff.set(config.destination_offset as u16);
        tcd.citer.set(config.major_loop_count);
        tcd.biter.set(config.major_loop_count);
        tcd.dlast_sga.set(config.destination_last_adjustment as u32);
        tcd.csr.write(
            ControlAndStatus::INTMAJOR.val(config.interrupt_on_completion as u16)
                + ControlAndStatus::DREQ.val(config.disable_on_completion as u16),
        );
    }
}

/// The eDMA controller and its sixteen channels.
pub struct Dma<'a> {
    channels: [DmaChannel<'a>; NUM_CHANNELS],
    registers: StaticRef<DmaRegisters>,
    clock_gate: pcc::PeripheralClock<'a>,
    mux_clock_gate: pcc::PeripheralClock<'a>,
    initialized: Cell<bool>,
    poll_budget: Cell<PollBudget>,
    busy_wait: Cell<Option<&'a dyn BusyWait>>,
}

impl<'a> Dma<'a> {
    pub const fn new(pcc: &'a pcc::Pcc) -> Self {
        Dma::with_registers(DMA_BASE, DMA_MUX_BASE, pcc)
    }

    pub(crate) const fn with_registers(
        base: StaticRef<DmaRegisters>,
        mux: StaticRef<DmaMuxRegisters>,
        pcc: &'a pcc::Pcc,
    ) -> Self {
        Dma {
            channels: [
                DmaChannel::new(base, mux, 0),
                DmaChannel::new(base, mux, 1),
                DmaChannel::new(base, mux, 2),
                DmaChannel::new(base, mux, 3),
                DmaChannel::new(base, mux, 4),
                DmaChannel::new(base, mux, 5),
                DmaChannel::new(base, mux, 6),
                DmaChannel::new(base, mux, 7),
                DmaChannel::new(base, mux, 8),
                DmaChannel::new(base, mux, 9),
                DmaChannel::new(base, mux, 10),
                DmaChannel::new(base, mux, 11),
                DmaChannel::new(base, mux, 12),
                DmaChannel::new(base, mux, 13),
                DmaChannel::new(base, mux, 14),
                DmaChannel::new(base, mux, 15),
            ],
            registers: base,
            clock_gate: pcc::PeripheralClock::new(pcc, pcc::ClockGate::Dma),
            mux_clock_gate: pcc::PeripheralClock::new(pcc, pcc::ClockGate::DmaMux),
            initialized: Cell::new(false),
            poll_budget: Cell::new(CONFIG.poll_budget),
            busy_wait: Cell::new(None),
        }
    }

    /// Returns the interface that controls the eDMA clock.
    pub fn clock(&self) -> &(impl ClockInterface + '_) {
        &self.clock_gate
    }

    /// Returns the interface that controls the DMAMUX clock.
    pub fn mux_clock(&self) -> &(impl ClockInterface + '_) {
        &self.mux_clock_gate
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    /// Bring the controller into a known state.
    ///
    /// Cancels whatever is running, enables debug stalling and round robin
    /// arbitration, clears every pending error and interrupt flag, and
    /// resets all descriptors, routes and client registrations. Always
    /// succeeds.
    pub fn init(&self) -> Result<(), ErrorCode> {
        self.clock_gate.enable();
        self.mux_clock_gate.enable();

        let cr = &self.registers.cr;
        cr.modify(Control::CX::SET);
        cr.modify(Control::HALT::SET);
        cr.modify(Control::EDBG::SET + Control::ERCA::SET);
        cr.modify(Control::HALT::CLEAR);

        self.registers.cerq.write(MemoryMappedChannel::ALL::SET);
        self.registers.cerr.write(MemoryMappedChannel::ALL::SET);
        self.registers.cint.write(MemoryMappedChannel::ALL::SET);

        for channel in &self.channels {
            channel.reset();
        }

        self.initialized.set(true);
        debug!("dma: initialized {} channels", NUM_CHANNELS);
        Ok(())
    }

    /// Halt the controller and reset every channel.
    pub fn deinit(&self) -> Result<(), ErrorCode> {
        if !self.initialized.get() {
            return Err(ErrorCode::UNINITIALIZED);
        }

        self.registers.cr.modify(Control::HALT::SET);
        self.registers.cerq.write(MemoryMappedChannel::ALL::SET);
        for channel in &self.channels {
            channel.reset();
        }

        self.initialized.set(false);
        debug!("dma: deinitialized");
        Ok(())
    }

    /// Look up a channel, rejecting bad indices before checking that the
    /// engine is initialized.
    fn checked_channel(&self, channel: usize) -> Result<&DmaChannel<'a>, ErrorCode> {
        let dma_channel = self.channels.get(channel).ok_or(ErrorCode::FAIL)?;
        if !self.initialized.get() {
            return Err(ErrorCode::UNINITIALIZED);
        }
        Ok(dma_channel)
    }

    /// Same checks as every configure/start operation, without side effects.
    pub fn validate_channel(&self, channel: usize) -> Result<(), ErrorCode> {
        self.checked_channel(channel).map(|_| ())
    }

    /// Program `config.channel` for a new transfer.
    ///
    /// The channel is stopped first and its descriptor rewritten in place.
    /// A transfer still running on it is silently replaced, so callers must
    /// not reconfigure a channel that might still complete.
    pub fn configure_channel(&self, config: &ChannelConfig) -> Result<(), ErrorCode> {
        let dma_channel = self.checked_channel(config.channel)?;
        if config.priority > MAX_PRIORITY
            || config.minor_loop_bytes == 0
            || config.major_loop_count == 0
            || config.major_loop_count > MAX_MAJOR_LOOP_COUNT
        {
            return Err(ErrorCode::FAIL);
        }

        dma_channel.stop();
        dma_channel.write_descriptor(config);
        dma_channel.set_error_interrupt(config.interrupt_on_completion);
        dma_channel.set_priority(config.priority);
        dma_channel.route(config.source);

        if CONFIG.trace_transfers {
            trace!(
                "dma: channel {} configured, source {:?}, {} x {} bytes",
                config.channel,
                config.source,
                config.major_loop_count,
                config.minor_loop_bytes
            );
        }
        Ok(())
    }

    /// Arm a configured channel.
    ///
    /// Channels bound to a peripheral slot wait for the peripheral's first
    /// request. Channels bound to an always-on slot are started immediately.
    pub fn start_channel(&self, channel: usize) -> Result<(), ErrorCode> {
        let dma_channel = self.checked_channel(channel)?;
        dma_channel.clear_done();
        dma_channel.enable_request();
        if dma_channel.is_routed_always_on() {
            dma_channel.start();
        }
        if CONFIG.trace_transfers {
            trace!("dma: channel {} started", channel);
        }
        Ok(())
    }

    /// Stop honoring requests for `channel` and disable its route.
    ///
    /// A minor loop already granted by the engine finishes; bytes already
    /// moved are not rolled back.
    pub fn stop_channel(&self, channel: usize) -> Result<(), ErrorCode> {
        let dma_channel = self.checked_channel(channel)?;
        dma_channel.stop();
        Ok(())
    }

    /// Returns `true` while the engine is executing `channel`'s descriptor.
    pub fn is_channel_active(&self, channel: usize) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|dma_channel| dma_channel.is_active())
    }

    /// Returns `true` once `channel`'s major loop has completed.
    pub fn is_channel_done(&self, channel: usize) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|dma_channel| dma_channel.is_done())
    }

    /// Acknowledge completion so the channel can be reused.
    pub fn clear_done(&self, channel: usize) -> Result<(), ErrorCode> {
        let dma_channel = self.checked_channel(channel)?;
        dma_channel.clear_done();
        Ok(())
    }

    /// Returns `true` if the peripheral routed to `channel` is currently
    /// requesting service.
    ///
    /// Deassert the peripheral's request before stopping a channel that is
    /// still signaling.
    pub fn is_hardware_signaling(&self, channel: usize) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|dma_channel| dma_channel.is_hardware_signaling())
    }

    /// Returns `true` if `channel` stopped on a transfer error.
    pub fn is_error(&self, channel: usize) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|dma_channel| dma_channel.is_error())
    }

    /// The channel of the most recently recorded error, if any error is
    /// pending.
    pub fn error_channel(&self) -> Option<usize> {
        let es = self.registers.es.extract();
        es.is_set(ErrorStatus::VLD)
            .then(|| es.read(ErrorStatus::ERRCHN) as usize)
    }

    pub fn priority(&self, channel: usize) -> Option<u8> {
        self.channels.get(channel).map(|dma_channel| dma_channel.priority())
    }

    pub fn set_priority(&self, channel: usize, priority: u8) -> Result<(), ErrorCode> {
        let dma_channel = self.checked_channel(channel)?;
        if priority > MAX_PRIORITY {
            return Err(ErrorCode::FAIL);
        }
        dma_channel.set_priority(priority);
        Ok(())
    }

    /// Register `client` for completion events on `channel`, replacing any
    /// previous registration. An invalid channel leaves every registration
    /// untouched.
    pub fn install_callback(
        &self,
        channel: usize,
        client: &'a dyn DmaClient,
    ) -> Result<(), ErrorCode> {
        let dma_channel = self.channels.get(channel).ok_or(ErrorCode::FAIL)?;
        dma_channel.client.set(Some(client));
        Ok(())
    }

    pub fn remove_callback(&self, channel: usize) -> Result<(), ErrorCode> {
        let dma_channel = self.channels.get(channel).ok_or(ErrorCode::FAIL)?;
        dma_channel.client.set(None);
        Ok(())
    }

    /// Handle the completion interrupt of `channel`.
    ///
    /// Called from the DMA0..DMA15 vectors. Clears the interrupt and DONE
    /// flags, then notifies the registered client, if any. Out of range
    /// channels are ignored.
    pub fn handle_interrupt(&self, channel: usize) {
        let Some(dma_channel) = self.channels.get(channel) else {
            return;
        };
        dma_channel.clear_interrupt();
        dma_channel.clear_done();
        if CONFIG.trace_transfers {
            trace!("dma: channel {} complete", channel);
        }
        if let Some(client) = dma_channel.client.get() {
            client.transfer_complete(channel, Ok(()));
        }
    }

    /// Handle the shared DMA error interrupt.
    ///
    /// Every channel flagged in ERR is stopped, its error and DONE flags are
    /// cleared, and its client is told the transfer failed.
    pub fn handle_error_interrupt(&self) {
        let errors = self.registers.err.get();
        for (index, dma_channel) in self.channels.iter().enumerate() {
            if errors & dma_channel.mask() == 0 {
                continue;
            }
            dma_channel.clear_error();
            dma_channel.clear_done();
            dma_channel.disable_request();
            warn!("dma: transfer error on channel {}", index);
            if let Some(client) = dma_channel.client.get() {
                client.transfer_complete(index, Err(ErrorCode::FAIL));
            }
        }
    }

    pub fn poll_budget(&self) -> PollBudget {
        self.poll_budget.get()
    }

    pub fn set_poll_budget(&self, budget: PollBudget) {
        self.poll_budget.set(budget);
    }

    /// Replace the hook run while spinning on a channel.
    pub fn set_busy_wait(&self, busy_wait: &'a dyn BusyWait) {
        self.busy_wait.set(Some(busy_wait));
    }

    pub(crate) fn relax(&self) {
        match self.busy_wait.get() {
            Some(busy_wait) => busy_wait.relax(),
            None => Spin.relax(),
        }
    }

    /// Spin until `channel` is done or `budget` polls have elapsed.
    ///
    /// On success the DONE flag is cleared. A transfer error stops the
    /// channel, clears its error flag and returns `FAIL`, whether or not the
    /// error interrupt is enabled. On timeout the channel is stopped, and
    /// the wait continues (within the same budget) for a granted minor loop
    /// to drain.
    pub(crate) fn wait_for_done(&self, channel: usize, budget: u32) -> Result<(), ErrorCode> {
        let dma_channel = self.checked_channel(channel)?;

        let mut remaining = budget;
        while !dma_channel.is_done() {
            if dma_channel.is_error() {
                dma_channel.stop();
                dma_channel.clear_error();
                warn!("dma: transfer error on channel {}", channel);
                return Err(ErrorCode::FAIL);
            }
            if remaining == 0 {
                dma_channel.stop();
                let mut drain = budget;
                while dma_channel.is_active() && drain > 0 {
                    drain -= 1;
                    self.relax();
                }
                warn!("dma: channel {} timed out after {} polls", channel, budget);
                return Err(ErrorCode::TIMEOUT);
            }
            remaining -= 1;
            self.relax();
        }

        dma_channel.clear_done();
        Ok(())
    }

    /// Copy `source` into the front of `destination` with a software
    /// started transfer, and wait for it to finish.
    ///
    /// Words are moved one per minor loop. The wait is bounded by
    /// `PollBudget::mem_copy` polls.
    pub fn mem_copy(
        &self,
        channel: usize,
        source: &[u32],
        destination: &mut [u32],
    ) -> Result<(), ErrorCode> {
        let dma_channel = self.checked_channel(channel)?;
        if destination.len() < source.len() {
            return Err(ErrorCode::FAIL);
        }
        let count = major_loop_count(source.len())?;
        let word = u32::TRANSFER_SIZE;

        let config = ChannelConfig {
            priority: dma_channel.priority(),
            source_address: source.as_ptr() as u32,
            source_offset: word.bytes() as i16,
            destination_address: destination.as_mut_ptr() as u32,
            destination_offset: word.bytes() as i16,
            transfer_size: word,
            minor_loop_bytes: word.bytes(),
            major_loop_count: count,
            ..ChannelConfig::new(channel, CONFIG.mem_copy_source)
        };
        self.configure_channel(&config)?;
        self.start_channel(channel)?;
        self.wait_for_done(channel, self.poll_budget.get().mem_copy)
    }
}
