// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Host-side stand-in for the eDMA, DMAMUX and PCC register blocks.
//!
//! Register blocks are zeroed heap allocations that the drivers access
//! through the same `StaticRef`s they use on hardware. [`EdmaEmu`] plays the
//! engine: every [`EdmaEmu::step`] (also run as the engine's `BusyWait`
//! hook) applies the command registers, grants pending channels and, after
//! a configurable number of steps, runs their whole major loop against
//! mapped host memory.
//!
//! Command registers are latched, not intercepted. Each one holds the last
//! byte written to it until [`EdmaEmu::apply_commands`] consumes it, so a
//! test must apply commands between two writes to the same register.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::{mem, ptr, slice};

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};

use crate::dma::{
    BusyWait, ChannelConfiguration, ControlAndStatus, Dma, DmaHardwareSource, DmaMuxRegisters,
    DmaRegisters, TransferAttributes, NUM_CHANNELS,
};
use crate::pcc::{Pcc, PccRegisters, SimRegisters};
use crate::static_ref::StaticRef;

/// Byte offsets of the write-only command registers, in the order they are
/// applied.
pub(crate) const CEEI: usize = 0x18;
pub(crate) const SEEI: usize = 0x19;
pub(crate) const CERQ: usize = 0x1A;
pub(crate) const SERQ: usize = 0x1B;
pub(crate) const CDNE: usize = 0x1C;
pub(crate) const SSRT: usize = 0x1D;
pub(crate) const CERR: usize = 0x1E;
pub(crate) const CINT: usize = 0x1F;

const COMMANDS: [usize; 8] = [CEEI, SEEI, CERQ, SERQ, CDNE, SSRT, CERR, CINT];

const NOP: u8 = 0x80;
const ALL: u8 = 0x40;
const CHANNEL: u8 = 0x0F;

const ES: usize = 0x04;
const HRS: usize = 0x34;

/// Allocate a zeroed register block that lives for the rest of the test.
pub(crate) fn registers<T>() -> StaticRef<T> {
    // SAFETY: register blocks are plain integers behind volatile accessors,
    // for which all-zero is a valid bit pattern.
    let block: Box<T> = Box::new(unsafe { mem::zeroed() });
    unsafe { StaticRef::new(Box::into_raw(block)) }
}

/// A clock controller backed by zeroed registers.
pub(crate) fn pcc() -> &'static Pcc {
    Box::leak(Box::new(Pcc::with_registers(
        registers::<PccRegisters>(),
        registers::<SimRegisters>(),
    )))
}

/// A fresh emulator and an engine wired to it, not yet initialized.
pub(crate) fn setup() -> (&'static EdmaEmu, &'static Dma<'static>) {
    let emu = EdmaEmu::new();
    (emu, emu.engine())
}

enum Region {
    /// Host memory reachable at the truncated address of `ptr`.
    Ram { address: u32, ptr: *mut u8, len: usize },
    /// A peripheral data register. Writes land in `written`, reads drain
    /// `pending` and yield zero once it is empty.
    Port {
        address: u32,
        written: Vec<u8>,
        pending: VecDeque<u8>,
    },
}

impl Region {
    fn contains(&self, address: u32, len: usize) -> bool {
        match self {
            Region::Ram {
                address: start,
                len: size,
                ..
            } => {
                let offset = address.wrapping_sub(*start) as usize;
                address >= *start && offset + len <= *size
            }
            Region::Port { address: port, .. } => address == *port,
        }
    }

    fn read(&mut self, address: u32, out: &mut [u8]) {
        match self {
            Region::Ram { address: start, ptr, .. } => {
                let offset = (address - *start) as usize;
                // SAFETY: `contains` checked the range against the mapping.
                unsafe { ptr::copy_nonoverlapping(ptr.add(offset), out.as_mut_ptr(), out.len()) }
            }
            Region::Port { pending, .. } => {
                out.fill(0);
                out[0] = pending.pop_front().unwrap_or(0);
            }
        }
    }

    fn write(&mut self, address: u32, data: &[u8]) {
        match self {
            Region::Ram { address: start, ptr, .. } => {
                let offset = (address - *start) as usize;
                // SAFETY: `contains` checked the range against the mapping.
                unsafe { ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset), data.len()) }
            }
            Region::Port { written, .. } => written.push(data[0]),
        }
    }
}

/// Emulated eDMA engine and channel multiplexer.
pub(crate) struct EdmaEmu {
    pub(crate) dma: StaticRef<DmaRegisters>,
    pub(crate) mux: StaticRef<DmaMuxRegisters>,
    regions: RefCell<Vec<Region>>,
    complete_after: Cell<Option<u32>>,
    progress: [Cell<u32>; NUM_CHANNELS],
    polls: Cell<u32>,
    faulty: Cell<u32>,
    applied: [Cell<u8>; COMMANDS.len()],
}

impl EdmaEmu {
    pub(crate) fn new() -> &'static EdmaEmu {
        let emu = Box::leak(Box::new(EdmaEmu {
            dma: registers(),
            mux: registers(),
            regions: RefCell::new(Vec::new()),
            complete_after: Cell::new(Some(1)),
            progress: Default::default(),
            polls: Cell::new(0),
            faulty: Cell::new(0),
            applied: Default::default(),
        }));
        for (offset, applied) in COMMANDS.iter().zip(&emu.applied) {
            emu.poke_byte(*offset, NOP);
            applied.set(NOP);
        }
        emu
    }

    /// An engine that drives this emulator while it waits.
    pub(crate) fn engine(&'static self) -> &'static Dma<'static> {
        let dma = Box::leak(Box::new(Dma::with_registers(self.dma, self.mux, pcc())));
        dma.set_busy_wait(self);
        dma
    }

    /// Number of steps an active channel runs before its major loop
    /// completes. `None` models hardware that never finishes.
    pub(crate) fn complete_after(&self, steps: Option<u32>) {
        self.complete_after.set(steps);
    }

    /// Make `channel` fail with a bus error instead of running when it is
    /// next granted.
    pub(crate) fn fail_channel(&self, channel: usize) {
        self.faulty.set(self.faulty.get() | (1 << channel));
    }

    /// Number of steps taken so far.
    pub(crate) fn polls(&self) -> u32 {
        self.polls.get()
    }

    pub(crate) fn map_ram(&self, ptr: *mut u8, len: usize) {
        self.regions.borrow_mut().push(Region::Ram {
            address: ptr as u32,
            ptr,
            len,
        });
    }

    pub(crate) fn map_port(&self, address: u32) {
        self.regions.borrow_mut().push(Region::Port {
            address,
            written: Vec::new(),
            pending: VecDeque::new(),
        });
    }

    pub(crate) fn unmap_all(&self) {
        self.regions.borrow_mut().clear();
    }

    /// Queue bytes for DMA reads from the port at `address`.
    pub(crate) fn feed_port(&self, address: u32, bytes: &[u8]) {
        for region in self.regions.borrow_mut().iter_mut() {
            if let Region::Port {
                address: port,
                pending,
                ..
            } = region
            {
                if *port == address {
                    pending.extend(bytes);
                }
            }
        }
    }

    /// Bytes the engine wrote to the port at `address`.
    pub(crate) fn port_output(&self, address: u32) -> Vec<u8> {
        self.regions
            .borrow()
            .iter()
            .find_map(|region| match region {
                Region::Port {
                    address: port,
                    written,
                    ..
                } if *port == address => Some(written.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Raw copy of the eDMA and DMAMUX register blocks.
    pub(crate) fn snapshot(&self) -> Vec<u8> {
        let mut bytes = self.raw(&self.dma).to_vec();
        bytes.extend_from_slice(self.raw(&self.mux));
        bytes
    }

    /// Last command applied from the register at byte `offset`, after
    /// applying any pending ones.
    pub(crate) fn command(&self, offset: usize) -> u8 {
        self.apply_commands();
        COMMANDS
            .iter()
            .position(|command| *command == offset)
            .map_or(NOP, |index| self.applied[index].get())
    }

    /// Byte currently latched in the command register at `offset`.
    pub(crate) fn pending_command(&self, offset: usize) -> u8 {
        self.raw(&self.dma)[offset]
    }

    pub(crate) fn request_enabled(&self, channel: usize) -> bool {
        self.apply_commands();
        self.dma.erq.get() & (1 << channel) != 0
    }

    /// Carry out every latched command, then reset the registers to NOP.
    pub(crate) fn apply_commands(&self) {
        for (offset, applied) in COMMANDS.iter().zip(&self.applied) {
            let value = self.raw(&self.dma)[*offset];
            if value & NOP != 0 {
                continue;
            }
            let mask = if value & ALL != 0 {
                (1u32 << NUM_CHANNELS) - 1
            } else {
                1 << (value & CHANNEL)
            };
            self.execute(*offset, mask);
            applied.set(value);
            self.poke_byte(*offset, NOP);
        }
    }

    fn execute(&self, offset: usize, mask: u32) {
        let dma = &self.dma;
        match offset {
            CEEI => dma.eei.set(dma.eei.get() & !mask),
            SEEI => dma.eei.set(dma.eei.get() | mask),
            CERQ => dma.erq.set(dma.erq.get() & !mask),
            SERQ => dma.erq.set(dma.erq.get() | mask),
            CERR => dma.err.set(dma.err.get() & !mask),
            CINT => dma.int.set(dma.int.get() & !mask),
            _ => {
                for channel in (0..NUM_CHANNELS).filter(|channel| mask & (1 << channel) != 0) {
                    let csr = &dma.tcd[channel].csr;
                    if offset == CDNE {
                        csr.modify(ControlAndStatus::DONE::CLEAR);
                    } else {
                        csr.modify(ControlAndStatus::START::SET);
                    }
                }
            }
        }
    }

    /// Load the read-only ES register.
    pub(crate) fn set_error_status(&self, value: u32) {
        self.poke(ES, value);
    }

    /// Load the read-only HRS register.
    pub(crate) fn set_hardware_requests(&self, value: u32) {
        self.poke(HRS, value);
    }

    fn raw<T>(&self, block: &StaticRef<T>) -> &[u8] {
        // SAFETY: the block is a live allocation of `size_of::<T>()` bytes.
        unsafe { slice::from_raw_parts(block.as_ptr() as *const u8, mem::size_of::<T>()) }
    }

    fn poke_byte(&self, offset: usize, value: u8) {
        // SAFETY: `offset` names a byte inside the eDMA block.
        unsafe { ptr::write_volatile((self.dma.as_ptr() as *mut u8).add(offset), value) }
    }

    fn poke(&self, offset: usize, value: u32) {
        // SAFETY: `offset` names a 32-bit register inside the eDMA block.
        unsafe {
            let register = (self.dma.as_ptr() as *mut u8).add(offset) as *mut u32;
            ptr::write_volatile(register, value);
        }
    }

    /// Apply pending commands, then advance every channel by one step.
    ///
    /// An idle channel becomes active when its request is enabled, its route
    /// is enabled, and it is either started by software or bound to a
    /// peripheral slot, which always requests service. DONE does not hold a
    /// channel back. An active channel whose request was withdrawn drops
    /// back to idle without completing.
    pub(crate) fn step(&self) {
        self.polls.set(self.polls.get() + 1);
        self.apply_commands();

        for channel in 0..NUM_CHANNELS {
            let csr = &self.dma.tcd[channel].csr;
            let requested = self.request_enabled(channel);

            if csr.is_set(ControlAndStatus::ACTIVE) {
                if !requested {
                    csr.modify(ControlAndStatus::ACTIVE::CLEAR);
                    continue;
                }
                let progress = self.progress[channel].get() + 1;
                self.progress[channel].set(progress);
                if self.complete_after.get().is_some_and(|steps| progress >= steps) {
                    self.run_major_loop(channel);
                }
                continue;
            }

            let chcfg = &self.mux.chcfg[channel];
            let routed = chcfg.is_set(ChannelConfiguration::ENBL);
            let always_on =
                DmaHardwareSource::is_always_on_slot(chcfg.read(ChannelConfiguration::SOURCE));
            let started = csr.is_set(ControlAndStatus::START);
            if !(requested && routed && (started || !always_on)) {
                continue;
            }
            if self.faulty.get() & (1 << channel) != 0 {
                csr.modify(ControlAndStatus::START::CLEAR);
                self.dma.err.set(self.dma.err.get() | (1 << channel));
                self.poke(ES, (1 << 31) | ((channel as u32) << 8));
                continue;
            }
            csr.modify(ControlAndStatus::ACTIVE::SET + ControlAndStatus::START::CLEAR);
            self.progress[channel].set(0);
        }
    }

    fn run_major_loop(&self, channel: usize) {
        let tcd = &self.dma.tcd[channel];
        let unit = match tcd.attr.read(TransferAttributes::SSIZE) {
            0 => 1,
            1 => 2,
            2 => 4,
            4 => 16,
            5 => 32,
            code => panic!("emu: reserved SSIZE {}", code),
        };
        let source_step = tcd.soff.get() as i16 as i32 as u32;
        let destination_step = tcd.doff.get() as i16 as i32 as u32;
        let mut source = tcd.saddr.get();
        let mut destination = tcd.daddr.get();
        let mut regions = self.regions.borrow_mut();
        let mut buffer = [0u8; 32];

        for _ in 0..tcd.citer.get() {
            for _ in 0..tcd.nbytes.get() / unit as u32 {
                let data = &mut buffer[..unit];
                Self::region(&mut regions, source, unit).read(source, data);
                Self::region(&mut regions, destination, unit).write(destination, data);
                source = source.wrapping_add(source_step);
                destination = destination.wrapping_add(destination_step);
            }
        }

        tcd.saddr.set(source.wrapping_add(tcd.slast.get()));
        tcd.daddr.set(destination.wrapping_add(tcd.dlast_sga.get()));
        tcd.citer.set(tcd.biter.get());
        tcd.csr
            .modify(ControlAndStatus::ACTIVE::CLEAR + ControlAndStatus::DONE::SET);

        let mask = 1u32 << channel;
        if tcd.csr.is_set(ControlAndStatus::DREQ) {
            self.dma.erq.set(self.dma.erq.get() & !mask);
        }
        if tcd.csr.is_set(ControlAndStatus::INTMAJOR) {
            self.dma.int.set(self.dma.int.get() | mask);
        }
    }

    fn region<'r>(regions: &'r mut [Region], address: u32, len: usize) -> &'r mut Region {
        regions
            .iter_mut()
            .find(|region| region.contains(address, len))
            .unwrap_or_else(|| panic!("emu: unmapped access at {:#010x}", address))
    }
}

impl BusyWait for EdmaEmu {
    fn relax(&self) {
        self.step();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::ChannelConfig;

    #[test]
    fn ram_regions_bound_accesses() {
        let mut backing = [0u8; 8];
        let region = Region::Ram {
            address: 0x1000,
            ptr: backing.as_mut_ptr(),
            len: backing.len(),
        };
        assert!(region.contains(0x1000, 8));
        assert!(region.contains(0x1004, 4));
        assert!(!region.contains(0x1006, 4));
        assert!(!region.contains(0x0FFF, 1));
    }

    #[test]
    fn commands_are_consumed_once() {
        let emu = EdmaEmu::new();
        assert_eq!(emu.pending_command(SERQ), NOP);

        emu.poke_byte(SERQ, 4);
        emu.apply_commands();
        assert_eq!(emu.dma.erq.get(), 1 << 4);
        assert_eq!(emu.pending_command(SERQ), NOP);
        assert_eq!(emu.command(SERQ), 4);

        // The engine clears the bit; a consumed command must not undo that.
        emu.dma.erq.set(0);
        emu.apply_commands();
        assert_eq!(emu.dma.erq.get(), 0);

        emu.poke_byte(SERQ, ALL);
        emu.poke_byte(CERQ, 2);
        emu.apply_commands();
        assert_eq!(emu.dma.erq.get(), 0xFFFF);
    }

    #[test]
    fn done_channel_with_request_enabled_runs_again() {
        let (emu, dma) = setup();
        dma.init().unwrap();
        emu.map_port(0x4006_A01C);
        let mut byte = [0x5Au8];
        emu.map_ram(byte.as_mut_ptr(), 1);
        let config = ChannelConfig {
            source_address: byte.as_ptr() as u32,
            destination_address: 0x4006_A01C,
            disable_on_completion: false,
            ..ChannelConfig::new(2, DmaHardwareSource::Lpuart0Transmit)
        };
        dma.configure_channel(&config).unwrap();
        dma.start_channel(2).unwrap();

        emu.step();
        emu.step();
        assert!(dma.is_channel_done(2));
        assert!(emu.request_enabled(2));
        emu.step();
        emu.step();
        assert_eq!(emu.port_output(0x4006_A01C), [0x5A, 0x5A]);
        assert_eq!(dma.stop_channel(2), Ok(()));
    }

    #[test]
    fn failing_channel_sets_error_flags() {
        let (emu, dma) = setup();
        dma.init().unwrap();
        emu.fail_channel(6);
        dma.configure_channel(&ChannelConfig::new(6, DmaHardwareSource::AlwaysOn63))
            .unwrap();
        dma.start_channel(6).unwrap();
        emu.step();

        assert!(dma.is_error(6));
        assert!(!dma.is_channel_active(6));
        assert_eq!(dma.error_channel(), Some(6));
        assert_eq!(emu.dma.tcd[6].csr.read(ControlAndStatus::START), 0);
    }
}
