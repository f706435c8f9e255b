// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Peripheral clock gating (PCC and SIM platform gates).
//!
//! Only the gates used by the DMA engine and its adapters are modelled.
//! Clock source selection and frequency derivation are left to the board.

use tock_registers::interfaces::{ReadWriteable, Readable};
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

use crate::static_ref::StaticRef;

/// Number of PCC slots on the S32K14x.
const PCC_SLOTS: usize = 122;

register_structs! {
    /// Peripheral Clock Controller
    pub(crate) PccRegisters {
        (0x000 => pub(crate) pccn: [ReadWrite<u32, PCC::Register>; PCC_SLOTS]),
        (0x1E8 => @END),
    }
}

register_structs! {
    /// System Integration Module, platform clock gate only.
    pub(crate) SimRegisters {
        (0x000 => _reserved0),
        /// Platform Clock Gating Control Register
        (0x040 => pub(crate) platcgc: ReadWrite<u32, PLATCGC::Register>),
        (0x044 => @END),
    }
}

register_bitfields![u32,
    PCC [
        /// Peripheral present
        PR OFFSET(31) NUMBITS(1) [],
        /// Clock gate control
        CGC OFFSET(30) NUMBITS(1) [],
        /// Peripheral in use by another master
        INUSE OFFSET(29) NUMBITS(1) [],
        /// Peripheral clock source select
        PCS OFFSET(24) NUMBITS(3) []
    ],
    PLATCGC [
        /// EIM clock gate
        CGCEIM OFFSET(4) NUMBITS(1) [],
        /// ERM clock gate
        CGCERM OFFSET(3) NUMBITS(1) [],
        /// DMA clock gate
        CGCDMA OFFSET(2) NUMBITS(1) [],
        /// MPU clock gate
        CGCMPU OFFSET(1) NUMBITS(1) [],
        /// MSCM clock gate
        CGCMSCM OFFSET(0) NUMBITS(1) []
    ]
];

const PCC_BASE: StaticRef<PccRegisters> =
    unsafe { StaticRef::new(0x4006_5000 as *const PccRegisters) };

const SIM_BASE: StaticRef<SimRegisters> =
    unsafe { StaticRef::new(0x4004_8000 as *const SimRegisters) };

/// Interface for individually gated peripheral clocks.
pub trait ClockInterface {
    fn is_enabled(&self) -> bool;
    fn enable(&self);
    fn disable(&self);
}

/// Clock gates known to this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockGate {
    /// eDMA controller, gated in SIM_PLATCGC.
    Dma,
    /// DMA channel multiplexer.
    DmaMux,
    Lpuart0,
    Lpuart1,
    Lpuart2,
}

impl ClockGate {
    /// PCC slot for gates that live in the PCC.
    const fn pcc_index(self) -> Option<usize> {
        match self {
            ClockGate::Dma => None,
            ClockGate::DmaMux => Some(33),
            ClockGate::Lpuart0 => Some(106),
            ClockGate::Lpuart1 => Some(107),
            ClockGate::Lpuart2 => Some(108),
        }
    }
}

/// Peripheral clock controller.
pub struct Pcc {
    registers: StaticRef<PccRegisters>,
    sim: StaticRef<SimRegisters>,
}

impl Pcc {
    pub const fn new() -> Pcc {
        Pcc::with_registers(PCC_BASE, SIM_BASE)
    }

    pub(crate) const fn with_registers(
        registers: StaticRef<PccRegisters>,
        sim: StaticRef<SimRegisters>,
    ) -> Pcc {
        Pcc { registers, sim }
    }

    fn is_enabled_gate(&self, gate: ClockGate) -> bool {
        match gate.pcc_index() {
            Some(index) => self.registers.pccn[index].is_set(PCC::CGC),
            None => self.sim.platcgc.is_set(PLATCGC::CGCDMA),
        }
    }

    fn set_gate(&self, gate: ClockGate, enabled: bool) {
        match gate.pcc_index() {
            Some(index) => self.registers.pccn[index].modify(PCC::CGC.val(enabled as u32)),
            None => self.sim.platcgc.modify(PLATCGC::CGCDMA.val(enabled as u32)),
        }
    }
}

/// One gated clock, bound to the controller that owns its gate.
pub struct PeripheralClock<'a> {
    pcc: &'a Pcc,
    gate: ClockGate,
}

impl<'a> PeripheralClock<'a> {
    pub const fn new(pcc: &'a Pcc, gate: ClockGate) -> Self {
        PeripheralClock { pcc, gate }
    }

    pub fn gate(&self) -> ClockGate {
        self.gate
    }
}

impl ClockInterface for PeripheralClock<'_> {
    fn is_enabled(&self) -> bool {
        self.pcc.is_enabled_gate(self.gate)
    }

    fn enable(&self) {
        self.pcc.set_gate(self.gate, true);
    }

    fn disable(&self) {
        self.pcc.set_gate(self.gate, false);
    }
}
