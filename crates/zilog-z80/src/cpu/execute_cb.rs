//! CB-prefixed instructions: rotates, shifts, and bit operations.

use emu_core::IoBus;

use crate::alu;
use crate::flags::{CF, HF, PF, SF, XF, YF, ZF};

use super::Z80;

impl Z80 {
    pub(super) fn execute_cb<B: IoBus>(&mut self, bus: &mut B) {
        let op = self.fetch_opcode(bus);
        let group = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;

        match group {
            // Rotates and shifts
            0 => {
                if z == 6 {
                    let addr = self.regs.hl();
                    let value = bus.read(addr);
                    bus.tick_address(addr, 1);
                    let (result, f) = self.rotate_shift(y, value);
                    bus.write(addr, result);
                    self.regs.f = f;
                } else {
                    let value = self.reg8(z);
                    let (result, f) = self.rotate_shift(y, value);
                    self.set_reg8(z, result);
                    self.regs.f = f;
                }
            }
            // BIT y, r / BIT y, (HL)
            1 => {
                let value = if z == 6 {
                    let addr = self.regs.hl();
                    let v = bus.read(addr);
                    bus.tick_address(addr, 1);
                    v
                } else {
                    self.reg8(z)
                };
                self.regs.f = bit_flags(self.regs.f, y, value);
            }
            // RES y, r / RES y, (HL)
            2 => {
                if z == 6 {
                    let addr = self.regs.hl();
                    let value = bus.read(addr) & !(1 << y);
                    bus.tick_address(addr, 1);
                    bus.write(addr, value);
                } else {
                    let value = self.reg8(z) & !(1 << y);
                    self.set_reg8(z, value);
                }
            }
            // SET y, r / SET y, (HL)
            _ => {
                if z == 6 {
                    let addr = self.regs.hl();
                    let value = bus.read(addr) | (1 << y);
                    bus.tick_address(addr, 1);
                    bus.write(addr, value);
                } else {
                    let value = self.reg8(z) | (1 << y);
                    self.set_reg8(z, value);
                }
            }
        }
    }

    /// The eight CB rotate/shift operations by y field:
    /// RLC RRC RL RR SLA SRA SLL SRL.
    pub(super) fn rotate_shift(&self, kind: u8, value: u8) -> (u8, u8) {
        match kind {
            0 => alu::rlc(value),
            1 => alu::rrc(value),
            2 => alu::rl(value, self.regs.f),
            3 => alu::rr(value, self.regs.f),
            4 => alu::sla(value),
            5 => alu::sra(value),
            6 => alu::sll(value),
            _ => alu::srl(value),
        }
    }
}

/// Flags for BIT b, v. Carry is preserved; Z and PV are set when the bit is
/// clear; S only for BIT 7 of a set bit; the 5/3 bits follow the tested
/// value.
pub(super) fn bit_flags(old_f: u8, bit: u8, value: u8) -> u8 {
    let tested = value & (1 << bit);
    let mut f = (old_f & CF) | HF | (value & (YF | XF));
    if tested == 0 {
        f |= ZF | PF;
    }
    if bit == 7 && tested != 0 {
        f |= SF;
    }
    f
}
