//! DD/FD-prefixed instructions: IX/IY forms, the (IX+d) addressing mode,
//! the undocumented index-half registers, and DDCB/FDCB bit operations.
//!
//! Opcodes with no indexed meaning execute exactly as their unprefixed
//! form (the prefix behaves as a 4-T-state NONI).

use emu_core::IoBus;

use super::Z80;
use super::execute_cb::bit_flags;

impl Z80 {
    pub(super) fn execute_index<B: IoBus>(&mut self, bus: &mut B, use_iy: bool) {
        let op = self.fetch_opcode(bus);

        match op {
            // Stacked prefixes: the last one wins; ED drops the index prefix
            0xDD => self.execute_index(bus, false),
            0xFD => self.execute_index(bus, true),
            0xED => self.execute_ed(bus),
            0xCB => self.execute_index_cb(bus, use_iy),

            // ADD IX, rr (rr=2 means IX itself)
            0x09 | 0x19 | 0x29 | 0x39 => {
                bus.tick_address(self.regs.ir(), 7);
                let rp = (op >> 4) & 3;
                let rr = if rp == 2 {
                    self.index(use_iy)
                } else {
                    self.reg16(rp)
                };
                let (value, f) = crate::alu::add16(self.index(use_iy), rr, self.regs.f);
                self.set_index(use_iy, value);
                self.regs.f = f;
            }

            // LD IX, nn
            0x21 => {
                let value = self.imm16(bus);
                self.set_index(use_iy, value);
            }

            // LD (nn), IX / LD IX, (nn)
            0x22 => {
                let addr = self.imm16(bus);
                Self::write16(bus, addr, self.index(use_iy));
            }
            0x2A => {
                let addr = self.imm16(bus);
                let value = Self::read16(bus, addr);
                self.set_index(use_iy, value);
            }

            // INC IX / DEC IX
            0x23 => {
                bus.tick_address(self.regs.ir(), 2);
                let value = self.index(use_iy).wrapping_add(1);
                self.set_index(use_iy, value);
            }
            0x2B => {
                bus.tick_address(self.regs.ir(), 2);
                let value = self.index(use_iy).wrapping_sub(1);
                self.set_index(use_iy, value);
            }

            // INC/DEC/LD on the undocumented index halves
            0x24 | 0x25 | 0x2C | 0x2D => {
                let high = op & 0x08 == 0;
                let value = self.index_half(use_iy, high);
                let (result, f) = if op & 1 == 0 {
                    crate::alu::inc8(value, self.regs.f)
                } else {
                    crate::alu::dec8(value, self.regs.f)
                };
                self.set_index_half(use_iy, high, result);
                self.regs.f = f;
            }
            0x26 | 0x2E => {
                let value = self.imm8(bus);
                self.set_index_half(use_iy, op == 0x26, value);
            }

            // INC (IX+d) / DEC (IX+d)
            0x34 | 0x35 => {
                let addr = self.indexed_addr(bus, use_iy);
                let value = bus.read(addr);
                bus.tick_address(addr, 1);
                let (result, f) = if op == 0x34 {
                    crate::alu::inc8(value, self.regs.f)
                } else {
                    crate::alu::dec8(value, self.regs.f)
                };
                bus.write(addr, result);
                self.regs.f = f;
            }

            // LD (IX+d), n
            0x36 => {
                let offset = self.imm8(bus) as i8;
                let value = self.imm8(bus);
                bus.tick_address(self.regs.pc.wrapping_sub(1), 2);
                let addr = self.index(use_iy).wrapping_add(offset as u16);
                bus.write(addr, value);
            }

            // DD 76 decodes as HALT
            0x76 => {
                self.regs.halted = true;
                self.regs.pc = self.regs.pc.wrapping_sub(1);
            }

            // LD group with index substitution
            0x40..=0x7F => {
                let dst = (op >> 3) & 7;
                let src = op & 7;
                if src == 6 {
                    // LD r, (IX+d): the destination is a real register
                    let addr = self.indexed_addr(bus, use_iy);
                    let value = bus.read(addr);
                    self.set_reg8(dst, value);
                } else if dst == 6 {
                    // LD (IX+d), r
                    let addr = self.indexed_addr(bus, use_iy);
                    bus.write(addr, self.reg8(src));
                } else {
                    // Register-to-register with H/L mapped to IXH/IXL
                    let value = self.index_reg8(use_iy, src);
                    self.set_index_reg8(use_iy, dst, value);
                }
            }

            // ALU group with index substitution
            0x80..=0xBF => {
                let src = op & 7;
                let value = if src == 6 {
                    let addr = self.indexed_addr(bus, use_iy);
                    bus.read(addr)
                } else {
                    self.index_reg8(use_iy, src)
                };
                self.alu_a((op >> 3) & 7, value);
            }

            // POP IX / PUSH IX
            0xE1 => {
                let value = self.pop16(bus);
                self.set_index(use_iy, value);
            }
            0xE5 => {
                bus.tick_address(self.regs.ir(), 1);
                let value = self.index(use_iy);
                self.push16(bus, value);
            }

            // EX (SP), IX
            0xE3 => {
                let sp = self.regs.sp;
                let lo = bus.read(sp);
                let hi = bus.read(sp.wrapping_add(1));
                bus.tick_address(sp.wrapping_add(1), 1);
                let ix = self.index(use_iy);
                bus.write(sp.wrapping_add(1), (ix >> 8) as u8);
                bus.write(sp, ix as u8);
                bus.tick_address(sp, 2);
                self.set_index(use_iy, u16::from(lo) | (u16::from(hi) << 8));
            }

            // JP (IX)
            0xE9 => self.regs.pc = self.index(use_iy),

            // LD SP, IX
            0xF9 => {
                bus.tick_address(self.regs.ir(), 2);
                self.regs.sp = self.index(use_iy);
            }

            // No indexed meaning: execute the unprefixed form
            _ => self.execute_main(bus, op),
        }
    }

    /// DDCB/FDCB: displacement byte, then the operation byte (a plain read,
    /// not an M1 fetch — R does not increment), then the indexed access.
    fn execute_index_cb<B: IoBus>(&mut self, bus: &mut B, use_iy: bool) {
        let offset = self.imm8(bus) as i8;
        let op = bus.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        bus.tick(2);

        let addr = self.index(use_iy).wrapping_add(offset as u16);
        let group = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;

        let value = bus.read(addr);
        bus.tick_address(addr, 1);

        match group {
            0 => {
                let (result, f) = self.rotate_shift(y, value);
                bus.write(addr, result);
                self.regs.f = f;
                // Undocumented: the result also lands in a register
                if z != 6 {
                    self.set_reg8(z, result);
                }
            }
            1 => {
                // BIT: the 5/3 flag bits leak from the effective address
                let f = bit_flags(self.regs.f, y, value);
                self.regs.f = (f & !0x28) | ((addr >> 8) as u8 & 0x28);
            }
            2 => {
                let result = value & !(1 << y);
                bus.write(addr, result);
                if z != 6 {
                    self.set_reg8(z, result);
                }
            }
            _ => {
                let result = value | (1 << y);
                bus.write(addr, result);
                if z != 6 {
                    self.set_reg8(z, result);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Index register plumbing
    // -----------------------------------------------------------------------

    fn index(&self, use_iy: bool) -> u16 {
        if use_iy { self.regs.iy } else { self.regs.ix }
    }

    fn set_index(&mut self, use_iy: bool, value: u16) {
        if use_iy {
            self.regs.iy = value;
        } else {
            self.regs.ix = value;
        }
    }

    fn index_half(&self, use_iy: bool, high: bool) -> u8 {
        let value = self.index(use_iy);
        if high { (value >> 8) as u8 } else { value as u8 }
    }

    fn set_index_half(&mut self, use_iy: bool, high: bool, byte: u8) {
        let value = self.index(use_iy);
        let value = if high {
            (value & 0x00FF) | (u16::from(byte) << 8)
        } else {
            (value & 0xFF00) | u16::from(byte)
        };
        self.set_index(use_iy, value);
    }

    /// Register by field with H/L replaced by the index halves.
    fn index_reg8(&self, use_iy: bool, index: u8) -> u8 {
        match index {
            4 => self.index_half(use_iy, true),
            5 => self.index_half(use_iy, false),
            _ => self.reg8(index),
        }
    }

    fn set_index_reg8(&mut self, use_iy: bool, index: u8, value: u8) {
        match index {
            4 => self.set_index_half(use_iy, true, value),
            5 => self.set_index_half(use_iy, false, value),
            _ => self.set_reg8(index, value),
        }
    }

    /// Read the displacement byte and compute IX+d, charging the 5 internal
    /// T-states of effective-address calculation.
    fn indexed_addr<B: IoBus>(&mut self, bus: &mut B, use_iy: bool) -> u16 {
        let offset = self.imm8(bus) as i8;
        bus.tick_address(self.regs.pc.wrapping_sub(1), 5);
        self.index(use_iy).wrapping_add(offset as u16)
    }
}
