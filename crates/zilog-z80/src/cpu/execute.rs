//! Unprefixed instruction execution.

use emu_core::IoBus;

use crate::alu;
use crate::flags::{CF, HF, NF, PF, SF, XF, YF, ZF};

use super::Z80;

impl Z80 {
    /// Execute an unprefixed opcode (already fetched).
    pub(super) fn execute_main<B: IoBus>(&mut self, bus: &mut B, op: u8) {
        match op {
            // NOP
            0x00 => {}

            // LD rr, nn
            0x01 | 0x11 | 0x21 | 0x31 => {
                let value = self.imm16(bus);
                self.set_reg16((op >> 4) & 3, value);
            }

            // LD (BC), A
            0x02 => bus.write(self.regs.bc(), self.regs.a),

            // INC rr / DEC rr
            0x03 | 0x13 | 0x23 | 0x33 => {
                bus.tick_address(self.regs.ir(), 2);
                let rp = (op >> 4) & 3;
                let value = self.reg16(rp).wrapping_add(1);
                self.set_reg16(rp, value);
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                bus.tick_address(self.regs.ir(), 2);
                let rp = (op >> 4) & 3;
                let value = self.reg16(rp).wrapping_sub(1);
                self.set_reg16(rp, value);
            }

            // INC r / DEC r
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x3C => {
                let r = (op >> 3) & 7;
                let (value, f) = alu::inc8(self.reg8(r), self.regs.f);
                self.set_reg8(r, value);
                self.regs.f = f;
            }
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x3D => {
                let r = (op >> 3) & 7;
                let (value, f) = alu::dec8(self.reg8(r), self.regs.f);
                self.set_reg8(r, value);
                self.regs.f = f;
            }

            // INC (HL) / DEC (HL)
            0x34 => {
                let addr = self.regs.hl();
                let (value, f) = alu::inc8(bus.read(addr), self.regs.f);
                bus.tick_address(addr, 1);
                bus.write(addr, value);
                self.regs.f = f;
            }
            0x35 => {
                let addr = self.regs.hl();
                let (value, f) = alu::dec8(bus.read(addr), self.regs.f);
                bus.tick_address(addr, 1);
                bus.write(addr, value);
                self.regs.f = f;
            }

            // LD r, n
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E => {
                let value = self.imm8(bus);
                self.set_reg8((op >> 3) & 7, value);
            }

            // LD (HL), n
            0x36 => {
                let value = self.imm8(bus);
                bus.write(self.regs.hl(), value);
            }

            // RLCA / RRCA / RLA / RRA — accumulator rotates keep S, Z, P
            0x07 => {
                let carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | carry;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
            }
            0x0F => {
                let carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | (carry << 7);
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
            }
            0x17 => {
                let old_carry = self.regs.f & CF;
                let new_carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | old_carry;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if new_carry != 0 { CF } else { 0 };
            }
            0x1F => {
                let old_carry = (self.regs.f & CF) << 7;
                let new_carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | old_carry;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if new_carry != 0 { CF } else { 0 };
            }

            // EX AF, AF'
            0x08 => {
                core::mem::swap(&mut self.regs.a, &mut self.regs.a_alt);
                core::mem::swap(&mut self.regs.f, &mut self.regs.f_alt);
            }

            // ADD HL, rr
            0x09 | 0x19 | 0x29 | 0x39 => {
                bus.tick_address(self.regs.ir(), 7);
                let rr = self.reg16((op >> 4) & 3);
                let (value, f) = alu::add16(self.regs.hl(), rr, self.regs.f);
                self.regs.set_hl(value);
                self.regs.f = f;
            }

            // LD A, (BC) / LD A, (DE) / LD (DE), A
            0x0A => self.regs.a = bus.read(self.regs.bc()),
            0x12 => bus.write(self.regs.de(), self.regs.a),
            0x1A => self.regs.a = bus.read(self.regs.de()),

            // DJNZ e
            0x10 => {
                bus.tick_address(self.regs.ir(), 1);
                let offset = self.imm8(bus) as i8;
                self.regs.b = self.regs.b.wrapping_sub(1);
                if self.regs.b != 0 {
                    bus.tick_address(self.regs.pc.wrapping_sub(1), 5);
                    self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
                }
            }

            // JR e
            0x18 => {
                let offset = self.imm8(bus) as i8;
                bus.tick_address(self.regs.pc.wrapping_sub(1), 5);
                self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
            }

            // JR cc, e
            0x20 | 0x28 | 0x30 | 0x38 => {
                let offset = self.imm8(bus) as i8;
                if self.condition((op >> 3) & 3) {
                    bus.tick_address(self.regs.pc.wrapping_sub(1), 5);
                    self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
                }
            }

            // LD (nn), HL / LD HL, (nn)
            0x22 => {
                let addr = self.imm16(bus);
                Self::write16(bus, addr, self.regs.hl());
            }
            0x2A => {
                let addr = self.imm16(bus);
                let value = Self::read16(bus, addr);
                self.regs.set_hl(value);
            }

            // DAA
            0x27 => {
                let (value, f) = alu::daa(self.regs.a, self.regs.f);
                self.regs.a = value;
                self.regs.f = f;
            }

            // CPL
            0x2F => {
                self.regs.a = !self.regs.a;
                self.regs.f = (self.regs.f & (SF | ZF | PF | CF))
                    | HF
                    | NF
                    | (self.regs.a & (YF | XF));
            }

            // LD (nn), A / LD A, (nn)
            0x32 => {
                let addr = self.imm16(bus);
                bus.write(addr, self.regs.a);
            }
            0x3A => {
                let addr = self.imm16(bus);
                self.regs.a = bus.read(addr);
            }

            // SCF / CCF
            0x37 => {
                self.regs.f =
                    (self.regs.f & (SF | ZF | PF)) | CF | (self.regs.a & (YF | XF));
            }
            0x3F => {
                let old_carry = self.regs.f & CF;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if old_carry != 0 { HF } else { CF };
            }

            // HALT
            0x76 => {
                self.regs.halted = true;
                // PC stays on the HALT opcode until an interrupt releases it
                self.regs.pc = self.regs.pc.wrapping_sub(1);
            }

            // LD r, r' (including the (HL) forms)
            0x40..=0x7F => {
                let dst = (op >> 3) & 7;
                let src = op & 7;
                if src == 6 {
                    let value = bus.read(self.regs.hl());
                    self.set_reg8(dst, value);
                } else if dst == 6 {
                    bus.write(self.regs.hl(), self.reg8(src));
                } else {
                    let value = self.reg8(src);
                    self.set_reg8(dst, value);
                }
            }

            // ALU A, r / ALU A, (HL)
            0x80..=0xBF => {
                let src = op & 7;
                let value = if src == 6 {
                    bus.read(self.regs.hl())
                } else {
                    self.reg8(src)
                };
                self.alu_a((op >> 3) & 7, value);
            }

            // RET cc
            0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 => {
                bus.tick_address(self.regs.ir(), 1);
                if self.condition((op >> 3) & 7) {
                    self.regs.pc = self.pop16(bus);
                }
            }

            // POP rr / POP AF
            0xC1 | 0xD1 | 0xE1 => {
                let value = self.pop16(bus);
                self.set_reg16((op >> 4) & 3, value);
            }
            0xF1 => {
                let value = self.pop16(bus);
                self.regs.set_af(value);
            }

            // JP cc, nn / JP nn
            0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => {
                let addr = self.imm16(bus);
                if self.condition((op >> 3) & 7) {
                    self.regs.pc = addr;
                }
            }
            0xC3 => self.regs.pc = self.imm16(bus),

            // CALL cc, nn / CALL nn
            0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
                let addr = self.imm16(bus);
                if self.condition((op >> 3) & 7) {
                    bus.tick_address(self.regs.pc.wrapping_sub(1), 1);
                    let pc = self.regs.pc;
                    self.push16(bus, pc);
                    self.regs.pc = addr;
                }
            }
            0xCD => {
                let addr = self.imm16(bus);
                bus.tick_address(self.regs.pc.wrapping_sub(1), 1);
                let pc = self.regs.pc;
                self.push16(bus, pc);
                self.regs.pc = addr;
            }

            // PUSH rr / PUSH AF
            0xC5 | 0xD5 | 0xE5 => {
                bus.tick_address(self.regs.ir(), 1);
                let value = self.reg16((op >> 4) & 3);
                self.push16(bus, value);
            }
            0xF5 => {
                bus.tick_address(self.regs.ir(), 1);
                let value = self.regs.af();
                self.push16(bus, value);
            }

            // ALU A, n
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let value = self.imm8(bus);
                self.alu_a((op >> 3) & 7, value);
            }

            // RST p
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                bus.tick_address(self.regs.ir(), 1);
                let pc = self.regs.pc;
                self.push16(bus, pc);
                self.regs.pc = u16::from(op & 0x38);
            }

            // RET
            0xC9 => self.regs.pc = self.pop16(bus),

            // EXX
            0xD9 => {
                core::mem::swap(&mut self.regs.b, &mut self.regs.b_alt);
                core::mem::swap(&mut self.regs.c, &mut self.regs.c_alt);
                core::mem::swap(&mut self.regs.d, &mut self.regs.d_alt);
                core::mem::swap(&mut self.regs.e, &mut self.regs.e_alt);
                core::mem::swap(&mut self.regs.h, &mut self.regs.h_alt);
                core::mem::swap(&mut self.regs.l, &mut self.regs.l_alt);
            }

            // OUT (n), A / IN A, (n)
            0xD3 => {
                let port_lo = self.imm8(bus);
                let port = (u16::from(self.regs.a) << 8) | u16::from(port_lo);
                bus.write_io(port, self.regs.a);
            }
            0xDB => {
                let port_lo = self.imm8(bus);
                let port = (u16::from(self.regs.a) << 8) | u16::from(port_lo);
                self.regs.a = bus.read_io(port);
            }

            // EX (SP), HL
            0xE3 => {
                let sp = self.regs.sp;
                let lo = bus.read(sp);
                let hi = bus.read(sp.wrapping_add(1));
                bus.tick_address(sp.wrapping_add(1), 1);
                bus.write(sp.wrapping_add(1), self.regs.h);
                bus.write(sp, self.regs.l);
                bus.tick_address(sp, 2);
                self.regs.h = hi;
                self.regs.l = lo;
            }

            // JP (HL)
            0xE9 => self.regs.pc = self.regs.hl(),

            // EX DE, HL
            0xEB => {
                core::mem::swap(&mut self.regs.d, &mut self.regs.h);
                core::mem::swap(&mut self.regs.e, &mut self.regs.l);
            }

            // DI / EI
            0xF3 => {
                self.regs.iff1 = false;
                self.regs.iff2 = false;
            }
            0xFB => {
                self.regs.iff1 = true;
                self.regs.iff2 = true;
                self.ei_delay = true;
            }

            // LD SP, HL
            0xF9 => {
                bus.tick_address(self.regs.ir(), 2);
                self.regs.sp = self.regs.hl();
            }

            // Prefixes are dispatched by the caller
            0xCB | 0xDD | 0xED | 0xFD => unreachable!("prefix reached execute_main"),
        }
    }

    /// The eight accumulator operations: ADD ADC SUB SBC AND XOR OR CP.
    pub(super) fn alu_a(&mut self, kind: u8, value: u8) {
        let carry = self.regs.f & CF != 0;
        match kind {
            0 => {
                let (r, f) = alu::add8(self.regs.a, value, false);
                self.regs.a = r;
                self.regs.f = f;
            }
            1 => {
                let (r, f) = alu::add8(self.regs.a, value, carry);
                self.regs.a = r;
                self.regs.f = f;
            }
            2 => {
                let (r, f) = alu::sub8(self.regs.a, value, false);
                self.regs.a = r;
                self.regs.f = f;
            }
            3 => {
                let (r, f) = alu::sub8(self.regs.a, value, carry);
                self.regs.a = r;
                self.regs.f = f;
            }
            4 => {
                let (r, f) = alu::and8(self.regs.a, value);
                self.regs.a = r;
                self.regs.f = f;
            }
            5 => {
                let (r, f) = alu::xor8(self.regs.a, value);
                self.regs.a = r;
                self.regs.f = f;
            }
            6 => {
                let (r, f) = alu::or8(self.regs.a, value);
                self.regs.a = r;
                self.regs.f = f;
            }
            _ => self.regs.f = alu::cp8(self.regs.a, value),
        }
    }
}
