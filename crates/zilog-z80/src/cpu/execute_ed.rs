//! ED-prefixed instructions: extended ops and the block group.

use emu_core::IoBus;

use crate::alu;
use crate::flags::{CF, HF, NF, PF, SF, XF, YF, ZF, sz53, sz53p};

use super::Z80;

impl Z80 {
    pub(super) fn execute_ed<B: IoBus>(&mut self, bus: &mut B) {
        let op = self.fetch_opcode(bus);

        match op {
            // IN r, (C) — including the flags-only IN (C) form at y=6
            0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x70 | 0x78 => {
                let value = bus.read_io(self.regs.bc());
                let r = (op >> 3) & 7;
                if r != 6 {
                    self.set_reg8(r, value);
                }
                self.regs.f = (self.regs.f & CF) | sz53p(value);
            }

            // OUT (C), r — y=6 is the undocumented OUT (C), 0
            0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x71 | 0x79 => {
                let r = (op >> 3) & 7;
                let value = if r == 6 { 0 } else { self.reg8(r) };
                bus.write_io(self.regs.bc(), value);
            }

            // SBC HL, rr / ADC HL, rr
            0x42 | 0x52 | 0x62 | 0x72 => {
                bus.tick_address(self.regs.ir(), 7);
                let rr = self.reg16((op >> 4) & 3);
                let (value, f) = alu::sbc16(self.regs.hl(), rr, self.regs.f & CF != 0);
                self.regs.set_hl(value);
                self.regs.f = f;
            }
            0x4A | 0x5A | 0x6A | 0x7A => {
                bus.tick_address(self.regs.ir(), 7);
                let rr = self.reg16((op >> 4) & 3);
                let (value, f) = alu::adc16(self.regs.hl(), rr, self.regs.f & CF != 0);
                self.regs.set_hl(value);
                self.regs.f = f;
            }

            // LD (nn), rr / LD rr, (nn)
            0x43 | 0x53 | 0x63 | 0x73 => {
                let addr = self.imm16(bus);
                let value = self.reg16((op >> 4) & 3);
                Self::write16(bus, addr, value);
            }
            0x4B | 0x5B | 0x6B | 0x7B => {
                let addr = self.imm16(bus);
                let value = Self::read16(bus, addr);
                self.set_reg16((op >> 4) & 3, value);
            }

            // NEG (all eight decodes)
            0x44 | 0x4C | 0x54 | 0x5C | 0x64 | 0x6C | 0x74 | 0x7C => {
                let (value, f) = alu::sub8(0, self.regs.a, false);
                self.regs.a = value;
                self.regs.f = f;
            }

            // RETN / RETI (all eight decodes restore IFF1 from IFF2)
            0x45 | 0x4D | 0x55 | 0x5D | 0x65 | 0x6D | 0x75 | 0x7D => {
                self.regs.pc = self.pop16(bus);
                self.regs.iff1 = self.regs.iff2;
            }

            // IM 0/1/2
            0x46 | 0x4E | 0x56 | 0x5E | 0x66 | 0x6E | 0x76 | 0x7E => {
                self.regs.im = match (op >> 3) & 3 {
                    2 => 1,
                    3 => 2,
                    _ => 0,
                };
            }

            // LD I, A / LD R, A
            0x47 => {
                bus.tick_address(self.regs.ir(), 1);
                self.regs.i = self.regs.a;
            }
            0x4F => {
                bus.tick_address(self.regs.ir(), 1);
                self.regs.r = self.regs.a;
            }

            // LD A, I / LD A, R — PV reflects IFF2
            0x57 => {
                bus.tick_address(self.regs.ir(), 1);
                self.regs.a = self.regs.i;
                self.regs.f = (self.regs.f & CF)
                    | sz53(self.regs.a)
                    | if self.regs.iff2 { PF } else { 0 };
            }
            0x5F => {
                bus.tick_address(self.regs.ir(), 1);
                self.regs.a = self.regs.r;
                self.regs.f = (self.regs.f & CF)
                    | sz53(self.regs.a)
                    | if self.regs.iff2 { PF } else { 0 };
            }

            // RRD / RLD
            0x67 => {
                let addr = self.regs.hl();
                let value = bus.read(addr);
                let result = (value >> 4) | (self.regs.a << 4);
                self.regs.a = (self.regs.a & 0xF0) | (value & 0x0F);
                bus.tick_address(addr, 4);
                bus.write(addr, result);
                self.regs.f = (self.regs.f & CF) | sz53p(self.regs.a);
            }
            0x6F => {
                let addr = self.regs.hl();
                let value = bus.read(addr);
                let result = (value << 4) | (self.regs.a & 0x0F);
                self.regs.a = (self.regs.a & 0xF0) | (value >> 4);
                bus.tick_address(addr, 4);
                bus.write(addr, result);
                self.regs.f = (self.regs.f & CF) | sz53p(self.regs.a);
            }

            // Block transfer group
            0xA0 => self.block_ld(bus, 1, false),
            0xA8 => self.block_ld(bus, -1, false),
            0xB0 => self.block_ld(bus, 1, true),
            0xB8 => self.block_ld(bus, -1, true),

            // Block compare group
            0xA1 => self.block_cp(bus, 1, false),
            0xA9 => self.block_cp(bus, -1, false),
            0xB1 => self.block_cp(bus, 1, true),
            0xB9 => self.block_cp(bus, -1, true),

            // Block input group
            0xA2 => self.block_in(bus, 1, false),
            0xAA => self.block_in(bus, -1, false),
            0xB2 => self.block_in(bus, 1, true),
            0xBA => self.block_in(bus, -1, true),

            // Block output group
            0xA3 => self.block_out(bus, 1, false),
            0xAB => self.block_out(bus, -1, false),
            0xB3 => self.block_out(bus, 1, true),
            0xBB => self.block_out(bus, -1, true),

            // Reserved rows execute as two-fetch NOPs
            _ => {}
        }
    }

    /// LDI/LDD/LDIR/LDDR.
    fn block_ld<B: IoBus>(&mut self, bus: &mut B, dir: i16, repeat: bool) {
        let hl = self.regs.hl();
        let de = self.regs.de();
        let value = bus.read(hl);
        bus.write(de, value);
        bus.tick_address(de, 2);

        self.regs.set_hl(hl.wrapping_add(dir as u16));
        self.regs.set_de(de.wrapping_add(dir as u16));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        // Undocumented 5/3 from A + copied byte
        let n = self.regs.a.wrapping_add(value);
        self.regs.f = (self.regs.f & (SF | ZF | CF))
            | if bc != 0 { PF } else { 0 }
            | (n & XF)
            | ((n << 4) & YF);

        if repeat && bc != 0 {
            bus.tick_address(de, 5);
            self.regs.pc = self.regs.pc.wrapping_sub(2);
        }
    }

    /// CPI/CPD/CPIR/CPDR.
    fn block_cp<B: IoBus>(&mut self, bus: &mut B, dir: i16, repeat: bool) {
        let hl = self.regs.hl();
        let value = bus.read(hl);
        bus.tick_address(hl, 5);

        self.regs.set_hl(hl.wrapping_add(dir as u16));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        let result = self.regs.a.wrapping_sub(value);
        let half = (self.regs.a & 0x0F) < (value & 0x0F);
        let n = result.wrapping_sub(u8::from(half));

        self.regs.f = (self.regs.f & CF)
            | NF
            | (result & SF)
            | if result == 0 { ZF } else { 0 }
            | if half { HF } else { 0 }
            | if bc != 0 { PF } else { 0 }
            | (n & XF)
            | ((n << 4) & YF);

        if repeat && bc != 0 && result != 0 {
            bus.tick_address(hl, 5);
            self.regs.pc = self.regs.pc.wrapping_sub(2);
        }
    }

    /// INI/IND/INIR/INDR.
    fn block_in<B: IoBus>(&mut self, bus: &mut B, dir: i16, repeat: bool) {
        bus.tick_address(self.regs.ir(), 1);
        let value = bus.read_io(self.regs.bc());
        let hl = self.regs.hl();
        bus.write(hl, value);

        self.regs.b = self.regs.b.wrapping_sub(1);
        self.regs.set_hl(hl.wrapping_add(dir as u16));

        self.regs.f = sz53(self.regs.b) | if value & 0x80 != 0 { NF } else { 0 };

        if repeat && self.regs.b != 0 {
            bus.tick_address(hl, 5);
            self.regs.pc = self.regs.pc.wrapping_sub(2);
        }
    }

    /// OUTI/OUTD/OTIR/OTDR.
    fn block_out<B: IoBus>(&mut self, bus: &mut B, dir: i16, repeat: bool) {
        bus.tick_address(self.regs.ir(), 1);
        let hl = self.regs.hl();
        let value = bus.read(hl);
        self.regs.b = self.regs.b.wrapping_sub(1);
        bus.write_io(self.regs.bc(), value);
        self.regs.set_hl(hl.wrapping_add(dir as u16));

        self.regs.f = sz53(self.regs.b) | if value & 0x80 != 0 { NF } else { 0 };

        if repeat && self.regs.b != 0 {
            bus.tick_address(self.regs.bc(), 5);
            self.regs.pc = self.regs.pc.wrapping_sub(2);
        }
    }
}
