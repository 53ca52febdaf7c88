//! The Z80 core: fetch/decode dispatch, interrupt protocol, bus helpers.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

mod execute;
mod execute_cb;
mod execute_ed;
mod execute_index;

use emu_core::{Bus, Cpu, IoBus};

use crate::flags::{CF, ZF, PF, SF};
use crate::registers::Registers;

/// Zilog Z80 CPU.
pub struct Z80 {
    pub regs: Registers,
    /// Set by EI: interrupts are not accepted until one more instruction
    /// has executed.
    ei_delay: bool,
}

impl Z80 {
    #[must_use]
    pub fn new() -> Self {
        let mut cpu = Self {
            regs: Registers::default(),
            ei_delay: false,
        };
        cpu.reset();
        cpu
    }

    /// Force PC to a value (snapshot loaders, ROM traps).
    pub fn force_pc(&mut self, pc: u16) {
        self.regs.pc = pc;
        self.regs.halted = false;
    }

    // -----------------------------------------------------------------------
    // Bus helpers
    // -----------------------------------------------------------------------

    /// One M1 cycle: opcode fetch, PC and R increment, refresh. 4 T-states.
    fn fetch_opcode<B: Bus>(&mut self, bus: &mut B) -> u8 {
        let op = bus.fetch(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        self.regs.inc_r();
        bus.refresh(self.regs.ir());
        op
    }

    fn imm8<B: Bus>(&mut self, bus: &mut B) -> u8 {
        let value = bus.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        value
    }

    fn imm16<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let lo = self.imm8(bus);
        let hi = self.imm8(bus);
        u16::from(lo) | (u16::from(hi) << 8)
    }

    fn read16<B: Bus>(bus: &mut B, addr: u16) -> u16 {
        let lo = bus.read(addr);
        let hi = bus.read(addr.wrapping_add(1));
        u16::from(lo) | (u16::from(hi) << 8)
    }

    fn write16<B: Bus>(bus: &mut B, addr: u16, value: u16) {
        bus.write(addr, value as u8);
        bus.write(addr.wrapping_add(1), (value >> 8) as u8);
    }

    fn push16<B: Bus>(&mut self, bus: &mut B, value: u16) {
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        bus.write(self.regs.sp, (value >> 8) as u8);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        bus.write(self.regs.sp, value as u8);
    }

    fn pop16<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let lo = bus.read(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        let hi = bus.read(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        u16::from(lo) | (u16::from(hi) << 8)
    }

    // -----------------------------------------------------------------------
    // Register selection by opcode field
    // -----------------------------------------------------------------------

    /// Register by 3-bit field: B C D E H L - A. Index 6 is the (HL)
    /// memory form and is handled by the caller.
    fn reg8(&self, index: u8) -> u8 {
        match index {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => self.regs.h,
            5 => self.regs.l,
            7 => self.regs.a,
            _ => unreachable!("(HL) is not a register"),
        }
    }

    fn set_reg8(&mut self, index: u8, value: u8) {
        match index {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => self.regs.h = value,
            5 => self.regs.l = value,
            7 => self.regs.a = value,
            _ => unreachable!("(HL) is not a register"),
        }
    }

    /// Register pair by 2-bit field: BC DE HL SP.
    fn reg16(&self, index: u8) -> u16 {
        match index & 3 {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.regs.hl(),
            _ => self.regs.sp,
        }
    }

    fn set_reg16(&mut self, index: u8, value: u16) {
        match index & 3 {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.regs.set_hl(value),
            _ => self.regs.sp = value,
        }
    }

    /// Condition by 3-bit field: NZ Z NC C PO PE P M.
    fn condition(&self, index: u8) -> bool {
        let f = self.regs.f;
        match index {
            0 => f & ZF == 0,
            1 => f & ZF != 0,
            2 => f & CF == 0,
            3 => f & CF != 0,
            4 => f & PF == 0,
            5 => f & PF != 0,
            6 => f & SF == 0,
            _ => f & SF != 0,
        }
    }
}

impl Default for Z80 {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu for Z80 {
    fn step<B: IoBus>(&mut self, bus: &mut B) -> u32 {
        let start = bus.tstates();

        if self.regs.halted {
            // The halted CPU keeps executing internal NOPs: an M1 cycle per
            // step with R still incrementing, PC frozen on the HALT opcode.
            bus.fetch(self.regs.pc);
            self.regs.inc_r();
            bus.refresh(self.regs.ir());
            return (bus.tstates() - start) as u32;
        }

        self.ei_delay = false;
        let op = self.fetch_opcode(bus);
        match op {
            0xCB => self.execute_cb(bus),
            0xED => self.execute_ed(bus),
            0xDD => self.execute_index(bus, false),
            0xFD => self.execute_index(bus, true),
            _ => self.execute_main(bus, op),
        }

        (bus.tstates() - start) as u32
    }

    fn reset(&mut self) {
        self.regs = Registers {
            pc: 0x0000,
            sp: 0xFFFF,
            i: 0,
            r: 0,
            iff1: false,
            iff2: false,
            im: 0,
            halted: false,
            ..Registers::default()
        };
        // Register pairs power up undefined; all-ones matches the hardware
        // tendency and the documented reset contract.
        self.regs.set_af(0xFFFF);
        self.regs.set_bc(0xFFFF);
        self.regs.set_de(0xFFFF);
        self.regs.set_hl(0xFFFF);
        self.regs.a_alt = 0xFF;
        self.regs.f_alt = 0xFF;
        self.regs.b_alt = 0xFF;
        self.regs.c_alt = 0xFF;
        self.regs.d_alt = 0xFF;
        self.regs.e_alt = 0xFF;
        self.regs.h_alt = 0xFF;
        self.regs.l_alt = 0xFF;
        self.regs.ix = 0xFFFF;
        self.regs.iy = 0xFFFF;
        self.ei_delay = false;
    }

    fn interrupt<B: IoBus>(&mut self, bus: &mut B) -> bool {
        // Not accepted while disabled, or in the dead T-state window right
        // after EI.
        if !self.regs.iff1 || self.ei_delay {
            return false;
        }

        self.regs.iff1 = false;
        self.regs.iff2 = false;

        if self.regs.halted {
            self.regs.halted = false;
            self.regs.pc = self.regs.pc.wrapping_add(1);
        }

        self.regs.inc_r();
        bus.interrupt_ack(self.regs.ir());
        let pc = self.regs.pc;
        self.push16(bus, pc);

        match self.regs.im {
            // IM 0: the Spectrum bus floats 0xFF during acknowledge, which
            // is RST 38 — identical to IM 1.
            0 | 1 => self.regs.pc = 0x0038,
            _ => {
                // IM 2: vector table entry at (I << 8) | 0xFF
                let vector = (u16::from(self.regs.i) << 8) | 0x00FF;
                self.regs.pc = Self::read16(bus, vector);
            }
        }
        true
    }

    fn nmi<B: IoBus>(&mut self, bus: &mut B) {
        self.regs.iff2 = self.regs.iff1;
        self.regs.iff1 = false;

        if self.regs.halted {
            self.regs.halted = false;
            self.regs.pc = self.regs.pc.wrapping_add(1);
        }

        self.regs.inc_r();
        bus.tick(5);
        let pc = self.regs.pc;
        self.push16(bus, pc);
        self.regs.pc = 0x0066;
    }

    fn pc(&self) -> u16 {
        self.regs.pc
    }

    fn is_halted(&self) -> bool {
        self.regs.halted
    }
}
