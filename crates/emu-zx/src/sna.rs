//! Applying 48K SNA snapshots to the machine.
//!
//! The parsed header restores the register file, RAM lands at
//! $4000-$FFFF, and PC is popped from the restored stack (the snapshot
//! tool pushed it there).

use format_sna::SnaSnapshot;

use crate::spectrum::Spectrum;

/// Load a parsed snapshot into the machine.
pub fn apply(spectrum: &mut Spectrum, snapshot: &SnaSnapshot) {
    use emu_core::Cpu;

    spectrum.cpu_mut().reset();
    let regs = &mut spectrum.cpu_mut().regs;

    regs.i = snapshot.i;
    regs.h_alt = (snapshot.hl_alt >> 8) as u8;
    regs.l_alt = snapshot.hl_alt as u8;
    regs.d_alt = (snapshot.de_alt >> 8) as u8;
    regs.e_alt = snapshot.de_alt as u8;
    regs.b_alt = (snapshot.bc_alt >> 8) as u8;
    regs.c_alt = snapshot.bc_alt as u8;
    regs.a_alt = (snapshot.af_alt >> 8) as u8;
    regs.f_alt = snapshot.af_alt as u8;
    regs.set_hl(snapshot.hl);
    regs.set_de(snapshot.de);
    regs.set_bc(snapshot.bc);
    regs.iy = snapshot.iy;
    regs.ix = snapshot.ix;
    regs.iff1 = snapshot.iff2;
    regs.iff2 = snapshot.iff2;
    regs.r = snapshot.r;
    regs.set_af(snapshot.af);
    regs.im = snapshot.interrupt_mode;

    for (offset, &byte) in snapshot.ram.iter().enumerate() {
        spectrum
            .bus
            .memory
            .write(0x4000u16.wrapping_add(offset as u16), byte);
    }

    spectrum.bus.ula.set_border_colour(snapshot.border);

    // Pop PC from the restored stack
    let pc = snapshot.stacked_pc();
    let regs = &mut spectrum.cpu_mut().regs;
    regs.sp = snapshot.sp.wrapping_add(2);
    regs.pc = pc;
}
