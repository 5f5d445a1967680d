//! The fixed bootloader sequence (spec §4.4 step 1, §6).
//!
//! Unlike a `CompiledMethod`, nothing here is translated from IR: this
//! is a hand-written, fixed instruction sequence the `Linker` prepends
//! to every linked image. It owns the 16-byte reserved header, sets up
//! the initial stack pointer, copies host-supplied arguments into the
//! argument registers via a self-modifying load, and ends with a
//! branch-and-set-link the linker patches to the program entry point.

use crate::inst::SpeInstr;
use crate::buffer::{InstrOffset, InstructionBuffer};
use crate::regs;

/// Reserved header slots at the front of every image (spec §6): trap
/// canary, argument count, argument pointer, padding. Each slot is one
/// instruction-sized (4-byte) word.
pub const HEADER_SLOTS: u32 = 4;

/// Byte offset of the first bootloader instruction proper — the value
/// the Linker hands the ELF packager as `BOOTLOADER_START_OFFSET`.
pub const BOOTLOADER_START_OFFSET: u32 = HEADER_SLOTS * 4;

/// Registers owned by the bootloader body. It runs once, before any
/// method frame exists, so unlike a method translation it is free to
/// use the full permanent register window rather than the five-register
/// scratch budget.
mod work {
    use crate::regs;
    pub const ZERO: u8 = regs::LV0;
    pub const ARGC: u8 = regs::LV0 + 1;
    pub const ARGPTR: u8 = regs::LV0 + 2;
    pub const INDEX: u8 = regs::LV0 + 3;
    pub const NEW_RT: u8 = regs::LV0 + 4;
    pub const CLEARED_TEMPLATE: u8 = regs::LV0 + 5;
    pub const ORIGINAL_WORD: u8 = regs::LV0 + 6;
    pub const PATCHED_WORD: u8 = regs::LV0 + 7;
    pub const CMP: u8 = regs::LV0 + 8;
}

/// The assembled bootloader plus the offsets the `Linker` still needs
/// to patch or read.
pub struct Bootloader {
    pub buffer: InstructionBuffer,
    /// Site of the final `brsl`; the Linker patches its displacement
    /// once `entryFunctionOffset` is known (spec §4.4 step 3).
    pub entry_branch_site: InstrOffset,
}

fn load_imm32(buf: &mut InstructionBuffer, reg: u8, value: i32) {
    if let Ok(small) = i16::try_from(value) {
        buf.append(SpeInstr::Il { rt: reg, i16: small });
    } else {
        let upper = (value as u32 >> 16) as i16;
        let lower = (value as u32 & 0xffff) as i16;
        buf.append(SpeInstr::Ilhu { rt: reg, i16: upper });
        buf.append(SpeInstr::Iohl { rt: reg, i16: lower });
    }
}

/// Build the fixed bootloader sequence.
///
/// The reserved header occupies instruction offsets `0..HEADER_SLOTS`:
/// offset 0 is a trap (doubling as the null-pointer canary — `Stop`
/// encodes to the all-zero word, which is also what an uninitialized
/// null-check trap would look like), offsets 1 and 2 are populated by
/// the host before execution (argument count, argument pointer) and are
/// zero placeholders here, offset 3 is padding.
pub fn build() -> Bootloader {
    let mut buf = InstructionBuffer::new();

    // -- reserved header ------------------------------------------------
    buf.append(SpeInstr::Stop);
    buf.append(SpeInstr::Raw(0)); // argument count, host-populated
    buf.append(SpeInstr::Raw(0)); // argument pointer, host-populated
    buf.append(SpeInstr::Raw(0)); // padding
    debug_assert_eq!(buf.len(), BOOTLOADER_START_OFFSET);

    // -- setup ------------------------------------------------------------
    load_imm32(&mut buf, work::ZERO, 0);
    load_imm32(&mut buf, regs::SP, regs::INITIAL_SP as i32);
    buf.append(SpeInstr::Lw {
        rt: work::ARGC,
        ra: work::ZERO,
        i10: 1,
    });
    buf.append(SpeInstr::Lw {
        rt: work::ARGPTR,
        ra: work::ZERO,
        i10: 2,
    });

    let skip_loop_site = buf.append(SpeInstr::Brz {
        ra: work::ARGC,
        i16: 0,
    });

    load_imm32(&mut buf, work::INDEX, 0);

    // The self-modifying load's address field (`ra`) always names the
    // ARGPTR register; only its target-register field changes between
    // iterations. Both templates below are known at image-build time
    // because they differ only in `rt`.
    load_imm32(
        &mut buf,
        work::CLEARED_TEMPLATE,
        SpeInstr::Lqd {
            rt: 0,
            ra: work::ARGPTR,
            i10: 0,
        }
        .encode() as i32,
    );
    load_imm32(
        &mut buf,
        work::ORIGINAL_WORD,
        SpeInstr::Lqd {
            rt: regs::ARG0,
            ra: work::ARGPTR,
            i10: 0,
        }
        .encode() as i32,
    );

    let loop_start = buf.len();

    // new_rt = ARG0 + index
    buf.append(SpeInstr::Ai {
        rt: work::NEW_RT,
        ra: work::INDEX,
        i10: regs::ARG0 as i16,
    });
    // patched_word = cleared_template | new_rt
    buf.append(SpeInstr::Or {
        rt: work::PATCHED_WORD,
        ra: work::CLEARED_TEMPLATE,
        rb: work::NEW_RT,
    });
    let lqd_offset = buf.len() + 1;
    buf.append(SpeInstr::Sw {
        rt: work::PATCHED_WORD,
        ra: work::ZERO,
        i10: lqd_offset as i16,
    });

    // The instruction the write above just rewrote in memory. Its `rt`
    // field here is a placeholder; by the time this executes, local
    // store holds whatever `patched_word` computed.
    let self_load_site = buf.append(SpeInstr::Lqd {
        rt: regs::ARG0,
        ra: work::ARGPTR,
        i10: 0,
    });
    debug_assert_eq!(self_load_site, lqd_offset);

    buf.append(SpeInstr::Ai {
        rt: work::ARGPTR,
        ra: work::ARGPTR,
        i10: regs::REGISTER_SIZE as i16,
    });
    buf.append(SpeInstr::Ai {
        rt: work::INDEX,
        ra: work::INDEX,
        i10: 1,
    });
    buf.append(SpeInstr::Cgt {
        rt: work::CMP,
        ra: work::ARGC,
        rb: work::INDEX,
    });
    let back_edge_site = buf.append(SpeInstr::Brnz {
        ra: work::CMP,
        i16: 0,
    });
    let back_edge_disp = loop_start as i64 - back_edge_site as i64;
    let patched = buf.get_mut(back_edge_site).patch_i16(back_edge_disp);
    debug_assert!(patched, "bootloader loop body too large for a 16-bit branch");

    let after_loop = buf.len();
    let skip_disp = after_loop as i64 - skip_loop_site as i64;
    let patched = buf.get_mut(skip_loop_site).patch_i16(skip_disp);
    debug_assert!(patched, "bootloader preamble too large for a 16-bit branch");

    // Restore the self-modifying load's original encoding so a second
    // invocation of this bootloader (re-entrant by construction) starts
    // from the same state as the first.
    buf.append(SpeInstr::Sw {
        rt: work::ORIGINAL_WORD,
        ra: work::ZERO,
        i10: lqd_offset as i16,
    });

    let entry_branch_site = buf.append(SpeInstr::Brsl {
        rt: regs::LR,
        i16: 0,
    });

    Bootloader {
        buffer: buf,
        entry_branch_site,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_occupies_first_four_slots() {
        let bl = build();
        assert_eq!(bl.buffer.get(0), SpeInstr::Stop);
        assert_eq!(bl.buffer.get(1), SpeInstr::Raw(0));
        assert_eq!(bl.buffer.get(2), SpeInstr::Raw(0));
        assert_eq!(bl.buffer.get(3), SpeInstr::Raw(0));
    }

    #[test]
    fn entry_branch_is_last_instruction() {
        let bl = build();
        let last = bl.buffer.len() - 1;
        assert_eq!(bl.entry_branch_site, last);
        assert_eq!(bl.buffer.get(last), SpeInstr::Brsl { rt: regs::LR, i16: 0 });
    }

    #[test]
    fn self_modifying_load_restored_before_entry() {
        let bl = build();
        // The restore-site Sw sits immediately before the entry branch.
        let restore_site = bl.entry_branch_site - 1;
        match bl.buffer.get(restore_site) {
            SpeInstr::Sw { .. } => {}
            other => panic!("expected a restoring Sw, found {other:?}"),
        }
    }
}
