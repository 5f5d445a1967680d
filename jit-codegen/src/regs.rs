//! SPE register window, per the ABI in spec §6.
//!
//! The SPE exposes 128 general-purpose registers. This module names the
//! fixed slices of that space the rest of the code generator relies on;
//! nothing here is configurable per target, the window is part of the ABI.

/// Link register: holds the return address.
pub const LR: u8 = 0;

/// Stack pointer.
pub const SP: u8 = 1;

/// First incoming argument register. Arguments occupy `ARG0..ARG0+args`.
pub const ARG0: u8 = 3;

/// First caller-owned scratch register. Scratch registers never carry a
/// value across an opcode-translation boundary.
pub const SCRATCH0: u8 = 75;

/// Number of scratch registers available to a single opcode translation
/// (`_TMP0.._TMP4` in spec terms).
pub const SCRATCH_COUNT: u8 = 5;

/// First callee-saved register. Locals, copied-in arguments, and the
/// virtual operand stack all live in `LV0..LV0+locals+args+stack_depth`.
pub const LV0: u8 = 80;

/// Upper bound (exclusive) of the callee-saved window.
pub const LV_END: u8 = 128;

/// Largest `locals + args` a method may declare before the permanent
/// register window is exhausted.
pub const MAX_LV_REGISTERS: usize = 47;

/// Stack slot unit size in bytes. All stack motion is in 16-byte units.
pub const REGISTER_SIZE: i32 = 16;

/// Initial stack pointer value: top of the 256 KB local store, minus one
/// register slot.
pub const INITIAL_SP: u32 = 0x40000 - 16;

/// `scratch[i]` for `i in 0..SCRATCH_COUNT`.
pub fn scratch(i: u8) -> u8 {
    debug_assert!(i < SCRATCH_COUNT);
    SCRATCH0 + i
}

/// The permanent register backing local variable `i`.
pub fn local_reg(i: u32) -> u8 {
    LV0 + i as u8
}

/// The permanent register backing argument `i`, once copied in by the
/// prologue (`_LV0 + locals + i`).
pub fn arg_reg(locals: u32, i: u32) -> u8 {
    LV0 + (locals + i) as u8
}

/// The register backing virtual stack slot `i` (`_LV0 + locals + args + i`).
pub fn stack_reg(locals: u32, args: u32, i: u32) -> u8 {
    LV0 + (locals + args + i) as u8
}
