//! Binary machine code emission (spec §4.1).
//!
//! Mirrors the split `cranelift-codegen::binemit` draws between the
//! in-memory instruction container and the eventual output sink: the
//! buffer only ever grows or has its own already-appended entries
//! patched, and serialization writes through any `std::io::Write`.

use std::io::{self, Write};

use crate::inst::SpeInstr;

/// Offset of an instruction within a buffer, in instruction units (not
/// bytes) unless noted otherwise at the call site.
pub type InstrOffset = u32;

/// A growable, append-only sequence of encoded SPE instructions.
///
/// Belongs exclusively to one `CompiledMethod` during translation, or to
/// the `Linker` for the final concatenated image.
#[derive(Debug, Default, Clone)]
pub struct InstructionBuffer {
    instrs: Vec<SpeInstr>,
}

impl InstructionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one instruction, returning its offset.
    pub fn append(&mut self, instr: SpeInstr) -> InstrOffset {
        let offset = self.instrs.len() as InstrOffset;
        self.instrs.push(instr);
        offset
    }

    pub fn len(&self) -> InstrOffset {
        self.instrs.len() as InstrOffset
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// Mutable access to a previously appended instruction, for patching
    /// immediate fields in place.
    pub fn get_mut(&mut self, offset: InstrOffset) -> &mut SpeInstr {
        &mut self.instrs[offset as usize]
    }

    pub fn get(&self, offset: InstrOffset) -> SpeInstr {
        self.instrs[offset as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpeInstr> {
        self.instrs.iter()
    }

    /// Append every instruction of `other` onto the end of this buffer,
    /// returning the base offset at which `other` now starts.
    pub fn extend_from(&mut self, other: &InstructionBuffer) -> InstrOffset {
        let base = self.len();
        self.instrs.extend_from_slice(&other.instrs);
        base
    }

    /// Write every instruction as four big-endian bytes, regardless of
    /// host byte order (spec §6, "Endianness").
    pub fn serialize<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for instr in &self.instrs {
            out.write_all(&instr.encode().to_be_bytes())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_patch() {
        let mut buf = InstructionBuffer::new();
        let off = buf.append(SpeInstr::Ai { rt: 1, ra: 1, i10: 0 });
        assert!(buf.get_mut(off).patch_i10(-3));
        assert_eq!(buf.get(off), SpeInstr::Ai { rt: 1, ra: 1, i10: -3 });
    }

    #[test]
    fn serialize_is_big_endian() {
        let mut buf = InstructionBuffer::new();
        buf.append(SpeInstr::Stop);
        let mut out = Vec::new();
        buf.serialize(&mut out).unwrap();
        assert_eq!(out, SpeInstr::Stop.encode().to_be_bytes().to_vec());
    }

    #[test]
    fn extend_from_reports_base_offset() {
        let mut a = InstructionBuffer::new();
        a.append(SpeInstr::Stop);
        let mut b = InstructionBuffer::new();
        b.append(SpeInstr::Bi { ra: 0 });
        let base = a.extend_from(&b);
        assert_eq!(base, 1);
        assert_eq!(a.len(), 2);
    }
}
