//! The Linker/Emitter (spec §4.4): assembles the bootloader and every
//! compiled method into one final image, resolving cross-method call
//! fixups along the way.
//!
//! ELF packaging itself is delegated to an external collaborator (see
//! `elf.rs`); this module only produces the raw instruction stream, the
//! method offset table, and (optionally) a textual disassembly.

use std::collections::HashMap;
use std::io::Write;

use log::debug;

use crate::bootloader;
use crate::buffer::{InstrOffset, InstructionBuffer};
use crate::compiler::CompiledMethod;
use crate::disasm;
use crate::error::{CodegenError, Result};
use crate::inst::SpeInstr;
use crate::ir::MethodId;

/// Offset, in bytes, at which linked execution begins — the value
/// handed to the ELF packager as `BOOTLOADER_START_OFFSET`.
pub const BOOTLOADER_START_OFFSET: u32 = bootloader::BOOTLOADER_START_OFFSET;

/// The result of linking: one contiguous instruction stream plus every
/// offset a downstream consumer (the ELF packager, a disassembler, a
/// test) needs.
pub struct LinkedImage {
    pub buffer: InstructionBuffer,
    pub call_handler_offset: InstrOffset,
    pub entry_function_offset: InstrOffset,
    pub method_offsets: HashMap<MethodId, InstrOffset>,
}

impl LinkedImage {
    /// Total length of the image, in bytes.
    pub fn byte_len(&self) -> u64 {
        self.buffer.len() as u64 * 4
    }

    /// Serialize the image as a big-endian stream of 32-bit words (spec
    /// §4.4 step 7, §6).
    pub fn write_binary<W: Write>(&self, out: &mut W) -> Result<()> {
        self.buffer.serialize(out)?;
        Ok(())
    }

    /// Write one mnemonic per line, with a `# Function entry` comment
    /// preceding every recorded method base offset (spec §4.4 step 7).
    pub fn write_disassembly<W: Write>(&self, out: &mut W) -> Result<()> {
        disasm::write(&self.buffer, &self.method_offsets, out)
    }
}

pub struct Linker;

impl Linker {
    /// Link `methods` (in input order; the first is the program entry
    /// point) into one final image.
    pub fn link(methods: &[CompiledMethod]) -> Result<LinkedImage> {
        let mut buffer = InstructionBuffer::new();

        // Step 1: bootloader, reserving the first four header slots.
        let bl = bootloader::build();
        buffer.extend_from(&bl.buffer);

        // Step 2: call handler trampoline (currently a single trap).
        let call_handler_offset = buffer.len();
        buffer.append(SpeInstr::Stop);

        // Step 3: patch the bootloader's branch-and-set-link. Its
        // displacement is expressed relative to `call_handler_offset`,
        // with a `+2` correction for where the patched instruction sits
        // in the bootloader relative to that reference point.
        let entry_function_offset = buffer.len();
        let disp = (entry_function_offset as i64 - call_handler_offset as i64) + 2;
        let entry_site = bl.entry_branch_site;
        if !buffer.get_mut(entry_site).patch_i16(disp) {
            return Err(CodegenError::BranchOutOfRange {
                method: methods.first().map(|m| m.id).unwrap_or(MethodId(0)),
                source: entry_site,
                target: entry_function_offset,
            });
        }

        // Step 4: lay out every method's base offset without copying
        // yet, so call-fixup resolution can address any method
        // regardless of input order.
        let mut method_offsets = HashMap::new();
        let mut cursor = entry_function_offset;
        for m in methods {
            method_offsets.insert(m.id, cursor);
            cursor += m.buffer.len();
        }

        // Step 5: resolve each method's call fixups against its own
        // buffer before concatenation.
        let mut patched_methods: Vec<InstructionBuffer> =
            methods.iter().map(|m| m.buffer.clone()).collect();
        for (m, patched) in methods.iter().zip(patched_methods.iter_mut()) {
            let base = method_offsets[&m.id];
            for fixup in &m.call_fixups {
                if !method_offsets.contains_key(&fixup.callee) {
                    return Err(CodegenError::MissingCallee {
                        caller: m.id,
                        callee: fixup.callee,
                    });
                }
                let absolute_site = base + fixup.site;
                let disp = call_handler_offset as i64 - absolute_site as i64;
                if !patched.get_mut(fixup.site).patch_i16(disp) {
                    return Err(CodegenError::BranchOutOfRange {
                        method: m.id,
                        source: absolute_site,
                        target: call_handler_offset,
                    });
                }
            }
        }

        // Step 6: concatenate.
        for patched in &patched_methods {
            buffer.extend_from(patched);
        }

        debug!(
            "linked {} methods into {} instructions ({} bytes)",
            methods.len(),
            buffer.len(),
            buffer.len() * 4
        );

        Ok(LinkedImage {
            buffer,
            call_handler_offset,
            entry_function_offset,
            method_offsets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrMethod, MethodId};

    // CompiledMethod has no public constructor outside the compiler
    // module; build trivial ones via MethodCompiler instead of
    // hand-rolling private fields.
    fn leaf_method(id: u32) -> CompiledMethod {
        let method = IrMethod {
            id: MethodId(id),
            name: format!("m{id}"),
            locals: Vec::new(),
            params: Vec::new(),
            body: Vec::new(),
        };
        crate::compiler::MethodCompiler::compile(&method).unwrap()
    }

    #[test]
    fn entry_point_is_first_method() {
        let m0 = leaf_method(0);
        let m1 = leaf_method(1);
        let linked = Linker::link(&[m0, m1]).unwrap();
        assert!(linked.method_offsets[&MethodId(0)] < linked.method_offsets[&MethodId(1)]);
        assert_eq!(
            linked.method_offsets[&MethodId(0)],
            linked.entry_function_offset
        );
    }

    #[test]
    fn image_starts_with_trap_canary() {
        let linked = Linker::link(&[leaf_method(0)]).unwrap();
        assert_eq!(linked.buffer.get(0), SpeInstr::Stop);
    }

    #[test]
    fn missing_callee_is_reported() {
        use crate::compiler::CallFixup;
        let mut m0 = leaf_method(0);
        let site = m0.buffer.append(SpeInstr::Brsl {
            rt: crate::regs::LR,
            i16: 0,
        });
        m0.call_fixups.push(CallFixup {
            site,
            callee: MethodId(99),
        });
        let err = Linker::link(&[m0]).unwrap_err();
        assert!(matches!(err, CodegenError::MissingCallee { .. }));
    }
}
