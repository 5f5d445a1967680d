//! Drives translation of one IR method into a `CompiledMethod` (spec §4.3).

use std::collections::HashMap;

use log::debug;

use crate::buffer::{InstrOffset, InstructionBuffer};
use crate::error::{CodegenError, Result};
use crate::inst::SpeInstr;
use crate::ir::{InstrId, IrInstr, IrMethod, MethodId};
use crate::mapper::OpCodeMapper;
use crate::regs::{self, MAX_LV_REGISTERS, REGISTER_SIZE};

/// A branch whose target offset wasn't known yet when it was emitted.
#[derive(Debug, Clone, Copy)]
pub struct BranchFixup {
    pub site: InstrOffset,
    pub target: InstrId,
}

/// A call whose callee's base offset is only known once the whole
/// program is linked.
#[derive(Debug, Clone, Copy)]
pub struct CallFixup {
    pub site: InstrOffset,
    pub callee: MethodId,
}

/// The output of compiling one IR method.
#[derive(Debug, Clone)]
pub struct CompiledMethod {
    pub id: MethodId,
    pub name: String,
    pub locals: u32,
    pub args: u32,
    pub buffer: InstructionBuffer,
    /// First emitted SPE instruction offset for each IR instruction,
    /// recorded at translation time (spec §4.3 phase 5) and consulted
    /// during branch fixup (phase 9).
    pub offsets: HashMap<InstrId, InstrOffset>,
    pub branch_fixups: Vec<BranchFixup>,
    pub call_fixups: Vec<CallFixup>,
    pub max_stack_depth: u32,
    /// Offsets of the three prologue placeholders, patched once
    /// `max_stack_depth` is final (phase 8).
    save_sp_site: InstrOffset,
    adjust_sp_site: InstrOffset,
    epilogue_adjust_sp_site: InstrOffset,
}

impl CompiledMethod {
    /// Preserved register slots, in save order: locals first, then
    /// arguments (spec §4.3 phase 2: "for each permanent register
    /// `_LV0 + i` for `i in [0, locals+args)`").
    fn preserved_registers(locals: u32, args: u32) -> impl Iterator<Item = u8> {
        (0..locals + args).map(move |i| regs::LV0 + i as u8)
    }
}

/// Drives one IR method through prologue synthesis, body translation,
/// and epilogue synthesis.
pub struct MethodCompiler;

impl MethodCompiler {
    /// Compile `method`, failing with `TooManyRegisters` before emitting
    /// anything if the register window can't hold it (spec §4.3 phase/8
    /// failure conditions; no partial output on failure).
    pub fn compile(method: &IrMethod) -> Result<CompiledMethod> {
        let locals = method.locals_count();
        let args = method.args_count();
        if (locals + args) as usize > MAX_LV_REGISTERS {
            return Err(CodegenError::TooManyRegisters {
                method: method.id,
                locals,
                args,
                max: MAX_LV_REGISTERS,
            });
        }

        let mut out = CompiledMethod {
            id: method.id,
            name: method.name.clone(),
            locals,
            args,
            buffer: InstructionBuffer::new(),
            offsets: HashMap::new(),
            branch_fixups: Vec::new(),
            call_fixups: Vec::new(),
            max_stack_depth: locals + args,
            save_sp_site: 0,
            adjust_sp_site: 0,
            epilogue_adjust_sp_site: 0,
        };

        Self::prologue(&mut out);
        Self::preserve_registers(&mut out, locals, args);
        Self::init_locals(&mut out, method);
        Self::copy_in_args(&mut out, locals, args);

        let mut mapper = OpCodeMapper::new(&mut out, locals, args);
        for child in &method.body {
            Self::translate(&mut mapper, child)?;
        }
        let max_stack_depth = mapper.max_stack_depth();
        out.max_stack_depth = max_stack_depth;

        Self::restore_registers(&mut out, locals, args);
        Self::epilogue(&mut out);
        Self::patch_stack_size(&mut out)?;
        Self::resolve_branches(&mut out)?;

        debug!(
            "compiled method {:?} ({}): {} instructions, max_stack_depth={}",
            out.id,
            out.name,
            out.buffer.len(),
            out.max_stack_depth
        );
        Ok(out)
    }

    /// Phase 1: save LR, save SP, adjust SP. The SP-related immediates
    /// are placeholders patched once `max_stack_depth` is known.
    fn prologue(m: &mut CompiledMethod) {
        m.buffer.append(SpeInstr::Stqd {
            rt: regs::LR,
            ra: regs::SP,
            i10: 1, // SP+16 in 16-byte units
        });
        m.save_sp_site = m.buffer.append(SpeInstr::Stqd {
            rt: regs::SP,
            ra: regs::SP,
            i10: 0, // placeholder, patched in patch_stack_size
        });
        m.adjust_sp_site = m.buffer.append(SpeInstr::Ai {
            rt: regs::SP,
            ra: regs::SP,
            i10: 0, // placeholder
        });
    }

    /// Phase 2: preserve the callee-saved registers this method will use.
    fn preserve_registers(m: &mut CompiledMethod, locals: u32, args: u32) {
        for (i, reg) in CompiledMethod::preserved_registers(locals, args).enumerate() {
            m.buffer.append(SpeInstr::Stqd {
                rt: reg,
                ra: regs::SP,
                i10: i as i16,
            });
        }
    }

    /// Phase 3: zero-initialize locals that ask for it.
    fn init_locals(m: &mut CompiledMethod, method: &IrMethod) {
        for i in 0..method.locals_count() {
            if method.needs_zero_init(i) {
                m.buffer.append(SpeInstr::Il {
                    rt: regs::local_reg(i),
                    i16: 0,
                });
            }
        }
    }

    /// Phase 4: copy incoming argument registers into their permanent
    /// slots.
    fn copy_in_args(m: &mut CompiledMethod, locals: u32, args: u32) {
        for i in 0..args {
            m.buffer.append(SpeInstr::Ai {
                rt: regs::arg_reg(locals, i),
                ra: regs::ARG0 + i as u8,
                i10: 0,
            });
        }
    }

    /// Phase 5: walk the tree post-order, recording offsets and
    /// dispatching through the opcode table.
    fn translate(mapper: &mut OpCodeMapper, instr: &IrInstr) -> Result<()> {
        for child in &instr.children {
            Self::translate(mapper, child)?;
        }
        let offset = mapper.method().buffer.len();
        mapper.method().offsets.insert(instr.id, offset);
        mapper.dispatch(instr)
    }

    /// Phase 6: restore the callee-saved registers, in reverse order.
    fn restore_registers(m: &mut CompiledMethod, locals: u32, args: u32) {
        let saved: Vec<u8> = CompiledMethod::preserved_registers(locals, args).collect();
        for (i, reg) in saved.iter().enumerate().rev() {
            m.buffer.append(SpeInstr::Lqd {
                rt: *reg,
                ra: regs::SP,
                i10: i as i16,
            });
        }
    }

    /// Phase 7: adjust SP back, reload LR, branch to it.
    fn epilogue(m: &mut CompiledMethod) {
        m.epilogue_adjust_sp_site = m.buffer.append(SpeInstr::Ai {
            rt: regs::SP,
            ra: regs::SP,
            i10: 0, // placeholder
        });
        m.buffer.append(SpeInstr::Lqd {
            rt: regs::LR,
            ra: regs::SP,
            i10: 1,
        });
        m.buffer.append(SpeInstr::Bi { ra: regs::LR });
    }

    /// Phase 8: patch the three SP-related placeholders now that
    /// `max_stack_depth` is final. All stack motion is in 16-byte units
    /// (`REGISTER_SIZE`); the prologue's decrement and the epilogue's
    /// increment both target `Ai`, whose `i10` is a raw byte count, so
    /// they must be patched with the same scale for the epilogue to
    /// actually invert the prologue.
    fn patch_stack_size(m: &mut CompiledMethod) -> Result<()> {
        let depth = m.max_stack_depth as i32;
        let quadwords = depth; // Stqd's i10 is in 16-byte units
        let bytes = depth * REGISTER_SIZE; // Ai's i10 is a raw byte count

        let save_ok = m.buffer.get_mut(m.save_sp_site).patch_i10(-quadwords);
        let adjust_ok = m.buffer.get_mut(m.adjust_sp_site).patch_i10(-bytes);
        let restore_ok = m
            .buffer
            .get_mut(m.epilogue_adjust_sp_site)
            .patch_i10(bytes);

        if !save_ok || !adjust_ok || !restore_ok {
            // The positive-going restore is the tighter bound: i10 only
            // holds [-512, 511], so a byte count must stay below 512.
            let max = ((1u32 << (crate::inst::I10_BITS - 1)) - 1) / REGISTER_SIZE as u32;
            return Err(CodegenError::StackFrameTooLarge {
                method: m.id,
                depth: m.max_stack_depth,
                max,
            });
        }
        Ok(())
    }

    /// Phase 9: resolve every pending branch fixup against the
    /// per-instruction offset map, writing the signed instruction-unit
    /// displacement into each branch's 16-bit immediate.
    fn resolve_branches(m: &mut CompiledMethod) -> Result<()> {
        for fixup in &m.branch_fixups {
            let target_offset = *m.offsets.get(&fixup.target).ok_or({
                CodegenError::UnresolvedBranchTarget {
                    method: m.id,
                    target: fixup.target.0,
                }
            })?;
            let displacement = target_offset as i64 - fixup.site as i64;
            let instr = m.buffer.get_mut(fixup.site);
            if !instr.patch_i16(displacement) {
                return Err(CodegenError::BranchOutOfRange {
                    method: m.id,
                    source: fixup.site,
                    target: target_offset,
                });
            }
        }
        Ok(())
    }
}
