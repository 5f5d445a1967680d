//! Per-opcode translation (spec §4.2).
//!
//! `OpCodeMapper` holds the virtual operand stack (a mapping from CIL
//! stack slots to dedicated permanent registers) and exposes one
//! translation operation per supported CIL opcode. The translation table
//! mapping an opcode's discriminant to its operation is built once, the
//! way spec §5/§9 describes ("an explicit registration: a compile-time
//! or startup-time list of `(opcode_id, function_pointer)` pairs").

use std::collections::HashMap;
use std::sync::OnceLock;

use log::trace;

use crate::compiler::{BranchFixup, CallFixup};
use crate::error::{CodegenError, Result};
use crate::inst::SpeInstr;
use crate::ir::{CilOp, IrInstr, MethodId, OpKind};
use crate::regs;

type OpFn = fn(&mut OpCodeMapper, &IrInstr) -> Result<()>;

fn table() -> &'static HashMap<OpKind, OpFn> {
    static TABLE: OnceLock<HashMap<OpKind, OpFn>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut t: HashMap<OpKind, OpFn> = HashMap::new();
        t.insert(OpKind::LdcI4, OpCodeMapper::ldc_i4 as OpFn);
        t.insert(OpKind::LdcI8, OpCodeMapper::ldc_i8 as OpFn);
        t.insert(OpKind::LdArg, OpCodeMapper::ldarg as OpFn);
        t.insert(OpKind::LdLoc, OpCodeMapper::ldloc as OpFn);
        t.insert(OpKind::StLoc, OpCodeMapper::stloc as OpFn);
        t.insert(OpKind::Dup, OpCodeMapper::dup as OpFn);
        t.insert(OpKind::Pop, OpCodeMapper::pop_op as OpFn);
        t.insert(OpKind::Add, OpCodeMapper::add as OpFn);
        t.insert(OpKind::Sub, OpCodeMapper::sub as OpFn);
        t.insert(OpKind::Mul, OpCodeMapper::mul as OpFn);
        t.insert(OpKind::MulI8, OpCodeMapper::mul_i8 as OpFn);
        t.insert(OpKind::Neg, OpCodeMapper::neg as OpFn);
        t.insert(OpKind::And, OpCodeMapper::and as OpFn);
        t.insert(OpKind::Or, OpCodeMapper::or as OpFn);
        t.insert(OpKind::Xor, OpCodeMapper::xor as OpFn);
        t.insert(OpKind::Shl, OpCodeMapper::shl as OpFn);
        t.insert(OpKind::Shr, OpCodeMapper::shr as OpFn);
        t.insert(OpKind::Br, OpCodeMapper::br as OpFn);
        t.insert(OpKind::BrTrue, OpCodeMapper::brtrue as OpFn);
        t.insert(OpKind::BrFalse, OpCodeMapper::brfalse as OpFn);
        t.insert(OpKind::Beq, OpCodeMapper::beq as OpFn);
        t.insert(OpKind::Bne, OpCodeMapper::bne as OpFn);
        t.insert(OpKind::Blt, OpCodeMapper::blt as OpFn);
        t.insert(OpKind::Bgt, OpCodeMapper::bgt as OpFn);
        t.insert(OpKind::Call, OpCodeMapper::call as OpFn);
        t.insert(OpKind::Ret, OpCodeMapper::ret as OpFn);
        // OpKind::Unsupported has deliberately no entry: any opcode that
        // maps to it falls through to `UnknownOpcode`.
        t
    })
}

/// The width, in registers, of one value on the virtual stack. A 64-bit
/// value occupies two consecutive permanent registers (low word first)
/// since the SPE has no native 64-bit arithmetic (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    W32,
    W64,
}

impl Width {
    fn regs(self) -> u32 {
        match self {
            Width::W32 => 1,
            Width::W64 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct StackValue {
    base_reg: u8,
    width: Width,
}

use crate::compiler::CompiledMethod;

/// The mapper's virtual operand stack: CIL stack height expressed as
/// permanent registers already in use.
struct VirtualStack {
    locals: u32,
    args: u32,
    regs_used: u32,
    values: Vec<StackValue>,
}

impl VirtualStack {
    fn new(locals: u32, args: u32) -> Self {
        VirtualStack {
            locals,
            args,
            regs_used: 0,
            values: Vec::new(),
        }
    }

    /// `AllocateStackSlot`: returns the base register the next push would
    /// occupy, without reserving it.
    fn next_base_reg(&self) -> u8 {
        regs::stack_reg(self.locals, self.args, self.regs_used)
    }

    fn push(&mut self, width: Width) -> u8 {
        let base = self.next_base_reg();
        self.regs_used += width.regs();
        assert!(
            self.locals + self.args + self.regs_used <= regs::MAX_LV_REGISTERS as u32,
            "virtual stack exceeded the preserved-register window"
        );
        self.values.push(StackValue { base_reg: base, width });
        base
    }

    fn pop(&mut self) -> StackValue {
        let v = self.values.pop().expect("pop from empty virtual stack");
        self.regs_used -= v.width.regs();
        v
    }

    fn peek(&self) -> StackValue {
        *self.values.last().expect("peek on empty virtual stack")
    }

    fn depth(&self) -> u32 {
        self.locals + self.args + self.regs_used
    }

    fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub struct OpCodeMapper<'m> {
    method: &'m mut CompiledMethod,
    stack: VirtualStack,
    max_stack_depth: u32,
}

impl<'m> OpCodeMapper<'m> {
    pub fn new(method: &'m mut CompiledMethod, locals: u32, args: u32) -> Self {
        let max_stack_depth = locals + args;
        OpCodeMapper {
            method,
            stack: VirtualStack::new(locals, args),
            max_stack_depth,
        }
    }

    pub fn method(&mut self) -> &mut CompiledMethod {
        self.method
    }

    pub fn max_stack_depth(&self) -> u32 {
        self.max_stack_depth
    }

    /// Dispatch one IR instruction through the opcode translation table.
    pub fn dispatch(&mut self, instr: &IrInstr) -> Result<()> {
        trace!(
            "method {:?}: translating instruction {:?} ({})",
            self.method.id,
            instr.id,
            instr.op.mnemonic()
        );
        match table().get(&instr.op.kind()) {
            Some(f) => f(self, instr),
            None => Err(CodegenError::UnknownOpcode {
                method: self.method.id,
                opcode: instr.op.mnemonic(),
            }),
        }
    }

    // -- helper primitives (spec §4.2) --------------------------------

    fn push(&mut self, width: Width) -> u8 {
        let reg = self.stack.push(width);
        self.max_stack_depth = self.max_stack_depth.max(self.stack.depth());
        reg
    }

    fn pop(&mut self) -> StackValue {
        self.stack.pop()
    }

    fn copy_register(&mut self, src: u8, dst: u8) {
        self.method.buffer.append(SpeInstr::Ai {
            rt: dst,
            ra: src,
            i10: 0,
        });
    }

    fn clear_register(&mut self, reg: u8) {
        self.method.buffer.append(SpeInstr::Il { rt: reg, i16: 0 });
    }

    /// Load a 32-bit immediate into `reg`. Values that fit in 16 bits
    /// signed use a single `il`; wider ones use `ilhu`+`iohl`.
    fn load_imm32(&mut self, reg: u8, value: i32) {
        if let Ok(small) = i16::try_from(value) {
            self.method
                .buffer
                .append(SpeInstr::Il { rt: reg, i16: small });
        } else {
            let upper = (value as u32 >> 16) as i16;
            let lower = (value as u32 & 0xffff) as i16;
            self.method
                .buffer
                .append(SpeInstr::Ilhu { rt: reg, i16: upper });
            self.method
                .buffer
                .append(SpeInstr::Iohl { rt: reg, i16: lower });
        }
    }

    fn scratch(&self, i: u8) -> u8 {
        regs::scratch(i)
    }

    fn and32(&mut self, rt: u8, ra: u8, rb: u8) {
        self.method.buffer.append(SpeInstr::And { rt, ra, rb });
    }

    fn shr32(&mut self, rt: u8, ra: u8, rb: u8) {
        self.method.buffer.append(SpeInstr::Shr { rt, ra, rb });
    }

    fn shl32(&mut self, rt: u8, ra: u8, rb: u8) {
        self.method.buffer.append(SpeInstr::Shl { rt, ra, rb });
    }

    fn add32(&mut self, rt: u8, ra: u8, rb: u8) {
        self.method.buffer.append(SpeInstr::A { rt, ra, rb });
    }

    fn mpyu32(&mut self, rt: u8, ra: u8, rb: u8) {
        self.method.buffer.append(SpeInstr::Mpyu { rt, ra, rb });
    }

    fn cgtu32(&mut self, rt: u8, ra: u8, rb: u8) {
        self.method.buffer.append(SpeInstr::Cgtu { rt, ra, rb });
    }

    /// Low 16 bits of `src`, as a freshly pushed temporary.
    fn limb_lo(&mut self, src: u8, mask16: u8) -> u8 {
        let dst = self.push(Width::W32);
        self.and32(dst, src, mask16);
        dst
    }

    /// High 16 bits of `src` (logical shift), as a freshly pushed
    /// temporary.
    fn limb_hi(&mut self, src: u8, sixteen: u8) -> u8 {
        let dst = self.push(Width::W32);
        self.shr32(dst, src, sixteen);
        dst
    }

    /// Multiply two 16-bit limbs, position the 32-bit product at
    /// `shift` bits (one of 0/16/32/48), and fold it into the running
    /// 64-bit accumulator `(acc_lo, acc_hi)` with carry. Every temporary
    /// this allocates is popped again before returning, so it never
    /// outlives this single column's contribution.
    fn accumulate_term(
        &mut self,
        limb_a: u8,
        limb_b: u8,
        shift: u32,
        sixteen: u8,
        one: u8,
        mask16: u8,
        acc_lo: u8,
        acc_hi: u8,
    ) {
        let term = self.push(Width::W32);
        self.mpyu32(term, limb_a, limb_b);

        let shifted_lo = self.push(Width::W32);
        let shifted_hi = self.push(Width::W32);
        match shift {
            0 => {
                self.copy_register(term, shifted_lo);
                self.clear_register(shifted_hi);
            }
            16 => {
                self.and32(shifted_lo, term, mask16);
                self.shl32(shifted_lo, shifted_lo, sixteen);
                self.shr32(shifted_hi, term, sixteen);
            }
            32 => {
                self.clear_register(shifted_lo);
                self.copy_register(term, shifted_hi);
            }
            48 => {
                self.clear_register(shifted_lo);
                self.and32(shifted_hi, term, mask16);
                self.shl32(shifted_hi, shifted_hi, sixteen);
            }
            _ => unreachable!("mul_i8 only positions limb products at 0/16/32/48"),
        }

        // 64-bit add of (acc_hi:acc_lo) + (shifted_hi:shifted_lo), carry
        // detected the way software 64-bit addition always is on a core
        // with no carry flag: the unsigned sum of the low words is
        // smaller than either addend exactly when the add wrapped.
        let sum_lo = self.push(Width::W32);
        self.add32(sum_lo, acc_lo, shifted_lo);
        let carry = self.push(Width::W32);
        self.cgtu32(carry, acc_lo, sum_lo);
        self.and32(carry, carry, one);

        self.copy_register(sum_lo, acc_lo);
        self.add32(acc_hi, acc_hi, shifted_hi);
        self.add32(acc_hi, acc_hi, carry);

        self.pop();
        self.pop();
        self.pop();
        self.pop();
        self.pop();
    }

    fn record_branch(&mut self, site: u32, target: crate::ir::InstrId) {
        self.method
            .branch_fixups
            .push(BranchFixup { site, target });
    }

    fn record_call(&mut self, site: u32, callee: MethodId) {
        self.method.call_fixups.push(CallFixup { site, callee });
    }

    // -- opcode translations ------------------------------------------

    fn ldc_i4(&mut self, instr: &IrInstr) -> Result<()> {
        let CilOp::LdcI4(v) = instr.op else { unreachable!() };
        let reg = self.push(Width::W32);
        self.load_imm32(reg, v);
        Ok(())
    }

    fn ldc_i8(&mut self, instr: &IrInstr) -> Result<()> {
        let CilOp::LdcI8(v) = instr.op else { unreachable!() };
        let lo_reg = self.push(Width::W64);
        let hi_reg = lo_reg + 1;
        self.load_imm32(lo_reg, v as i32);
        self.load_imm32(hi_reg, (v >> 32) as i32);
        Ok(())
    }

    fn ldarg(&mut self, instr: &IrInstr) -> Result<()> {
        let CilOp::LdArg(i) = instr.op else { unreachable!() };
        let src = regs::arg_reg(self.stack.locals, i);
        let dst = self.push(Width::W32);
        self.copy_register(src, dst);
        Ok(())
    }

    fn ldloc(&mut self, instr: &IrInstr) -> Result<()> {
        let CilOp::LdLoc(i) = instr.op else { unreachable!() };
        let src = regs::local_reg(i);
        let dst = self.push(Width::W32);
        self.copy_register(src, dst);
        Ok(())
    }

    fn stloc(&mut self, instr: &IrInstr) -> Result<()> {
        let CilOp::StLoc(i) = instr.op else { unreachable!() };
        let v = self.pop();
        let dst = regs::local_reg(i);
        self.copy_register(v.base_reg, dst);
        Ok(())
    }

    fn dup(&mut self, _instr: &IrInstr) -> Result<()> {
        let top = self.stack.peek();
        let dst = self.push(top.width);
        self.copy_register(top.base_reg, dst);
        if top.width == Width::W64 {
            self.copy_register(top.base_reg + 1, dst + 1);
        }
        Ok(())
    }

    fn pop_op(&mut self, _instr: &IrInstr) -> Result<()> {
        self.pop();
        Ok(())
    }

    fn binop32(&mut self, make: impl FnOnce(u8, u8, u8) -> SpeInstr) -> u8 {
        let b = self.pop();
        let a = self.pop();
        let dst = self.push(Width::W32);
        self.method.buffer.append(make(dst, a.base_reg, b.base_reg));
        dst
    }

    fn add(&mut self, _instr: &IrInstr) -> Result<()> {
        self.binop32(|rt, ra, rb| SpeInstr::A { rt, ra, rb });
        Ok(())
    }

    fn sub(&mut self, _instr: &IrInstr) -> Result<()> {
        // CIL `sub` computes a - b; our `Sf` computes rb - ra, so swap
        // the operand order at the call site.
        let b = self.pop();
        let a = self.pop();
        let dst = self.push(Width::W32);
        self.method.buffer.append(SpeInstr::Sf {
            rt: dst,
            ra: b.base_reg,
            rb: a.base_reg,
        });
        Ok(())
    }

    fn mul(&mut self, _instr: &IrInstr) -> Result<()> {
        self.binop32(|rt, ra, rb| SpeInstr::Mpy { rt, ra, rb });
        Ok(())
    }

    fn neg(&mut self, _instr: &IrInstr) -> Result<()> {
        let a = self.pop();
        let zero = self.scratch(0);
        self.clear_register(zero);
        let dst = self.push(Width::W32);
        self.method.buffer.append(SpeInstr::Sf {
            rt: dst,
            ra: a.base_reg,
            rb: zero,
        });
        Ok(())
    }

    fn and(&mut self, _instr: &IrInstr) -> Result<()> {
        self.binop32(|rt, ra, rb| SpeInstr::And { rt, ra, rb });
        Ok(())
    }

    fn or(&mut self, _instr: &IrInstr) -> Result<()> {
        self.binop32(|rt, ra, rb| SpeInstr::Or { rt, ra, rb });
        Ok(())
    }

    fn xor(&mut self, _instr: &IrInstr) -> Result<()> {
        self.binop32(|rt, ra, rb| SpeInstr::Xor { rt, ra, rb });
        Ok(())
    }

    fn shl(&mut self, _instr: &IrInstr) -> Result<()> {
        self.binop32(|rt, ra, rb| SpeInstr::Shl { rt, ra, rb });
        Ok(())
    }

    fn shr(&mut self, _instr: &IrInstr) -> Result<()> {
        self.binop32(|rt, ra, rb| SpeInstr::Shr { rt, ra, rb });
        Ok(())
    }

    /// The 64x64->64 truncating multiply of spec §4.2: each operand is
    /// split into four 16-bit limbs, every limb-pair product landing
    /// fully inside the low 64 bits is positioned and folded into a
    /// 64-bit accumulator with carry, and everything else (any term
    /// whose limb indices sum to more than 3, i.e. starts at bit 64 or
    /// beyond) is dropped — truncation falls out of simply never
    /// computing those terms.
    fn mul_i8(&mut self, _instr: &IrInstr) -> Result<()> {
        let b = self.pop();
        let a = self.pop();
        debug_assert_eq!(a.width, Width::W64);
        debug_assert_eq!(b.width, Width::W64);

        // Popping already freed a's and b's registers for reuse, so the
        // very next push would otherwise land right back on them before
        // their values are read. Copy all four limbs-worth of operand
        // out to scratch first; nothing pushed from here on can collide
        // with scratch, and nothing outlives this one translation.
        let a_lo = self.scratch(0);
        let a_hi = self.scratch(1);
        let b_lo = self.scratch(2);
        let b_hi = self.scratch(3);
        self.copy_register(a.base_reg, a_lo);
        self.copy_register(a.base_reg + 1, a_hi);
        self.copy_register(b.base_reg, b_lo);
        self.copy_register(b.base_reg + 1, b_hi);

        // Reserved first so it's the only value left on the stack once
        // every temporary pushed after it is popped again below.
        let acc = self.push(Width::W64);
        let acc_lo = acc;
        let acc_hi = acc + 1;
        self.clear_register(acc_lo);
        self.clear_register(acc_hi);

        let mask16 = self.push(Width::W32);
        self.load_imm32(mask16, 0xffff);
        let sixteen = self.push(Width::W32);
        self.load_imm32(sixteen, 16);
        let one = self.push(Width::W32);
        self.load_imm32(one, 1);

        // Limbs, least significant first.
        let a0 = self.limb_lo(a_lo, mask16);
        let a1 = self.limb_hi(a_lo, sixteen);
        let a2 = self.limb_lo(a_hi, mask16);
        let a3 = self.limb_hi(a_hi, sixteen);
        let b0 = self.limb_lo(b_lo, mask16);
        let b1 = self.limb_hi(b_lo, sixteen);
        let b2 = self.limb_lo(b_hi, mask16);
        let b3 = self.limb_hi(b_hi, sixteen);

        let terms: [(u8, u8, u32); 10] = [
            (a0, b0, 0),
            (a0, b1, 16),
            (a1, b0, 16),
            (a0, b2, 32),
            (a1, b1, 32),
            (a2, b0, 32),
            (a0, b3, 48),
            (a1, b2, 48),
            (a2, b1, 48),
            (a3, b0, 48),
        ];
        for (limb_a, limb_b, shift) in terms {
            self.accumulate_term(limb_a, limb_b, shift, sixteen, one, mask16, acc_lo, acc_hi);
        }

        // Pop the limbs and the shared constants, in push order, leaving
        // `acc` as the sole result on the virtual stack.
        for _ in 0..11 {
            self.pop();
        }
        Ok(())
    }

    fn branch(&mut self, target: crate::ir::InstrId) {
        let site = self.method.buffer.append(SpeInstr::Br { i16: 0 });
        self.record_branch(site, target);
    }

    fn cond_branch(&mut self, target: crate::ir::InstrId, branch_if_nonzero: bool) {
        let cond = self.pop();
        let site = if branch_if_nonzero {
            self.method.buffer.append(SpeInstr::Brnz {
                ra: cond.base_reg,
                i16: 0,
            })
        } else {
            self.method.buffer.append(SpeInstr::Brz {
                ra: cond.base_reg,
                i16: 0,
            })
        };
        self.record_branch(site, target);
    }

    fn br(&mut self, instr: &IrInstr) -> Result<()> {
        let target = instr.op.branch_target().expect("br carries a target");
        self.branch(target);
        Ok(())
    }

    fn brtrue(&mut self, instr: &IrInstr) -> Result<()> {
        let target = instr.op.branch_target().expect("brtrue carries a target");
        self.cond_branch(target, true);
        Ok(())
    }

    fn brfalse(&mut self, instr: &IrInstr) -> Result<()> {
        let target = instr.op.branch_target().expect("brfalse carries a target");
        self.cond_branch(target, false);
        Ok(())
    }

    fn compare_branch(
        &mut self,
        target: crate::ir::InstrId,
        make: impl FnOnce(u8, u8, u8) -> SpeInstr,
    ) {
        let b = self.pop();
        let a = self.pop();
        let cmp = self.scratch(0);
        self.method
            .buffer
            .append(make(cmp, a.base_reg, b.base_reg));
        let site = self.method.buffer.append(SpeInstr::Brnz { ra: cmp, i16: 0 });
        self.record_branch(site, target);
    }

    fn beq(&mut self, instr: &IrInstr) -> Result<()> {
        let target = instr.op.branch_target().expect("beq carries a target");
        self.compare_branch(target, |rt, ra, rb| SpeInstr::Ceq { rt, ra, rb });
        Ok(())
    }

    fn bne(&mut self, instr: &IrInstr) -> Result<()> {
        // bne == not (a == b): compare equal, branch when the flag is
        // *zero*.
        let target = instr.op.branch_target().expect("bne carries a target");
        let b = self.pop();
        let a = self.pop();
        let cmp = self.scratch(0);
        self.method.buffer.append(SpeInstr::Ceq {
            rt: cmp,
            ra: a.base_reg,
            rb: b.base_reg,
        });
        let site = self.method.buffer.append(SpeInstr::Brz { ra: cmp, i16: 0 });
        self.record_branch(site, target);
        Ok(())
    }

    fn blt(&mut self, instr: &IrInstr) -> Result<()> {
        // a < b  <=>  b > a
        let target = instr.op.branch_target().expect("blt carries a target");
        let b = self.pop();
        let a = self.pop();
        let cmp = self.scratch(0);
        self.method.buffer.append(SpeInstr::Cgt {
            rt: cmp,
            ra: b.base_reg,
            rb: a.base_reg,
        });
        let site = self.method.buffer.append(SpeInstr::Brnz { ra: cmp, i16: 0 });
        self.record_branch(site, target);
        Ok(())
    }

    fn bgt(&mut self, instr: &IrInstr) -> Result<()> {
        let target = instr.op.branch_target().expect("bgt carries a target");
        self.compare_branch(target, |rt, ra, rb| SpeInstr::Cgt { rt, ra, rb });
        Ok(())
    }

    /// Calls branch to the linker-resolved call handler (spec §4.4/§6);
    /// the callee's identity travels in a scratch register load next to
    /// the branch, resolved by the linker's call fixup.
    fn call(&mut self, instr: &IrInstr) -> Result<()> {
        let CilOp::Call(callee) = instr.op else { unreachable!() };
        let argc = instr.children.len() as u32;
        let mut args = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            args.push(self.pop());
        }
        args.reverse();
        for (i, arg) in args.iter().enumerate() {
            self.copy_register(arg.base_reg, regs::ARG0 + i as u8);
        }

        let id_reg = self.scratch(0);
        self.load_imm32(id_reg, callee.0 as i32);

        let site = self.method.buffer.append(SpeInstr::Brsl {
            rt: regs::LR,
            i16: 0,
        });
        self.record_call(site, callee);

        let result = self.push(Width::W32);
        self.copy_register(regs::ARG0, result);
        Ok(())
    }

    /// Moves the top-of-stack value (if any) into the ABI return-value
    /// register. Does not itself branch: the physical `ret` exit point is
    /// the method's single epilogue (spec §4.3 phases 6-7); a `ret` that
    /// isn't the method's last top-level instruction is out of scope (see
    /// DESIGN.md).
    fn ret(&mut self, _instr: &IrInstr) -> Result<()> {
        if !self.stack.is_empty() {
            let v = self.pop();
            self.copy_register(v.base_reg, regs::ARG0);
            if v.width == Width::W64 {
                self.copy_register(v.base_reg + 1, regs::ARG0 + 1);
            }
        }
        Ok(())
    }
}
