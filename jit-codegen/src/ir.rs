//! The IR data model consumed by this code generator (spec §3).
//!
//! The tree itself — parsing raw CIL bytes into this shape — is an
//! external collaborator's job. This module only defines the shape: an
//! immutable tree of instructions, each carrying an opcode and its
//! operand-producing children, plus the method-level metadata
//! (locals/params) the compiler needs.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifies one IR instruction within a method, for branch-target
/// resolution and the per-instruction offset map. Assigned by whatever
/// builds the tree; must be unique within a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InstrId(pub u64);

/// Identifies a method across the whole linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MethodId(pub u32);

/// A declared local variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LocalDecl {
    pub zero_init: bool,
}

/// A declared parameter. Parameters carry no extra metadata beyond their
/// position; the type system of the producing IR is out of scope here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParamDecl;

/// One CIL opcode, with whatever inline operand it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CilOp {
    LdcI4(i32),
    LdcI8(i64),
    LdArg(u32),
    LdLoc(u32),
    StLoc(u32),
    Dup,
    Pop,
    Add,
    Sub,
    Mul,
    MulI8,
    Neg,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Br(InstrId),
    BrTrue(InstrId),
    BrFalse(InstrId),
    Beq(InstrId),
    Bne(InstrId),
    Blt(InstrId),
    Bgt(InstrId),
    Call(MethodId),
    Ret,
    /// An opcode the translation table has no entry for. Real CIL has far
    /// more opcodes than this mapper implements; producers that hand us
    /// one of those surface it as this variant rather than the parser
    /// failing outright, so the failure is caught here as `UnknownOpcode`
    /// per spec §7.
    Unsupported(String),
}

impl CilOp {
    /// Case-insensitive-ish opcode name, the way a textual CIL listing
    /// would render it. Used only for `UnknownOpcode` error messages and
    /// disassembly comments since this implementation dispatches on the
    /// `CilOp` variant itself rather than reflecting over a name.
    pub fn mnemonic(&self) -> String {
        let s = match self {
            CilOp::Unsupported(name) => return name.clone(),
            CilOp::LdcI4(_) => "ldc.i4",
            CilOp::LdcI8(_) => "ldc.i8",
            CilOp::LdArg(_) => "ldarg",
            CilOp::LdLoc(_) => "ldloc",
            CilOp::StLoc(_) => "stloc",
            CilOp::Dup => "dup",
            CilOp::Pop => "pop",
            CilOp::Add => "add",
            CilOp::Sub => "sub",
            CilOp::Mul => "mul",
            CilOp::MulI8 => "mul.i8",
            CilOp::Neg => "neg",
            CilOp::And => "and",
            CilOp::Or => "or",
            CilOp::Xor => "xor",
            CilOp::Shl => "shl",
            CilOp::Shr => "shr",
            CilOp::Br(_) => "br",
            CilOp::BrTrue(_) => "brtrue",
            CilOp::BrFalse(_) => "brfalse",
            CilOp::Beq(_) => "beq",
            CilOp::Bne(_) => "bne",
            CilOp::Blt(_) => "blt",
            CilOp::Bgt(_) => "bgt",
            CilOp::Call(_) => "call",
            CilOp::Ret => "ret",
        };
        s.to_string()
    }

    /// The branch target this instruction records a fixup for, if any.
    pub fn branch_target(&self) -> Option<InstrId> {
        match *self {
            CilOp::Br(t)
            | CilOp::BrTrue(t)
            | CilOp::BrFalse(t)
            | CilOp::Beq(t)
            | CilOp::Bne(t)
            | CilOp::Blt(t)
            | CilOp::Bgt(t) => Some(t),
            _ => None,
        }
    }

    /// The fieldless discriminant used to key the opcode translation
    /// table (spec §5: "a mapping from CIL opcode identifier to the
    /// mapper's translation operation").
    pub fn kind(&self) -> OpKind {
        match self {
            CilOp::LdcI4(_) => OpKind::LdcI4,
            CilOp::LdcI8(_) => OpKind::LdcI8,
            CilOp::LdArg(_) => OpKind::LdArg,
            CilOp::LdLoc(_) => OpKind::LdLoc,
            CilOp::StLoc(_) => OpKind::StLoc,
            CilOp::Dup => OpKind::Dup,
            CilOp::Pop => OpKind::Pop,
            CilOp::Add => OpKind::Add,
            CilOp::Sub => OpKind::Sub,
            CilOp::Mul => OpKind::Mul,
            CilOp::MulI8 => OpKind::MulI8,
            CilOp::Neg => OpKind::Neg,
            CilOp::And => OpKind::And,
            CilOp::Or => OpKind::Or,
            CilOp::Xor => OpKind::Xor,
            CilOp::Shl => OpKind::Shl,
            CilOp::Shr => OpKind::Shr,
            CilOp::Br(_) => OpKind::Br,
            CilOp::BrTrue(_) => OpKind::BrTrue,
            CilOp::BrFalse(_) => OpKind::BrFalse,
            CilOp::Beq(_) => OpKind::Beq,
            CilOp::Bne(_) => OpKind::Bne,
            CilOp::Blt(_) => OpKind::Blt,
            CilOp::Bgt(_) => OpKind::Bgt,
            CilOp::Call(_) => OpKind::Call,
            CilOp::Ret => OpKind::Ret,
            CilOp::Unsupported(_) => OpKind::Unsupported,
        }
    }
}

/// Fieldless mirror of [`CilOp`], used as the opcode translation table's
/// key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    LdcI4,
    LdcI8,
    LdArg,
    LdLoc,
    StLoc,
    Dup,
    Pop,
    Add,
    Sub,
    Mul,
    MulI8,
    Neg,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Br,
    BrTrue,
    BrFalse,
    Beq,
    Bne,
    Blt,
    Bgt,
    Call,
    Ret,
    Unsupported,
}

/// One node of the IR tree: an opcode plus the ordered children that
/// produce its stack operands. Children are translated before the
/// parent (post-order), per spec §4.3 phase 5.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IrInstr {
    pub id: InstrId,
    pub op: CilOp,
    pub children: Vec<IrInstr>,
}

impl IrInstr {
    pub fn leaf(id: InstrId, op: CilOp) -> Self {
        IrInstr {
            id,
            op,
            children: Vec::new(),
        }
    }

    pub fn with_children(id: InstrId, op: CilOp, children: Vec<IrInstr>) -> Self {
        IrInstr { id, op, children }
    }
}

/// An immutable, parsed managed method: the input to one `MethodCompiler`
/// run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IrMethod {
    pub id: MethodId,
    pub name: String,
    pub locals: Vec<LocalDecl>,
    pub params: Vec<ParamDecl>,
    /// Top-level children, in input order (spec §4.3 phase 5).
    pub body: Vec<IrInstr>,
}

impl IrMethod {
    pub fn locals_count(&self) -> u32 {
        self.locals.len() as u32
    }

    pub fn args_count(&self) -> u32 {
        self.params.len() as u32
    }

    pub fn needs_zero_init(&self, local: u32) -> bool {
        self.locals
            .get(local as usize)
            .map(|l| l.zero_init)
            .unwrap_or(false)
    }
}
