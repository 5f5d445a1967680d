//! The compile-time error taxonomy of spec §7.
//!
//! Every variant is fatal to the current JIT call: no partial output is
//! ever emitted, so callers don't need to distinguish "recoverable" from
//! "fatal" here.

use thiserror::Error;

use crate::ir::MethodId;

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("unknown CIL opcode `{opcode}` in method {method:?}")]
    UnknownOpcode { method: MethodId, opcode: String },

    #[error(
        "method {method:?} declares {locals} locals + {args} args, exceeding the \
         {max} preserved-register window"
    )]
    TooManyRegisters {
        method: MethodId,
        locals: u32,
        args: u32,
        max: usize,
    },

    #[error(
        "branch in method {method:?} from instruction offset {source} to {target} is \
         out of range for a 16-bit immediate"
    )]
    BranchOutOfRange {
        method: MethodId,
        source: u32,
        target: u32,
    },

    #[error("call from {caller:?} to unresolved callee {callee:?}")]
    MissingCallee { caller: MethodId, callee: MethodId },

    #[error("unresolved branch target in method {method:?}: IR instruction {target:?} was never emitted")]
    UnresolvedBranchTarget { method: MethodId, target: u64 },

    #[error(
        "method {method:?} reaches a stack depth of {depth} registers, whose byte-scaled SP \
         adjustment no longer fits the 10-bit immediate the prologue patches (max {max})"
    )]
    StackFrameTooLarge {
        method: MethodId,
        depth: u32,
        max: u32,
    },

    #[error("failed to serialize disassembly text: {0}")]
    TextSerializationFailure(String),

    #[error("failed to write instruction stream: {0}")]
    StreamWriteFailure(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CodegenError>;
