//! JSON fixture ingestion.
//!
//! The real CIL parser is an external collaborator `jit-codegen` never
//! depends on, so this binary reads methods from a `serde_json` document
//! instead: `{ opcode, operand, children }` trees that mirror the shape
//! of `jit_codegen::ir::IrInstr` without committing to its Rust-side enum
//! tagging. Converting one into the other is this module's only job.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

use jit_codegen::ir::{InstrId, MethodId};
use jit_codegen::{CilOp, IrInstr, IrMethod, LocalDecl, ParamDecl};

#[derive(Debug, Deserialize)]
struct FixtureMethod {
    id: u32,
    name: String,
    #[serde(default)]
    locals: Vec<FixtureLocal>,
    #[serde(default)]
    params: Vec<FixtureParam>,
    #[serde(default)]
    body: Vec<FixtureInstr>,
}

#[derive(Debug, Deserialize)]
struct FixtureLocal {
    #[serde(default)]
    zero_init: bool,
}

#[derive(Debug, Deserialize)]
struct FixtureParam {}

#[derive(Debug, Deserialize)]
struct FixtureInstr {
    id: u64,
    opcode: String,
    #[serde(default)]
    operand: Value,
    #[serde(default)]
    children: Vec<FixtureInstr>,
}

/// Parse one or more methods out of a fixture document. Accepts either a
/// single method object or a JSON array of them, so a fixture file can
/// describe a whole linked program in one place.
pub fn load_methods(text: &str) -> Result<Vec<IrMethod>> {
    let value: Value = serde_json::from_str(text).context("parsing fixture JSON")?;
    let fixtures: Vec<FixtureMethod> = match value {
        Value::Array(_) => serde_json::from_value(value).context("parsing fixture method list")?,
        _ => vec![serde_json::from_value(value).context("parsing fixture method")?],
    };
    fixtures.into_iter().map(convert_method).collect()
}

fn convert_method(m: FixtureMethod) -> Result<IrMethod> {
    let locals = m
        .locals
        .into_iter()
        .map(|l| LocalDecl {
            zero_init: l.zero_init,
        })
        .collect();
    let params = m.params.into_iter().map(|_| ParamDecl).collect();
    let body = m
        .body
        .into_iter()
        .map(convert_instr)
        .collect::<Result<Vec<_>>>()?;

    Ok(IrMethod {
        id: MethodId(m.id),
        name: m.name,
        locals,
        params,
        body,
    })
}

fn convert_instr(i: FixtureInstr) -> Result<IrInstr> {
    let children = i
        .children
        .into_iter()
        .map(convert_instr)
        .collect::<Result<Vec<_>>>()?;
    let op = convert_op(&i.opcode, &i.operand)
        .with_context(|| format!("instruction {} (opcode \"{}\")", i.id, i.opcode))?;
    Ok(IrInstr::with_children(InstrId(i.id), op, children))
}

fn convert_op(opcode: &str, operand: &Value) -> Result<CilOp> {
    let as_i64 = || -> Result<i64> {
        operand
            .as_i64()
            .ok_or_else(|| anyhow!("opcode \"{opcode}\" needs an integer operand"))
    };
    let as_u32 = || -> Result<u32> { Ok(as_i64()? as u32) };
    let as_target = || -> Result<InstrId> { Ok(InstrId(as_i64()? as u64)) };

    Ok(match opcode {
        "ldc.i4" => CilOp::LdcI4(as_i64()? as i32),
        "ldc.i8" => CilOp::LdcI8(as_i64()?),
        "ldarg" => CilOp::LdArg(as_u32()?),
        "ldloc" => CilOp::LdLoc(as_u32()?),
        "stloc" => CilOp::StLoc(as_u32()?),
        "dup" => CilOp::Dup,
        "pop" => CilOp::Pop,
        "add" => CilOp::Add,
        "sub" => CilOp::Sub,
        "mul" => CilOp::Mul,
        "mul.i8" => CilOp::MulI8,
        "neg" => CilOp::Neg,
        "and" => CilOp::And,
        "or" => CilOp::Or,
        "xor" => CilOp::Xor,
        "shl" => CilOp::Shl,
        "shr" => CilOp::Shr,
        "br" => CilOp::Br(as_target()?),
        "brtrue" => CilOp::BrTrue(as_target()?),
        "brfalse" => CilOp::BrFalse(as_target()?),
        "beq" => CilOp::Beq(as_target()?),
        "bne" => CilOp::Bne(as_target()?),
        "blt" => CilOp::Blt(as_target()?),
        "bgt" => CilOp::Bgt(as_target()?),
        "call" => CilOp::Call(MethodId(as_u32()?)),
        "ret" => CilOp::Ret,
        other => {
            if other.is_empty() {
                bail!("empty opcode name");
            }
            CilOp::Unsupported(other.to_string())
        }
    })
}
