//! `jit-cli`: a thin driver over `jit-codegen`, reading methods from a
//! JSON fixture (the real CIL parser is an external collaborator) and
//! writing out whichever of the raw binary stream, textual disassembly,
//! or ELF object the caller asked for. Flag shape mirrors the
//! `wasmtime` CLI binary's style: one subject (the fixture) plus a
//! handful of independent output flags.

mod fixture;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use jit_codegen::{CompiledMethod, Linker, MethodCompiler};

/// Compile a JSON fixture of IR methods into SPE machine code.
#[derive(Parser, Debug)]
#[command(name = "jit-cli", version, about)]
struct Cli {
    /// Path to a JSON fixture: one method object, or an array of them.
    fixture: PathBuf,

    /// Write the raw big-endian instruction stream here.
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,

    /// Additionally write a textual disassembly here.
    #[arg(long, value_name = "PATH")]
    disasm: Option<PathBuf>,

    /// Additionally write an ELF object here (requires the `elf` feature).
    #[arg(long, value_name = "PATH")]
    elf: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let text = fs::read_to_string(&cli.fixture)
        .with_context(|| format!("reading fixture {}", cli.fixture.display()))?;
    let methods = fixture::load_methods(&text)?;
    info!("loaded {} method(s) from {}", methods.len(), cli.fixture.display());

    let compiled: Vec<CompiledMethod> = methods
        .iter()
        .map(|m| MethodCompiler::compile(m).with_context(|| format!("compiling method {}", m.name)))
        .collect::<Result<_>>()?;

    let linked = Linker::link(&compiled).context("linking compiled methods")?;
    info!("linked image is {} bytes", linked.byte_len());

    if let Some(path) = &cli.out {
        let mut f = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
        linked.write_binary(&mut f)?;
    }

    if let Some(path) = &cli.disasm {
        let mut f = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
        linked.write_disassembly(&mut f)?;
    }

    if let Some(path) = &cli.elf {
        write_elf(&linked, path)?;
    }

    Ok(())
}

#[cfg(feature = "elf")]
fn write_elf(linked: &jit_codegen::LinkedImage, path: &std::path::Path) -> Result<()> {
    use jit_codegen::elf::{ElfWriter, ObjectElfWriter};
    let bytes = ObjectElfWriter
        .write_elf(linked)
        .context("packaging ELF object")?;
    fs::write(path, bytes).with_context(|| format!("creating {}", path.display()))?;
    Ok(())
}

#[cfg(not(feature = "elf"))]
fn write_elf(_linked: &jit_codegen::LinkedImage, _path: &std::path::Path) -> Result<()> {
    anyhow::bail!("--elf requires jit-cli to be built with the \"elf\" feature")
}
