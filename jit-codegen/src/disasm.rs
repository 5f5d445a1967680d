//! Textual disassembly output (spec §4.4 step 7, §6).
//!
//! A plain-text sink is optional alongside the binary image: one
//! mnemonic per line, with a `# Function entry` marker preceding every
//! recorded method base offset. Failures here are reported as
//! `TextSerializationFailure` rather than `StreamWriteFailure`, since
//! they're a distinct sink from the binary stream (spec §7).

use std::collections::HashMap;
use std::io::{self, Write};

use log::trace;

use crate::buffer::{InstrOffset, InstructionBuffer};
use crate::error::{CodegenError, Result};
use crate::ir::MethodId;

/// Write `buffer` as text, annotating every offset in `method_offsets`
/// with a `# Function entry` comment line.
pub fn write<W: Write>(
    buffer: &InstructionBuffer,
    method_offsets: &HashMap<MethodId, InstrOffset>,
    out: &mut W,
) -> Result<()> {
    let mut entries_by_offset: HashMap<InstrOffset, MethodId> = HashMap::new();
    for (&id, &offset) in method_offsets {
        entries_by_offset.insert(offset, id);
    }

    write_inner(buffer, &entries_by_offset, out)
        .map_err(|e| CodegenError::TextSerializationFailure(e.to_string()))
}

fn write_inner<W: Write>(
    buffer: &InstructionBuffer,
    entries_by_offset: &HashMap<InstrOffset, MethodId>,
    out: &mut W,
) -> io::Result<()> {
    for (offset, instr) in buffer.iter().enumerate() {
        let offset = offset as InstrOffset;
        if let Some(id) = entries_by_offset.get(&offset) {
            writeln!(out, "# Function entry: method {}", id.0)?;
        }
        trace!("{offset:>6}: {}", instr.disasm());
        writeln!(out, "{offset:>6}: {}", instr.disasm())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::SpeInstr;

    #[test]
    fn marks_method_entries() {
        let mut buf = InstructionBuffer::new();
        buf.append(SpeInstr::Stop);
        buf.append(SpeInstr::Bi { ra: 0 });

        let mut offsets = HashMap::new();
        offsets.insert(MethodId(7), 1);

        let mut out = Vec::new();
        write(&buf, &offsets, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("# Function entry: method 7"));
        let entry_line = text.find("# Function entry").unwrap();
        let bi_line = text.find("bi").unwrap();
        assert!(entry_line < bi_line);
    }
}
