//! ELF packaging (spec §4.4: "delegated to an external collaborator").
//!
//! The linker only knows about a raw instruction blob, its length, and
//! the bootloader's start offset; wrapping that in a loadable ELF image
//! is a distinct concern handed off through this trait, mirroring how
//! `cranelift-codegen` hands its `MachBufferFinalized` to
//! `wasmtime-cranelift`'s own object-writing layer rather than doing it
//! in-house. Behind the `elf` feature, `ObjectElfWriter` does the actual
//! framing with the `object` crate.

use crate::error::Result;
use crate::linker::LinkedImage;

/// An external collaborator that frames a raw instruction blob as a
/// loadable object file.
pub trait ElfWriter {
    /// Package `image`'s raw instruction bytes into an ELF blob. The
    /// entry offset is `image`'s bootloader start offset (spec's
    /// `BOOTLOADER_START_OFFSET = 16`), not the program's first
    /// emitted method.
    fn write_elf(&self, image: &LinkedImage) -> Result<Vec<u8>>;
}

#[cfg(feature = "elf")]
mod object_writer {
    use object::write::{Object, StandardSegment, Symbol, SymbolSection};
    use object::{
        Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope,
    };

    use crate::error::{CodegenError, Result};
    use crate::linker::LinkedImage;

    use super::ElfWriter;

    /// Packages a linked image as a big-endian ELF object with one
    /// loadable `.text` section and an `_entry` symbol pointing at
    /// `BOOTLOADER_START_OFFSET`.
    pub struct ObjectElfWriter;

    impl ElfWriter for ObjectElfWriter {
        fn write_elf(&self, image: &LinkedImage) -> Result<Vec<u8>> {
            let mut obj = Object::new(BinaryFormat::Elf, Architecture::Unknown, Endianness::Big);

            let mut bytes = Vec::with_capacity(image.byte_len() as usize);
            image.write_binary(&mut bytes)?;

            let section = obj.add_section(
                obj.segment_name(StandardSegment::Text).to_vec(),
                b".text".to_vec(),
                SectionKind::Text,
            );
            obj.append_section_data(section, &bytes, 4);

            obj.add_symbol(Symbol {
                name: b"_entry".to_vec(),
                value: crate::bootloader::BOOTLOADER_START_OFFSET as u64,
                size: 0,
                kind: SymbolKind::Text,
                scope: SymbolScope::Linkage,
                weak: false,
                section: SymbolSection::Section(section),
                flags: SymbolFlags::None,
            });

            obj.write()
                .map_err(|e| CodegenError::TextSerializationFailure(e.to_string()))
        }
    }
}

#[cfg(feature = "elf")]
pub use object_writer::ObjectElfWriter;

#[cfg(all(test, feature = "elf"))]
mod tests {
    use super::*;
    use crate::compiler::MethodCompiler;
    use crate::ir::{IrMethod, MethodId};
    use crate::linker::Linker;

    #[test]
    fn wraps_a_linked_image() {
        let method = IrMethod {
            id: MethodId(0),
            name: "entry".to_string(),
            locals: Vec::new(),
            params: Vec::new(),
            body: Vec::new(),
        };
        let compiled = MethodCompiler::compile(&method).unwrap();
        let linked = Linker::link(&[compiled]).unwrap();
        let bytes = ObjectElfWriter.write_elf(&linked).unwrap();
        assert!(!bytes.is_empty());
        // ELF magic.
        assert_eq!(&bytes[0..4], b"\x7fELF");
    }
}
