//! Persistence of dynamic modules as PE images.
//!
//! Writing a module happens in three steps:
//!
//! 1. [`pe::PeLayout`] fixes the section set, which pins the RVA of the method bodies.
//! 2. [`metadata::MetadataWriter`] lowers the module into table rows and heaps, with
//!    provisional member tokens remapped onto their final rows ([`layout::RowLayout`]).
//! 3. [`pe::write_image`] lays out the sections and headers around the result.
//!
//! The output is deterministic: the same builder state and options always produce the
//! same bytes.

mod layout;
mod metadata;
mod pe;
mod tables;
pub(crate) mod win32res;

use log::debug;

pub(crate) use metadata::ModuleFile;

use crate::{config::SaveOptions, emit::AssemblyBuilder, emit::ModuleId, Result};

/// Build the image of `module`.
///
/// `manifest` lists the other persisted module files when `module` carries the assembly
/// manifest, `None` for a plain module.
///
/// # Errors
/// Returns [`crate::Error::InvalidOperation`] for an unclosed method body,
/// [`crate::Error::InvalidArgument`] for invalid image options and format errors if the
/// metadata exceeds the limits of the file format.
pub(crate) fn write_module(
    asm: &AssemblyBuilder,
    module: ModuleId,
    manifest: Option<&[ModuleFile]>,
    options: &SaveOptions,
) -> Result<Vec<u8>> {
    let data = asm.module_data(module)?;
    let mut field_data = false;
    for field in &data.fields {
        field_data |= asm.field_data(*field)?.data.is_some();
    }
    let win32_resources = match &data.unmanaged_resource {
        Some(resource) => win32res::parse_res(resource)?,
        None => Vec::new(),
    };

    debug!(
        "Writing module '{}' ({}){}",
        data.name,
        data.file_name,
        if manifest.is_some() { " with manifest" } else { "" }
    );
    let layout = pe::PeLayout::new(options, field_data, !win32_resources.is_empty())?;
    let content = metadata::MetadataWriter::new(asm, module)?.build(layout.body_rva(), manifest)?;
    pe::write_image(&layout, content, &win32_resources, options)
}

#[cfg(test)]
mod tests {
    use goblin::pe::PE;

    use super::*;
    use crate::{
        assembly::OpCode,
        config::ImageFileMachine,
        emit::AssemblyBuilderAccess,
        metadata::{
            flags::{FieldAttributes, MethodAttributes, TypeAttributes},
            identity::AssemblyName,
        },
        typesystem::Type,
    };

    fn sample() -> (AssemblyBuilder, ModuleId) {
        let mut asm = AssemblyBuilder::new(AssemblyName::new("image"), AssemblyBuilderAccess::Save);
        let module = asm.define_persistent_module("image", "image.dll").unwrap();
        let program = asm
            .module_builder(module)
            .unwrap()
            .define_type("Program", TypeAttributes::PUBLIC)
            .unwrap();
        let method = asm
            .type_builder(program)
            .unwrap()
            .define_method(
                "Answer",
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                Type::I4,
                vec![],
            )
            .unwrap();
        let mut il = asm.il_generator(method).unwrap();
        il.emit_i32(OpCode::LDC_I4, 42).unwrap();
        il.emit(OpCode::RET).unwrap();
        asm.type_builder(program).unwrap().create_type().unwrap();
        (asm, module)
    }

    #[test]
    fn pe32_image() {
        let (mut asm, module) = sample();
        let image = asm.emit_image(module, &SaveOptions::new()).unwrap();

        let pe = PE::parse(&image).unwrap();
        assert!(!pe.is_64);
        assert!(pe.is_lib);
        let names: Vec<&str> = pe
            .sections
            .iter()
            .map(|section| section.name().unwrap_or(""))
            .collect();
        assert_eq!(names, vec![".text", ".reloc"]);
        assert_eq!(pe.imports.len(), 1);
        assert_eq!(pe.imports[0].name, "_CorDllMain");

        let optional = pe.header.optional_header.unwrap();
        let clr = optional
            .data_directories
            .get_clr_runtime_header()
            .unwrap();
        assert_eq!(clr.size, 72);
        assert_eq!(image.len() % 0x200, 0);
    }

    #[test]
    fn pe32_plus_image() {
        let (mut asm, module) = sample();
        let options = SaveOptions::new().with_machine(ImageFileMachine::Amd64);
        let image = asm.emit_image(module, &options).unwrap();

        let pe = PE::parse(&image).unwrap();
        assert!(pe.is_64);
        assert!(pe.imports.is_empty());
        assert_eq!(pe.sections.len(), 1);
        assert_eq!(pe.entry, 0);
    }

    #[test]
    fn deterministic() {
        let (mut first, first_module) = sample();
        let (mut second, second_module) = sample();
        let options = SaveOptions::new();
        assert_eq!(
            first.emit_image(first_module, &options).unwrap(),
            second.emit_image(second_module, &options).unwrap()
        );
    }

    #[test]
    fn field_data_section() {
        let (mut asm, module) = sample();
        asm.module_builder(module)
            .unwrap()
            .define_initialized_data("Table", &[1, 2, 3, 4], FieldAttributes::STATIC)
            .unwrap();
        let image = asm.emit_image(module, &SaveOptions::new()).unwrap();
        let pe = PE::parse(&image).unwrap();
        assert!(pe
            .sections
            .iter()
            .any(|section| section.name().ok() == Some(".sdata")));
    }
}
