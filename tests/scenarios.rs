//! End to end scenarios across builders, persistence and the loader.

use std::fs;

use dotemit::{
    emit::TypeBuilder,
    prelude::*,
    typesystem::corlib,
};
use tempfile::tempdir;

fn save_access(name: &str) -> AssemblyBuilder {
    AssemblyBuilder::new(AssemblyName::new(name), AssemblyBuilderAccess::Save)
}

/// A zero-filled global data field survives save and reload with its size.
#[test]
fn uninitialized_global_data() -> Result<()> {
    let dir = tempdir()?;
    let mut asm = save_access("Data").with_directory(dir.path());
    let module = asm.define_persistent_module("Data", "Data.dll")?;
    asm.module_builder(module)?
        .define_uninitialized_data("Buffer", 16, FieldAttributes::PUBLIC)?;
    asm.module_builder(module)?.create_global_functions()?;
    let path = asm.save("Data.dll")?;

    let loaded = LoadedModule::from_file(&path)?;
    let global = loaded.type_by_name("<Module>").expect("global type");
    let buffer = global.field("Buffer").expect("data field");
    assert!(buffer.attributes.contains(FieldAttributes::STATIC));
    assert!(buffer.attributes.contains(FieldAttributes::HAS_FIELD_RVA));
    assert_eq!(buffer.data.as_deref(), Some(&[0_u8; 16][..]));

    let holder = loaded
        .type_by_name("$ArrayType$16")
        .expect("size holder");
    assert_eq!(holder.class_size, Some(16));
    Ok(())
}

/// The underlying type of an enum is only known once its instance field exists.
#[test]
fn enum_underlying_type_follows_value_field() -> Result<()> {
    let mut asm = AssemblyBuilder::new(AssemblyName::new("Enums"), AssemblyBuilderAccess::Run);
    let module = asm.define_dynamic_module("Enums")?;
    let level = asm.module_builder(module)?.define_type_with_parent(
        "Level",
        TypeAttributes::PUBLIC | TypeAttributes::SEALED,
        Some(corlib::enum_type()),
    )?;

    let error = asm.type_builder(level)?.underlying_system_type().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidState);

    asm.type_builder(level)?.define_field(
        "value__",
        Type::I4,
        FieldAttributes::PUBLIC | FieldAttributes::SPECIAL_NAME | FieldAttributes::RT_SPECIAL_NAME,
    )?;
    assert_eq!(asm.type_builder(level)?.underlying_system_type()?, Type::I4);

    asm.type_builder(level)?.create_type()?;
    assert_eq!(asm.type_builder(level)?.underlying_system_type()?, Type::I4);
    Ok(())
}

/// A member looked up on `Box<int>` reports `int` both before and after `Box<T>` is created.
#[test]
fn generic_instantiation_before_and_after_creation() -> Result<()> {
    let mut asm = AssemblyBuilder::new(AssemblyName::new("Boxes"), AssemblyBuilderAccess::Run);
    let module = asm.define_dynamic_module("Boxes")?;
    let boxed = asm
        .module_builder(module)?
        .define_type("Box", TypeAttributes::PUBLIC)?;
    let params = asm.type_builder(boxed)?.define_generic_parameters(&["T"])?;
    let get = asm.type_builder(boxed)?.define_method(
        "Get",
        MethodAttributes::PUBLIC,
        Type::GenericParam(params[0]),
        vec![],
    )?;

    let instance = asm.type_builder(boxed)?.make_generic_type(vec![Type::I4])?;
    let method = TypeBuilder::get_method(&asm, &instance, get)?;
    let before = asm.method_ref_signature(&method)?;
    assert_eq!(before.return_type.ty, Type::I4);

    let mut il = asm.il_generator(get)?;
    il.emit(OpCode::LDNULL)?;
    il.emit(OpCode::RET)?;
    asm.type_builder(boxed)?.create_type()?;

    let after = asm.method_ref_signature(&method)?;
    assert_eq!(after.return_type.ty, Type::I4);
    assert_eq!(before, after);
    Ok(())
}

/// Closing a filter region twice is rejected.
#[test]
fn filter_region_closes_once() -> Result<()> {
    let mut asm = AssemblyBuilder::new(AssemblyName::new("Filters"), AssemblyBuilderAccess::Run);
    let module = asm.define_dynamic_module("Filters")?;
    let host = asm
        .module_builder(module)?
        .define_type("Host", TypeAttributes::PUBLIC)?;
    let run = asm.type_builder(host)?.define_method(
        "Run",
        MethodAttributes::PUBLIC | MethodAttributes::STATIC,
        Type::Void,
        vec![],
    )?;

    let mut il = asm.il_generator(run)?;
    let done = il.define_label()?;
    il.begin_exception_block()?;
    il.emit(OpCode::NOP)?;
    il.begin_except_filter_block()?;
    il.emit(OpCode::POP)?;
    il.emit_i32(OpCode::LDC_I4, 1)?;
    il.begin_catch_block(None)?;
    il.emit(OpCode::POP)?;
    il.end_exception_block()?;
    il.mark_label(done)?;
    il.emit(OpCode::RET)?;

    let error = il.end_exception_block().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidState);
    Ok(())
}

/// Resource names and backing files are both unique per assembly.
#[test]
fn duplicate_resource_names_and_files() -> Result<()> {
    let dir = tempdir()?;
    fs::write(dir.path().join("first.txt"), b"first")?;
    fs::write(dir.path().join("second.txt"), b"second")?;

    let mut asm = save_access("Resources").with_directory(dir.path());
    asm.define_persistent_module("Resources", "Resources.dll")?;

    asm.add_resource_file("foo", "first.txt")?;
    let error = asm.add_resource_file("foo", "second.txt").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidArgument);
    let error = asm.add_resource_file("foo2", "first.txt").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidArgument);

    let error = asm.add_resource_file("bar", "missing.txt").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::MissingResource);
    Ok(())
}

/// Linked resources end up as File and ManifestResource rows of the manifest.
#[test]
fn linked_resource_in_manifest() -> Result<()> {
    let dir = tempdir()?;
    fs::write(dir.path().join("notes.txt"), b"notes")?;

    let mut asm = save_access("Linked").with_directory(dir.path());
    asm.define_persistent_module("Linked", "Linked.dll")?;
    asm.add_resource_file("notes", "notes.txt")?;
    let path = asm.save("Linked.dll")?;

    let loaded = LoadedModule::from_file(&path)?;
    let file = loaded
        .files
        .iter()
        .find(|file| file.name == "notes.txt")
        .expect("file row");
    assert_eq!(file.hash.len(), 20);

    let resource = loaded
        .resources
        .iter()
        .find(|resource| resource.name == "notes")
        .expect("resource row");
    assert!(resource.data.is_none());
    assert!(!resource.implementation.is_null());
    Ok(())
}
