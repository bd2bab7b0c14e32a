//! Builder lifecycle, token identity and exception region protocol.

use dotemit::{
    metadata::method::ExceptionHandlerFlags,
    prelude::*,
    typesystem::corlib,
};

fn run_only(name: &str) -> Result<(AssemblyBuilder, ModuleId)> {
    let mut asm = AssemblyBuilder::new(AssemblyName::new(name), AssemblyBuilderAccess::Run);
    let module = asm.define_dynamic_module(name)?;
    Ok((asm, module))
}

fn static_void(asm: &mut AssemblyBuilder, owner: TypeId, name: &str) -> Result<MethodId> {
    asm.type_builder(owner)?.define_method(
        name,
        MethodAttributes::PUBLIC | MethodAttributes::STATIC,
        Type::Void,
        vec![],
    )
}

#[test]
fn created_types_reject_mutation() -> Result<()> {
    let (mut asm, module) = run_only("Lifecycle")?;
    let counter = asm
        .module_builder(module)?
        .define_type("App.Counter", TypeAttributes::PUBLIC)?;
    let total = asm
        .type_builder(counter)?
        .define_field("total", Type::I8, FieldAttributes::PRIVATE)?;
    let reset = static_void(&mut asm, counter, "Reset")?;
    asm.il_generator(reset)?.emit(OpCode::RET)?;

    let error = asm.type_builder(counter)?.get_fields().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotSupported);

    asm.type_builder(counter)?.create_type()?;

    let mut ty = asm.type_builder(counter)?;
    let failures = [
        ty.define_field("extra", Type::I4, FieldAttributes::PUBLIC).map(|_| ()),
        ty.define_method("Extra", MethodAttributes::PUBLIC, Type::Void, vec![])
            .map(|_| ()),
        ty.define_nested_type("Inner", TypeAttributes::NESTED_PUBLIC)
            .map(|_| ()),
        ty.add_interface_implementation(corlib::idisposable()),
        ty.set_parent(None),
        ty.create_type().map(|_| ()),
    ];
    for failure in failures {
        assert_eq!(failure.unwrap_err().kind(), ErrorKind::InvalidState);
    }

    assert_eq!(ty.full_name()?, "App.Counter");
    assert!(ty.is_created()?);
    assert!(ty.attributes()?.contains(TypeAttributes::PUBLIC));
    let fields = ty.get_fields()?;
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].name, "total");

    let error = asm
        .field_builder(total)?
        .set_offset(4)
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidState);
    assert!(asm.il_generator(reset).is_err());
    Ok(())
}

#[test]
fn tokens_are_idempotent_and_distinct() -> Result<()> {
    let (mut asm, module) = run_only("Tokens")?;
    let host = asm
        .module_builder(module)?
        .define_type("Host", TypeAttributes::PUBLIC)?;
    let first = static_void(&mut asm, host, "First")?;
    let second = static_void(&mut asm, host, "Second")?;

    let builder = asm.module_builder(module)?;
    let int = builder.get_type_token(&Type::I4)?;
    assert_eq!(builder.get_type_token(&Type::I4)?, int);
    assert_ne!(builder.get_type_token(&Type::I8)?, int);
    assert_ne!(
        builder.get_type_token(&Type::I4.make_array_type())?,
        int
    );

    let hello = builder.get_string_constant("hello")?;
    assert_eq!(builder.get_string_constant("hello")?, hello);
    assert_ne!(builder.get_string_constant("world")?, hello);

    let first_token = builder.get_method_token(&MethodRef::from(first))?;
    assert_eq!(builder.get_method_token(&MethodRef::from(first))?, first_token);
    assert_ne!(builder.get_method_token(&MethodRef::from(second))?, first_token);

    let own = builder.get_type_token(&Type::Builder(host))?;
    assert_eq!(own, builder.get_type_token(&Type::Builder(host))?);
    Ok(())
}

#[test]
fn exception_region_protocol() -> Result<()> {
    let (mut asm, module) = run_only("Regions")?;
    let host = asm
        .module_builder(module)?
        .define_type("Host", TypeAttributes::PUBLIC)?;
    let method = static_void(&mut asm, host, "Run")?;
    let mut il = asm.il_generator(method)?;

    assert_eq!(il.end_exception_block().unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(il.begin_catch_block(None).unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(il.begin_finally_block().unwrap_err().kind(), ErrorKind::InvalidState);

    il.begin_exception_block()?;
    assert_eq!(il.end_exception_block().unwrap_err().kind(), ErrorKind::InvalidState);

    il.begin_except_filter_block()?;
    assert_eq!(il.end_exception_block().unwrap_err().kind(), ErrorKind::InvalidState);
    let error = il.begin_catch_block(Some(&corlib::exception())).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidArgument);
    Ok(())
}

#[test]
fn handler_table_follows_declaration_order() -> Result<()> {
    let mut asm = AssemblyBuilder::new(AssemblyName::new("Handlers"), AssemblyBuilderAccess::Save);
    let module = asm.define_persistent_module("Handlers", "Handlers.dll")?;
    let host = asm
        .module_builder(module)?
        .define_type("Host", TypeAttributes::PUBLIC)?;
    let method = static_void(&mut asm, host, "Run")?;

    let mut il = asm.il_generator(method)?;
    il.begin_exception_block()?;
    il.emit(OpCode::NOP)?;
    il.begin_catch_block(Some(&corlib::exception()))?;
    il.emit(OpCode::POP)?;
    il.end_exception_block()?;

    il.begin_exception_block()?;
    il.emit(OpCode::NOP)?;
    il.begin_finally_block()?;
    il.emit(OpCode::NOP)?;
    il.end_exception_block()?;
    il.emit(OpCode::RET)?;
    asm.type_builder(host)?.create_type()?;

    let image = asm.emit_image(module, &SaveOptions::new())?;
    let loaded = LoadedModule::from_mem(image)?;
    let run = loaded
        .type_by_name("Host")
        .and_then(|host| host.method("Run"))
        .expect("Run");
    let handlers = &run.body.as_ref().expect("body").handlers;
    assert_eq!(handlers.len(), 2);
    assert_eq!(handlers[0].flags, ExceptionHandlerFlags::EXCEPTION);
    assert_eq!(loaded.type_name(handlers[0].class_token)?, "System.Exception");
    assert!(handlers[1].flags.contains(ExceptionHandlerFlags::FINALLY));
    assert!(handlers[0].try_offset < handlers[1].try_offset);
    assert!(handlers[0].handler_offset + handlers[0].handler_length <= handlers[1].try_offset);
    Ok(())
}

#[test]
fn save_is_one_shot() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut asm = AssemblyBuilder::new(AssemblyName::new("Once"), AssemblyBuilderAccess::Save)
        .with_directory(dir.path());
    asm.define_persistent_module("Once", "Once.dll")?;
    asm.save("Once.dll")?;
    assert!(asm.is_saved());
    assert_eq!(asm.save("Once.dll").unwrap_err().kind(), ErrorKind::InvalidState);

    let (mut transient, _) = run_only("Transient")?;
    assert_eq!(
        transient.save("Transient.dll").unwrap_err().kind(),
        ErrorKind::NotSupported
    );
    assert_eq!(transient.location().unwrap_err().kind(), ErrorKind::NotSupported);
    Ok(())
}

#[test]
fn implicit_finalization_on_save() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut asm = AssemblyBuilder::new(AssemblyName::new("Implicit"), AssemblyBuilderAccess::Save)
        .with_directory(dir.path());
    let module = asm.define_persistent_module("Implicit", "Implicit.dll")?;
    let open = asm
        .module_builder(module)?
        .define_type("Open", TypeAttributes::PUBLIC)?;
    asm.save("Implicit.dll")?;
    assert!(asm.type_builder(open)?.is_created()?);

    let mut strict = AssemblyBuilder::new(AssemblyName::new("Strict"), AssemblyBuilderAccess::Save)
        .with_options(EmitOptions::default().with_finalize_on_save(false))
        .with_directory(dir.path());
    let module = strict.define_persistent_module("Strict", "Strict.dll")?;
    strict
        .module_builder(module)?
        .define_type("Open", TypeAttributes::PUBLIC)?;
    assert_eq!(
        strict.save("Strict.dll").unwrap_err().kind(),
        ErrorKind::InvalidState
    );
    Ok(())
}
