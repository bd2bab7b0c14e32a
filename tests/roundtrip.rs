//! Save an assembly that uses every structural feature, reload it and compare.

use std::sync::Arc;

use dotemit::{
    metadata::{
        customattributes::{CaNamedArgument, CaType},
        flags::PackingSize,
        marshalling::{MarshalDescriptor, NATIVE_TYPE},
        signatures::TypeSignature,
    },
    prelude::*,
    typesystem::corlib,
};
use tempfile::tempdir;

struct Geometry {
    asm: AssemblyBuilder,
    module: ModuleId,
}

fn is_volatile() -> Type {
    Type::External(Arc::new(ExternalType::class(
        AssemblyName::mscorlib(),
        "System.Runtime.CompilerServices",
        "IsVolatile",
    )))
}

fn ret_only(asm: &mut AssemblyBuilder, method: MethodId) -> Result<()> {
    let mut il = asm.il_generator(method)?;
    il.emit(OpCode::RET)?;
    Ok(())
}

fn build() -> Result<Geometry> {
    let mut asm = AssemblyBuilder::new(
        AssemblyName::new("Geometry").with_version(AssemblyVersion {
            major: 2,
            minor: 1,
            build: 0,
            revision: 7,
        }),
        AssemblyBuilderAccess::Save,
    );
    let module = asm.define_persistent_module("Geometry", "Geometry.dll")?;

    // Interface with one abstract member.
    let shape = asm.module_builder(module)?.define_type(
        "Geometry.IShape",
        TypeAttributes::PUBLIC | TypeAttributes::INTERFACE | TypeAttributes::ABSTRACT,
    )?;
    asm.type_builder(shape)?.define_method(
        "Area",
        MethodAttributes::PUBLIC
            | MethodAttributes::ABSTRACT
            | MethodAttributes::VIRTUAL
            | MethodAttributes::NEW_SLOT
            | MethodAttributes::HIDE_BY_SIG,
        Type::I4,
        vec![],
    )?;
    asm.type_builder(shape)?.create_type()?;

    // Explicit layout with packing and a class size.
    let packet = asm.module_builder(module)?.define_type_with(
        "Geometry.Packet",
        TypeAttributes::PUBLIC | TypeAttributes::SEALED | TypeAttributes::EXPLICIT_LAYOUT,
        TypeOptions::new()
            .with_parent(corlib::value_type())
            .with_packing(PackingSize::Size4)
            .with_size(16),
    )?;
    let header = asm
        .type_builder(packet)?
        .define_field("Header", Type::I4, FieldAttributes::PUBLIC)?;
    let flags = asm
        .type_builder(packet)?
        .define_field("Flags", Type::U4, FieldAttributes::PUBLIC)?;
    let counter = asm.type_builder(packet)?.define_field_with_modifiers(
        "Counter",
        ParamType::with_modifiers(Type::I4, vec![is_volatile()], vec![]),
        FieldAttributes::PUBLIC,
    )?;
    asm.field_builder(header)?.set_offset(0)?;
    asm.field_builder(flags)?.set_offset(4)?;
    asm.field_builder(flags)?
        .set_marshal(MarshalDescriptor::Simple(NATIVE_TYPE::U4))?;
    asm.field_builder(counter)?.set_offset(8)?;
    asm.type_builder(packet)?.create_type()?;

    // Class implementing the interface, with a nested type, a property and an event.
    let square = asm.module_builder(module)?.define_type_with(
        "Geometry.Square",
        TypeAttributes::PUBLIC,
        TypeOptions::new().with_interface(Type::Builder(shape)),
    )?;
    let corner = asm
        .type_builder(square)?
        .define_nested_type("Corner", TypeAttributes::NESTED_PUBLIC)?;
    let sides = asm.type_builder(square)?.define_field(
        "Sides",
        Type::I4,
        FieldAttributes::PUBLIC | FieldAttributes::STATIC | FieldAttributes::LITERAL,
    )?;
    asm.field_builder(sides)?.set_constant(Constant::I4(4))?;

    let area = asm.type_builder(square)?.define_method(
        "Area",
        MethodAttributes::PUBLIC
            | MethodAttributes::VIRTUAL
            | MethodAttributes::NEW_SLOT
            | MethodAttributes::HIDE_BY_SIG,
        Type::I4,
        vec![],
    )?;
    let side = asm.type_builder(square)?.define_property(
        "Side",
        PropertyAttributes::empty(),
        Type::I4,
        vec![],
    )?;
    let get_side = asm.type_builder(square)?.define_method(
        "get_Side",
        MethodAttributes::PUBLIC | MethodAttributes::SPECIAL_NAME | MethodAttributes::HIDE_BY_SIG,
        Type::I4,
        vec![],
    )?;
    let set_side = asm.type_builder(square)?.define_method(
        "set_Side",
        MethodAttributes::PUBLIC | MethodAttributes::SPECIAL_NAME | MethodAttributes::HIDE_BY_SIG,
        Type::Void,
        vec![Type::I4],
    )?;
    asm.property_builder(side)?.set_get_method(get_side)?;
    asm.property_builder(side)?.set_set_method(set_side)?;

    let changed = asm.type_builder(square)?.define_event(
        "Changed",
        EventAttributes::empty(),
        corlib::event_handler(),
    )?;
    let accessor = MethodAttributes::PUBLIC | MethodAttributes::SPECIAL_NAME;
    let add = asm.type_builder(square)?.define_method(
        "add_Changed",
        accessor,
        Type::Void,
        vec![corlib::event_handler()],
    )?;
    let remove = asm.type_builder(square)?.define_method(
        "remove_Changed",
        accessor,
        Type::Void,
        vec![corlib::event_handler()],
    )?;
    let raise = asm
        .type_builder(square)?
        .define_method("raise_Changed", accessor, Type::Void, vec![])?;
    asm.event_builder(changed)?.set_add_on_method(add)?;
    asm.event_builder(changed)?.set_remove_on_method(remove)?;
    asm.event_builder(changed)?.set_raise_method(raise)?;

    asm.method_builder(set_side)?
        .define_parameter(1, ParamAttributes::empty(), Some("value"))?;

    let mut il = asm.il_generator(area)?;
    il.emit_i32(OpCode::LDC_I4, 16)?;
    il.emit(OpCode::RET)?;
    let mut il = asm.il_generator(get_side)?;
    il.emit_i32(OpCode::LDC_I4, 4)?;
    il.emit(OpCode::RET)?;
    for method in [set_side, add, remove, raise] {
        ret_only(&mut asm, method)?;
    }

    let obsolete = corlib::attribute_constructor(
        "System",
        "ObsoleteAttribute",
        vec![Type::String, Type::Boolean],
    );
    let attribute = CustomAttributeBuilder::new(
        obsolete,
        vec![CaValue::String(Some("use Polygon".into())), CaValue::Bool(false)],
    )
    .with_named_properties(
        vec![("DiagnosticId".to_string(), Type::String)],
        vec![CaValue::String(Some("GEO001".into()))],
    )?;
    asm.type_builder(square)?.set_custom_attribute(&attribute)?;
    asm.type_builder(square)?.create_type()?;
    asm.type_builder(corner)?.create_type()?;

    // Generic class with a constrained parameter.
    let holder = asm
        .module_builder(module)?
        .define_type("Geometry.Holder", TypeAttributes::PUBLIC)?;
    let params = asm.type_builder(holder)?.define_generic_parameters(&["TShape"])?;
    asm.generic_param_builder(params[0])?
        .set_interface_constraints(vec![Type::Builder(shape)])?;
    asm.generic_param_builder(params[0])?.set_generic_parameter_attributes(
        GenericParameterAttributes::REFERENCE_TYPE_CONSTRAINT,
    )?;
    asm.type_builder(holder)?.define_field(
        "Item",
        Type::GenericParam(params[0]),
        FieldAttributes::PUBLIC,
    )?;
    asm.type_builder(holder)?.create_type()?;

    Ok(Geometry { asm, module })
}

#[test]
fn structural_features_survive_save() -> Result<()> {
    let dir = tempdir()?;
    let Geometry { asm, .. } = build()?;
    let mut asm = asm.with_directory(dir.path());
    let path = asm.save("Geometry.dll")?;
    let loaded = LoadedModule::from_file(&path)?;

    let assembly = loaded.assembly.as_ref().expect("manifest");
    assert_eq!(assembly.name.name, "Geometry");
    assert_eq!(assembly.name.version.revision, 7);

    // Interface implementation
    let square = loaded.type_by_name("Geometry.Square").expect("Square");
    assert_eq!(square.interfaces.len(), 1);
    assert_eq!(loaded.type_name(square.interfaces[0])?, "Geometry.IShape");
    let shape = loaded.type_by_name("Geometry.IShape").expect("IShape");
    assert!(shape.attributes.contains(TypeAttributes::INTERFACE));
    assert!(shape.extends.is_none());
    let abstract_area = shape.method("Area").expect("IShape.Area");
    assert!(abstract_area.attributes.contains(MethodAttributes::ABSTRACT));
    assert!(abstract_area.body.is_none());

    // Layout, offsets, marshalling and modifiers
    let packet = loaded.type_by_name("Geometry.Packet").expect("Packet");
    assert!(packet.attributes.contains(TypeAttributes::EXPLICIT_LAYOUT));
    assert_eq!(packet.packing, Some(4));
    assert_eq!(packet.class_size, Some(16));
    assert_eq!(loaded.type_name(packet.extends.expect("base"))?, "System.ValueType");
    assert_eq!(packet.field("Header").expect("Header").offset, Some(0));
    let flags = packet.field("Flags").expect("Flags");
    assert_eq!(flags.offset, Some(4));
    assert_eq!(flags.marshal, Some(MarshalDescriptor::Simple(NATIVE_TYPE::U4)));
    assert!(flags.attributes.contains(FieldAttributes::HAS_FIELD_MARSHAL));
    let counter = packet.field("Counter").expect("Counter");
    assert_eq!(counter.signature.base, TypeSignature::I4);
    assert_eq!(counter.signature.modifiers.len(), 1);
    assert!(counter.signature.modifiers[0].is_required);
    assert_eq!(
        loaded.type_name(counter.signature.modifiers[0].modifier_type)?,
        "System.Runtime.CompilerServices.IsVolatile"
    );

    // Nesting
    let corner = loaded.type_by_name("Geometry.Square+Corner").expect("Corner");
    assert_eq!(corner.enclosing, Some(square.token));
    assert!(corner.attributes.contains(TypeAttributes::NESTED_PUBLIC));

    // Constants and the implicit constructor
    assert_eq!(
        square.field("Sides").expect("Sides").constant,
        Some(Constant::I4(4))
    );
    let ctor = square.method(".ctor").expect("default constructor");
    assert!(ctor.attributes.contains(MethodAttributes::RT_SPECIAL_NAME));

    // Property accessors
    let side = square.property("Side").expect("Side");
    assert_eq!(loaded.member_name(side.getter.expect("getter"))?, "get_Side");
    assert_eq!(loaded.member_name(side.setter.expect("setter"))?, "set_Side");
    let setter = square.method("set_Side").expect("set_Side");
    assert_eq!(setter.param(1).expect("value").name, "value");

    // Event accessors
    let changed = square.event("Changed").expect("Changed");
    assert_eq!(loaded.type_name(changed.event_type)?, "System.EventHandler");
    assert_eq!(loaded.member_name(changed.add_on.expect("add"))?, "add_Changed");
    assert_eq!(
        loaded.member_name(changed.remove_on.expect("remove"))?,
        "remove_Changed"
    );
    assert_eq!(loaded.member_name(changed.raise.expect("raise"))?, "raise_Changed");

    // Generic parameter with constraints
    let holder = loaded.type_by_name("Geometry.Holder").expect("Holder");
    assert_eq!(holder.generic_params.len(), 1);
    let parameter = &holder.generic_params[0];
    assert_eq!(parameter.name, "TShape");
    assert_eq!(parameter.number, 0);
    assert!(parameter
        .attributes
        .contains(GenericParameterAttributes::REFERENCE_TYPE_CONSTRAINT));
    assert_eq!(parameter.constraints.len(), 1);
    assert_eq!(loaded.type_name(parameter.constraints[0])?, "Geometry.IShape");
    assert_eq!(
        holder.field("Item").expect("Item").signature.base,
        TypeSignature::GenericParamType(0)
    );

    // Custom attribute payload
    let attribute = &square.custom_attributes[0];
    assert_eq!(attribute.attribute_type, "System.ObsoleteAttribute");
    let value = attribute.value.as_ref().expect("decoded attribute");
    assert_eq!(
        value.fixed_args,
        vec![CaValue::String(Some("use Polygon".into())), CaValue::Bool(false)]
    );
    assert_eq!(
        value.named_args,
        vec![CaNamedArgument {
            is_field: false,
            name: "DiagnosticId".to_string(),
            arg_type: CaType::String,
            value: CaValue::String(Some("GEO001".into())),
        }]
    );
    Ok(())
}

#[test]
fn bodies_survive_save() -> Result<()> {
    let Geometry { mut asm, module } = build()?;
    let image = asm.emit_image(module, &SaveOptions::new())?;
    let loaded = LoadedModule::from_mem(image)?;

    let square = loaded.type_by_name("Geometry.Square").expect("Square");
    let area = square.method("Area").expect("Area");
    assert!(area.attributes.contains(MethodAttributes::VIRTUAL));
    let body = area.body.as_ref().expect("body");
    assert_eq!(body.code, vec![0x20, 16, 0, 0, 0, 0x2A]);
    assert!(body.handlers.is_empty());
    Ok(())
}

#[test]
fn identical_definitions_give_identical_images() -> Result<()> {
    let Geometry {
        asm: mut first,
        module: first_module,
    } = build()?;
    let Geometry {
        asm: mut second,
        module: second_module,
    } = build()?;

    let options = SaveOptions::new();
    let first_image = first.emit_image(first_module, &options)?;
    let second_image = second.emit_image(second_module, &options)?;
    assert_eq!(first_image, second_image);

    let first_mvid = LoadedModule::from_mem(first_image)?.module.mvid;
    let second_mvid = LoadedModule::from_mem(second_image)?.module.mvid;
    assert_eq!(first_mvid, second_mvid);
    Ok(())
}

#[test]
fn secondary_module_is_listed_in_manifest() -> Result<()> {
    let dir = tempdir()?;
    let mut asm = AssemblyBuilder::new(AssemblyName::new("Multi"), AssemblyBuilderAccess::Save)
        .with_directory(dir.path());
    asm.define_persistent_module("Multi", "Multi.dll")?;
    let extra = asm.define_persistent_module("Extra", "Extra.netmodule")?;
    let tool = asm
        .module_builder(extra)?
        .define_type("Multi.Tool", TypeAttributes::PUBLIC)?;
    asm.type_builder(tool)?.create_type()?;
    let path = asm.save("Multi.dll")?;

    let manifest = LoadedModule::from_file(&path)?;
    assert_eq!(manifest.module.name, "Multi");
    let file = manifest
        .files
        .iter()
        .find(|file| file.name == "Extra.netmodule")
        .expect("module file");
    assert_eq!(file.hash.len(), 20);
    let exported = manifest
        .exported_types
        .iter()
        .find(|exported| exported.name == "Tool")
        .expect("exported type");
    assert_eq!(exported.namespace, "Multi");

    let secondary = LoadedModule::from_file(&dir.path().join("Extra.netmodule"))?;
    assert!(secondary.assembly.is_none());
    assert_eq!(secondary.module.name, "Extra");
    assert!(secondary.type_by_name("Multi.Tool").is_some());
    Ok(())
}
