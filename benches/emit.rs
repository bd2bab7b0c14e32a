//! Benchmarks for building and persisting assemblies.
//!
//! - Defining a wide type and lowering it to an image
//! - Encoding many method bodies
//! - Loading an image back

extern crate dotemit;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use dotemit::prelude::*;
use std::hint::black_box;

/// One type with `methods` static methods, each returning its own index.
fn wide_assembly(methods: usize) -> Result<(AssemblyBuilder, ModuleId)> {
    let mut asm = AssemblyBuilder::new(AssemblyName::new("Bench"), AssemblyBuilderAccess::Save);
    let module = asm.define_persistent_module("Bench", "Bench.dll")?;
    let ty = asm
        .module_builder(module)?
        .define_type("Bench.Wide", TypeAttributes::PUBLIC)?;

    for index in 0..methods {
        let method = asm.type_builder(ty)?.define_method(
            &format!("M{index}"),
            MethodAttributes::PUBLIC | MethodAttributes::STATIC,
            Type::I4,
            vec![Type::I4],
        )?;
        let mut il = asm.il_generator(method)?;
        let local = il.declare_local(Type::I4)?;
        il.emit_i32(OpCode::LDC_I4, i32::try_from(index).unwrap_or(i32::MAX))?;
        il.emit(OpCode::LDARG_0)?;
        il.emit(OpCode::ADD)?;
        il.emit_local(OpCode::STLOC, &local)?;
        il.emit_local(OpCode::LDLOC, &local)?;
        il.emit(OpCode::RET)?;
    }
    asm.type_builder(ty)?.create_type()?;
    Ok((asm, module))
}

/// Define 100 methods and emit the image.
fn bench_define_and_emit(c: &mut Criterion) {
    c.bench_function("define_and_emit_100_methods", |b| {
        b.iter(|| {
            let (mut asm, module) = wide_assembly(black_box(100)).unwrap();
            let image = asm.emit_image(module, &SaveOptions::new()).unwrap();
            black_box(image)
        });
    });
}

/// Emit an already defined assembly with 1000 method bodies.
fn bench_emit_bodies(c: &mut Criterion) {
    c.bench_function("emit_1000_bodies", |b| {
        b.iter_batched(
            || wide_assembly(1000).unwrap(),
            |(mut asm, module)| {
                let image = asm.emit_image(module, &SaveOptions::new()).unwrap();
                black_box(image)
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

/// Load an image with 1000 methods.
fn bench_load(c: &mut Criterion) {
    let (mut asm, module) = wide_assembly(1000).unwrap();
    let image = asm.emit_image(module, &SaveOptions::new()).unwrap();

    let mut group = c.benchmark_group("loader");
    group.throughput(Throughput::Bytes(image.len() as u64));
    group.bench_function("load_1000_methods", |b| {
        b.iter(|| {
            let loaded = LoadedModule::from_mem(black_box(image.clone())).unwrap();
            black_box(loaded)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_define_and_emit, bench_emit_bodies, bench_load);
criterion_main!(benches);
