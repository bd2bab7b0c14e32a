//! Final row numbers of the definition tables.
//!
//! While building, fields and methods get provisional rows in definition order across the
//! whole module, and those rows are what instruction operands and interned `MethodSpec`
//! rows carry. The persisted `Field` and `MethodDef` tables must instead list the members
//! of each type contiguously, in `TypeDef` order. [`RowLayout`] assigns those final rows
//! and maps provisional tokens onto them.

use std::collections::HashMap;

use crate::{
    emit::{AssemblyBuilder, FieldId, MethodId, ModuleId, TypeId},
    metadata::{tables::TableId, token::Token},
    Result,
};

/// Member ranges of one `TypeDef` row.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TypeRange {
    pub first_field: u32,
    pub first_method: u32,
}

pub(crate) struct RowLayout {
    /// Types in `TypeDef` order
    pub types: Vec<TypeId>,
    /// Fields in final `Field` order
    pub fields: Vec<FieldId>,
    /// Methods in final `MethodDef` order
    pub methods: Vec<MethodId>,
    pub ranges: Vec<TypeRange>,
    field_rows: HashMap<u32, u32>,
    method_rows: HashMap<u32, u32>,
}

impl RowLayout {
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(asm: &AssemblyBuilder, module: ModuleId) -> Result<Self> {
        let types = asm.module_data(module)?.types.clone();
        let mut layout = RowLayout {
            types: Vec::with_capacity(types.len()),
            fields: Vec::new(),
            methods: Vec::new(),
            ranges: Vec::with_capacity(types.len()),
            field_rows: HashMap::new(),
            method_rows: HashMap::new(),
        };

        for id in types {
            let data = asm.type_data(id)?;
            layout.ranges.push(TypeRange {
                first_field: layout.fields.len() as u32 + 1,
                first_method: layout.methods.len() as u32 + 1,
            });
            for field in &data.fields {
                layout.fields.push(*field);
                let row = layout.fields.len() as u32;
                layout.field_rows.insert(asm.field_data(*field)?.row, row);
            }
            for method in &data.methods {
                layout.methods.push(*method);
                let row = layout.methods.len() as u32;
                layout.method_rows.insert(asm.method_data(*method)?.row, row);
            }
            layout.types.push(id);
        }

        Ok(layout)
    }

    /// Final `Field` row of a field of this module.
    pub fn field_row(&self, asm: &AssemblyBuilder, id: FieldId) -> Result<u32> {
        let provisional = asm.field_data(id)?.row;
        self.field_rows
            .get(&provisional)
            .copied()
            .ok_or_else(|| invalid_argument!("field", "Field is not defined in this module"))
    }

    /// Final `MethodDef` row of a method of this module.
    pub fn method_row(&self, asm: &AssemblyBuilder, id: MethodId) -> Result<u32> {
        let provisional = asm.method_data(id)?.row;
        self.method_rows
            .get(&provisional)
            .copied()
            .ok_or_else(|| invalid_argument!("method", "Method is not defined in this module"))
    }

    /// Map a provisional `Field` or `MethodDef` token to its final row; any other token
    /// is returned unchanged.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a definition token that was never handed
    /// out by the module.
    pub fn remap(&self, token: Token) -> Result<Token> {
        let (table, rows) = match token.table_id() {
            Some(table @ TableId::Field) => (table, &self.field_rows),
            Some(table @ TableId::MethodDef) => (table, &self.method_rows),
            _ => return Ok(token),
        };
        match rows.get(&token.row()) {
            Some(row) => Ok(Token::from_parts(table, *row)),
            None => Err(malformed_error!("Dangling definition token {}", token)),
        }
    }

    /// Rewrite every 4-byte token operand of an IL stream.
    pub fn patch_code(&self, code: &mut [u8], fixups: &[usize]) -> Result<()> {
        for offset in fixups {
            let Some(bytes) = code.get_mut(*offset..*offset + 4) else {
                return Err(malformed_error!("Token fixup past the end of the body - {}", offset));
            };
            let token = Token::new(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
            bytes.copy_from_slice(&self.remap(token)?.value().to_le_bytes());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emit::AssemblyBuilderAccess,
        metadata::{
            flags::{FieldAttributes, TypeAttributes},
            identity::AssemblyName,
        },
        typesystem::Type,
    };

    #[test]
    fn fields_are_grouped_per_type() {
        let mut asm = AssemblyBuilder::new(AssemblyName::new("rows"), AssemblyBuilderAccess::Save);
        let module = asm.define_persistent_module("rows", "rows.dll").unwrap();
        let first = asm
            .module_builder(module)
            .unwrap()
            .define_type("First", TypeAttributes::PUBLIC)
            .unwrap();
        let second = asm
            .module_builder(module)
            .unwrap()
            .define_type("Second", TypeAttributes::PUBLIC)
            .unwrap();

        let a = asm
            .type_builder(second)
            .unwrap()
            .define_field("a", Type::I4, FieldAttributes::PUBLIC)
            .unwrap();
        let b = asm
            .type_builder(first)
            .unwrap()
            .define_field("b", Type::I4, FieldAttributes::PUBLIC)
            .unwrap();

        let layout = RowLayout::new(&asm, module).unwrap();
        assert_eq!(layout.field_row(&asm, b).unwrap(), 1);
        assert_eq!(layout.field_row(&asm, a).unwrap(), 2);
        assert_eq!(
            layout.remap(Token::from_parts(TableId::Field, 1)).unwrap(),
            Token::from_parts(TableId::Field, 2)
        );
        assert_eq!(
            layout.remap(Token::new(0x0100_0003)).unwrap(),
            Token::new(0x0100_0003)
        );

        let mut code = vec![0x7E, 0x01, 0x00, 0x00, 0x04];
        layout.patch_code(&mut code, &[1]).unwrap();
        assert_eq!(code, vec![0x7E, 0x02, 0x00, 0x00, 0x04]);
        assert!(layout.patch_code(&mut code, &[3]).is_err());
    }
}
