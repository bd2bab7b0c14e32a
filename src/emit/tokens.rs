//! The per-module token table for referenced entities.
//!
//! Definitions (types, fields, methods, ...) live in the arena of the
//! [`crate::emit::AssemblyBuilder`] and get their tokens from their position there.
//! Everything a module only *references* is interned here instead: type references,
//! type specifications, member references, method specifications, stand-alone
//! signatures, module and assembly references and user strings.
//!
//! Rows are allocated in request order, so the returned tokens are final and will be the
//! tokens of the persisted image. Interning is keyed on the encoded identity of an
//! entity, which makes resolution idempotent: asking twice for the same entity returns
//! the same token, and two different entities never share one. The map is a [`DashMap`]
//! whose entry lock makes allocation for one key at-most-once, while lookups of
//! unrelated keys proceed on other shards. Row storage uses append-only [`boxcar::Vec`]s
//! so readers never block writers.

use std::sync::Mutex;

use dashmap::{mapref::entry::Entry, DashMap};
use log::trace;

use crate::{
    metadata::{heaps::UserStringHeap, identity::AssemblyName, tables::TableId, token::Token},
    Result,
};

/// Identity of an interned row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RefKey {
    TypeRef {
        scope: Token,
        namespace: String,
        name: String,
    },
    TypeSpec(Vec<u8>),
    MemberRef {
        parent: Token,
        name: String,
        signature: Vec<u8>,
    },
    MethodSpec {
        method: Token,
        instantiation: Vec<u8>,
    },
    StandAloneSig(Vec<u8>),
    ModuleRef(String),
    AssemblyRef(String),
}

/// A `TypeRef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRefRow {
    /// `AssemblyRef`, `ModuleRef` or enclosing `TypeRef`
    pub scope: Token,
    /// Namespace, empty for nested types
    pub namespace: String,
    /// Simple name
    pub name: String,
}

/// A `MemberRef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRefRow {
    /// `TypeRef`, `TypeSpec`, `ModuleRef` or `TypeDef` the member lives on
    pub parent: Token,
    /// Member name
    pub name: String,
    /// Field or method signature blob
    pub signature: Vec<u8>,
}

/// A `MethodSpec` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSpecRow {
    /// The generic method, `MethodDef` or `MemberRef`
    pub method: Token,
    /// Instantiation blob
    pub instantiation: Vec<u8>,
}

/// A referenced entity as returned by [`TokenTable::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedRef {
    /// A type reference
    TypeRef(TypeRefRow),
    /// A type specification blob
    TypeSpec(Vec<u8>),
    /// A member reference
    MemberRef(MemberRefRow),
    /// A generic method instantiation
    MethodSpec(MethodSpecRow),
    /// A stand-alone signature blob
    StandAloneSig(Vec<u8>),
    /// A module reference by name
    ModuleRef(String),
    /// An assembly reference
    AssemblyRef(AssemblyName),
    /// A user string literal
    UserString(String),
}

/// Interned references of one module.
pub struct TokenTable {
    keys: DashMap<RefKey, Token>,
    type_refs: boxcar::Vec<TypeRefRow>,
    type_specs: boxcar::Vec<Vec<u8>>,
    member_refs: boxcar::Vec<MemberRefRow>,
    method_specs: boxcar::Vec<MethodSpecRow>,
    signatures: boxcar::Vec<Vec<u8>>,
    module_refs: boxcar::Vec<String>,
    assembly_refs: boxcar::Vec<AssemblyName>,
    user_strings: Mutex<UserStringHeap>,
}

impl Default for TokenTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        TokenTable {
            keys: DashMap::new(),
            type_refs: boxcar::Vec::new(),
            type_specs: boxcar::Vec::new(),
            member_refs: boxcar::Vec::new(),
            method_specs: boxcar::Vec::new(),
            signatures: boxcar::Vec::new(),
            module_refs: boxcar::Vec::new(),
            assembly_refs: boxcar::Vec::new(),
            user_strings: Mutex::new(UserStringHeap::new()),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn intern(&self, key: RefKey, table: TableId, allocate: impl FnOnce() -> usize) -> Token {
        match self.keys.entry(key) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let token = Token::from_parts(table, allocate() as u32 + 1);
                trace!("Allocated {:?} row {}", table, token.row());
                entry.insert(token);
                token
            }
        }
    }

    /// Token of the `AssemblyRef` for `name`, keyed on its display name.
    pub fn assembly_ref(&self, name: &AssemblyName) -> Token {
        self.intern(
            RefKey::AssemblyRef(name.display_name()),
            TableId::AssemblyRef,
            || self.assembly_refs.push(name.clone()),
        )
    }

    /// Token of the `ModuleRef` for the module file `name`.
    pub fn module_ref(&self, name: &str) -> Token {
        self.intern(RefKey::ModuleRef(name.to_string()), TableId::ModuleRef, || {
            self.module_refs.push(name.to_string())
        })
    }

    /// Token of the `TypeRef` for `namespace.name` in `scope`.
    pub fn type_ref(&self, scope: Token, namespace: &str, name: &str) -> Token {
        let key = RefKey::TypeRef {
            scope,
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.intern(key, TableId::TypeRef, || {
            self.type_refs.push(TypeRefRow {
                scope,
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
        })
    }

    /// Token of the `TypeSpec` with the given signature blob.
    pub fn type_spec(&self, signature: Vec<u8>) -> Token {
        self.intern(
            RefKey::TypeSpec(signature.clone()),
            TableId::TypeSpec,
            || self.type_specs.push(signature),
        )
    }

    /// Token of the `MemberRef` for `name` with `signature` on `parent`.
    pub fn member_ref(&self, parent: Token, name: &str, signature: Vec<u8>) -> Token {
        let key = RefKey::MemberRef {
            parent,
            name: name.to_string(),
            signature: signature.clone(),
        };
        self.intern(key, TableId::MemberRef, || {
            self.member_refs.push(MemberRefRow {
                parent,
                name: name.to_string(),
                signature,
            })
        })
    }

    /// Token of the `MethodSpec` instantiating `method` with `instantiation`.
    pub fn method_spec(&self, method: Token, instantiation: Vec<u8>) -> Token {
        let key = RefKey::MethodSpec {
            method,
            instantiation: instantiation.clone(),
        };
        self.intern(key, TableId::MethodSpec, || {
            self.method_specs.push(MethodSpecRow {
                method,
                instantiation,
            })
        })
    }

    /// Token of the `StandAloneSig` with the given signature blob.
    pub fn standalone_sig(&self, signature: Vec<u8>) -> Token {
        self.intern(
            RefKey::StandAloneSig(signature.clone()),
            TableId::StandAloneSig,
            || self.signatures.push(signature),
        )
    }

    /// Token of the user string literal `value`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] once the `#US` heap is full.
    pub fn user_string(&self, value: &str) -> Result<Token> {
        let mut heap = lock!(self.user_strings)?;
        Ok(Token::user_string(heap.add(value)?))
    }

    /// Look up the entity behind a token handed out by this table.
    #[must_use]
    pub fn resolve(&self, token: Token) -> Option<ResolvedRef> {
        if token.is_user_string() {
            let heap = lock!(self.user_strings).ok()?;
            let view = crate::metadata::heaps::UserStringsView::new(heap.bytes());
            return view.get(token.row()).ok().map(ResolvedRef::UserString);
        }

        let index = (token.row() as usize).checked_sub(1)?;
        match token.table_id()? {
            TableId::TypeRef => self.type_refs.get(index).cloned().map(ResolvedRef::TypeRef),
            TableId::TypeSpec => self.type_specs.get(index).cloned().map(ResolvedRef::TypeSpec),
            TableId::MemberRef => self
                .member_refs
                .get(index)
                .cloned()
                .map(ResolvedRef::MemberRef),
            TableId::MethodSpec => self
                .method_specs
                .get(index)
                .cloned()
                .map(ResolvedRef::MethodSpec),
            TableId::StandAloneSig => self
                .signatures
                .get(index)
                .cloned()
                .map(ResolvedRef::StandAloneSig),
            TableId::ModuleRef => self
                .module_refs
                .get(index)
                .cloned()
                .map(ResolvedRef::ModuleRef),
            TableId::AssemblyRef => self
                .assembly_refs
                .get(index)
                .cloned()
                .map(ResolvedRef::AssemblyRef),
            _ => None,
        }
    }

    /// `TypeRef` rows in token order.
    pub fn type_refs(&self) -> Vec<TypeRefRow> {
        ordered(&self.type_refs)
    }

    /// `TypeSpec` blobs in token order.
    pub fn type_specs(&self) -> Vec<Vec<u8>> {
        ordered(&self.type_specs)
    }

    /// `MemberRef` rows in token order.
    pub fn member_refs(&self) -> Vec<MemberRefRow> {
        ordered(&self.member_refs)
    }

    /// `MethodSpec` rows in token order.
    pub fn method_specs(&self) -> Vec<MethodSpecRow> {
        ordered(&self.method_specs)
    }

    /// `StandAloneSig` blobs in token order.
    pub fn standalone_sigs(&self) -> Vec<Vec<u8>> {
        ordered(&self.signatures)
    }

    /// `ModuleRef` names in token order.
    pub fn module_refs(&self) -> Vec<String> {
        ordered(&self.module_refs)
    }

    /// `AssemblyRef` identities in token order.
    pub fn assembly_refs(&self) -> Vec<AssemblyName> {
        ordered(&self.assembly_refs)
    }

    /// Bytes of the `#US` heap built so far.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the heap lock is poisoned.
    pub fn user_string_heap(&self) -> Result<Vec<u8>> {
        let heap = lock!(self.user_strings)?;
        Ok(heap.bytes().to_vec())
    }
}

fn ordered<T: Clone>(rows: &boxcar::Vec<T>) -> Vec<T> {
    let mut entries: Vec<(usize, T)> = rows
        .iter()
        .map(|(index, row)| (index, row.clone()))
        .collect();
    entries.sort_by_key(|(index, _)| *index);
    entries.into_iter().map(|(_, row)| row).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let table = TokenTable::new();
        let corlib = table.assembly_ref(&AssemblyName::mscorlib());
        assert_eq!(corlib, Token::new(0x2300_0001));
        assert_eq!(table.assembly_ref(&AssemblyName::mscorlib()), corlib);

        let object = table.type_ref(corlib, "System", "Object");
        let string = table.type_ref(corlib, "System", "String");
        assert_eq!(object, Token::new(0x0100_0001));
        assert_eq!(string, Token::new(0x0100_0002));
        assert_eq!(table.type_ref(corlib, "System", "Object"), object);

        let first = table.member_ref(object, ".ctor", vec![0x20, 0x00, 0x01]);
        let second = table.member_ref(object, ".ctor", vec![0x20, 0x01, 0x01, 0x08]);
        assert_ne!(first, second);
        assert_eq!(table.member_ref(object, ".ctor", vec![0x20, 0x00, 0x01]), first);

        assert_eq!(table.type_refs().len(), 2);
        assert_eq!(table.member_refs()[1].signature, vec![0x20, 0x01, 0x01, 0x08]);
    }

    #[test]
    fn resolve() {
        let table = TokenTable::new();
        let module = table.module_ref("other.dll");
        let sig = table.standalone_sig(vec![0x07, 0x01, 0x08]);
        let text = table.user_string("hello").unwrap();

        assert_eq!(table.resolve(module), Some(ResolvedRef::ModuleRef("other.dll".into())));
        assert_eq!(
            table.resolve(sig),
            Some(ResolvedRef::StandAloneSig(vec![0x07, 0x01, 0x08]))
        );
        assert_eq!(table.resolve(text), Some(ResolvedRef::UserString("hello".into())));
        assert_eq!(table.user_string("hello").unwrap(), text);
        assert_eq!(table.resolve(Token::new(0x1A00_0009)), None);
        assert_eq!(table.resolve(Token::new(0x0600_0001)), None);
    }

    #[test]
    fn concurrent_allocation_is_at_most_once() {
        let table = Arc::new(TokenTable::new());
        let scope = table.assembly_ref(&AssemblyName::mscorlib());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                std::thread::spawn(move || {
                    (0..64)
                        .map(|n| table.type_ref(scope, "Ns", &format!("T{}", n % 16)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<Vec<Token>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for result in &results[1..] {
            assert_eq!(result, &results[0]);
        }
        assert_eq!(table.type_refs().len(), 16);
    }
}
