//! Named schema registry.
//!
//! Object and union types are stored once under a stable name and referenced
//! everywhere else through `$ref`. The registry is populated while operations
//! are registered and then frozen for serving.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};

use serde::{Serialize, Serializer};

use crate::builder::{self, Mode};
use crate::descriptor::{Describe, DescribeFn, TypeDescriptor};
use crate::error::SchemaBuildError;
use crate::schema::Schema;

/// Prefix for component schema references.
pub const SCHEMA_REF_PREFIX: &str = "#/components/schemas/";

/// Derives a schema name from a descriptor and a context hint.
pub type Namer = fn(&TypeDescriptor, &str) -> String;

/// Default namer.
///
/// Module paths are stripped and generic arguments become suffixes, so
/// `app::Page<app::Item>` is `PageItem` and `Vec<u32>` is `ListU32`. Every
/// part is capitalised. Anonymous descriptors use the hint.
pub fn default_namer(desc: &TypeDescriptor, hint: &str) -> String {
    let source: &str = if desc.name.is_empty() { hint } else { &desc.name };

    let mut out = String::new();
    for part in source.split(|c: char| {
        matches!(c, '<' | '>' | ',' | '&' | '[' | ']' | ';' | '*' | '(' | ')' | ' ')
    }) {
        let base = part.rsplit("::").next().unwrap_or(part);
        let base = match base {
            "" | "dyn" | "mut" | "const" => continue,
            "Vec" => "List",
            other => other,
        };
        let mut chars = base.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }

    if out.is_empty() {
        hint.to_string()
    } else {
        out
    }
}

#[derive(Debug, Clone)]
struct Entry {
    id: TypeId,
    type_name: String,
}

/// A mapping from schema name to schema.
#[derive(Clone)]
pub struct Registry {
    prefix: String,
    schemas: BTreeMap<String, Schema>,
    types: BTreeMap<String, Entry>,
    aliases: HashMap<TypeId, DescribeFn>,
    namer: Namer,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("prefix", &self.prefix)
            .field("schemas", &self.schemas.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// Registry using `#/components/schemas/` refs and the default namer.
    pub fn new() -> Self {
        Self::with_namer(SCHEMA_REF_PREFIX, default_namer)
    }

    pub fn with_namer(prefix: impl Into<String>, namer: Namer) -> Self {
        Self {
            prefix: prefix.into(),
            schemas: BTreeMap::new(),
            types: BTreeMap::new(),
            aliases: HashMap::new(),
            namer,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn set_namer(&mut self, namer: Namer) {
        self.namer = namer;
    }

    /// Name the registry would give `desc`.
    pub fn name_for(&self, desc: &TypeDescriptor, hint: &str) -> String {
        (self.namer)(desc, hint)
    }

    /// Schema for `desc` in [`Mode::All`].
    ///
    /// With `allow_ref`, named types come back as `{"$ref": ...}`; otherwise the
    /// registered schema itself is returned.
    pub fn schema(
        &mut self,
        desc: &TypeDescriptor,
        allow_ref: bool,
        hint: &str,
    ) -> Result<Schema, SchemaBuildError> {
        self.schema_with_mode(desc, Mode::All, allow_ref, hint)
    }

    /// Reference schema for `T`.
    pub fn schema_for<T: Describe>(&mut self) -> Result<Schema, SchemaBuildError> {
        self.schema(&T::describe(), true, "")
    }

    /// Schema for `desc` in the given generation mode. Read and write views of
    /// named types are registered as `<Name>Read` and `<Name>Write`.
    pub fn schema_with_mode(
        &mut self,
        desc: &TypeDescriptor,
        mode: Mode,
        allow_ref: bool,
        hint: &str,
    ) -> Result<Schema, SchemaBuildError> {
        if let Some(alias) = self.aliases.get(&desc.id).copied() {
            return self.schema_with_mode(&alias(), mode, allow_ref, hint);
        }

        if !desc.gets_ref() {
            return builder::schema_from_type(self, desc, mode, hint);
        }

        let base = (self.namer)(desc, hint);
        let name = format!("{}{}", base, mode.suffix());

        if let Some(existing) = self.types.get(&name) {
            if existing.id != desc.id {
                return Err(SchemaBuildError::DuplicateName {
                    name,
                    new_type: desc.name.to_string(),
                    existing_type: existing.type_name.clone(),
                });
            }
            return Ok(self.output(&name, allow_ref));
        }

        // Placeholder first so self-references resolve to a `$ref`.
        self.schemas.insert(name.clone(), Schema::default());
        self.types.insert(
            name.clone(),
            Entry {
                id: desc.id,
                type_name: desc.name.to_string(),
            },
        );

        match builder::schema_from_type(self, desc, mode, &base) {
            Ok(schema) => {
                self.schemas.insert(name.clone(), schema);
                Ok(self.output(&name, allow_ref))
            }
            Err(err) => {
                self.schemas.remove(&name);
                self.types.remove(&name);
                Err(err)
            }
        }
    }

    fn output(&self, name: &str, allow_ref: bool) -> Schema {
        if allow_ref {
            Schema::reference(format!("{}{}", self.prefix, name))
        } else {
            self.schemas.get(name).cloned().unwrap_or_default()
        }
    }

    /// Resolve a `$ref` produced by this registry.
    pub fn schema_from_ref(&self, reference: &str) -> Option<&Schema> {
        reference
            .strip_prefix(self.prefix.as_str())
            .and_then(|name| self.schemas.get(name))
    }

    /// Mutable access by `$ref`.
    pub fn schema_from_ref_mut(&mut self, reference: &str) -> Option<&mut Schema> {
        let name = reference.strip_prefix(self.prefix.as_str())?.to_string();
        self.schemas.get_mut(&name)
    }

    /// Type registered under a `$ref`.
    pub fn type_from_ref(&self, reference: &str) -> Option<TypeId> {
        reference
            .strip_prefix(self.prefix.as_str())
            .and_then(|name| self.types.get(name))
            .map(|e| e.id)
    }

    /// Follow `$ref` chains to a concrete schema.
    pub fn resolve<'a>(&'a self, mut schema: &'a Schema) -> Option<&'a Schema> {
        while let Some(r) = &schema.reference {
            schema = self.schema_from_ref(r)?;
        }
        Some(schema)
    }

    /// All registered schemas by name.
    pub fn map(&self) -> &BTreeMap<String, Schema> {
        &self.schemas
    }

    pub fn get(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Schema> {
        self.schemas.get_mut(name)
    }

    /// Store a hand-written schema under `name`.
    pub fn insert(&mut self, name: impl Into<String>, schema: Schema) {
        self.schemas.insert(name.into(), schema);
    }

    /// Generate schemas for `A` whenever `T` is requested.
    pub fn register_type_alias<T: ?Sized + 'static, A: Describe>(&mut self) {
        self.aliases.insert(TypeId::of::<T>(), A::describe);
    }

    /// Precompute validation data for every registered schema.
    pub fn precompute_messages(&self) {
        for schema in self.schemas.values() {
            schema.precompute_messages();
        }
    }
}

impl Serialize for Registry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.schemas.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FieldDescriptor, Tags, TypeKind};

    struct Thing;
    impl Describe for Thing {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::new::<Thing>(TypeKind::Object(vec![FieldDescriptor::new(
                "name",
                "name",
                String::describe,
            )]))
        }
    }

    mod other {
        use super::*;

        pub struct Thing;
        impl Describe for Thing {
            fn describe() -> TypeDescriptor {
                TypeDescriptor::new::<Thing>(TypeKind::Object(vec![]))
            }
        }
    }

    struct Node;
    impl Describe for Node {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::new::<Node>(TypeKind::Object(vec![FieldDescriptor::new(
                "children",
                "children",
                <Vec<Node>>::describe,
            )]))
        }
    }

    struct Page<T>(std::marker::PhantomData<T>);
    impl<T: Describe> Describe for Page<T> {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::new::<Page<T>>(TypeKind::Object(vec![FieldDescriptor::new(
                "items",
                "items",
                <Vec<T>>::describe,
            )]))
        }
    }

    struct Broken;
    impl Describe for Broken {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::new::<Broken>(TypeKind::Object(vec![FieldDescriptor::new(
                "a",
                "a",
                String::describe,
            )
            .with_tags(Tags(&[("dependentRequired", "nope")]))]))
        }
    }

    #[test]
    fn namer_strips_paths_and_flattens_generics() {
        assert_eq!(default_namer(&Thing::describe(), ""), "Thing");
        assert_eq!(default_namer(&<Page<Thing>>::describe(), ""), "PageThing");
        assert_eq!(default_namer(&<Vec<u32>>::describe(), ""), "ListU32");

        let anon = TypeDescriptor::new::<Thing>(TypeKind::Object(vec![])).named("");
        assert_eq!(default_namer(&anon, "ParentField"), "ParentField");
    }

    #[test]
    fn repeated_requests_return_the_same_ref() {
        let mut r = Registry::new();
        let a = r.schema_for::<Thing>().unwrap();
        let b = r.schema_for::<Thing>().unwrap();
        assert_eq!(a.reference.as_deref(), Some("#/components/schemas/Thing"));
        assert_eq!(a.reference, b.reference);
        assert_eq!(r.map().len(), 1);
        assert_eq!(
            r.type_from_ref("#/components/schemas/Thing"),
            Some(TypeId::of::<Thing>())
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut r = Registry::new();
        r.schema_for::<Thing>().unwrap();
        let err = r.schema_for::<other::Thing>().unwrap_err();
        assert!(matches!(err, SchemaBuildError::DuplicateName { ref name, .. } if name == "Thing"));
    }

    #[test]
    fn recursive_types_terminate() {
        let mut r = Registry::new();
        r.schema_for::<Node>().unwrap();
        let node = r.get("Node").unwrap();
        let items = node.properties["children"].items.as_ref().unwrap();
        assert_eq!(items.reference.as_deref(), Some("#/components/schemas/Node"));
    }

    #[test]
    fn failed_builds_leave_no_placeholder() {
        let mut r = Registry::new();
        assert!(r.schema_for::<Broken>().is_err());
        assert!(r.get("Broken").is_none());
    }

    #[test]
    fn mode_views_get_suffixes() {
        let mut r = Registry::new();
        let s = r
            .schema_with_mode(&Thing::describe(), Mode::Read, true, "")
            .unwrap();
        assert_eq!(s.reference.as_deref(), Some("#/components/schemas/ThingRead"));
        assert!(r.get("ThingRead").is_some());
    }

    #[test]
    fn aliases_redirect_generation() {
        let mut r = Registry::new();
        r.register_type_alias::<other::Thing, String>();
        let s = r.schema_for::<other::Thing>().unwrap();
        assert!(s.reference.is_none());
        assert!(s.is_type(crate::InstanceType::String));
    }

    #[test]
    fn serializes_as_name_map() {
        let mut r = Registry::new();
        r.schema_for::<Thing>().unwrap();
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["Thing"]["properties"]["name"]["type"], "string");
    }
}
