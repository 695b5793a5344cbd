//! Static type descriptors.
//!
//! A [`TypeDescriptor`] describes the shape of a Rust type well enough to
//! derive a JSON Schema for it. Descriptors are produced by [`Describe`],
//! which is implemented here for std and ecosystem types and derived for user
//! models by `#[derive(Model)]`. Field types are referenced through plain
//! function pointers so recursive models terminate.

use std::any::{type_name, TypeId};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::registry::Registry;
use crate::schema::Schema;
use crate::validate::ErrorDetail;

/// Lazily produces a descriptor.
pub type DescribeFn = fn() -> TypeDescriptor;

/// Post-generation schema hook.
pub type SchemaTransform = fn(&Registry, Schema) -> Schema;

/// Types that can describe their own schema shape.
pub trait Describe: 'static {
    fn describe() -> TypeDescriptor;
}

/// Metadata tags as `(key, value)` pairs, e.g. `("maxLength", "5")`.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Tags(pub &'static [(&'static str, &'static str)]);

impl Tags {
    pub const EMPTY: Tags = Tags(&[]);

    /// Last value for `key`.
    pub fn get(&self, key: &str) -> Option<&'static str> {
        self.0.iter().rev().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| *k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter().map(|(k, v)| (k, v))).finish()
    }
}

/// Schema combinator for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionKind {
    OneOf,
    AnyOf,
    AllOf,
    Not,
}

/// A field whose schema is a combinator over other types.
#[derive(Debug, Clone)]
pub struct Composition {
    pub kind: CompositionKind,
    pub members: Vec<DescribeFn>,
    /// Discriminator property, `oneOf` only.
    pub discriminator: Option<&'static str>,
}

/// One field of an object descriptor.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Rust identifier.
    pub ident: &'static str,
    /// Wire name.
    pub name: &'static str,
    pub tags: Tags,
    pub ty: DescribeFn,
    pub composition: Option<Composition>,
}

impl FieldDescriptor {
    pub fn new(ident: &'static str, name: &'static str, ty: DescribeFn) -> Self {
        Self {
            ident,
            name,
            tags: Tags::EMPTY,
            ty,
            composition: None,
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_composition(mut self, composition: Composition) -> Self {
        self.composition = Some(composition);
        self
    }

    /// Wire name, honouring a `json` tag.
    pub fn wire_name(&self) -> &'static str {
        match self.tags.get("json").map(|j| j.split(',').next().unwrap_or("")) {
            Some(n) if !n.is_empty() => n,
            _ => self.name,
        }
    }

    /// `json:",omitempty"` style opt-out of `required`.
    pub fn is_omitempty(&self) -> bool {
        self.tags.has("omitempty")
            || self
                .tags
                .get("json")
                .map_or(false, |j| j.split(',').skip(1).any(|f| f == "omitempty"))
    }
}

/// The shape of a described type.
#[derive(Clone)]
pub enum TypeKind {
    Boolean,
    Integer {
        format: &'static str,
        unsigned: bool,
        bits: u8,
    },
    Number { format: &'static str },
    String,
    /// Base64 encoded binary.
    Bytes,
    DateTime,
    Date,
    Uri,
    Ipv4,
    Ipv6,
    Uuid,
    /// Any JSON value.
    Any,
    Optional(DescribeFn),
    Array {
        items: DescribeFn,
        unique: bool,
        len: Option<usize>,
    },
    Map {
        key: DescribeFn,
        value: DescribeFn,
    },
    Object(Vec<FieldDescriptor>),
    StringEnum(Vec<&'static str>),
    /// Internally tagged enum of newtype variants.
    TaggedUnion {
        tag: &'static str,
        variants: Vec<(&'static str, DescribeFn)>,
    },
    /// Fully custom schema.
    Custom(fn(&mut Registry) -> Schema),
}

impl fmt::Debug for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "Boolean",
            Self::Integer { .. } => "Integer",
            Self::Number { .. } => "Number",
            Self::String => "String",
            Self::Bytes => "Bytes",
            Self::DateTime => "DateTime",
            Self::Date => "Date",
            Self::Uri => "Uri",
            Self::Ipv4 => "Ipv4",
            Self::Ipv6 => "Ipv6",
            Self::Uuid => "Uuid",
            Self::Any => "Any",
            Self::Optional(_) => "Optional",
            Self::Array { .. } => "Array",
            Self::Map { .. } => "Map",
            Self::Object(_) => "Object",
            Self::StringEnum(_) => "StringEnum",
            Self::TaggedUnion { .. } => "TaggedUnion",
            Self::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

fn integer_range(unsigned: bool, bits: u8) -> (i128, i128) {
    if unsigned {
        (0, (1i128 << bits) - 1)
    } else {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    }
}

/// Static description of a Rust type.
#[derive(Clone)]
pub struct TypeDescriptor {
    pub id: TypeId,
    /// Declared type name, possibly module-qualified.
    pub name: Cow<'static, str>,
    pub kind: TypeKind,
    pub transform: Option<SchemaTransform>,
    /// Model-level tags such as `additionalProperties`.
    pub tags: Tags,
}

impl TypeDescriptor {
    /// Describe `T` with its `type_name`.
    pub fn new<T: ?Sized + 'static>(kind: TypeKind) -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: Cow::Borrowed(type_name::<T>()),
            kind,
            transform: None,
            tags: Tags::EMPTY,
        }
    }

    /// Override the schema name.
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_transform(mut self, transform: SchemaTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Whether the registry stores this type by name and hands out `$ref`s.
    pub fn gets_ref(&self) -> bool {
        matches!(self.kind, TypeKind::Object(_) | TypeKind::TaggedUnion { .. })
    }

    /// Inclusive range of an integer type, or of the items of an integer
    /// array, looking through `Option`.
    pub fn integer_bounds(&self) -> Option<(i128, i128)> {
        match self.inner().kind {
            TypeKind::Integer { unsigned, bits, .. } => Some(integer_range(unsigned, bits)),
            TypeKind::Array { items, .. } => match items().inner().kind {
                TypeKind::Integer { unsigned, bits, .. } => Some(integer_range(unsigned, bits)),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_optional(&self) -> bool {
        matches!(self.kind, TypeKind::Optional(_))
    }

    /// Descriptor after peeling `Option` layers.
    pub fn inner(&self) -> TypeDescriptor {
        match &self.kind {
            TypeKind::Optional(inner) => inner().inner(),
            _ => self.clone(),
        }
    }

    /// Fields of an object descriptor.
    pub fn fields(&self) -> &[FieldDescriptor] {
        match &self.kind {
            TypeKind::Object(fields) => fields,
            _ => &[],
        }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("tags", &self.tags)
            .finish()
    }
}

macro_rules! describe_scalar {
    ($($ty:ty => $kind:expr),* $(,)?) => {
        $(
            impl Describe for $ty {
                fn describe() -> TypeDescriptor {
                    TypeDescriptor::new::<$ty>($kind)
                }
            }
        )*
    };
}

describe_scalar! {
    bool => TypeKind::Boolean,
    i8 => TypeKind::Integer { format: "int32", unsigned: false, bits: 8 },
    i16 => TypeKind::Integer { format: "int32", unsigned: false, bits: 16 },
    i32 => TypeKind::Integer { format: "int32", unsigned: false, bits: 32 },
    i64 => TypeKind::Integer { format: "int64", unsigned: false, bits: 64 },
    isize => TypeKind::Integer { format: "int64", unsigned: false, bits: 64 },
    u8 => TypeKind::Integer { format: "int32", unsigned: true, bits: 8 },
    u16 => TypeKind::Integer { format: "int32", unsigned: true, bits: 16 },
    u32 => TypeKind::Integer { format: "int32", unsigned: true, bits: 32 },
    u64 => TypeKind::Integer { format: "int64", unsigned: true, bits: 64 },
    usize => TypeKind::Integer { format: "int64", unsigned: true, bits: 64 },
    f32 => TypeKind::Number { format: "float" },
    f64 => TypeKind::Number { format: "double" },
    String => TypeKind::String,
    char => TypeKind::String,
    serde_json::Value => TypeKind::Any,
    url::Url => TypeKind::Uri,
    Ipv4Addr => TypeKind::Ipv4,
    Ipv6Addr => TypeKind::Ipv6,
    uuid::Uuid => TypeKind::Uuid,
    chrono::NaiveDate => TypeKind::Date,
}

impl<Tz: chrono::TimeZone + 'static> Describe for chrono::DateTime<Tz> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::new::<Self>(TypeKind::DateTime)
    }
}

impl<T: Describe> Describe for Option<T> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::new::<Self>(TypeKind::Optional(T::describe))
    }
}

impl<T: Describe> Describe for Box<T> {
    fn describe() -> TypeDescriptor {
        T::describe()
    }
}

impl<T: Describe> Describe for Arc<T> {
    fn describe() -> TypeDescriptor {
        T::describe()
    }
}

impl<T: Describe> Describe for Vec<T> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::new::<Self>(TypeKind::Array {
            items: T::describe,
            unique: false,
            len: None,
        })
    }
}

impl<T: Describe, const N: usize> Describe for [T; N] {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::new::<Self>(TypeKind::Array {
            items: T::describe,
            unique: false,
            len: Some(N),
        })
    }
}

impl<T: Describe, S: 'static> Describe for HashSet<T, S> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::new::<Self>(TypeKind::Array {
            items: T::describe,
            unique: true,
            len: None,
        })
    }
}

impl<T: Describe> Describe for BTreeSet<T> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::new::<Self>(TypeKind::Array {
            items: T::describe,
            unique: true,
            len: None,
        })
    }
}

impl<K: Describe, V: Describe, S: 'static> Describe for HashMap<K, V, S> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::new::<Self>(TypeKind::Map {
            key: K::describe,
            value: V::describe,
        })
    }
}

impl<K: Describe, V: Describe> Describe for BTreeMap<K, V> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::new::<Self>(TypeKind::Map {
            key: K::describe,
            value: V::describe,
        })
    }
}

/// Binary data carried as a base64 string on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Base64Bytes(pub Vec<u8>);

impl Base64Bytes {
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Base64Bytes {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl AsRef<[u8]> for Base64Bytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Base64Bytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Base64Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(s.as_bytes()))
            .map(Base64Bytes)
            .map_err(serde::de::Error::custom)
    }
}

impl Describe for Base64Bytes {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::new::<Self>(TypeKind::Bytes)
    }
}

impl Describe for ErrorDetail {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::new::<Self>(TypeKind::Object(vec![
            FieldDescriptor::new("message", "message", String::describe).with_tags(Tags(&[
                ("doc", "Error message text"),
                ("omitempty", "true"),
            ])),
            FieldDescriptor::new("location", "location", String::describe).with_tags(Tags(&[
                (
                    "doc",
                    "Where the error occurred, e.g. 'body.items[3].tags' or 'path.thing-id'",
                ),
                ("omitempty", "true"),
            ])),
            FieldDescriptor::new("value", "value", serde_json::Value::describe).with_tags(Tags(&[
                ("doc", "The value at the given location"),
                ("omitempty", "true"),
            ])),
        ]))
        .named("ErrorDetail")
    }
}
