//! Resolvers
//!
//! After the input is bound, the pipeline walks it with [`Resolvable`] and
//! calls every [`Resolver`] it finds, children before parents. A resolver
//! sees the request context and its own location and may report any number
//! of errors. They are aggregated with parse and validation failures.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Display;
use std::net::{Ipv4Addr, Ipv6Addr};

use apiforge_schema::{Base64Bytes, Describe, ErrorDetail, PathBuffer, TypeDescriptor, TypeKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;
use crate::multipart::{FormFile, MultipartForm};

/// Custom request-time checks on an input or one of its parts.
///
/// ```rust,ignore
/// #[derive(Deserialize, Model)]
/// #[model(resolver)]
/// struct GreetingInput {
///     #[field(path)]
///     name: String,
/// }
///
/// impl Resolver for GreetingInput {
///     fn resolve(&mut self, _ctx: &dyn Context, path: &PathBuffer) -> Vec<ErrorDetail> {
///         if self.name.contains("err") {
///             let mut path = path.clone();
///             path.push("path");
///             path.push("name");
///             return vec![ErrorDetail::new("bad name").with_location(path.as_str())];
///         }
///         vec![]
///     }
/// }
/// ```
pub trait Resolver {
    /// Check `self`, positioned at `path`. Errors may carry a status
    /// override; the last one wins.
    fn resolve(&mut self, ctx: &dyn Context, path: &PathBuffer) -> Vec<ErrorDetail>;
}

/// Depth-first walker over a bound input. `#[derive(Model)]` implements it
/// for models; leaf types do nothing.
pub trait Resolvable {
    fn resolve_all(&mut self, ctx: &dyn Context, path: &mut PathBuffer, errs: &mut Vec<ErrorDetail>) {
        let _ = (ctx, path, errs);
    }
}

macro_rules! leaf {
    ($($ty:ty),* $(,)?) => {
        $(impl Resolvable for $ty {})*
    };
}

leaf! {
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    String, Value, Base64Bytes, Ipv4Addr, Ipv6Addr, uuid::Uuid, url::Url, chrono::NaiveDate,
    MultipartForm, FormFile,
}

impl<Tz: chrono::TimeZone> Resolvable for chrono::DateTime<Tz> {}

impl<T: Resolvable> Resolvable for Option<T> {
    fn resolve_all(&mut self, ctx: &dyn Context, path: &mut PathBuffer, errs: &mut Vec<ErrorDetail>) {
        if let Some(inner) = self {
            inner.resolve_all(ctx, path, errs);
        }
    }
}

impl<T: Resolvable + ?Sized> Resolvable for Box<T> {
    fn resolve_all(&mut self, ctx: &dyn Context, path: &mut PathBuffer, errs: &mut Vec<ErrorDetail>) {
        (**self).resolve_all(ctx, path, errs);
    }
}

impl<T: Resolvable> Resolvable for Vec<T> {
    fn resolve_all(&mut self, ctx: &dyn Context, path: &mut PathBuffer, errs: &mut Vec<ErrorDetail>) {
        for (i, item) in self.iter_mut().enumerate() {
            path.push_index(i);
            item.resolve_all(ctx, path, errs);
            path.pop();
        }
    }
}

impl<T: Resolvable, const N: usize> Resolvable for [T; N] {
    fn resolve_all(&mut self, ctx: &dyn Context, path: &mut PathBuffer, errs: &mut Vec<ErrorDetail>) {
        for (i, item) in self.iter_mut().enumerate() {
            path.push_index(i);
            item.resolve_all(ctx, path, errs);
            path.pop();
        }
    }
}

// Set members cannot be mutated in place.
impl<T, S> Resolvable for HashSet<T, S> {}
impl<T> Resolvable for BTreeSet<T> {}

impl<K: Display, V: Resolvable, S> Resolvable for HashMap<K, V, S> {
    fn resolve_all(&mut self, ctx: &dyn Context, path: &mut PathBuffer, errs: &mut Vec<ErrorDetail>) {
        for (key, value) in self.iter_mut() {
            path.push(&key.to_string());
            value.resolve_all(ctx, path, errs);
            path.pop();
        }
    }
}

impl<K: Display, V: Resolvable> Resolvable for BTreeMap<K, V> {
    fn resolve_all(&mut self, ctx: &dyn Context, path: &mut PathBuffer, errs: &mut Vec<ErrorDetail>) {
        for (key, value) in self.iter_mut() {
            path.push(&key.to_string());
            value.resolve_all(ctx, path, errs);
            path.pop();
        }
    }
}

/// Input or output with nothing in it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

impl Describe for Empty {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::new::<Self>(TypeKind::Object(Vec::new())).named("Empty")
    }
}

impl Resolvable for Empty {}
