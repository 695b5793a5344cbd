//! Route groups
//!
//! A group registers operations under a path prefix and applies shared
//! modifiers to each one:
//!
//! ```rust,ignore
//! let mut v1 = api.group("/v1");
//! v1.middleware(RequireKey);
//! v1.get("/items", list_items)?; // GET /v1/items, id "v1-list-items", tag "v1"
//! ```

use std::sync::Arc;

use heck::ToKebabCase;

use crate::api::{Api, Registrar};
use crate::middleware::Middleware;
use crate::operation::Operation;
use crate::path::join;

type Modifier = Arc<dyn Fn(&mut Operation) + Send + Sync>;

/// Operations registered under a shared prefix.
pub struct Group<'a> {
    api: &'a mut Api,
    prefix: String,
    middlewares: Vec<Arc<dyn Middleware>>,
    modifiers: Vec<Modifier>,
}

impl Api {
    /// Start a group of operations under `prefix`.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group {
            api: self,
            prefix: join(prefix, ""),
            middlewares: Vec::new(),
            modifiers: Vec::new(),
        }
    }
}

impl<'a> Group<'a> {
    /// A nested group. Middlewares and modifiers are inherited.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group {
            api: &mut *self.api,
            prefix: join(&self.prefix, &join(prefix, "")),
            middlewares: self.middlewares.clone(),
            modifiers: self.modifiers.clone(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Change every operation registered through this group.
    pub fn modify<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Operation) + Send + Sync + 'static,
    {
        self.modifiers.push(Arc::new(f));
        self
    }

    /// Middleware for the group's operations, run before their own.
    pub fn middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    fn apply(&self, mut op: Operation) -> Operation {
        let name = self.prefix.trim_matches('/').to_string();
        op.path = join(&self.prefix, &op.path);
        let mut chain = self.middlewares.clone();
        chain.append(&mut op.middlewares);
        op.middlewares = chain;
        if !name.is_empty() {
            if !op.operation_id.is_empty() {
                op.operation_id = format!("{}-{}", name.to_kebab_case(), op.operation_id);
            }
            if !op.tags.contains(&name) {
                op.tags.push(name);
            }
        }
        for modify in &self.modifiers {
            modify(&mut op);
        }
        op
    }
}

impl Registrar for Group<'_> {
    fn target(&mut self, op: Operation) -> (&mut Api, Operation) {
        let op = self.apply(op);
        (&mut *self.api, op)
    }
}
