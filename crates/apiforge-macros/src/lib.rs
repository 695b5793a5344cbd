//! Procedural macros for apiforge
//!
//! - `#[derive(Model)]` - schema descriptor and resolver walker for a type
//! - `#[apiforge::main]` - async main entry point
//!
//! `Model` reads serde's `rename`, `rename_all`, `tag`, `skip`, `default`,
//! `skip_serializing_if` and `flatten` so the schema matches the wire shape,
//! plus two attributes of its own:
//!
//! ```rust,ignore
//! #[derive(Deserialize, Model)]
//! #[model(resolver, additional_properties = true)]
//! struct CreateNote {
//!     #[field(path)]
//!     owner: String,
//!     #[field(query = "dry-run", default = false)]
//!     dry_run: bool,
//!     /// The note itself
//!     body: NoteBody,
//! }
//! ```
//!
//! `#[field(key = value)]` becomes a metadata tag with the key in camelCase
//! (`max_length = 5` is `maxLength`), and a bare `#[field(key)]` is `"true"`.
//! `one_of(..)`, `any_of(..)`, `all_of(..)` and `not(..)` build composed
//! schemas; `discriminator = "kind"` goes with `one_of`.
//!
//! `#[model(...)]` takes `resolver` (call the type's `Resolver` impl after its
//! children), `transform = path::to::fn`, `name = "Schema"`, and any other
//! key as a model-level tag.

use heck::{
    ToKebabCase, ToLowerCamelCase, ToShoutyKebabCase, ToShoutySnakeCase, ToSnakeCase,
    ToUpperCamelCase,
};
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::meta::ParseNestedMeta;
use syn::punctuated::Punctuated;
use syn::{
    parse_macro_input, parse_quote, Attribute, Data, DataEnum, DeriveInput, Expr, ExprLit, Fields,
    FieldsNamed, Generics, ItemFn, Lit, Meta, Path, Token, Type,
};

/// Main entry point macro for apiforge applications
///
/// Wraps an async main function with the tokio runtime.
///
/// ```rust,ignore
/// #[apiforge::main]
/// async fn main() -> Result<(), ServeError> {
///     let mut api = Api::new(Config::new("Notes", "1.0.0"));
///     api.get("/notes/{id}", get_note)?;
///     api.serve("127.0.0.1:8080").await
/// }
/// ```
#[proc_macro_attribute]
pub fn main(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;

    let expanded = quote! {
        #(#attrs)*
        #[::tokio::main]
        #vis #sig {
            #block
        }
    };

    TokenStream::from(expanded)
}

/// Derive `Describe` and `Resolvable` for a struct or enum.
#[proc_macro_derive(Model, attributes(field, model))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_model(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

const PARAM_LOCATIONS: [&str; 4] = ["path", "query", "header", "cookie"];

#[derive(Default)]
struct ModelAttrs {
    rename_all: Option<String>,
    tag: Option<String>,
    resolver: bool,
    transform: Option<Path>,
    name: Option<String>,
    tags: Vec<(String, String)>,
    doc: Option<String>,
}

#[derive(Default)]
struct FieldAttrs {
    rename: Option<String>,
    skip: bool,
    flatten: bool,
    serde_default: bool,
    omitempty: bool,
    tags: Vec<(String, String)>,
    composition: Option<(&'static str, Vec<Type>)>,
    discriminator: Option<String>,
    doc: Option<String>,
}

impl FieldAttrs {
    fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn private() -> TokenStream2 {
    quote!(::apiforge::__private)
}

fn expand_model(input: DeriveInput) -> syn::Result<TokenStream2> {
    let model = parse_model_attrs(&input.attrs)?;
    match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => expand_struct(&input, &model, fields),
            Fields::Unnamed(fields) if fields.unnamed.len() == 1 => {
                let inner = &fields.unnamed[0].ty;
                expand_newtype(&input, &model, inner)
            }
            Fields::Unnamed(_) => Err(syn::Error::new_spanned(
                &input.ident,
                "Model supports named-field structs and newtypes",
            )),
            Fields::Unit => {
                let empty = FieldsNamed {
                    brace_token: Default::default(),
                    named: Punctuated::new(),
                };
                expand_struct(&input, &model, &empty)
            }
        },
        Data::Enum(data) => expand_enum(&input, &model, data),
        Data::Union(_) => Err(syn::Error::new_spanned(
            &input.ident,
            "Model cannot be derived for unions",
        )),
    }
}

fn expand_struct(input: &DeriveInput, model: &ModelAttrs, fields: &FieldsNamed) -> syn::Result<TokenStream2> {
    let p = private();
    let mut describe = Vec::new();
    let mut resolve = Vec::new();

    for field in &fields.named {
        let attrs = parse_field_attrs(&field.attrs)?;
        if attrs.skip {
            continue;
        }
        let Some(ident) = &field.ident else { continue };
        let ty = &field.ty;
        let ident_str = ident.to_string().trim_start_matches("r#").to_string();

        if attrs.flatten {
            describe.push(quote! {
                fields.extend(<#ty as #p::Describe>::describe().fields().iter().cloned());
            });
            resolve.push(quote! {
                #p::Resolvable::resolve_all(&mut self.#ident, ctx, path, errs);
            });
            continue;
        }

        let wire = match (&attrs.rename, &model.rename_all) {
            (Some(name), _) => name.clone(),
            (None, Some(rule)) => rename(rule, &ident_str),
            (None, None) => ident_str.clone(),
        };

        let mut tags = Vec::new();
        if let Some(doc) = &attrs.doc {
            tags.push(("doc".to_string(), doc.clone()));
        }
        if attrs.serde_default {
            tags.push(("required".to_string(), "false".to_string()));
        }
        if attrs.omitempty {
            tags.push(("omitempty".to_string(), "true".to_string()));
        }
        tags.extend(attrs.tags.iter().cloned());
        let tags_tokens = tags_tokens(&tags);

        let composition = attrs.composition.as_ref().map(|(kind, members)| {
            let kind = match *kind {
                "oneOf" => quote!(#p::CompositionKind::OneOf),
                "anyOf" => quote!(#p::CompositionKind::AnyOf),
                "allOf" => quote!(#p::CompositionKind::AllOf),
                _ => quote!(#p::CompositionKind::Not),
            };
            let members = members
                .iter()
                .map(|t| quote!(<#t as #p::Describe>::describe as #p::DescribeFn));
            let discriminator = match &attrs.discriminator {
                Some(d) => quote!(::std::option::Option::Some(#d)),
                None => quote!(::std::option::Option::None),
            };
            quote! {
                .with_composition(#p::Composition {
                    kind: #kind,
                    members: ::std::vec![#(#members),*],
                    discriminator: #discriminator,
                })
            }
        });

        describe.push(quote! {
            fields.push(
                #p::FieldDescriptor::new(#ident_str, #wire, <#ty as #p::Describe>::describe)
                    .with_tags(#tags_tokens)
                    #composition
            );
        });

        // Where resolver errors for this field are reported.
        let segments: Vec<String> = if let Some(loc) = PARAM_LOCATIONS.iter().find(|l| attrs.tag(l).is_some()) {
            let name = match attrs.tag(loc) {
                Some("true") | Some("") | None => wire.clone(),
                Some(other) => other.to_string(),
            };
            vec![loc.to_string(), name]
        } else if ident_str == "raw_body" || attrs.tag("rawBody").is_some() {
            continue;
        } else if ident_str == "body" || attrs.tag("body").is_some() {
            vec!["body".to_string()]
        } else {
            vec![wire.clone()]
        };
        let pops = segments.iter().map(|_| quote!(path.pop();));
        resolve.push(quote! {
            #(path.push(#segments);)*
            #p::Resolvable::resolve_all(&mut self.#ident, ctx, path, errs);
            #(#pops)*
        });
    }

    let name = &input.ident;
    let type_tags = model_tags(model);
    let named = model.name.as_ref().map(|n| quote!(.named(#n)));
    let transform = model.transform.as_ref().map(|t| quote!(.with_transform(#t)));
    let resolver = resolver_call(model);

    let describe_generics = bounded(&input.generics, quote!(#p::Describe));
    let (impl_generics, ty_generics, where_clause) = describe_generics.split_for_impl();
    let resolve_generics = bounded(&input.generics, quote!(#p::Resolvable));
    let (r_impl_generics, r_ty_generics, r_where_clause) = resolve_generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics #p::Describe for #name #ty_generics #where_clause {
            fn describe() -> #p::TypeDescriptor {
                #[allow(unused_mut)]
                let mut fields: ::std::vec::Vec<#p::FieldDescriptor> = ::std::vec::Vec::new();
                #(#describe)*
                #p::TypeDescriptor::new::<Self>(#p::TypeKind::Object(fields))
                    .with_tags(#type_tags)
                    #named
                    #transform
            }
        }

        impl #r_impl_generics #p::Resolvable for #name #r_ty_generics #r_where_clause {
            #[allow(unused_variables)]
            fn resolve_all(
                &mut self,
                ctx: &dyn #p::Context,
                path: &mut #p::PathBuffer,
                errs: &mut ::std::vec::Vec<#p::ErrorDetail>,
            ) {
                #(#resolve)*
                #resolver
            }
        }
    })
}

fn expand_newtype(input: &DeriveInput, model: &ModelAttrs, inner: &Type) -> syn::Result<TokenStream2> {
    let p = private();
    let name = &input.ident;
    let named = model.name.as_ref().map(|n| quote!(.named(#n)));
    let transform = model.transform.as_ref().map(|t| quote!(.with_transform(#t)));
    let resolver = resolver_call(model);

    let describe_generics = bounded(&input.generics, quote!(#p::Describe));
    let (impl_generics, ty_generics, where_clause) = describe_generics.split_for_impl();
    let resolve_generics = bounded(&input.generics, quote!(#p::Resolvable));
    let (r_impl_generics, r_ty_generics, r_where_clause) = resolve_generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics #p::Describe for #name #ty_generics #where_clause {
            fn describe() -> #p::TypeDescriptor {
                <#inner as #p::Describe>::describe() #named #transform
            }
        }

        impl #r_impl_generics #p::Resolvable for #name #r_ty_generics #r_where_clause {
            fn resolve_all(
                &mut self,
                ctx: &dyn #p::Context,
                path: &mut #p::PathBuffer,
                errs: &mut ::std::vec::Vec<#p::ErrorDetail>,
            ) {
                #p::Resolvable::resolve_all(&mut self.0, ctx, path, errs);
                #resolver
            }
        }
    })
}

fn expand_enum(input: &DeriveInput, model: &ModelAttrs, data: &DataEnum) -> syn::Result<TokenStream2> {
    let p = private();
    let name = &input.ident;
    let type_tags = model_tags(model);
    let named = model.name.as_ref().map(|n| quote!(.named(#n)));
    let transform = model.transform.as_ref().map(|t| quote!(.with_transform(#t)));
    let resolver = resolver_call(model);

    let mut values = Vec::new();
    let mut variants = Vec::new();
    let mut arms = Vec::new();
    let unit_only = data.variants.iter().all(|v| matches!(v.fields, Fields::Unit));

    for variant in &data.variants {
        let attrs = parse_field_attrs(&variant.attrs)?;
        let ident = &variant.ident;
        let wire = match (&attrs.rename, &model.rename_all) {
            (Some(name), _) => name.clone(),
            (None, Some(rule)) => rename(rule, &ident.to_string()),
            (None, None) => ident.to_string(),
        };

        if unit_only {
            if !attrs.skip {
                values.push(wire);
            }
            continue;
        }

        match &variant.fields {
            Fields::Unnamed(fields) if fields.unnamed.len() == 1 && model.tag.is_some() => {
                let ty = &fields.unnamed[0].ty;
                arms.push(quote! {
                    Self::#ident(inner) => #p::Resolvable::resolve_all(inner, ctx, path, errs),
                });
                if !attrs.skip {
                    variants.push(quote!((#wire, <#ty as #p::Describe>::describe as #p::DescribeFn)));
                }
            }
            _ => {
                return Err(syn::Error::new_spanned(
                    variant,
                    "Model enums must be unit-only, or internally tagged with #[serde(tag = \"...\")] and newtype variants",
                ))
            }
        }
    }

    let kind = if unit_only {
        quote!(#p::TypeKind::StringEnum(::std::vec![#(#values),*]))
    } else {
        let tag = model.tag.clone().unwrap_or_default();
        quote!(#p::TypeKind::TaggedUnion {
            tag: #tag,
            variants: ::std::vec![#(#variants),*],
        })
    };
    let walk = (!unit_only).then(|| quote! {
        match self {
            #(#arms)*
        }
    });

    let describe_generics = bounded(&input.generics, quote!(#p::Describe));
    let (impl_generics, ty_generics, where_clause) = describe_generics.split_for_impl();
    let resolve_generics = bounded(&input.generics, quote!(#p::Resolvable));
    let (r_impl_generics, r_ty_generics, r_where_clause) = resolve_generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics #p::Describe for #name #ty_generics #where_clause {
            fn describe() -> #p::TypeDescriptor {
                #p::TypeDescriptor::new::<Self>(#kind)
                    .with_tags(#type_tags)
                    #named
                    #transform
            }
        }

        impl #r_impl_generics #p::Resolvable for #name #r_ty_generics #r_where_clause {
            #[allow(unused_variables)]
            fn resolve_all(
                &mut self,
                ctx: &dyn #p::Context,
                path: &mut #p::PathBuffer,
                errs: &mut ::std::vec::Vec<#p::ErrorDetail>,
            ) {
                #walk
                #resolver
            }
        }
    })
}

fn resolver_call(model: &ModelAttrs) -> Option<TokenStream2> {
    let p = private();
    model.resolver.then(|| {
        quote! {
            errs.extend(<Self as #p::Resolver>::resolve(self, ctx, &*path));
        }
    })
}

fn model_tags(model: &ModelAttrs) -> TokenStream2 {
    let mut tags = Vec::new();
    if let Some(doc) = &model.doc {
        tags.push(("doc".to_string(), doc.clone()));
    }
    tags.extend(model.tags.iter().cloned());
    tags_tokens(&tags)
}

fn tags_tokens(tags: &[(String, String)]) -> TokenStream2 {
    let p = private();
    let pairs = tags.iter().map(|(k, v)| quote!((#k, #v)));
    quote!(#p::Tags(&[#(#pairs),*]))
}

/// Add `bound` to every type parameter.
fn bounded(generics: &Generics, bound: TokenStream2) -> Generics {
    let mut generics = generics.clone();
    let params: Vec<_> = generics.type_params().map(|t| t.ident.clone()).collect();
    let where_clause = generics.make_where_clause();
    for ident in params {
        where_clause.predicates.push(parse_quote!(#ident: #bound));
    }
    generics
}

fn rename(rule: &str, name: &str) -> String {
    match rule {
        "lowercase" => name.to_lowercase(),
        "UPPERCASE" => name.to_uppercase(),
        "PascalCase" => name.to_upper_camel_case(),
        "camelCase" => name.to_lower_camel_case(),
        "snake_case" => name.to_snake_case(),
        "SCREAMING_SNAKE_CASE" => name.to_shouty_snake_case(),
        "kebab-case" => name.to_kebab_case(),
        "SCREAMING-KEBAB-CASE" => name.to_shouty_kebab_case(),
        _ => name.to_string(),
    }
}

const RENAME_RULES: [&str; 8] = [
    "lowercase",
    "UPPERCASE",
    "PascalCase",
    "camelCase",
    "snake_case",
    "SCREAMING_SNAKE_CASE",
    "kebab-case",
    "SCREAMING-KEBAB-CASE",
];

fn doc_of(attrs: &[Attribute]) -> Option<String> {
    let lines: Vec<String> = attrs
        .iter()
        .filter(|a| a.path().is_ident("doc"))
        .filter_map(|a| match &a.meta {
            Meta::NameValue(nv) => match &nv.value {
                Expr::Lit(ExprLit { lit: Lit::Str(s), .. }) => Some(s.value().trim().to_string()),
                _ => None,
            },
            _ => None,
        })
        .collect();
    let doc = lines.join("\n").trim().to_string();
    (!doc.is_empty()).then_some(doc)
}

fn meta_key(meta: &ParseNestedMeta) -> String {
    meta.path
        .segments
        .iter()
        .map(|s| s.ident.to_string())
        .collect::<Vec<_>>()
        .join("::")
}

/// Consume the value of an attribute entry this macro does not use.
fn skip_meta(meta: &ParseNestedMeta) -> syn::Result<()> {
    if meta.input.peek(Token![=]) {
        let _: Expr = meta.value()?.parse()?;
    } else if meta.input.peek(syn::token::Paren) {
        let content;
        syn::parenthesized!(content in meta.input);
        let _: TokenStream2 = content.parse()?;
    }
    Ok(())
}

fn lit_string(meta: &ParseNestedMeta) -> syn::Result<String> {
    let expr: Expr = meta.value()?.parse()?;
    expr_string(&expr)
}

fn expr_string(expr: &Expr) -> syn::Result<String> {
    match expr {
        Expr::Lit(ExprLit { lit, .. }) => match lit {
            Lit::Str(s) => Ok(s.value()),
            Lit::Int(i) => Ok(i.base10_digits().to_string()),
            Lit::Float(f) => Ok(f.base10_digits().to_string()),
            Lit::Bool(b) => Ok(b.value.to_string()),
            other => Err(syn::Error::new_spanned(other, "expected a string, number or bool")),
        },
        Expr::Unary(u) if matches!(u.op, syn::UnOp::Neg(_)) => Ok(format!("-{}", expr_string(&u.expr)?)),
        Expr::Group(g) => expr_string(&g.expr),
        other => Err(syn::Error::new_spanned(other, "expected a literal")),
    }
}

fn parse_model_attrs(attrs: &[Attribute]) -> syn::Result<ModelAttrs> {
    let mut out = ModelAttrs {
        doc: doc_of(attrs),
        ..Default::default()
    };
    for attr in attrs {
        if attr.path().is_ident("serde") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename_all") && meta.input.peek(Token![=]) {
                    let rule = lit_string(&meta)?;
                    if !RENAME_RULES.contains(&rule.as_str()) {
                        return Err(meta.error(format!("unknown rename rule '{}'", rule)));
                    }
                    out.rename_all = Some(rule);
                } else if meta.path.is_ident("tag") {
                    out.tag = Some(lit_string(&meta)?);
                } else {
                    skip_meta(&meta)?;
                }
                Ok(())
            })?;
        } else if attr.path().is_ident("model") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("resolver") {
                    out.resolver = true;
                } else if meta.path.is_ident("transform") {
                    out.transform = Some(meta.value()?.parse()?);
                } else if meta.path.is_ident("name") {
                    out.name = Some(lit_string(&meta)?);
                } else {
                    let key = meta_key(&meta).to_lower_camel_case();
                    let value = if meta.input.peek(Token![=]) {
                        lit_string(&meta)?
                    } else {
                        "true".to_string()
                    };
                    out.tags.push((key, value));
                }
                Ok(())
            })?;
        }
    }
    Ok(out)
}

fn parse_field_attrs(attrs: &[Attribute]) -> syn::Result<FieldAttrs> {
    let mut out = FieldAttrs {
        doc: doc_of(attrs),
        ..Default::default()
    };
    for attr in attrs {
        if attr.path().is_ident("serde") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename") && meta.input.peek(Token![=]) {
                    out.rename = Some(lit_string(&meta)?);
                } else if meta.path.is_ident("skip")
                    || meta.path.is_ident("skip_deserializing")
                    || meta.path.is_ident("skip_serializing")
                {
                    out.skip = true;
                } else if meta.path.is_ident("flatten") {
                    out.flatten = true;
                } else if meta.path.is_ident("default") {
                    out.serde_default = true;
                    skip_meta(&meta)?;
                } else if meta.path.is_ident("skip_serializing_if") {
                    out.omitempty = true;
                    skip_meta(&meta)?;
                } else {
                    skip_meta(&meta)?;
                }
                Ok(())
            })?;
        } else if attr.path().is_ident("field") {
            attr.parse_nested_meta(|meta| {
                let key = meta_key(&meta);
                let composed = match key.as_str() {
                    "one_of" => Some("oneOf"),
                    "any_of" => Some("anyOf"),
                    "all_of" => Some("allOf"),
                    "not" => Some("not"),
                    _ => None,
                };
                if let Some(kind) = composed {
                    let content;
                    syn::parenthesized!(content in meta.input);
                    let members = Punctuated::<Type, Token![,]>::parse_terminated(&content)?;
                    out.composition = Some((kind, members.into_iter().collect()));
                } else if key == "discriminator" {
                    out.discriminator = Some(lit_string(&meta)?);
                } else {
                    let value = if meta.input.peek(Token![=]) {
                        lit_string(&meta)?
                    } else {
                        "true".to_string()
                    };
                    out.tags.push((key.to_lower_camel_case(), value));
                }
                Ok(())
            })?;
        }
    }
    Ok(out)
}
