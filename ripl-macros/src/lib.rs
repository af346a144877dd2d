// These lints are triggered by darling's generated code for
// `#[darling(default)]`.
#![allow(clippy::option_if_let_else)]
#![allow(clippy::needless_continue)]

use std::collections::HashSet;

use darling::{FromDeriveInput, util::PathList};
use heck::{ToKebabCase, ToUpperCamelCase};
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{DeriveInput, Ident, Path, parse_macro_input};

#[allow(clippy::doc_markdown, reason = "false positive")]
/// Build a PascalCase enum variant name from a type path.
fn path_to_pascal_ident(path: &Path) -> Ident {
    let combined = path
        .segments
        .iter()
        .map(|s| s.ident.to_string())
        .collect::<Vec<_>>()
        .join("_");
    let pascal = combined.to_upper_camel_case();
    let span = path
        .segments
        .last()
        .map_or_else(proc_macro2::Span::call_site, |segment| segment.ident.span());
    Ident::new(&pascal, span)
}

/// Kebab-case entity name from the last path segment.
fn path_to_kind_name(path: &Path) -> String {
    path.segments
        .last()
        .map(|segment| segment.ident.to_string().to_kebab_case())
        .unwrap_or_default()
}

/// Configuration for the `#[aggregate(...)]` attribute.
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(aggregate), supports(struct_any))]
struct AggregateArgs {
    ident: Ident,
    vis: syn::Visibility,
    generics: syn::Generics,
    #[darling(default)]
    children: PathList,
    #[darling(default)]
    kind: Option<String>,
    #[darling(default)]
    entity_enum: Option<String>,
    #[darling(default)]
    kind_enum: Option<String>,
    #[darling(default)]
    derives: Option<PathList>,
}

/// One entity type of the aggregate: its path, enum variant and kind name.
struct EntityDef {
    path: Path,
    variant: Ident,
    name: String,
}

impl EntityDef {
    fn new(path: &Path) -> Self {
        Self {
            path: path.clone(),
            variant: path_to_pascal_ident(path),
            name: path_to_kind_name(path),
        }
    }
}

/// Parse derive input with darling and render errors as tokens.
fn parse_or_error<T, F>(input: &DeriveInput, f: F) -> TokenStream2
where
    T: FromDeriveInput,
    F: FnOnce(T) -> TokenStream2,
{
    match T::from_derive_input(input) {
        Ok(args) => f(args),
        Err(err) => err.write_errors(),
    }
}

/// Derives the `Aggregate` trait for the root type of an aggregate.
///
/// This macro generates:
/// - An entity enum with one variant per entity type (root and children)
/// - A kind enum discriminating those variants, implementing `EntityKind`
/// - `Model` for the entity enum
/// - `EntityType` for the root and every child type
/// - `From<T>` for the entity enum, for every entity type
/// - `Aggregate` for the root type
///
/// Relationships between the entity types are declared at runtime on the
/// aggregate's `Relationships` registry.
///
/// # Attributes
///
/// ## Optional
/// - `children(Type1, Type2, ...)` - Child entity types
/// - `kind = "name"` - Aggregate type identifier (default: kebab-case struct
///   name)
/// - `entity_enum = "Name"` - Override generated entity enum name (default:
///   `{Struct}Entity`)
/// - `kind_enum = "Name"` - Override generated kind enum name (default:
///   `{Struct}Kind`)
/// - `derives(Trait1, Trait2, ...)` - Additional derives for the generated
///   entity enum. Always includes `Clone`. Common additions: `Debug`,
///   `PartialEq`
///
/// # Example
///
/// ```ignore
/// #[derive(Clone, Debug, PartialEq, Aggregate)]
/// #[aggregate(children(InspectionReport, InspectionIssue), derives(Debug, PartialEq))]
/// pub struct HolidayHome {
///     beds: u32,
/// }
/// ```
#[proc_macro_derive(Aggregate, attributes(aggregate))]
pub fn derive_aggregate(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    derive_aggregate_impl(&input).into()
}

/// Internal entry point that returns tokens for the aggregate derive.
fn derive_aggregate_impl(input: &DeriveInput) -> TokenStream2 {
    parse_or_error::<AggregateArgs, _>(input, generate_aggregate_impl)
}

/// Generate the aggregate derive implementation tokens.
#[allow(clippy::too_many_lines)]
fn generate_aggregate_impl(args: AggregateArgs) -> TokenStream2 {
    let root_name = &args.ident;
    let vis = &args.vis;

    if !args.generics.params.is_empty() {
        return darling::Error::custom("generic aggregates are not supported")
            .with_span(&args.generics)
            .write_errors();
    }

    let root_path: Path = root_name.clone().into();
    let root = EntityDef::new(&root_path);
    let children: Vec<EntityDef> = args.children.iter().map(EntityDef::new).collect();

    let mut seen = HashSet::from([root.variant.to_string()]);
    for child in &children {
        if !seen.insert(child.variant.to_string()) {
            return darling::Error::custom(format!(
                "`{}` is declared more than once in this aggregate",
                child.variant
            ))
            .with_span(&child.path)
            .write_errors();
        }
    }

    let kind = args
        .kind
        .unwrap_or_else(|| root_name.to_string().to_kebab_case());

    let entity_enum = args.entity_enum.map_or_else(
        || Ident::new(&format!("{root_name}Entity"), root_name.span()),
        |name| Ident::new(&name, root_name.span()),
    );
    let kind_enum = args.kind_enum.map_or_else(
        || Ident::new(&format!("{root_name}Kind"), root_name.span()),
        |name| Ident::new(&name, root_name.span()),
    );

    let defs: Vec<&EntityDef> = std::iter::once(&root).chain(&children).collect();
    let types: Vec<&Path> = defs.iter().map(|def| &def.path).collect();
    let variants: Vec<&Ident> = defs.iter().map(|def| &def.variant).collect();
    let names: Vec<&str> = defs.iter().map(|def| def.name.as_str()).collect();
    let root_variant = &root.variant;

    // Build derives list - always include Clone, add user-specified traits
    let user_derives = args.derives.unwrap_or_default();
    let derives = quote! { #[derive(Clone, #(#user_derives),*)] };

    quote! {
        #[doc = concat!("Entity type for the [`", stringify!(#root_name), "`] aggregate.")]
        #derives
        #vis enum #entity_enum {
            #(
                #[doc = concat!("[`", stringify!(#types), "`]")]
                #variants(#types)
            ),*
        }

        #[doc = concat!("Entity kinds of the [`", stringify!(#root_name), "`] aggregate.")]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #vis enum #kind_enum {
            #(
                #[doc = concat!("[`", stringify!(#types), "`]")]
                #variants
            ),*
        }

        impl ::ripl::EntityKind for #kind_enum {
            fn name(&self) -> &'static str {
                match self {
                    #(Self::#variants => #names),*
                }
            }

            fn is_root(&self) -> bool {
                matches!(self, Self::#root_variant)
            }
        }

        impl ::ripl::Model for #entity_enum {
            type Kind = #kind_enum;

            fn kind(&self) -> Self::Kind {
                match self {
                    #(Self::#variants(_) => #kind_enum::#variants),*
                }
            }
        }

        #(
            impl ::ripl::EntityType<#entity_enum> for #types {
                const ENTITY_KIND: #kind_enum = #kind_enum::#variants;

                fn wrap(self) -> #entity_enum {
                    #entity_enum::#variants(self)
                }

                #[allow(unreachable_patterns)]
                fn peek(model: &#entity_enum) -> Option<&Self> {
                    match model {
                        #entity_enum::#variants(inner) => Some(inner),
                        _ => None,
                    }
                }

                #[allow(unreachable_patterns)]
                fn peek_mut(model: &mut #entity_enum) -> Option<&mut Self> {
                    match model {
                        #entity_enum::#variants(inner) => Some(inner),
                        _ => None,
                    }
                }
            }

            impl From<#types> for #entity_enum {
                fn from(entity: #types) -> Self {
                    Self::#variants(entity)
                }
            }
        )*

        impl ::ripl::Aggregate for #root_name {
            const KIND: &'static str = #kind;
            const ROOT_KIND: #kind_enum = #kind_enum::#root_variant;
            type Entity = #entity_enum;

            fn into_entity(self) -> Self::Entity {
                #entity_enum::#root_variant(self)
            }

            fn from_entity(entity: &Self::Entity) -> Option<&Self> {
                <Self as ::ripl::EntityType<#entity_enum>>::peek(entity)
            }

            fn from_entity_mut(entity: &mut Self::Entity) -> Option<&mut Self> {
                <Self as ::ripl::EntityType<#entity_enum>>::peek_mut(entity)
            }
        }
    }
}
