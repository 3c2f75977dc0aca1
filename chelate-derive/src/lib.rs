use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{DeriveInput, parse_macro_input};

mod descriptor;

/// Derive macro for the `Describe` and `Typed` traits.
///
/// Generates a compile-time type descriptor: named structs become records in
/// field declaration order, tuple structs become records with positional
/// field names (`"0"`, `"1"`, ...), and enums whose variants are all units
/// become enumerations.
///
/// # Example
///
/// ```ignore
/// use chelate_core::Describe;
///
/// #[derive(Describe)]
/// #[chelate(name = "acme.Employee", extends = "acme.Person")]
/// struct Employee {
///     name: String,
///     manager: Option<Box<Employee>>,
///     #[chelate(skip)]
///     cache: Vec<u8>,
/// }
/// ```
///
/// # Attributes
///
/// On the type:
/// - `#[chelate(name = "...")]` - Registry name (defaults to the Rust identifier)
/// - `#[chelate(extends = "...")]` - Parent type
/// - `#[chelate(implements = "...")]` - Implemented capability; repeatable
/// - `#[chelate(value_type)]` - Register as a logical primitive written as a string
/// - `#[chelate(crate = "...")]` - Path to `chelate_core` when it is re-exported
///
/// On fields and variants:
/// - `#[chelate(skip)]` - Leave the field out of the descriptor
/// - `#[chelate(rename = "...")]` - Use a different field or variant name
#[proc_macro_derive(Describe, attributes(chelate))]
pub fn derive_describe(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive_describe_impl(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn derive_describe_impl(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let generics = &input.generics;
    let attrs = parse_container_attrs(&input.attrs)?;

    let krate = match &attrs.krate {
        Some(path) => quote! { #path },
        None => quote! { ::chelate_core },
    };
    let type_name = attrs.name.clone().unwrap_or_else(|| name.to_string());

    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    let where_clause = build_where_clause(generics, where_clause, &krate);

    let descriptor = descriptor::generate_descriptor(input, &attrs, &krate)?;

    Ok(quote! {
        impl #impl_generics #krate::Describe for #name #ty_generics #where_clause {
            fn field_type() -> #krate::FieldType {
                #krate::FieldType::Named(<Self as #krate::Typed>::type_name())
            }
        }

        impl #impl_generics #krate::Typed for #name #ty_generics #where_clause {
            fn type_name() -> #krate::TypeName {
                #krate::TypeName::new(#type_name)
            }

            #descriptor
        }
    })
}

fn build_where_clause(
    generics: &syn::Generics,
    existing: Option<&syn::WhereClause>,
    krate: &TokenStream2,
) -> TokenStream2 {
    let type_params: Vec<_> = generics.type_params().map(|p| &p.ident).collect();

    if type_params.is_empty() && existing.is_none() {
        return quote! {};
    }

    let predicates = existing.into_iter().flat_map(|w| w.predicates.iter());

    quote! {
        where
            #(#predicates,)*
            #(#type_params: #krate::Describe,)*
    }
}

#[derive(Default)]
pub(crate) struct ContainerAttrs {
    pub name: Option<String>,
    pub extends: Option<String>,
    pub implements: Vec<String>,
    pub value_type: bool,
    pub krate: Option<syn::Path>,
}

fn parse_container_attrs(attrs: &[syn::Attribute]) -> syn::Result<ContainerAttrs> {
    let mut result = ContainerAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("chelate") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value: syn::LitStr = meta.value()?.parse()?;
                result.name = Some(value.value());
            } else if meta.path.is_ident("extends") {
                let value: syn::LitStr = meta.value()?.parse()?;
                result.extends = Some(value.value());
            } else if meta.path.is_ident("implements") {
                let value: syn::LitStr = meta.value()?.parse()?;
                result.implements.push(value.value());
            } else if meta.path.is_ident("value_type") {
                result.value_type = true;
            } else if meta.path.is_ident("crate") {
                let value: syn::LitStr = meta.value()?.parse()?;
                result.krate = Some(value.parse()?);
            } else {
                return Err(meta.error("unknown chelate container attribute"));
            }
            Ok(())
        })?;
    }

    Ok(result)
}

#[derive(Default)]
pub(crate) struct FieldAttrs {
    pub skip: bool,
    pub rename: Option<String>,
}

pub(crate) fn parse_field_attrs(attrs: &[syn::Attribute]) -> syn::Result<FieldAttrs> {
    let mut result = FieldAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("chelate") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                result.skip = true;
            } else if meta.path.is_ident("rename") {
                let value: syn::LitStr = meta.value()?.parse()?;
                result.rename = Some(value.value());
            } else {
                return Err(meta.error("unknown chelate field attribute"));
            }
            Ok(())
        })?;
    }

    Ok(result)
}
