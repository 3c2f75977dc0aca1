use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, Type};

use crate::{ContainerAttrs, parse_field_attrs};

/// Generates the `descriptor()` method implementation.
pub fn generate_descriptor(
    input: &DeriveInput,
    attrs: &ContainerAttrs,
    krate: &TokenStream,
) -> syn::Result<TokenStream> {
    let base = if attrs.value_type {
        quote! { #krate::TypeDescriptor::value(<Self as #krate::Typed>::type_name()) }
    } else {
        match &input.data {
            syn::Data::Struct(data) => record_descriptor(&data.fields, krate)?,
            syn::Data::Enum(data) => enumeration_descriptor(data, krate)?,
            syn::Data::Union(_) => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Describe cannot be derived for unions",
                ));
            }
        }
    };

    let extends = attrs.extends.iter().map(|parent| quote! { .extends(#parent) });
    let implements = attrs.implements.iter().map(|cap| quote! { .implements(#cap) });

    Ok(quote! {
        fn descriptor() -> #krate::TypeDescriptor {
            #base
            #(#extends)*
            #(#implements)*
        }
    })
}

fn record_descriptor(fields: &syn::Fields, krate: &TokenStream) -> syn::Result<TokenStream> {
    let mut entries = Vec::new();

    for (i, field) in fields.iter().enumerate() {
        let attrs = parse_field_attrs(&field.attrs)?;
        if attrs.skip {
            continue;
        }
        let name = attrs.rename.unwrap_or_else(|| match &field.ident {
            Some(ident) => ident.to_string(),
            None => i.to_string(),
        });
        let field_type = field_type_expr(&field.ty, krate);
        entries.push(quote! { (#name, #field_type) });
    }

    Ok(quote! {
        #krate::TypeDescriptor::record(
            <Self as #krate::Typed>::type_name(),
            ::std::vec::Vec::<(&'static str, #krate::FieldType)>::from([#(#entries),*]),
        )
    })
}

fn enumeration_descriptor(data: &syn::DataEnum, krate: &TokenStream) -> syn::Result<TokenStream> {
    let mut variants = Vec::new();

    for variant in &data.variants {
        if !matches!(variant.fields, syn::Fields::Unit) {
            return Err(syn::Error::new_spanned(
                variant,
                "Describe can only be derived for enums whose variants are all units",
            ));
        }
        let attrs = parse_field_attrs(&variant.attrs)?;
        if attrs.skip {
            continue;
        }
        variants.push(attrs.rename.unwrap_or_else(|| variant.ident.to_string()));
    }

    Ok(quote! {
        #krate::TypeDescriptor::enumeration(
            <Self as #krate::Typed>::type_name(),
            ::std::vec::Vec::<&'static str>::from([#(#variants),*]),
        )
    })
}

/// The declared type of a field.
///
/// Types describe themselves by name, so self-references need no special
/// handling: `Option<Box<Self>>` resolves to `Named(<own name>)`.
fn field_type_expr(ty: &Type, krate: &TokenStream) -> TokenStream {
    match ty {
        Type::Paren(paren) => field_type_expr(&paren.elem, krate),
        Type::Group(group) => field_type_expr(&group.elem, krate),
        _ => quote! { <#ty as #krate::Describe>::field_type() },
    }
}
