//! Procedural macros for the docsession project.
//!
//! This crate provides `#[derive(Document)]`, re-exported by `docsession`.
//!
//! ```ignore
//! #[derive(Debug, Clone, Serialize, Deserialize, Document)]
//! #[document(collection = "Characters")]
//! pub struct Character {
//!     #[document(id)]
//!     pub id: Option<String>,
//!     pub name: String,
//! }
//! ```
//!
//! Without `collection` the collection is the type name with an `s` appended. Without a
//! field marked `#[document(id)]` the field named `id` is the identity. The identity field
//! must be an `Option<String>`.

#[allow(unused_extern_crates)]
extern crate self as docsession_macros;

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, LitStr, parse_macro_input, spanned::Spanned};

#[proc_macro_derive(Document, attributes(document))]
pub fn derive_document(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    expand(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand(input: DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let collection = collection_name(&input)?.unwrap_or_else(|| format!("{name}s"));
    let id_field = id_field(&input)?;

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::docsession::document::Document for #name #ty_generics #where_clause {
            fn id(&self) -> ::core::option::Option<&str> {
                ::core::option::Option::as_deref(&self.#id_field)
            }

            fn set_id(&mut self, id: ::std::string::String) {
                self.#id_field = ::core::option::Option::Some(id);
            }

            fn collection_name() -> &'static str {
                #collection
            }
        }
    })
}

fn collection_name(input: &DeriveInput) -> syn::Result<Option<String>> {
    let mut collection = None;

    for attr in input.attrs.iter().filter(|attr| attr.path().is_ident("document")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("collection") {
                let value: LitStr = meta.value()?.parse()?;
                if value.value().is_empty() {
                    return Err(meta.error("collection name must not be empty"));
                }
                collection = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("expected `collection = \"...\"`"))
            }
        })?;
    }

    Ok(collection)
}

fn id_field(input: &DeriveInput) -> syn::Result<Ident> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new(
            input.span(),
            "Document can only be derived for structs",
        ));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new(
            data.fields.span(),
            "Document requires named fields",
        ));
    };

    let mut marked = None;
    for field in &fields.named {
        for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("document")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("id") {
                    if marked.is_some() {
                        return Err(meta.error("only one field can be the identity"));
                    }
                    marked = field.ident.clone();
                    Ok(())
                } else {
                    Err(meta.error("expected `id`"))
                }
            })?;
        }
    }

    marked
        .or_else(|| {
            fields
                .named
                .iter()
                .filter_map(|field| field.ident.clone())
                .find(|ident| ident == "id")
        })
        .ok_or_else(|| {
            syn::Error::new(
                input.ident.span(),
                "Document needs an `id` field or a field marked #[document(id)]",
            )
        })
}
