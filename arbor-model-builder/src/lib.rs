// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Model builder

extern crate proc_macro;

use proc_macro2::TokenStream;
use quote::quote;
use syn::{self, Data, DeriveInput, Fields, parse_macro_input};

/// Create a std::fmt::Display implementation for a struct with an Entity.
#[proc_macro_derive(EntityDisplay)]
pub fn entity_display(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let DeriveInput {
        ident, generics, ..
    } = parse_macro_input!(input);
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let output = quote! {
        impl #impl_generics std::fmt::Display for #ident #ty_generics #where_clause {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.entity, f)
            }
        }
    };

    output.into()
}

/// Create an `arbor_track::entity::GetEntity` implementation for a struct
/// with an `entity: Rc<Entity>` field.
#[proc_macro_derive(EntityGet)]
pub fn entity_get(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input: DeriveInput = parse_macro_input!(input);
    if let Err(e) = has_entity_field(&input) {
        return e.into();
    }

    let DeriveInput {
        ident, generics, ..
    } = input;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let output = quote! {
        impl #impl_generics arbor_track::entity::GetEntity for #ident #ty_generics #where_clause {
            fn entity(&self) -> &std::rc::Rc<arbor_track::entity::Entity> {
                &self.entity
            }
        }
    };

    output.into()
}

fn has_entity_field(input: &DeriveInput) -> Result<(), TokenStream> {
    let found = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => fields
                .named
                .iter()
                .any(|f| f.ident.as_ref().is_some_and(|i| i == "entity")),
            _ => false,
        },
        _ => false,
    };
    if found {
        Ok(())
    } else {
        Err(
            syn::Error::new_spanned(&input.ident, "EntityGet requires an `entity` field")
                .to_compile_error(),
        )
    }
}
