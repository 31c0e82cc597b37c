use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, spanned::Spanned};

/// Turns a struct into a device-owned GPU object.
///
/// Injects `pub(crate) device: Arc<DeviceShared>` and implements the crate's sealed
/// `DeviceObject` trait, so the object's `Drop` can hand its native handles to the
/// current frame's release queue.
#[proc_macro_attribute]
#[allow(non_snake_case)]
pub fn DeviceObject(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(
            proc_macro2::TokenStream::from(attr).span(),
            "DeviceObject takes no arguments",
        )
        .to_compile_error()
        .into();
    }

    let input = parse_macro_input!(item as syn::ItemStruct);
    let ident = input.ident.clone();
    let generics = input.generics.clone();
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let mut output_struct = input.clone();

    let syn::Fields::Named(fields_named) = &mut output_struct.fields else {
        return syn::Error::new(
            output_struct.span(),
            "DeviceObject only supports structs with named fields",
        )
        .to_compile_error()
        .into();
    };

    if fields_named.named.iter().any(|f| f.ident.as_ref().is_some_and(|id| id == "device")) {
        return syn::Error::new(
            fields_named.span(),
            "DeviceObject: struct already has a `device` field; remove it and let the macro inject it",
        )
        .to_compile_error()
        .into();
    }

    let device_field: syn::Field = syn::parse_quote! {
        pub(crate) device: ::std::sync::Arc<crate::device::DeviceShared>
    };
    fields_named.named.push(device_field);

    let expanded = quote! {
        #output_struct

        impl #impl_generics crate::device::sealed::Sealed for #ident #ty_generics #where_clause {}

        impl #impl_generics crate::device::DeviceObject for #ident #ty_generics #where_clause {
            #[inline]
            fn device(&self) -> &::std::sync::Arc<crate::device::DeviceShared> { &self.device }
        }
    };

    expanded.into()
}
