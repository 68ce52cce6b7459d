//! Procedural macros for `sharedbus`.
//!
//! - [`BusSerde`](derive@BusSerde) shims the one-word bus `Serialize`/`Deserialize` traits onto a
//!   four byte `packed_struct`
//! - [`macro@address`] tags a `packed_struct` register with its device-side register address
//! - [`bus_constants!`] turns a build manifest into absolute-address constants at compile time

use proc_macro::TokenStream;
use quote::quote;
use syn::{
    parse_macro_input,
    DeriveInput,
    LitInt,
    LitStr,
};

mod manifest;

#[proc_macro_derive(BusSerde)]
/// Derived on a four byte `packed_struct` so it can be read and written as one bus word.
/// `Serialize` and `Deserialize` from `sharedbus::transport` must be in scope.
pub fn derive_bus_serde(tokens: TokenStream) -> TokenStream {
    let input = parse_macro_input!(tokens as DeriveInput);
    let block_name = input.ident;
    let generated = quote! {
        impl Serialize for #block_name {
            fn serialize(&self) -> ::core::result::Result<u32, ::packed_struct::PackingError> {
                let bytes = ::packed_struct::PackedStruct::pack(self)?;
                Ok(u32::from_be_bytes(bytes))
            }
        }

        impl Deserialize for #block_name {
            fn deserialize(word: u32) -> ::core::result::Result<Self, ::packed_struct::PackingError> {
                <Self as ::packed_struct::PackedStruct>::unpack(&word.to_be_bytes())
            }
        }
    };
    TokenStream::from(generated)
}

#[proc_macro_attribute]
/// Attach the device-side register address to a register struct, implementing `Address`
/// (which must be in scope)
pub fn address(attr: TokenStream, item: TokenStream) -> TokenStream {
    let num = parse_macro_input!(attr as LitInt);
    if let Err(e) = num.base10_parse::<u8>() {
        return e.to_compile_error().into();
    }
    // Get the struct name this address is for
    let item = parse_macro_input!(item as DeriveInput);
    let ident = &item.ident;

    let generated = quote! {
        #item

        impl Address for #ident {
            fn addr() -> u8 {
                #num
            }
        }
    };
    TokenStream::from(generated)
}

#[proc_macro]
/// Read a build manifest (relative to the invoking crate's `Cargo.toml`) and emit a
/// `pub const REGION_REGISTER: u32` for every register, plus `MANIFEST_MD5`
pub fn bus_constants(tokens: TokenStream) -> TokenStream {
    let filename = parse_macro_input!(tokens as LitStr);
    match manifest::generate_constants(&filename) {
        Ok(ts) => ts.into(),
        Err(e) => e.to_compile_error().into(),
    }
}
