//! Translating build manifests into Rust constants

use proc_macro2::TokenStream;
use quote::quote;
use sharedbus_utils::{
    header::rust_constants,
    manifest::read_manifest_file,
};
use std::path::PathBuf;
use syn::LitStr;

pub(crate) fn generate_constants(filename: &LitStr) -> syn::Result<TokenStream> {
    let mut path = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap_or_default());
    path.push(filename.value());
    let manifest = read_manifest_file(&path).map_err(|e| {
        syn::Error::new(
            filename.span(),
            format!("Couldn't read manifest `{}`: {e}", path.display()),
        )
    })?;
    let constants: TokenStream = rust_constants(&manifest)
        .parse()
        .map_err(|e| syn::Error::new(filename.span(), format!("{e}")))?;
    // Track the file so edits to the manifest trigger a rebuild
    let path = path.display().to_string();
    Ok(quote! {
        const _: &[u8] = include_bytes!(#path);
        #constants
    })
}
