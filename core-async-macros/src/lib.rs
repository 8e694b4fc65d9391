use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, ItemFn};

/// Marks an `async fn` as a test driven by `core_async::runtime`.
///
/// `#[core_async::test]` uses a current-thread runtime;
/// `#[core_async::test(multi_thread)]` uses a multi-threaded one.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, MacroKind::Test)
}

#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, MacroKind::Main)
}

enum MacroKind {
    Test,
    Main,
}

enum Flavor {
    CurrentThread,
    MultiThread,
}

fn parse_flavor(attr: TokenStream) -> Result<Flavor, syn::Error> {
    if attr.is_empty() {
        return Ok(Flavor::CurrentThread);
    }

    let tokens = TokenStream2::from(attr);
    let ident: syn::Ident = syn::parse2(tokens.clone())
        .map_err(|_| syn::Error::new_spanned(&tokens, "expected `multi_thread`"))?;

    match ident.to_string().as_str() {
        "multi_thread" => Ok(Flavor::MultiThread),
        "current_thread" => Ok(Flavor::CurrentThread),
        other => Err(syn::Error::new_spanned(
            ident,
            format!("unknown core_async runtime flavor `{other}`"),
        )),
    }
}

fn expand(attr: TokenStream, item: TokenStream, kind: MacroKind) -> TokenStream {
    let flavor = match parse_flavor(attr) {
        Ok(flavor) => flavor,
        Err(err) => return err.to_compile_error().into(),
    };

    let input = parse_macro_input!(item as ItemFn);

    if input.sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            input.sig.fn_token,
            "core_async attribute macros require `async fn`",
        )
        .to_compile_error()
        .into();
    }

    let mut sync_sig = input.sig.clone();
    sync_sig.asyncness = None;

    let attrs = input.attrs;
    let vis = input.vis;
    let block = input.block;

    let body = match flavor {
        Flavor::CurrentThread => quote! {
            core_async::runtime::block_on(async move #block)
        },
        Flavor::MultiThread => quote! {
            core_async::runtime::block_on_multi_thread(4, async move #block)
        },
    };

    let test_attr = match kind {
        MacroKind::Test => quote!(#[test]),
        MacroKind::Main => quote!(),
    };

    quote! {
        #(#attrs)*
        #test_attr
        #vis #sync_sig {
            #body
        }
    }
    .into()
}
