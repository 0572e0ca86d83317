use proc_macro::TokenStream;
use quote::{quote, quote_spanned};
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Meta, Token};

/// Run an async fn returning `Result` as a test.
///
/// The body runs to completion on the executor; an `Err` fails the test.
/// Extra attribute arguments are forwarded to the generated test
/// (e.g. `#[test_async(ignore)]`).
#[proc_macro_attribute]
pub fn test_async(args: TokenStream, item: TokenStream) -> TokenStream {
    let test_attributes = match parse_forwarded_attributes(args) {
        Ok(tokens) => tokens,
        Err(err) => return err.to_compile_error().into(),
    };

    let input = syn::parse_macro_input!(item as syn::ItemFn);
    let name = &input.sig.ident;

    if input.sig.asyncness.is_none() {
        return TokenStream::from(quote_spanned! { input.span() =>
            compile_error!("the async keyword is missing from the function declaration");
        });
    }

    let result = quote! {
        #[test]
        #test_attributes
        fn #name() {
            ::xconnect::subscriber::init_logger();

            #input

            let ft = async { #name().await };

            if let Err(err) = ::xconnect::task::run_block_on(ft) {
                assert!(false, "error: {:?}", err);
            }
        }
    };

    result.into()
}

/// Run an async fn as a test, ignoring the return value.
#[proc_macro_attribute]
pub fn test(args: TokenStream, item: TokenStream) -> TokenStream {
    let test_attributes = match parse_forwarded_attributes(args) {
        Ok(tokens) => tokens,
        Err(err) => return err.to_compile_error().into(),
    };

    let input = syn::parse_macro_input!(item as syn::ItemFn);
    let ret = &input.sig.output;
    let name = &input.sig.ident;
    let body = &input.block;
    let attrs = &input.attrs;
    let vis = &input.vis;

    if input.sig.asyncness.is_none() {
        return TokenStream::from(quote_spanned! { input.span() =>
            compile_error!("the async keyword is missing from the function declaration");
        });
    }

    let result = quote! {
        #[::core::prelude::v1::test]
        #test_attributes
        #(#attrs)*
        #vis fn #name() #ret {
            ::xconnect::subscriber::init_logger();

            ::xconnect::task::run_block_on(async { #body })
        }
    };

    result.into()
}

fn parse_forwarded_attributes(args: TokenStream) -> syn::Result<proc_macro2::TokenStream> {
    let parsed = Punctuated::<Meta, Token![,]>::parse_terminated.parse(args)?;
    let attributes = parsed.iter().map(|meta| {
        quote! {
            #[#meta]
        }
    });

    Ok(quote! {
        #(#attributes)*
    })
}
