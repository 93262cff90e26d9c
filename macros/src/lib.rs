//! Augment the development of finality primitives with procedural macros.
//!
//! Code generated by these macros refers to `::tracing`, `::tracing_subscriber`, and (for async
//! tests) `::tokio` with the `rt`, `time`, and `test-util` features, so the calling crate must
//! list them as (dev-)dependencies.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, AttributeArgs, ItemFn, Lit, Meta, NestedMeta};

/// Run a test function with a `tracing` subscriber that writes to the test output.
///
/// Accepts an optional `level = "..."` argument (one of `TRACE`, `DEBUG`, `INFO`, `WARN`, or
/// `ERROR`, defaulting to `DEBUG`).
///
/// `async` test functions are driven on a single-threaded `tokio` runtime whose clock starts
/// paused, so timeouts and backoff elapse instantly (and deterministically) once every task is
/// idle.
///
/// # Example
///
/// ```rust,ignore
/// use ratify_macros::test_traced;
/// use tracing::info;
///
/// #[test_traced(level = "INFO")]
/// async fn test_with_logs() {
///     info!("this is printed when the test fails");
///     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
/// }
/// ```
#[proc_macro_attribute]
pub fn test_traced(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as AttributeArgs);
    let input = parse_macro_input!(item as ItemFn);

    let level = match parse_level(args) {
        Ok(level) => level,
        Err(err) => return err.to_compile_error().into(),
    };

    let attrs = &input.attrs;
    let vis = &input.vis;
    let body = &input.block;
    let mut sig = input.sig.clone();

    let init = quote! {
        let _ = ::tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(#level)
            .with_line_number(true)
            .try_init();
    };

    let expanded = if sig.asyncness.take().is_some() {
        quote! {
            #[test]
            #(#attrs)*
            #vis #sig {
                #init
                ::tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .start_paused(true)
                    .build()
                    .expect("failed to build test runtime")
                    .block_on(async move #body)
            }
        }
    } else {
        quote! {
            #[test]
            #(#attrs)*
            #vis #sig {
                #init
                #body
            }
        }
    };
    expanded.into()
}

fn parse_level(args: AttributeArgs) -> Result<TokenStream2, syn::Error> {
    let mut level = String::from("DEBUG");
    for arg in args {
        match arg {
            NestedMeta::Meta(Meta::NameValue(nv)) if nv.path.is_ident("level") => match nv.lit {
                Lit::Str(value) => level = value.value(),
                other => return Err(syn::Error::new_spanned(other, "level must be a string")),
            },
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "expected `level = \"...\"`",
                ))
            }
        }
    }
    let level = match level.to_uppercase().as_str() {
        "TRACE" => quote!(::tracing::Level::TRACE),
        "DEBUG" => quote!(::tracing::Level::DEBUG),
        "INFO" => quote!(::tracing::Level::INFO),
        "WARN" => quote!(::tracing::Level::WARN),
        "ERROR" => quote!(::tracing::Level::ERROR),
        _ => {
            return Err(syn::Error::new(
                proc_macro2::Span::call_site(),
                "level must be one of TRACE, DEBUG, INFO, WARN, ERROR",
            ))
        }
    };
    Ok(level)
}
