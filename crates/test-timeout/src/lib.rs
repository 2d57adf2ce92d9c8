//! Hard deadlines for tests that block on a channel or a rendezvous.
//!
//! `#[timeout]`, `#[timeout(5)]`, `#[timeout(secs = 5)]` or
//! `#[timeout(ms = 750)]` wrap a synchronous test; `#[tokio_timeout_test]`
//! accepts the same arguments for async tests and builds a current-thread
//! runtime. The body runs on a helper thread so a hung test is reported as
//! `test timed out` instead of stalling the whole suite.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{parse_macro_input, Attribute, Ident, ItemFn, LitInt, Token};

const DEFAULT_TIMEOUT_MS: u64 = 60_000;

struct Deadline {
    millis: u64,
}

impl Parse for Deadline {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        if input.is_empty() {
            return Ok(Self {
                millis: DEFAULT_TIMEOUT_MS,
            });
        }

        let millis = if input.peek(LitInt) {
            let secs: LitInt = input.parse()?;
            secs.base10_parse::<u64>()?.saturating_mul(1_000)
        } else {
            let unit: Ident = input.parse()?;
            input.parse::<Token![=]>()?;
            let value: LitInt = input.parse()?;
            let value = value.base10_parse::<u64>()?;
            match unit.to_string().as_str() {
                "secs" => value.saturating_mul(1_000),
                "ms" => value,
                _ => {
                    return Err(syn::Error::new_spanned(
                        unit,
                        "expected `secs = N` or `ms = N`",
                    ))
                }
            }
        };

        if !input.is_empty() {
            return Err(input.error("unexpected tokens after the timeout"));
        }
        if millis == 0 {
            return Err(input.error("timeout must be greater than zero"));
        }
        Ok(Self { millis })
    }
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let deadline = parse_macro_input!(attr as Deadline);
    let function = parse_macro_input!(item as ItemFn);

    if function.sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &function.sig.ident,
            "timeout expects a synchronous test; use tokio_timeout_test for async tests",
        )
        .to_compile_error()
        .into();
    }

    let block = &function.block;
    let body = quote! { #block };
    expand(function.attrs.clone(), &function, deadline.millis, body).into()
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let deadline = parse_macro_input!(attr as Deadline);
    let mut function = parse_macro_input!(item as ItemFn);

    if function.sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &function.sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }
    function.sig.asyncness = None;

    let millis = deadline.millis;
    let block = &function.block;
    let body = quote! {
        {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build Tokio runtime");
            runtime.block_on(async {
                tokio::time::timeout(
                    std::time::Duration::from_millis(#millis),
                    async move #block,
                )
                .await
                .expect("test timed out");
            });
        }
    };
    expand(function.attrs.clone(), &function, millis, body).into()
}

fn expand(attrs: Vec<Attribute>, function: &ItemFn, millis: u64, body: TokenStream2) -> TokenStream2 {
    let attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_test_attribute(attr))
        .collect();
    let vis = &function.vis;
    let sig = &function.sig;
    let thread_name = sig.ident.to_string();

    quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let timeout_duration = std::time::Duration::from_millis(#millis);
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::Builder::new()
                .name(String::from(#thread_name))
                .spawn(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| #body));
                    let _ = sender.send(result);
                })
                .expect("failed to spawn test thread");
            match receiver.recv_timeout(timeout_duration) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test timed out after {:?}", timeout_duration)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    }
}

/// Matches `#[test]` and `#[tokio::test]`, which the generated wrapper replaces.
fn is_test_attribute(attr: &Attribute) -> bool {
    let segments: Vec<String> = attr
        .path()
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect();
    matches!(
        segments.iter().map(String::as_str).collect::<Vec<_>>().as_slice(),
        ["test"] | ["tokio", "test"]
    )
}
