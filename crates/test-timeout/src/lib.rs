//! Test attributes that fail a test once it exceeds a wall-clock deadline.
//!
//! `#[test_timeout::timeout]` wraps a synchronous test,
//! `#[test_timeout::tokio_timeout_test]` wraps an async one on a
//! current-thread runtime. Both take an optional deadline in seconds.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = match parse_timeout(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(&sig.ident, "tokio_timeout_test expects an async fn")
            .to_compile_error()
            .into();
    }
    sig.asyncness = None;

    let body = quote! {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build Tokio runtime");
        runtime.block_on(async {
            tokio::time::timeout(deadline, async move #block)
                .await
                .expect("test timed out");
        });
    };
    let attrs = strip_attrs(attrs, &["tokio", "test"]);
    expand(quote! { #(#attrs)* #vis #sig }, secs, body)
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = match parse_timeout(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(&sig.ident, "timeout expects a synchronous fn; use tokio_timeout_test")
            .to_compile_error()
            .into();
    }

    let attrs = strip_attrs(attrs, &["test"]);
    expand(quote! { #(#attrs)* #vis #sig }, secs, quote! { #block })
}

fn parse_timeout(attr: TokenStream) -> syn::Result<u64> {
    if attr.is_empty() {
        return Ok(DEFAULT_TIMEOUT_SECS);
    }
    let lit: LitInt = syn::parse(attr)?;
    let secs: u64 = lit.base10_parse()?;
    if secs == 0 {
        return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
    }
    Ok(secs)
}

/// Drops an attribute whose path is exactly `path`, so the generated
/// `#[test]` is not applied twice.
fn strip_attrs(attrs: Vec<Attribute>, path: &[&str]) -> Vec<Attribute> {
    attrs
        .into_iter()
        .filter(|attr| {
            let segments: Vec<String> = attr
                .path()
                .segments
                .iter()
                .map(|s| s.ident.to_string())
                .collect();
            segments != path
        })
        .collect()
}

/// Runs `body` on a helper thread and fails the test if it has not reported
/// back within `secs`. Panics inside the body are re-raised on the test thread.
fn expand(signature: TokenStream2, secs: u64, body: TokenStream2) -> TokenStream {
    TokenStream::from(quote! {
        #[test]
        #signature {
            let deadline = std::time::Duration::from_secs(#secs);
            let (done_tx, done_rx) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| { #body }));
                let _ = done_tx.send(outcome);
            });
            match done_rx.recv_timeout(deadline) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread exited without reporting a result")
                }
            }
        }
    })
}
