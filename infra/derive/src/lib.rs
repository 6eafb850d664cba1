#![allow(unreachable_pub)]
#![allow(clippy::needless_pass_by_value)]

//! # Macros
//!
//! Procedural macros shared by the Tether crates.
//!
//! * [`tether_error`] turns a plain enum into a `thiserror` error with a `.context(...)`
//!   extension trait and `From` conversions for wrapped sources.
//! * [`main`] boots an `async fn main` on a runtime built by `tether-runtime`.
//!
//! Examples are `ignore`d here because a proc-macro crate cannot use its own macros.

mod macros;

use proc_macro::TokenStream;
use syn::{DeriveInput, ItemFn, parse_macro_input};

/// Attribute macro to bootstrap a Tokio runtime from a `tether_runtime::RuntimeConfig` preset.
///
/// # Arguments
///
/// * `proxy` - A single-threaded runtime, the flavour the storage proxy runs on.
/// * `tooling` - A small multithreaded runtime for command line tools.
/// * `default` - Worker threads auto-detected from available parallelism.
///
/// # Examples
///
/// ```rust,ignore
/// #[tether_runtime::main(tooling)]
/// async fn main() -> anyhow::Result<()> {
///     Ok(())
/// }
/// ```
#[proc_macro_attribute]
pub fn main(args: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    macros::runtime::expand_main(args.into(), input).into()
}

/// Defines a crate error enum.
///
/// The macro:
///
/// * adds `#[derive(Debug, thiserror::Error)]` unless already derived;
/// * generates a `<Name>Ext` trait whose `.context(...)` attaches a message to any
///   variant that carries a `context: Option<Cow<'static, str>>` field;
/// * implements `From<Source>` and `<Name>Ext` for `Result<T, Source>` for every variant
///   with a `source` (or `#[source]`/`#[from]`) field;
/// * implements `From<&'static str>` and `From<String>` when an `Internal` variant exists;
/// * emits a private `format_context` helper for the `#[error(...)]` strings.
///
/// Tuple and unit variants are rejected, and a variant with a source must also carry a
/// context field.
///
/// # Example
///
/// ```rust,ignore
/// use std::borrow::Cow;
///
/// #[tether_derive::tether_error]
/// pub enum BackendError {
///     #[error("I/O failure{}: {source}", format_context(.context))]
///     Io { source: std::io::Error, context: Option<Cow<'static, str>> },
///
///     #[error("Internal fault{}: {message}", format_context(.context))]
///     Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
/// }
///
/// fn open() -> Result<(), BackendError> {
///     std::fs::File::open("x").context("opening x")?;
///     Err("not wired".into())
/// }
/// ```
#[proc_macro_attribute]
pub fn tether_error(_args: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    macros::error::expand_derive(input).into()
}
