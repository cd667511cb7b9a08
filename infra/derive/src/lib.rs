#![allow(unreachable_pub)]
#![allow(clippy::needless_pass_by_value)]

//! # Macros
//!
//! Procedural macros shared by the infrastructure crates.
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! mhub-derive.workspace = true
//! thiserror.workspace = true
//! ```

mod error;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

/// Turns an enum into an infrastructure error type.
///
/// # Features
///
/// * **Automatic Derives**: injects `Debug` and `thiserror::Error` unless already derived.
/// * **Context Support**: generates a companion `<Name>Ext` trait adding `.context(..)`
///   to `Result<T, Name>`. It fills the `context` field of the variant.
/// * **Formatting Helper**: emits a private `format_context` function for `#[error]`
///   strings, rendering a present context as ` (context)`.
///
/// # Requirements
///
/// 1. The macro must be applied to an **enum**.
/// 2. Every variant uses named fields. Tuple and unit variants are rejected.
/// 3. A `context` field, when present, has type `Option<Cow<'static, str>>`.
///
/// # Example
///
/// ```rust,ignore
/// use std::borrow::Cow;
///
/// #[mhub_derive::mhub_error]
/// pub enum QueueError {
///     #[error("Queue closed{}: {message}", format_context(.context))]
///     Closed { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
/// }
///
/// fn push() -> Result<(), QueueError> {
///     Err(QueueError::Closed { message: "shutdown".into(), context: None })
///         .context("flushing tick events")
/// }
/// ```
#[proc_macro_attribute]
pub fn mhub_error(_args: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    error::expand(input).into()
}
