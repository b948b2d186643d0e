//! API contract loading.
//!
//! An OpenAPI 3 document is turned into a list of [`RouteMeta`], one per
//! declared operation, with every schema `$ref` already expanded.

mod build;
mod load;
mod types;

pub use build::*;
pub use load::*;
pub use types::*;
