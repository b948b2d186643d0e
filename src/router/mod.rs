//! # Router Module
//!
//! Path matching and route resolution for contract operations.
//!
//! OpenAPI paths (e.g. `/recordings/{id}`) are compiled into anchored regex
//! patterns at startup. A request is matched by method first, then against
//! the patterns of that method ordered by specificity: a static segment beats
//! a parameter at the same position, compared left to right.
//!
//! ```rust,ignore
//! let router = Router::new(contract.routes)?;
//! if let Some(m) = router.route(&Method::GET, "/api/recordings/42") {
//!     assert_eq!(m.get_path_param("id"), Some("42"));
//! }
//! ```

mod core;
#[cfg(test)]
mod tests;

pub use core::{ParamVec, RouteMatch, Router};
