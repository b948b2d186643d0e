//! # Typed Module
//!
//! Type-safe handlers on top of the dispatcher.
//!
//! Instead of working with raw [`HandlerRequest`](crate::dispatcher::HandlerRequest)
//! values, a handler declares a request type that converts from it via
//! `TryFrom` and a response type that serializes to JSON. Conversion failures
//! answer `400` before the handler runs.
//!
//! ```rust,ignore
//! #[derive(Deserialize)]
//! struct GetRecording {
//!     id: String,
//! }
//!
//! impl TryFrom<HandlerRequest> for GetRecording {
//!     type Error = anyhow::Error;
//!     fn try_from(req: HandlerRequest) -> anyhow::Result<Self> {
//!         from_request(&req)
//!     }
//! }
//! ```

mod core;

pub use core::{from_request, merged_data, spawn_typed, Handler, TypedHandlerRequest};
