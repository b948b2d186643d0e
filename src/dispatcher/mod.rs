//! # Dispatcher Module
//!
//! Coroutine-based handler dispatch.
//!
//! Every bound handler runs in its own `may` coroutine and receives requests
//! over an MPSC channel; each request carries a reply channel for its
//! response. A handler that panics answers `500` and keeps serving.
//!
//! ```rust,ignore
//! let mut dispatcher = Dispatcher::new();
//! unsafe {
//!     dispatcher.register_handler("get_recording", |req: HandlerRequest| {
//!         let id = req.get_path_param("id").cloned().unwrap_or_default();
//!         req.respond(HandlerResponse::json(200, json!({ "id": id })));
//!     });
//! }
//! ```
//!
//! Operations the contract declares but no handler is bound to are answered
//! `501` by the server, never by the dispatcher.

mod core;

pub use core::{Dispatcher, HandlerInputs, HandlerRequest, HandlerResponse, HandlerSender};
