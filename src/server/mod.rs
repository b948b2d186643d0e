//! # Server Module
//!
//! The HTTP shell on top of `may_minihttp`. Each connection is served in its
//! own coroutine by [`AppService`], which runs the access gate, the contract
//! viewer endpoints, the contract routes (validation, body decoding and
//! dispatch) and finally the static roots.

pub mod docs;
pub mod http_server;
pub mod request;
pub mod response;
pub mod service;

pub use http_server::{HttpServer, ServerHandle};
pub use request::{decode_param_value, decode_route_params, RequestHead};
pub use service::{route_key, AppService};
