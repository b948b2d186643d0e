//! # mediagate
//!
//! The HTTP ingress of a media recording server, driven by an OpenAPI
//! contract and running on `may` coroutines.
//!
//! ## Architecture
//!
//! - **[`spec`]** - contract loading into immutable route declarations
//! - **[`router`]** - method + path matching, static segments before parameters
//! - **[`validator`]** - parameter and body checks against the declared schemas
//! - **[`pipeline`]** - content-type dispatch to the JSON, text and multipart decoders
//! - **[`upload`]** - temp files for streamed uploads, deleted unless claimed
//! - **[`dispatcher`]** / **[`typed`]** - handler coroutines reached over channels
//! - **[`events`]** - fan-out of backend events to live Server-Sent-Events clients
//! - **[`server`]**, **[`static_files`]**, **[`middleware`]** - the HTTP shell
//! - **[`app`]** - the composition root wiring all of the above
//!
//! ## Request flow
//!
//! ```text
//! access gate -> viewer endpoints -> route match -> param validation
//!   -> body decode -> body validation -> handler -> response
//! ```
//!
//! Backend collaborators publish [`events::DomainEvent`]s through the
//! [`events::EventPublisher`] handed to them once the server is live.

pub mod app;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod echo;
pub mod error;
pub mod events;
pub mod ids;
pub mod logging;
pub mod middleware;
pub mod pipeline;
pub mod router;
pub mod server;
pub mod spec;
pub mod static_files;
pub mod typed;
pub mod upload;
pub mod validator;

pub use app::{App, Running};
pub use error::{ClientError, ClientErrorKind, PipelineError, ResourceError, TransportError};
pub use spec::{load_contract, load_contract_str, Contract, PackageInfo, RouteMeta};
