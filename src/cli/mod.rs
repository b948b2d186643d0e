//! # CLI Module
//!
//! ```bash
//! # run the server (config file, then MEDIAGATE_* variables, then flags)
//! mediagate serve --config config/config.yaml --port 8888
//!
//! # development: answer every operation with its decoded inputs
//! mediagate serve --contract doc/api.yml --echo
//!
//! # load the contract, reject ambiguous routes, print the route table
//! mediagate check --contract doc/api.yml
//! ```

mod commands;

pub use commands::{resolve_config, route_table, run_cli, Cli, Commands};
