//! Driver for the debate engine.
//!
//! Wires [`coordination::debate`] to the outside world: an HTTP Generation
//! Port, an offline mock port, a JSON file session store, environment/TOML
//! configuration, and the terminal rendering used by the CLI.

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod driver;
pub mod http_port;
pub mod mock_port;
pub mod render;
pub mod store;

pub use config::AppConfig;
pub use driver::{Driver, RunMode};
pub use http_port::HttpGenerationPort;
pub use mock_port::MockGenerationPort;
pub use store::FileSessionStore;
