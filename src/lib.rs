#![deny(rustdoc::bare_urls)]

#[macro_use]
extern crate tracing;

pub mod annotations;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod filter;
pub mod resources;
pub mod services;
pub mod source;
pub mod store;
pub mod template;

pub use config::SourceConfig;
pub use endpoint::Endpoint;
pub use error::SourceError;
pub use source::HTTPProxySource;
