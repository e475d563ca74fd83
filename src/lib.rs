pub mod cleaner;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod database;
pub mod date_parser;
pub mod error;
pub mod extract;
pub mod loader;
pub mod pipeline;
pub mod schema;

pub use error::{ErrorKind, EtlError, Result};
pub use schema::{RecordSet, Value};
