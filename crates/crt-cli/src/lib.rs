//! Library side of the `crt` binary: mapping configuration, the generic row
//! mapper, JSON-lines persistence and the run command.

pub mod commands;
pub mod config;
pub mod logging;
pub mod mapper;
pub mod store;
pub mod types;
