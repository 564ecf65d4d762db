pub mod config;
pub mod error;
pub mod index;
pub mod inspector;
pub mod model;
pub mod output;
pub mod provider;
pub mod query;
pub mod resolver;
pub mod scanner;
pub mod server;
pub mod session;
pub mod snapshot;
pub mod workspace;
