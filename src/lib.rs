pub mod archive;
pub mod config;
pub mod debug;
pub mod framework;
pub mod host;
pub mod module;
pub mod package;
pub mod runtime;
pub mod server;
