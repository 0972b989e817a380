pub mod cli;
pub mod config;
pub mod flow;
pub mod lifecycle;
pub mod placement;
pub mod runtime;
pub mod server;
pub mod topology;
