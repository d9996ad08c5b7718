pub mod checks;
pub mod config;
pub mod consts;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod tasks;
