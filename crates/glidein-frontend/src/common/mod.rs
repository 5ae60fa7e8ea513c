pub mod cli;
pub mod config;
pub mod error;
pub mod parser;
pub mod placeholders;
pub mod setup;
pub mod timeutils;
