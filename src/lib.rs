pub mod assembler;
pub mod config;
pub mod directive;
pub mod error;
pub mod generator;
pub mod models;
pub mod operations;
pub mod parser;
pub mod resolver;
pub mod source;
pub mod store;
pub mod types;
