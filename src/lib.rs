pub mod api;
pub mod app;
pub mod chunker;
pub mod config;
pub mod domain;
pub mod error;
pub mod locations;
pub mod metadata;
pub mod output;
pub mod pairing;
pub mod prompt;
pub mod scan;
pub mod upload;
