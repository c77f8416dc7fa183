#![forbid(unsafe_code)]

pub mod batch;
pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod content;
pub mod docx;
pub mod epub;
pub mod error;
pub mod formats;
pub mod fs_store;
pub mod graphql;
pub mod logging;
pub mod paths;
pub mod pipeline;
pub mod project;
pub mod purchase;
pub mod queue;
pub mod render;
pub mod server;
pub mod tokens;

#[cfg(test)]
mod test_support;
