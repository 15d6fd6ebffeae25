#![allow(clippy::uninlined_format_args)]

pub mod admin;
pub mod api;
pub mod app;
pub mod assets;
pub mod config;
pub mod data;
pub mod download;
pub mod feed;
pub mod logging;
pub mod mutation;
pub mod playback;
pub mod policy;
pub mod session;
pub mod storage;
pub mod theme;
pub mod ui;
pub mod video;

#[cfg(test)]
mod testing;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
