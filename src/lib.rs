pub mod api;
pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod output;
pub mod path;
pub mod recipe;
pub mod retrieval;
pub mod state;
pub mod store;
pub mod tui;
