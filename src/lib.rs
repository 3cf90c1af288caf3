//! Core library for blend-playlist-sync
pub mod api;
pub mod app;
pub mod bridge;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod page;
pub mod sync;
