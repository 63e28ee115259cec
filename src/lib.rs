pub mod admission;
pub mod analysis;
pub mod api;
pub mod app;
pub mod cli;
pub mod config;
pub mod fetch;
pub mod global;
pub mod report;
pub mod thumbnails;
