pub mod api;
pub mod auth;
pub mod client_ip;
pub mod config;
pub mod models;
pub mod storage;
