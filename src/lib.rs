pub mod allocator;
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod rating;
pub mod reputation;
pub mod roster;
pub mod verification;
