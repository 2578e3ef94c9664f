pub mod alert;
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod engine;
pub mod entities;
pub mod error;
pub mod external;
pub mod feed;
pub mod local_store;
pub mod memory;
pub mod router;
pub mod session;
pub mod subscription;
