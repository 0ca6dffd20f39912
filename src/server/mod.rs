// src/server/mod.rs

pub mod app_interface;
pub mod config;
pub mod engine;
pub mod file_catalog;
pub mod registry;
pub mod router;
pub mod session;
pub mod storage;
pub mod transfer;
