// src/client/mod.rs

pub mod app_interface;
pub mod engine;
