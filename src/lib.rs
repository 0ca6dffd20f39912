// src/lib.rs

pub mod common;
pub mod client;
pub mod server;
