// src/common/mod.rs

pub mod error;
pub mod frame;
pub mod protocol;
