// src/utils/mod.rs

//! Utility functions.

pub mod http;
