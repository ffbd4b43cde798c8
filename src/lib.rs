// src/lib.rs

//! AWS Exporter Library

pub mod config;
pub mod error;
pub mod expr;
pub mod lambda;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod testing;
