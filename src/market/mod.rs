// src/market/mod.rs
pub mod classifier;
pub mod context;
pub mod stats;
