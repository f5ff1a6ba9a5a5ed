// src/exchange/mod.rs
pub mod binance;
pub mod client;
pub mod executor;
pub mod paper;
