// src/lib.rs

//! Reward Cache Library
//!
//! Fetches Path of Exile quest and vendor reward tables, normalizes them into
//! per-language records and keeps them in an on-disk cache that survives
//! network failures and upstream page changes.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
