// src/lib.rs

//! arXiv Digest Library
//!
//! Accumulates newly published arXiv papers into a local staging store and
//! periodically delivers a ranked, summarized digest by email.

pub mod error;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
