//! Core types, config, errors, and retry policy for Voice Relay.

pub mod backoff;
pub mod cache;
pub mod config;
pub mod error;
pub mod types;
