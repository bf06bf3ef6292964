//! arfaced: frame-processing service for the arface AR face filter.
//!
//! Reads tracker callbacks and mode toggles as JSON lines on stdin, runs them
//! through the recognition pipeline on a dedicated engine thread, and writes
//! one JSON result per line (including overlay attach/detach events) to stdout.

pub mod config;
pub mod engine;
pub mod loader;
pub mod scene;
pub mod session;
