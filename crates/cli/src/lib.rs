//! Library interface for the searchkeeper CLI
//!
//! Manifest loading and output rendering live here so they can be tested
//! without going through the binary.

pub mod manifest;
pub mod output;

pub use anyhow::Result;
pub use manifest::Manifest;
