//! # ExHash Configuration Module
//!
//! This module centralizes all configuration constants for ExHash. Constants
//! are grouped by their functional area and interdependencies are documented
//! and enforced through compile-time assertions.
//!
//! ## Why Centralization?
//!
//! The page geometry, directory capacity, and file header layout all derive
//! from a small set of values that must agree with each other and with the
//! on-disk format. Co-locating them with compile-time checks prevents a
//! change to one from silently breaking another.
//!
//! ## Module Organization
//!
//! - [`constants`]: All numeric configuration values with dependency
//!   documentation

pub mod constants;
pub use constants::*;
