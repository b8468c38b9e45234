//! Domain Layer - Core relay types and business logic.
//!
//! This layer contains the core domain types for the deal relay with no
//! I/O. Everything here is pure Rust with serialization support.

/// Decoded wrapper and deal types.
pub mod streaming;

/// Symbol normalization and `BASE/QUOTE` keys.
pub mod symbol;

/// Tracked symbol set and delta computation.
pub mod subscription;

/// Latest price per tracked symbol.
pub mod pricing;

/// Feed session lifecycle.
pub mod session;
