//! Property-based tests for determinism and dispatch ordering

mod determinism;
