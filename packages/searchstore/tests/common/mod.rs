//! Common test utilities for searchstore
//!
//! Shared fixtures for the integration tests: an in-memory engine wired to
//! a router, alias layouts, and document builders.

#![allow(dead_code)]

mod fixtures;

pub use fixtures::*;
