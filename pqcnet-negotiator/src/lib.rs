//! Library surface for the `pqcnet-negotiator` binary.
//!
//! The config parser and negotiation service live here so doctests and
//! integration tests can link against them while the CLI stays thin.

pub mod config;
pub mod service;
