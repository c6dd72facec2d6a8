//! Portfolio Realtime Hub — Library Root
//!
//! Subscribes to a hosted change-data-capture feed, normalizes row
//! changes into typed events and fans them out to local listeners keyed
//! by logical channel. Re-exports all modules for integration tests and
//! benchmarks.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod usecases;
