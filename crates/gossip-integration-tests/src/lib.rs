//! Integration test crate for the onion-gossip engine.
//!
//! This crate exists solely to run multi-node tests over the in-memory network.
//! It has no public API - all functionality is in the test modules.

#![forbid(unsafe_code)]
