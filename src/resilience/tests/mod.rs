// src/resilience/tests/mod.rs
//! Tests for the resilience primitives around the primary store
