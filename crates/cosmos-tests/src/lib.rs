//! Integration test suite for Cosmos.
//!
//! Tests here drive the store, the broadcast propagator, the redundant
//! network and the restore scanner together on synthetic chains whose
//! headers carry real Merkle roots.

pub mod helpers;
