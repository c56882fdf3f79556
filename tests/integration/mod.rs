//! Integration Tests Module
//!
//! Integration tests for the Chronicle Desktop analysis pipeline.
//! Tests cover the SQLite queue store, the orchestrator end-to-end with fake
//! backends, and the subprocess pipe protocol.

// Queue store claim/complete/fail semantics
mod queue_store_test;

// Orchestrator cycles, full scans and backend failure handling
mod orchestrator_test;

// Subprocess executor against real child processes (unix only)
#[cfg(unix)]
mod subprocess_test;
