//! Integration tests for the GBS sync controller.
//!
//! These tests drive the controller against the simulated board through its
//! public API, exercising the lock loop, the watcher and the runner together.

mod integration;
