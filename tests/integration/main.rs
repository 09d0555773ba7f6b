//! Integration tests for the harvester
//!
//! These tests use wiremock to stand in for the provider and run complete
//! harvests end-to-end against it.

mod common;
mod harvest_tests;
mod import_tests;
