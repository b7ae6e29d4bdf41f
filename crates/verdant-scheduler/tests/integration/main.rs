//! Integration tests for verdant-scheduler
//!
//! Uses wiremock to simulate carbon intensity endpoints and verifies the
//! provider chain, forecast tagging and end-to-end task scheduling.

mod common;

mod test_carbon_providers;
mod test_scheduling;
