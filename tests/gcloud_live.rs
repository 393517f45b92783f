//! Integration test: run the read-only checks against the real
//! `gcloud` CLI.
//!
//! Requires an authenticated `gcloud` and `GOOGLE_CLOUD_PROJECT`.
//! Skipped in normal `cargo test` runs unless the `integration`
//! feature is enabled.

#![cfg(feature = "integration")]

use onager::provision::Provisioner;
use onager::{ComputeEngine, System};

#[test]
fn gcloud_is_ready() {
    let project = std::env::var("GOOGLE_CLOUD_PROJECT").expect("GOOGLE_CLOUD_PROJECT not set");
    let engine = ComputeEngine::new(&System, &project, "us-central1-a");

    engine.check_prerequisites().expect("gcloud not ready");
    assert!(
        engine
            .get_instance("onager-integration-does-not-exist")
            .expect("describe failed")
            .is_none()
    );
}
