//! Idempotent single-instance deployments on Google Compute Engine.
//!
//! Onager takes a project with a backend and a frontend, provisions
//! a Compute Engine VM for it, and leaves the VM serving the
//! application through Docker Compose behind Nginx with a Let's
//! Encrypt certificate. Running it again converges on the same
//! state instead of creating duplicates.
//!
//! # Overview
//!
//! A deployment is described by a [`Stack`] and driven by a
//! [`Pipeline`]:
//!
//! - [`App`]s describe the Docker Compose services (build context,
//!   env files, port, healthcheck)
//! - A [`Proxy`] describes the Nginx routes in front of them
//! - A [`DeploymentTarget`] names the project, zone, instance,
//!   bucket and domain
//! - A [`Provisioner`](provision::Provisioner) creates cloud
//!   resources (e.g. [`ComputeEngine`])
//!
//! # Architecture
//!
//! Work is split between the operator's machine and the instance:
//!
//! 1. **Local** - check tools and files, ensure the firewall rules
//!    and the staging bucket, package the sources (secrets are
//!    uploaded separately), create the VM with a startup script
//! 2. **Remote** - the startup script runs named stages (system
//!    packages, Docker, Nginx, artifact fetch, compose up,
//!    certificate, HTTPS) and records progress in a status file
//!
//! Every local step is checked before it runs, so an interrupted
//! run can be repeated. On the instance, each completed stage leaves
//! a marker and is skipped when the script runs again at boot.
//!
//! # Examples
//!
//! ```rust,no_run
//! use onager::{Pipeline, Stack};
//!
//! fn main() -> anyhow::Result<()> {
//!     Pipeline::new(Stack::web()).run()?;
//!     Ok(())
//! }
//! ```
//!
//! Then, from the project root:
//!
//! ```sh
//! # Preview the generated files
//! onager deploy demo demo.example.com ops@example.com --dry-run
//!
//! # Deploy and wait for the bootstrap to finish
//! onager deploy demo demo.example.com ops@example.com --wait
//!
//! # Once DNS points at the instance, if HTTPS is not live yet
//! onager certificate demo demo.example.com ops@example.com
//!
//! # Tear the instance down
//! onager destroy demo
//! ```
//!
//! ## Custom stack
//!
//! ```rust,no_run
//! use onager::{App, Pipeline, Proxy, Stack};
//!
//! fn main() -> anyhow::Result<()> {
//!     let api = App::new("api")
//!         .context("api")
//!         .env_file("api/.env")
//!         .port(8080)
//!         .healthcheck("curl -f http://localhost:8080/health");
//!
//!     let proxy = Proxy::new()
//!         .route("/", 8080)
//!         .security_headers();
//!
//!     let stack = Stack::new()
//!         .app(api)
//!         .proxy(proxy)
//!         .source("api")
//!         .secret("api/.env");
//!
//!     Pipeline::new(stack).run()?;
//!     Ok(())
//! }
//! ```

// Allow noisy pedantic lints that don't add value for a
// deployment tool crate.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod app;
pub mod artifact;
pub mod bootstrap;
pub mod certificate;
pub mod cmd;
pub mod compose;
pub mod config;
pub mod dns;
pub mod error;
pub mod nginx;
pub mod pipeline;
pub mod preflight;
pub mod provision;
pub mod proxy;
pub mod ssh;
pub mod stack;
pub mod units;
pub mod workflow;

pub use app::App;
pub use artifact::{ArtifactBundle, ExcludeSet, StagedArtifact, Staging};
pub use bootstrap::{BootstrapPlan, Stage};
pub use cmd::{CommandRunner, System};
pub use config::DeploymentTarget;
pub use error::{DeployError, DeployResult, ErrorClass};
pub use pipeline::Pipeline;
pub use provision::gce::ComputeEngine;
pub use proxy::Proxy;
pub use stack::Stack;
