//! # stagebox-orchestrator
//!
//! Upgrade transactions over the stagebox container lifecycle.
//!
//! - [`Orchestrator`](orchestrator::Orchestrator): checks preconditions and
//!   sequences create, start, the in-container upgrade steps, and the final
//!   disposition of the container.
//! - [`ContainerGuard`](session::ContainerGuard): owns the session container
//!   and cleans it up on failure.
//! - [`UpdateImage`](image::UpdateImage): the validated update bundle.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use stagebox_common::config::StageboxConfig;
//! use stagebox_common::types::UpgradeMode;
//! use stagebox_core::host::SystemHost;
//! use stagebox_orchestrator::orchestrator::{Orchestrator, UpgradeOptions};
//! use stagebox_runtime::manager::ContainerManager;
//!
//! let manager = ContainerManager::new(Arc::new(SystemHost::new()), StageboxConfig::default());
//! let outcome = Orchestrator::new(&manager)
//!     .run(UpgradeOptions::new(UpgradeMode::InPlace).skip_verify(true));
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod image;
pub mod orchestrator;
pub mod session;
