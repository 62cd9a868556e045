//! `shed` manages layered root filesystems for containers.
//!
//! # Overview
//!
//! Images are fetched from a registry or a local directory into a graph of copy-on-write layers,
//! and each container gets a writable layer on top of its image. Along the way shed handles:
//! - Ownership remapping for user-namespaced containers
//! - Disk quotas backed by loop-mounted filesystems
//! - Garbage collection of layers no container uses
//!
//! # Architecture
//!
//! - [`layercake`] - The layer graph, its storage drivers and its decorators
//! - [`quota`] - Backing files and loop mounts for quota-limited layers
//! - [`fetcher`] - Registry and local directory fetchers
//! - [`rootfs`] - Container layers and the [`CakeOrdinator`](rootfs::CakeOrdinator)
//! - [`config`] - Configuration types and validation
//! - [`bootstrap`] - Wiring the above together from a [`ShedConfig`](config::ShedConfig)
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use shed::{
//!     bootstrap::build_ordinator,
//!     config::ShedConfig,
//!     fetcher::parse_rootfs_url,
//!     layercake::VfsDriver,
//!     rootfs::RootfsSpec,
//! };
//! use shedutils::ProcessRunner;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ShedConfig::load("/etc/shed/config.toml").await?;
//!     let runner = Arc::new(ProcessRunner);
//!     let driver = VfsDriver::new(config.get_graph_root(), runner.clone());
//!     let ordinator = build_ordinator(&config, driver, runner).await?;
//!
//!     let spec = RootfsSpec::builder()
//!         .rootfs(parse_rootfs_url("docker:///busybox")?)
//!         .quota_size(64 * 1024 * 1024)
//!         .build();
//!     let (root, env) = ordinator.create("container-1", &spec).await?;
//!     println!("rootfs at {} with env {env:?}", root.display());
//!
//!     ordinator.destroy("container-1").await?;
//!     ordinator.gc().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod bootstrap;
pub mod config;
pub mod fetcher;
pub mod layercake;
pub mod quota;
pub mod rootfs;

pub use error::*;
