use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use shedutils::{CommandRunner, CommandSpec, Retrier};
use tracing::Instrument;

use crate::{ShedError, ShedResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Mounts files onto directories through loop devices.
#[async_trait]
pub trait LoopMounter: Send + Sync {
    /// Mounts the filesystem in `file` onto `destination`.
    async fn mount_file(&self, file: &Path, destination: &Path) -> ShedResult<()>;

    /// Unmounts `path` and detaches its loop device.
    ///
    /// Succeeds if `path` turns out not to be a mountpoint.
    async fn unmount(&self, path: &Path) -> ShedResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Loop mounts ext4 backing files with `mount` and `umount`.
pub struct Loop {
    runner: Arc<dyn CommandRunner>,
    retrier: Retrier,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Loop {
    /// Creates a mounter. Unmounts are attempted under `retrier`.
    pub fn new(runner: Arc<dyn CommandRunner>, retrier: Retrier) -> Self {
        Self { runner, retrier }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl LoopMounter for Loop {
    async fn mount_file(&self, file: &Path, destination: &Path) -> ShedResult<()> {
        let span = tracing::info_span!(
            "mount-file",
            file = %file.display(),
            destination = %destination.display()
        );

        async {
            tracing::info!("start");

            let mount = CommandSpec::new("mount").args([
                "-n".to_string(),
                "-t".to_string(),
                "ext4".to_string(),
                "-o".to_string(),
                "loop,noatime".to_string(),
                file.display().to_string(),
                destination.display().to_string(),
            ]);

            if let Err(err) = self.runner.run(&mount).await {
                tracing::error!(output = err.command_output().unwrap_or_default(), "mounting");
                return Err(ShedError::from(err).context("mounting file"));
            }

            tracing::info!("finish");
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn unmount(&self, path: &Path) -> ShedResult<()> {
        let span = tracing::info_span!("unmount", path = %path.display());

        async {
            let mounts = tokio::fs::read_to_string("/proc/mounts")
                .await
                .unwrap_or_default();
            tracing::info!(mounts, "start");

            let umount = CommandSpec::new("umount")
                .arg("-d")
                .arg(path.display().to_string());
            let mountpoint = CommandSpec::new("mountpoint").arg(path.display().to_string());

            let runner = &self.runner;
            let umount = &umount;
            let mountpoint = &mountpoint;

            let result = self
                .retrier
                .run(|| async move {
                    match runner.run(umount).await {
                        Ok(_) => Ok(()),
                        Err(err) => {
                            if runner.run(mountpoint).await.is_err() {
                                tracing::debug!("not a mountpoint, treating as unmounted");
                                return Ok(());
                            }
                            tracing::error!(
                                output = err.command_output().unwrap_or_default(),
                                "error unmounting"
                            );
                            Err(err)
                        }
                    }
                })
                .await;

            if let Err(err) = result {
                tracing::error!(error = %err, "unmounting");
                return Err(
                    ShedError::from(err).context(format!("unmounting file ({})", path.display()))
                );
            }

            tracing::info!("finish");
            Ok(())
        }
        .instrument(span)
        .await
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
