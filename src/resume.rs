use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::fs as async_fs;

use crate::delegate::Channel;
use crate::error::{ReleaseError, Result};
use crate::version::ReleaseVersion;

const CHECKPOINT_FILE: &str = "nightship-state.json";

/// Working directory for one in-progress release.
///
/// Only existence and cleanup are managed here. The contents belong to the
/// component-release delegate, apart from the coordinator's checkpoint file.
#[derive(Debug)]
pub struct ResumeDir {
    path: PathBuf,
    resumed: bool,
}

impl ResumeDir {
    /// Reuse `path` from an earlier attempt, or create a fresh temporary directory.
    pub async fn acquire(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let meta = async_fs::metadata(path)
                    .await
                    .map_err(|_| ReleaseError::ResumeDirMissing(path.to_path_buf()))?;
                if !meta.is_dir() {
                    return Err(ReleaseError::ResumeDirMissing(path.to_path_buf()));
                }
                let path = async_fs::canonicalize(path)
                    .await
                    .with_context(|| format!("failed to resolve {}", path.display()))?;
                tracing::info!("resume: reusing {}", path.display());
                Ok(Self {
                    path,
                    resumed: true,
                })
            }
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("nightship-")
                    .tempdir()
                    .context("failed to create resume directory")?;
                let path = dir.keep();
                tracing::info!("resume: created {}", path.display());
                Ok(Self {
                    path,
                    resumed: false,
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    /// Finish with the directory. It is removed only after a normal completion;
    /// otherwise it is left in place and its path returned for the operator.
    pub async fn release(self, normal_completion: bool) -> Result<Option<PathBuf>> {
        if normal_completion {
            self.remove().await?;
            Ok(None)
        } else {
            tracing::warn!("resume: keeping {} for a later --resume", self.path.display());
            Ok(Some(self.path))
        }
    }

    /// Delete the directory. On error it is still owned here, so it can be reported.
    pub async fn remove(&self) -> Result<()> {
        async_fs::remove_dir_all(&self.path)
            .await
            .with_context(|| format!("failed to remove {}", self.path.display()))?;
        tracing::info!("resume: removed {}", self.path.display());
        Ok(())
    }

    pub async fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let file = self.path.join(CHECKPOINT_FILE);
        let content = match async_fs::read_to_string(&file).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::from(e)
                    .context(format!("failed to read {}", file.display()))
                    .into());
            }
        };
        let checkpoint = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", file.display()))?;
        Ok(Some(checkpoint))
    }

    pub async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let file = self.path.join(CHECKPOINT_FILE);
        let body =
            serde_json::to_string_pretty(checkpoint).context("failed to encode checkpoint")?;
        async_fs::write(&file, body)
            .await
            .with_context(|| format!("failed to write {}", file.display()))?;
        tracing::debug!("resume: checkpoint stage={}", checkpoint.stage);
        Ok(())
    }
}

/// Pipeline stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    CommitResolved,
    PreconditionsChecked,
    VersionResolved,
    Tagged,
    ComponentsReleased,
    CleanedUp,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::CommitResolved => "commit_resolved",
            Stage::PreconditionsChecked => "preconditions_checked",
            Stage::VersionResolved => "version_resolved",
            Stage::Tagged => "tagged",
            Stage::ComponentsReleased => "components_released",
            Stage::CleanedUp => "cleaned_up",
        };
        f.write_str(name)
    }
}

/// What the coordinator has settled for the release held in a resume directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub commit: String,
    pub version: ReleaseVersion,
    pub channel: Channel,
    /// Last completed stage. A resumed run skips the delegate once components are released.
    pub stage: Stage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn fresh_directory_removed_on_success() {
        let dir = ResumeDir::acquire(None).await.unwrap();
        let path = dir.path().to_path_buf();
        assert!(path.is_dir());
        assert!(!dir.is_resumed());
        assert_eq!(dir.release(true).await.unwrap(), None);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn directory_kept_on_failure() {
        let dir = ResumeDir::acquire(None).await.unwrap();
        let path = dir.path().to_path_buf();
        std::fs::write(path.join("partial.bin"), b"half").unwrap();
        let kept = dir.release(false).await.unwrap();
        assert_eq!(kept.as_deref(), Some(path.as_path()));
        assert!(path.join("partial.bin").exists());
        std::fs::remove_dir_all(path).unwrap();
    }

    #[tokio::test]
    async fn failed_removal_keeps_directory_reportable() {
        let dir = ResumeDir::acquire(None).await.unwrap();
        let path = dir.path().to_path_buf();
        std::fs::remove_dir(&path).unwrap();
        std::fs::write(&path, b"not a directory").unwrap();

        assert!(dir.remove().await.is_err());
        assert_eq!(dir.release(false).await.unwrap(), Some(path.clone()));
        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn missing_resume_path_is_a_precondition_error() {
        let td = TempDir::new().unwrap();
        let err = ResumeDir::acquire(Some(td.path().join("gone").as_path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::ResumeDirMissing(_)));
    }

    #[tokio::test]
    async fn checkpoint_survives_reacquire() {
        let td = TempDir::new().unwrap();
        let dir = ResumeDir::acquire(Some(td.path())).await.unwrap();
        assert!(dir.is_resumed());
        assert_eq!(dir.load_checkpoint().await.unwrap(), None);

        let checkpoint = Checkpoint {
            commit: "abc123".into(),
            version: "v20240101.0".parse().unwrap(),
            channel: Channel::Nightly,
            stage: Stage::Tagged,
        };
        dir.save_checkpoint(&checkpoint).await.unwrap();

        let again = ResumeDir::acquire(Some(td.path())).await.unwrap();
        assert_eq!(again.load_checkpoint().await.unwrap(), Some(checkpoint));
    }

    #[test]
    fn stages_are_ordered() {
        assert!(Stage::Tagged > Stage::VersionResolved);
        assert!(Stage::ComponentsReleased < Stage::CleanedUp);
    }
}
