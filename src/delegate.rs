use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::version::ReleaseVersion;

/// Artifact stream a release is published into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stable,
    Nightly,
}

impl Channel {
    pub fn detect(nightly_flag: bool, branch: &str, default_branch: &str) -> Self {
        if nightly_flag || branch == default_branch {
            Channel::Nightly
        } else {
            Channel::Stable
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Stable => f.write_str("stable"),
            Channel::Nightly => f.write_str("nightly"),
        }
    }
}

/// Everything the component-release delegate needs for one release.
#[derive(Debug, Clone)]
pub struct ComponentRequest<'a> {
    pub bucket: &'a str,
    pub tuf_dir: &'a Path,
    pub resume_dir: &'a Path,
    pub keep: u32,
    pub channel: Channel,
    pub commit: &'a str,
    pub version: &'a ReleaseVersion,
}

impl ComponentRequest<'_> {
    /// Command-line arguments passed to the delegate. The stable channel is the
    /// delegate's default and is not spelled out.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--bucket".into(),
            self.bucket.into(),
            "--tuf-dir".into(),
            self.tuf_dir.into(),
            "--resume-dir".into(),
            self.resume_dir.into(),
            "--keep".into(),
            self.keep.to_string().into(),
        ];
        if self.channel == Channel::Nightly {
            args.push("--channel".into());
            args.push(self.channel.to_string().into());
        }
        args.push(self.commit.into());
        args.push(self.version.to_string().into());
        args
    }
}

/// Performs the build, signing, and upload of every release component.
pub(crate) trait ComponentReleaser {
    /// Release from the source tree at `source_root`, which is checked out at
    /// `request.commit`.
    async fn release(&self, source_root: &Path, request: &ComponentRequest<'_>) -> Result<()>;
}

/// Runs the delegate as a child process from the pinned source checkout.
pub struct ProcessReleaser {
    program: PathBuf,
    envs: Vec<(&'static str, String)>,
}

impl ProcessReleaser {
    pub fn new(program: &Path) -> Self {
        Self {
            program: program.to_path_buf(),
            envs: Vec::new(),
        }
    }

    pub fn with_env(mut self, envs: Vec<(&'static str, String)>) -> Self {
        self.envs = envs;
        self
    }

    /// Relative paths with a directory part are relative to the checkout;
    /// bare names go through PATH.
    pub fn program_in(&self, source_root: &Path) -> PathBuf {
        if self.program.is_relative() && self.program.components().count() > 1 {
            source_root.join(&self.program)
        } else {
            self.program.clone()
        }
    }
}

impl ComponentReleaser for ProcessReleaser {
    async fn release(&self, source_root: &Path, request: &ComponentRequest<'_>) -> Result<()> {
        let program = self.program_in(source_root);
        let args = request.args();
        tracing::info!(
            "delegate: running {} for {} at {}",
            program.display(),
            request.version,
            request.commit
        );
        tracing::debug!("delegate: cwd={} args={:?}", source_root.display(), args);
        let status = Command::new(&program)
            .current_dir(source_root)
            .envs(self.envs.iter().map(|(k, v)| (*k, v.as_str())))
            .args(&args)
            .status()
            .await
            .with_context(|| format!("failed to start {}", program.display()))?;
        if !status.success() {
            bail!("{} failed with status: {}", program.display(), status);
        }
        Ok(())
    }
}
