use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use git2::build::CheckoutBuilder;
use git2::{Oid, Repository};
use tempfile::TempDir;
use tokio::process::Command;

use crate::infer::head_commit;

/// Source tree whose HEAD is exactly the commit being released.
///
/// Only [`Checkout::pin`] hands these out, and a pinned tree already matches its
/// commit, so the release logic is redirected at most once per invocation.
#[derive(Debug)]
pub struct PinnedSource {
    root: PathBuf,
    commit: String,
    redirected: bool,
    // Dropped with the source; removes the temporary checkout on every exit path.
    _checkout: Option<TempDir>,
}

impl PinnedSource {
    fn in_place(root: &Path, commit: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            commit: commit.to_string(),
            redirected: false,
            _checkout: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn commit(&self) -> &str {
        &self.commit
    }

    pub fn is_redirected(&self) -> bool {
        self.redirected
    }
}

pub(crate) trait Checkout {
    /// Produce a source tree at `commit`, reusing the current one if it already matches.
    async fn pin(&self, commit: &str) -> Result<PinnedSource>;
}

/// Pins against the operator's local git repository.
pub struct GitCheckout {
    repo_root: PathBuf,
}

impl GitCheckout {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
        }
    }

    async fn has_commit(&self, commit: &str) -> Result<bool> {
        let root = self.repo_root.clone();
        let commit = commit.to_string();
        tokio::task::spawn_blocking(move || {
            let repo = Repository::discover(root)?;
            let oid = Oid::from_str(&commit)?;
            Ok::<_, anyhow::Error>(repo.find_commit(oid).is_ok())
        })
        .await
        .map_err(|e| anyhow!("has_commit task join error: {}", e))?
    }

    async fn fetch_origin(&self) -> Result<()> {
        tracing::info!("bootstrap: fetching origin for missing commit");
        let status = Command::new("git")
            .arg("-C")
            .arg(&self.repo_root)
            .arg("fetch")
            .arg("--quiet")
            .arg("origin")
            .status()
            .await?;
        if !status.success() {
            bail!("git fetch origin failed with status: {}", status);
        }
        Ok(())
    }

    /// Make sure the local repository holds `commit`, fetching once if needed.
    pub async fn ensure_commit(&self, commit: &str) -> Result<()> {
        if self.has_commit(commit).await? {
            return Ok(());
        }
        self.fetch_origin().await?;
        if !self.has_commit(commit).await? {
            bail!("commit {} not found locally or on origin", commit);
        }
        Ok(())
    }
}

impl Checkout for GitCheckout {
    async fn pin(&self, commit: &str) -> Result<PinnedSource> {
        let running = head_commit(&self.repo_root).await?;
        if running.eq_ignore_ascii_case(commit) {
            tracing::debug!("bootstrap: running source already at {}", commit);
            return Ok(PinnedSource::in_place(&self.repo_root, commit));
        }

        tracing::info!(
            "bootstrap: running source is {} but releasing {}; pinning release logic",
            running,
            commit
        );
        self.ensure_commit(commit).await?;

        let checkout = tempfile::Builder::new()
            .prefix("nightship-src-")
            .tempdir()
            .context("failed to create checkout directory")?;
        let source = self.repo_root.clone();
        let dest = checkout.path().to_path_buf();
        let target = commit.to_string();
        tokio::task::spawn_blocking(move || checkout_commit(&source, &dest, &target))
            .await
            .map_err(|e| anyhow!("checkout task join error: {}", e))??;

        let pinned_head = head_commit(checkout.path()).await?;
        if !pinned_head.eq_ignore_ascii_case(commit) {
            bail!(
                "checkout at {} is at {}, expected {}",
                checkout.path().display(),
                pinned_head,
                commit
            );
        }
        tracing::info!(
            "bootstrap: release logic pinned to {} in {}",
            commit,
            checkout.path().display()
        );
        Ok(PinnedSource {
            root: checkout.path().to_path_buf(),
            commit: commit.to_string(),
            redirected: true,
            _checkout: Some(checkout),
        })
    }
}

fn checkout_commit(source: &Path, dest: &Path, commit: &str) -> Result<()> {
    let url = source
        .to_str()
        .ok_or_else(|| anyhow!("non UTF-8 repository path: {}", source.display()))?;
    let repo = Repository::init(dest)?;
    repo.remote_anonymous(url)?
        .fetch(
            &[
                "+refs/heads/*:refs/remotes/origin/*",
                "+refs/remotes/*:refs/remotes/mirror/*",
                "+refs/tags/*:refs/tags/*",
            ],
            None,
            None,
        )
        .with_context(|| format!("failed to fetch from {}", source.display()))?;
    let oid = Oid::from_str(commit)?;
    repo.find_commit(oid)
        .with_context(|| format!("commit {} not reachable from {}", commit, source.display()))?;
    repo.set_head_detached(oid)?;
    repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Pins in place without touching git.
    pub(crate) struct InPlace(pub PathBuf);

    impl Checkout for InPlace {
        async fn pin(&self, commit: &str) -> Result<PinnedSource> {
            Ok(PinnedSource::in_place(&self.0, commit))
        }
    }
}
