use std::path::Path;

use anyhow::Context;

use crate::config::{Credentials, ReleaseConfig, ReleaseFlags, load_file_config};
use crate::error::Result;
use crate::infer::{RepoContext, build_context, repo_root};

/// Everything settled before the coordinator starts.
#[derive(Debug)]
pub struct Preflight {
    pub credentials: Credentials,
    pub config: ReleaseConfig,
    pub repo: RepoContext,
}

/// Check credentials, discover the repository, and merge configuration.
/// Nothing here touches the network or mutates state.
pub async fn run_preflight(flags: ReleaseFlags, cwd: &Path) -> Result<Preflight> {
    tracing::debug!("preflight: start");
    let credentials = Credentials::from_env()?;

    let root = repo_root()
        .await
        .context("not inside a git repository")?;
    let file = load_file_config(&root).await?;
    let config = ReleaseConfig::resolve(flags, file, cwd)?;
    let repo = build_context(root, config.owner.as_deref(), config.name.as_deref())
        .await
        .context("failed to determine the GitHub repository")?;

    tracing::debug!(
        "preflight: done repo={}/{} root={} tuf_dir={}",
        repo.repo_owner,
        repo.repo_name,
        repo.repo_root.display(),
        config.tuf_dir.display()
    );
    Ok(Preflight {
        credentials,
        config,
        repo,
    })
}
