use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};
use git2::Repository;
use regex::Regex;

#[derive(Debug, Clone)]
pub struct RepoContext {
    pub repo_root: PathBuf,
    pub repo_owner: String,
    pub repo_name: String,
}

pub async fn repo_root() -> Result<PathBuf> {
    tracing::trace!("infer: discovering repo root");
    tokio::task::spawn_blocking(|| {
        let repo = Repository::discover(".")?;
        Ok::<_, anyhow::Error>(repo.workdir().unwrap_or(repo.path()).to_path_buf())
    })
    .await
    .map_err(|e| anyhow!("repo_root task join error: {}", e))?
}

/// Commit checked out in the repository at `root`.
pub async fn head_commit(root: &Path) -> Result<String> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let repo = Repository::discover(&root)?;
        let commit = repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .map_err(|e| anyhow!("{} has no HEAD commit: {}", root.display(), e))?;
        Ok::<_, anyhow::Error>(commit.id().to_string())
    })
    .await
    .map_err(|e| anyhow!("head_commit task join error: {}", e))?
}

pub async fn infer_remote(root: &Path) -> Result<(String, String, String)> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        // returns (owner, name, url)
        let repo = Repository::discover(root)?;
        let remotes = repo.remotes()?;
        let chosen = remotes
            .iter()
            .flatten()
            .find(|r| *r == "origin")
            .or_else(|| remotes.iter().flatten().next())
            .map(str::to_string);
        let name = chosen.ok_or_else(|| anyhow!("no git remotes found"))?;
        let remote = repo.find_remote(&name)?;
        let url = remote
            .url()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("remote has no URL"))?;
        let (owner, repo_name) = parse_github_url(&url)?;
        Ok::<_, anyhow::Error>((owner, repo_name, url))
    })
    .await
    .map_err(|e| anyhow!("infer_remote task join error: {}", e))?
}

/// Split a GitHub SSH or HTTPS remote URL into owner and repository name.
pub fn parse_github_url(url: &str) -> Result<(String, String)> {
    let ssh = Regex::new(r"^git@github\.com:(?P<owner>[^/]+)/(?P<repo>[^/]+?)(?:\.git)?$")?;
    let https =
        Regex::new(r"^https?://github\.com/(?P<owner>[^/]+)/(?P<repo>[^/]+?)(?:\.git)?/?$")?;
    if let Some(c) = ssh.captures(url).or_else(|| https.captures(url)) {
        return Ok((c["owner"].to_string(), c["repo"].to_string()));
    }
    bail!("unsupported remote URL (expected GitHub): {}", url)
}

pub async fn build_context(
    root: PathBuf,
    owner: Option<&str>,
    name: Option<&str>,
) -> Result<RepoContext> {
    let (owner, name) = match (owner, name) {
        (Some(owner), Some(name)) => (owner.to_string(), name.to_string()),
        _ => {
            let (o, n, _url) = infer_remote(&root).await?;
            (owner.map(str::to_string).unwrap_or(o), name.map(str::to_string).unwrap_or(n))
        }
    };
    tracing::info!("infer: ok owner={} repo={} root={}", owner, name, root.display());
    Ok(RepoContext {
        repo_root: root,
        repo_owner: owner,
        repo_name: name,
    })
}
