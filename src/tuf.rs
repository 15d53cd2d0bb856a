use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::fs as async_fs;

use crate::version::ReleaseVersion;

#[derive(Debug, Deserialize)]
struct SignedTargets {
    signed: TargetsBody,
}

#[derive(Debug, Deserialize)]
struct TargetsBody {
    #[serde(default)]
    targets: BTreeMap<String, serde_json::Value>,
}

/// Report whether the committed TUF repository under `tuf_dir` already carries
/// targets for `version`.
///
/// Release targets live under a directory named after the version, e.g.
/// `/v20240101.0/flynn-host.gz`. Staged, uncommitted metadata is not consulted.
pub async fn release_exists(tuf_dir: &Path, version: &ReleaseVersion) -> Result<bool> {
    let repository = tuf_dir.join("repository");
    let targets_json = repository.join("targets.json");
    let content = match async_fs::read_to_string(&targets_json).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("tuf: no targets metadata at {}", targets_json.display());
            let target_dir = repository.join("targets").join(version.to_string());
            return async_fs::try_exists(&target_dir)
                .await
                .with_context(|| format!("failed to inspect {}", target_dir.display()));
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", targets_json.display()));
        }
    };
    let parsed: SignedTargets = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", targets_json.display()))?;

    let wanted = version.to_string();
    let found = parsed.signed.targets.keys().any(|path| {
        path.trim_start_matches('/')
            .split('/')
            .next()
            .is_some_and(|first| first == wanted)
    });
    tracing::debug!("tuf: version={} present={}", version, found);
    Ok(found)
}
