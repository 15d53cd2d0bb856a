use anyhow::{Context, Result, bail};
use octocrab::Octocrab;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use urlencoding::encode as url_encode;

use crate::coordinator::BranchSource;
use crate::tags::TagStore;
use crate::version::ReleaseVersion;

/// Build an authenticated Octocrab client using the token.
pub fn client(token: &str) -> Result<Octocrab> {
    Octocrab::builder()
        .personal_token(token.to_string())
        .build()
        .context("failed to build GitHub client")
}

#[derive(Debug, Deserialize)]
struct GitRef {
    #[serde(rename = "ref")]
    reference: String,
    object: GitObject,
}

#[derive(Debug, Deserialize)]
struct GitObject {
    sha: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct AnnotatedTag {
    object: GitObject,
}

#[derive(Debug, Serialize)]
struct CreateRefPayload<'a> {
    #[serde(rename = "ref")]
    reference: &'a str,
    sha: &'a str,
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    default_branch: String,
}

/// One GitHub repository, used for branch lookups and as the authoritative tag store.
pub struct GitHubRepo {
    gh: Octocrab,
    owner: String,
    name: String,
}

impl GitHubRepo {
    pub fn new(gh: Octocrab, owner: &str, name: &str) -> Self {
        Self {
            gh,
            owner: owner.to_string(),
            name: name.to_string(),
        }
    }

    fn route(&self, tail: &str) -> String {
        format!("repos/{}/{}/{}", self.owner, self.name, tail)
    }

    async fn find_ref(&self, refpath: &str) -> Result<Option<GitRef>> {
        tracing::debug!("github: GET git/ref/{}", refpath);
        match self
            .gh
            .get::<serde_json::Value, _, _>(
                self.route(&format!("git/ref/{}", refpath)),
                None::<&()>,
            )
            .await
        {
            // A prefix match comes back as a list of refs; none of them is `refpath`.
            Ok(serde_json::Value::Array(_)) => Ok(None),
            Ok(value) => serde_json::from_value(value)
                .map(Some)
                .with_context(|| format!("unexpected response for {}", refpath)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err).with_context(|| {
                format!(
                    "failed to look up {} in {}/{}",
                    refpath, self.owner, self.name
                )
            }),
        }
    }

    /// Follow annotated tag objects down to the commit they name.
    async fn peel(&self, mut object: GitObject) -> Result<String> {
        while object.kind == "tag" {
            let tag: AnnotatedTag = self
                .gh
                .get(self.route(&format!("git/tags/{}", object.sha)), None::<&()>)
                .await
                .with_context(|| format!("failed to read annotated tag {}", object.sha))?;
            object = tag.object;
        }
        if object.kind != "commit" {
            bail!("ref points to a {} ({}), not a commit", object.kind, object.sha);
        }
        Ok(object.sha)
    }
}

impl TagStore for GitHubRepo {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn lookup(&self, version: &ReleaseVersion) -> Result<Option<String>> {
        match self.find_ref(&format!("tags/{}", version)).await? {
            // git/ref falls back to prefix matches on some API versions
            Some(r) if r.reference == format!("refs/tags/{}", version) => {
                Ok(Some(self.peel(r.object).await?))
            }
            _ => Ok(None),
        }
    }

    async fn create(&self, version: &ReleaseVersion, commit: &str) -> Result<()> {
        let reference = format!("refs/tags/{}", version);
        let payload = CreateRefPayload {
            reference: &reference,
            sha: commit,
        };
        tracing::debug!("github: POST git/refs ref={} sha={}", reference, commit);
        let created: GitRef = self
            .gh
            .post(self.route("git/refs"), Some(&payload))
            .await
            .with_context(|| {
                format!(
                    "failed to create {} in {}/{}",
                    reference, self.owner, self.name
                )
            })?;
        if !created.object.sha.eq_ignore_ascii_case(commit) {
            bail!(
                "GitHub created {} at {}, expected {}",
                created.reference,
                created.object.sha,
                commit
            );
        }
        Ok(())
    }

    async fn version_tags(&self) -> Result<Vec<String>> {
        tracing::debug!("github: GET git/matching-refs/tags/v");
        let refs: Vec<GitRef> = self
            .gh
            .get(self.route("git/matching-refs/tags/v"), None::<&()>)
            .await
            .with_context(|| format!("failed to list tags of {}/{}", self.owner, self.name))?;
        Ok(refs
            .into_iter()
            .filter_map(|r| r.reference.strip_prefix("refs/tags/").map(str::to_string))
            .collect())
    }
}

impl BranchSource for GitHubRepo {
    async fn branch_head(&self, branch: &str) -> Result<String> {
        let encoded = branch
            .split('/')
            .map(|seg| url_encode(seg).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let Some(found) = self.find_ref(&format!("heads/{}", encoded)).await? else {
            bail!("branch {} not found in {}/{}", branch, self.owner, self.name);
        };
        if found.reference != format!("refs/heads/{}", branch) {
            bail!("branch {} not found in {}/{}", branch, self.owner, self.name);
        }
        Ok(found.object.sha)
    }

    async fn default_branch(&self) -> Result<String> {
        let info: RepoInfo = self
            .gh
            .get(format!("repos/{}/{}", self.owner, self.name), None::<&()>)
            .await
            .with_context(|| format!("failed to load {}/{}", self.owner, self.name))?;
        Ok(info.default_branch)
    }
}

fn is_not_found(err: &octocrab::Error) -> bool {
    if let octocrab::Error::GitHub { source, .. } = err {
        return source.status_code == StatusCode::NOT_FOUND;
    }
    false
}
