use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use git2::{Oid, Repository};

use crate::error::{ReleaseError, Result};
use crate::version::ReleaseVersion;

/// A place where release tags live.
pub(crate) trait TagStore {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Commit the tag for `version` points at, if the tag exists.
    async fn lookup(&self, version: &ReleaseVersion) -> anyhow::Result<Option<String>>;

    /// Create the tag. Must not overwrite an existing tag.
    async fn create(&self, version: &ReleaseVersion, commit: &str) -> anyhow::Result<()>;

    /// Names of all tags that may be release versions.
    async fn version_tags(&self) -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Created,
    AlreadyPublished,
}

/// Publishes `version -> commit` to the authoritative remote store, then mirrors it locally.
pub(crate) struct TagPublisher<'a, R, L> {
    remote: &'a R,
    local: &'a L,
}

impl<'a, R: TagStore, L: TagStore> TagPublisher<'a, R, L> {
    pub(crate) fn new(remote: &'a R, local: &'a L) -> Self {
        Self { remote, local }
    }

    pub(crate) async fn publish(
        &self,
        commit: &str,
        version: &ReleaseVersion,
    ) -> Result<PublishOutcome> {
        // Check both stores before touching either, so a conflict leaves no new state.
        let remote_existing = self.existing(self.remote, commit, version).await?;
        let local_existing = self.existing(self.local, commit, version).await?;

        let mut created = false;
        if remote_existing {
            tracing::info!(
                "tags: {} already published on {} at {}",
                version,
                self.remote.name(),
                commit
            );
        } else {
            self.create_remote(commit, version).await?;
            created = true;
        }

        if !local_existing {
            self.local
                .create(version, commit)
                .await
                .map_err(|source| ReleaseError::TagPublishFailed {
                    version: version.clone(),
                    store: self.local.name(),
                    source,
                })?;
            tracing::info!("tags: created {} tag {}", self.local.name(), version);
            created = true;
        }

        Ok(if created {
            PublishOutcome::Created
        } else {
            PublishOutcome::AlreadyPublished
        })
    }

    /// Whether `store` already holds `version` at `commit`; a different commit is a conflict.
    async fn existing<S: TagStore>(
        &self,
        store: &S,
        commit: &str,
        version: &ReleaseVersion,
    ) -> Result<bool> {
        let found = store
            .lookup(version)
            .await
            .map_err(|source| ReleaseError::TagPublishFailed {
                version: version.clone(),
                store: store.name(),
                source,
            })?;
        match found {
            None => Ok(false),
            Some(existing) if same_commit(&existing, commit) => Ok(true),
            Some(existing) => Err(ReleaseError::VersionAlreadyExists {
                version: version.clone(),
                existing,
                requested: commit.to_string(),
            }),
        }
    }

    async fn create_remote(&self, commit: &str, version: &ReleaseVersion) -> Result<()> {
        let err = match self.remote.create(version, commit).await {
            Ok(()) => {
                tracing::info!("tags: created {} tag {}", self.remote.name(), version);
                return Ok(());
            }
            Err(err) => err,
        };
        // Someone may have created the tag between lookup and create.
        match self.remote.lookup(version).await {
            Ok(Some(existing)) if same_commit(&existing, commit) => {
                tracing::info!(
                    "tags: {} tag {} appeared concurrently at the same commit",
                    self.remote.name(),
                    version
                );
                Ok(())
            }
            Ok(Some(existing)) => Err(ReleaseError::VersionAlreadyExists {
                version: version.clone(),
                existing,
                requested: commit.to_string(),
            }),
            _ => Err(ReleaseError::TagPublishFailed {
                version: version.clone(),
                store: self.remote.name(),
                source: err,
            }),
        }
    }
}

fn same_commit(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Lightweight tags in a local git repository.
pub(crate) struct LocalTags {
    repo_root: PathBuf,
}

impl LocalTags {
    pub(crate) fn new(repo_root: &Path) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
        }
    }

    async fn with_repo<T, F>(&self, op: &'static str, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Repository) -> anyhow::Result<T> + Send + 'static,
    {
        let root = self.repo_root.clone();
        tokio::task::spawn_blocking(move || {
            let repo = Repository::discover(&root)
                .with_context(|| format!("failed to open repository at {}", root.display()))?;
            f(repo)
        })
        .await
        .map_err(|e| anyhow!("{} task join error: {}", op, e))?
    }
}

impl TagStore for LocalTags {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn lookup(&self, version: &ReleaseVersion) -> anyhow::Result<Option<String>> {
        let refname = format!("refs/tags/{}", version);
        self.with_repo("local tag lookup", move |repo| {
            let reference = match repo.find_reference(&refname) {
                Ok(r) => r,
                Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            let commit = reference
                .peel_to_commit()
                .with_context(|| format!("{} does not point to a commit", refname))?;
            Ok(Some(commit.id().to_string()))
        })
        .await
    }

    async fn create(&self, version: &ReleaseVersion, commit: &str) -> anyhow::Result<()> {
        let tag_name = version.to_string();
        let commit = commit.to_string();
        self.with_repo("local tag create", move |repo| {
            let oid = Oid::from_str(&commit)?;
            let object = repo
                .find_object(oid, Some(git2::ObjectType::Commit))
                .with_context(|| format!("commit {} not found locally", commit))?;
            repo.tag_lightweight(&tag_name, &object, false)?;
            Ok(())
        })
        .await
    }

    async fn version_tags(&self) -> anyhow::Result<Vec<String>> {
        self.with_repo("local tag list", |repo| {
            let names = repo.tag_names(Some("v*"))?;
            Ok(names.iter().flatten().map(str::to_string).collect())
        })
        .await
    }
}


#[cfg(test)]
mod tests {
    use git2::Signature;
    use tempfile::TempDir;

    use super::testing::MemoryTags;
    use super::*;

    fn v(s: &str) -> ReleaseVersion {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn publish_creates_remote_then_local() {
        let remote = MemoryTags::default();
        let local = MemoryTags::default();
        let outcome = TagPublisher::new(&remote, &local)
            .publish("abc123", &v("v20240101.0"))
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Created);
        assert_eq!(remote.get("v20240101.0").as_deref(), Some("abc123"));
        assert_eq!(local.get("v20240101.0").as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn publish_twice_is_a_noop() {
        let remote = MemoryTags::default();
        let local = MemoryTags::default();
        let publisher = TagPublisher::new(&remote, &local);
        publisher.publish("abc123", &v("v20240101.0")).await.unwrap();
        let again = publisher.publish("abc123", &v("v20240101.0")).await.unwrap();
        assert_eq!(again, PublishOutcome::AlreadyPublished);
        assert_eq!(remote.create_count(), 1);
        assert_eq!(local.create_count(), 1);
    }

    #[tokio::test]
    async fn publish_with_other_commit_conflicts() {
        let remote = MemoryTags::with(&[("v20240101.0", "abc123")]);
        let local = MemoryTags::default();
        let err = TagPublisher::new(&remote, &local)
            .publish("def456", &v("v20240101.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::VersionAlreadyExists { .. }), "{err:?}");
        assert_eq!(local.create_count(), 0);
    }

    #[tokio::test]
    async fn local_conflict_blocks_remote_publish() {
        let remote = MemoryTags::default();
        let local = MemoryTags::with(&[("v20240101.0", "abc123")]);
        let err = TagPublisher::new(&remote, &local)
            .publish("def456", &v("v20240101.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::VersionAlreadyExists { .. }));
        assert_eq!(remote.create_count(), 0);
    }

    #[tokio::test]
    async fn remote_failure_leaves_no_local_tag() {
        let remote = MemoryTags {
            fail_create: true,
            ..Default::default()
        };
        let local = MemoryTags::default();
        let err = TagPublisher::new(&remote, &local)
            .publish("abc123", &v("v20240101.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::TagPublishFailed { store: "memory", .. }));
        assert!(local.get("v20240101.0").is_none());
    }

    #[tokio::test]
    async fn concurrent_create_at_same_commit_succeeds() {
        let remote = MemoryTags {
            concurrent_commit: Some("abc123".into()),
            ..Default::default()
        };
        let local = MemoryTags::default();
        let outcome = TagPublisher::new(&remote, &local)
            .publish("ABC123", &v("v20240101.0"))
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Created);
        assert_eq!(remote.create_count(), 1);
        assert_eq!(local.get("v20240101.0").as_deref(), Some("ABC123"));
    }

    #[tokio::test]
    async fn concurrent_create_at_other_commit_conflicts() {
        let remote = MemoryTags {
            concurrent_commit: Some("def456".into()),
            ..Default::default()
        };
        let local = MemoryTags::default();
        let err = TagPublisher::new(&remote, &local)
            .publish("abc123", &v("v20240101.0"))
            .await
            .unwrap_err();
        match err {
            ReleaseError::VersionAlreadyExists {
                existing,
                requested,
                ..
            } => {
                assert_eq!(existing, "def456");
                assert_eq!(requested, "abc123");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(local.create_count(), 0);
    }

    #[tokio::test]
    async fn resumes_after_remote_only_publish() {
        let remote = MemoryTags::with(&[("v20240101.0", "abc123")]);
        let local = MemoryTags::default();
        let outcome = TagPublisher::new(&remote, &local)
            .publish("abc123", &v("v20240101.0"))
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Created);
        assert_eq!(remote.create_count(), 0);
        assert_eq!(local.get("v20240101.0").as_deref(), Some("abc123"));
    }

    fn init_repo(root: &Path) -> String {
        let repo = Repository::init(root).unwrap();
        let sig = Signature::now("nightship", "nightship@example.com").unwrap();
        let tree_oid = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_oid).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn local_tags_roundtrip_through_git() {
        let td = TempDir::new().unwrap();
        let head = init_repo(td.path());
        let store = LocalTags::new(td.path());
        let version = v("v20240101.0");

        assert_eq!(store.lookup(&version).await.unwrap(), None);
        store.create(&version, &head).await.unwrap();
        assert_eq!(store.lookup(&version).await.unwrap(), Some(head.clone()));
        assert!(store.create(&version, &head).await.is_err());
        assert_eq!(store.version_tags().await.unwrap(), vec!["v20240101.0"]);
    }
}
