use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::NaiveDate;

use crate::bootstrap::{Checkout, PinnedSource};
use crate::config::ReleaseConfig;
use crate::delegate::{Channel, ComponentReleaser, ComponentRequest};
use crate::error::{ReleaseError, Result};
use crate::resume::{Checkpoint, ResumeDir, Stage};
use crate::tags::{PublishOutcome, TagPublisher, TagStore};
use crate::tuf;
use crate::version::{self, ReleaseVersion};

/// Resolves branch names on the remote.
pub(crate) trait BranchSource {
    async fn branch_head(&self, branch: &str) -> anyhow::Result<String>;
    async fn default_branch(&self) -> anyhow::Result<String>;
}

#[derive(Debug)]
pub struct Completed {
    pub version: ReleaseVersion,
    pub commit: String,
    pub channel: Channel,
    pub tag: Option<PublishOutcome>,
    pub redirected: bool,
    pub resumed: bool,
    pub dry_run: bool,
}

#[derive(Debug)]
pub struct Failure {
    pub error: ReleaseError,
    /// Last stage that completed before the failure.
    pub stage: Stage,
    /// Preserved working state, if the run got far enough to have any.
    pub resume_dir: Option<PathBuf>,
}

struct RunState {
    stage: Stage,
    resume: Option<ResumeDir>,
    checkpoint: Option<Checkpoint>,
}

/// Drives one release from commit resolution to cleanup.
pub(crate) struct Coordinator<'a, R, L, C, D> {
    config: &'a ReleaseConfig,
    remote: &'a R,
    local: &'a L,
    checkout: &'a C,
    delegate: &'a D,
    today: NaiveDate,
}

impl<'a, R, L, C, D> Coordinator<'a, R, L, C, D>
where
    R: TagStore + BranchSource,
    L: TagStore,
    C: Checkout,
    D: ComponentReleaser,
{
    pub(crate) fn new(
        config: &'a ReleaseConfig,
        remote: &'a R,
        local: &'a L,
        checkout: &'a C,
        delegate: &'a D,
        today: NaiveDate,
    ) -> Self {
        Self {
            config,
            remote,
            local,
            checkout,
            delegate,
            today,
        }
    }

    pub(crate) async fn run(&self) -> std::result::Result<Completed, Failure> {
        let mut state = RunState {
            stage: Stage::Init,
            resume: None,
            checkpoint: None,
        };
        match self.run_stages(&mut state).await {
            Ok(done) => Ok(done),
            Err(error) => {
                tracing::error!("release: failed after stage={}: {}", state.stage, error);
                let resume_dir = match state.resume.take() {
                    Some(dir) => match dir.release(false).await {
                        Ok(path) => path,
                        Err(e) => {
                            tracing::warn!("resume: {}", e);
                            None
                        }
                    },
                    None => None,
                };
                Err(Failure {
                    error,
                    stage: state.stage,
                    resume_dir,
                })
            }
        }
    }

    async fn run_stages(&self, state: &mut RunState) -> Result<Completed> {
        let cfg = self.config;

        if let Some(path) = &cfg.resume {
            let dir = ResumeDir::acquire(Some(path.as_path())).await?;
            state.checkpoint = dir.load_checkpoint().await?;
            if let Some(cp) = &state.checkpoint {
                tracing::info!(
                    "resume: checkpoint commit={} version={} stage={}",
                    cp.commit,
                    cp.version,
                    cp.stage
                );
            }
            state.resume = Some(dir);
        }

        let resumed = state.resume.as_ref().is_some_and(ResumeDir::is_resumed);
        let mut branch: Option<String> = cfg.branch.clone();
        let commit = self.resolve_commit(state, &mut branch).await?;
        advance(state, Stage::CommitResolved, &commit, None);

        let explicit_version = self.check_preconditions(state).await?;
        advance(state, Stage::PreconditionsChecked, &commit, explicit_version.as_ref());

        let pinned = self
            .checkout
            .pin(&commit)
            .await
            .map_err(|source| ReleaseError::CommitResolutionFailed {
                target: format!("source checkout for {}", commit),
                source,
            })?;

        let version = match explicit_version {
            Some(v) => v,
            None => self.resolve_version().await?,
        };
        advance(state, Stage::VersionResolved, &commit, Some(&version));

        let channel = match &state.checkpoint {
            Some(cp) => cp.channel,
            None => self.detect_channel(&mut branch).await?,
        };

        if cfg.dry_run {
            tracing::info!(
                "release: dry-run, stopping before tags (pinned={})",
                pinned.root().display()
            );
            // Dry runs never clean up, even a resumed directory.
            state.resume = None;
            return Ok(Completed {
                version,
                commit,
                channel,
                tag: None,
                redirected: pinned.is_redirected(),
                resumed,
                dry_run: true,
            });
        }

        if state.resume.is_none() {
            state.resume = Some(ResumeDir::acquire(None).await?);
        }
        self.save(state, &commit, &version, channel).await?;

        let tag = TagPublisher::new(self.remote, self.local)
            .publish(&commit, &version)
            .await?;
        if tag == PublishOutcome::AlreadyPublished {
            tracing::info!("release: tag {} already in place, skipping", version);
        }
        advance(state, Stage::Tagged, &commit, Some(&version));
        self.save(state, &commit, &version, channel).await?;

        let components_done = state
            .checkpoint
            .as_ref()
            .is_some_and(|cp| cp.stage >= Stage::ComponentsReleased);
        if components_done {
            tracing::info!("release: components of {} already released, skipping", version);
        } else {
            self.release_components(state, &pinned, &version, channel)
                .await?;
        }
        advance(state, Stage::ComponentsReleased, &commit, Some(&version));
        self.save(state, &commit, &version, channel).await?;

        // Dropped only once removal succeeds, so a failure still reports it.
        if let Some(dir) = &state.resume {
            dir.remove().await?;
        }
        state.resume = None;
        advance(state, Stage::CleanedUp, &commit, Some(&version));

        Ok(Completed {
            version,
            commit,
            channel,
            tag: Some(tag),
            redirected: pinned.is_redirected(),
            resumed,
            dry_run: false,
        })
    }

    /// Explicit commit, then the resumed release's commit, then the branch head.
    async fn resolve_commit(
        &self,
        state: &RunState,
        branch: &mut Option<String>,
    ) -> Result<String> {
        let cfg = self.config;
        if let (Some(cp), Some(explicit)) = (&state.checkpoint, &cfg.commit)
            && !cp.commit.eq_ignore_ascii_case(explicit)
        {
            return Err(self.mismatch(state, "commit", &cp.commit, explicit));
        }
        if let Some(commit) = &cfg.commit {
            return Ok(commit.clone());
        }
        if let Some(cp) = &state.checkpoint {
            return Ok(cp.commit.clone());
        }

        let name = self.branch(branch).await?;
        let head = self.remote.branch_head(&name).await.map_err(|source| {
            ReleaseError::CommitResolutionFailed {
                target: format!("head of branch {}", name),
                source,
            }
        })?;
        tracing::info!("release: branch {} is at {}", name, head);
        Ok(head.to_ascii_lowercase())
    }

    /// Returns the version fixed before resolution, if any. Nothing mutating has
    /// happened yet when this runs.
    async fn check_preconditions(&self, state: &RunState) -> Result<Option<ReleaseVersion>> {
        let cfg = self.config;
        let recorded = state.checkpoint.as_ref().map(|cp| &cp.version);
        if let (Some(recorded), Some(explicit)) = (recorded, &cfg.version)
            && recorded != explicit
        {
            return Err(self.mismatch(
                state,
                "version",
                &recorded.to_string(),
                &explicit.to_string(),
            ));
        }

        match (&cfg.version, recorded) {
            // A resumed release may already have partial TUF state of its own.
            (_, Some(recorded)) => Ok(Some(recorded.clone())),
            (Some(explicit), None) => {
                self.ensure_unreleased(explicit).await?;
                Ok(Some(explicit.clone()))
            }
            (None, None) => Ok(None),
        }
    }

    async fn ensure_unreleased(&self, version: &ReleaseVersion) -> Result<()> {
        if tuf::release_exists(&self.config.tuf_dir, version).await? {
            return Err(ReleaseError::AlreadyReleased {
                version: version.clone(),
            });
        }
        Ok(())
    }

    async fn resolve_version(&self) -> Result<ReleaseVersion> {
        let remote = self
            .remote
            .version_tags()
            .await
            .map_err(ReleaseError::VersionResolutionFailed)?;
        let local = self
            .local
            .version_tags()
            .await
            .map_err(ReleaseError::VersionResolutionFailed)?;
        let tags: BTreeSet<String> = remote.into_iter().chain(local).collect();
        let version = version::resolve_next(tags.iter().map(String::as_str), self.today)?;
        self.ensure_unreleased(&version).await?;
        tracing::info!("release: resolved version {}", version);
        Ok(version)
    }

    async fn detect_channel(&self, branch: &mut Option<String>) -> Result<Channel> {
        if self.config.nightly {
            return Ok(Channel::Nightly);
        }
        let release_branch = self.branch(branch).await?;
        let default_branch = self.default_branch().await?;
        let channel = Channel::detect(false, &release_branch, &default_branch);
        tracing::info!(
            "release: channel={} (branch={} default={})",
            channel,
            release_branch,
            default_branch
        );
        Ok(channel)
    }

    /// The release branch, defaulting to the repository's default branch.
    async fn branch(&self, branch: &mut Option<String>) -> Result<String> {
        if let Some(name) = branch {
            return Ok(name.clone());
        }
        let name = self.default_branch().await?;
        *branch = Some(name.clone());
        Ok(name)
    }

    async fn default_branch(&self) -> Result<String> {
        if let Some(name) = &self.config.default_branch {
            return Ok(name.clone());
        }
        self.remote
            .default_branch()
            .await
            .map_err(|source| ReleaseError::CommitResolutionFailed {
                target: String::from("default branch"),
                source,
            })
    }

    async fn release_components(
        &self,
        state: &RunState,
        pinned: &PinnedSource,
        version: &ReleaseVersion,
        channel: Channel,
    ) -> Result<()> {
        let resume_dir = state
            .resume
            .as_ref()
            .map(|d| d.path().to_path_buf())
            .ok_or_else(|| anyhow::anyhow!("resume directory not acquired"))?;
        let request = ComponentRequest {
            bucket: &self.config.bucket,
            tuf_dir: &self.config.tuf_dir,
            resume_dir: &resume_dir,
            keep: self.config.keep,
            channel,
            commit: pinned.commit(),
            version,
        };
        self.delegate
            .release(pinned.root(), &request)
            .await
            .map_err(ReleaseError::DelegateFailed)
    }

    async fn save(
        &self,
        state: &RunState,
        commit: &str,
        version: &ReleaseVersion,
        channel: Channel,
    ) -> Result<()> {
        let Some(dir) = &state.resume else {
            return Ok(());
        };
        dir.save_checkpoint(&Checkpoint {
            commit: commit.to_string(),
            version: version.clone(),
            channel,
            stage: state.stage,
        })
        .await
    }

    fn mismatch(
        &self,
        state: &RunState,
        field: &'static str,
        recorded: &str,
        requested: &str,
    ) -> ReleaseError {
        ReleaseError::ResumeMismatch {
            dir: state
                .resume
                .as_ref()
                .map(|d| d.path().to_path_buf())
                .unwrap_or_default(),
            field,
            recorded: recorded.to_string(),
            requested: requested.to_string(),
        }
    }
}

fn advance(state: &mut RunState, stage: Stage, commit: &str, version: Option<&ReleaseVersion>) {
    state.stage = stage;
    match version {
        Some(v) => tracing::info!("release: stage={} commit={} version={}", stage, commit, v),
        None => tracing::info!("release: stage={} commit={}", stage, commit),
    }
}
