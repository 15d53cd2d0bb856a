use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;

use crate::error::ReleaseError;
use crate::version::ReleaseVersion;

pub const CONFIG_FILE: &str = ".nightship.toml";

const DEFAULT_DELEGATE: &str = "flynn-release";
const DEFAULT_KEEP: u32 = 3;

pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const GITHUB_TOKEN: &str = "NIGHTSHIP_GITHUB_TOKEN";

/// Release flags as given on the command line.
#[derive(Args, Debug, Clone, Default)]
pub struct ReleaseFlags {
    /// Commit to release (defaults to the head of --branch)
    #[arg(long)]
    pub commit: Option<String>,

    /// Branch whose head is released when --commit is not given
    #[arg(long)]
    pub branch: Option<String>,

    /// Explicit release version (vYYYYMMDD.N); computed when omitted
    #[arg(long = "version")]
    pub version: Option<String>,

    /// Object store bucket the delegate uploads into
    #[arg(long)]
    pub bucket: Option<String>,

    /// Public download domain, shown in the report
    #[arg(long)]
    pub domain: Option<String>,

    /// Local TUF repository directory
    #[arg(long = "tuf-dir")]
    pub tuf_dir: Option<PathBuf>,

    /// Continue a failed release from its resume directory
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// Publish into the nightly channel
    #[arg(long, default_value_t = false)]
    pub nightly: bool,

    /// Number of previous releases kept in the TUF repository
    #[arg(long)]
    pub keep: Option<u32>,

    /// Resolve and check everything, but do not tag or release
    #[arg(long = "dry-run", default_value_t = false)]
    pub dry_run: bool,
}

/// Optional `.nightship.toml` at the repository root.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// `owner/name` on GitHub; inferred from the origin remote when absent.
    pub repository: Option<String>,
    pub bucket: Option<String>,
    pub domain: Option<String>,
    pub tuf_dir: Option<PathBuf>,
    pub default_branch: Option<String>,
    pub delegate: Option<PathBuf>,
    pub keep: Option<u32>,
}

pub async fn load_file_config(repo_root: &Path) -> Result<FileConfig> {
    let path = repo_root.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let cfg: FileConfig =
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(cfg)
}

#[derive(Clone)]
pub struct Credentials {
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub github_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

impl Credentials {
    /// Object store credentials, handed to the delegate process.
    pub fn delegate_env(&self) -> Vec<(&'static str, String)> {
        vec![
            (AWS_ACCESS_KEY_ID, self.aws_access_key_id.clone()),
            (AWS_SECRET_ACCESS_KEY, self.aws_secret_access_key.clone()),
        ]
    }

    pub fn from_env() -> Result<Self, ReleaseError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ReleaseError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &'static str| match lookup(key) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(ReleaseError::MissingCredential(key)),
        };
        Ok(Self {
            aws_access_key_id: require(AWS_ACCESS_KEY_ID)?,
            aws_secret_access_key: require(AWS_SECRET_ACCESS_KEY)?,
            github_token: require(GITHUB_TOKEN)?,
        })
    }
}

/// Everything one release invocation runs with.
#[derive(Debug, Clone)]
pub struct ReleaseConfig {
    pub owner: Option<String>,
    pub name: Option<String>,
    pub commit: Option<String>,
    pub branch: Option<String>,
    pub version: Option<ReleaseVersion>,
    pub bucket: String,
    pub domain: Option<String>,
    pub tuf_dir: PathBuf,
    pub resume: Option<PathBuf>,
    pub nightly: bool,
    pub keep: u32,
    pub delegate: PathBuf,
    pub default_branch: Option<String>,
    pub dry_run: bool,
}

impl ReleaseConfig {
    /// Merge defaults, the config file, and flags. Relative paths are anchored at `cwd`.
    pub fn resolve(
        flags: ReleaseFlags,
        file: FileConfig,
        cwd: &Path,
    ) -> Result<Self, ReleaseError> {
        let (owner, name) = match file.repository.as_deref() {
            Some(full) => {
                let (owner, name) = full.split_once('/').ok_or_else(|| {
                    ReleaseError::Usage(format!(
                        "repository in {} must be owner/name, got {:?}",
                        CONFIG_FILE, full
                    ))
                })?;
                (Some(owner.to_string()), Some(name.to_string()))
            }
            None => (None, None),
        };

        let commit = flags.commit.map(|c| validate_commit(&c)).transpose()?;
        let version = flags
            .version
            .as_deref()
            .map(str::parse::<ReleaseVersion>)
            .transpose()?;
        let bucket = flags.bucket.or(file.bucket).ok_or_else(|| {
            ReleaseError::Usage(format!(
                "no bucket given (use --bucket or set bucket in {})",
                CONFIG_FILE
            ))
        })?;
        let tuf_dir = flags.tuf_dir.or(file.tuf_dir).ok_or_else(|| {
            ReleaseError::Usage(format!(
                "no TUF directory given (use --tuf-dir or set tuf_dir in {})",
                CONFIG_FILE
            ))
        })?;

        Ok(Self {
            owner,
            name,
            commit,
            branch: flags.branch,
            version,
            bucket,
            domain: flags.domain.or(file.domain),
            tuf_dir: cwd.join(tuf_dir),
            resume: flags.resume.map(|p| cwd.join(p)),
            nightly: flags.nightly,
            keep: flags.keep.or(file.keep).unwrap_or(DEFAULT_KEEP),
            delegate: file
                .delegate
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DELEGATE)),
            default_branch: file.default_branch,
            dry_run: flags.dry_run,
        })
    }
}

/// Full hex object ids only; the tag API does not expand abbreviations.
fn validate_commit(commit: &str) -> Result<String, ReleaseError> {
    let commit = commit.trim();
    if commit.len() == 40 && commit.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(commit.to_ascii_lowercase())
    } else {
        Err(ReleaseError::Usage(format!(
            "--commit must be a full 40-character commit id, got {:?}",
            commit
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA: &str = "0123456789abcdef0123456789abcdef01234567";

    fn flags() -> ReleaseFlags {
        ReleaseFlags {
            bucket: Some("flynn-nightly".into()),
            tuf_dir: Some(PathBuf::from("tuf")),
            ..Default::default()
        }
    }

    #[test]
    fn flags_override_file() {
        let file: FileConfig = toml::from_str(
            r#"
repository = "flynn/flynn"
bucket = "from-file"
tuf_dir = "/srv/tuf"
keep = 7
delegate = "util/release/flynn-release"
"#,
        )
        .unwrap();
        let cfg = ReleaseConfig::resolve(flags(), file, Path::new("/work")).unwrap();
        assert_eq!(cfg.bucket, "flynn-nightly");
        assert_eq!(cfg.tuf_dir, PathBuf::from("/work/tuf"));
        assert_eq!(cfg.keep, 7);
        assert_eq!(cfg.owner.as_deref(), Some("flynn"));
        assert_eq!(cfg.name.as_deref(), Some("flynn"));
        assert_eq!(cfg.delegate, PathBuf::from("util/release/flynn-release"));
    }

    #[test]
    fn defaults_apply() {
        let cfg =
            ReleaseConfig::resolve(flags(), FileConfig::default(), Path::new("/work")).unwrap();
        assert_eq!(cfg.keep, DEFAULT_KEEP);
        assert_eq!(cfg.delegate, PathBuf::from(DEFAULT_DELEGATE));
        assert!(cfg.version.is_none());
        assert!(!cfg.dry_run);
    }

    #[test]
    fn missing_bucket_is_usage_error() {
        let flags = ReleaseFlags {
            tuf_dir: Some(PathBuf::from("tuf")),
            ..Default::default()
        };
        let err =
            ReleaseConfig::resolve(flags, FileConfig::default(), Path::new("/w")).unwrap_err();
        assert!(matches!(err, ReleaseError::Usage(_)));
    }

    #[test]
    fn commit_and_version_are_validated() {
        let mut f = flags();
        f.commit = Some(SHA.to_ascii_uppercase());
        f.version = Some("v20240101.2".into());
        let cfg = ReleaseConfig::resolve(f, FileConfig::default(), Path::new("/w")).unwrap();
        assert_eq!(cfg.commit.as_deref(), Some(SHA));
        assert_eq!(cfg.version.unwrap().to_string(), "v20240101.2");

        let mut f = flags();
        f.commit = Some("abc123".into());
        assert!(matches!(
            ReleaseConfig::resolve(f, FileConfig::default(), Path::new("/w")),
            Err(ReleaseError::Usage(_))
        ));

        let mut f = flags();
        f.version = Some("2024.1".into());
        assert!(matches!(
            ReleaseConfig::resolve(f, FileConfig::default(), Path::new("/w")),
            Err(ReleaseError::InvalidVersionFormat(_))
        ));
    }

    #[test]
    fn credentials_require_every_variable() {
        let all = |key: &str| Some(format!("value-of-{key}"));
        let creds = Credentials::from_lookup(all).unwrap();
        assert_eq!(creds.github_token, "value-of-NIGHTSHIP_GITHUB_TOKEN");

        let missing_secret = |key: &str| (key != AWS_SECRET_ACCESS_KEY).then(|| "x".to_string());
        assert!(matches!(
            Credentials::from_lookup(missing_secret),
            Err(ReleaseError::MissingCredential(AWS_SECRET_ACCESS_KEY))
        ));

        let empty_token = |key: &str| Some(if key == GITHUB_TOKEN { "" } else { "x" }.to_string());
        assert!(matches!(
            Credentials::from_lookup(empty_token),
            Err(ReleaseError::MissingCredential(GITHUB_TOKEN))
        ));
    }

    #[test]
    fn debug_hides_secrets() {
        let creds = Credentials::from_lookup(|_| Some("secret".into())).unwrap();
        assert!(!format!("{creds:?}").contains("secret"));
    }
}
