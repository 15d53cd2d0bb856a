use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use assert_cmd::Command;
use git2::{IndexAddOption, Repository, Signature};
use tempfile::TempDir;

const CREDENTIALS: [&str; 3] = [
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "NIGHTSHIP_GITHUB_TOKEN",
];

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, content)?;
    Ok(())
}

struct Fixture {
    _td: TempDir,
    root: PathBuf,
    head: String,
}

impl Fixture {
    fn new() -> Result<Self> {
        let td = tempfile::tempdir()?;
        let root = td.path().to_path_buf();
        write_file(&root.join("README.md"), "flynn\n")?;

        let repo = Repository::init(&root)?;
        let mut idx = repo.index()?;
        idx.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        idx.write()?;
        let tree = repo.find_tree(idx.write_tree()?)?;
        let sig = Signature::now("nightship", "nightship@example.com")?;
        let head = repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])?;
        repo.remote("origin", "https://github.com/flynn/flynn.git")?;

        Ok(Self {
            _td: td,
            root,
            head: head.to_string(),
        })
    }

    /// A TUF repository that already carries `version`.
    fn released_tuf(&self, version: &str) -> Result<PathBuf> {
        let tuf = self.root.join("tuf");
        write_file(
            &tuf.join("repository/targets.json"),
            &format!(
                r#"{{"signatures":[],"signed":{{"_type":"Targets","targets":{{"/{version}/flynn-host.gz":{{"length":1}}}}}}}}"#
            ),
        )?;
        Ok(tuf)
    }

    fn has_tag(&self, version: &str) -> Result<bool> {
        let repo = Repository::open(&self.root)?;
        Ok(repo.find_reference(&format!("refs/tags/{version}")).is_ok())
    }
}

fn nightship_cmd(root: &Path) -> Result<Command> {
    let mut cmd = Command::cargo_bin("nightship")?;
    cmd.current_dir(root);
    cmd.env("RUST_LOG", "off");
    for key in CREDENTIALS {
        cmd.env_remove(key);
    }
    Ok(cmd)
}

fn with_credentials(cmd: &mut Command) -> &mut Command {
    for key in CREDENTIALS {
        cmd.env(key, "test-value");
    }
    cmd
}

fn stderr_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn help_exits_zero() -> Result<()> {
    let fx = Fixture::new()?;
    let output = nightship_cmd(&fx.root)?.arg("--help").output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--resume"), "{stdout}");
    assert!(stdout.contains("--tuf-dir"), "{stdout}");
    Ok(())
}

#[test]
fn unknown_flag_exits_one() -> Result<()> {
    let fx = Fixture::new()?;
    nightship_cmd(&fx.root)?
        .arg("--frobnicate")
        .assert()
        .failure()
        .code(1);
    Ok(())
}

#[test]
fn missing_credentials_fail_first() -> Result<()> {
    let fx = Fixture::new()?;
    let output = nightship_cmd(&fx.root)?
        .args(["--bucket", "flynn-nightly", "--tuf-dir", "tuf"])
        .output()?;
    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr_of(&output);
    assert!(stderr.contains("missing AWS_ACCESS_KEY_ID"), "{stderr}");
    assert!(stderr.contains("no release state was created"), "{stderr}");
    Ok(())
}

#[test]
fn missing_bucket_is_usage_error() -> Result<()> {
    let fx = Fixture::new()?;
    let output = with_credentials(&mut nightship_cmd(&fx.root)?)
        .args(["--tuf-dir", "tuf"])
        .output()?;
    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr_of(&output);
    assert!(stderr.contains("no bucket given"), "{stderr}");
    assert!(stderr.contains("(usage error)"), "{stderr}");
    Ok(())
}

#[test]
fn bad_version_format_is_rejected() -> Result<()> {
    let fx = Fixture::new()?;
    let output = with_credentials(&mut nightship_cmd(&fx.root)?)
        .args(["--bucket", "b", "--tuf-dir", "tuf", "--version", "2024.01.01"])
        .output()?;
    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr_of(&output);
    assert!(stderr.contains("invalid version format"), "{stderr}");
    Ok(())
}

#[test]
fn released_version_fails_before_tagging() -> Result<()> {
    let fx = Fixture::new()?;
    fx.released_tuf("v20240101.0")?;
    let output = with_credentials(&mut nightship_cmd(&fx.root)?)
        .args(["--bucket", "flynn-nightly", "--tuf-dir", "tuf"])
        .args(["--commit", &fx.head, "--version", "v20240101.0"])
        .output()?;
    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr_of(&output);
    assert!(
        stderr.contains("version v20240101.0 already exists in the TUF repository"),
        "{stderr}"
    );
    assert!(stderr.contains("(conflict error)"), "{stderr}");
    assert!(!stderr.contains("--resume"), "{stderr}");
    assert!(output.stdout.is_empty());
    assert!(!fx.has_tag("v20240101.0")?);
    Ok(())
}

#[test]
fn missing_resume_dir_is_reported() -> Result<()> {
    let fx = Fixture::new()?;
    let output = with_credentials(&mut nightship_cmd(&fx.root)?)
        .args(["--bucket", "flynn-nightly", "--tuf-dir", "tuf"])
        .args(["--commit", &fx.head, "--resume", "gone"])
        .output()?;
    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr_of(&output);
    assert!(stderr.contains("resume directory not found"), "{stderr}");
    assert!(stderr.contains("gone"), "{stderr}");
    Ok(())
}

#[test]
fn config_file_must_be_valid() -> Result<()> {
    let fx = Fixture::new()?;
    write_file(&fx.root.join(".nightship.toml"), "buckets = \"typo\"\n")?;
    let output = with_credentials(&mut nightship_cmd(&fx.root)?)
        .args(["--bucket", "b", "--tuf-dir", "tuf"])
        .output()?;
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains(".nightship.toml"));
    Ok(())
}
