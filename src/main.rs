mod bootstrap;
mod config;
mod coordinator;
mod delegate;
mod error;
mod github;
mod infer;
mod preflight;
mod report;
mod resume;
mod tags;
mod tuf;
mod version;

use std::process::ExitCode;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::bootstrap::GitCheckout;
use crate::config::ReleaseFlags;
use crate::coordinator::{Completed, Coordinator, Failure};
use crate::delegate::ProcessReleaser;
use crate::error::ReleaseError;
use crate::github::GitHubRepo;
use crate::resume::Stage;
use crate::tags::LocalTags;

#[derive(Parser, Debug)]
#[command(
    name = "nightship",
    about = "Tag and publish a dated release of the current repository",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    flags: ReleaseFlags,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args_os()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    let cli = match Cli::try_parse_from(&args) {
        Ok(cli) => cli,
        Err(err) => {
            // Help goes to stdout and is not a failure; everything else exits 1.
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    init_tracing();

    match release(cli.flags).await {
        Ok((done, domain)) => match report::render_success(&done, domain.as_deref()) {
            Ok(text) => {
                print!("{}", text);
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("error: {:#}", err);
                ExitCode::FAILURE
            }
        },
        Err(failure) => {
            eprintln!("error: {}", report::error_chain(&failure.error));
            match report::render_failure(&failure, &args) {
                Ok(text) => eprint!("{}", text),
                Err(err) => eprintln!("error: {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn release(flags: ReleaseFlags) -> Result<(Completed, Option<String>), Failure> {
    let cwd = std::env::current_dir()
        .context("failed to read the current directory")
        .map_err(|e| before_start(e.into()))?;
    let pre = preflight::run_preflight(flags, &cwd)
        .await
        .map_err(before_start)?;

    let gh = github::client(&pre.credentials.github_token).map_err(|e| before_start(e.into()))?;
    let remote = GitHubRepo::new(gh, &pre.repo.repo_owner, &pre.repo.repo_name);
    let local = LocalTags::new(&pre.repo.repo_root);
    let checkout = GitCheckout::new(&pre.repo.repo_root);
    let delegate =
        ProcessReleaser::new(&pre.config.delegate).with_env(pre.credentials.delegate_env());
    let today = Utc::now().date_naive();

    tracing::info!(
        "release: start repo={}/{} today={}",
        pre.repo.repo_owner,
        pre.repo.repo_name,
        today
    );
    let done = Coordinator::new(&pre.config, &remote, &local, &checkout, &delegate, today)
        .run()
        .await?;
    Ok((done, pre.config.domain.clone()))
}

fn before_start(error: ReleaseError) -> Failure {
    Failure {
        error,
        stage: Stage::Init,
        resume_dir: None,
    }
}
