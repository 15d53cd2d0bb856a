use std::error::Error as StdError;
use std::path::Path;

use anyhow::{Result, anyhow};
use tera::{Context as TeraContext, Tera};

use crate::coordinator::{Completed, Failure};
use crate::error::ErrorKind;
use crate::tags::PublishOutcome;

const SUCCESS_TEMPLATE: &str = include_str!("../templates/success.txt");
const FAILURE_TEMPLATE: &str = include_str!("../templates/failure.txt");

pub fn render_success(done: &Completed, domain: Option<&str>) -> Result<String> {
    let mut ctx = TeraContext::new();
    ctx.insert("version", &done.version.to_string());
    ctx.insert("commit", &done.commit);
    ctx.insert("channel", &done.channel.to_string());
    ctx.insert("dry_run", &done.dry_run);
    ctx.insert("resumed", &done.resumed);
    ctx.insert("redirected", &done.redirected);
    ctx.insert(
        "tag",
        &done.tag.map(|t| match t {
            PublishOutcome::Created => "created",
            PublishOutcome::AlreadyPublished => "already published",
        }),
    );
    ctx.insert("domain", &domain);
    Tera::one_off(SUCCESS_TEMPLATE, &ctx, false)
        .map_err(|err| anyhow!("failed to render success report: {}", err))
}

/// `args` is the full invocation, program name first.
pub fn render_failure(failure: &Failure, args: &[String]) -> Result<String> {
    let mut ctx = TeraContext::new();
    ctx.insert("stage", &failure.stage.to_string());
    ctx.insert("kind", kind_name(failure.error.kind()));
    ctx.insert(
        "resume_dir",
        &failure.resume_dir.as_ref().map(|d| d.display().to_string()),
    );
    ctx.insert(
        "resume_command",
        &failure
            .resume_dir
            .as_deref()
            .map(|dir| resume_command(args, dir)),
    );
    Tera::one_off(FAILURE_TEMPLATE, &ctx, false)
        .map_err(|err| anyhow!("failed to render failure report: {}", err))
}

/// The same invocation with `--resume <dir>`, replacing any earlier `--resume`.
pub fn resume_command(args: &[String], dir: &Path) -> String {
    let mut out: Vec<String> = Vec::with_capacity(args.len() + 2);
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--resume" {
            iter.next();
            continue;
        }
        if arg.starts_with("--resume=") {
            continue;
        }
        out.push(shell_quote(arg));
    }
    out.push("--resume".to_string());
    out.push(shell_quote(&dir.display().to_string()));
    out.join(" ")
}

/// `message: cause: cause`, outermost first.
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        let msg = cause.to_string();
        if parts.last() != Some(&msg) {
            parts.push(msg);
        }
        source = cause.source();
    }
    parts.join(": ")
}

fn kind_name(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Usage => "usage",
        ErrorKind::Precondition => "precondition",
        ErrorKind::Resolution => "resolution",
        ErrorKind::Conflict => "conflict",
        ErrorKind::Publish => "publish",
        ErrorKind::Delegate => "delegate",
        ErrorKind::Internal => "internal",
    }
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
