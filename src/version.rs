use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ReleaseError, Result};

// Sequence numbers are canonical: no leading zeros, so every version has one tag name.
const VERSION_PATTERN: &str = r"^v(?P<date>\d{8})\.(?P<seq>0|[1-9]\d*)$";
// Anything shaped like a dated release tag must parse as one.
const CANDIDATE_PATTERN: &str = r"^v\d{8}(?:\.|$)";

/// A dated release identifier, `vYYYYMMDD.N`.
///
/// Ordering is by date, then by sequence number within the date.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReleaseVersion {
    date: NaiveDate,
    sequence: u32,
}

impl ReleaseVersion {
    pub fn new(date: NaiveDate, sequence: u32) -> Self {
        Self { date, sequence }
    }

    pub fn first_of(date: NaiveDate) -> Self {
        Self::new(date, 0)
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// The release that follows this one on the same date.
    pub fn successor(&self) -> Result<Self> {
        let sequence = self.sequence.checked_add(1).ok_or_else(|| {
            ReleaseError::VersionResolutionFailed(anyhow!(
                "{} is the last release number available for its date",
                self
            ))
        })?;
        Ok(Self::new(self.date, sequence))
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.date.format("%Y%m%d"), self.sequence)
    }
}

impl FromStr for ReleaseVersion {
    type Err = ReleaseError;

    fn from_str(s: &str) -> Result<Self> {
        let re = Regex::new(VERSION_PATTERN).map_err(|e| anyhow!(e))?;
        let invalid = || ReleaseError::InvalidVersionFormat(s.to_string());
        let caps = re.captures(s).ok_or_else(invalid)?;
        let date = NaiveDate::parse_from_str(&caps["date"], "%Y%m%d").map_err(|_| invalid())?;
        let sequence = caps["seq"].parse::<u32>().map_err(|_| invalid())?;
        Ok(Self::new(date, sequence))
    }
}

impl TryFrom<String> for ReleaseVersion {
    type Error = ReleaseError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ReleaseVersion> for String {
    fn from(value: ReleaseVersion) -> Self {
        value.to_string()
    }
}

/// Pick the newest release version among tag names.
///
/// Tags that do not look like dated releases are ignored. Tags that look like one
/// but fail to parse are an error, since skipping them could hand out a duplicate.
pub fn latest_version<'a, I>(tags: I) -> Result<Option<ReleaseVersion>>
where
    I: IntoIterator<Item = &'a str>,
{
    let candidate = Regex::new(CANDIDATE_PATTERN).map_err(|e| anyhow!(e))?;
    let mut latest: Option<ReleaseVersion> = None;
    for tag in tags {
        if !candidate.is_match(tag) {
            continue;
        }
        let version: ReleaseVersion = tag.parse()?;
        if latest.as_ref().is_none_or(|l| version > *l) {
            latest = Some(version);
        }
    }
    Ok(latest)
}

/// Compute the release version that follows `prior` when releasing on `today`.
pub fn next_version(
    prior: Option<&ReleaseVersion>,
    today: NaiveDate,
) -> Result<ReleaseVersion> {
    match prior {
        None => Ok(ReleaseVersion::first_of(today)),
        Some(prior) if prior.date() == today => prior.successor(),
        Some(prior) if prior.date() > today => {
            tracing::warn!(
                "version: latest release {} is dated after today ({}); continuing its sequence",
                prior,
                today
            );
            prior.successor()
        }
        Some(_) => Ok(ReleaseVersion::first_of(today)),
    }
}

/// Resolve the next version from a set of existing tag names.
pub fn resolve_next<'a, I>(tags: I, today: NaiveDate) -> Result<ReleaseVersion>
where
    I: IntoIterator<Item = &'a str>,
{
    let prior = latest_version(tags)?;
    let next = next_version(prior.as_ref(), today)?;
    tracing::debug!(
        "version: prior={} next={}",
        prior
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| String::from("<none>")),
        next
    );
    Ok(next)
}
