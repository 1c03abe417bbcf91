use crate::CoreError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// The seven build steps, in execution order. Indices are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStep {
    Prerequisites,
    Prepare,
    Installer,
    Base,
    Packages,
    Compress,
    Cleanup,
}

impl BuildStep {
    pub const ALL: [Self; 7] = [
        Self::Prerequisites,
        Self::Prepare,
        Self::Installer,
        Self::Base,
        Self::Packages,
        Self::Compress,
        Self::Cleanup,
    ];

    pub fn index(self) -> usize {
        self as usize + 1
    }

    pub fn from_index(index: usize) -> Option<Self> {
        index.checked_sub(1).and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Prerequisites => "prerequisites",
            Self::Prepare => "prepare",
            Self::Installer => "installer",
            Self::Base => "base",
            Self::Packages => "packages",
            Self::Compress => "compress",
            Self::Cleanup => "cleanup",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.index(), Self::ALL.len(), self.name())
    }
}

/// Which steps a build runs. Always ascending and free of duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSelection(Vec<BuildStep>);

impl StepSelection {
    pub fn all() -> Self {
        Self(BuildStep::ALL.to_vec())
    }

    /// Parse a list like `1,3-5` or `prepare,compress`. Ranges are inclusive;
    /// order and repetition in the input do not matter.
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        let invalid = CoreError::InvalidStepSelection;
        let mut steps = Vec::new();
        for token in input.split(',').map(str::trim) {
            if token.is_empty() {
                return Err(invalid(format!("empty entry in '{input}'")));
            }
            if let Some((lo, hi)) = token.split_once('-') {
                let lo = parse_step(lo.trim())?;
                let hi = parse_step(hi.trim())?;
                if lo > hi {
                    return Err(invalid(format!("range '{token}' is descending")));
                }
                steps.extend(BuildStep::ALL.into_iter().filter(|s| (lo..=hi).contains(s)));
            } else {
                steps.push(parse_step(token)?);
            }
        }
        steps.sort_unstable();
        steps.dedup();
        Ok(Self(steps))
    }

    pub fn is_all(&self) -> bool {
        self.0.len() == BuildStep::ALL.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = BuildStep> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for StepSelection {
    fn default() -> Self {
        Self::all()
    }
}

impl FromStr for StepSelection {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for StepSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indices: Vec<String> = self.0.iter().map(|s| s.index().to_string()).collect();
        f.write_str(&indices.join(","))
    }
}

fn parse_step(token: &str) -> Result<BuildStep, CoreError> {
    if let Some(step) = BuildStep::from_name(token) {
        return Ok(step);
    }
    let index: usize = token.parse().map_err(|_| {
        CoreError::InvalidStepSelection(format!("'{token}' is not a step number or name"))
    })?;
    BuildStep::from_index(index).ok_or_else(|| {
        CoreError::InvalidStepSelection(format!(
            "step {index} is out of range 1-{}",
            BuildStep::ALL.len()
        ))
    })
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub steps: StepSelection,
    /// Leave the staging tree in place when a step fails.
    pub keep_staging: bool,
}
