//! `container.yaml` platform filter (spec §6 "container.yaml schema").

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::ManifestError;

#[derive(Debug, Deserialize, Default)]
struct ContainerManifest {
    platforms: Option<PlatformsSection>,
}

#[derive(Debug, Deserialize, Default)]
struct PlatformsSection {
    #[serde(default)]
    only: Option<ScalarOrList>,
    #[serde(default)]
    not: Option<ScalarOrList>,
}

/// A YAML value that may be a bare scalar or a list of scalars (spec §6:
/// "`<scalar or list of strings>`").
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScalarOrList {
    Scalar(String),
    List(Vec<String>),
}

impl ScalarOrList {
    fn into_set(self) -> BTreeSet<String> {
        match self {
            ScalarOrList::Scalar(s) => BTreeSet::from([s]),
            ScalarOrList::List(items) => items.into_iter().collect(),
        }
    }
}

/// The effective `only`/`not` platform filter parsed from `container.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformFilter {
    pub only: BTreeSet<String>,
    pub not: BTreeSet<String>,
}

impl PlatformFilter {
    /// Apply this filter to a requested platform set (spec §4.6 step 2):
    /// intersect with `only` if non-empty, then always subtract `not`.
    pub fn apply(&self, requested: &BTreeSet<String>) -> BTreeSet<String> {
        let base: BTreeSet<String> = if self.only.is_empty() {
            requested.clone()
        } else {
            requested.intersection(&self.only).cloned().collect()
        };
        base.difference(&self.not).cloned().collect()
    }
}

/// Load the platform filter from a `container.yaml` file.
///
/// Per spec §6: an absent file, an absent `platforms` key, or
/// `platforms: null` all mean "no restriction" -- this returns
/// [`PlatformFilter::default`] (empty `only`/`not`) in those cases, never
/// an error. Missing `only`/`not` are likewise empty, not errors.
///
/// # Errors
///
/// Returns [`ManifestError`] if the file exists but cannot be read or
/// fails to parse as YAML (spec §7 "container.yaml unreadable ... fatal to
/// the whole orchestrator").
pub fn load_platform_filter(path: &Path) -> Result<PlatformFilter, ManifestError> {
    if !path.exists() {
        return Ok(PlatformFilter::default());
    }

    let contents = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let manifest: ContainerManifest = serde_yaml::from_str(&contents).map_err(|source| ManifestError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    let Some(platforms) = manifest.platforms else {
        return Ok(PlatformFilter::default());
    };

    Ok(PlatformFilter {
        only: platforms.only.map(ScalarOrList::into_set).unwrap_or_default(),
        not: platforms.not.map(ScalarOrList::into_set).unwrap_or_default(),
    })
}
