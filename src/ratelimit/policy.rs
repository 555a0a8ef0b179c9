//! Rate limit policies and the named policy table.
//!
//! Call sites refer to policies by name instead of repeating window sizes
//! and quotas. The table starts out with the built-in presets and can be
//! extended or overridden from a YAML file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::error::{Result, TallyError};

/// A fixed-window quota: at most `max_requests` admits per `window_ms`.
///
/// Both values are always positive; [`Policy::new`] rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PolicySpec", into = "PolicySpec")]
pub struct Policy {
    window_ms: u64,
    max_requests: u32,
}

/// Unvalidated policy as written in configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PolicySpec {
    /// Width of the accounting window in milliseconds
    pub window_ms: u64,
    /// Maximum admits per window
    pub max_requests: u32,
}

impl Policy {
    /// Expensive AI analysis: 10 requests per hour.
    pub const AI_ANALYSIS: Policy = Policy {
        window_ms: 60 * 60 * 1000,
        max_requests: 10,
    };

    /// General API traffic: 60 requests per minute.
    pub const API_REQUEST: Policy = Policy {
        window_ms: 60 * 1000,
        max_requests: 60,
    };

    /// Authentication attempts: 5 per 15 minutes.
    pub const AUTH: Policy = Policy {
        window_ms: 15 * 60 * 1000,
        max_requests: 5,
    };

    /// Create a policy, failing on a zero window or quota.
    pub fn new(window_ms: u64, max_requests: u32) -> Result<Self> {
        if window_ms == 0 {
            return Err(TallyError::Config(
                "policy window_ms must be greater than 0".to_string(),
            ));
        }
        if max_requests == 0 {
            return Err(TallyError::Config(
                "policy max_requests must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            window_ms,
            max_requests,
        })
    }

    /// Width of the accounting window in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Maximum admits per window.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }
}

impl TryFrom<PolicySpec> for Policy {
    type Error = TallyError;

    fn try_from(spec: PolicySpec) -> Result<Self> {
        Policy::new(spec.window_ms, spec.max_requests)
    }
}

impl From<Policy> for PolicySpec {
    fn from(policy: Policy) -> Self {
        Self {
            window_ms: policy.window_ms,
            max_requests: policy.max_requests,
        }
    }
}

/// Named policies available to request handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTable {
    policies: BTreeMap<String, Policy>,
}

/// On-disk shape of a policy file.
#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    policies: BTreeMap<String, Policy>,
}

impl PolicyTable {
    /// Name of the [`Policy::AI_ANALYSIS`] preset.
    pub const AI_ANALYSIS: &'static str = "AI_ANALYSIS";
    /// Name of the [`Policy::API_REQUEST`] preset.
    pub const API_REQUEST: &'static str = "API_REQUEST";
    /// Name of the [`Policy::AUTH`] preset.
    pub const AUTH: &'static str = "AUTH";

    /// Create a table holding only the built-in presets.
    pub fn new() -> Self {
        let mut policies = BTreeMap::new();
        policies.insert(Self::AI_ANALYSIS.to_string(), Policy::AI_ANALYSIS);
        policies.insert(Self::API_REQUEST.to_string(), Policy::API_REQUEST);
        policies.insert(Self::AUTH.to_string(), Policy::AUTH);
        Self { policies }
    }

    /// Load the presets plus the policies in a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load the presets plus the policies in a YAML document.
    ///
    /// Entries with a preset's name replace the preset. Any invalid entry
    /// rejects the whole document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: PolicyFile = serde_yaml::from_str(yaml).map_err(|e| {
            TallyError::Config(format!("Failed to parse rate limit policies: {}", e))
        })?;

        let mut table = Self::new();
        for (name, policy) in file.policies {
            table.insert(name, policy);
        }
        Ok(table)
    }

    /// Add or replace a named policy.
    pub fn insert(&mut self, name: impl Into<String>, policy: Policy) {
        self.policies.insert(name.into(), policy);
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    /// Look up a policy by name, failing with [`TallyError::UnknownPolicy`].
    pub fn require(&self, name: &str) -> Result<Policy> {
        self.get(name)
            .copied()
            .ok_or_else(|| TallyError::UnknownPolicy(name.to_string()))
    }

    /// Iterate over the policies in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Policy)> {
        self.policies.iter().map(|(name, policy)| (name.as_str(), policy))
    }

    /// Number of named policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::new()
    }
}
