//! Client version compatibility gate.
//!
//! The backend holds a minimum and a current version per platform. A client
//! below the minimum must update before the orchestrator may start.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::remote::{RemoteClient, RemoteResult};

/// `major.minor.patch`, compared componentwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
    }
}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SemVer {
    type Err = Error;

    /// Accepts `1.2.3`, `v1.2`, or `1.2.3-beta.1`; pre-release and build
    /// suffixes are ignored and missing components read as zero.
    fn from_str(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);
        let core = trimmed
            .split(['-', '+'])
            .next()
            .unwrap_or_default();
        if core.is_empty() {
            return Err(Error::InvalidInput(format!("Invalid version: '{raw}'")));
        }

        let mut parts = [0_u64; 3];
        for (index, component) in core.split('.').enumerate() {
            let slot = parts
                .get_mut(index)
                .ok_or_else(|| Error::InvalidInput(format!("Invalid version: '{raw}'")))?;
            *slot = component
                .parse()
                .map_err(|_| Error::InvalidInput(format!("Invalid version: '{raw}'")))?;
        }

        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

/// Server-held version requirements for one platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionPolicy {
    pub min_version: SemVer,
    pub current_version: SemVer,
}

/// Outcome of checking a client version against a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VersionCheck {
    pub compatible: bool,
    pub min_version: SemVer,
    pub current_version: SemVer,
    pub force_update: bool,
    pub migration_required: bool,
}

impl VersionPolicy {
    #[must_use]
    pub fn check(&self, client: SemVer) -> VersionCheck {
        let compatible = client >= self.min_version;
        VersionCheck {
            compatible,
            min_version: self.min_version,
            current_version: self.current_version,
            force_update: !compatible,
            migration_required: client.major < self.current_version.major,
        }
    }
}

/// Decides at startup whether sync may run for this client build.
#[derive(Debug, Clone)]
pub struct VersionGate {
    platform: String,
    client_version: SemVer,
}

impl VersionGate {
    pub fn new(platform: impl Into<String>, client_version: &str) -> Result<Self> {
        Ok(Self {
            platform: platform.into(),
            client_version: client_version.parse()?,
        })
    }

    #[must_use]
    pub const fn client_version(&self) -> SemVer {
        self.client_version
    }

    /// Fetch the policy and compare the client version against it.
    pub async fn check(&self, remote: &dyn RemoteClient) -> RemoteResult<VersionCheck> {
        let policy = remote.version_policy(&self.platform).await?;
        Ok(policy.check(self.client_version))
    }

    /// Fail with [`Error::UpdateRequired`] when the client is below the minimum.
    pub async fn ensure_compatible(&self, remote: &dyn RemoteClient) -> Result<VersionCheck> {
        let check = self.check(remote).await?;
        if check.compatible {
            tracing::debug!(
                platform = %self.platform,
                client = %self.client_version,
                "Client version accepted"
            );
            Ok(check)
        } else {
            tracing::warn!(
                platform = %self.platform,
                client = %self.client_version,
                min = %check.min_version,
                "Client version below minimum"
            );
            Err(Error::UpdateRequired {
                client: self.client_version.to_string(),
                min: check.min_version.to_string(),
            })
        }
    }
}
