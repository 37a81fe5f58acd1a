//! Cloud identity and error types.

use std::fmt;

use thiserror::Error;

/// This node's identity in Compute Engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub project: String,
    pub zone: String,
    pub name: String,
    pub id: String,
}

impl Instance {
    /// The resource URL used when adding or removing this instance from a group.
    pub fn self_link(&self, compute_url: &str) -> String {
        format!(
            "{}/projects/{}/zones/{}/instances/{}",
            compute_url.trim_end_matches('/'),
            self.project,
            self.zone,
            self.name
        )
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.zone, self.name)
    }
}

/// An unmanaged instance group acting as a load balancer backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceGroup {
    pub name: String,
}

impl InstanceGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Errors talking to the metadata server or the Compute API.
#[derive(Debug, Clone, Error)]
pub enum CloudError {
    #[error("metadata lookup failed: {0}")]
    Metadata(String),

    #[error("compute API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("compute API request failed: {0}")]
    Http(String),

    #[error("compute operation failed: {0}")]
    Operation(String),
}

impl From<reqwest::Error> for CloudError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

pub type CloudResult<T> = Result<T, CloudError>;
