//! Ingress entry types.

use serde::{Deserialize, Serialize};

/// One routing rule: requests for `host` under `path` go to a backend service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IngressEntry {
    pub host: String,
    pub namespace: String,
    pub name: String,
    pub path: String,
    pub service_address: String,
    pub service_port: u16,
    /// Client CIDRs permitted in addition to loopback. `None` and empty both deny everyone else.
    pub allow: Option<Vec<String>>,
    pub strip_paths: bool,
    pub backend_keep_alive_seconds: u32,
}

impl IngressEntry {
    /// The (host, normalized path) pair used to detect duplicates.
    pub fn route_key(&self) -> (String, String) {
        (self.host.clone(), normalize_path(&self.path))
    }

    /// The client CIDRs, treating an absent list as empty.
    pub fn allowed(&self) -> &[String] {
        self.allow.as_deref().unwrap_or_default()
    }
}

/// A complete desired-state snapshot, in the order the source produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct IngressUpdate {
    pub entries: Vec<IngressEntry>,
}

impl IngressUpdate {
    pub fn new(entries: Vec<IngressEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Normalize a location path so that it always starts and ends with `/`.
///
/// `""` becomes `/`, `prefix`, `/prefix` and `prefix/` all become `/prefix/`.
pub fn normalize_path(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/".to_string();
    }

    let mut normalized = String::with_capacity(path.len() + 2);
    if !path.starts_with('/') {
        normalized.push('/');
    }
    normalized.push_str(path);
    if !path.ends_with('/') {
        normalized.push('/');
    }
    normalized
}
