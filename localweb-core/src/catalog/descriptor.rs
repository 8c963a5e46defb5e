//! Update sources and descriptors
//!
//! An [`UpdateSource`] is a URL template for the update check. The check
//! returns an [`UpdateDescriptor`] naming the available version and where to
//! download it.

use crate::catalog::error::UpdateError;
use crate::package::version::is_newer;
use crate::trace::random_token;
use serde::{Deserialize, Serialize};

/// Where to look for updates
///
/// Placeholders in `url`: `{version}`, `{id}`, `{kind}`, `{random}`,
/// `{host}`, `{more}`. Substituted values are URL-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSource {
    pub url: String,

    /// Free-form value for the `{more}` placeholder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub more: Option<String>,
}

/// Values substituted into an update URL
#[derive(Debug, Clone)]
pub struct UpdateQuery<'a> {
    /// Installed version
    pub version: &'a str,
    pub id: &'a str,
    /// Host kind
    pub kind: &'a str,
    /// Host id
    pub host: &'a str,
}

impl UpdateSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            more: None,
        }
    }

    /// Expand the URL template for a check
    pub fn check_url(&self, query: &UpdateQuery<'_>) -> String {
        let random = random_token();
        let more = self.more.as_deref().unwrap_or_default();
        [
            ("{version}", query.version),
            ("{id}", query.id),
            ("{kind}", query.kind),
            ("{random}", random.as_str()),
            ("{host}", query.host),
            ("{more}", more),
        ]
        .iter()
        .fold(self.url.clone(), |url, (placeholder, value)| {
            if url.contains(placeholder) {
                url.replace(placeholder, &encode(value))
            } else {
                url
            }
        })
    }
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Response of an update check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDescriptor {
    /// Available version
    pub version: String,

    /// Archive download URL
    pub url: String,

    /// Install even if the version is not newer
    #[serde(default)]
    pub force: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// `sha256:<hex>` digest of the archive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl UpdateDescriptor {
    pub fn parse(content: &str) -> Result<Self, UpdateError> {
        let descriptor: Self = serde_json::from_str(content).map_err(|e| UpdateError::Descriptor {
            reason: e.to_string(),
        })?;
        if descriptor.version.trim().is_empty() || descriptor.url.trim().is_empty() {
            return Err(UpdateError::Descriptor {
                reason: "version and url are required".to_string(),
            });
        }
        Ok(descriptor)
    }

    /// Whether this descriptor should replace `installed`
    pub fn applies_to(&self, installed: &str) -> bool {
        let installed = Some(installed).filter(|v| !v.trim().is_empty());
        is_newer(&self.version, installed, self.force)
    }
}
