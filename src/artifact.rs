use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::{Serialize, Serializer};

pub const DEFAULT_TAG: &str = "latest";
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Repository path plus tag, e.g. `ghcr.io/org/name:v1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    repository: String,
    tag: String,
}

impl ImageReference {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Result<Self> {
        let repository = repository.into();
        let tag = tag.into();
        validate_repository(&repository)?;
        validate_tag(&tag)?;
        Ok(Self { repository, tag })
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Same repository under another tag.
    pub fn with_tag(&self, tag: &str) -> Result<Self> {
        Self::new(self.repository.clone(), tag)
    }

    /// Registry host the repository lives on.
    ///
    /// - `ghcr.io/org/app` -> `ghcr.io`
    /// - `localhost:5000/app` -> `localhost:5000`
    /// - `org/app` -> `docker.io`
    pub fn registry_host(&self) -> &str {
        match self.repository.split_once('/') {
            Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => {
                first
            }
            _ => DEFAULT_REGISTRY,
        }
    }
}

impl FromStr for ImageReference {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.contains('@') {
            bail!("Image reference '{value}' must use a tag, not a digest");
        }
        let name_start = value.rfind('/').map_or(0, |idx| idx + 1);
        match value[name_start..].rfind(':') {
            Some(offset) => {
                let split = name_start + offset;
                Self::new(&value[..split], &value[split + 1..])
            }
            None => Self::new(value, DEFAULT_TAG),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

impl Serialize for ImageReference {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Output of the build stage: the tagged reference and the image ID the engine
/// reported for it. Downstream stages address the image by `digest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageArtifact {
    pub reference: ImageReference,
    pub digest: String,
}

impl ImageArtifact {
    pub fn new(reference: ImageReference, digest: impl Into<String>) -> Self {
        Self {
            reference,
            digest: digest.into(),
        }
    }

    pub fn short_digest(&self) -> &str {
        let hex = self
            .digest
            .split_once(':')
            .map_or(self.digest.as_str(), |(_, hex)| hex);
        hex.char_indices().nth(12).map_or(hex, |(end, _)| &hex[..end])
    }
}

fn validate_repository(repository: &str) -> Result<()> {
    if repository.is_empty() {
        bail!("Image repository cannot be empty");
    }
    if repository.starts_with('/') || repository.ends_with('/') || repository.contains("//") {
        bail!("Image repository '{repository}' has an empty path component");
    }
    let path = match repository.split_once('/') {
        Some((first, rest)) if first.contains('.') || first.contains(':') => rest,
        _ => repository,
    };
    for c in path.chars() {
        let allowed = c.is_ascii_lowercase()
            || c.is_ascii_digit()
            || matches!(c, '.' | '-' | '_' | '/');
        if !allowed {
            bail!("Invalid character '{c}' in image repository '{repository}'");
        }
    }
    Ok(())
}

/// Tags are at most 128 characters of `[A-Za-z0-9_.-]`, not starting with `.` or `-`.
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        bail!("Image tag cannot be empty");
    }
    if tag.len() > 128 {
        bail!("Image tag too long ({} characters, max 128)", tag.len());
    }
    if tag.starts_with('.') || tag.starts_with('-') {
        bail!("Image tag '{tag}' cannot start with '.' or '-'");
    }
    if let Some(c) = tag
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '.' | '-' | '_'))
    {
        bail!("Invalid character '{c}' in image tag '{tag}'");
    }
    Ok(())
}
