use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::runtime::RuntimeError;

pub const MANIFEST_PATH: &str = "manifest.json";

/// Files compiled into the binary, keyed by resource path.
pub(crate) const EMBEDDED: &[(&str, &[u8])] = &[
    (MANIFEST_PATH, include_bytes!("../resources/manifest.json")),
    ("schema/header.avro", include_bytes!("../resources/schema/header.avro")),
    ("schema/test-command.avro", include_bytes!("../resources/schema/test-command.avro")),
    ("schema/tested-event.avro", include_bytes!("../resources/schema/tested-event.avro")),
];

/// Source of static agent data (manifest, schema documents).
pub trait ResourceLoader: Send + Sync {
    fn open(&self, path: &str) -> Result<Vec<u8>, RuntimeError>;
}

/// Resources bundled at compile time.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedResources;

impl ResourceLoader for EmbeddedResources {
    fn open(&self, path: &str) -> Result<Vec<u8>, RuntimeError> {
        let path = normalize(path);
        EMBEDDED
            .iter()
            .find(|(name, _)| *name == path)
            .map(|(_, bytes)| bytes.to_vec())
            .ok_or_else(|| RuntimeError::ResourceNotFound(path.to_string()))
    }
}

/// Resources read from a directory on disk, laid out like `resources/`.
#[derive(Debug, Clone)]
pub struct DirResources {
    root: PathBuf,
}

impl DirResources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ResourceLoader for DirResources {
    fn open(&self, path: &str) -> Result<Vec<u8>, RuntimeError> {
        let rel = Path::new(normalize(path));
        // Only plain relative paths; nothing may escape the root.
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(RuntimeError::ResourceNotFound(path.to_string()));
        }
        let full = self.root.join(rel);
        std::fs::read(&full).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RuntimeError::ResourceNotFound(path.to_string()),
            _ => RuntimeError::Io {
                path: full.display().to_string(),
                source: e,
            },
        })
    }
}

fn normalize(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Agent manifest: identity and description advertised on the fabric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Manifest {
    pub fn load(resources: &dyn ResourceLoader) -> Result<Self, AgentError> {
        let raw = resources
            .open(MANIFEST_PATH)
            .map_err(|e| AgentError::Manifest(e.to_string()))?;
        let manifest: Manifest =
            serde_json::from_slice(&raw).map_err(|e| AgentError::Manifest(e.to_string()))?;
        if manifest.name.trim().is_empty() {
            return Err(AgentError::Manifest("name must not be empty".to_string()));
        }
        Ok(manifest)
    }
}
