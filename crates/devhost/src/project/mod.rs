//! Project directory inspection and input validation.
//!
//! The inspector classifies a project directory (manifest, container
//! definition) and reads compose service definitions so callers can offer
//! per-service launches. Validation rejects identifiers and paths that would
//! otherwise flow into shell commands or escape the project root.

use serde::Serialize;
use std::path::{Component, Path, PathBuf};

use crate::error::{DevhostError, DevhostResult};

/// Manifest filenames that mark a launchable project.
const MANIFEST_FILES: [&str; 5] = [
    "package.json",
    "Cargo.toml",
    "pyproject.toml",
    "requirements.txt",
    "go.mod",
];

/// Compose definition filenames recognized next to a project.
const COMPOSE_FILES: [&str; 4] = [
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

/// What a project directory offers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectProbe {
    pub has_manifest: bool,
    pub has_container_def: bool,
    /// Services declared in the compose definition, empty without one.
    pub services: Vec<ComposeService>,
}

/// One service from a compose definition.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ComposeService {
    pub name: String,
    pub ports: Vec<String>,
    pub depends_on: Vec<String>,
}

/// Seam for inspecting project directories; the filesystem implementation is
/// the production one.
pub trait ManifestInspector: Send + Sync {
    fn probe(&self, root: &Path) -> ProjectProbe;
}

/// Inspector backed by the real filesystem.
pub struct FsManifestInspector;

impl ManifestInspector for FsManifestInspector {
    fn probe(&self, root: &Path) -> ProjectProbe {
        let has_manifest = MANIFEST_FILES.iter().any(|name| root.join(name).exists());
        let compose_path = COMPOSE_FILES
            .iter()
            .map(|name| root.join(name))
            .find(|path| path.exists());

        let services = compose_path
            .as_deref()
            .and_then(read_compose_services)
            .unwrap_or_default();

        ProjectProbe {
            has_manifest,
            has_container_def: compose_path.is_some(),
            services,
        }
    }
}

/// Parse the `services` section of a compose file. Any read or parse failure
/// reduces to "no services"; a broken compose file must not fail inspection.
fn read_compose_services(path: &Path) -> Option<Vec<ComposeService>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let doc: serde_yaml::Value = serde_yaml::from_str(&raw).ok()?;
    let services = doc.get("services")?.as_mapping()?;

    let mut parsed = Vec::new();
    for (name, body) in services {
        let Some(name) = name.as_str() else { continue };
        parsed.push(ComposeService {
            name: name.to_string(),
            ports: string_sequence(body.get("ports")),
            depends_on: dependency_names(body.get("depends_on")),
        });
    }
    Some(parsed)
}

fn string_sequence(value: Option<&serde_yaml::Value>) -> Vec<String> {
    let Some(seq) = value.and_then(|v| v.as_sequence()) else {
        return Vec::new();
    };
    seq.iter()
        .filter_map(|entry| match entry {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

/// `depends_on` comes in two shapes: a plain list of names, or a map of
/// name to condition body.
fn dependency_names(value: Option<&serde_yaml::Value>) -> Vec<String> {
    match value {
        Some(serde_yaml::Value::Sequence(seq)) => seq
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(serde_yaml::Value::Mapping(map)) => map
            .keys()
            .filter_map(|k| k.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Validate a project, instance, or container service identifier.
pub fn validate_identifier(id: &str) -> DevhostResult<()> {
    if id.is_empty() || id.len() > 128 {
        return Err(DevhostError::InvalidInput(format!(
            "identifier must be 1..=128 characters, got {}",
            id.len()
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(DevhostError::InvalidInput(format!(
            "identifier '{id}' contains characters outside [A-Za-z0-9_.-]"
        )));
    }
    Ok(())
}

/// Validate an env-file name: a bare filename, no separators, `.env`-style.
pub fn validate_env_file_name(name: &str) -> DevhostResult<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(DevhostError::InvalidInput(format!(
            "env file name '{name}' must be a bare filename"
        )));
    }
    Ok(())
}

/// Resolve a relative path against a project root, rejecting anything that
/// would land outside the root.
pub fn resolve_within_root(root: &Path, relative: &str) -> DevhostResult<PathBuf> {
    let candidate = Path::new(relative);
    if candidate.is_absolute() {
        return Err(DevhostError::InvalidInput(format!(
            "path '{relative}' must be relative to the project root"
        )));
    }
    let mut resolved = root.to_path_buf();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => {
                return Err(DevhostError::InvalidInput(format!(
                    "path '{relative}' escapes the project root"
                )));
            }
        }
    }
    Ok(resolved)
}
