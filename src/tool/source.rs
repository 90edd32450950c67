//! Plugin sources: where candidate tool implementations come from.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::tool::command::CommandTool;
use crate::tool::{DiscoveryError, DynTool, ToolError};

type Constructor = Box<dyn FnOnce() -> Result<DynTool, ToolError> + Send>;
type SharedConstructor = Arc<dyn Fn() -> Result<DynTool, ToolError> + Send + Sync>;

/// One not-yet-instantiated tool, labelled with where it came from.
pub struct ToolCandidate {
    /// Human-readable origin, used in discovery reports
    pub origin: String,
    constructor: Constructor,
}

impl ToolCandidate {
    /// Creates a candidate from a constructor closure.
    pub fn new<F>(origin: impl Into<String>, constructor: F) -> Self
    where
        F: FnOnce() -> Result<DynTool, ToolError> + Send + 'static,
    {
        Self {
            origin: origin.into(),
            constructor: Box::new(constructor),
        }
    }

    /// Runs the constructor. A panicking constructor is reported like a failing one.
    pub fn instantiate(self) -> Result<DynTool, String> {
        match panic::catch_unwind(AssertUnwindSafe(self.constructor)) {
            Ok(Ok(tool)) => Ok(tool),
            Ok(Err(error)) => Err(error.to_string()),
            Err(payload) => Err(format!(
                "constructor panicked: {}",
                panic_message(payload.as_ref())
            )),
        }
    }
}

impl fmt::Debug for ToolCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCandidate")
            .field("origin", &self.origin)
            .finish()
    }
}

/// Supplies candidate tool implementations.
pub trait ToolSource: Send + Sync {
    /// Describes the source for logs and reports.
    fn origin(&self) -> String;

    /// Enumerates candidates. Failing here excludes the whole source, not its siblings.
    fn candidates(&self) -> Result<Vec<ToolCandidate>, DiscoveryError>;
}

/// In-process constructors registered by embedding code.
#[derive(Clone, Default)]
pub struct StaticSource {
    name: String,
    constructors: Vec<(String, SharedConstructor)>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constructors: Vec::new(),
        }
    }

    /// Adds a constructor under a label.
    pub fn with<F>(mut self, label: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> Result<DynTool, ToolError> + Send + Sync + 'static,
    {
        self.constructors.push((label.into(), Arc::new(constructor)));
        self
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl fmt::Debug for StaticSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticSource")
            .field("name", &self.name)
            .field("constructors", &self.constructors.len())
            .finish()
    }
}

impl ToolSource for StaticSource {
    fn origin(&self) -> String {
        self.name.clone()
    }

    fn candidates(&self) -> Result<Vec<ToolCandidate>, DiscoveryError> {
        Ok(self
            .constructors
            .iter()
            .map(|(label, constructor)| {
                let constructor = constructor.clone();
                ToolCandidate::new(format!("{}::{}", self.name, label), move || constructor())
            })
            .collect())
    }
}

/// A directory of JSON tool manifests, each backed by an external command.
///
/// Files starting with `_` or `.` are skipped. Candidates are produced in
/// filename order so discovery is deterministic.
#[derive(Debug, Clone)]
pub struct ManifestDirSource {
    dir: PathBuf,
}

impl ManifestDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ToolSource for ManifestDirSource {
    fn origin(&self) -> String {
        self.dir.display().to_string()
    }

    fn candidates(&self) -> Result<Vec<ToolCandidate>, DiscoveryError> {
        if !self.dir.exists() {
            warn!(dir = %self.dir.display(), "Tools directory does not exist");
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.dir).map_err(|e| DiscoveryError::Source {
            origin: self.origin(),
            message: e.to_string(),
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_manifest(path))
            .collect();
        paths.sort();

        debug!(dir = %self.dir.display(), count = paths.len(), "Found tool manifests");

        Ok(paths
            .into_iter()
            .map(|path| {
                let origin = path.display().to_string();
                ToolCandidate::new(origin, move || {
                    CommandTool::from_manifest_path(&path).map(|tool| Arc::new(tool) as DynTool)
                })
            })
            .collect())
    }
}

fn is_manifest(path: &Path) -> bool {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    path.is_file()
        && !file_name.starts_with('_')
        && !file_name.starts_with('.')
        && path.extension().is_some_and(|ext| ext == "json")
}

/// Extracts the message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
