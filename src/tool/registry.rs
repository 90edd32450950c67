use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tracing::{info, warn};

use crate::tool::source::panic_message;
use crate::tool::{DynTool, SchemaError, ToolCandidate, ToolSchema, ToolSource};

/// Errors surfaced while discovering tools. Each one excludes only the tool it names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    /// The constructor failed or panicked
    #[error("failed to instantiate tool from {origin}: {message}")]
    Instantiation { origin: String, message: String },
    /// The declared schema is not well-formed
    #[error("malformed schema from {origin}: {source}")]
    MalformedSchema {
        origin: String,
        #[source]
        source: SchemaError,
    },
    /// More than one candidate declared the same name; none of them is registered
    #[error("duplicate tool name '{name}' declared by {}", origins.join(", "))]
    DuplicateName { name: String, origins: Vec<String> },
    /// A source could not be enumerated at all
    #[error("failed to read tool source {origin}: {message}")]
    Source { origin: String, message: String },
}

/// A validated schema bound to its implementation.
#[derive(Clone)]
pub struct RegisteredTool {
    schema: ToolSchema,
    tool: DynTool,
    origin: String,
}

impl RegisteredTool {
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    pub fn tool(&self) -> &DynTool {
        &self.tool
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }
}

impl fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.schema.name)
            .field("origin", &self.origin)
            .finish()
    }
}

/// Outcome of a discovery pass: the usable registry plus everything that was excluded.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub registry: ToolRegistry,
    pub errors: Vec<DiscoveryError>,
}

/// A name-to-tool table, read-only once discovery finishes.
///
/// Tools keep insertion order so the schema list sent to the model is stable.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Creates a new empty tool registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enumerates every source and builds a registry from their candidates.
    pub fn discover(sources: &[Box<dyn ToolSource>]) -> DiscoveryReport {
        let mut candidates = Vec::new();
        let mut source_errors = Vec::new();

        for source in sources {
            match source.candidates() {
                Ok(found) => candidates.extend(found),
                Err(error) => {
                    warn!(source = %source.origin(), %error, "Tool source failed");
                    source_errors.push(error);
                }
            }
        }

        let mut report = Self::from_candidates(candidates);
        source_errors.append(&mut report.errors);
        report.errors = source_errors;
        report
    }

    /// Instantiates and validates candidates.
    ///
    /// Every name declared more than once is rejected outright; the remaining
    /// tools are registered in candidate order.
    pub fn from_candidates(candidates: Vec<ToolCandidate>) -> DiscoveryReport {
        let mut errors = Vec::new();
        let mut valid: Vec<RegisteredTool> = Vec::new();

        for candidate in candidates {
            let origin = candidate.origin.clone();
            let tool = match candidate.instantiate() {
                Ok(tool) => tool,
                Err(message) => {
                    warn!(%origin, %message, "Failed to instantiate tool");
                    errors.push(DiscoveryError::Instantiation { origin, message });
                    continue;
                }
            };

            let schema = match read_schema(&tool) {
                Ok(schema) => schema,
                Err(message) => {
                    warn!(%origin, %message, "Failed to read tool schema");
                    errors.push(DiscoveryError::Instantiation { origin, message });
                    continue;
                }
            };
            if let Err(source) = schema.validate() {
                warn!(%origin, error = %source, "Rejected malformed tool schema");
                errors.push(DiscoveryError::MalformedSchema { origin, source });
                continue;
            }

            valid.push(RegisteredTool {
                schema,
                tool,
                origin,
            });
        }

        let mut origins_by_name: HashMap<&str, Vec<String>> = HashMap::new();
        for entry in &valid {
            origins_by_name
                .entry(entry.name())
                .or_default()
                .push(entry.origin.clone());
        }

        let mut duplicates: Vec<DiscoveryError> = Vec::new();
        let mut reported: Vec<&str> = Vec::new();
        for entry in &valid {
            let origins = &origins_by_name[entry.name()];
            if origins.len() > 1 && !reported.contains(&entry.name()) {
                warn!(name = %entry.name(), ?origins, "Duplicate tool name; excluding all");
                reported.push(entry.name());
                duplicates.push(DiscoveryError::DuplicateName {
                    name: entry.name().to_string(),
                    origins: origins.clone(),
                });
            }
        }
        let rejected: Vec<String> = reported.iter().map(|s| s.to_string()).collect();
        errors.extend(duplicates);

        let mut registry = ToolRegistry::new();
        for entry in valid {
            if rejected.iter().any(|name| name == entry.name()) {
                continue;
            }
            info!(name = %entry.name(), origin = %entry.origin, "Discovered tool");
            registry.insert(entry);
        }

        info!(count = registry.len(), errors = errors.len(), "Tool discovery finished");
        DiscoveryReport { registry, errors }
    }

    /// Registers one tool, applying discovery's validation.
    pub fn register(&mut self, tool: DynTool) -> Result<(), DiscoveryError> {
        self.register_from(tool, "registered")
    }

    /// Registers one tool with an explicit origin label.
    pub fn register_from(
        &mut self,
        tool: DynTool,
        origin: impl Into<String>,
    ) -> Result<(), DiscoveryError> {
        let origin = origin.into();
        let schema = read_schema(&tool).map_err(|message| DiscoveryError::Instantiation {
            origin: origin.clone(),
            message,
        })?;
        schema
            .validate()
            .map_err(|source| DiscoveryError::MalformedSchema {
                origin: origin.clone(),
                source,
            })?;

        if let Some(existing) = self.get(&schema.name) {
            return Err(DiscoveryError::DuplicateName {
                name: schema.name.clone(),
                origins: vec![existing.origin.clone(), origin],
            });
        }

        self.insert(RegisteredTool {
            schema,
            tool,
            origin,
        });
        Ok(())
    }

    fn insert(&mut self, entry: RegisteredTool) {
        self.index.insert(entry.schema.name.clone(), self.tools.len());
        self.tools.push(entry);
    }

    /// Gets a tool by name.
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Schemas in registration order.
    pub fn list_schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.schema.clone()).collect()
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Returns the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RegisteredTool> {
        self.tools.iter()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl<'a> IntoIterator for &'a ToolRegistry {
    type Item = &'a RegisteredTool;
    type IntoIter = std::slice::Iter<'a, RegisteredTool>;

    fn into_iter(self) -> Self::IntoIter {
        self.tools.iter()
    }
}

/// Plugin code runs inside `schema()` too, so a panic there is contained like a constructor's.
fn read_schema(tool: &DynTool) -> Result<ToolSchema, String> {
    panic::catch_unwind(AssertUnwindSafe(|| tool.schema()))
        .map_err(|payload| format!("schema() panicked: {}", panic_message(payload.as_ref())))
}
