//! Tools backed by an external command, declared in a JSON manifest.
//!
//! The command receives the call arguments as a JSON object on stdin and
//! answers on stdout. A non-zero exit status is an execution failure and
//! carries stderr back to the model.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::tool::{PropertySchema, Tool, ToolError, ToolSchema};

/// On-disk description of a command-backed tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolManifest {
    /// The schema declared to the model
    #[serde(flatten)]
    pub schema: ToolSchema,
    /// Program to run; relative paths resolve against the manifest's directory
    pub command: String,
    /// Fixed program arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Extra environment variables
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

impl ToolManifest {
    /// A starter manifest for a new tool.
    pub fn template(name: &str) -> Self {
        Self {
            schema: ToolSchema::new(name, "Description of what this tool does").with_property(
                "input",
                PropertySchema::string("Input parameter description"),
                true,
            ),
            command: format!("./{name}.sh"),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }
}

/// A tool that runs an external command per call.
#[derive(Debug, Clone)]
pub struct CommandTool {
    manifest: ToolManifest,
    base_dir: PathBuf,
}

impl CommandTool {
    pub fn new(manifest: ToolManifest, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest,
            base_dir: base_dir.into(),
        }
    }

    /// Loads a manifest file.
    pub fn from_manifest_path(path: &Path) -> Result<Self, ToolError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ToolError::ExecutionFailed(format!("{}: {e}", path.display())))?;
        let manifest: ToolManifest = serde_json::from_str(&raw)
            .map_err(|e| ToolError::InvalidArguments(format!("{}: {e}", path.display())))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self::new(manifest, base_dir))
    }

    fn program(&self) -> PathBuf {
        let command = Path::new(&self.manifest.command);
        if command.is_relative() && command.components().count() > 1 {
            self.base_dir.join(command)
        } else {
            command.to_path_buf()
        }
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn schema(&self) -> ToolSchema {
        self.manifest.schema.clone()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let program = self.program();
        debug!(tool = %self.manifest.schema.name, program = %program.display(), "Spawning tool command");

        let payload =
            serde_json::to_vec(&args).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let mut child = Command::new(&program)
            .args(&self.manifest.args)
            .envs(&self.manifest.env)
            .current_dir(&self.base_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ToolError::ExecutionFailed(format!("failed to spawn {}: {e}", program.display()))
            })?;

        // Feed stdin while draining stdout so neither side can fill its pipe and stall.
        let stdin = child.stdin.take();
        let write = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(&payload).await {
                // The command is free to ignore its input.
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                result => result,
            }
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());

        let output = output.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        written.map_err(|e| ToolError::ExecutionFailed(format!("failed to write stdin: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::ExecutionFailed(format!(
                "{} exited with {}: {}",
                self.manifest.schema.name,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}
