//! Runtime configuration shared by every request.
//!
//! The config carries the project identity used to mint fully-qualified
//! unique identifiers (`rpc.<project>.<name>`, `macro.<project>.<name>`).
//! Loading it from disk is the embedding server's business; this core only
//! reads it.

use serde::Deserialize;

use crate::error::{Result, RpcError};

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Project name, used as the package segment of unique ids.
    pub project_name: String,
    /// Active target profile (informational; passed through to collaborators).
    #[serde(default = "default_target")]
    pub target_name: String,
}

fn default_target() -> String {
    "dev".to_string()
}

impl RuntimeConfig {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            target_name: default_target(),
        }
    }

    /// Validate the project name.
    ///
    /// Allowed characters: [a-zA-Z0-9_-]
    /// Length: 1-128 characters
    pub fn validate(&self) -> Result<()> {
        let name = &self.project_name;
        if name.is_empty() || name.len() > 128 {
            return Err(RpcError::Internal(
                "project name must be 1-128 characters".to_string(),
            ));
        }

        let valid = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

        if !valid {
            return Err(RpcError::Internal(format!(
                "project name '{}' may only contain a-z, A-Z, 0-9, _, -",
                name
            )));
        }

        Ok(())
    }
}
