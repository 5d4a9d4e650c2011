//! The terraform command a delivery resolves to.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which terraform command to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// `terraform plan`: read-only preview.
    Plan,
    /// `terraform apply`: mutates infrastructure.
    Apply,
}

impl CommandKind {
    /// Returns the terraform subcommand name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Plan => "plan",
            CommandKind::Apply => "apply",
        }
    }

    /// Returns the full argument list for this command.
    ///
    /// Runs are unattended, so apply always carries `-auto-approve`.
    pub fn args(&self) -> &'static [&'static str] {
        match self {
            CommandKind::Plan => &["plan", "-input=false", "-no-color"],
            CommandKind::Apply => &["apply", "-input=false", "-no-color", "-auto-approve"],
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
