//! Client kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The host application family member a provider is running inside.
///
/// Some state domains need a different storage tier on particular hosts
/// (the web client, for example, has no trustworthy disk storage for
/// session material); definitions record those overrides per client kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    /// Browser extension.
    Browser,
    /// Desktop application.
    Desktop,
    /// Web vault.
    Web,
    /// Command-line client.
    Cli,
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKind::Browser => f.write_str("browser"),
            ClientKind::Desktop => f.write_str("desktop"),
            ClientKind::Web => f.write_str("web"),
            ClientKind::Cli => f.write_str("cli"),
        }
    }
}
