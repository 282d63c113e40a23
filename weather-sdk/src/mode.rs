use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

/// How a client keeps its cache up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// Fetch only when a caller asks for a location that is missing or stale.
    #[default]
    Request,
    /// Additionally run a background refresher over the cached locations.
    Polling,
}

impl OperationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationMode::Request => "request",
            OperationMode::Polling => "polling",
        }
    }

    pub const fn all() -> &'static [OperationMode] {
        &[OperationMode::Request, OperationMode::Polling]
    }
}

impl std::fmt::Display for OperationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for OperationMode {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "request" => Ok(OperationMode::Request),
            "polling" => Ok(OperationMode::Polling),
            _ => Err(anyhow::anyhow!(
                "Unknown operation mode '{value}'. Supported modes: request, polling."
            )),
        }
    }
}
