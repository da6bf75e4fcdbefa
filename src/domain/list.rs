use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    #[default]
    Block,
    Highlight,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Block => "block",
            ListKind::Highlight => "highlight",
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListKind {
    type Err = UnknownListKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "block" => Ok(ListKind::Block),
            "highlight" => Ok(ListKind::Highlight),
            other => Err(UnknownListKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown list type {0:?}; expected \"block\" or \"highlight\"")]
pub struct UnknownListKind(pub String);

/// One subscribed remote list as handed to a classification pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceList {
    pub id: String,
    pub kind: ListKind,
    pub transient: bool,
    pub members: Vec<String>,
    /// Position among subscribed lists; lower wins.
    pub priority: usize,
}

impl SourceList {
    pub fn is_transient_block(&self) -> bool {
        self.transient && self.kind == ListKind::Block
    }
}
