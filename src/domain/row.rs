use serde::{Deserialize, Serialize};

/// Pixel width of one indentation step in the rendered thread.
pub const INDENT_UNIT_PX: u32 = 40;

/// A row as extracted by a page adapter, before indexing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// Width of the indentation marker in pixels.
    #[serde(default)]
    pub indent_width: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Row {
    pub id: String,
    pub author: String,
    pub indent_depth: u32,
}

impl Row {
    pub fn is_root(&self) -> bool {
        self.indent_depth == 0
    }
}

/// Rows in document order. A row's descendants are the contiguous run of following rows
/// with strictly greater depth.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowIndex {
    rows: Vec<Row>,
}

impl RowIndex {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.rows.iter().position(|row| row.id == id)
    }

    /// End (exclusive) of the subtree rooted at `start`.
    pub fn subtree_end(&self, start: usize) -> usize {
        let Some(base) = self.rows.get(start).map(|row| row.indent_depth) else {
            return start;
        };
        self.rows[start + 1..]
            .iter()
            .position(|row| row.indent_depth <= base)
            .map_or(self.rows.len(), |offset| start + 1 + offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageKind {
    /// A single discussion rendered as a comment tree.
    #[default]
    Comments,
    /// A per-user listing of threads, where blocking does not apply.
    Threads,
}

impl PageKind {
    pub fn blocking_applies(&self) -> bool {
        matches!(self, PageKind::Comments)
    }
}
