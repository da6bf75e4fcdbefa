use std::collections::BTreeSet;

use serde::Serialize;

use crate::{
    domain::{ListKind, NameKey, NameSet, PageKind, RowIndex},
    engine::{classify::Verdict, style::HighlightStyle},
};

/// Text shown in place of a collapsed root's content.
pub const PLACEHOLDER_LABEL: &str = "blocked";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockMark {
    #[default]
    None,
    Hidden,
    /// Content swapped for a placeholder; the adapter keeps the original for restoration.
    Collapsed,
}

/// Block and highlight marks for one row. Both are recorded independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RowMarks {
    pub block: BlockMark,
    pub highlight: Option<HighlightStyle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum RowEffect {
    None,
    Hidden,
    CollapsedPlaceholder,
    Highlighted { style: HighlightStyle },
}

impl RowMarks {
    /// Visible effect with precedence hidden > collapsed > highlighted > none.
    pub fn effect(&self) -> RowEffect {
        match (&self.block, &self.highlight) {
            (BlockMark::Hidden, _) => RowEffect::Hidden,
            (BlockMark::Collapsed, _) => RowEffect::CollapsedPlaceholder,
            (BlockMark::None, Some(style)) => RowEffect::Highlighted {
                style: style.clone(),
            },
            (BlockMark::None, None) => RowEffect::None,
        }
    }
}

/// Per-author verdict lookup used by the projector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorVerdicts {
    blocked: NameSet,
    highlighted: NameSet,
}

impl AuthorVerdicts {
    pub fn new(blocked: NameSet, highlighted: NameSet) -> Self {
        Self {
            blocked,
            highlighted,
        }
    }

    pub fn verdict(&self, key: &NameKey) -> Option<Verdict> {
        if self.blocked.contains(key) {
            Some(ListKind::Block)
        } else if self.highlighted.contains(key) {
            Some(ListKind::Highlight)
        } else {
            None
        }
    }
}

/// Computes fresh marks for every row of `index`.
///
/// Blocked roots collapse to a placeholder and hide their descendants; blocked replies hide
/// themselves and their descendants. Blocking is skipped on pages where it does not apply.
/// Manual highlights cover the flagged row's whole subtree, author highlights only the row.
pub fn project<F>(
    index: &RowIndex,
    page_kind: PageKind,
    verdicts: &AuthorVerdicts,
    manual_highlight_ids: &BTreeSet<String>,
    style_for: F,
) -> Vec<RowMarks>
where
    F: Fn(&NameKey) -> HighlightStyle,
{
    let rows = index.rows();
    let mut marks = vec![RowMarks::default(); rows.len()];
    let authors: Vec<Option<NameKey>> = rows.iter().map(|row| NameKey::new(&row.author)).collect();

    if page_kind.blocking_applies() {
        for (i, row) in rows.iter().enumerate() {
            let blocked = authors[i]
                .as_ref()
                .is_some_and(|key| verdicts.verdict(key) == Some(ListKind::Block));
            if !blocked {
                continue;
            }
            let end = index.subtree_end(i);
            if row.is_root() {
                marks[i].block = BlockMark::Collapsed;
                for mark in &mut marks[i + 1..end] {
                    mark.block = BlockMark::Hidden;
                }
            } else {
                for mark in &mut marks[i..end] {
                    mark.block = BlockMark::Hidden;
                }
            }
        }
    }

    let manual_style = HighlightStyle::default_style();
    for id in manual_highlight_ids.iter().filter(|id| !id.is_empty()) {
        let Some(start) = index.position(id) else {
            continue;
        };
        let end = index.subtree_end(start);
        for mark in &mut marks[start..end] {
            mark.highlight = Some(manual_style.clone());
        }
    }

    for (i, key) in authors.iter().enumerate() {
        let Some(key) = key else {
            continue;
        };
        if verdicts.verdict(key) == Some(ListKind::Highlight) {
            marks[i].highlight = Some(style_for(key).effective());
        }
    }

    marks
}
