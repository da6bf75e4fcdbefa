use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::{
    domain::{PageKind, RawRow},
    engine::{
        build_index, project, render_order, reorder, AuthorVerdicts, RowEffect, PLACEHOLDER_LABEL,
    },
    settings::{HideMode, LocalState, RowHighlights},
};

/// Remembers the newest generation a page applied.
#[derive(Debug, Default)]
pub struct GenerationGuard {
    applied: AtomicU64,
}

impl GenerationGuard {
    /// Returns false when `generation` is not newer than the last applied one.
    pub fn try_advance(&self, generation: u64) -> bool {
        self.applied
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |applied| {
                (generation > applied).then_some(generation)
            })
            .is_ok()
    }

    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectedRow {
    pub id: String,
    pub author: String,
    pub depth: u32,
    #[serde(flatten)]
    pub effect: RowEffect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<&'static str>,
}

/// Everything a page adapter needs to render one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageProjection {
    pub generation: u64,
    pub page_id: String,
    pub kind: PageKind,
    pub hide_mode: HideMode,
    pub rows: Vec<ProjectedRow>,
    /// Ids of collapsed roots moved to the end, in document order.
    pub moved: Vec<String>,
    pub render_order: Vec<String>,
}

impl PageProjection {
    pub fn compute(
        generation: u64,
        page_id: &str,
        kind: PageKind,
        raw_rows: &[RawRow],
        state: &LocalState,
        manual: &RowHighlights,
    ) -> Self {
        let index = build_index(raw_rows);
        let verdicts =
            AuthorVerdicts::new(state.effective_blocked(), state.effective_highlighted());
        let styles = state.style_map();
        let marks = project(&index, kind, &verdicts, manual, |key| {
            styles.get(key).cloned().unwrap_or_default()
        });

        let moves = if kind.blocking_applies() {
            reorder(&index, &marks)
        } else {
            Vec::new()
        };
        let rows = index.rows();
        let order = render_order(rows.len(), &moves);

        let projected = rows
            .iter()
            .zip(&marks)
            .map(|(row, mark)| {
                let effect = mark.effect();
                let placeholder =
                    matches!(effect, RowEffect::CollapsedPlaceholder).then_some(PLACEHOLDER_LABEL);
                ProjectedRow {
                    id: row.id.clone(),
                    author: row.author.clone(),
                    depth: row.indent_depth,
                    effect,
                    placeholder,
                }
            })
            .collect();

        Self {
            generation,
            page_id: page_id.to_string(),
            kind,
            hide_mode: state.hide_mode,
            rows: projected,
            moved: moves.iter().map(|&i| rows[i].id.clone()).collect(),
            render_order: order.iter().map(|&i| rows[i].id.clone()).collect(),
        }
    }

    pub fn effect_of(&self, row_id: &str) -> Option<&RowEffect> {
        self.rows
            .iter()
            .find(|row| row.id == row_id)
            .map(|row| &row.effect)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::engine::style::HighlightStyle;

    fn raw(id: &str, author: &str, width: u32) -> RawRow {
        RawRow {
            id: Some(id.into()),
            author: Some(author.into()),
            indent_width: Some(width),
        }
    }

    fn thread() -> Vec<RawRow> {
        vec![
            raw("a", "troll", 0),
            raw("a1", "bob", 40),
            raw("b", "alice", 0),
            raw("b1", "friend", 40),
            raw("b2", "bob", 80),
        ]
    }

    #[test]
    fn guard_drops_stale_generations() {
        let guard = GenerationGuard::default();
        assert!(guard.try_advance(2));
        assert!(!guard.try_advance(1));
        assert!(!guard.try_advance(2));
        assert!(guard.try_advance(5));
        assert_eq!(guard.applied(), 5);
    }

    #[test]
    fn projects_blocks_highlights_and_order() {
        let mut state = LocalState {
            highlighted_users: vec!["Friend".into()],
            ..Default::default()
        };
        state.blocked.combined = vec!["troll".into()];
        let manual = RowHighlights::from(["b2".to_string()]);

        let projection =
            PageProjection::compute(7, "p", PageKind::Comments, &thread(), &state, &manual);

        assert_eq!(projection.generation, 7);
        assert_eq!(projection.effect_of("a"), Some(&RowEffect::CollapsedPlaceholder));
        assert_eq!(projection.effect_of("a1"), Some(&RowEffect::Hidden));
        assert_eq!(projection.effect_of("b"), Some(&RowEffect::None));
        assert_eq!(
            projection.effect_of("b1"),
            Some(&RowEffect::Highlighted {
                style: HighlightStyle::default_style()
            })
        );
        assert!(matches!(
            projection.effect_of("b2"),
            Some(RowEffect::Highlighted { .. })
        ));
        assert_eq!(projection.rows[0].placeholder, Some(PLACEHOLDER_LABEL));
        assert_eq!(projection.moved, vec!["a"]);
        assert_eq!(projection.render_order, vec!["a1", "b", "b1", "b2", "a"]);
    }

    #[test]
    fn transient_toggle_uses_persistent_blocks() {
        let mut state = LocalState::default();
        state.blocked.combined = vec!["troll".into()];
        state.blocked.combined_without_transient = Vec::new();
        state.transient_unblock_active = true;

        let manual = RowHighlights::new();
        let projection =
            PageProjection::compute(1, "p", PageKind::Comments, &thread(), &state, &manual);
        assert_eq!(projection.effect_of("a"), Some(&RowEffect::None));
        assert!(projection.moved.is_empty());
    }

    #[test]
    fn threads_pages_are_never_blocked() {
        let mut state = LocalState::default();
        state.blocked.combined = vec!["troll".into()];
        let manual = RowHighlights::new();
        let projection =
            PageProjection::compute(1, "p", PageKind::Threads, &thread(), &state, &manual);
        assert!(projection
            .rows
            .iter()
            .all(|row| !matches!(row.effect, RowEffect::Hidden | RowEffect::CollapsedPlaceholder)));
        assert_eq!(projection.render_order, vec!["a", "a1", "b", "b1", "b2"]);
    }
}
