use std::collections::{btree_map::Entry, BTreeMap};

use crate::domain::{ListKind, NameKey, NameSet, SourceList};

pub type Verdict = ListKind;
pub type VerdictSet = BTreeMap<NameKey, Verdict>;

/// Output of one classification pass. Derived data, recomputed on every pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Verdicts from every source.
    pub with_transient: VerdictSet,
    /// Verdicts with transient block lists ignored.
    pub persistent_only: VerdictSet,
    /// Blocked in `with_transient` but not blocked in `persistent_only`.
    pub transient_only_blocked: NameSet,
}

impl Classification {
    /// The block entries of the requested view.
    pub fn blocked(&self, include_transient: bool) -> NameSet {
        let set = if include_transient {
            &self.with_transient
        } else {
            &self.persistent_only
        };
        keys_with(set, ListKind::Block)
    }

    pub fn highlighted(&self) -> NameSet {
        keys_with(&self.with_transient, ListKind::Highlight)
    }
}

pub fn keys_with(set: &VerdictSet, kind: Verdict) -> NameSet {
    set.iter()
        .filter(|(_, verdict)| **verdict == kind)
        .map(|(key, _)| key.clone())
        .collect()
}

/// Resolves one verdict per name. The first source to decide a name wins for each view:
/// local highlights, then local blocks, then remote lists in ascending priority.
pub fn classify(
    local_blocked: &NameSet,
    local_highlighted: &NameSet,
    lists: &[SourceList],
) -> Classification {
    let mut with_transient = VerdictSet::new();
    let mut persistent_only = VerdictSet::new();

    for key in local_highlighted {
        decide(&mut with_transient, key, ListKind::Highlight);
        decide(&mut persistent_only, key, ListKind::Highlight);
    }
    for key in local_blocked {
        decide(&mut with_transient, key, ListKind::Block);
        decide(&mut persistent_only, key, ListKind::Block);
    }

    let mut ordered: Vec<&SourceList> = lists.iter().collect();
    ordered.sort_by_key(|list| list.priority);

    for list in ordered {
        let skip_persistent = list.is_transient_block();
        for member in &list.members {
            let Some(key) = NameKey::new(member) else {
                continue;
            };
            decide(&mut with_transient, &key, list.kind);
            if !skip_persistent {
                decide(&mut persistent_only, &key, list.kind);
            }
        }
    }

    let persistent_blocked = keys_with(&persistent_only, ListKind::Block);
    let transient_only_blocked = keys_with(&with_transient, ListKind::Block)
        .into_iter()
        .filter(|key| !persistent_blocked.contains(key))
        .collect();

    tracing::debug!(
        target: "sync",
        decided = with_transient.len(),
        persistent = persistent_only.len(),
        "classification pass finished"
    );

    Classification {
        with_transient,
        persistent_only,
        transient_only_blocked,
    }
}

fn decide(set: &mut VerdictSet, key: &NameKey, verdict: Verdict) {
    if let Entry::Vacant(slot) = set.entry(key.clone()) {
        slot.insert(verdict);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::name_set;

    fn key(name: &str) -> NameKey {
        NameKey::new(name).unwrap()
    }

    fn list(
        id: &str,
        kind: ListKind,
        transient: bool,
        priority: usize,
        members: &[&str],
    ) -> SourceList {
        SourceList {
            id: id.into(),
            kind,
            transient,
            members: members.iter().map(|m| m.to_string()).collect(),
            priority,
        }
    }

    #[test]
    fn local_signals_outrank_every_remote_list() {
        let lists = vec![
            list("a", ListKind::Block, false, 0, &["Friend"]),
            list("b", ListKind::Highlight, false, 1, &["troll"]),
        ];
        let result = classify(&name_set(["troll"]), &name_set(["friend"]), &lists);
        assert_eq!(result.with_transient[&key("friend")], ListKind::Highlight);
        assert_eq!(result.with_transient[&key("troll")], ListKind::Block);
        assert_eq!(result.persistent_only[&key("friend")], ListKind::Highlight);
        assert_eq!(result.persistent_only[&key("troll")], ListKind::Block);
    }

    #[test]
    fn local_highlight_beats_local_block() {
        let result = classify(&name_set(["both"]), &name_set(["BOTH"]), &[]);
        assert_eq!(result.with_transient[&key("both")], ListKind::Highlight);
        assert!(result.blocked(true).is_empty());
    }

    #[test]
    fn lower_priority_number_wins_regardless_of_slice_order() {
        let lists = vec![
            list("late", ListKind::Block, false, 5, &["n"]),
            list("early", ListKind::Highlight, false, 1, &["N"]),
        ];
        let result = classify(&NameSet::new(), &NameSet::new(), &lists);
        assert_eq!(result.with_transient[&key("n")], ListKind::Highlight);
    }

    #[test]
    fn equal_priority_keeps_subscription_order() {
        let lists = vec![
            list("first", ListKind::Block, false, 0, &["n"]),
            list("second", ListKind::Highlight, false, 0, &["n"]),
        ];
        let result = classify(&NameSet::new(), &NameSet::new(), &lists);
        assert_eq!(result.with_transient[&key("n")], ListKind::Block);
    }

    #[test]
    fn transient_block_only_names_are_reported() {
        let lists = vec![
            list("temp", ListKind::Block, true, 0, &["noisy", "shared"]),
            list("perm", ListKind::Block, false, 1, &["shared"]),
        ];
        let result = classify(&NameSet::new(), &NameSet::new(), &lists);
        assert_eq!(result.transient_only_blocked, name_set(["noisy"]));
        assert!(!result.persistent_only.contains_key(&key("noisy")));
        assert_eq!(result.persistent_only[&key("shared")], ListKind::Block);
    }

    #[test]
    fn transient_block_does_not_consume_persistent_priority() {
        let lists = vec![
            list("temp", ListKind::Block, true, 0, &["x"]),
            list("fans", ListKind::Highlight, false, 1, &["x"]),
        ];
        let result = classify(&NameSet::new(), &NameSet::new(), &lists);
        assert_eq!(result.with_transient[&key("x")], ListKind::Block);
        assert_eq!(result.persistent_only[&key("x")], ListKind::Highlight);
        assert!(result.transient_only_blocked.contains(&key("x")));
    }

    #[test]
    fn transient_flag_on_highlight_list_is_ignored() {
        let lists = vec![list("h", ListKind::Highlight, true, 0, &["x"])];
        let result = classify(&NameSet::new(), &NameSet::new(), &lists);
        assert_eq!(result.persistent_only[&key("x")], ListKind::Highlight);
        assert!(result.transient_only_blocked.is_empty());
    }

    #[test]
    fn blank_members_are_skipped() {
        let lists = vec![list("a", ListKind::Block, false, 0, &["", "  ", "ok"])];
        let result = classify(&NameSet::new(), &NameSet::new(), &lists);
        assert_eq!(result.with_transient.len(), 1);
    }
}
