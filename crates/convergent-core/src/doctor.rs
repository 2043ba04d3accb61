//! The Doctor: a pure, advisory validator over a materialized
//! `DocumentState`. Never mutates the document; only reports.

use crate::materialize::DocumentState;
use crate::schema::giantt::{self, GianttSchema, Relation};
use crate::schema::inventory::InventorySchema;
use crate::schema::{DocumentSchema, ValidationKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IssueKind {
    DanglingReference,
    IncompleteChain,
    OrphanedItem,
    ChartInconsistency,
    TagInconsistency,
    DependencyCycle,
}

#[derive(Clone, Debug)]
pub struct Issue {
    pub kind: IssueKind,
    pub item_id: Option<String>,
    pub related_ids: Vec<String>,
    pub message: String,
    pub suggested_fix: Option<String>,
}

impl Issue {
    fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            item_id: None,
            related_ids: Vec::new(),
            message: message.into(),
            suggested_fix: None,
        }
    }

    fn for_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    fn related(mut self, ids: Vec<String>) -> Self {
        self.related_ids = ids;
        self
    }

    fn fix(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_fix = Some(suggestion.into());
        self
    }
}

/// Run every check applicable to the items actually present in `state`.
/// Giantt and inventory checks both run — an item type not present in the
/// document simply contributes no issues from that side.
pub fn diagnose(state: &DocumentState) -> Vec<Issue> {
    let mut issues = Vec::new();
    issues.extend(schema_issues(GianttSchema, state));
    issues.extend(schema_issues(InventorySchema, state));
    issues.extend(incomplete_chains(state));
    issues.extend(orphaned_items(state));
    issues.extend(tag_inconsistencies(state));
    issues.extend(chart_inconsistencies(state));
    issues
}

fn schema_issues(schema: impl DocumentSchema, state: &DocumentState) -> Vec<Issue> {
    schema
        .validate(state)
        .into_iter()
        .map(|v| {
            let kind = match v.kind {
                ValidationKind::DanglingReference => IssueKind::DanglingReference,
                ValidationKind::DependencyCycle => IssueKind::DependencyCycle,
            };
            let mut issue = Issue::new(kind, v.message);
            if let Some(item_id) = v.item_id {
                issue = issue.for_item(item_id);
            }
            issue
        })
        .collect()
}

/// A REQUIRES without its BLOCKS mirror (or vice versa) means the
/// bidirectional convention was broken — most likely a hand-authored op
/// that skipped the builder.
fn incomplete_chains(state: &DocumentState) -> Vec<Issue> {
    let mut issues = Vec::new();
    for (id, item) in state.iter_live() {
        for (relation, mirror) in [
            (Relation::Requires, Relation::Blocks),
            (Relation::AnyOf, Relation::Sufficient),
        ] {
            for target in item.set(relation.as_str()) {
                let Some(target_id) = target.as_str() else { continue };
                let Some(target_item) = state.get(target_id) else { continue };
                let has_mirror = target_item
                    .set(mirror.as_str())
                    .any(|v| v.as_str() == Some(id.as_str()));
                if !has_mirror {
                    issues.push(
                        Issue::new(
                            IssueKind::IncompleteChain,
                            format!(
                                "{} {} {} but {} has no {} back-reference",
                                id,
                                relation.as_str(),
                                target_id,
                                target_id,
                                mirror.as_str()
                            ),
                        )
                        .for_item(id.clone())
                        .related(vec![target_id.to_string()])
                        .fix(format!(
                            "add {} {} {}",
                            target_id,
                            mirror.as_str().to_lowercase(),
                            id
                        )),
                    );
                }
            }
        }
    }
    issues
}

/// A Giantt item with no relations at all isn't wrong, but is flagged as a
/// candidate for review — it participates in no chain.
fn orphaned_items(state: &DocumentState) -> Vec<Issue> {
    let mut issues = Vec::new();
    for (id, item) in state.iter_live() {
        if item.item_type != giantt::ITEM_TYPE {
            continue;
        }
        let has_any_relation = Relation::ALL.iter().any(|r| item.set(r.as_str()).next().is_some());
        let is_referenced = state.iter_live().any(|(other_id, other)| {
            other_id != id
                && Relation::ALL
                    .iter()
                    .any(|r| other.set(r.as_str()).any(|v| v.as_str() == Some(id.as_str())))
        });
        if !has_any_relation && !is_referenced {
            issues.push(
                Issue::new(IssueKind::OrphanedItem, format!("{} has no relations to any other item", id))
                    .for_item(id.clone()),
            );
        }
    }
    issues
}

/// A `container_<id>` tag whose referenced container does not exist is
/// also surfaced here (in addition to `InventorySchema::validate`) as a
/// `TagInconsistency`, since it is fundamentally a tag-naming problem
/// rather than a schema-field problem.
fn tag_inconsistencies(state: &DocumentState) -> Vec<Issue> {
    let mut issues = Vec::new();
    for (id, item) in state.iter_live() {
        for tag in item.set("tags") {
            let Some(tag) = tag.as_str() else { continue };
            if tag.trim().is_empty() || tag != tag.trim() {
                issues.push(
                    Issue::new(IssueKind::TagInconsistency, format!("{} has a malformed tag {:?}", id, tag))
                        .for_item(id.clone()),
                );
            }
        }
    }
    issues
}

/// Two Giantt items on opposite ends of a `REQUIRES`/`BLOCKS` edge that put
/// themselves on charts but share none in common: whichever chart view
/// renders one side of the dependency will silently drop the other,
/// which is exactly the kind of thing a chart's consumer needs flagged.
fn chart_inconsistencies(state: &DocumentState) -> Vec<Issue> {
    let mut issues = Vec::new();
    for (id, item) in state.iter_live() {
        if item.item_type != giantt::ITEM_TYPE {
            continue;
        }
        let charts: std::collections::BTreeSet<&str> = item.set("charts").filter_map(|v| v.as_str()).collect();
        if charts.is_empty() {
            continue;
        }
        for relation in [Relation::Requires, Relation::Blocks] {
            for target in item.set(relation.as_str()) {
                let Some(target_id) = target.as_str() else { continue };
                let Some(target_item) = state.get(target_id) else { continue };
                let target_charts: std::collections::BTreeSet<&str> =
                    target_item.set("charts").filter_map(|v| v.as_str()).collect();
                if target_charts.is_empty() || !charts.is_disjoint(&target_charts) {
                    continue;
                }
                issues.push(
                    Issue::new(
                        IssueKind::ChartInconsistency,
                        format!(
                            "{} {} {} but they share no chart ({:?} vs {:?})",
                            id,
                            relation.as_str(),
                            target_id,
                            charts,
                            target_charts
                        ),
                    )
                    .for_item(id.clone())
                    .related(vec![target_id.to_string()]),
                );
            }
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::horizon::Horizon;
    use crate::materialize::materialize;
    use crate::operation::{Envelope, Operation};
    use crate::schema::giantt;
    use crate::value::Value;

    fn env(author: &str, clock: u64, op: Operation) -> Envelope {
        Envelope::author_local(op, author.to_string(), clock, clock, Horizon::new())
    }

    #[test]
    fn flags_dangling_reference() {
        let envs = vec![
            env("A", 0, Operation::add_item("a", giantt::ITEM_TYPE)),
            env("A", 1, Operation::add_to_set("a", "REQUIRES", Value::string("ghost"))),
        ];
        let state = materialize(envs.iter());
        let issues = diagnose(&state);
        assert!(issues.iter().any(|i| i.kind == IssueKind::DanglingReference));
    }

    #[test]
    fn flags_incomplete_chain_when_mirror_missing() {
        let envs = vec![
            env("A", 0, Operation::add_item("a", giantt::ITEM_TYPE)),
            env("A", 1, Operation::add_item("b", giantt::ITEM_TYPE)),
            // Hand-authored, skipping the bidirectional builder.
            env("A", 2, Operation::add_to_set("a", "REQUIRES", Value::string("b"))),
        ];
        let state = materialize(envs.iter());
        let issues = diagnose(&state);
        assert!(issues.iter().any(|i| i.kind == IssueKind::IncompleteChain));
    }

    #[test]
    fn bidirectional_builder_produces_no_incomplete_chain() {
        let mut envs = vec![
            env("A", 0, Operation::add_item("a", giantt::ITEM_TYPE)),
            env("A", 1, Operation::add_item("b", giantt::ITEM_TYPE)),
        ];
        for (i, op) in giantt::requires("a", "b").into_iter().enumerate() {
            envs.push(env("A", 2 + i as u64, op));
        }
        let state = materialize(envs.iter());
        let issues = diagnose(&state);
        assert!(!issues.iter().any(|i| i.kind == IssueKind::IncompleteChain));
    }

    #[test]
    fn flags_orphaned_item() {
        let envs = vec![env("A", 0, Operation::add_item("lonely", giantt::ITEM_TYPE))];
        let state = materialize(envs.iter());
        let issues = diagnose(&state);
        assert!(issues.iter().any(|i| i.kind == IssueKind::OrphanedItem));
    }

    #[test]
    fn flags_requires_cycle_as_dependency_cycle_not_chart_inconsistency() {
        let mut envs = vec![
            env("A", 0, Operation::add_item("a", giantt::ITEM_TYPE)),
            env("A", 1, Operation::add_item("b", giantt::ITEM_TYPE)),
        ];
        for (i, op) in giantt::requires("a", "b").into_iter().enumerate() {
            envs.push(env("A", 2 + i as u64, op));
        }
        for (i, op) in giantt::requires("b", "a").into_iter().enumerate() {
            envs.push(env("A", 10 + i as u64, op));
        }
        let state = materialize(envs.iter());
        let issues = diagnose(&state);
        assert!(issues.iter().any(|i| i.kind == IssueKind::DependencyCycle));
        assert!(!issues.iter().any(|i| i.kind == IssueKind::ChartInconsistency));
    }

    #[test]
    fn flags_chart_inconsistency_when_required_item_is_on_a_different_chart() {
        let mut envs = vec![
            env("A", 0, Operation::add_item("a", giantt::ITEM_TYPE)),
            env("A", 1, Operation::add_item("b", giantt::ITEM_TYPE)),
            env("A", 2, Operation::add_to_set("a", "charts", Value::string("Sprint1"))),
            env("A", 3, Operation::add_to_set("b", "charts", Value::string("Sprint2"))),
        ];
        for (i, op) in giantt::requires("a", "b").into_iter().enumerate() {
            envs.push(env("A", 4 + i as u64, op));
        }
        let state = materialize(envs.iter());
        let issues = diagnose(&state);
        assert!(issues.iter().any(|i| i.kind == IssueKind::ChartInconsistency));
    }

    #[test]
    fn chart_inconsistency_does_not_fire_when_charts_overlap() {
        let mut envs = vec![
            env("A", 0, Operation::add_item("a", giantt::ITEM_TYPE)),
            env("A", 1, Operation::add_item("b", giantt::ITEM_TYPE)),
            env("A", 2, Operation::add_to_set("a", "charts", Value::string("Sprint1"))),
            env("A", 3, Operation::add_to_set("b", "charts", Value::string("Sprint1"))),
        ];
        for (i, op) in giantt::requires("a", "b").into_iter().enumerate() {
            envs.push(env("A", 4 + i as u64, op));
        }
        let state = materialize(envs.iter());
        let issues = diagnose(&state);
        assert!(!issues.iter().any(|i| i.kind == IssueKind::ChartInconsistency));
    }

    #[test]
    fn inventory_dangling_container_reference_is_classified_correctly() {
        use crate::schema::inventory::{self, InventorySchema};

        let mut envs = Vec::new();
        let mut clock = 0;
        for op in inventory::add_item("widget_1", "Parts", "A widget", "shelf") {
            envs.push(env("A", clock, op));
            clock += 1;
        }
        for op in inventory::place_in_container("widget_1", "ghost_box") {
            envs.push(env("A", clock, op));
            clock += 1;
        }

        let state = materialize(envs.iter());
        assert!(!InventorySchema.validate(&state).is_empty());

        let issues = diagnose(&state);
        assert!(issues.iter().any(|i| i.kind == IssueKind::DanglingReference));
        assert!(!issues.iter().any(|i| i.kind == IssueKind::ChartInconsistency));
    }
}
