//! Deterministic reduction of an envelope multiset into a schema-neutral
//! `DocumentState`.
//!
//! Existence is decided first (informed-remove over every op that can
//! keep an item alive, not just `AddItem`), then scalar last-writer-wins,
//! then per-set survivor resolution. It is a pure function of the
//! envelope multiset — replay order never affects the result.

use crate::horizon::DeviceId;
use crate::operation::{Envelope, ItemId, OpId, Operation};
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Metadata of the envelope that won a scalar-field resolution, kept around
/// for introspection (debugging, the Doctor, UIs that want to show "last
/// edited by").
#[derive(Clone, Debug, PartialEq)]
pub struct EnvelopeMeta {
    pub op_id: OpId,
    pub author: DeviceId,
    pub clock: u64,
    pub timestamp: u64,
}

impl EnvelopeMeta {
    fn from(env: &Envelope) -> Self {
        Self {
            op_id: env.op_id,
            author: env.author.clone(),
            clock: env.clock,
            timestamp: env.timestamp,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Existence {
    Live,
    Removed { removed_by: BTreeSet<OpId> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    pub item_type: String,
    pub existence: Existence,
    pub scalars: BTreeMap<String, (Value, EnvelopeMeta)>,
    pub sets: BTreeMap<String, BTreeMap<Value, BTreeSet<OpId>>>,
}

impl Item {
    pub fn is_live(&self) -> bool {
        matches!(self.existence, Existence::Live)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.scalars.get(name).map(|(v, _)| v)
    }

    pub fn set(&self, name: &str) -> impl Iterator<Item = &Value> {
        self.sets
            .get(name)
            .into_iter()
            .flat_map(|m| m.keys())
    }

    /// The op ids of every surviving `AddToSet` that contributed `element`
    /// to `name`. This is exactly the `observed_add_ids` a `RemoveFromSet`
    /// needs to retract that element.
    pub fn observed_add_ids(&self, name: &str, element: &Value) -> Vec<OpId> {
        self.sets
            .get(name)
            .and_then(|m| m.get(element))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocumentState {
    pub items: BTreeMap<ItemId, Item>,
}

impl DocumentState {
    /// Live item lookup; `None` for both missing and removed items — a
    /// removed item's scalars/sets are not surfaced.
    pub fn get(&self, item_id: &str) -> Option<&Item> {
        self.items.get(item_id).filter(|i| i.is_live())
    }

    pub fn iter_live(&self) -> impl Iterator<Item = (&ItemId, &Item)> {
        self.items.iter().filter(|(_, i)| i.is_live())
    }
}

/// `observed_by(E, F)` for the common case here: did `remove` see `op`?
fn defeated_by_any_remove(op: &Envelope, removes: &[&Envelope]) -> bool {
    removes.iter().any(|r| r.observed_by(op))
}

/// Replay a flow's envelopes (any order — the multiset is what matters)
/// into a `DocumentState`.
pub fn materialize<'a>(envelopes: impl IntoIterator<Item = &'a Envelope>) -> DocumentState {
    let mut by_item: HashMap<&str, Vec<&Envelope>> = HashMap::new();
    for env in envelopes {
        by_item.entry(env.op.item_id().as_str()).or_default().push(env);
    }

    let mut items = BTreeMap::new();
    for (item_id, envs) in by_item {
        if let Some(item) = materialize_item(&envs) {
            items.insert(item_id.to_string(), item);
        }
    }
    DocumentState { items }
}

fn materialize_item(envs: &[&Envelope]) -> Option<Item> {
    let adds: Vec<&Envelope> = envs
        .iter()
        .copied()
        .filter(|e| matches!(e.op, Operation::AddItem { .. }))
        .collect();
    if adds.is_empty() {
        // No AddItem ever arrived for this id: the item never existed.
        return None;
    }
    let removes: Vec<&Envelope> = envs
        .iter()
        .copied()
        .filter(|e| matches!(e.op, Operation::RemoveItem { .. }))
        .collect();
    let set_fields: Vec<&Envelope> = envs
        .iter()
        .copied()
        .filter(|e| matches!(e.op, Operation::SetField { .. }))
        .collect();
    let add_to_sets: Vec<&Envelope> = envs
        .iter()
        .copied()
        .filter(|e| matches!(e.op, Operation::AddToSet { .. }))
        .collect();
    let remove_from_sets: Vec<&Envelope> = envs
        .iter()
        .copied()
        .filter(|e| matches!(e.op, Operation::RemoveFromSet { .. }))
        .collect();

    // Invariant 4: a RemoveItem only defeats AddItem/SetField/AddToSet
    // envelopes it observed. Anything concurrent with every remove
    // survives and keeps the item Live.
    let surviving_adds: Vec<&Envelope> = adds
        .iter()
        .copied()
        .filter(|a| !defeated_by_any_remove(a, &removes))
        .collect();
    let surviving_fields: Vec<&Envelope> = set_fields
        .iter()
        .copied()
        .filter(|f| !defeated_by_any_remove(f, &removes))
        .collect();
    let surviving_add_to_sets: Vec<&Envelope> = add_to_sets
        .iter()
        .copied()
        .filter(|a| !defeated_by_any_remove(a, &removes))
        .collect();

    let item_type = adds
        .iter()
        .max_by_key(|e| e.order_key())
        .and_then(|e| match &e.op {
            Operation::AddItem { item_type, .. } => Some(item_type.clone()),
            _ => None,
        })
        .unwrap_or_default();

    let is_live =
        !surviving_adds.is_empty() || !surviving_fields.is_empty() || !surviving_add_to_sets.is_empty();

    if !is_live {
        let removed_by: BTreeSet<OpId> = removes.iter().map(|r| r.op_id).collect();
        return Some(Item {
            item_type,
            existence: Existence::Removed { removed_by },
            scalars: BTreeMap::new(),
            sets: BTreeMap::new(),
        });
    }

    // Scalar resolution: latest-wins among survivors, tie-broken by the
    // full (timestamp, author, clock) order key.
    let mut by_field: HashMap<&str, Vec<&Envelope>> = HashMap::new();
    for env in &surviving_fields {
        if let Operation::SetField { field, .. } = &env.op {
            by_field.entry(field.as_str()).or_default().push(env);
        }
    }
    let mut scalars = BTreeMap::new();
    for (field, envs) in by_field {
        if let Some(winner) = envs.into_iter().max_by_key(|e| e.order_key()) {
            if let Operation::SetField { value, .. } = &winner.op {
                scalars.insert(field.to_string(), (value.clone(), EnvelopeMeta::from(winner)));
            }
        }
    }

    // Set resolution: an AddToSet survives unless a RemoveFromSet names its
    // op_id in `observed_add_ids` (invariant 5).
    let mut sets: BTreeMap<String, BTreeMap<Value, BTreeSet<OpId>>> = BTreeMap::new();
    for add in &surviving_add_to_sets {
        if let Operation::AddToSet {
            set_name, element, ..
        } = &add.op
        {
            let removed = remove_from_sets.iter().any(|r| {
                if let Operation::RemoveFromSet {
                    set_name: rs,
                    element: re,
                    observed_add_ids,
                    ..
                } = &r.op
                {
                    rs == set_name && re == element && observed_add_ids.contains(&add.op_id)
                } else {
                    false
                }
            });
            if !removed {
                sets.entry(set_name.clone())
                    .or_default()
                    .entry(element.clone())
                    .or_default()
                    .insert(add.op_id);
            }
        }
    }

    Some(Item {
        item_type,
        existence: Existence::Live,
        scalars,
        sets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::horizon::Horizon;

    fn env(author: &str, clock: u64, ts: u64, horizon: Horizon, op: Operation) -> Envelope {
        Envelope::author_local(op, author.to_string(), clock, ts, horizon)
    }

    /// Concurrent add-then-edit survives an informed remove that never
    /// saw the edit.
    #[test]
    fn concurrent_edit_survives_informed_remove() {
        let add = env(
            "D1",
            1,
            1,
            Horizon::new(),
            Operation::add_item("x", "GianttItem"),
        );
        let mut h_d2 = Horizon::new();
        h_d2.observe("D1", 1);
        let edit = env(
            "D2",
            1,
            2,
            h_d2,
            Operation::set_field("x", "title", Value::string("Hello")),
        );
        let mut h_remove = Horizon::new();
        h_remove.observe("D1", 1); // D1 hasn't seen D2's edit
        let remove = env("D1", 2, 3, h_remove, Operation::remove_item("x"));

        let state = materialize([&add, &edit, &remove]);
        let item = state.get("x").expect("item should be live");
        assert_eq!(item.field("title"), Some(&Value::string("Hello")));
    }

    /// Scenario 2: a remove that observed every prior write wins outright.
    #[test]
    fn sequential_remove_wins_when_it_observed_everything() {
        let add = env(
            "D1",
            1,
            1,
            Horizon::new(),
            Operation::add_item("x", "GianttItem"),
        );
        let mut h2 = Horizon::new();
        h2.observe("D1", 1);
        let edit = env(
            "D1",
            2,
            2,
            h2,
            Operation::set_field("x", "title", Value::string("A")),
        );
        let mut h3 = Horizon::new();
        h3.observe("D1", 2);
        let remove = env("D1", 3, 3, h3, Operation::remove_item("x"));

        let state = materialize([&add, &edit, &remove]);
        assert!(state.get("x").is_none());
    }

    /// Scenario 3: concurrent add of the same element survives a
    /// remove-from-set that only names one of the two contributing adds.
    #[test]
    fn remove_from_set_only_defeats_listed_ids() {
        let add_alpha = env(
            "D1",
            1,
            1,
            Horizon::new(),
            Operation::add_to_set("x", "tags", Value::string("red")),
        );
        let add_beta = env(
            "D2",
            1,
            1,
            Horizon::new(),
            Operation::add_to_set("x", "tags", Value::string("red")),
        );
        let item_add = env(
            "D1",
            0,
            0,
            Horizon::new(),
            Operation::add_item("x", "GianttItem"),
        );
        let remove = env(
            "D1",
            2,
            2,
            Horizon::new(),
            Operation::remove_from_set("x", "tags", Value::string("red"), vec![add_alpha.op_id]),
        );

        let state = materialize([&item_add, &add_alpha, &add_beta, &remove]);
        let item = state.get("x").unwrap();
        let tags: Vec<&Value> = item.set("tags").collect();
        assert_eq!(tags, vec![&Value::string("red")]);
    }

    #[test]
    fn last_writer_wins_tiebreak_uses_author_then_clock() {
        let add = env(
            "D1",
            0,
            0,
            Horizon::new(),
            Operation::add_item("x", "GianttItem"),
        );
        let a = env(
            "A",
            1,
            100,
            Horizon::new(),
            Operation::set_field("x", "title", Value::string("from A")),
        );
        let b = env(
            "B",
            1,
            100,
            Horizon::new(),
            Operation::set_field("x", "title", Value::string("from B")),
        );
        let state = materialize([&add, &a, &b]);
        assert_eq!(
            state.get("x").unwrap().field("title"),
            Some(&Value::string("from B"))
        );
    }

    #[test]
    fn materialization_is_order_independent() {
        let add = env(
            "D1",
            0,
            0,
            Horizon::new(),
            Operation::add_item("x", "GianttItem"),
        );
        let a = env(
            "A",
            1,
            5,
            Horizon::new(),
            Operation::set_field("x", "title", Value::string("first")),
        );
        let b = env(
            "A",
            2,
            10,
            Horizon::new(),
            Operation::set_field("x", "title", Value::string("second")),
        );
        let forward = materialize([&add, &a, &b]);
        let backward = materialize([&b, &a, &add]);
        assert_eq!(forward, backward);
    }
}
