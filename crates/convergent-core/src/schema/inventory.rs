//! Inventory schema: category/description/location plus a `tags` set, with
//! containers expressed through the `container_<id>` tag convention rather
//! than a typed relation.

use crate::materialize::DocumentState;
use crate::operation::Operation;
use crate::schema::{DocumentSchema, FieldSpec, ItemTypeSpec, SetSpec, ValidationIssue};
use crate::value::Value;

pub const ITEM_TYPE: &str = "InventoryItem";
pub const CONTAINER_CATEGORY: &str = "Containers";
const CONTAINER_TAG_PREFIX: &str = "container_";

#[derive(Clone, Copy, Debug, Default)]
pub struct InventoryItemType;

impl ItemTypeSpec for InventoryItemType {
    fn type_name(&self) -> &str {
        ITEM_TYPE
    }

    fn fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::required("category"),
            FieldSpec::required("description"),
            FieldSpec::required("location"),
        ]
    }

    fn sets(&self) -> Vec<SetSpec> {
        vec![SetSpec::new("tags")]
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct InventorySchema;

impl DocumentSchema for InventorySchema {
    fn item_type_spec(&self, type_name: &str) -> Option<Box<dyn ItemTypeSpec>> {
        if type_name == ITEM_TYPE {
            Some(Box::new(InventoryItemType))
        } else {
            None
        }
    }

    fn item_types(&self) -> Vec<String> {
        vec![ITEM_TYPE.to_string()]
    }

    fn validate(&self, state: &DocumentState) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for (item_id, item) in state.iter_live() {
            for tag in item.set("tags") {
                let tag = match tag.as_str() {
                    Some(s) => s,
                    None => continue,
                };
                let Some(container_id) = tag.strip_prefix(CONTAINER_TAG_PREFIX) else {
                    continue;
                };
                let container_exists = state.iter_live().any(|(_, other)| {
                    other.field("category").and_then(Value::as_str) == Some(CONTAINER_CATEGORY)
                        && other
                            .set("tags")
                            .any(|t| t.as_str() == Some(&format!("{}{}", CONTAINER_TAG_PREFIX, container_id)))
                });
                if !container_exists {
                    let description = item
                        .field("description")
                        .and_then(Value::as_str)
                        .unwrap_or(item_id)
                        .to_string();
                    issues.push(
                        ValidationIssue::dangling_reference(format!(
                            "item '{}' references non-existent container '{}'",
                            description, container_id
                        ))
                        .for_item(item_id.clone()),
                    );
                }
            }
        }
        issues
    }
}

/// Read-only typed projection of a live `InventoryItem` out of a
/// `DocumentState`. Not a separate representation the engine stores — a
/// view, rebuilt on read (same convention as the Giantt text line).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InventoryItemView {
    pub id: String,
    pub category: String,
    pub description: String,
    pub location: String,
    pub tags: Vec<String>,
}

impl InventoryItemView {
    pub fn from_state(state: &DocumentState, item_id: &str) -> Option<Self> {
        let item = state.get(item_id)?;
        if item.item_type != ITEM_TYPE {
            return None;
        }
        let field = |name: &str| {
            item.field(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let mut tags: Vec<String> = item
            .set("tags")
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        tags.sort();
        Some(Self {
            id: item_id.to_string(),
            category: field("category"),
            description: field("description"),
            location: field("location"),
            tags,
        })
    }

    pub fn is_container(&self) -> bool {
        self.category == CONTAINER_CATEGORY
    }
}

pub fn add_item(
    item_id: &str,
    category: &str,
    description: &str,
    location: &str,
) -> Vec<Operation> {
    vec![
        Operation::add_item(item_id, ITEM_TYPE),
        Operation::set_field(item_id, "category", Value::string(category)),
        Operation::set_field(item_id, "description", Value::string(description)),
        Operation::set_field(item_id, "location", Value::string(location)),
    ]
}

pub fn add_tag(item_id: &str, tag: &str) -> Operation {
    Operation::add_to_set(item_id, "tags", Value::string(tag))
}

/// Place an item in a container: the `container_<id>` tag plus the matching
/// `location` field, so a view reading `location` alone still sees where
/// the item lives (the tag and the field are kept in sync, not just the
/// tag).
pub fn place_in_container(item_id: &str, container_id: &str) -> Vec<Operation> {
    vec![
        add_tag(item_id, &format!("{}{}", CONTAINER_TAG_PREFIX, container_id)),
        Operation::set_field(item_id, "location", Value::string(format!("container {}", container_id))),
    ]
}

/// Render every live InventoryItem as a JSON object keyed by item id — the
/// payload `convergent_inventory_read_drip` and the CLI's `InventoryDrip`
/// subcommand both hand back verbatim.
pub fn render_drip(state: &DocumentState) -> String {
    let items: serde_json::Map<String, serde_json::Value> = state
        .iter_live()
        .filter(|(_, item)| item.item_type == ITEM_TYPE)
        .filter_map(|(id, _)| InventoryItemView::from_state(state, id))
        .map(|item| {
            (
                item.id.clone(),
                serde_json::json!({
                    "id": item.id,
                    "category": item.category,
                    "description": item.description,
                    "location": item.location,
                    "tags": item.tags,
                }),
            )
        })
        .collect();
    serde_json::json!({ "items": items }).to_string()
}
