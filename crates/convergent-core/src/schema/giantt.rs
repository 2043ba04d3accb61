//! Task-graph ("Giantt") schema: status/priority enums, the eight typed
//! relations, the duration and time-constraint grammars, op-builders with
//! the bidirectional-relation convention, and the legacy text serializer.

use crate::materialize::DocumentState;
use crate::operation::Operation;
use crate::schema::{DocumentSchema, FieldSpec, ItemTypeSpec, SetSpec, ValidationIssue};
use crate::value::Value;
use std::collections::BTreeSet;
use std::fmt;

pub const ITEM_TYPE: &str = "GianttItem";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GianttStatus {
    NotStarted,
    InProgress,
    Blocked,
    Completed,
}

impl GianttStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GianttStatus::NotStarted => "NOT_STARTED",
            GianttStatus::InProgress => "IN_PROGRESS",
            GianttStatus::Blocked => "BLOCKED",
            GianttStatus::Completed => "COMPLETED",
        }
    }

    pub fn symbol(&self) -> char {
        match self {
            GianttStatus::NotStarted => '○',
            GianttStatus::InProgress => '◑',
            GianttStatus::Blocked => '⊘',
            GianttStatus::Completed => '●',
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "NOT_STARTED" => Some(GianttStatus::NotStarted),
            "IN_PROGRESS" => Some(GianttStatus::InProgress),
            "BLOCKED" => Some(GianttStatus::Blocked),
            "COMPLETED" => Some(GianttStatus::Completed),
            _ => None,
        }
    }

    pub fn from_symbol(c: char) -> Option<Self> {
        match c {
            '○' => Some(GianttStatus::NotStarted),
            '◑' => Some(GianttStatus::InProgress),
            '⊘' => Some(GianttStatus::Blocked),
            '●' => Some(GianttStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GianttPriority {
    Lowest,
    Low,
    Neutral,
    Unsure,
    Medium,
    High,
    Critical,
}

impl GianttPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            GianttPriority::Lowest => "LOWEST",
            GianttPriority::Low => "LOW",
            GianttPriority::Neutral => "NEUTRAL",
            GianttPriority::Unsure => "UNSURE",
            GianttPriority::Medium => "MEDIUM",
            GianttPriority::High => "HIGH",
            GianttPriority::Critical => "CRITICAL",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            GianttPriority::Lowest => ",,,",
            GianttPriority::Low => "...",
            GianttPriority::Neutral => "",
            GianttPriority::Unsure => "?",
            GianttPriority::Medium => "!",
            GianttPriority::High => "!!",
            GianttPriority::Critical => "!!!",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "LOWEST" => Some(GianttPriority::Lowest),
            "LOW" => Some(GianttPriority::Low),
            "NEUTRAL" => Some(GianttPriority::Neutral),
            "UNSURE" => Some(GianttPriority::Unsure),
            "MEDIUM" => Some(GianttPriority::Medium),
            "HIGH" => Some(GianttPriority::High),
            "CRITICAL" => Some(GianttPriority::Critical),
            _ => None,
        }
    }

    /// Split a `<id><priority-symbol>` token into its id and priority,
    /// matching the longest known suffix first.
    fn split_suffix(token: &str) -> (&str, GianttPriority) {
        const SUFFIXES: &[(&str, GianttPriority)] = &[
            (",,,", GianttPriority::Lowest),
            ("...", GianttPriority::Low),
            ("!!!", GianttPriority::Critical),
            ("!!", GianttPriority::High),
            ("!", GianttPriority::Medium),
            ("?", GianttPriority::Unsure),
        ];
        for (sym, priority) in SUFFIXES {
            if !sym.is_empty() && token.ends_with(sym) {
                return (&token[..token.len() - sym.len()], *priority);
            }
        }
        (token, GianttPriority::Neutral)
    }
}

/// The eight typed relations an item may hold against other items.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Relation {
    Requires,
    AnyOf,
    Supercharges,
    Indicates,
    Together,
    Conflicts,
    Blocks,
    Sufficient,
}

impl Relation {
    pub const ALL: [Relation; 8] = [
        Relation::Requires,
        Relation::AnyOf,
        Relation::Supercharges,
        Relation::Indicates,
        Relation::Together,
        Relation::Conflicts,
        Relation::Blocks,
        Relation::Sufficient,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Requires => "REQUIRES",
            Relation::AnyOf => "ANYOF",
            Relation::Supercharges => "SUPERCHARGES",
            Relation::Indicates => "INDICATES",
            Relation::Together => "TOGETHER",
            Relation::Conflicts => "CONFLICTS",
            Relation::Blocks => "BLOCKS",
            Relation::Sufficient => "SUFFICIENT",
        }
    }

    pub fn symbol(&self) -> char {
        match self {
            Relation::Requires => '⊢',
            Relation::AnyOf => '⋲',
            Relation::Supercharges => '≫',
            Relation::Indicates => '∴',
            Relation::Together => '∪',
            Relation::Conflicts => '⊟',
            Relation::Blocks => '►',
            Relation::Sufficient => '≻',
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Relation::ALL.into_iter().find(|r| r.as_str() == s)
    }

    pub fn from_symbol(c: char) -> Option<Self> {
        Relation::ALL.into_iter().find(|r| r.symbol() == c)
    }

    /// The builder-convention mirror: REQUIRES/BLOCKS and ANYOF/SUFFICIENT
    /// are named inverses; CONFLICTS/TOGETHER mirror onto themselves;
    /// SUPERCHARGES/INDICATES have no inverse name and so are never
    /// mirrored.
    pub fn mirror(&self) -> Option<Relation> {
        match self {
            Relation::Requires => Some(Relation::Blocks),
            Relation::Blocks => Some(Relation::Requires),
            Relation::AnyOf => Some(Relation::Sufficient),
            Relation::Sufficient => Some(Relation::AnyOf),
            Relation::Conflicts => Some(Relation::Conflicts),
            Relation::Together => Some(Relation::Together),
            Relation::Supercharges | Relation::Indicates => None,
        }
    }
}

/// Validate the duration grammar `(<float><unit>)+`, units `s, min, h, d,
/// w, mo, y`. Returns an error message on the first unparseable remainder.
pub fn validate_duration(s: &str) -> Result<(), String> {
    const UNITS: &[&str] = &["min", "mo", "s", "h", "d", "w", "y"];
    let mut rest = s;
    if rest.is_empty() {
        return Err("empty duration".to_string());
    }
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return Err(format!("expected a number at {:?}", rest));
        }
        let amount = &rest[..digits_end];
        if amount.parse::<f64>().is_err() {
            return Err(format!("invalid number {:?}", amount));
        }
        rest = &rest[digits_end..];
        let unit = UNITS.iter().find(|u| rest.starts_with(**u));
        match unit {
            Some(u) => rest = &rest[u.len()..],
            None => return Err(format!("expected a unit at {:?}", rest)),
        }
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Warn,
    Severe,
    Escalating,
}

impl Severity {
    fn as_str(&self) -> &'static str {
        match self {
            Severity::Warn => "warn",
            Severity::Severe => "severe",
            Severity::Escalating => "escalating",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "warn" => Some(Severity::Warn),
            "severe" => Some(Severity::Severe),
            "escalating" => Some(Severity::Escalating),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed `window(...)`, `due(...)` or `every(...)` time constraint. The
/// duration/date and grace fields are kept as opaque, grammar-checked
/// strings, the same "defer semantic parsing" choice as `duration`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeConstraint {
    pub kind: String,
    pub key: String,
    pub grace: String,
    pub severity: Severity,
    pub stack: Option<String>,
}

impl TimeConstraint {
    pub fn parse(s: &str) -> Result<Self, String> {
        let (kind, rest) = s
            .split_once('(')
            .ok_or_else(|| format!("missing '(' in constraint {:?}", s))?;
        if !matches!(kind, "window" | "due" | "every") {
            return Err(format!("unknown constraint kind {:?}", kind));
        }
        let body = rest
            .strip_suffix(')')
            .ok_or_else(|| format!("missing ')' in constraint {:?}", s))?;
        let (key, tail) = body
            .split_once(':')
            .ok_or_else(|| format!("missing ':' in constraint body {:?}", body))?;
        let parts: Vec<&str> = tail.split(',').collect();
        if parts.len() < 2 {
            return Err(format!("missing severity in constraint body {:?}", body));
        }
        let severity = Severity::from_str(parts[1])
            .ok_or_else(|| format!("unknown severity {:?}", parts[1]))?;
        let stack = parts.get(2).map(|s| s.to_string());
        Ok(TimeConstraint {
            kind: kind.to_string(),
            key: key.to_string(),
            grace: parts[0].to_string(),
            severity,
            stack,
        })
    }
}

impl fmt::Display for TimeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}:{},{}", self.kind, self.key, self.grace, self.severity)?;
        if let Some(stack) = &self.stack {
            write!(f, ",{}", stack)?;
        }
        write!(f, ")")
    }
}

/// A single parsed (or about-to-be-serialized) line of task-graph text.
/// Sets are kept as ordered `Vec`s (not the engine's canonical sorted
/// sets) so that a well-formed line round-trips byte-for-byte.
#[derive(Clone, Debug, PartialEq)]
pub struct GianttLine {
    pub id: String,
    pub status: GianttStatus,
    pub priority: GianttPriority,
    pub duration: String,
    pub title: String,
    pub charts: Vec<String>,
    pub tags: Vec<String>,
    pub relations: Vec<(Relation, Vec<String>)>,
    pub time_constraints: Vec<TimeConstraint>,
    pub user_comment: Option<String>,
    pub auto_comment: Option<String>,
}

impl GianttLine {
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        out.push(self.status.symbol());
        out.push(' ');
        out.push_str(&self.id);
        out.push_str(self.priority.symbol());
        out.push(' ');
        out.push_str(&self.duration);
        out.push(' ');
        out.push_str(&serde_json::to_string(&self.title).unwrap());
        out.push(' ');
        out.push('{');
        out.push_str(
            &self
                .charts
                .iter()
                .map(|c| serde_json::to_string(c).unwrap())
                .collect::<Vec<_>>()
                .join(","),
        );
        out.push('}');
        out.push(' ');
        out.push_str(&self.tags.join(","));

        let ensure_space = |out: &mut String| {
            if !out.ends_with(' ') {
                out.push(' ');
            }
        };

        if !self.relations.is_empty() {
            ensure_space(&mut out);
            out.push_str(">>> ");
            let groups: Vec<String> = self
                .relations
                .iter()
                .map(|(r, ids)| format!("{}[{}]", r.symbol(), ids.join(",")))
                .collect();
            out.push_str(&groups.join(" "));
        }
        if !self.time_constraints.is_empty() {
            ensure_space(&mut out);
            out.push_str("@@@ ");
            let groups: Vec<String> = self.time_constraints.iter().map(|c| c.to_string()).collect();
            out.push_str(&groups.join(" "));
        }
        if let Some(user) = &self.user_comment {
            ensure_space(&mut out);
            out.push_str("# ");
            out.push_str(user);
        }
        if let Some(auto) = &self.auto_comment {
            ensure_space(&mut out);
            out.push_str("### ");
            out.push_str(auto);
        }
        out
    }

    pub fn parse(line: &str) -> Result<Self, String> {
        let mut chars = line.chars();
        let status_ch = chars.next().ok_or("empty line")?;
        let status = GianttStatus::from_symbol(status_ch)
            .ok_or_else(|| format!("unknown status symbol {:?}", status_ch))?;
        let rest = chars.as_str().trim_start();

        let (id_priority, rest) = split_token(rest)?;
        let (id, priority) = GianttPriority::split_suffix(id_priority);

        let rest = rest.trim_start();
        let (duration, rest) = split_token(rest)?;
        validate_duration(duration)?;

        let rest = rest.trim_start();
        let (title_raw, rest) = split_quoted(rest)?;
        let title: String =
            serde_json::from_str(&title_raw).map_err(|e| format!("bad title literal: {}", e))?;

        let rest = rest.trim_start();
        let (charts_raw, rest) = split_braced(rest)?;
        let charts = split_quoted_list(&charts_raw)?;

        let rest = rest.trim_start();
        let looks_like_marker =
            |s: &str| s.starts_with(">>>") || s.starts_with("@@@") || s.starts_with('#');
        let (tags_token, mut rest) = if looks_like_marker(rest) {
            ("", rest)
        } else {
            split_token(rest).unwrap_or(("", rest))
        };
        let tags: Vec<String> = if tags_token.is_empty() {
            Vec::new()
        } else {
            tags_token.split(',').map(|s| s.to_string()).collect()
        };

        let mut relations = Vec::new();
        let mut time_constraints = Vec::new();
        let mut user_comment = None;
        let mut auto_comment = None;

        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix(">>>") {
            rest = after.trim_start();
            loop {
                if rest.is_empty() || rest.starts_with("@@@") || rest.starts_with('#') {
                    break;
                }
                let (group, next) = split_token(rest)?;
                let open = group.find('[').ok_or("malformed relation group")?;
                let sym = group[..open].chars().next().ok_or("empty relation symbol")?;
                let relation = Relation::from_symbol(sym)
                    .ok_or_else(|| format!("unknown relation symbol {:?}", sym))?;
                let body = group[open + 1..]
                    .strip_suffix(']')
                    .ok_or("missing ']' in relation group")?;
                let ids = if body.is_empty() {
                    Vec::new()
                } else {
                    body.split(',').map(|s| s.to_string()).collect()
                };
                relations.push((relation, ids));
                rest = next.trim_start();
            }
        }

        if let Some(after) = rest.strip_prefix("@@@") {
            rest = after.trim_start();
            loop {
                if rest.is_empty() || rest.starts_with('#') {
                    break;
                }
                let (token, next) = split_token(rest)?;
                time_constraints.push(TimeConstraint::parse(token)?);
                rest = next.trim_start();
            }
        }

        if let Some(after) = rest.strip_prefix("###") {
            auto_comment = Some(after.trim_start().to_string());
        } else if let Some(after) = rest.strip_prefix('#') {
            if let Some((user, auto)) = after.split_once("###") {
                user_comment = Some(user.trim().to_string());
                auto_comment = Some(auto.trim_start().to_string());
            } else {
                user_comment = Some(after.trim_start().to_string());
            }
        }

        Ok(GianttLine {
            id: id.to_string(),
            status,
            priority,
            duration: duration.to_string(),
            title,
            charts,
            tags,
            relations,
            time_constraints,
            user_comment,
            auto_comment,
        })
    }
}

/// Split off the next whitespace-delimited token.
fn split_token(s: &str) -> Result<(&str, &str), String> {
    match s.find(char::is_whitespace) {
        Some(i) => Ok((&s[..i], &s[i..])),
        None => Ok((s, "")),
    }
}

/// Split off a `"..."` JSON string literal (handling escaped quotes),
/// returning the literal (including quotes) and the remainder.
fn split_quoted(s: &str) -> Result<(String, &str), String> {
    if !s.starts_with('"') {
        return Err(format!("expected '\"' at {:?}", s));
    }
    let bytes = s.as_bytes();
    let mut i = 1;
    let mut escaped = false;
    while i < bytes.len() {
        let c = bytes[i];
        if escaped {
            escaped = false;
        } else if c == b'\\' {
            escaped = true;
        } else if c == b'"' {
            i += 1;
            return Ok((s[..i].to_string(), &s[i..]));
        }
        i += 1;
    }
    Err("unterminated string literal".to_string())
}

/// Split off a `{...}` group, returning its inner content.
fn split_braced(s: &str) -> Result<(String, &str), String> {
    if !s.starts_with('{') {
        return Err(format!("expected '{{' at {:?}", s));
    }
    let close = s.find('}').ok_or("unterminated '{' group")?;
    Ok((s[1..close].to_string(), &s[close + 1..]))
}

fn split_quoted_list(s: &str) -> Result<Vec<String>, String> {
    let mut out = Vec::new();
    let mut rest = s;
    loop {
        rest = rest.trim_start_matches(',').trim_start();
        if rest.is_empty() {
            break;
        }
        let (lit, next) = split_quoted(rest)?;
        let value: String =
            serde_json::from_str(&lit).map_err(|e| format!("bad chart literal: {}", e))?;
        out.push(value);
        rest = next;
    }
    Ok(out)
}

/// `requires(a, b)`: `a` needs `b`. Emits the mirror `BLOCKS(b, a)` op too.
pub fn requires(a: &str, b: &str) -> Vec<Operation> {
    relation_ops(a, Relation::Requires, b)
}

pub fn blocks(a: &str, b: &str) -> Vec<Operation> {
    relation_ops(a, Relation::Blocks, b)
}

pub fn anyof(a: &str, b: &str) -> Vec<Operation> {
    relation_ops(a, Relation::AnyOf, b)
}

pub fn sufficient(a: &str, b: &str) -> Vec<Operation> {
    relation_ops(a, Relation::Sufficient, b)
}

pub fn supercharges(a: &str, b: &str) -> Vec<Operation> {
    relation_ops(a, Relation::Supercharges, b)
}

pub fn indicates(a: &str, b: &str) -> Vec<Operation> {
    relation_ops(a, Relation::Indicates, b)
}

pub fn together(a: &str, b: &str) -> Vec<Operation> {
    relation_ops(a, Relation::Together, b)
}

pub fn conflicts(a: &str, b: &str) -> Vec<Operation> {
    relation_ops(a, Relation::Conflicts, b)
}

/// The shared op-builder: emits `AddToSet(a, relation, b)` and, per the
/// bidirectional convention, the mirror edge on `b` when the relation has
/// one.
fn relation_ops(a: &str, relation: Relation, b: &str) -> Vec<Operation> {
    let mut ops = vec![Operation::add_to_set(a, relation.as_str(), Value::string(b))];
    if let Some(mirror) = relation.mirror() {
        ops.push(Operation::add_to_set(b, mirror.as_str(), Value::string(a)));
    }
    ops
}

pub fn remove_requires(state: &DocumentState, a: &str, b: &str) -> Vec<Operation> {
    remove_relation_ops(state, a, Relation::Requires, b)
}

pub fn remove_blocks(state: &DocumentState, a: &str, b: &str) -> Vec<Operation> {
    remove_relation_ops(state, a, Relation::Blocks, b)
}

pub fn remove_anyof(state: &DocumentState, a: &str, b: &str) -> Vec<Operation> {
    remove_relation_ops(state, a, Relation::AnyOf, b)
}

pub fn remove_sufficient(state: &DocumentState, a: &str, b: &str) -> Vec<Operation> {
    remove_relation_ops(state, a, Relation::Sufficient, b)
}

pub fn remove_supercharges(state: &DocumentState, a: &str, b: &str) -> Vec<Operation> {
    remove_relation_ops(state, a, Relation::Supercharges, b)
}

pub fn remove_indicates(state: &DocumentState, a: &str, b: &str) -> Vec<Operation> {
    remove_relation_ops(state, a, Relation::Indicates, b)
}

pub fn remove_together(state: &DocumentState, a: &str, b: &str) -> Vec<Operation> {
    remove_relation_ops(state, a, Relation::Together, b)
}

pub fn remove_conflicts(state: &DocumentState, a: &str, b: &str) -> Vec<Operation> {
    remove_relation_ops(state, a, Relation::Conflicts, b)
}

/// The mirror of `relation_ops`: retracts `AddToSet(a, relation, b)` and,
/// when the relation has a mirror, `AddToSet(b, mirror, a)` too, each as a
/// `RemoveFromSet` naming the exact surviving add-op-ids it is retracting.
fn remove_relation_ops(state: &DocumentState, a: &str, relation: Relation, b: &str) -> Vec<Operation> {
    let element_b = Value::string(b);
    let mut ops = Vec::new();
    if let Some(item_a) = state.get(a) {
        let observed = item_a.observed_add_ids(relation.as_str(), &element_b);
        if !observed.is_empty() {
            ops.push(Operation::remove_from_set(
                a,
                relation.as_str(),
                element_b,
                observed,
            ));
        }
    }
    if let Some(mirror) = relation.mirror() {
        let element_a = Value::string(a);
        if let Some(item_b) = state.get(b) {
            let observed = item_b.observed_add_ids(mirror.as_str(), &element_a);
            if !observed.is_empty() {
                ops.push(Operation::remove_from_set(
                    b,
                    mirror.as_str(),
                    element_a,
                    observed,
                ));
            }
        }
    }
    ops
}

/// Depth-first cycle detection over a directed relation (used by the
/// Doctor, not enforced by the engine — cycles are advisory-only).
pub fn find_cycle(state: &DocumentState, relation: Relation) -> Option<Vec<String>> {
    let mut visiting = BTreeSet::new();
    let mut visited = BTreeSet::new();
    let mut stack = Vec::new();

    fn dfs(
        state: &DocumentState,
        relation: Relation,
        node: &str,
        visiting: &mut BTreeSet<String>,
        visited: &mut BTreeSet<String>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if visiting.contains(node) {
            let start = stack.iter().position(|n| n == node).unwrap_or(0);
            return Some(stack[start..].to_vec());
        }
        if visited.contains(node) {
            return None;
        }
        visiting.insert(node.to_string());
        stack.push(node.to_string());

        if let Some(item) = state.get(node) {
            for target in item.set(relation.as_str()) {
                if let Some(target_id) = target.as_str() {
                    if let Some(cycle) = dfs(state, relation, target_id, visiting, visited, stack) {
                        return Some(cycle);
                    }
                }
            }
        }

        stack.pop();
        visiting.remove(node);
        visited.insert(node.to_string());
        None
    }

    for (id, _) in state.iter_live() {
        if let Some(cycle) = dfs(state, relation, id, &mut visiting, &mut visited, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GianttItemType;

impl ItemTypeSpec for GianttItemType {
    fn type_name(&self) -> &str {
        ITEM_TYPE
    }

    fn fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::required("title"),
            FieldSpec::required("status"),
            FieldSpec::required("priority"),
            FieldSpec::optional("duration"),
            FieldSpec::optional("user_comment"),
            FieldSpec::optional("auto_comment"),
        ]
    }

    fn sets(&self) -> Vec<SetSpec> {
        let mut sets = vec![SetSpec::new("tags"), SetSpec::new("charts")];
        sets.extend(Relation::ALL.iter().map(|r| SetSpec::new(r.as_str())));
        sets
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GianttSchema;

impl DocumentSchema for GianttSchema {
    fn item_type_spec(&self, type_name: &str) -> Option<Box<dyn ItemTypeSpec>> {
        if type_name == ITEM_TYPE {
            Some(Box::new(GianttItemType))
        } else {
            None
        }
    }

    fn item_types(&self) -> Vec<String> {
        vec![ITEM_TYPE.to_string()]
    }

    fn validate(&self, state: &DocumentState) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for (id, item) in state.iter_live() {
            for relation in Relation::ALL {
                for target in item.set(relation.as_str()) {
                    if let Some(target_id) = target.as_str() {
                        if state.get(target_id).is_none() {
                            issues.push(
                                ValidationIssue::dangling_reference(format!(
                                    "{} {} -> {} but {} does not exist",
                                    id,
                                    relation.as_str(),
                                    target_id,
                                    target_id
                                ))
                                .for_item(id.clone()),
                            );
                        }
                    }
                }
            }
        }
        if let Some(cycle) = find_cycle(state, Relation::Requires) {
            let mut issue = ValidationIssue::dependency_cycle(format!(
                "REQUIRES cycle: {}",
                cycle.join(" -> ")
            ));
            if let Some(first) = cycle.first() {
                issue = issue.for_item(first.clone());
            }
            issues.push(issue);
        }
        issues
    }
}

/// Render every live Giantt item as a sorted `.giantt`-format text block,
/// one line per item — the payload `convergent_giantt_read_drip` and the
/// CLI's `GianttDrip` subcommand both hand back verbatim.
pub fn render_drip(state: &DocumentState) -> String {
    let mut lines: Vec<(String, String)> = Vec::new();
    for (id, item) in state.iter_live() {
        if item.item_type != ITEM_TYPE {
            continue;
        }
        let status = item
            .field("status")
            .and_then(Value::as_str)
            .and_then(GianttStatus::from_str)
            .unwrap_or(GianttStatus::NotStarted);
        let priority = item
            .field("priority")
            .and_then(Value::as_str)
            .and_then(GianttPriority::from_str)
            .unwrap_or(GianttPriority::Neutral);
        let duration = item
            .field("duration")
            .and_then(Value::as_str)
            .unwrap_or("0s")
            .to_string();
        let title = item.field("title").and_then(Value::as_str).unwrap_or("").to_string();

        let mut charts: Vec<String> = item.set("charts").filter_map(Value::as_str).map(str::to_string).collect();
        charts.sort();
        let mut tags: Vec<String> = item.set("tags").filter_map(Value::as_str).map(str::to_string).collect();
        tags.sort();

        let mut relations = Vec::new();
        for relation in Relation::ALL {
            let mut ids: Vec<String> =
                item.set(relation.as_str()).filter_map(Value::as_str).map(str::to_string).collect();
            if ids.is_empty() {
                continue;
            }
            ids.sort();
            relations.push((relation, ids));
        }

        let line = GianttLine {
            id: id.clone(),
            status,
            priority,
            duration,
            title,
            charts,
            tags,
            relations,
            time_constraints: Vec::new(),
            user_comment: item.field("user_comment").and_then(Value::as_str).map(str::to_string),
            auto_comment: item.field("auto_comment").and_then(Value::as_str).map(str::to_string),
        };
        lines.push((id.clone(), line.serialize()));
    }
    lines.sort_by(|a, b| a.0.cmp(&b.0));
    lines.into_iter().map(|(_, line)| line).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_grammar_accepts_compound_units() {
        assert!(validate_duration("2w3d").is_ok());
        assert!(validate_duration("1.5h").is_ok());
        assert!(validate_duration("3mo").is_ok());
        assert!(validate_duration("").is_err());
        assert!(validate_duration("abc").is_err());
    }

    #[test]
    fn time_constraint_round_trips() {
        let tc = TimeConstraint::parse("window(5d:2d,severe)").unwrap();
        assert_eq!(tc.to_string(), "window(5d:2d,severe)");
        let tc2 = TimeConstraint::parse("every(1w:1d,escalating,true)").unwrap();
        assert_eq!(tc2.to_string(), "every(1w:1d,escalating,true)");
    }

    #[test]
    fn text_round_trip_scenario_5() {
        let line = r#"◑ complex_task!! 2w3d "Complex \"task\" with everything" {"Chart1","Chart2"} urgent,important >>> ⊢[dep1,dep2] ►[blocked1] ≫[enhanced1] @@@ window(5d:2d,severe) # User note ### Auto note"#;
        let parsed = GianttLine::parse(line).unwrap();
        assert_eq!(parsed.id, "complex_task");
        assert_eq!(parsed.priority, GianttPriority::High);
        assert_eq!(parsed.status, GianttStatus::InProgress);
        assert_eq!(parsed.title, "Complex \"task\" with everything");
        assert_eq!(parsed.charts, vec!["Chart1", "Chart2"]);
        assert_eq!(parsed.tags, vec!["urgent", "important"]);
        assert_eq!(parsed.user_comment.as_deref(), Some("User note"));
        assert_eq!(parsed.auto_comment.as_deref(), Some("Auto note"));
        assert_eq!(parsed.serialize(), line);
    }

    #[test]
    fn parse_then_serialize_is_identity_for_minimal_line() {
        let line = r#"○ simple 1d "Simple task" {} "#;
        let parsed = GianttLine::parse(line).unwrap();
        assert_eq!(parsed.serialize(), line);
    }

    #[test]
    fn requires_emits_bidirectional_ops() {
        let ops = requires("A", "B");
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0], Operation::add_to_set("A", "REQUIRES", Value::string("B")));
        assert_eq!(ops[1], Operation::add_to_set("B", "BLOCKS", Value::string("A")));
    }

    #[test]
    fn supercharges_has_no_mirror() {
        let ops = supercharges("A", "B");
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn conflicts_mirrors_onto_itself() {
        let ops = conflicts("A", "B");
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1], Operation::add_to_set("B", "CONFLICTS", Value::string("A")));
    }

    fn env(author: &str, clock: u64, op: Operation) -> crate::operation::Envelope {
        crate::operation::Envelope::author_local(
            op,
            author.to_string(),
            clock,
            clock,
            crate::horizon::Horizon::new(),
        )
    }

    #[test]
    fn remove_requires_retracts_both_sides_with_correct_observed_add_ids() {
        let mut envs = vec![
            env("A", 0, Operation::add_item("a", ITEM_TYPE)),
            env("A", 1, Operation::add_item("b", ITEM_TYPE)),
        ];
        for (i, op) in requires("a", "b").into_iter().enumerate() {
            envs.push(env("A", 2 + i as u64, op));
        }
        let state = crate::materialize::materialize(envs.iter());
        assert_eq!(state.get("a").unwrap().set("REQUIRES").next(), Some(&Value::string("b")));
        assert_eq!(state.get("b").unwrap().set("BLOCKS").next(), Some(&Value::string("a")));

        let removals = remove_requires(&state, "a", "b");
        assert_eq!(removals.len(), 2);
        for op in &removals {
            if let Operation::RemoveFromSet { observed_add_ids, .. } = op {
                assert_eq!(observed_add_ids.len(), 1);
            } else {
                panic!("expected RemoveFromSet, got {:?}", op);
            }
        }

        for (i, op) in removals.into_iter().enumerate() {
            envs.push(env("A", 10 + i as u64, op));
        }
        let state = crate::materialize::materialize(envs.iter());
        assert_eq!(state.get("a").unwrap().set("REQUIRES").next(), None);
        assert_eq!(state.get("b").unwrap().set("BLOCKS").next(), None);
    }

    #[test]
    fn remove_relation_is_a_no_op_when_nothing_to_retract() {
        let envs = vec![
            env("A", 0, Operation::add_item("a", ITEM_TYPE)),
            env("A", 1, Operation::add_item("b", ITEM_TYPE)),
        ];
        let state = crate::materialize::materialize(envs.iter());
        assert!(remove_requires(&state, "a", "b").is_empty());
    }
}
