//! Query documents: validation, matching and result ordering
//!
//! A query is an object of `field: condition` pairs, all of which must hold.
//! A condition is either a literal (numeric-aware equality) or an object of
//! operators: `$eq $ne $gt $gte $lt $lte $in $nin $exists`. Top-level `$and`
//! and `$or` combine sub-queries. Pattern-matching and script operators are
//! refused outright so a query can never run unbounded user code.

use std::cmp::Ordering;

use crate::store::collection::{Collection, ID_FIELD};
use crate::value::Value;

pub const MAX_LIMIT: usize = 1000;

const FORBIDDEN_OPERATORS: &[&str] = &["$regex", "$where", "$expr", "$function", "$text"];
const FIELD_OPERATORS: &[&str] = &["$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$exists"];

/// One sort key of a `find`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub index: String,
    pub descending: bool,
}

/// Validated paging and ordering for `find`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindOptions {
    pub limit: usize,
    pub offset: usize,
    pub indexes: Vec<IndexSpec>,
}

impl Default for FindOptions {
    fn default() -> Self {
        FindOptions {
            limit: MAX_LIMIT,
            offset: 0,
            indexes: Vec::new(),
        }
    }
}

impl FindOptions {
    /// Parse contract-supplied arguments. `null` (and a zero limit) fall back
    /// to the defaults; anything malformed yields `None`.
    pub fn from_values(limit: &Value, offset: &Value, indexes: &Value) -> Option<Self> {
        let limit = match limit {
            Value::Null => MAX_LIMIT,
            v => match v.as_i64()? {
                0 => MAX_LIMIT,
                n if (1..=MAX_LIMIT as i64).contains(&n) => n as usize,
                _ => return None,
            },
        };

        let offset = match offset {
            Value::Null => 0,
            v => usize::try_from(v.as_i64()?).ok()?,
        };

        let indexes = match indexes {
            Value::Null => Vec::new(),
            Value::Array(items) => items
                .iter()
                .map(IndexSpec::from_value)
                .collect::<Option<Vec<_>>>()?,
            _ => return None,
        };

        Some(FindOptions {
            limit,
            offset,
            indexes,
        })
    }
}

impl IndexSpec {
    fn from_value(value: &Value) -> Option<Self> {
        let index = value.get("index")?.as_str()?.to_string();
        let descending = match value.get("descending") {
            None | Some(Value::Null) => false,
            Some(v) => v.as_bool()?,
        };
        Some(IndexSpec { index, descending })
    }

    fn field(&self) -> &str {
        if self.index == "$loki" {
            ID_FIELD
        } else {
            &self.index
        }
    }
}

/// Structural check: an object, no forbidden operators at any depth,
/// no unknown `$` operators
pub fn is_valid_query(query: &Value) -> bool {
    let Some(map) = query.as_object() else {
        return false;
    };

    map.iter().all(|(key, condition)| match key.as_str() {
        "$and" | "$or" => condition
            .as_array()
            .is_some_and(|subs| subs.iter().all(is_valid_query)),
        k if k.starts_with('$') => false,
        _ => is_valid_condition(condition),
    })
}

fn is_valid_condition(condition: &Value) -> bool {
    if contains_forbidden(condition) {
        return false;
    }
    match condition.as_object() {
        Some(ops) if is_operator_object(ops) => ops.iter().all(|(op, arg)| {
            FIELD_OPERATORS.contains(&op.as_str())
                && match op.as_str() {
                    "$in" | "$nin" => arg.as_array().is_some(),
                    _ => true,
                }
        }),
        _ => true,
    }
}

fn contains_forbidden(value: &Value) -> bool {
    match value {
        Value::Object(map) => map
            .iter()
            .any(|(k, v)| FORBIDDEN_OPERATORS.contains(&k.as_str()) || contains_forbidden(v)),
        Value::Array(items) => items.iter().any(contains_forbidden),
        _ => false,
    }
}

fn is_operator_object(map: &std::collections::BTreeMap<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

/// Does `doc` satisfy a query that already passed [`is_valid_query`]?
pub fn matches(doc: &Value, query: &Value) -> bool {
    let Some(map) = query.as_object() else {
        return false;
    };

    map.iter().all(|(key, condition)| match key.as_str() {
        "$and" => condition
            .as_array()
            .is_some_and(|subs| subs.iter().all(|q| matches(doc, q))),
        "$or" => condition
            .as_array()
            .is_some_and(|subs| subs.iter().any(|q| matches(doc, q))),
        field => field_matches(doc.get_path(field), condition),
    })
}

fn field_matches(actual: Option<&Value>, condition: &Value) -> bool {
    match condition.as_object() {
        Some(ops) if is_operator_object(ops) => ops.iter().all(|(op, arg)| apply(op, actual, arg)),
        _ => actual.is_some_and(|v| v.loose_eq(condition)),
    }
}

fn apply(op: &str, actual: Option<&Value>, arg: &Value) -> bool {
    let cmp = |pred: fn(Ordering) -> bool| {
        actual.is_some_and(|v| same_kind(v, arg) && pred(v.compare(arg)))
    };

    match op {
        "$eq" => actual.is_some_and(|v| v.loose_eq(arg)),
        "$ne" => !actual.is_some_and(|v| v.loose_eq(arg)),
        "$gt" => cmp(|o| o == Ordering::Greater),
        "$gte" => cmp(|o| o != Ordering::Less),
        "$lt" => cmp(|o| o == Ordering::Less),
        "$lte" => cmp(|o| o != Ordering::Greater),
        "$in" => actual.is_some_and(|v| {
            arg.as_array()
                .is_some_and(|items| items.iter().any(|i| v.loose_eq(i)))
        }),
        "$nin" => !actual.is_some_and(|v| {
            arg.as_array()
                .is_some_and(|items| items.iter().any(|i| v.loose_eq(i)))
        }),
        "$exists" => actual.is_some() == arg.is_truthy(),
        _ => false,
    }
}

/// Range operators only compare like with like (numbers with numbers, strings with strings)
fn same_kind(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_))
            | (Value::String(_), Value::String(_))
            | (Value::Boolean(_), Value::Boolean(_))
    )
}

/// Every requested sort key must be declared on the collection (or be the identity index)
pub fn indexes_allowed(collection: &Collection, options: &FindOptions) -> bool {
    options
        .indexes
        .iter()
        .all(|spec| collection.is_indexed(spec.field()))
}

/// Run a validated query against a collection.
///
/// Candidates come from a secondary index when the query pins an indexed
/// field to a literal, otherwise from a full scan in `_id` order. Results are
/// sorted by the requested indexes with `_id` ascending as the final tie-break.
pub fn execute(collection: &Collection, query: &Value, options: &FindOptions) -> Vec<Value> {
    let mut results: Vec<&Value> = match indexed_candidates(collection, query) {
        Some(ids) => ids
            .into_iter()
            .filter_map(|id| collection.get(id))
            .filter(|doc| matches(doc, query))
            .collect(),
        None => collection
            .iter()
            .map(|(_, doc)| doc)
            .filter(|doc| matches(doc, query))
            .collect(),
    };

    if !options.indexes.is_empty() {
        results.sort_by(|a, b| compare_by_indexes(a, b, &options.indexes));
    }

    results
        .into_iter()
        .skip(options.offset)
        .take(options.limit)
        .cloned()
        .collect()
}

fn indexed_candidates(collection: &Collection, query: &Value) -> Option<Vec<u64>> {
    let map = query.as_object()?;
    map.iter().find_map(|(field, condition)| {
        if field.starts_with('$') || !collection.is_indexed(field) {
            return None;
        }
        let literal = match condition {
            Value::Object(ops) if is_operator_object(ops) => ops.get("$eq")?,
            Value::Object(_) | Value::Array(_) => return None,
            v => v,
        };
        let mut ids = collection.lookup(field, literal)?;
        ids.sort_unstable();
        Some(ids)
    })
}

fn compare_by_indexes(a: &Value, b: &Value, specs: &[IndexSpec]) -> Ordering {
    for spec in specs {
        let field = spec.field();
        let va = a.get_path(field).unwrap_or(&Value::Null);
        let vb = b.get_path(field).unwrap_or(&Value::Null);
        let ord = va.compare(vb);
        let ord = if spec.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    let ida = a.get(ID_FIELD).unwrap_or(&Value::Null);
    let idb = b.get(ID_FIELD).unwrap_or(&Value::Null);
    ida.compare(idb)
}
