//! A single document collection: rows keyed by `_id` plus declared secondary indexes

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Identity index name; always sortable, never declared
pub const ID_FIELD: &str = "_id";

/// Value wrapper ordered by [`Value::compare`], usable as a BTreeSet key
#[derive(Debug, Clone)]
pub struct IndexKey(pub Value);

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.compare(&other.0) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.compare(&other.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    indexes: Vec<String>,
    docs: BTreeMap<u64, Value>,
    #[serde(skip)]
    index_data: BTreeMap<String, BTreeSet<(IndexKey, u64)>>,
}

impl Collection {
    pub fn new(name: impl Into<String>, indexes: &[String]) -> Self {
        let mut collection = Collection {
            name: name.into(),
            indexes: indexes.to_vec(),
            docs: BTreeMap::new(),
            index_data: BTreeMap::new(),
        };
        collection.rebuild_indexes();
        collection
    }

    pub fn indexes(&self) -> &[String] {
        &self.indexes
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&Value> {
        self.docs.get(&id)
    }

    /// Documents in `_id` order
    pub fn iter(&self) -> impl Iterator<Item = (&u64, &Value)> {
        self.docs.iter()
    }

    pub fn is_indexed(&self, field: &str) -> bool {
        field == ID_FIELD || self.indexes.iter().any(|i| i == field)
    }

    /// Store `doc` under `id`, stamping `_id` into it
    pub fn insert(&mut self, id: u64, mut doc: Value) -> Value {
        if let Some(map) = doc.as_object_mut() {
            map.insert(ID_FIELD.to_string(), Value::from(id));
        }
        if let Some(old) = self.docs.remove(&id) {
            self.unindex(id, &old);
        }
        self.index(id, &doc);
        self.docs.insert(id, doc.clone());
        doc
    }

    /// Replace an existing document; `false` if `id` is unknown
    pub fn replace(&mut self, id: u64, doc: Value) -> bool {
        if !self.docs.contains_key(&id) {
            return false;
        }
        self.insert(id, doc);
        true
    }

    pub fn remove(&mut self, id: u64) -> Option<Value> {
        let doc = self.docs.remove(&id)?;
        self.unindex(id, &doc);
        Some(doc)
    }

    /// Ids whose `field` equals `value`, via the secondary index
    pub fn lookup(&self, field: &str, value: &Value) -> Option<Vec<u64>> {
        if field == ID_FIELD {
            let id = value.as_i64().and_then(|i| u64::try_from(i).ok())?;
            return Some(self.docs.contains_key(&id).then_some(id).into_iter().collect());
        }
        let set = self.index_data.get(field)?;
        let key = IndexKey(value.clone());
        let ids = set
            .range((key.clone(), 0)..=(key, u64::MAX))
            .map(|(_, id)| *id)
            .collect();
        Some(ids)
    }

    /// Secondary index sets are not persisted; rebuild after load
    pub fn rebuild_indexes(&mut self) {
        self.index_data = self
            .indexes
            .iter()
            .map(|name| (name.clone(), BTreeSet::new()))
            .collect();
        let docs: Vec<(u64, Value)> = self.docs.iter().map(|(id, doc)| (*id, doc.clone())).collect();
        for (id, doc) in &docs {
            self.index(*id, doc);
        }
    }

    fn index(&mut self, id: u64, doc: &Value) {
        for (field, set) in self.index_data.iter_mut() {
            let key = doc.get_path(field).cloned().unwrap_or(Value::Null);
            set.insert((IndexKey(key), id));
        }
    }

    fn unindex(&mut self, id: u64, doc: &Value) {
        for (field, set) in self.index_data.iter_mut() {
            let key = doc.get_path(field).cloned().unwrap_or(Value::Null);
            set.remove(&(IndexKey(key), id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: &str) -> Value {
        Value::parse_json(json).unwrap()
    }

    #[test]
    fn test_insert_stamps_id() {
        let mut c = Collection::new("dice_params", &[]);
        let stored = c.insert(1, doc(r#"{"houseEdge": 0.01}"#));
        assert_eq!(stored.get("_id"), Some(&Value::Integer(1)));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_lookup_uses_secondary_index() {
        let mut c = Collection::new("tokens_balances", &["account".to_string()]);
        c.insert(1, doc(r#"{"account": "alice", "balance": 5}"#));
        c.insert(2, doc(r#"{"account": "bob", "balance": 3}"#));
        c.insert(3, doc(r#"{"account": "alice", "balance": 1}"#));

        assert_eq!(c.lookup("account", &Value::from("alice")), Some(vec![1, 3]));
        assert_eq!(c.lookup("account", &Value::from("carol")), Some(vec![]));
        assert_eq!(c.lookup("balance", &Value::Integer(5)), None);
    }

    #[test]
    fn test_replace_and_remove_keep_index_in_sync() {
        let mut c = Collection::new("t", &["owner".to_string()]);
        c.insert(1, doc(r#"{"owner": "alice"}"#));
        assert!(c.replace(1, doc(r#"{"owner": "bob"}"#)));
        assert_eq!(c.lookup("owner", &Value::from("alice")), Some(vec![]));
        assert_eq!(c.lookup("owner", &Value::from("bob")), Some(vec![1]));

        assert!(c.remove(1).is_some());
        assert_eq!(c.lookup("owner", &Value::from("bob")), Some(vec![]));
        assert!(!c.replace(1, doc(r#"{"owner": "carol"}"#)));
    }

    #[test]
    fn test_rebuild_after_deserialize() {
        let mut c = Collection::new("t", &["owner".to_string()]);
        c.insert(7, doc(r#"{"owner": "alice"}"#));
        let json = serde_json::to_string(&c).unwrap();

        let mut loaded: Collection = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.lookup("owner", &Value::from("alice")), None);
        loaded.rebuild_indexes();
        assert_eq!(loaded.lookup("owner", &Value::from("alice")), Some(vec![7]));
    }

    #[test]
    fn test_lookup_by_identity() {
        let mut c = Collection::new("t", &[]);
        c.insert(4, doc("{}"));
        assert_eq!(c.lookup("_id", &Value::Integer(4)), Some(vec![4]));
        assert_eq!(c.lookup("_id", &Value::Integer(5)), Some(vec![]));
    }
}
