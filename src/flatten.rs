//! Flattening of nested JSON configuration trees into configuration paths.
//!
//! Objects contribute one path segment per key, arrays contribute `segment:index`,
//! and every scalar leaf becomes one [`FlatEntry`]. Empty objects and arrays produce
//! nothing. JSON `null` is kept as an explicit absent value (`None`).

use serde_json::Value;

use crate::utils::{index_path, join_path, ConsulConfigError, Result};

/// A parsed configuration tree, keeping object keys in document order.
#[derive(Debug, Clone, PartialEq)]
pub enum RawNode {
    Object(Vec<(String, RawNode)>),
    Array(Vec<RawNode>),
    /// A leaf value. `None` is JSON `null` or a key without a value.
    Scalar(Option<String>),
}

impl RawNode {
    /// Parse a JSON document.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str::<Value>(text)
            .map(RawNode::from)
            .map_err(|e| ConsulConfigError::malformed(format!("Invalid JSON value: {}", e)))
    }

    pub fn null() -> Self {
        RawNode::Scalar(None)
    }

    pub fn scalar(value: &str) -> Self {
        RawNode::Scalar(Some(value.to_string()))
    }
}

impl From<Value> for RawNode {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => RawNode::Object(map.into_iter().map(|(k, v)| (k, RawNode::from(v))).collect()),
            Value::Array(items) => RawNode::Array(items.into_iter().map(RawNode::from).collect()),
            Value::String(s) => RawNode::Scalar(Some(s)),
            Value::Bool(b) => RawNode::Scalar(Some(b.to_string())),
            Value::Number(n) => RawNode::Scalar(Some(n.to_string())),
            Value::Null => RawNode::Scalar(None),
        }
    }
}

/// One leaf of a flattened tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatEntry {
    pub path: String,
    pub value: Option<String>,
}

impl FlatEntry {
    pub fn new(path: impl Into<String>, value: Option<String>) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }
}

/// Lazily flatten `node` with every path rooted at `prefix`.
///
/// `delimiter` separates object keys; array positions always use `:`.
pub fn flatten<'a>(prefix: &str, node: &'a RawNode, delimiter: &'a str) -> Flatten<'a> {
    Flatten {
        stack: vec![(prefix.to_string(), node)],
        delimiter,
    }
}

/// Depth-first iterator returned by [`flatten`].
pub struct Flatten<'a> {
    stack: Vec<(String, &'a RawNode)>,
    delimiter: &'a str,
}

impl<'a> Iterator for Flatten<'a> {
    type Item = FlatEntry;

    fn next(&mut self) -> Option<FlatEntry> {
        while let Some((path, node)) = self.stack.pop() {
            match node {
                RawNode::Scalar(value) => return Some(FlatEntry::new(path, value.clone())),
                // Children are pushed in reverse so they pop in document order.
                RawNode::Object(children) => {
                    for (key, child) in children.iter().rev() {
                        self.stack.push((join_path(&path, key, self.delimiter), child));
                    }
                }
                RawNode::Array(items) => {
                    for (i, item) in items.iter().enumerate().rev() {
                        self.stack.push((index_path(&path, i), item));
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flat(prefix: &str, value: Value) -> Vec<(String, Option<String>)> {
        let node = RawNode::from(value);
        flatten(prefix, &node, ":").map(|e| (e.path, e.value)).collect()
    }

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn test_top_level_scalar_uses_prefix() {
        assert_eq!(flat("timeout", json!(30)), vec![("timeout".to_string(), some("30"))]);
    }

    #[test]
    fn test_flat_object() {
        let result = flat("app", json!({"host": "localhost", "port": 5432}));
        assert_eq!(
            result,
            vec![
                ("app:host".to_string(), some("localhost")),
                ("app:port".to_string(), some("5432")),
            ]
        );
    }

    #[test]
    fn test_nested_array_path() {
        let result = flat("a", json!({"b": [{"c": "x"}, {"c": "y"}, {"c": "z"}]}));
        assert_eq!(result[2], ("a:b:2:c".to_string(), some("z")));
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn test_array_of_scalars() {
        let result = flat("hosts", json!(["a", "b"]));
        assert_eq!(
            result,
            vec![("hosts:0".to_string(), some("a")), ("hosts:1".to_string(), some("b"))]
        );
    }

    #[test]
    fn test_document_order_is_kept() {
        let node = RawNode::parse(r#"{"zeta": 1, "alpha": 2, "mid": {"y": 3, "b": 4}}"#).unwrap();
        let paths: Vec<String> = flatten("", &node, ":").map(|e| e.path).collect();
        assert_eq!(paths, vec!["zeta", "alpha", "mid:y", "mid:b"]);
    }

    #[test]
    fn test_empty_containers_vanish() {
        assert!(flat("", json!({"a": {}})).is_empty());
        assert!(flat("k", json!({"list": [], "obj": {}})).is_empty());
        assert!(flat("k", json!([])).is_empty());
    }

    #[test]
    fn test_null_leaf_is_absent_not_empty() {
        let result = flat("k", json!({"missing": null, "blank": ""}));
        assert_eq!(result[0], ("k:missing".to_string(), None));
        assert_eq!(result[1], ("k:blank".to_string(), some("")));
    }

    #[test]
    fn test_booleans_and_floats() {
        let result = flat("f", json!({"on": true, "ratio": 0.5}));
        assert_eq!(result[0].1, some("true"));
        assert_eq!(result[1].1, some("0.5"));
    }

    #[test]
    fn test_slash_in_key_becomes_delimiter() {
        let result = flat("root", json!({"db/primary": "pg"}));
        assert_eq!(result, vec![("root:db:primary".to_string(), some("pg"))]);
    }

    #[test]
    fn test_empty_property_name_extends_path() {
        assert_eq!(flat("k", json!({"": "x"})), vec![("k:".to_string(), some("x"))]);
        assert_eq!(
            flat("k", json!({"": "x", "a": "y"})).len(),
            2,
            "an empty name must not land on the parent path"
        );
    }

    #[test]
    fn test_custom_delimiter_keeps_array_colon() {
        let node = RawNode::from(json!({"servers": [{"port": 80}]}));
        let paths: Vec<String> = flatten("app", &node, ".").map(|e| e.path).collect();
        assert_eq!(paths, vec!["app.servers:0.port"]);
    }

    #[test]
    fn test_flattening_is_deterministic() {
        let node = RawNode::from(json!({"a": {"b": [1, {"c": null}], "d": "e"}, "f": [[1, 2]]}));
        let first: Vec<FlatEntry> = flatten("p", &node, ":").collect();
        let second: Vec<FlatEntry> = flatten("p", &node, ":").collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);
    }

    #[test]
    fn test_iterator_is_lazy() {
        let node = RawNode::from(json!({"a": 1, "b": 2, "c": 3}));
        let mut iter = flatten("", &node, ":");
        assert_eq!(iter.next().map(|e| e.path), Some("a".to_string()));
        assert_eq!(iter.stack.len(), 2);
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let err = RawNode::parse("{not json").unwrap_err();
        assert!(matches!(err, ConsulConfigError::MalformedResponse(_)));
    }
}
