//! Validation of model output against the architecture wire format.
//!
//! Two levels: [`validate_structure`] is the loose shape check run on every
//! parsed response, [`validate_against_schema`] is the strict gate a graph must
//! pass before it reaches the canvas. Both collect every problem instead of
//! stopping at the first one.

use std::collections::HashSet;

use serde_json::Value;

use crate::{ArchEdge, ArchNode, ArchitectureGraph, GraphMetadata};

pub const MIN_NODES: usize = 1;
pub const MAX_NODES: usize = 50;

const GRID_COLUMNS: usize = 4;
const GRID_DX: f64 = 250.0;
const GRID_DY: f64 = 150.0;

fn has_string(obj: &Value, key: &str) -> bool {
    obj.get(key).is_some_and(Value::is_string)
}

/// Check that `nodes`/`edges` are arrays and every entry carries its required
/// keys.
pub fn validate_structure(value: &Value) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if !value.is_object() {
        return Err(vec!["response is not a JSON object".to_string()]);
    }

    match value.get("nodes").and_then(Value::as_array) {
        Some(nodes) => {
            for (i, node) in nodes.iter().enumerate() {
                if !node.is_object() {
                    errors.push(format!("node {i}: not an object"));
                    continue;
                }
                if !has_string(node, "id") {
                    errors.push(format!("node {i}: missing or invalid `id`"));
                }
                if !has_string(node, "type") {
                    errors.push(format!("node {i}: missing or invalid `type`"));
                }
                if !node.get("data").is_some_and(Value::is_object) {
                    errors.push(format!("node {i}: missing or invalid `data`"));
                }
            }
        }
        None => errors.push("`nodes` must be an array".to_string()),
    }

    match value.get("edges").and_then(Value::as_array) {
        Some(edges) => {
            for (i, edge) in edges.iter().enumerate() {
                if !edge.is_object() {
                    errors.push(format!("edge {i}: not an object"));
                    continue;
                }
                for key in ["id", "source", "target"] {
                    if !has_string(edge, key) {
                        errors.push(format!("edge {i}: missing or invalid `{key}`"));
                    }
                }
            }
        }
        None => errors.push("`edges` must be an array".to_string()),
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Strict validation: closed enums, node-count bounds, unique ids and edges
/// that reference existing nodes. Yields the typed graph on success.
pub fn validate_against_schema(value: &Value) -> Result<ArchitectureGraph, Vec<String>> {
    validate_structure(value)?;

    let mut errors = Vec::new();
    let raw_nodes = value
        .get("nodes")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let raw_edges = value
        .get("edges")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    if raw_nodes.len() < MIN_NODES || raw_nodes.len() > MAX_NODES {
        errors.push(format!(
            "graph must have between {MIN_NODES} and {MAX_NODES} nodes, got {}",
            raw_nodes.len()
        ));
    }

    let mut node_ids = HashSet::new();
    let mut nodes = Vec::with_capacity(raw_nodes.len());
    for (i, raw) in raw_nodes.iter().enumerate() {
        if let Some(id) = raw.get("id").and_then(Value::as_str) {
            if !node_ids.insert(id) {
                errors.push(format!("node {i}: duplicate id `{id}`"));
            }
        }
        match serde_json::from_value::<ArchNode>(raw.clone()) {
            Ok(node) => nodes.push(node),
            Err(e) => errors.push(format!("node {i}: {e}")),
        }
    }

    let mut edge_ids = HashSet::new();
    let mut edges = Vec::with_capacity(raw_edges.len());
    for (i, raw) in raw_edges.iter().enumerate() {
        if let Some(id) = raw.get("id").and_then(Value::as_str) {
            if !edge_ids.insert(id) {
                errors.push(format!("edge {i}: duplicate id `{id}`"));
            }
        }
        for key in ["source", "target"] {
            if let Some(endpoint) = raw.get(key).and_then(Value::as_str) {
                if !node_ids.contains(endpoint) {
                    errors.push(format!("edge {i}: {key} `{endpoint}` is not a node id"));
                }
            }
        }
        match serde_json::from_value::<ArchEdge>(raw.clone()) {
            Ok(edge) => edges.push(edge),
            Err(e) => errors.push(format!("edge {i}: {e}")),
        }
    }

    let metadata = match value.get("metadata") {
        None | Some(Value::Null) => None,
        Some(raw) => match serde_json::from_value::<GraphMetadata>(raw.clone()) {
            Ok(m) => Some(m),
            Err(e) => {
                errors.push(format!("metadata: {e}"));
                None
            }
        },
    };

    if errors.is_empty() {
        Ok(ArchitectureGraph {
            nodes,
            edges,
            metadata,
        })
    } else {
        Err(errors)
    }
}

/// Place nodes that arrive without a usable `position` on a fixed grid.
/// Returns how many nodes were placed.
pub fn layout_missing_positions(value: &mut Value) -> usize {
    let Some(nodes) = value.get_mut("nodes").and_then(Value::as_array_mut) else {
        return 0;
    };
    let mut placed = 0;
    for (i, node) in nodes.iter_mut().enumerate() {
        let Some(obj) = node.as_object_mut() else {
            continue;
        };
        let valid = obj.get("position").is_some_and(|p| {
            p.get("x").is_some_and(Value::is_number) && p.get("y").is_some_and(Value::is_number)
        });
        if valid {
            continue;
        }
        let col = (i % GRID_COLUMNS) as f64;
        let row = (i / GRID_COLUMNS) as f64;
        obj.insert(
            "position".to_string(),
            serde_json::json!({ "x": col * GRID_DX, "y": row * GRID_DY }),
        );
        placed += 1;
    }
    placed
}

/// JSON schema of the wire format, for tool consumers.
pub fn architecture_json_schema() -> Value {
    serde_json::to_value(schemars::schema_for!(ArchitectureGraph)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, kind: &str) -> Value {
        json!({
            "id": id,
            "type": kind,
            "position": {"x": 0, "y": 0},
            "data": {"label": id, "serviceType": kind}
        })
    }

    #[test]
    fn structure_collects_every_problem() {
        let errors = validate_structure(&json!({"nodes": [{"id": "1"}], "edges": []})).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("node 0") && errors[0].contains("`type`"));
        assert!(errors[1].contains("node 0") && errors[1].contains("`data`"));
    }

    #[test]
    fn structure_requires_arrays() {
        let errors = validate_structure(&json!({"nodes": {}, "edges": "x"})).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(validate_structure(&json!([])).is_err());
        assert!(validate_structure(&json!({"nodes": [], "edges": []})).is_ok());
    }

    #[test]
    fn structure_checks_edge_keys() {
        let errors = validate_structure(&json!({
            "nodes": [],
            "edges": [{"id": "e1", "source": 3}]
        }))
        .unwrap_err();
        assert_eq!(
            errors,
            vec![
                "edge 0: missing or invalid `source`".to_string(),
                "edge 0: missing or invalid `target`".to_string(),
            ]
        );
    }

    #[test]
    fn schema_accepts_valid_graph() {
        let value = json!({
            "nodes": [node("web", "frontend"), node("api", "backend")],
            "edges": [{
                "id": "e1", "source": "web", "target": "api", "animated": true,
                "data": {"protocol": "https", "latency": 40}
            }],
            "metadata": {"complexity": "simple"}
        });
        let graph = validate_against_schema(&value).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges[0].data.as_ref().unwrap().protocol, Some(crate::Protocol::Https));
        assert_eq!(
            graph.metadata.unwrap().complexity,
            Some(crate::Complexity::Simple)
        );
    }

    #[test]
    fn schema_rejects_unknown_enums_and_dangling_edges() {
        let value = json!({
            "nodes": [node("web", "frontend"), node("x", "mainframe")],
            "edges": [
                {"id": "e1", "source": "web", "target": "ghost"},
                {"id": "e2", "source": "web", "target": "x", "data": {"protocol": "smtp"}}
            ]
        });
        let errors = validate_against_schema(&value).unwrap_err();
        assert!(errors.iter().any(|e| e.starts_with("node 1:")));
        assert!(errors.iter().any(|e| e.contains("`ghost` is not a node id")));
        assert!(errors.iter().any(|e| e.starts_with("edge 1:")));
    }

    #[test]
    fn schema_enforces_node_bounds_and_unique_ids() {
        let errors = validate_against_schema(&json!({"nodes": [], "edges": []})).unwrap_err();
        assert!(errors[0].contains("between 1 and 50"));

        let many: Vec<Value> = (0..51).map(|i| node(&format!("n{i}"), "service")).collect();
        let errors = validate_against_schema(&json!({"nodes": many, "edges": []})).unwrap_err();
        assert!(errors[0].contains("got 51"));

        let errors = validate_against_schema(&json!({
            "nodes": [node("a", "service"), node("a", "service")],
            "edges": []
        }))
        .unwrap_err();
        assert_eq!(errors, vec!["node 1: duplicate id `a`".to_string()]);
    }

    #[test]
    fn layout_places_only_missing_positions() {
        let mut value = json!({
            "nodes": [
                {"id": "a", "position": {"x": 5, "y": 6}},
                {"id": "b"},
                {"id": "c", "position": {"x": "left"}},
                {"id": "d"},
                {"id": "e"}
            ]
        });
        assert_eq!(layout_missing_positions(&mut value), 4);
        assert_eq!(value["nodes"][0]["position"], json!({"x": 5, "y": 6}));
        assert_eq!(value["nodes"][1]["position"], json!({"x": 250.0, "y": 0.0}));
        assert_eq!(value["nodes"][4]["position"], json!({"x": 0.0, "y": 150.0}));
    }

    #[test]
    fn json_schema_names_the_graph() {
        let schema = architecture_json_schema();
        assert!(schema.get("properties").and_then(|p| p.get("nodes")).is_some());
    }
}
