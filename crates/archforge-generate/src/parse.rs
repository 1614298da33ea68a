use serde::Serialize;
use serde_json::Value;

use archforge_core::catalog::enrich_nodes;
use archforge_core::schema::{layout_missing_positions, validate_against_schema, validate_structure};
use archforge_core::{ArchitectureGraph, Complexity, GraphMetadata};

/// Outcome of parsing raw model output. Malformed output is an expected
/// result, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ParseResult {
    fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Drop a leading ```` ```json ```` line and a trailing fence.
fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if text.starts_with("```") {
        text = match text.find('\n') {
            Some(pos) => &text[pos + 1..],
            None => text.trim_start_matches('`'),
        };
    }
    if let Some(stripped) = text.trim_end().strip_suffix("```") {
        text = stripped;
    }
    text.trim()
}

/// The substring from the first `{` to the last `}`.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

pub fn parse_response(raw: &str) -> ParseResult {
    let text = strip_code_fences(raw);
    let Some(json_str) = extract_json_object(text) else {
        tracing::debug!(len = raw.len(), "no JSON object in model output");
        return ParseResult::fail("no JSON object found in response");
    };

    let value: Value = match serde_json::from_str(json_str) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "model output is not valid JSON");
            return ParseResult::fail(format!("invalid JSON: {e}"));
        }
    };

    match validate_structure(&value) {
        Ok(()) => ParseResult::ok(value),
        Err(errors) => {
            tracing::debug!(count = errors.len(), "model output failed structure check");
            ParseResult::fail(errors.join("; "))
        }
    }
}

/// Metadata filled in when the model left it out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataDefaults {
    pub architecture_type: Option<String>,
    pub complexity: Option<Complexity>,
}

/// Raw model text carried all the way to a typed, enriched graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedResponse {
    pub parsed: ParseResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<ArchitectureGraph>,
    /// Strict-validation problems, empty when `graph` is set.
    pub errors: Vec<String>,
    pub laid_out: usize,
    pub enriched: usize,
}

impl ProcessedResponse {
    pub fn is_valid(&self) -> bool {
        self.graph.is_some()
    }
}

/// Parse, lay out missing positions, validate strictly, enrich technology
/// names and fill absent metadata.
pub fn process_response(raw: &str, defaults: &MetadataDefaults) -> ProcessedResponse {
    let parsed = parse_response(raw);
    let Some(mut value) = parsed.data.clone() else {
        let errors = parsed.error.iter().cloned().collect();
        return ProcessedResponse {
            parsed,
            graph: None,
            errors,
            laid_out: 0,
            enriched: 0,
        };
    };

    let laid_out = layout_missing_positions(&mut value);
    match validate_against_schema(&value) {
        Ok(mut graph) => {
            let enriched = enrich_nodes(&mut graph.nodes);
            fill_metadata(&mut graph, defaults);
            tracing::debug!(
                nodes = graph.nodes.len(),
                edges = graph.edges.len(),
                laid_out,
                enriched,
                "graph accepted"
            );
            ProcessedResponse {
                parsed,
                graph: Some(graph),
                errors: Vec::new(),
                laid_out,
                enriched,
            }
        }
        Err(errors) => {
            tracing::warn!(count = errors.len(), "graph failed schema validation");
            ProcessedResponse {
                parsed,
                graph: None,
                errors,
                laid_out,
                enriched: 0,
            }
        }
    }
}

fn fill_metadata(graph: &mut ArchitectureGraph, defaults: &MetadataDefaults) {
    let total = graph.total_cost();
    let meta = graph.metadata.get_or_insert_with(GraphMetadata::default);
    if meta.architecture_type.is_none() {
        meta.architecture_type = defaults.architecture_type.clone();
    }
    if meta.complexity.is_none() {
        meta.complexity = defaults.complexity;
    }
    if meta.total_cost.is_none() {
        meta.total_cost = total;
    }
}
