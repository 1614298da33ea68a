use serde::{Deserialize, Serialize};

use archforge_core::rules::{mode_constraints, INCOMPATIBLE_FRAMEWORKS, RULES};
use archforge_core::{ArchitectureGraph, Complexity, GenerationMode, NodeType, Protocol};

use crate::intent::{ArchitectureDetection, EditOperation};
use crate::transport::ChatMessage;

/// How many past turns are replayed to the model.
pub const HISTORY_TURNS: usize = 6;

/// Token cap applied in quick mode.
pub const QUICK_MODE_MAX_TOKENS: u32 = 4096;

/// Technologies the user asked for or ruled out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TechPreferences {
    pub preferred: Vec<String>,
    pub avoid: Vec<String>,
    pub cloud: Option<String>,
}

impl TechPreferences {
    pub fn is_empty(&self) -> bool {
        self.preferred.is_empty() && self.avoid.is_empty() && self.cloud.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptContext {
    pub user_input: String,
    pub detection: ArchitectureDetection,
    pub complexity: Complexity,
    pub current_graph: ArchitectureGraph,
    pub mode: GenerationMode,
    pub operation: EditOperation,
    pub preferences: Option<TechPreferences>,
    pub history: Vec<ChatMessage>,
    pub quick_mode: bool,
}

/// Compact text listing of an existing graph, one line per node and edge.
pub fn serialize_graph(graph: &ArchitectureGraph) -> String {
    let mut out = String::with_capacity(1024);

    out.push_str("NODES:\n");
    for node in &graph.nodes {
        let d = &node.data;
        out.push_str("- ");
        out.push_str(&node.id);
        out.push_str(" \"");
        out.push_str(&d.label);
        out.push_str("\" (");
        out.push_str(node.node_type.as_str());
        if let Some(tech) = &d.tech {
            out.push_str(", ");
            out.push_str(tech);
        }
        out.push(')');
        if let Some(desc) = d.description.as_deref().filter(|s| !s.is_empty()) {
            out.push_str(": ");
            out.push_str(desc);
        }
        out.push('\n');
    }

    if !graph.edges.is_empty() {
        out.push_str("EDGES:\n");
        for edge in &graph.edges {
            out.push_str("- ");
            out.push_str(&edge.source);
            out.push_str(" -> ");
            out.push_str(&edge.target);
            if let Some(data) = &edge.data {
                if let Some(p) = data.protocol {
                    out.push_str(" [");
                    out.push_str(p.as_str());
                    out.push(']');
                }
                if let Some(label) = &data.label {
                    out.push_str(" \"");
                    out.push_str(label);
                    out.push('"');
                }
            }
            out.push('\n');
        }
    }

    out
}

fn operation_instruction(op: EditOperation) -> &'static str {
    match op {
        EditOperation::Create => "Design a new architecture from scratch.",
        EditOperation::Modify => {
            "Modify the existing architecture as requested. Keep every node id that still \
exists so the canvas can preserve positions."
        }
        EditOperation::Extend => {
            "Extend the existing architecture. Return every existing node and edge unchanged \
plus the new ones."
        }
        EditOperation::Simplify => {
            "Simplify the existing architecture: merge or drop components that do not earn \
their place. Keep ids of surviving nodes."
        }
        EditOperation::Remove => {
            "Remove the components the user names, along with every edge touching them. \
Leave everything else unchanged."
        }
        EditOperation::Optimize => {
            "Optimize the existing architecture for the stated goal (cost, latency or \
scale). Keep ids of surviving nodes."
        }
    }
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "required"
    } else {
        "optional"
    }
}

fn vocabulary<T: Copy>(items: &[T], name: impl Fn(T) -> &'static str) -> String {
    items.iter().map(|i| name(*i)).collect::<Vec<_>>().join(", ")
}

/// Deterministic: the same context always yields the same text.
pub fn build_system_prompt(ctx: &PromptContext) -> String {
    let arch = ctx.detection.architecture_type;
    let limits = mode_constraints(ctx.mode);

    let mut out = String::with_capacity(4096);
    out.push_str(
        "You are a senior software architect. Turn the user's description into an \
architecture diagram made of nodes (components) and edges (connections).\n\n",
    );

    out.push_str("## Detected architecture\n");
    out.push_str(&format!(
        "Type: {} ({}), confidence {:.2}\n",
        arch.display_name(),
        arch.as_str(),
        ctx.detection.confidence
    ));
    if !ctx.detection.matched_keywords.is_empty() {
        out.push_str("Signals: ");
        out.push_str(&ctx.detection.matched_keywords.join(", "));
        out.push('\n');
    }
    out.push_str(&format!("Expected complexity: {}\n\n", ctx.complexity.as_str()));

    out.push_str(&format!("## Mode: {}\n", ctx.mode.as_str()));
    out.push_str(&format!(
        "- Use between {} and {} components.\n- CDN: {}\n- Load balancer: {}\n- Observability (monitoring/logging): {}\n\n",
        limits.min_components,
        limits.max_components,
        yes_no(limits.require_cdn),
        yes_no(limits.require_load_balancer),
        yes_no(limits.require_observability),
    ));

    out.push_str("## Rules\n");
    out.push_str(RULES);
    out.push_str("\n\n## Never combine\n");
    for pair in INCOMPATIBLE_FRAMEWORKS {
        out.push_str(&format!("- {} with {}: {}\n", pair.first, pair.second, pair.reason));
    }
    out.push('\n');

    if let Some(prefs) = ctx.preferences.as_ref().filter(|p| !p.is_empty()) {
        out.push_str("## User preferences\n");
        if !prefs.preferred.is_empty() {
            out.push_str(&format!("- Prefer: {}\n", prefs.preferred.join(", ")));
        }
        if !prefs.avoid.is_empty() {
            out.push_str(&format!("- Avoid: {}\n", prefs.avoid.join(", ")));
        }
        if let Some(cloud) = &prefs.cloud {
            out.push_str(&format!("- Cloud: {cloud}\n"));
        }
        out.push('\n');
    }

    if ctx.current_graph.is_empty() {
        out.push_str("## Task\n");
        out.push_str(operation_instruction(EditOperation::Create));
        out.push_str("\n\n");
    } else {
        out.push_str("## Current architecture\n");
        out.push_str(&serialize_graph(&ctx.current_graph));
        out.push_str(&format!("\n## Task ({})\n", ctx.operation.as_str()));
        out.push_str(operation_instruction(ctx.operation));
        out.push_str("\n\n");
    }

    out.push_str(&format!(
        "## Output format\n\
Output ONLY one JSON object, no prose:\n\
{{\"nodes\":[{{\"id\":\"<unique>\",\"type\":\"<node type>\",\"position\":{{\"x\":0,\"y\":0}},\
\"data\":{{\"label\":\"...\",\"tech\":\"...\",\"description\":\"...\",\"serviceType\":\"<node type>\",\"costEstimate\":0}}}}],\n\
\"edges\":[{{\"id\":\"<unique>\",\"source\":\"<node id>\",\"target\":\"<node id>\",\"animated\":false,\
\"data\":{{\"protocol\":\"<protocol>\",\"label\":\"...\"}}}}],\n\
\"metadata\":{{\"architectureType\":\"{}\",\"complexity\":\"simple|medium|complex\",\"totalCost\":0,\"reasoning\":\"...\"}}}}\n\
Node types: {}\n\
Protocols: {}\n",
        arch.as_str(),
        vocabulary(&NodeType::ALL, NodeType::as_str),
        vocabulary(&Protocol::ALL, Protocol::as_str),
    ));

    if ctx.quick_mode {
        out.push_str(
            "\nQuick mode: keep it compact. Short labels, one-sentence descriptions, \
omit reasoning and cost estimates.\n",
        );
    }

    out
}

/// Trailing conversation turns followed by the user's request.
pub fn build_messages(ctx: &PromptContext) -> Vec<ChatMessage> {
    let skip = ctx.history.len().saturating_sub(HISTORY_TURNS);
    let mut messages: Vec<ChatMessage> = ctx.history.iter().skip(skip).cloned().collect();
    messages.push(ChatMessage::user(ctx.user_input.clone()));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{detect_architecture_type, ArchitectureType};
    use crate::transport::Role;
    use archforge_core::{ArchEdge, ArchNode, EdgeData, NodeData, Position};

    fn node(id: &str, label: &str, node_type: NodeType, desc: Option<&str>) -> ArchNode {
        ArchNode {
            id: id.to_string(),
            node_type,
            position: Position::default(),
            data: NodeData {
                label: label.to_string(),
                tech: None,
                tech_label: None,
                logo: None,
                description: desc.map(str::to_string),
                service_type: node_type,
                cost_estimate: None,
            },
        }
    }

    fn context(input: &str) -> PromptContext {
        PromptContext {
            user_input: input.to_string(),
            detection: detect_architecture_type(input),
            complexity: Complexity::Medium,
            current_graph: ArchitectureGraph::default(),
            mode: GenerationMode::Default,
            operation: EditOperation::Create,
            preferences: None,
            history: Vec::new(),
            quick_mode: false,
        }
    }

    #[test]
    fn prompt_is_deterministic() {
        let ctx = context("Build a web application with React");
        assert_eq!(build_system_prompt(&ctx), build_system_prompt(&ctx.clone()));
    }

    #[test]
    fn prompt_embeds_archetype_mode_and_rules() {
        let mut ctx = context("Build a web application with React");
        ctx.mode = GenerationMode::Enterprise;
        let prompt = build_system_prompt(&ctx);
        assert_eq!(ctx.detection.architecture_type, ArchitectureType::WebApp);
        assert!(prompt.contains("Web application (web-app), confidence 1.00"));
        assert!(prompt.contains("Use between 10 and 25 components."));
        assert!(prompt.contains("- CDN: required"));
        assert!(prompt.contains(RULES));
        let pair = &INCOMPATIBLE_FRAMEWORKS[0];
        assert!(prompt.contains(&format!("- {} with {}", pair.first, pair.second)));
        assert!(prompt.contains("vector-db"));
        assert!(prompt.contains("loadbalancer"));
        assert!(!prompt.contains("## Current architecture"));
        assert!(!prompt.contains("Quick mode"));
    }

    #[test]
    fn existing_graph_is_listed_with_instruction() {
        let mut ctx = context("remove the cache");
        ctx.current_graph = ArchitectureGraph {
            nodes: vec![
                node("api", "Order API", NodeType::Backend, Some("Handles orders")),
                node("cache", "Session Cache", NodeType::Cache, None),
            ],
            edges: vec![ArchEdge {
                id: "e1".to_string(),
                source: "api".to_string(),
                target: "cache".to_string(),
                animated: None,
                data: Some(EdgeData {
                    protocol: Some(Protocol::Cache),
                    label: None,
                    latency: None,
                }),
            }],
            metadata: None,
        };
        ctx.operation = EditOperation::Remove;
        let prompt = build_system_prompt(&ctx);
        assert!(prompt.contains("- api \"Order API\" (backend): Handles orders\n"));
        assert!(prompt.contains("- cache \"Session Cache\" (cache)\n"));
        assert!(prompt.contains("- api -> cache [cache]\n"));
        assert!(prompt.contains("## Task (remove)"));
        assert!(prompt.contains("along with every edge touching them"));
    }

    #[test]
    fn preferences_and_quick_mode() {
        let mut ctx = context("a SaaS billing platform");
        ctx.preferences = Some(TechPreferences {
            preferred: vec!["Rust".to_string(), "PostgreSQL".to_string()],
            avoid: vec!["MongoDB".to_string()],
            cloud: Some("AWS".to_string()),
        });
        ctx.quick_mode = true;
        let prompt = build_system_prompt(&ctx);
        assert!(prompt.contains("- Prefer: Rust, PostgreSQL\n"));
        assert!(prompt.contains("- Avoid: MongoDB\n"));
        assert!(prompt.contains("- Cloud: AWS\n"));
        assert!(prompt.contains("Quick mode: keep it compact."));
    }

    #[test]
    fn messages_keep_last_six_turns() {
        let mut ctx = context("now add a queue");
        ctx.history = (0..9)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("turn {i}"))
                } else {
                    ChatMessage::assistant(format!("turn {i}"))
                }
            })
            .collect();
        let messages = build_messages(&ctx);
        assert_eq!(messages.len(), HISTORY_TURNS + 1);
        assert_eq!(messages[0].content, "turn 3");
        let last = messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.content, "now add a queue");
    }
}
