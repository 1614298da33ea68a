pub mod catalog;
pub mod rules;
pub mod schema;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

// --- Types (the canvas wire format) ---

/// Component kind of a node. Shared by `type` and `data.serviceType`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, schemars::JsonSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    Gateway,
    Service,
    Frontend,
    Backend,
    Database,
    Queue,
    Ai,
    Auth,
    Payment,
    Automation,
    Messaging,
    Search,
    Monitoring,
    Cicd,
    Security,
    VectorDb,
    AiModel,
    Cache,
    Storage,
    Function,
    Client,
    #[serde(rename = "loadbalancer")]
    LoadBalancer,
}

impl NodeType {
    pub const ALL: [NodeType; 22] = [
        NodeType::Gateway,
        NodeType::Service,
        NodeType::Frontend,
        NodeType::Backend,
        NodeType::Database,
        NodeType::Queue,
        NodeType::Ai,
        NodeType::Auth,
        NodeType::Payment,
        NodeType::Automation,
        NodeType::Messaging,
        NodeType::Search,
        NodeType::Monitoring,
        NodeType::Cicd,
        NodeType::Security,
        NodeType::VectorDb,
        NodeType::AiModel,
        NodeType::Cache,
        NodeType::Storage,
        NodeType::Function,
        NodeType::Client,
        NodeType::LoadBalancer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Gateway => "gateway",
            NodeType::Service => "service",
            NodeType::Frontend => "frontend",
            NodeType::Backend => "backend",
            NodeType::Database => "database",
            NodeType::Queue => "queue",
            NodeType::Ai => "ai",
            NodeType::Auth => "auth",
            NodeType::Payment => "payment",
            NodeType::Automation => "automation",
            NodeType::Messaging => "messaging",
            NodeType::Search => "search",
            NodeType::Monitoring => "monitoring",
            NodeType::Cicd => "cicd",
            NodeType::Security => "security",
            NodeType::VectorDb => "vector-db",
            NodeType::AiModel => "ai-model",
            NodeType::Cache => "cache",
            NodeType::Storage => "storage",
            NodeType::Function => "function",
            NodeType::Client => "client",
            NodeType::LoadBalancer => "loadbalancer",
        }
    }
}

/// Transport an edge represents.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    Graphql,
    Websocket,
    Queue,
    Stream,
    Database,
    Cache,
    Oauth,
    Grpc,
}

impl Protocol {
    pub const ALL: [Protocol; 10] = [
        Protocol::Http,
        Protocol::Https,
        Protocol::Graphql,
        Protocol::Websocket,
        Protocol::Queue,
        Protocol::Stream,
        Protocol::Database,
        Protocol::Cache,
        Protocol::Oauth,
        Protocol::Grpc,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Graphql => "graphql",
            Protocol::Websocket => "websocket",
            Protocol::Queue => "queue",
            Protocol::Stream => "stream",
            Protocol::Database => "database",
            Protocol::Cache => "cache",
            Protocol::Oauth => "oauth",
            Protocol::Grpc => "grpc",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        }
    }
}

/// Generation mode chosen by the user. Drives the component-count bounds in
/// [`rules::mode_constraints`].
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    #[default]
    Default,
    Startup,
    Enterprise,
}

impl GenerationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationMode::Default => "default",
            GenerationMode::Startup => "startup",
            GenerationMode::Enterprise => "enterprise",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, schemars::JsonSchema)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    pub label: String,
    /// Canonical technology id once enriched, free text before that.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tech: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tech_label: Option<String>,
    /// Icon reference of the matched catalog entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub service_type: NodeType,
    /// Estimated monthly cost in USD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<f64>,
}

/// A node in the graph. Matches ReactFlow's Node structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArchNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub position: Position,
    pub data: NodeData,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EdgeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Expected latency in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<f64>,
}

/// An edge in the graph. Matches ReactFlow's Edge structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArchEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EdgeData>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GraphMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// The generation target handed to the canvas.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArchitectureGraph {
    pub nodes: Vec<ArchNode>,
    pub edges: Vec<ArchEdge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<GraphMetadata>,
}

impl ArchitectureGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&ArchNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Sum of all node cost estimates, `None` when no node carries one.
    pub fn total_cost(&self) -> Option<f64> {
        let costs: Vec<f64> = self
            .nodes
            .iter()
            .filter_map(|n| n.data.cost_estimate)
            .collect();
        if costs.is_empty() {
            None
        } else {
            Some(costs.iter().sum())
        }
    }
}

// --- Errors ---

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("settings I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),
}

// --- Settings ---

/// Backoff knobs as stored on disk. Converted into a retry policy by the
/// generate crate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    pub half_open_max_calls: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout_secs: 30,
            half_open_max_calls: 2,
        }
    }
}

/// Per-provider override of the built-in endpoint table.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Credentials never live here; they come from the environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub primary_provider: String,
    pub fallback_provider: String,
    pub retry: RetrySettings,
    pub breaker: BreakerSettings,
    pub request_timeout_secs: u64,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub providers: HashMap<String, ProviderOverride>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            primary_provider: "deepseek".to_string(),
            fallback_provider: "openai".to_string(),
            retry: RetrySettings::default(),
            breaker: BreakerSettings::default(),
            request_timeout_secs: 120,
            providers: HashMap::new(),
        }
    }
}

/// Resolve the archforge home directory (`$ARCHFORGE_HOME` or `~/.archforge/`).
pub fn home_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("ARCHFORGE_HOME") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".archforge")
}

pub fn settings_path() -> PathBuf {
    home_dir().join("settings.json")
}

/// Read settings from disk. A missing or broken file falls back to defaults.
pub fn read_settings() -> Settings {
    let path = settings_path();
    if !path.exists() {
        return Settings::default();
    }
    match fs::read_to_string(&path)
        .map_err(|source| CoreError::Io {
            path: path.clone(),
            source,
        })
        .and_then(|raw| serde_json::from_str(&raw).map_err(CoreError::from))
    {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable settings file");
            Settings::default()
        }
    }
}

/// Write settings atomically (temp file + rename).
pub fn write_settings(settings: &Settings) -> Result<(), CoreError> {
    let dir = home_dir();
    fs::create_dir_all(&dir).map_err(|source| CoreError::Io {
        path: dir.clone(),
        source,
    })?;
    let json = serde_json::to_string_pretty(settings)?;
    let tmp = dir.join(".settings.json.tmp");
    let path = settings_path();
    fs::write(&tmp, json).map_err(|source| CoreError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, &path).map_err(|source| CoreError::Io { path, source })
}
