use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use archforge_core::rules::{mode_constraints, INCOMPATIBLE_FRAMEWORKS, RULES};
use archforge_core::{ArchEdge, ArchNode, Complexity, GenerationMode};
use archforge_generate::breaker::CircuitStatus;
use archforge_generate::intent::{detect_architecture_type, detect_complexity, detect_operation};
use archforge_generate::parse::{process_response, MetadataDefaults};
use archforge_generate::prompt::TechPreferences;
use archforge_generate::provider::Transport;
use archforge_generate::{
    ArchitectureDetection, EditOperation, GenerateRequest, Generator, ProviderId,
};

// --- Request types ---

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct GenerateArchitectureRequest {
    /// Natural-language description of the system, or of the change to make to the current graph
    prompt: String,
    /// Explicit model id (e.g. "claude-sonnet-4-5", "gpt-4.1", "ollama/llama3.1"). Pins the provider and disables fallback.
    model: Option<String>,
    /// "default", "startup" or "enterprise". Controls component-count bounds.
    mode: Option<GenerationMode>,
    /// Nodes of the graph being edited. Omit to design from scratch.
    current_nodes: Option<Vec<ArchNode>>,
    /// Edges of the graph being edited
    current_edges: Option<Vec<ArchEdge>>,
    /// Smaller, faster answer: caps output tokens and skips reasoning
    quick_mode: Option<bool>,
    /// Technologies to prefer
    prefer: Option<Vec<String>>,
    /// Technologies to avoid
    avoid: Option<Vec<String>>,
    /// Target cloud (e.g. "AWS")
    cloud: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct DetectArchitectureRequest {
    /// Free-text description to classify
    text: String,
    /// Nodes of an existing graph, used to tell edits from new designs
    existing_nodes: Option<Vec<ArchNode>>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ValidateArchitectureRequest {
    /// Raw model output: JSON, optionally wrapped in a markdown code fence or surrounded by prose
    raw: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ResetProviderRequest {
    /// Provider id: deepseek, openai, groq, anthropic, gemini or ollama
    provider: String,
}

// --- Tool bodies ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Detection {
    #[serde(flatten)]
    architecture: ArchitectureDetection,
    complexity: Complexity,
    operation: EditOperation,
}

fn detect(text: &str, existing_nodes: &[ArchNode]) -> Detection {
    Detection {
        architecture: detect_architecture_type(text),
        complexity: detect_complexity(text),
        operation: detect_operation(text, existing_nodes),
    }
}

fn build_request(req: GenerateArchitectureRequest) -> GenerateRequest {
    let preferences = TechPreferences {
        preferred: req.prefer.unwrap_or_default(),
        avoid: req.avoid.unwrap_or_default(),
        cloud: req.cloud,
    };
    GenerateRequest {
        prompt: req.prompt,
        model: req.model,
        mode: req.mode.unwrap_or_default(),
        current_nodes: req.current_nodes.unwrap_or_default(),
        current_edges: req.current_edges.unwrap_or_default(),
        quick_mode: req.quick_mode.unwrap_or(false),
        preferences: (!preferences.is_empty()).then_some(preferences),
        ..GenerateRequest::default()
    }
}

fn provider_status(generator: &Generator) -> serde_json::Value {
    let breaker = generator.breaker();
    let providers: Vec<serde_json::Value> = generator
        .registry()
        .ids()
        .into_iter()
        .filter_map(|id| generator.registry().get(id))
        .map(|d| {
            let state = breaker.status(d.id);
            let role = if d.id == generator.primary() {
                Some("primary")
            } else if d.id == generator.fallback() {
                Some("fallback")
            } else {
                None
            };
            let transport = match d.transport {
                Transport::OpenAiCompatible => "openai-compatible",
                Transport::Native(_) => "native",
            };
            json!({
                "provider": d.id,
                "role": role,
                "model": d.model,
                "baseUrl": d.base_url,
                "transport": transport,
                "credential": d.has_credential() || d.id.credential_env().is_none(),
                "circuit": state.status.as_str(),
                "failures": state.failures,
                "retryAfterSecs": (state.status == CircuitStatus::Open)
                    .then(|| breaker.retry_after(d.id).as_secs_f64().ceil() as u64),
            })
        })
        .collect();
    json!({ "providers": providers })
}

fn rules_text() -> String {
    let mut out = String::from("## Architecture rules\n");
    out.push_str(RULES);
    out.push_str("\n\n## Modes\n");
    for mode in [
        GenerationMode::Startup,
        GenerationMode::Default,
        GenerationMode::Enterprise,
    ] {
        let c = mode_constraints(mode);
        out.push_str(&format!(
            "- {}: {}-{} components, CDN {}, load balancer {}, observability {}\n",
            mode.as_str(),
            c.min_components,
            c.max_components,
            if c.require_cdn { "required" } else { "optional" },
            if c.require_load_balancer { "required" } else { "optional" },
            if c.require_observability { "required" } else { "optional" },
        ));
    }
    out.push_str("\n## Never combine\n");
    for pair in INCOMPATIBLE_FRAMEWORKS {
        out.push_str(&format!("- {} + {}: {}\n", pair.first, pair.second, pair.reason));
    }
    out
}

fn to_pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("Serialization error: {}", e))
}

// --- Server ---

#[derive(Clone)]
pub struct ArchforgeServer {
    tool_router: ToolRouter<Self>,
    generator: Arc<Generator>,
}

#[tool_router]
impl ArchforgeServer {
    pub fn new(generator: Generator) -> Self {
        Self {
            tool_router: Self::tool_router(),
            generator: Arc::new(generator),
        }
    }

    #[tool(
        description = "Generate an architecture graph from a natural-language description. Calls the configured primary model provider (falling back once to the secondary) or the explicitly requested model, then parses, validates and enriches the answer. Returns {provider, detection, complexity, raw, processed: {parsed, graph?, errors, laidOut, enriched}}. When processed.graph is absent the model output was malformed; processed.errors says why."
    )]
    async fn generate_architecture(
        &self,
        Parameters(req): Parameters<GenerateArchitectureRequest>,
    ) -> Result<CallToolResult, McpError> {
        let request = build_request(req);
        match self.generator.generate_graph(request).await {
            Ok(output) => Ok(CallToolResult::success(vec![Content::text(to_pretty(&output))])),
            Err(e) => {
                tracing::error!(error = %e, "generate_architecture failed");
                Ok(CallToolResult::error(vec![Content::text(format!(
                    "Generation failed: {}",
                    e
                ))]))
            }
        }
    }

    #[tool(
        description = "Classify a description without calling any model: architecture type (web-app, microservices, ai-pipeline, ...), confidence, matched keywords, suggested follow-up questions, complexity tier and edit operation."
    )]
    fn detect_architecture(
        &self,
        Parameters(req): Parameters<DetectArchitectureRequest>,
    ) -> Result<CallToolResult, McpError> {
        let nodes = req.existing_nodes.unwrap_or_default();
        let detection = detect(&req.text, &nodes);
        Ok(CallToolResult::success(vec![Content::text(to_pretty(&detection))]))
    }

    #[tool(
        description = "Parse raw model output into an architecture graph: strips code fences, extracts the JSON object, checks structure and the strict schema (closed enums, 1-50 nodes, unique ids, edges between existing nodes), lays out missing positions and normalizes technology names. Returns the processed result; reported as an error when the graph is rejected."
    )]
    fn validate_architecture(
        &self,
        Parameters(req): Parameters<ValidateArchitectureRequest>,
    ) -> Result<CallToolResult, McpError> {
        let processed = process_response(&req.raw, &MetadataDefaults::default());
        let text = to_pretty(&processed);
        if processed.is_valid() {
            Ok(CallToolResult::success(vec![Content::text(text)]))
        } else {
            Ok(CallToolResult::error(vec![Content::text(text)]))
        }
    }

    #[tool(
        description = "List configured model providers with their model, transport, whether a credential is present, and circuit-breaker state (closed, open, half-open; failures; seconds until an open circuit may be probed)."
    )]
    fn provider_status(&self) -> Result<CallToolResult, McpError> {
        let status = provider_status(&self.generator);
        Ok(CallToolResult::success(vec![Content::text(to_pretty(&status))]))
    }

    #[tool(description = "Close a provider's circuit breaker and clear its failure count.")]
    fn reset_provider(
        &self,
        Parameters(req): Parameters<ResetProviderRequest>,
    ) -> Result<CallToolResult, McpError> {
        match req.provider.parse::<ProviderId>() {
            Ok(id) => {
                self.generator.breaker().reset(id);
                Ok(CallToolResult::success(vec![Content::text(format!(
                    "Circuit for {} reset to closed.",
                    id
                ))]))
            }
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }

    #[tool(
        description = "Get the architecture rules, per-mode component bounds and incompatible technology pairs that every generation prompt embeds."
    )]
    fn get_rules(&self) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(rules_text())]))
    }

    #[tool(description = "Get the JSON schema of the architecture graph wire format.")]
    fn get_schema(&self) -> Result<CallToolResult, McpError> {
        let schema = archforge_core::schema::architecture_json_schema();
        Ok(CallToolResult::success(vec![Content::text(to_pretty(&schema))]))
    }
}

#[tool_handler]
impl ServerHandler for ArchforgeServer {
    fn get_info(&self) -> ServerInfo {
        let instructions = format!("{}\n\n## Architecture Rules\n{}", INSTRUCTIONS, RULES);
        ServerInfo {
            instructions: Some(instructions.into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

const INSTRUCTIONS: &str = r#"archforge turns natural-language system descriptions into architecture diagrams: nodes (components) and edges (connections) in a ReactFlow-compatible JSON format.

## Tools
- generate_architecture: describe a system, get a validated graph. Pass current_nodes/current_edges to edit an existing graph ("add a cache", "remove the queue").
- detect_architecture: offline classification of a description. Useful to pick follow-up questions before generating.
- validate_architecture: check and normalize graph JSON you wrote yourself or got from elsewhere.
- provider_status / reset_provider: inspect and reset the per-provider circuit breakers.
- get_rules / get_schema: the rules and wire format every graph must follow.

## Providers
Credentials come from DEEPSEEK_API_KEY, OPENAI_API_KEY, GROQ_API_KEY, ANTHROPIC_API_KEY and GEMINI_API_KEY. Provider choice, retry and breaker settings live in ~/.archforge/settings.json."#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the protocol
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = archforge_core::read_settings();
    let generator = Generator::from_settings(&settings)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        primary = %generator.primary(),
        fallback = %generator.fallback(),
        "archforge-mcp starting"
    );

    let service = ArchforgeServer::new(generator)
        .serve(rmcp::transport::io::stdio())
        .await
        .inspect_err(|e| tracing::error!(error = %e, "MCP server error"))?;
    service.waiting().await?;
    Ok(())
}
