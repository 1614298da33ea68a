//! Keyword-table intent detection.
//!
//! Every decision here is a table lookup: adding an archetype or a keyword is
//! a data change, not a code change.

use serde::{Deserialize, Serialize};

use archforge_core::{ArchNode, Complexity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchitectureType {
    WebApp,
    MobileApp,
    Microservices,
    AiPipeline,
    DataPipeline,
    ECommerce,
    RealTime,
    Iot,
    Serverless,
    Saas,
    Blockchain,
    Mixed,
    Unknown,
}

impl ArchitectureType {
    pub fn as_str(self) -> &'static str {
        match self {
            ArchitectureType::WebApp => "web-app",
            ArchitectureType::MobileApp => "mobile-app",
            ArchitectureType::Microservices => "microservices",
            ArchitectureType::AiPipeline => "ai-pipeline",
            ArchitectureType::DataPipeline => "data-pipeline",
            ArchitectureType::ECommerce => "e-commerce",
            ArchitectureType::RealTime => "real-time",
            ArchitectureType::Iot => "iot",
            ArchitectureType::Serverless => "serverless",
            ArchitectureType::Saas => "saas",
            ArchitectureType::Blockchain => "blockchain",
            ArchitectureType::Mixed => "mixed",
            ArchitectureType::Unknown => "unknown",
        }
    }

    /// Human-readable name used in prompts.
    pub fn display_name(self) -> &'static str {
        match self {
            ArchitectureType::WebApp => "Web application",
            ArchitectureType::MobileApp => "Mobile application",
            ArchitectureType::Microservices => "Microservices platform",
            ArchitectureType::AiPipeline => "AI / LLM pipeline",
            ArchitectureType::DataPipeline => "Data pipeline",
            ArchitectureType::ECommerce => "E-commerce platform",
            ArchitectureType::RealTime => "Real-time system",
            ArchitectureType::Iot => "IoT platform",
            ArchitectureType::Serverless => "Serverless application",
            ArchitectureType::Saas => "Multi-tenant SaaS",
            ArchitectureType::Blockchain => "Blockchain / Web3 application",
            ArchitectureType::Mixed => "Mixed architecture",
            ArchitectureType::Unknown => "Unspecified architecture",
        }
    }

    pub fn suggested_questions(self) -> &'static [&'static str] {
        match self {
            ArchitectureType::WebApp => &[
                "Is the frontend server-rendered or a single-page app?",
                "Do users need to sign in?",
                "What traffic do you expect at launch?",
            ],
            ArchitectureType::MobileApp => &[
                "iOS, Android or both?",
                "Does the app need to work offline?",
                "Do you need push notifications?",
            ],
            ArchitectureType::Microservices => &[
                "How do services communicate: synchronous calls, events or both?",
                "Does each service own its database?",
                "Where do you deploy: Kubernetes, VMs or a managed platform?",
            ],
            ArchitectureType::AiPipeline => &[
                "Which models or providers do you plan to use?",
                "Do you need retrieval over your own documents?",
                "Is inference synchronous or batch?",
            ],
            ArchitectureType::DataPipeline => &[
                "Is ingestion batch, streaming or both?",
                "Where does the processed data end up?",
                "What data volume per day?",
            ],
            ArchitectureType::ECommerce => &[
                "Which payment providers do you need?",
                "Do you manage inventory yourself?",
                "Do you need search over the catalog?",
            ],
            ArchitectureType::RealTime => &[
                "What latency do clients need?",
                "How many concurrent connections?",
                "Must messages be delivered in order?",
            ],
            ArchitectureType::Iot => &[
                "How many devices and how often do they report?",
                "Do devices need commands sent back to them?",
                "Is any processing done at the edge?",
            ],
            ArchitectureType::Serverless => &[
                "Which cloud provider?",
                "Are there long-running jobs that exceed function limits?",
            ],
            ArchitectureType::Saas => &[
                "Is tenant data isolated per database or per row?",
                "Do you need per-tenant billing?",
                "Do tenants need single sign-on?",
            ],
            ArchitectureType::Blockchain => &[
                "Which chain or network?",
                "What lives on-chain and what stays off-chain?",
            ],
            ArchitectureType::Mixed => &[
                "Which part of the system matters most to you?",
                "Should the parts share infrastructure or stay separate?",
            ],
            ArchitectureType::Unknown => &[
                "What does the system do for its users?",
                "Who are the users: customers, internal staff or other systems?",
                "Are there technologies you already use or want to use?",
            ],
        }
    }
}

const ARCHETYPE_PATTERNS: &[(ArchitectureType, &[&str])] = &[
    (
        ArchitectureType::WebApp,
        &[
            "web app",
            "web application",
            "website",
            "web site",
            "dashboard",
            "landing page",
            "single page",
            "frontend",
            "react",
            "vue",
            "angular",
            "next.js",
            "nextjs",
            "svelte",
            "browser",
        ],
    ),
    (
        ArchitectureType::MobileApp,
        &[
            "mobile app",
            "mobile application",
            "ios",
            "android",
            "react native",
            "flutter",
            "swiftui",
            "kotlin",
            "push notification",
            "app store",
        ],
    ),
    (
        ArchitectureType::Microservices,
        &[
            "microservice",
            "micro-service",
            "service mesh",
            "api gateway",
            "kubernetes",
            "k8s",
            "istio",
            "docker",
            "event-driven",
            "event driven",
            "grpc",
        ],
    ),
    (
        ArchitectureType::AiPipeline,
        &[
            "machine learning",
            "artificial intelligence",
            "ai agent",
            "ai pipeline",
            "ai-powered",
            "llm",
            "gpt",
            "chatbot",
            "embedding",
            "vector database",
            "retrieval augmented",
            "rag pipeline",
            "inference",
            "openai",
            "langchain",
        ],
    ),
    (
        ArchitectureType::DataPipeline,
        &[
            "data pipeline",
            "data warehouse",
            "data lake",
            "etl",
            "elt",
            "ingestion",
            "batch processing",
            "analytics",
            "spark",
            "airflow",
            "snowflake",
            "bigquery",
            "dbt",
        ],
    ),
    (
        ArchitectureType::ECommerce,
        &[
            "e-commerce",
            "ecommerce",
            "online store",
            "online shop",
            "shopping cart",
            "checkout",
            "marketplace",
            "storefront",
            "inventory",
            "shopify",
            "product catalog",
        ],
    ),
    (
        ArchitectureType::RealTime,
        &[
            "real-time",
            "realtime",
            "real time",
            "websocket",
            "live updates",
            "chat app",
            "multiplayer",
            "streaming",
            "low latency",
            "collaborative editing",
        ],
    ),
    (
        ArchitectureType::Iot,
        &[
            "iot",
            "internet of things",
            "sensor",
            "device fleet",
            "telemetry",
            "mqtt",
            "edge device",
            "smart home",
            "firmware",
        ],
    ),
    (
        ArchitectureType::Serverless,
        &[
            "serverless",
            "lambda",
            "cloud function",
            "cloud functions",
            "azure functions",
            "faas",
            "edge function",
            "vercel",
            "netlify",
        ],
    ),
    (
        ArchitectureType::Saas,
        &[
            "saas",
            "multi-tenant",
            "multi tenant",
            "multitenant",
            "subscription",
            "tenant",
            "b2b platform",
            "billing",
            "stripe",
        ],
    ),
    (
        ArchitectureType::Blockchain,
        &[
            "blockchain",
            "web3",
            "smart contract",
            "ethereum",
            "solidity",
            "crypto wallet",
            "nft",
            "defi",
            "solana",
        ],
    ),
];

const PHRASE_POINTS: u32 = 2;
const WORD_POINTS: u32 = 1;
/// Score at which confidence saturates at 1.0.
const CONFIDENCE_SCALE: f64 = 3.0;
const MIXED_MIN_SCORE: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchitectureDetection {
    #[serde(rename = "type")]
    pub architecture_type: ArchitectureType,
    pub confidence: f64,
    pub matched_keywords: Vec<String>,
    pub suggested_questions: Vec<String>,
}

fn pattern_points(pattern: &str) -> u32 {
    if pattern.contains(char::is_whitespace) {
        PHRASE_POINTS
    } else {
        WORD_POINTS
    }
}

pub fn detect_architecture_type(text: &str) -> ArchitectureDetection {
    let lower = text.to_lowercase();

    let scored: Vec<(ArchitectureType, u32, Vec<&str>)> = ARCHETYPE_PATTERNS
        .iter()
        .map(|(arch, patterns)| {
            let hits: Vec<&str> = patterns
                .iter()
                .copied()
                .filter(|p| lower.contains(p))
                .collect();
            let score = hits.iter().map(|p| pattern_points(p)).sum();
            (*arch, score, hits)
        })
        .collect();

    let max = scored.iter().map(|(_, s, _)| *s).max().unwrap_or(0);
    if max == 0 {
        return ArchitectureDetection {
            architecture_type: ArchitectureType::Unknown,
            confidence: 0.0,
            matched_keywords: Vec::new(),
            suggested_questions: questions(ArchitectureType::Unknown),
        };
    }

    let leaders: Vec<&(ArchitectureType, u32, Vec<&str>)> =
        scored.iter().filter(|(_, s, _)| *s == max).collect();
    let architecture_type = if leaders.len() >= 2 && max >= MIXED_MIN_SCORE {
        ArchitectureType::Mixed
    } else {
        leaders[0].0
    };
    let matched_keywords = if architecture_type == ArchitectureType::Mixed {
        leaders
            .iter()
            .flat_map(|(_, _, hits)| hits.iter().map(|h| h.to_string()))
            .collect()
    } else {
        leaders[0].2.iter().map(|h| h.to_string()).collect()
    };

    let confidence = (f64::from(max) / CONFIDENCE_SCALE).min(1.0);
    tracing::debug!(
        architecture = architecture_type.as_str(),
        score = max,
        confidence,
        "architecture detected"
    );

    ArchitectureDetection {
        architecture_type,
        confidence,
        matched_keywords,
        suggested_questions: questions(architecture_type),
    }
}

fn questions(arch: ArchitectureType) -> Vec<String> {
    arch.suggested_questions()
        .iter()
        .map(|q| q.to_string())
        .collect()
}

/// Scanned in order; the first tier with a hit wins.
const COMPLEXITY_TIERS: &[(Complexity, &[&str])] = &[
    (
        Complexity::Simple,
        &[
            "simple",
            "basic",
            "minimal",
            "mvp",
            "prototype",
            "small",
            "personal",
            "hobby",
            "side project",
        ],
    ),
    (
        Complexity::Medium,
        &[
            "moderate",
            "medium",
            "standard",
            "typical",
            "growing",
            "production",
        ],
    ),
    (
        Complexity::Complex,
        &[
            "complex",
            "enterprise",
            "large-scale",
            "large scale",
            "distributed",
            "multi-region",
            "high availability",
            "millions",
            "global",
        ],
    ),
];

const SHORT_INPUT_CHARS: usize = 20;

pub fn detect_complexity(text: &str) -> Complexity {
    let lower = text.to_lowercase();
    for (tier, keywords) in COMPLEXITY_TIERS {
        if keywords.iter().any(|k| lower.contains(k)) {
            return *tier;
        }
    }
    if text.trim().chars().count() < SHORT_INPUT_CHARS {
        Complexity::Simple
    } else {
        Complexity::Medium
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditOperation {
    Create,
    Modify,
    Extend,
    Simplify,
    Remove,
    Optimize,
}

impl EditOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            EditOperation::Create => "create",
            EditOperation::Modify => "modify",
            EditOperation::Extend => "extend",
            EditOperation::Simplify => "simplify",
            EditOperation::Remove => "remove",
            EditOperation::Optimize => "optimize",
        }
    }
}

const OPERATION_GROUPS: &[(EditOperation, &[&str])] = &[
    (
        EditOperation::Simplify,
        &[
            "simplify",
            "simpler",
            "streamline",
            "consolidate",
            "merge",
            "fewer",
            "reduce complexity",
        ],
    ),
    (
        EditOperation::Remove,
        &["remove", "delete", "drop", "get rid of", "eliminate", "take out"],
    ),
    (
        EditOperation::Extend,
        &["add", "extend", "include", "integrate", "expand", "introduce", "attach"],
    ),
    (
        EditOperation::Optimize,
        &[
            "optimize",
            "optimise",
            "improve",
            "faster",
            "performance",
            "cheaper",
            "reduce cost",
            "scale up",
        ],
    ),
    (
        EditOperation::Modify,
        &["change", "replace", "swap", "switch", "update", "modify", "rename", "move"],
    ),
];

/// `Create` whenever there is nothing to edit yet.
pub fn detect_operation(text: &str, existing_nodes: &[ArchNode]) -> EditOperation {
    if existing_nodes.is_empty() {
        return EditOperation::Create;
    }
    let lower = text.to_lowercase();
    OPERATION_GROUPS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(op, _)| *op)
        .unwrap_or(EditOperation::Modify)
}

#[cfg(test)]
mod tests {
    use super::*;
    use archforge_core::{NodeData, NodeType, Position};

    fn node(id: &str) -> ArchNode {
        ArchNode {
            id: id.to_string(),
            node_type: NodeType::Service,
            position: Position::default(),
            data: NodeData {
                label: id.to_string(),
                tech: None,
                tech_label: None,
                logo: None,
                description: None,
                service_type: NodeType::Service,
                cost_estimate: None,
            },
        }
    }

    #[test]
    fn detects_web_app() {
        let d = detect_architecture_type("Build a web application with React");
        assert_eq!(d.architecture_type, ArchitectureType::WebApp);
        assert!(d.confidence > 0.0);
        assert!(d.matched_keywords.contains(&"web application".to_string()));
        assert!(d.matched_keywords.contains(&"react".to_string()));
        assert!(!d.suggested_questions.is_empty());
    }

    #[test]
    fn gibberish_is_unknown() {
        let d = detect_architecture_type("xyz");
        assert_eq!(d.architecture_type, ArchitectureType::Unknown);
        assert_eq!(d.confidence, 0.0);
        assert!(d.matched_keywords.is_empty());
        assert_eq!(d.suggested_questions.len(), 3);
    }

    #[test]
    fn confidence_scales_and_saturates() {
        // one single-word hit
        let d = detect_architecture_type("something with solidity");
        assert_eq!(d.architecture_type, ArchitectureType::Blockchain);
        assert!((d.confidence - 1.0 / 3.0).abs() < 1e-9);

        let d = detect_architecture_type("an ethereum smart contract with solidity and nft");
        assert_eq!(d.confidence, 1.0);
    }

    #[test]
    fn tie_at_two_or_more_is_mixed() {
        let d = detect_architecture_type("a mobile app and a data pipeline");
        assert_eq!(d.architecture_type, ArchitectureType::Mixed);
        assert!(d.matched_keywords.contains(&"mobile app".to_string()));
        assert!(d.matched_keywords.contains(&"data pipeline".to_string()));
    }

    #[test]
    fn tie_at_one_is_not_mixed() {
        let d = detect_architecture_type("flutter and mqtt");
        assert_eq!(d.architecture_type, ArchitectureType::MobileApp);
        assert_eq!(d.matched_keywords, vec!["flutter".to_string()]);
    }

    #[test]
    fn serializes_kebab_case() {
        let json = serde_json::to_value(detect_architecture_type("an e-commerce checkout")).unwrap();
        assert_eq!(json["type"], "e-commerce");
        assert!(json["matchedKeywords"].is_array());
    }

    #[test]
    fn complexity_tiers_in_order() {
        assert_eq!(detect_complexity("a simple enterprise tool"), Complexity::Simple);
        assert_eq!(
            detect_complexity("production grade distributed system"),
            Complexity::Medium
        );
        assert_eq!(
            detect_complexity("a global platform serving millions"),
            Complexity::Complex
        );
    }

    #[test]
    fn complexity_falls_back_to_length() {
        assert_eq!(detect_complexity("todo app"), Complexity::Simple);
        assert_eq!(
            detect_complexity("an application for tracking team workouts"),
            Complexity::Medium
        );
    }

    #[test]
    fn empty_graph_always_creates() {
        assert_eq!(detect_operation("remove the cache", &[]), EditOperation::Create);
    }

    #[test]
    fn operation_groups_scan_in_order() {
        let nodes = [node("api")];
        assert_eq!(detect_operation("remove the cache", &nodes), EditOperation::Remove);
        assert_eq!(detect_operation("Add a Redis cache", &nodes), EditOperation::Extend);
        assert_eq!(
            detect_operation("simplify it and remove the queue", &nodes),
            EditOperation::Simplify
        );
        assert_eq!(
            detect_operation("make it faster", &nodes),
            EditOperation::Optimize
        );
        assert_eq!(
            detect_operation("replace postgres with mysql", &nodes),
            EditOperation::Modify
        );
        assert_eq!(detect_operation("hmm", &nodes), EditOperation::Modify);
    }
}
