use crate::{ArchNode, NodeType};

/// A canonical technology the canvas knows how to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TechItem {
    pub id: &'static str,
    pub label: &'static str,
    /// Iconify reference, e.g. `logos:react`
    pub icon: &'static str,
    pub category: &'static str,
    pub default_type: NodeType,
}

const fn tech(
    id: &'static str,
    label: &'static str,
    icon: &'static str,
    category: &'static str,
    default_type: NodeType,
) -> TechItem {
    TechItem {
        id,
        label,
        icon,
        category,
        default_type,
    }
}

pub const TECHNOLOGIES: &[TechItem] = &[
    // frontend
    tech("react", "React", "logos:react", "frontend", NodeType::Frontend),
    tech("nextjs", "Next.js", "logos:nextjs-icon", "frontend", NodeType::Frontend),
    tech("vue", "Vue", "logos:vue", "frontend", NodeType::Frontend),
    tech("nuxt", "Nuxt", "logos:nuxt-icon", "frontend", NodeType::Frontend),
    tech("angular", "Angular", "logos:angular-icon", "frontend", NodeType::Frontend),
    tech("svelte", "Svelte", "logos:svelte-icon", "frontend", NodeType::Frontend),
    tech("react-native", "React Native", "logos:react", "mobile", NodeType::Client),
    tech("flutter", "Flutter", "logos:flutter", "mobile", NodeType::Client),
    tech("swift", "Swift", "logos:swift", "mobile", NodeType::Client),
    tech("kotlin", "Kotlin", "logos:kotlin-icon", "mobile", NodeType::Client),
    // backend
    tech("nodejs", "Node.js", "logos:nodejs-icon", "backend", NodeType::Backend),
    tech("express", "Express", "logos:express", "backend", NodeType::Backend),
    tech("nestjs", "NestJS", "logos:nestjs", "backend", NodeType::Backend),
    tech("fastapi", "FastAPI", "logos:fastapi-icon", "backend", NodeType::Backend),
    tech("django", "Django", "logos:django-icon", "backend", NodeType::Backend),
    tech("flask", "Flask", "logos:flask", "backend", NodeType::Backend),
    tech("spring-boot", "Spring Boot", "logos:spring-icon", "backend", NodeType::Backend),
    tech("rails", "Ruby on Rails", "logos:rails", "backend", NodeType::Backend),
    tech("go", "Go", "logos:go", "backend", NodeType::Backend),
    tech("rust", "Rust", "logos:rust", "backend", NodeType::Backend),
    tech("dotnet", ".NET", "logos:dotnet", "backend", NodeType::Backend),
    tech("graphql", "GraphQL", "logos:graphql", "api", NodeType::Gateway),
    // gateways and edge
    tech("kong", "Kong", "logos:kong-icon", "gateway", NodeType::Gateway),
    tech("api-gateway", "AWS API Gateway", "logos:aws-api-gateway", "gateway", NodeType::Gateway),
    tech("nginx", "NGINX", "logos:nginx", "gateway", NodeType::LoadBalancer),
    tech("cloudflare", "Cloudflare", "logos:cloudflare-icon", "cdn", NodeType::Gateway),
    tech("cloudfront", "CloudFront", "logos:aws-cloudfront", "cdn", NodeType::Gateway),
    tech("aws-elb", "AWS Elastic Load Balancer", "logos:aws-elb", "gateway", NodeType::LoadBalancer),
    // data
    tech("postgresql", "PostgreSQL", "logos:postgresql", "database", NodeType::Database),
    tech("mysql", "MySQL", "logos:mysql-icon", "database", NodeType::Database),
    tech("mongodb", "MongoDB", "logos:mongodb-icon", "database", NodeType::Database),
    tech("dynamodb", "DynamoDB", "logos:aws-dynamodb", "database", NodeType::Database),
    tech("firestore", "Firestore", "logos:firebase", "database", NodeType::Database),
    tech("supabase", "Supabase", "logos:supabase-icon", "database", NodeType::Database),
    tech("cassandra", "Cassandra", "logos:cassandra", "database", NodeType::Database),
    tech("clickhouse", "ClickHouse", "logos:clickhouse", "database", NodeType::Database),
    tech("redis", "Redis", "logos:redis", "cache", NodeType::Cache),
    tech("memcached", "Memcached", "logos:memcached", "cache", NodeType::Cache),
    tech("elasticsearch", "Elasticsearch", "logos:elasticsearch", "search", NodeType::Search),
    tech("algolia", "Algolia", "logos:algolia", "search", NodeType::Search),
    tech("s3", "Amazon S3", "logos:aws-s3", "storage", NodeType::Storage),
    tech("gcs", "Google Cloud Storage", "logos:google-cloud", "storage", NodeType::Storage),
    // messaging
    tech("kafka", "Apache Kafka", "logos:kafka-icon", "queue", NodeType::Queue),
    tech("rabbitmq", "RabbitMQ", "logos:rabbitmq-icon", "queue", NodeType::Queue),
    tech("sqs", "Amazon SQS", "logos:aws-sqs", "queue", NodeType::Queue),
    tech("nats", "NATS", "logos:nats-icon", "queue", NodeType::Queue),
    tech("twilio", "Twilio", "logos:twilio-icon", "messaging", NodeType::Messaging),
    tech("sendgrid", "SendGrid", "logos:sendgrid-icon", "messaging", NodeType::Messaging),
    // ai
    tech("openai", "OpenAI", "logos:openai-icon", "ai", NodeType::AiModel),
    tech("anthropic", "Anthropic Claude", "logos:anthropic-icon", "ai", NodeType::AiModel),
    tech("langchain", "LangChain", "logos:langchain", "ai", NodeType::Ai),
    tech("pinecone", "Pinecone", "logos:pinecone", "vector-db", NodeType::VectorDb),
    tech("pgvector", "pgvector", "logos:postgresql", "vector-db", NodeType::VectorDb),
    tech("weaviate", "Weaviate", "logos:weaviate", "vector-db", NodeType::VectorDb),
    tech("huggingface", "Hugging Face", "logos:hugging-face-icon", "ai", NodeType::AiModel),
    // platform
    tech("auth0", "Auth0", "logos:auth0-icon", "auth", NodeType::Auth),
    tech("clerk", "Clerk", "logos:clerk-icon", "auth", NodeType::Auth),
    tech("keycloak", "Keycloak", "logos:keycloak", "auth", NodeType::Auth),
    tech("stripe", "Stripe", "logos:stripe", "payment", NodeType::Payment),
    tech("aws-lambda", "AWS Lambda", "logos:aws-lambda", "compute", NodeType::Function),
    tech("cloudflare-workers", "Cloudflare Workers", "logos:cloudflare-workers-icon", "compute", NodeType::Function),
    tech("docker", "Docker", "logos:docker-icon", "infra", NodeType::Service),
    tech("kubernetes", "Kubernetes", "logos:kubernetes", "infra", NodeType::Service),
    tech("prometheus", "Prometheus", "logos:prometheus", "monitoring", NodeType::Monitoring),
    tech("grafana", "Grafana", "logos:grafana", "monitoring", NodeType::Monitoring),
    tech("datadog", "Datadog", "logos:datadog", "monitoring", NodeType::Monitoring),
    tech("github-actions", "GitHub Actions", "logos:github-actions", "cicd", NodeType::Cicd),
    tech("zapier", "Zapier", "logos:zapier-icon", "automation", NodeType::Automation),
    tech("n8n", "n8n", "logos:n8n", "automation", NodeType::Automation),
    tech("vault", "HashiCorp Vault", "logos:vault-icon", "security", NodeType::Security),
];

/// Free-text spellings the model tends to emit, mapped to catalog ids.
const ALIASES: &[(&str, &str)] = &[
    ("postgres", "postgresql"),
    ("pg", "postgresql"),
    ("psql", "postgresql"),
    ("mongo", "mongodb"),
    ("reactjs", "react"),
    ("react.js", "react"),
    ("next", "nextjs"),
    ("next.js", "nextjs"),
    ("vuejs", "vue"),
    ("vue.js", "vue"),
    ("node", "nodejs"),
    ("node.js", "nodejs"),
    ("expressjs", "express"),
    ("express.js", "express"),
    ("golang", "go"),
    ("spring", "spring-boot"),
    ("ruby on rails", "rails"),
    ("k8s", "kubernetes"),
    ("aws s3", "s3"),
    ("elastic", "elasticsearch"),
    ("opensearch", "elasticsearch"),
    ("gpt", "openai"),
    ("gpt-4", "openai"),
    ("chatgpt", "openai"),
    ("claude", "anthropic"),
    ("rabbit", "rabbitmq"),
    ("lambda", "aws-lambda"),
    ("elb", "aws-elb"),
    ("alb", "aws-elb"),
    ("gh actions", "github-actions"),
    ("firebase", "firestore"),
];

/// Containment matches on keys shorter than this are too noisy ("go" is in
/// "mongodb").
const MIN_CONTAINMENT_LEN: usize = 3;

/// Role words that name a kind of component, not a product. They never match
/// as a fragment of a longer catalog key ("cache" is in "memcached").
const GENERIC_ROLE_WORDS: &[&str] = &[
    "api",
    "db",
    "server",
    "web server",
    "app",
    "web app",
    "worker",
    "load balancer",
    "object storage",
    "message queue",
    "vector db",
    "ai model",
];

fn is_generic_role(needle: &str) -> bool {
    GENERIC_ROLE_WORDS.contains(&needle)
        || NodeType::ALL
            .iter()
            .any(|t| t.as_str() == needle || t.as_str().replace('-', " ") == needle)
}

pub fn by_id(id: &str) -> Option<&'static TechItem> {
    TECHNOLOGIES.iter().find(|t| t.id == id)
}

/// Normalize free text to a catalog entry: exact id, alias, exact label, then
/// containment in either direction (longest key wins). Generic role names
/// such as "Cache" or "API" only match exactly.
pub fn find_technology(name: &str) -> Option<&'static TechItem> {
    let needle = name.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    if let Some(t) = by_id(&needle) {
        return Some(t);
    }

    if let Some((_, id)) = ALIASES.iter().find(|(alias, _)| *alias == needle) {
        return by_id(id);
    }

    if let Some(t) = TECHNOLOGIES
        .iter()
        .find(|t| t.label.to_lowercase() == needle)
    {
        return Some(t);
    }

    let fragment_ok = !is_generic_role(&needle);
    let mut best: Option<(&'static TechItem, usize)> = None;
    for t in TECHNOLOGIES {
        for key in [t.id.to_string(), t.label.to_lowercase()] {
            if key.len() < MIN_CONTAINMENT_LEN || needle.len() < MIN_CONTAINMENT_LEN {
                continue;
            }
            let longer = best.map_or(true, |(_, len)| key.len() > len);
            if longer && (needle.contains(&key) || (fragment_ok && key.contains(&needle))) {
                best = Some((t, key.len()));
            }
        }
    }
    best.map(|(t, _)| t)
}

/// Stamp canonical `tech`, `techLabel` and `logo` onto nodes whose technology
/// (or, failing that, label) matches the catalog. Unmatched nodes are left
/// untouched. Returns the number of enriched nodes.
pub fn enrich_nodes(nodes: &mut [ArchNode]) -> usize {
    let mut enriched = 0;
    for node in nodes.iter_mut() {
        let matched = node
            .data
            .tech
            .as_deref()
            .and_then(find_technology)
            .or_else(|| find_technology(&node.data.label));
        if let Some(item) = matched {
            node.data.tech = Some(item.id.to_string());
            node.data.tech_label = Some(item.label.to_string());
            node.data.logo = Some(item.icon.to_string());
            enriched += 1;
        } else {
            tracing::debug!(node = %node.id, label = %node.data.label, "no catalog match");
        }
    }
    enriched
}
