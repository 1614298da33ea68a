use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use archforge_core::Settings;

use crate::error::GenerateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    DeepSeek,
    OpenAi,
    Groq,
    Anthropic,
    Gemini,
    Ollama,
}

impl ProviderId {
    pub const ALL: [ProviderId; 6] = [
        ProviderId::DeepSeek,
        ProviderId::OpenAi,
        ProviderId::Groq,
        ProviderId::Anthropic,
        ProviderId::Gemini,
        ProviderId::Ollama,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderId::DeepSeek => "deepseek",
            ProviderId::OpenAi => "openai",
            ProviderId::Groq => "groq",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Gemini => "gemini",
            ProviderId::Ollama => "ollama",
        }
    }

    /// Environment variable holding the credential, `None` for local providers.
    pub fn credential_env(self) -> Option<&'static str> {
        match self {
            ProviderId::DeepSeek => Some("DEEPSEEK_API_KEY"),
            ProviderId::OpenAi => Some("OPENAI_API_KEY"),
            ProviderId::Groq => Some("GROQ_API_KEY"),
            ProviderId::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderId::Gemini => Some("GEMINI_API_KEY"),
            ProviderId::Ollama => None,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = GenerateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ProviderId::ALL
            .into_iter()
            .find(|id| id.as_str() == wanted)
            .ok_or_else(|| GenerateError::UnknownProvider(s.to_string()))
    }
}

/// Backends served through the `llm` crate instead of the raw HTTP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeBackend {
    Anthropic,
    Google,
    Ollama,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// `/chat/completions` with SSE streaming
    OpenAiCompatible,
    Native(NativeBackend),
}

impl Transport {
    /// Whether requests go to `ProviderDescriptor::base_url`. The Anthropic
    /// and Google backends of `llm` post to fixed endpoints.
    pub fn honors_base_url(self) -> bool {
        !matches!(
            self,
            Transport::Native(NativeBackend::Anthropic | NativeBackend::Google)
        )
    }
}

/// Provider-specific request parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestOptions {
    pub json_mode: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub reasoning_effort: Option<String>,
    /// Merged verbatim into the request body
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Connection parameters for one provider. Immutable after startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub transport: Transport,
    pub options: RequestOptions,
}

impl ProviderDescriptor {
    /// Built-in endpoint table, before settings overrides and credentials.
    pub fn builtin(id: ProviderId) -> Self {
        let (base_url, model, transport) = match id {
            ProviderId::DeepSeek => (
                "https://api.deepseek.com/v1",
                "deepseek-chat",
                Transport::OpenAiCompatible,
            ),
            ProviderId::OpenAi => (
                "https://api.openai.com/v1",
                "gpt-4.1-mini",
                Transport::OpenAiCompatible,
            ),
            ProviderId::Groq => (
                "https://api.groq.com/openai/v1",
                "openai/gpt-oss-120b",
                Transport::OpenAiCompatible,
            ),
            ProviderId::Anthropic => (
                "https://api.anthropic.com/v1/",
                "claude-sonnet-4-5",
                Transport::Native(NativeBackend::Anthropic),
            ),
            ProviderId::Gemini => (
                "https://generativelanguage.googleapis.com/v1beta/",
                "gemini-2.5-flash",
                Transport::Native(NativeBackend::Google),
            ),
            ProviderId::Ollama => (
                "http://localhost:11434",
                "llama3.1",
                Transport::Native(NativeBackend::Ollama),
            ),
        };
        let options = RequestOptions {
            json_mode: transport == Transport::OpenAiCompatible,
            temperature: Some(0.3),
            max_tokens: Some(8192),
            reasoning_effort: (id == ProviderId::Groq).then(|| "medium".to_string()),
            extra: serde_json::Map::new(),
        };
        Self {
            id,
            base_url: base_url.to_string(),
            api_key: None,
            model: model.to_string(),
            transport,
            options,
        }
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// Maps a canonical model id to the provider serving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoute {
    pub model: String,
    pub provider: ProviderId,
}

const MODEL_ROUTES: &[(&str, ProviderId)] = &[
    ("deepseek-chat", ProviderId::DeepSeek),
    ("deepseek-reasoner", ProviderId::DeepSeek),
    ("gpt-4.1", ProviderId::OpenAi),
    ("gpt-4.1-mini", ProviderId::OpenAi),
    ("gpt-4o", ProviderId::OpenAi),
    ("gpt-4o-mini", ProviderId::OpenAi),
    ("o4-mini", ProviderId::OpenAi),
    ("openai/gpt-oss-120b", ProviderId::Groq),
    ("llama-3.3-70b-versatile", ProviderId::Groq),
    ("claude-sonnet-4-5", ProviderId::Anthropic),
    ("claude-opus-4-1", ProviderId::Anthropic),
    ("claude-haiku-4-5", ProviderId::Anthropic),
    ("gemini-2.5-pro", ProviderId::Gemini),
    ("gemini-2.5-flash", ProviderId::Gemini),
];

/// Model families not listed verbatim. `true` strips the prefix from the
/// model name sent upstream.
const FAMILY_PREFIXES: &[(&str, ProviderId, bool)] = &[
    ("ollama/", ProviderId::Ollama, true),
    ("deepseek-", ProviderId::DeepSeek, false),
    ("gpt-", ProviderId::OpenAi, false),
    ("o3", ProviderId::OpenAi, false),
    ("o4", ProviderId::OpenAi, false),
    ("claude-", ProviderId::Anthropic, false),
    ("gemini-", ProviderId::Gemini, false),
    ("llama", ProviderId::Groq, false),
    ("qwen", ProviderId::Groq, false),
];

pub fn default_routes() -> Vec<ModelRoute> {
    MODEL_ROUTES
        .iter()
        .map(|(model, provider)| ModelRoute {
            model: (*model).to_string(),
            provider: *provider,
        })
        .collect()
}

/// Static table of provider descriptors plus the model routing table.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    descriptors: HashMap<ProviderId, ProviderDescriptor>,
    routes: Vec<ModelRoute>,
}

impl ProviderRegistry {
    /// Build and validate a registry. Every route must point at a registered
    /// provider and canonical model ids must be unique.
    pub fn new(
        descriptors: Vec<ProviderDescriptor>,
        routes: Vec<ModelRoute>,
    ) -> Result<Self, GenerateError> {
        let descriptors: HashMap<ProviderId, ProviderDescriptor> =
            descriptors.into_iter().map(|d| (d.id, d)).collect();

        let mut seen = HashSet::new();
        for route in &routes {
            if !seen.insert(route.model.to_lowercase()) {
                return Err(GenerateError::Config(format!(
                    "model '{}' is routed twice",
                    route.model
                )));
            }
            if !descriptors.contains_key(&route.provider) {
                return Err(GenerateError::Config(format!(
                    "model '{}' routes to unregistered provider {}",
                    route.model, route.provider
                )));
            }
        }

        Ok(Self {
            descriptors,
            routes,
        })
    }

    /// Built-in providers with settings overrides and credentials from the
    /// process environment.
    pub fn from_settings(settings: &Settings) -> Result<Self, GenerateError> {
        Self::from_settings_with_env(settings, |name| std::env::var(name).ok())
    }

    pub fn from_settings_with_env(
        settings: &Settings,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, GenerateError> {
        let mut descriptors = Vec::with_capacity(ProviderId::ALL.len());
        for id in ProviderId::ALL {
            let mut descriptor = ProviderDescriptor::builtin(id);
            if let Some(over) = settings.providers.get(id.as_str()) {
                if let Some(url) = &over.base_url {
                    let unchanged =
                        url.trim_end_matches('/') == descriptor.base_url.trim_end_matches('/');
                    if !unchanged && !descriptor.transport.honors_base_url() {
                        return Err(GenerateError::Config(format!(
                            "providers.{id}.baseUrl cannot be overridden: the {id} backend uses a fixed endpoint"
                        )));
                    }
                    descriptor.base_url = url.clone();
                }
                if let Some(model) = &over.model {
                    descriptor.model = model.clone();
                }
            }
            if let Some(var) = id.credential_env() {
                descriptor.api_key = env(var).filter(|k| !k.trim().is_empty());
                if descriptor.api_key.is_none() {
                    // Still registered: the provider's own auth error becomes the surfaced failure.
                    tracing::warn!(provider = %id, env = var, "no credential configured");
                }
            }
            descriptors.push(descriptor);
        }
        Self::new(descriptors, default_routes())
    }

    pub fn get(&self, id: ProviderId) -> Option<&ProviderDescriptor> {
        self.descriptors.get(&id)
    }

    pub fn require(&self, id: ProviderId) -> Result<&ProviderDescriptor, GenerateError> {
        self.get(id)
            .ok_or_else(|| GenerateError::UnknownProvider(id.to_string()))
    }

    pub fn ids(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self.descriptors.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Resolve an explicitly requested model to `(provider, upstream model)`.
    /// Canonical ids are matched exactly, then known family prefixes.
    pub fn resolve_model(&self, model_id: &str) -> Result<(ProviderId, String), GenerateError> {
        let wanted = model_id.trim();
        let lower = wanted.to_lowercase();

        if let Some(route) = self.routes.iter().find(|r| r.model.to_lowercase() == lower) {
            return Ok((route.provider, route.model.clone()));
        }

        for (prefix, provider, strip) in FAMILY_PREFIXES {
            if lower.starts_with(prefix) && self.descriptors.contains_key(provider) {
                let model = if *strip {
                    wanted.get(prefix.len()..).unwrap_or_default().to_string()
                } else {
                    wanted.to_string()
                };
                if model.is_empty() {
                    break;
                }
                return Ok((*provider, model));
            }
        }

        Err(GenerateError::UnknownModel(model_id.to_string()))
    }
}
