use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use archforge_core::{ArchEdge, ArchNode, ArchitectureGraph, Complexity, GenerationMode, Settings};

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::{GenerateError, ProviderError};
use crate::intent::{
    detect_architecture_type, detect_complexity, detect_operation, ArchitectureDetection,
};
use crate::parse::{process_response, MetadataDefaults, ProcessedResponse};
use crate::prompt::{
    build_messages, build_system_prompt, PromptContext, TechPreferences, QUICK_MODE_MAX_TOKENS,
};
use crate::provider::{ProviderDescriptor, ProviderId, ProviderRegistry, RequestOptions};
use crate::resilience::ResilientCaller;
use crate::retry::RetryPolicy;
use crate::transport::{ChatMessage, ChatRequest, ChatTransport, ProviderClient, ProviderStream};

/// Model output handed to the caller, token by token.
pub type TokenStream = BoxStream<'static, Result<String, GenerateError>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorConfig {
    pub primary: ProviderId,
    pub fallback: ProviderId,
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            primary: ProviderId::DeepSeek,
            fallback: ProviderId::OpenAi,
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl GeneratorConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, GenerateError> {
        Ok(Self {
            primary: settings.primary_provider.parse()?,
            fallback: settings.fallback_provider.parse()?,
            retry: RetryPolicy::from(&settings.retry),
            breaker: CircuitBreakerConfig::from(&settings.breaker),
        })
    }
}

/// One generation request from the canvas.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub prompt: String,
    /// Explicit model id. Set, it pins the provider and disables fallback.
    pub model: Option<String>,
    pub mode: GenerationMode,
    pub current_nodes: Vec<ArchNode>,
    pub current_edges: Vec<ArchEdge>,
    pub quick_mode: bool,
    pub preferences: Option<TechPreferences>,
    pub history: Vec<ChatMessage>,
    pub cancel: CancellationToken,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

/// Intent analysis and prompt text for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedPrompt {
    pub detection: ArchitectureDetection,
    pub complexity: Complexity,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub quick_mode: bool,
}

pub fn prepare_prompt(request: &GenerateRequest) -> PreparedPrompt {
    let detection = detect_architecture_type(&request.prompt);
    let complexity = detect_complexity(&request.prompt);
    let operation = detect_operation(&request.prompt, &request.current_nodes);
    let context = PromptContext {
        user_input: request.prompt.clone(),
        detection: detection.clone(),
        complexity,
        current_graph: ArchitectureGraph {
            nodes: request.current_nodes.clone(),
            edges: request.current_edges.clone(),
            metadata: None,
        },
        mode: request.mode,
        operation,
        preferences: request.preferences.clone(),
        history: request.history.clone(),
        quick_mode: request.quick_mode,
    };
    PreparedPrompt {
        system: build_system_prompt(&context),
        messages: build_messages(&context),
        detection,
        complexity,
        quick_mode: request.quick_mode,
    }
}

/// Request options after quick-mode adjustments.
pub fn effective_options(options: &RequestOptions, quick_mode: bool) -> RequestOptions {
    let mut options = options.clone();
    if quick_mode {
        options.reasoning_effort = None;
        options.max_tokens = Some(
            options
                .max_tokens
                .map_or(QUICK_MODE_MAX_TOKENS, |n| n.min(QUICK_MODE_MAX_TOKENS)),
        );
    }
    options
}

/// A drained generation run, parsed and validated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutput {
    pub provider: ProviderId,
    pub detection: ArchitectureDetection,
    pub complexity: Complexity,
    pub raw: String,
    pub processed: ProcessedResponse,
}

/// Top-level entry point: provider choice, fallback and the resilient call.
#[derive(Clone)]
pub struct Generator {
    registry: Arc<ProviderRegistry>,
    transport: Arc<dyn ChatTransport>,
    caller: ResilientCaller,
    primary: ProviderId,
    fallback: ProviderId,
}

impl Generator {
    pub fn new(
        registry: ProviderRegistry,
        transport: Arc<dyn ChatTransport>,
        config: GeneratorConfig,
    ) -> Result<Self, GenerateError> {
        registry.require(config.primary)?;
        registry.require(config.fallback)?;
        Ok(Self {
            registry: Arc::new(registry),
            transport,
            caller: ResilientCaller::new(
                Arc::new(CircuitBreaker::new(config.breaker)),
                config.retry,
            ),
            primary: config.primary,
            fallback: config.fallback,
        })
    }

    /// Providers from settings, credentials from the environment, HTTP and
    /// native transports.
    pub fn from_settings(settings: &Settings) -> Result<Self, GenerateError> {
        let config = GeneratorConfig::from_settings(settings)?;
        let registry = ProviderRegistry::from_settings(settings)?;
        let transport = ProviderClient::new(Duration::from_secs(settings.request_timeout_secs))?;
        Self::new(registry, Arc::new(transport), config)
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.caller.breaker()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn primary(&self) -> ProviderId {
        self.primary
    }

    pub fn fallback(&self) -> ProviderId {
        self.fallback
    }

    /// Start a generation and return its token stream once the first token
    /// has arrived.
    pub async fn generate(&self, request: GenerateRequest) -> Result<TokenStream, GenerateError> {
        let prepared = prepare_prompt(&request);
        let (_, tokens) = self.open(&request, &prepared).await?;
        Ok(tokens)
    }

    /// Run a generation to completion and turn the output into a graph.
    /// Malformed output is reported inside [`GenerationOutput::processed`].
    pub async fn generate_graph(
        &self,
        request: GenerateRequest,
    ) -> Result<GenerationOutput, GenerateError> {
        let prepared = prepare_prompt(&request);
        let (provider, mut tokens) = self.open(&request, &prepared).await?;

        let mut raw = String::new();
        while let Some(token) = tokens.next().await {
            raw.push_str(&token?);
        }

        let defaults = MetadataDefaults {
            architecture_type: Some(prepared.detection.architecture_type.as_str().to_string()),
            complexity: Some(prepared.complexity),
        };
        let processed = process_response(&raw, &defaults);
        if !processed.is_valid() {
            tracing::warn!(provider = %provider, errors = ?processed.errors, "model output rejected");
        }

        Ok(GenerationOutput {
            provider,
            detection: prepared.detection,
            complexity: prepared.complexity,
            raw,
            processed,
        })
    }

    async fn open(
        &self,
        request: &GenerateRequest,
        prepared: &PreparedPrompt,
    ) -> Result<(ProviderId, TokenStream), GenerateError> {
        let cancel = &request.cancel;

        if let Some(model) = request.model.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            let (provider, upstream) = self.registry.resolve_model(model)?;
            tracing::info!(provider = %provider, model = %upstream, "explicit model, no fallback");
            let tokens = self.attempt(provider, Some(upstream), prepared, cancel).await?;
            return Ok((provider, tokens));
        }

        let primary_err = match self.attempt(self.primary, None, prepared, cancel).await {
            Ok(tokens) => return Ok((self.primary, tokens)),
            Err(GenerateError::Cancelled) => return Err(GenerateError::Cancelled),
            Err(err) => err,
        };
        if self.fallback == self.primary {
            return Err(primary_err);
        }

        tracing::warn!(
            primary = %self.primary,
            fallback = %self.fallback,
            error = %primary_err,
            "primary provider failed, falling back"
        );
        match self.attempt(self.fallback, None, prepared, cancel).await {
            Ok(tokens) => Ok((self.fallback, tokens)),
            Err(err) => {
                tracing::error!(provider = %self.fallback, error = %err, "generation failed");
                Err(err)
            }
        }
    }

    /// One provider, through the resilient wrapper. The attempt covers
    /// opening the stream and receiving the first token.
    async fn attempt(
        &self,
        provider: ProviderId,
        model: Option<String>,
        prepared: &PreparedPrompt,
        cancel: &CancellationToken,
    ) -> Result<TokenStream, GenerateError> {
        let descriptor = self.registry.require(provider)?;
        if !descriptor.has_credential() && provider.credential_env().is_some() {
            tracing::warn!(provider = %provider, "calling provider without a credential");
        }
        let chat = ChatRequest {
            system: prepared.system.clone(),
            messages: prepared.messages.clone(),
            model: model.unwrap_or_else(|| descriptor.model.clone()),
            options: effective_options(&descriptor.options, prepared.quick_mode),
        };
        let transport = self.transport.as_ref();

        let (first, rest) = self
            .caller
            .call_with_resilience_cancellable(
                provider,
                || first_token(transport, descriptor, &chat),
                "generate",
                cancel,
            )
            .await?;

        tracing::info!(provider = %provider, model = %chat.model, "stream started");
        Ok(relay(provider, first, rest, cancel.clone()))
    }
}

async fn first_token(
    transport: &dyn ChatTransport,
    descriptor: &ProviderDescriptor,
    request: &ChatRequest,
) -> Result<(String, ProviderStream), ProviderError> {
    let mut stream = transport.open_stream(descriptor, request).await?;
    loop {
        match stream.next().await {
            Some(Ok(token)) if token.is_empty() => continue,
            Some(Ok(token)) => return Ok((token, stream)),
            Some(Err(err)) => return Err(err),
            None => return Err(ProviderError::EmptyResponse),
        }
    }
}

struct Relay {
    rest: ProviderStream,
    delivered: usize,
    cancel: CancellationToken,
    done: bool,
}

/// First token, then the remainder. Failures past this point are reported as
/// `StreamInterrupted` and never touch the breaker.
fn relay(
    provider: ProviderId,
    first: String,
    rest: ProviderStream,
    cancel: CancellationToken,
) -> TokenStream {
    let state = Relay {
        rest,
        delivered: 1,
        cancel,
        done: false,
    };
    let tail = stream::unfold(state, move |mut state| async move {
        if state.done {
            return None;
        }
        let next = tokio::select! {
            biased;
            _ = state.cancel.cancelled() => None,
            item = state.rest.next() => Some(item),
        };
        match next {
            None => {
                tracing::info!(provider = %provider, delivered = state.delivered, "stream cancelled");
                state.done = true;
                Some((Err(GenerateError::Cancelled), state))
            }
            Some(None) => None,
            Some(Some(Ok(token))) => {
                state.delivered += 1;
                Some((Ok(token), state))
            }
            Some(Some(Err(err))) => {
                tracing::warn!(
                    provider = %provider,
                    delivered = state.delivered,
                    error = %err,
                    "stream interrupted"
                );
                state.done = true;
                let interrupted = GenerateError::StreamInterrupted {
                    provider,
                    delivered: state.delivered,
                    message: err.to_string(),
                };
                Some((Err(interrupted), state))
            }
        }
    });
    stream::once(async move { Ok(first) }).chain(tail).boxed()
}
