//! Resilient LLM generation of architecture graphs.
//!
//! Leaf-first: [`provider`] and [`transport`] talk to model APIs, [`breaker`]
//! and [`retry`] guard them, [`resilience`] composes the two, [`intent`] and
//! [`prompt`] shape the request, [`parse`] turns the answer into a graph and
//! [`engine`] drives the whole run.

pub mod breaker;
pub mod engine;
pub mod error;
pub mod intent;
pub mod parse;
pub mod prompt;
pub mod provider;
pub mod resilience;
pub mod retry;
pub mod transport;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStatus};
pub use engine::{GenerateRequest, GenerationOutput, Generator, GeneratorConfig, TokenStream};
pub use error::{GenerateError, NetworkCause, ProviderError};
pub use intent::{ArchitectureDetection, ArchitectureType, EditOperation};
pub use parse::{parse_response, ParseResult, ProcessedResponse};
pub use provider::{ProviderDescriptor, ProviderId, ProviderRegistry};
pub use resilience::ResilientCaller;
pub use retry::RetryPolicy;
pub use transport::{ChatMessage, ChatRequest, ChatTransport, ProviderStream};
