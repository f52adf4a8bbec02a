pub mod anthropic;
pub mod factory;
pub mod gemini;
pub mod http_client;
pub mod ollama;
pub mod openai;
pub mod openai_image;
pub mod scrub;
pub mod stability;
pub mod traits;

pub use factory::{
    BUILTIN_PROVIDERS, ProviderRegistry, canonical_provider_id, create_provider,
};
pub use http_client::{build_provider_client, build_provider_client_with_timeout};
pub use scrub::{api_error, sanitize_api_error, scrub_secret_patterns};
pub use traits::{GenerationProvider, ProviderOutput};
