//! Model catalog: static description of providers and models.
//!
//! All provider knowledge lives in this one declarative table — adapters
//! select behavior from the catalog by `api_format`, and credential lookup
//! goes through each provider's `api_key_env`.

use crate::error::{BashError, Result};

/// Wire format family a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiFormat {
    Anthropic,
    OpenAi,
    Google,
}

impl std::fmt::Display for ApiFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiFormat::Anthropic => write!(f, "anthropic"),
            ApiFormat::OpenAi => write!(f, "openai"),
            ApiFormat::Google => write!(f, "google"),
        }
    }
}

/// Static description of one provider.
#[derive(Debug, Clone, Copy)]
pub struct ProviderSpec {
    pub id: &'static str,
    pub api_format: ApiFormat,
    pub base_url: &'static str,
    pub api_key_env: &'static str,
    /// Extra version header (Anthropic-style APIs).
    pub api_version: Option<&'static str>,
    /// Alternate name for the max-tokens request field, when the provider
    /// deviates from its format family's default.
    pub max_tokens_field: Option<&'static str>,
}

/// Static description of one model.
#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
    pub id: &'static str,
    pub provider_id: &'static str,
    pub context_window: u32,
    pub max_output: u32,
    pub supports_tools: bool,
    pub supports_vision: bool,
    pub streaming: bool,
    pub reasoning: bool,
}

/// Capability view of a model, with safe defaults for unknown ids.
#[derive(Debug, Clone, Copy)]
pub struct ModelCaps {
    pub context_window: u32,
    pub max_output: u32,
    pub supports_tools: bool,
    pub supports_vision: bool,
}

impl Default for ModelCaps {
    fn default() -> Self {
        Self {
            context_window: 128_000,
            max_output: 8_192,
            supports_tools: true,
            supports_vision: false,
        }
    }
}

pub const PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        id: "anthropic",
        api_format: ApiFormat::Anthropic,
        base_url: "https://api.anthropic.com",
        api_key_env: "ANTHROPIC_API_KEY",
        api_version: Some("2023-06-01"),
        max_tokens_field: None,
    },
    ProviderSpec {
        id: "openai",
        api_format: ApiFormat::OpenAi,
        base_url: "https://api.openai.com/v1",
        api_key_env: "OPENAI_API_KEY",
        api_version: None,
        max_tokens_field: Some("max_completion_tokens"),
    },
    ProviderSpec {
        id: "google",
        api_format: ApiFormat::Google,
        base_url: "https://generativelanguage.googleapis.com/v1beta",
        api_key_env: "GEMINI_API_KEY",
        api_version: None,
        max_tokens_field: None,
    },
    ProviderSpec {
        id: "deepseek",
        api_format: ApiFormat::OpenAi,
        base_url: "https://api.deepseek.com/v1",
        api_key_env: "DEEPSEEK_API_KEY",
        api_version: None,
        max_tokens_field: None,
    },
    ProviderSpec {
        id: "xiaomi",
        api_format: ApiFormat::Anthropic,
        base_url: "https://api.xiaomimimo.com/anthropic",
        api_key_env: "MIMO_API_KEY",
        api_version: Some("2023-06-01"),
        max_tokens_field: None,
    },
    ProviderSpec {
        id: "openrouter",
        api_format: ApiFormat::OpenAi,
        base_url: "https://openrouter.ai/api/v1",
        api_key_env: "OPENROUTER_API_KEY",
        api_version: None,
        max_tokens_field: None,
    },
];

pub const MODELS: &[ModelSpec] = &[
    ModelSpec {
        id: "claude-sonnet-4-5",
        provider_id: "anthropic",
        context_window: 200_000,
        max_output: 64_000,
        supports_tools: true,
        supports_vision: true,
        streaming: true,
        reasoning: true,
    },
    ModelSpec {
        id: "claude-opus-4-5",
        provider_id: "anthropic",
        context_window: 200_000,
        max_output: 32_000,
        supports_tools: true,
        supports_vision: true,
        streaming: true,
        reasoning: true,
    },
    ModelSpec {
        id: "claude-haiku-4-5",
        provider_id: "anthropic",
        context_window: 200_000,
        max_output: 64_000,
        supports_tools: true,
        supports_vision: true,
        streaming: true,
        reasoning: false,
    },
    ModelSpec {
        id: "gpt-4o",
        provider_id: "openai",
        context_window: 128_000,
        max_output: 16_384,
        supports_tools: true,
        supports_vision: true,
        streaming: true,
        reasoning: false,
    },
    ModelSpec {
        id: "gpt-4o-mini",
        provider_id: "openai",
        context_window: 128_000,
        max_output: 16_384,
        supports_tools: true,
        supports_vision: true,
        streaming: true,
        reasoning: false,
    },
    ModelSpec {
        id: "o3-mini",
        provider_id: "openai",
        context_window: 200_000,
        max_output: 100_000,
        supports_tools: true,
        supports_vision: false,
        streaming: true,
        reasoning: true,
    },
    ModelSpec {
        id: "gemini-2.0-flash",
        provider_id: "google",
        context_window: 1_048_576,
        max_output: 8_192,
        supports_tools: true,
        supports_vision: true,
        streaming: true,
        reasoning: false,
    },
    ModelSpec {
        id: "gemini-2.5-pro",
        provider_id: "google",
        context_window: 1_048_576,
        max_output: 65_536,
        supports_tools: true,
        supports_vision: true,
        streaming: true,
        reasoning: true,
    },
    ModelSpec {
        id: "deepseek-chat",
        provider_id: "deepseek",
        context_window: 64_000,
        max_output: 8_192,
        supports_tools: true,
        supports_vision: false,
        streaming: true,
        reasoning: false,
    },
    ModelSpec {
        id: "deepseek-reasoner",
        provider_id: "deepseek",
        context_window: 64_000,
        max_output: 8_192,
        supports_tools: false,
        supports_vision: false,
        streaming: true,
        reasoning: true,
    },
    ModelSpec {
        id: "mimo-v2",
        provider_id: "xiaomi",
        context_window: 128_000,
        max_output: 16_384,
        supports_tools: true,
        supports_vision: false,
        streaming: true,
        reasoning: false,
    },
];

/// The model used when neither config nor environment names one.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Look up a provider spec by id.
pub fn provider(id: &str) -> Option<&'static ProviderSpec> {
    PROVIDERS.iter().find(|p| p.id == id)
}

/// Look up a model spec by exact id.
pub fn model(id: &str) -> Option<&'static ModelSpec> {
    MODELS.iter().find(|m| m.id == id)
}

/// Resolve the provider that serves a model id.
///
/// Exact catalog match first, then name-prefix heuristics so dated or
/// fine-grained variants (e.g. `claude-sonnet-4-5-20250929`) route without a
/// catalog entry of their own.
pub fn provider_for_model(model_id: &str) -> Result<&'static ProviderSpec> {
    if let Some(spec) = model(model_id) {
        return provider(spec.provider_id)
            .ok_or_else(|| BashError::Config(format!("unknown provider '{}'", spec.provider_id)));
    }

    let provider_id = if model_id.starts_with("claude") {
        "anthropic"
    } else if model_id.starts_with("gpt") || model_id.starts_with("o1") || model_id.starts_with("o3")
    {
        "openai"
    } else if model_id.starts_with("gemini") {
        "google"
    } else if model_id.starts_with("deepseek") {
        "deepseek"
    } else if model_id.starts_with("mimo") {
        "xiaomi"
    } else if model_id.contains('/') {
        // Vendor-prefixed ids (e.g. "meta-llama/...") go through OpenRouter.
        "openrouter"
    } else {
        "anthropic"
    };

    provider(provider_id)
        .ok_or_else(|| BashError::Config(format!("unknown provider '{}'", provider_id)))
}

/// Capability set for a model. Unknown models get the safe default
/// (tools=true, vision=false).
pub fn capabilities(model_id: &str) -> ModelCaps {
    match model(model_id) {
        Some(spec) => ModelCaps {
            context_window: spec.context_window,
            max_output: spec.max_output,
            supports_tools: spec.supports_tools,
            supports_vision: spec.supports_vision,
        },
        None => ModelCaps::default(),
    }
}

/// Base URL for a provider, honoring the `ANTHROPIC_BASE_URL` proxy override
/// for any provider speaking the anthropic wire format.
pub fn resolve_base_url(spec: &ProviderSpec) -> String {
    if spec.api_format == ApiFormat::Anthropic {
        if let Ok(url) = std::env::var("ANTHROPIC_BASE_URL") {
            if !url.trim().is_empty() {
                return url.trim_end_matches('/').to_string();
            }
        }
    }
    spec.base_url.to_string()
}

/// API key for a provider from its configured environment variable.
pub fn api_key(spec: &ProviderSpec) -> Result<String> {
    std::env::var(spec.api_key_env).map_err(|_| {
        BashError::Config(format!(
            "missing API key: set {} for provider '{}'",
            spec.api_key_env, spec.id
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_lookup() {
        assert_eq!(provider("anthropic").unwrap().api_format, ApiFormat::Anthropic);
        assert_eq!(provider("openai").unwrap().api_format, ApiFormat::OpenAi);
        assert_eq!(provider("google").unwrap().api_format, ApiFormat::Google);
        assert!(provider("nope").is_none());
    }

    #[test]
    fn test_model_providers_exist() {
        for m in MODELS {
            assert!(
                provider(m.provider_id).is_some(),
                "model '{}' references unknown provider '{}'",
                m.id,
                m.provider_id
            );
        }
    }

    #[test]
    fn test_provider_for_model_exact() {
        assert_eq!(provider_for_model("gpt-4o").unwrap().id, "openai");
        assert_eq!(provider_for_model("gemini-2.0-flash").unwrap().id, "google");
        assert_eq!(provider_for_model("deepseek-chat").unwrap().id, "deepseek");
    }

    #[test]
    fn test_provider_for_model_prefix() {
        assert_eq!(
            provider_for_model("claude-sonnet-4-5-20250929").unwrap().id,
            "anthropic"
        );
        assert_eq!(provider_for_model("gpt-5-preview").unwrap().id, "openai");
        assert_eq!(provider_for_model("o3-large").unwrap().id, "openai");
        assert_eq!(provider_for_model("gemini-3.0-ultra").unwrap().id, "google");
        assert_eq!(
            provider_for_model("meta-llama/llama-3-70b").unwrap().id,
            "openrouter"
        );
    }

    #[test]
    fn test_unknown_model_caps_default() {
        let caps = capabilities("totally-unknown-model");
        assert!(caps.supports_tools);
        assert!(!caps.supports_vision);
    }

    #[test]
    fn test_known_model_caps() {
        let caps = capabilities("claude-sonnet-4-5");
        assert!(caps.supports_vision);
        assert_eq!(caps.context_window, 200_000);

        let caps = capabilities("deepseek-reasoner");
        assert!(!caps.supports_tools);
    }

    #[test]
    fn test_base_url_override_applies_to_anthropic_format_only() {
        // Serialized via env var; avoid interference with other tests by
        // restoring the prior value.
        let prior = std::env::var("ANTHROPIC_BASE_URL").ok();
        std::env::set_var("ANTHROPIC_BASE_URL", "http://proxy.internal:8080/");

        let anthropic = provider("anthropic").unwrap();
        assert_eq!(resolve_base_url(anthropic), "http://proxy.internal:8080");

        // xiaomi speaks the anthropic format, so it is rewritten too
        let xiaomi = provider("xiaomi").unwrap();
        assert_eq!(resolve_base_url(xiaomi), "http://proxy.internal:8080");

        let openai = provider("openai").unwrap();
        assert_eq!(resolve_base_url(openai), "https://api.openai.com/v1");

        match prior {
            Some(v) => std::env::set_var("ANTHROPIC_BASE_URL", v),
            None => std::env::remove_var("ANTHROPIC_BASE_URL"),
        }
    }

    #[test]
    fn test_api_key_missing() {
        let spec = ProviderSpec {
            id: "test",
            api_format: ApiFormat::OpenAi,
            base_url: "http://example.com",
            api_key_env: "BASHCLAW_TEST_NO_SUCH_KEY",
            api_version: None,
            max_tokens_field: None,
        };
        let err = api_key(&spec).unwrap_err();
        assert!(err.to_string().contains("BASHCLAW_TEST_NO_SUCH_KEY"));
    }
}
