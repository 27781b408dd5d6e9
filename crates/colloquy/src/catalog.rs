//! Static catalogs: builtin providers, the capability pattern table, and
//! model-family grouping.
//!
//! Capability lookup is pattern based. A pattern is either a literal model
//! code or a prefix with a trailing `*`. Resolution tries an exact match
//! first, then walks the table in declaration order and takes the first
//! wildcard whose prefix matches case-insensitively. First match wins, so
//! more specific entries must stay above broader ones.

use crate::model::{BuiltinProvider, CapabilityInfo};

pub static BUILTIN_PROVIDERS: &[BuiltinProvider] = &[
    BuiltinProvider {
        id: "openai",
        display_name: "OpenAI",
        api_base: "https://api.openai.com/v1",
        transport_ctor: None,
    },
    BuiltinProvider {
        id: "anthropic",
        display_name: "Anthropic",
        api_base: "https://api.anthropic.com/v1",
        transport_ctor: None,
    },
    BuiltinProvider {
        id: "google",
        display_name: "Google AI",
        api_base: "https://generativelanguage.googleapis.com/v1beta/openai",
        transport_ctor: None,
    },
    BuiltinProvider {
        id: "deepseek",
        display_name: "DeepSeek",
        api_base: "https://api.deepseek.com/v1",
        transport_ctor: None,
    },
    BuiltinProvider {
        id: "xai",
        display_name: "xAI",
        api_base: "https://api.x.ai/v1",
        transport_ctor: None,
    },
    BuiltinProvider {
        id: "dashscope",
        display_name: "Alibaba DashScope",
        api_base: "https://dashscope.aliyuncs.com/compatible-mode/v1",
        transport_ctor: None,
    },
    BuiltinProvider {
        id: "moonshot",
        display_name: "Moonshot",
        api_base: "https://api.moonshot.cn/v1",
        transport_ctor: None,
    },
    BuiltinProvider {
        id: "openrouter",
        display_name: "OpenRouter",
        api_base: "https://openrouter.ai/api/v1",
        transport_ctor: None,
    },
    BuiltinProvider {
        id: "groq",
        display_name: "Groq",
        api_base: "https://api.groq.com/openai/v1",
        transport_ctor: None,
    },
];

pub fn builtin_provider(id: &str) -> Option<&'static BuiltinProvider> {
    BUILTIN_PROVIDERS.iter().find(|p| p.id == id)
}

/// Pattern table for builtin-provider models. Order matters: the `gpt-4o*`
/// wildcard must come after the literal `gpt-4o-mini`-style entries it would
/// otherwise shadow.
static CAPABILITY_TABLE: &[(&str, CapabilityInfo)] = &[
    // OpenAI
    ("gpt-4o-mini", CapabilityInfo::vision(128_000)),
    ("gpt-4o*", CapabilityInfo::vision(128_000)),
    ("gpt-4.1*", CapabilityInfo::vision(1_047_576)),
    ("gpt-5*", CapabilityInfo::vision(400_000)),
    ("gpt-3.5*", CapabilityInfo::text_only(16_385)),
    ("o1-mini", CapabilityInfo::text_only(128_000)),
    ("o1*", CapabilityInfo::vision(200_000)),
    ("o3*", CapabilityInfo::vision(200_000)),
    ("o4-mini*", CapabilityInfo::vision(200_000)),
    // Anthropic
    ("claude-3-5-haiku*", CapabilityInfo::text_only(200_000)),
    ("claude-3*", CapabilityInfo::vision(200_000)),
    ("claude-sonnet-4*", CapabilityInfo::vision(200_000)),
    ("claude-opus-4*", CapabilityInfo::vision(200_000)),
    ("claude-haiku-4*", CapabilityInfo::vision(200_000)),
    // Google
    ("gemini-2.5*", CapabilityInfo::multimodal(1_048_576)),
    ("gemini-2.0-flash*", CapabilityInfo::multimodal(1_048_576)),
    ("gemini-1.5-pro*", CapabilityInfo::multimodal(2_097_152)),
    ("gemini*", CapabilityInfo::multimodal(1_048_576)),
    // DeepSeek
    ("deepseek-chat", CapabilityInfo::text_only(64_000)),
    ("deepseek-reasoner", CapabilityInfo::text_only(64_000)),
    ("deepseek*", CapabilityInfo::text_only(64_000)),
    // xAI
    ("grok-2-vision*", CapabilityInfo::vision(32_768)),
    ("grok-4*", CapabilityInfo::vision(256_000)),
    ("grok*", CapabilityInfo::text_only(131_072)),
    // Qwen / DashScope
    ("qwen-vl*", CapabilityInfo::multimodal(32_000)),
    ("qwen2.5-vl*", CapabilityInfo::multimodal(32_000)),
    ("qwen*", CapabilityInfo::text_only(131_072)),
    // Moonshot
    ("moonshot-v1*", CapabilityInfo::text_only(128_000)),
    ("kimi-latest", CapabilityInfo::vision(131_072)),
    ("kimi*", CapabilityInfo::text_only(131_072)),
    // Meta via hosted endpoints
    ("llama-3.2-11b-vision*", CapabilityInfo::vision(128_000)),
    ("llama-3.2-90b-vision*", CapabilityInfo::vision(128_000)),
    ("llama*", CapabilityInfo::text_only(128_000)),
];

/// Resolve capabilities for a builtin-provider model code.
pub fn resolve_builtin(code: &str) -> CapabilityInfo {
    if let Some((_, caps)) = CAPABILITY_TABLE
        .iter()
        .find(|(pattern, _)| !pattern.ends_with('*') && pattern.eq_ignore_ascii_case(code))
    {
        return *caps;
    }
    for (pattern, caps) in CAPABILITY_TABLE {
        if let Some(prefix) = pattern.strip_suffix('*') {
            let head = code.get(..prefix.len());
            if head.is_some_and(|h| h.eq_ignore_ascii_case(prefix)) {
                return *caps;
            }
        }
    }
    CapabilityInfo::unknown()
}

/// Vendor family a model code belongs to, used for behavioral branching
/// that is not a per-model capability (e.g. whether structured multi-part
/// content is accepted at all).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    OpenAi,
    Anthropic,
    Gemini,
    DeepSeek,
    Grok,
    Qwen,
    Moonshot,
    Llama,
    Other,
}

impl ModelFamily {
    /// Some vendor families reject structured multi-part content even on
    /// vision-capable models and need every message collapsed to one joined
    /// text block.
    pub fn rejects_structured_content(&self) -> bool {
        matches!(self, ModelFamily::DeepSeek | ModelFamily::Moonshot)
    }
}

// Models whose codes don't carry the vendor prefix, checked before the
// prefix rules.
static OPENAI_CATALOG: &[&str] = &["o1", "o1-mini", "o1-preview", "o3", "o3-mini", "o4-mini"];
static MOONSHOT_CATALOG: &[&str] = &["kimi-latest", "kimi-k2", "kimi-thinking-preview"];

pub fn family_of(code: &str) -> ModelFamily {
    let lower = code.to_ascii_lowercase();
    if OPENAI_CATALOG.iter().any(|m| *m == lower) {
        return ModelFamily::OpenAi;
    }
    if MOONSHOT_CATALOG.iter().any(|m| *m == lower) {
        return ModelFamily::Moonshot;
    }
    let prefixes: &[(&str, ModelFamily)] = &[
        ("gpt", ModelFamily::OpenAi),
        ("claude", ModelFamily::Anthropic),
        ("gemini", ModelFamily::Gemini),
        ("deepseek", ModelFamily::DeepSeek),
        ("grok", ModelFamily::Grok),
        ("qwen", ModelFamily::Qwen),
        ("moonshot", ModelFamily::Moonshot),
        ("kimi", ModelFamily::Moonshot),
        ("llama", ModelFamily::Llama),
    ];
    prefixes
        .iter()
        .find(|(p, _)| lower.starts_with(p))
        .map(|(_, f)| *f)
        .unwrap_or(ModelFamily::Other)
}
