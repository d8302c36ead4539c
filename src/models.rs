use serde::{Deserialize, Serialize};

/// Upstream publisher, determines wire format and URL shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    Google,
    Imagen,
}

impl Provider {
    pub fn publisher(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::Google | Provider::Imagen => "google",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
            Provider::Imagen => "imagen",
        }
    }
}

/// Immutable description of a known upstream model.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub id: &'static str,
    pub display_name: &'static str,
    pub provider: Provider,
    pub context_window: u32,
    pub max_output_tokens: u32,
    /// USD per million tokens, input and output.
    pub price_input: f64,
    pub price_output: f64,
    /// Ordered region hint; the planner re-orders by global priority.
    pub regions: &'static [&'static str],
}

const ANTHROPIC_REGIONS: &[&str] = &["us-east5", "europe-west1", "asia-east1"];
const GEMINI_REGIONS: &[&str] = &["global"];
const IMAGEN_REGIONS: &[&str] = &["us-central1", "europe-west1"];

/// Compiled-in catalog. Insertion order matters: prefix resolution picks the
/// first entry whose id starts with the requested prefix.
pub static CATALOG: &[ModelSpec] = &[
    ModelSpec {
        id: "claude-opus-4-1@20250805",
        display_name: "Claude Opus 4.1",
        provider: Provider::Anthropic,
        context_window: 200_000,
        max_output_tokens: 32_000,
        price_input: 15.0,
        price_output: 75.0,
        regions: ANTHROPIC_REGIONS,
    },
    ModelSpec {
        id: "claude-sonnet-4-5@20250929",
        display_name: "Claude Sonnet 4.5",
        provider: Provider::Anthropic,
        context_window: 200_000,
        max_output_tokens: 64_000,
        price_input: 3.0,
        price_output: 15.0,
        regions: ANTHROPIC_REGIONS,
    },
    ModelSpec {
        id: "claude-sonnet-4@20250514",
        display_name: "Claude Sonnet 4",
        provider: Provider::Anthropic,
        context_window: 200_000,
        max_output_tokens: 64_000,
        price_input: 3.0,
        price_output: 15.0,
        regions: ANTHROPIC_REGIONS,
    },
    ModelSpec {
        id: "claude-haiku-4-5@20251001",
        display_name: "Claude Haiku 4.5",
        provider: Provider::Anthropic,
        context_window: 200_000,
        max_output_tokens: 64_000,
        price_input: 1.0,
        price_output: 5.0,
        regions: ANTHROPIC_REGIONS,
    },
    ModelSpec {
        id: "claude-3-5-haiku@20241022",
        display_name: "Claude 3.5 Haiku",
        provider: Provider::Anthropic,
        context_window: 200_000,
        max_output_tokens: 8_192,
        price_input: 0.8,
        price_output: 4.0,
        regions: &["us-east5", "us-central1"],
    },
    ModelSpec {
        id: "gemini-2.5-pro",
        display_name: "Gemini 2.5 Pro",
        provider: Provider::Google,
        context_window: 1_048_576,
        max_output_tokens: 65_536,
        price_input: 1.25,
        price_output: 10.0,
        regions: GEMINI_REGIONS,
    },
    ModelSpec {
        id: "gemini-2.5-flash",
        display_name: "Gemini 2.5 Flash",
        provider: Provider::Google,
        context_window: 1_048_576,
        max_output_tokens: 65_536,
        price_input: 0.3,
        price_output: 2.5,
        regions: GEMINI_REGIONS,
    },
    ModelSpec {
        id: "gemini-2.0-flash",
        display_name: "Gemini 2.0 Flash",
        provider: Provider::Google,
        context_window: 1_048_576,
        max_output_tokens: 8_192,
        price_input: 0.1,
        price_output: 0.4,
        regions: &["us-central1", "europe-west1"],
    },
    ModelSpec {
        id: "imagen-3.0-generate-002",
        display_name: "Imagen 3",
        provider: Provider::Imagen,
        context_window: 480,
        max_output_tokens: 0,
        price_input: 0.0,
        price_output: 0.04,
        regions: IMAGEN_REGIONS,
    },
    ModelSpec {
        id: "imagen-4.0-generate-001",
        display_name: "Imagen 4",
        provider: Provider::Imagen,
        context_window: 480,
        max_output_tokens: 0,
        price_input: 0.0,
        price_output: 0.04,
        regions: IMAGEN_REGIONS,
    },
];

/// Compiled-in alias table. Config aliases are layered on top and win.
///
/// "sonnet" pins to the @20250929 revision; the @20250514 revision stays
/// reachable through "sonnet-4" and its full id.
pub static BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("opus", "claude-opus-4-1@20250805"),
    ("sonnet", "claude-sonnet-4-5@20250929"),
    ("sonnet-4-5", "claude-sonnet-4-5@20250929"),
    ("sonnet-4", "claude-sonnet-4@20250514"),
    ("haiku", "claude-haiku-4-5@20251001"),
    ("haiku-3-5", "claude-3-5-haiku@20241022"),
    ("pro", "gemini-2.5-pro"),
    ("flash", "gemini-2.5-flash"),
    ("gemini-pro", "gemini-2.5-pro"),
    ("gemini-flash", "gemini-2.5-flash"),
    ("imagen", "imagen-3.0-generate-002"),
];

pub fn catalog_get(id: &str) -> Option<&'static ModelSpec> {
    CATALOG.iter().find(|m| m.id == id)
}

/// Outcome of model resolution.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub canonical: String,
    pub provider: Provider,
    pub spec: Option<&'static ModelSpec>,
}

/// Resolve an inbound model string to a canonical id and provider.
///
/// Order: config/builtin alias substitution, exact catalog lookup, then a
/// `claude-` prefix match against the catalog (catalog order breaks ties).
/// Anything else passes through as an Anthropic model with a warning at the
/// call site.
pub fn resolve(input: &str, aliases: &[(String, String)]) -> Resolved {
    let substituted = aliases
        .iter()
        .find(|(from, _)| from == input)
        .map(|(_, to)| to.as_str())
        .or_else(|| {
            BUILTIN_ALIASES
                .iter()
                .find(|(from, _)| *from == input)
                .map(|(_, to)| *to)
        })
        .unwrap_or(input);

    if let Some(spec) = catalog_get(substituted) {
        return Resolved {
            canonical: spec.id.to_string(),
            provider: spec.provider,
            spec: Some(spec),
        };
    }

    // Undated Claude ids match the first catalog entry sharing the prefix.
    if substituted.starts_with("claude-") && !substituted.contains('@') {
        if let Some(spec) = CATALOG.iter().find(|m| m.id.starts_with(substituted)) {
            return Resolved {
                canonical: spec.id.to_string(),
                provider: spec.provider,
                spec: Some(spec),
            };
        }
    }

    Resolved {
        canonical: substituted.to_string(),
        provider: Provider::Anthropic,
        spec: None,
    }
}
