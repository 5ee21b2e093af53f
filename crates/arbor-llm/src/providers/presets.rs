use std::collections::HashMap;

/// A named provider preset for OpenAI-compatible APIs.
pub struct ProviderPreset {
    pub default_base_url: &'static str,
    pub needs_api_key: bool,
    pub extra_headers: &'static [(&'static str, &'static str)],
}

pub const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Look up a provider preset by name.
pub fn get_preset(provider: &str) -> Option<ProviderPreset> {
    match provider {
        "openai" => Some(ProviderPreset {
            default_base_url: OPENAI_API_URL,
            needs_api_key: true,
            extra_headers: &[],
        }),
        "openrouter" => Some(ProviderPreset {
            default_base_url: "https://openrouter.ai/api/v1/chat/completions",
            needs_api_key: true,
            extra_headers: &[("X-Title", "Arbor")],
        }),
        "ollama" => Some(ProviderPreset {
            default_base_url: "http://localhost:11434/v1/chat/completions",
            needs_api_key: false,
            extra_headers: &[],
        }),
        "groq" => Some(ProviderPreset {
            default_base_url: "https://api.groq.com/openai/v1/chat/completions",
            needs_api_key: true,
            extra_headers: &[],
        }),
        "together" => Some(ProviderPreset {
            default_base_url: "https://api.together.xyz/v1/chat/completions",
            needs_api_key: true,
            extra_headers: &[],
        }),
        "mistral" => Some(ProviderPreset {
            default_base_url: "https://api.mistral.ai/v1/chat/completions",
            needs_api_key: true,
            extra_headers: &[],
        }),
        "deepseek" => Some(ProviderPreset {
            default_base_url: "https://api.deepseek.com/v1/chat/completions",
            needs_api_key: true,
            extra_headers: &[],
        }),
        _ => None,
    }
}

/// Build extra headers from a preset + user config overrides.
pub fn build_extra_headers(
    preset: Option<&ProviderPreset>,
    user_headers: &HashMap<String, String>,
) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = preset
        .map(|p| p.extra_headers)
        .unwrap_or_default()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    for (k, v) in user_headers {
        // User overrides take precedence
        if let Some(pos) = headers.iter().position(|(hk, _)| hk.eq_ignore_ascii_case(k)) {
            headers[pos].1 = v.clone();
        } else {
            headers.push((k.clone(), v.clone()));
        }
    }

    headers
}

/// Endpoint for a provider: explicit base URL, else the preset's, else OpenAI's.
pub fn endpoint(provider: &str, base_url: Option<&str>) -> String {
    base_url
        .map(str::to_string)
        .or_else(|| get_preset(provider).map(|p| p.default_base_url.to_string()))
        .unwrap_or_else(|| OPENAI_API_URL.to_string())
}

/// List all known preset provider names.
pub fn all_preset_names() -> &'static [&'static str] {
    &["openai", "openrouter", "ollama", "groq", "together", "mistral", "deepseek"]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_listed_preset_resolves() {
        for name in all_preset_names() {
            assert!(get_preset(name).is_some(), "{name}");
        }
    }

    #[test]
    fn test_user_headers_override_preset() {
        let preset = get_preset("openrouter");
        let mut user = HashMap::new();
        user.insert("x-title".to_string(), "Custom".to_string());
        user.insert("HTTP-Referer".to_string(), "https://example.org".to_string());
        let headers = build_extra_headers(preset.as_ref(), &user);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0], ("X-Title".to_string(), "Custom".to_string()));
    }

    #[test]
    fn test_endpoint_resolution() {
        assert_eq!(
            endpoint("ollama", None),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(endpoint("ollama", Some("http://gpu:8000/v1")), "http://gpu:8000/v1");
        assert_eq!(endpoint("unknown", None), OPENAI_API_URL);
    }
}
