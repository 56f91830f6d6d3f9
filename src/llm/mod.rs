//! Ollama client and the backend abstraction for structured generation.
//!
//! Every component in the cascade consumes exactly one capability: submit a
//! prompt, receive text that should contain a JSON payload, or fail. That
//! capability is the [`TextGenerator`] trait; [`OllamaClient`] is the
//! production implementation over the Ollama REST API. Tests substitute a
//! scripted generator so no component is coupled to a live model.

use miette::Diagnostic;
use thiserror::Error;

/// Errors from the generation backend.
#[derive(Debug, Error, Diagnostic)]
pub enum LlmError {
    #[error("Ollama is not available at {url}")]
    #[diagnostic(
        code(ripple::llm::unavailable),
        help("Start Ollama with `ollama serve`, or point --url at a running instance.")
    )]
    Unavailable { url: String },

    #[error("backend request failed: {message}")]
    #[diagnostic(
        code(ripple::llm::request_failed),
        help("Check that Ollama is running and the model is pulled.")
    )]
    RequestFailed { message: String },

    #[error("failed to parse backend response: {message}")]
    #[diagnostic(
        code(ripple::llm::parse_error),
        help("The model returned an unexpected response format.")
    )]
    ParseError { message: String },

    #[error("no JSON object found in backend output")]
    #[diagnostic(
        code(ripple::llm::no_json),
        help("The model answered in prose instead of JSON. Retrying usually resolves this.")
    )]
    NoJson,

    #[error("failed to pull model \"{model}\": {message}")]
    #[diagnostic(
        code(ripple::llm::model_pull),
        help("Check your internet connection or manually run: ollama pull {model}")
    )]
    ModelPull { model: String, message: String },
}

/// Configuration for the Ollama client.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Base URL for the Ollama API.
    pub base_url: String,
    /// Model name to use.
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "llama3.2".into(),
            timeout_secs: 180,
        }
    }
}

/// The single capability the cascade consumes from a model backend.
///
/// Implementations must be side-effect free with respect to cascade state:
/// all context arrives in the prompt, all output leaves in the return value.
pub trait TextGenerator {
    /// Generate a completion for `prompt`, with an optional system prompt.
    fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError>;
}

/// Client for the Ollama REST API.
pub struct OllamaClient {
    config: OllamaConfig,
    available: bool,
    /// Models available locally after `probe()`.
    available_models: Vec<String>,
}

impl OllamaClient {
    /// Create a new Ollama client with the given configuration.
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            config,
            available: false,
            available_models: Vec::new(),
        }
    }

    /// Probe the Ollama server to check availability.
    ///
    /// Sends a lightweight request to the `/api/tags` endpoint and
    /// parses the list of locally available models.
    pub fn probe(&mut self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(5))
            .build();

        match agent.get(&url).call() {
            Ok(resp) => {
                if resp.status() != 200 {
                    self.available = false;
                    return false;
                }
                self.available = true;

                if let Ok(body) = resp.into_string() {
                    if let Ok(json) = serde_json::from_str::<serde_json::Value>(&body) {
                        self.available_models = json["models"]
                            .as_array()
                            .map(|arr| {
                                arr.iter()
                                    .filter_map(|m| m["name"].as_str().map(|s| s.to_string()))
                                    .collect()
                            })
                            .unwrap_or_default();
                    }
                }

                true
            }
            Err(_) => {
                self.available = false;
                self.available_models.clear();
                false
            }
        }
    }

    /// Whether the configured model is locally available.
    pub fn has_model(&self) -> bool {
        let target = &self.config.model;
        self.available_models
            .iter()
            .any(|m| m == target || m.split(':').next() == Some(target))
    }

    /// Ensure the configured model is available, pulling it if necessary.
    ///
    /// Call this after `probe()` returns true, before starting a cascade.
    pub fn ensure_model(&mut self) -> Result<(), LlmError> {
        if !self.available {
            return Err(LlmError::Unavailable {
                url: self.config.base_url.clone(),
            });
        }

        if self.has_model() {
            return Ok(());
        }

        eprintln!(
            "Pulling model '{}'... this may take a few minutes.",
            self.config.model
        );

        let url = format!("{}/api/pull", self.config.base_url);
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(600)) // pulls can be slow
            .build();

        let body = serde_json::json!({
            "name": self.config.model,
            "stream": false,
        });

        let body_str = serde_json::to_string(&body).map_err(|e| LlmError::ModelPull {
            model: self.config.model.clone(),
            message: format!("JSON serialize error: {e}"),
        })?;

        let resp = agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_string(&body_str)
            .map_err(|e: ureq::Error| LlmError::ModelPull {
                model: self.config.model.clone(),
                message: e.to_string(),
            })?;

        if resp.status() == 200 {
            // Re-probe to refresh the model list.
            self.probe();
            Ok(())
        } else {
            Err(LlmError::ModelPull {
                model: self.config.model.clone(),
                message: format!("server returned status {}", resp.status()),
            })
        }
    }

    /// Whether the Ollama server is available.
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Get the model name being used.
    pub fn model(&self) -> &str {
        &self.config.model
    }
}

impl TextGenerator for OllamaClient {
    fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError> {
        if !self.available {
            return Err(LlmError::Unavailable {
                url: self.config.base_url.clone(),
            });
        }

        let url = format!("{}/api/generate", self.config.base_url);
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(self.config.timeout_secs))
            .build();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
        });

        if let Some(sys) = system {
            body["system"] = serde_json::Value::String(sys.to_string());
        }

        let body_str = serde_json::to_string(&body).map_err(|e| LlmError::RequestFailed {
            message: format!("JSON serialize error: {e}"),
        })?;

        let resp = agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_string(&body_str)
            .map_err(|e: ureq::Error| LlmError::RequestFailed {
                message: e.to_string(),
            })?;

        let resp_str = resp.into_string().map_err(|e| LlmError::ParseError {
            message: e.to_string(),
        })?;

        let json: serde_json::Value =
            serde_json::from_str(&resp_str).map_err(|e| LlmError::ParseError {
                message: e.to_string(),
            })?;

        json["response"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::ParseError {
                message: "missing 'response' field".into(),
            })
    }
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("available", &self.available)
            .finish()
    }
}

/// Slice the first balanced-looking JSON object out of model output.
///
/// Models frequently wrap JSON in prose or code fences; the payload is
/// whatever sits between the first `{` and the last `}`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end > start {
        Some(&trimmed[start..=end])
    } else {
        None
    }
}

/// Run one generation and parse the response into a JSON object value.
///
/// This is the structured-request/structured-response boundary every cascade
/// component goes through; nothing unparsed flows past it.
pub fn generate_object(
    backend: &dyn TextGenerator,
    prompt: &str,
    system: Option<&str>,
) -> Result<serde_json::Value, LlmError> {
    let response = backend.generate(prompt, system)?;
    let json_str = extract_json_object(&response).ok_or(LlmError::NoJson)?;
    let value: serde_json::Value =
        serde_json::from_str(json_str).map_err(|e| LlmError::ParseError {
            message: format!("JSON parse error: {e}"),
        })?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(LlmError::ParseError {
            message: "backend payload is not a JSON object".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl TextGenerator for Fixed {
        fn generate(&self, _prompt: &str, _system: Option<&str>) -> Result<String, LlmError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn probe_unreachable_returns_false() {
        let config = OllamaConfig {
            base_url: "http://127.0.0.1:1".into(), // unreachable port
            ..Default::default()
        };
        let mut client = OllamaClient::new(config);
        assert!(!client.probe());
        assert!(!client.is_available());
    }

    #[test]
    fn generate_when_unavailable_returns_error() {
        let client = OllamaClient::new(OllamaConfig::default());
        let result = client.generate("test", None);
        assert!(result.is_err());
    }

    #[test]
    fn extract_json_from_fenced_output() {
        let text = "Here is the model:\n```json\n{\"stocks\": []}\n```\nDone.";
        assert_eq!(extract_json_object(text), Some("{\"stocks\": []}"));
    }

    #[test]
    fn extract_json_bare_object() {
        assert_eq!(extract_json_object("  {\"a\": 1}  "), Some("{\"a\": 1}"));
    }

    #[test]
    fn extract_json_none_when_absent() {
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[test]
    fn generate_object_rejects_prose() {
        let err = generate_object(&Fixed("just words"), "p", None).unwrap_err();
        assert!(matches!(err, LlmError::NoJson));
    }

    #[test]
    fn generate_object_parses_wrapped_payload() {
        let value = generate_object(&Fixed("answer: {\"x\": \"y\"} ok"), "p", None).unwrap();
        assert_eq!(value["x"], "y");
    }

    #[test]
    fn default_config_values() {
        let config = OllamaConfig::default();
        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.model, "llama3.2");
        assert_eq!(config.timeout_secs, 180);
    }
}
