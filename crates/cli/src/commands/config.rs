use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use feedloop_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key_path: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

pub fn run(config_path: Option<PathBuf>) -> String {
    let require_file = config_path.is_some();
    let options = LoadOptions { config_path: config_path.clone(), require_file, ..LoadOptions::default() };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = config_path.or_else(detect_config_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    let fields = [
        Field {
            key_path: "llm.provider",
            value: format!("{:?}", config.llm.provider).to_lowercase(),
            env_keys: &["FEEDLOOP_LLM_PROVIDER"],
        },
        Field {
            key_path: "llm.model",
            value: config.llm.model.clone(),
            env_keys: &["FEEDLOOP_LLM_MODEL"],
        },
        Field {
            key_path: "llm.base_url",
            value: config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            env_keys: &["FEEDLOOP_LLM_BASE_URL"],
        },
        Field {
            key_path: "llm.api_key",
            value: api_key.to_string(),
            env_keys: &["FEEDLOOP_LLM_API_KEY", "GEMINI_API_KEY"],
        },
        Field {
            key_path: "llm.temperature",
            value: config.llm.temperature.to_string(),
            env_keys: &["FEEDLOOP_LLM_TEMPERATURE"],
        },
        Field {
            key_path: "llm.timeout_secs",
            value: config.llm.timeout_secs.to_string(),
            env_keys: &["FEEDLOOP_LLM_TIMEOUT_SECS"],
        },
        Field {
            key_path: "llm.max_retries",
            value: config.llm.max_retries.to_string(),
            env_keys: &["FEEDLOOP_LLM_MAX_RETRIES"],
        },
        Field {
            key_path: "agent.max_iterations",
            value: config.agent.max_iterations.to_string(),
            env_keys: &["FEEDLOOP_AGENT_MAX_ITERATIONS"],
        },
        Field {
            key_path: "agent.default_framework",
            value: config.agent.default_framework.to_string(),
            env_keys: &["FEEDLOOP_AGENT_DEFAULT_FRAMEWORK"],
        },
        Field {
            key_path: "agent.interactive_scoring",
            value: config.agent.interactive_scoring.to_string(),
            env_keys: &["FEEDLOOP_AGENT_INTERACTIVE_SCORING"],
        },
        Field {
            key_path: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["FEEDLOOP_LOGGING_LEVEL", "FEEDLOOP_LOG_LEVEL"],
        },
        Field {
            key_path: "logging.format",
            value: format!("{:?}", config.logging.format).to_lowercase(),
            env_keys: &["FEEDLOOP_LOGGING_FORMAT", "FEEDLOOP_LOG_FORMAT"],
        },
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in &fields {
        let source = field_source(
            field.key_path,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key_path, &field.value, source));
    }
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    ["feedloop.toml", "config/feedloop.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
