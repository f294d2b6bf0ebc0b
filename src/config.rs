use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address
    pub bind_addr: String,
    /// LLM provider configuration
    pub llm: LlmConfig,
    /// Web search provider configuration
    pub search: SearchConfig,
    /// When the answer request may start relative to source pacing
    pub chat_start: ChatStart,
    /// Abort the answer stream after this many seconds without a chunk
    pub chat_idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai"
    pub provider: String,
    /// Base URL for the LLM API
    pub base_url: String,
    /// Model name for both reformulation and answers
    pub chat_model: String,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
    /// Sampling temperature for the answer profile
    pub answer_temperature: f32,
    /// Sampling temperature for the reformulation profile
    pub reformulate_temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// "tavily" or "proxy" (any endpoint speaking `{query} -> {results}`)
    pub provider: String,
    /// Base URL of the search API
    pub base_url: String,
    /// Tavily API key
    pub api_key: Option<String>,
    pub search_depth: SearchDepth,
    pub max_results: usize,
    pub include_answer: bool,
    pub include_raw_content: bool,
    pub include_images: bool,
    /// Delay between successive results handed to the session
    pub pace_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchDepth {
    Basic,
    Advanced,
}

impl std::str::FromStr for SearchDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "advanced" => Ok(Self::Advanced),
            other => Err(format!("unknown search depth: {other}")),
        }
    }
}

/// Whether the answer request waits for paced sources to drain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatStart {
    /// Start the answer only after every result has been paced into the session.
    Drained,
    /// Start the answer as soon as the ranked list is known; pacing continues alongside.
    Immediate,
}

impl std::str::FromStr for ChatStart {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drained" => Ok(Self::Drained),
            "immediate" => Ok(Self::Immediate),
            other => Err(format!("unknown chat start policy: {other}")),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9000".to_string(),
            llm: LlmConfig::default(),
            search: SearchConfig::default(),
            chat_start: ChatStart::Drained,
            chat_idle_timeout_secs: 30,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            chat_model: "llama3.2".to_string(),
            api_key: None,
            answer_temperature: 0.7,
            reformulate_temperature: 0.3,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: "tavily".to_string(),
            base_url: "https://api.tavily.com".to_string(),
            api_key: None,
            search_depth: SearchDepth::Advanced,
            max_results: 5,
            include_answer: false,
            include_raw_content: false,
            include_images: false,
            pace_ms: 150,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("SEARCH_CHAT_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_CHAT_MODEL") {
            config.llm.chat_model = model;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }
        if let Some(v) = parse_env("LLM_ANSWER_TEMPERATURE") {
            config.llm.answer_temperature = v;
        }
        if let Some(v) = parse_env("LLM_REFORMULATE_TEMPERATURE") {
            config.llm.reformulate_temperature = v;
        }

        // Search config
        if let Ok(provider) = std::env::var("SEARCH_PROVIDER") {
            config.search.provider = provider;
        }
        if let Ok(url) = std::env::var("SEARCH_BASE_URL") {
            config.search.base_url = url;
        }
        if let Ok(key) = std::env::var("TAVILY_API_KEY") {
            config.search.api_key = Some(key);
        }
        if let Some(v) = parse_env("SEARCH_DEPTH") {
            config.search.search_depth = v;
        }
        if let Some(v) = parse_env("SEARCH_MAX_RESULTS") {
            config.search.max_results = v;
        }
        if let Some(v) = parse_flag("SEARCH_INCLUDE_ANSWER") {
            config.search.include_answer = v;
        }
        if let Some(v) = parse_flag("SEARCH_INCLUDE_RAW_CONTENT") {
            config.search.include_raw_content = v;
        }
        if let Some(v) = parse_flag("SEARCH_INCLUDE_IMAGES") {
            config.search.include_images = v;
        }
        if let Some(v) = parse_env("SEARCH_PACE_MS") {
            config.search.pace_ms = v;
        }

        if let Some(v) = parse_env("CHAT_START") {
            config.chat_start = v;
        }
        if let Some(v) = parse_env::<u64>("CHAT_IDLE_TIMEOUT_SECS") {
            config.chat_idle_timeout_secs = v.max(1);
        }

        config
    }
}

/// Read and parse an env var, ignoring it when missing or malformed.
fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {key}: {raw}");
            None
        }
    }
}

fn parse_flag(key: &str) -> Option<bool> {
    let raw = std::env::var(key).ok()?;
    parse_bool(&raw)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_search_contract() {
        let config = Config::default();
        assert_eq!(config.search.search_depth, SearchDepth::Advanced);
        assert_eq!(config.search.max_results, 5);
        assert!(!config.search.include_answer);
        assert!(!config.search.include_raw_content);
        assert!(!config.search.include_images);
        assert_eq!(config.search.pace_ms, 150);
        assert_eq!(config.chat_start, ChatStart::Drained);
    }

    #[test]
    fn test_reformulation_runs_cooler_than_answers() {
        let llm = LlmConfig::default();
        assert!(llm.reformulate_temperature < llm.answer_temperature);
    }

    #[test]
    fn test_parse_search_depth() {
        assert_eq!("basic".parse::<SearchDepth>().unwrap(), SearchDepth::Basic);
        assert_eq!(" ADVANCED ".parse::<SearchDepth>().unwrap(), SearchDepth::Advanced);
        assert!("deep".parse::<SearchDepth>().is_err());
    }

    #[test]
    fn test_parse_chat_start() {
        assert_eq!("drained".parse::<ChatStart>().unwrap(), ChatStart::Drained);
        assert_eq!("Immediate".parse::<ChatStart>().unwrap(), ChatStart::Immediate);
        assert!("eventually".parse::<ChatStart>().is_err());
    }

    #[test]
    fn test_parse_bool_variants() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("Off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_search_depth_serializes_lowercase() {
        let json = serde_json::to_value(SearchDepth::Advanced).unwrap();
        assert_eq!(json, "advanced");
    }
}
