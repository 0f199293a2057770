//! Configuration management

use std::str::FromStr;
use std::time::Duration;

use crate::agent::StepError;
use crate::hallucination::HallucinationChecker;
use crate::llm::{AnthropicGenerator, DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use crate::policy::{FinalMarker, MAX_ITERATIONS, TrailingRounds};
use crate::repair::DEFAULT_MAX_ATTEMPTS;
use crate::runner::Runner;
use crate::tools::{DEFAULT_RESULTS_PER_QUERY, ExaSearch, ToolExecutor};

/// Runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Anthropic API key (required once a generator is built)
    pub anthropic_api_key: Option<String>,

    /// Exa API key (required once a search client is built)
    pub exa_api_key: Option<String>,

    /// Model name sent with every request
    pub model: String,

    /// Trailing assistant/tool rounds before the loop is cut
    pub max_iterations: usize,

    /// Generator calls per turn in the repair loop
    pub max_attempts: usize,

    /// Search hits kept per query
    pub search_results: usize,

    /// Timeout for model and search HTTP calls
    pub http_timeout: Duration,

    /// Completion budget per model call
    pub max_tokens: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            exa_api_key: None,
            model: DEFAULT_MODEL.to_string(),
            max_iterations: MAX_ITERATIONS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            search_results: DEFAULT_RESULTS_PER_QUERY,
            http_timeout: Duration::from_secs(30),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl Config {
    /// Load configuration from the environment, after reading `.env` if
    /// one exists.
    pub fn from_env() -> Result<Self, StepError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StepError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            exa_api_key: get("EXA_API_KEY"),
            model: get("REFLEX_MODEL").unwrap_or(defaults.model),
            max_iterations: parse_or(&get, "REFLEX_MAX_ITERATIONS", defaults.max_iterations)?,
            max_attempts: parse_or(&get, "REFLEX_MAX_ATTEMPTS", defaults.max_attempts)?,
            search_results: parse_or(&get, "REFLEX_SEARCH_RESULTS", defaults.search_results)?,
            http_timeout: Duration::from_secs(parse_or(
                &get,
                "REFLEX_HTTP_TIMEOUT_SECS",
                defaults.http_timeout.as_secs(),
            )?),
            max_tokens: parse_or(&get, "REFLEX_MAX_TOKENS", defaults.max_tokens)?,
        })
    }

    pub fn anthropic_api_key(&self) -> Result<&str, StepError> {
        self.anthropic_api_key
            .as_deref()
            .ok_or_else(|| StepError::invalid("ANTHROPIC_API_KEY is not set"))
    }

    pub fn exa_api_key(&self) -> Result<&str, StepError> {
        self.exa_api_key
            .as_deref()
            .ok_or_else(|| StepError::invalid("EXA_API_KEY is not set"))
    }

    pub fn generator(&self) -> Result<AnthropicGenerator, StepError> {
        Ok(AnthropicGenerator::new(self.anthropic_api_key()?)
            .with_model(&self.model)
            .with_max_tokens(self.max_tokens)
            .with_timeout(self.http_timeout))
    }

    pub fn search(&self) -> Result<ExaSearch, StepError> {
        Ok(ExaSearch::new(self.exa_api_key()?).with_timeout(self.http_timeout))
    }

    pub fn tool_executor(&self) -> Result<ToolExecutor, StepError> {
        Ok(ToolExecutor::new(self.search()?).with_results_per_query(self.search_results))
    }

    /// A runner bounded by `max_iterations` trailing rounds.
    pub fn runner(&self) -> Result<Runner, StepError> {
        Ok(Runner::new(self.generator()?, self.tool_executor()?)
            .with_policy(TrailingRounds {
                max: self.max_iterations,
            })
            .with_max_attempts(self.max_attempts))
    }

    pub fn hallucination_checker(&self) -> Result<HallucinationChecker, StepError> {
        let runner = Runner::new(self.generator()?, self.tool_executor()?)
            .with_policy(FinalMarker::new(TrailingRounds {
                max: self.max_iterations,
            }))
            .with_max_attempts(self.max_attempts);
        Ok(HallucinationChecker::with_runner(runner))
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, StepError>
where
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| StepError::invalid(format!("{key}={raw:?}: {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.search_results, 3);
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.max_tokens, 1024);
        assert_eq!(config.model, "claude-3-5-sonnet-20240620");
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("EXA_API_KEY", "exa"),
            ("REFLEX_MODEL", "claude-3-haiku-20240307"),
            ("REFLEX_MAX_ITERATIONS", "2"),
            ("REFLEX_HTTP_TIMEOUT_SECS", " 5 "),
        ]))
        .unwrap();

        assert_eq!(config.anthropic_api_key.as_deref(), Some("sk-ant"));
        assert_eq!(config.model, "claude-3-haiku-20240307");
        assert_eq!(config.max_iterations, 2);
        assert_eq!(config.http_timeout, Duration::from_secs(5));
    }

    #[test]
    fn bad_number_is_invalid() {
        let err = Config::from_lookup(lookup(&[("REFLEX_MAX_ATTEMPTS", "three")])).unwrap_err();
        assert!(matches!(err, StepError::Invalid(_)));
        assert!(err.to_string().contains("REFLEX_MAX_ATTEMPTS"));
    }

    #[test]
    fn empty_key_counts_as_unset() {
        let config = Config::from_lookup(lookup(&[("EXA_API_KEY", "  ")])).unwrap();
        assert_eq!(config.exa_api_key, None);
    }

    #[test]
    fn missing_keys_fail_only_when_clients_are_built() {
        let config = Config::from_lookup(lookup(&[("EXA_API_KEY", "exa")])).unwrap();
        assert!(config.search().is_ok());
        assert!(matches!(config.generator(), Err(StepError::Invalid(_))));
        assert!(config.runner().is_err());
    }

    #[test]
    fn generator_carries_the_model() {
        let config = Config::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("REFLEX_MODEL", "claude-3-opus-20240229"),
        ]))
        .unwrap();
        assert_eq!(config.generator().unwrap().model(), "claude-3-opus-20240229");
    }
}
