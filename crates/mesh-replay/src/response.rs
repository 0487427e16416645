//! Replay configuration and simulated generation

use chrono::{DateTime, Utc};
use mesh_core::{ComputationPath, ContentHash};
use serde::{Deserialize, Serialize};

/// Generation parameters resolved for one replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeterministicReplayConfig {
    /// Generation seed
    pub seed: u64,
    /// Sampling temperature; zero on the critical path
    pub temperature: f64,
    /// Token budget
    pub max_tokens: u32,
    /// Hash of the replayed input
    pub context_hash: ContentHash,
    /// When the config was resolved
    pub created_at: DateTime<Utc>,
    /// Path the config was resolved for
    pub path: ComputationPath,
}

/// Output of one replay
///
/// `content` and `hash` depend only on `(input, seed, temperature)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResponse {
    /// Response body
    pub content: String,
    /// Content hash of `(input, seed, temperature)`
    pub hash: ContentHash,
    /// Seed used
    pub seed: u64,
    /// Temperature used
    pub temperature: f64,
    /// Token budget of the config
    pub max_tokens: u32,
}

impl ReplayResponse {
    /// Generate the response for `input` under `config`
    #[must_use]
    pub fn generate(input: &str, config: &DeterministicReplayConfig) -> Self {
        let hash = ContentHash::of_parts(&[
            input.as_bytes(),
            &config.seed.to_le_bytes(),
            &config.temperature.to_bits().to_le_bytes(),
        ]);
        let content = format!(
            "response:{hash}:seed={}:temperature={}",
            config.seed, config.temperature
        );
        Self {
            content,
            hash,
            seed: config.seed,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(seed: u64, temperature: f64) -> DeterministicReplayConfig {
        DeterministicReplayConfig {
            seed,
            temperature,
            max_tokens: 1_000,
            context_hash: ContentHash::compute(b"ignored"),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            path: ComputationPath::Critical,
        }
    }

    #[test]
    fn same_inputs_same_bytes() {
        let a = ReplayResponse::generate("plan route", &config(7, 0.0));
        let mut later = config(7, 0.0);
        later.created_at = DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::hours(1);
        let b = ReplayResponse::generate("plan route", &later);
        assert_eq!(a.content, b.content);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn content_echoes_parameters() {
        let response = ReplayResponse::generate("plan route", &config(7, 0.0));
        assert!(response.content.starts_with(&format!("response:{}", response.hash)));
        assert!(response.content.ends_with(":seed=7:temperature=0"));
    }

    #[test]
    fn each_parameter_changes_the_hash() {
        let base = ReplayResponse::generate("plan route", &config(7, 0.0)).hash;
        assert_ne!(base, ReplayResponse::generate("plan routes", &config(7, 0.0)).hash);
        assert_ne!(base, ReplayResponse::generate("plan route", &config(8, 0.0)).hash);
        assert_ne!(base, ReplayResponse::generate("plan route", &config(7, 0.7)).hash);
    }
}
