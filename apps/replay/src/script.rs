//! Replay script format.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    /// Generator replies keyed by a keyword the prompt must contain.
    #[serde(default)]
    pub replies: BTreeMap<String, String>,
    #[serde(default = "default_fallback")]
    pub fallback: String,
    /// Features to request in the handshake. No handshake when absent.
    #[serde(default)]
    pub features: Option<Vec<String>>,
    pub steps: Vec<Step>,
}

fn default_fallback() -> String {
    "Sorry, I did not catch that.".to_string()
}

/// One client or STT event, `at_ms` after the replay starts.
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Transcript {
        text: String,
        #[serde(default)]
        is_final: bool,
    },
    Speech {
        confidence: f32,
        duration_ms: u64,
    },
    PlaybackProgress {
        spoken_chars: usize,
    },
    PlaybackComplete,
}

impl Script {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading script {}", path.display()))?;
        let script: Script = serde_json::from_str(&content)
            .with_context(|| format!("parsing script {}", path.display()))?;
        script.validate()?;
        Ok(script)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.steps.is_empty() {
            bail!("script has no steps");
        }
        if self.steps.windows(2).any(|w| w[1].at_ms < w[0].at_ms) {
            bail!("script steps must be ordered by at_ms");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_steps() {
        let script: Script = serde_json::from_str(
            r#"{
                "replies": { "weather": "Sunny." },
                "steps": [
                    { "at_ms": 0, "kind": "transcript", "text": "What's the" },
                    { "at_ms": 900, "kind": "transcript", "text": "What's the weather?", "is_final": true },
                    { "at_ms": 1500, "kind": "speech", "confidence": 0.9, "duration_ms": 300 },
                    { "at_ms": 2000, "kind": "playback_complete" }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(script.steps.len(), 4);
        assert!(script.features.is_none());
        assert!(matches!(
            script.steps[1].action,
            Action::Transcript { is_final: true, .. }
        ));
        assert!(matches!(script.steps[3].action, Action::PlaybackComplete));
        assert!(script.validate().is_ok());
    }

    #[test]
    fn test_unordered_steps_rejected() {
        let script: Script = serde_json::from_str(
            r#"{ "steps": [
                { "at_ms": 500, "kind": "playback_complete" },
                { "at_ms": 100, "kind": "playback_complete" }
            ] }"#,
        )
        .unwrap();
        assert!(script.validate().is_err());
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "not json").unwrap();
        let err = Script::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.json"));
    }
}
