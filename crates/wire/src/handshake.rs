//! Feature negotiation for the session handshake.

use parley_events::features;
use serde::{Deserialize, Serialize};

/// Optional stream features. A peer that never sends a handshake gets none.
///
/// Fields missing from a config file are enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet {
    #[serde(default = "enabled")]
    pub binary_audio: bool,
    #[serde(default = "enabled")]
    pub batching: bool,
}

fn enabled() -> bool {
    true
}

impl FeatureSet {
    pub fn all() -> Self {
        Self {
            binary_audio: true,
            batching: true,
        }
    }

    /// Parse declared feature names; unknown names are ignored.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut set = Self::default();
        for name in names {
            match name.as_ref() {
                features::BINARY_AUDIO => set.binary_audio = true,
                features::BATCHING => set.batching = true,
                other => tracing::debug!(feature = other, "Ignoring unknown feature"),
            }
        }
        set
    }

    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if self.binary_audio {
            names.push(features::BINARY_AUDIO.to_string());
        }
        if self.batching {
            names.push(features::BATCHING.to_string());
        }
        names
    }
}

/// Features both sides support.
pub fn negotiate(client: &FeatureSet, server: &FeatureSet) -> FeatureSet {
    FeatureSet {
        binary_audio: client.binary_audio && server.binary_audio,
        batching: client.batching && server.batching,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_other_features() {
        let set: FeatureSet = serde_json::from_str(r#"{ "batching": false }"#).unwrap();
        assert_eq!(
            set,
            FeatureSet {
                binary_audio: true,
                batching: false,
            }
        );
        let set: FeatureSet = serde_json::from_str("{}").unwrap();
        assert_eq!(set, FeatureSet::all());
    }

    #[test]
    fn test_from_names() {
        let set = FeatureSet::from_names(&["batching", "telepathy"]);
        assert!(set.batching);
        assert!(!set.binary_audio);
    }

    #[test]
    fn test_negotiate_is_intersection() {
        let client = FeatureSet::from_names(&["binary_audio", "batching"]);
        let server = FeatureSet {
            binary_audio: true,
            batching: false,
        };
        let agreed = negotiate(&client, &server);
        assert_eq!(agreed.names(), vec!["binary_audio".to_string()]);
    }

    #[test]
    fn test_no_handshake_means_no_features() {
        assert_eq!(FeatureSet::default().names(), Vec::<String>::new());
    }
}
