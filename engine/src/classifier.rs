//! Logical endpoint keys and their cooldowns.
//!
//! A key is the lowercased host followed by the request path with volatile parts
//! replaced by placeholders:
//! - purely numeric segments become `{id}`
//! - runs of exactly 32 hex digits become `{hash}`, the rest of the segment is kept
//!
//! `/v1/users/123/friends` and `/v1/users/456/friends` share a key, so they share
//! rotation and cooldown state. The query string is not part of the key.

use crate::config::{EndpointPatternConfig, ValidationError};
use regex::Regex;
use routing::{Rule, Rules};
use std::sync::LazyLock;
use std::time::Duration;

pub const ID_PLACEHOLDER: &str = "{id}";
pub const HASH_PLACEHOLDER: &str = "{hash}";

const HASH_LEN: usize = 32;

static HEX_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[0-9a-fA-F]+").expect("hex run pattern compiles"));

pub struct EndpointClassifier {
    rules: Rules<Duration>,
    default_cooldown: Duration,
}

impl EndpointClassifier {
    pub fn new(
        patterns: &[EndpointPatternConfig],
        default_cooldown: Duration,
    ) -> Result<Self, ValidationError> {
        let rules = patterns
            .iter()
            .map(|p| Ok(Rule::new(p.template()?, p.cooldown())))
            .collect::<Result<Vec<_>, ValidationError>>()?;

        Ok(EndpointClassifier {
            rules: Rules::new(rules),
            default_cooldown,
        })
    }

    pub fn normalize(host: &str, path: &str) -> String {
        let mut key = host.trim().trim_end_matches('.').to_ascii_lowercase();

        let segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(normalize_segment)
            .collect();

        if segments.is_empty() {
            key.push('/');
        }
        for segment in segments {
            key.push('/');
            key.push_str(&segment);
        }
        key
    }

    /// Cooldown of the first pattern matching the key, the default otherwise.
    pub fn cooldown_for(&self, key: &str) -> Duration {
        self.rules
            .first_match(key)
            .copied()
            .unwrap_or(self.default_cooldown)
    }

    pub fn classify(&self, host: &str, path: &str) -> (String, Duration) {
        let key = Self::normalize(host, path);
        let cooldown = self.cooldown_for(&key);
        (key, cooldown)
    }
}

fn normalize_segment(segment: &str) -> String {
    if segment.bytes().all(|b| b.is_ascii_digit()) {
        return ID_PLACEHOLDER.to_string();
    }
    HEX_RUN
        .replace_all(segment, |caps: &regex::Captures<'_>| {
            if caps[0].len() == HASH_LEN {
                HASH_PLACEHOLDER.to_string()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0123456789abcdef0123456789ABCDEF";

    fn classifier() -> EndpointClassifier {
        let patterns = vec![
            EndpointPatternConfig {
                pattern: "users.roblox.com/v1/users/{id}/friends".into(),
                cooldown_secs: 30,
            },
            EndpointPatternConfig {
                pattern: "users.roblox.com/v1/users/*".into(),
                cooldown_secs: 10,
            },
            EndpointPatternConfig {
                pattern: "*.rbxcdn.com".into(),
                cooldown_secs: 1,
            },
        ];
        EndpointClassifier::new(&patterns, Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_numeric_segments() {
        let a = EndpointClassifier::normalize("users.roblox.com", "/users/111/friends/222");
        let b = EndpointClassifier::normalize("users.roblox.com", "/users/333/friends/444");
        assert_eq!(a, "users.roblox.com/users/{id}/friends/{id}");
        assert_eq!(a, b);

        let c = EndpointClassifier::normalize("users.roblox.com", "/users/abc/friends/222");
        assert_eq!(c, "users.roblox.com/users/abc/friends/{id}");
        assert_ne!(a, c);
    }

    #[test]
    fn test_hash_segments_keep_surrounding_text() {
        let key = EndpointClassifier::normalize(
            "tr.rbxcdn.com",
            &format!("/30DAY-Avatar-{HASH}-Png/420/420/Avatar/Png"),
        );
        assert_eq!(key, "tr.rbxcdn.com/30DAY-Avatar-{hash}-Png/{id}/{id}/Avatar/Png");

        let other = EndpointClassifier::normalize(
            "tr.rbxcdn.com",
            "/30DAY-Avatar-ffffffffffffffffffffffffffffffff-Png/420/420/Avatar/Png",
        );
        assert_eq!(key, other);

        // a bare hash segment
        let key = EndpointClassifier::normalize("t0.rbxcdn.com", &format!("/{HASH}"));
        assert_eq!(key, "t0.rbxcdn.com/{hash}");

        // 31 and 33 hex digits are not hashes
        let short = &HASH[..31];
        let key = EndpointClassifier::normalize("t0.rbxcdn.com", &format!("/{short}"));
        assert_eq!(key, format!("t0.rbxcdn.com/{short}"));
        let long = format!("{HASH}a");
        let key = EndpointClassifier::normalize("t0.rbxcdn.com", &format!("/{long}"));
        assert_eq!(key, format!("t0.rbxcdn.com/{long}"));
    }

    #[test]
    fn test_host_and_empty_path() {
        assert_eq!(
            EndpointClassifier::normalize("API.Example.COM.", ""),
            "api.example.com/"
        );
        assert_eq!(
            EndpointClassifier::normalize("api.example.com", "//v1//users/"),
            "api.example.com/v1/users"
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let avatar = format!("/30DAY-Avatar-{HASH}-Png/150/150");
        let inputs = [
            ("users.roblox.com", "/v1/users/1234/friends"),
            ("tr.rbxcdn.com", avatar.as_str()),
            ("Games.Roblox.com", "/v2/games/99/servers/Public?cursor=abc"),
            ("api.example.com", "/"),
        ];
        for (host, path) in inputs {
            let once = EndpointClassifier::normalize(host, path);
            let (normalized_host, normalized_path) = routing::split_key(&once);
            let twice =
                EndpointClassifier::normalize(normalized_host, normalized_path.unwrap_or("/"));
            assert_eq!(once, twice, "normalize is not idempotent for {host}{path}");
        }
    }

    #[test]
    fn test_cooldown_first_match_wins() {
        let classifier = classifier();

        let (key, cooldown) = classifier.classify("users.roblox.com", "/v1/users/42/friends");
        assert_eq!(key, "users.roblox.com/v1/users/{id}/friends");
        assert_eq!(cooldown, Duration::from_secs(30));

        let (_, cooldown) = classifier.classify("users.roblox.com", "/v1/users/42");
        assert_eq!(cooldown, Duration::from_secs(10));

        let (_, cooldown) = classifier.classify("tr.rbxcdn.com", &format!("/{HASH}"));
        assert_eq!(cooldown, Duration::from_secs(1));

        // no pattern matches
        assert_eq!(
            classifier.cooldown_for("games.roblox.com/v1/games"),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_invalid_pattern() {
        let patterns = vec![EndpointPatternConfig {
            pattern: "/v1/users".into(),
            cooldown_secs: 1,
        }];
        assert!(matches!(
            EndpointClassifier::new(&patterns, Duration::ZERO),
            Err(ValidationError::InvalidPattern { .. })
        ));
    }
}
