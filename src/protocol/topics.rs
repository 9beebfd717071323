//! Topic names, the root namespace rule, and subscription pattern matching
//!
//! Application topics live under a fixed root segment; topics in the reserved
//! `$SYS` diagnostics namespace pass through unprefixed. Subscription
//! patterns use MQTT wildcards: `+` matches exactly one path segment, `#`
//! matches zero or more trailing segments, and a `$`-prefixed segment is
//! matched literally.

use regex::Regex;
use thiserror::Error;

/// Root segment prepended to every application-level topic
pub const TOPIC_ROOT: &str = "moquette";
const ROOT_PREFIX: &str = "moquette/";

/// Reserved diagnostics namespace; never gets the root prefix
pub const SYS_PREFIX: &str = "$SYS";

// Topics handled by the monitor client
pub const TOPIC_SYS: &str = "$SYS/#";
pub const TOPIC_HEARTBEAT: &str = "heartbeat";
pub const TOPIC_LATENCY: &str = "latency";
pub const TOPIC_LATENCY_STATISTICS: &str = "latencystatistics";

// $SYS topics published by the broker loop
pub const SYS_TOPIC_CLIENTS_CONNECTED: &str = "$SYS/broker/clients/connected";
pub const SYS_TOPIC_TIME: &str = "$SYS/broker/time";
pub const SYS_TOPIC_UPTIME: &str = "$SYS/broker/uptime";

/// Pattern compilation errors
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("Invalid topic pattern '{pattern}': {source}")]
    Compile {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Prefix an application topic with the root segment. `$SYS` topics pass
/// through unmodified; the check is an exact prefix test.
pub fn add_root_topic(topic: &str) -> String {
    if topic.starts_with(SYS_PREFIX) {
        topic.to_string()
    } else {
        format!("{TOPIC_ROOT}/{topic}")
    }
}

/// Strip the root segment from an inbound topic before dispatch. Topics
/// outside the root namespace (notably `$SYS/...`) come back unchanged.
pub fn remove_root_topic(topic: &str) -> &str {
    topic.strip_prefix(ROOT_PREFIX).unwrap_or(topic)
}

/// A subscription pattern compiled to a full-string matcher.
///
/// Matching is a pure predicate over concrete topic strings.
#[derive(Debug, Clone)]
pub struct TopicPattern {
    pattern: String,
    matcher: Regex,
}

impl TopicPattern {
    /// Compile a subscription pattern.
    ///
    /// Substitution order matters: `$` is escaped before the wildcard
    /// replacements so the replacement regex fragments are not re-escaped.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let escaped = pattern.replace('$', "\\$").replace('+', "[^/]+");
        let body = if escaped == "#" {
            ".*".to_string()
        } else if let Some(prefix) = escaped.strip_suffix("/#") {
            // `#` also matches the parent topic itself (zero segments)
            format!("{prefix}(/.+)?")
        } else {
            escaped.replace('#', ".+")
        };

        let matcher =
            Regex::new(&format!("^{body}$")).map_err(|source| PatternError::Compile {
                pattern: pattern.to_string(),
                source,
            })?;

        Ok(Self {
            pattern: pattern.to_string(),
            matcher,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Full-string match against a concrete topic
    pub fn matches(&self, topic: &str) -> bool {
        self.matcher.is_match(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_root_topic_added() {
        assert_eq!(add_root_topic("heartbeat"), "moquette/heartbeat");
        assert_eq!(add_root_topic("latency"), "moquette/latency");
    }

    #[test]
    fn test_sys_topics_pass_through() {
        assert_eq!(
            add_root_topic("$SYS/broker/clients/connected"),
            "$SYS/broker/clients/connected"
        );
        assert_eq!(add_root_topic("$SYS/#"), "$SYS/#");
    }

    #[test]
    fn test_remove_root_topic() {
        assert_eq!(remove_root_topic("moquette/heartbeat"), "heartbeat");
        assert_eq!(remove_root_topic("$SYS/broker/time"), "$SYS/broker/time");
        // Exact prefix only, not substring removal
        assert_eq!(remove_root_topic("other/moquette/x"), "other/moquette/x");
    }

    #[test]
    fn test_literal_pattern_full_string_match() {
        let pattern = TopicPattern::compile("heartbeat").unwrap();
        assert!(pattern.matches("heartbeat"));
        assert!(!pattern.matches("heartbeats"));
        assert!(!pattern.matches("a/heartbeat"));
        assert!(!pattern.matches("heartbeat/extra"));
    }

    #[test]
    fn test_single_level_wildcard() {
        let pattern = TopicPattern::compile("root/+/mytopic").unwrap();
        assert!(pattern.matches("root/a/mytopic"));
        assert!(pattern.matches("root/anything/mytopic"));
        assert!(!pattern.matches("root/a/b/mytopic"));
        assert!(!pattern.matches("root/mytopic"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        let pattern = TopicPattern::compile("root/#").unwrap();
        assert!(pattern.matches("root/a"));
        assert!(pattern.matches("root/a/b/c"));
        // Zero trailing segments: the parent itself matches
        assert!(pattern.matches("root"));
        assert!(!pattern.matches("roots/a"));
    }

    #[test]
    fn test_sys_pattern_matches_literally() {
        let pattern = TopicPattern::compile("$SYS/#").unwrap();
        assert!(pattern.matches("$SYS/broker/clients/connected"));
        assert!(pattern.matches("$SYS/broker/uptime"));
        assert!(!pattern.matches("SYS/broker/uptime"));
        assert!(!pattern.matches("xSYS/broker/uptime"));
    }

    proptest! {
        #[test]
        fn literal_patterns_match_themselves(topic in "[a-z0-9_]{1,8}(/[a-z0-9_]{1,8}){0,4}") {
            let pattern = TopicPattern::compile(&topic).unwrap();
            prop_assert!(pattern.matches(&topic));
        }

        #[test]
        fn plus_never_crosses_segments(tail in "[a-z]{1,6}/[a-z]{1,6}") {
            let pattern = TopicPattern::compile("root/+").unwrap();
            let topic = format!("root/{}", tail);
            prop_assert!(!pattern.matches(&topic));
        }

        #[test]
        fn hash_accepts_any_depth(tail in "[a-z]{1,6}(/[a-z]{1,6}){0,5}") {
            let pattern = TopicPattern::compile("root/#").unwrap();
            let topic = format!("root/{}", tail);
            prop_assert!(pattern.matches(&topic));
        }
    }
}
