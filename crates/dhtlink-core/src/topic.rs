//! Topic names, topic filters and wildcard matching.

use crate::error::{ProtocolError, Result};

/// Check if a topic matches a filter pattern.
///
/// Supports MQTT wildcards:
/// - `+` matches a single level
/// - `#` matches the parent level and any number of levels below it (must be last)
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    // MQTT-4.7.2-1: Topics starting with $ are not matched by wildcards at root level
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Validate a topic filter used in SUBSCRIBE.
pub fn validate_topic_filter(filter: &str) -> Result<()> {
    validate_common(filter)?;

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        if level.contains('#') && (level != "#" || levels.peek().is_some()) {
            return Err(invalid(filter, "'#' must occupy the last level on its own"));
        }
        if level.contains('+') && level != "+" {
            return Err(invalid(filter, "'+' must occupy a whole level"));
        }
    }
    Ok(())
}

/// Validate a topic name used in PUBLISH.
pub fn validate_topic_name(topic: &str) -> Result<()> {
    validate_common(topic)?;
    if topic.contains(&['+', '#'][..]) {
        return Err(invalid(topic, "wildcards are not allowed in topic names"));
    }
    Ok(())
}

fn validate_common(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(invalid(topic, "must not be empty"));
    }
    if topic.len() > u16::MAX as usize {
        return Err(invalid(topic, "longer than 65535 bytes"));
    }
    if topic.contains('\0') {
        return Err(invalid(topic, "must not contain a null character"));
    }
    Ok(())
}

fn invalid(topic: &str, reason: &'static str) -> ProtocolError {
    ProtocolError::InvalidTopic {
        topic: topic.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches_filter("a", "a/#"));
        assert!(topic_matches_filter("a/b", "a/#"));
        assert!(topic_matches_filter("a/b/c", "a/#"));
        assert!(!topic_matches_filter("b/a", "a/#"));
        assert!(topic_matches_filter("anything/at/all", "#"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches_filter("a/b/c", "a/+/c"));
        assert!(!topic_matches_filter("a/b/x/c", "a/+/c"));
        assert!(!topic_matches_filter("a/c", "a/+/c"));
        assert!(topic_matches_filter("a//c", "a/+/c"));
        assert!(topic_matches_filter("node1/dht11", "+/dht11"));
    }

    #[test]
    fn test_exact_match() {
        assert!(topic_matches_filter("node1/dht11", "node1/dht11"));
        assert!(!topic_matches_filter("node1/dht11", "node1/dht22"));
        assert!(!topic_matches_filter("node1/dht11/x", "node1/dht11"));
        assert!(!topic_matches_filter("node1", "node1/dht11"));
    }

    #[test]
    fn test_dollar_topics() {
        assert!(!topic_matches_filter("$SYS/broker/clients", "+/broker/clients"));
        assert!(!topic_matches_filter("$SYS/broker/clients", "#"));
        assert!(topic_matches_filter("$SYS/broker/clients", "$SYS/#"));
    }

    #[test]
    fn test_validate_filter() {
        assert!(validate_topic_filter("node1/dht11").is_ok());
        assert!(validate_topic_filter("node1/#").is_ok());
        assert!(validate_topic_filter("+/+/temp").is_ok());
        assert!(validate_topic_filter("#").is_ok());
        assert!(validate_topic_filter("").is_err());
        assert!(validate_topic_filter("a/#/b").is_err());
        assert!(validate_topic_filter("a/b#").is_err());
        assert!(validate_topic_filter("a/b+/c").is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_topic_name("node1/dht11").is_ok());
        assert!(validate_topic_name("node1/+").is_err());
        assert!(validate_topic_name("node1/#").is_err());
        assert!(validate_topic_name("").is_err());
    }
}
