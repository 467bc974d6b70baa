//! Topic naming and MQTT-style wildcard matching.
//!
//! Levels are separated by `/`. In a subscription pattern `+` matches exactly
//! one level and a trailing `#` matches all remaining levels, including none.

/// Topic a connection `(my_topic, peer_topic)` subscribes to.
pub fn inbound(my_topic: &str, peer_topic: &str) -> String {
    format!("{my_topic}/{peer_topic}")
}

/// Topic a connection `(my_topic, peer_topic)` publishes to.
pub fn outbound(my_topic: &str, peer_topic: &str) -> String {
    format!("{peer_topic}/{my_topic}")
}

pub fn is_valid_pattern(pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    let mut levels = pattern.split('/').peekable();
    while let Some(level) = levels.next() {
        if level.contains('#') && (level != "#" || levels.peek().is_some()) {
            return false;
        }
        if level.contains('+') && level != "+" {
            return false;
        }
    }
    true
}

pub fn matches(pattern: &str, topic: &str) -> bool {
    let mut topic_levels = topic.split('/');
    for level in pattern.split('/') {
        match level {
            "#" => return true,
            "+" => {
                if topic_levels.next().is_none() {
                    return false;
                }
            }
            _ => {
                if topic_levels.next() != Some(level) {
                    return false;
                }
            }
        }
    }
    topic_levels.next().is_none()
}
