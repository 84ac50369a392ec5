//! Dotted topic names and glob subscription patterns.
//!
//! Topics are dot-separated segment strings (`orchestrator.task.completed`).
//! Subscription patterns reuse the segment syntax with two wildcards:
//! `*` matches exactly one segment, `#` matches the non-empty remainder and
//! must be the final segment.

use rookery_types::{CoreError, CoreResult, MAX_TOPIC_LEN};

/// Validate a concrete (wildcard-free) topic string.
pub fn validate_topic(topic: &str) -> CoreResult<()> {
    if topic.is_empty() {
        return Err(CoreError::Validation("topic cannot be empty".into()));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(CoreError::Validation(format!(
            "topic too long: {} > {MAX_TOPIC_LEN}",
            topic.len()
        )));
    }
    for segment in topic.split('.') {
        if segment.is_empty() {
            return Err(CoreError::Validation(format!(
                "topic '{topic}' contains an empty segment"
            )));
        }
        if segment == "*" || segment == "#" {
            return Err(CoreError::Validation(format!(
                "topic '{topic}' may not contain wildcards"
            )));
        }
    }
    Ok(())
}

/// A parsed subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    segments: Vec<PatternSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    Literal(String),
    /// `*` – exactly one segment.
    Single,
    /// `#` – one or more trailing segments.
    Rest,
}

impl TopicPattern {
    /// Parse and validate a pattern string.
    pub fn parse(pattern: &str) -> CoreResult<Self> {
        if pattern.is_empty() {
            return Err(CoreError::Validation("pattern cannot be empty".into()));
        }
        if pattern.len() > MAX_TOPIC_LEN {
            return Err(CoreError::Validation(format!(
                "pattern too long: {} > {MAX_TOPIC_LEN}",
                pattern.len()
            )));
        }
        let raw: Vec<&str> = pattern.split('.').collect();
        let mut segments = Vec::with_capacity(raw.len());
        for (i, segment) in raw.iter().enumerate() {
            match *segment {
                "" => {
                    return Err(CoreError::Validation(format!(
                        "pattern '{pattern}' contains an empty segment"
                    )))
                }
                "*" => segments.push(PatternSegment::Single),
                "#" => {
                    if i + 1 != raw.len() {
                        return Err(CoreError::Validation(format!(
                            "pattern '{pattern}': '#' must be the final segment"
                        )));
                    }
                    segments.push(PatternSegment::Rest);
                }
                literal => segments.push(PatternSegment::Literal(literal.to_string())),
            }
        }
        Ok(Self { segments })
    }

    /// Whether a concrete topic matches this pattern.
    pub fn matches(&self, topic: &str) -> bool {
        let parts: Vec<&str> = topic.split('.').collect();
        let mut i = 0;
        for segment in &self.segments {
            match segment {
                PatternSegment::Rest => return i < parts.len(),
                PatternSegment::Single => {
                    if i >= parts.len() {
                        return false;
                    }
                    i += 1;
                }
                PatternSegment::Literal(lit) => {
                    if i >= parts.len() || parts[i] != lit {
                        return false;
                    }
                    i += 1;
                }
            }
        }
        i == parts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_patterns_match_exactly() {
        let p = TopicPattern::parse("agent.r1.result").unwrap();
        assert!(p.matches("agent.r1.result"));
        assert!(!p.matches("agent.r1"));
        assert!(!p.matches("agent.r1.result.extra"));
        assert!(!p.matches("agent.r2.result"));
    }

    #[test]
    fn star_matches_exactly_one_segment() {
        let p = TopicPattern::parse("agent.*.result").unwrap();
        assert!(p.matches("agent.r1.result"));
        assert!(p.matches("agent.r2.result"));
        assert!(!p.matches("agent.result"));
        assert!(!p.matches("agent.r1.sub.result"));
    }

    #[test]
    fn hash_matches_nonempty_remainder() {
        let p = TopicPattern::parse("session.debate.#").unwrap();
        assert!(p.matches("session.debate.started"));
        assert!(p.matches("session.debate.round.3"));
        assert!(!p.matches("session.debate"));
        assert!(!p.matches("session.ensemble.started"));
    }

    #[test]
    fn hash_must_be_final() {
        assert!(TopicPattern::parse("a.#.b").is_err());
        assert!(TopicPattern::parse("#").is_ok());
    }

    #[test]
    fn empty_segments_rejected() {
        assert!(TopicPattern::parse("a..b").is_err());
        assert!(validate_topic("a..b").is_err());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("a.*.b").is_err());
        assert!(validate_topic("orchestrator.task.queued").is_ok());
    }
}
