//! Topic names and topic filter validation
//!
//! Implements the MQTT rules for topic names (no wildcards) and topic filters
//! (`+` and `#` must occupy a whole level, `#` only as the last level), plus the
//! fixed topics the sample talks to.

use thiserror::Error;

/// Filter the sample subscribes to once connected
pub const SAMPLE_TOPIC_FILTER: &str = "sample/+";

/// Topic the sample publishes its greeting to
pub const SAMPLE_TOPIC: &str = "sample/topic1";

/// Greeting payload published after subscribing
pub const SAMPLE_PAYLOAD: &str = "Hello World!";

const SINGLE_LEVEL_WILDCARD: char = '+';
const MULTI_LEVEL_WILDCARD: char = '#';

pub fn validate_topic_name(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.contains('\0') {
        return Err(TopicError::NullCharacter);
    }
    if let Some(ch) = topic
        .chars()
        .find(|c| *c == SINGLE_LEVEL_WILDCARD || *c == MULTI_LEVEL_WILDCARD)
    {
        return Err(TopicError::WildcardInTopicName(ch));
    }
    Ok(())
}

pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::Empty);
    }
    if filter.contains('\0') {
        return Err(TopicError::NullCharacter);
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;

    for (index, level) in levels.iter().enumerate() {
        let has_single = level.contains(SINGLE_LEVEL_WILDCARD);
        let has_multi = level.contains(MULTI_LEVEL_WILDCARD);

        if (has_single || has_multi) && level.len() != 1 {
            return Err(TopicError::PartialLevelWildcard(level.to_string()));
        }
        if has_multi && index != last {
            return Err(TopicError::MultiLevelWildcardNotLast);
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Topic cannot contain a null character")]
    NullCharacter,
    #[error("Topic name cannot contain wildcard '{0}'")]
    WildcardInTopicName(char),
    #[error("Wildcard must occupy a whole topic level, got '{0}'")]
    PartialLevelWildcard(String),
    #[error("Multi-level wildcard '#' must be the last level")]
    MultiLevelWildcardNotLast,
}
