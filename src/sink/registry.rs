//! Sink Registry
//!
//! Read-only view of the configured sinks: lookup by id, channel
//! resolution and base topics.

use std::collections::HashMap;

use crate::config::{SinkConfig, DEFAULT_BASE_TOPIC};

/// Static per-destination configuration, built once at startup
#[derive(Debug, Clone, Default)]
pub struct SinkRegistry {
    /// Descriptors in configuration order
    descriptors: Vec<SinkConfig>,
    /// Sink id -> index into `descriptors`
    index: HashMap<String, usize>,
}

impl SinkRegistry {
    /// Build from configured sinks. On duplicate ids the first entry wins.
    pub fn new(descriptors: impl IntoIterator<Item = SinkConfig>) -> Self {
        let mut registry = Self::default();
        for descriptor in descriptors {
            if registry.index.contains_key(&descriptor.id) {
                continue;
            }
            registry
                .index
                .insert(descriptor.id.clone(), registry.descriptors.len());
            registry.descriptors.push(descriptor);
        }
        registry
    }

    /// Channel for a category on a sink, or the category itself when the
    /// sink is unknown or maps the category to nothing
    pub fn resolve_channel<'a>(&'a self, sink_id: &str, category: &'a str) -> &'a str {
        self.get(sink_id)
            .and_then(|descriptor| descriptor.channels.get(category))
            .map(String::as_str)
            .filter(|channel| !channel.is_empty())
            .unwrap_or(category)
    }

    /// Base topic of a sink, or `meteo/default/` when the sink is unknown
    pub fn base_topic(&self, sink_id: &str) -> &str {
        self.get(sink_id)
            .map(|descriptor| descriptor.base_topic.as_str())
            .unwrap_or(DEFAULT_BASE_TOPIC)
    }

    pub fn get(&self, sink_id: &str) -> Option<&SinkConfig> {
        self.index.get(sink_id).map(|&i| &self.descriptors[i])
    }

    pub fn descriptors(&self) -> &[SinkConfig] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
