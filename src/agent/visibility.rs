//! Per-turn tool visibility.
//!
//! The full catalog can be larger than what is worth advertising on a
//! single model call. Selection happens in two stages: a capability filter
//! (which providers this caller may use at all) and, when the surviving set
//! is still over budget, a keyword ranking against the latest user message.

use std::collections::HashMap;

use crate::provider::{ToolDescriptor, parse_tool_id};

/// Decides which catalog entries are advertised on a given turn.
#[derive(Debug, Clone)]
pub struct VisibilityPolicy {
    /// Provider name to capability label. A provider with no entry uses its
    /// own name as its capability.
    capabilities: HashMap<String, String>,
    /// Upper bound on tools advertised per turn.
    pub max_visible_tools: usize,
}

impl VisibilityPolicy {
    pub fn new(max_visible_tools: usize) -> Self {
        Self {
            capabilities: HashMap::new(),
            max_visible_tools,
        }
    }

    /// Label a provider with a capability. Several providers may share one
    /// label.
    pub fn set_capability(&mut self, provider: impl Into<String>, capability: impl Into<String>) {
        self.capabilities.insert(provider.into(), capability.into());
    }

    fn capability_of<'a>(&'a self, provider: &'a str) -> &'a str {
        self.capabilities
            .get(provider)
            .map(String::as_str)
            .unwrap_or(provider)
    }

    /// Select the tools to advertise.
    ///
    /// `enabled_capabilities: None` means no filter. Ranking is stable:
    /// equal scores keep catalog (registration) order.
    pub fn select(
        &self,
        catalog: &[(String, ToolDescriptor)],
        enabled_capabilities: Option<&[String]>,
        query: &str,
    ) -> Vec<(String, ToolDescriptor)> {
        let filtered: Vec<&(String, ToolDescriptor)> = catalog
            .iter()
            .filter(|(id, _)| {
                let Some((provider, _)) = parse_tool_id(id) else {
                    return false;
                };
                match enabled_capabilities {
                    Some(enabled) => {
                        let cap = self.capability_of(provider);
                        enabled.iter().any(|e| e == cap)
                    }
                    None => true,
                }
            })
            .collect();

        if filtered.len() <= self.max_visible_tools {
            return filtered.into_iter().cloned().collect();
        }

        let query_words = tokenize(query);
        let mut scored: Vec<(usize, &(String, ToolDescriptor))> = filtered
            .into_iter()
            .map(|entry| (score(&query_words, &entry.0, &entry.1), entry))
            .collect();
        // Stable sort keeps catalog order among equals.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(self.max_visible_tools)
            .map(|(_, entry)| entry.clone())
            .collect()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_string)
        .collect()
}

fn score(query_words: &[String], tool_id: &str, descriptor: &ToolDescriptor) -> usize {
    let mut haystack = tokenize(tool_id);
    haystack.extend(tokenize(&descriptor.description));
    query_words
        .iter()
        .filter(|w| haystack.iter().any(|h| h == *w))
        .count()
}
