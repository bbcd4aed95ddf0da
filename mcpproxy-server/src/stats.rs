//! Per-tool usage counters backing `retrieve_tools(include_stats)`

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

/// One entry in the top-N summary
#[derive(Debug, Clone, Serialize)]
pub struct ToolUsage {
    pub tool: String,
    pub calls: u64,
}

/// Call counters keyed by `"server:tool"`
#[derive(Default)]
pub struct UsageStats {
    calls: RwLock<HashMap<String, u64>>,
}

impl UsageStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&self, tool_id: &str) {
        *self.calls.write().entry(tool_id.to_string()).or_insert(0) += 1;
    }

    pub fn calls_for(&self, tool_id: &str) -> u64 {
        self.calls.read().get(tool_id).copied().unwrap_or(0)
    }

    /// The `n` most-called tools, descending, ties by name ascending
    pub fn top(&self, n: usize) -> Vec<ToolUsage> {
        let calls = self.calls.read();
        let mut entries: Vec<ToolUsage> = calls
            .iter()
            .map(|(tool, &calls)| ToolUsage {
                tool: tool.clone(),
                calls,
            })
            .collect();
        entries.sort_by(|a, b| b.calls.cmp(&a.calls).then_with(|| a.tool.cmp(&b.tool)));
        entries.truncate(n);
        entries
    }

    pub fn total_calls(&self) -> u64 {
        self.calls.read().values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_top() {
        let stats = UsageStats::new();
        for _ in 0..3 {
            stats.record_call("a:x");
        }
        stats.record_call("b:y");

        assert_eq!(stats.calls_for("a:x"), 3);
        assert_eq!(stats.calls_for("missing:t"), 0);
        assert_eq!(stats.total_calls(), 4);

        let top = stats.top(1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].tool, "a:x");
    }

    #[test]
    fn test_top_tie_break_is_stable() {
        let stats = UsageStats::new();
        stats.record_call("b:y");
        stats.record_call("a:x");

        let top = stats.top(2);
        assert_eq!(top[0].tool, "a:x");
        assert_eq!(top[1].tool, "b:y");
    }
}
