//! Truncation of oversized tool responses

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Decision produced for a response that exceeded the byte limit
#[derive(Debug, Clone)]
pub struct TruncateResult {
    /// Shortened body shown to the caller
    pub preview: String,

    /// Content hash of (tool, args, response); the cache key
    pub cache_key: String,

    /// Dotted path to the detected array, `"."` for a root array, empty
    /// when no array was found
    pub record_path: String,

    /// Records available under `record_path` (1 when no array)
    pub total_records: usize,
}

/// Decides whether a serialized response is too large and, when it is,
/// produces the preview and cache coordinates for the full body.
#[derive(Debug, Clone)]
pub struct Truncator {
    limit_bytes: usize,
    preview_records: usize,
}

impl Truncator {
    pub fn new(limit_bytes: usize, preview_records: usize) -> Self {
        Self {
            limit_bytes,
            preview_records: preview_records.max(1),
        }
    }

    /// `None` means the response fits and passes through untouched.
    pub fn truncate(&self, tool: &str, args_json: &str, response_text: &str) -> Option<TruncateResult> {
        if response_text.len() <= self.limit_bytes {
            return None;
        }

        let cache_key = compute_cache_key(tool, args_json, response_text);

        let parsed: Option<Value> = serde_json::from_str(response_text).ok();
        let (record_path, records) = match &parsed {
            Some(value) => detect_record_array(value),
            None => (String::new(), None),
        };

        let preview = match records {
            Some(items) => {
                let total = items.len();
                let head: Vec<&Value> = items.iter().take(self.preview_records).collect();
                let head_json = serde_json::to_string_pretty(&head)
                    .unwrap_or_else(|_| "[]".to_string());
                let result = TruncateResult {
                    preview: format!(
                        "Showing {} of {} records:\n{}",
                        head.len(),
                        total,
                        head_json
                    ),
                    cache_key,
                    record_path,
                    total_records: total,
                };
                return Some(result);
            }
            None => {
                // No array to paginate: keep a prefix of the raw text
                let cut = self.limit_bytes / 2;
                let boundary = floor_char_boundary(response_text, cut);
                format!(
                    "Showing the first {} of {} bytes:\n{}",
                    boundary,
                    response_text.len(),
                    &response_text[..boundary]
                )
            }
        };

        Some(TruncateResult {
            preview,
            cache_key,
            record_path: String::new(),
            total_records: 1,
        })
    }
}

/// Hash of (tool, args, response); hex-encoded SHA-256
pub fn compute_cache_key(tool: &str, args_json: &str, response_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool.as_bytes());
    hasher.update([0u8]);
    hasher.update(args_json.as_bytes());
    hasher.update([0u8]);
    hasher.update(response_text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Find the array worth paginating: the body itself, or the largest array
/// at most two object levels deep. Returns its dotted path and the items.
fn detect_record_array(value: &Value) -> (String, Option<&Vec<Value>>) {
    if let Value::Array(items) = value {
        return (".".to_string(), Some(items));
    }

    // Ties on length keep the lexically first path, for determinism
    let mut best: Option<(String, &Vec<Value>)> = None;

    if let Value::Object(map) = value {
        for (key, item) in map {
            match item {
                Value::Array(items) => {
                    if best.as_ref().map_or(true, |(best_path, best_items)| {
                        items.len() > best_items.len()
                            || (items.len() == best_items.len() && key < best_path)
                    }) {
                        best = Some((key.clone(), items));
                    }
                }
                Value::Object(nested) => {
                    for (sub_key, sub_item) in nested {
                        if let Value::Array(items) = sub_item {
                            let path = format!("{}.{}", key, sub_key);
                            if best.as_ref().map_or(true, |(best_path, best_items)| {
                                items.len() > best_items.len()
                                    || (items.len() == best_items.len() && &path < best_path)
                            }) {
                                best = Some((path, items));
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    match best {
        Some((path, items)) => (path, Some(items)),
        None => (String::new(), None),
    }
}

/// Largest index <= `at` that lands on a char boundary
fn floor_char_boundary(text: &str, at: usize) -> usize {
    if at >= text.len() {
        return text.len();
    }
    let mut boundary = at;
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}
