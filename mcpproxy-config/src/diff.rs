//! Configuration diffing for hot reload
//!
//! `POST /api/v1/config/apply` reports which fields changed between the
//! running configuration and the submitted one. Upstream entries are
//! reported at `mcpServers.<name>` granularity so the reload path can tell
//! which clients need a reconnect.

use serde_json::Value;

use crate::domains::ProxyConfig;

/// Compute the dotted names of every changed field between two configs.
///
/// The result is sorted and deduplicated, suitable for direct inclusion in
/// the apply response.
pub fn diff_configs(old: &ProxyConfig, new: &ProxyConfig) -> Vec<String> {
    let old_value = serde_json::to_value(old).unwrap_or(Value::Null);
    let new_value = serde_json::to_value(new).unwrap_or(Value::Null);

    let mut changed = Vec::new();
    diff_value(&old_value, &new_value, "", &mut changed);
    changed.sort();
    changed.dedup();
    changed
}

fn diff_value(old: &Value, new: &Value, path: &str, changed: &mut Vec<String>) {
    // Upstream entries are opaque units; one entry changing in any field
    // reports as a single mcpServers.<name> change.
    if path == "mcpServers" {
        diff_server_map(old, new, changed);
        return;
    }

    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, old_item) in old_map {
                let child = join(path, key);
                match new_map.get(key) {
                    Some(new_item) => diff_value(old_item, new_item, &child, changed),
                    None => changed.push(child),
                }
            }
            for key in new_map.keys() {
                if !old_map.contains_key(key) {
                    changed.push(join(path, key));
                }
            }
        }
        (old_item, new_item) => {
            if old_item != new_item {
                changed.push(path.to_string());
            }
        }
    }
}

fn diff_server_map(old: &Value, new: &Value, changed: &mut Vec<String>) {
    let empty = serde_json::Map::new();
    let old_map = old.as_object().unwrap_or(&empty);
    let new_map = new.as_object().unwrap_or(&empty);

    for (name, old_entry) in old_map {
        match new_map.get(name) {
            Some(new_entry) if new_entry == old_entry => {}
            _ => changed.push(format!("mcpServers.{}", name)),
        }
    }
    for name in new_map.keys() {
        if !old_map.contains_key(name) {
            changed.push(format!("mcpServers.{}", name));
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}
