//! `read_cache`: paginated access to truncated responses

use serde::Deserialize;
use serde_json::{json, Value};

use super::{error_envelope, ProxyTools, ToolError, ToolResult};
use mcpproxy_cache::CacheError;

#[derive(Debug, Deserialize)]
struct ReadCacheParams {
    key: String,
    #[serde(default)]
    offset: Option<i64>,
    #[serde(default)]
    limit: Option<i64>,
}

const DEFAULT_LIMIT: i64 = 50;

pub fn read_cache(proxy: &ProxyTools, args: &Value) -> ToolResult {
    let params: ReadCacheParams = serde_json::from_value(args.clone())
        .map_err(|e| ToolError::InvalidParams(e.to_string()))?;

    if params.key.is_empty() {
        return Err(ToolError::InvalidParams("key must be provided".to_string()));
    }

    let offset = params.offset.unwrap_or(0);
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);

    match proxy.state().cache.get_records(&params.key, offset, limit) {
        Ok(page) => Ok(json!({
            "key": params.key,
            "records": page.records,
            "total": page.total,
            "nextOffset": page.next_offset,
        })),
        Err(CacheError::InvalidRange { message }) => Err(ToolError::InvalidParams(message)),
        Err(CacheError::RangeOutOfBounds { offset, total }) => Err(ToolError::InvalidParams(
            format!("offset {} is out of bounds for {} records", offset, total),
        )),
        Err(e @ CacheError::Miss { .. }) => Ok(error_envelope(
            e.to_string(),
            "The cache entry may have expired. Re-run the original tool call.",
            None,
            None,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivitySource;
    use crate::proxy::test_support;

    fn seeded_proxy() -> ProxyTools {
        let proxy = test_support::proxy(Default::default());
        let records: Vec<Value> = (0..100).map(|i| json!({"id": i})).collect();
        proxy.state().cache.store(
            "key-1",
            "srv:list",
            "{}",
            Value::Array(records),
            ".",
            100,
        );
        proxy
    }

    #[tokio::test]
    async fn test_read_pages() {
        let proxy = seeded_proxy();
        let payload = proxy
            .dispatch(
                "read_cache",
                json!({"key": "key-1", "offset": 0, "limit": 50}),
                ActivitySource::Mcp,
            )
            .await
            .unwrap();

        assert_eq!(payload["records"].as_array().unwrap().len(), 50);
        assert_eq!(payload["total"], json!(100));
        assert_eq!(payload["nextOffset"], json!(50));
    }

    #[tokio::test]
    async fn test_bounds_rejected() {
        let proxy = seeded_proxy();

        let err = proxy
            .dispatch(
                "read_cache",
                json!({"key": "key-1", "offset": -1}),
                ActivitySource::Mcp,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));

        let err = proxy
            .dispatch(
                "read_cache",
                json!({"key": "key-1", "limit": 1500}),
                ActivitySource::Mcp,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_miss_is_a_payload_not_a_protocol_error() {
        let proxy = seeded_proxy();
        let payload = proxy
            .dispatch(
                "read_cache",
                json!({"key": "unknown"}),
                ActivitySource::Mcp,
            )
            .await
            .unwrap();
        assert!(payload["error"]["message"]
            .as_str()
            .unwrap()
            .contains("unknown"));
    }
}
