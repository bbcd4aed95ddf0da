//! `retrieve_tools`: ranked discovery over the aggregated tool index

use serde::Deserialize;
use serde_json::{json, Value};

use super::{ProxyTools, ToolError, ToolResult};
use mcpproxy_index::tokenize::tokenize_query;

#[derive(Debug, Deserialize)]
struct RetrieveParams {
    query: String,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    include_stats: bool,
    #[serde(default)]
    debug: bool,
    #[serde(default)]
    explain_tool: Option<String>,
}

pub async fn retrieve_tools(proxy: &ProxyTools, args: &Value) -> ToolResult {
    let params: RetrieveParams = serde_json::from_value(args.clone())
        .map_err(|e| ToolError::InvalidParams(e.to_string()))?;

    if params.query.trim().is_empty() {
        return Err(ToolError::InvalidParams(
            "query must be a non-empty string".to_string(),
        ));
    }

    let state = proxy.state();
    let limit = params.limit.unwrap_or(0);

    let hits = state
        .index
        .search(&params.query, limit)
        .map_err(|e| ToolError::InvalidParams(e.to_string()))?;

    // Quarantined servers are invisible to discovery. Filtering happens
    // here, after ranking, so the index stays policy-free.
    let visible: Vec<_> = hits
        .into_iter()
        .filter(|hit| !state.is_quarantined(&hit.tool.server_name))
        .collect();

    let tools: Vec<Value> = visible
        .iter()
        .map(|hit| {
            let mut entry = json!({
                "name": hit.tool.id(),
                "server": hit.tool.server_name,
                "description": hit.tool.description,
                "inputSchema": hit.tool.schema_value(),
                "score": hit.score,
            });
            if params.include_stats {
                entry["usage_calls"] = json!(state.stats.calls_for(&hit.tool.id()));
            }
            entry
        })
        .collect();

    let mut payload = json!({
        "tools": tools,
        "total": visible.len(),
    });

    if params.include_stats {
        payload["stats"] = json!({
            "total_calls": state.stats.total_calls(),
            "top_tools": state.stats.top(5),
        });
    }

    if params.debug {
        let effective_limit = if limit <= 0 {
            mcpproxy_index::DEFAULT_SEARCH_LIMIT
        } else {
            (limit as usize).min(mcpproxy_index::MAX_SEARCH_LIMIT)
        };
        let mut debug = json!({
            "total_indexed_tools": state.index.document_count(),
            "backend": "BM25",
            "query_analysis": {
                "raw": params.query,
                "tokens": tokenize_query(&params.query),
            },
            "limit_applied": effective_limit,
        });

        if let Some(target) = &params.explain_tool {
            debug["explanation"] = explain(target, &visible, proxy);
        }
        payload["debug"] = debug;
    }

    Ok(payload)
}

fn explain(
    target: &str,
    visible: &[mcpproxy_index::SearchResult],
    proxy: &ProxyTools,
) -> Value {
    if let Some(rank) = visible.iter().position(|hit| hit.tool.id() == target) {
        return json!({
            "tool": target,
            "matched": true,
            "rank": rank + 1,
            "score": visible[rank].score,
        });
    }

    let indexed = mcpproxy_mcp::parse_tool_id(target)
        .map(|(server, tool)| proxy.state().index.get_tool(server, tool).is_some())
        .unwrap_or(false);

    json!({
        "tool": target,
        "matched": false,
        "indexed": indexed,
        "note": if indexed {
            "indexed but did not rank for this query"
        } else {
            "not present in the index"
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivitySource;
    use crate::proxy::test_support;
    use mcpproxy_config::{ProxyConfig, UpstreamConfig};
    use mcpproxy_index::ToolMetadata;
    use serde_json::json;

    fn seeded_proxy(quarantine_q1: bool) -> ProxyTools {
        let mut config = ProxyConfig::default();
        config.mcp_servers.insert(
            "q1".to_string(),
            UpstreamConfig {
                url: Some("http://127.0.0.1:9/mcp".to_string()),
                quarantined: quarantine_q1,
                ..Default::default()
            },
        );

        let proxy = test_support::proxy(config);
        proxy.state().index.index_tool(ToolMetadata::new(
            "q1",
            "echo",
            "Echo a message back",
            r#"{"type":"object"}"#,
            "h1",
        ));
        proxy.state().index.index_tool(ToolMetadata::new(
            "safe",
            "echo_too",
            "Echo a message back as well",
            r#"{"type":"object"}"#,
            "h2",
        ));
        proxy
    }

    #[tokio::test]
    async fn test_missing_query_rejected() {
        let proxy = seeded_proxy(false);
        let err = proxy
            .dispatch("retrieve_tools", json!({}), ActivitySource::Mcp)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));

        let err = proxy
            .dispatch("retrieve_tools", json!({"query": "  "}), ActivitySource::Mcp)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_quarantined_server_excluded() {
        let proxy = seeded_proxy(true);
        let payload = proxy
            .dispatch("retrieve_tools", json!({"query": "echo"}), ActivitySource::Mcp)
            .await
            .unwrap();

        let tools = payload["tools"].as_array().unwrap();
        assert!(!tools.is_empty());
        assert!(tools.iter().all(|t| t["server"] != json!("q1")));
    }

    #[tokio::test]
    async fn test_unquarantined_server_included() {
        let proxy = seeded_proxy(false);
        let payload = proxy
            .dispatch("retrieve_tools", json!({"query": "echo"}), ActivitySource::Mcp)
            .await
            .unwrap();

        let tools = payload["tools"].as_array().unwrap();
        assert!(tools.iter().any(|t| t["server"] == json!("q1")));
    }

    #[tokio::test]
    async fn test_debug_envelope() {
        let proxy = seeded_proxy(false);
        let payload = proxy
            .dispatch(
                "retrieve_tools",
                json!({"query": "echo", "debug": true, "explain_tool": "safe:echo_too"}),
                ActivitySource::Mcp,
            )
            .await
            .unwrap();

        let debug = &payload["debug"];
        assert_eq!(debug["backend"], json!("BM25"));
        assert_eq!(debug["total_indexed_tools"], json!(2));
        assert_eq!(debug["limit_applied"], json!(mcpproxy_index::DEFAULT_SEARCH_LIMIT));
        assert_eq!(debug["explanation"]["matched"], json!(true));
    }

    #[tokio::test]
    async fn test_include_stats_attaches_counters() {
        let proxy = seeded_proxy(false);
        proxy.state().stats.record_call("safe:echo_too");

        let payload = proxy
            .dispatch(
                "retrieve_tools",
                json!({"query": "echo", "include_stats": true}),
                ActivitySource::Mcp,
            )
            .await
            .unwrap();

        assert_eq!(payload["stats"]["total_calls"], json!(1));
        let tools = payload["tools"].as_array().unwrap();
        let tracked = tools
            .iter()
            .find(|t| t["name"] == json!("safe:echo_too"))
            .unwrap();
        assert_eq!(tracked["usage_calls"], json!(1));
    }
}
