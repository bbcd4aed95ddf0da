//! `upstream_servers`: management of the upstream set
//!
//! Every mutation is gated by the security predicates, and `add` always
//! lands quarantined no matter what the caller asked for.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::{error_envelope, ProxyTools, ToolError, ToolResult};
use mcpproxy_config::{Protocol, UpstreamConfig, Validatable};

/// Cap on lines returned by tail_log
const TAIL_LOG_MAX: usize = 500;

const TAIL_LOG_DEFAULT: usize = 100;

#[derive(Debug, Deserialize)]
struct ServersParams {
    operation: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Option<Vec<String>>,
    #[serde(default)]
    env: Option<BTreeMap<String, String>>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    protocol: Option<Protocol>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    lines: Option<usize>,
}

pub async fn upstream_servers(proxy: &ProxyTools, args: &Value) -> ToolResult {
    let params: ServersParams = serde_json::from_value(args.clone())
        .map_err(|e| ToolError::InvalidParams(e.to_string()))?;

    let security = proxy.state().config.security();

    if security.disable_management {
        return Ok(error_envelope(
            "server management is disabled",
            "The operator has set disable_management; no operations are available.",
            None,
            None,
        ));
    }
    if security.read_only_mode && params.operation != "list" {
        return Ok(error_envelope(
            format!("'{}' is not allowed in read-only mode", params.operation),
            "Only the list operation is available while read_only_mode is set.",
            None,
            None,
        ));
    }

    match params.operation.as_str() {
        "list" => list(proxy),
        "add" => {
            if !security.allow_server_add {
                return Ok(error_envelope(
                    "adding servers is disabled",
                    "The operator has cleared allow_server_add.",
                    None,
                    None,
                ));
            }
            add(proxy, params).await
        }
        "remove" => {
            if !security.allow_server_remove {
                return Ok(error_envelope(
                    "removing servers is disabled",
                    "The operator has cleared allow_server_remove.",
                    None,
                    None,
                ));
            }
            remove(proxy, params).await
        }
        // patch and update behave identically: merge, persist, reconnect
        "update" | "patch" => update(proxy, params).await,
        "tail_log" => tail_log(proxy, params),
        other => Err(ToolError::InvalidParams(format!(
            "unknown operation '{}'",
            other
        ))),
    }
}

fn list(proxy: &ProxyTools) -> ToolResult {
    let statuses = proxy.state().manager.list_all();

    // Entries that exist only in configuration (e.g. quarantined since
    // birth, never registered) still show up
    let mut listed: Vec<Value> = statuses
        .iter()
        .map(|status| serde_json::to_value(status).unwrap_or_default())
        .collect();
    let known: Vec<&str> = statuses.iter().map(|s| s.name.as_str()).collect();

    for (name, upstream) in proxy.state().config.get().mcp_servers {
        if !known.contains(&name.as_str()) {
            listed.push(json!({
                "name": name,
                "protocol": upstream.protocol.as_str(),
                "enabled": upstream.enabled,
                "quarantined": upstream.quarantined,
                "connected": false,
                "state": "idle",
                "tool_count": 0,
            }));
        }
    }

    Ok(json!({ "servers": listed, "total": listed.len() }))
}

async fn add(proxy: &ProxyTools, params: ServersParams) -> ToolResult {
    let name = required_name(&params)?;

    if proxy.state().config.upstream(&name).is_some() {
        return Ok(error_envelope(
            format!("server '{}' already exists", name),
            "Pick a different name or update the existing entry.",
            None,
            None,
        ));
    }

    let upstream = UpstreamConfig {
        protocol: params.protocol.unwrap_or_default(),
        command: params.command,
        args: params.args.unwrap_or_default(),
        env: params.env.unwrap_or_default(),
        url: params.url,
        headers: params.headers.unwrap_or_default(),
        enabled: params.enabled.unwrap_or(true),
        // Forced: every server added through this surface starts
        // quarantined until an operator reviews it out-of-band.
        quarantined: true,
        oauth: None,
        created_at: Some(Utc::now()),
    };

    if let Err(e) = upstream.validate() {
        return Err(ToolError::InvalidParams(e.to_string()));
    }

    proxy.state().config.set_upstream(&name, upstream.clone());
    if let Err(e) = proxy.state().manager.add_config(&name, upstream) {
        return Ok(error_envelope(e.to_string(), "", None, None));
    }

    Ok(json!({
        "status": "added",
        "name": name,
        "quarantined": true,
        "security_notice": "NEW SERVER QUARANTINED: tools from this server are hidden from search and blocked from execution until it passes review.",
        "next_steps": [
            "Run quarantine_security with operation inspect_quarantined to review the server's tools for prompt-injection indicators.",
            "Unquarantine from the tray menu or by editing the configuration file. This cannot be done through the MCP surface.",
        ],
    }))
}

async fn remove(proxy: &ProxyTools, params: ServersParams) -> ToolResult {
    let name = required_name(&params)?;
    let state = proxy.state();

    let existed_in_config = state.config.remove_upstream(&name);
    let removed_live = state.manager.remove_server(&name).await.is_ok();

    // Searches must go quiet immediately, not at the next index event
    state.index.delete_server_tools(&name);

    if !existed_in_config && !removed_live {
        return Ok(error_envelope(
            format!("server '{}' not found", name),
            "Check the name against upstream_servers list.",
            None,
            None,
        ));
    }

    Ok(json!({ "status": "removed", "name": name }))
}

async fn update(proxy: &ProxyTools, params: ServersParams) -> ToolResult {
    let name = required_name(&params)?;
    let state = proxy.state();

    let Some(mut upstream) = state.config.upstream(&name) else {
        return Ok(error_envelope(
            format!("server '{}' not found", name),
            "Check the name against upstream_servers list.",
            None,
            None,
        ));
    };

    let mut changed = Vec::new();
    if let Some(command) = params.command {
        upstream.command = Some(command);
        changed.push("command");
    }
    if let Some(args) = params.args {
        upstream.args = args;
        changed.push("args");
    }
    if let Some(env) = params.env {
        upstream.env = env;
        changed.push("env");
    }
    if let Some(url) = params.url {
        upstream.url = Some(url);
        changed.push("url");
    }
    if let Some(headers) = params.headers {
        upstream.headers = headers;
        changed.push("headers");
    }
    if let Some(protocol) = params.protocol {
        upstream.protocol = protocol;
        changed.push("protocol");
    }
    if let Some(enabled) = params.enabled {
        upstream.enabled = enabled;
        changed.push("enabled");
    }

    if let Err(e) = upstream.validate() {
        return Err(ToolError::InvalidParams(e.to_string()));
    }

    state.config.set_upstream(&name, upstream.clone());

    if state.manager.get_client(&name).is_some() {
        if let Err(e) = state.manager.update_server(&name, upstream).await {
            return Ok(error_envelope(e.to_string(), "", None, None));
        }
    } else if let Err(e) = state.manager.add_config(&name, upstream) {
        return Ok(error_envelope(e.to_string(), "", None, None));
    }

    Ok(json!({
        "status": "updated",
        "name": name,
        "changed": changed,
    }))
}

fn tail_log(proxy: &ProxyTools, params: ServersParams) -> ToolResult {
    let name = required_name(&params)?;
    let lines = params.lines.unwrap_or(TAIL_LOG_DEFAULT).min(TAIL_LOG_MAX);

    match proxy.state().manager.stderr_tail(&name, lines) {
        Ok(tail) => Ok(json!({
            "name": name,
            "lines": tail,
        })),
        Err(e) => Ok(error_envelope(
            e.to_string(),
            "Only registered stdio servers collect stderr.",
            None,
            None,
        )),
    }
}

fn required_name(params: &ServersParams) -> Result<String, ToolError> {
    params
        .name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidParams("name is required for this operation".to_string()))
}
