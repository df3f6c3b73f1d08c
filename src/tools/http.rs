use super::{get_str, get_u64, param};
use crate::model::{ActionDescriptor, ParamType, WorkerResult};
use crate::safety::risk::Risk;
use crate::tools::Worker;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

pub struct HttpWorker;

#[async_trait]
impl Worker for HttpWorker {
    fn name(&self) -> &str {
        "http"
    }

    fn description(&self) -> &str {
        "Make HTTP requests to APIs or web endpoints"
    }

    fn actions(&self) -> Vec<ActionDescriptor> {
        vec![ActionDescriptor {
            name: "request".to_string(),
            params: vec![
                param("url", ParamType::String, true, "the URL to request"),
                param("method", ParamType::String, false, "HTTP method, default GET"),
                param("headers", ParamType::Object, false, "request headers"),
                param("body", ParamType::String, false, "request body"),
                param("timeout_secs", ParamType::Int, false, "request timeout, default 30"),
            ],
            risk_hint: Risk::Safe,
            open_schema: false,
        }]
    }

    async fn execute(&self, action: &str, args: &HashMap<String, Value>, dry_run: bool) -> Result<WorkerResult> {
        if action != "request" {
            return Ok(WorkerResult::failed(format!("unknown action: {action}")));
        }

        let Some(url_str) = get_str(args, "url") else {
            return Ok(WorkerResult::failed("missing required argument: url"));
        };
        let method = get_str(args, "method").unwrap_or_else(|| "GET".to_string());
        let timeout_secs = get_u64(args, "timeout_secs", 30);
        let body = get_str(args, "body");

        let url = match reqwest::Url::parse(&url_str) {
            Ok(u) => u,
            Err(e) => return Ok(WorkerResult::failed(format!("invalid URL {url_str}: {e}"))),
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            return Ok(WorkerResult::failed("only http and https URLs are allowed"));
        }
        if let Some(host) = url.host_str() {
            if is_private_network_host(host) && std::env::var("OPSAI_ALLOW_PRIVATE_NETWORK").unwrap_or_default() != "1" {
                return Ok(WorkerResult::failed(format!(
                    "blocked request to private/internal network address: {host} (set OPSAI_ALLOW_PRIVATE_NETWORK=1 to allow)"
                )));
            }
        }

        if dry_run {
            let mut result = WorkerResult::ok(format!("dry run: would {method} {url_str}"));
            result.simulated = true;
            return Ok(result);
        }

        let client = match Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
        {
            Ok(c) => c,
            Err(e) => return Ok(WorkerResult::failed(format!("failed to build http client: {e}"))),
        };

        let mut request = match method.to_uppercase().as_str() {
            "GET" => client.get(url),
            "POST" => client.post(url),
            "PUT" => client.put(url),
            "DELETE" => client.delete(url),
            "PATCH" => client.patch(url),
            "HEAD" => client.head(url),
            other => return Ok(WorkerResult::failed(format!("unsupported HTTP method: {other}"))),
        };
        if let Some(headers) = args.get("headers").and_then(|v| v.as_object()) {
            for (k, v) in headers {
                if let Some(s) = v.as_str() {
                    request = request.header(k, s);
                }
            }
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let success = response.status().is_success();
                let text = response.text().await.unwrap_or_default();
                let truncated = text.len() > 50_000;
                let text = if truncated { format!("{}...[truncated]", &text[..50_000]) } else { text };
                let mut result = if success {
                    WorkerResult::ok(format!("{status}"))
                } else {
                    WorkerResult::failed(format!("http status {status}"))
                };
                result.raw_output = Some(text);
                result.data = Some(serde_json::json!({"status": status, "truncated": truncated}));
                Ok(result)
            }
            Err(e) => Ok(WorkerResult::failed(format!("request failed: {e}"))),
        }
    }
}

/// Blocks SSRF-prone targets: loopback, link-local, and RFC1918 ranges.
fn is_private_network_host(host: &str) -> bool {
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }
    let bare_host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare_host.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified(),
            IpAddr::V6(v6) => {
                v6.is_loopback()
                    || v6.is_unspecified()
                    || (v6.segments()[0] & 0xffc0) == 0xfe80
                    || (v6.segments()[0] & 0xfe00) == 0xfc00
            }
        };
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_invalid_url() {
        let worker = HttpWorker;
        let mut args = HashMap::new();
        args.insert("url".to_string(), serde_json::json!("not-a-url"));
        let result = worker.execute("request", &args, false).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn rejects_non_http_scheme() {
        let worker = HttpWorker;
        let mut args = HashMap::new();
        args.insert("url".to_string(), serde_json::json!("file:///etc/passwd"));
        let result = worker.execute("request", &args, false).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn blocks_private_network_by_default() {
        let worker = HttpWorker;
        let mut args = HashMap::new();
        args.insert("url".to_string(), serde_json::json!("http://127.0.0.1:9999/"));
        let result = worker.execute("request", &args, false).await.unwrap();
        assert!(!result.success);
        assert!(result.message.contains("private"));
    }

    #[tokio::test]
    async fn dry_run_does_not_send_request() {
        let worker = HttpWorker;
        let mut args = HashMap::new();
        args.insert("url".to_string(), serde_json::json!("https://example.com"));
        let result = worker.execute("request", &args, true).await.unwrap();
        assert!(result.simulated);
    }

    #[tokio::test]
    async fn missing_url_fails() {
        let worker = HttpWorker;
        let result = worker.execute("request", &HashMap::new(), false).await.unwrap();
        assert!(!result.success);
    }

    #[test]
    fn request_action_is_safe_by_default() {
        let worker = HttpWorker;
        let actions = worker.actions();
        assert_eq!(actions[0].risk_hint, Risk::Safe);
    }
}
