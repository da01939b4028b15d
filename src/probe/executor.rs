//! # 探测执行器
//!
//! 执行单次 HTTP 探测：测量延迟、截断响应、归一化传输层错误，
//! 并在连接、响应头与响应体阶段响应取消信号。

use reqwest::Client;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::strategy::{build_probe, parse_outcome};
use super::types::{
    truncate_utf8, ProbeJob, ProbeOutcome, ProbeStatus, ERROR_BODY_LIMIT, RESPONSE_CONTENT_LIMIT,
};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lwarn};

/// 默认单次探测超时
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP 探测执行器
///
/// 按代理地址缓存 reqwest 客户端，进程生命周期内复用连接池。
pub struct ProbeExecutor {
    clients: Mutex<HashMap<String, Client>>,
    timeout: Duration,
}

impl ProbeExecutor {
    #[must_use]
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            timeout: probe_timeout,
        }
    }

    /// 执行单次探测；所有错误路径都折叠为 `ProbeOutcome`
    pub async fn execute(&self, job: &ProbeJob, cancel: &CancellationToken) -> ProbeOutcome {
        let kind = job.endpoint_kind;
        if cancel.is_cancelled() {
            return ProbeOutcome::canceled(kind);
        }

        let request = build_probe(&job.base_url, &job.api_key, &job.model_name, kind);
        let client = match self.client_for(job.proxy_url.as_deref()) {
            Ok(client) => client,
            Err(message) => {
                lwarn!(
                    &job.job_id,
                    LogStage::Probe,
                    LogComponent::ProbeExec,
                    "proxy_client_build_failed",
                    "探测客户端构建失败",
                    proxy_url = ?job.proxy_url,
                    error = %message
                );
                return ProbeOutcome::fail(kind, 0, None, message);
            }
        };

        ldebug!(
            &job.job_id,
            LogStage::Probe,
            LogComponent::ProbeExec,
            "probe_start",
            "开始探测",
            url = %request.url,
            kind = %kind
        );

        let start = Instant::now();
        let send = async {
            let mut builder = client.post(&request.url).json(&request.body);
            for (name, value) in &request.headers {
                builder = builder.header(*name, value);
            }
            let response = builder.send().await?;
            let http_status = response.status().as_u16();
            let body = response.text().await?;
            Ok::<(u16, String), reqwest::Error>((http_status, body))
        };

        let result = tokio::select! {
            () = cancel.cancelled() => {
                return ProbeOutcome::canceled(kind);
            }
            result = timeout(self.timeout, send) => result,
        };

        let latency_ms = elapsed_ms(start);

        match result {
            Err(_) => ProbeOutcome::fail(kind, latency_ms, None, "timeout"),
            Ok(Err(err)) => {
                ProbeOutcome::fail(kind, latency_ms, None, map_transport_error(&err))
            }
            Ok(Ok((http_status, body))) => {
                let (status, error_msg) = parse_outcome(kind, http_status, &body);
                let response_content = if body.is_empty() {
                    None
                } else {
                    Some(truncate_utf8(&body, RESPONSE_CONTENT_LIMIT))
                };
                match status {
                    ProbeStatus::Success => {
                        ProbeOutcome::success(kind, latency_ms, http_status, response_content)
                    }
                    ProbeStatus::Fail => ProbeOutcome {
                        kind,
                        status: ProbeStatus::Fail,
                        latency_ms,
                        http_status: Some(http_status),
                        error_msg,
                        response_content,
                    },
                }
            }
        }
    }

    /// 取得（或创建）按代理地址缓存的客户端；目录同步等复用同一套代理规则
    pub fn client_for(&self, proxy_url: Option<&str>) -> Result<Client, String> {
        let cache_key = proxy_url.unwrap_or("").to_string();
        {
            let clients = self.clients.lock().expect("probe client 缓存锁中毒");
            if let Some(client) = clients.get(&cache_key) {
                return Ok(client.clone());
            }
        }

        let mut builder = Client::builder()
            .timeout(self.timeout)
            .connect_timeout(Duration::from_secs(10));

        if let Some(raw) = proxy_url {
            let parsed =
                url::Url::parse(raw).map_err(|e| format!("代理地址不可解析 {raw}: {e}"))?;
            if !matches!(
                parsed.scheme(),
                "http" | "https" | "socks5" | "socks4" | "socks"
            ) {
                return Err(format!("不支持的代理协议: {}", parsed.scheme()));
            }
            let normalized = normalize_proxy_scheme(raw);
            let proxy = reqwest::Proxy::all(normalized.as_ref())
                .map_err(|e| format!("代理地址不可解析 {raw}: {e}"))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| format!("HTTP 客户端构建失败: {e}"))?;

        let mut clients = self.clients.lock().expect("probe client 缓存锁中毒");
        clients.insert(cache_key, client.clone());
        Ok(client)
    }
}

impl Default for ProbeExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

/// `socks://` 视为 `socks5://`；其余 scheme 原样交给 reqwest
fn normalize_proxy_scheme(raw: &str) -> std::borrow::Cow<'_, str> {
    if let Some(rest) = raw.strip_prefix("socks://") {
        std::borrow::Cow::Owned(format!("socks5://{rest}"))
    } else {
        std::borrow::Cow::Borrowed(raw)
    }
}

fn elapsed_ms(start: Instant) -> i32 {
    i32::try_from(start.elapsed().as_millis()).unwrap_or(i32::MAX)
}

/// 把 reqwest 错误归一化为短字符串
fn map_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        return "timeout".to_string();
    }

    let chain = error_chain_text(err);
    let lower = chain.to_lowercase();
    if lower.contains("dns") || lower.contains("resolve") || lower.contains("lookup") {
        return "dns failure".to_string();
    }
    if lower.contains("certificate")
        || lower.contains("tls")
        || lower.contains("ssl")
        || lower.contains("handshake")
    {
        return "tls error".to_string();
    }
    if err.is_connect() {
        return "connection refused".to_string();
    }

    truncate_utf8(&chain, ERROR_BODY_LIMIT)
}

fn error_chain_text(err: &reqwest::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::types::EndpointKind;

    fn job_for(base_url: &str, proxy_url: Option<&str>) -> ProbeJob {
        ProbeJob {
            job_id: "1-1-chat-0".to_string(),
            channel_id: 1,
            model_id: 1,
            model_name: "gpt-4".to_string(),
            endpoint_kind: EndpointKind::Chat,
            base_url: base_url.to_string(),
            api_key: "sk-test".to_string(),
            proxy_url: proxy_url.map(str::to_string),
        }
    }

    #[test]
    fn test_normalize_proxy_scheme() {
        assert_eq!(normalize_proxy_scheme("socks://h:1"), "socks5://h:1");
        assert_eq!(normalize_proxy_scheme("socks5://h:1"), "socks5://h:1");
        assert_eq!(normalize_proxy_scheme("http://h:1"), "http://h:1");
    }

    #[test]
    fn test_client_cache_reuse() {
        let executor = ProbeExecutor::default();
        executor.client_for(None).unwrap();
        executor.client_for(Some("http://127.0.0.1:7890")).unwrap();
        let clients = executor.clients.lock().unwrap();
        assert_eq!(clients.len(), 2);
    }

    #[test]
    fn test_unsupported_proxy_scheme_rejected() {
        let executor = ProbeExecutor::default();
        let err = executor.client_for(Some("ftp://127.0.0.1:21")).unwrap_err();
        assert!(err.contains("不支持的代理协议"));
        assert!(executor.client_for(Some("socks4://127.0.0.1:1080")).is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let executor = ProbeExecutor::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = executor
            .execute(&job_for("https://api.example.test", None), &cancel)
            .await;
        assert_eq!(outcome.status, ProbeStatus::Fail);
        assert_eq!(
            outcome.error_msg.as_deref(),
            Some(crate::probe::types::CANCEL_ERROR_MSG)
        );
    }

    #[tokio::test]
    async fn test_connection_refused_maps_to_fail() {
        let executor = ProbeExecutor::new(Duration::from_secs(2));
        let cancel = CancellationToken::new();
        // 没有监听者的本地端口
        let outcome = executor
            .execute(&job_for("http://127.0.0.1:1", None), &cancel)
            .await;
        assert_eq!(outcome.status, ProbeStatus::Fail);
        assert!(outcome.error_msg.is_some());
    }
}
