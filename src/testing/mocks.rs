//! # 测试 Mock 实现
//!
//! 极简 HTTP 上游桩：按路径匹配返回预设响应，记录命中次数。
//! 只支持探测用到的最小 HTTP/1.1 语义（读完请求体、应答后断开）。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// 一条桩路由
#[derive(Debug, Clone)]
pub struct MockRoute {
    /// 命中条件：请求路径包含该子串
    pub path_contains: String,
    /// 附加命中条件：请求头部文本包含该子串（区分不同密钥用）
    pub header_contains: Option<String>,
    pub status: u16,
    pub body: String,
}

impl MockRoute {
    pub fn new(path_contains: &str, status: u16, body: &str) -> Self {
        Self {
            path_contains: path_contains.to_string(),
            header_contains: None,
            status,
            body: body.to_string(),
        }
    }

    /// 同时要求头部包含指定子串
    pub fn with_header(path_contains: &str, header_contains: &str, status: u16, body: &str) -> Self {
        Self {
            path_contains: path_contains.to_string(),
            header_contains: Some(header_contains.to_string()),
            status,
            body: body.to_string(),
        }
    }
}

/// HTTP 上游桩
pub struct MockUpstream {
    base_url: String,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockUpstream {
    /// 启动桩服务；无匹配路由时返回 404
    pub async fn start(routes: Vec<MockRoute>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("mock upstream 绑定端口失败");
        let addr = listener.local_addr().expect("mock upstream 取地址失败");
        let hits = Arc::new(AtomicUsize::new(0));

        let accept_hits = Arc::clone(&hits);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let routes = routes.clone();
                let hits = Arc::clone(&accept_hits);
                tokio::spawn(async move {
                    let _ = serve_connection(stream, &routes, &hits).await;
                });
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            hits,
            handle,
        }
    }

    /// 桩服务基地址（无尾部斜杠）
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 已处理的请求数
    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_connection(
    mut stream: tokio::net::TcpStream,
    routes: &[MockRoute],
    hits: &AtomicUsize,
) -> std::io::Result<()> {
    let mut buffer = Vec::with_capacity(4096);
    let mut chunk = [0_u8; 1024];

    // 读到头部结束
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buffer) {
            break pos;
        }
        if buffer.len() > 64 * 1024 {
            return Ok(());
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let path = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();

    // 把请求体读完再应答
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);
    let mut body_read = buffer.len() - header_end - 4;
    while body_read < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body_read += n;
    }

    hits.fetch_add(1, Ordering::SeqCst);

    let head_lower = head.to_lowercase();
    let (status, body) = routes
        .iter()
        .find(|route| {
            path.contains(&route.path_contains)
                && route
                    .header_contains
                    .as_ref()
                    .is_none_or(|needle| head_lower.contains(&needle.to_lowercase()))
        })
        .map_or((404, r#"{"error":"not found"}"#.to_string()), |route| {
            (route.status, route.body.clone())
        });

    let response = format!(
        "HTTP/1.1 {} {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        status,
        reason_phrase(status),
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "Unknown",
    }
}

/// 预设响应体
pub mod bodies {
    /// OpenAI chat 正常响应
    pub const CHAT_OK: &str = r#"{"choices":[{"message":{"content":"hi"}}]}"#;
    /// Claude 正常响应
    pub const CLAUDE_OK: &str = r#"{"content":[{"type":"text","text":"hi"}]}"#;
    /// Gemini 正常响应
    pub const GEMINI_OK: &str =
        r#"{"candidates":[{"content":{"parts":[{"text":"hi"}]}}]}"#;
    /// 图片生成正常响应
    pub const IMAGE_OK: &str = r#"{"data":[{"url":"https://img.example.test/cat.png"}]}"#;
    /// 模型列表响应
    pub const MODELS_OK: &str = r#"{"data":[{"id":"gpt-4"},{"id":"claude-3-haiku"}]}"#;
    /// 认证失败
    pub const UNAUTHORIZED: &str = r#"{"error":{"message":"Incorrect API key"}}"#;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_upstream_routes() {
        let upstream = MockUpstream::start(vec![
            MockRoute::new("/v1/chat/completions", 200, bodies::CHAT_OK),
            MockRoute::new("/v1/messages", 401, bodies::UNAUTHORIZED),
        ])
        .await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("{}/v1/chat/completions", upstream.base_url()))
            .json(&serde_json::json!({"model": "gpt-4"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body = response.text().await.unwrap();
        assert_eq!(body, bodies::CHAT_OK);

        let response = client
            .post(format!("{}/v1/messages", upstream.base_url()))
            .json(&serde_json::json!({"model": "claude-3"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 401);

        let response = client
            .post(format!("{}/unknown", upstream.base_url()))
            .body("x")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 404);

        assert_eq!(upstream.hit_count(), 3);
    }
}
