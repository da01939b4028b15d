//! # 探测策略
//!
//! 纯函数集合：模型名到端点类型的映射、各端点类型的请求构造与响应解析。
//! 策略不抛错，统一以 `ProbeStatus` + 错误信息表达结果。

use regex::Regex;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::OnceLock;

use super::types::{
    truncate_utf8, EndpointKind, ProbeStatus, EMPTY_RESPONSE_MSG, ERROR_BODY_LIMIT,
};

/// 构造完成的探测请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
}

fn codex_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^gpt-5\.(1|2)(\b|-)").expect("codex 模型名正则非法"))
}

const IMAGE_KEYWORDS: [&str; 6] = [
    "image",
    "dall-e",
    "imagen",
    "flux",
    "stable-diffusion",
    "midjourney",
];

/// 模型名映射到端点类型（规则按序匹配，大小写不敏感）
#[must_use]
pub fn endpoint_kind_for(model_name: &str) -> EndpointKind {
    let lower = model_name.to_lowercase();
    if lower.contains("claude") {
        return EndpointKind::Claude;
    }
    if lower.contains("gemini") {
        return EndpointKind::Gemini;
    }
    if codex_pattern().is_match(model_name) {
        return EndpointKind::Codex;
    }
    if IMAGE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return EndpointKind::Image;
    }
    EndpointKind::Chat
}

/// 计算一个模型要探测的端点列表（有序去重）
///
/// `secondary_chat_kinds` 为配置驱动的补充探测名单：主类型命中名单时追加一次
/// chat 探测。默认名单为空，即只探测主类型。
#[must_use]
pub fn endpoints_to_probe(
    model_name: &str,
    secondary_chat_kinds: &[EndpointKind],
) -> Vec<EndpointKind> {
    let primary = endpoint_kind_for(model_name);
    let mut kinds = vec![primary];
    if primary != EndpointKind::Chat && secondary_chat_kinds.contains(&primary) {
        kinds.push(EndpointKind::Chat);
    }
    kinds
}

/// 归一化基地址：去掉单个尾部斜杠
#[must_use]
pub fn normalize_base_url(base_url: &str) -> &str {
    base_url.strip_suffix('/').unwrap_or(base_url)
}

/// 构造探测请求（URL / 认证头 / 最小请求体）
#[must_use]
pub fn build_probe(
    base_url: &str,
    api_key: &str,
    model_name: &str,
    kind: EndpointKind,
) -> ProbeRequest {
    let base = normalize_base_url(base_url);
    match kind {
        EndpointKind::Chat => ProbeRequest {
            url: format!("{base}/v1/chat/completions"),
            headers: vec![("authorization", format!("Bearer {api_key}"))],
            body: json!({
                "model": model_name,
                "messages": [{"role": "user", "content": "hi"}],
                "max_tokens": 1,
                "stream": false,
            }),
        },
        EndpointKind::Claude => ProbeRequest {
            url: format!("{base}/v1/messages"),
            headers: vec![
                ("x-api-key", api_key.to_string()),
                ("anthropic-version", "2023-06-01".to_string()),
            ],
            body: json!({
                "model": model_name,
                "max_tokens": 1,
                "messages": [{"role": "user", "content": "hi"}],
            }),
        },
        EndpointKind::Gemini => ProbeRequest {
            url: format!("{base}/v1beta/models/{model_name}:generateContent"),
            headers: vec![("x-goog-api-key", api_key.to_string())],
            body: json!({
                "contents": [{"parts": [{"text": "hi"}]}],
            }),
        },
        EndpointKind::Codex => ProbeRequest {
            url: format!("{base}/v1/responses"),
            headers: vec![("authorization", format!("Bearer {api_key}"))],
            body: json!({
                "model": model_name,
                "input": "hi",
            }),
        },
        EndpointKind::Image => ProbeRequest {
            url: format!("{base}/v1/images/generations"),
            headers: vec![("authorization", format!("Bearer {api_key}"))],
            body: json!({
                "model": model_name,
                "prompt": "a cat",
                "n": 1,
                "size": "256x256",
            }),
        },
    }
}

/// 解析探测响应
///
/// 2xx 且响应体包含该端点类型的非空内容字段才算成功；上游把标准响应包在额外
/// 外层字段里时同样接受。非 JSON 或字段缺失按失败处理。
#[must_use]
pub fn parse_outcome(
    kind: EndpointKind,
    http_status: u16,
    body: &str,
) -> (ProbeStatus, Option<String>) {
    if !(200..300).contains(&http_status) {
        let detail = truncate_utf8(body.trim(), ERROR_BODY_LIMIT);
        let msg = if detail.is_empty() {
            format!("HTTP {http_status}")
        } else {
            format!("HTTP {http_status}: {detail}")
        };
        return (ProbeStatus::Fail, Some(msg));
    }

    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return (ProbeStatus::Fail, Some(EMPTY_RESPONSE_MSG.to_string()));
    };

    if content_field_present(kind, &value) {
        (ProbeStatus::Success, None)
    } else {
        (ProbeStatus::Fail, Some(EMPTY_RESPONSE_MSG.to_string()))
    }
}

/// 检查响应体中该端点类型的内容字段是否非空
fn content_field_present(kind: EndpointKind, value: &Value) -> bool {
    match kind {
        EndpointKind::Chat | EndpointKind::Codex => {
            non_empty_str(value.pointer("/choices/0/message/content"))
        }
        EndpointKind::Claude => non_empty_str(value.pointer("/content/0/text")),
        EndpointKind::Gemini => {
            non_empty_str(value.pointer("/candidates/0/content/parts/0/text"))
        }
        EndpointKind::Image => {
            non_empty_str(value.pointer("/data/0/url"))
                || non_empty_str(value.pointer("/data/0/b64_json"))
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> bool {
    value.and_then(Value::as_str).is_some_and(|s| !s.is_empty())
}

/// 解析模型目录响应：`{data:[{id}]}` 或 `{models:[{name}]}`
#[must_use]
pub fn parse_model_list(body: &str) -> Vec<String> {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return Vec::new();
    };

    let mut names = Vec::new();
    if let Some(items) = value.get("data").and_then(Value::as_array) {
        for item in items {
            if let Some(id) = item.get("id").and_then(Value::as_str) {
                if !id.is_empty() {
                    names.push(id.to_string());
                }
            }
        }
    }
    if names.is_empty() {
        if let Some(items) = value.get("models").and_then(Value::as_array) {
            for item in items {
                if let Some(name) = item.get("name").and_then(Value::as_str) {
                    if !name.is_empty() {
                        names.push(name.to_string());
                    }
                }
            }
        }
    }
    names
}

/// 校验渠道基地址格式：`^https?://[^\s]+[^/]$`
#[must_use]
pub fn base_url_valid(base_url: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern =
        PATTERN.get_or_init(|| Regex::new(r"^https?://[^\s]+[^/]$").expect("基地址正则非法"));
    pattern.is_match(base_url)
}

/// 解析端点类型名单（配置中逗号分隔的字符串）
#[must_use]
pub fn parse_kind_list(raw: &str) -> Vec<EndpointKind> {
    raw.split(',')
        .filter_map(|part| EndpointKind::from_str(part.trim()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification_order() {
        assert_eq!(endpoint_kind_for("claude-3-opus"), EndpointKind::Claude);
        assert_eq!(endpoint_kind_for("CLAUDE-instant"), EndpointKind::Claude);
        assert_eq!(endpoint_kind_for("gemini-pro"), EndpointKind::Gemini);
        // claude 规则先于 gemini
        assert_eq!(endpoint_kind_for("claude-gemini-mix"), EndpointKind::Claude);
        assert_eq!(endpoint_kind_for("gpt-5.1"), EndpointKind::Codex);
        assert_eq!(endpoint_kind_for("gpt-5.2-turbo"), EndpointKind::Codex);
        assert_eq!(endpoint_kind_for("gpt-5.10"), EndpointKind::Chat);
        assert_eq!(endpoint_kind_for("gpt-4"), EndpointKind::Chat);
        assert_eq!(endpoint_kind_for("dall-e-3"), EndpointKind::Image);
        assert_eq!(endpoint_kind_for("stable-diffusion-xl"), EndpointKind::Image);
        assert_eq!(endpoint_kind_for("flux-schnell"), EndpointKind::Image);
        assert_eq!(endpoint_kind_for("qwen-max"), EndpointKind::Chat);
    }

    #[test]
    fn test_endpoints_to_probe_default_single() {
        assert_eq!(
            endpoints_to_probe("claude-3", &[]),
            vec![EndpointKind::Claude]
        );
        assert_eq!(endpoints_to_probe("gpt-4", &[]), vec![EndpointKind::Chat]);
    }

    #[test]
    fn test_endpoints_to_probe_with_secondary_chat() {
        let secondary = vec![EndpointKind::Claude, EndpointKind::Codex];
        assert_eq!(
            endpoints_to_probe("claude-3", &secondary),
            vec![EndpointKind::Claude, EndpointKind::Chat]
        );
        // gemini 不在名单里，不追加
        assert_eq!(
            endpoints_to_probe("gemini-pro", &secondary),
            vec![EndpointKind::Gemini]
        );
        // chat 本身永远不会重复
        assert_eq!(
            endpoints_to_probe("gpt-4", &secondary),
            vec![EndpointKind::Chat]
        );
    }

    #[test]
    fn test_build_probe_shapes() {
        let req = build_probe("https://api.example.test/", "sk-ok", "gpt-4", EndpointKind::Chat);
        assert_eq!(req.url, "https://api.example.test/v1/chat/completions");
        assert_eq!(req.headers[0].0, "authorization");
        assert_eq!(req.headers[0].1, "Bearer sk-ok");
        assert_eq!(req.body["max_tokens"], 1);

        let req = build_probe("https://a.test", "k", "claude-3", EndpointKind::Claude);
        assert_eq!(req.url, "https://a.test/v1/messages");
        assert!(req
            .headers
            .iter()
            .any(|(name, value)| *name == "anthropic-version" && value == "2023-06-01"));

        let req = build_probe("https://a.test", "k", "gemini-pro", EndpointKind::Gemini);
        assert_eq!(
            req.url,
            "https://a.test/v1beta/models/gemini-pro:generateContent"
        );
        assert_eq!(req.headers[0].0, "x-goog-api-key");

        let req = build_probe("https://a.test", "k", "gpt-5.1", EndpointKind::Codex);
        assert_eq!(req.url, "https://a.test/v1/responses");
        assert_eq!(req.body["input"], "hi");

        let req = build_probe("https://a.test", "k", "dall-e-3", EndpointKind::Image);
        assert_eq!(req.url, "https://a.test/v1/images/generations");
        assert_eq!(req.body["size"], "256x256");
    }

    #[test]
    fn test_parse_outcome_chat() {
        let body = r#"{"choices":[{"message":{"content":"hi"}}]}"#;
        let (status, err) = parse_outcome(EndpointKind::Chat, 200, body);
        assert_eq!(status, ProbeStatus::Success);
        assert!(err.is_none());

        // 空内容字段
        let body = r#"{"choices":[{"message":{"content":""}}]}"#;
        let (status, err) = parse_outcome(EndpointKind::Chat, 200, body);
        assert_eq!(status, ProbeStatus::Fail);
        assert_eq!(err.as_deref(), Some(EMPTY_RESPONSE_MSG));

        // 非 JSON
        let (status, err) = parse_outcome(EndpointKind::Chat, 200, "not json");
        assert_eq!(status, ProbeStatus::Fail);
        assert_eq!(err.as_deref(), Some(EMPTY_RESPONSE_MSG));
    }

    #[test]
    fn test_parse_outcome_envelope_tolerance() {
        // 额外的兄弟字段不影响判定
        let body = r#"{"object":"chat.completion","extra":{"wrapped":true},"choices":[{"message":{"content":"ok"}}]}"#;
        let (status, _) = parse_outcome(EndpointKind::Chat, 201, body);
        assert_eq!(status, ProbeStatus::Success);
    }

    #[test]
    fn test_parse_outcome_per_kind() {
        let (status, _) = parse_outcome(
            EndpointKind::Claude,
            200,
            r#"{"content":[{"type":"text","text":"hello"}]}"#,
        );
        assert_eq!(status, ProbeStatus::Success);

        let (status, _) = parse_outcome(
            EndpointKind::Gemini,
            200,
            r#"{"candidates":[{"content":{"parts":[{"text":"hello"}]}}]}"#,
        );
        assert_eq!(status, ProbeStatus::Success);

        let (status, _) = parse_outcome(
            EndpointKind::Image,
            200,
            r#"{"data":[{"url":"https://img.example.test/cat.png"}]}"#,
        );
        assert_eq!(status, ProbeStatus::Success);

        let (status, _) = parse_outcome(
            EndpointKind::Image,
            200,
            r#"{"data":[{"b64_json":"aGk="}]}"#,
        );
        assert_eq!(status, ProbeStatus::Success);

        // codex 与 chat 共用同一内容字段
        let (status, _) = parse_outcome(
            EndpointKind::Codex,
            200,
            r#"{"choices":[{"message":{"content":"hello"}}]}"#,
        );
        assert_eq!(status, ProbeStatus::Success);

        // Responses 专有形状不含该字段，按空响应处理
        let (status, err) = parse_outcome(
            EndpointKind::Codex,
            200,
            r#"{"output_text":"hello","output":[{"content":[{"text":"hello"}]}]}"#,
        );
        assert_eq!(status, ProbeStatus::Fail);
        assert_eq!(err.as_deref(), Some(EMPTY_RESPONSE_MSG));
    }

    #[test]
    fn test_parse_outcome_non_2xx() {
        let (status, err) = parse_outcome(EndpointKind::Chat, 401, r#"{"error":"bad key"}"#);
        assert_eq!(status, ProbeStatus::Fail);
        let err = err.unwrap();
        assert!(err.starts_with("HTTP 401"));
        assert!(err.contains("bad key"));
    }

    #[test]
    fn test_parse_outcome_error_body_truncated() {
        let big = "x".repeat(4096);
        let (_, err) = parse_outcome(EndpointKind::Chat, 500, &big);
        let err = err.unwrap();
        assert!(err.len() <= ERROR_BODY_LIMIT + 16);
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("https://a.test/"), "https://a.test");
        assert_eq!(normalize_base_url("https://a.test"), "https://a.test");
    }

    #[test]
    fn test_base_url_valid() {
        assert!(base_url_valid("https://api.example.test"));
        assert!(base_url_valid("http://10.0.0.1:8080/v1x"));
        assert!(!base_url_valid("https://api.example.test/"));
        assert!(!base_url_valid("ftp://api.example.test"));
        assert!(!base_url_valid("https://bad url.test"));
    }

    #[test]
    fn test_parse_model_list() {
        let names = parse_model_list(r#"{"data":[{"id":"gpt-4"},{"id":"gpt-3.5-turbo"}]}"#);
        assert_eq!(names, vec!["gpt-4", "gpt-3.5-turbo"]);

        let names = parse_model_list(r#"{"models":[{"name":"gemini-pro"}]}"#);
        assert_eq!(names, vec!["gemini-pro"]);

        assert!(parse_model_list("not json").is_empty());
        assert!(parse_model_list(r#"{"data":[]}"#).is_empty());
    }
}
