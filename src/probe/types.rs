//! # 探测核心类型定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 取消探测时统一写入的错误信息
pub const CANCEL_ERROR_MSG: &str = "Detection stopped by user";

/// 2xx 但响应体缺少内容字段时的错误信息
pub const EMPTY_RESPONSE_MSG: &str = "empty/invalid response";

/// 响应体保留上限（字节）
pub const RESPONSE_CONTENT_LIMIT: usize = 2048;

/// 上游错误体截断上限（字节）
pub const ERROR_BODY_LIMIT: usize = 512;

/// 端点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// OpenAI 兼容 chat completions
    Chat,
    /// Anthropic Messages
    Claude,
    /// Google Generative
    Gemini,
    /// OpenAI Responses
    Codex,
    /// 图片生成
    Image,
}

impl EndpointKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Codex => "codex",
            Self::Image => "image",
        }
    }

    /// 全部端点类型（稳定顺序）
    pub const ALL: [Self; 5] = [
        Self::Chat,
        Self::Claude,
        Self::Gemini,
        Self::Codex,
        Self::Image,
    ];
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "claude" => Ok(Self::Claude),
            "gemini" => Ok(Self::Gemini),
            "codex" => Ok(Self::Codex),
            "image" => Ok(Self::Image),
            _ => Err(format!("Invalid endpoint kind: {s}")),
        }
    }
}

/// 单次探测结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Success,
    Fail,
}

impl ProbeStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Fail => "fail",
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "fail" => Ok(Self::Fail),
            _ => Err(format!("Invalid probe status: {s}")),
        }
    }
}

/// 模型聚合健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelHealth {
    Healthy,
    Partial,
    Unhealthy,
    Unknown,
}

impl ModelHealth {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Partial => "partial",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }

    /// 从端点状态集合派生聚合健康状态与 `last_status`
    ///
    /// 派生规则是模型健康的唯一事实来源：
    /// - 无端点行 → unknown / null
    /// - 全部成功 → healthy / true
    /// - 全部失败 → unhealthy / false
    /// - 混合     → partial / true
    #[must_use]
    pub fn derive(endpoint_statuses: &[ProbeStatus]) -> (Self, Option<bool>) {
        if endpoint_statuses.is_empty() {
            return (Self::Unknown, None);
        }
        let success_count = endpoint_statuses.iter().filter(|s| s.is_success()).count();
        if success_count == endpoint_statuses.len() {
            (Self::Healthy, Some(true))
        } else if success_count == 0 {
            (Self::Unhealthy, Some(false))
        } else {
            (Self::Partial, Some(true))
        }
    }
}

impl fmt::Display for ModelHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelHealth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(Self::Healthy),
            "partial" => Ok(Self::Partial),
            "unhealthy" => Ok(Self::Unhealthy),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Invalid model health: {s}")),
        }
    }
}

/// 探测任务（队列中的数据载体）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeJob {
    pub job_id: String,
    pub channel_id: i32,
    pub model_id: i32,
    pub model_name: String,
    pub endpoint_kind: EndpointKind,
    pub base_url: String,
    pub api_key: String,
    pub proxy_url: Option<String>,
}

impl ProbeJob {
    /// 生成任务标识：`{channel_id}-{model_id}-{kind}-{epoch_ms}[-{index}]`
    ///
    /// 标识仅用于日志与排重提示，正确性不依赖其唯一性。
    #[must_use]
    pub fn make_job_id(
        channel_id: i32,
        model_id: i32,
        kind: EndpointKind,
        epoch_ms: i64,
        index: Option<usize>,
    ) -> String {
        match index {
            Some(i) => format!("{channel_id}-{model_id}-{kind}-{epoch_ms}-{i}"),
            None => format!("{channel_id}-{model_id}-{kind}-{epoch_ms}"),
        }
    }
}

/// 单次探测的产出
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub kind: EndpointKind,
    pub status: ProbeStatus,
    pub latency_ms: i32,
    pub http_status: Option<u16>,
    pub error_msg: Option<String>,
    pub response_content: Option<String>,
}

impl ProbeOutcome {
    /// 成功结果
    #[must_use]
    pub fn success(
        kind: EndpointKind,
        latency_ms: i32,
        http_status: u16,
        response_content: Option<String>,
    ) -> Self {
        Self {
            kind,
            status: ProbeStatus::Success,
            latency_ms,
            http_status: Some(http_status),
            error_msg: None,
            response_content,
        }
    }

    /// 失败结果
    #[must_use]
    pub fn fail(
        kind: EndpointKind,
        latency_ms: i32,
        http_status: Option<u16>,
        error_msg: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            status: ProbeStatus::Fail,
            latency_ms,
            http_status,
            error_msg: Some(error_msg.into()),
            response_content: None,
        }
    }

    /// 被取消的结果
    #[must_use]
    pub fn canceled(kind: EndpointKind) -> Self {
        Self::fail(kind, 0, None, CANCEL_ERROR_MSG)
    }
}

/// 截断字符串到指定字节数（保持 UTF-8 边界）
#[must_use]
pub fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
