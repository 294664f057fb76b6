/// 考试服务 API 客户端
///
/// 封装引擎需要的五个接口：获取会话、保存答案、交卷、服务器时间、行为日志。
use crate::config::Config;
use crate::error::{ApiError, AppError, AppResult};
use crate::models::{ActivityEntry, AnswerSet, SessionSnapshot, SessionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 交卷回执
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitReceipt {
    pub result_id: String,
    pub score: Option<f64>,
    pub passed: Option<bool>,
    /// 服务端表示此前已经交过卷
    pub already_submitted: bool,
    /// 交卷后服务端记录的状态
    pub status: SessionStatus,
}

/// 考试服务接口
#[async_trait]
pub trait ExamApi: Send + Sync {
    /// 获取会话状态（开始或恢复时调用一次）
    async fn get_session(&self, result_id: &str) -> AppResult<SessionSnapshot>;

    /// 以完整答案集做幂等保存
    async fn save_answers(&self, result_id: &str, answers: &AnswerSet) -> AppResult<()>;

    /// 交卷，重复调用返回此前的结果
    async fn submit(&self, result_id: &str, is_timeout: bool) -> AppResult<SubmitReceipt>;

    /// 服务器当前时间
    async fn server_time(&self) -> AppResult<DateTime<Utc>>;

    /// 上报一条行为日志
    async fn log_event(&self, result_id: &str, entry: &ActivityEntry) -> AppResult<()>;
}

pub type SharedApi = Arc<dyn ExamApi>;

/// 给网络调用套上超时，超时视为可重试的失败
pub async fn bounded<T, F>(timeout: Duration, endpoint: &str, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::Timeout {
            endpoint: endpoint.to_string(),
            seconds: timeout.as_secs(),
        }
        .into()),
    }
}

/// 统一响应格式 `{success, data, message}`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    message: Option<String>,
}

/// HTTP 实现
pub struct HttpExamClient {
    http: Client,
    base_url: String,
    token: String,
    time_endpoint: String,
}

impl HttpExamClient {
    /// 创建新的考试服务客户端
    pub fn new(config: &Config) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|source| ApiError::RequestFailed {
                endpoint: "client".to_string(),
                source,
            })?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.auth_token.clone(),
            time_endpoint: config.time_endpoint.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        if self.token.is_empty() {
            request
        } else {
            request.bearer_auth(&self.token)
        }
    }

    /// 发送请求并解析统一响应格式，非 2xx 或 success=false 都算失败
    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> AppResult<Option<T>> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|source| ApiError::RequestFailed {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|source| ApiError::RequestFailed {
                endpoint: endpoint.to_string(),
                source,
            })?;
        debug!("{} -> {} ({} 字节)", endpoint, status, body.len());

        let envelope: Envelope<T> = serde_json::from_slice(&body).map_err(|source| {
            if status.is_success() {
                AppError::from(ApiError::JsonParseFailed {
                    endpoint: endpoint.to_string(),
                    source,
                })
            } else {
                AppError::from(ApiError::BadResponse {
                    endpoint: endpoint.to_string(),
                    status: status.as_u16(),
                    message: None,
                })
            }
        })?;

        if !status.is_success() || !envelope.success {
            return Err(ApiError::BadResponse {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                message: envelope.message,
            }
            .into());
        }
        Ok(envelope.data)
    }
}

#[async_trait]
impl ExamApi for HttpExamClient {
    async fn get_session(&self, result_id: &str) -> AppResult<SessionSnapshot> {
        let endpoint = format!("/api/assessment-results/{}", result_id);
        let request = self.http.get(self.url(&endpoint));
        self.send(&endpoint, request)
            .await?
            .ok_or_else(|| ApiError::EmptyResponse { endpoint }.into())
    }

    async fn save_answers(&self, result_id: &str, answers: &AnswerSet) -> AppResult<()> {
        let endpoint = format!("/api/assessment-results/{}/answer", result_id);
        let request = self
            .http
            .put(self.url(&endpoint))
            .json(&json!({ "answers": answers }));
        self.send::<Value>(&endpoint, request).await?;
        Ok(())
    }

    async fn submit(&self, result_id: &str, is_timeout: bool) -> AppResult<SubmitReceipt> {
        let endpoint = format!("/api/assessment-results/{}/submit", result_id);
        let request = self
            .http
            .post(self.url(&endpoint))
            .json(&json!({ "isTimeout": is_timeout }));

        match self.send::<Value>(&endpoint, request).await {
            Ok(data) => Ok(parse_submit_data(result_id, data.as_ref())),
            Err(AppError::Api(ApiError::BadResponse {
                status: 400,
                message: Some(message),
                ..
            })) if is_already_submitted(&message) => Ok(SubmitReceipt {
                result_id: result_id.to_string(),
                score: None,
                passed: None,
                already_submitted: true,
                status: SessionStatus::Submitted,
            }),
            Err(e) => Err(e),
        }
    }

    async fn server_time(&self) -> AppResult<DateTime<Utc>> {
        let endpoint = self.time_endpoint.clone();
        let response = self
            .authorized(self.http.get(self.url(&endpoint)))
            .send()
            .await
            .map_err(|source| ApiError::RequestFailed {
                endpoint: endpoint.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::BadResponse {
                endpoint,
                status: status.as_u16(),
                message: None,
            }
            .into());
        }
        let body: Value = response.json().await.map_err(|source| ApiError::RequestFailed {
            endpoint: endpoint.clone(),
            source,
        })?;
        parse_server_time(&body).ok_or_else(|| ApiError::EmptyResponse { endpoint }.into())
    }

    async fn log_event(&self, result_id: &str, entry: &ActivityEntry) -> AppResult<()> {
        let endpoint = "/api/exam-logs";
        let request = self.http.post(self.url(endpoint)).json(&json!({
            "result_id": result_id,
            "event_type": entry.kind,
            "timestamp": entry.timestamp.to_rfc3339(),
            "details": entry.detail.to_string(),
        }));
        self.send::<Value>(endpoint, request).await?;
        Ok(())
    }
}

/// 服务端对非作答状态的交卷请求返回 400 "考试状态为 submitted，无法提交"
fn is_already_submitted(message: &str) -> bool {
    message.contains("submitted") || message.contains("graded")
}

fn parse_submit_data(result_id: &str, data: Option<&Value>) -> SubmitReceipt {
    let summary = data.and_then(|d| d.get("result_summary"));
    let field = |name: &str| summary.and_then(|s| s.get(name));

    SubmitReceipt {
        result_id: field("result_id")
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| result_id.to_string()),
        score: field("user_score").and_then(Value::as_f64),
        passed: field("is_passed").and_then(Value::as_bool),
        already_submitted: false,
        status: match field("pending_grading_count").and_then(Value::as_u64) {
            Some(0) => SessionStatus::Graded,
            _ => SessionStatus::Submitted,
        },
    }
}

/// 接受 `{serverTime}` 或 `{data: {serverTime}}`
fn parse_server_time(body: &Value) -> Option<DateTime<Utc>> {
    body.get("serverTime")
        .or_else(|| body.get("data").and_then(|d| d.get("serverTime")))
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_summary_is_read_from_result_summary() {
        let data = json!({
            "result_summary": {
                "result_id": 42,
                "user_score": 87.5,
                "is_passed": true,
                "pending_grading_count": 0
            }
        });
        let receipt = parse_submit_data("42", Some(&data));

        assert_eq!(receipt.result_id, "42");
        assert_eq!(receipt.score, Some(87.5));
        assert_eq!(receipt.passed, Some(true));
        assert_eq!(receipt.status, SessionStatus::Graded);
        assert!(!receipt.already_submitted);
    }

    #[test]
    fn subjective_questions_leave_attempt_submitted() {
        let data = json!({ "result_summary": { "pending_grading_count": 2 } });
        assert_eq!(
            parse_submit_data("9", Some(&data)).status,
            SessionStatus::Submitted
        );
    }

    #[test]
    fn already_submitted_message_is_recognised() {
        assert!(is_already_submitted("考试状态为 submitted，无法提交"));
        assert!(is_already_submitted("考试状态为 graded，无法提交"));
        assert!(!is_already_submitted("试卷没有题目"));
    }

    #[test]
    fn server_time_accepts_both_shapes() {
        let top = json!({ "serverTime": "2026-10-18T08:00:00.000Z" });
        let nested = json!({ "data": { "serverTime": "2026-10-18T08:00:00Z" } });

        assert_eq!(parse_server_time(&top), parse_server_time(&nested));
        assert!(parse_server_time(&json!({ "message": "ok" })).is_none());
    }
}
