use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use taskworker_config::AuthConfig;
use taskworker_errors::{WorkerError, WorkerResult};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const AUTH_HEADER: &str = "X-Authorization";

/// 距离过期不足该秒数的token视为已过期
pub const EXPIRY_BUFFER_SECONDS: i64 = 300;

/// 缓存token的过期时间为该值时表示长期有效
const NEVER_EXPIRES: i64 = -1;

#[derive(Debug, Clone)]
struct IssuedToken {
    token: String,
    expires_at: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    key_id: &'a str,
    key_secret: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

/// 为API请求解析 `X-Authorization` 头
///
/// 优先级：静态token > 未过期的缓存token > key/secret换取的token。
/// 换取的token连同其过期时间一起缓存在内存中，临近过期时重新换取。
pub struct AuthProvider {
    server_url: String,
    config: AuthConfig,
    http_client: reqwest::Client,
    issued: Mutex<Option<IssuedToken>>,
}

impl AuthProvider {
    pub fn new(server_url: &str, config: AuthConfig, request_timeout: Duration) -> WorkerResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| WorkerError::Internal(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            config,
            http_client,
            issued: Mutex::new(None),
        })
    }

    /// 不携带任何凭证
    pub fn anonymous(server_url: &str) -> Self {
        Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            config: AuthConfig::default(),
            http_client: reqwest::Client::new(),
            issued: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// 启动时检查静态token，已过期的JWT直接报配置错误
    pub fn validate_static_token(&self) -> WorkerResult<()> {
        let Some(token) = self.config.static_token() else {
            return Ok(());
        };
        if let Some(exp) = jwt_expiry(token) {
            if exp <= Utc::now().timestamp() {
                return Err(WorkerError::config_error(
                    "auth token has expired, please provide a new token",
                ));
            }
        }
        Ok(())
    }

    pub async fn resolve(&self) -> WorkerResult<Option<String>> {
        if let Some(token) = self.config.static_token() {
            return Ok(Some(token.to_string()));
        }

        let now = Utc::now().timestamp();

        if let Some(token) = self.config.cached_token() {
            let expires_at = self.config.cached_token_expiry.or_else(|| jwt_expiry(token));
            if !is_expired(expires_at, now) {
                return Ok(Some(token.to_string()));
            }
            debug!("缓存token即将过期，尝试使用key/secret重新换取");
        }

        let Some((key, secret)) = self.config.key_secret() else {
            return Ok(None);
        };

        let mut issued = self.issued.lock().await;
        if let Some(current) = issued.as_ref() {
            if !is_expired(current.expires_at, now) {
                return Ok(Some(current.token.clone()));
            }
        }

        let token = self.exchange(key, secret).await?;
        let expires_at = jwt_expiry(&token);
        info!("已通过key/secret获取访问token, expires_at={:?}", expires_at);
        *issued = Some(IssuedToken {
            token: token.clone(),
            expires_at,
        });
        Ok(Some(token))
    }

    /// 在请求上附加认证头，没有凭证时原样返回
    pub async fn apply(&self, request: RequestBuilder) -> WorkerResult<RequestBuilder> {
        Ok(match self.resolve().await? {
            Some(token) => request.header(AUTH_HEADER, token),
            None => request,
        })
    }

    async fn exchange(&self, key: &str, secret: &str) -> WorkerResult<String> {
        let url = format!("{}/token", self.server_url);
        let response = self
            .http_client
            .post(&url)
            .json(&TokenRequest {
                key_id: key,
                key_secret: secret,
            })
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(WorkerError::unauthorized(
                "invalid auth key or secret, check your configuration",
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("换取token失败: HTTP {} - {}", status, body);
            return Err(WorkerError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body: TokenResponse = response.json().await?;
        if body.token.is_empty() {
            return Err(WorkerError::unauthorized("token endpoint returned an empty token"));
        }
        Ok(body.token)
    }
}

/// 读取JWT载荷中的 `exp`（Unix秒），不校验签名
pub fn jwt_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    claims.get("exp")?.as_i64()
}

/// `None` 与 `-1` 表示长期有效，`0` 表示已过期
pub fn is_expired(expires_at: Option<i64>, now: i64) -> bool {
    match expires_at {
        None | Some(NEVER_EXPIRES) => false,
        Some(0) => true,
        Some(exp) => now + EXPIRY_BUFFER_SECONDS >= exp,
    }
}
