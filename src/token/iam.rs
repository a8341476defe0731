//! IAM client: password authentication scoped to a domain.

use reqwest::StatusCode;
use std::time::Duration;
use zeroize::Zeroize;

use super::AuthError;
use crate::config::ApiConfig;

const AUTH_PATH: &str = "/v3/auth/tokens";
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

pub struct IamClient {
    client: reqwest::Client,
    url: String,
    domain: String,
    username: String,
    password: String,
}

impl IamClient {
    pub fn new(cfg: &ApiConfig) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder().timeout(AUTH_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: format!("{}{}", cfg.iam_endpoint.trim_end_matches('/'), AUTH_PATH),
            domain: cfg.domain.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Exchange the configured credentials for a fresh token.
    ///
    /// Success is a 201 with the token in the `X-Subject-Token` header;
    /// the response body is ignored.
    pub async fn authenticate(&self) -> Result<String, AuthError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&self.request_body())
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::CREATED {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::UnexpectedStatus {
                status,
                body: truncate(&body, 500).to_string(),
            });
        }

        match resp
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            Some(token) if !token.is_empty() => Ok(token.to_string()),
            _ => Err(AuthError::MissingToken),
        }
    }

    fn request_body(&self) -> serde_json::Value {
        serde_json::json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "domain": { "name": &self.domain },
                            "name": &self.username,
                            "password": &self.password,
                        }
                    }
                },
                "scope": {
                    "domain": { "name": &self.domain }
                }
            }
        })
    }
}

impl Drop for IamClient {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
