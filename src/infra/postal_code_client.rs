//! Postal-code existence checks against a ViaCEP-style HTTP service.
//!
//! `GET {base_url}/{digits}/json/` answers 200 with the address, 200 with
//! `{"erro": true}` for an unknown code and 400 for a malformed one.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::rate_limiter::RateLimiter;
use crate::app::ports::PostalCodeLookupPort;
use crate::common::error::Result;

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    erro: serde_json::Value,
    cep: Option<String>,
}

/// Interpret one response. `Err` means the service could not answer.
pub fn parse_lookup_response(status: StatusCode, body: &str) -> std::result::Result<bool, String> {
    match status {
        StatusCode::OK => {
            let parsed: LookupResponse =
                serde_json::from_str(body).map_err(|e| format!("unexpected lookup response: {}", e))?;
            let not_found = matches!(parsed.erro, serde_json::Value::Bool(true))
                || parsed.erro.as_str() == Some("true");
            Ok(!not_found && parsed.cep.is_some())
        }
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => Ok(false),
        other => Err(format!("postal code service returned {}", other)),
    }
}

#[derive(Clone)]
pub struct HttpPostalCodeLookup {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
}

impl HttpPostalCodeLookup {
    pub fn new(base_url: impl Into<String>, timeout: Duration, limiter: RateLimiter) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("shipment-import/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter,
        })
    }

    fn url_for(&self, code: &str) -> String {
        format!("{}/{}/json/", self.base_url, code)
    }

    async fn check(&self, code: &str) -> std::result::Result<bool, String> {
        let _permit = self.limiter.acquire_permit().await;
        let url = self.url_for(code);
        debug!(%url, "Postal code lookup");

        let response = self.client.get(&url).send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        let body = response.text().await.map_err(|e| e.to_string())?;
        parse_lookup_response(status, &body)
    }
}

#[async_trait]
impl PostalCodeLookupPort for HttpPostalCodeLookup {
    async fn exists(&self, codes: &[String]) -> std::result::Result<HashMap<String, bool>, String> {
        let mut tasks = JoinSet::new();
        for code in codes {
            let this = self.clone();
            let code = code.clone();
            tasks.spawn(async move {
                let found = this.check(&code).await;
                (code, found)
            });
        }

        let mut results = HashMap::with_capacity(codes.len());
        while let Some(joined) = tasks.join_next().await {
            let (code, found) = joined.map_err(|e| e.to_string())?;
            match found {
                Ok(exists) => {
                    results.insert(code, exists);
                }
                Err(e) => {
                    warn!(code = %code, error = %e, "Postal code lookup failed");
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }
        Ok(results)
    }
}
