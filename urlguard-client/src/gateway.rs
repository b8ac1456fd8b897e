//! HTTP transport gateway.
//!
//! Every outbound request goes through [`HttpGateway::request`], which turns
//! each HTTP outcome into either a typed body or a [`GatewayError`]. The
//! classification itself lives in [`classify_response`] so it can be
//! exercised without a socket.

use std::fmt;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};
use url::Url;
use urlguard_model::routes::ADMIN_KEY_HEADER;
use urlguard_model::{ErrorEnvelope, FreezeEnvelope};

use crate::config::{AdminKey, ClientConfig};
use crate::error::{GatewayError, GatewayResult};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Reason reported when a 503 body carries no usable reason.
pub const UNKNOWN_FREEZE_REASON: &str = "Unknown";

/// Action reported when a 503 body carries no usable actions.
pub const DEFAULT_FREEZE_ACTIONS: &str =
    "Contact administrator or use Emergency Unfreeze if authorized";

/// Single chokepoint for requests to the analysis service.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: Url,
    admin_key: Option<AdminKey>,
}

impl fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.base_url.as_str())
            .field("has_admin_key", &self.admin_key.is_some())
            .finish()
    }
}

impl HttpGateway {
    /// Creates a gateway from explicit configuration.
    ///
    /// # Errors
    /// Returns [`GatewayError::TransportUnavailable`] if the HTTP client
    /// cannot be initialised (for example, no TLS backend).
    pub fn new(config: &ClientConfig) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| GatewayError::TransportUnavailable {
                message: format!("failed to build http client: {err}"),
            })?;

        debug!(base_url = %config.base_url, "creating analysis gateway");

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            admin_key: config.admin_key.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL for a service endpoint such as `/scan`.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// Sends one request and classifies the outcome.
    ///
    /// Privileged requests carry the configured admin key. No retries
    /// happen here; retry policy belongs to the caller.
    ///
    /// # Errors
    /// Any [`GatewayError`] kind, as classified by [`classify_response`].
    /// [`GatewayError::TransportUnavailable`] when no response arrived or
    /// the connection dropped mid-body. A request body that fails to encode
    /// is [`GatewayError::MalformedResponse`].
    pub async fn request<T, B>(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&B>,
        privileged: bool,
    ) -> GatewayResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.endpoint_url(endpoint);
        let mut builder = self
            .client
            .request(method.clone(), &url)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header(ACCEPT, JSON_CONTENT_TYPE);

        if privileged {
            match &self.admin_key {
                Some(key) => {
                    builder = builder.header(ADMIN_KEY_HEADER, key.expose_secret());
                }
                None => {
                    warn!(endpoint, "privileged request sent without an admin key")
                }
            }
        }

        // An unencodable body never leaves the process; it is reported as
        // malformed since no transport was attempted.
        if let Some(body) = body {
            let encoded =
                serde_json::to_vec(body).map_err(|err| GatewayError::MalformedResponse {
                    message: format!("failed to encode request body: {err}"),
                })?;
            builder = builder.body(encoded);
        }

        debug!(%method, endpoint, privileged, "sending request");

        let response = builder.send().await.map_err(|err| {
            warn!(endpoint, error = %err, "request did not reach the analysis service");
            GatewayError::TransportUnavailable {
                message: transport_message(&err),
            }
        })?;

        let status = response.status();
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) if status.is_success() => {
                warn!(endpoint, error = %err, "connection dropped while reading body");
                return Err(GatewayError::TransportUnavailable {
                    message: format!("failed to read response body: {err}"),
                });
            }
            Err(err) => {
                debug!(endpoint, error = %err, "failed to read error body");
                Default::default()
            }
        };

        let outcome = classify_response(status, &bytes);
        match &outcome {
            Ok(_) => {
                debug!(endpoint, status = status.as_u16(), "request succeeded")
            }
            Err(GatewayError::GovernanceFreeze { reason, .. }) => {
                warn!(endpoint, reason = %reason, "analysis service is frozen")
            }
            Err(GatewayError::MalformedResponse { message }) => {
                error!(
                    endpoint,
                    message = %message,
                    "analysis service returned a malformed body"
                )
            }
            Err(err) => warn!(
                endpoint,
                status = status.as_u16(),
                error = %err,
                "request rejected"
            ),
        }
        outcome
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
    ) -> GatewayResult<T> {
        self.request::<T, ()>(endpoint, Method::GET, None, false).await
    }

    pub async fn post<T, B>(
        &self,
        endpoint: &str,
        body: &B,
        privileged: bool,
    ) -> GatewayResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(endpoint, Method::POST, Some(body), privileged)
            .await
    }
}

/// Classifies a received response.
///
/// 503 is checked first and always yields a freeze, whatever else the body
/// looks like. Other failures parse the generic error envelope, falling back
/// to an empty one. Success bodies must parse as `T`.
///
/// # Errors
/// [`GatewayError::GovernanceFreeze`], [`GatewayError::RemoteRejected`] or
/// [`GatewayError::MalformedResponse`].
pub fn classify_response<T: DeserializeOwned>(
    status: StatusCode,
    body: &[u8],
) -> GatewayResult<T> {
    if status == StatusCode::SERVICE_UNAVAILABLE {
        let envelope: FreezeEnvelope =
            serde_json::from_slice(body).unwrap_or_default();
        return Err(GatewayError::GovernanceFreeze {
            reason: non_blank(envelope.reason)
                .unwrap_or_else(|| UNKNOWN_FREEZE_REASON.to_string()),
            actions: non_blank(envelope.actions)
                .unwrap_or_else(|| DEFAULT_FREEZE_ACTIONS.to_string()),
        });
    }

    if !status.is_success() {
        let envelope: ErrorEnvelope = serde_json::from_slice(body).unwrap_or_default();
        let message = non_blank(envelope.error).unwrap_or_else(|| {
            format!(
                "Request failed: {}",
                status.canonical_reason().unwrap_or("unexpected status")
            )
        });
        return Err(GatewayError::RemoteRejected {
            message,
            status_code: status.as_u16(),
        });
    }

    serde_json::from_slice(body).map_err(|err| GatewayError::MalformedResponse {
        message: err.to_string(),
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn transport_message(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use urlguard_model::GovernanceStatus;

    use super::*;

    #[derive(Debug, serde::Deserialize, PartialEq)]
    struct Pong {
        ok: bool,
    }

    #[test]
    fn freeze_wins_over_generic_shape() {
        let body = json!({
            "success": false,
            "error": "SYSTEM FROZEN",
            "reason": "Calibration drift",
            "actions": "Page the on-call"
        });
        let result: GatewayResult<Pong> =
            classify_response(StatusCode::SERVICE_UNAVAILABLE, body.to_string().as_bytes());
        assert_eq!(
            result,
            Err(GatewayError::GovernanceFreeze {
                reason: "Calibration drift".into(),
                actions: "Page the on-call".into(),
            })
        );
    }

    #[test]
    fn unreadable_freeze_body_still_freezes() {
        let result: GatewayResult<Pong> =
            classify_response(StatusCode::SERVICE_UNAVAILABLE, b"<html>busy</html>");
        match result {
            Err(GatewayError::GovernanceFreeze { reason, actions }) => {
                assert_eq!(reason, UNKNOWN_FREEZE_REASON);
                assert_eq!(actions, DEFAULT_FREEZE_ACTIONS);
            }
            other => panic!("expected freeze, got {other:?}"),
        }
    }

    #[test]
    fn rejected_statuses_keep_literal_code() {
        for code in [400u16, 401, 403, 404, 500] {
            let status = StatusCode::from_u16(code).unwrap();
            let body = json!({ "success": false, "error": "nope" }).to_string();
            let result: GatewayResult<Pong> = classify_response(status, body.as_bytes());
            assert_eq!(
                result,
                Err(GatewayError::RemoteRejected {
                    message: "nope".into(),
                    status_code: code,
                })
            );
        }
    }

    #[test]
    fn unparseable_error_body_falls_back() {
        let result: GatewayResult<Pong> = classify_response(StatusCode::BAD_GATEWAY, b"");
        match result {
            Err(GatewayError::RemoteRejected {
                message,
                status_code,
            }) => {
                assert_eq!(status_code, 502);
                assert!(!message.is_empty());
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn success_body_mismatch_is_malformed() {
        let result: GatewayResult<GovernanceStatus> =
            classify_response(StatusCode::OK, br#"{"is_frozen": "perhaps"}"#);
        assert!(matches!(result, Err(GatewayError::MalformedResponse { .. })));

        let ok: GatewayResult<Pong> = classify_response(StatusCode::OK, br#"{"ok": true}"#);
        assert_eq!(ok, Ok(Pong { ok: true }));
    }

    #[test]
    fn endpoint_urls_join_cleanly() {
        let config = ClientConfig::new("http://scanner.local:5000/").unwrap();
        let gateway = HttpGateway::new(&config).unwrap();
        assert_eq!(
            gateway.endpoint_url("/api/governance/status"),
            "http://scanner.local:5000/api/governance/status"
        );
        assert_eq!(gateway.endpoint_url("scan"), "http://scanner.local:5000/scan");
    }
}
