//! Non-streaming fallback endpoint.
//!
//! One POST, one JSON body: `{ success, data: {interpretation?, visualization?,
//! result?}, message? }`.

use serde::Deserialize;

use fieldhand_types::{FinalPayload, StreamingEvent};

use crate::{StreamRequest, TransportError, build_request, read_capped_error_body};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LegacyResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<FinalPayload>,
    #[serde(default)]
    pub message: Option<String>,
}

impl LegacyResponse {
    /// The single envelope this response stands for.
    ///
    /// Success becomes `complete` with the response data; failure becomes
    /// `error` with the server's message.
    #[must_use]
    pub fn into_envelope(self, timestamp: Option<String>) -> StreamingEvent {
        if self.success {
            StreamingEvent::complete(&self.data.unwrap_or_default(), timestamp)
        } else {
            let message = self
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "Request failed".to_string());
            StreamingEvent::error(message, timestamp)
        }
    }
}

pub async fn send_legacy(
    client: &reqwest::Client,
    request: StreamRequest<'_>,
) -> Result<LegacyResponse, TransportError> {
    send(build_request(client, &request, "application/json")).await
}

pub(crate) async fn send(
    builder: reqwest::RequestBuilder,
) -> Result<LegacyResponse, TransportError> {
    let response = builder
        .send()
        .await
        .map_err(|e| TransportError::Request(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status {
            status: status.as_u16(),
            body: read_capped_error_body(response).await,
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| TransportError::Stream(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| TransportError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{LegacyResponse, send_legacy};
    use crate::{QueryRequest, StreamRequest, TransportError};
    use fieldhand_types::{BearerToken, EventPayload};
    use reqwest::header::HeaderMap;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn failure_becomes_error_envelope() {
        let response: LegacyResponse =
            serde_json::from_value(json!({"success": false, "message": "Property not found"}))
                .unwrap();
        let event = response.into_envelope(None);
        let EventPayload::Error(err) = event.payload() else {
            panic!("expected error envelope");
        };
        assert_eq!(err.text(), "Property not found");
    }

    #[test]
    fn failure_without_message_has_fallback_text() {
        let event = LegacyResponse::default().into_envelope(None);
        assert_eq!(event.kind(), "error");
        let EventPayload::Error(err) = event.payload() else {
            panic!("expected error envelope");
        };
        assert_eq!(err.text(), "Request failed");
    }

    #[test]
    fn success_without_data_is_bare_complete() {
        let response = LegacyResponse {
            success: true,
            ..LegacyResponse::default()
        };
        let event = response.into_envelope(Some("2024-05-01T00:00:00Z".to_string()));
        let EventPayload::Complete(payload) = event.payload() else {
            panic!("expected complete envelope");
        };
        assert!(payload.is_bare());
        assert_eq!(event.timestamp(), Some("2024-05-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn unparseable_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/legacy"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let url = format!("{}/legacy", server.uri());
        let body = QueryRequest {
            prompt: "rain?".to_string(),
            property_id: "p".to_string(),
        };
        let token = BearerToken::new("t").unwrap();
        let err = send_legacy(
            &reqwest::Client::new(),
            StreamRequest {
                url: &url,
                body: &body,
                token: &token,
                extra_headers: HeaderMap::new(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransportError::InvalidResponse(_)));
    }
}
