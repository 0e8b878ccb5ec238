//! Where the conversation gets its streams from.

use fieldhand_transport::{
    QueryRequest, StreamHandle, StreamOptions, StreamRequest, http_client, open, open_legacy,
};

use crate::config::ApiSettings;

/// Opens one stream per prompt.
///
/// Implementations must return immediately; envelopes are delivered through
/// the handle's log.
pub trait StreamConnector: Send {
    fn open(&self, prompt: &str) -> StreamHandle;

    /// Same contract over the non-streaming fallback endpoint.
    fn open_legacy(&self, prompt: &str) -> StreamHandle;
}

/// Connector for the real assistant API. Needs a Tokio runtime.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    api: ApiSettings,
    options: StreamOptions,
}

impl HttpConnector {
    #[must_use]
    pub fn new(api: ApiSettings, options: StreamOptions) -> Self {
        Self { api, options }
    }

    fn body(&self, prompt: &str) -> QueryRequest {
        QueryRequest {
            prompt: prompt.to_string(),
            property_id: self.api.property_id.clone(),
        }
    }
}

impl StreamConnector for HttpConnector {
    fn open(&self, prompt: &str) -> StreamHandle {
        let body = self.body(prompt);
        open(
            http_client(),
            StreamRequest::new(&self.api.stream_url, &body, &self.api.token),
            self.options,
        )
    }

    fn open_legacy(&self, prompt: &str) -> StreamHandle {
        let body = self.body(prompt);
        open_legacy(
            http_client(),
            StreamRequest::new(&self.api.legacy_url, &body, &self.api.token),
        )
    }
}
