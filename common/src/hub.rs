use std::collections::BTreeMap;

use tracing::debug;

use crate::{
    config::HubConfig,
    error::ReportError,
    http::{HttpClient, Method, Payload, Request},
    transport::Connector,
    types::{Reading, StatePayload},
};

pub const STATES_PATH_PREFIX: &str = "/api/states/sensor.";

pub fn state_path(entity: &str) -> String {
    format!("{STATES_PATH_PREFIX}{entity}")
}

pub struct HomeAssistant<C> {
    hub: HubConfig,
    headers: BTreeMap<String, String>,
    client: HttpClient<C>,
}

impl<C: Connector> HomeAssistant<C> {
    pub fn new(hub: HubConfig, client: HttpClient<C>) -> Self {
        let mut headers = BTreeMap::new();
        if let Some(token) = &hub.token {
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }

        Self {
            hub,
            headers,
            client,
        }
    }

    pub async fn submit(&self, reading: &Reading) -> Result<(), ReportError> {
        let payload = serde_json::to_value(StatePayload::from(reading))?;
        let path = state_path(reading.quantity.name);
        let request = Request {
            method: Method::Post,
            path: &path,
            headers: &self.headers,
            payload: Payload::Json(payload),
        };

        let response = self
            .client
            .request(&self.hub.host, self.hub.port, self.hub.use_tls, &request)
            .await?;

        match response.status {
            200 | 201 => {
                debug!("{} = {}", reading.quantity.name, reading.value);
                Ok(())
            }
            status => Err(ReportError::Rejected {
                status,
                body: response.body,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::{
        error::HttpError,
        http::tests::ScriptedStream,
        types::{Quantity, TEMPERATURE},
    };

    struct ScriptedConnector {
        response: &'static [u8],
        written: Arc<Mutex<Vec<u8>>>,
        target: Mutex<Option<(String, u16, bool)>>,
    }

    impl ScriptedConnector {
        fn new(response: &'static [u8]) -> Self {
            Self {
                response,
                written: Arc::new(Mutex::new(Vec::new())),
                target: Mutex::new(None),
            }
        }

        fn request_text(&self) -> String {
            String::from_utf8(self.written.lock().unwrap().clone()).unwrap()
        }
    }

    impl Connector for ScriptedConnector {
        type Stream = ScriptedStream;

        async fn connect(
            &self,
            host: &str,
            port: u16,
            use_tls: bool,
        ) -> Result<ScriptedStream, HttpError> {
            *self.target.lock().unwrap() = Some((host.to_string(), port, use_tls));
            self.written.lock().unwrap().clear();
            Ok(ScriptedStream::with_sink(
                self.response,
                self.written.clone(),
            ))
        }
    }

    fn hub(token: Option<&str>) -> HubConfig {
        HubConfig {
            host: "hub.local".into(),
            port: 443,
            use_tls: true,
            token: token.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn submit_posts_state_with_bearer_token() {
        let connector =
            ScriptedConnector::new(b"HTTP/1.0 201 Created\r\nContent-Length: 2\r\n\r\n{}");
        let reporter = HomeAssistant::new(hub(Some("abc")), HttpClient::new(&connector));
        let reading = Reading::new(Quantity::new("temp").with_unit("°C"), 21.5);

        reporter.submit(&reading).await.unwrap();

        let text = connector.request_text();
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        let mut lines = head.lines();
        assert_eq!(lines.next(), Some("POST /api/states/sensor.temp HTTP/1.0"));
        let headers: Vec<&str> = lines.collect();
        assert!(headers.contains(&"Host: hub.local"));
        assert!(headers.contains(&"Authorization: Bearer abc"));
        assert!(headers.contains(&"Content-Type: application/json"));
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(body).unwrap(),
            json!({"state": 21.5, "attributes": {"unit_of_measurement": "°C"}})
        );
        assert_eq!(
            *connector.target.lock().unwrap(),
            Some(("hub.local".to_string(), 443, true))
        );
    }

    #[tokio::test]
    async fn submit_without_token_sends_no_authorization() {
        let connector = ScriptedConnector::new(b"HTTP/1.0 200 OK\r\n\r\n");
        let reporter = HomeAssistant::new(hub(None), HttpClient::new(&connector));

        reporter
            .submit(&Reading::new(TEMPERATURE, 20.0))
            .await
            .unwrap();

        assert!(!connector.request_text().contains("Authorization"));
    }

    #[tokio::test]
    async fn not_found_is_rejected_with_body() {
        let connector =
            ScriptedConnector::new(b"HTTP/1.0 404 Not Found\r\nContent-Length: 9\r\n\r\nnot found");
        let reporter = HomeAssistant::new(hub(Some("abc")), HttpClient::new(&connector));

        let err = reporter
            .submit(&Reading::new(TEMPERATURE, 20.0))
            .await
            .unwrap_err();

        match err {
            ReportError::Rejected { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, b"not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn protocol_errors_pass_through() {
        let connector = ScriptedConnector::new(b"nonsense\r\n\r\n");
        let reporter = HomeAssistant::new(hub(None), HttpClient::new(&connector));

        let err = reporter
            .submit(&Reading::new(TEMPERATURE, 20.0))
            .await
            .unwrap_err();

        assert!(matches!(err, ReportError::Http(HttpError::Protocol(_))));
    }
}
