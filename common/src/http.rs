use std::{collections::BTreeMap, time::Duration};

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tracing::debug;

use crate::{error::HttpError, transport::Connector};

const HTTP_DEFAULT_PORT: u16 = 80;
const HTTPS_DEFAULT_PORT: u16 = 443;

// Hub replies are small JSON documents.
pub const MAX_LINE_LEN: usize = 1024;
pub const MAX_BODY_LEN: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum Payload<'a> {
    #[default]
    Empty,
    Raw(&'a [u8]),
    Json(serde_json::Value),
}

#[derive(Debug, Clone)]
pub struct Request<'a> {
    pub method: Method,
    pub path: &'a str,
    pub headers: &'a BTreeMap<String, String>,
    pub payload: Payload<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub body: Vec<u8>,
}

pub fn encode_request(
    host: &str,
    port: u16,
    use_tls: bool,
    request: &Request<'_>,
) -> Result<Vec<u8>, HttpError> {
    let mut head = format!("{} {} HTTP/1.0\r\n", request.method.as_str(), request.path);

    if !has_header(request.headers, "Host") {
        let default_port = if use_tls {
            HTTPS_DEFAULT_PORT
        } else {
            HTTP_DEFAULT_PORT
        };
        if port == default_port {
            head.push_str(&format!("Host: {host}\r\n"));
        } else {
            head.push_str(&format!("Host: {host}:{port}\r\n"));
        }
    }

    for (key, value) in request.headers {
        head.push_str(&format!("{key}: {value}\r\n"));
    }

    let json;
    let body: &[u8] = match &request.payload {
        Payload::Empty => &[],
        Payload::Raw(raw) => *raw,
        Payload::Json(value) => {
            head.push_str("Content-Type: application/json\r\n");
            json = serde_json::to_vec(value)
                .map_err(|err| HttpError::Protocol(format!("unencodable body: {err}")))?;
            &json
        }
    };

    if !body.is_empty() {
        head.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    head.push_str("\r\n");

    let mut wire = head.into_bytes();
    wire.extend_from_slice(body);
    Ok(wire)
}

/// Writes `wire`, reads one response and shuts the write side down whether
/// or not the exchange succeeded.
pub async fn exchange<S>(stream: S, wire: &[u8]) -> Result<Response, HttpError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    let result = write_and_read(&mut stream, wire).await;
    if let Err(err) = stream.shutdown().await {
        debug!("closing hub connection failed: {err}");
    }
    result
}

async fn write_and_read<S>(stream: &mut BufReader<S>, wire: &[u8]) -> Result<Response, HttpError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(wire).await?;
    stream.flush().await?;

    let mut line = Vec::new();
    read_line(stream, &mut line).await?;
    let (status, reason) = parse_status_line(&line)?;

    let mut content_length = 0_usize;
    while read_line(stream, &mut line).await? > 0 {
        if line == b"\r\n" || line == b"\n" {
            break;
        }

        let Some((name, value)) = split_header(&line) else {
            continue;
        };
        if name.eq_ignore_ascii_case("Content-Length") {
            content_length = value
                .parse()
                .map_err(|_| HttpError::Protocol(format!("bad Content-Length `{value}`")))?;
        } else if name.eq_ignore_ascii_case("Transfer-Encoding") {
            return Err(HttpError::UnsupportedFeature(format!("{name}: {value}")));
        }
    }

    if content_length > MAX_BODY_LEN {
        return Err(HttpError::Protocol(format!(
            "Content-Length {content_length} exceeds {MAX_BODY_LEN} bytes"
        )));
    }

    let mut body = vec![0_u8; content_length];
    if content_length > 0 {
        stream.read_exact(&mut body).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                HttpError::Protocol(format!("body shorter than {content_length} bytes"))
            } else {
                HttpError::Io(err)
            }
        })?;
    }

    Ok(Response {
        status,
        reason,
        body,
    })
}

async fn read_line<R>(stream: &mut R, line: &mut Vec<u8>) -> Result<usize, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let read = (&mut *stream)
        .take(MAX_LINE_LEN as u64)
        .read_until(b'\n', line)
        .await?;
    if read == MAX_LINE_LEN && !line.ends_with(b"\n") {
        return Err(HttpError::Protocol(format!(
            "line longer than {MAX_LINE_LEN} bytes"
        )));
    }
    Ok(read)
}

fn parse_status_line(line: &[u8]) -> Result<(u16, String), HttpError> {
    let text = String::from_utf8_lossy(line);
    let rest = text.trim_start();
    let (version, rest) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let rest = rest.trim_start();
    let (code, reason) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));

    if version.is_empty() || code.is_empty() {
        return Err(HttpError::Protocol(format!(
            "invalid status line `{}`",
            text.trim_end()
        )));
    }

    let status = code
        .parse()
        .map_err(|_| HttpError::Protocol(format!("invalid status code `{code}`")))?;
    Ok((status, reason.trim().to_string()))
}

fn split_header(line: &[u8]) -> Option<(String, String)> {
    let text = String::from_utf8_lossy(line);
    let (name, value) = text.split_once(':')?;
    Some((name.trim().to_string(), value.trim().to_string()))
}

fn has_header(headers: &BTreeMap<String, String>, name: &str) -> bool {
    headers.keys().any(|key| key.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone)]
pub struct HttpClient<C> {
    connector: C,
    timeout: Option<Duration>,
}

impl<C: Connector> HttpClient<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            timeout: None,
        }
    }

    /// Bounds connect plus exchange; `None` leaves hangs to the watchdog.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn request(
        &self,
        host: &str,
        port: u16,
        use_tls: bool,
        request: &Request<'_>,
    ) -> Result<Response, HttpError> {
        let wire = encode_request(host, port, use_tls, request)?;
        let call = async {
            let stream = self.connector.connect(host, port, use_tls).await?;
            exchange(stream, &wire).await
        };

        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| HttpError::Timeout)??,
            None => call.await?,
        };

        debug!(
            "{} {} -> {} {}",
            request.method.as_str(),
            request.path,
            response.status,
            response.reason
        );
        Ok(response)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        io::{self, Cursor},
        pin::Pin,
        sync::{Arc, Mutex},
        task::{Context, Poll},
    };

    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::{io::ReadBuf, time::Instant};

    use super::*;

    const GET: &[u8] = b"GET / HTTP/1.0\r\n\r\n";
    const POST: &[u8] = b"POST / HTTP/1.0\r\n\r\n";

    pub(crate) struct ScriptedStream {
        response: Cursor<Vec<u8>>,
        written: Arc<Mutex<Vec<u8>>>,
        shut_down: Arc<Mutex<bool>>,
    }

    impl ScriptedStream {
        pub(crate) fn new(response: &[u8]) -> (Self, Arc<Mutex<Vec<u8>>>, Arc<Mutex<bool>>) {
            let written = Arc::new(Mutex::new(Vec::new()));
            let stream = Self::with_sink(response, written.clone());
            let shut_down = stream.shut_down.clone();
            (stream, written, shut_down)
        }

        pub(crate) fn with_sink(response: &[u8], written: Arc<Mutex<Vec<u8>>>) -> Self {
            Self {
                response: Cursor::new(response.to_vec()),
                written,
                shut_down: Arc::new(Mutex::new(false)),
            }
        }
    }

    impl AsyncRead for ScriptedStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.response).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for ScriptedStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            *self.shut_down.lock().unwrap() = true;
            Poll::Ready(Ok(()))
        }
    }

    struct Unreachable;

    impl Connector for Unreachable {
        type Stream = ScriptedStream;

        async fn connect(&self, _: &str, _: u16, _: bool) -> Result<ScriptedStream, HttpError> {
            std::future::pending().await
        }
    }

    fn request<'a>(headers: &'a BTreeMap<String, String>, payload: Payload<'a>) -> Request<'a> {
        Request {
            method: Method::Post,
            path: "/api/states/sensor.temp",
            headers,
            payload,
        }
    }

    fn encode(
        port: u16,
        use_tls: bool,
        headers: &BTreeMap<String, String>,
        payload: Payload<'_>,
    ) -> String {
        let post = request(headers, payload);
        let wire = encode_request("hub.local", port, use_tls, &post);
        String::from_utf8(wire.unwrap()).unwrap()
    }

    fn host_header_count(text: &str) -> usize {
        text.lines()
            .filter(|line| line.to_ascii_lowercase().starts_with("host:"))
            .count()
    }

    #[test]
    fn default_port_is_not_appended_to_host() {
        let text = encode(443, true, &BTreeMap::new(), Payload::Empty);

        assert_eq!(
            text,
            "POST /api/states/sensor.temp HTTP/1.0\r\nHost: hub.local\r\n\r\n"
        );
    }

    #[test]
    fn non_default_port_is_appended_to_host() {
        let headers = BTreeMap::new();

        let tls_port = encode(443, false, &headers, Payload::Empty);
        let custom_port = encode(8123, false, &headers, Payload::Empty);

        assert!(tls_port.contains("Host: hub.local:443\r\n"));
        assert!(custom_port.contains("Host: hub.local:8123\r\n"));
    }

    #[test]
    fn caller_host_header_replaces_default() {
        for key in ["Host", "host"] {
            let headers = BTreeMap::from([(key.to_string(), "proxy.local".to_string())]);
            let text = encode(80, false, &headers, Payload::Empty);

            assert_eq!(host_header_count(&text), 1);
            assert!(text.contains("proxy.local"));
        }
    }

    #[test]
    fn exactly_one_host_header_for_varied_requests() {
        let header_sets = [
            BTreeMap::new(),
            BTreeMap::from([("Authorization".to_string(), "Bearer x".to_string())]),
            BTreeMap::from([("Host".to_string(), "a".to_string())]),
            BTreeMap::from([
                ("HOST".to_string(), "b".to_string()),
                ("X-Extra".to_string(), "1".to_string()),
            ]),
        ];
        let bodies: [Payload<'static>; 3] = [
            Payload::Empty,
            Payload::Raw(b"raw"),
            Payload::Json(json!({"state": 1})),
        ];

        for headers in &header_sets {
            for body in &bodies {
                for (port, tls) in [(80, false), (443, true), (8123, false), (8443, true)] {
                    let text = encode(port, tls, headers, body.clone());
                    assert_eq!(host_header_count(&text), 1);
                }
            }
        }
    }

    #[test]
    fn json_payload_sets_type_and_exact_length() {
        let value = json!({"state": 21.5, "attributes": {"unit_of_measurement": "°C"}});
        let encoded = serde_json::to_vec(&value).unwrap();
        let text = encode(80, false, &BTreeMap::new(), Payload::Json(value));
        let (head, body) = text.split_once("\r\n\r\n").unwrap();

        assert!(head.contains("Content-Type: application/json\r\n"));
        assert!(head.ends_with(&format!("Content-Length: {}", encoded.len())));
        assert_eq!(body.as_bytes(), encoded.as_slice());
    }

    #[test]
    fn empty_raw_body_has_no_length() {
        let text = encode(80, false, &BTreeMap::new(), Payload::Raw(b""));

        assert!(!text.contains("Content-Length"));
    }

    #[tokio::test]
    async fn response_without_length_has_empty_body() {
        let (stream, _, shut_down) = ScriptedStream::new(b"HTTP/1.0 200 OK\r\nServer: hub\r\n\r\n");
        let response = exchange(stream, GET).await.unwrap();

        assert_eq!(
            response,
            Response {
                status: 200,
                reason: "OK".into(),
                body: Vec::new(),
            }
        );
        assert!(*shut_down.lock().unwrap());
    }

    #[tokio::test]
    async fn body_is_read_by_content_length() {
        let (stream, written, _) =
            ScriptedStream::new(b"HTTP/1.0 201 Created\r\nContent-Length: 5\r\n\r\nhello");
        let response = exchange(stream, POST).await.unwrap();

        assert_eq!(response.status, 201);
        assert_eq!(response.reason, "Created");
        assert_eq!(response.body, b"hello");
        assert_eq!(written.lock().unwrap().as_slice(), POST);
    }

    #[tokio::test]
    async fn chunked_response_is_unsupported() {
        let (stream, _, shut_down) = ScriptedStream::new(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
        );
        let err = exchange(stream, GET).await.unwrap_err();

        assert!(matches!(err, HttpError::UnsupportedFeature(_)));
        assert!(*shut_down.lock().unwrap());
    }

    #[tokio::test]
    async fn malformed_status_line_is_protocol_error() {
        for response in [&b"garbage\r\n\r\n"[..], b"", b"HTTP/1.0 abc OK\r\n\r\n"] {
            let (stream, _, shut_down) = ScriptedStream::new(response);
            let err = exchange(stream, GET).await.unwrap_err();

            assert!(matches!(err, HttpError::Protocol(_)), "{err:?}");
            assert!(*shut_down.lock().unwrap());
        }
    }

    #[tokio::test]
    async fn status_without_reason_is_accepted() {
        let (stream, _, _) = ScriptedStream::new(b"HTTP/1.0 204\r\n\r\n");
        let response = exchange(stream, GET).await.unwrap();

        assert_eq!(response.status, 204);
        assert_eq!(response.reason, "");
    }

    #[tokio::test]
    async fn truncated_body_is_protocol_error() {
        let (stream, _, _) =
            ScriptedStream::new(b"HTTP/1.0 200 OK\r\nContent-Length: 10\r\n\r\nshort");
        let err = exchange(stream, GET).await.unwrap_err();

        assert!(matches!(err, HttpError::Protocol(_)));
    }

    #[tokio::test]
    async fn oversized_content_length_is_protocol_error() {
        for length in ["18446744073709551615", "104857600"] {
            let response = format!("HTTP/1.0 200 OK\r\nContent-Length: {length}\r\n\r\nhi");
            let (stream, _, shut_down) = ScriptedStream::new(response.as_bytes());
            let err = exchange(stream, GET).await.unwrap_err();

            assert!(matches!(err, HttpError::Protocol(_)), "{err:?}");
            assert!(*shut_down.lock().unwrap());
        }
    }

    #[tokio::test]
    async fn overlong_header_line_is_protocol_error() {
        let mut response = b"HTTP/1.0 200 OK\r\nX-Padding: ".to_vec();
        response.resize(response.len() + 4 * MAX_LINE_LEN, b'a');
        response.extend_from_slice(b"\r\n\r\n");
        let (stream, _, _) = ScriptedStream::new(&response);

        let err = exchange(stream, GET).await.unwrap_err();

        assert!(matches!(err, HttpError::Protocol(_)), "{err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_connect_times_out() {
        let headers = BTreeMap::new();
        let limit = Some(Duration::from_secs(5));
        let client = HttpClient::new(Unreachable).with_timeout(limit);
        let started = Instant::now();

        let err = client
            .request("hub.local", 8123, false, &request(&headers, Payload::Empty))
            .await
            .unwrap_err();

        assert!(matches!(err, HttpError::Timeout), "{err:?}");
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
    }
}
