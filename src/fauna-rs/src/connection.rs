use crate::{Error, Result};
use cpu_time::ProcessTime;
use fauna_core::{Config, Credentials, Diagnostics};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, Url};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const API_VERSION: u32 = 0;

/// Header carrying the server-side processing time in milliseconds
const TIME_TOTAL_HEADER: &str = "x-time-total";

/// A request ready to go on the wire
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
}

/// A raw response as received
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Executes HTTP exchanges for a [`Connection`].
///
/// Implementations return `Ok` for any response that arrived, whatever its
/// status; status classification happens in the connection.
pub trait HttpBackend: Send + Sync {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Blocking reqwest backend
pub struct ReqwestBackend {
    client: reqwest::blocking::Client,
}

impl ReqwestBackend {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::transport)?;
        Ok(Self { client })
    }
}

impl HttpBackend for ReqwestBackend {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        // reqwest moves URL userinfo into a basic auth header
        let mut builder = self
            .client
            .request(request.method, request.url)
            .query(&request.query)
            .header(CONTENT_TYPE, "application/json");
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().map_err(Error::transport)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response.text().map_err(Error::transport)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Fauna REST API connection
///
/// Cloning is cheap; clones share the underlying HTTP client.
#[derive(Clone)]
pub struct Connection {
    base_url: Url,
    credentials: Credentials,
    diagnostics: Diagnostics,
    backend: Arc<dyn HttpBackend>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.base_url.host_str())
            .field("credentials", &self.credentials)
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}

impl Connection {
    /// Connect using the blocking reqwest backend.
    ///
    /// Fails with [`Error::Configuration`] when no credential is set.
    /// `FAUNA_DEBUG` / `FAUNA_DEBUG_RESPONSE` switch on diagnostics in
    /// addition to `config.diagnostics`.
    pub fn new(config: &Config) -> Result<Self> {
        // Credentials are checked before any client is built
        resolve_credentials(config)?;
        let backend = ReqwestBackend::new(config.timeout())?;
        let mut connection = Self::with_backend(config, Arc::new(backend))?;
        connection.diagnostics = connection.diagnostics.merge(Diagnostics::from_env());
        Ok(connection)
    }

    /// Connect through a caller-provided backend.
    pub fn with_backend(config: &Config, backend: Arc<dyn HttpBackend>) -> Result<Self> {
        let credentials = resolve_credentials(config)?;
        let base_url = base_url(config, &credentials)?;

        Ok(Self {
            base_url,
            credentials,
            diagnostics: config.diagnostics,
            backend,
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    /// Full URL of a reference, credentials included.
    ///
    /// The reference is appended to the versioned base path as-is: `?`, `#`
    /// and `\` stay inside the path, existing `%XX` escapes are kept, and
    /// dot segments are rejected.
    pub fn url(&self, reference: &str) -> Result<Url> {
        let reference = normalize_reference(reference);
        let mut path = self.base_url.path().to_string();
        for (i, segment) in reference.split('/').enumerate() {
            if is_dot_segment(segment) {
                return Err(Error::InvalidReference(reference.to_string()));
            }
            if i > 0 {
                path.push('/');
            }
            escape_segment(segment, &mut path);
        }

        let mut url = self.base_url.clone();
        url.set_path(&path);
        Ok(url)
    }

    pub fn get<Q: AsRef<str>>(&self, reference: &str, query: &[(Q, Q)]) -> Result<Value> {
        let query = query
            .iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect();
        self.execute(Method::GET, reference, None, query, parse_json)
    }

    pub fn post<T: Serialize + ?Sized>(&self, reference: &str, data: &T) -> Result<Value> {
        let body = serde_json::to_string(data)?;
        self.execute(Method::POST, reference, Some(body), Vec::new(), parse_json)
    }

    pub fn put<T: Serialize + ?Sized>(&self, reference: &str, data: &T) -> Result<Value> {
        let body = serde_json::to_string(data)?;
        self.execute(Method::PUT, reference, Some(body), Vec::new(), parse_json)
    }

    pub fn patch<T: Serialize + ?Sized>(&self, reference: &str, data: &T) -> Result<Value> {
        let body = serde_json::to_string(data)?;
        self.execute(Method::PATCH, reference, Some(body), Vec::new(), parse_json)
    }

    pub fn delete(&self, reference: &str, data: Option<&Value>) -> Result<()> {
        let body = data.map(serde_json::to_string).transpose()?;
        self.execute(Method::DELETE, reference, body, Vec::new(), |_| Ok(()))
    }

    fn request(
        &self,
        method: Method,
        reference: &str,
        body: Option<String>,
        query: Vec<(String, String)>,
    ) -> Result<HttpRequest> {
        Ok(HttpRequest {
            method,
            url: self.url(reference)?,
            query,
            body,
        })
    }

    /// Run one exchange and decode the successful response.
    fn execute<T>(
        &self,
        method: Method,
        reference: &str,
        body: Option<String>,
        query: Vec<(String, String)>,
        decode: impl FnOnce(&HttpResponse) -> Result<T>,
    ) -> Result<T> {
        if !self.diagnostics.enabled() {
            let request = self.request(method, reference, body, query)?;
            let response = classify(self.backend.execute(request)?)?;
            return decode(&response);
        }

        match &body {
            Some(payload) => debug!("  Fauna {} \"{}\"    --> \n{}", method, reference, payload),
            None => debug!("  Fauna {} \"{}\"", method, reference),
        }

        let stopwatch = Stopwatch::start();
        let request = self.request(method.clone(), reference, body, query)?;
        let response = match self.backend.execute(request) {
            Ok(response) => response,
            Err(e) => {
                let timings = stopwatch.stop();
                warn!(
                    "    --> {} \"{}\" failed after {}ms: {}",
                    method,
                    reference,
                    timings.wall.as_millis(),
                    e
                );
                return Err(e);
            }
        };

        if self.diagnostics.dump_responses {
            debug!("{:?}\n{}", response.headers, response.body);
        }
        let status = response.status;
        let api_ms = response.header(TIME_TOTAL_HEADER).unwrap_or("?").to_string();
        let outcome = classify(response).and_then(|response| decode(&response));

        let timings = stopwatch.stop();
        debug!(
            status,
            network_ms = timings.network().as_millis() as u64,
            local_ms = timings.cpu.as_millis() as u64,
            "    --> {}: API processing {}ms, network latency {}ms, local processing {}ms",
            status,
            api_ms,
            timings.network().as_millis(),
            timings.cpu.as_millis()
        );

        outcome
    }
}

/// Wall and process CPU time across one exchange
struct Stopwatch {
    wall: Instant,
    cpu: Option<ProcessTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Timings {
    wall: Duration,
    cpu: Duration,
}

impl Stopwatch {
    fn start() -> Self {
        Self {
            wall: Instant::now(),
            cpu: ProcessTime::try_now().ok(),
        }
    }

    fn stop(self) -> Timings {
        Timings {
            wall: self.wall.elapsed(),
            cpu: self.cpu.map(|cpu| cpu.elapsed()).unwrap_or_default(),
        }
    }
}

impl Timings {
    /// Time spent waiting rather than computing: wall minus CPU.
    fn network(&self) -> Duration {
        self.wall.saturating_sub(self.cpu)
    }
}

pub(crate) fn normalize_reference(reference: &str) -> &str {
    reference.trim_start_matches('/')
}

fn is_dot_segment(segment: &str) -> bool {
    let unescaped = segment.to_ascii_lowercase().replace("%2e", ".");
    unescaped == "." || unescaped == ".."
}

// `set_path` escapes everything else; these would end the path or split it
fn escape_segment(segment: &str, out: &mut String) {
    for c in segment.chars() {
        match c {
            '?' => out.push_str("%3F"),
            '#' => out.push_str("%23"),
            '\\' => out.push_str("%5C"),
            c => out.push(c),
        }
    }
}

fn resolve_credentials(config: &Config) -> Result<Credentials> {
    config
        .credentials()
        .ok_or_else(|| Error::Configuration("Credentials not defined.".to_string()))
}

fn base_url(config: &Config, credentials: &Credentials) -> Result<Url> {
    let userinfo = match credentials.userinfo() {
        (user, Some(password)) => format!(
            "{}:{}",
            urlencoding::encode(user),
            urlencoding::encode(password)
        ),
        (user, None) => urlencoding::encode(user).into_owned(),
    };
    let origin = config.origin();
    let (scheme, host) = origin
        .split_once("://")
        .ok_or_else(|| Error::Configuration(format!("invalid origin {:?}", origin)))?;

    let url = format!("{}://{}@{}/v{}/", scheme, userinfo, host, API_VERSION);
    Url::parse(&url).map_err(|e| Error::Configuration(format!("invalid endpoint {}: {}", origin, e)))
}

fn classify(response: HttpResponse) -> Result<HttpResponse> {
    match response.status {
        200..=299 => Ok(response),
        status => Err(Error::from_status(status, &response.body)),
    }
}

fn parse_json(response: &HttpResponse) -> Result<Value> {
    Ok(serde_json::from_str(&response.body)?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses and records every request it sees
    #[derive(Default)]
    pub(crate) struct StubBackend {
        responses: Mutex<VecDeque<HttpResponse>>,
        pub(crate) requests: Mutex<Vec<HttpRequest>>,
    }

    impl StubBackend {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn respond(&self, status: u16, body: Value) -> &Self {
            self.responses
                .lock()
                .unwrap()
                .push_back(HttpResponse::new(status, body.to_string()));
            self
        }

        pub(crate) fn respond_raw(&self, response: HttpResponse) -> &Self {
            self.responses.lock().unwrap().push_back(response);
            self
        }

        pub(crate) fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub(crate) fn last_request(&self) -> HttpRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl HttpBackend for StubBackend {
        fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::transport("no stubbed response"))
        }
    }

    pub(crate) fn stub_connection(backend: &Arc<StubBackend>) -> Connection {
        Connection::with_backend(&Config::with_token("secret"), backend.clone()).unwrap()
    }

    #[test]
    fn test_missing_credentials_fail_before_network() {
        let backend = StubBackend::new();
        let err = Connection::with_backend(&Config::default(), backend.clone()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(backend.request_count(), 0);

        assert!(matches!(
            Connection::new(&Config::default()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_url_embeds_escaped_credentials() {
        let backend = StubBackend::new();
        let config = Config {
            email: Some("user@example.com".to_string()),
            password: Some("p@ss word".to_string()),
            ..Config::default()
        };
        let connection = Connection::with_backend(&config, backend).unwrap();
        let url = connection.url("users/self").unwrap();

        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("rest.fauna.org"));
        assert_eq!(url.username(), "user%40example.com");
        assert_eq!(url.password(), Some("p%40ss%20word"));
        assert_eq!(url.path(), "/v0/users/self");
    }

    #[test]
    fn test_url_honors_endpoint_config() {
        let backend = StubBackend::new();
        let config = Config {
            publisher_key: Some("pk/1".to_string()),
            scheme: "http".to_string(),
            domain: "localhost".to_string(),
            port: Some(8443),
            ..Config::default()
        };
        let connection = Connection::with_backend(&config, backend).unwrap();
        let url = connection.url("/classes/pigs").unwrap();

        assert_eq!(
            url.as_str(),
            "http://pk%2F1@localhost:8443/v0/classes/pigs"
        );
        assert_eq!(connection.credentials().kind(), "publisher_key");
    }

    #[test]
    fn test_url_keeps_reference_inside_versioned_path() {
        let backend = StubBackend::new();
        let connection = stub_connection(&backend);

        // A colon in the first segment is not a scheme
        let url = connection.url("users:1/x").unwrap();
        assert_eq!(url.host_str(), Some("rest.fauna.org"));
        assert_eq!(url.username(), "secret");
        assert_eq!(url.path(), "/v0/users:1/x");

        let url = connection.url("users/1?x=1#frag").unwrap();
        assert_eq!(url.path(), "/v0/users/1%3Fx=1%23frag");
        assert!(url.query().is_none());
        assert!(url.fragment().is_none());

        let url = connection.url("classes/a\\b").unwrap();
        assert_eq!(url.path(), "/v0/classes/a%5Cb");

        // Pre-escaped terms are sent unchanged
        let url = connection.url("users/constraints/data%2Femail/a%40b").unwrap();
        assert_eq!(url.path(), "/v0/users/constraints/data%2Femail/a%40b");
    }

    #[test]
    fn test_url_rejects_dot_segments() {
        let backend = StubBackend::new();
        let connection = stub_connection(&backend);

        for reference in ["users/../databases", "./users", "users/%2E%2e/keys", "users/."] {
            assert!(
                matches!(connection.url(reference), Err(Error::InvalidReference(_))),
                "{} should be rejected",
                reference
            );
        }
        assert!(matches!(
            connection.get::<&str>("users/../databases", &[]),
            Err(Error::InvalidReference(_))
        ));
        assert_eq!(backend.request_count(), 0);

        // Dots inside a segment are ordinary characters
        assert_eq!(connection.url("keys/a..b").unwrap().path(), "/v0/keys/a..b");
    }

    #[test]
    fn test_timings_split_wall_into_network_and_cpu() {
        let timings = Timings {
            wall: Duration::from_millis(120),
            cpu: Duration::from_millis(20),
        };
        assert_eq!(timings.network(), Duration::from_millis(100));

        let busy = Timings {
            wall: Duration::from_millis(5),
            cpu: Duration::from_millis(8),
        };
        assert_eq!(busy.network(), Duration::ZERO);
    }

    #[test]
    fn test_get_sends_query_and_parses_body() {
        let backend = StubBackend::new();
        backend.respond(200, json!({"resource": {"ref": "users/1"}}));
        let connection = stub_connection(&backend);

        let value = connection.get("users/1", &[("ts", "123")]).unwrap();
        assert_eq!(value["resource"]["ref"], "users/1");

        let request = backend.last_request();
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.query, vec![("ts".to_string(), "123".to_string())]);
        assert!(request.body.is_none());
    }

    #[test]
    fn test_write_verbs_serialize_payload() {
        let backend = StubBackend::new();
        backend
            .respond(201, json!({"resource": {"ref": "users/1"}}))
            .respond(200, json!({"resource": {"ref": "users/1"}}))
            .respond(200, json!({"resource": {"ref": "users/1"}}));
        let connection = stub_connection(&backend);
        let data = json!({"data": {"a": 1}});

        connection.post("users", &data).unwrap();
        assert_eq!(backend.last_request().method, Method::POST);
        connection.put("users/1", &data).unwrap();
        assert_eq!(backend.last_request().method, Method::PUT);
        connection.patch("users/1", &data).unwrap();

        let request = backend.last_request();
        assert_eq!(request.method, Method::PATCH);
        let sent: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(sent, data);
    }

    #[test]
    fn test_delete_returns_unit_and_ignores_body() {
        let backend = StubBackend::new();
        backend.respond_raw(HttpResponse::new(204, ""));
        let connection = stub_connection(&backend);

        connection.delete("users/1", None).unwrap();
        let request = backend.last_request();
        assert_eq!(request.method, Method::DELETE);
        assert!(request.body.is_none());
    }

    #[test]
    fn test_not_found_carries_body() {
        let backend = StubBackend::new();
        backend.respond(404, json!({"error": "not found"}));
        let connection = stub_connection(&backend);

        match connection.get::<&str>("classes/x/1", &[]) {
            Err(Error::NotFound(body)) => {
                assert_eq!(body.json, Some(json!({"error": "not found"})));
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_status_is_network_error() {
        let backend = StubBackend::new();
        backend.respond_raw(HttpResponse::new(502, "Bad Gateway"));
        let connection = stub_connection(&backend);

        let err = connection.post("users", &json!({})).unwrap_err();
        assert!(matches!(err, Error::Network { status: Some(502), .. }));
        assert_eq!(err.body().unwrap().raw, "Bad Gateway");
    }

    #[test]
    fn test_transport_failure_propagates() {
        let backend = StubBackend::new();
        let connection = stub_connection(&backend);

        let err = connection.delete("users/1", None).unwrap_err();
        assert!(matches!(err, Error::Network { status: None, .. }));
    }

    #[test]
    fn test_diagnostics_do_not_change_results() {
        let backend = StubBackend::new();
        let mut timed = HttpResponse::new(200, json!({"resource": {"ref": "users/1"}}).to_string());
        timed.headers.push(("X-Time-Total".to_string(), "7".to_string()));
        backend
            .respond_raw(timed)
            .respond(401, json!({"error": "unauthorized"}));

        let config = Config {
            diagnostics: Diagnostics {
                verbose: true,
                dump_responses: true,
            },
            ..Config::with_token("secret")
        };
        let connection = Connection::with_backend(&config, backend.clone()).unwrap();

        let value = connection.post("users", &json!({"email": "a@b.c"})).unwrap();
        assert_eq!(value["resource"]["ref"], "users/1");
        assert!(matches!(
            connection.get::<&str>("users/2", &[]),
            Err(Error::Unauthorized(_))
        ));
        assert_eq!(backend.request_count(), 2);
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLog {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_diagnostics_log_request_and_timings() {
        let backend = StubBackend::new();
        let mut timed = HttpResponse::new(200, json!({"resource": {"ref": "users/1"}}).to_string());
        timed.headers.push(("X-Time-Total".to_string(), "7".to_string()));
        backend
            .respond_raw(timed)
            .respond(404, json!({"error": "not found"}));

        let config = Config {
            diagnostics: Diagnostics {
                verbose: true,
                dump_responses: true,
            },
            ..Config::with_token("secret")
        };
        let connection = Connection::with_backend(&config, backend.clone()).unwrap();

        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            connection.post("users", &json!({"email": "a@b.c"})).unwrap();
            assert!(connection.get::<&str>("users/2", &[]).is_err());
        });

        let output = log.contents();
        assert!(output.contains("Fauna POST \"users\""), "{}", output);
        assert!(output.contains(r#"{"email":"a@b.c"}"#), "{}", output);
        assert!(output.contains("--> 200: API processing 7ms, network latency"), "{}", output);
        assert!(output.contains("local processing"), "{}", output);
        assert!(output.contains("network_ms="), "{}", output);
        assert!(output.contains("local_ms="), "{}", output);
        // Raw response dump
        assert!(output.contains(r#"{"resource":{"ref":"users/1"}}"#), "{}", output);
        // Errors are still timed
        assert!(output.contains("--> 404: API processing ?ms"), "{}", output);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut response = HttpResponse::new(200, "");
        response.headers.push(("X-Time-Total".to_string(), "12".to_string()));
        assert_eq!(response.header(TIME_TOTAL_HEADER), Some("12"));
        assert_eq!(response.header("x-missing"), None);
    }
}
