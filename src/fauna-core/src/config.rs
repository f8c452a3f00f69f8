use serde::{Deserialize, Serialize};

/// Environment flag enabling request diagnostics.
pub const DEBUG_ENV: &str = "FAUNA_DEBUG";
/// Environment flag enabling request diagnostics plus raw response dumps.
pub const DEBUG_RESPONSE_ENV: &str = "FAUNA_DEBUG_RESPONSE";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Credentials, checked in priority order by `credentials()`
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub client_key: Option<String>,
    #[serde(default)]
    pub publisher_key: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,

    // Endpoint
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub diagnostics: Diagnostics,
}

/// Out-of-band request logging switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Diagnostics {
    /// Log verb, reference, payload, status and timings for every request
    #[serde(default)]
    pub verbose: bool,
    /// Also log response headers and raw body
    #[serde(default)]
    pub dump_responses: bool,
}

impl Diagnostics {
    /// Read `FAUNA_DEBUG` / `FAUNA_DEBUG_RESPONSE` from the process environment.
    pub fn from_env() -> Self {
        Self::from_flags(
            std::env::var_os(DEBUG_ENV).is_some(),
            std::env::var_os(DEBUG_RESPONSE_ENV).is_some(),
        )
    }

    fn from_flags(debug: bool, debug_response: bool) -> Self {
        Self {
            verbose: debug || debug_response,
            dump_responses: debug_response,
        }
    }

    /// Union of two flag sets.
    pub fn merge(self, other: Diagnostics) -> Self {
        Self {
            verbose: self.verbose || other.verbose,
            dump_responses: self.dump_responses || other.dump_responses,
        }
    }

    pub fn enabled(&self) -> bool {
        self.verbose || self.dump_responses
    }
}

/// The single credential a connection authenticates with.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Token(String),
    ClientKey(String),
    PublisherKey(String),
    Basic { email: String, password: String },
}

impl Credentials {
    /// Userinfo pair as sent in the URL, before escaping.
    pub fn userinfo(&self) -> (&str, Option<&str>) {
        match self {
            Credentials::Token(key)
            | Credentials::ClientKey(key)
            | Credentials::PublisherKey(key) => (key, None),
            Credentials::Basic { email, password } => (email, Some(password)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credentials::Token(_) => "token",
            Credentials::ClientKey(_) => "client_key",
            Credentials::PublisherKey(_) => "publisher_key",
            Credentials::Basic { .. } => "email",
        }
    }
}

// Secrets stay out of debug output
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credentials({})", self.kind())
    }
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_domain() -> String {
    "rest.fauna.org".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

/// Unparseable ports are ignored with a warning, leaving the scheme default.
fn parse_port(value: &str) -> Option<u16> {
    match value.trim().parse() {
        Ok(port) => Some(port),
        Err(e) => {
            tracing::warn!(value, "Ignoring FAUNA_PORT: {}", e);
            None
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Build a config from `FAUNA_*` environment variables.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let mut config = Config::default();
        config.token = var("FAUNA_TOKEN");
        config.client_key = var("FAUNA_CLIENT_KEY");
        config.publisher_key = var("FAUNA_PUBLISHER_KEY");
        config.email = var("FAUNA_EMAIL");
        config.password = var("FAUNA_PASSWORD");
        if let Some(scheme) = var("FAUNA_SCHEME") {
            config.scheme = scheme;
        }
        if let Some(domain) = var("FAUNA_DOMAIN") {
            config.domain = domain;
        }
        config.port = var("FAUNA_PORT").and_then(|p| parse_port(&p));
        config.diagnostics = Diagnostics::from_env();
        config
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::default()
        }
    }

    /// Resolve the credential to use: token > client key > publisher key > email+password.
    pub fn credentials(&self) -> Option<Credentials> {
        if let Some(token) = &self.token {
            Some(Credentials::Token(token.clone()))
        } else if let Some(key) = &self.client_key {
            Some(Credentials::ClientKey(key.clone()))
        } else if let Some(key) = &self.publisher_key {
            Some(Credentials::PublisherKey(key.clone()))
        } else if let (Some(email), Some(password)) = (&self.email, &self.password) {
            Some(Credentials::Basic {
                email: email.clone(),
                password: password.clone(),
            })
        } else {
            None
        }
    }

    /// `scheme://domain[:port]` without credentials.
    pub fn origin(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.scheme, self.domain, port),
            None => format!("{}://{}", self.scheme, self.domain),
        }
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: None,
            client_key: None,
            publisher_key: None,
            email: None,
            password: None,
            scheme: default_scheme(),
            domain: default_domain(),
            port: None,
            timeout_secs: default_timeout_secs(),
            diagnostics: Diagnostics::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_credentials_priority() {
        let mut config = Config {
            token: Some("tok".to_string()),
            client_key: Some("client".to_string()),
            publisher_key: Some("pub".to_string()),
            email: Some("a@b.c".to_string()),
            password: Some("secret".to_string()),
            ..Config::default()
        };
        assert_eq!(config.credentials(), Some(Credentials::Token("tok".to_string())));

        config.token = None;
        assert_eq!(
            config.credentials(),
            Some(Credentials::ClientKey("client".to_string()))
        );

        config.client_key = None;
        assert_eq!(
            config.credentials(),
            Some(Credentials::PublisherKey("pub".to_string()))
        );

        config.publisher_key = None;
        assert_eq!(
            config.credentials(),
            Some(Credentials::Basic {
                email: "a@b.c".to_string(),
                password: "secret".to_string()
            })
        );
    }

    #[test]
    fn test_email_without_password_is_not_a_credential() {
        let config = Config {
            email: Some("a@b.c".to_string()),
            ..Config::default()
        };
        assert!(config.credentials().is_none());
        assert!(Config::default().credentials().is_none());
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let creds = Credentials::Token("super-secret".to_string());
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("token"));
    }

    #[test]
    fn test_origin() {
        let mut config = Config::default();
        assert_eq!(config.origin(), "https://rest.fauna.org");

        config.scheme = "http".to_string();
        config.domain = "localhost".to_string();
        config.port = Some(8443);
        assert_eq!(config.origin(), "http://localhost:8443");
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("8443"), Some(8443));
        assert_eq!(parse_port(" 443 "), Some(443));
        assert_eq!(parse_port("abc"), None);
        assert_eq!(parse_port("70000"), None);
    }

    #[test]
    fn test_diagnostics_flags() {
        assert_eq!(Diagnostics::from_flags(false, false), Diagnostics::default());

        let debug = Diagnostics::from_flags(true, false);
        assert!(debug.verbose);
        assert!(!debug.dump_responses);

        // Response dumping implies verbose logging
        let dump = Diagnostics::from_flags(false, true);
        assert!(dump.verbose);
        assert!(dump.dump_responses);

        assert_eq!(Diagnostics::default().merge(dump), dump);
    }

    #[test]
    fn test_load_applies_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"client_key": "ck", "diagnostics": {{"verbose": true}}}}"#).unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.client_key.as_deref(), Some("ck"));
        assert_eq!(config.domain, "rest.fauna.org");
        assert_eq!(config.scheme, "https");
        assert_eq!(config.timeout_secs, 60);
        assert!(config.diagnostics.verbose);
        assert!(!config.diagnostics.dump_responses);
    }
}
