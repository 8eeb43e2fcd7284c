// Run configuration: endpoint descriptors and the ways to build them
// (pipe-separated endpoint strings, endpoint files, JSON documents).
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::BenchError;

/// Default status codes treated as a successful response.
pub const DEFAULT_SUCCESS_STATUS_CODES: [u16; 3] = [200, 201, 202];

const ENDPOINT_FORMAT_HINT: &str =
    "expected METHOD|URL or METHOD|URL|key=value&key2=value2, \
     e.g. GET|http://www.example.com?search=test or POST|http://www.example.com|search=test";

/// HTTP methods supported for benchmark endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
}

impl Method {
    /// Whether requests with this method carry a form body.
    pub fn allows_body(self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
        }
    }
}

impl FromStr for Method {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            other => Err(BenchError::Config(format!(
                "method {} is not allowed (use GET, HEAD, POST, PUT or PATCH)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Basic HTTP authentication credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    /// Parse a `username:password` pair.
    pub fn parse(s: &str) -> Result<Self, BenchError> {
        let (username, password) = s.split_once(':').ok_or_else(|| {
            BenchError::Config(format!("{} is not a correct username:password format", s))
        })?;
        Ok(BasicAuth {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// One benchmark target. Immutable after construction; endpoint-level
/// headers, cookie and auth override the run-level defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub addr: String,
    pub method: Method,
    #[serde(default)]
    pub data: HashMap<String, String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub raw_cookie: Option<String>,
    #[serde(default)]
    pub auth: Option<BasicAuth>,
}

impl Endpoint {
    pub fn new(addr: impl Into<String>, method: Method) -> Self {
        Endpoint {
            addr: addr.into(),
            method,
            data: HashMap::new(),
            headers: HashMap::new(),
            raw_cookie: None,
            auth: None,
        }
    }
}

/// Everything a benchmark run needs: volume, concurrency, timeouts and the
/// endpoint list, plus run-level defaults for headers, cookie and auth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Wave size: number of rounds dispatched concurrently.
    pub concurrency: usize,
    /// Number of rounds, i.e. requests sent per endpoint.
    pub requests: usize,
    /// Zero means no connection timeout.
    pub connection_timeout: Duration,
    /// Zero means no response timeout.
    pub response_timeout: Duration,
    pub proxy: Option<String>,
    pub headers: HashMap<String, String>,
    pub raw_cookie: Option<String>,
    pub auth: Option<BasicAuth>,
    pub success_status_codes: Vec<u16>,
    pub endpoints: Vec<Endpoint>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            concurrency: 1,
            requests: 1,
            connection_timeout: Duration::ZERO,
            response_timeout: Duration::ZERO,
            proxy: None,
            headers: HashMap::new(),
            raw_cookie: None,
            auth: None,
            success_status_codes: DEFAULT_SUCCESS_STATUS_CODES.to_vec(),
            endpoints: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Clamp zero volume/concurrency to one and fall back to the default
    /// success codes when none are configured.
    pub fn normalize(&mut self) {
        if self.concurrency == 0 {
            self.concurrency = 1;
        }
        if self.requests == 0 {
            self.requests = 1;
        }
        if self.success_status_codes.is_empty() {
            self.success_status_codes = DEFAULT_SUCCESS_STATUS_CODES.to_vec();
        }
    }
}

/// Parse a pipe-separated endpoint string.
///
/// Supported formats:
///
/// `GET|http://www.example.com?search=test`
/// `POST|https://www.example.com|search=test&foo=bar`
/// `HEAD|https://www.example.com`
///
/// PUT and PATCH follow the POST format. Body methods require a data part,
/// GET and HEAD reject one.
pub fn parse_endpoint(line: &str) -> Result<Endpoint, BenchError> {
    let trimmed = line.trim().trim_matches('"').trim();
    let parts: Vec<&str> = trimmed.split('|').collect();

    if parts.len() != 2 && parts.len() != 3 {
        return Err(BenchError::invalid_endpoint(trimmed, ENDPOINT_FORMAT_HINT));
    }

    let method = Method::from_str(parts[0])
        .map_err(|_| BenchError::invalid_endpoint(trimmed, "method not allowed"))?;

    let parsed = url::Url::parse(parts[1])
        .map_err(|e| BenchError::invalid_endpoint(trimmed, e.to_string()))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(BenchError::invalid_endpoint(
            trimmed,
            "only http and https schemes are supported",
        ));
    }

    let data = if method.allows_body() {
        if parts.len() != 3 {
            return Err(BenchError::invalid_endpoint(
                trimmed,
                format!("{} requires a data part, e.g. name=foo&lastname=bar", method),
            ));
        }
        parse_form_data(parts[2]).map_err(|e| BenchError::invalid_endpoint(trimmed, e))?
    } else {
        if parts.len() > 2 {
            return Err(BenchError::invalid_endpoint(
                trimmed,
                "GET and HEAD do not take any data",
            ));
        }
        HashMap::new()
    };

    let mut endpoint = Endpoint::new(parsed.to_string(), method);
    endpoint.data = data;
    Ok(endpoint)
}

fn parse_form_data(s: &str) -> Result<HashMap<String, String>, String> {
    let mut data = HashMap::new();
    for pair in s.split('&') {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("wrong key=value format for data: {}", pair))?;
        data.insert(key.to_string(), value.to_string());
    }
    Ok(data)
}

/// Parse a `key=value` header string.
pub fn parse_header(header: &str) -> Result<(String, String), BenchError> {
    let (key, value) = header.split_once('=').ok_or_else(|| {
        BenchError::Config(format!("{} is not a correct key=value format", header))
    })?;
    Ok((key.to_string(), value.to_string()))
}

/// Load endpoints from a file with one endpoint string per line.
/// Blank lines are skipped; an empty file is an error.
pub fn endpoints_from_file(path: &Path) -> Result<Vec<Endpoint>, BenchError> {
    let contents = std::fs::read_to_string(path)?;
    let mut endpoints = Vec::new();

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        endpoints.push(parse_endpoint(line)?);
    }

    if endpoints.is_empty() {
        return Err(BenchError::Config(format!(
            "did not find any endpoint in {}",
            path.display()
        )));
    }

    Ok(endpoints)
}

/// Benchmark configuration loaded from a JSON document. All paths are
/// relative to a single host; timeouts are in milliseconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct JsonConfig {
    pub host: String,
    pub concurrency: usize,
    pub requests: usize,
    pub status_codes: Vec<u16>,
    /// Run-level `username:password`.
    pub user: String,
    pub proxy: String,
    pub connect_timeout: u64,
    pub response_timeout: u64,
    /// Run-level headers in `key=value` format.
    pub headers: Vec<String>,
    pub cookie: String,
    pub paths: Vec<PathConfig>,
}

/// One path entry of a JSON configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PathConfig {
    pub path: String,
    pub method: String,
    pub headers: Vec<String>,
    pub data: Vec<String>,
    pub cookie: String,
    /// Endpoint-level `username:password`.
    pub user: String,
}

/// Load a [`RunConfig`] from a JSON configuration file.
pub fn load_json_config(path: &Path) -> Result<RunConfig, BenchError> {
    let file = std::fs::File::open(path)
        .map_err(|e| BenchError::Config(format!("could not open {}: {}", path.display(), e)))?;
    let json: JsonConfig = serde_json::from_reader(file)?;
    run_config_from_json(json)
}

fn run_config_from_json(json: JsonConfig) -> Result<RunConfig, BenchError> {
    if json.host.is_empty() {
        return Err(BenchError::Config("no host is provided".to_string()));
    }
    if json.paths.is_empty() {
        return Err(BenchError::Config("no path is provided".to_string()));
    }

    let host = json.host.trim_end_matches(['/', '?', '&']);

    let mut config = RunConfig {
        concurrency: json.concurrency,
        requests: json.requests,
        connection_timeout: Duration::from_millis(json.connect_timeout),
        response_timeout: Duration::from_millis(json.response_timeout),
        success_status_codes: json.status_codes,
        ..RunConfig::default()
    };

    if !json.proxy.is_empty() {
        config.proxy = Some(json.proxy);
    }
    if !json.cookie.is_empty() {
        config.raw_cookie = Some(json.cookie);
    }
    if !json.user.is_empty() {
        config.auth = Some(BasicAuth::parse(&json.user)?);
    }
    for header in &json.headers {
        let (key, value) = parse_header(header)?;
        config.headers.insert(key, value);
    }

    for path in json.paths {
        let addr = format!("{}/{}", host, path.path.trim_start_matches('/'));
        let method = if path.method.is_empty() {
            Method::Get
        } else {
            Method::from_str(&path.method)?
        };

        let mut endpoint = Endpoint::new(addr, method);
        for pair in &path.data {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                BenchError::Config(format!("wrong key=value format for data: {}", pair))
            })?;
            endpoint.data.insert(key.to_string(), value.to_string());
        }
        for header in &path.headers {
            let (key, value) = parse_header(header)?;
            endpoint.headers.insert(key, value);
        }
        if !path.cookie.is_empty() {
            endpoint.raw_cookie = Some(path.cookie);
        }
        if !path.user.is_empty() {
            endpoint.auth = Some(BasicAuth::parse(&path.user)?);
        }

        config.endpoints.push(endpoint);
    }

    config.normalize();
    Ok(config)
}
