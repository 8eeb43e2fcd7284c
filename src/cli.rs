use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{
    endpoints_from_file, parse_endpoint, parse_header, BasicAuth, RunConfig,
};
use crate::error::BenchError;

#[derive(Debug, Parser)]
#[command(
    name = "hbench",
    version,
    about = "HTTP benchmarking and load generating tool"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a benchmark configured entirely from command line flags
    Exec(ExecArgs),
    /// Run a benchmark described by a JSON configuration file
    Json(JsonArgs),
}

#[derive(Debug, Args)]
pub struct ExecArgs {
    /// Endpoint in METHOD|URL or METHOD|URL|key=value&key2=value2 format; repeatable
    #[arg(short = 'u', long = "url", value_name = "ENDPOINT")]
    pub urls: Vec<String>,

    /// File with one endpoint per line
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Number of concurrent rounds per wave
    #[arg(short = 'c', long = "concurrent", default_value_t = 1)]
    pub concurrent: usize,

    /// Number of rounds, i.e. requests sent per endpoint
    #[arg(short = 'r', long = "requests", default_value_t = 1)]
    pub requests: usize,

    /// Status codes counted as a successful response
    #[arg(
        short = 's',
        long = "status-codes",
        value_delimiter = ',',
        value_name = "CODE"
    )]
    pub status_codes: Vec<u16>,

    /// Username for basic authentication on every request
    #[arg(long = "auth-username", value_name = "USERNAME")]
    pub auth_username: Option<String>,

    /// Password for basic authentication on every request
    #[arg(long = "auth-password", value_name = "PASSWORD", requires = "auth_username")]
    pub auth_password: Option<String>,

    /// Proxy to route all requests through
    #[arg(long = "proxy-url", value_name = "URL")]
    pub proxy_url: Option<String>,

    /// Connection timeout in milliseconds; 0 disables it
    #[arg(short = 'C', long = "connection-timeout", default_value_t = 0, value_name = "MS")]
    pub connection_timeout: u64,

    /// Response timeout in milliseconds; 0 disables it
    #[arg(short = 'R', long = "response-timeout", default_value_t = 0, value_name = "MS")]
    pub response_timeout: u64,

    /// Run-level header in key=value format; repeatable
    #[arg(short = 'H', long = "header", value_name = "KEY=VALUE")]
    pub headers: Vec<String>,

    /// Cookie sent verbatim with every request
    #[arg(long = "raw-cookie", value_name = "COOKIE")]
    pub raw_cookie: Option<String>,

    #[command(flatten)]
    pub shared: SharedArgs,
}

#[derive(Debug, Args)]
pub struct JsonArgs {
    /// Path to the JSON configuration document
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    #[command(flatten)]
    pub shared: SharedArgs,
}

/// Flags common to both subcommands.
#[derive(Debug, Args)]
pub struct SharedArgs {
    /// Write the JSON report to this file
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Overwrite the output file if it already exists
    #[arg(short = 'F', long = "force")]
    pub force: bool,

    /// Print per-request progress while the benchmark runs
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl ExecArgs {
    /// Build the run configuration from the flag values. Endpoints come
    /// from repeated `--url` flags, an endpoint file, or both; at least
    /// one is required.
    pub fn run_config(&self) -> Result<RunConfig, BenchError> {
        let mut endpoints = Vec::new();
        for line in &self.urls {
            endpoints.push(parse_endpoint(line)?);
        }
        if let Some(file) = &self.file {
            endpoints.extend(endpoints_from_file(file)?);
        }
        if endpoints.is_empty() {
            return Err(BenchError::Config(
                "no endpoint is provided, use --url or --file".to_string(),
            ));
        }

        let mut config = RunConfig {
            concurrency: self.concurrent,
            requests: self.requests,
            connection_timeout: Duration::from_millis(self.connection_timeout),
            response_timeout: Duration::from_millis(self.response_timeout),
            proxy: self.proxy_url.clone(),
            raw_cookie: self.raw_cookie.clone(),
            success_status_codes: self.status_codes.clone(),
            endpoints,
            ..RunConfig::default()
        };

        if let Some(username) = &self.auth_username {
            config.auth = Some(BasicAuth {
                username: username.clone(),
                password: self.auth_password.clone().unwrap_or_default(),
            });
        }
        for header in &self.headers {
            let (key, value) = parse_header(header)?;
            config.headers.insert(key, value);
        }

        config.normalize();
        Ok(config)
    }
}
