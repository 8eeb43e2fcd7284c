// Benchmark execution: bounded-concurrency waves of requests across all
// configured endpoints, with per-request timing and outcome
// classification reported to the shared [`Recorder`].
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::header::USER_AGENT;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{Endpoint, Method, RunConfig};
use crate::error::BenchError;
use crate::report::Recorder;

/// User-Agent sent unless a configured header overrides it.
pub const DEFAULT_USER_AGENT: &str = "hbench";

/// Best-effort sink for per-attempt progress lines. Shared between all
/// request tasks; write failures are ignored.
type ProgressSink = Arc<Mutex<Box<dyn Write + Send>>>;

fn write_progress(sink: Option<&ProgressSink>, message: &str) {
    if let Some(sink) = sink {
        if let Ok(mut writer) = sink.lock() {
            let _ = writeln!(writer, "{}", message);
        }
    }
}

/// A configured benchmark, ready to execute. Holds the immutable run
/// configuration and the shared result accumulator.
pub struct Bench {
    config: RunConfig,
    report: Arc<Recorder>,
    success_status_codes: Arc<[u16]>,
    output: Option<ProgressSink>,
}

impl Bench {
    pub fn new(mut config: RunConfig, report: Arc<Recorder>) -> Self {
        config.normalize();
        let success_status_codes: Arc<[u16]> = config.success_status_codes.clone().into();
        Bench {
            config,
            report,
            success_status_codes,
            output: None,
        }
    }

    /// Attach a writer for per-wave and per-attempt progress lines.
    /// Without one, progress output is silently disabled.
    pub fn with_output(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.output = Some(Arc::new(Mutex::new(writer)));
        self
    }

    /// Run the benchmark to completion or until `cancel` fires.
    ///
    /// Requests are dispatched in waves of `concurrency` rounds, one
    /// request per endpoint per round, and every wave is joined before
    /// the next one starts. Individual request failures are recorded as
    /// statistics and never abort the run; only cancellation does, and a
    /// cancelled run still lets its in-flight wave finish so the result
    /// stays consistent. Start/end timestamps and the total elapsed
    /// duration are recorded either way.
    pub async fn exec(&self, cancel: CancellationToken) -> Result<(), BenchError> {
        let client = self.build_client()?;
        let started = Instant::now();
        self.report.set_start_time(Utc::now());

        let outcome = self.run_waves(&client, &cancel).await;

        self.report.set_end_time(Utc::now());
        self.report.set_total_duration(started.elapsed());
        outcome
    }

    async fn run_waves(
        &self,
        client: &reqwest::Client,
        cancel: &CancellationToken,
    ) -> Result<(), BenchError> {
        let total = self.config.requests;
        let mut remaining = total;

        while remaining > 0 {
            if cancel.is_cancelled() {
                return Err(BenchError::Cancelled);
            }

            let done = total - remaining;
            write_progress(
                self.output.as_ref(),
                &format!(
                    "{} of {} ({:.1}%)",
                    done,
                    total,
                    done as f64 * 100.0 / total as f64
                ),
            );

            let wave = self.config.concurrency.min(remaining);
            debug!(wave, remaining, "dispatching wave");

            let mut tasks = JoinSet::new();
            for _ in 0..wave {
                for endpoint in &self.config.endpoints {
                    self.spawn_request(&mut tasks, client, endpoint, cancel);
                }
            }
            remaining -= wave;

            let drained = async {
                while tasks.join_next().await.is_some() {}
            };
            tokio::pin!(drained);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    // Let the in-flight wave finish; its outcomes are
                    // still part of the result.
                    drained.await;
                    return Err(BenchError::Cancelled);
                }
                _ = &mut drained => {}
            }
        }

        Ok(())
    }

    fn spawn_request(
        &self,
        tasks: &mut JoinSet<()>,
        client: &reqwest::Client,
        endpoint: &Endpoint,
        cancel: &CancellationToken,
    ) {
        let request = match self.build_request(client, endpoint) {
            Ok(request) => request,
            Err(e) => {
                warn!(addr = %endpoint.addr, error = %e, "could not build request");
                self.report.record_failure(&endpoint.addr);
                write_progress(
                    self.output.as_ref(),
                    &format!("Error for {}: {}", endpoint.addr, e),
                );
                return;
            }
        };

        let task = RequestTask {
            client: client.clone(),
            report: Arc::clone(&self.report),
            success_status_codes: Arc::clone(&self.success_status_codes),
            output: self.output.clone(),
            cancel: cancel.clone(),
            addr: endpoint.addr.clone(),
        };
        tasks.spawn(task.run(request));
    }

    fn build_client(&self) -> Result<reqwest::Client, BenchError> {
        let mut builder = reqwest::Client::builder();

        if self.config.connection_timeout > Duration::ZERO {
            builder = builder.connect_timeout(self.config.connection_timeout);
        }
        if self.config.response_timeout > Duration::ZERO {
            builder = builder.timeout(self.config.response_timeout);
        }
        if let Some(proxy) = &self.config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(builder.build()?)
    }

    /// Materialize one request from an endpoint descriptor plus the
    /// run-level defaults. Endpoint headers overwrite run-level headers;
    /// cookie and auth resolve with the same endpoint-over-run
    /// precedence; body methods send their data as a URL-encoded form.
    fn build_request(
        &self,
        client: &reqwest::Client,
        endpoint: &Endpoint,
    ) -> Result<reqwest::Request, reqwest::Error> {
        let method = match endpoint.method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
        };

        let mut builder = client.request(method, &endpoint.addr);

        let mut headers = self.config.headers.clone();
        headers.extend(
            endpoint
                .headers
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );

        if !headers.keys().any(|key| key.eq_ignore_ascii_case("user-agent")) {
            builder = builder.header(USER_AGENT, DEFAULT_USER_AGENT);
        }
        for (key, value) in &headers {
            builder = builder.header(key, value);
        }

        let cookie = endpoint
            .raw_cookie
            .as_deref()
            .or(self.config.raw_cookie.as_deref());
        if let Some(cookie) = cookie {
            builder = builder.header("Set-Cookie", cookie);
        }

        if let Some(auth) = endpoint.auth.as_ref().or(self.config.auth.as_ref()) {
            builder = builder.basic_auth(&auth.username, Some(&auth.password));
        }

        if endpoint.method.allows_body() && !endpoint.data.is_empty() {
            builder = builder.form(&endpoint.data);
        }

        builder.build()
    }
}

/// One request attempt: everything a spawned task owns to execute a
/// prepared request and report exactly one outcome.
struct RequestTask {
    client: reqwest::Client,
    report: Arc<Recorder>,
    success_status_codes: Arc<[u16]>,
    output: Option<ProgressSink>,
    cancel: CancellationToken,
    addr: String,
}

impl RequestTask {
    async fn run(self, request: reqwest::Request) {
        let started = Instant::now();
        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.report.record_timeout(&self.addr);
                self.progress(&format!("Timed out request for {}: cancelled", self.addr));
                return;
            }
            response = self.client.execute(request) => response,
        };
        let elapsed = started.elapsed();

        let response = match response {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                self.report.record_timeout(&self.addr);
                self.progress(&format!("Timed out request for {}: {}", self.addr, e));
                return;
            }
            Err(e) => {
                self.report.record_failure(&self.addr);
                self.progress(&format!("Error for {}: {}", self.addr, e));
                return;
            }
        };

        let status = response.status().as_u16();
        // Body length is reported as unknown if the download fails.
        let length = match response.bytes().await {
            Ok(body) => body.len() as i64,
            Err(_) => 0,
        };

        self.report.record_timing(&self.addr, elapsed);
        self.report.record_data_length(&self.addr, length);
        self.report
            .record_status(&self.addr, status, self.is_failed(status));
        self.progress(&format!(
            "Received response for sent request to {} in {:?}. Status: {}",
            self.addr, elapsed, status
        ));
    }

    fn is_failed(&self, status_code: u16) -> bool {
        !self.success_status_codes.contains(&status_code)
    }

    fn progress(&self, message: &str) {
        write_progress(self.output.as_ref(), message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::Router;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;

    const TEST_BODY: &str = "Test data";

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn serve_status(status: StatusCode) -> String {
        serve(Router::new().route("/", get(move || async move { (status, TEST_BODY) }))).await
    }

    fn config_with(endpoints: Vec<Endpoint>, requests: usize, concurrency: usize) -> RunConfig {
        RunConfig {
            requests,
            concurrency,
            endpoints,
            ..RunConfig::default()
        }
    }

    /// A progress writer the test can read back after the run.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn waves_aggregate_across_endpoints() {
        let url_ok = format!("{}/", serve_status(StatusCode::OK).await);
        let url_created = format!("{}/", serve_status(StatusCode::CREATED).await);
        let url_not_found = format!("{}/", serve_status(StatusCode::NOT_FOUND).await);

        let endpoints = vec![
            Endpoint::new(url_ok.clone(), Method::Get),
            Endpoint::new(url_created.clone(), Method::Get),
            Endpoint::new(url_not_found.clone(), Method::Get),
        ];
        let report = Arc::new(Recorder::new(2));
        let bench = Bench::new(config_with(endpoints, 4, 2), Arc::clone(&report));

        bench.exec(CancellationToken::new()).await.unwrap();

        let result = report.snapshot();
        assert_eq!(result.total_requests, 12);
        assert_eq!(result.successful_requests, 8);
        assert_eq!(result.failed_requests, 4);
        assert_eq!(result.timedout_requests, 0);

        assert_eq!(result.response_status_code[&url_ok][&200], 4);
        assert_eq!(result.response_status_code[&url_created][&201], 4);
        assert_eq!(result.failed_response_status_code[&url_not_found][&404], 4);

        // 4 responses of "Test data" per endpoint.
        let expected_bytes = 4 * TEST_BODY.len() as i64;
        assert_eq!(result.received_data_length[&url_ok], expected_bytes);
        assert_eq!(result.total_received_data_length, 3 * expected_bytes);

        // 4 rounds at concurrency 2 make exactly 2 full batches per endpoint.
        for url in [&url_ok, &url_created, &url_not_found] {
            let batches = &result.concurrency_result[url];
            assert_eq!(batches.len(), 2, "batches for {}", url);
            assert_eq!(batches[0].total_requests, 2);
            assert_eq!(batches[1].total_requests, 2);
        }
        assert_eq!(result.concurrency_result[&url_not_found][0].failed_requests, 2);

        assert!(result.start_time.is_some());
        assert!(result.end_time.is_some());
        assert!(result.total_time > Duration::ZERO);
        assert!(result.shortest_response_time.is_some());
    }

    #[tokio::test]
    async fn post_sends_urlencoded_form() {
        let captured: Arc<Mutex<Vec<(axum::http::HeaderMap, String)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let app = Router::new().route(
            "/submit",
            post(move |headers: axum::http::HeaderMap, body: String| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push((headers, body));
                    (StatusCode::OK, "ok")
                }
            }),
        );
        let url = format!("{}/submit", serve(app).await);

        let mut endpoint = Endpoint::new(url, Method::Post);
        endpoint.data = HashMap::from([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);
        let report = Arc::new(Recorder::new(1));
        let bench = Bench::new(config_with(vec![endpoint], 1, 1), Arc::clone(&report));
        bench.exec(CancellationToken::new()).await.unwrap();

        let requests = captured.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let (headers, body) = &requests[0];

        let content_type = headers[axum::http::header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("application/x-www-form-urlencoded"));

        // Key order is unspecified; compare as decoded pairs.
        let pairs: HashMap<String, String> = url::form_urlencoded::parse(body.as_bytes())
            .into_owned()
            .collect();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs["a"], "1");
        assert_eq!(pairs["b"], "2");

        assert_eq!(report.snapshot().successful_requests, 1);
    }

    #[tokio::test]
    async fn header_cookie_and_auth_precedence() {
        let captured: Arc<Mutex<Vec<axum::http::HeaderMap>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let app = Router::new().route(
            "/",
            get(move |headers: axum::http::HeaderMap| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(headers);
                    "ok"
                }
            }),
        );
        let base = serve(app).await;

        let plain = Endpoint::new(format!("{}/", base), Method::Get);
        let mut overriding = Endpoint::new(format!("{}/", base), Method::Get);
        overriding.headers =
            HashMap::from([("X-Shared".to_string(), "endpoint".to_string())]);
        overriding.raw_cookie = Some("endpointCookie".to_string());
        overriding.auth = Some(crate::config::BasicAuth {
            username: "endpoint-user".to_string(),
            password: "pw".to_string(),
        });

        let mut config = config_with(vec![plain, overriding], 1, 1);
        config.headers =
            HashMap::from([("X-Shared".to_string(), "global".to_string())]);
        config.raw_cookie = Some("globalCookie".to_string());
        config.auth = Some(crate::config::BasicAuth {
            username: "global-user".to_string(),
            password: "pw".to_string(),
        });

        let report = Arc::new(Recorder::new(1));
        let bench = Bench::new(config, Arc::clone(&report));
        bench.exec(CancellationToken::new()).await.unwrap();

        let requests = captured.lock().unwrap();
        assert_eq!(requests.len(), 2);

        // Both endpoints hit the same path; tell them apart by the header value.
        let by_shared = |value: &str| {
            requests
                .iter()
                .find(|headers| headers["x-shared"] == value)
                .unwrap_or_else(|| panic!("no request with X-Shared {}", value))
        };

        let global = by_shared("global");
        assert_eq!(global["set-cookie"], "globalCookie");
        assert_eq!(global["user-agent"], DEFAULT_USER_AGENT);
        assert!(global["authorization"]
            .to_str()
            .unwrap()
            .starts_with("Basic "));

        let endpoint = by_shared("endpoint");
        assert_eq!(endpoint["set-cookie"], "endpointCookie");
        assert_ne!(global["authorization"], endpoint["authorization"]);
    }

    #[tokio::test]
    async fn explicit_user_agent_is_not_overwritten() {
        let captured: Arc<Mutex<Vec<axum::http::HeaderMap>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let app = Router::new().route(
            "/",
            get(move |headers: axum::http::HeaderMap| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(headers);
                    "ok"
                }
            }),
        );
        let url = format!("{}/", serve(app).await);

        let mut config = config_with(vec![Endpoint::new(url, Method::Get)], 1, 1);
        config.headers = HashMap::from([("User-Agent".to_string(), "custom-agent".to_string())]);

        let report = Arc::new(Recorder::new(1));
        Bench::new(config, Arc::clone(&report))
            .exec(CancellationToken::new())
            .await
            .unwrap();

        let requests = captured.lock().unwrap();
        assert_eq!(requests[0]["user-agent"], "custom-agent");
    }

    #[tokio::test]
    async fn unreachable_endpoint_records_transport_failure() {
        // Bind and immediately drop a listener so the port is closed.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = format!("http://{}/", addr);

        let report = Arc::new(Recorder::new(1));
        let bench = Bench::new(
            config_with(vec![Endpoint::new(url.clone(), Method::Get)], 1, 1),
            Arc::clone(&report),
        );
        bench.exec(CancellationToken::new()).await.unwrap();

        let result = report.snapshot();
        assert_eq!(result.total_requests, 1);
        assert_eq!(result.failed_requests, 1);
        assert_eq!(result.timedout_requests, 0);
        assert_eq!(result.failed_response[&url], 1);
        // Transport failures carry no status code.
        assert!(result.failed_response_status_code.is_empty());
    }

    #[tokio::test]
    async fn slow_response_records_timeout() {
        let app = Router::new().route(
            "/",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                "too late"
            }),
        );
        let url = format!("{}/", serve(app).await);

        let mut config = config_with(vec![Endpoint::new(url.clone(), Method::Get)], 1, 1);
        config.response_timeout = Duration::from_millis(50);

        let report = Arc::new(Recorder::new(1));
        Bench::new(config, Arc::clone(&report))
            .exec(CancellationToken::new())
            .await
            .unwrap();

        let result = report.snapshot();
        assert_eq!(result.total_requests, 1);
        assert_eq!(result.timedout_requests, 1);
        assert_eq!(result.timedout_response[&url], 1);
        assert_eq!(result.concurrency_result[&url][0].timed_out_requests, 1);
    }

    #[tokio::test]
    async fn custom_success_codes_reclassify_responses() {
        let url = format!("{}/", serve_status(StatusCode::NOT_FOUND).await);

        let mut config = config_with(vec![Endpoint::new(url.clone(), Method::Get)], 2, 1);
        config.success_status_codes = vec![404];

        let report = Arc::new(Recorder::new(1));
        Bench::new(config, Arc::clone(&report))
            .exec(CancellationToken::new())
            .await
            .unwrap();

        let result = report.snapshot();
        assert_eq!(result.successful_requests, 2);
        assert_eq!(result.failed_requests, 0);
        assert_eq!(result.response_status_code[&url][&404], 2);
    }

    #[tokio::test]
    async fn cancellation_stops_after_inflight_wave() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let app = Router::new().route(
            "/",
            get(move || {
                let trigger = trigger.clone();
                async move {
                    trigger.cancel();
                    "ok"
                }
            }),
        );
        let url = format!("{}/", serve(app).await);

        let report = Arc::new(Recorder::new(2));
        let bench = Bench::new(
            config_with(vec![Endpoint::new(url, Method::Get)], 6, 2),
            Arc::clone(&report),
        );

        let err = bench.exec(cancel).await.unwrap_err();
        assert!(matches!(err, BenchError::Cancelled));

        let result = report.snapshot();
        // Only the first wave was dispatched; its outcomes are recorded.
        assert_eq!(result.total_requests, 2);
        assert!(result.total_requests < 6);
        assert_eq!(
            result.total_requests,
            result.successful_requests + result.failed_requests + result.timedout_requests
        );
        assert!(result.end_time.is_some());
    }

    #[tokio::test]
    async fn already_cancelled_run_dispatches_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = Arc::new(Recorder::new(1));
        let bench = Bench::new(
            config_with(
                vec![Endpoint::new("http://127.0.0.1:9/", Method::Get)],
                3,
                1,
            ),
            Arc::clone(&report),
        );

        let err = bench.exec(cancel).await.unwrap_err();
        assert!(matches!(err, BenchError::Cancelled));
        assert_eq!(report.snapshot().total_requests, 0);
    }

    #[tokio::test]
    async fn progress_lines_reach_the_output_sink() {
        let url = format!("{}/", serve_status(StatusCode::OK).await);

        let buf = SharedBuf::default();
        let report = Arc::new(Recorder::new(1));
        let bench = Bench::new(
            config_with(vec![Endpoint::new(url.clone(), Method::Get)], 2, 1),
            Arc::clone(&report),
        )
        .with_output(Box::new(buf.clone()));

        bench.exec(CancellationToken::new()).await.unwrap();

        let output = buf.contents();
        assert!(output.contains("0 of 2"), "missing wave line: {}", output);
        assert!(output.contains("1 of 2"), "missing wave line: {}", output);
        assert!(
            output.contains("Received response for sent request"),
            "missing attempt line: {}",
            output
        );
        assert!(output.contains("Status: 200"), "{}", output);
    }

    #[tokio::test]
    async fn missing_sink_disables_progress_output() {
        let url = format!("{}/", serve_status(StatusCode::OK).await);
        let report = Arc::new(Recorder::new(1));
        let bench = Bench::new(
            config_with(vec![Endpoint::new(url, Method::Get)], 1, 1),
            Arc::clone(&report),
        );
        // No output sink attached; the run must still succeed.
        bench.exec(CancellationToken::new()).await.unwrap();
        assert_eq!(report.snapshot().total_requests, 1);
    }

    #[tokio::test]
    async fn wave_larger_than_remaining_requests_is_clamped() {
        let url = format!("{}/", serve_status(StatusCode::OK).await);
        let report = Arc::new(Recorder::new(4));
        let bench = Bench::new(
            config_with(vec![Endpoint::new(url.clone(), Method::Get)], 3, 4),
            Arc::clone(&report),
        );
        bench.exec(CancellationToken::new()).await.unwrap();

        let result = report.snapshot();
        assert_eq!(result.total_requests, 3);
        // A single wave of 3 rounds, windowed at concurrency 4.
        assert_eq!(result.concurrency_result[&url].len(), 1);
        assert_eq!(result.concurrency_result[&url][0].total_requests, 3);
    }
}
