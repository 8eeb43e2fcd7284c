// Benchmark result accumulator.
//
// A single `Recorder` is shared by every in-flight request task; each
// record call is one atomic update under one coarse lock. Averages are
// never stored, only derived, so the aggregate stays consistent at every
// observation point.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Statistics for one batch of concurrent requests against one endpoint.
/// A batch never holds more than the configured concurrency; batches are
/// filled in completion order, so only their sizes map onto dispatch
/// rounds deterministically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConcurrencyBatch {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub timed_out_requests: u64,
}

/// The aggregate of everything collected during a run. All fields are
/// public and serde-traversable; the kebab-case names are the stable
/// surface of the JSON report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BenchResult {
    pub urls: BTreeSet<String>,

    pub total_received_data_length: i64,
    pub received_data_length: HashMap<String, i64>,
    pub response_status_code: HashMap<String, HashMap<u16, u64>>,
    pub failed_response_status_code: HashMap<String, HashMap<u16, u64>>,
    pub timedout_response: HashMap<String, u64>,
    pub failed_response: HashMap<String, u64>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub timedout_requests: u64,

    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_time: Duration,
    pub total_response_time: Duration,
    pub response_times_total_count: u64,
    pub response_time: HashMap<String, Duration>,
    pub response_times_count: HashMap<String, u64>,
    pub shortest_response_times: HashMap<String, Duration>,
    pub longest_response_times: HashMap<String, Duration>,
    pub shortest_response_time: Option<Duration>,
    pub longest_response_time: Option<Duration>,

    pub concurrency_result: HashMap<String, Vec<ConcurrencyBatch>>,

    #[serde(skip)]
    concurrency: usize,
    #[serde(skip)]
    batch_counters: HashMap<String, u64>,
}

impl BenchResult {
    fn mark_url(&mut self, url: &str) {
        if !self.urls.contains(url) {
            self.urls.insert(url.to_string());
        }
    }

    /// Feed one completed attempt into the endpoint's batch window.
    /// Opens a new batch whenever the completion counter is a multiple of
    /// the configured concurrency; disabled entirely when concurrency is 0.
    fn update_batches(&mut self, url: &str, successful: u64, failed: u64, timed_out: u64) {
        if self.concurrency == 0 {
            return;
        }

        let counter = self.batch_counters.entry(url.to_string()).or_insert(0);
        let batches = self.concurrency_result.entry(url.to_string()).or_default();

        if *counter % self.concurrency as u64 == 0 {
            batches.push(ConcurrencyBatch {
                total_requests: 1,
                successful_requests: successful,
                failed_requests: failed,
                timed_out_requests: timed_out,
            });
        } else if let Some(last) = batches.last_mut() {
            last.total_requests += 1;
            last.successful_requests += successful;
            last.failed_requests += failed;
            last.timed_out_requests += timed_out;
        }

        *counter += 1;
    }

    /// Mean response time across all endpoints; `None` before any sample.
    pub fn average_response_time(&self) -> Option<Duration> {
        average(self.total_response_time, self.response_times_total_count)
    }

    /// Mean response time for one endpoint; `None` before any sample.
    pub fn url_average_response_time(&self, url: &str) -> Option<Duration> {
        let sum = *self.response_time.get(url)?;
        average(sum, self.response_times_count.get(url).copied().unwrap_or(0))
    }

    /// Successful requests for one endpoint (sum of its success histogram).
    pub fn url_successful_requests(&self, url: &str) -> u64 {
        self.response_status_code
            .get(url)
            .map(|codes| codes.values().sum())
            .unwrap_or(0)
    }

    /// Failed requests for one endpoint: transport failures plus responses
    /// with a non-success status code.
    pub fn url_failed_requests(&self, url: &str) -> u64 {
        let transport = self.failed_response.get(url).copied().unwrap_or(0);
        let status: u64 = self
            .failed_response_status_code
            .get(url)
            .map(|codes| codes.values().sum())
            .unwrap_or(0);
        transport + status
    }

    /// Timed-out requests for one endpoint.
    pub fn url_timedout_requests(&self, url: &str) -> u64 {
        self.timedout_response.get(url).copied().unwrap_or(0)
    }

    /// Total requests for one endpoint.
    pub fn url_total_requests(&self, url: &str) -> u64 {
        self.url_successful_requests(url)
            + self.url_failed_requests(url)
            + self.url_timedout_requests(url)
    }
}

fn average(sum: Duration, count: u64) -> Option<Duration> {
    if count == 0 {
        return None;
    }
    Some(Duration::from_nanos((sum.as_nanos() / count as u128) as u64))
}

/// Shared, lock-protected accumulator for a single benchmark run.
///
/// Every mutating operation takes the same lock for its full duration, so
/// one request outcome always appears as one atomic update to concurrent
/// readers of the finished result.
pub struct Recorder {
    inner: Mutex<BenchResult>,
}

impl Recorder {
    /// Create an empty accumulator. `concurrency` sizes the per-endpoint
    /// batch window; 0 disables windowing.
    pub fn new(concurrency: usize) -> Self {
        Recorder {
            inner: Mutex::new(BenchResult {
                concurrency,
                ..BenchResult::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BenchResult> {
        self.inner.lock().unwrap()
    }

    /// Record the elapsed time of one completed response, updating sums,
    /// counts and running extrema both globally and per endpoint.
    pub fn record_timing(&self, url: &str, elapsed: Duration) {
        let mut result = self.lock();
        result.mark_url(url);

        result.response_times_total_count += 1;
        result.total_response_time += elapsed;

        match result.shortest_response_time {
            Some(shortest) if shortest <= elapsed => {}
            _ => result.shortest_response_time = Some(elapsed),
        }
        match result.longest_response_time {
            Some(longest) if longest >= elapsed => {}
            _ => result.longest_response_time = Some(elapsed),
        }

        let shortest = result
            .shortest_response_times
            .entry(url.to_string())
            .or_insert(elapsed);
        if *shortest > elapsed {
            *shortest = elapsed;
        }
        let longest = result
            .longest_response_times
            .entry(url.to_string())
            .or_insert(elapsed);
        if *longest < elapsed {
            *longest = elapsed;
        }

        *result.response_time.entry(url.to_string()).or_default() += elapsed;
        *result
            .response_times_count
            .entry(url.to_string())
            .or_default() += 1;
    }

    /// Add received payload bytes for one response. A non-positive length
    /// means "unknown" and changes nothing.
    pub fn record_data_length(&self, url: &str, length: i64) {
        let mut result = self.lock();
        result.mark_url(url);

        if length <= 0 {
            return;
        }

        result.total_received_data_length += length;
        *result
            .received_data_length
            .entry(url.to_string())
            .or_default() += length;
    }

    /// Record a response with a status code, counted as successful or
    /// failed according to `failed`, and kept in the matching histogram.
    pub fn record_status(&self, url: &str, status_code: u16, failed: bool) {
        let mut result = self.lock();
        result.mark_url(url);
        result.total_requests += 1;

        if failed {
            result.update_batches(url, 0, 1, 0);
            result.failed_requests += 1;
            *result
                .failed_response_status_code
                .entry(url.to_string())
                .or_default()
                .entry(status_code)
                .or_default() += 1;
        } else {
            result.update_batches(url, 1, 0, 0);
            result.successful_requests += 1;
            *result
                .response_status_code
                .entry(url.to_string())
                .or_default()
                .entry(status_code)
                .or_default() += 1;
        }
    }

    /// Record a request that timed out or was cancelled mid-flight.
    pub fn record_timeout(&self, url: &str) {
        let mut result = self.lock();
        result.mark_url(url);
        result.update_batches(url, 0, 0, 1);

        result.total_requests += 1;
        result.timedout_requests += 1;
        *result.timedout_response.entry(url.to_string()).or_default() += 1;
    }

    /// Record a transport-level failure with no status code.
    pub fn record_failure(&self, url: &str) {
        let mut result = self.lock();
        result.mark_url(url);
        result.update_batches(url, 0, 1, 0);

        result.total_requests += 1;
        result.failed_requests += 1;
        *result.failed_response.entry(url.to_string()).or_default() += 1;
    }

    pub fn set_start_time(&self, t: DateTime<Utc>) {
        self.lock().start_time = Some(t);
    }

    pub fn set_end_time(&self, t: DateTime<Utc>) {
        self.lock().end_time = Some(t);
    }

    pub fn set_total_duration(&self, duration: Duration) {
        self.lock().total_time = duration;
    }

    /// A point-in-time copy of the aggregate.
    pub fn snapshot(&self) -> BenchResult {
        self.lock().clone()
    }

    /// Consume the recorder and hand out the final aggregate.
    pub fn into_result(self) -> BenchResult {
        self.inner.into_inner().unwrap()
    }
}
