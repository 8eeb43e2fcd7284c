// Result presentation: a human-readable summary for the terminal and a
// JSON report for files.
use std::io::{self, Write};
use std::path::Path;

use anyhow::Context;

use crate::report::BenchResult;

const MEGABYTE: f64 = 1024.0 * 1024.0;

fn megabytes(bytes: i64) -> f64 {
    bytes as f64 / MEGABYTE
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 * 100.0 / total as f64
}

/// Write the full human-readable report: a run summary, one section per
/// endpoint and the per-batch breakdown across endpoints.
pub fn render(result: &BenchResult, out: &mut dyn Write) -> io::Result<()> {
    render_summary(result, out)?;
    for url in &result.urls {
        render_url(result, url, out)?;
    }
    render_batches(result, out)?;
    Ok(())
}

fn render_summary(result: &BenchResult, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "=== Benchmark Summary ===")?;
    if let (Some(start), Some(end)) = (result.start_time, result.end_time) {
        writeln!(out, "Started:               {}", start.to_rfc3339())?;
        writeln!(out, "Finished:              {}", end.to_rfc3339())?;
    }
    writeln!(out, "Total time:            {:?}", result.total_time)?;
    writeln!(out, "Total requests:        {}", result.total_requests)?;
    writeln!(
        out,
        "Successful requests:   {} ({:.1}%)",
        result.successful_requests,
        percent(result.successful_requests, result.total_requests)
    )?;
    writeln!(
        out,
        "Failed requests:       {} ({:.1}%)",
        result.failed_requests,
        percent(result.failed_requests, result.total_requests)
    )?;
    writeln!(
        out,
        "Timed out requests:    {} ({:.1}%)",
        result.timedout_requests,
        percent(result.timedout_requests, result.total_requests)
    )?;
    writeln!(
        out,
        "Data received:         {:.5} MB",
        megabytes(result.total_received_data_length)
    )?;
    writeln!(
        out,
        "Total response time:   {:?}",
        result.total_response_time
    )?;
    if let Some(avg) = result.average_response_time() {
        writeln!(out, "Avg response time:     {:?}", avg)?;
    }
    if let Some(shortest) = result.shortest_response_time {
        writeln!(out, "Shortest response:     {:?}", shortest)?;
    }
    if let Some(longest) = result.longest_response_time {
        writeln!(out, "Longest response:      {:?}", longest)?;
    }
    Ok(())
}

fn render_url(result: &BenchResult, url: &str, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "--- {} ---", url)?;
    writeln!(out, "Total requests:        {}", result.url_total_requests(url))?;
    writeln!(
        out,
        "Successful requests:   {}",
        result.url_successful_requests(url)
    )?;
    writeln!(out, "Failed requests:       {}", result.url_failed_requests(url))?;
    writeln!(
        out,
        "Timed out requests:    {}",
        result.url_timedout_requests(url)
    )?;
    writeln!(
        out,
        "Data received:         {:.5} MB",
        megabytes(result.received_data_length.get(url).copied().unwrap_or(0))
    )?;
    if let Some(sum) = result.response_time.get(url) {
        writeln!(out, "Total response time:   {:?}", sum)?;
    }
    if let Some(avg) = result.url_average_response_time(url) {
        writeln!(out, "Avg response time:     {:?}", avg)?;
    }
    if let Some(shortest) = result.shortest_response_times.get(url) {
        writeln!(out, "Shortest response:     {:?}", shortest)?;
    }
    if let Some(longest) = result.longest_response_times.get(url) {
        writeln!(out, "Longest response:      {:?}", longest)?;
    }

    if let Some(codes) = result.response_status_code.get(url) {
        let mut codes: Vec<_> = codes.iter().collect();
        codes.sort();
        for (code, count) in codes {
            writeln!(out, "Status {}:            {}", code, count)?;
        }
    }
    if let Some(codes) = result.failed_response_status_code.get(url) {
        let mut codes: Vec<_> = codes.iter().collect();
        codes.sort();
        for (code, count) in codes {
            writeln!(out, "Status {} (failed):   {}", code, count)?;
        }
    }
    Ok(())
}

fn render_batches(result: &BenchResult, out: &mut dyn Write) -> io::Result<()> {
    let batch_count = result
        .concurrency_result
        .values()
        .map(|batches| batches.len())
        .max()
        .unwrap_or(0);
    if batch_count == 0 {
        return Ok(());
    }

    let url_width = result
        .urls
        .iter()
        .map(|url| url.len())
        .max()
        .unwrap_or(0)
        .max("URL".len());

    for index in 0..batch_count {
        writeln!(out)?;
        writeln!(out, "=== Concurrency batch #{} ===", index + 1)?;
        writeln!(
            out,
            "{:<width$}  {:>8}  {:>8}  {:>8}  {:>8}",
            "URL",
            "Total",
            "Success",
            "Failed",
            "Timedout",
            width = url_width
        )?;
        for url in &result.urls {
            let Some(batch) = result
                .concurrency_result
                .get(url)
                .and_then(|batches| batches.get(index))
            else {
                continue;
            };
            writeln!(
                out,
                "{:<width$}  {:>8}  {:>8}  {:>8}  {:>8}",
                url,
                batch.total_requests,
                batch.successful_requests,
                batch.failed_requests,
                batch.timed_out_requests,
                width = url_width
            )?;
        }
    }
    Ok(())
}

/// Write the result as pretty-printed JSON to `path`, overwriting any
/// existing file.
pub fn write_json(result: &BenchResult, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("could not create {}", path.display()))?;
    serde_json::to_writer_pretty(io::BufWriter::new(file), result)
        .with_context(|| format!("could not write report to {}", path.display()))?;
    Ok(())
}
