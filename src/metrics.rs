use std::{
    collections::BTreeMap,
    fmt::Write,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use axum::{
    extract::{FromRef, MatchedPath, Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::state::AppState;

const REQUESTS_TOTAL: &str = "authcore_http_requests_total";
const REQUEST_DURATION: &str = "authcore_http_request_duration_seconds";

/// Upper bounds of the latency histogram, in seconds.
const BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SeriesKey {
    method: String,
    path: String,
    status: u16,
}

#[derive(Debug, Default)]
struct Series {
    count: u64,
    sum_secs: f64,
    /// Cumulative: `buckets[i]` counts every observation `<= BUCKETS[i]`.
    buckets: [u64; BUCKETS.len()],
}

/// Request counters and latency histograms keyed by method, route and
/// status, rendered in the Prometheus text format.
#[derive(Debug, Default)]
pub struct HttpMetrics {
    series: Mutex<BTreeMap<SeriesKey, Series>>,
}

impl HttpMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, method: &str, path: &str, status: u16, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let key = SeriesKey {
            method: method.to_owned(),
            path: path.to_owned(),
            status,
        };
        let mut series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = series.entry(key).or_default();
        entry.count += 1;
        entry.sum_secs += secs;
        for (bound, hits) in BUCKETS.iter().zip(entry.buckets.iter_mut()) {
            if secs <= *bound {
                *hits += 1;
            }
        }
    }

    pub fn render(&self) -> String {
        let series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::new();

        let _ = writeln!(out, "# HELP {REQUESTS_TOTAL} Total number of HTTP requests");
        let _ = writeln!(out, "# TYPE {REQUESTS_TOTAL} counter");
        for (key, s) in series.iter() {
            let _ = writeln!(out, "{REQUESTS_TOTAL}{{{}}} {}", labels(key), s.count);
        }

        let _ = writeln!(
            out,
            "# HELP {REQUEST_DURATION} Histogram of response time for handler in seconds"
        );
        let _ = writeln!(out, "# TYPE {REQUEST_DURATION} histogram");
        for (key, s) in series.iter() {
            let labels = labels(key);
            for (bound, hits) in BUCKETS.iter().zip(s.buckets.iter()) {
                let _ = writeln!(
                    out,
                    "{REQUEST_DURATION}_bucket{{{labels},le=\"{bound}\"}} {hits}"
                );
            }
            let _ = writeln!(
                out,
                "{REQUEST_DURATION}_bucket{{{labels},le=\"+Inf\"}} {}",
                s.count
            );
            let _ = writeln!(out, "{REQUEST_DURATION}_sum{{{labels}}} {}", s.sum_secs);
            let _ = writeln!(out, "{REQUEST_DURATION}_count{{{labels}}} {}", s.count);
        }
        out
    }
}

fn labels(key: &SeriesKey) -> String {
    format!(
        "method=\"{}\",path=\"{}\",status=\"{}\"",
        key.method, key.path, key.status
    )
}

impl FromRef<AppState> for Arc<HttpMetrics> {
    fn from_ref(state: &AppState) -> Self {
        state.metrics.clone()
    }
}

/// Route middleware. Labels by the matched route template so ids in the
/// path never become label values.
pub async fn track(
    State(metrics): State<Arc<HttpMetrics>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());

    let started = Instant::now();
    let res = next.run(req).await;
    metrics.observe(&method, &path, res.status().as_u16(), started.elapsed());
    res
}

pub async fn export(State(metrics): State<Arc<HttpMetrics>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        metrics.render(),
    )
}
