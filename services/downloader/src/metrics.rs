//! Prometheus metrics for download runs.

use std::time::Duration;

use metrics::{counter, histogram};

use crate::job::JobOutcome;

pub fn record_group_attempt(success: bool) {
    let outcome = if success { "success" } else { "error" };
    counter!("reforecast_group_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_bytes(bytes: u64) {
    counter!("reforecast_bytes_written_total").increment(bytes);
}

pub fn record_job(outcome: JobOutcome, elapsed: Duration) {
    counter!("reforecast_jobs_total", "outcome" => outcome.as_str()).increment(1);
    if outcome.transferred_data() {
        histogram!("reforecast_job_duration_seconds").record(elapsed.as_secs_f64());
    }
}
