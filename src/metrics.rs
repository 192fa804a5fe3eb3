use metrics::{counter, histogram};
use std::time::Instant;

pub fn record_request(method: &str) {
    counter!("rpc_requests_total", "method" => method.to_string()).increment(1);
}

pub fn record_request_error(method: &str, kind: &str) {
    counter!("rpc_requests_error_total", "method" => method.to_string(), "kind" => kind.to_string())
        .increment(1);
}

pub fn record_job_started(direction: &str) {
    counter!("transfer_jobs_started_total", "direction" => direction.to_string()).increment(1);
}

pub fn record_job_finished(direction: &str, success: bool, start: Instant) {
    let outcome = if success { "done" } else { "failed" };
    counter!("transfer_jobs_finished_total", "direction" => direction.to_string(), "outcome" => outcome)
        .increment(1);
    histogram!("transfer_job_duration_seconds", "direction" => direction.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rows_exported(count: usize) {
    counter!("transfer_rows_exported_total").increment(count as u64);
}

pub fn record_rows_imported(count: u64) {
    counter!("transfer_rows_imported_total").increment(count);
}

pub fn record_batch_failed() {
    counter!("transfer_batches_failed_total").increment(1);
}

pub fn record_sessions_opened() {
    counter!("store_sessions_opened_total").increment(1);
}
