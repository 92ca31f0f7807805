//! Health check endpoint handler.
//!
//! This module provides the `/health` endpoint handler that reports the
//! enumerations, their sampling threads and the named lock statistics.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use herakles_pal::{Enumeration, LockInfo};
use std::fmt::Write as FmtWrite;
use std::sync::atomic::Ordering;
use tracing::{debug, instrument};

use crate::state::{Enumerations, SharedState};

// Time conversion constants
const SECONDS_PER_HOUR: f64 = 3600.0;
const MINUTES_PER_HOUR: f64 = 60.0;
const HOURS_PER_DAY: f64 = 24.0;

/// Footer text for human-readable HTTP endpoints.
pub const FOOTER_TEXT: &str = "Project: https://github.com/cansp-dev/herakles-pal | More info: https://www.herakles.now";

/// One row of the enumeration table.
struct EnumerationRow {
    name: &'static str,
    instances: usize,
    has_total: bool,
    sampling: Option<bool>,
}

fn row<E: Enumeration>(name: &'static str, e: &E, sampling: Option<bool>) -> EnumerationRow {
    let guard = e.lock();
    EnumerationRow {
        name,
        instances: guard.size(),
        has_total: guard.total_instance().is_some(),
        sampling,
    }
}

fn collect_rows(set: &Enumerations) -> Vec<EnumerationRow> {
    let mut rows = Vec::new();
    if let Some(e) = &set.cpu {
        rows.push(row("cpu", e, Some(e.is_sampling())));
    }
    if let Some(e) = &set.memory {
        rows.push(row("memory", e, Some(e.is_sampling())));
    }
    if let Some(e) = &set.processes {
        rows.push(row("process", e, Some(e.is_sampling())));
    }
    if let Some(e) = &set.logical_disks {
        rows.push(row("logical disk", e, None));
    }
    if let Some(e) = &set.physical_disks {
        rows.push(row("physical disk", e, None));
    }
    if let Some(e) = &set.logical_disk_stats {
        rows.push(row("logical disk stats", e, Some(e.is_sampling())));
    }
    if let Some(e) = &set.physical_disk_stats {
        rows.push(row("physical disk stats", e, Some(e.is_sampling())));
    }
    if let Some(e) = &set.network {
        rows.push(row("network", e, None));
    }
    if let Some(e) = &set.os {
        rows.push(row("os", e, None));
    }
    if let Some(e) = &set.test_items {
        rows.push(row("test item", e, None));
    }
    rows
}

/// Names of the enumerations this instance runs.
pub fn enabled_resources(set: &Enumerations) -> Vec<&'static str> {
    collect_rows(set).into_iter().map(|r| r.name).collect()
}

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");
    state.record_http_request();

    let rows = collect_rows(&state.enumerations);
    let stopped = rows.iter().any(|r| r.sampling == Some(false));

    let status = if stopped {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    let message = if stopped {
        "Sampling thread not running"
    } else {
        "OK"
    };

    let uptime_hours = state.start_time.elapsed().as_secs_f64() / SECONDS_PER_HOUR;
    let uptime_str = if uptime_hours < 1.0 {
        format!("{:.1} minutes", uptime_hours * MINUTES_PER_HOUR)
    } else if uptime_hours < HOURS_PER_DAY {
        format!("{:.1} hours", uptime_hours)
    } else {
        format!("{:.1} days", uptime_hours / HOURS_PER_DAY)
    };
    let requests = state.http_requests.load(Ordering::Relaxed);

    let table = render_enumerations(&rows);
    let locks = render_locks(&state.ctx.lock_stats());

    debug!("Health check: {} - {}", status, message);
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!(
            "{message}\n\nUptime: {uptime_str}\nHTTP requests: {requests}\n\n{table}\n{locks}\n{FOOTER_TEXT}"
        ),
    )
}

fn render_enumerations(rows: &[EnumerationRow]) -> String {
    let mut out = String::new();
    writeln!(out, "ENUMERATIONS").ok();
    writeln!(out, "============").ok();
    writeln!(out).ok();
    writeln!(
        out,
        "{:22} | {:>10} | {:>6} | {:>9}",
        "Enumeration", "Instances", "Total", "Sampling"
    )
    .ok();
    writeln!(out, "{}", "-".repeat(56)).ok();
    for r in rows {
        let sampling = match r.sampling {
            Some(true) => "running",
            Some(false) => "STOPPED",
            None => "-",
        };
        writeln!(
            out,
            "{:22} | {:>10} | {:>6} | {:>9}",
            r.name,
            r.instances,
            if r.has_total { "yes" } else { "no" },
            sampling
        )
        .ok();
    }
    out
}

/// Renders named lock statistics as a plain-text table.
fn render_locks(locks: &[LockInfo]) -> String {
    let mut out = String::new();
    writeln!(out, "NAMED LOCKS").ok();
    writeln!(out, "===========").ok();
    writeln!(out).ok();
    writeln!(
        out,
        "{:40} | {:>12} | {:>10}",
        "Lock", "Acquisitions", "Contended"
    )
    .ok();
    writeln!(out, "{}", "-".repeat(68)).ok();
    for lock in locks {
        writeln!(
            out,
            "{:40} | {:>12} | {:>10}",
            lock.name, lock.acquisitions, lock.contended
        )
        .ok();
    }
    out
}
