//! The health stage: short-circuits the configured health path with an
//! aggregate report over the application's registered probes.

use std::sync::Arc;
use std::time::Instant;

use http::Method;

use super::{Exchange, Next, Responder, RespondFuture};
use crate::http::Reply;

/// The status one probe (or the aggregate) reports.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HealthStatus {
    Ok,
    Partial,
    Failed,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Ok => "OK",
            HealthStatus::Partial => "PARTIAL",
            HealthStatus::Failed => "FAILED",
        }
    }
}

/// A health supplier for one service, implemented by the embedding
/// application.
pub trait HealthProbe: Send + Sync {
    fn status(&self) -> HealthStatus;
}

/// Derive the report key for a probe's advertising type name: strip a
/// leading `I` (when followed by another capital), strip a trailing
/// `Service`, and lowercase the first letter.
pub fn derive_health_key(type_name: &str) -> String {
    let simple = type_name.rsplit("::").next().unwrap_or(type_name);
    let mut name = simple;
    let mut chars = name.chars();
    if let (Some('I'), Some(second)) = (chars.next(), chars.next()) {
        if second.is_uppercase() {
            name = &name[1..];
        }
    }
    let name = name.strip_suffix("Service").unwrap_or(name);
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars();
    if let Some(first) = chars.next() {
        out.extend(first.to_lowercase());
    }
    out.extend(chars);
    out
}

pub struct HealthStage {
    path: String,
    app_name: String,
    probes: Vec<(String, Arc<dyn HealthProbe>)>,
    started: Instant,
}

impl HealthStage {
    pub fn new(
        path: String,
        app_name: String,
        probes: Vec<(String, Arc<dyn HealthProbe>)>,
        started: Instant,
    ) -> HealthStage {
        HealthStage {
            path,
            app_name,
            probes,
            started,
        }
    }

    fn report(&self) -> serde_json::Value {
        let mut services = serde_json::Map::new();
        let mut ok = 0usize;
        for (name, probe) in &self.probes {
            let status = probe.status();
            if status == HealthStatus::Ok {
                ok += 1;
            }
            services.insert(name.clone(), status.as_str().into());
        }
        let aggregate = if ok == self.probes.len() {
            HealthStatus::Ok
        } else if ok == 0 {
            HealthStatus::Failed
        } else {
            HealthStatus::Partial
        };
        serde_json::json!({
            "app": self.app_name,
            "status": aggregate.as_str(),
            "services": services,
            "uptime": self.started.elapsed().as_millis() as u64,
            "memory": memory_bytes(),
        })
    }
}

impl Responder for HealthStage {
    fn respond<'a>(&'a self, exchange: &'a mut Exchange, next: Next<'a>) -> RespondFuture<'a> {
        Box::pin(async move {
            if exchange.request.method() == Method::GET && exchange.request.path() == self.path {
                return Reply::value(&self.report());
            }
            next.run(exchange).await
        })
    }
}

/// Resident set size of this process, best effort.
#[cfg(target_os = "linux")]
fn memory_bytes() -> u64 {
    std::fs::read_to_string("/proc/self/statm")
        .ok()
        .and_then(|statm| {
            let resident: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
            Some(resident * 4096)
        })
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn memory_bytes() -> u64 {
    0
}
