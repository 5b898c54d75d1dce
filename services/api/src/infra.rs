use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use admissions::admissions::{
    AdmissionWorkflowEngine, Clock, InMemoryBackend, SystemClock, WorkflowSettings,
};
use admissions::config::AdmissionsConfig;
use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Engine wired to the in-process adapters, plus handles to those adapters.
pub(crate) fn in_memory_engine(
    config: &AdmissionsConfig,
    clock: Arc<dyn Clock>,
) -> (Arc<AdmissionWorkflowEngine>, InMemoryBackend) {
    let backend = InMemoryBackend::new(config.lock_timeout, config.document_base_url.clone());
    let engine = AdmissionWorkflowEngine::new(
        backend.ports(),
        WorkflowSettings::from_config(config),
        clock,
    );
    (Arc::new(engine), backend)
}

pub(crate) fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
