//! Decision-quality metrics over a time window.
//!
//! `aggregate` is pure: it only reads a [`MetricsSnapshot`] taken by the store.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::state::AppState;
use crate::store::{MetricsSnapshot, StoreError};
use crate::triage::rules::display_category;

pub const DEFAULT_WINDOW_DAYS: i64 = 30;
const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccuracyBucket {
    pub total: usize,
    pub correct: usize,
    pub accuracy: f64,
}

impl AccuracyBucket {
    fn add(&mut self, correct: bool) {
        self.total += 1;
        if correct {
            self.correct += 1;
        }
        self.accuracy = ratio(self.correct, self.total);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassificationMetrics {
    pub total_feedback: usize,
    pub correct: usize,
    pub accuracy: f64,
    pub by_category: BTreeMap<String, AccuracyBucket>,
    pub by_department: BTreeMap<String, AccuracyBucket>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AutoResolveMetrics {
    pub auto_resolved_count: usize,
    pub total_count: usize,
    pub rate: f64,
    pub average_confidence: f64,
    pub by_category: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResponseTimeMetrics {
    pub samples: usize,
    pub mean_seconds: f64,
    pub median_seconds: f64,
    pub p95_seconds: f64,
    pub mean_by_source: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoutingMetrics {
    pub total_errors: usize,
    pub tickets: usize,
    pub error_rate: f64,
    pub by_error_type: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoringMetrics {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub classification: ClassificationMetrics,
    pub auto_resolve: AutoResolveMetrics,
    pub response_time: ResponseTimeMetrics,
    pub routing: RoutingMetrics,
}

fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// `sorted[floor(q * n)]`; 0 for an empty slice.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((q * sorted.len() as f64).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}

pub fn aggregate(snapshot: &MetricsSnapshot, from: DateTime<Utc>, to: DateTime<Utc>) -> MonitoringMetrics {
    MonitoringMetrics {
        from,
        to,
        classification: classification_metrics(snapshot),
        auto_resolve: auto_resolve_metrics(snapshot),
        response_time: response_time_metrics(snapshot),
        routing: routing_metrics(snapshot),
    }
}

fn classification_metrics(snapshot: &MetricsSnapshot) -> ClassificationMetrics {
    let mut metrics = ClassificationMetrics {
        total_feedback: snapshot.feedback.len(),
        ..Default::default()
    };
    for fb in &snapshot.feedback {
        if fb.is_correct {
            metrics.correct += 1;
        }
        let category = fb.predicted_category.clone().unwrap_or_else(|| UNKNOWN.to_string());
        metrics.by_category.entry(category).or_default().add(fb.is_correct);

        let department = fb
            .predicted_department_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| UNKNOWN.to_string());
        metrics.by_department.entry(department).or_default().add(fb.is_correct);
    }
    metrics.accuracy = ratio(metrics.correct, metrics.total_feedback);
    metrics
}

/// Each request counts once: an escalated chat message counts as its interaction,
/// never again as the ticket it opened.
fn auto_resolve_metrics(snapshot: &MetricsSnapshot) -> AutoResolveMetrics {
    let linked: HashSet<Uuid> = snapshot.interactions.iter().filter_map(|i| i.ticket_id).collect();
    let mut metrics = AutoResolveMetrics::default();
    let mut confidences = Vec::new();

    for interaction in &snapshot.interactions {
        metrics.total_count += 1;
        if !interaction.ticket_created {
            metrics.auto_resolved_count += 1;
            confidences.push(interaction.confidence);
            let category = interaction
                .category
                .clone()
                .unwrap_or_else(|| display_category(&interaction.message).to_string());
            *metrics.by_category.entry(category).or_default() += 1;
        }
    }

    for ticket in snapshot.tickets.iter().filter(|t| !linked.contains(&t.id)) {
        metrics.total_count += 1;
        if ticket.auto_resolved {
            metrics.auto_resolved_count += 1;
            if let Some(confidence) = ticket.classification_confidence {
                confidences.push(confidence);
            }
            let category = ticket.category.clone().unwrap_or_else(|| "other".to_string());
            *metrics.by_category.entry(category).or_default() += 1;
        }
    }

    metrics.rate = ratio(metrics.auto_resolved_count, metrics.total_count);
    metrics.average_confidence = mean(&confidences);
    metrics
}

fn response_time_metrics(snapshot: &MetricsSnapshot) -> ResponseTimeMetrics {
    let ticket_sources: HashMap<Uuid, String> = snapshot
        .tickets
        .iter()
        .map(|t| (t.id, t.source.to_string()))
        .collect();

    let mut by_source: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut times = Vec::with_capacity(snapshot.response_times.len() + snapshot.interactions.len());

    for sample in &snapshot.response_times {
        times.push(sample.response_time_seconds);
        let source = ticket_sources
            .get(&sample.ticket_id)
            .cloned()
            .unwrap_or_else(|| UNKNOWN.to_string());
        by_source.entry(source).or_default().push(sample.response_time_seconds);
    }
    for interaction in &snapshot.interactions {
        let seconds = interaction.response_time_ms as f64 / 1000.0;
        times.push(seconds);
        by_source
            .entry(interaction.source.to_string())
            .or_default()
            .push(seconds);
    }

    times.sort_by(|a, b| a.total_cmp(b));
    ResponseTimeMetrics {
        samples: times.len(),
        mean_seconds: mean(&times),
        median_seconds: percentile(&times, 0.5),
        p95_seconds: percentile(&times, 0.95),
        mean_by_source: by_source
            .into_iter()
            .map(|(source, values)| (source, mean(&values)))
            .collect(),
    }
}

fn routing_metrics(snapshot: &MetricsSnapshot) -> RoutingMetrics {
    let mut metrics = RoutingMetrics {
        total_errors: snapshot.routing_errors.len(),
        tickets: snapshot.tickets.len(),
        ..Default::default()
    };
    for routing_error in &snapshot.routing_errors {
        *metrics
            .by_error_type
            .entry(routing_error.error_type.to_string())
            .or_default() += 1;
        let category = routing_error
            .initial_category
            .clone()
            .unwrap_or_else(|| UNKNOWN.to_string());
        *metrics.by_category.entry(category).or_default() += 1;
    }
    metrics.error_rate = ratio(metrics.total_errors, metrics.tickets);
    metrics
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        let (status, message) = match &self {
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Store(e) => {
                error!("[METRICS] snapshot failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Metrics unavailable".to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MetricsQuery {
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
}

impl MetricsQuery {
    /// Missing bounds default to the last 30 days ending now.
    pub fn window(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>), MetricsError> {
        let to = self.to_date.unwrap_or(now);
        let from = self.from_date.unwrap_or(to - Duration::days(DEFAULT_WINDOW_DAYS));
        if from > to {
            return Err(MetricsError::Validation("from_date must not be after to_date".to_string()));
        }
        Ok((from, to))
    }
}

pub async fn get_metrics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<MonitoringMetrics>, MetricsError> {
    let (from, to) = query.window(Utc::now())?;
    let snapshot = state.store.metrics_snapshot(from, to).await?;
    let metrics = aggregate(&snapshot, from, to);
    info!(
        "[METRICS] {}..{} accuracy={:.2} auto_resolve_rate={:.2} routing_error_rate={:.2}",
        from, to, metrics.classification.accuracy, metrics.auto_resolve.rate, metrics.routing.error_rate
    );
    Ok(Json(metrics))
}

pub fn configure_monitoring_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/monitoring/metrics", get(get_metrics))
}
