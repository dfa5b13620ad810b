use serde::Serialize;

/// Raw per-project aggregates fed into the metrics engine.
///
/// Only `budget` is significant on its own: when it is missing or not
/// positive, no metrics exist for the project. Every other figure defaults
/// to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsInput {
    /// Budget in hours (B).
    pub budget: Option<f64>,
    /// Sum of estimated hours across all issues (E_total).
    pub estimated_total: f64,
    /// Sum of estimated hours across closed issues (E_closed).
    pub estimated_closed: f64,
    /// Issues without an estimate (N_unest).
    pub unestimated_count: u64,
    /// Closed issues without an estimate (N_unest_closed).
    pub unestimated_closed_count: u64,
    /// Hours logged against the project (T_spent).
    pub time_spent: f64,
}

impl MetricsInput {
    pub fn new(budget: Option<f64>) -> Self {
        Self {
            budget,
            ..Self::default()
        }
    }

    pub fn with_estimates(mut self, total: f64, closed: f64) -> Self {
        self.estimated_total = total;
        self.estimated_closed = closed;
        self
    }

    pub fn with_unestimated(mut self, count: u64, closed_count: u64) -> Self {
        self.unestimated_count = count;
        self.unestimated_closed_count = closed_count;
        self
    }

    pub fn with_time_spent(mut self, hours: f64) -> Self {
        self.time_spent = hours;
        self
    }
}

/// The figures a result was computed from, kept so explanations can show
/// the formula with real numbers substituted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RawFigures {
    pub budget: f64,
    pub estimated_total: f64,
    pub estimated_closed: f64,
    pub unestimated_count: u64,
    pub unestimated_closed_count: u64,
    pub time_spent: f64,
    /// Budget not yet covered by estimates, never negative.
    pub remainder: f64,
    /// Hours attributed to each unestimated issue.
    pub implied_estimate: f64,
    pub effective_total: f64,
    pub effective_closed: f64,
}

/// Snapshot of project-health indicators.
///
/// Forecast fields (`cpi`, `eac`, `variance`, `variance_percent`) are
/// `None` rather than zero when there is no logged time or no closed
/// effort yet; `incomplete` is set in that case.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsResult {
    /// Percent of effective estimated effort that is closed.
    pub progress: f64,
    /// Percent of budget consumed by logged time. Exceeds 100 on overspend.
    pub budget_used: f64,
    pub cpi: Option<f64>,
    pub eac: Option<f64>,
    pub variance: Option<f64>,
    pub variance_percent: Option<f64>,
    /// Progress per unit of budget consumption.
    pub efficiency: Option<f64>,
    /// Effective estimated effort as a percent of budget.
    pub health: f64,
    pub incomplete: bool,
    pub raw: RawFigures,
}

/// Aggregates for one project as loaded from storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectAggregates {
    pub project_id: i64,
    pub budget: Option<f64>,
    pub estimated_total: f64,
    pub estimated_closed: f64,
    pub unestimated_count: u64,
    pub unestimated_closed_count: u64,
    pub time_spent: f64,
}

impl From<&ProjectAggregates> for MetricsInput {
    fn from(a: &ProjectAggregates) -> Self {
        MetricsInput {
            budget: a.budget,
            estimated_total: a.estimated_total,
            estimated_closed: a.estimated_closed,
            unestimated_count: a.unestimated_count,
            unestimated_closed_count: a.unestimated_closed_count,
            time_spent: a.time_spent,
        }
    }
}

/// Metrics for a project, with its display name.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectMetrics {
    pub project_id: i64,
    pub project_name: String,
    pub aggregates: ProjectAggregates,
    pub metrics: Option<MetricsResult>,
}
