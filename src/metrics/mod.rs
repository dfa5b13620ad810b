pub mod types;

pub use types::*;

use crate::error::{Error, Result};
use crate::settings::Settings;
use crate::storage::{repository, Database};

/// Compute project-health metrics from raw aggregates.
///
/// Returns `None` when the budget is missing or not positive. Unestimated
/// issues receive an equal share of the budget not yet covered by
/// estimates, so an incomplete work breakdown does not understate totals.
/// Forecast figures are `None` until time has been logged and some
/// estimated work has been closed.
pub fn compute(input: &MetricsInput) -> Option<MetricsResult> {
    let budget = input.budget.filter(|b| b.is_finite() && *b > 0.0)?;
    let estimated_total = non_negative(input.estimated_total);
    let estimated_closed = non_negative(input.estimated_closed);
    let time_spent = non_negative(input.time_spent);
    let n_unest = input.unestimated_count;
    let n_unest_closed = input.unestimated_closed_count;

    let remainder = (budget - estimated_total).max(0.0);
    let implied_estimate = if n_unest > 0 {
        remainder / n_unest as f64
    } else {
        0.0
    };
    let effective_total = estimated_total + n_unest as f64 * implied_estimate;
    let effective_closed = estimated_closed + n_unest_closed as f64 * implied_estimate;

    let progress = if effective_total > 0.0 {
        effective_closed / effective_total * 100.0
    } else {
        0.0
    };
    let budget_used = time_spent / budget * 100.0;

    let cpi = if time_spent > 0.0 && effective_closed > 0.0 {
        finite(effective_closed / time_spent)
    } else {
        None
    };
    let eac = cpi
        .filter(|c| *c > 0.0)
        .and_then(|_| finite(time_spent * effective_total / effective_closed));
    let variance = eac.map(|eac| budget - eac);
    let variance_percent = variance.map(|v| v / budget * 100.0);

    let efficiency = if budget_used > 0.0 {
        finite(progress / budget_used)
    } else {
        None
    };
    let health = effective_total / budget * 100.0;

    log::trace!(
        "metrics: B={budget} E_total={effective_total} E_closed={effective_closed} T={time_spent} cpi={cpi:?}"
    );

    Some(MetricsResult {
        progress: saturate(progress),
        budget_used: saturate(budget_used),
        cpi,
        eac,
        variance,
        variance_percent,
        efficiency,
        health: saturate(health),
        incomplete: eac.is_none(),
        raw: RawFigures {
            budget,
            estimated_total,
            estimated_closed,
            unestimated_count: n_unest,
            unestimated_closed_count: n_unest_closed,
            time_spent,
            remainder,
            implied_estimate,
            effective_total,
            effective_closed,
        },
    })
}

/// Compute metrics for many keyed inputs, dropping those without a budget.
pub fn compute_batch<K: Clone>(inputs: &[(K, MetricsInput)]) -> Vec<(K, MetricsResult)> {
    inputs
        .iter()
        .filter_map(|(key, input)| compute(input).map(|r| (key.clone(), r)))
        .collect()
}

fn non_negative(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        0.0
    }
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

/// Clamp an overflowed ratio to `f64::MAX` so ordering is preserved.
fn saturate(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(-f64::MAX, f64::MAX)
    }
}

/// Load aggregates for a project and compute its metrics.
pub async fn compute_project_metrics(
    db: &Database,
    project_id: i64,
    settings: &Settings,
) -> Result<ProjectMetrics> {
    let settings = settings.clone();
    let loaded = db
        .reader()
        .call(move |conn| {
            let Some(project) = repository::get_project(conn, project_id)? else {
                return Ok(None);
            };
            let aggregates = repository::load_aggregates(conn, &[project_id], &settings)?
                .into_iter()
                .next()
                .unwrap_or_default();
            Ok::<_, rusqlite::Error>(Some((project, aggregates)))
        })
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

    let (project, aggregates) =
        loaded.ok_or_else(|| Error::NotFound(format!("project {project_id}")))?;
    let metrics = compute(&MetricsInput::from(&aggregates));
    if metrics.is_none() {
        log::debug!("Project {project_id} has no usable budget; metrics skipped");
    }
    Ok(ProjectMetrics {
        project_id,
        project_name: project.name,
        aggregates,
        metrics,
    })
}

/// Compute metrics for every project using grouped aggregate queries.
pub async fn compute_portfolio_metrics(
    db: &Database,
    settings: &Settings,
) -> Result<Vec<ProjectMetrics>> {
    let settings = settings.clone();
    let rows = db
        .reader()
        .call(move |conn| {
            let projects = repository::list_projects(conn)?;
            let ids: Vec<i64> = projects.iter().map(|p| p.id).collect();
            let aggregates = repository::load_aggregates(conn, &ids, &settings)?;
            Ok::<_, rusqlite::Error>(projects.into_iter().zip(aggregates).collect::<Vec<_>>())
        })
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

    log::debug!("Computing metrics for {} projects", rows.len());
    Ok(rows
        .into_iter()
        .map(|(project, aggregates)| ProjectMetrics {
            project_id: project.id,
            project_name: project.name,
            metrics: compute(&MetricsInput::from(&aggregates)),
            aggregates,
        })
        .collect())
}
