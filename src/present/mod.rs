//! Explanations, classifications and display values for metrics.

pub mod format;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::Error;
use crate::metrics::{MetricsResult, RawFigures};

const RULE: &str = "════════════════════════════════";

/// The indicators a `MetricsResult` exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Progress,
    BudgetUsed,
    Cpi,
    Eac,
    /// Budget minus forecast; rendered together with its percent.
    Variance,
    Efficiency,
    Health,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::Progress,
        Metric::BudgetUsed,
        Metric::Cpi,
        Metric::Eac,
        Metric::Variance,
        Metric::Efficiency,
        Metric::Health,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Progress => "progress",
            Metric::BudgetUsed => "budget_used",
            Metric::Cpi => "cpi",
            Metric::Eac => "eac",
            Metric::Variance => "variance",
            Metric::Efficiency => "efficiency",
            Metric::Health => "health",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Metric::Progress => "Progress (share of work done)",
            Metric::BudgetUsed => "Budget used (share of budget spent)",
            Metric::Cpi => "CPI (cost performance index)",
            Metric::Eac => "EAC (forecast total effort)",
            Metric::Variance => "Variance (budget minus forecast)",
            Metric::Efficiency => "Efficiency (delivery pace vs. spend)",
            Metric::Health => "Health (estimated effort vs. budget)",
        }
    }

    /// The value this metric takes in `result`.
    pub fn value(&self, result: &MetricsResult) -> Option<f64> {
        match self {
            Metric::Progress => Some(result.progress),
            Metric::BudgetUsed => Some(result.budget_used),
            Metric::Cpi => result.cpi,
            Metric::Eac => result.eac,
            Metric::Variance => result.variance,
            Metric::Efficiency => result.efficiency,
            Metric::Health => Some(result.health),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "progress" => Ok(Metric::Progress),
            "budget_used" | "spent" => Ok(Metric::BudgetUsed),
            "cpi" => Ok(Metric::Cpi),
            "eac" => Ok(Metric::Eac),
            "variance" => Ok(Metric::Variance),
            "efficiency" => Ok(Metric::Efficiency),
            "health" => Ok(Metric::Health),
            _ => Err(Error::UnknownMetric(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Positive,
    Caution,
    Critical,
    Neutral,
}

impl Severity {
    /// Abstract color identifier; the theme maps it to a concrete color.
    pub fn color_token(&self) -> &'static str {
        match self {
            Severity::Positive => "positive",
            Severity::Caution => "caution",
            Severity::Critical => "critical",
            Severity::Neutral => "neutral",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub severity: Severity,
    pub color: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<&'static str>,
}

impl Classification {
    fn new(severity: Severity, label: &'static str) -> Self {
        Self {
            severity,
            color: severity.color_token(),
            label: Some(label),
        }
    }

    fn neutral() -> Self {
        Self {
            severity: Severity::Neutral,
            color: Severity::Neutral.color_token(),
            label: None,
        }
    }
}

/// Classify a metric value with fixed thresholds. Absent values are
/// neutral.
pub fn classify(metric: Metric, value: Option<f64>) -> Classification {
    let Some(v) = value.filter(|v| v.is_finite()) else {
        return match metric {
            Metric::Cpi | Metric::Variance | Metric::Efficiency => {
                Classification::new(Severity::Neutral, "Not enough data")
            }
            _ => Classification::neutral(),
        };
    };
    match metric {
        Metric::Cpi => {
            if v >= 1.0 {
                Classification::new(Severity::Positive, "On plan or under budget")
            } else if v >= 0.9 {
                Classification::new(Severity::Caution, "Attention: slight overrun")
            } else {
                Classification::new(Severity::Critical, "Problem: significant overrun")
            }
        }
        Metric::Variance => {
            if v > 0.0 {
                Classification::new(Severity::Positive, "Surplus: the budget will suffice")
            } else if v < 0.0 {
                Classification::new(Severity::Critical, "Deficit: the budget will not suffice")
            } else {
                Classification::new(Severity::Neutral, "Exactly on budget")
            }
        }
        Metric::BudgetUsed => {
            if v > 100.0 {
                Classification::new(Severity::Critical, "Over budget")
            } else {
                Classification::new(Severity::Neutral, "Within budget")
            }
        }
        Metric::Efficiency => {
            if v < 0.8 {
                Classification::new(Severity::Critical, "Spending faster than delivering")
            } else if v > 1.2 {
                Classification::new(Severity::Positive, "Delivering faster than spending")
            } else {
                Classification::new(Severity::Neutral, "Delivery in step with spending")
            }
        }
        Metric::Health => {
            if v > 110.0 {
                Classification::new(Severity::Critical, "Estimates exceed the budget")
            } else if v < 90.0 {
                Classification::new(Severity::Caution, "Estimates fall well short of the budget")
            } else {
                Classification::new(Severity::Neutral, "Estimates match the budget")
            }
        }
        Metric::Progress | Metric::Eac => Classification::neutral(),
    }
}

/// Display value of a metric, e.g. `50.0%`, `0.80`, `100 h`.
pub fn display_value(metric: Metric, result: &MetricsResult) -> String {
    let v = metric.value(result);
    match metric {
        Metric::Progress | Metric::BudgetUsed | Metric::Health => format::opt_percent(v),
        Metric::Cpi | Metric::Efficiency => format::opt_ratio(v),
        Metric::Eac => with_unit(v),
        Metric::Variance => match v {
            Some(_) => format!(
                "{} ({})",
                with_unit(v),
                format::opt_percent(result.variance_percent)
            ),
            None => format::NO_DATA.to_string(),
        },
    }
}

fn with_unit(v: Option<f64>) -> String {
    match v.filter(|v| v.is_finite()) {
        Some(v) => format!("{} h", format::hours(v)),
        None => format::NO_DATA.to_string(),
    }
}

/// Explain how a metric was computed: the formula, the operands with their
/// values, then the substituted calculation and its result.
pub fn explain(metric: Metric, result: &MetricsResult) -> String {
    let raw = &result.raw;
    let h = format::hours;
    let mut lines = vec![metric.title().to_string(), RULE.to_string()];

    let (formula, operands, calculation): (&str, Vec<String>, String) = match metric {
        Metric::Progress => {
            let mut operands = distribution_lines(raw);
            operands.push(format!("E_total (estimated): {} h", h(raw.effective_total)));
            operands.push(format!("E_closed (closed): {} h", h(raw.effective_closed)));
            (
                "E_closed / E_total × 100%",
                operands,
                format!(
                    "{} / {} × 100% = {}",
                    h(raw.effective_closed),
                    h(raw.effective_total),
                    format::percent(result.progress)
                ),
            )
        }
        Metric::BudgetUsed => (
            "T / B × 100%",
            vec![
                format!("T (time spent): {} h", h(raw.time_spent)),
                format!("B (budget): {} h", h(raw.budget)),
            ],
            format!(
                "{} / {} × 100% = {}",
                h(raw.time_spent),
                h(raw.budget),
                format::percent(result.budget_used)
            ),
        ),
        Metric::Cpi => {
            let mut operands = distribution_lines(raw);
            operands.push(format!("E_closed (closed): {} h", h(raw.effective_closed)));
            operands.push(format!("T (time spent): {} h", h(raw.time_spent)));
            (
                "E_closed / T",
                operands,
                format!(
                    "{} / {} = {}",
                    h(raw.effective_closed),
                    h(raw.time_spent),
                    format::opt_ratio(result.cpi)
                ),
            )
        }
        Metric::Eac => {
            let mut operands = distribution_lines(raw);
            operands.push(format!("E_total (estimated): {} h", h(raw.effective_total)));
            operands.push(format!("CPI: {}", format::opt_ratio(result.cpi)));
            (
                "E_total / CPI",
                operands,
                format!(
                    "{} / {} = {}",
                    h(raw.effective_total),
                    format::opt_ratio(result.cpi),
                    with_unit(result.eac)
                ),
            )
        }
        Metric::Variance => (
            "B - EAC",
            vec![
                format!("B (budget): {} h", h(raw.budget)),
                format!("EAC (forecast): {}", with_unit(result.eac)),
            ],
            format!(
                "{} - {} = {} ({})",
                h(raw.budget),
                format::opt_hours(result.eac),
                with_unit(result.variance),
                format::opt_percent(result.variance_percent)
            ),
        ),
        Metric::Efficiency => (
            "Progress / Budget used",
            vec![
                format!("Progress: {}", format::percent(result.progress)),
                format!("Budget used: {}", format::percent(result.budget_used)),
            ],
            format!(
                "{} / {} = {}",
                format::percent(result.progress),
                format::percent(result.budget_used),
                format::opt_ratio(result.efficiency)
            ),
        ),
        Metric::Health => {
            let mut operands = distribution_lines(raw);
            operands.push(format!("E_total (estimated): {} h", h(raw.effective_total)));
            operands.push(format!("B (budget): {} h", h(raw.budget)));
            (
                "E_total / B × 100%",
                operands,
                format!(
                    "{} / {} × 100% = {}",
                    h(raw.effective_total),
                    h(raw.budget),
                    format::percent(result.health)
                ),
            )
        }
    };

    lines.push(format!("Formula: {formula}"));
    lines.push(RULE.to_string());
    lines.extend(operands);
    lines.push(RULE.to_string());
    lines.push(format!("Calculation: {calculation}"));

    let forecast = matches!(metric, Metric::Cpi | Metric::Eac | Metric::Variance);
    if forecast && result.incomplete {
        lines.push(RULE.to_string());
        lines.push(incomplete_reason(raw).to_string());
    } else if matches!(metric, Metric::Cpi | Metric::Variance) {
        if let Some(label) = classify(metric, metric.value(result)).label {
            lines.push(RULE.to_string());
            lines.push(label.to_string());
        }
    }
    lines.join("\n")
}

/// Lines describing how unestimated issues were given an implied estimate.
fn distribution_lines(raw: &RawFigures) -> Vec<String> {
    if raw.unestimated_count == 0 {
        return Vec::new();
    }
    let h = format::hours;
    vec![
        format!(
            "Unestimated issues: {} ({} closed)",
            raw.unestimated_count, raw.unestimated_closed_count
        ),
        format!(
            "Implied estimate: max({} - {}, 0) / {} = {} h per issue",
            h(raw.budget),
            h(raw.estimated_total),
            raw.unestimated_count,
            h(raw.implied_estimate)
        ),
    ]
}

fn incomplete_reason(raw: &RawFigures) -> &'static str {
    if raw.time_spent <= 0.0 {
        "Not enough data: no time has been logged yet"
    } else {
        "Not enough data: no estimated work has been closed yet"
    }
}

/// Everything a rendering layer needs for one indicator.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorView {
    pub metric: Metric,
    pub value: Option<f64>,
    pub display: String,
    pub explanation: String,
    pub classification: Classification,
}

/// One view per metric, in `Metric::ALL` order.
pub fn summarize(result: &MetricsResult) -> Vec<IndicatorView> {
    Metric::ALL
        .iter()
        .map(|&metric| {
            let value = metric.value(result);
            IndicatorView {
                metric,
                value,
                display: display_value(metric, result),
                explanation: explain(metric, result),
                classification: classify(metric, value),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{compute, MetricsInput};
    use pretty_assertions::assert_eq;

    fn scenario_a() -> MetricsResult {
        compute(
            &MetricsInput::new(Some(100.0))
                .with_estimates(80.0, 40.0)
                .with_time_spent(50.0),
        )
        .unwrap()
    }

    #[test]
    fn test_cpi_thresholds() {
        assert_eq!(classify(Metric::Cpi, Some(1.0)).severity, Severity::Positive);
        assert_eq!(classify(Metric::Cpi, Some(1.4)).severity, Severity::Positive);
        assert_eq!(classify(Metric::Cpi, Some(0.95)).severity, Severity::Caution);
        assert_eq!(classify(Metric::Cpi, Some(0.9)).severity, Severity::Caution);
        assert_eq!(classify(Metric::Cpi, Some(0.89)).severity, Severity::Critical);
        assert_eq!(classify(Metric::Cpi, Some(0.5)).severity, Severity::Critical);
        assert_eq!(classify(Metric::Cpi, None).severity, Severity::Neutral);
    }

    #[test]
    fn test_color_token_follows_severity() {
        let c = classify(Metric::Cpi, Some(0.5));
        assert_eq!(c.color, "critical");
        let c = classify(Metric::Variance, Some(12.0));
        assert_eq!(c.color, "positive");
        let c = classify(Metric::Health, Some(50.0));
        assert_eq!(c.color, "caution");
    }

    #[test]
    fn test_variance_budget_efficiency_health_thresholds() {
        assert_eq!(classify(Metric::Variance, Some(-0.5)).severity, Severity::Critical);
        assert_eq!(classify(Metric::Variance, Some(0.0)).severity, Severity::Neutral);
        assert_eq!(classify(Metric::BudgetUsed, Some(100.0)).severity, Severity::Neutral);
        assert_eq!(classify(Metric::BudgetUsed, Some(100.1)).severity, Severity::Critical);
        assert_eq!(classify(Metric::Efficiency, Some(0.79)).severity, Severity::Critical);
        assert_eq!(classify(Metric::Efficiency, Some(1.0)).severity, Severity::Neutral);
        assert_eq!(classify(Metric::Efficiency, Some(1.21)).severity, Severity::Positive);
        assert_eq!(classify(Metric::Health, Some(111.0)).severity, Severity::Critical);
        assert_eq!(classify(Metric::Health, Some(100.0)).severity, Severity::Neutral);
        assert_eq!(classify(Metric::Health, Some(89.0)).severity, Severity::Caution);
        assert_eq!(classify(Metric::Progress, Some(5.0)).severity, Severity::Neutral);
        assert_eq!(classify(Metric::Eac, Some(500.0)).label, None);
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("spent".parse::<Metric>().unwrap(), Metric::BudgetUsed);
        assert_eq!("Budget-Used".parse::<Metric>().unwrap(), Metric::BudgetUsed);
        assert_eq!("CPI".parse::<Metric>().unwrap(), Metric::Cpi);
        assert!("velocity".parse::<Metric>().is_err());
    }

    #[test]
    fn test_display_values_scenario_a() {
        let r = scenario_a();
        assert_eq!(display_value(Metric::Progress, &r), "50.0%");
        assert_eq!(display_value(Metric::BudgetUsed, &r), "50.0%");
        assert_eq!(display_value(Metric::Cpi, &r), "0.80");
        assert_eq!(display_value(Metric::Eac, &r), "100 h");
        assert_eq!(display_value(Metric::Variance, &r), "0 h (0.0%)");
        assert_eq!(display_value(Metric::Efficiency, &r), "1.00");
        assert_eq!(display_value(Metric::Health, &r), "80.0%");
    }

    #[test]
    fn test_explain_progress() {
        assert_eq!(
            explain(Metric::Progress, &scenario_a()),
            "Progress (share of work done)\n\
             ════════════════════════════════\n\
             Formula: E_closed / E_total × 100%\n\
             ════════════════════════════════\n\
             E_total (estimated): 80 h\n\
             E_closed (closed): 40 h\n\
             ════════════════════════════════\n\
             Calculation: 40 / 80 × 100% = 50.0%"
        );
    }

    #[test]
    fn test_explain_cpi_includes_status() {
        assert_eq!(
            explain(Metric::Cpi, &scenario_a()),
            "CPI (cost performance index)\n\
             ════════════════════════════════\n\
             Formula: E_closed / T\n\
             ════════════════════════════════\n\
             E_closed (closed): 40 h\n\
             T (time spent): 50 h\n\
             ════════════════════════════════\n\
             Calculation: 40 / 50 = 0.80\n\
             ════════════════════════════════\n\
             Problem: significant overrun"
        );
    }

    #[test]
    fn test_explain_variance() {
        assert_eq!(
            explain(Metric::Variance, &scenario_a()),
            "Variance (budget minus forecast)\n\
             ════════════════════════════════\n\
             Formula: B - EAC\n\
             ════════════════════════════════\n\
             B (budget): 100 h\n\
             EAC (forecast): 100 h\n\
             ════════════════════════════════\n\
             Calculation: 100 - 100 = 0 h (0.0%)\n\
             ════════════════════════════════\n\
             Exactly on budget"
        );
    }

    #[test]
    fn test_explain_budget_used() {
        assert_eq!(
            explain(Metric::BudgetUsed, &scenario_a()),
            "Budget used (share of budget spent)\n\
             ════════════════════════════════\n\
             Formula: T / B × 100%\n\
             ════════════════════════════════\n\
             T (time spent): 50 h\n\
             B (budget): 100 h\n\
             ════════════════════════════════\n\
             Calculation: 50 / 100 × 100% = 50.0%"
        );
    }

    #[test]
    fn test_explain_efficiency() {
        assert_eq!(
            explain(Metric::Efficiency, &scenario_a()),
            "Efficiency (delivery pace vs. spend)\n\
             ════════════════════════════════\n\
             Formula: Progress / Budget used\n\
             ════════════════════════════════\n\
             Progress: 50.0%\n\
             Budget used: 50.0%\n\
             ════════════════════════════════\n\
             Calculation: 50.0% / 50.0% = 1.00"
        );
    }

    #[test]
    fn test_explain_health() {
        assert_eq!(
            explain(Metric::Health, &scenario_a()),
            "Health (estimated effort vs. budget)\n\
             ════════════════════════════════\n\
             Formula: E_total / B × 100%\n\
             ════════════════════════════════\n\
             E_total (estimated): 80 h\n\
             B (budget): 100 h\n\
             ════════════════════════════════\n\
             Calculation: 80 / 100 × 100% = 80.0%"
        );
    }

    #[test]
    fn test_explain_incomplete_forecast() {
        let r = compute(&MetricsInput::new(Some(100.0)).with_estimates(100.0, 0.0)).unwrap();
        let text = explain(Metric::Eac, &r);
        assert!(text.contains("Calculation: 100 / no data = no data"));
        assert!(text.ends_with("Not enough data: no time has been logged yet"));

        let r = compute(
            &MetricsInput::new(Some(100.0))
                .with_estimates(100.0, 0.0)
                .with_time_spent(10.0),
        )
        .unwrap();
        assert!(explain(Metric::Cpi, &r).ends_with("no estimated work has been closed yet"));
    }

    #[test]
    fn test_explain_shows_distribution() {
        let r = compute(
            &MetricsInput::new(Some(100.0))
                .with_estimates(60.0, 30.0)
                .with_unestimated(4, 1)
                .with_time_spent(30.0),
        )
        .unwrap();
        let text = explain(Metric::Progress, &r);
        assert!(text.contains("Unestimated issues: 4 (1 closed)"));
        assert!(text.contains("Implied estimate: max(100 - 60, 0) / 4 = 10 h per issue"));
        assert!(text.contains("Calculation: 40 / 100 × 100% = 40.0%"));
    }

    #[test]
    fn test_summarize_covers_every_metric() {
        let views = summarize(&scenario_a());
        assert_eq!(views.len(), Metric::ALL.len());
        let cpi = views.iter().find(|v| v.metric == Metric::Cpi).unwrap();
        assert_eq!(cpi.display, "0.80");
        assert_eq!(cpi.classification.severity, Severity::Critical);
        assert!(views.iter().all(|v| !v.explanation.is_empty()));
    }
}
