use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use rusqlite::Connection;
use serde::Serialize;

use crate::history::{HistoryOrder, TrackedField};
use crate::storage::repository::{self, CustomField, IssueStatus};

pub const BUDGET_FIELD_KEY: &str = "budget_custom_field_id";
pub const START_DATE_FIELD_KEY: &str = "start_date_custom_field_id";
pub const END_DATE_FIELD_KEY: &str = "end_date_custom_field_id";
pub const COMMENT_FIELD_KEY: &str = "comment_custom_field_id";
pub const CLOSED_STATUS_IDS_KEY: &str = "closed_status_ids";
pub const HISTORY_LIMIT_KEY: &str = "history_limit";
pub const HISTORY_ORDER_KEY: &str = "history_order";
pub const COMMENT_MAX_LENGTH_KEY: &str = "comment_max_length";

pub const DEFAULT_HISTORY_LIMIT: usize = 5;
pub const DEFAULT_COMMENT_MAX_LENGTH: usize = 100;

static RE_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// Plugin settings, resolved once per request and passed to whatever needs
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub budget_field_id: Option<i64>,
    pub start_date_field_id: Option<i64>,
    pub end_date_field_id: Option<i64>,
    pub comment_field_id: Option<i64>,
    /// Statuses that count as done. Empty means "use the statuses flagged
    /// closed".
    pub closed_status_ids: Vec<i64>,
    pub history_limit: usize,
    pub history_order: HistoryOrder,
    pub comment_max_length: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            budget_field_id: None,
            start_date_field_id: None,
            end_date_field_id: None,
            comment_field_id: None,
            closed_status_ids: Vec::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            history_order: HistoryOrder::NewestFirst,
            comment_max_length: DEFAULT_COMMENT_MAX_LENGTH,
        }
    }
}

impl Settings {
    /// Build settings from raw config pairs. Unparseable values are left at
    /// their defaults; `validate` reports them.
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let mut settings = Settings::default();
        for (key, value) in pairs {
            match key.as_str() {
                BUDGET_FIELD_KEY => settings.budget_field_id = parse_id(key, value),
                START_DATE_FIELD_KEY => settings.start_date_field_id = parse_id(key, value),
                END_DATE_FIELD_KEY => settings.end_date_field_id = parse_id(key, value),
                COMMENT_FIELD_KEY => settings.comment_field_id = parse_id(key, value),
                CLOSED_STATUS_IDS_KEY => settings.closed_status_ids = parse_id_list(value),
                HISTORY_LIMIT_KEY => {
                    if let Some(n) = parse_positive(key, value) {
                        settings.history_limit = n;
                    }
                }
                HISTORY_ORDER_KEY => match HistoryOrder::parse(value) {
                    Some(order) => settings.history_order = order,
                    None => log::warn!("Ignoring {key}={value:?}: expected newest_first or oldest_first"),
                },
                COMMENT_MAX_LENGTH_KEY => {
                    if let Some(n) = parse_positive(key, value) {
                        settings.comment_max_length = n;
                    }
                }
                _ => {}
            }
        }
        settings
    }

    /// Load settings from the `app_config` table.
    pub fn load(conn: &Connection) -> Result<Self, rusqlite::Error> {
        let pairs = repository::list_config(conn)?;
        Ok(Self::from_pairs(&pairs))
    }

    /// Custom field holding the value of a tracked field, if configured.
    pub fn field_id(&self, field: TrackedField) -> Option<i64> {
        match field {
            TrackedField::Budget => self.budget_field_id,
            TrackedField::StartDate => self.start_date_field_id,
            TrackedField::EndDate => self.end_date_field_id,
            TrackedField::Comment => self.comment_field_id,
        }
    }

    /// Tracked fields that have a custom field configured.
    pub fn tracked_fields(&self) -> Vec<(TrackedField, i64)> {
        TrackedField::ALL
            .iter()
            .filter_map(|&f| self.field_id(f).map(|id| (f, id)))
            .collect()
    }
}

fn config_key(field: TrackedField) -> &'static str {
    match field {
        TrackedField::Budget => BUDGET_FIELD_KEY,
        TrackedField::StartDate => START_DATE_FIELD_KEY,
        TrackedField::EndDate => END_DATE_FIELD_KEY,
        TrackedField::Comment => COMMENT_FIELD_KEY,
    }
}

fn parse_id(key: &str, value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match value.parse::<i64>() {
        Ok(id) if id > 0 => Some(id),
        _ => {
            log::warn!("Ignoring {key}={value:?}: not a field id");
            None
        }
    }
}

fn parse_positive(key: &str, value: &str) -> Option<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            log::warn!("Ignoring {key}={value:?}: expected a positive integer");
            None
        }
    }
}

/// Accepts `1,2,3`, `1 2 3` and `[1, 2, 3]`.
fn parse_id_list(value: &str) -> Vec<i64> {
    let mut ids: Vec<i64> = RE_ID
        .find_iter(value)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

// ── Validation ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningLevel {
    Error,
    Warning,
    Info,
}

impl fmt::Display for WarningLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WarningLevel::Error => "error",
            WarningLevel::Warning => "warning",
            WarningLevel::Info => "info",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingsWarning {
    pub level: WarningLevel,
    pub message: String,
}

impl SettingsWarning {
    fn new(level: WarningLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// Check raw settings against the custom fields and statuses that exist.
/// Results are ordered errors first.
pub fn validate(
    pairs: &[(String, String)],
    custom_fields: &[CustomField],
    statuses: &[IssueStatus],
) -> Vec<SettingsWarning> {
    let mut warnings = Vec::new();
    let raw = |key: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    };

    let mut configured = 0;
    for field in TrackedField::ALL {
        let key = config_key(field);
        let Some(value) = raw(key) else {
            continue;
        };
        let id = match value.parse::<i64>() {
            Ok(id) if id > 0 => id,
            _ => {
                warnings.push(SettingsWarning::new(
                    WarningLevel::Error,
                    format!("{key}: {value:?} is not a valid custom field id"),
                ));
                continue;
            }
        };
        let Some(cf) = custom_fields.iter().find(|cf| cf.id == id) else {
            warnings.push(SettingsWarning::new(
                WarningLevel::Error,
                format!("{key}: custom field #{id} does not exist"),
            ));
            continue;
        };
        configured += 1;

        let expected: &[&str] = match field {
            TrackedField::Budget => &["float", "int"],
            TrackedField::StartDate | TrackedField::EndDate => &["date"],
            TrackedField::Comment => &["string", "text"],
        };
        if !expected.contains(&cf.field_format.as_str()) {
            warnings.push(SettingsWarning::new(
                WarningLevel::Warning,
                format!(
                    "{key}: custom field \"{}\" has format {}, expected {}",
                    cf.name,
                    cf.field_format,
                    expected.join(" or ")
                ),
            ));
        }
    }

    if configured == 0 {
        warnings.push(SettingsWarning::new(
            WarningLevel::Info,
            "no tracked custom fields configured; metrics and history are disabled",
        ));
    } else if raw(BUDGET_FIELD_KEY).is_none() {
        warnings.push(SettingsWarning::new(
            WarningLevel::Warning,
            format!("{BUDGET_FIELD_KEY} is not set; budget metrics are unavailable"),
        ));
    }

    match raw(CLOSED_STATUS_IDS_KEY) {
        None => warnings.push(SettingsWarning::new(
            WarningLevel::Info,
            "closed_status_ids is empty; statuses flagged closed count as done",
        )),
        Some(value) => {
            for id in parse_id_list(value) {
                if !statuses.iter().any(|s| s.id == id) {
                    warnings.push(SettingsWarning::new(
                        WarningLevel::Warning,
                        format!("closed_status_ids: status #{id} does not exist"),
                    ));
                }
            }
        }
    }

    for key in [HISTORY_LIMIT_KEY, COMMENT_MAX_LENGTH_KEY] {
        if let Some(value) = raw(key) {
            if !matches!(value.parse::<usize>(), Ok(n) if n > 0) {
                warnings.push(SettingsWarning::new(
                    WarningLevel::Warning,
                    format!("{key}: {value:?} is not a positive integer; using the default"),
                ));
            }
        }
    }
    if let Some(value) = raw(HISTORY_ORDER_KEY) {
        if HistoryOrder::parse(value).is_none() {
            warnings.push(SettingsWarning::new(
                WarningLevel::Warning,
                format!("{HISTORY_ORDER_KEY}: {value:?} is not newest_first or oldest_first"),
            ));
        }
    }

    warnings.sort_by_key(|w| w.level);
    warnings
}

/// Load and validate the stored settings in one pass.
pub fn validate_stored(conn: &Connection) -> Result<Vec<SettingsWarning>, rusqlite::Error> {
    let pairs = repository::list_config(conn)?;
    let fields = repository::list_custom_fields(conn)?;
    let statuses = repository::list_issue_statuses(conn)?;
    Ok(validate(&pairs, &fields, &statuses))
}
