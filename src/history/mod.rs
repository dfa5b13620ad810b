use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;

use crate::date_util::{display_date, display_timestamp, parse_date, truncate_chars};
use crate::error::Error;
use crate::present::format::strip_insignificant_zeros;
use crate::settings::Settings;
use crate::storage::repository;

/// Placeholder shown for a missing value.
pub const NOT_SET: &str = "(not set)";

/// Project fields whose changes are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedField {
    Budget,
    StartDate,
    EndDate,
    Comment,
}

impl TrackedField {
    pub const ALL: [TrackedField; 4] = [
        TrackedField::Budget,
        TrackedField::StartDate,
        TrackedField::EndDate,
        TrackedField::Comment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackedField::Budget => "budget",
            TrackedField::StartDate => "start_date",
            TrackedField::EndDate => "end_date",
            TrackedField::Comment => "comment",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TrackedField::Budget => "Project budget",
            TrackedField::StartDate => "Project start",
            TrackedField::EndDate => "Project end",
            TrackedField::Comment => "Comment",
        }
    }

    /// Changes to these fields get highlighted in project listings.
    pub fn is_highlightable(&self) -> bool {
        !matches!(self, TrackedField::Comment)
    }

    /// Reject a value this field cannot hold: budgets must be a positive
    /// number of hours and dates must parse.
    pub fn validate(&self, value: &str) -> Result<(), Error> {
        let ok = match self {
            TrackedField::Budget => repository::parse_hours(value).is_some_and(|h| h > 0.0),
            TrackedField::StartDate | TrackedField::EndDate => parse_date(value).is_some(),
            TrackedField::Comment => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::Validation(format!("{}: {value:?}", self.label())))
        }
    }
}

impl fmt::Display for TrackedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackedField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "budget" => Ok(TrackedField::Budget),
            "start_date" | "start" => Ok(TrackedField::StartDate),
            "end_date" | "end" => Ok(TrackedField::EndDate),
            "comment" => Ok(TrackedField::Comment),
            _ => Err(Error::UnknownField(s.to_string())),
        }
    }
}

/// Display order for a window of history entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

impl HistoryOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "newest_first" | "desc" => Some(HistoryOrder::NewestFirst),
            "oldest_first" | "asc" => Some(HistoryOrder::OldestFirst),
            _ => None,
        }
    }
}

/// One recorded change of a tracked field. Never updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub project_id: i64,
    pub field: TrackedField,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub actor: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// A real change replaces an existing value; the first assignment of a
    /// field has no old value and is not one.
    pub fn is_real_change(&self) -> bool {
        self.old_value.is_some()
    }

    pub fn is_highlightable(&self) -> bool {
        self.field.is_highlightable()
    }

    pub fn formatted_old_value(&self, max_len: usize) -> String {
        format_value(self.field, self.old_value.as_deref(), max_len)
    }

    pub fn formatted_new_value(&self, max_len: usize) -> String {
        format_value(self.field, self.new_value.as_deref(), max_len)
    }
}

/// A detected change of one field, with blank values normalized to `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: TrackedField,
    pub old: Option<String>,
    pub new: Option<String>,
}

impl FieldChange {
    /// Returns `None` when the normalized values are equal.
    pub fn detect(field: TrackedField, old: Option<&str>, new: Option<&str>) -> Option<Self> {
        let old = presence(old);
        let new = presence(new);
        if old == new {
            return None;
        }
        Some(FieldChange { field, old, new })
    }
}

fn presence(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Everything a save changed on one project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChangeEvent {
    pub project_id: i64,
    pub actor: Option<String>,
    pub changes: Vec<FieldChange>,
    pub occurred_at: DateTime<Utc>,
}

/// Hook invoked by the save pipeline after tracked fields were written.
///
/// Observers run inside the save transaction; returning an error rolls the
/// whole save back.
pub trait FieldChangeObserver: Send + Sync {
    fn on_fields_changed(
        &self,
        conn: &Connection,
        event: &FieldChangeEvent,
    ) -> Result<(), rusqlite::Error>;
}

/// Appends one history row per change.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryRecorder;

impl FieldChangeObserver for HistoryRecorder {
    fn on_fields_changed(
        &self,
        conn: &Connection,
        event: &FieldChangeEvent,
    ) -> Result<(), rusqlite::Error> {
        let Some(actor) = event.actor.as_deref() else {
            log::debug!(
                "Skipping history for project {}: no acting user",
                event.project_id
            );
            return Ok(());
        };
        for change in &event.changes {
            repository::insert_history(
                conn,
                event.project_id,
                change.field,
                change.old.as_deref(),
                change.new.as_deref(),
                Some(actor),
                &event.occurred_at,
            )?;
        }
        log::debug!(
            "Recorded {} change(s) for project {}",
            event.changes.len(),
            event.project_id
        );
        Ok(())
    }
}

/// Pick up to `limit` most recent real changes of `field` from `entries`
/// (which may be in any order) and return them in `order`.
pub fn recent_changes<'a>(
    entries: &'a [HistoryEntry],
    field: TrackedField,
    limit: usize,
    order: HistoryOrder,
) -> Vec<&'a HistoryEntry> {
    let mut picked: Vec<&HistoryEntry> = entries
        .iter()
        .filter(|e| e.field == field && e.is_real_change())
        .collect();
    picked.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    picked.truncate(limit);
    if order == HistoryOrder::OldestFirst {
        picked.reverse();
    }
    picked
}

/// Format a stored value for display according to its field type.
pub fn format_value(field: TrackedField, value: Option<&str>, max_len: usize) -> String {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return NOT_SET.to_string();
    };
    match field {
        TrackedField::StartDate | TrackedField::EndDate => display_date(value),
        TrackedField::Budget => match value.replace(',', ".").parse::<f64>() {
            Ok(n) if n.is_finite() => {
                format!("{} h", strip_insignificant_zeros(&format!("{n:.2}")))
            }
            _ => format!("{value} h"),
        },
        TrackedField::Comment => truncate_chars(value, max_len),
    }
}

/// Tooltip text listing the recent changes of one field.
pub fn history_tooltip(field: TrackedField, entries: &[HistoryEntry], settings: &Settings) -> String {
    let recent = recent_changes(entries, field, settings.history_limit, settings.history_order);
    if recent.is_empty() {
        return format!("{}: no changes recorded", field.label());
    }
    let mut lines = vec![format!("{}: recent changes", field.label())];
    for entry in recent {
        let actor = entry.actor.as_deref().unwrap_or("unknown user");
        lines.push(format!(
            "{}  {} → {}  ({actor})",
            display_timestamp(&entry.created_at),
            entry.formatted_old_value(settings.comment_max_length),
            entry.formatted_new_value(settings.comment_max_length),
        ));
    }
    lines.join("\n")
}
