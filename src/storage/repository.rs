use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;

use crate::date_util::parse_timestamp;
use crate::history::{HistoryEntry, TrackedField};
use crate::metrics::ProjectAggregates;
use crate::settings::Settings;

// ── Projects ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    pub id: i64,
    pub identifier: String,
    pub name: String,
    pub created_at: String,
}

pub fn insert_project(conn: &Connection, identifier: &str, name: &str) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO projects (identifier, name, created_at) VALUES (?1, ?2, datetime('now'))",
        params![identifier, name],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_project(conn: &Connection, id: i64) -> Result<Option<Project>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, identifier, name, created_at FROM projects WHERE id = ?1",
        params![id],
        project_from_row,
    )
    .optional()
}

/// Resolve a project by numeric id or by identifier.
pub fn resolve_project(conn: &Connection, identifier: &str) -> Result<Option<Project>, rusqlite::Error> {
    if let Ok(id) = identifier.parse::<i64>() {
        if let Some(project) = get_project(conn, id)? {
            return Ok(Some(project));
        }
    }
    conn.query_row(
        "SELECT id, identifier, name, created_at FROM projects WHERE identifier = ?1",
        params![identifier],
        project_from_row,
    )
    .optional()
}

pub fn list_projects(conn: &Connection) -> Result<Vec<Project>, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT id, identifier, name, created_at FROM projects ORDER BY name, id")?;
    let rows = stmt.query_map([], project_from_row)?;
    rows.collect()
}

fn project_from_row(row: &rusqlite::Row<'_>) -> Result<Project, rusqlite::Error> {
    Ok(Project {
        id: row.get(0)?,
        identifier: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

// ── Custom fields ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomField {
    pub id: i64,
    pub name: String,
    /// `float`, `int`, `date`, `string` or `text`.
    pub field_format: String,
}

pub fn insert_custom_field(
    conn: &Connection,
    name: &str,
    field_format: &str,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO custom_fields (name, field_format) VALUES (?1, ?2)",
        params![name, field_format],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_custom_fields(conn: &Connection) -> Result<Vec<CustomField>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT id, name, field_format FROM custom_fields ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok(CustomField {
            id: row.get(0)?,
            name: row.get(1)?,
            field_format: row.get(2)?,
        })
    })?;
    rows.collect()
}

pub fn get_custom_value(
    conn: &Connection,
    project_id: i64,
    custom_field_id: i64,
) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM custom_values WHERE project_id = ?1 AND custom_field_id = ?2",
        params![project_id, custom_field_id],
        |row| row.get(0),
    )
    .optional()
    .map(|opt| opt.flatten())
}

pub fn set_custom_value(
    conn: &Connection,
    project_id: i64,
    custom_field_id: i64,
    value: Option<&str>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO custom_values (project_id, custom_field_id, value) VALUES (?1, ?2, ?3)
         ON CONFLICT(project_id, custom_field_id) DO UPDATE SET value = excluded.value",
        params![project_id, custom_field_id, value],
    )?;
    Ok(())
}

// ── Issues & time ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueStatus {
    pub id: i64,
    pub name: String,
    pub is_closed: bool,
}

pub fn upsert_issue_status(
    conn: &Connection,
    id: i64,
    name: &str,
    is_closed: bool,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO issue_statuses (id, name, is_closed) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, is_closed = excluded.is_closed",
        params![id, name, is_closed as i32],
    )?;
    Ok(())
}

pub fn list_issue_statuses(conn: &Connection) -> Result<Vec<IssueStatus>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT id, name, is_closed FROM issue_statuses ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok(IssueStatus {
            id: row.get(0)?,
            name: row.get(1)?,
            is_closed: row.get(2)?,
        })
    })?;
    rows.collect()
}

pub fn insert_issue(
    conn: &Connection,
    project_id: i64,
    subject: &str,
    status_id: i64,
    estimated_hours: Option<f64>,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO issues (project_id, subject, status_id, estimated_hours)
         VALUES (?1, ?2, ?3, ?4)",
        params![project_id, subject, status_id, estimated_hours],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_time_entry(
    conn: &Connection,
    project_id: i64,
    issue_id: Option<i64>,
    hours: f64,
    spent_on: &str,
    user_name: Option<&str>,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO time_entries (project_id, issue_id, hours, spent_on, user_name)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![project_id, issue_id, hours, spent_on, user_name],
    )?;
    Ok(conn.last_insert_rowid())
}

// ── Aggregates ─────────────────────────────────────────────────────

/// Load metric aggregates for many projects with one grouped query per
/// source table. Results come back in the order of `project_ids`; projects
/// without issues or time entries get zeroed aggregates.
pub fn load_aggregates(
    conn: &Connection,
    project_ids: &[i64],
    settings: &Settings,
) -> Result<Vec<ProjectAggregates>, rusqlite::Error> {
    if project_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut by_project: HashMap<i64, ProjectAggregates> = project_ids
        .iter()
        .map(|&id| {
            (
                id,
                ProjectAggregates {
                    project_id: id,
                    ..ProjectAggregates::default()
                },
            )
        })
        .collect();

    let n = project_ids.len();
    let project_placeholders = numbered_placeholders(1, n);

    // Issues: estimated sums and unestimated counts
    let closed_clause = if settings.closed_status_ids.is_empty() {
        "i.status_id IN (SELECT id FROM issue_statuses WHERE is_closed = 1)".to_string()
    } else {
        format!(
            "i.status_id IN ({})",
            numbered_placeholders(n + 1, settings.closed_status_ids.len())
        )
    };
    let sql = format!(
        "SELECT i.project_id,
            COALESCE(SUM(CASE WHEN i.estimated_hours > 0 THEN i.estimated_hours END), 0),
            COALESCE(SUM(CASE WHEN i.estimated_hours > 0 AND {closed_clause}
                              THEN i.estimated_hours END), 0),
            SUM(CASE WHEN i.estimated_hours IS NULL OR i.estimated_hours <= 0 THEN 1 ELSE 0 END),
            SUM(CASE WHEN (i.estimated_hours IS NULL OR i.estimated_hours <= 0) AND {closed_clause}
                     THEN 1 ELSE 0 END)
         FROM issues i
         WHERE i.project_id IN ({project_placeholders})
         GROUP BY i.project_id"
    );
    let bind: Vec<i64> = project_ids
        .iter()
        .chain(settings.closed_status_ids.iter())
        .copied()
        .collect();
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(bind.iter()))?;
    while let Some(row) = rows.next()? {
        let project_id: i64 = row.get(0)?;
        if let Some(agg) = by_project.get_mut(&project_id) {
            agg.estimated_total = row.get(1)?;
            agg.estimated_closed = row.get(2)?;
            agg.unestimated_count = row.get::<_, Option<i64>>(3)?.unwrap_or(0).max(0) as u64;
            agg.unestimated_closed_count =
                row.get::<_, Option<i64>>(4)?.unwrap_or(0).max(0) as u64;
        }
    }

    // Time entries
    let sql = format!(
        "SELECT project_id, COALESCE(SUM(hours), 0) FROM time_entries
         WHERE project_id IN ({project_placeholders})
         GROUP BY project_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(project_ids.iter()))?;
    while let Some(row) = rows.next()? {
        let project_id: i64 = row.get(0)?;
        if let Some(agg) = by_project.get_mut(&project_id) {
            agg.time_spent = row.get(1)?;
        }
    }

    // Budget custom values
    if let Some(field_id) = settings.budget_field_id {
        let sql = format!(
            "SELECT project_id, value FROM custom_values
             WHERE custom_field_id = ?{} AND project_id IN ({project_placeholders})",
            n + 1
        );
        let bind: Vec<i64> = project_ids
            .iter()
            .copied()
            .chain(std::iter::once(field_id))
            .collect();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind.iter()))?;
        while let Some(row) = rows.next()? {
            let project_id: i64 = row.get(0)?;
            let raw: Option<String> = row.get(1)?;
            if let Some(agg) = by_project.get_mut(&project_id) {
                agg.budget = raw.as_deref().and_then(parse_hours);
                if agg.budget.is_none() && raw.as_deref().is_some_and(|v| !v.trim().is_empty()) {
                    log::debug!("Project {project_id}: budget value {raw:?} is not a number");
                }
            }
        }
    }

    Ok(project_ids
        .iter()
        .filter_map(|id| by_project.remove(id))
        .collect())
}

fn numbered_placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse an hours value as stored in a custom field. Accepts a decimal comma.
pub fn parse_hours(raw: &str) -> Option<f64> {
    raw.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

// ── History ────────────────────────────────────────────────────────

pub fn insert_history(
    conn: &Connection,
    project_id: i64,
    field: TrackedField,
    old_value: Option<&str>,
    new_value: Option<&str>,
    actor: Option<&str>,
    created_at: &DateTime<Utc>,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO project_histories (project_id, user_name, field_name, old_value, new_value, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            project_id,
            actor,
            field.as_str(),
            old_value,
            new_value,
            created_at.to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// History of a project, newest first. Rows with an unknown field name or
/// an unreadable timestamp are skipped.
///
/// Ordering uses the parsed timestamp since stored values mix RFC 3339 and
/// SQLite `datetime()` text, which do not sort together as strings.
pub fn list_history(
    conn: &Connection,
    project_id: i64,
    field: Option<TrackedField>,
    limit: Option<usize>,
) -> Result<Vec<HistoryEntry>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, project_id, field_name, old_value, new_value, user_name, created_at
         FROM project_histories
         WHERE project_id = ?1 AND (?2 IS NULL OR field_name = ?2)",
    )?;
    let rows = stmt.query_map(
        params![project_id, field.map(|f| f.as_str())],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
            ))
        },
    )?;

    let mut entries = Vec::new();
    for row in rows {
        let (id, project_id, field_name, old_value, new_value, actor, created_at) = row?;
        let Ok(field) = field_name.parse::<TrackedField>() else {
            log::warn!("History row {id} has unknown field {field_name:?}");
            continue;
        };
        let Some(created_at) = parse_timestamp(&created_at) else {
            log::warn!("History row {id} has unreadable timestamp {created_at:?}");
            continue;
        };
        entries.push(HistoryEntry {
            id,
            project_id,
            field,
            old_value,
            new_value,
            actor,
            created_at,
        });
    }
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    if let Some(limit) = limit {
        entries.truncate(limit);
    }
    Ok(entries)
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use chrono::TimeZone;

    fn seed_statuses(conn: &Connection) -> Result<(), rusqlite::Error> {
        upsert_issue_status(conn, 1, "New", false)?;
        upsert_issue_status(conn, 2, "In Progress", false)?;
        upsert_issue_status(conn, 5, "Closed", true)?;
        upsert_issue_status(conn, 6, "Rejected", true)
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                set_config(conn, "budget_custom_field_id", "7")?;
                let val = get_config(conn, "budget_custom_field_id")?;
                assert_eq!(val, Some("7".to_string()));

                let missing = get_config(conn, "nonexistent")?;
                assert_eq!(missing, None);

                set_config(conn, "budget_custom_field_id", "8")?;
                assert_eq!(list_config(conn)?, vec![("budget_custom_field_id".to_string(), "8".to_string())]);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_resolve_project_by_id_or_identifier() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let id = insert_project(conn, "apollo", "Apollo")?;
                assert_eq!(resolve_project(conn, &id.to_string())?.unwrap().identifier, "apollo");
                assert_eq!(resolve_project(conn, "apollo")?.unwrap().id, id);
                assert!(resolve_project(conn, "gemini")?.is_none());
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_custom_value_upsert() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let project = insert_project(conn, "apollo", "Apollo")?;
                let field = insert_custom_field(conn, "Budget", "float")?;
                assert_eq!(get_custom_value(conn, project, field)?, None);

                set_custom_value(conn, project, field, Some("100"))?;
                set_custom_value(conn, project, field, Some("120"))?;
                assert_eq!(get_custom_value(conn, project, field)?, Some("120".to_string()));

                set_custom_value(conn, project, field, None)?;
                assert_eq!(get_custom_value(conn, project, field)?, None);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_load_aggregates_grouped() {
        let db = Database::open_memory().await.unwrap();

        let aggs = db
            .writer()
            .call(|conn| {
                seed_statuses(conn)?;
                let budget_field = insert_custom_field(conn, "Budget", "float")?;
                let p1 = insert_project(conn, "apollo", "Apollo")?;
                let p2 = insert_project(conn, "gemini", "Gemini")?;
                let p3 = insert_project(conn, "mercury", "Mercury")?;

                set_custom_value(conn, p1, budget_field, Some("100"))?;
                set_custom_value(conn, p2, budget_field, Some("n/a"))?;

                insert_issue(conn, p1, "Design", 5, Some(20.0))?;
                insert_issue(conn, p1, "Build", 2, Some(40.0))?;
                insert_issue(conn, p1, "Docs", 5, None)?;
                insert_issue(conn, p1, "Review", 1, Some(0.0))?;
                insert_issue(conn, p1, "Rejected idea", 6, Some(5.0))?;
                insert_issue(conn, p2, "Spike", 1, Some(8.0))?;

                insert_time_entry(conn, p1, None, 10.0, "2025-01-02", Some("alice"))?;
                insert_time_entry(conn, p1, None, 2.5, "2025-01-03", None)?;

                let settings = Settings {
                    budget_field_id: Some(budget_field),
                    ..Settings::default()
                };
                load_aggregates(conn, &[p1, p2, p3], &settings)
            })
            .await
            .unwrap();

        assert_eq!(aggs.len(), 3);
        let a = &aggs[0];
        assert_eq!(a.budget, Some(100.0));
        assert_eq!(a.estimated_total, 65.0);
        assert_eq!(a.estimated_closed, 25.0);
        assert_eq!(a.unestimated_count, 2);
        assert_eq!(a.unestimated_closed_count, 1);
        assert_eq!(a.time_spent, 12.5);

        let b = &aggs[1];
        assert_eq!(b.budget, None);
        assert_eq!(b.estimated_total, 8.0);
        assert_eq!(b.time_spent, 0.0);

        let c = &aggs[2];
        assert_eq!(c.estimated_total, 0.0);
        assert_eq!(c.unestimated_count, 0);
    }

    #[tokio::test]
    async fn test_load_aggregates_explicit_closed_statuses() {
        let db = Database::open_memory().await.unwrap();

        let aggs = db
            .writer()
            .call(|conn| {
                seed_statuses(conn)?;
                let p1 = insert_project(conn, "apollo", "Apollo")?;
                insert_issue(conn, p1, "Design", 5, Some(20.0))?;
                insert_issue(conn, p1, "Build", 2, Some(40.0))?;
                insert_issue(conn, p1, "Rejected", 6, Some(5.0))?;

                // Only status 5 counts as done; rejected work is not progress.
                let settings = Settings {
                    closed_status_ids: vec![5],
                    ..Settings::default()
                };
                load_aggregates(conn, &[p1], &settings)
            })
            .await
            .unwrap();

        assert_eq!(aggs[0].estimated_closed, 20.0);
        assert_eq!(aggs[0].budget, None);
    }

    #[test]
    fn test_parse_hours() {
        assert_eq!(parse_hours("40"), Some(40.0));
        assert_eq!(parse_hours(" 12,5 "), Some(12.5));
        assert_eq!(parse_hours(""), None);
        assert_eq!(parse_hours("NaN"), None);
        assert_eq!(parse_hours("forty"), None);
    }

    #[tokio::test]
    async fn test_history_newest_first_with_filter_and_limit() {
        let db = Database::open_memory().await.unwrap();

        let (all, budget_only, limited) = db
            .writer()
            .call(|conn| {
                let p = insert_project(conn, "apollo", "Apollo")?;
                let t = |m: u32| Utc.with_ymd_and_hms(2025, 3, 1, 10, m, 0).unwrap();
                insert_history(conn, p, TrackedField::Budget, None, Some("100"), Some("alice"), &t(0))?;
                insert_history(conn, p, TrackedField::EndDate, Some("2025-05-01"), Some("2025-06-01"), None, &t(1))?;
                insert_history(conn, p, TrackedField::Budget, Some("100"), Some("150"), Some("bob"), &t(2))?;
                Ok::<_, rusqlite::Error>((
                    list_history(conn, p, None, None)?,
                    list_history(conn, p, Some(TrackedField::Budget), None)?,
                    list_history(conn, p, None, Some(1))?,
                ))
            })
            .await
            .unwrap();

        assert_eq!(all.len(), 3);
        assert_eq!(all[0].new_value.as_deref(), Some("150"));
        assert_eq!(all[1].field, TrackedField::EndDate);
        assert_eq!(all[1].actor, None);
        assert_eq!(budget_only.len(), 2);
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].actor.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_history_orders_mixed_timestamp_formats() {
        let db = Database::open_memory().await.unwrap();

        let entries = db
            .writer()
            .call(|conn| {
                let p = insert_project(conn, "apollo", "Apollo")?;
                let morning = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
                insert_history(conn, p, TrackedField::Budget, Some("80"), Some("90"), Some("alice"), &morning)?;
                conn.execute(
                    "INSERT INTO project_histories (project_id, user_name, field_name, old_value, new_value, created_at)
                     VALUES (?1, 'bob', 'budget', '90', '120', '2025-06-01 12:00:00')",
                    params![p],
                )?;
                list_history(conn, p, None, Some(1))
            })
            .await
            .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].actor.as_deref(), Some("bob"));
        assert_eq!(entries[0].new_value.as_deref(), Some("120"));
    }

    #[tokio::test]
    async fn test_history_rejects_empty_change() {
        let db = Database::open_memory().await.unwrap();

        let result = db
            .writer()
            .call(|conn| {
                let p = insert_project(conn, "apollo", "Apollo")?;
                insert_history(conn, p, TrackedField::Comment, None, None, None, &Utc::now())
            })
            .await;

        assert!(result.is_err());
    }
}
