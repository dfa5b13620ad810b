pub mod date_util;
pub mod error;
pub mod history;
pub mod metrics;
pub mod present;
pub mod settings;
pub mod storage;

pub use error::{Error, Result};
pub use history::{
    FieldChange, FieldChangeEvent, FieldChangeObserver, HistoryEntry, HistoryOrder,
    HistoryRecorder, TrackedField,
};
pub use metrics::{compute, MetricsInput, MetricsResult, ProjectAggregates, ProjectMetrics};
pub use present::{classify, explain, summarize, Classification, IndicatorView, Metric, Severity};
pub use settings::{Settings, SettingsWarning, WarningLevel};
pub use storage::Database;

use std::sync::Arc;

use chrono::Utc;

use storage::repository::{self, Project};

/// Main entry point: a database plus the observers notified when tracked
/// project fields change.
pub struct BudgetWatch {
    db: Database,
    observers: Vec<Arc<dyn FieldChangeObserver>>,
}

impl BudgetWatch {
    /// Create a facade with the history recorder registered.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            observers: vec![Arc::new(HistoryRecorder)],
        }
    }

    /// Create a facade with no observers registered.
    pub fn without_observers(db: Database) -> Self {
        Self {
            db,
            observers: Vec::new(),
        }
    }

    pub fn register_observer(&mut self, observer: Arc<dyn FieldChangeObserver>) {
        self.observers.push(observer);
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Resolve settings for one request.
    pub async fn settings(&self) -> Result<Settings> {
        self.db
            .reader()
            .call(|conn| Settings::load(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn validate_settings(&self) -> Result<Vec<SettingsWarning>> {
        self.db
            .reader()
            .call(|conn| settings::validate_stored(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Find a project by numeric id or identifier.
    pub async fn resolve_project(&self, identifier: &str) -> Result<Project> {
        let id = identifier.to_string();
        self.db
            .reader()
            .call(move |conn| repository::resolve_project(conn, &id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("project {identifier}")))
    }

    // ── Save pipeline ──────────────────────────────────────────────

    /// Write tracked field values for a project and notify observers of
    /// what actually changed. Everything runs in one transaction.
    ///
    /// `None` clears a field. Fields without a configured custom field and
    /// values the field cannot hold are rejected before anything is written.
    pub async fn update_project_fields(
        &self,
        project_id: i64,
        actor: Option<&str>,
        updates: Vec<(TrackedField, Option<String>)>,
        settings: &Settings,
    ) -> Result<Vec<FieldChange>> {
        let mut targets = Vec::with_capacity(updates.len());
        for (field, value) in updates {
            let field_id = settings.field_id(field).ok_or_else(|| {
                Error::Config(format!("no custom field configured for {field}"))
            })?;
            if let Some(v) = &value {
                field.validate(v)?;
            }
            targets.push((field, field_id, value));
        }

        let observers = self.observers.clone();
        let actor = actor.map(str::to_string);
        let changes = self
            .db
            .writer()
            .call(move |conn| {
                let tx = conn.transaction()?;
                if repository::get_project(&tx, project_id)?.is_none() {
                    return Ok(None);
                }

                let mut changes = Vec::new();
                for (field, field_id, value) in &targets {
                    let old = repository::get_custom_value(&tx, project_id, *field_id)?;
                    repository::set_custom_value(&tx, project_id, *field_id, value.as_deref())?;
                    if let Some(change) = FieldChange::detect(*field, old.as_deref(), value.as_deref()) {
                        changes.push(change);
                    }
                }

                if !changes.is_empty() {
                    let event = FieldChangeEvent {
                        project_id,
                        actor,
                        changes,
                        occurred_at: Utc::now(),
                    };
                    for observer in &observers {
                        observer.on_fields_changed(&tx, &event)?;
                    }
                    changes = event.changes;
                }
                tx.commit()?;
                Ok::<_, rusqlite::Error>(Some(changes))
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| Error::NotFound(format!("project {project_id}")))?;

        log::info!("Project {project_id}: {} tracked field(s) changed", changes.len());
        Ok(changes)
    }

    // ── Metrics ────────────────────────────────────────────────────

    pub async fn project_metrics(&self, project_id: i64, settings: &Settings) -> Result<ProjectMetrics> {
        metrics::compute_project_metrics(&self.db, project_id, settings).await
    }

    pub async fn portfolio_metrics(&self, settings: &Settings) -> Result<Vec<ProjectMetrics>> {
        metrics::compute_portfolio_metrics(&self.db, settings).await
    }

    // ── History ────────────────────────────────────────────────────

    /// Recent real changes of one field, bounded and ordered by settings.
    pub async fn history_for(
        &self,
        project_id: i64,
        field: TrackedField,
        settings: &Settings,
    ) -> Result<Vec<HistoryEntry>> {
        let entries = self.full_history(project_id, Some(field)).await?;
        Ok(history::recent_changes(
            &entries,
            field,
            settings.history_limit,
            settings.history_order,
        )
        .into_iter()
        .cloned()
        .collect())
    }

    /// Every recorded change of a project, newest first.
    pub async fn full_history(
        &self,
        project_id: i64,
        field: Option<TrackedField>,
    ) -> Result<Vec<HistoryEntry>> {
        self.db
            .reader()
            .call(move |conn| repository::list_history(conn, project_id, field, None))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    // ── Config ─────────────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        self.db
            .reader()
            .call({
                let key = key.to_string();
                move |conn| repository::get_config(conn, &key)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .writer()
            .call({
                let key = key.to_string();
                let value = value.to_string();
                move |conn| repository::set_config(conn, &key, &value)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        self.db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}
