use clap::{Parser, Subcommand};
use colored::{ColoredString, Colorize};

use budgetwatch::history::{self, TrackedField};
use budgetwatch::present::{self, format, Metric, Severity};
use budgetwatch::storage::repository;
use budgetwatch::{BudgetWatch, ProjectMetrics, WarningLevel};

#[derive(Parser)]
#[command(name = "budgetwatch", about = "Project budget metrics and change history")]
struct Cli {
    /// Database path (default: ~/.budgetwatch/budgetwatch.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage projects and their tracked fields
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// Manage custom fields
    Field {
        #[command(subcommand)]
        action: FieldAction,
    },
    /// Manage issue statuses
    Status {
        #[command(subcommand)]
        action: StatusAction,
    },
    /// Manage issues
    Issue {
        #[command(subcommand)]
        action: IssueAction,
    },
    /// Record spent time
    Time {
        #[command(subcommand)]
        action: TimeAction,
    },
    /// Show budget metrics for a project
    Metrics {
        /// Project id or identifier
        project: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show budget metrics for every project
    Portfolio {
        #[arg(long)]
        json: bool,
    },
    /// Explain how a metric was computed
    Explain {
        /// Project id or identifier
        project: String,
        /// progress, budget_used, cpi, eac, variance, efficiency, health
        metric: String,
    },
    /// Show change history of tracked fields
    History {
        /// Project id or identifier
        project: String,
        /// Only this field, as a tooltip window (budget, start_date, end_date, comment)
        #[arg(long)]
        field: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Validate settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Create a project
    Add {
        identifier: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// List projects
    List,
    /// Set tracked fields; an empty value clears the field
    Set {
        /// Project id or identifier
        project: String,
        #[arg(long)]
        budget: Option<String>,
        #[arg(long)]
        start_date: Option<String>,
        #[arg(long)]
        end_date: Option<String>,
        #[arg(long)]
        comment: Option<String>,
        /// Acting user recorded in history
        #[arg(long)]
        user: Option<String>,
    },
}

#[derive(Subcommand)]
enum FieldAction {
    /// Create a custom field
    Add {
        name: String,
        /// float, int, date, string or text
        #[arg(long, default_value = "string")]
        format: String,
    },
    /// List custom fields
    List,
}

#[derive(Subcommand)]
enum StatusAction {
    /// Add or update an issue status
    Add {
        id: i64,
        name: String,
        /// Issues in this status count as done
        #[arg(long)]
        closed: bool,
    },
}

#[derive(Subcommand)]
enum IssueAction {
    /// Add an issue to a project
    Add {
        /// Project id or identifier
        project: String,
        subject: String,
        /// Status id
        #[arg(long)]
        status: i64,
        /// Estimated hours
        #[arg(long)]
        estimate: Option<f64>,
    },
}

#[derive(Subcommand)]
enum TimeAction {
    /// Log time against a project
    Log {
        /// Project id or identifier
        project: String,
        hours: f64,
        /// Issue id
        #[arg(long)]
        issue: Option<i64>,
        /// Day the time was spent (YYYY-MM-DD, default: today)
        #[arg(long)]
        on: Option<String>,
        #[arg(long)]
        user: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Report problems with the stored settings
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => budgetwatch::Database::open_at(path).await?,
        None => budgetwatch::Database::open().await?,
    };
    let bw = BudgetWatch::new(db);

    match cli.command {
        Commands::Project { action } => handle_project(&bw, action).await?,
        Commands::Field { action } => handle_field(&bw, action).await?,
        Commands::Status {
            action: StatusAction::Add { id, name, closed },
        } => {
            bw.db()
                .writer()
                .call(move |conn| repository::upsert_issue_status(conn, id, &name, closed))
                .await?;
            println!("Status {id} saved.");
        }
        Commands::Issue {
            action:
                IssueAction::Add {
                    project,
                    subject,
                    status,
                    estimate,
                },
        } => {
            let p = bw.resolve_project(&project).await?;
            let id = bw
                .db()
                .writer()
                .call(move |conn| repository::insert_issue(conn, p.id, &subject, status, estimate))
                .await?;
            println!("Issue #{id} added.");
        }
        Commands::Time {
            action:
                TimeAction::Log {
                    project,
                    hours,
                    issue,
                    on,
                    user,
                },
        } => {
            let p = bw.resolve_project(&project).await?;
            let spent_on = match on {
                Some(d) => chrono::NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                    .map_err(|e| anyhow::anyhow!("invalid date {d:?}: {e}"))?,
                None => chrono::Local::now().date_naive(),
            };
            let spent_on = spent_on.format("%Y-%m-%d").to_string();
            bw.db()
                .writer()
                .call(move |conn| {
                    repository::insert_time_entry(conn, p.id, issue, hours, &spent_on, user.as_deref())
                })
                .await?;
            println!("Logged {} h.", format::hours(hours));
        }
        Commands::Metrics { project, json } => {
            let settings = bw.settings().await?;
            let p = bw.resolve_project(&project).await?;
            let pm = bw.project_metrics(p.id, &settings).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&metrics_json(&pm))?);
            } else {
                print_project_metrics(&pm);
            }
        }
        Commands::Portfolio { json } => {
            let settings = bw.settings().await?;
            let all = bw.portfolio_metrics(&settings).await?;
            if json {
                let out: Vec<serde_json::Value> = all.iter().map(metrics_json).collect();
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else if all.is_empty() {
                println!("No projects.");
            } else {
                print_portfolio(&all);
            }
        }
        Commands::Explain { project, metric } => {
            let metric: Metric = metric.parse()?;
            let settings = bw.settings().await?;
            let p = bw.resolve_project(&project).await?;
            let pm = bw.project_metrics(p.id, &settings).await?;
            match pm.metrics {
                Some(m) => println!("{}", present::explain(metric, &m)),
                None => println!("{}: no budget set, metrics unavailable", pm.project_name),
            }
        }
        Commands::History {
            project,
            field,
            json,
        } => {
            let settings = bw.settings().await?;
            let p = bw.resolve_project(&project).await?;
            match field {
                Some(f) => {
                    let field: TrackedField = f.parse()?;
                    let entries = bw.history_for(p.id, field, &settings).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&entries)?);
                    } else {
                        println!("{}", history::history_tooltip(field, &entries, &settings));
                    }
                }
                None => {
                    let entries = bw.full_history(p.id, None).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&entries)?);
                    } else if entries.is_empty() {
                        println!("No changes recorded for {}.", p.name);
                    } else {
                        for e in &entries {
                            let line = format!(
                                "{}  {:<16} {} → {}  ({})",
                                budgetwatch::date_util::display_timestamp(&e.created_at),
                                e.field.label(),
                                e.formatted_old_value(settings.comment_max_length),
                                e.formatted_new_value(settings.comment_max_length),
                                e.actor.as_deref().unwrap_or("unknown user"),
                            );
                            if e.is_highlightable() && e.is_real_change() {
                                println!("{}", line.yellow());
                            } else {
                                println!("{line}");
                            }
                        }
                    }
                }
            }
        }
        Commands::Config { action } => handle_config(&bw, action).await?,
        Commands::Settings {
            action: SettingsAction::Check,
        } => {
            let warnings = bw.validate_settings().await?;
            if warnings.is_empty() {
                println!("Settings OK.");
            }
            for w in &warnings {
                let level = match w.level {
                    WarningLevel::Error => w.level.to_string().red().bold(),
                    WarningLevel::Warning => w.level.to_string().yellow(),
                    WarningLevel::Info => w.level.to_string().normal(),
                };
                println!("{level}: {}", w.message);
            }
            if warnings.iter().any(|w| w.level == WarningLevel::Error) {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn handle_project(bw: &BudgetWatch, action: ProjectAction) -> anyhow::Result<()> {
    match action {
        ProjectAction::Add { identifier, name } => {
            let name = name.unwrap_or_else(|| identifier.clone());
            let id = bw
                .db()
                .writer()
                .call(move |conn| repository::insert_project(conn, &identifier, &name))
                .await?;
            println!("Project #{id} added.");
        }
        ProjectAction::List => {
            let projects = bw.db().reader().call(|conn| repository::list_projects(conn)).await?;
            if projects.is_empty() {
                println!("No projects.");
            }
            for p in projects {
                println!("#{} {} ({})", p.id, p.name, p.identifier);
            }
        }
        ProjectAction::Set {
            project,
            budget,
            start_date,
            end_date,
            comment,
            user,
        } => {
            let settings = bw.settings().await?;
            let p = bw.resolve_project(&project).await?;
            let updates: Vec<(TrackedField, Option<String>)> = [
                (TrackedField::Budget, budget),
                (TrackedField::StartDate, start_date),
                (TrackedField::EndDate, end_date),
                (TrackedField::Comment, comment),
            ]
            .into_iter()
            .filter_map(|(field, value)| value.map(|v| (field, Some(v).filter(|s| !s.is_empty()))))
            .collect();
            if updates.is_empty() {
                anyhow::bail!("nothing to set; pass --budget, --start-date, --end-date or --comment");
            }
            let changes = bw
                .update_project_fields(p.id, user.as_deref(), updates, &settings)
                .await?;
            if changes.is_empty() {
                println!("No changes.");
            }
            for c in &changes {
                println!(
                    "{}: {} → {}",
                    c.field.label(),
                    history::format_value(c.field, c.old.as_deref(), settings.comment_max_length),
                    history::format_value(c.field, c.new.as_deref(), settings.comment_max_length),
                );
            }
        }
    }
    Ok(())
}

async fn handle_field(bw: &BudgetWatch, action: FieldAction) -> anyhow::Result<()> {
    match action {
        FieldAction::Add { name, format } => {
            let id = bw
                .db()
                .writer()
                .call(move |conn| repository::insert_custom_field(conn, &name, &format))
                .await?;
            println!("Custom field #{id} added.");
        }
        FieldAction::List => {
            let fields = bw
                .db()
                .reader()
                .call(|conn| repository::list_custom_fields(conn))
                .await?;
            if fields.is_empty() {
                println!("No custom fields.");
            }
            for f in fields {
                println!("#{} {} [{}]", f.id, f.name, f.field_format);
            }
        }
    }
    Ok(())
}

async fn handle_config(bw: &BudgetWatch, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match bw.config_get(&key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            bw.config_set(&key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items = bw.config_list().await?;
            if items.is_empty() {
                println!("No configuration set.");
            }
            for (k, v) in items {
                println!("{k} = {v}");
            }
        }
    }
    Ok(())
}

/// Terminal rendering of a color token.
fn paint(text: &str, severity: Severity) -> ColoredString {
    match severity {
        Severity::Positive => text.green(),
        Severity::Caution => text.yellow(),
        Severity::Critical => text.red().bold(),
        Severity::Neutral => text.normal(),
    }
}

fn print_project_metrics(pm: &ProjectMetrics) {
    println!("Project Metrics: {} (#{})", pm.project_name, pm.project_id);
    let Some(m) = &pm.metrics else {
        println!("  No budget set; metrics unavailable");
        return;
    };
    println!("  Budget:      {} h", format::hours(m.raw.budget));
    println!("  Time spent:  {} h", format::hours(m.raw.time_spent));
    for view in present::summarize(m) {
        let label = format!("{}:", view.metric.as_str());
        let mut line = format!("  {label:<13}{}", paint(&view.display, view.classification.severity));
        if let Some(status) = view.classification.label {
            line.push_str(&format!("  {status}"));
        }
        println!("{line}");
    }
    if m.incomplete {
        println!("  Forecast incomplete: needs logged time and closed estimated work");
    }
}

fn print_portfolio(all: &[ProjectMetrics]) {
    println!(
        "{:<24} {:>9} {:>9} {:>7} {:>10} {:>16}",
        "Project", "Progress", "Spent", "CPI", "EAC", "Variance"
    );
    for pm in all {
        let Some(m) = &pm.metrics else {
            println!("{:<24} {}", pm.project_name, format::NO_DATA);
            continue;
        };
        let cell = |metric: Metric, width: usize| {
            let text = format!("{:>width$}", present::display_value(metric, m));
            paint(&text, present::classify(metric, metric.value(m)).severity)
        };
        println!(
            "{:<24} {} {} {} {} {}",
            pm.project_name,
            cell(Metric::Progress, 9),
            cell(Metric::BudgetUsed, 9),
            cell(Metric::Cpi, 7),
            cell(Metric::Eac, 10),
            cell(Metric::Variance, 16),
        );
    }
}

fn metrics_json(pm: &ProjectMetrics) -> serde_json::Value {
    serde_json::json!({
        "project_id": pm.project_id,
        "project_name": pm.project_name,
        "aggregates": pm.aggregates,
        "metrics": pm.metrics,
        "indicators": pm.metrics.as_ref().map(present::summarize),
    })
}
