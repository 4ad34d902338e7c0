//! Quality issue ledger
//!
//! Issues are raised against AOI findings and carry a frozen snapshot of
//! outcome counts taken when they are created. Every field change made
//! through [`update_issue`] lands in `issue_changelog` in the same
//! transaction as the update itself.

use std::fmt;
use std::str::FromStr;

use aoi_common::{Error, Outcome, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::info;

use crate::aggregate::{outcome_counts, OutcomeCount};
use crate::query::{push_in, DefectFilter};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Author recorded on changelog rows when the caller names nobody
pub const DEFAULT_CHANGED_BY: &str = "System";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueStatus {
    #[default]
    Open,
    #[serde(rename = "In Progress")]
    InProgress,
    Closed,
    #[serde(rename = "On Hold")]
    OnHold,
    Reopened,
}

impl IssueStatus {
    pub const ALL: [IssueStatus; 5] = [
        IssueStatus::Open,
        IssueStatus::InProgress,
        IssueStatus::Closed,
        IssueStatus::OnHold,
        IssueStatus::Reopened,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Open => "Open",
            IssueStatus::InProgress => "In Progress",
            IssueStatus::Closed => "Closed",
            IssueStatus::OnHold => "On Hold",
            IssueStatus::Reopened => "Reopened",
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidInput(format!("unknown issue status '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueCategory {
    #[serde(rename = "Component-related")]
    ComponentRelated,
    #[serde(rename = "Process-related")]
    ProcessRelated,
    #[serde(rename = "Machine-related")]
    MachineRelated,
    #[serde(rename = "Operator error")]
    OperatorError,
    #[default]
    Other,
}

impl IssueCategory {
    pub const ALL: [IssueCategory; 5] = [
        IssueCategory::ComponentRelated,
        IssueCategory::ProcessRelated,
        IssueCategory::MachineRelated,
        IssueCategory::OperatorError,
        IssueCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCategory::ComponentRelated => "Component-related",
            IssueCategory::ProcessRelated => "Process-related",
            IssueCategory::MachineRelated => "Machine-related",
            IssueCategory::OperatorError => "Operator error",
            IssueCategory::Other => "Other",
        }
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidInput(format!("unknown issue category '{}'", s)))
    }
}

/// AOI outcome counts captured when an issue was raised
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AoiSnapshot {
    pub real: i64,
    #[serde(rename = "false")]
    pub false_calls: i64,
    pub fixed: i64,
    pub suspect: i64,
}

impl AoiSnapshot {
    fn from_counts(counts: &[OutcomeCount]) -> Self {
        let count = |outcome: Outcome| {
            counts
                .iter()
                .find(|c| c.outcome == outcome)
                .map(|c| c.count)
                .unwrap_or(0)
        };
        Self {
            real: count(Outcome::Real),
            false_calls: count(Outcome::False),
            fixed: count(Outcome::FixedFromPreviouslyCaught),
            suspect: count(Outcome::Suspect),
        }
    }
}

/// Editable part of an issue: context, 5W2H, actions and root cause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueDetails {
    pub date_reported: NaiveDate,
    #[serde(default)]
    pub line_name: String,
    #[serde(default)]
    pub component_pn: String,
    #[serde(default)]
    pub ref_id: String,
    #[serde(default)]
    pub issue_category: IssueCategory,
    #[serde(default)]
    pub issue_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub what_issue: String,
    #[serde(default)]
    pub where_occurred: String,
    #[serde(default)]
    pub why_preliminary: String,
    #[serde(default)]
    pub when_happened: String,
    #[serde(default)]
    pub who_detected: String,
    #[serde(default)]
    pub how_detected: String,
    #[serde(default)]
    pub how_much_impact: String,
    #[serde(default)]
    pub short_term_fix: String,
    #[serde(default)]
    pub long_term_action: String,
    #[serde(default)]
    pub responsible_person: String,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: IssueStatus,
    #[serde(default)]
    pub rca_completed: bool,
    #[serde(default)]
    pub rca_method: String,
    #[serde(default)]
    pub root_cause_final: String,
    #[serde(default)]
    pub effectiveness_check: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Text(String),
    Date(Option<NaiveDate>),
    Flag(bool),
}

impl FieldValue {
    /// Changelog rendering
    fn render(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Date(d) => d.map(format_date).unwrap_or_default(),
            FieldValue::Flag(b) => (if *b { "1" } else { "0" }).to_string(),
        }
    }

    fn bind(self, builder: &mut QueryBuilder<'_, Sqlite>) {
        match self {
            FieldValue::Text(s) => builder.push_bind(s),
            FieldValue::Date(d) => builder.push_bind(d.map(format_date)),
            FieldValue::Flag(b) => builder.push_bind(b),
        };
    }
}

impl IssueDetails {
    pub fn new(date_reported: NaiveDate, issue_category: IssueCategory) -> Self {
        Self {
            date_reported,
            line_name: String::new(),
            component_pn: String::new(),
            ref_id: String::new(),
            issue_category,
            issue_type: String::new(),
            description: String::new(),
            what_issue: String::new(),
            where_occurred: String::new(),
            why_preliminary: String::new(),
            when_happened: String::new(),
            who_detected: String::new(),
            how_detected: String::new(),
            how_much_impact: String::new(),
            short_term_fix: String::new(),
            long_term_action: String::new(),
            responsible_person: String::new(),
            due_date: None,
            status: IssueStatus::Open,
            rca_completed: false,
            rca_method: String::new(),
            root_cause_final: String::new(),
            effectiveness_check: false,
        }
    }

    /// Column name and value of every editable field, in schema order
    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        let text = |s: &String| FieldValue::Text(s.clone());
        vec![
            ("date_reported", FieldValue::Date(Some(self.date_reported))),
            ("line_name", text(&self.line_name)),
            ("component_pn", text(&self.component_pn)),
            ("ref_id", text(&self.ref_id)),
            ("issue_category", FieldValue::Text(self.issue_category.as_str().to_string())),
            ("issue_type", text(&self.issue_type)),
            ("description", text(&self.description)),
            ("what_issue", text(&self.what_issue)),
            ("where_occurred", text(&self.where_occurred)),
            ("why_preliminary", text(&self.why_preliminary)),
            ("when_happened", text(&self.when_happened)),
            ("who_detected", text(&self.who_detected)),
            ("how_detected", text(&self.how_detected)),
            ("how_much_impact", text(&self.how_much_impact)),
            ("short_term_fix", text(&self.short_term_fix)),
            ("long_term_action", text(&self.long_term_action)),
            ("responsible_person", text(&self.responsible_person)),
            ("due_date", FieldValue::Date(self.due_date)),
            ("status", FieldValue::Text(self.status.as_str().to_string())),
            ("rca_completed", FieldValue::Flag(self.rca_completed)),
            ("rca_method", text(&self.rca_method)),
            ("root_cause_final", text(&self.root_cause_final)),
            ("effectiveness_check", FieldValue::Flag(self.effectiveness_check)),
        ]
    }
}

/// Partial update; `None` and blank text keep the stored value
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssuePatch {
    pub date_reported: Option<NaiveDate>,
    pub line_name: Option<String>,
    pub component_pn: Option<String>,
    pub ref_id: Option<String>,
    pub issue_category: Option<IssueCategory>,
    pub issue_type: Option<String>,
    pub description: Option<String>,
    pub what_issue: Option<String>,
    pub where_occurred: Option<String>,
    pub why_preliminary: Option<String>,
    pub when_happened: Option<String>,
    pub who_detected: Option<String>,
    pub how_detected: Option<String>,
    pub how_much_impact: Option<String>,
    pub short_term_fix: Option<String>,
    pub long_term_action: Option<String>,
    pub responsible_person: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub status: Option<IssueStatus>,
    pub rca_completed: Option<bool>,
    pub rca_method: Option<String>,
    pub root_cause_final: Option<String>,
    pub effectiveness_check: Option<bool>,
}

impl IssuePatch {
    pub fn apply(&self, details: &mut IssueDetails) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }
        fn set_text(target: &mut String, value: &Option<String>) {
            if let Some(v) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                *target = v.to_string();
            }
        }

        set(&mut details.date_reported, &self.date_reported);
        set_text(&mut details.line_name, &self.line_name);
        set_text(&mut details.component_pn, &self.component_pn);
        set_text(&mut details.ref_id, &self.ref_id);
        set(&mut details.issue_category, &self.issue_category);
        set_text(&mut details.issue_type, &self.issue_type);
        set_text(&mut details.description, &self.description);
        set_text(&mut details.what_issue, &self.what_issue);
        set_text(&mut details.where_occurred, &self.where_occurred);
        set_text(&mut details.why_preliminary, &self.why_preliminary);
        set_text(&mut details.when_happened, &self.when_happened);
        set_text(&mut details.who_detected, &self.who_detected);
        set_text(&mut details.how_detected, &self.how_detected);
        set_text(&mut details.how_much_impact, &self.how_much_impact);
        set_text(&mut details.short_term_fix, &self.short_term_fix);
        set_text(&mut details.long_term_action, &self.long_term_action);
        set_text(&mut details.responsible_person, &self.responsible_person);
        if self.due_date.is_some() {
            details.due_date = self.due_date;
        }
        set(&mut details.status, &self.status);
        set(&mut details.rca_completed, &self.rca_completed);
        set_text(&mut details.rca_method, &self.rca_method);
        set_text(&mut details.root_cause_final, &self.root_cause_final);
        set(&mut details.effectiveness_check, &self.effectiveness_check);
    }
}

/// Request to raise an issue
#[derive(Debug, Clone, Deserialize)]
pub struct NewIssue {
    #[serde(flatten)]
    pub details: IssueDetails,
    /// Export date range the AOI snapshot covers; an open end is unbounded
    #[serde(default)]
    pub snapshot_from: Option<NaiveDate>,
    #[serde(default)]
    pub snapshot_to: Option<NaiveDate>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl NewIssue {
    pub fn new(details: IssueDetails) -> Self {
        Self {
            details,
            snapshot_from: None,
            snapshot_to: None,
            created_by: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub id: i64,
    #[serde(flatten)]
    pub details: IssueDetails,
    pub aoi: AoiSnapshot,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueChange {
    pub field_name: String,
    pub old_value: String,
    pub new_value: String,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
}

/// Restriction on listed issues; an empty dimension does not restrict
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    /// Inclusive `date_reported` range
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub lines: Vec<String>,
    pub categories: Vec<IssueCategory>,
    pub statuses: Vec<IssueStatus>,
}

/// Raise an issue, snapshotting AOI outcome counts over the requested range
///
/// The creation itself is logged as a `status` change from blank to
/// `Created`.
pub async fn create_issue(db: &SqlitePool, new: &NewIssue) -> Result<Issue> {
    if let (Some(from), Some(to)) = (new.snapshot_from, new.snapshot_to) {
        if from > to {
            return Err(Error::InvalidInput(format!(
                "snapshot range starts ({}) after it ends ({})",
                from, to
            )));
        }
    }
    let snapshot_filter = DefectFilter {
        from: new.snapshot_from,
        to: new.snapshot_to,
        ..Default::default()
    };
    let aoi = AoiSnapshot::from_counts(&outcome_counts(db, &snapshot_filter).await?);

    let now = aoi_common::time::now();
    let fields = new.details.fields();

    let mut tx = db.begin().await?;
    let mut builder = QueryBuilder::<Sqlite>::new("INSERT INTO issues (");
    for (name, _) in &fields {
        builder.push(*name).push(", ");
    }
    builder.push("aoi_real, aoi_false, aoi_fixed, aoi_suspect, created_at, updated_at) VALUES (");
    for (_, value) in fields {
        value.bind(&mut builder);
        builder.push(", ");
    }
    builder
        .push_bind(aoi.real)
        .push(", ")
        .push_bind(aoi.false_calls)
        .push(", ")
        .push_bind(aoi.fixed)
        .push(", ")
        .push_bind(aoi.suspect)
        .push(", ")
        .push_bind(now.to_rfc3339())
        .push(", ")
        .push_bind(now.to_rfc3339())
        .push(")");
    let id = builder.build().execute(&mut *tx).await?.last_insert_rowid();

    let changed_by = new.created_by.as_deref().unwrap_or(DEFAULT_CHANGED_BY);
    log_change(&mut *tx, id, "status", "", "Created", changed_by, &now).await?;
    let issue = fetch_issue(&mut *tx, id).await?;
    tx.commit().await?;

    info!(issue_id = id, category = %issue.details.issue_category, "Issue created");
    Ok(issue)
}

/// Apply a patch; each changed field gets one changelog row
///
/// A patch that changes nothing writes nothing and leaves `updated_at`
/// alone.
pub async fn update_issue(
    db: &SqlitePool,
    id: i64,
    patch: &IssuePatch,
    changed_by: &str,
) -> Result<Issue> {
    let mut tx = db.begin().await?;
    let current = fetch_issue(&mut *tx, id).await?;

    let mut details = current.details.clone();
    patch.apply(&mut details);
    let changes: Vec<(&'static str, FieldValue, FieldValue)> = current
        .details
        .fields()
        .into_iter()
        .zip(details.fields())
        .filter(|((_, old), (_, new))| old != new)
        .map(|((name, old), (_, new))| (name, old, new))
        .collect();

    if changes.is_empty() {
        tx.rollback().await?;
        return Ok(current);
    }

    let now = aoi_common::time::now();
    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE issues SET ");
    for (name, _, new) in &changes {
        builder.push(*name).push(" = ");
        new.clone().bind(&mut builder);
        builder.push(", ");
    }
    builder
        .push("updated_at = ")
        .push_bind(now.to_rfc3339())
        .push(" WHERE id = ")
        .push_bind(id);
    builder.build().execute(&mut *tx).await?;

    for (name, old, new) in &changes {
        log_change(&mut *tx, id, name, &old.render(), &new.render(), changed_by, &now).await?;
    }

    let updated = fetch_issue(&mut *tx, id).await?;
    tx.commit().await?;

    info!(issue_id = id, changes = changes.len(), changed_by, "Issue updated");
    Ok(updated)
}

pub async fn get_issue(db: &SqlitePool, id: i64) -> Result<Issue> {
    fetch_issue(db, id).await
}

/// Issues matching `filter`, newest report first
pub async fn list_issues(db: &SqlitePool, filter: &IssueFilter) -> Result<Vec<Issue>> {
    let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM issues WHERE 1=1");
    if let Some(from) = filter.from {
        builder.push(" AND date_reported >= ").push_bind(format_date(from));
    }
    if let Some(to) = filter.to {
        builder.push(" AND date_reported <= ").push_bind(format_date(to));
    }
    push_in(&mut builder, "line_name", &filter.lines);
    let categories: Vec<String> = filter.categories.iter().map(|c| c.as_str().to_string()).collect();
    push_in(&mut builder, "issue_category", &categories);
    let statuses: Vec<String> = filter.statuses.iter().map(|s| s.as_str().to_string()).collect();
    push_in(&mut builder, "status", &statuses);
    builder.push(" ORDER BY date_reported DESC, id DESC");

    builder
        .build()
        .fetch_all(db)
        .await?
        .iter()
        .map(issue_from_row)
        .collect()
}

/// Change history of one issue, newest first
pub async fn issue_changelog(db: &SqlitePool, id: i64) -> Result<Vec<IssueChange>> {
    fetch_issue(db, id).await?;

    let rows = sqlx::query(
        r#"
        SELECT field_name, old_value, new_value, changed_by, changed_at
        FROM issue_changelog WHERE issue_id = ? ORDER BY id DESC
        "#,
    )
    .bind(id)
    .fetch_all(db)
    .await?;

    rows.iter()
        .map(|row| -> Result<IssueChange> {
            Ok(IssueChange {
                field_name: row.try_get("field_name")?,
                old_value: row.try_get("old_value")?,
                new_value: row.try_get("new_value")?,
                changed_by: row.try_get("changed_by")?,
                changed_at: parse_utc(id, "changed_at", &row.try_get::<String, _>("changed_at")?)?,
            })
        })
        .collect()
}

async fn fetch_issue<'e, E>(executor: E, id: i64) -> Result<Issue>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT * FROM issues WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or(Error::UnknownIssue(id))?;
    issue_from_row(&row)
}

async fn log_change<'e, E>(
    executor: E,
    issue_id: i64,
    field_name: &str,
    old_value: &str,
    new_value: &str,
    changed_by: &str,
    changed_at: &DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO issue_changelog (
            issue_id, field_name, old_value, new_value, changed_by, changed_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(issue_id)
    .bind(field_name)
    .bind(old_value)
    .bind(new_value)
    .bind(changed_by)
    .bind(changed_at.to_rfc3339())
    .execute(executor)
    .await?;
    Ok(())
}

fn issue_from_row(row: &SqliteRow) -> Result<Issue> {
    let id: i64 = row.try_get("id")?;
    let corrupt = |column: &str, value: &str| {
        Error::Corrupt(format!("issue {}: bad {} '{}'", id, column, value))
    };
    let text = |column: &str| -> Result<String> { Ok(row.try_get::<String, _>(column)?) };
    let date = |column: &str, value: &str| {
        NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| corrupt(column, value))
    };

    let date_reported = date("date_reported", &text("date_reported")?)?;
    let due_date = match row.try_get::<Option<String>, _>("due_date")? {
        Some(value) if !value.is_empty() => Some(date("due_date", &value)?),
        _ => None,
    };
    let category = text("issue_category")?;
    let issue_category: IssueCategory = category
        .parse()
        .map_err(|_| corrupt("issue_category", &category))?;
    let status = text("status")?;
    let status: IssueStatus = status.parse().map_err(|_| corrupt("status", &status))?;

    Ok(Issue {
        id,
        details: IssueDetails {
            date_reported,
            line_name: text("line_name")?,
            component_pn: text("component_pn")?,
            ref_id: text("ref_id")?,
            issue_category,
            issue_type: text("issue_type")?,
            description: text("description")?,
            what_issue: text("what_issue")?,
            where_occurred: text("where_occurred")?,
            why_preliminary: text("why_preliminary")?,
            when_happened: text("when_happened")?,
            who_detected: text("who_detected")?,
            how_detected: text("how_detected")?,
            how_much_impact: text("how_much_impact")?,
            short_term_fix: text("short_term_fix")?,
            long_term_action: text("long_term_action")?,
            responsible_person: text("responsible_person")?,
            due_date,
            status,
            rca_completed: row.try_get("rca_completed")?,
            rca_method: text("rca_method")?,
            root_cause_final: text("root_cause_final")?,
            effectiveness_check: row.try_get("effectiveness_check")?,
        },
        aoi: AoiSnapshot {
            real: row.try_get("aoi_real")?,
            false_calls: row.try_get("aoi_false")?,
            fixed: row.try_get("aoi_fixed")?,
            suspect: row.try_get("aoi_suspect")?,
        },
        created_at: parse_utc(id, "created_at", &text("created_at")?)?,
        updated_at: parse_utc(id, "updated_at", &text("updated_at")?)?,
    })
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_utc(id: i64, column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Corrupt(format!("issue {}: bad {}: {}", id, column, e)))
}
