//! Aggregations over filtered defect records
//!
//! Top-N rollups order by count descending, then label ascending.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use aoi_common::{Error, Outcome, Result};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::query::DefectFilter;

/// Base reference designator: text before the first `.` (`R205.1` → `R205`)
const REF_BASE_SQL: &str = "substr(ref_id, 1, instr(ref_id || '.', '.') - 1)";

/// Default number of component PNs a pivot is restricted to
pub const DEFAULT_PIVOT_TOP_COMPONENTS: usize = 5;

/// Longest accepted row-dimension list for a pivot
pub const MAX_PIVOT_ROW_DIMENSIONS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCount {
    pub outcome: Outcome,
    pub count: i64,
}

/// A label with its count in a top-N rollup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedCount {
    pub label: String,
    pub count: i64,
}

/// `LIMIT` operand; limits beyond `i64::MAX` mean "no limit"
fn sql_limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Records per outcome; all four outcomes are always present
pub async fn outcome_counts(db: &SqlitePool, filter: &DefectFilter) -> Result<Vec<OutcomeCount>> {
    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT outcome, COUNT(*) AS n FROM defect_records WHERE 1=1",
    );
    filter.push_conditions(&mut builder);
    builder.push(" GROUP BY outcome");

    let rows = builder.build().fetch_all(db).await?;
    let mut counts: BTreeMap<Outcome, i64> = Outcome::ALL.into_iter().map(|o| (o, 0)).collect();
    for row in rows {
        let outcome: String = row.try_get("outcome")?;
        let outcome: Outcome = outcome
            .parse()
            .map_err(|_| Error::Corrupt(format!("unknown outcome '{}'", outcome)))?;
        counts.insert(outcome, row.try_get("n")?);
    }

    Ok(Outcome::ALL
        .into_iter()
        .map(|outcome| OutcomeCount {
            outcome,
            count: counts.get(&outcome).copied().unwrap_or(0),
        })
        .collect())
}

/// Most frequent reference designators
///
/// With `dedup_pins`, pin-level refs collapse to their base and each
/// (serial number, base ref, defect code) counts once.
pub async fn top_ref_ids(
    db: &SqlitePool,
    filter: &DefectFilter,
    n: usize,
    dedup_pins: bool,
) -> Result<Vec<RankedCount>> {
    let mut builder = if dedup_pins {
        QueryBuilder::<Sqlite>::new(format!(
            "SELECT base AS label, COUNT(*) AS n FROM (\
             SELECT DISTINCT serial_number, {} AS base, defect_code \
             FROM defect_records WHERE 1=1",
            REF_BASE_SQL
        ))
    } else {
        QueryBuilder::<Sqlite>::new(
            "SELECT ref_id AS label, COUNT(*) AS n FROM defect_records WHERE 1=1",
        )
    };
    filter.push_conditions(&mut builder);
    if dedup_pins {
        builder.push(") GROUP BY base");
    } else {
        builder.push(" GROUP BY ref_id");
    }

    ranked(db, builder, n).await
}

/// Most frequent component part numbers (records without one are skipped)
pub async fn top_component_pns(
    db: &SqlitePool,
    filter: &DefectFilter,
    n: usize,
) -> Result<Vec<RankedCount>> {
    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT component_pn AS label, COUNT(*) AS n FROM defect_records WHERE 1=1",
    );
    filter.push_conditions(&mut builder);
    builder.push(" AND component_pn IS NOT NULL GROUP BY component_pn");

    ranked(db, builder, n).await
}

async fn ranked(
    db: &SqlitePool,
    mut builder: QueryBuilder<'_, Sqlite>,
    n: usize,
) -> Result<Vec<RankedCount>> {
    builder
        .push(" ORDER BY n DESC, label ASC LIMIT ")
        .push_bind(sql_limit(n));

    let rows = builder.build().fetch_all(db).await?;
    rows.iter()
        .map(|row| {
            Ok(RankedCount {
                label: row.try_get("label")?,
                count: row.try_get("n")?,
            })
        })
        .collect()
}

/// A column a pivot can group by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    SerialNumber,
    PartNumber,
    ComponentPn,
    RefId,
    RefBase,
    DefectCode,
    Outcome,
    Machine,
    Operation,
    Line,
}

impl Dimension {
    pub const ALL: [Dimension; 10] = [
        Dimension::SerialNumber,
        Dimension::PartNumber,
        Dimension::ComponentPn,
        Dimension::RefId,
        Dimension::RefBase,
        Dimension::DefectCode,
        Dimension::Outcome,
        Dimension::Machine,
        Dimension::Operation,
        Dimension::Line,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::SerialNumber => "serial_number",
            Dimension::PartNumber => "part_number",
            Dimension::ComponentPn => "component_pn",
            Dimension::RefId => "ref_id",
            Dimension::RefBase => "ref_base",
            Dimension::DefectCode => "defect_code",
            Dimension::Outcome => "outcome",
            Dimension::Machine => "machine",
            Dimension::Operation => "operation",
            Dimension::Line => "line",
        }
    }

    /// SQL expression producing the dimension's text value
    fn sql(&self) -> &'static str {
        match self {
            Dimension::SerialNumber => "serial_number",
            Dimension::PartNumber => "COALESCE(part_number, '')",
            Dimension::ComponentPn => "COALESCE(component_pn, '')",
            Dimension::RefId => "ref_id",
            Dimension::RefBase => REF_BASE_SQL,
            Dimension::DefectCode => "defect_code",
            Dimension::Outcome => "outcome",
            Dimension::Machine => "COALESCE(machine_name, '')",
            Dimension::Operation => "COALESCE(operation_name, '')",
            Dimension::Line => "COALESCE(line_name, '')",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Dimension::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidInput(format!("unknown pivot dimension '{}'", s)))
    }
}

/// Shape of a pivot: row dimensions × one column dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PivotSpec {
    pub rows: Vec<Dimension>,
    pub column: Dimension,
    /// Restrict to the K most frequent component PNs within the filter
    pub top_components: Option<usize>,
}

impl Default for PivotSpec {
    fn default() -> Self {
        Self {
            rows: vec![Dimension::PartNumber, Dimension::ComponentPn, Dimension::RefBase],
            column: Dimension::DefectCode,
            top_components: Some(DEFAULT_PIVOT_TOP_COMPONENTS),
        }
    }
}

impl PivotSpec {
    pub fn validate(&self) -> Result<()> {
        if self.rows.is_empty() {
            return Err(Error::InvalidInput("pivot needs at least one row dimension".to_string()));
        }
        if self.rows.len() > MAX_PIVOT_ROW_DIMENSIONS {
            return Err(Error::InvalidInput(format!(
                "pivot supports at most {} row dimensions",
                MAX_PIVOT_ROW_DIMENSIONS
            )));
        }
        let distinct: BTreeSet<&str> = self.rows.iter().map(|d| d.as_str()).collect();
        if distinct.len() != self.rows.len() {
            return Err(Error::InvalidInput("pivot row dimensions repeat".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotRow {
    /// One value per row dimension
    pub keys: Vec<String>,
    /// Distinct serial numbers, aligned with [`PivotTable::columns`]
    pub counts: Vec<i64>,
}

/// Cross tabulation of distinct serial numbers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotTable {
    pub row_dimensions: Vec<Dimension>,
    pub column_dimension: Dimension,
    pub columns: Vec<String>,
    pub rows: Vec<PivotRow>,
}

/// Count distinct serial numbers per (row dimensions, column dimension)
pub async fn pivot(db: &SqlitePool, filter: &DefectFilter, spec: &PivotSpec) -> Result<PivotTable> {
    spec.validate()?;

    let mut select = String::from("SELECT ");
    for (idx, dim) in spec.rows.iter().enumerate() {
        select.push_str(&format!("{} AS d{}, ", dim.sql(), idx));
    }
    select.push_str(&format!(
        "{} AS pivot_column, COUNT(DISTINCT serial_number) AS n FROM defect_records WHERE 1=1",
        spec.column.sql()
    ));

    let mut builder = QueryBuilder::<Sqlite>::new(select);
    filter.push_conditions(&mut builder);

    if let Some(k) = spec.top_components {
        builder.push(
            " AND component_pn IN (SELECT component_pn FROM defect_records WHERE 1=1",
        );
        filter.push_conditions(&mut builder);
        builder
            .push(
                " AND component_pn IS NOT NULL GROUP BY component_pn \
                 ORDER BY COUNT(*) DESC, component_pn ASC LIMIT ",
            )
            .push_bind(sql_limit(k))
            .push(")");
    }

    let group: Vec<String> = (0..spec.rows.len())
        .map(|idx| format!("d{}", idx))
        .chain(std::iter::once("pivot_column".to_string()))
        .collect();
    let group = group.join(", ");
    builder.push(format!(" GROUP BY {} ORDER BY {}", group, group));

    let rows = builder.build().fetch_all(db).await?;

    let mut columns = BTreeSet::new();
    let mut cells: BTreeMap<Vec<String>, BTreeMap<String, i64>> = BTreeMap::new();
    for row in rows {
        let keys = (0..spec.rows.len())
            .map(|idx| row.try_get::<String, _>(format!("d{}", idx).as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let column: String = row.try_get("pivot_column")?;
        let count: i64 = row.try_get("n")?;
        columns.insert(column.clone());
        cells.entry(keys).or_default().insert(column, count);
    }

    let columns: Vec<String> = columns.into_iter().collect();
    let rows = cells
        .into_iter()
        .map(|(keys, counts)| PivotRow {
            counts: columns
                .iter()
                .map(|c| counts.get(c).copied().unwrap_or(0))
                .collect(),
            keys,
        })
        .collect();

    Ok(PivotTable {
        row_dimensions: spec.rows.clone(),
        column_dimension: spec.column,
        columns,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_limit_saturates() {
        assert_eq!(sql_limit(20), 20);
        assert_eq!(sql_limit(usize::MAX), i64::MAX);
    }

    #[test]
    fn test_dimension_parse() {
        assert_eq!("ref_base".parse::<Dimension>().unwrap(), Dimension::RefBase);
        assert_eq!(" Component_PN ".parse::<Dimension>().unwrap(), Dimension::ComponentPn);
        assert!(matches!(
            "serial; DROP TABLE".parse::<Dimension>(),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_default_pivot_spec() {
        let spec = PivotSpec::default();
        assert_eq!(spec.column, Dimension::DefectCode);
        assert_eq!(spec.top_components, Some(5));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_pivot_spec_rejects_bad_rows() {
        let mut spec = PivotSpec {
            rows: Vec::new(),
            ..Default::default()
        };
        assert!(spec.validate().is_err());

        spec.rows = vec![Dimension::RefId, Dimension::RefId];
        assert!(spec.validate().is_err());

        spec.rows = Dimension::ALL[..5].to_vec();
        assert!(spec.validate().is_err());
    }
}
