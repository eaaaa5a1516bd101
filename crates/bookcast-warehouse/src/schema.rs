//! Dataset, table, and column descriptions shared by every backend.

use std::fmt;

use serde::Serialize;

use crate::WarehouseError;

/// SQL flavor spoken by a warehouse backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlDialect {
    BigQuery,
    DuckDb,
}

impl SqlDialect {
    /// Quote a single identifier for this dialect.
    #[must_use]
    pub fn quote_ident(self, name: &str) -> String {
        match self {
            Self::BigQuery => format!("`{}`", name.replace('`', "")),
            Self::DuckDb => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    /// Fully qualified, quoted reference to a table or model.
    ///
    /// `DuckDB` has no project level, so the dataset maps onto a schema.
    #[must_use]
    pub fn qualified(self, table: &TableRef) -> String {
        match self {
            Self::BigQuery => format!(
                "`{}.{}.{}`",
                table.project(),
                table.dataset_name(),
                table.name()
            ),
            Self::DuckDb => format!(
                "{}.{}",
                self.quote_ident(table.dataset_name()),
                self.quote_ident(table.name())
            ),
        }
    }

    #[must_use]
    pub fn type_name(self, field_type: FieldType) -> &'static str {
        match (self, field_type) {
            (Self::BigQuery, FieldType::Int64) => "INT64",
            (Self::BigQuery, FieldType::Float64) => "FLOAT64",
            (Self::BigQuery, FieldType::String) => "STRING",
            (Self::BigQuery, FieldType::Bool) => "BOOL",
            (Self::DuckDb, FieldType::Int64) => "BIGINT",
            (Self::DuckDb, FieldType::Float64) => "DOUBLE",
            (Self::DuckDb, FieldType::String) => "VARCHAR",
            (Self::DuckDb, FieldType::Bool) => "BOOLEAN",
            (_, FieldType::Date) => "DATE",
            (_, FieldType::Time) => "TIME",
            (_, FieldType::Timestamp) => "TIMESTAMP",
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BigQuery => "bigquery",
            Self::DuckDb => "duckdb",
        })
    }
}

/// Column type understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldType {
    Int64,
    Float64,
    String,
    Bool,
    Date,
    Time,
    Timestamp,
}

impl FieldType {
    /// Parse a type name as reported by a warehouse schema.
    ///
    /// Accepts both legacy (`INTEGER`, `FLOAT`) and standard (`INT64`, `FLOAT64`) spellings.
    #[must_use]
    pub fn from_warehouse_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "INT64" | "INTEGER" | "BIGINT" => Some(Self::Int64),
            "FLOAT64" | "FLOAT" | "DOUBLE" | "NUMERIC" | "BIGNUMERIC" => Some(Self::Float64),
            "STRING" | "VARCHAR" => Some(Self::String),
            "BOOL" | "BOOLEAN" => Some(Self::Bool),
            "DATE" => Some(Self::Date),
            "TIME" => Some(Self::Time),
            "TIMESTAMP" | "DATETIME" => Some(Self::Timestamp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
}

/// Ordered column list of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    fields: Vec<FieldSpec>,
}

impl TableSchema {
    #[must_use]
    pub fn new(fields: &[(&str, FieldType)]) -> Self {
        Self {
            fields: fields
                .iter()
                .map(|(name, field_type)| FieldSpec {
                    name: (*name).to_string(),
                    field_type: *field_type,
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Column definitions for a `CREATE TABLE` body.
    #[must_use]
    pub fn to_column_ddl(&self, dialect: SqlDialect) -> String {
        self.fields
            .iter()
            .map(|field| {
                format!(
                    "{} {}",
                    dialect.quote_ident(&field.name),
                    dialect.type_name(field.field_type)
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A dataset inside a warehouse project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DatasetRef {
    project: String,
    dataset: String,
}

impl DatasetRef {
    /// Validate and build a dataset reference.
    ///
    /// # Errors
    /// Returns [`WarehouseError::InvalidIdentifier`] for names that could escape quoting.
    pub fn new(project: impl Into<String>, dataset: impl Into<String>) -> Result<Self, WarehouseError> {
        let project = project.into();
        let dataset = dataset.into();
        validate_project(&project)?;
        validate_name(&dataset)?;
        Ok(Self { project, dataset })
    }

    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    #[must_use]
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Reference a table (or model) inside this dataset.
    ///
    /// # Errors
    /// Returns [`WarehouseError::InvalidIdentifier`] for an invalid table name.
    pub fn table(&self, name: impl Into<String>) -> Result<TableRef, WarehouseError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(TableRef {
            dataset: self.clone(),
            name,
        })
    }
}

/// A table or model, addressed as `project.dataset.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TableRef {
    dataset: DatasetRef,
    name: String,
}

/// Models live in the same namespace as tables.
pub type ModelRef = TableRef;

impl TableRef {
    #[must_use]
    pub fn dataset(&self) -> &DatasetRef {
        &self.dataset
    }

    #[must_use]
    pub fn project(&self) -> &str {
        self.dataset.project()
    }

    #[must_use]
    pub fn dataset_name(&self) -> &str {
        self.dataset.dataset()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project(), self.dataset_name(), self.name)
    }
}

fn validate_project(project: &str) -> Result<(), WarehouseError> {
    let valid = !project.is_empty()
        && project
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
    if valid {
        Ok(())
    } else {
        Err(WarehouseError::InvalidIdentifier(project.to_string()))
    }
}

fn validate_name(name: &str) -> Result<(), WarehouseError> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(WarehouseError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_names_follow_dialect() {
        let table = DatasetRef::new("acme-prod", "booking_analytics")
            .and_then(|dataset| dataset.table("daily_bookings"))
            .expect("valid names");

        assert_eq!(
            SqlDialect::BigQuery.qualified(&table),
            "`acme-prod.booking_analytics.daily_bookings`"
        );
        assert_eq!(
            SqlDialect::DuckDb.qualified(&table),
            "\"booking_analytics\".\"daily_bookings\""
        );
    }

    #[test]
    fn identifiers_that_could_break_quoting_are_rejected() {
        assert!(DatasetRef::new("acme", "analytics`; DROP").is_err());
        assert!(DatasetRef::new("acme prod", "analytics").is_err());
        let dataset = DatasetRef::new("acme", "analytics").expect("dataset");
        assert!(dataset.table("1st_table").is_err());
        assert!(dataset.table("").is_err());
    }

    #[test]
    fn column_ddl_uses_dialect_type_names() {
        let schema = TableSchema::new(&[
            ("date", FieldType::Date),
            ("total_bookings", FieldType::Int64),
            ("total_revenue", FieldType::Float64),
        ]);

        assert_eq!(
            schema.to_column_ddl(SqlDialect::BigQuery),
            "`date` DATE, `total_bookings` INT64, `total_revenue` FLOAT64"
        );
        assert_eq!(
            schema.to_column_ddl(SqlDialect::DuckDb),
            "\"date\" DATE, \"total_bookings\" BIGINT, \"total_revenue\" DOUBLE"
        );
    }

    #[test]
    fn warehouse_type_names_accept_legacy_spellings() {
        assert_eq!(FieldType::from_warehouse_name("INTEGER"), Some(FieldType::Int64));
        assert_eq!(FieldType::from_warehouse_name("float"), Some(FieldType::Float64));
        assert_eq!(FieldType::from_warehouse_name("GEOGRAPHY"), None);
    }
}
