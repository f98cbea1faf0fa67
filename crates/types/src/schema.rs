//! Table schema model: typed columns with nullability and a key prefix.
//!
//! A schema is an ordered list of columns; the first `num_key_columns`
//! columns form the primary key. Key columns must not be nullable, and
//! column names must be unique. Validation happens once at the
//! create-table boundary; the catalog only ever stores validated schemas.

use serde::{Deserialize, Serialize};

use crate::error::{InvalidSchemaSnafu, MasterError};

/// Physical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Signed 8-bit integer.
    Int8,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 32-bit integer.
    Uint32,
    /// 32-bit IEEE float.
    Float,
    /// 64-bit IEEE float.
    Double,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    String,
    /// Arbitrary bytes.
    Binary,
}

/// One column of a table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name, unique within the table.
    pub name: String,
    /// Physical type.
    pub data_type: DataType,
    /// Whether the column accepts null values. Key columns never do.
    pub nullable: bool,
}

impl ColumnSchema {
    /// Creates a non-nullable column.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self { name: name.into(), data_type, nullable: false }
    }

    /// Creates a nullable column.
    #[must_use]
    pub fn nullable(name: impl Into<String>, data_type: DataType) -> Self {
        Self { name: name.into(), data_type, nullable: true }
    }
}

/// An ordered, validated table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<ColumnSchema>,
    num_key_columns: usize,
}

impl Schema {
    /// Builds a schema from ordered columns and a key-column prefix length.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::InvalidSchema`] if the column list is empty,
    /// `num_key_columns` is zero or exceeds the column count, a key column
    /// is nullable, or two columns share a name.
    pub fn new(
        columns: Vec<ColumnSchema>,
        num_key_columns: usize,
    ) -> Result<Self, MasterError> {
        snafu::ensure!(
            !columns.is_empty(),
            InvalidSchemaSnafu { reason: "schema must have at least one column".to_string() }
        );
        snafu::ensure!(
            num_key_columns >= 1,
            InvalidSchemaSnafu { reason: "schema must have at least one key column".to_string() }
        );
        snafu::ensure!(
            num_key_columns <= columns.len(),
            InvalidSchemaSnafu {
                reason: format!(
                    "{} key columns requested but schema has only {} columns",
                    num_key_columns,
                    columns.len()
                ),
            }
        );
        for key_col in &columns[..num_key_columns] {
            snafu::ensure!(
                !key_col.nullable,
                InvalidSchemaSnafu {
                    reason: format!("key column {:?} must not be nullable", key_col.name),
                }
            );
        }
        let mut seen = std::collections::HashSet::with_capacity(columns.len());
        for col in &columns {
            snafu::ensure!(
                seen.insert(col.name.as_str()),
                InvalidSchemaSnafu { reason: format!("duplicate column name {:?}", col.name) }
            );
        }
        Ok(Self { columns, num_key_columns })
    }

    /// All columns in declaration order.
    #[must_use]
    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    /// The key-column prefix.
    #[must_use]
    pub fn key_columns(&self) -> &[ColumnSchema] {
        &self.columns[..self.num_key_columns]
    }

    /// Number of key columns.
    #[must_use]
    pub fn num_key_columns(&self) -> usize {
        self.num_key_columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uint32_col(name: &str) -> ColumnSchema {
        ColumnSchema::new(name, DataType::Uint32)
    }

    #[test]
    fn test_single_column_key_schema() {
        let schema = Schema::new(vec![uint32_col("c1")], 1).expect("valid schema");
        assert_eq!(schema.columns().len(), 1);
        assert_eq!(schema.key_columns().len(), 1);
    }

    #[test]
    fn test_rejects_empty_schema() {
        let err = Schema::new(vec![], 1).expect_err("empty schema");
        assert!(matches!(err, MasterError::InvalidSchema { .. }));
    }

    #[test]
    fn test_rejects_zero_key_columns() {
        let err = Schema::new(vec![uint32_col("c1")], 0).expect_err("no key");
        assert!(matches!(err, MasterError::InvalidSchema { .. }));
    }

    #[test]
    fn test_rejects_nullable_key_column() {
        let cols = vec![ColumnSchema::nullable("k", DataType::Int64)];
        let err = Schema::new(cols, 1).expect_err("nullable key");
        assert!(err.to_string().contains("must not be nullable"));
    }

    #[test]
    fn test_rejects_duplicate_column_names() {
        let cols = vec![uint32_col("c1"), uint32_col("c1")];
        let err = Schema::new(cols, 1).expect_err("duplicate name");
        assert!(err.to_string().contains("duplicate column name"));
    }

    #[test]
    fn test_key_prefix_longer_than_columns() {
        let err = Schema::new(vec![uint32_col("c1")], 2).expect_err("too many key columns");
        assert!(matches!(err, MasterError::InvalidSchema { .. }));
    }

    #[test]
    fn test_non_key_columns_may_be_nullable() {
        let cols = vec![uint32_col("k"), ColumnSchema::nullable("v", DataType::String)];
        let schema = Schema::new(cols, 1).expect("valid schema");
        assert!(schema.columns()[1].nullable);
    }
}
