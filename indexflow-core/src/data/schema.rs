//! Column layout shared by staged artifacts and the warehouse table.

use polars::prelude::*;

/// Warehouse column names in storage order.
pub const COLUMNS: [&str; 12] = [
    "DATE",
    "SYMBOL",
    "OPEN",
    "HIGH",
    "LOW",
    "CLOSE",
    "ADJ_CLOSE",
    "VOLUME",
    "CLOSE_CHANGE",
    "CLOSE_PCT_CHANGE",
    "DAILY_RANGE",
    "DAILY_RANGE_PCT",
];

/// Expected schema for a staged batch.
pub struct WarehouseSchema;

impl WarehouseSchema {
    pub fn schema() -> Schema {
        Schema::from_iter(
            COLUMNS
                .iter()
                .map(|name| Field::new((*name).into(), Self::dtype(name))),
        )
    }

    fn dtype(column: &str) -> DataType {
        match column {
            "DATE" => DataType::Date,
            "SYMBOL" => DataType::String,
            "VOLUME" => DataType::UInt64,
            _ => DataType::Float64,
        }
    }

    /// Validate names, order and types of a DataFrame.
    pub fn validate(df: &DataFrame) -> Result<(), SchemaError> {
        let expected = Self::schema();
        let actual = df.schema();

        for field in expected.iter_fields() {
            if !actual.contains(field.name()) {
                return Err(SchemaError::MissingColumn(field.name().to_string()));
            }
        }

        let found: Vec<String> = df.get_column_names().iter().map(|n| n.to_string()).collect();
        if found.len() != COLUMNS.len() || found.iter().zip(COLUMNS).any(|(f, e)| f != e) {
            return Err(SchemaError::ColumnOrder {
                expected: COLUMNS.iter().map(|c| c.to_string()).collect(),
                found,
            });
        }

        for field in expected.iter_fields() {
            let actual_dtype = actual
                .get(field.name())
                .ok_or_else(|| SchemaError::MissingColumn(field.name().to_string()))?;
            if actual_dtype != field.dtype() {
                return Err(SchemaError::TypeMismatch {
                    column: field.name().to_string(),
                    expected: field.dtype().clone(),
                    actual: actual_dtype.clone(),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("missing required column: {0}")]
    MissingColumn(String),

    #[error("column order mismatch: expected {expected:?}, found {found:?}")]
    ColumnOrder { expected: Vec<String>, found: Vec<String> },

    #[error("type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },
}
