//! Bounded look-ahead schema inference.

use crate::error::Result;
use crate::ingest::reader::Record;
use crate::types::{FieldInfo, FieldType, PropertyValue};
use serde::Serialize;
use std::collections::HashMap;

/// Default number of records the scan pass inspects.
pub const DEFAULT_SCAN_LIMIT: usize = 1000;

/// Fields seen in the first records of a source.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Schema {
    /// In first-seen order.
    pub fields: Vec<FieldInfo>,
    pub records: u64,
    pub malformed: u64,
}

impl Schema {
    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.field_type)
    }

    /// Typed value for a field. Values that no longer fit the inferred type
    /// (past the scan window) fall back to text; unknown fields are text.
    pub fn convert(&self, name: &str, values: &[String]) -> PropertyValue {
        let ty = self.field_type(name).unwrap_or(FieldType::Text);
        let mut converted: Vec<PropertyValue> = values.iter().map(|v| typed(v, ty)).collect();
        if converted.len() == 1 {
            converted.remove(0)
        } else {
            PropertyValue::List(converted)
        }
    }
}

fn infer(value: &str) -> FieldType {
    if value.parse::<i64>().is_ok() {
        FieldType::Integer
    } else if value.parse::<f64>().is_ok() {
        FieldType::Float
    } else {
        FieldType::Text
    }
}

fn typed(value: &str, ty: FieldType) -> PropertyValue {
    match ty {
        FieldType::Integer => value
            .parse::<i64>()
            .map(PropertyValue::Integer)
            .unwrap_or_else(|_| PropertyValue::Text(value.to_string())),
        FieldType::Float => value
            .parse::<f64>()
            .map(PropertyValue::Float)
            .unwrap_or_else(|_| PropertyValue::Text(value.to_string())),
        FieldType::Text => PropertyValue::Text(value.to_string()),
    }
}

/// Inspect at most `limit` records and infer the field set.
pub fn scan<I>(records: I, limit: usize) -> Result<Schema>
where
    I: IntoIterator<Item = Result<Record>>,
{
    let mut schema = Schema::default();
    let mut slots: HashMap<String, usize> = HashMap::new();

    for record in records.into_iter().take(limit) {
        let record = record?;
        schema.records += 1;
        if record.is_malformed() {
            schema.malformed += 1;
            continue;
        }

        for (name, values) in &record.fields {
            let seen = values.iter().map(|v| infer(v)).fold(FieldType::Integer, FieldType::widen);
            let slot = *slots.entry(name.clone()).or_insert_with(|| {
                schema.fields.push(FieldInfo {
                    name: name.clone(),
                    field_type: seen,
                    count: 0,
                });
                schema.fields.len() - 1
            });
            let field = &mut schema.fields[slot];
            field.field_type = field.field_type.widen(seen);
            field.count += 1;
        }
    }

    log::debug!(
        "scanned {} records, {} fields, {} malformed",
        schema.records,
        schema.fields.len(),
        schema.malformed
    );
    Ok(schema)
}
