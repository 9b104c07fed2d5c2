//! Per-source rules deciding which fields feed which stitch keys.

use crate::error::{Result, StitchError};
use crate::ingest::reader::{Record, SourceFormat};
use crate::keys::{StitchKey, ValueKind};
use crate::types::{EntityKind, KeyValues};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Turns one raw field value into zero or more raw key values.
pub trait StitchKeyMapper: Send + Sync {
    fn map(&self, value: &str) -> Vec<(StitchKey, String)>;
}

/// How a single field contributes to one or more keys.
#[derive(Clone)]
pub enum FieldMapper {
    /// The whole value feeds one key.
    Static(StitchKey),
    /// The value is split on a separator; every piece feeds the key.
    Delimited { key: StitchKey, separator: String },
    Custom(Arc<dyn StitchKeyMapper>),
}

impl fmt::Debug for FieldMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldMapper::Static(key) => write!(f, "Static({})", key),
            FieldMapper::Delimited { key, separator } => {
                write!(f, "Delimited({}, {:?})", key, separator)
            }
            FieldMapper::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl FieldMapper {
    fn apply(&self, value: &str, out: &mut Vec<(StitchKey, String)>) {
        match self {
            FieldMapper::Static(key) => out.push((*key, value.to_string())),
            FieldMapper::Delimited { key, separator } => out.extend(
                value
                    .split(separator.as_str())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|v| (*key, v.to_string())),
            ),
            FieldMapper::Custom(mapper) => out.extend(mapper.map(value)),
        }
    }

    /// Keys this mapper can emit, where known up front.
    fn keys(&self) -> Vec<StitchKey> {
        match self {
            FieldMapper::Static(key) | FieldMapper::Delimited { key, .. } => vec![*key],
            FieldMapper::Custom(_) => Vec::new(),
        }
    }
}

/// Field name to mappers.
#[derive(Debug, Clone, Default)]
pub struct KeyMapping {
    fields: BTreeMap<String, Vec<FieldMapper>>,
}

impl KeyMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_static(self, field: impl Into<String>, key: StitchKey) -> Self {
        self.with_mapper(field, FieldMapper::Static(key))
    }

    pub fn with_delimited(self, field: impl Into<String>, key: StitchKey, separator: impl Into<String>) -> Self {
        self.with_mapper(
            field,
            FieldMapper::Delimited {
                key,
                separator: separator.into(),
            },
        )
    }

    pub fn with_custom(self, field: impl Into<String>, mapper: Arc<dyn StitchKeyMapper>) -> Self {
        self.with_mapper(field, FieldMapper::Custom(mapper))
    }

    pub fn with_mapper(mut self, field: impl Into<String>, mapper: FieldMapper) -> Self {
        self.fields.entry(field.into()).or_default().push(mapper);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Declared field -> key list, as persisted on the data source.
    pub fn declared(&self) -> BTreeMap<String, Vec<StitchKey>> {
        self.fields
            .iter()
            .map(|(field, mappers)| {
                let keys: BTreeSet<StitchKey> = mappers.iter().flat_map(|m| m.keys()).collect();
                (field.clone(), keys.into_iter().collect())
            })
            .collect()
    }

    /// Normalized key values extracted from a record.
    pub fn apply(&self, record: &Record) -> KeyValues {
        let mut raw = Vec::new();
        for (field, mappers) in &self.fields {
            let Some(values) = record.fields.get(field) else {
                continue;
            };
            for value in values {
                for mapper in mappers {
                    mapper.apply(value, &mut raw);
                }
            }
        }

        let mut out = KeyValues::new();
        for (key, value) in raw {
            if let Some(normalized) = key.normalize(&value) {
                out.entry(key).or_default().insert(normalized);
            }
        }
        out
    }
}

/// Pattern-driven mapper: every match of every pattern registered for a key
/// becomes a value of that key.
#[derive(Debug, Clone)]
pub struct RegexMapper {
    patterns: BTreeMap<StitchKey, Vec<Regex>>,
    min_length: usize,
    blacklist: BTreeSet<String>,
}

impl Default for RegexMapper {
    fn default() -> Self {
        Self {
            patterns: BTreeMap::new(),
            min_length: 1,
            blacklist: BTreeSet::new(),
        }
    }
}

impl RegexMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: StitchKey, pattern: &str) -> Result<()> {
        let regex = Regex::new(pattern)?;
        self.patterns.entry(key).or_default().push(regex);
        Ok(())
    }

    pub fn with_pattern(mut self, key: StitchKey, pattern: &str) -> Result<Self> {
        self.add(key, pattern)?;
        Ok(self)
    }

    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    /// Values never emitted, compared after trimming and quote stripping.
    pub fn with_blacklist<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blacklist.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl StitchKeyMapper for RegexMapper {
    fn map(&self, value: &str) -> Vec<(StitchKey, String)> {
        let mut mapped = Vec::new();
        for (key, patterns) in &self.patterns {
            let mut values: Vec<String> = Vec::new();
            for pattern in patterns {
                for m in pattern.find_iter(value) {
                    let v = m.as_str().trim().replace('"', "");
                    let keep = match key.value_kind() {
                        ValueKind::Integer => v.parse::<u64>().is_ok(),
                        ValueKind::Text => v.chars().count() >= self.min_length,
                    };
                    if keep && !self.blacklist.contains(&v) && !values.contains(&v) {
                        values.push(v);
                    }
                }
            }
            mapped.extend(values.into_iter().map(|v| (*key, v)));
        }
        mapped
    }
}

/// One `[[stitches]]` entry of a mapping file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StitchSpec {
    pub key: StitchKey,
    /// Field the values are read from.
    pub property: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blacklist: Vec<String>,
}

impl StitchSpec {
    pub fn new(key: StitchKey, property: impl Into<String>) -> Self {
        Self {
            key,
            property: property.into(),
            separator: None,
            regex: None,
            min_length: None,
            blacklist: Vec::new(),
        }
    }

    fn mapper(&self) -> Result<FieldMapper> {
        if let Some(pattern) = &self.regex {
            let mapper = RegexMapper::new()
                .with_pattern(self.key, pattern)?
                .with_min_length(self.min_length.unwrap_or(1))
                .with_blacklist(self.blacklist.iter().cloned());
            return Ok(FieldMapper::Custom(Arc::new(mapper)));
        }
        if !self.blacklist.is_empty() || self.min_length.is_some() {
            // Filtering without a pattern: match the whole (split) value.
            let mut mapper = RegexMapper::new()
                .with_min_length(self.min_length.unwrap_or(1))
                .with_blacklist(self.blacklist.iter().cloned());
            let pattern = match &self.separator {
                Some(sep) => format!("[^{}]+", regex::escape(sep)),
                None => "(?s).+".to_string(),
            };
            mapper.add(self.key, &pattern)?;
            return Ok(FieldMapper::Custom(Arc::new(mapper)));
        }
        Ok(match &self.separator {
            Some(separator) => FieldMapper::Delimited {
                key: self.key,
                separator: separator.clone(),
            },
            None => FieldMapper::Static(self.key),
        })
    }
}

/// Declarative description of one source: identity fields, encoding and
/// stitch fields. Deserialized from mapping files and built from job
/// parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_field: Option<String>,
    #[serde(default)]
    pub format: SourceFormat,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub stitches: Vec<StitchSpec>,
}

fn default_delimiter() -> char {
    ','
}

impl Default for MappingSpec {
    fn default() -> Self {
        Self {
            name: None,
            kind: EntityKind::default(),
            id_field: None,
            name_field: None,
            format: SourceFormat::default(),
            delimiter: default_delimiter(),
            stitches: Vec::new(),
        }
    }
}

impl MappingSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_kind(mut self, kind: EntityKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = Some(field.into());
        self
    }

    pub fn with_name_field(mut self, field: impl Into<String>) -> Self {
        self.name_field = Some(field.into());
        self
    }

    pub fn with_format(mut self, format: SourceFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_stitch(mut self, stitch: StitchSpec) -> Self {
        self.stitches.push(stitch);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.delimiter.is_ascii() {
            return Err(StitchError::Validation(format!(
                "delimiter must be a single ASCII character, got {:?}",
                self.delimiter
            )));
        }
        for stitch in &self.stitches {
            if stitch.property.trim().is_empty() {
                return Err(StitchError::Validation(format!(
                    "stitch {} has no property",
                    stitch.key
                )));
            }
            if matches!(&stitch.separator, Some(s) if s.is_empty()) {
                return Err(StitchError::Validation(format!(
                    "stitch {} on {} has an empty separator",
                    stitch.key, stitch.property
                )));
            }
        }
        Ok(())
    }

    pub fn delimiter_byte(&self) -> Result<u8> {
        self.validate()?;
        Ok(self.delimiter as u8)
    }

    /// Compile the stitch entries.
    pub fn key_mapping(&self) -> Result<KeyMapping> {
        self.validate()?;
        let mut mapping = KeyMapping::new();
        for stitch in &self.stitches {
            mapping = mapping.with_mapper(stitch.property.clone(), stitch.mapper()?);
        }
        Ok(mapping)
    }

    /// Build from a flat parameter map. Recognized keys are `NAME`, `ID`,
    /// `FORMAT`, `DELIMITER` and `KIND`; any key naming a stitch key maps it to
    /// the listed field(s), comma separated. Other keys are ignored.
    pub fn from_params(params: &BTreeMap<String, String>) -> Result<Self> {
        let mut spec = MappingSpec::new();
        spec.apply_params(params)?;
        Ok(spec)
    }

    /// Overlay flat parameters on an existing spec. Stitch entries are
    /// appended, identity fields are replaced.
    pub fn apply_params(&mut self, params: &BTreeMap<String, String>) -> Result<()> {
        for (name, value) in params {
            match name.as_str() {
                "NAME" => self.name = Some(value.clone()),
                "ID" => self.id_field = Some(value.clone()),
                "FORMAT" => self.format = value.parse()?,
                "KIND" => self.kind = value.parse()?,
                "DELIMITER" => {
                    let mut chars = value.chars();
                    self.delimiter = match (chars.next(), chars.next()) {
                        (Some(c), None) => c,
                        _ if value == "\\t" => '\t',
                        _ => {
                            return Err(StitchError::Validation(format!(
                                "DELIMITER must be one character, got {:?}",
                                value
                            )))
                        }
                    };
                }
                other => {
                    if let Ok(key) = other.parse::<StitchKey>() {
                        for field in value.split(',').map(str::trim).filter(|f| !f.is_empty()) {
                            self.stitches.push(StitchSpec::new(key, field));
                        }
                    }
                }
            }
        }
        self.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[(&str, &[&str])]) -> Record {
        Record {
            ordinal: 0,
            fields: fields
                .iter()
                .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
                .collect(),
            raw: String::new(),
            malformed: None,
        }
    }

    #[test]
    fn test_static_and_delimited() {
        let mapping = KeyMapping::new()
            .with_static("CAS", StitchKey::Cas)
            .with_delimited("SYNONYMS", StitchKey::Name, "|");
        let values = mapping.apply(&record(&[
            ("CAS", &[" 50-78-2 "]),
            ("SYNONYMS", &["aspirin| Acetylsalicylic acid ||ASPIRIN"]),
        ]));
        assert_eq!(values[&StitchKey::Cas].len(), 1);
        let names: Vec<_> = values[&StitchKey::Name].iter().cloned().collect();
        assert_eq!(names, vec!["ACETYLSALICYLIC ACID", "ASPIRIN"]);
    }

    #[test]
    fn test_regex_mapper_rules() {
        let mapper = RegexMapper::new()
            .with_pattern(StitchKey::Unii, "[A-Z0-9]{10}")
            .unwrap()
            .with_pattern(StitchKey::Cid, "\\d+")
            .unwrap()
            .with_blacklist(["0000000000"]);
        let mapped = mapper.map("R16CO5Y76E 0000000000 \"R16CO5Y76E\" 2244");

        let unii: Vec<_> = mapped.iter().filter(|(k, _)| *k == StitchKey::Unii).collect();
        assert_eq!(unii.len(), 1);
        assert!(mapped.contains(&(StitchKey::Cid, "2244".to_string())));
    }

    #[test]
    fn test_min_length_filter() {
        let mapping = MappingSpec::new()
            .with_stitch(StitchSpec {
                min_length: Some(3),
                separator: Some(";".into()),
                ..StitchSpec::new(StitchKey::Name, "names")
            })
            .key_mapping()
            .unwrap();
        let values = mapping.apply(&record(&[("names", &["ab;abc;abcd"])]));
        assert_eq!(values[&StitchKey::Name].len(), 2);
    }

    #[test]
    fn test_mapping_file_toml() {
        let spec: MappingSpec = toml::from_str(
            r#"
            name = "registry"
            kind = "agent"
            id_field = "UNII"
            format = "tsv"
            delimiter = "\t"

            [[stitches]]
            key = "I_UNII"
            property = "UNII"

            [[stitches]]
            key = "N_Name"
            property = "SYNONYMS"
            separator = "|"
            "#,
        )
        .unwrap();
        assert_eq!(spec.format, SourceFormat::Delimited);
        assert_eq!(spec.delimiter_byte().unwrap(), b'\t');
        let declared = spec.key_mapping().unwrap().declared();
        assert_eq!(declared["SYNONYMS"], vec![StitchKey::Name]);
    }

    #[test]
    fn test_from_params() {
        let params: BTreeMap<String, String> = [
            ("NAME", "s"),
            ("ID", "id"),
            ("I_CAS", "cas, cas2"),
            ("LIMIT", "3"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let spec = MappingSpec::from_params(&params).unwrap();
        assert_eq!(spec.id_field.as_deref(), Some("id"));
        assert_eq!(spec.stitches.len(), 2);
        assert_eq!(spec.stitches[1].property, "cas2");
    }
}
