use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Joins alternative label paths inside one annotation value.
pub const ALTERNATIVES_DELIMITER: &str = " $ ";
/// Joins the levels of a single label path, root first.
pub const LEVEL_DELIMITER: &str = " | ";
/// Joins the fields of an annotation digest.
pub const DIGEST_SEPARATOR: &str = " // ";

const ABSENT_DIGEST_FIELD: &str = "nan";

#[derive(Debug, Error)]
pub enum TableError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed record on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Duplicate record id: {id}")]
    DuplicateId { id: String },

    #[error("Failed to serialize record {id}: {source}")]
    Serialize {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One dataset row. Columns this crate does not interpret are kept in `extra`
/// and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "idInSource")]
    pub id: RecordId,
    pub database: String,
    #[serde(rename = "#portraitMedia.original", default)]
    pub source_url: Option<String>,
    #[serde(rename = "classifications.hierarchy", default)]
    pub classifications: Option<String>,
    #[serde(rename = "objectTypes.hierarchy", default)]
    pub object_types: Option<String>,
    #[serde(rename = "subjects.hierarchy", default)]
    pub subjects: Option<String>,
    #[serde(rename = "materials.hierarchy", default)]
    pub materials: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<RecordId>, database: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            database: database.into(),
            source_url: None,
            classifications: None,
            object_types: None,
            subjects: None,
            materials: None,
            extra: Map::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_label(mut self, column: HierarchyColumn, value: impl Into<String>) -> Self {
        column.set(&mut self, Some(value.into()));
        self
    }

    /// Classification, object type and subject joined by `" // "`. Only used to
    /// report whether duplicates also agree on their annotations.
    pub fn annotation_digest(&self) -> String {
        [
            HierarchyColumn::Classifications,
            HierarchyColumn::ObjectTypes,
            HierarchyColumn::Subjects,
        ]
        .iter()
        .map(|column| column.get(self).unwrap_or(ABSENT_DIGEST_FIELD))
        .collect::<Vec<_>>()
        .join(DIGEST_SEPARATOR)
    }
}

/// Value of the `idInSource` column.
///
/// Sources write ids as JSON strings or numbers. The text form names the asset
/// file and decides identity; a numeric id is written back as a number.
#[derive(Debug, Clone)]
pub struct RecordId {
    text: String,
    number: Option<Number>,
}

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_number(&self) -> bool {
        self.number.is_some()
    }
}

impl From<String> for RecordId {
    fn from(text: String) -> Self {
        Self { text, number: None }
    }
}

impl From<&str> for RecordId {
    fn from(text: &str) -> Self {
        Self::from(text.to_string())
    }
}

impl From<Number> for RecordId {
    fn from(number: Number) -> Self {
        Self {
            text: number.to_string(),
            number: Some(number),
        }
    }
}

impl PartialEq for RecordId {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for RecordId {}

impl Hash for RecordId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl PartialEq<str> for RecordId {
    fn eq(&self, other: &str) -> bool {
        self.text == other
    }
}

impl PartialEq<&str> for RecordId {
    fn eq(&self, other: &&str) -> bool {
        self.text == *other
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.number {
            Some(number) => number.serialize(serializer),
            None => serializer.serialize_str(&self.text),
        }
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(text) => Ok(Self::from(text)),
            Value::Number(number) => Ok(Self::from(number)),
            other => Err(serde::de::Error::custom(format!(
                "expected string or number id, found {other}"
            ))),
        }
    }
}

/// The hierarchy columns eligible for merging and tree building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HierarchyColumn {
    Classifications,
    ObjectTypes,
    Subjects,
    Materials,
}

impl HierarchyColumn {
    pub const ALL: [HierarchyColumn; 4] = [
        HierarchyColumn::Classifications,
        HierarchyColumn::ObjectTypes,
        HierarchyColumn::Subjects,
        HierarchyColumn::Materials,
    ];

    pub fn column_name(&self) -> &'static str {
        match self {
            HierarchyColumn::Classifications => "classifications.hierarchy",
            HierarchyColumn::ObjectTypes => "objectTypes.hierarchy",
            HierarchyColumn::Subjects => "subjects.hierarchy",
            HierarchyColumn::Materials => "materials.hierarchy",
        }
    }

    /// Column name up to the first `.`, e.g. `classifications`.
    pub fn category(&self) -> &'static str {
        let name = self.column_name();
        name.split_once('.').map_or(name, |(head, _)| head)
    }

    pub fn get<'a>(&self, record: &'a Record) -> Option<&'a str> {
        match self {
            HierarchyColumn::Classifications => record.classifications.as_deref(),
            HierarchyColumn::ObjectTypes => record.object_types.as_deref(),
            HierarchyColumn::Subjects => record.subjects.as_deref(),
            HierarchyColumn::Materials => record.materials.as_deref(),
        }
    }

    pub fn set(&self, record: &mut Record, value: Option<String>) {
        let slot = match self {
            HierarchyColumn::Classifications => &mut record.classifications,
            HierarchyColumn::ObjectTypes => &mut record.object_types,
            HierarchyColumn::Subjects => &mut record.subjects,
            HierarchyColumn::Materials => &mut record.materials,
        };
        *slot = value;
    }
}

/// The working table. Record order is meaningful (first occurrence wins when
/// merging duplicates) and ids are unique.
///
/// Rows can only be dropped or have their hierarchy columns rewritten from
/// inside the crate, so ids stay unique after construction:
///
/// ```compile_fail
/// let mut table = curatrs::Table::new(vec![curatrs::Record::new("a", "MET")]).unwrap();
/// table.records_mut()[0].id = "b".into();
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    records: Vec<Record>,
}

impl Table {
    pub fn new(records: Vec<Record>) -> Result<Self, TableError> {
        if let Some(id) = first_duplicate_id(&records) {
            return Err(TableError::DuplicateId { id });
        }
        Ok(Self { records })
    }

    /// Read one JSON object per line. Blank lines are ignored.
    pub fn load_jsonl(path: &Path) -> Result<Self, TableError> {
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str::<Record>(&line)
                .map_err(|source| TableError::Parse { line: i + 1, source })?;
            records.push(record);
        }
        Self::new(records)
    }

    pub fn save_jsonl(&self, path: &Path) -> Result<(), TableError> {
        let mut out = BufWriter::new(File::create(path)?);
        for record in &self.records {
            let line = serde_json::to_string(record).map_err(|source| TableError::Serialize {
                id: record.id.to_string(),
                source,
            })?;
            writeln!(out, "{}", line)?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub(crate) fn records_mut(&mut self) -> &mut [Record] {
        &mut self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn retain<F: FnMut(&Record) -> bool>(&mut self, f: F) {
        self.records.retain(f);
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

fn first_duplicate_id(records: &[Record]) -> Option<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .find(|record| !seen.insert(record.id.as_str()))
        .map(|record| record.id.to_string())
}
