use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::sync::LazyLock;

use camino::Utf8Path;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::IdseqError;

pub const S3_SCHEME: &str = "s3://";
pub const PART_SUFFIX: &str = "__AWS-MULTI-PART-";
pub const ACCEPTED_FORMATS: &str = "fastq/fq, fasta/fa, fastq.gz/fq.gz, fasta.gz/fa.gz";

static INPUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+)\.(fastq|fq|fasta|fa)(\.gz)?$").expect("input pattern is valid")
});

static PAIRED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+)_R(\d)(_001)?\.(fastq|fq|fasta|fa)(\.gz)?$").expect("mate pattern is valid")
});

/// True when the file name carries one of the accepted sequence extensions.
pub fn is_sequence_file(name: &str) -> bool {
    INPUT_RE.is_match(basename(name))
}

/// Sample name and mate number derived from a sequence file name.
///
/// `x_R1_001.fastq.gz` gives `("x", Some(1))`, `x.fa` gives `("x", None)`.
pub fn parse_file_name(name: &str) -> Option<(String, Option<u8>)> {
    let name = basename(name);
    if let Some(caps) = PAIRED_RE.captures(name) {
        let mate = caps[2].parse::<u8>().ok();
        return Some((caps[1].to_string(), mate));
    }
    INPUT_RE
        .captures(name)
        .map(|caps| (caps[1].to_string(), None))
}

pub fn basename(locator: &str) -> &str {
    locator
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(locator)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Local,
    S3,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Local => write!(f, "local"),
            SourceKind::S3 => write!(f, "s3"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceFile {
    kind: SourceKind,
    locator: String,
    size: Option<u64>,
}

impl SequenceFile {
    /// Stats a local file. The size is captured once and never refreshed.
    pub fn local(path: &Utf8Path) -> Result<Self, IdseqError> {
        let meta = fs::metadata(path.as_std_path())
            .map_err(|err| IdseqError::Filesystem(format!("stat {path}: {err}")))?;
        if !meta.is_file() {
            return Err(IdseqError::Validation(format!("{path} is not a regular file")));
        }
        Ok(Self {
            kind: SourceKind::Local,
            locator: path.to_string(),
            size: Some(meta.len()),
        })
    }

    pub fn remote(uri: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            kind: SourceKind::S3,
            locator: uri.into(),
            size,
        }
    }

    /// `s3://` locators are remote, everything else must exist on disk.
    pub fn from_locator(locator: &str) -> Result<Self, IdseqError> {
        if locator.starts_with(S3_SCHEME) {
            Ok(Self::remote(locator, None))
        } else {
            Self::local(Utf8Path::new(locator))
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn is_local(&self) -> bool {
        self.kind == SourceKind::Local
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn local_path(&self) -> Option<&Utf8Path> {
        self.is_local().then(|| Utf8Path::new(&self.locator))
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn basename(&self) -> &str {
        basename(&self.locator)
    }
}

impl fmt::Display for SequenceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.locator)
    }
}

/// One or two mate files grouped under a derived sample name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleFiles {
    pub name: String,
    pub files: Vec<SequenceFile>,
}

/// Everything the orchestrator needs to create one sample remotely.
#[derive(Debug, Clone)]
pub struct Sample {
    pub name: String,
    pub project_id: u64,
    pub files: Vec<SequenceFile>,
    pub host_genome: Option<String>,
    pub metadata: MetadataRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
}

/// Case-insensitive set of header names that refer to the same field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldAliases(Vec<String>);

impl FieldAliases {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(|name| name.into().to_lowercase()).collect())
    }

    pub fn collection_location() -> Self {
        Self::new(["collection location", "collection_location"])
    }

    pub fn host_genome() -> Self {
        Self::new(["host genome", "host_genome", "host organism", "host_organism"])
    }

    pub fn sample_name() -> Self {
        Self::new(["sample name", "sample_name"])
    }

    pub fn matches(&self, field: &str) -> bool {
        let field = field.trim().to_lowercase();
        self.0.iter().any(|alias| *alias == field)
    }

    pub fn extend<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into().to_lowercase();
            if !self.0.contains(&name) {
                self.0.push(name);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationMatch {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdivision_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_name: Option<String>,
    #[serde(default, skip_serializing)]
    pub restricted: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LocationMatch {
    pub fn is_city(&self) -> bool {
        self.geo_level.as_deref() == Some("city")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Location(LocationMatch),
}

impl MetadataValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(value) => Some(value),
            MetadataValue::Location(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataRecord(BTreeMap<String, MetadataValue>);

impl MetadataRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_text(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0
            .insert(field.into(), MetadataValue::Text(value.into()));
    }

    pub fn insert(&mut self, field: impl Into<String>, value: MetadataValue) {
        self.0.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&MetadataValue> {
        self.0.get(field)
    }

    /// First field whose name matches one of the aliases.
    pub fn find(&self, aliases: &FieldAliases) -> Option<(&str, &MetadataValue)> {
        self.0
            .iter()
            .find(|(field, _)| aliases.matches(field))
            .map(|(field, value)| (field.as_str(), value))
    }

    pub fn find_text(&self, aliases: &FieldAliases) -> Option<&str> {
        self.find(aliases).and_then(|(_, value)| value.as_text())
    }

    pub fn remove(&mut self, aliases: &FieldAliases) -> Option<MetadataValue> {
        let field = self.0.keys().find(|field| aliases.matches(field))?.clone();
        self.0.remove(&field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
