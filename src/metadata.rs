use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::api::{IdseqApi, SampleRef, ValidateMetadataRequest, ValidationIssues};
use crate::config::Aliases;
use crate::domain::MetadataRecord;
use crate::error::IdseqError;
use crate::locations::{
    EnricherOptions, GeoEnricher, apply_location_matches, location_summary, raw_locations,
};
use crate::prompt::Interaction;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Header row plus data rows, exactly as submitted for validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl MetadataTable {
    pub fn read(path: &Path) -> Result<Self, IdseqError> {
        let bytes = fs::read(path)
            .map_err(|err| IdseqError::Metadata(format!("{}: {err}", path.display())))?;
        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, IdseqError> {
        let text = decode_text(bytes);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut records = reader.records();
        let headers = match records.next() {
            Some(record) => record
                .map_err(|err| IdseqError::Metadata(err.to_string()))?
                .iter()
                .map(|cell| cell.trim().to_string())
                .collect::<Vec<_>>(),
            None => return Err(IdseqError::Metadata("metadata file is empty".to_string())),
        };

        let mut rows = Vec::new();
        for record in records {
            let record = record.map_err(|err| IdseqError::Metadata(err.to_string()))?;
            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(Self { headers, rows })
    }

    /// One record per row keyed by the sample-name column, which is removed from the record.
    pub fn records(&self, aliases: &Aliases) -> BTreeMap<String, MetadataRecord> {
        let mut records = BTreeMap::new();
        for (index, row) in self.rows.iter().enumerate() {
            let mut record = MetadataRecord::new();
            for (header, cell) in self.headers.iter().zip(row) {
                if !header.is_empty() {
                    record.insert_text(header.clone(), cell.trim());
                }
            }
            let name = record
                .remove(&aliases.sample_name)
                .and_then(|value| value.as_text().map(str::to_string))
                .filter(|name| !name.is_empty());
            let Some(name) = name else {
                warn!(row = index + 2, "metadata row has no sample name");
                continue;
            };
            if records.contains_key(&name) {
                warn!(sample = %name, "duplicate metadata row, keeping the first");
                continue;
            }
            records.insert(name, record);
        }
        records
    }
}

/// UTF-8 (with or without BOM) first, Latin-1 when the bytes are not valid UTF-8.
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&byte| byte as char).collect(),
    }
}

#[derive(Debug, Clone)]
pub struct MetadataOptions {
    pub skip_geosearch: bool,
    pub enricher: EnricherOptions,
    pub aliases: Aliases,
    pub base_url: String,
}

pub struct MetadataValidator<'a, A: IdseqApi> {
    api: &'a A,
    interaction: &'a dyn Interaction,
    options: MetadataOptions,
}

impl<'a, A: IdseqApi> MetadataValidator<'a, A> {
    pub fn new(api: &'a A, interaction: &'a dyn Interaction, options: MetadataOptions) -> Self {
        Self {
            api,
            interaction,
            options,
        }
    }

    /// Loops with operator correction until the server reports no errors, then
    /// returns exactly one record per requested sample with locations resolved.
    pub fn validate(
        &self,
        path: &str,
        sample_names: &[String],
        project_id: u64,
    ) -> Result<BTreeMap<String, MetadataRecord>, IdseqError> {
        let mut path = path.to_string();
        let table = loop {
            match self.submit(&path, sample_names, project_id) {
                Ok((table, issues)) => {
                    self.print_issues(&issues);
                    if !issues.has_errors() {
                        break table;
                    }
                }
                Err(err) => self
                    .interaction
                    .notify(&format!("\nMetadata validation failed:\n{err}")),
            }
            let answer = self.interaction.ask(
                "\nFix the metadata file and press Enter to validate again, or enter a \
                 different file path: ",
            )?;
            if !answer.is_empty() {
                path = answer;
            }
        };
        info!(%path, rows = table.rows.len(), "metadata validated");

        let mut records = table.records(&self.options.aliases);
        records.retain(|name, _| sample_names.contains(name));
        for name in sample_names {
            if !records.contains_key(name) {
                warn!(sample = %name, "no metadata row for sample");
                records.insert(name.clone(), MetadataRecord::new());
            }
        }

        if !self.options.skip_geosearch {
            let queries = raw_locations(&records, &self.options.aliases);
            if !queries.is_empty() {
                let enricher =
                    GeoEnricher::new(self.api, self.interaction, self.options.enricher.clone());
                let matches = enricher.resolve(&queries);
                apply_location_matches(&mut records, &matches, &self.options.aliases);
                self.interaction.notify(&location_summary(
                    &records,
                    &self.options.aliases,
                    &self.options.base_url,
                    project_id,
                ));
            }
        }
        Ok(records)
    }

    fn submit(
        &self,
        path: &str,
        sample_names: &[String],
        project_id: u64,
    ) -> Result<(MetadataTable, ValidationIssues), IdseqError> {
        let table = MetadataTable::read(Path::new(path))?;
        let request = ValidateMetadataRequest {
            metadata: table.clone(),
            samples: sample_names
                .iter()
                .map(|name| SampleRef {
                    name: name.clone(),
                    project_id,
                })
                .collect(),
        };
        let issues = self.api.validate_metadata(&request)?;
        Ok((table, issues))
    }

    fn print_issues(&self, issues: &ValidationIssues) {
        if !issues.errors.is_empty() {
            let mut text = String::from("\nErrors:");
            for issue in &issues.errors {
                text.push_str(&format!("\n- {}", issue.render()));
            }
            self.interaction.notify(&text);
        }
        if !issues.warnings.is_empty() {
            let mut text = String::from("\nWarnings:");
            for issue in &issues.warnings {
                text.push_str(&format!("\n- {}", issue.render()));
            }
            self.interaction.notify(&text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin1_fallback() {
        let bytes = b"sample_name,Collection Location\nx,S\xE3o Paulo\n";
        let table = MetadataTable::parse(bytes).unwrap();
        assert_eq!(table.rows[0][1], "São Paulo");
    }

    #[test]
    fn bom_is_stripped_from_first_header() {
        let table = MetadataTable::parse(b"\xEF\xBB\xBFsample_name,host_genome\nx,Human\n").unwrap();
        assert_eq!(table.headers, vec!["sample_name", "host_genome"]);
    }
}
