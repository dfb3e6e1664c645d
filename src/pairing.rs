use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::domain::{SampleFiles, SequenceFile, parse_file_name};
use crate::error::IdseqError;
use crate::scan::{ObjectLister, PathScanner};

/// Groups the files under `root` into samples.
///
/// Top-level files are paired by their `_R1`/`_R2` labels. When the top level
/// holds no usable sample, every immediate subfolder becomes one sample.
pub fn detect_samples<L: ObjectLister>(
    scanner: &PathScanner<L>,
    root: &str,
) -> Result<Vec<SampleFiles>, IdseqError> {
    let top_level = scanner.scan(root, 1)?;
    let samples = group_by_file_name(top_level);
    if !samples.is_empty() {
        info!(root, samples = samples.len(), "detected samples from file names");
        return Ok(samples);
    }

    let nested = scanner.scan(root, 2)?;
    let samples = group_by_directory(nested);
    if !samples.is_empty() {
        info!(root, samples = samples.len(), "detected samples from subfolders");
        return Ok(samples);
    }

    Err(IdseqError::no_samples(root))
}

/// Sample name is the file name without extension and mate label.
pub fn group_by_file_name(files: Vec<SequenceFile>) -> Vec<SampleFiles> {
    let mut groups: BTreeMap<String, Vec<SequenceFile>> = BTreeMap::new();
    for file in files {
        if let Some((name, _)) = parse_file_name(file.basename()) {
            groups.entry(name).or_default().push(file);
        }
    }
    keep_valid(groups)
}

/// Sample name is the folder holding the files.
pub fn group_by_directory(files: Vec<SequenceFile>) -> Vec<SampleFiles> {
    let mut groups: BTreeMap<String, Vec<SequenceFile>> = BTreeMap::new();
    for file in files {
        if let Some(dir) = parent_name(file.locator()) {
            groups.entry(dir.to_string()).or_default().push(file);
        }
    }
    keep_valid(groups)
}

fn keep_valid(groups: BTreeMap<String, Vec<SequenceFile>>) -> Vec<SampleFiles> {
    groups
        .into_iter()
        .filter_map(|(name, mut files)| {
            if !matches!(files.len(), 1 | 2) {
                debug!(sample = %name, files = files.len(), "dropping ambiguous sample");
                return None;
            }
            files.sort_by(|a, b| mate_key(a).cmp(&mate_key(b)));
            Some(SampleFiles { name, files })
        })
        .collect()
}

fn mate_key(file: &SequenceFile) -> (u8, &str) {
    let mate = parse_file_name(file.basename())
        .and_then(|(_, mate)| mate)
        .unwrap_or(0);
    (mate, file.locator())
}

fn parent_name(locator: &str) -> Option<&str> {
    let mut segments = locator.trim_end_matches('/').rsplit('/');
    segments.next()?;
    segments.next().filter(|name| !name.is_empty())
}
