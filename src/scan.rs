use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::domain::{S3_SCHEME, SequenceFile, is_sequence_file};
use crate::error::IdseqError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub uri: String,
    pub size: u64,
}

pub trait ObjectLister: Send + Sync {
    /// Recursively lists every object below `prefix` (an `s3://bucket/key` URI).
    fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, IdseqError>;
}

/// Lists buckets through the `aws` command line tool and the caller's own credentials.
#[derive(Clone)]
pub struct AwsCliLister {
    aws: Option<PathBuf>,
}

impl AwsCliLister {
    pub fn new() -> Self {
        Self {
            aws: find_in_path("aws"),
        }
    }
}

impl Default for AwsCliLister {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectLister for AwsCliLister {
    fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, IdseqError> {
        let aws = self.aws.as_ref().ok_or_else(|| IdseqError::Discovery {
            root: prefix.to_string(),
            message: "aws command line tool not found in PATH".to_string(),
        })?;
        let clean = prefix.trim_end_matches('/');
        let output = Command::new(aws)
            .args(["s3", "ls", "--recursive", &format!("{clean}/")])
            .output()
            .map_err(|err| IdseqError::Discovery {
                root: prefix.to_string(),
                message: err.to_string(),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(IdseqError::Discovery {
                root: prefix.to_string(),
                message: if stderr.is_empty() {
                    format!("aws s3 ls exited with {}", output.status)
                } else {
                    stderr
                },
            });
        }
        let bucket = bucket_of(clean).ok_or_else(|| IdseqError::Discovery {
            root: prefix.to_string(),
            message: "expected s3://bucket/prefix".to_string(),
        })?;
        Ok(parse_s3_listing(bucket, &String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parses `aws s3 ls --recursive` output: `date time size key`, keys may contain spaces.
pub fn parse_s3_listing(bucket: &str, stdout: &str) -> Vec<ObjectEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let (_date, rest) = line.trim_start().split_once(char::is_whitespace)?;
            let (_time, rest) = rest.trim_start().split_once(char::is_whitespace)?;
            let (size, key) = rest.trim_start().split_once(char::is_whitespace)?;
            let size = size.parse::<u64>().ok()?;
            let key = key.trim_start();
            (!key.is_empty()).then(|| ObjectEntry {
                uri: build_s3_uri(bucket, key),
                size,
            })
        })
        .collect()
}

pub fn build_s3_uri(bucket: &str, key: &str) -> String {
    format!("{S3_SCHEME}{bucket}/{key}")
}

fn bucket_of(uri: &str) -> Option<&str> {
    uri.strip_prefix(S3_SCHEME)?
        .split('/')
        .next()
        .filter(|bucket| !bucket.is_empty())
}

/// Number of path segments `file` sits below `root`.
pub fn relative_depth(file: &str, root: &str) -> isize {
    let file_parts = file.split('/').count() as isize;
    let root_parts = root.trim_end_matches('/').split('/').count() as isize;
    file_parts - root_parts
}

pub struct PathScanner<L: ObjectLister> {
    lister: L,
}

impl<L: ObjectLister> PathScanner<L> {
    pub fn new(lister: L) -> Self {
        Self { lister }
    }

    /// Sequence files exactly `depth` levels below `root`, sorted by locator.
    pub fn scan(&self, root: &str, depth: usize) -> Result<Vec<SequenceFile>, IdseqError> {
        let mut files = if root.starts_with(S3_SCHEME) {
            self.scan_remote(root, depth)?
        } else {
            scan_local(Utf8Path::new(root), depth)?
        };
        files.sort_by(|a, b| a.locator().cmp(b.locator()));
        debug!(root, depth, found = files.len(), "scanned for sequence files");
        Ok(files)
    }

    fn scan_remote(&self, root: &str, depth: usize) -> Result<Vec<SequenceFile>, IdseqError> {
        let clean = root.trim_end_matches('/');
        let entries = self.lister.list(clean)?;
        Ok(entries
            .into_iter()
            .filter(|entry| is_sequence_file(&entry.uri))
            .filter(|entry| relative_depth(&entry.uri, clean) == depth as isize)
            .map(|entry| SequenceFile::remote(entry.uri, Some(entry.size)))
            .collect())
    }
}

fn scan_local(root: &Utf8Path, depth: usize) -> Result<Vec<SequenceFile>, IdseqError> {
    let entries = fs::read_dir(root.as_std_path()).map_err(|err| IdseqError::Discovery {
        root: root.to_string(),
        message: err.to_string(),
    })?;

    let mut level = Vec::new();
    for entry in entries.flatten() {
        match Utf8PathBuf::from_path_buf(entry.path()) {
            Ok(path) if !is_hidden(&path) => level.push(path),
            Ok(_) => {}
            Err(path) => warn!(path = %path.display(), "skipping non-UTF-8 path"),
        }
    }

    for _ in 1..depth {
        let mut next = Vec::new();
        for dir in level.into_iter().filter(|path| path.is_dir()) {
            let Ok(entries) = fs::read_dir(dir.as_std_path()) else {
                warn!(%dir, "skipping unreadable directory");
                continue;
            };
            next.extend(
                entries
                    .flatten()
                    .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.path()).ok())
                    .filter(|path| !is_hidden(path)),
            );
        }
        level = next;
    }

    let mut files = Vec::new();
    for path in level {
        if !path.is_file() || !is_sequence_file(path.as_str()) {
            continue;
        }
        let file = SequenceFile::local(&path)?;
        if file.size() == Some(0) {
            debug!(%path, "skipping empty file");
            continue;
        }
        files.push(file);
    }
    Ok(files)
}

fn is_hidden(path: &Utf8Path) -> bool {
    path.file_name()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let exe = dir.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = dir.join(name);
        if is_file(&plain) {
            return Some(plain);
        }
    }
    None
}

fn is_file(path: &Path) -> bool {
    path.metadata().map(|meta| meta.is_file()).unwrap_or(false)
}
