use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::domain::{PART_SUFFIX, SequenceFile, basename};
use crate::error::IdseqError;

const SUFFIX_LETTERS: u64 = 26;
const SUFFIX_LEN: u32 = 2;
pub const MAX_PARTS: u64 = SUFFIX_LETTERS.pow(SUFFIX_LEN);

/// Ordered parts that concatenate back to one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSet {
    source: SequenceFile,
    parts: Vec<String>,
    total_size: u64,
}

impl ChunkSet {
    pub fn whole(source: SequenceFile) -> Self {
        Self {
            total_size: source.size().unwrap_or(0),
            parts: vec![source.locator().to_string()],
            source,
        }
    }

    pub fn source(&self) -> &SequenceFile {
        &self.source
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn part_basenames(&self) -> Vec<&str> {
        self.parts.iter().map(|part| basename(part)).collect()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn is_split(&self) -> bool {
        self.parts.first().map(String::as_str) != Some(self.source.locator())
    }

    /// Part files written by the chunker, never the original input.
    pub fn split_parts(&self) -> impl Iterator<Item = &str> {
        let source = self.source.locator();
        self.parts
            .iter()
            .map(String::as_str)
            .filter(move |part| *part != source && is_split_part(part))
    }
}

pub fn is_split_part(path: &str) -> bool {
    basename(path).contains(PART_SUFFIX)
}

/// `0 -> "aa"`, `1 -> "ab"`, ..., `675 -> "zz"`.
pub fn part_suffix(index: u64) -> Option<String> {
    if index >= MAX_PARTS {
        return None;
    }
    let first = (b'a' + (index / SUFFIX_LETTERS) as u8) as char;
    let second = (b'a' + (index % SUFFIX_LETTERS) as u8) as char;
    Some(format!("{first}{second}"))
}

pub fn part_path(source: &Utf8Path, index: u64) -> Option<Utf8PathBuf> {
    part_suffix(index).map(|suffix| Utf8PathBuf::from(format!("{source}{PART_SUFFIX}{suffix}")))
}

#[derive(Debug, Clone, Copy)]
pub struct FileChunker {
    max_part_size: u64,
}

impl FileChunker {
    pub fn new(max_part_size: u64) -> Self {
        Self {
            max_part_size: max_part_size.max(1),
        }
    }

    /// Remote files and files within the limit pass through untouched.
    pub fn parts(&self, file: &SequenceFile) -> Result<ChunkSet, IdseqError> {
        let (Some(path), Some(size)) = (file.local_path(), file.size()) else {
            return Ok(ChunkSet::whole(file.clone()));
        };
        if size <= self.max_part_size {
            return Ok(ChunkSet::whole(file.clone()));
        }

        let needed = size.div_ceil(self.max_part_size);
        if needed > MAX_PARTS {
            return Err(IdseqError::SplitExhausted {
                path: path.to_string(),
                needed,
                available: MAX_PARTS,
            });
        }

        info!(
            %path,
            parts = needed,
            part_size = self.max_part_size,
            "splitting large file"
        );
        let mut written = Vec::with_capacity(needed as usize);
        match self.split(path, needed, &mut written) {
            Ok(()) => Ok(ChunkSet {
                source: file.clone(),
                parts: written.into_iter().map(Utf8PathBuf::into_string).collect(),
                total_size: size,
            }),
            Err(err) => {
                for part in &written {
                    if let Err(remove_err) = fs::remove_file(part.as_std_path()) {
                        warn!(%part, error = %remove_err, "failed to remove partial chunk");
                    }
                }
                Err(err)
            }
        }
    }

    fn split(
        &self,
        path: &Utf8Path,
        needed: u64,
        written: &mut Vec<Utf8PathBuf>,
    ) -> Result<(), IdseqError> {
        let source = File::open(path.as_std_path())
            .map_err(|err| IdseqError::Filesystem(format!("open {path}: {err}")))?;
        let mut reader = BufReader::new(source);

        for index in 0..needed {
            let target = part_path(path, index).ok_or_else(|| IdseqError::SplitExhausted {
                path: path.to_string(),
                needed,
                available: MAX_PARTS,
            })?;
            let out = File::create(target.as_std_path())
                .map_err(|err| IdseqError::Filesystem(format!("create {target}: {err}")))?;
            written.push(target.clone());

            let mut writer = BufWriter::new(out);
            let copied = io::copy(&mut (&mut reader).take(self.max_part_size), &mut writer)
                .and_then(|copied| writer.flush().map(|()| copied))
                .map_err(|err| IdseqError::Filesystem(format!("write {target}: {err}")))?;
            if copied == 0 {
                return Err(IdseqError::Filesystem(format!(
                    "{path} ended before part {target}"
                )));
            }
            debug!(part = %target, bytes = copied, "wrote chunk");
        }

        let rest = reader
            .fill_buf()
            .map_err(|err| IdseqError::Filesystem(format!("read {path}: {err}")))?;
        if !rest.is_empty() {
            return Err(IdseqError::Filesystem(format!(
                "{path} grew while it was being split"
            )));
        }
        Ok(())
    }
}

/// Owns the split part files of one sample and deletes whatever is left on drop.
#[derive(Debug, Default)]
pub struct ChunkGuard {
    pending: Vec<Utf8PathBuf>,
}

impl ChunkGuard {
    pub fn new(sets: &[ChunkSet]) -> Self {
        Self {
            pending: sets
                .iter()
                .flat_map(|set| set.split_parts())
                .map(Utf8PathBuf::from)
                .collect(),
        }
    }

    /// Takes ownership of the split parts of one more set.
    pub fn track(&mut self, set: &ChunkSet) {
        self.pending
            .extend(set.split_parts().map(Utf8PathBuf::from));
    }

    pub fn pending(&self) -> &[Utf8PathBuf] {
        &self.pending
    }

    /// Deletes one part once its transfer is confirmed. Non-split paths are ignored.
    pub fn release(&mut self, part: &str) {
        if let Some(index) = self.pending.iter().position(|path| path.as_str() == part) {
            let path = self.pending.remove(index);
            remove_part(&path);
        }
    }

    pub fn cleanup(&mut self) {
        for path in self.pending.drain(..) {
            remove_part(&path);
        }
    }
}

impl Drop for ChunkGuard {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn remove_part(path: &Utf8Path) {
    match fs::remove_file(path.as_std_path()) {
        Ok(()) => debug!(%path, "removed chunk"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(%path, error = %err, "failed to remove chunk"),
    }
}
