use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

pub const NO_SAMPLES_HELP: &str = "Files can have extensions fastq/fq/fasta/fa with optionally the \
additional extension gz. If the folder you specified is flat, paired files need to be indicated \
using the labels _R1 and _R2 before the extension, otherwise each file will be treated as a \
separate sample. Sample names will be derived from file names with the extensions and any R1/R2 \
labels trimmed off. Alternatively, your folder can be structured to have one subfolder per \
sample. In that case, the name of the subfolder will be used as the sample name.";

#[derive(Debug, Error, Diagnostic)]
pub enum IdseqError {
    #[error("failed to list {root}: {message}")]
    Discovery { root: String, message: String },

    #[error("no fastq/fasta samples found under {root}")]
    NoSamplesFound {
        root: String,
        #[help]
        guidance: String,
    },

    #[error("{0}")]
    Validation(String),

    #[error("server rejected sample {sample}: {message}")]
    RemoteRejection { sample: String, message: String },

    #[error("transfer of {part} failed: {message}")]
    Transfer { part: String, message: String },

    #[error("{path} needs {needed} parts but only {available} part names are available")]
    SplitExhausted {
        path: String,
        needed: u64,
        available: u64,
    },

    #[error("IDseq request failed: {0}")]
    Http(String),

    #[error("IDseq returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid metadata file: {0}")]
    Metadata(String),

    #[error("project not found: {name} (available: {available})")]
    ProjectNotFound { name: String, available: String },

    #[error("{0}")]
    Prompt(String),

    #[error("upload aborted by user")]
    Aborted,
}

impl IdseqError {
    pub fn no_samples(root: &str) -> Self {
        IdseqError::NoSamplesFound {
            root: root.to_string(),
            guidance: NO_SAMPLES_HELP.to_string(),
        }
    }

    /// Failures after which the sample may be left in a "waiting" state remotely.
    pub fn is_network(&self) -> bool {
        matches!(self, IdseqError::Http(_) | IdseqError::Transfer { .. })
    }
}
