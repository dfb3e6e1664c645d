use std::collections::BTreeMap;
use std::fs::File;
use std::time::Instant;

use camino::Utf8Path;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::{
    CLIENT_VERSION, CreateEndpoint, CreateSamplesRequest, CreatedSample, IdseqApi,
    InputFileAttributes, LIST_SEPARATOR, PartBody, SampleAttributes,
};
use crate::app::{ProgressEvent, ProgressSink};
use crate::chunker::{ChunkGuard, ChunkSet, FileChunker};
use crate::domain::{Sample, SequenceFile};
use crate::error::IdseqError;

const GATEWAY_TIMEOUT: u16 = 504;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Pending,
    Created,
    PartsUploading,
    Finalized,
    Failed,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Finalized | UploadState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadOutcome {
    /// Every part transferred and the sample was marked uploaded.
    Uploaded,
    /// Finalization timed out on a multi-part sample; the server keeps assembling it.
    ProcessingAsync,
    /// Remote sources are fetched by the service itself, nothing was transferred.
    RemoteSource,
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub max_part_size: u64,
    pub endpoint: CreateEndpoint,
    pub show_progress: bool,
}

/// Transient per-sample state, written only by the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct UploadSession {
    pub sample: String,
    pub remote_id: Option<u64>,
    pub targets: Vec<Vec<String>>,
    pub completed_parts: usize,
    pub state: UploadState,
}

impl UploadSession {
    fn new(sample: &str) -> Self {
        Self {
            sample: sample.to_string(),
            remote_id: None,
            targets: Vec::new(),
            completed_parts: 0,
            state: UploadState::Pending,
        }
    }

    fn transition(&mut self, next: UploadState) {
        if self.state.is_terminal() {
            warn!(sample = %self.sample, from = ?self.state, to = ?next, "ignoring transition out of terminal state");
            return;
        }
        debug!(sample = %self.sample, from = ?self.state, to = ?next, "upload state");
        self.state = next;
    }

    pub fn total_parts(&self) -> usize {
        self.targets.iter().map(Vec::len).sum()
    }
}

/// Rejects samples that must not reach the network.
pub fn validate_inputs(files: &[SequenceFile]) -> Result<(), IdseqError> {
    if files.is_empty() || files.len() > 2 {
        return Err(IdseqError::Validation(format!(
            "a sample needs one or two input files, got {}",
            files.len()
        )));
    }
    if let Some(empty) = files
        .iter()
        .find(|file| file.is_local() && file.size() == Some(0))
    {
        return Err(IdseqError::Validation(format!(
            "input file must not be empty: {empty}"
        )));
    }
    if files.len() == 2 && files[0].kind() != files[1].kind() {
        return Err(IdseqError::Validation(
            "input files must be same type".to_string(),
        ));
    }
    Ok(())
}

pub fn build_request(sample: &Sample, chunks: &[ChunkSet]) -> CreateSamplesRequest {
    let attributes = SampleAttributes {
        name: sample.name.clone(),
        project_id: sample.project_id,
        input_files_attributes: chunks
            .iter()
            .map(|set| InputFileAttributes {
                name: set.source().basename().to_string(),
                source: set.source().locator().to_string(),
                source_type: set.source().kind(),
                parts: set.part_basenames().join(LIST_SEPARATOR),
            })
            .collect(),
        host_genome_name: sample.host_genome.clone(),
        status: "created".to_string(),
    };
    let mut metadata = BTreeMap::new();
    metadata.insert(sample.name.clone(), sample.metadata.clone());
    CreateSamplesRequest {
        samples: vec![attributes],
        metadata,
        client: CLIENT_VERSION.to_string(),
    }
}

pub struct UploadOrchestrator<'a, A: IdseqApi> {
    api: &'a A,
    sink: &'a dyn ProgressSink,
    options: UploadOptions,
}

impl<'a, A: IdseqApi> UploadOrchestrator<'a, A> {
    pub fn new(api: &'a A, sink: &'a dyn ProgressSink, options: UploadOptions) -> Self {
        Self { api, sink, options }
    }

    /// Validates, splits and uploads one sample.
    pub fn upload_sample(&self, sample: &Sample) -> Result<UploadOutcome, IdseqError> {
        validate_inputs(&sample.files)?;
        let chunker = FileChunker::new(self.options.max_part_size);
        let mut guard = ChunkGuard::default();
        let mut chunks = Vec::with_capacity(sample.files.len());
        for file in &sample.files {
            let set = chunker.parts(file)?;
            guard.track(&set);
            chunks.push(set);
        }
        self.run(sample, &chunks, guard)
    }

    /// Uploads already-split files. Split parts are deleted whatever the outcome.
    pub fn upload(
        &self,
        sample: &Sample,
        chunks: Vec<ChunkSet>,
    ) -> Result<UploadOutcome, IdseqError> {
        let guard = ChunkGuard::new(&chunks);
        validate_inputs(&sample.files)?;
        self.run(sample, &chunks, guard)
    }

    fn run(
        &self,
        sample: &Sample,
        chunks: &[ChunkSet],
        mut guard: ChunkGuard,
    ) -> Result<UploadOutcome, IdseqError> {
        let mut session = UploadSession::new(&sample.name);
        let started = Instant::now();
        let result = self.drive(sample, chunks, &mut session, &mut guard);
        match &result {
            Ok(outcome) => {
                session.transition(UploadState::Finalized);
                info!(sample = %sample.name, ?outcome, "sample finished");
            }
            Err(err) => {
                session.transition(UploadState::Failed);
                warn!(sample = %sample.name, error = %err, "sample failed, removing chunks");
            }
        }
        guard.cleanup();
        self.sink.event(ProgressEvent {
            message: format!("phase=Done; {} {:?}", sample.name, session.state),
            elapsed: Some(started.elapsed()),
        });
        result
    }

    fn drive(
        &self,
        sample: &Sample,
        chunks: &[ChunkSet],
        session: &mut UploadSession,
        guard: &mut ChunkGuard,
    ) -> Result<UploadOutcome, IdseqError> {
        self.sink.event(ProgressEvent {
            message: format!("phase=Create; creating sample {}", sample.name),
            elapsed: None,
        });
        let request = build_request(sample, chunks);
        let created = self.api.create_sample(self.options.endpoint, &request)?;
        session.remote_id = Some(created.id);
        session.transition(UploadState::Created);
        info!(sample = %sample.name, id = created.id, "created sample entry");

        if !chunks.iter().any(|set| set.source().is_local()) {
            return Ok(UploadOutcome::RemoteSource);
        }

        session.targets = transfer_targets(&sample.name, chunks, &created)?;
        session.transition(UploadState::PartsUploading);
        let total = session.total_parts();
        self.sink.event(ProgressEvent {
            message: format!("phase=Transfer; uploading {} file(s), {total} part(s)", chunks.len()),
            elapsed: None,
        });

        for (set, urls) in chunks.iter().zip(session.targets.clone()) {
            for (part, url) in set.parts().iter().zip(urls) {
                let started = Instant::now();
                self.transfer_part(part, &url, session.completed_parts + 1, total)?;
                session.completed_parts += 1;
                guard.release(part);
                self.sink.event(ProgressEvent {
                    message: format!(
                        "phase=Transfer; {part} ({}/{total})",
                        session.completed_parts
                    ),
                    elapsed: Some(started.elapsed()),
                });
            }
        }

        let multi_part = chunks.iter().any(ChunkSet::is_split);
        match self.api.finalize_sample(created.id, &sample.name) {
            Ok(()) => Ok(UploadOutcome::Uploaded),
            Err(IdseqError::Status { status, .. }) if status == GATEWAY_TIMEOUT && multi_part => {
                info!(sample = %sample.name, "finalization timed out, server is still assembling parts");
                Ok(UploadOutcome::ProcessingAsync)
            }
            Err(IdseqError::Status { status, message }) => Err(IdseqError::RemoteRejection {
                sample: sample.name.clone(),
                message: format!("finalization returned status {status}: {message}"),
            }),
            Err(err) => Err(err),
        }
    }

    fn transfer_part(
        &self,
        part: &str,
        url: &str,
        index: usize,
        total: usize,
    ) -> Result<(), IdseqError> {
        let path = Utf8Path::new(part);
        let file = File::open(path.as_std_path())
            .map_err(|err| IdseqError::Filesystem(format!("open {path}: {err}")))?;
        let len = file
            .metadata()
            .map_err(|err| IdseqError::Filesystem(format!("stat {path}: {err}")))?
            .len();

        let bar = if self.options.show_progress {
            let bar = ProgressBar::new(len);
            if let Ok(style) = ProgressStyle::with_template(
                "{msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
            ) {
                bar.set_style(style.progress_chars("#>-"));
            }
            bar.set_message(format!("{} ({index}/{total})", path.file_name().unwrap_or(part)));
            bar
        } else {
            ProgressBar::hidden()
        };

        let body = PartBody {
            name: part.to_string(),
            len,
            reader: Box::new(bar.wrap_read(file)),
        };
        let result = self.api.upload_part(url, body);
        bar.finish_and_clear();
        result
    }
}

/// One presigned target per part, in the order the parts were submitted.
fn transfer_targets(
    sample: &str,
    chunks: &[ChunkSet],
    created: &CreatedSample,
) -> Result<Vec<Vec<String>>, IdseqError> {
    if created.input_files.len() != chunks.len() {
        return Err(IdseqError::RemoteRejection {
            sample: sample.to_string(),
            message: format!(
                "expected {} input file(s) in response, got {}",
                chunks.len(),
                created.input_files.len()
            ),
        });
    }
    let mut targets = Vec::with_capacity(chunks.len());
    for (set, remote) in chunks.iter().zip(&created.input_files) {
        let urls = remote.presigned_urls();
        if urls.len() != set.parts().len() {
            return Err(IdseqError::RemoteRejection {
                sample: sample.to_string(),
                message: format!(
                    "{} has {} part(s) but {} upload target(s) were issued",
                    set.source().basename(),
                    set.parts().len(),
                    urls.len()
                ),
            });
        }
        let names = remote.part_names();
        if !names.is_empty() && names != set.part_basenames() {
            return Err(IdseqError::RemoteRejection {
                sample: sample.to_string(),
                message: format!("part order mismatch for {}", set.source().basename()),
            });
        }
        targets.push(urls.into_iter().map(str::to_string).collect());
    }
    Ok(targets)
}
