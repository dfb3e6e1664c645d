use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::api::{CreateEndpoint, IdseqApi};
use crate::config::{Aliases, ResolvedConfig};
use crate::domain::{
    ACCEPTED_FORMATS, MetadataRecord, Project, Sample, SampleFiles, SequenceFile, is_sequence_file,
};
use crate::error::IdseqError;
use crate::locations::EnricherOptions;
use crate::metadata::{MetadataOptions, MetadataValidator};
use crate::pairing::detect_samples;
use crate::prompt::Interaction;
use crate::scan::{ObjectLister, PathScanner};
use crate::upload::{UploadOptions, UploadOrchestrator, UploadOutcome};

pub const NETWORK_ERROR_GUIDANCE: &str = "There was a network error. Please check your network \
connection and try again.\nYour sample may say \"Waiting\" on IDseq but likely needs to be \
re-uploaded (under a different name).";

const USER_AGREEMENT: &str = "\nI agree that the data I am uploading to IDseq has been lawfully \
collected and that I have all the necessary consents, permissions, and authorizations needed to \
collect, share and export data to IDseq as outlined in the Terms and Data Privacy Notice.";

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub accept_all: bool,
    pub skip_geosearch: bool,
    pub show_progress: bool,
    pub max_part_size: u64,
}

impl RunOptions {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            accept_all: false,
            skip_geosearch: false,
            show_progress: true,
            max_part_size: config.max_part_size,
        }
    }
}

/// What the operator asked for: a folder/prefix of samples, or one named sample.
#[derive(Debug, Clone)]
pub enum UploadTarget {
    Bulk {
        root: String,
    },
    Single {
        sample_name: String,
        r1: String,
        r2: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStatus {
    Uploaded,
    ProcessingAsync,
    RemoteSource,
    Failed,
}

impl From<UploadOutcome> for SampleStatus {
    fn from(outcome: UploadOutcome) -> Self {
        match outcome {
            UploadOutcome::Uploaded => SampleStatus::Uploaded,
            UploadOutcome::ProcessingAsync => SampleStatus::ProcessingAsync,
            UploadOutcome::RemoteSource => SampleStatus::RemoteSource,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleReport {
    pub name: String,
    pub files: Vec<String>,
    pub status: SampleStatus,
    pub error: Option<String>,
    pub network_error: bool,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub project: Project,
    pub started_at: String,
    pub finished_at: String,
    pub samples: Vec<SampleReport>,
}

impl RunReport {
    pub fn failed(&self) -> usize {
        self.samples
            .iter()
            .filter(|sample| sample.status == SampleStatus::Failed)
            .count()
    }
}

pub struct App<A: IdseqApi, L: ObjectLister> {
    api: A,
    scanner: PathScanner<L>,
    aliases: Aliases,
    base_url: String,
}

impl<A: IdseqApi, L: ObjectLister> App<A, L> {
    pub fn new(api: A, lister: L, config: &ResolvedConfig) -> Self {
        Self {
            api,
            scanner: PathScanner::new(lister),
            aliases: config.aliases.clone(),
            base_url: config.url.clone(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Exact name first, then a case-insensitive match.
    pub fn resolve_project(&self, name: &str) -> Result<Project, IdseqError> {
        let projects = self.api.list_projects()?;
        let wanted = name.trim();
        if let Some(project) = projects.iter().find(|project| project.name == wanted) {
            return Ok(project.clone());
        }
        if let Some(project) = projects
            .iter()
            .find(|project| project.name.eq_ignore_ascii_case(wanted))
        {
            return Ok(project.clone());
        }
        Err(IdseqError::ProjectNotFound {
            name: wanted.to_string(),
            available: projects
                .iter()
                .map(|project| project.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    pub fn collect_samples(&self, target: &UploadTarget) -> Result<Vec<SampleFiles>, IdseqError> {
        match target {
            UploadTarget::Bulk { root } => detect_samples(&self.scanner, root),
            UploadTarget::Single {
                sample_name,
                r1,
                r2,
            } => {
                let mut files = vec![single_file(r1, "R1")?];
                if let Some(r2) = r2 {
                    files.push(single_file(r2, "R2")?);
                }
                Ok(vec![SampleFiles {
                    name: sample_name.clone(),
                    files,
                }])
            }
        }
    }

    /// Runs the whole pipeline. Failures inside a single sample end up in the
    /// report; only setup failures (project, discovery, metadata, agreement)
    /// are returned as errors.
    pub fn run(
        &self,
        project_name: &str,
        target: &UploadTarget,
        metadata_path: &str,
        options: &RunOptions,
        interaction: &dyn Interaction,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, IdseqError> {
        let started_at = now_rfc3339();
        sink.event(ProgressEvent {
            message: "phase=Project; resolving project".to_string(),
            elapsed: None,
        });
        let project = self.resolve_project(project_name)?;
        interaction.notify(&format!("\n{:20}{}", "PROJECT:", project.name));
        info!(project = %project.name, id = project.id, "project resolved");

        let samples = self.collect_samples(target)?;
        interaction.notify("\nSamples and files to upload:");
        for sample in &samples {
            interaction.notify(&sample_files_info(sample));
        }

        let names: Vec<String> = samples.iter().map(|sample| sample.name.clone()).collect();
        let validator = MetadataValidator::new(
            &self.api,
            interaction,
            MetadataOptions {
                skip_geosearch: options.skip_geosearch,
                enricher: EnricherOptions {
                    accept_all: options.accept_all,
                    ..EnricherOptions::default()
                },
                aliases: self.aliases.clone(),
                base_url: self.base_url.clone(),
            },
        );
        let mut records = validator.validate(metadata_path, &names, project.id)?;

        if !options.accept_all {
            get_user_agreement(interaction)?;
        }

        let endpoint = match target {
            UploadTarget::Bulk { .. } => CreateEndpoint::Bulk,
            UploadTarget::Single { .. } => CreateEndpoint::Single,
        };
        let orchestrator = UploadOrchestrator::new(
            &self.api,
            sink,
            UploadOptions {
                max_part_size: options.max_part_size,
                endpoint,
                show_progress: options.show_progress,
            },
        );

        let mut reports = Vec::with_capacity(samples.len());
        for files in samples {
            let metadata = records.remove(&files.name).unwrap_or_default();
            let sample = self.build_sample(files, project.id, metadata);
            reports.push(upload_one(&orchestrator, &sample, interaction));
        }

        Ok(RunReport {
            project,
            started_at,
            finished_at: now_rfc3339(),
            samples: reports,
        })
    }

    fn build_sample(&self, files: SampleFiles, project_id: u64, metadata: MetadataRecord) -> Sample {
        let host_genome = metadata
            .find_text(&self.aliases.host_genome)
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_string);
        Sample {
            name: files.name,
            project_id,
            files: files.files,
            host_genome,
            metadata,
        }
    }
}

fn upload_one<A: IdseqApi>(
    orchestrator: &UploadOrchestrator<'_, A>,
    sample: &Sample,
    interaction: &dyn Interaction,
) -> SampleReport {
    let started = Instant::now();
    let files = sample
        .files
        .iter()
        .map(|file| file.locator().to_string())
        .collect();
    match orchestrator.upload_sample(sample) {
        Ok(outcome) => {
            match outcome {
                UploadOutcome::ProcessingAsync => interaction.notify(&format!(
                    "\n\"{}\" is still being assembled on IDseq and will appear shortly.",
                    sample.name
                )),
                UploadOutcome::RemoteSource => interaction.notify(&format!(
                    "\n\"{}\" was submitted; IDseq will fetch its files directly.",
                    sample.name
                )),
                UploadOutcome::Uploaded => {
                    interaction.notify(&format!("\nUploaded \"{}\".", sample.name))
                }
            }
            SampleReport {
                name: sample.name.clone(),
                files,
                status: outcome.into(),
                error: None,
                network_error: false,
                elapsed_ms: started.elapsed().as_millis(),
            }
        }
        Err(err) => {
            warn!(sample = %sample.name, error = %err, "sample upload failed");
            interaction.notify(&format!(
                "\nFailed to upload \"{}\"\nError: {err}",
                sample.name
            ));
            let network_error = err.is_network();
            if network_error {
                interaction.notify(&format!("\n{NETWORK_ERROR_GUIDANCE}"));
            }
            SampleReport {
                name: sample.name.clone(),
                files,
                status: SampleStatus::Failed,
                error: Some(err.to_string()),
                network_error,
                elapsed_ms: started.elapsed().as_millis(),
            }
        }
    }
}

/// A single-mode path must look like a sequence file before it is stat'ed.
fn single_file(locator: &str, label: &str) -> Result<SequenceFile, IdseqError> {
    if !is_sequence_file(locator) {
        return Err(IdseqError::Validation(format!(
            "{label} ({locator}) file does not appear to be a fastq or fasta file. Accepted \
             formats: {ACCEPTED_FORMATS}"
        )));
    }
    SequenceFile::from_locator(locator)
}

pub fn sample_files_info(sample: &SampleFiles) -> String {
    let files = sample
        .files
        .iter()
        .map(SequenceFile::locator)
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "{:20}{}\n{:20}{}",
        "Sample name:", sample.name, "Input files:", files
    )
}

pub fn get_user_agreement(interaction: &dyn Interaction) -> Result<(), IdseqError> {
    interaction.notify(USER_AGREEMENT);
    if interaction.confirm("Do you agree?")? {
        Ok(())
    } else {
        Err(IdseqError::Aborted)
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
