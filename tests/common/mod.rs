#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io::Read;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use idseq_cli::api::{
    CreateEndpoint, CreateSamplesRequest, CreatedInputFile, CreatedSample, IdseqApi, PartBody,
    ValidateMetadataRequest, ValidationIssues,
};
use idseq_cli::app::{ProgressEvent, ProgressSink};
use idseq_cli::domain::{LocationMatch, Project, SourceKind};
use idseq_cli::error::IdseqError;
use idseq_cli::prompt::Interaction;
use idseq_cli::scan::{ObjectEntry, ObjectLister};

#[derive(Debug, Clone)]
pub struct RecordedPart {
    pub url: String,
    pub name: String,
    pub len: u64,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
pub struct MockApi {
    pub projects: Vec<Project>,
    pub reject_create: Option<String>,
    /// Zero-based index of the part transfer that fails.
    pub fail_upload_at: Option<usize>,
    pub finalize_status: Option<u16>,
    /// Popped once per validation call; clean once exhausted.
    pub validation_results: Mutex<VecDeque<ValidationIssues>>,
    pub locations: BTreeMap<String, LocationMatch>,
    pub failing_locations: BTreeSet<String>,
    /// Holds each location lookup open this long.
    pub search_delay: Option<Duration>,
    pub searches_in_flight: AtomicUsize,
    pub peak_searches_in_flight: AtomicUsize,

    pub create_calls: Mutex<Vec<(CreateEndpoint, CreateSamplesRequest)>>,
    pub uploads: Mutex<Vec<RecordedPart>>,
    pub finalize_calls: Mutex<Vec<(u64, String)>>,
    pub validate_calls: Mutex<Vec<ValidateMetadataRequest>>,
    pub search_calls: Mutex<Vec<String>>,
}

impl MockApi {
    pub fn with_projects(names: &[(u64, &str)]) -> Self {
        Self {
            projects: names
                .iter()
                .map(|(id, name)| Project {
                    id: *id,
                    name: name.to_string(),
                })
                .collect(),
            ..Self::default()
        }
    }

    pub fn network_calls(&self) -> usize {
        self.create_calls.lock().unwrap().len()
            + self.uploads.lock().unwrap().len()
            + self.finalize_calls.lock().unwrap().len()
    }
}

pub fn presigned_url(part: &str) -> String {
    format!("https://uploads.test/{part}")
}

impl IdseqApi for MockApi {
    fn list_projects(&self) -> Result<Vec<Project>, IdseqError> {
        Ok(self.projects.clone())
    }

    fn create_sample(
        &self,
        endpoint: CreateEndpoint,
        request: &CreateSamplesRequest,
    ) -> Result<CreatedSample, IdseqError> {
        let mut calls = self.create_calls.lock().unwrap();
        calls.push((endpoint, request.clone()));
        let sample = &request.samples[0];
        if let Some(message) = &self.reject_create {
            return Err(IdseqError::RemoteRejection {
                sample: sample.name.clone(),
                message: message.clone(),
            });
        }
        let input_files = sample
            .input_files_attributes
            .iter()
            .map(|file| CreatedInputFile {
                name: Some(file.name.clone()),
                presigned_url: (file.source_type == SourceKind::Local).then(|| {
                    file.parts
                        .split(", ")
                        .map(presigned_url)
                        .collect::<Vec<_>>()
                        .join(", ")
                }),
                parts: Some(file.parts.clone()),
            })
            .collect();
        Ok(CreatedSample {
            id: 100 + calls.len() as u64,
            name: Some(sample.name.clone()),
            input_files,
        })
    }

    fn upload_part(&self, presigned_url: &str, mut body: PartBody) -> Result<(), IdseqError> {
        let mut uploads = self.uploads.lock().unwrap();
        let mut bytes = Vec::new();
        body.reader.read_to_end(&mut bytes).unwrap();
        uploads.push(RecordedPart {
            url: presigned_url.to_string(),
            name: body.name.clone(),
            len: body.len,
            bytes,
        });
        if self.fail_upload_at == Some(uploads.len() - 1) {
            return Err(IdseqError::Transfer {
                part: body.name,
                message: "connection reset".to_string(),
            });
        }
        Ok(())
    }

    fn finalize_sample(&self, id: u64, name: &str) -> Result<(), IdseqError> {
        self.finalize_calls
            .lock()
            .unwrap()
            .push((id, name.to_string()));
        match self.finalize_status {
            Some(status) => Err(IdseqError::Status {
                status,
                message: "finalize failed".to_string(),
            }),
            None => Ok(()),
        }
    }

    fn validate_metadata(
        &self,
        request: &ValidateMetadataRequest,
    ) -> Result<ValidationIssues, IdseqError> {
        self.validate_calls.lock().unwrap().push(request.clone());
        Ok(self
            .validation_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    fn search_location(&self, query: &str) -> Result<Option<LocationMatch>, IdseqError> {
        self.search_calls.lock().unwrap().push(query.to_string());
        let in_flight = self.searches_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_searches_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        if let Some(delay) = self.search_delay {
            thread::sleep(delay);
        }
        self.searches_in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.failing_locations.contains(query) {
            return Err(IdseqError::Http("geosearch unavailable".to_string()));
        }
        Ok(self.locations.get(query).cloned())
    }
}

/// Answers questions from scripted queues and records every notice.
#[derive(Default)]
pub struct ScriptedInteraction {
    pub answers: Mutex<VecDeque<String>>,
    pub confirmations: Mutex<VecDeque<bool>>,
    pub questions: Mutex<Vec<String>>,
    pub prompts: Mutex<Vec<String>>,
    pub notices: Mutex<Vec<String>>,
}

impl ScriptedInteraction {
    pub fn confirming(answers: &[bool]) -> Self {
        Self {
            confirmations: Mutex::new(answers.iter().copied().collect()),
            ..Self::default()
        }
    }

    pub fn answering(answers: &[&str]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().map(|answer| answer.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn notices(&self) -> String {
        self.notices.lock().unwrap().join("\n")
    }
}

impl Interaction for ScriptedInteraction {
    fn confirm(&self, question: &str) -> Result<bool, IdseqError> {
        self.questions.lock().unwrap().push(question.to_string());
        self.confirmations
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| IdseqError::Prompt("no scripted confirmation left".to_string()))
    }

    fn ask(&self, prompt: &str) -> Result<String, IdseqError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| IdseqError::Prompt("no scripted answer left".to_string()))
    }

    fn notify(&self, message: &str) {
        self.notices.lock().unwrap().push(message.to_string());
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event.message);
    }
}

/// Serves a fixed object listing for `s3://` roots.
#[derive(Default)]
pub struct MockLister {
    pub objects: Vec<ObjectEntry>,
    pub calls: Mutex<Vec<String>>,
}

impl MockLister {
    pub fn with_objects(uris: &[&str]) -> Self {
        Self {
            objects: uris
                .iter()
                .map(|uri| ObjectEntry {
                    uri: uri.to_string(),
                    size: 1024,
                })
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ObjectLister for MockLister {
    fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, IdseqError> {
        self.calls.lock().unwrap().push(prefix.to_string());
        Ok(self
            .objects
            .iter()
            .filter(|entry| entry.uri.starts_with(prefix))
            .cloned()
            .collect())
    }
}

pub fn write_file(dir: &Path, relative: &str, contents: &[u8]) -> String {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, contents).unwrap();
    path.to_str().unwrap().to_string()
}

pub fn location(name: &str, geo_level: &str) -> LocationMatch {
    LocationMatch {
        name: name.to_string(),
        geo_level: Some(geo_level.to_string()),
        subdivision_name: None,
        state_name: None,
        country_name: None,
        restricted: false,
        extra: serde_json::Map::new(),
    }
}
