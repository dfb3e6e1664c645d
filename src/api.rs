use std::collections::BTreeMap;
use std::io::Read;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Body, Client, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::{LocationMatch, MetadataRecord, Project, SourceKind};
use crate::error::IdseqError;
use crate::metadata::MetadataTable;

pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const EMAIL_HEADER: &str = "x-user-email";
pub const TOKEN_HEADER: &str = "x-user-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateEndpoint {
    Single,
    Bulk,
}

impl CreateEndpoint {
    pub fn path(&self) -> &'static str {
        match self {
            CreateEndpoint::Single => "samples",
            CreateEndpoint::Bulk => "samples/bulk_upload_with_metadata",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputFileAttributes {
    pub name: String,
    pub source: String,
    pub source_type: SourceKind,
    /// Part basenames in split order, joined with `", "`.
    pub parts: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleAttributes {
    pub name: String,
    pub project_id: u64,
    pub input_files_attributes: Vec<InputFileAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_genome_name: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateSamplesRequest {
    pub samples: Vec<SampleAttributes>,
    pub metadata: BTreeMap<String, MetadataRecord>,
    pub client: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreatedInputFile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub presigned_url: Option<String>,
    #[serde(default)]
    pub parts: Option<String>,
}

impl CreatedInputFile {
    pub fn presigned_urls(&self) -> Vec<&str> {
        split_joined(self.presigned_url.as_deref())
    }

    pub fn part_names(&self) -> Vec<&str> {
        split_joined(self.parts.as_deref())
    }
}

/// Lists come back joined with `", "`, the same separator the request uses.
pub const LIST_SEPARATOR: &str = ", ";

fn split_joined(value: Option<&str>) -> Vec<&str> {
    value
        .map(|value| {
            value
                .trim()
                .split(LIST_SEPARATOR)
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreatedSample {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub input_files: Vec<CreatedInputFile>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CreateResponse {
    Bulk { samples: Vec<CreatedSample> },
    Single(CreatedSample),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRef {
    pub name: String,
    pub project_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidateMetadataRequest {
    pub metadata: MetadataTable,
    pub samples: Vec<SampleRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ValidationResponse {
    #[serde(default)]
    pub issues: ValidationIssues,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ValidationIssues {
    #[serde(default)]
    pub errors: Vec<Issue>,
    #[serde(default)]
    pub warnings: Vec<Issue>,
}

impl ValidationIssues {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Issue {
    Text(String),
    Structured(StructuredIssue),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StructuredIssue {
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
    #[serde(default, rename = "isGroup")]
    pub is_group: bool,
}

impl Issue {
    pub fn render(&self) -> String {
        match self {
            Issue::Text(text) => text.clone(),
            Issue::Structured(issue) => {
                let mut lines = Vec::new();
                if let Some(caption) = &issue.caption {
                    lines.push(caption.clone());
                }
                if !issue.headers.is_empty() {
                    lines.push(format!("  {}", issue.headers.join(" | ")));
                }
                for row in &issue.rows {
                    let cells = row.iter().map(value_text).collect::<Vec<_>>();
                    lines.push(format!("  {}", cells.join(" | ")));
                }
                lines.join("\n")
            }
        }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Raw bytes of one part, streamed to a presigned target.
pub struct PartBody {
    pub name: String,
    pub len: u64,
    pub reader: Box<dyn Read + Send>,
}

pub trait IdseqApi: Send + Sync {
    fn list_projects(&self) -> Result<Vec<Project>, IdseqError>;
    fn create_sample(
        &self,
        endpoint: CreateEndpoint,
        request: &CreateSamplesRequest,
    ) -> Result<CreatedSample, IdseqError>;
    fn upload_part(&self, presigned_url: &str, body: PartBody) -> Result<(), IdseqError>;
    fn finalize_sample(&self, id: u64, name: &str) -> Result<(), IdseqError>;
    fn validate_metadata(
        &self,
        request: &ValidateMetadataRequest,
    ) -> Result<ValidationIssues, IdseqError>;
    fn search_location(&self, query: &str) -> Result<Option<LocationMatch>, IdseqError>;
}

#[derive(Clone)]
pub struct IdseqHttpClient {
    client: Client,
    transfer: Client,
    base_url: String,
}

impl IdseqHttpClient {
    pub fn new(base_url: &str, email: &str, token: &str) -> Result<Self, IdseqError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("idseq-cli/{CLIENT_VERSION}"))
                .map_err(|err| IdseqError::Http(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            EMAIL_HEADER,
            HeaderValue::from_str(email.trim())
                .map_err(|_| IdseqError::Validation("email contains invalid characters".to_string()))?,
        );
        let mut token = HeaderValue::from_str(token.trim())
            .map_err(|_| IdseqError::Validation("token contains invalid characters".to_string()))?;
        token.set_sensitive(true);
        headers.insert(TOKEN_HEADER, token);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| IdseqError::Http(err.to_string()))?;
        // Presigned targets carry their own authorization and parts may take hours.
        let transfer = Client::builder()
            .timeout(None::<Duration>)
            .build()
            .map_err(|err| IdseqError::Http(err.to_string()))?;

        Ok(Self {
            client,
            transfer,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn read_json(&self, response: Response) -> Result<Value, IdseqError> {
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response));
        }
        response
            .json::<Value>()
            .map_err(|err| IdseqError::Http(err.to_string()))
    }
}

impl IdseqApi for IdseqHttpClient {
    fn list_projects(&self) -> Result<Vec<Project>, IdseqError> {
        let response = self
            .client
            .get(self.url("projects"))
            .send()
            .map_err(|err| IdseqError::Http(err.to_string()))?;
        let body = self.read_json(response)?;
        let projects = match body {
            Value::Object(mut map) => map.remove("projects").unwrap_or(Value::Array(Vec::new())),
            other => other,
        };
        serde_json::from_value(projects).map_err(|err| IdseqError::Http(err.to_string()))
    }

    fn create_sample(
        &self,
        endpoint: CreateEndpoint,
        request: &CreateSamplesRequest,
    ) -> Result<CreatedSample, IdseqError> {
        let sample = request
            .samples
            .first()
            .map(|sample| sample.name.clone())
            .unwrap_or_default();
        let response = self
            .client
            .post(self.url(endpoint.path()))
            .json(request)
            .send()
            .map_err(|err| IdseqError::Http(err.to_string()))?;
        let status = response.status();
        let body = response.json::<Value>().unwrap_or(Value::Null);
        debug!(%status, "sample creation response");
        if !status.is_success() {
            return Err(IdseqError::RemoteRejection {
                sample,
                message: format!("status {}: {}", status.as_u16(), body),
            });
        }
        parse_created_sample(&sample, body)
    }

    fn upload_part(&self, presigned_url: &str, body: PartBody) -> Result<(), IdseqError> {
        let name = body.name;
        let response = self
            .transfer
            .put(presigned_url)
            .body(Body::sized(body.reader, body.len))
            .send()
            .map_err(|err| IdseqError::Transfer {
                part: name.clone(),
                message: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(IdseqError::Transfer {
                part: name,
                message: format!("status {}", response.status().as_u16()),
            });
        }
        Ok(())
    }

    fn finalize_sample(&self, id: u64, name: &str) -> Result<(), IdseqError> {
        let update = serde_json::json!({
            "id": id,
            "name": name,
            "status": "uploaded",
        });
        let response = self
            .client
            .put(self.url(&format!("samples/{id}")))
            .json(&update)
            .send()
            .map_err(|err| IdseqError::Http(err.to_string()))?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(status_error(status, response));
        }
        Ok(())
    }

    fn validate_metadata(
        &self,
        request: &ValidateMetadataRequest,
    ) -> Result<ValidationIssues, IdseqError> {
        let response = self
            .client
            .post(self.url("metadata/validate_csv_for_new_samples"))
            .json(request)
            .send()
            .map_err(|err| IdseqError::Http(err.to_string()))?;
        let body = self.read_json(response)?;
        let parsed: ValidationResponse =
            serde_json::from_value(body).map_err(|err| IdseqError::Http(err.to_string()))?;
        Ok(parsed.issues)
    }

    fn search_location(&self, query: &str) -> Result<Option<LocationMatch>, IdseqError> {
        let response = self
            .client
            .get(self.url("locations/external_search"))
            .query(&[("query", query), ("limit", "1")])
            .send()
            .map_err(|err| IdseqError::Http(err.to_string()))?;
        let body = self.read_json(response)?;
        let mut matches: Vec<LocationMatch> =
            serde_json::from_value(body).map_err(|err| IdseqError::Http(err.to_string()))?;
        Ok((!matches.is_empty()).then(|| matches.remove(0)))
    }
}

fn status_error(status: StatusCode, response: Response) -> IdseqError {
    let message = response
        .text()
        .unwrap_or_else(|_| "IDseq request failed".to_string());
    IdseqError::Status {
        status: status.as_u16(),
        message,
    }
}

/// Accepts both the bulk (`{"samples": [...]}`) and single (sample object) shapes.
/// A non-empty `errors` entry rejects the sample even on a 2xx status.
pub fn parse_created_sample(sample: &str, body: Value) -> Result<CreatedSample, IdseqError> {
    if let Some(errors) = body.get("errors") {
        let has_errors = match errors {
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
            Value::String(text) => !text.is_empty(),
            Value::Null => false,
            _ => true,
        };
        if has_errors {
            return Err(IdseqError::RemoteRejection {
                sample: sample.to_string(),
                message: errors.to_string(),
            });
        }
    }
    let parsed: CreateResponse =
        serde_json::from_value(body).map_err(|err| IdseqError::RemoteRejection {
            sample: sample.to_string(),
            message: format!("unexpected response: {err}"),
        })?;
    match parsed {
        CreateResponse::Single(created) => Ok(created),
        CreateResponse::Bulk { samples } => samples
            .into_iter()
            .next()
            .ok_or_else(|| IdseqError::RemoteRejection {
                sample: sample.to_string(),
                message: "response listed no samples".to_string(),
            }),
    }
}
