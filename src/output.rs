use std::io::{self, Write};

use serde::Serialize;
use tracing::debug;

use crate::app::{ProgressEvent, ProgressSink, RunReport, SampleStatus};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards pipeline phases to the log; byte progress is drawn by the transfer bars.
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => debug!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => debug!("{}", event.message),
        }
    }
}

pub fn print_summary(report: &RunReport) {
    let count = |status: SampleStatus| {
        report
            .samples
            .iter()
            .filter(|sample| sample.status == status)
            .count()
    };
    println!("\nUpload summary for project {}:", report.project.name);
    println!("  uploaded:           {}", count(SampleStatus::Uploaded));
    println!("  processing on IDseq: {}", count(SampleStatus::ProcessingAsync));
    println!("  fetched by IDseq:   {}", count(SampleStatus::RemoteSource));
    println!("  failed:             {}", count(SampleStatus::Failed));
    for sample in report
        .samples
        .iter()
        .filter(|sample| sample.status == SampleStatus::Failed)
    {
        println!(
            "    {}: {}",
            sample.name,
            sample.error.as_deref().unwrap_or("unknown error")
        );
    }
}
