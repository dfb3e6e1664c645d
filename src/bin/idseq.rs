use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use idseq_cli::api::IdseqHttpClient;
use idseq_cli::app::{App, RunOptions, UploadTarget};
use idseq_cli::config::{ConfigLoader, Overrides};
use idseq_cli::error::IdseqError;
use idseq_cli::output::{ConsoleProgress, JsonOutput, OutputMode, print_summary};
use idseq_cli::prompt::{AutoAccept, ConsoleInteraction, Interaction, required_input};
use idseq_cli::scan::AwsCliLister;

const INSTRUCTIONS_URL: &str = "https://idseq.net/cli_user_instructions";

#[derive(Parser)]
#[command(name = "idseq")]
#[command(
    about = "Submit samples to IDseq. (Accepts fastq or fasta files, single or paired, gzipped or not.)"
)]
#[command(version, author)]
struct Cli {
    /// Project name. Make sure the project is created on the website.
    #[arg(short = 'p', long, value_name = "name")]
    project: Option<String>,

    /// Sample name. It should be unique within a project. Ignored for bulk uploads.
    #[arg(short = 's', long, value_name = "name")]
    sample_name: Option<String>,

    /// Metadata local file path.
    #[arg(short = 'm', long, value_name = "file")]
    metadata: Option<String>,

    /// IDseq website url, https://idseq.net by default.
    #[arg(short = 'u', long, value_name = "url")]
    url: Option<String>,

    /// Your login email for the IDseq website.
    #[arg(short = 'e', long, value_name = "email")]
    email: Option<String>,

    /// Your authentication token.
    #[arg(short = 't', long, value_name = "token")]
    token: Option<String>,

    /// Read 1 file path. Could be a local file or s3 path.
    #[arg(long, value_name = "file")]
    r1: Option<String>,

    /// Read 2 file path (optional). Could be a local file or s3 path.
    #[arg(long, value_name = "file")]
    r2: Option<String>,

    /// Input folder or s3 prefix for bulk upload.
    #[arg(short = 'b', long, value_name = "folder")]
    bulk: Option<String>,

    /// Break up uploaded files into chunks of this size in MB.
    #[arg(long = "uploadchunksize", value_name = "value")]
    upload_chunk_size: Option<u64>,

    /// Automatically accept confirmation messages, including geosearch suggestions.
    #[arg(long)]
    accept_all: bool,

    /// Skip searching for geo-locations via the third-party API.
    #[arg(long)]
    skip_geosearch: bool,

    /// Path to an idseq.json config file.
    #[arg(long, value_name = "file")]
    config: Option<String>,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Hide per-part transfer progress bars.
    #[arg(long)]
    no_progress: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(idseq) = report.downcast_ref::<IdseqError>() {
            return ExitCode::from(map_exit_code(idseq));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &IdseqError) -> u8 {
    match error {
        IdseqError::NoSamplesFound { .. }
        | IdseqError::ProjectNotFound { .. }
        | IdseqError::Aborted => 2,
        IdseqError::Http(_)
        | IdseqError::Status { .. }
        | IdseqError::Transfer { .. }
        | IdseqError::Discovery { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Interactive
    };

    let flags = Overrides {
        url: cli.url.clone(),
        email: cli.email.clone(),
        token: cli.token.clone(),
        upload_chunk_size_mb: cli.upload_chunk_size,
    };
    let config = ConfigLoader::resolve(cli.config.as_deref(), flags)?;

    let console = ConsoleInteraction;
    let interaction: &dyn Interaction = if cli.accept_all {
        &AutoAccept
    } else {
        &console
    };

    console.notify(&format!(
        "Instructions: {INSTRUCTIONS_URL}\nStarting IDseq command line..."
    ));

    let email = match config.email.clone() {
        Some(email) => email,
        None => required_input(&console, "\nEnter your IDseq account email: ")?,
    };
    let token = match config.token.clone() {
        Some(token) => token,
        None => required_input(
            &console,
            &format!(
                "\nEnter your IDseq authentication token:\n(see instructions at \
                 {INSTRUCTIONS_URL}): "
            ),
        )?,
    };
    let project = match cli.project.clone() {
        Some(project) => project,
        None => required_input(&console, "\nEnter the project name: ")?,
    };
    let target = upload_target(&cli, &console)?;
    let metadata = match cli.metadata.clone() {
        Some(metadata) => metadata,
        None => required_input(&console, "\nEnter the metadata file path: ")?,
    };

    let api = IdseqHttpClient::new(&config.url, &email, &token)?;
    let app = App::new(api, AwsCliLister::new(), &config);
    let options = RunOptions {
        accept_all: cli.accept_all,
        skip_geosearch: cli.skip_geosearch,
        show_progress: !cli.no_progress && matches!(output_mode, OutputMode::Interactive),
        ..RunOptions::from_config(&config)
    };

    match output_mode {
        OutputMode::Json => {
            let report = app.run(&project, &target, &metadata, &options, interaction, &JsonOutput)?;
            JsonOutput::print_report(&report).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let report =
                app.run(&project, &target, &metadata, &options, interaction, &ConsoleProgress)?;
            print_summary(&report);
        }
    }
    Ok(())
}

/// Bulk when `--bulk` is set or the operator leaves the sample name empty.
fn upload_target(cli: &Cli, console: &ConsoleInteraction) -> Result<UploadTarget, IdseqError> {
    if let Some(root) = &cli.bulk {
        return Ok(UploadTarget::Bulk { root: root.clone() });
    }
    let sample_name = match &cli.sample_name {
        Some(name) => name.clone(),
        None => {
            let answer =
                console.ask("\nEnter the sample name (or press Enter to use bulk mode): ")?;
            if answer.is_empty() {
                return Ok(UploadTarget::Bulk {
                    root: ".".to_string(),
                });
            }
            answer
        }
    };
    let r1 = match &cli.r1 {
        Some(r1) => r1.clone(),
        None => required_input(
            console,
            "\nEnter the first file:\n(first in a paired-end run or sole file in a single-end run): ",
        )?,
    };
    let r2 = match &cli.r2 {
        Some(r2) => Some(r2.clone()),
        None if cli.sample_name.is_some() => None,
        None => {
            let answer = console.ask(
                "\nEnter the second paired-end file if applicable (or press Enter to skip): ",
            )?;
            (!answer.is_empty()).then_some(answer)
        }
    };
    Ok(UploadTarget::Single {
        sample_name,
        r1,
        r2,
    })
}
