//! CLI binary for docconv.
//!
//! Submits one document through the in-process service, polls the job with a
//! spinner, and prints either the artifact path or the status payload.

use anyhow::{Context, Result};
use clap::Parser;
use docconv::{
    ConversionRequest, ConversionService, JobResult, JobStatus, JobStatusView, PipelineConfig,
    TaskType,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Presentation to PDF via LibreOffice
  docconv slides.pptx --task ppt_to_pdf

  # Scanned PDF to Markdown with Gemini (OCR kicks in automatically)
  GEMINI_API_KEY=... docconv scan.pdf --task pdf_to_markdown --subject Chemistry

  # Word document to Markdown with OpenAI, JSON status on stdout
  docconv notes.docx --task docx_to_markdown --provider openai --json

  # No AI: paragraph styles only
  docconv memo.docx --task doc_to_markdown_simple

TASKS:
  ppt_to_pdf               .ppt .pptx         office engine export
  doc_to_markdown          .doc .docx .pdf    AI structured Markdown
  docx_to_markdown         .doc .docx .pdf    AI structured Markdown
  pdf_to_markdown          .doc .docx .pdf    AI structured Markdown
  doc_to_markdown_simple   .doc .docx         style-based Markdown, no AI

ENVIRONMENT VARIABLES:
  AI_PROVIDER              Default provider (gemini, openai)
  GEMINI_API_KEY           Google Gemini API key
  OPENAI_API_KEY           OpenAI API key
  GEMINI_MODEL_NAME        Default Gemini model
  OPENAI_MODEL_NAME        Default OpenAI model
  DOCCONV_INPUT_DIR        Upload directory        (default temp_files)
  DOCCONV_OUTPUT_DIR       Artifact directory      (default output_files)
  DOCCONV_OCR_THRESHOLD    PDFs with this many chars or fewer are OCR'd (default 100)
  DOCCONV_OCR_LANGUAGES    tesseract languages     (default eng+chi_sim)
  TESSERACT_PATH           tesseract binary
  LIBREOFFICE_PATH         soffice binary
  PDFIUM_LIB_PATH          Directory holding libpdfium
"#;

/// Convert office and PDF documents to PDF or structured Markdown.
#[derive(Parser, Debug)]
#[command(
    name = "docconv",
    version,
    about = "Convert office and PDF documents to PDF or structured Markdown",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Source document.
    file: PathBuf,

    /// Conversion to run.
    #[arg(short, long, env = "DOCCONV_TASK", value_parser = parse_task)]
    task: TaskType,

    /// Subject passed to the AI prompt as context.
    #[arg(long)]
    subject: Option<String>,

    /// AI provider (gemini, openai). Defaults to AI_PROVIDER or gemini.
    #[arg(long)]
    provider: Option<String>,

    /// AI model name. Defaults to the provider's configured model.
    #[arg(long)]
    model: Option<String>,

    /// API key for this request only.
    #[arg(long)]
    api_key: Option<String>,

    /// Artifact directory (overrides DOCCONV_OUTPUT_DIR).
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Print the job status payload as JSON.
    #[arg(long)]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCCONV_VERBOSE")]
    verbose: bool,
}

fn parse_task(s: &str) -> Result<TaskType, String> {
    s.parse::<TaskType>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Configuration ────────────────────────────────────────────────────
    let mut config = PipelineConfig::from_env().context("Invalid configuration")?;
    if let Some(dir) = cli.output_dir.clone() {
        config.output_dir = dir;
    }

    let file_name = cli
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("Input path has no file name")?;
    let bytes = tokio::fs::read(&cli.file)
        .await
        .with_context(|| format!("Failed to read {}", cli.file.display()))?;

    let mut request = ConversionRequest::new(bytes, file_name, cli.task.as_str());
    if let Some(subject) = cli.subject {
        request = request.subject(subject);
    }
    if let Some(provider) = cli.provider {
        request = request.ai_provider(provider);
    }
    if let Some(model) = cli.model {
        request = request.ai_model(model);
    }
    if let Some(key) = cli.api_key {
        request = request.ai_api_key(key);
    }

    // ── Submit and poll ──────────────────────────────────────────────────
    let service = ConversionService::builder(config).start();
    let id = service
        .submit(request)
        .await
        .context("Submission rejected")?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    spinner.set_prefix(cli.task.as_str());
    spinner.enable_steady_tick(Duration::from_millis(80));

    let job = loop {
        let job = service.get(&id).context("Job vanished from the store")?;
        spinner.set_message(job.status.to_string());
        if job.status.is_terminal() {
            break job;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    };
    spinner.finish_and_clear();
    service.shutdown().await;

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&JobStatusView::from(&job))?);
    }

    match (&job.status, &job.result) {
        (JobStatus::Success, Some(JobResult::Success(artifact))) => {
            for warning in &artifact.warnings {
                eprintln!("{} {}", yellow("⚠"), warning);
            }
            eprintln!("{} {}", green("✔"), artifact.message);
            if !cli.json {
                println!("{}", artifact.output_ref.display());
            }
            Ok(())
        }
        (_, Some(JobResult::Failed(failure))) => {
            eprintln!(
                "{} {} {}",
                red("✘"),
                failure.error_message,
                dim(&format!("[{}]", failure.error_kind))
            );
            std::process::exit(1);
        }
        (status, _) => anyhow::bail!("Job {id} ended in unexpected state {status}"),
    }
}
