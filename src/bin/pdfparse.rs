//! CLI binary for edgequake-pdfparse.
//!
//! A thin shim over the library crate: flags become a `ParseRequest`, a
//! `StorageTarget` and an `Orchestrator`; the returned error becomes the
//! process exit code.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdfparse::engine::vlm::{VlmBackend, VlmSettings};
use edgequake_pdfparse::error::exit_code;
use edgequake_pdfparse::{
    load_document, AddressingStyle, Artifact, CancelToken, ConfigurationError, DumpFlags, DumpPolicy,
    MarkdownMode, Orchestrator, PageWindow, ParseError, ParseMethod, ParseProgressCallback,
    ParseRequest, RunState, StorageEndpoint, StorageTarget,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner showing the current state, with one line per artifact.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Parsing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ParseProgressCallback for CliProgressCallback {
    fn on_state(&self, state: RunState) {
        self.bar.set_message(state.to_string());
    }

    fn on_artifact_written(&self, artifact: Artifact, key: &str) {
        self.bar
            .println(format!("  {} {:<13} {}", green("✓"), artifact.to_string(), dim(key)));
    }

    fn on_artifact_failed(&self, artifact: Artifact, key: &str, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<13} {}  {}",
            red("✗"),
            artifact.to_string(),
            key,
            red(&msg)
        ));
    }

    fn on_run_complete(&self, written: usize, failed: usize) {
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!("{} {} artifacts written", green("✔"), bold(&written.to_string()));
        } else {
            eprintln!(
                "{} {} written, {} failed",
                red("✘"),
                bold(&written.to_string()),
                red(&failed.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Parse to ./output/paper/auto/
  pdfparse paper.pdf

  # Force OCR, pages 2..=5 (0-indexed), custom root
  pdfparse scan.pdf --method ocr --start-page 2 --end-page 5 -o results

  # Reuse pre-computed model output instead of calling a model
  pdfparse paper.pdf --model-list paper_model.json

  # Read from and write to an S3-compatible bucket
  pdfparse s3://inbox/paper.pdf --s3-bucket parsed --s3-endpoint minio:9000 \
      --s3-access-key AK --s3-secret-key SK

EXIT CODES:
  0    success
  64   unknown parse method
  65   invalid input or request
  66   input or object not found
  69   storage backend or download unavailable
  70   inference failure
  73   storage quota exceeded
  77   access denied
  78   no model backend configured and no --model-list
  130  cancelled (Ctrl-C)

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Provider used for OCR (with EDGEQUAKE_MODEL)
  EDGEQUAKE_MODEL         Model used for OCR
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  PDFPARSE_S3_*           S3 settings (BUCKET, ACCESS_KEY, SECRET_KEY, ENDPOINT, ADDRESSING_STYLE)
  RUST_LOG                Log filter, overrides --verbose / --quiet
"#;

/// Parse PDF documents into Markdown and JSON artifacts.
#[derive(Parser, Debug)]
#[command(
    name = "pdfparse",
    version,
    about = "Parse PDF documents into Markdown and JSON artifacts on local disk or S3",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF path, HTTP/HTTPS URL, or s3://bucket/key.
    input: String,

    /// Root under which <name>/<method>/ is created (directory or key prefix).
    #[arg(short, long, env = "PDFPARSE_OUTPUT", default_value = "output")]
    output: String,

    /// Parse method: auto, txt, ocr.
    #[arg(short, long, env = "PDFPARSE_METHOD", default_value = "auto")]
    method: String,

    /// First page to keep (0-indexed).
    #[arg(long, default_value_t = 0)]
    start_page: usize,

    /// Last page to keep (0-indexed, inclusive). Default: last page.
    #[arg(long)]
    end_page: Option<usize>,

    /// Document language hint (e.g. en, ch).
    #[arg(long, env = "PDFPARSE_LANG")]
    lang: Option<String>,

    /// Layout model; with the OCR backend, a vision model name.
    #[arg(long, env = "PDFPARSE_LAYOUT_MODEL")]
    layout_model: Option<String>,

    /// Do not recognise formulas.
    #[arg(long)]
    no_formula: bool,

    /// Do not recognise tables.
    #[arg(long)]
    no_table: bool,

    /// Verbose pipe transforms.
    #[arg(long, env = "PDFPARSE_DEBUG")]
    debug: bool,

    /// Skip <name>.md.
    #[arg(long)]
    no_md: bool,

    /// Skip <name>_middle.json.
    #[arg(long)]
    no_middle_json: bool,

    /// Skip <name>_model.json.
    #[arg(long)]
    no_model_json: bool,

    /// Skip <name>_origin.pdf.
    #[arg(long)]
    no_origin_pdf: bool,

    /// Skip <name>_content_list.json.
    #[arg(long)]
    no_content_list: bool,

    /// Markdown image handling.
    #[arg(long, value_enum, default_value = "multimodal")]
    md_mode: MdModeArg,

    /// JSON array of per-page model output; skips the model backend.
    #[arg(long, env = "PDFPARSE_MODEL_LIST")]
    model_list: Option<PathBuf>,

    /// What to do when an artifact fails to write.
    #[arg(long, value_enum, default_value = "best-effort")]
    dump_policy: DumpPolicyArg,

    /// Write to this S3 bucket instead of the local file system.
    #[arg(long, env = "PDFPARSE_S3_BUCKET")]
    s3_bucket: Option<String>,

    #[arg(long, env = "PDFPARSE_S3_ACCESS_KEY")]
    s3_access_key: Option<String>,

    #[arg(long, env = "PDFPARSE_S3_SECRET_KEY", hide_env_values = true)]
    s3_secret_key: Option<String>,

    /// host:port or URL of the S3-compatible endpoint.
    #[arg(long, env = "PDFPARSE_S3_ENDPOINT")]
    s3_endpoint: Option<String>,

    /// auto, path or virtual.
    #[arg(long, env = "PDFPARSE_S3_ADDRESSING_STYLE", default_value = "auto")]
    s3_addressing_style: AddressingStyle,

    /// LLM provider for OCR: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM model for OCR.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Concurrent OCR page calls.
    #[arg(short, long, env = "PDFPARSE_CONCURRENCY", default_value_t = 10)]
    concurrency: usize,

    /// Retries per OCR page.
    #[arg(long, env = "PDFPARSE_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-page LLM call timeout in seconds.
    #[arg(long, env = "PDFPARSE_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDFPARSE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "PDFPARSE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFPARSE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFPARSE_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum MdModeArg {
    Multimodal,
    TextOnly,
}

impl From<MdModeArg> for MarkdownMode {
    fn from(v: MdModeArg) -> Self {
        match v {
            MdModeArg::Multimodal => MarkdownMode::Multimodal,
            MdModeArg::TextOnly => MarkdownMode::TextOnly,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum DumpPolicyArg {
    BestEffort,
    FailFast,
}

impl From<DumpPolicyArg> for DumpPolicy {
    fn from(v: DumpPolicyArg) -> Self {
        match v {
            DumpPolicyArg::BestEffort => DumpPolicy::BestEffort,
            DumpPolicyArg::FailFast => DumpPolicy::FailFast,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    match run(&cli, show_progress).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", red("error:"), e);
            ExitCode::from(error_exit_code(&e))
        }
    }
}

/// Exit code for an error chain: the library's code when one is in the
/// chain, otherwise bad input.
fn error_exit_code(e: &anyhow::Error) -> u8 {
    e.chain()
        .find_map(|cause| {
            cause
                .downcast_ref::<ParseError>()
                .map(ParseError::exit_code)
                .or_else(|| cause.downcast_ref::<ConfigurationError>().map(ConfigurationError::exit_code))
        })
        .unwrap_or(exit_code::BAD_INPUT)
}

async fn run(cli: &Cli, show_progress: bool) -> Result<()> {
    // Checked before any provider or input I/O, same order as the orchestrator.
    let method: ParseMethod = cli.method.parse()?;
    let endpoint = build_endpoint(cli)?;

    // ── Input ────────────────────────────────────────────────────────────
    let document = load_document(&cli.input, cli.download_timeout, endpoint.as_ref()).await?;
    let model_list = match cli.model_list {
        Some(ref path) => read_model_list(path).await?,
        None => Vec::new(),
    };

    // ── Backend ──────────────────────────────────────────────────────────
    let backend = if model_list.is_empty() {
        let settings = VlmSettings {
            provider_name: cli.provider.clone(),
            model: cli.model.clone(),
            concurrency: cli.concurrency,
            max_retries: cli.max_retries,
            request_timeout_secs: cli.api_timeout,
            ..VlmSettings::default()
        };
        VlmBackend::from_env(settings)?
    } else {
        None
    };

    let mut builder = Orchestrator::builder()
        .maybe_backend(backend.map(|b| Arc::new(b) as _))
        .dump_policy(cli.dump_policy.into());
    if show_progress {
        builder = builder.progress_callback(CliProgressCallback::new());
    }
    let orchestrator = builder.build();

    // ── Request ──────────────────────────────────────────────────────────
    let mut dump = DumpFlags::all();
    for (artifact, skip) in [
        (Artifact::Markdown, cli.no_md),
        (Artifact::MiddleJson, cli.no_middle_json),
        (Artifact::ModelJson, cli.no_model_json),
        (Artifact::OriginPdf, cli.no_origin_pdf),
        (Artifact::ContentList, cli.no_content_list),
    ] {
        dump.set(artifact, !skip);
    }

    let mut request = ParseRequest::builder(document.name, document.bytes)
        .method(method.as_str())
        .pages(PageWindow::new(cli.start_page, cli.end_page))
        .formula_enable(!cli.no_formula)
        .table_enable(!cli.no_table)
        .dump(dump)
        .markdown_mode(cli.md_mode.into())
        .model_list(model_list)
        .output_root(cli.output.as_str())
        .debug(cli.debug);
    if let Some(ref lang) = cli.lang {
        request = request.lang(lang.as_str());
    }
    if let Some(ref layout_model) = cli.layout_model {
        request = request.layout_model(layout_model.as_str());
    }
    let request = request.build();

    let target = match (&cli.s3_bucket, endpoint) {
        (Some(_), Some(endpoint)) => StorageTarget::ObjectStore(endpoint),
        _ => StorageTarget::Local,
    };

    // ── Cancellation ─────────────────────────────────────────────────────
    let (handle, token) = CancelToken::pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancellation requested; stopping at the next step");
            handle.cancel();
        }
    });

    // ── Run ──────────────────────────────────────────────────────────────
    let report = orchestrator.run_until(&request, &target, &token).await?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        eprintln!(
            "{}  {} ({})  {}ms  →  {}",
            green("✔"),
            report.method,
            report.mode,
            report.duration_ms,
            bold(&report.prefixes.artifact_prefix),
        );
    }
    Ok(())
}

/// Endpoint from the S3 flags, when endpoint and credentials are all set.
fn build_endpoint(cli: &Cli) -> Result<Option<StorageEndpoint>> {
    match (&cli.s3_endpoint, &cli.s3_access_key, &cli.s3_secret_key) {
        (Some(url), Some(ak), Some(sk)) => Ok(Some(
            StorageEndpoint::new(cli.s3_bucket.clone().unwrap_or_default(), ak, sk, url)
                .with_addressing_style(cli.s3_addressing_style),
        )),
        (None, None, None) if cli.s3_bucket.is_none() => Ok(None),
        (None, None, None) => anyhow::bail!("--s3-bucket needs --s3-endpoint, --s3-access-key and --s3-secret-key"),
        _ => anyhow::bail!("--s3-endpoint, --s3-access-key and --s3-secret-key must be given together"),
    }
}

async fn read_model_list(path: &Path) -> Result<Vec<serde_json::Value>> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read model list from {:?}", path))?;
    let value: serde_json::Value =
        serde_json::from_slice(&raw).with_context(|| format!("{:?} is not valid JSON", path))?;
    match value {
        serde_json::Value::Array(pages) => Ok(pages),
        _ => anyhow::bail!("{:?} must contain a JSON array (one entry per page)", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_method_wins_over_provider_and_input_errors() {
        let cli = Cli::try_parse_from([
            "pdfparse",
            "/definitely/not/here.pdf",
            "--method",
            "bogus",
            "--provider",
            "nosuch",
        ])
        .unwrap();
        let err = run(&cli, false).await.unwrap_err();
        assert_eq!(error_exit_code(&err), exit_code::UNKNOWN_METHOD);
    }

    #[tokio::test]
    async fn missing_input_is_not_found() {
        let cli = Cli::try_parse_from(["pdfparse", "/definitely/not/here.pdf", "--method", "txt"]).unwrap();
        let err = run(&cli, false).await.unwrap_err();
        assert_eq!(error_exit_code(&err), exit_code::NOT_FOUND);
    }
}
