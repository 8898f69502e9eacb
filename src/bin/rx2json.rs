//! CLI binary for edgequake-rx2json.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and writes the record.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_rx2json::{
    assemble_json, extract, extract_to_file, inspect, ExtractionConfig, ExtractionMode,
    ExtractionOutput,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Digital e-prescription, default provider (OpenAI gpt-4o-mini)
  rx2json prescription.pdf

  # Scanned fax through Vertex AI Gemini, custom output path
  rx2json --provider vertex --location us-central1 fax.pdf -o out/rx.json

  # Print the record to stdout, compact
  rx2json prescription.pdf -o - --compact

  # What would happen, without calling a model (no API key needed)
  rx2json --inspect-only fax.pdf

  # Never send page images
  rx2json --no-vision prescription.pdf

MODES:
  auto     text-only when the PDF has enough selectable text, else hybrid
  text     text layer only
  vision   page images only
  hybrid   text layer plus page images

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY             OpenAI API key (default provider)
  ANTHROPIC_API_KEY          Anthropic API key
  GEMINI_API_KEY             Google Gemini API key
  GOOGLE_CLOUD_PROJECT       GCP project for --provider vertex
  VERTEX_ACCESS_TOKEN        Bearer token for Vertex AI
                             (e.g. $(gcloud auth print-access-token))
  PDFIUM_LIB_PATH            Path to libpdfium if it is not on the system path
  RX2JSON_*                  Every flag, e.g. RX2JSON_PROVIDER=vertex
"#;

/// Extract prescription PDFs into canonical JSON using LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "rx2json",
    version,
    about = "Extract prescription PDFs into canonical JSON using LLMs",
    long_about = "Extract a prescription PDF (digital or scanned, local file or URL) into one \
canonical JSON record with every field present. Supports OpenAI, Anthropic, Google Gemini, \
Ollama and other edgequake-llm providers, plus Gemini on Vertex AI.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Output JSON path; `-` writes to stdout.
    #[arg(short, long, env = "RX2JSON_OUTPUT", default_value = "prescription_payload.json")]
    output: PathBuf,

    /// LLM provider: openai, vertex, anthropic, gemini, ollama, azure.
    #[arg(long, env = "RX2JSON_PROVIDER", default_value = "openai")]
    provider: String,

    /// Model ID. Default: gpt-4o-mini (vertex: gemini-1.5-pro).
    #[arg(long, env = "RX2JSON_MODEL")]
    model: Option<String>,

    /// Region for Vertex AI.
    #[arg(long, env = "RX2JSON_LOCATION", default_value = "us-central1")]
    location: String,

    /// Never send page images (same as --mode text).
    #[arg(long, env = "RX2JSON_NO_VISION", conflicts_with = "mode")]
    no_vision: bool,

    /// Extraction mode.
    #[arg(long, env = "RX2JSON_MODE", value_enum, default_value = "auto")]
    mode: ModeArg,

    /// Non-whitespace characters of selectable text needed for text-only mode.
    #[arg(long, env = "RX2JSON_MIN_TEXT_CHARS", default_value_t = 300)]
    min_text_chars: usize,

    /// Apply --min-text-chars per page instead of to the whole document.
    #[arg(long, env = "RX2JSON_PER_PAGE_THRESHOLD")]
    per_page_threshold: bool,

    /// Rendering DPI (72–400).
    #[arg(long, env = "RX2JSON_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Max LLM output tokens.
    #[arg(long, env = "RX2JSON_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "RX2JSON_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Model call deadline in seconds.
    #[arg(long, env = "RX2JSON_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "RX2JSON_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "RX2JSON_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "RX2JSON_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Write compact JSON instead of pretty-printed.
    #[arg(long, env = "RX2JSON_COMPACT")]
    compact: bool,

    /// Report text sufficiency and the chosen mode; no model call.
    #[arg(long)]
    inspect_only: bool,

    /// Disable the spinner.
    #[arg(long, env = "RX2JSON_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "RX2JSON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "RX2JSON_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Auto,
    Text,
    Vision,
    Hybrid,
}

impl ModeArg {
    fn to_override(self) -> Option<ExtractionMode> {
        match self {
            ModeArg::Auto => None,
            ModeArg::Text => Some(ExtractionMode::TextOnly),
            ModeArg::Vision => Some(ExtractionMode::Vision),
            ModeArg::Hybrid => Some(ExtractionMode::Hybrid),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO logs; -v brings them back.
    let show_progress = !cli.quiet && !cli.no_progress && io::stderr().is_terminal();
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli).await?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let report = inspect(&cli.input, &config)
            .await
            .context("Failed to inspect PDF")?;
        println!("File:            {}", cli.input);
        if let Some(ref t) = report.metadata.title {
            println!("Title:           {t}");
        }
        if let Some(ref p) = report.metadata.producer {
            println!("Producer:        {p}");
        }
        println!("Pages:           {}", report.metadata.page_count);
        println!("PDF Version:     {}", report.metadata.pdf_version);
        println!("Text chars:      {}", report.text_chars);
        println!("Text sufficient: {}", report.is_text_sufficient);
        println!("Mode:            {}", report.mode);
        return Ok(());
    }

    // ── Run extraction ───────────────────────────────────────────────────
    let spinner = show_progress.then(|| start_spinner(&cli.input));
    let to_stdout = cli.output == Path::new("-");
    let pretty = !cli.compact;

    let result = if to_stdout {
        extract(&cli.input, &config).await
    } else {
        extract_to_file(&cli.input, &cli.output, &config, pretty).await
    };
    if let Some(ref bar) = spinner {
        bar.finish_and_clear();
    }
    let output = result.context("Extraction failed")?;

    if to_stdout {
        let json = assemble_json(&output.record, pretty).context("Failed to serialise record")?;
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{json}").context("Failed to write to stdout")?;
    } else if !cli.quiet {
        println!("Wrote {}", cli.output.display());
    }

    if !cli.quiet {
        print_summary(&output);
    }
    Ok(())
}

fn start_spinner(input: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    bar.set_prefix("rx2json");
    bar.set_message(format!("extracting {input}"));
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn print_summary(output: &ExtractionOutput) {
    let stats = &output.stats;
    eprintln!(
        "{}  {} mode  {} fields filled  {}ms",
        green("✔"),
        bold(&output.mode.to_string()),
        stats.fields_filled,
        stats.total_duration_ms,
    );
    eprintln!(
        "   {} tokens in  /  {} tokens out",
        dim(&stats.input_tokens.to_string()),
        dim(&stats.output_tokens.to_string()),
    );
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .provider(&cli.provider)
        .location(&cli.location)
        .mode_override(if cli.no_vision {
            Some(ExtractionMode::TextOnly)
        } else {
            cli.mode.to_override()
        })
        .min_text_chars(cli.min_text_chars)
        .scale_threshold_by_pages(cli.per_page_threshold)
        .dpi(cli.dpi)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {path:?}"))?;
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}
