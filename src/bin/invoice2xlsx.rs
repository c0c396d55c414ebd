//! CLI binary for invoice2xlsx.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig`, runs the batch and writes the workbook.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use invoice2xlsx::model::{Cell, HEADER_COLUMNS};
use invoice2xlsx::{
    export_batch, inspect, BatchOutput, DocumentOutcome, ExtractionConfig,
    ExtractionProgressCallback, ExtractionOutput, FieldSource, InvoiceExtractor, OcrMode,
    ProgressCallback, Stage, TextSource,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: [&str; 11] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over the documents of the batch and a
/// log line per finished document. Works when documents finish out of order
/// (`--concurrency > 1`).
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-document wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<String, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_batch_start
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} invoices  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&TICKS);

        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed(&self, input: &str) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut map| map.remove(input))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.bar.set_length(total_documents as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting {total_documents} document(s)…"))
        ));
    }

    fn on_document_start(&self, input: &str) {
        if let Ok(mut map) = self.start_times.lock() {
            map.insert(input.to_string(), Instant::now());
        }
        self.bar.set_message(short_name(input));
    }

    fn on_stage(&self, input: &str, stage: Stage) {
        self.bar
            .set_message(format!("{}: {}", short_name(input), stage.label()));
    }

    fn on_document_complete(&self, input: &str, line_items: usize) {
        let secs = self.elapsed(input);
        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            green("✓"),
            short_name(input),
            dim(&format!("{line_items:>3} items")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, input: &str, error: &str) {
        let secs = self.elapsed(input);
        // Truncate very long error messages to keep output tidy.
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            red("✗"),
            short_name(input),
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        let failed = total_documents.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} document(s) extracted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} documents extracted  ({} failed)",
                if failed == total_documents {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_documents,
                red(&failed.to_string()),
            );
        }
    }
}

/// File name of a path or URL, for log lines.
fn short_name(input: &str) -> String {
    input
        .rsplit(['/', '\\'])
        .find(|s| !s.is_empty())
        .unwrap_or(input)
        .to_string()
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Review the extracted fields of one invoice (nothing written)
  invoice2xlsx factura.pdf

  # Several invoices into one workbook
  invoice2xlsx facturas/*.pdf -o facturas.xlsx

  # Scanned invoices: force OCR on every page
  invoice2xlsx --ocr-mode always scan.pdf -o scan.xlsx

  # Pattern matching only, no LLM call
  invoice2xlsx --no-llm factura.pdf -o factura.xlsx

  # Raw extracted text, e.g. to tune patterns
  invoice2xlsx --text factura.pdf

  # JSON output with per-page text and token usage
  invoice2xlsx --json factura.pdf > factura.json

  # Inspect PDF metadata (no OCR, no LLM)
  invoice2xlsx --inspect-only factura.pdf

ENVIRONMENT VARIABLES:
  AZURE_OPENAI_ENDPOINT          Azure OpenAI resource endpoint
  AZURE_OPENAI_API_KEY           Azure OpenAI API key
  AZURE_OPENAI_API_VERSION       API version (default 2025-01-01-preview)
  AZURE_OPENAI_DEPLOYMENT_NAME   Deployment / model (default gpt-4o-mini)
  INVOICE_LLM                    true/false: enable LLM structuring
  INVOICE_LLM_PROVIDER           azure (default), openai, anthropic, ... or auto
  INVOICE_CUSTOMER               Known customer to normalise names to
  TESSERACT_PATH                 Tesseract binary or install folder
  OCR_LANG / OCR_PSM / OCR_DPI   Tesseract language, page mode, render DPI
  OCR_MODE                       never, fallback (default), always
  PDFIUM_LIB_PATH                Path to an existing libpdfium

Without LLM credentials the fields are filled by pattern matching.
"#;

/// Extract PDF invoices into a two-sheet Excel workbook.
#[derive(Parser, Debug)]
#[command(
    name = "invoice2xlsx",
    version,
    about = "Extract PDF invoices into a Header / Detail Excel workbook",
    long_about = "Extract Chilean invoices from PDF files or URLs: text layer first, Tesseract OCR \
for scanned pages, optional LLM structuring, and pattern matching as fallback. Writes one row \
per invoice to the Header sheet and one row per line item to the Detail sheet.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file paths or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Write the workbook to this file (`.xlsx` is appended when missing).
    #[arg(short, long, env = "INVOICE_OUTPUT")]
    output: Option<PathBuf>,

    /// Print structured JSON (all extraction results) to stdout.
    #[arg(long)]
    json: bool,

    /// Print the raw extracted text of each document to stdout.
    #[arg(long)]
    text: bool,

    /// Print PDF metadata only, no extraction.
    #[arg(long)]
    inspect_only: bool,

    /// When to OCR pages.
    #[arg(long, env = "OCR_MODE", value_enum, default_value = "fallback")]
    ocr_mode: OcrModeArg,

    /// Tesseract binary, or the folder that contains it.
    #[arg(long, env = "TESSERACT_PATH")]
    tesseract_path: Option<PathBuf>,

    /// Tesseract language(s), e.g. spa or spa+eng.
    #[arg(long, env = "OCR_LANG", default_value = "spa+eng")]
    ocr_lang: String,

    /// Tesseract page segmentation mode (0–13).
    #[arg(long, env = "OCR_PSM", default_value_t = 11,
          value_parser = clap::value_parser!(u8).range(0..=13))]
    ocr_psm: u8,

    /// Rendering DPI for OCR (72–600).
    #[arg(long, env = "OCR_DPI", default_value_t = 400,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    ocr_dpi: u32,

    /// Skip image cleanup before OCR.
    #[arg(long)]
    no_preprocess: bool,

    /// Enable LLM structuring.
    #[arg(long, env = "INVOICE_LLM", default_value_t = true,
          action = clap::ArgAction::Set, value_name = "BOOL")]
    llm: bool,

    /// Disable LLM structuring (same as `--llm false`).
    #[arg(long)]
    no_llm: bool,

    /// LLM provider name, or `auto` to detect from API key env vars.
    #[arg(long, env = "INVOICE_LLM_PROVIDER", default_value = "azure")]
    provider: String,

    /// Model or Azure deployment name.
    #[arg(long, env = "AZURE_OPENAI_DEPLOYMENT_NAME", default_value = "gpt-4o-mini")]
    model: String,

    /// Azure OpenAI endpoint.
    #[arg(long, env = "AZURE_OPENAI_ENDPOINT")]
    llm_endpoint: Option<String>,

    /// Azure OpenAI API key.
    #[arg(long, env = "AZURE_OPENAI_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    /// Azure OpenAI API version.
    #[arg(long, env = "AZURE_OPENAI_API_VERSION", default_value = "2025-01-01-preview")]
    llm_api_version: String,

    /// Known customer company; the LLM normalises the customer name to it.
    #[arg(long, env = "INVOICE_CUSTOMER")]
    customer: Option<String>,

    /// Retries per LLM prompt strategy (0–10).
    #[arg(long, default_value_t = 2,
          value_parser = clap::value_parser!(u32).range(0..=10))]
    max_retries: u32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, default_value_t = 90,
          value_parser = clap::value_parser!(u64).range(1..))]
    api_timeout: u64,

    /// Documents processed at once.
    #[arg(short, long, default_value_t = 1)]
    concurrency: usize,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "INVOICE_PDF_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// HTTP download timeout in seconds.
    #[arg(long, default_value_t = 120)]
    download_timeout: u64,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OcrModeArg {
    Never,
    Fallback,
    Always,
}

impl From<OcrModeArg> for OcrMode {
    fn from(v: OcrModeArg) -> Self {
        match v {
            OcrModeArg::Never => OcrMode::Never,
            OcrModeArg::Fallback => OcrMode::Fallback,
            OcrModeArg::Always => OcrMode::Always,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
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

    // The provider factory reads its credentials from the environment.
    // Set them before any runtime thread exists.
    forward_llm_env(&cli);

    tokio::runtime::Runtime::new()
        .context("Failed to start tokio runtime")?
        .block_on(run(cli, show_progress))
}

fn forward_llm_env(cli: &Cli) {
    if let Some(ref endpoint) = cli.llm_endpoint {
        std::env::set_var("AZURE_OPENAI_ENDPOINT", endpoint);
    }
    if let Some(ref key) = cli.llm_api_key {
        std::env::set_var("AZURE_OPENAI_API_KEY", key);
    }
    std::env::set_var("AZURE_OPENAI_API_VERSION", &cli.llm_api_version);
    std::env::set_var("AZURE_OPENAI_DEPLOYMENT_NAME", &cli.model);
}

async fn run(cli: Cli, show_progress: bool) -> Result<()> {
    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        for input in &cli.inputs {
            let meta = inspect(input)
                .await
                .with_context(|| format!("Failed to inspect {input}"))?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&meta).context("Failed to serialize metadata")?
                );
            } else {
                println!("File:          {}", input);
                if let Some(ref t) = meta.title {
                    println!("Title:         {}", t);
                }
                if let Some(ref a) = meta.author {
                    println!("Author:        {}", a);
                }
                println!("Pages:         {}", meta.page_count);
                let scanned = meta.scanned_pages();
                if scanned.is_empty() {
                    println!("Scanned pages: none");
                } else {
                    let list: Vec<String> = scanned.iter().map(|i| (i + 1).to_string()).collect();
                    println!("Scanned pages: {}", list.join(", "));
                }
                println!("PDF Version:   {}", meta.pdf_version);
                if let Some(ref p) = meta.producer {
                    println!("Producer:      {}", p);
                }
                println!();
            }
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let extractor = InvoiceExtractor::new(config);

    if !cli.quiet && !cli.json {
        match extractor.ocr_engine() {
            Some(engine) => eprintln!("{} OCR: {}", dim("·"), engine.version()),
            None => eprintln!("{} OCR: unavailable (text layer only)", dim("·")),
        }
        eprintln!(
            "{} Fields: {}",
            dim("·"),
            if extractor.has_llm() {
                "LLM, pattern matching as fallback"
            } else {
                "pattern matching"
            }
        );
    }

    // ── Run extraction ───────────────────────────────────────────────────
    let batch = extractor.extract_batch(&cli.inputs).await;

    if cli.text {
        for output in batch.successes() {
            println!("===== {} =====", output.input);
            println!("{}", output.text);
            println!();
        }
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&batch).context("Failed to serialise output")?;
        println!("{json}");
    }

    if let Some(ref output_path) = cli.output {
        let written = export_batch(&batch, output_path)
            .await
            .context("Failed to write workbook")?;
        if !cli.quiet {
            eprintln!(
                "{}  {} invoice(s)  {}ms  →  {}",
                green("✔"),
                batch.exportable().count(),
                batch.total_duration_ms,
                bold(&written.display().to_string()),
            );
        }
    } else if !cli.json && !cli.text {
        print_review(&batch);
    }

    if !cli.quiet && !cli.json && batch.token_usage.calls > 0 {
        eprintln!(
            "   {} tokens in  /  {} tokens out  ({} LLM call(s))",
            dim(&batch.token_usage.prompt_tokens.to_string()),
            dim(&batch.token_usage.completion_tokens.to_string()),
            batch.token_usage.calls,
        );
    }

    if !show_progress && !cli.quiet {
        for failure in batch.failures() {
            eprintln!("{} {}", red("✗"), failure);
        }
    }

    if batch.successes().next().is_none() {
        anyhow::bail!("No document could be extracted");
    }
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .ocr_mode(cli.ocr_mode.into())
        .ocr_languages(cli.ocr_lang.clone())
        .ocr_psm(cli.ocr_psm)
        .ocr_dpi(cli.ocr_dpi)
        .ocr_preprocess(!cli.no_preprocess)
        .llm_enabled(cli.llm && !cli.no_llm)
        .model(cli.model.clone())
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .concurrency(cli.concurrency)
        .download_timeout_secs(cli.download_timeout);

    builder = if cli.provider.eq_ignore_ascii_case("auto") {
        builder.auto_detect_provider()
    } else {
        builder.provider_name(cli.provider.clone())
    };
    if let Some(ref path) = cli.tesseract_path {
        builder = builder.tesseract_path(path.clone());
    }
    if let Some(ref customer) = cli.customer {
        builder = builder.expected_customer(customer.clone());
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

// ── Review output ────────────────────────────────────────────────────────────

fn print_review(batch: &BatchOutput) {
    for doc in &batch.documents {
        match doc {
            DocumentOutcome::Extracted(output) => print_document(output),
            DocumentOutcome::Failed(err) => {
                println!("{} {}", red("✗"), bold(&err.input));
                println!("    {}", err.detail);
                println!();
            }
        }
    }
}

fn print_document(output: &ExtractionOutput) {
    let text_source = match output.text_source {
        TextSource::TextLayer => "text layer",
        TextSource::Ocr => "OCR",
        TextSource::Mixed => "text layer + OCR",
    };
    let field_source = match output.field_source {
        FieldSource::Llm => "LLM",
        FieldSource::Patterns => "patterns",
    };
    println!(
        "{} {}  {}",
        green("✓"),
        bold(&output.input),
        dim(&format!(
            "[{} pages, {}, fields by {}]",
            output.stats.total_pages, text_source, field_source
        ))
    );

    let header = &output.invoice.header;
    for (label, cell) in HEADER_COLUMNS.iter().zip(header.cells().iter()) {
        if let Some(value) = format_cell(cell) {
            println!("    {:<24} {}", format!("{label}:"), value);
        }
    }
    if !output.invoice.is_exportable() {
        println!("    {}", red("no invoice number found; not exportable"));
    }

    println!("    {}", bold(&format!("{} line item(s)", output.invoice.items.len())));
    for item in &output.invoice.items {
        println!(
            "      {:>8}  {:<40}  {:>12}",
            item.quantity.map(format_number).unwrap_or_default(),
            item.description.as_deref().unwrap_or(""),
            item.total.map(format_number).unwrap_or_default(),
        );
    }
    println!();
}

fn format_cell(cell: &Cell<'_>) -> Option<String> {
    match *cell {
        Cell::Text(Some(s)) => Some(s.to_string()),
        Cell::Number(Some(n)) => Some(format_number(n)),
        _ => None,
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}
