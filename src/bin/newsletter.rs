//! CLI binary for newsletter-store.
//!
//! A thin shim over the library crate: each subcommand maps its flags onto
//! `StorageConfig` / `ConversionConfig`, calls one library entry point and
//! prints the result.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use newsletter_store::convert::default_output_path;
use newsletter_store::{
    cleanup_directory, conversion_config_from_options, convert_file, CloudinaryCredentials,
    DownloadPayload, ScreenshotClient, ScreenshotConfig, StorageConfig, StorageKind,
    StorageManager, UploadOutcome, UploadPolicy,
};
use serde_json::{json, Map, Value};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Spinner on stderr, or a hidden bar when progress output is off.
fn spinner(enabled: bool, prefix: &'static str, msg: impl Into<String>) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS),
    );
    bar.set_prefix(prefix);
    bar.set_message(msg.into());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn counter(enabled: bool, total: usize) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} files  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    bar.set_prefix("Uploading");
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

const AFTER_HELP: &str = r##"EXAMPLES:
  # Upload into this month's partition (newsletters/2026/October/…)
  newsletter --storage local upload "Report 2024.html" spring.html

  # List everything under a prefix, newest first
  newsletter --storage local list --prefix newsletters/2026/

  # Fetch, edit, save back
  newsletter download "newsletters/2026/October/Report 2024.html" -o draft.html
  newsletter save "newsletters/2026/October/Report 2024.html" draft.html

  # HTML → single-page PDF (needs BROWSERLESS_TOKEN)
  newsletter convert issue.html --margin-mm 10 --background "#f4f4f4"
  newsletter convert issue.html --options '{"pageWidth": 11, "allowScaleUp": "no"}'

  # Rename legacy percent-encoded files on disk
  newsletter cleanup --dry-run

ENVIRONMENT VARIABLES:
  STORAGE_TYPE            local | cloudinary (default: cloudinary)
  LOCAL_STORAGE_PATH      Local storage root (default: static/files)
  LOCAL_PUBLIC_URL_BASE   URL prefix for local files (default: /static/files)
  STORAGE_UPLOAD_FOLDER   Partition root (default: newsletters)
  STORAGE_LIST_CACHE_TTL  List cache TTL in seconds, 0 disables (default: 120)
  CLOUDINARY_CLOUD_NAME   Cloudinary cloud name
  CLOUDINARY_API_KEY      Cloudinary API key
  CLOUDINARY_API_SECRET   Cloudinary API secret
  BROWSERLESS_TOKEN       Screenshot service token (required for convert)
  BROWSERLESS_ENDPOINT    Screenshot endpoint override
  RUST_LOG                Log filter, overrides --verbose / --quiet
"##;

#[derive(Parser, Debug)]
#[command(
    name = "newsletter",
    version,
    about = "Store HTML newsletters locally or in Cloudinary and convert them to single-page PDFs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    storage: StorageArgs,

    /// Debug-level logging.
    #[arg(short, long, global = true, env = "NEWSLETTER_VERBOSE")]
    verbose: bool,

    /// Errors only; no spinners.
    #[arg(short, long, global = true, env = "NEWSLETTER_QUIET")]
    quiet: bool,

    /// Disable spinners and progress bars.
    #[arg(long, global = true, env = "NEWSLETTER_NO_PROGRESS")]
    no_progress: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct StorageArgs {
    /// Storage backend.
    #[arg(long = "storage", global = true, env = "STORAGE_TYPE", value_enum,
          ignore_case = true, default_value = "cloudinary")]
    kind: StorageArg,

    /// Local storage root.
    #[arg(long, global = true, env = "LOCAL_STORAGE_PATH", default_value = "static/files")]
    local_path: PathBuf,

    /// URL prefix under which the local root is served.
    #[arg(long, global = true, env = "LOCAL_PUBLIC_URL_BASE", default_value = "/static/files")]
    public_url_base: String,

    /// Top-level folder for month partitions.
    #[arg(long, global = true, env = "STORAGE_UPLOAD_FOLDER", default_value = "newsletters")]
    upload_folder: String,

    /// List cache TTL in seconds; 0 disables.
    #[arg(long, global = true, env = "STORAGE_LIST_CACHE_TTL", default_value_t = 120)]
    cache_ttl: u64,

    #[arg(long, global = true, env = "CLOUDINARY_CLOUD_NAME")]
    cloud_name: Option<String>,

    #[arg(long, global = true, env = "CLOUDINARY_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, global = true, env = "CLOUDINARY_API_SECRET", hide_env_values = true)]
    api_secret: Option<String>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StorageArg {
    Local,
    Cloudinary,
}

impl From<StorageArg> for StorageKind {
    fn from(v: StorageArg) -> Self {
        match v {
            StorageArg::Local => StorageKind::Local,
            StorageArg::Cloudinary => StorageKind::Cloudinary,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload files into the current month partition.
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Uploads in flight at once.
        #[arg(short, long, env = "NEWSLETTER_CONCURRENCY", default_value_t = 4)]
        concurrency: usize,

        #[arg(long)]
        json: bool,
    },

    /// List stored files, newest first.
    List {
        #[arg(long, default_value = "")]
        prefix: String,

        #[arg(long)]
        json: bool,
    },

    /// Download a stored file.
    Download {
        file_id: String,

        /// File or directory to write to. Default: current directory.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Create or overwrite a stored file with the contents of PATH.
    Save { file_id: String, path: PathBuf },

    /// Delete a stored file.
    Delete { file_id: String },

    /// Print the public URL of a stored file.
    Url { file_id: String },

    /// Convert an HTML file to a single-page PDF.
    Convert(ConvertArgs),

    /// Rename legacy percent-encoded filenames under the local storage root.
    Cleanup {
        /// Show what would be renamed without touching anything.
        #[arg(long)]
        dry_run: bool,

        /// Directory to scan. Default: the local storage root.
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct ConvertArgs {
    input: PathBuf,

    /// Output PDF. Default: the input's name with `.pdf`, beside it.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Raw options object, e.g. '{"pageWidth": 11, "DPI": 200}'.
    #[arg(long)]
    options: Option<String>,

    #[arg(long)]
    page_width: Option<f64>,

    #[arg(long)]
    page_height: Option<f64>,

    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=1200))]
    dpi: Option<u32>,

    #[arg(long)]
    margin_mm: Option<f64>,

    /// Manual scale in percent.
    #[arg(long)]
    scale: Option<f64>,

    #[arg(long)]
    max_scale: Option<f64>,

    /// Never enlarge the screenshot beyond 100 %.
    #[arg(long)]
    no_scale_up: bool,

    /// Background as hex, e.g. "#fff" or "f4f4f4".
    #[arg(long)]
    background: Option<String>,

    #[arg(long, env = "BROWSERLESS_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Spinners give the feedback that matters; keep library INFO logs out
    // of their way unless asked for.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    match cli.command {
        Command::Upload {
            files,
            concurrency,
            json,
        } => {
            let storage = build_storage(&cli.storage)?;
            upload(&storage, files, concurrency, json, show_progress && !json).await
        }
        Command::List { prefix, json } => {
            let storage = build_storage(&cli.storage)?;
            let bar = spinner(show_progress && !json, "Listing", prefix.clone());
            let files = storage.list_files(&prefix).await;
            bar.finish_and_clear();

            if json {
                println!("{}", serde_json::to_string_pretty(&files).context("Failed to serialise listing")?);
            } else if files.is_empty() {
                eprintln!("{}", dim("No files."));
            } else {
                for f in &files {
                    println!(
                        "{}  {:>9}  {}  {}",
                        dim(&f.created_at),
                        f.size,
                        bold(&f.display_name),
                        dim(&f.public_id)
                    );
                }
            }
            Ok(())
        }
        Command::Download { file_id, output } => {
            let storage = build_storage(&cli.storage)?;
            let bar = spinner(show_progress, "Downloading", file_id.clone());
            let target = output.unwrap_or_else(|| PathBuf::from("."));
            let (payload, written) = download_to(&storage, &file_id, &target, &bar).await?;
            if !cli.quiet {
                eprintln!(
                    "{}  {} bytes  {}  →  {}",
                    green("✔"),
                    payload.bytes.len(),
                    dim(payload.content_type),
                    bold(&written.display().to_string())
                );
            }
            Ok(())
        }
        Command::Save { file_id, path } => {
            let storage = build_storage(&cli.storage)?;
            let content = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if !storage.save(&file_id, &content).await {
                bail!("Could not save '{file_id}' (see log for details)");
            }
            if !cli.quiet {
                eprintln!("{}  saved {}", green("✔"), bold(&file_id));
            }
            Ok(())
        }
        Command::Delete { file_id } => {
            let storage = build_storage(&cli.storage)?;
            if !storage.delete(&file_id).await {
                bail!("Could not delete '{file_id}': not found or backend error");
            }
            if !cli.quiet {
                eprintln!("{}  deleted {}", green("✔"), bold(&file_id));
            }
            Ok(())
        }
        Command::Url { file_id } => {
            let storage = build_storage(&cli.storage)?;
            println!("{}", storage.file_url(&file_id));
            Ok(())
        }
        Command::Convert(args) => convert(args, show_progress, cli.quiet).await,
        Command::Cleanup { dry_run, path } => {
            let base = path.unwrap_or_else(|| cli.storage.local_path.clone());
            let stats = tokio::task::spawn_blocking(move || cleanup_directory(&base, dry_run))
                .await
                .context("Cleanup task panicked")?
                .context("Cleanup failed")?;

            for (from, to) in &stats.renames {
                println!(
                    "{} {}\n   → {}",
                    if dry_run { cyan("?") } else { green("✔") },
                    from.display(),
                    to.display()
                );
            }
            eprintln!(
                "Scanned {}  {} {}renamed  {} skipped  {} errors",
                stats.total_files,
                bold(&stats.renamed_files.to_string()),
                if dry_run { "would be " } else { "" },
                stats.skipped,
                if stats.errors > 0 {
                    red(&stats.errors.to_string())
                } else {
                    stats.errors.to_string()
                }
            );
            if stats.errors > 0 {
                bail!("{} file(s) could not be renamed", stats.errors);
            }
            Ok(())
        }
    }
}

fn build_storage(args: &StorageArgs) -> Result<StorageManager> {
    let mut builder = StorageConfig::builder()
        .kind(args.kind.into())
        .local_path(&args.local_path)
        .public_url_base(args.public_url_base.clone())
        .upload_folder(args.upload_folder.clone())
        .cache_ttl_secs(args.cache_ttl);

    if args.cloud_name.is_some() || args.api_key.is_some() || args.api_secret.is_some() {
        builder = builder.cloudinary(CloudinaryCredentials {
            cloud_name: args.cloud_name.clone().unwrap_or_default(),
            api_key: args.api_key.clone().unwrap_or_default(),
            api_secret: args.api_secret.clone().unwrap_or_default(),
        });
    }

    let config = builder.build().context("Invalid storage configuration")?;
    StorageManager::new(&config).context("Failed to initialise storage")
}

/// Fetch `file_id` into `target`. The spinner is cleared on every path out.
async fn download_to(
    storage: &StorageManager,
    file_id: &str,
    target: &Path,
    bar: &ProgressBar,
) -> Result<(DownloadPayload, PathBuf)> {
    let result = async {
        let payload = DownloadPayload::fetch(storage, file_id)
            .await
            .with_context(|| format!("Failed to download '{file_id}'"))?;
        let written = payload
            .write_to(target)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;
        Ok((payload, written))
    }
    .await;
    bar.finish_and_clear();
    result
}

async fn upload(
    storage: &StorageManager,
    files: Vec<PathBuf>,
    concurrency: usize,
    json: bool,
    show_progress: bool,
) -> Result<()> {
    let total = files.len();
    let bar = counter(show_progress, total);

    let results: Vec<(PathBuf, UploadOutcome)> = stream::iter(files)
        .map(|path| {
            let bar = bar.clone();
            async move {
                let outcome = upload_one(storage, &path).await;
                match (&outcome.file, &outcome.error) {
                    (Some(file), _) => bar.println(format!(
                        "  {} {}  →  {}",
                        green("✓"),
                        path.display(),
                        dim(&file.file_id)
                    )),
                    (None, Some(error)) => {
                        bar.println(format!("  {} {}  {}", red("✘"), path.display(), error))
                    }
                    (None, None) => {}
                }
                bar.inc(1);
                (path, outcome)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;
    bar.finish_and_clear();

    let failed = results.iter().filter(|(_, o)| !o.success).count();
    if json {
        let report: Vec<Value> = results
            .iter()
            .map(|(path, outcome)| {
                let mut v = serde_json::to_value(outcome).unwrap_or_else(|_| json!({}));
                v["source"] = json!(path.display().to_string());
                v
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&report).context("Failed to serialise report")?);
    } else if !show_progress {
        for (path, outcome) in &results {
            match &outcome.file {
                Some(file) => println!("{}  {}  {}", path.display(), file.file_id, file.url),
                None => eprintln!(
                    "{}  {}",
                    path.display(),
                    outcome.error.as_deref().unwrap_or("upload failed")
                ),
            }
        }
    } else {
        eprintln!(
            "{} {}/{} uploaded",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&(total - failed).to_string()),
            total
        );
    }

    if failed > 0 {
        bail!("{failed} of {total} upload(s) failed");
    }
    Ok(())
}

async fn upload_one(storage: &StorageManager, path: &Path) -> UploadOutcome {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let content = match tokio::fs::read(path).await {
        Ok(c) => c,
        Err(e) => return UploadOutcome::failed(format!("cannot read file: {e}")),
    };
    if let Err(e) = UploadPolicy::default().check(&name, content.len() as u64) {
        return UploadOutcome::failed(e.to_string());
    }
    storage.upload(&content, &name).await
}

async fn convert(args: ConvertArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let mut options: Map<String, Value> = match &args.options {
        Some(raw) => serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .context("--options must be a JSON object")?,
        None => Map::new(),
    };

    // Explicit flags win over the options object.
    let mut set = |key: &str, value: Value| {
        options.insert(key.to_string(), value);
    };
    if let Some(w) = args.page_width {
        set("page_width_in", json!(w));
    }
    if let Some(h) = args.page_height {
        set("page_height_in", json!(h));
    }
    if let Some(dpi) = args.dpi {
        set("dpi", json!(dpi));
    }
    if let Some(mm) = args.margin_mm {
        set("margin", json!(mm));
    }
    if let Some(scale) = args.scale {
        set("scale", json!(scale));
    }
    if let Some(max) = args.max_scale {
        set("max_scale", json!(max));
    }
    if args.no_scale_up {
        set("allow_scale_up", json!(false));
    }
    if let Some(bg) = &args.background {
        set("background", json!(bg));
    }
    let config = conversion_config_from_options(&options);

    let mut shot = ScreenshotConfig::from_env();
    if args.token.is_some() {
        shot.token = args.token.clone();
    }
    let client = ScreenshotClient::new(shot).context("Failed to build screenshot client")?;

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.input));

    let bar = spinner(show_progress, "Converting", args.input.display().to_string());
    let result = convert_file(&args.input, &output, &config, &client).await;
    bar.finish_and_clear();
    let converted = result.context("Conversion failed")?;

    if !quiet {
        eprintln!(
            "{}  {}x{} px @ {} dpi  scale {:.2}  {}ms  →  {}",
            green("✔"),
            converted.layout.page_width,
            converted.layout.page_height,
            config.dpi,
            converted.layout.scale,
            converted.duration_ms,
            bold(&output.display().to_string())
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn local(dir: &TempDir) -> StorageManager {
        let config = StorageConfig::builder()
            .kind(StorageKind::Local)
            .local_path(dir.path().join("store"))
            .build()
            .unwrap();
        StorageManager::new(&config).unwrap()
    }

    #[tokio::test]
    async fn failed_download_clears_the_spinner() {
        let dir = TempDir::new().unwrap();
        let storage = local(&dir);
        let bar = ProgressBar::hidden();

        let err = download_to(&storage, "newsletters/missing.html", dir.path(), &bar)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to download"));
        assert!(bar.is_finished());
    }

    #[tokio::test]
    async fn failed_write_clears_the_spinner() {
        let dir = TempDir::new().unwrap();
        let storage = local(&dir);
        assert!(storage.save("a/issue.html", b"<p/>").await);
        let bar = ProgressBar::hidden();

        let target = dir.path().join("no/such/dir/issue.html");
        let err = download_to(&storage, "a/issue.html", &target, &bar)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to write"));
        assert!(bar.is_finished());
    }

    #[tokio::test]
    async fn download_writes_into_directory() {
        let dir = TempDir::new().unwrap();
        let storage = local(&dir);
        assert!(storage.save("a/Issue%201.html", b"<p/>").await);
        let bar = ProgressBar::hidden();

        let (payload, written) = download_to(&storage, "a/Issue 1.html", dir.path(), &bar)
            .await
            .unwrap();
        assert_eq!(written, dir.path().join("Issue 1.html"));
        assert_eq!(payload.bytes, b"<p/>");
        assert!(bar.is_finished());
    }
}
