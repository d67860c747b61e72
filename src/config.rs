//! Configuration types for storage and HTML-to-PDF conversion.
//!
//! Three independent knobs live here:
//!
//! * [`StorageConfig`]: which backend to use and how to reach it.
//! * [`ConversionConfig`]: page geometry for the single-page PDF compositor.
//! * [`ScreenshotConfig`]: how to call the remote screenshot service.
//!
//! Each is built via a builder or read from the environment, and each has a
//! `Debug` impl that never prints secrets.

use crate::error::NewsletterError;
use crate::sanitize::file_format;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Files under a directory on the local filesystem.
    Local,
    /// Raw resources in a Cloudinary account. (default)
    #[default]
    Cloudinary,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Local => "local",
            StorageKind::Cloudinary => "cloudinary",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = NewsletterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(StorageKind::Local),
            "cloudinary" => Ok(StorageKind::Cloudinary),
            _ => Err(NewsletterError::UnsupportedStorage {
                value: s.to_string(),
            }),
        }
    }
}

/// Cloudinary account credentials.
#[derive(Clone, Default)]
pub struct CloudinaryCredentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

impl fmt::Debug for CloudinaryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudinaryCredentials")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Storage configuration.
///
/// # Example
/// ```rust
/// use newsletter_store::{StorageConfig, StorageKind};
///
/// let config = StorageConfig::builder()
///     .kind(StorageKind::Local)
///     .local_path("static/files")
///     .cache_ttl_secs(30)
///     .build()
///     .unwrap();
/// assert_eq!(config.cache_ttl_secs, 30);
/// ```
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Backend to construct. Default: Cloudinary.
    pub kind: StorageKind,

    /// Root directory for the local backend. Default: `static/files`.
    pub local_path: PathBuf,

    /// Public URL prefix under which the local root is served. Default: `/static/files`.
    pub public_url_base: String,

    /// Top-level folder uploads are partitioned under. Default: `newsletters`.
    pub upload_folder: String,

    /// List-cache time-to-live in seconds; 0 disables caching. Default: 120.
    pub cache_ttl_secs: u64,

    /// Required when `kind` is Cloudinary.
    pub cloudinary: Option<CloudinaryCredentials>,

    /// Cloudinary REST API base. Default: `https://api.cloudinary.com/v1_1`.
    pub cloudinary_api_base: String,

    /// Cloudinary delivery base. Default: `https://res.cloudinary.com`.
    pub cloudinary_delivery_base: String,

    /// Timeout for every cloud call, in seconds. Default: 30.
    pub request_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::default(),
            local_path: PathBuf::from("static/files"),
            public_url_base: "/static/files".to_string(),
            upload_folder: "newsletters".to_string(),
            cache_ttl_secs: 120,
            cloudinary: None,
            cloudinary_api_base: "https://api.cloudinary.com/v1_1".to_string(),
            cloudinary_delivery_base: "https://res.cloudinary.com".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl StorageConfig {
    /// Create a new builder for `StorageConfig`.
    pub fn builder() -> StorageConfigBuilder {
        StorageConfigBuilder {
            config: Self::default(),
        }
    }

    /// Read the configuration from environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `STORAGE_TYPE` | `kind` |
    /// | `LOCAL_STORAGE_PATH` | `local_path` |
    /// | `LOCAL_PUBLIC_URL_BASE` | `public_url_base` |
    /// | `STORAGE_UPLOAD_FOLDER` | `upload_folder` |
    /// | `STORAGE_LIST_CACHE_TTL` | `cache_ttl_secs` (unparseable → default) |
    /// | `CLOUDINARY_CLOUD_NAME`, `CLOUDINARY_API_KEY`, `CLOUDINARY_API_SECRET` | `cloudinary` |
    pub fn from_env() -> Result<Self, NewsletterError> {
        let env = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let mut builder = Self::builder();
        if let Some(kind) = env("STORAGE_TYPE") {
            builder = builder.kind(kind.parse()?);
        }
        if let Some(path) = env("LOCAL_STORAGE_PATH") {
            builder = builder.local_path(path);
        }
        if let Some(base) = env("LOCAL_PUBLIC_URL_BASE") {
            builder = builder.public_url_base(base);
        }
        if let Some(folder) = env("STORAGE_UPLOAD_FOLDER") {
            builder = builder.upload_folder(folder);
        }
        if let Some(ttl) = env("STORAGE_LIST_CACHE_TTL").and_then(|v| v.trim().parse().ok()) {
            builder = builder.cache_ttl_secs(ttl);
        }

        let cloud_name = env("CLOUDINARY_CLOUD_NAME");
        let api_key = env("CLOUDINARY_API_KEY");
        let api_secret = env("CLOUDINARY_API_SECRET");
        if cloud_name.is_some() || api_key.is_some() || api_secret.is_some() {
            builder = builder.cloudinary(CloudinaryCredentials {
                cloud_name: cloud_name.unwrap_or_default(),
                api_key: api_key.unwrap_or_default(),
                api_secret: api_secret.unwrap_or_default(),
            });
        }

        builder.build()
    }

    /// Check that the selected backend has what it needs.
    pub fn validate(&self) -> Result<(), NewsletterError> {
        if self.upload_folder.trim_matches('/').is_empty() {
            return Err(NewsletterError::InvalidConfig(
                "upload folder must not be empty".into(),
            ));
        }
        if self.kind != StorageKind::Cloudinary {
            return Ok(());
        }

        let creds = self.cloudinary.clone().unwrap_or_default();
        let mut missing = Vec::new();
        if creds.cloud_name.trim().is_empty() {
            missing.push("CLOUDINARY_CLOUD_NAME");
        }
        if creds.api_key.trim().is_empty() {
            missing.push("CLOUDINARY_API_KEY");
        }
        if creds.api_secret.trim().is_empty() {
            missing.push("CLOUDINARY_API_SECRET");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(NewsletterError::MissingCredentials { missing })
        }
    }
}

/// Builder for [`StorageConfig`].
#[derive(Debug)]
pub struct StorageConfigBuilder {
    config: StorageConfig,
}

impl StorageConfigBuilder {
    pub fn kind(mut self, kind: StorageKind) -> Self {
        self.config.kind = kind;
        self
    }

    pub fn local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.local_path = path.into();
        self
    }

    pub fn public_url_base(mut self, base: impl Into<String>) -> Self {
        self.config.public_url_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn upload_folder(mut self, folder: impl Into<String>) -> Self {
        self.config.upload_folder = folder.into().trim_matches('/').to_string();
        self
    }

    pub fn cache_ttl_secs(mut self, secs: u64) -> Self {
        self.config.cache_ttl_secs = secs;
        self
    }

    pub fn cloudinary(mut self, creds: CloudinaryCredentials) -> Self {
        self.config.cloudinary = Some(creds);
        self
    }

    pub fn cloudinary_api_base(mut self, base: impl Into<String>) -> Self {
        self.config.cloudinary_api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn cloudinary_delivery_base(mut self, base: impl Into<String>) -> Self {
        self.config.cloudinary_delivery_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<StorageConfig, NewsletterError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Upload policy ────────────────────────────────────────────────────────

/// What the upload surface accepts, checked before any I/O.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Lower-case extensions without the dot.
    pub allowed_extensions: Vec<String>,
    /// Maximum content length in bytes. Default: 16 MiB.
    pub max_content_length: u64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            allowed_extensions: ["html", "htm", "jpg", "jpeg", "png", "gif", "bmp", "webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_content_length: 16 * 1024 * 1024,
        }
    }
}

impl UploadPolicy {
    /// Policy for the HTML-to-PDF converter: HTML documents only.
    pub fn html_only() -> Self {
        Self {
            allowed_extensions: vec!["html".into(), "htm".into()],
            ..Self::default()
        }
    }

    /// Reject an upload by name and size.
    pub fn check(&self, filename: &str, size: u64) -> Result<(), NewsletterError> {
        let name = filename.trim();
        if name.is_empty() {
            return Err(NewsletterError::EmptyFilename);
        }

        let ext = file_format(name).to_lowercase();
        if !self.allowed_extensions.iter().any(|a| *a == ext) {
            return Err(NewsletterError::DisallowedFileType {
                filename: name.to_string(),
                allowed: self.allowed_extensions.join(", "),
            });
        }

        if size > self.max_content_length {
            return Err(NewsletterError::FileTooLarge {
                size,
                limit: self.max_content_length,
            });
        }
        Ok(())
    }
}

// ── PDF composition ──────────────────────────────────────────────────────

/// Page geometry for the single-page PDF compositor.
///
/// Built via [`ConversionConfig::builder()`], [`ConversionConfig::default()`],
/// or from loose caller options with
/// [`crate::options::conversion_config_from_options`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Page width in inches. Default: 8.5.
    pub page_width_in: f64,

    /// Minimum page height in inches; the page grows to fit content. Default: 11.
    pub page_height_in: f64,

    /// Margin on every edge, in inches. Default: 0.25.
    pub margin_in: f64,

    /// Raster resolution used for page pixels and the PDF. Default: 150.
    pub dpi: u32,

    /// Caller's scale as a fraction (1.0 = 100 %). Default: 1.0.
    pub manual_scale: f64,

    /// Whether a narrow screenshot may be enlarged to fill the page. Default: true.
    pub allow_scale_up: bool,

    /// Ceiling for any enlargement. Default: 2.0.
    pub max_scale: f64,

    /// Canvas fill. Default: white.
    pub background: [u8; 3],
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            page_width_in: 8.5,
            page_height_in: 11.0,
            margin_in: 0.25,
            dpi: 150,
            manual_scale: 1.0,
            allow_scale_up: true,
            max_scale: 2.0,
            background: [255, 255, 255],
        }
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn page_width_in(mut self, inches: f64) -> Self {
        self.config.page_width_in = inches;
        self
    }

    pub fn page_height_in(mut self, inches: f64) -> Self {
        self.config.page_height_in = inches;
        self
    }

    pub fn margin_in(mut self, inches: f64) -> Self {
        self.config.margin_in = inches.max(0.0);
        self
    }

    pub fn margin_mm(self, mm: f64) -> Self {
        self.margin_in(mm / 25.4)
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.max(1);
        self
    }

    /// Manual scale as a percentage; non-positive values mean 100 %.
    pub fn scale_percent(mut self, percent: f64) -> Self {
        let fraction = percent / 100.0;
        self.config.manual_scale = if fraction > 0.0 { fraction } else { 1.0 };
        self
    }

    pub fn allow_scale_up(mut self, v: bool) -> Self {
        self.config.allow_scale_up = v;
        self
    }

    pub fn max_scale(mut self, scale: f64) -> Self {
        self.config.max_scale = scale.max(0.1);
        self
    }

    pub fn background(mut self, rgb: [u8; 3]) -> Self {
        self.config.background = rgb;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, NewsletterError> {
        let c = &self.config;
        if !(c.page_width_in.is_finite() && c.page_width_in > 0.0) {
            return Err(NewsletterError::InvalidConfig(format!(
                "page width must be positive, got {}",
                c.page_width_in
            )));
        }
        if !(c.page_height_in.is_finite() && c.page_height_in > 0.0) {
            return Err(NewsletterError::InvalidConfig(format!(
                "page height must be positive, got {}",
                c.page_height_in
            )));
        }
        Ok(self.config)
    }
}

// ── Screenshot service ───────────────────────────────────────────────────

/// Settings for the remote headless-browser screenshot call.
#[derive(Clone)]
pub struct ScreenshotConfig {
    /// Bearer token, sent as the `token` query parameter.
    pub token: Option<String>,

    /// Screenshot REST endpoint.
    pub endpoint: String,

    /// Whole-request timeout in seconds. Default: 45.
    pub timeout_secs: u64,

    /// Browser viewport. Default: 2400 × 1200 at 1×.
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub device_scale_factor: u32,

    /// Navigation settle condition. Default: `networkidle2`.
    pub wait_until: String,

    /// Navigation timeout in milliseconds. Default: 15000.
    pub goto_timeout_ms: u64,

    /// Extra render delay after load in milliseconds. Default: 2000.
    pub wait_for_timeout_ms: u64,
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            token: None,
            endpoint: "https://production-sfo.browserless.io/screenshot".to_string(),
            timeout_secs: 45,
            viewport_width: 2400,
            viewport_height: 1200,
            device_scale_factor: 1,
            wait_until: "networkidle2".to_string(),
            goto_timeout_ms: 15_000,
            wait_for_timeout_ms: 2_000,
        }
    }
}

impl ScreenshotConfig {
    /// Defaults plus `BROWSERLESS_TOKEN` / `BROWSERLESS_ENDPOINT` from the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.token = std::env::var("BROWSERLESS_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
        if let Ok(endpoint) = std::env::var("BROWSERLESS_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                config.endpoint = endpoint;
            }
        }
        config
    }
}

impl fmt::Debug for ScreenshotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScreenshotConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("timeout_secs", &self.timeout_secs)
            .field("viewport_width", &self.viewport_width)
            .field("viewport_height", &self.viewport_height)
            .field("wait_until", &self.wait_until)
            .finish()
    }
}
