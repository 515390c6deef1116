//! Configuration for the conversion pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`] or loaded with [`PipelineConfig::from_env`].
//! One struct for every knob keeps it trivial to share across workers and to
//! log at startup (API keys are redacted in `Debug`).

use crate::error::ConvertError;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Default AI provider when a request names none.
pub const DEFAULT_PROVIDER: &str = "gemini";

/// Default subject passed to the prompt when a request names none.
pub const DEFAULT_SUBJECT: &str = "General";

/// Configuration for the conversion pipeline.
///
/// # Example
/// ```rust
/// use docconv::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .workers(4)
///     .ocr_threshold(200)
///     .api_key("openai", "sk-test")
///     .build()
///     .unwrap();
/// assert_eq!(config.workers, 4);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Root under which each job gets `{id}/` holding its upload. Default: `temp_files`.
    pub input_dir: PathBuf,

    /// Root under which each job gets `{id}/` holding its artifact. Default: `output_files`.
    pub output_dir: PathBuf,

    /// URL prefix for artifact download links. Default: `/downloads`.
    pub download_prefix: String,

    /// Number of worker tasks pulling from the job queue. Default: 2.
    ///
    /// Extraction, OCR and office automation each occupy a blocking thread
    /// for seconds to minutes, so this is also the cap on concurrently
    /// running engine instances.
    pub workers: usize,

    /// Trimmed character count direct PDF text must exceed to skip OCR. Default: 100.
    pub ocr_threshold: usize,

    /// Rasterisation DPI for OCR pages. Range: 300–600. Default: 300.
    pub ocr_dpi: u32,

    /// Tesseract language set. Default: `eng+chi_sim`.
    pub ocr_languages: String,

    /// Tesseract executable. Default: `tesseract`.
    pub tesseract_path: PathBuf,

    /// LibreOffice executable driving office automation. Default: `soffice`.
    pub soffice_path: PathBuf,

    /// Directory containing libpdfium. `None` binds the system/cwd copy.
    pub pdfium_library_path: Option<PathBuf>,

    /// Wall-clock cap for a single office engine invocation. Default: 180.
    pub automation_timeout_secs: u64,

    /// Wall-clock cap for OCR of a single page. Default: 120.
    pub ocr_timeout_secs: u64,

    /// HTTP timeout for one AI backend call. Default: 180.
    pub ai_timeout_secs: u64,

    /// Provider used when a request names none. Default: `gemini`.
    pub default_provider: String,

    /// Default model per provider name.
    pub provider_models: HashMap<String, String>,

    /// API key per provider name, used when a request carries none.
    pub api_keys: HashMap<String, String>,

    /// Base URL override per provider name (proxies, tests).
    pub provider_base_urls: HashMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let provider_models = HashMap::from([
            ("gemini".to_string(), "gemini-1.5-flash-latest".to_string()),
            ("openai".to_string(), "gpt-4o".to_string()),
        ]);
        Self {
            input_dir: PathBuf::from("temp_files"),
            output_dir: PathBuf::from("output_files"),
            download_prefix: "/downloads".to_string(),
            workers: 2,
            ocr_threshold: 100,
            ocr_dpi: 300,
            ocr_languages: "eng+chi_sim".to_string(),
            tesseract_path: PathBuf::from("tesseract"),
            soffice_path: PathBuf::from("soffice"),
            pdfium_library_path: None,
            automation_timeout_secs: 180,
            ocr_timeout_secs: 120,
            ai_timeout_secs: 180,
            default_provider: DEFAULT_PROVIDER.to_string(),
            provider_models,
            api_keys: HashMap::new(),
            provider_base_urls: HashMap::new(),
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut providers_with_keys: Vec<&String> = self.api_keys.keys().collect();
        providers_with_keys.sort();
        f.debug_struct("PipelineConfig")
            .field("input_dir", &self.input_dir)
            .field("output_dir", &self.output_dir)
            .field("download_prefix", &self.download_prefix)
            .field("workers", &self.workers)
            .field("ocr_threshold", &self.ocr_threshold)
            .field("ocr_dpi", &self.ocr_dpi)
            .field("ocr_languages", &self.ocr_languages)
            .field("tesseract_path", &self.tesseract_path)
            .field("soffice_path", &self.soffice_path)
            .field("pdfium_library_path", &self.pdfium_library_path)
            .field("default_provider", &self.default_provider)
            .field("provider_models", &self.provider_models)
            .field("api_keys", &providers_with_keys)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder seeded with defaults.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load configuration from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `DOCCONV_INPUT_DIR` | `temp_files` |
    /// | `DOCCONV_OUTPUT_DIR` | `output_files` |
    /// | `DOCCONV_DOWNLOAD_PREFIX` | `/downloads` |
    /// | `DOCCONV_WORKERS` | `2` |
    /// | `DOCCONV_OCR_THRESHOLD` | `100` |
    /// | `DOCCONV_OCR_DPI` | `300` |
    /// | `DOCCONV_OCR_LANGUAGES` | `eng+chi_sim` |
    /// | `TESSERACT_PATH` | `tesseract` |
    /// | `LIBREOFFICE_PATH` | `soffice` |
    /// | `PDFIUM_LIB_PATH` | unset |
    /// | `DOCCONV_AUTOMATION_TIMEOUT` | `180` |
    /// | `DOCCONV_OCR_TIMEOUT` | `120` |
    /// | `DOCCONV_AI_TIMEOUT` | `180` |
    /// | `AI_PROVIDER` | `gemini` |
    /// | `GEMINI_MODEL_NAME` / `OPENAI_MODEL_NAME` | provider defaults |
    /// | `GEMINI_API_KEY` / `OPENAI_API_KEY` | unset |
    pub fn from_env() -> Result<Self, ConvertError> {
        let mut b = Self::builder();

        if let Some(v) = env_var("DOCCONV_INPUT_DIR") {
            b = b.input_dir(v);
        }
        if let Some(v) = env_var("DOCCONV_OUTPUT_DIR") {
            b = b.output_dir(v);
        }
        if let Some(v) = env_var("DOCCONV_DOWNLOAD_PREFIX") {
            b = b.download_prefix(v);
        }
        if let Some(v) = env_parse("DOCCONV_WORKERS")? {
            b = b.workers(v);
        }
        if let Some(v) = env_parse("DOCCONV_OCR_THRESHOLD")? {
            b = b.ocr_threshold(v);
        }
        if let Some(v) = env_parse("DOCCONV_OCR_DPI")? {
            b = b.ocr_dpi(v);
        }
        if let Some(v) = env_var("DOCCONV_OCR_LANGUAGES") {
            b = b.ocr_languages(v);
        }
        if let Some(v) = env_var("TESSERACT_PATH") {
            b = b.tesseract_path(v);
        }
        if let Some(v) = env_var("LIBREOFFICE_PATH") {
            b = b.soffice_path(v);
        }
        if let Some(v) = env_var("PDFIUM_LIB_PATH") {
            b = b.pdfium_library_path(v);
        }
        if let Some(v) = env_parse("DOCCONV_AUTOMATION_TIMEOUT")? {
            b = b.automation_timeout_secs(v);
        }
        if let Some(v) = env_parse("DOCCONV_OCR_TIMEOUT")? {
            b = b.ocr_timeout_secs(v);
        }
        if let Some(v) = env_parse("DOCCONV_AI_TIMEOUT")? {
            b = b.ai_timeout_secs(v);
        }
        if let Some(v) = env_var("AI_PROVIDER") {
            b = b.default_provider(v);
        }
        for provider in ["gemini", "openai"] {
            let upper = provider.to_ascii_uppercase();
            if let Some(model) = env_var(&format!("{upper}_MODEL_NAME")) {
                b = b.provider_model(provider, model);
            }
            if let Some(key) = env_var(&format!("{upper}_API_KEY")) {
                b = b.api_key(provider, key);
            }
        }

        b.build()
    }

    /// Default model for `provider`, if one is configured.
    pub fn model_for(&self, provider: &str) -> Option<&str> {
        self.provider_models
            .get(&provider.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Configured API key for `provider`, if any.
    pub fn api_key_for(&self, provider: &str) -> Option<&str> {
        self.api_keys
            .get(&provider.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Base URL override for `provider`, if any.
    pub fn base_url_for(&self, provider: &str) -> Option<&str> {
        self.provider_base_urls
            .get(&provider.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.input_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn download_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        self.config.download_prefix = prefix.trim_end_matches('/').to_string();
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn ocr_threshold(mut self, chars: usize) -> Self {
        self.config.ocr_threshold = chars;
        self
    }

    pub fn ocr_dpi(mut self, dpi: u32) -> Self {
        self.config.ocr_dpi = dpi.clamp(300, 600);
        self
    }

    pub fn ocr_languages(mut self, langs: impl Into<String>) -> Self {
        self.config.ocr_languages = langs.into();
        self
    }

    pub fn tesseract_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tesseract_path = path.into();
        self
    }

    pub fn soffice_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.soffice_path = path.into();
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn automation_timeout_secs(mut self, secs: u64) -> Self {
        self.config.automation_timeout_secs = secs;
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn ai_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ai_timeout_secs = secs;
        self
    }

    pub fn default_provider(mut self, name: impl Into<String>) -> Self {
        self.config.default_provider = name.into().to_ascii_lowercase();
        self
    }

    pub fn provider_model(mut self, provider: &str, model: impl Into<String>) -> Self {
        self.config
            .provider_models
            .insert(provider.to_ascii_lowercase(), model.into());
        self
    }

    pub fn api_key(mut self, provider: &str, key: impl Into<String>) -> Self {
        self.config
            .api_keys
            .insert(provider.to_ascii_lowercase(), key.into());
        self
    }

    pub fn provider_base_url(mut self, provider: &str, url: impl Into<String>) -> Self {
        self.config
            .provider_base_urls
            .insert(provider.to_ascii_lowercase(), url.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ConvertError> {
        let c = &self.config;
        if c.input_dir.as_os_str().is_empty() || c.output_dir.as_os_str().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "input and output directories must be set".into(),
            ));
        }
        if c.input_dir == c.output_dir {
            return Err(ConvertError::InvalidConfig(format!(
                "input and output directories must differ, both are {:?}",
                c.input_dir
            )));
        }
        if c.ocr_languages.trim().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "OCR language set must not be empty".into(),
            ));
        }
        if c.automation_timeout_secs == 0 || c.ocr_timeout_secs == 0 || c.ai_timeout_secs == 0 {
            return Err(ConvertError::InvalidConfig("timeouts must be ≥ 1s".into()));
        }
        Ok(self.config)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConvertError> {
    match env_var(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            ConvertError::InvalidConfig(format!("{name} has an invalid value: '{raw}'"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.ocr_threshold, 100);
        assert_eq!(c.ocr_dpi, 300);
        assert_eq!(c.default_provider, "gemini");
        assert_eq!(c.model_for("gemini"), Some("gemini-1.5-flash-latest"));
        assert_eq!(c.model_for("OpenAI"), Some("gpt-4o"));
        assert_eq!(c.api_key_for("gemini"), None);
    }

    #[test]
    fn builder_clamps() {
        let c = PipelineConfig::builder()
            .workers(0)
            .ocr_dpi(72)
            .download_prefix("/files/")
            .build()
            .unwrap();
        assert_eq!(c.workers, 1);
        assert_eq!(c.ocr_dpi, 300);
        assert_eq!(c.download_prefix, "/files");
    }

    #[test]
    fn builder_rejects_shared_directories() {
        let err = PipelineConfig::builder()
            .input_dir("data")
            .output_dir("data")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConvertError::InvalidConfig(_)));
    }

    #[test]
    fn debug_redacts_api_keys() {
        let c = PipelineConfig::builder()
            .api_key("openai", "sk-very-secret")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(dbg.contains("openai"));
        assert!(!dbg.contains("sk-very-secret"));
    }
}
