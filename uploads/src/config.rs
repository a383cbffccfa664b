//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `UPLOADS_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `UPLOADS_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `UPLOADS_LIMITS__MAX_FILE_SIZE=1048576` sets the `limits.max_file_size` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use uploads::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port` - HTTP server binding configuration
//! - **Limits**: `limits.max_file_size`, `limits.max_request_size` - upload size ceilings
//! - **Images**: `images.allowed_content_types`, `images.key_prefix` - what is accepted and where it lands
//! - **Storage**: `storage.type` (`local`, `s3` or `memory`) plus backend specific settings
//! - **CORS**: `cors.allowed_origins`, `cors.max_age`
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! UPLOADS_PORT=8080
//!
//! # Store uploads in a bucket
//! UPLOADS_STORAGE__TYPE=s3
//! UPLOADS_STORAGE__BUCKET=my-images
//! UPLOADS_STORAGE__PUBLIC_URL=https://cdn.example.com
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "UPLOADS_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults, so an empty (or missing) config file yields a working
/// development server storing uploads on the local filesystem.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    /// Upload size ceilings
    pub limits: LimitsConfig,
    /// Accepted image types and object key layout
    pub images: ImagesConfig,
    /// Where uploaded objects are stored
    pub storage: StorageConfig,
    /// Cross-origin settings for browser clients
    pub cors: CorsConfig,
}

/// Upload size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum size in bytes of the uploaded file. Content past this point is discarded
    /// and the upload is rejected with "File size limit reached.".
    /// Default: 2MB
    pub max_file_size: u64,
    /// Maximum number of file bytes read per request, passed on or discarded. Once the file
    /// part goes past this, the handler stops reading the body and rejects the upload with
    /// "File size limit reached.". Must be at least `max_file_size`.
    /// Default: 10MB
    pub max_request_size: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size: 2 * 1024 * 1024,     // 2MB
            max_request_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Image validation and naming.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// Declared MIME types accepted by the uploader
    pub allowed_content_types: Vec<String>,
    /// Prefix (folder) prepended to every object key
    pub key_prefix: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            allowed_content_types: vec![
                "image/jpg".to_string(),
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
            ],
            key_prefix: "uploads".to_string(),
        }
    }
}

/// Object storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Store objects in a directory on the local filesystem
    Local {
        /// Directory where objects are written (default: .uploads_data)
        path: PathBuf,
        /// Base URL under which stored objects are reachable
        public_url: Url,
        /// Serve the directory at `/files` from this server (default: true)
        #[serde(default = "default_serve_files")]
        serve_files: bool,
    },
    /// Store objects in an S3-compatible bucket (AWS S3, Cloudflare R2, MinIO, ...)
    ///
    /// Credentials are read from the standard AWS environment
    /// (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, profiles, ...).
    S3 {
        /// Bucket name
        bucket: String,
        /// Region override; falls back to the AWS environment
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<String>,
        /// Custom endpoint for S3-compatible providers
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint_url: Option<Url>,
        /// Base URL under which stored objects are publicly reachable
        public_url: Url,
        /// Use path-style addressing (required by most self-hosted providers)
        #[serde(default)]
        force_path_style: bool,
    },
    /// Keep objects in memory (development and tests only)
    Memory {
        /// Base URL reported for stored objects
        public_url: Url,
    },
}

fn default_serve_files() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local {
            path: PathBuf::from(".uploads_data"),
            public_url: Url::parse("http://localhost:3333/files").expect("static URL is valid"),
            serve_files: true,
        }
    }
}

impl StorageConfig {
    /// Base URL that object keys are appended to
    pub fn public_url(&self) -> &Url {
        match self {
            StorageConfig::Local { public_url, .. } => public_url,
            StorageConfig::S3 { public_url, .. } => public_url,
            StorageConfig::Memory { public_url } => public_url,
        }
    }

    /// Directory to expose at `/files`, if the local backend is configured to serve it
    pub fn served_directory(&self) -> Option<&PathBuf> {
        match self {
            StorageConfig::Local {
                path, serve_files: true, ..
            } => Some(path),
            _ => None,
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            max_age: Some(3600), // Cache preflight for 1 hour
        }
    }
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3333,
            enable_otel_export: false,
            limits: LimitsConfig::default(),
            images: ImagesConfig::default(),
            storage: StorageConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.limits.max_file_size == 0 {
            return Err(Error::Internal {
                operation: "Config validation: limits.max_file_size must be greater than 0".to_string(),
            });
        }

        if self.limits.max_request_size < self.limits.max_file_size {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: limits.max_request_size ({}) cannot be smaller than limits.max_file_size ({})",
                    self.limits.max_request_size, self.limits.max_file_size
                ),
            });
        }

        if self.images.allowed_content_types.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: images.allowed_content_types cannot be empty".to_string(),
            });
        }

        let public_url = self.storage.public_url();
        if !matches!(public_url.scheme(), "http" | "https") {
            return Err(Error::Internal {
                operation: format!("Config validation: storage public_url must be http(s), got '{public_url}'"),
            });
        }

        if let StorageConfig::S3 { bucket, .. } = &self.storage
            && bucket.trim().is_empty()
        {
            return Err(Error::Internal {
                operation: "Config validation: storage.bucket cannot be empty".to_string(),
            });
        }

        if self.cors.allowed_origins.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: CORS allowed_origins cannot be empty. Add at least one allowed origin.".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            // UPLOADS_CONFIG names the file itself, not a setting
            .merge(Env::prefixed("UPLOADS_").ignore(&["CONFIG"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_defaults_without_config_file() {
        Jail::expect_with(|_jail| {
            let config = Config::load(&args("missing.yaml"))?;

            assert_eq!(config.port, 3333);
            assert_eq!(config.limits.max_file_size, 2_097_152);
            assert_eq!(config.images.key_prefix, "uploads");
            assert!(config.images.allowed_content_types.contains(&"image/png".to_string()));
            assert!(matches!(config.storage, StorageConfig::Local { serve_files: true, .. }));

            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
port: 4000
limits:
  max_file_size: 1024
"#,
            )?;

            jail.set_env("UPLOADS_HOST", "127.0.0.1");
            jail.set_env("UPLOADS_LIMITS__MAX_REQUEST_SIZE", "4096");

            let config = Config::load(&args("test.yaml"))?;

            // Env vars should override
            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.limits.max_request_size, 4096);

            // YAML values should be preserved
            assert_eq!(config.port, 4000);
            assert_eq!(config.limits.max_file_size, 1024);

            Ok(())
        });
    }

    #[test]
    fn test_s3_storage_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
storage:
  type: s3
  bucket: images
  region: auto
  endpoint_url: https://account.r2.cloudflarestorage.com
  public_url: https://cdn.example.com
"#,
            )?;

            let config = Config::load(&args("test.yaml"))?;

            match config.storage {
                StorageConfig::S3 {
                    bucket,
                    region,
                    endpoint_url,
                    public_url,
                    force_path_style,
                } => {
                    assert_eq!(bucket, "images");
                    assert_eq!(region.as_deref(), Some("auto"));
                    assert_eq!(
                        endpoint_url.map(|u| u.to_string()),
                        Some("https://account.r2.cloudflarestorage.com/".to_string())
                    );
                    assert_eq!(public_url.as_str(), "https://cdn.example.com/");
                    assert!(!force_path_style);
                }
                other => panic!("expected s3 storage, got {other:?}"),
            }

            Ok(())
        });
    }

    #[test]
    fn test_unknown_fields_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "limits:\n  max_file_sze: 10\n")?;

            assert!(Config::load(&args("test.yaml")).is_err());

            Ok(())
        });
    }

    #[test]
    fn test_config_validation_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_file_size() {
        let mut config = Config::default();
        config.limits.max_file_size = 0;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("max_file_size"));
    }

    #[test]
    fn test_config_validation_request_smaller_than_file() {
        let mut config = Config::default();
        config.limits.max_file_size = 4096;
        config.limits.max_request_size = 1024;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("max_request_size"));
    }

    #[test]
    fn test_config_validation_empty_allow_list() {
        let mut config = Config::default();
        config.images.allowed_content_types.clear();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_non_http_public_url() {
        let mut config = Config::default();
        config.storage = StorageConfig::Memory {
            public_url: Url::parse("ftp://files.example.com").unwrap(),
        };

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("public_url"));
    }

    #[test]
    fn test_served_directory_only_for_local() {
        let config = Config::default();
        assert_eq!(config.storage.served_directory(), Some(&PathBuf::from(".uploads_data")));

        let memory = StorageConfig::Memory {
            public_url: Url::parse("http://localhost/files").unwrap(),
        };
        assert!(memory.served_directory().is_none());
    }
}
