use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tokio::io::AsyncReadExt;

use super::file_format::ConfigFile;
use super::{ClientConfig, Config, SignalRuleConfig, SignalsConfig};

const DEFAULT_CONFIG_CANDIDATES: [&str; 2] = [".preflight.json", "preflight.json"];

#[cfg(unix)]
fn describe_file_type(meta: &std::fs::Metadata) -> &'static str {
    use std::os::unix::fs::FileTypeExt;

    let file_type = meta.file_type();
    if file_type.is_file() {
        "regular file"
    } else if file_type.is_dir() {
        "directory"
    } else if file_type.is_symlink() {
        "symlink"
    } else if file_type.is_fifo() {
        "fifo"
    } else if file_type.is_socket() {
        "socket"
    } else if file_type.is_char_device() || file_type.is_block_device() {
        "device"
    } else {
        "special file"
    }
}

#[cfg(not(unix))]
fn describe_file_type(meta: &std::fs::Metadata) -> &'static str {
    let file_type = meta.file_type();
    if file_type.is_file() {
        "regular file"
    } else if file_type.is_dir() {
        "directory"
    } else if file_type.is_symlink() {
        "symlink"
    } else {
        "special file"
    }
}

fn ensure_regular_file(meta: &std::fs::Metadata, path: &Path) -> anyhow::Result<()> {
    if !meta.file_type().is_file() {
        let kind = describe_file_type(meta);
        anyhow::bail!(
            "preflight config must be a regular file (got {kind}): {}",
            path.display()
        );
    }
    Ok(())
}

/// Reads at most `MAX_CONFIG_BYTES`, refusing symlinks and special files.
///
/// Returns `Ok(None)` when the file does not exist.
async fn read_config_file(path: &Path) -> anyhow::Result<Option<String>> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("stat {}", path.display())),
    };
    ensure_regular_file(&meta, path)?;

    let mut options = tokio::fs::OpenOptions::new();
    options.read(true);
    #[cfg(unix)]
    {
        options.custom_flags(libc::O_NOFOLLOW | libc::O_NONBLOCK);
    }
    let file = match options.open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };

    // The path may have been swapped between stat and open.
    let file_meta = file
        .metadata()
        .await
        .with_context(|| format!("stat {}", path.display()))?;
    ensure_regular_file(&file_meta, path)?;
    if file_meta.len() > super::MAX_CONFIG_BYTES {
        anyhow::bail!(
            "preflight config too large: {} bytes (max {}): {}",
            file_meta.len(),
            super::MAX_CONFIG_BYTES,
            path.display()
        );
    }

    let mut buf = Vec::new();
    file.take(super::MAX_CONFIG_BYTES + 1)
        .read_to_end(&mut buf)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    if buf.len() as u64 > super::MAX_CONFIG_BYTES {
        anyhow::bail!(
            "preflight config too large: {} bytes (max {}): {}",
            buf.len(),
            super::MAX_CONFIG_BYTES,
            path.display()
        );
    }

    let contents = String::from_utf8(buf)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
        .with_context(|| format!("read {}", path.display()))?;
    Ok(Some(contents))
}

impl Config {
    /// Load `preflight.json` (v1) from `root`, or the file at `override_path`.
    ///
    /// Without an override, a missing file yields the defaults. An explicit
    /// override that does not exist is an error.
    pub async fn load(root: &Path, override_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let (path, contents) = match override_path {
            Some(path) => {
                let path = if path.is_absolute() {
                    path
                } else {
                    root.join(path)
                };
                let contents = read_config_file(&path)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("preflight config not found: {}", path.display()))?;
                (path, contents)
            }
            None => {
                let mut found = None::<(PathBuf, String)>;
                for candidate in DEFAULT_CONFIG_CANDIDATES {
                    let candidate_path = root.join(candidate);
                    if let Some(contents) = read_config_file(&candidate_path).await? {
                        found = Some((candidate_path, contents));
                        break;
                    }
                }
                match found {
                    Some(found) => found,
                    None => {
                        tracing::debug!(root = %root.display(), "no preflight config, using defaults");
                        return Ok(Self::default());
                    }
                }
            }
        };

        let cfg = Self::parse(&contents).with_context(|| format!("parse {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded preflight config");
        Ok(Self {
            path: Some(path),
            ..cfg
        })
    }

    /// Parse and validate config text without touching the filesystem.
    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let json: serde_json::Value = serde_json::from_str(contents)?;
        match json.get("version") {
            Some(serde_json::Value::Number(_)) => {}
            Some(_) => anyhow::bail!("preflight config `version` must be a number"),
            None => anyhow::bail!(
                "unsupported preflight config: missing `version` (expected v{})",
                super::PREFLIGHT_CONFIG_VERSION
            ),
        }
        let file: ConfigFile = serde_json::from_value(json)?;
        if file.version != super::PREFLIGHT_CONFIG_VERSION {
            anyhow::bail!(
                "unsupported preflight config version {} (expected {})",
                file.version,
                super::PREFLIGHT_CONFIG_VERSION
            );
        }

        let defaults = Self::default();
        let client = match file.client {
            Some(client) => {
                let base = ClientConfig::default();
                ClientConfig {
                    name: client.name.unwrap_or(base.name),
                    version: client.version.unwrap_or(base.version),
                    protocol_version: client.protocol_version.unwrap_or(base.protocol_version),
                }
            }
            None => ClientConfig::default(),
        };
        let signals = match file.signals {
            Some(signals) => {
                let base = SignalsConfig::default();
                SignalsConfig {
                    enabled: signals.enabled.unwrap_or(base.enabled),
                    default_rules: signals.default_rules.unwrap_or(base.default_rules),
                    rules: signals
                        .rules
                        .into_iter()
                        .map(|rule| SignalRuleConfig {
                            label: rule.label,
                            pattern: rule.pattern,
                        })
                        .collect(),
                }
            }
            None => SignalsConfig::default(),
        };

        let cfg = Self {
            path: None,
            request_timeout: file
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            shutdown_grace: file
                .shutdown_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.shutdown_grace),
            stderr_capture_bytes: file
                .stderr_capture_bytes
                .unwrap_or(defaults.stderr_capture_bytes),
            client,
            signals,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}
