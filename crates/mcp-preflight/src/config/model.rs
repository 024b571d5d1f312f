use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::handshake::ClientInfo;
use crate::inspect::{DEFAULT_CALL_TIMEOUT, DEFAULT_SHUTDOWN_GRACE, InspectOptions};
use crate::protocol::{MCP_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS, is_supported_protocol_version};
use crate::signals::{SignalRule, SignalScanner};

const MAX_CALL_TIMEOUT: Duration = Duration::from_secs(600);
const MAX_SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let info = ClientInfo::default();
        Self {
            name: info.name,
            version: info.version,
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("preflight client.name must not be empty");
        }
        if self.version.trim().is_empty() {
            anyhow::bail!("preflight client.version must not be empty");
        }
        if !is_supported_protocol_version(&self.protocol_version) {
            anyhow::bail!(
                "preflight client.protocol_version {} is not supported (expected one of: {})",
                self.protocol_version,
                SUPPORTED_PROTOCOL_VERSIONS.join(", ")
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalRuleConfig {
    pub label: String,
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalsConfig {
    pub enabled: bool,
    pub default_rules: bool,
    pub rules: Vec<SignalRuleConfig>,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_rules: true,
            rules: Vec::new(),
        }
    }
}

impl SignalsConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut labels = HashSet::new();
        for (idx, rule) in self.rules.iter().enumerate() {
            if rule.label.trim().is_empty() {
                anyhow::bail!("preflight signals.rules[{idx}].label must not be empty");
            }
            if !labels.insert(rule.label.as_str()) {
                anyhow::bail!("preflight signals.rules[{idx}]: duplicate label {}", rule.label);
            }
            if rule.pattern.is_empty() {
                anyhow::bail!("preflight signals.rules[{idx}].pattern must not be empty");
            }
            SignalRule::new(rule.label.as_str(), &rule.pattern).map_err(|err| {
                anyhow::anyhow!("preflight signals.rules[{idx}] ({}): {err}", rule.label)
            })?;
        }
        Ok(())
    }

    /// The configured scanner, or `None` when scanning is switched off.
    pub fn scanner(&self) -> anyhow::Result<Option<SignalScanner>> {
        if !self.enabled {
            return Ok(None);
        }
        let mut scanner = if self.default_rules {
            SignalScanner::with_default_rules()
        } else {
            SignalScanner::default()
        };
        for rule in &self.rules {
            let compiled = SignalRule::new(rule.label.as_str(), &rule.pattern)
                .map_err(|err| anyhow::anyhow!("signal rule {}: {err}", rule.label))?;
            scanner.push(compiled);
        }
        Ok(Some(scanner))
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(super) path: Option<PathBuf>,
    pub(super) request_timeout: Duration,
    pub(super) shutdown_grace: Duration,
    pub(super) stderr_capture_bytes: usize,
    pub(super) client: ClientConfig,
    pub(super) signals: SignalsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: None,
            request_timeout: DEFAULT_CALL_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            stderr_capture_bytes: mcp_jsonrpc::DEFAULT_STDERR_CAPTURE_BYTES,
            client: ClientConfig::default(),
            signals: SignalsConfig::default(),
        }
    }
}

impl Config {
    /// The file this config was read from; `None` for built-in defaults.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    pub fn stderr_capture_bytes(&self) -> usize {
        self.stderr_capture_bytes
    }

    pub fn client(&self) -> &ClientConfig {
        &self.client
    }

    pub fn signals(&self) -> &SignalsConfig {
        &self.signals
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_protocol_version(mut self, protocol_version: impl Into<String>) -> Self {
        self.client.protocol_version = protocol_version.into();
        self
    }

    pub fn with_signals_enabled(mut self, enabled: bool) -> Self {
        self.signals.enabled = enabled;
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.request_timeout.is_zero() {
            anyhow::bail!("preflight timeout_ms must be >= 1");
        }
        if self.request_timeout > MAX_CALL_TIMEOUT {
            anyhow::bail!(
                "preflight timeout_ms must be <= {}",
                MAX_CALL_TIMEOUT.as_millis()
            );
        }
        if self.shutdown_grace > MAX_SHUTDOWN_GRACE {
            anyhow::bail!(
                "preflight shutdown_grace_ms must be <= {}",
                MAX_SHUTDOWN_GRACE.as_millis()
            );
        }
        if self.stderr_capture_bytes == 0 {
            anyhow::bail!("preflight stderr_capture_bytes must be >= 1");
        }
        self.client.validate()?;
        self.signals.validate()?;
        Ok(())
    }

    /// Validates, then turns the config into run options.
    pub fn inspect_options(&self) -> anyhow::Result<InspectOptions> {
        self.validate()?;
        Ok(InspectOptions {
            client_info: ClientInfo {
                name: self.client.name.clone(),
                version: self.client.version.clone(),
            },
            protocol_version: self.client.protocol_version.clone(),
            call_timeout: self.request_timeout,
            shutdown_grace: self.shutdown_grace,
            stderr_capture_bytes: self.stderr_capture_bytes,
            signals: self.signals.scanner()?,
        })
    }
}
