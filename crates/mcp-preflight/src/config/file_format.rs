use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct ConfigFile {
    pub(super) version: u32,
    #[serde(default)]
    pub(super) timeout_ms: Option<u64>,
    #[serde(default)]
    pub(super) shutdown_grace_ms: Option<u64>,
    #[serde(default)]
    pub(super) stderr_capture_bytes: Option<usize>,
    #[serde(default)]
    pub(super) client: Option<ClientConfigFile>,
    #[serde(default)]
    pub(super) signals: Option<SignalsConfigFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct ClientConfigFile {
    #[serde(default)]
    pub(super) name: Option<String>,
    #[serde(default)]
    pub(super) version: Option<String>,
    #[serde(default)]
    pub(super) protocol_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct SignalsConfigFile {
    #[serde(default)]
    pub(super) enabled: Option<bool>,
    #[serde(default)]
    pub(super) default_rules: Option<bool>,
    #[serde(default)]
    pub(super) rules: Vec<SignalRuleConfigFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct SignalRuleConfigFile {
    pub(super) label: String,
    pub(super) pattern: String,
}
