//! `preflight.json` loader + validation.

mod file_format;
mod load;
mod model;


pub use model::{ClientConfig, Config, SignalRuleConfig, SignalsConfig};

pub(crate) const MAX_CONFIG_BYTES: u64 = 1024 * 1024;
pub(crate) const PREFLIGHT_CONFIG_VERSION: u32 = 1;
