//! Config - instrumentation の設定
//!
//! JSON（serde）か、エージェント引数形式の文字列
//! `worker_guard=false,audit=true` から読み込めます。
//! 未知のキーはエラー（typo を黙って無視しない）。

use serde::Deserialize;

use crate::error::BatonError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatonConfig {
    /// Wrap the worker entry point of pools that have one.
    pub worker_guard: bool,
    /// Record every injection at `info` level (otherwise `debug`).
    pub audit: bool,
}

impl Default for BatonConfig {
    fn default() -> Self {
        Self {
            worker_guard: true,
            audit: true,
        }
    }
}

impl BatonConfig {
    pub fn from_json(json: &str) -> Result<Self, BatonError> {
        serde_json::from_str(json).map_err(|e| BatonError::Config(format!("json decode: {e}")))
    }

    /// Parse `key=value` pairs separated by commas. Empty input gives the
    /// defaults.
    pub fn from_agent_args(args: &str) -> Result<Self, BatonError> {
        let mut config = Self::default();
        for pair in args.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| BatonError::Config(format!("expected key=value, got '{pair}'")))?;
            let key = key.trim();
            let slot = match key {
                "worker_guard" => &mut config.worker_guard,
                "audit" => &mut config.audit,
                other => return Err(BatonError::Config(format!("unknown key '{other}'"))),
            };
            *slot = parse_bool(key, value.trim())?;
        }
        Ok(config)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, BatonError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(BatonError::Config(format!("{key}: expected true or false, got '{other}'"))),
    }
}
