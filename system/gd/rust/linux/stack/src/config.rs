// Copyright 2024, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Runtime configuration for the LE Audio manager.

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_STATE_MACHINES: usize = 10;

const CONNECT_TIMEOUT_MS_KEY: &str = "connect_timeout_ms";
const MAX_STATE_MACHINES_KEY: &str = "max_state_machines";
const GRACE_SCOPE_KEY: &str = "grace_scope";
const LEAD_DROPOUT_GRACE_MS_KEY: &str = "lead_dropout_grace_ms";

/// Which group members may have a dropout absorbed while the group stays up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraceScope {
    /// Only the current active (lead) device of the active group.
    LeadOnly,
    /// Any connected member of the active group.
    AnyMember,
}

impl GraceScope {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "lead_only" => Some(GraceScope::LeadOnly),
            "any_member" => Some(GraceScope::AnyMember),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LeAudioConfig {
    /// How long a device may sit in Connecting or Disconnecting before it is forced down.
    pub connect_timeout: Duration,
    /// Upper bound on simultaneously tracked devices.
    pub max_state_machines: usize,
    pub grace_scope: GraceScope,
    /// Bound on how long an absorbed dropout is kept. `None` keeps it until the group goes down.
    pub lead_dropout_grace: Option<Duration>,
}

impl Default for LeAudioConfig {
    fn default() -> Self {
        LeAudioConfig {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            max_state_machines: DEFAULT_MAX_STATE_MACHINES,
            grace_scope: GraceScope::LeadOnly,
            lead_dropout_grace: None,
        }
    }
}

fn get_u64(obj: &Map<String, Value>, key: &str) -> Result<Option<u64>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| anyhow!("'{}' must be a non-negative integer, got {}", key, v)),
    }
}

impl LeAudioConfig {
    /// Parses a JSON object. Missing keys keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).context("LE Audio config is not valid JSON")?;
        let obj = value.as_object().ok_or_else(|| anyhow!("LE Audio config must be an object"))?;

        let mut config = LeAudioConfig::default();

        if let Some(ms) = get_u64(obj, CONNECT_TIMEOUT_MS_KEY)? {
            if ms == 0 {
                bail!("'{}' must be greater than zero", CONNECT_TIMEOUT_MS_KEY);
            }
            config.connect_timeout = Duration::from_millis(ms);
        }

        if let Some(max) = get_u64(obj, MAX_STATE_MACHINES_KEY)? {
            if max == 0 {
                bail!("'{}' must be at least 1", MAX_STATE_MACHINES_KEY);
            }
            config.max_state_machines = usize::try_from(max)
                .with_context(|| format!("'{}' is out of range", MAX_STATE_MACHINES_KEY))?;
        }

        match obj.get(GRACE_SCOPE_KEY) {
            None | Some(Value::Null) => {}
            Some(Value::String(name)) => {
                config.grace_scope = GraceScope::from_name(name)
                    .ok_or_else(|| anyhow!("Unknown grace scope '{}'", name))?;
            }
            Some(v) => bail!("'{}' must be a string, got {}", GRACE_SCOPE_KEY, v),
        }

        config.lead_dropout_grace =
            get_u64(obj, LEAD_DROPOUT_GRACE_MS_KEY)?.map(Duration::from_millis);

        Ok(config)
    }

    /// Reads and parses a config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read LE Audio config {}", path.display()))?;
        Self::from_json(&text)
            .with_context(|| format!("Invalid LE Audio config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = LeAudioConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.max_state_machines, 10);
        assert_eq!(config.grace_scope, GraceScope::LeadOnly);
        assert_eq!(config.lead_dropout_grace, None);
        assert_eq!(LeAudioConfig::from_json("{}").unwrap(), config);
    }

    #[test]
    fn parse_all_keys() {
        let config = LeAudioConfig::from_json(
            r#"{
                "connect_timeout_ms": 1500,
                "max_state_machines": 3,
                "grace_scope": "any_member",
                "lead_dropout_grace_ms": 2000
            }"#,
        )
        .unwrap();
        assert_eq!(config.connect_timeout, Duration::from_millis(1500));
        assert_eq!(config.max_state_machines, 3);
        assert_eq!(config.grace_scope, GraceScope::AnyMember);
        assert_eq!(config.lead_dropout_grace, Some(Duration::from_secs(2)));
    }

    #[test]
    fn reject_bad_values() {
        assert!(LeAudioConfig::from_json("[]").is_err());
        assert!(LeAudioConfig::from_json("not json").is_err());
        assert!(LeAudioConfig::from_json(r#"{"connect_timeout_ms": 0}"#).is_err());
        assert!(LeAudioConfig::from_json(r#"{"connect_timeout_ms": -5}"#).is_err());
        assert!(LeAudioConfig::from_json(r#"{"max_state_machines": 0}"#).is_err());
        assert!(LeAudioConfig::from_json(r#"{"grace_scope": "everyone"}"#).is_err());
        assert!(LeAudioConfig::from_json(r#"{"grace_scope": 1}"#).is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_state_machines": 4, "lead_dropout_grace_ms": null}}"#).unwrap();

        let config = LeAudioConfig::load(file.path()).unwrap();
        assert_eq!(config.max_state_machines, 4);
        assert_eq!(config.lead_dropout_grace, None);

        assert!(LeAudioConfig::load(file.path().with_extension("missing")).is_err());
    }
}
