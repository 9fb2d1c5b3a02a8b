//! Runtime configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KilnError;
use crate::tensor::Flags;
use crate::Result;

/// Named capability flag, as written in config files and env vars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Scalar,
    Grad,
    Trace,
}

impl Capability {
    pub fn flag(self) -> Flags {
        match self {
            Capability::Scalar => Flags::SCALAR,
            Capability::Grad => Flags::GRAD,
            Capability::Trace => Flags::TRACE,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Scalar => "scalar",
            Capability::Grad => "grad",
            Capability::Trace => "trace",
        };
        f.write_str(name)
    }
}

impl FromStr for Capability {
    type Err = KilnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scalar" => Ok(Capability::Scalar),
            "grad" => Ok(Capability::Grad),
            "trace" => Ok(Capability::Trace),
            other => Err(KilnError::Config(format!("unknown capability `{other}`"))),
        }
    }
}

/// What plain dispatch does when eager and symbolic inputs are mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixedBackingPolicy {
    /// Fail with [`KilnError::MixedBacking`].
    #[default]
    Reject,
    /// Hand the symbolic inputs to the graph builder and let it decide.
    Graph,
}

impl FromStr for MixedBackingPolicy {
    type Err = KilnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(MixedBackingPolicy::Reject),
            "graph" => Ok(MixedBackingPolicy::Graph),
            other => Err(KilnError::Config(format!(
                "unknown mixed backing policy `{other}`"
            ))),
        }
    }
}

/// Settings for one [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Emit a debug event for every dispatch decision.
    pub log_dispatch: bool,
    /// Capabilities masked on every call through this runtime, on top of the
    /// thread's scoped mask.
    pub disabled: Vec<Capability>,
    pub mixed_backing: MixedBackingPolicy,
    /// Upper bound on recorded trace entries; unbounded when `None`.
    pub max_trace_entries: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_dispatch: false,
            disabled: Vec::new(),
            mixed_backing: MixedBackingPolicy::Reject,
            max_trace_entries: None,
        }
    }
}

impl RuntimeConfig {
    pub const ENV_LOG_DISPATCH: &'static str = "KILN_LOG_DISPATCH";
    pub const ENV_DISABLE: &'static str = "KILN_DISABLE";
    pub const ENV_MIXED_BACKING: &'static str = "KILN_MIXED_BACKING";
    pub const ENV_MAX_TRACE_ENTRIES: &'static str = "KILN_MAX_TRACE_ENTRIES";

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Defaults overridden by `KILN_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, keyed by the `ENV_*` names.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup(Self::ENV_LOG_DISPATCH) {
            self.log_dispatch = parse_bool(Self::ENV_LOG_DISPATCH, &v)?;
        }
        if let Some(v) = lookup(Self::ENV_DISABLE) {
            self.disabled = v
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(str::parse)
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(v) = lookup(Self::ENV_MIXED_BACKING) {
            self.mixed_backing = v.parse()?;
        }
        if let Some(v) = lookup(Self::ENV_MAX_TRACE_ENTRIES) {
            let n = v.trim().parse::<usize>().map_err(|e| {
                KilnError::Config(format!("{}: {e}", Self::ENV_MAX_TRACE_ENTRIES))
            })?;
            self.max_trace_entries = Some(n);
        }
        Ok(self)
    }

    /// The `disabled` list as a flag mask.
    pub fn disabled_flags(&self) -> Flags {
        self.disabled
            .iter()
            .fold(Flags::empty(), |acc, cap| acc | cap.flag())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(KilnError::Config(format!("{key}: expected a boolean, got `{other}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = RuntimeConfig::default();
        assert!(!cfg.log_dispatch);
        assert!(cfg.disabled_flags().is_empty());
        assert_eq!(cfg.mixed_backing, MixedBackingPolicy::Reject);
    }

    #[test]
    fn test_json_partial() {
        let cfg = RuntimeConfig::from_json(r#"{"disabled": ["trace"], "mixed_backing": "graph"}"#)
            .unwrap();
        assert_eq!(cfg.disabled, vec![Capability::Trace]);
        assert_eq!(cfg.disabled_flags(), Flags::TRACE);
        assert_eq!(cfg.mixed_backing, MixedBackingPolicy::Graph);
        assert_eq!(cfg.max_trace_entries, None);
    }

    #[test]
    fn test_json_rejects_unknown_capability() {
        let err = RuntimeConfig::from_json(r#"{"disabled": ["fast"]}"#).unwrap_err();
        assert!(matches!(err, KilnError::Config(_)));
    }

    #[test]
    fn test_json_round_trip() {
        let cfg = RuntimeConfig {
            log_dispatch: true,
            disabled: vec![Capability::Grad, Capability::Scalar],
            mixed_backing: MixedBackingPolicy::Graph,
            max_trace_entries: Some(64),
        };
        let json = cfg.to_json_pretty().unwrap();
        assert_eq!(RuntimeConfig::from_json(&json).unwrap(), cfg);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("KILN_LOG_DISPATCH", "on"),
            ("KILN_DISABLE", "grad, trace"),
            ("KILN_MAX_TRACE_ENTRIES", "10"),
        ]
        .into_iter()
        .collect();
        let cfg = RuntimeConfig::default()
            .with_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert!(cfg.log_dispatch);
        assert_eq!(cfg.disabled_flags(), Flags::GRAD | Flags::TRACE);
        assert_eq!(cfg.max_trace_entries, Some(10));
    }

    #[test]
    fn test_bad_override() {
        let err = RuntimeConfig::default()
            .with_overrides(|k| (k == "KILN_MIXED_BACKING").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, KilnError::Config(_)));
    }
}
