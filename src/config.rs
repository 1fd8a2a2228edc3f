// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::quantity::is_valid_quantity;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

pub const UNLIMITED_RESOURCE: &str = "unlimited";

const MAX_RESYNC_JITTER: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn duration_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9]+)(ms|s|m|h)$").ok()).as_ref()
}

/// Parses durations of the form `500ms`, `30s`, `5m` or `1h`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let caps = duration_regex()?.captures(value.trim())?;
    let amount: u64 = caps.get(1)?.as_str().parse().ok()?;
    match caps.get(2)?.as_str() {
        "ms" => Some(Duration::from_millis(amount)),
        "s" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_secs(amount * 60)),
        "h" => Some(Duration::from_secs(amount * 3600)),
        _ => None,
    }
}

pub fn format_duration(d: &Duration) -> String {
    if d.subsec_millis() != 0 || d.as_secs() == 0 && !d.is_zero() {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}s", d.as_secs())
    }
}

mod duration_str {
    use super::{format_duration, parse_duration};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_duration(d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        parse_duration(&raw).ok_or_else(|| D::Error::custom(format!("invalid duration {:?}", raw)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResourceAmount {
    pub mem: String,
    pub cpu: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResourceDefaults {
    pub limit: ResourceAmount,
    pub request: ResourceAmount,
}

/// Image, version, port and resources used when an intent leaves them unset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ComponentDefaults {
    pub image: String,
    pub version: String,
    pub port: String,
    pub resource: ResourceDefaults,
}

impl ComponentDefaults {
    fn new(image: &str, version: &str, port: &str, limit: (&str, &str), request: (&str, &str)) -> Self {
        ComponentDefaults {
            image: image.to_string(),
            version: version.to_string(),
            port: port.to_string(),
            resource: ResourceDefaults {
                limit: ResourceAmount {
                    mem: limit.0.to_string(),
                    cpu: limit.1.to_string(),
                },
                request: ResourceAmount {
                    mem: request.0.to_string(),
                    cpu: request.1.to_string(),
                },
            },
        }
    }
}

/// OperatorConfig is loaded once at boot and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    /// Zero disables periodic resync.
    #[serde(with = "duration_str")]
    pub force_resync_interval: Duration,
    #[serde(with = "duration_str")]
    pub pod_wait_ready_timeout: Duration,
    #[serde(with = "duration_str")]
    pub pod_wait_ready_interval_check: Duration,
    #[serde(with = "duration_str")]
    pub app_ready_timeout: Duration,
    pub conflict_retries: u32,
    pub transient_failure_threshold: u32,
    pub cluster_domain_name: String,
    pub use_default_resources: bool,
    pub vmstorage: ComponentDefaults,
    pub vmselect: ComponentDefaults,
    pub vminsert: ComponentDefaults,
    pub vmagent: ComponentDefaults,
    pub vmalertmanager: ComponentDefaults,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        OperatorConfig {
            force_resync_interval: Duration::from_secs(60),
            pod_wait_ready_timeout: Duration::from_secs(80),
            pod_wait_ready_interval_check: Duration::from_secs(5),
            app_ready_timeout: Duration::from_secs(80),
            conflict_retries: 3,
            transient_failure_threshold: 5,
            cluster_domain_name: String::new(),
            use_default_resources: true,
            vmstorage: ComponentDefaults::new(
                "victoriametrics/vmstorage",
                "v1.114.0-cluster",
                "8482",
                ("1500Mi", "1000m"),
                ("500Mi", "250m"),
            ),
            vmselect: ComponentDefaults::new(
                "victoriametrics/vmselect",
                "v1.114.0-cluster",
                "8481",
                ("1000Mi", "500m"),
                ("500Mi", "100m"),
            ),
            vminsert: ComponentDefaults::new(
                "victoriametrics/vminsert",
                "v1.114.0-cluster",
                "8480",
                ("500Mi", "500m"),
                ("200Mi", "150m"),
            ),
            vmagent: ComponentDefaults::new(
                "victoriametrics/vmagent",
                "v1.114.0",
                "8429",
                ("500Mi", "200m"),
                ("200Mi", "50m"),
            ),
            vmalertmanager: ComponentDefaults::new(
                "prom/alertmanager",
                "v0.27.0",
                "9093",
                ("256Mi", "100m"),
                ("56Mi", "30m"),
            ),
        }
    }
}

impl OperatorConfig {
    pub fn from_yaml(raw: &str) -> Result<OperatorConfig, ConfigError> {
        let config: OperatorConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the config file if one is given, otherwise returns validated defaults.
    pub fn load(path: Option<&Path>) -> Result<OperatorConfig, ConfigError> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                OperatorConfig::from_yaml(&raw)
            }
            None => {
                let config = OperatorConfig::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, component) in [
            ("vmstorage", &self.vmstorage),
            ("vmselect", &self.vmselect),
            ("vminsert", &self.vminsert),
            ("vmagent", &self.vmagent),
            ("vmalertmanager", &self.vmalertmanager),
        ] {
            let res = &component.resource;
            for (field, value) in [
                ("request memory", &res.request.mem),
                ("request cpu", &res.request.cpu),
                ("limit memory", &res.limit.mem),
                ("limit cpu", &res.limit.cpu),
            ] {
                if value != UNLIMITED_RESOURCE && !is_valid_quantity(value) {
                    return Err(ConfigError::Invalid(format!(
                        "cannot parse resource {} {:?} for {}",
                        field, value, name
                    )));
                }
            }
            if component.port.parse::<u16>().is_err() {
                return Err(ConfigError::Invalid(format!("invalid port {:?} for {}", component.port, name)));
            }
        }
        if self.pod_wait_ready_interval_check.is_zero() {
            return Err(ConfigError::Invalid("podWaitReadyIntervalCheck must be non-zero".to_string()));
        }
        if self.pod_wait_ready_timeout.is_zero() || self.app_ready_timeout.is_zero() {
            return Err(ConfigError::Invalid("ready timeouts must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Interval until the next forced resync: the base interval plus a uniform
    /// jitter in `[0, min(interval/10, 10s))`. None when resync is disabled.
    pub fn resync_after_duration(&self) -> Option<Duration> {
        let p: f64 = rand::thread_rng().gen_range(0.0..1.0);
        self.resync_after_duration_with(p)
    }

    pub(crate) fn resync_after_duration_with(&self, p: f64) -> Option<Duration> {
        if self.force_resync_interval.is_zero() {
            return None;
        }
        let max_jitter = std::cmp::min(self.force_resync_interval / 10, MAX_RESYNC_JITTER);
        Some(self.force_resync_interval + max_jitter.mul_f64(p.clamp(0.0, 1.0)))
    }

    /// Cluster-internal DNS suffix used to address pods of a headless service.
    pub fn cluster_domain_suffix(&self) -> String {
        if self.cluster_domain_name.is_empty() {
            String::new()
        } else {
            format!(".{}", self.cluster_domain_name)
        }
    }
}
