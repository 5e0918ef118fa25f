use std::fs;

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::core::{
    error::{EngineError, EngineResult},
    types::LookupMechanism,
};

#[derive(Default, Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    #[serde(default)]
    pub engine: Engine,

    #[serde(default)]
    pub lookup: Lookup,

    #[validate(nested)]
    #[serde(default)]
    pub cooldown: Cooldown,

    #[validate(nested)]
    #[serde(default)]
    pub cache: Cache,

    pub log: Option<Log>,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> EngineResult<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path).map_err(|e| {
            crate::config_error!("Unable to read conf file from {}: {}", path, e)
        })?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> EngineResult<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str)
            .map_err(|e| crate::config_error!("Unable to parse yaml conf: {}", e))?;

        trace!("Loaded conf: {conf:?}");

        conf.validate()
            .map_err(|e| EngineError::Configuration(format!("Conf file valid failed: {e}")))?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> EngineResult<String> {
        serde_yaml::to_string(self).map_err(|e| crate::config_error!(e))
    }
}

/// Admission, pacing and fan-out knobs of the engine.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Engine {
    #[serde(default = "Engine::default_max_concurrent")]
    #[validate(range(min = 1))]
    pub max_concurrent: usize,

    #[serde(default = "Engine::default_pacing_interval_ms")]
    pub pacing_interval_ms: u64,

    #[serde(default = "Engine::default_task_timeout_ms")]
    #[validate(range(min = 1))]
    pub task_timeout_ms: u64,

    #[serde(default = "Engine::default_max_targets_per_lookup")]
    #[validate(range(min = 1))]
    pub max_targets_per_lookup: usize,

    #[serde(default = "Engine::default_cache_shortcut")]
    pub cache_shortcut: bool,
}

impl Engine {
    fn default_max_concurrent() -> usize {
        1
    }

    fn default_pacing_interval_ms() -> u64 {
        100
    }

    fn default_task_timeout_ms() -> u64 {
        180_000
    }

    fn default_max_targets_per_lookup() -> usize {
        100
    }

    fn default_cache_shortcut() -> bool {
        true
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            max_concurrent: Self::default_max_concurrent(),
            pacing_interval_ms: Self::default_pacing_interval_ms(),
            task_timeout_ms: Self::default_task_timeout_ms(),
            max_targets_per_lookup: Self::default_max_targets_per_lookup(),
            cache_shortcut: Self::default_cache_shortcut(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Lookup {
    #[serde(default)]
    pub mechanism: LookupMechanism,

    // only meaningful for presence lookups
    #[serde(default = "Lookup::default_group_lookup")]
    pub group_lookup: bool,
}

impl Lookup {
    fn default_group_lookup() -> bool {
        true
    }
}

impl Default for Lookup {
    fn default() -> Self {
        Self {
            mechanism: LookupMechanism::default(),
            group_lookup: Self::default_group_lookup(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Cooldown {
    #[serde(default = "Cooldown::default_duration_secs")]
    pub duration_secs: u64,

    #[serde(default = "Cooldown::default_inconclusive_sip_codes")]
    #[validate(custom(function = "validate_sip_codes"))]
    pub inconclusive_sip_codes: Vec<u16>,
}

impl Cooldown {
    fn default_duration_secs() -> u64 {
        3600
    }

    fn default_inconclusive_sip_codes() -> Vec<u16> {
        vec![408, 480]
    }
}

impl Default for Cooldown {
    fn default() -> Self {
        Self {
            duration_secs: Self::default_duration_secs(),
            inconclusive_sip_codes: Self::default_inconclusive_sip_codes(),
        }
    }
}

fn validate_sip_codes(codes: &[u16]) -> Result<(), ValidationError> {
    for &code in codes {
        if !(100..=699).contains(&code) {
            let mut err = ValidationError::new("invalid_sip_code");
            err.add_param("code".into(), &code);
            return Err(err);
        }
    }
    Ok(())
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Cache {
    #[serde(default = "Cache::default_capability_ttl_secs")]
    #[validate(range(min = 1))]
    pub capability_ttl_secs: u64,

    #[serde(default = "Cache::default_availability_ttl_secs")]
    #[validate(range(min = 1))]
    pub availability_ttl_secs: u64,
}

impl Cache {
    fn default_capability_ttl_secs() -> u64 {
        7 * 24 * 3600
    }

    fn default_availability_ttl_secs() -> u64 {
        60
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            capability_ttl_secs: Self::default_capability_ttl_secs(),
            availability_ttl_secs: Self::default_availability_ttl_secs(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Log {
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_default_config() {
        init_log();
        let conf = Config::from_yaml("---\n{}").unwrap();
        assert_eq!(1, conf.engine.max_concurrent);
        assert_eq!(100, conf.engine.pacing_interval_ms);
        assert_eq!(180_000, conf.engine.task_timeout_ms);
        assert_eq!(100, conf.engine.max_targets_per_lookup);
        assert!(conf.engine.cache_shortcut);
        assert_eq!(LookupMechanism::Presence, conf.lookup.mechanism);
        assert!(conf.lookup.group_lookup);
        assert_eq!(vec![408, 480], conf.cooldown.inconclusive_sip_codes);
        assert!(conf.log.is_none());
        print!("{}", conf.to_yaml().unwrap());
    }

    #[test]
    fn test_load_file() {
        init_log();
        let conf_str = r#"
---
engine:
  max_concurrent: 4
  pacing_interval_ms: 250
  task_timeout_ms: 5000
  max_targets_per_lookup: 20
  cache_shortcut: false

lookup:
  mechanism: options
  group_lookup: false

cooldown:
  duration_secs: 60
  inconclusive_sip_codes: [408]

cache:
  capability_ttl_secs: 3600
  availability_ttl_secs: 30

log:
  path: /tmp/capflow/engine.log
        "#;
        let conf = Config::from_yaml(conf_str).unwrap();
        assert_eq!(4, conf.engine.max_concurrent);
        assert_eq!(250, conf.engine.pacing_interval_ms);
        assert_eq!(5000, conf.engine.task_timeout_ms);
        assert_eq!(20, conf.engine.max_targets_per_lookup);
        assert!(!conf.engine.cache_shortcut);
        assert_eq!(LookupMechanism::Options, conf.lookup.mechanism);
        assert!(!conf.lookup.group_lookup);
        assert_eq!(60, conf.cooldown.duration_secs);
        assert_eq!(30, conf.cache.availability_ttl_secs);
        assert_eq!("/tmp/capflow/engine.log", conf.log.unwrap().path);
    }

    #[test]
    fn test_valid_max_concurrent() {
        init_log();
        let conf_str = r#"
---
engine:
  max_concurrent: 0
        "#;
        match Config::from_yaml(conf_str) {
            Ok(_) => panic!("Expected error, but got a valid config"),
            Err(e) => {
                eprintln!("Error: {:?}", e);
                assert!(matches!(e, EngineError::Configuration(_)));
            }
        }
    }

    #[test]
    fn test_valid_max_targets_per_lookup() {
        init_log();
        let conf_str = r#"
---
engine:
  max_targets_per_lookup: 0
        "#;
        assert!(Config::from_yaml(conf_str).is_err());
    }

    #[test]
    fn test_valid_inconclusive_sip_codes() {
        init_log();
        let conf_str = r#"
---
cooldown:
  inconclusive_sip_codes: [408, 42]
        "#;
        assert!(Config::from_yaml(conf_str).is_err());
    }

    #[test]
    fn test_invalid_mechanism() {
        init_log();
        let conf_str = r#"
---
lookup:
  mechanism: carrier-pigeon
        "#;
        assert!(Config::from_yaml(conf_str).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        init_log();
        let err = Config::load_from_yaml("/nonexistent/capflow.yaml").unwrap_err();
        assert!(err.to_string().contains("Unable to read conf file"));
    }
}
