use std::{env, str::FromStr};

use crate::error::{Result, WorkerErr};

const INDEX_VAR: &str = "WORKER_INDEX";
const DEVICE_VAR: &str = "WORKER_DEVICE";
const SEED_VAR: &str = "WORKER_SEED";

/// Where a worker sits in its pool, as told by the coordinator at launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerConfig {
    pub index: usize,
    pub device: i32,
    pub seed: Option<u64>,
}

impl WorkerConfig {
    /// Reads the configuration from the process environment.
    ///
    /// Missing variables fall back to worker 0 on device 0 with entropy seeding.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if a present variable doesn't parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            index: parse(&lookup, INDEX_VAR)?.unwrap_or_default(),
            device: parse(&lookup, DEVICE_VAR)?.unwrap_or_default(),
            seed: parse(&lookup, SEED_VAR)?,
        })
    }

    /// The seed of this worker's sampler, distinct per worker for a shared base seed.
    pub fn sampler_seed(&self) -> Option<u64> {
        self.seed.map(|seed| seed.wrapping_add(self.index as u64))
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| WorkerErr::InvalidConfig(format!("{key}={value} is not valid")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn reads_every_variable() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("WORKER_INDEX", "3"),
            ("WORKER_DEVICE", "1"),
            ("WORKER_SEED", "10"),
        ]))
        .unwrap();

        assert_eq!(config.index, 3);
        assert_eq!(config.device, 1);
        assert_eq!(config.sampler_seed(), Some(13));
    }

    #[test]
    fn missing_variables_use_defaults() {
        let config = WorkerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, WorkerConfig::default());
        assert_eq!(config.sampler_seed(), None);
    }

    #[test]
    fn malformed_variables_are_rejected() {
        let err = WorkerConfig::from_lookup(lookup(&[("WORKER_INDEX", "two")])).unwrap_err();
        assert!(matches!(err, WorkerErr::InvalidConfig(_)));
    }
}
