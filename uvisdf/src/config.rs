use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uviscore::rejection::fixed::FixedIterationConfig;
use uviscore::rejection::free::FreeIterationConfig;

/// Which temporal rejection engine a run uses, with its parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum RejectionMethod {
    Fixed(FixedIterationConfig),
    Free(FreeIterationConfig),
}

impl Default for RejectionMethod {
    fn default() -> Self {
        RejectionMethod::Fixed(FixedIterationConfig::default())
    }
}

impl RejectionMethod {
    pub fn name(&self) -> &'static str {
        match self {
            RejectionMethod::Fixed(_) => "fixed",
            RejectionMethod::Free(_) => "free",
        }
    }
}

/// Configuration of one temporal rejection run over an observation file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stage1Config {
    /// observation to read
    pub input: PathBuf,
    /// where the corrected observation is written
    pub output: PathBuf,
    /// rejection steps, run in order on the same observation (default: one fixed step)
    #[serde(default = "default_rejection")]
    pub rejection: Vec<RejectionMethod>,
    /// optional JSON report of the run
    #[serde(default)]
    pub report: Option<PathBuf>,
    /// zstd level for `.zst` outputs (default: 3)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

fn default_compression_level() -> i32 {
    3
}

fn default_rejection() -> Vec<RejectionMethod> {
    vec![RejectionMethod::default()]
}

impl Stage1Config {
    pub fn new(input: PathBuf, output: PathBuf, rejection: Vec<RejectionMethod>) -> Self {
        Stage1Config {
            input,
            output,
            rejection,
            report: None,
            compression_level: default_compression_level(),
        }
    }

    /// Directory for diagnostics that have no explicit target
    pub fn default_diagnostics_dir(&self) -> PathBuf {
        self.output
            .parent()
            .map(|p| p.join("diagnostics"))
            .unwrap_or_else(|| PathBuf::from("diagnostics"))
    }

    /// Fallback diagnostics directory of step `index`.
    ///
    /// Steps share frame labels, so chained runs get one subdirectory per step.
    pub fn step_diagnostics_dir(&self, index: usize) -> PathBuf {
        let dir = self.default_diagnostics_dir();
        if self.rejection.len() > 1 {
            dir.join(format!("{}_{}", index, self.rejection[index].name()))
        } else {
            dir
        }
    }
}

/// Loads a run configuration from a JSON file
pub fn load_config(path: &Path) -> Result<Stage1Config, Box<dyn Error>> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("failed to read config {}: {}", path.display(), e))?;
    let config = serde_json::from_str(&text)
        .map_err(|e| format!("failed to parse config {}: {}", path.display(), e))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uviscore::rejection::Replacement;
    use uviscore::Spread;

    #[test]
    fn test_parse_fixed_config() {
        let text = r#"{
            "input": "obs.json",
            "output": "out/obs.json.zst",
            "rejection": [{
                "method": "fixed",
                "sigmas": [10.0, 8.0, 6.0],
                "replacement": { "kind": "windowed_median", "window": 2 },
                "diagnostics": "aggregate"
            }]
        }"#;

        let config: Stage1Config = serde_json::from_str(text).unwrap();
        assert_eq!(config.compression_level, 3);
        assert_eq!(config.rejection.len(), 1);
        match &config.rejection[0] {
            RejectionMethod::Fixed(fixed) => {
                assert_eq!(fixed.sigmas, vec![10.0, 8.0, 6.0]);
                assert_eq!(fixed.replacement, Replacement::WindowedMedian { window: 2 });
                assert_eq!(fixed.num_threads, 0);
            }
            other => panic!("expected fixed method, got {:?}", other),
        }
        assert_eq!(config.step_diagnostics_dir(0), PathBuf::from("out/diagnostics"));
    }

    #[test]
    fn test_parse_free_config_defaults() {
        let text = r#"{
            "input": "obs.json",
            "output": "clean.json",
            "rejection": [{ "method": "free", "clip": { "spread": "mad" } }]
        }"#;

        let config: Stage1Config = serde_json::from_str(text).unwrap();
        match &config.rejection[0] {
            RejectionMethod::Free(free) => {
                assert_eq!(free.clip.threshold, 3.5);
                assert_eq!(free.clip.spread, Spread::Mad);
                assert_eq!(free.clip.max_iterations, None);
            }
            other => panic!("expected free method, got {:?}", other),
        }
        assert_eq!(config.rejection[0].name(), "free");
    }

    #[test]
    fn test_missing_rejection_defaults_to_one_fixed_step() {
        let config: Stage1Config =
            serde_json::from_str(r#"{ "input": "obs.json", "output": "clean.json" }"#).unwrap();

        assert_eq!(config.rejection, vec![RejectionMethod::default()]);
        assert_eq!(config.step_diagnostics_dir(0), PathBuf::from("diagnostics"));
    }

    #[test]
    fn test_chained_steps_keep_order_and_separate_diagnostics() {
        let text = r#"{
            "input": "obs.json",
            "output": "out/clean.json",
            "rejection": [
                { "method": "fixed", "sigmas": [10.0] },
                { "method": "free", "clip": { "threshold": 3.0 } }
            ]
        }"#;

        let config: Stage1Config = serde_json::from_str(text).unwrap();
        let names: Vec<&str> = config.rejection.iter().map(|step| step.name()).collect();
        assert_eq!(names, vec!["fixed", "free"]);
        assert_eq!(config.step_diagnostics_dir(0), PathBuf::from("out/diagnostics/0_fixed"));
        assert_eq!(config.step_diagnostics_dir(1), PathBuf::from("out/diagnostics/1_free"));
    }
}
