use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisSection,
    #[serde(default)]
    pub targets: TargetsSection,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisSection {
    #[serde(default = "default_oversample")]
    pub oversample: u32,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub timeout_seconds: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct TargetsSection {
    pub mode: Option<String>,
    pub file: Option<PathBuf>,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self { oversample: default_oversample(), strict: false, timeout_seconds: 0 }
    }
}

fn default_oversample() -> u32 { 4 }

pub fn load_config(path: &PathBuf) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}
