//! Configuration loading and parsing.
//!
//! Parses `p9wl.toml` (or an override path given on the command line),
//! extracting the remote draw host/port, pipeline depth ceiling, scroll
//! region size override, FFT window override, and logging settings. Unknown
//! fields are ignored (TOML deserialization tolerance) so the file can
//! evolve without breaking older configs.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default = "RemoteConfig::default_host")]
    pub host: String,
    #[serde(default = "RemoteConfig::default_port")]
    pub port: u16,
}

impl RemoteConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }
    const fn default_port() -> u16 {
        564
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "PipelineConfig::default_max_depth")]
    pub max_depth: u32,
}

impl PipelineConfig {
    const fn default_max_depth() -> u32 {
        8
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_depth: Self::default_max_depth(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScrollConfig {
    #[serde(default = "ScrollConfig::default_region_size")]
    pub region_size: u32,
    #[serde(default = "ScrollConfig::default_max_shift")]
    pub max_shift: i32,
}

impl ScrollConfig {
    const fn default_region_size() -> u32 {
        512
    }
    const fn default_max_shift() -> i32 {
        64
    }
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            region_size: Self::default_region_size(),
            max_shift: Self::default_max_shift(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PhaseConfig {
    #[serde(default = "PhaseConfig::default_fft_window")]
    pub fft_window: usize,
}

impl PhaseConfig {
    const fn default_fft_window() -> usize {
        256
    }
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            fft_window: Self::default_fft_window(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "LogConfig::default_level")]
    pub level: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl LogConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            path: None,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub scroll: ScrollConfig,
    #[serde(default)]
    pub phase: PhaseConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub raw: Option<String>,
    pub file: ConfigFile,
}

/// Best-effort config path following platform conventions (XDG / AppData
/// Roaming), preferring a local working-directory file first.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("p9wl.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("p9wl").join("p9wl.toml");
    }
    PathBuf::from("p9wl.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => Ok(Config {
                raw: Some(content),
                file,
            }),
            Err(e) => {
                tracing::warn!(target: "config", path = %path.display(), error = %e, "config_parse_error_using_defaults");
                Ok(Config::default())
            }
        }
    } else {
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn default_config_when_missing_file() {
        let cfg = load_from(Some(PathBuf::from("__nonexistent_hopefully__.toml"))).unwrap();
        assert_eq!(cfg.file.remote.host, "127.0.0.1");
        assert_eq!(cfg.file.remote.port, 564);
        assert_eq!(cfg.file.pipeline.max_depth, 8);
        assert_eq!(cfg.file.scroll.region_size, 512);
        assert_eq!(cfg.file.phase.fft_window, 256);
        assert_eq!(cfg.file.log.level, "info");
    }

    #[test]
    fn parses_remote_and_pipeline_settings() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            "[remote]\nhost = \"p9.example.org\"\nport = 17019\n\n[pipeline]\nmax_depth = 4\n",
        )
        .unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.file.remote.host, "p9.example.org");
        assert_eq!(cfg.file.remote.port, 17019);
        assert_eq!(cfg.file.pipeline.max_depth, 4);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "not valid toml [[[").unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.file.remote.port, 564);
    }

    #[test]
    fn parses_log_settings() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[log]\nlevel = \"debug\"\npath = \"/tmp/p9wl.log\"\n").unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.file.log.level, "debug");
        assert_eq!(cfg.file.log.path, Some(PathBuf::from("/tmp/p9wl.log")));
    }
}
