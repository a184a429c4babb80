// Runtime configuration: code generation settings and host defaults
use crate::error::{FlowError, FlowResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Optimization level handed to the native code generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    /// Fastest compile, used while a patch is being edited
    None,
    /// Optimize generated code for speed
    Speed,
    /// Optimize for speed and code size
    SpeedAndSize,
}

impl OptLevel {
    /// Value of the backend `opt_level` setting
    pub fn as_setting(&self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }
}

/// Complete runtime configuration
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// opt_level = "speed"
/// sample_rate = 48000.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Code generator optimization level
    pub opt_level: OptLevel,

    /// Run the IR verifier on every compiled function
    pub verify_ir: bool,

    /// Consult the process dynamic symbol table while linking.
    /// When false only installed modules and the intrinsic table are used.
    pub process_symbols: bool,

    /// Initial value of the `sample_rate` host global
    pub sample_rate: f32,

    /// Initial value of the `bpm` host global
    pub bpm: f32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::editor()
    }
}

impl RuntimeConfig {
    /// Interactive editing: quick compiles, verifier on
    pub fn editor() -> Self {
        Self {
            opt_level: OptLevel::None,
            verify_ir: true,
            process_symbols: true,
            sample_rate: 44100.0,
            bpm: 60.0,
        }
    }

    /// Playback of a finished patch: optimized code, verifier off
    pub fn performance() -> Self {
        Self {
            opt_level: OptLevel::Speed,
            verify_ir: false,
            ..Self::editor()
        }
    }

    /// Parse a configuration from TOML text and validate it
    pub fn from_toml_str(text: &str) -> FlowResult<Self> {
        let config: RuntimeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> FlowResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        log::debug!("loaded runtime config from {}", path.as_ref().display());
        Self::from_toml_str(&text)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> FlowResult<String> {
        Ok(toml::to_string(self)?)
    }

    /// Check value ranges
    pub fn validate(&self) -> FlowResult<()> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(FlowError::config(format!(
                "sample_rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if !self.bpm.is_finite() || self.bpm <= 0.0 {
            return Err(FlowError::config(format!(
                "bpm must be positive, got {}",
                self.bpm
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = RuntimeConfig::from_toml_str("opt_level = \"speed\"\nbpm = 128.0\n").unwrap();
        assert_eq!(config.opt_level, OptLevel::Speed);
        assert_eq!(config.bpm, 128.0);
        assert_eq!(config.sample_rate, 44100.0);
        assert!(config.verify_ir);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(RuntimeConfig::from_toml_str("sample_rate = 0.0").is_err());
        assert!(RuntimeConfig::from_toml_str("bpm = -1.0").is_err());
        assert!(RuntimeConfig::from_toml_str("opt_level = \"turbo\"").is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let config = RuntimeConfig::performance();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml_string().unwrap().as_bytes())
            .unwrap();

        let loaded = RuntimeConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.opt_level.as_setting(), "speed");
    }

    #[test]
    fn test_missing_file() {
        let err = RuntimeConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, FlowError::Io(_)));
    }
}
