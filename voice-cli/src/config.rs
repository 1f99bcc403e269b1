//! Configuration file loading.

use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::info;

use titan_voice_ipc::VoiceConfig;

/// Load a JSON configuration file, or the defaults when `path` is `None`.
/// Missing fields take their default values.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<VoiceConfig> {
    let config = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: VoiceConfig = serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            info!(path = %path.display(), "Loaded configuration");
            config
        }
        None => VoiceConfig::default(),
    };

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("titan-voice-{}-{}.json", name, std::process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config.capture.sample_rate, 16_000);
        assert_eq!(config.playback.fill_threshold, 5);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let path = write_temp("partial", r#"{ "capture": { "use_vad": true }, "self_monitor": true }"#);
        let config = load_config(Some(&path)).unwrap();
        let _ = fs::remove_file(&path);

        assert!(config.capture.use_vad);
        assert!(config.self_monitor);
        assert_eq!(config.capture.chunk_duration_ms, 30);
        assert_eq!(config.playback.output_sample_rate, 22_050);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let path = write_temp("invalid", r#"{ "playback": { "channel_count": 0 } }"#);
        let result = load_config(Some(&path));
        let _ = fs::remove_file(&path);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        let path = std::env::temp_dir().join("titan-voice-does-not-exist.json");
        assert!(load_config(Some(&path)).is_err());
    }
}
