//! Rig configuration file handling.

use std::fs;
use std::path::{Path, PathBuf};

use probos_types::RigConfig;

pub const DEFAULT_CONFIG_PATH: &str = "probos.toml";

/// Pull the `--config <path>` argument out of the command line.
pub fn config_path_from_args<I: Iterator<Item = String>>(mut args: I) -> PathBuf {
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return PathBuf::from(path);
            }
        } else if let Some(path) = arg.strip_prefix("--config=") {
            return PathBuf::from(path);
        }
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

/// Load a rig config from disk.  Returns `None` if the file does not exist.
pub fn load(path: &Path) -> Result<Option<RigConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("failed to read config at {}: {e}", path.display()))?;
    let config: RigConfig =
        toml::from_str(&raw).map_err(|e| format!("failed to parse config: {e}"))?;
    if config.probes.len() != 4 {
        return Err(format!(
            "expected 4 probe entries, found {}",
            config.probes.len()
        ));
    }
    Ok(Some(config))
}

/// Save a rig config, creating parent directories as necessary.
pub fn save(config: &RigConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create config directory: {e}"))?;
    }
    let raw = toml::to_string_pretty(config)
        .map_err(|e| format!("failed to serialize config: {e}"))?;
    fs::write(path, raw).map_err(|e| format!("failed to write config at {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_defaults_to_probos_toml() {
        let path = config_path_from_args(std::iter::empty());
        assert_eq!(path, PathBuf::from("probos.toml"));
    }

    #[test]
    fn config_path_honours_both_argument_forms() {
        let split = config_path_from_args(
            ["--config".to_string(), "rig.toml".to_string()].into_iter(),
        );
        assert_eq!(split, PathBuf::from("rig.toml"));

        let joined = config_path_from_args(["--config=lab.toml".to_string()].into_iter());
        assert_eq!(joined, PathBuf::from("lab.toml"));
    }

    #[test]
    fn load_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("probos.toml");
        assert!(load(&path).expect("no error").is_none());
    }

    #[test]
    fn simulated_config_round_trips_through_toml() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("probos.toml");

        let config = RigConfig::simulated();
        save(&config, &path).expect("save");
        let loaded = load(&path).expect("load ok").expect("some");

        assert_eq!(loaded.name, config.name);
        assert_eq!(loaded.probes.len(), 4);
        for (loaded_probe, probe) in loaded.probes.iter().zip(&config.probes) {
            assert_eq!(loaded_probe.probe_type, probe.probe_type);
            assert_eq!(loaded_probe.tmat_to_global, probe.tmat_to_global);
        }
    }

    #[test]
    fn load_rejects_wrong_probe_count() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("probos.toml");

        let mut config = RigConfig::simulated();
        config.probes.pop();
        save(&config, &path).expect("save");

        let err = load(&path).expect_err("must reject");
        assert!(err.contains("expected 4 probe entries"));
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("probos.toml");
        fs::write(&path, "name = [not valid").expect("write");
        assert!(load(&path).is_err());
    }
}
