use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use log::{debug, info};
use serde::Deserialize;

use crate::convert::DEFAULT_MAX_INPUT_BYTES;
use crate::scheduler::{DEFAULT_DEBOUNCE, DEFAULT_FRAME_INTERVAL};
use crate::theme::{self, DEFAULT_THEME, ThemeKey};

// ---------------------------------------------------------------------------
// ConfigFile: deserialized from TOML (all fields optional)
// ---------------------------------------------------------------------------

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub theme: Option<String>,
    pub max_input_bytes: Option<usize>,
    pub scheduler: SchedulerConfigFile,
    pub editor: EditorConfigFile,
    pub preview: PreviewConfigFile,
    pub watch: WatchConfigFile,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct SchedulerConfigFile {
    pub debounce_ms: Option<u64>,
    pub frame_interval_ms: Option<u64>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct EditorConfigFile {
    pub rows: Option<usize>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct PreviewConfigFile {
    pub rows: Option<usize>,
    pub reload_secs: Option<u64>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct WatchConfigFile {
    pub interval_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Config: resolved (all fields concrete)
// ---------------------------------------------------------------------------

pub struct Config {
    pub theme: ThemeKey,
    pub max_input_bytes: usize,
    pub debounce: Duration,
    pub frame_interval: Duration,
    pub editor_rows: usize,
    pub preview_rows: usize,
    pub reload: Duration,
    pub watch_interval: Duration,
}

impl ConfigFile {
    /// Merge CLI values (overwrites non-None fields).
    pub fn merge_cli(&mut self, theme: Option<String>, debounce_ms: Option<u64>) {
        if let Some(ref v) = theme {
            debug!("config: CLI override theme={v}");
            self.theme = theme;
        }
        if let Some(v) = debounce_ms {
            debug!("config: CLI override debounce_ms={v}");
            self.scheduler.debounce_ms = debounce_ms;
        }
    }

    /// Resolve to a Config by applying defaults to missing fields.
    pub fn resolve(self) -> anyhow::Result<Config> {
        let theme = match self.theme.as_deref() {
            None => DEFAULT_THEME,
            Some(name) => match theme::get(name) {
                Some(key) => key,
                None => bail!("unknown theme '{name}' (expected 'light' or 'dark')"),
            },
        };
        let frame_interval_ms = self
            .scheduler
            .frame_interval_ms
            .unwrap_or(DEFAULT_FRAME_INTERVAL.as_millis() as u64);
        if frame_interval_ms == 0 {
            bail!("scheduler.frame_interval_ms must be greater than zero");
        }
        let config = Config {
            theme,
            max_input_bytes: self.max_input_bytes.unwrap_or(DEFAULT_MAX_INPUT_BYTES),
            debounce: self
                .scheduler
                .debounce_ms
                .map_or(DEFAULT_DEBOUNCE, Duration::from_millis),
            frame_interval: Duration::from_millis(frame_interval_ms),
            editor_rows: self.editor.rows.unwrap_or(40),
            preview_rows: self.preview.rows.unwrap_or(40),
            reload: Duration::from_secs(self.preview.reload_secs.unwrap_or(1)),
            watch_interval: Duration::from_millis(self.watch.interval_ms.unwrap_or(200)),
        };
        info!(
            "config: resolved theme={}, max_input_bytes={}, debounce={}ms, \
             frame_interval={}ms, editor_rows={}, preview_rows={}, reload={}s, \
             watch_interval={}ms",
            config.theme.name(),
            config.max_input_bytes,
            config.debounce.as_millis(),
            config.frame_interval.as_millis(),
            config.editor_rows,
            config.preview_rows,
            config.reload.as_secs(),
            config.watch_interval.as_millis(),
        );
        Ok(config)
    }
}

/// Resolve the XDG config path for mdlive.
fn config_path() -> Option<PathBuf> {
    let config_dir = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(config_dir.join("mdlive").join("config.toml"))
}

/// Load config file. Returns `ConfigFile::default()` if no file exists.
/// Returns an error if the file exists but cannot be parsed.
pub fn load_config() -> anyhow::Result<ConfigFile> {
    let Some(path) = config_path() else {
        info!("config: no HOME or XDG_CONFIG_HOME set, using defaults");
        return Ok(ConfigFile::default());
    };
    debug!("config: looking for {}", path.display());
    match std::fs::read_to_string(&path) {
        Ok(text) => {
            info!("config: loaded from {}", path.display());
            toml::from_str(&text)
                .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("config: {} not found, using defaults", path.display());
            Ok(ConfigFile::default())
        }
        Err(e) => Err(anyhow::anyhow!("failed to read {}: {e}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml() {
        let cfg: ConfigFile = toml::from_str("").unwrap();
        let resolved = cfg.resolve().unwrap();
        assert_eq!(resolved.theme, ThemeKey::Dark);
        assert_eq!(resolved.max_input_bytes, 10 * 1024 * 1024);
        assert_eq!(resolved.debounce, Duration::from_millis(275));
        assert_eq!(resolved.frame_interval, Duration::from_millis(16));
        assert_eq!(resolved.editor_rows, 40);
        assert_eq!(resolved.preview_rows, 40);
        assert_eq!(resolved.reload, Duration::from_secs(1));
        assert_eq!(resolved.watch_interval, Duration::from_millis(200));
    }

    #[test]
    fn partial_toml() {
        let text = r#"
            theme = "light"
            [scheduler]
            debounce_ms = 100
            [preview]
            rows = 60
        "#;
        let cfg: ConfigFile = toml::from_str(text).unwrap();
        let resolved = cfg.resolve().unwrap();
        assert_eq!(resolved.theme, ThemeKey::Light);
        assert_eq!(resolved.debounce, Duration::from_millis(100));
        assert_eq!(resolved.preview_rows, 60);
        // Defaults for unspecified fields
        assert_eq!(resolved.frame_interval, Duration::from_millis(16));
        assert_eq!(resolved.editor_rows, 40);
    }

    #[test]
    fn invalid_toml() {
        let text = "this is not valid toml [[[";
        assert!(toml::from_str::<ConfigFile>(text).is_err());
    }

    #[test]
    fn unknown_theme_is_error() {
        let cfg: ConfigFile = toml::from_str("theme = \"solarized\"").unwrap();
        let err = cfg.resolve().err().unwrap();
        assert!(err.to_string().contains("solarized"));
    }

    #[test]
    fn zero_frame_interval_is_error() {
        let cfg: ConfigFile = toml::from_str("[scheduler]\nframe_interval_ms = 0").unwrap();
        assert!(cfg.resolve().is_err());
    }

    #[test]
    fn cli_overrides() {
        let mut cfg: ConfigFile =
            toml::from_str("theme = \"light\"\n[scheduler]\ndebounce_ms = 50").unwrap();
        cfg.merge_cli(Some("dark".into()), Some(500));
        let resolved = cfg.resolve().unwrap();
        assert_eq!(resolved.theme, ThemeKey::Dark);
        assert_eq!(resolved.debounce, Duration::from_millis(500)); // CLI wins
        assert_eq!(resolved.max_input_bytes, DEFAULT_MAX_INPUT_BYTES);
    }
}
