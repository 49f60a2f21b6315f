use std::{collections::HashMap, env, fs, path::PathBuf, time::Duration};

use directories::BaseDirs;

use crate::process::{python, DEFAULT_TERMINATE_TIMEOUT};

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(default_config_path())
    }

    /// Defaults, overlaid by `config_path` if it can be read, overlaid by the
    /// `BOOTPIPE_*` environment variables.
    pub fn load_from(config_path: PathBuf) -> Self {
        let mut inner = default_map();
        if let Ok(text) = fs::read_to_string(&config_path) {
            inner.extend(parse_rc(&text));
        }
        inner.extend(env::vars().filter(|(key, _)| is_config_key(key)));
        Self { inner, config_path }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse::<u64>().ok())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).filter(|v| !v.is_empty()).map(PathBuf::from)
    }

    /// Interpreter to launch; a bare name is looked up on `PATH` at spawn time.
    pub fn interpreter(&self) -> PathBuf {
        self.get_path("BOOTPIPE_PYTHON")
            .unwrap_or_else(|| PathBuf::from(python::default_executable()))
    }

    /// Grace period between the graceful stop and the forced kill.
    pub fn terminate_timeout(&self) -> Duration {
        self.get_u64("BOOTPIPE_TERMINATE_TIMEOUT")
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TERMINATE_TIMEOUT)
    }

    /// `tracing` filter directive for the binary.
    pub fn log_filter(&self) -> String {
        self.get("BOOTPIPE_LOG").unwrap_or_else(|| "warn".into())
    }
}

/// `KEY=value` lines; blank lines and `#` comments are skipped, as is any
/// line without `=`. Later lines win.
fn parse_rc(text: &str) -> impl Iterator<Item = (String, String)> + '_ {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
}

fn is_config_key(k: &str) -> bool {
    k.starts_with("BOOTPIPE_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("bootpipe").join("bootpipe.rc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert("BOOTPIPE_PYTHON".into(), python::default_executable().into());
    m.insert(
        "BOOTPIPE_TERMINATE_TIMEOUT".into(),
        DEFAULT_TERMINATE_TIMEOUT.as_secs().to_string(),
    );
    m.insert("BOOTPIPE_LOG".into(), "warn".into());
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rc_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let rc = dir.path().join("bootpipe.rc");
        fs::write(
            &rc,
            "# comment\nBOOTPIPE_PYTHON = /opt/py/bin/python3\n\nBOOTPIPE_TERMINATE_TIMEOUT=9\n",
        )
        .unwrap();

        let cfg = Config::load_from(rc);
        if env::var_os("BOOTPIPE_PYTHON").is_none() {
            assert_eq!(cfg.interpreter(), PathBuf::from("/opt/py/bin/python3"));
        }
        if env::var_os("BOOTPIPE_TERMINATE_TIMEOUT").is_none() {
            assert_eq!(cfg.terminate_timeout(), Duration::from_secs(9));
        }
    }

    #[test]
    fn rc_lines_are_trimmed_and_filtered() {
        let text = "  # note\nA = 1\n\njunk line\nB=x=y\nA=2\n";
        let parsed: Vec<_> = parse_rc(text).collect();
        assert_eq!(
            parsed,
            [
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "x=y".to_string()),
                ("A".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn missing_rc_file_keeps_defaults() {
        let cfg = Config::load_from(PathBuf::from("/no/such/bootpipe.rc"));
        if env::var_os("BOOTPIPE_TERMINATE_TIMEOUT").is_none() {
            assert_eq!(cfg.terminate_timeout(), DEFAULT_TERMINATE_TIMEOUT);
        }
        assert!(cfg.get("UNRELATED_KEY").is_none());
    }
}
