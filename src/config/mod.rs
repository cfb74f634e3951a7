use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    time::Duration,
};

use directories::BaseDirs;

use crate::error::{KernelError, Result};
use crate::plot::{Backend, PlotFormat, PlotSettings, PlotSize};

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(&default_config_path())
    }

    /// Defaults, then the rc file at `path` (if any), then the environment.
    pub fn load_from(path: &Path) -> Self {
        let mut map = default_map();

        if path.exists() {
            if let Ok(file) = fs::File::open(path) {
                let reader = BufReader::new(file);
                for line in reader.lines().map_while(std::result::Result::ok) {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if let Some((k, v)) = line.split_once('=') {
                        map.insert(k.trim().to_string(), v.trim().to_string());
                    }
                }
            }
        }

        for (k, v) in env::vars() {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self { inner: map, config_path: path.to_path_buf() }
    }

    /// Build a config from explicit pairs on top of the defaults, ignoring the
    /// environment and rc file.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = default_map();
        for (k, v) in pairs {
            map.insert(k.into(), v.into());
        }
        Self { inner: map, config_path: PathBuf::new() }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned().filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.inner.insert(key.to_string(), value.into());
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse::<usize>().ok())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }

    /// Extra arguments for the interpreter, whitespace separated.
    pub fn interpreter_args(&self) -> Vec<String> {
        self.get("SCILAB_ARGS")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn plot_settings(&self) -> Result<PlotSettings> {
        let mut settings = PlotSettings::default();
        if let Some(v) = self.get("PLOT_BACKEND") {
            settings.backend = Backend::from(v.as_str());
        }
        if let Some(v) = self.get("PLOT_FORMAT") {
            settings.format = v.parse::<PlotFormat>()?;
        }
        if let Some(v) = self.get("PLOT_SIZE") {
            settings.size = v.parse::<PlotSize>()?;
        }
        settings.antialiasing = self.get_bool("PLOT_ANTIALIASING");
        Ok(settings)
    }
}

/// Options consumed by the session, validated once.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub execution_timeout: Option<Duration>,
    pub interrupt_grace: Duration,
    pub shutdown_grace: Duration,
    /// How long a fresh interpreter may take to print its first prompt.
    pub startup_timeout: Duration,
    pub output_width: usize,
    pub figure_tmp_root: Option<PathBuf>,
    pub plot: PlotSettings,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            execution_timeout: None,
            interrupt_grace: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(2),
            startup_timeout: Duration::from_secs(120),
            output_width: 100,
            figure_tmp_root: None,
            plot: PlotSettings::default(),
        }
    }
}

impl SessionOptions {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let defaults = Self::default();
        let secs = |key: &str| -> Result<Option<u64>> {
            match cfg.get(key) {
                None => Ok(None),
                Some(v) => v
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| {
                        KernelError::Config(format!("{key} must be a number of seconds, got `{v}`"))
                    }),
            }
        };

        let execution_timeout = match secs("EXECUTION_TIMEOUT")? {
            None | Some(0) => None,
            Some(s) => Some(Duration::from_secs(s)),
        };
        let interrupt_grace = secs("INTERRUPT_GRACE")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.interrupt_grace);
        let shutdown_grace = secs("SHUTDOWN_GRACE")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.shutdown_grace);
        let startup_timeout = secs("STARTUP_TIMEOUT")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.startup_timeout);

        Ok(Self {
            execution_timeout,
            interrupt_grace,
            shutdown_grace,
            startup_timeout,
            output_width: cfg.get_usize("OUTPUT_WIDTH").unwrap_or(defaults.output_width),
            figure_tmp_root: cfg.get_path("FIGURE_TMP_DIR"),
            plot: cfg.plot_settings()?,
        })
    }
}

/// Locate the interpreter: `SCILAB_EXECUTABLE` first, then the platform
/// default name on `PATH`.
pub fn resolve_executable(cfg: &Config) -> Result<PathBuf> {
    if let Some(exe) = cfg.get("SCILAB_EXECUTABLE") {
        if let Ok(path) = which::which(&exe) {
            return Ok(path);
        }
        tracing::warn!(
            executable = %exe,
            "SCILAB_EXECUTABLE does not resolve, falling back to PATH"
        );
    }

    let default = if cfg!(windows) { "Scilex" } else { "scilab" };
    which::which(default).map_err(|_| KernelError::Spawn {
        executable: default.to_string(),
        reason: "Scilab executable not found, please add it to PATH or set the \
                 SCILAB_EXECUTABLE environment variable"
            .to_string(),
    })
}

fn is_config_key(k: &str) -> bool {
    const KEYS: &[&str] = &[
        "SCILAB_EXECUTABLE",
        "SCILAB_ARGS",
        "PLOT_BACKEND",
        "PLOT_FORMAT",
        "PLOT_SIZE",
        "PLOT_ANTIALIASING",
        "EXECUTION_TIMEOUT",
        "INTERRUPT_GRACE",
        "SHUTDOWN_GRACE",
        "STARTUP_TIMEOUT",
        "OUTPUT_WIDTH",
        "FIGURE_TMP_DIR",
    ];

    KEYS.contains(&k) || k.starts_with("SCILAB_KERNEL_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("scilab_kernel").join(".scilabrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();

    m.insert("PLOT_BACKEND".into(), "inline".into());
    m.insert("PLOT_FORMAT".into(), "svg".into());
    m.insert("PLOT_SIZE".into(), "560,420".into());
    m.insert("PLOT_ANTIALIASING".into(), "false".into());

    m.insert("EXECUTION_TIMEOUT".into(), "0".into());
    m.insert("INTERRUPT_GRACE".into(), "5".into());
    m.insert("SHUTDOWN_GRACE".into(), "2".into());
    m.insert("STARTUP_TIMEOUT".into(), "120".into());
    m.insert("OUTPUT_WIDTH".into(), "100".into());

    m
}
