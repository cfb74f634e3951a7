//! Session lifecycle: hidden setup per interpreter process, plot
//! configuration, figure extraction after each execution, version probing
//! and shutdown.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::{Config, SessionOptions};
use crate::error::{ArtifactError, Result};
use crate::execution::{
    driver::{DriverState, InterruptHandle, ReplDriver},
    ExecutionResult, ImageArtifact,
};
use crate::plot::{extract, PlotSettings};
use crate::process::{scilab, Launcher};
use crate::prompt::PromptPattern;
use crate::sanitize::OutputSanitizer;

pub const UNKNOWN_VERSION: &str = "unknown version";

const VERSION_QUERY: &str = "disp(getversion())";
const QUIT_COMMAND: &str = "quit";

static VERSION_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)+)").unwrap());

/// The one interpreter a kernel talks to.
pub struct ScilabSession {
    driver: ReplDriver,
    options: SessionOptions,
    plot: PlotSettings,
    plot_dirty: bool,
    /// Driver epoch the setup fragment last ran in.
    setup_epoch: Option<u64>,
    version: Option<String>,
}

impl std::fmt::Debug for ScilabSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScilabSession")
            .field("driver", &self.driver)
            .field("plot", &self.plot)
            .field("setup_epoch", &self.setup_epoch)
            .finish()
    }
}

impl ScilabSession {
    pub fn new(launcher: Box<dyn Launcher>, options: SessionOptions) -> Self {
        Self::with_prompt(launcher, PromptPattern::scilab(), options)
    }

    pub fn with_prompt(
        launcher: Box<dyn Launcher>,
        prompt: PromptPattern,
        options: SessionOptions,
    ) -> Self {
        let driver = ReplDriver::new(launcher, prompt)
            .with_execution_timeout(options.execution_timeout)
            .with_interrupt_grace(options.interrupt_grace)
            .with_startup_timeout(options.startup_timeout);
        Self {
            driver,
            plot: options.plot.clone(),
            options,
            plot_dirty: false,
            setup_epoch: None,
            version: None,
        }
    }

    /// Session for the Scilab found through `cfg`. Nothing is spawned yet.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let options = SessionOptions::from_config(cfg)?;
        let launcher = scilab::launcher(cfg)?;
        Ok(Self::new(Box::new(launcher), options))
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.driver.interrupt_handle()
    }

    pub fn interrupt(&self) {
        self.driver.interrupt_handle().interrupt();
    }

    pub fn state(&self) -> DriverState {
        self.driver.state()
    }

    pub fn epoch(&self) -> u64 {
        self.driver.epoch()
    }

    pub fn executable(&self) -> String {
        self.driver.launcher().describe()
    }

    pub fn plot_settings(&self) -> &PlotSettings {
        &self.plot
    }

    /// Applied through the configuration fragment before the next execution.
    pub fn set_plot_settings(&mut self, settings: PlotSettings) {
        if settings != self.plot {
            self.plot = settings;
            self.plot_dirty = true;
        }
    }

    pub async fn ensure_started(&mut self) -> Result<()> {
        self.driver.ensure_started().await?;
        Ok(())
    }

    fn setup_fragment(&self) -> String {
        format!(
            "try, getd(\".\"); catch, end\nlines(0, {})\n{}",
            self.options.output_width,
            self.plot.configuration_fragment()
        )
    }

    /// Run the hidden setup once per interpreter process, and the plot
    /// configuration whenever the settings changed since.
    async fn ensure_setup(&mut self) -> Result<()> {
        self.driver.ensure_started().await?;
        let epoch = self.driver.epoch();
        if self.setup_epoch != Some(epoch) {
            debug!(epoch, "running session setup");
            let fragment = self.setup_fragment();
            self.driver.run_fragment(&fragment).await?;
            self.setup_epoch = Some(epoch);
            self.plot_dirty = false;
        } else if self.plot_dirty {
            debug!(plot = ?self.plot, "applying plot settings");
            let fragment = self.plot.configuration_fragment();
            self.driver.run_fragment(&fragment).await?;
            self.plot_dirty = false;
        }
        Ok(())
    }

    /// Execute one fragment and collect its output and figures.
    ///
    /// With `silent` the output is discarded and no figures are extracted.
    /// An interrupted fragment returns what was printed before the prompt
    /// came back and skips extraction.
    pub async fn execute(&mut self, fragment: &str, silent: bool) -> Result<ExecutionResult> {
        self.ensure_setup().await?;
        let raw = self.driver.run_fragment(fragment).await?;

        let mut result = ExecutionResult { interrupted: raw.interrupted, ..Default::default() };
        if !silent {
            result.text = OutputSanitizer::new(self.driver.prompt())
                .with_echoes(fragment)
                .clean(&raw.text);
        }

        if self.plot.is_inline() && !silent && !raw.interrupted {
            let (artifacts, errors) = self.extract_figures().await?;
            result.artifacts = artifacts;
            result.artifact_errors = errors;
        }
        Ok(result)
    }

    /// Run `code` after setup and return its cleaned output, without figure
    /// extraction. Used for help and completion queries.
    pub async fn query(&mut self, code: &str) -> Result<String> {
        self.ensure_setup().await?;
        let raw = self.driver.run_fragment(code).await?;
        Ok(OutputSanitizer::new(self.driver.prompt()).with_echoes(code).clean(&raw.text))
    }

    /// Export every open figure into a fresh directory and read the files
    /// back. The directory is removed before returning on every path.
    pub async fn extract_figures(&mut self) -> Result<(Vec<ImageArtifact>, Vec<ArtifactError>)> {
        let root = self.options.figure_tmp_root.clone();
        let dir = match extract::figure_dir(root.as_deref()) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "could not create figure directory");
                let path = root.unwrap_or_else(std::env::temp_dir);
                return Ok((Vec::new(), vec![ArtifactError { path, message: e.to_string() }]));
            }
        };

        let fragment = self.plot.export_fragment(dir.path());
        let exported = self.driver.run_fragment(&fragment).await;
        let collected = match &exported {
            Ok(raw) => {
                if !raw.text.trim().is_empty() {
                    debug!(output = %raw.text.trim(), "figure export printed output");
                }
                extract::collect_figures(dir.path(), &self.plot)
            }
            Err(_) => (Vec::new(), Vec::new()),
        };

        let path = dir.path().to_path_buf();
        if let Err(e) = dir.close() {
            warn!(dir = %path.display(), error = %e, "failed to remove figure directory");
        }
        exported?;
        if !collected.0.is_empty() {
            debug!(count = collected.0.len(), "figures extracted");
        }
        Ok(collected)
    }

    /// Interpreter version, queried once and cached. A reply without a
    /// version number yields [`UNKNOWN_VERSION`], which is cached as well.
    pub async fn banner(&mut self) -> Result<String> {
        if let Some(v) = &self.version {
            return Ok(v.clone());
        }
        self.driver.ensure_started().await?;
        let raw = self.driver.run_fragment(VERSION_QUERY).await?;
        let text = OutputSanitizer::new(self.driver.prompt())
            .with_echoes(VERSION_QUERY)
            .clean(&raw.text);

        let version = match VERSION_TOKEN.captures(&text) {
            Some(caps) => {
                let version = caps[1].to_string();
                info!(%version, "interpreter version");
                version
            }
            None => {
                warn!(reply = %text, "no version in interpreter reply");
                UNKNOWN_VERSION.to_string()
            }
        };
        self.version = Some(version.clone());
        Ok(version)
    }

    /// `restart` replaces the process and replays setup on the next
    /// execution; otherwise the interpreter is asked to quit and released.
    pub async fn shutdown(&mut self, restart: bool) -> Result<()> {
        if restart {
            self.setup_epoch = None;
            self.driver.restart().await
        } else {
            self.driver.terminate(QUIT_COMMAND, self.options.shutdown_grace).await;
            Ok(())
        }
    }
}
