mod common;

use std::fs;

use common::{session, FakeLauncher};
use scilab_kernel::{
    config::SessionOptions,
    kernel::{Kernel, Reply},
    plot::{PlotFormat, PlotSettings, PlotSize},
};

fn options(plot: PlotSettings, tmp_root: &std::path::Path) -> SessionOptions {
    SessionOptions { plot, figure_tmp_root: Some(tmp_root.to_path_buf()), ..Default::default() }
}

#[tokio::test]
async fn png_plot_yields_one_artifact() {
    let tmp = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    let plot = PlotSettings { format: PlotFormat::Png, ..Default::default() };
    let mut s = session(&launcher, options(plot, tmp.path()));

    let result = s.execute("plot(1:10)", false).await.unwrap();
    assert_eq!(result.artifacts.len(), 1);
    assert_eq!(result.artifacts[0].mime_type, "image/png");
    assert_eq!((result.artifacts[0].width, result.artifacts[0].height), (Some(560), Some(420)));
    assert!(result.artifact_errors.is_empty());
    assert_eq!(launcher.count("xs2png"), 1);
}

#[tokio::test]
async fn auto_sized_png_reports_header_dimensions() {
    let tmp = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    let plot = PlotSettings { format: PlotFormat::Png, size: PlotSize::Auto, ..Default::default() };
    let mut s = session(&launcher, options(plot, tmp.path()));

    let result = s.execute("plot(1:10)", false).await.unwrap();
    assert_eq!((result.artifacts[0].width, result.artifacts[0].height), (Some(640), Some(480)));
}

#[tokio::test]
async fn svg_figures_are_ordered_and_sized() {
    let tmp = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    let plot = PlotSettings {
        size: PlotSize::Fixed { width: 800, height: 600 },
        antialiasing: true,
        ..Default::default()
    };
    let mut s = session(&launcher, options(plot, tmp.path()));

    let result = s.execute("plot(1:3)\nscf(2)\nscf(3)", false).await.unwrap();
    assert_eq!(result.artifacts.len(), 3);

    let bodies: Vec<String> = result
        .artifacts
        .iter()
        .map(|a| String::from_utf8_lossy(&a.data).into_owned())
        .collect();
    for (i, body) in bodies.iter().enumerate() {
        assert!(body.contains(&format!("figure {}", i + 1)), "artifact {i} out of order: {body}");
        assert!(body.contains(r#"width="800px""#));
        assert!(body.contains(r#"height="600px""#));
        assert!(body.contains("shape-rendering:geometricPrecision"));
    }
    for artifact in &result.artifacts {
        assert_eq!(artifact.mime_type, "image/svg+xml");
        assert_eq!((artifact.width, artifact.height), (Some(800), Some(600)));
    }
}

#[tokio::test]
async fn extraction_directory_is_removed() {
    let tmp = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    let mut s = session(&launcher, options(PlotSettings::default(), tmp.path()));

    s.execute("plot(1:3)", false).await.unwrap();
    s.execute("disp('no figures')", false).await.unwrap();
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn crash_during_export_still_cleans_up() {
    let tmp = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher { crash_on_export: true, ..FakeLauncher::new() };
    let mut s = session(&launcher, options(PlotSettings::default(), tmp.path()));

    let err = s.execute("plot(1:3)", false).await.unwrap_err();
    assert!(matches!(err, scilab_kernel::KernelError::SessionCrashed(_)), "{err:?}");
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    assert_eq!(launcher.spawns(), 2);
}

#[tokio::test]
async fn interrupted_execution_skips_extraction() {
    let tmp = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    let mut s = session(&launcher, options(PlotSettings::default(), tmp.path()));
    s.execute("disp('ready')", false).await.unwrap();

    let handle = s.interrupt_handle();
    let interrupter = tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            handle.interrupt();
        }
    });
    let result = s.execute("plot(1:3)\nsleep(100000)", false).await.unwrap();
    interrupter.abort();

    assert!(result.interrupted);
    assert!(result.artifacts.is_empty());
    assert_eq!(launcher.count("winsid()"), 1);

    // The figure is still open and comes out with the next visible execution.
    let next = s.execute("disp('later')", false).await.unwrap();
    assert_eq!(next.artifacts.len(), 1);
}

#[tokio::test]
async fn plot_magic_switches_format_before_running() {
    let tmp = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    let mut kernel = Kernel::new(session(&launcher, options(PlotSettings::default(), tmp.path())));

    kernel.execute("disp('first')", false).await.unwrap();
    let reply = kernel.execute("%plot -f png -s 320,240\nplot(1:3)", false).await.unwrap();
    let Reply::Ok(result) = reply else { panic!("expected ok reply") };

    assert_eq!(result.artifacts.len(), 1);
    assert_eq!(result.artifacts[0].mime_type, "image/png");
    assert_eq!(result.artifacts[0].width, Some(320));
    assert_eq!(launcher.count("h.figure_size = [320,240];"), 1);
}
