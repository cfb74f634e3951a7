use std::io::{self, Read, Write};

use anyhow::{Context, Result};
use is_terminal::IsTerminal;
use tokio::io::{AsyncBufReadExt, BufReader};

use scilab_kernel::{
    cli::Cli,
    config::{resolve_executable, Config},
    kernel::{Kernel, Reply},
    logging,
    printer::{self, TextPrinter},
    KernelError, ScilabSession,
};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Cli::parse();

    let mut cfg = Config::load();
    args.apply(&mut cfg);

    if args.check {
        check(&cfg).await;
        return Ok(());
    }

    let session = ScilabSession::from_config(&cfg)?;
    let mut kernel = Kernel::new(session);
    let printer = TextPrinter { color: io::stdout().is_terminal() };

    // Ctrl-C cancels the running cell instead of killing the front end.
    let handle = kernel.interrupt_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            handle.interrupt();
        }
    });

    let mut runner = CellRunner { args: &args, printer, saved: 0 };

    let single = match (&args.code, &args.file) {
        (Some(code), _) => Some(code.clone()),
        (None, Some(path)) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?,
        ),
        (None, None) if !io::stdin().is_terminal() => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            Some(buf)
        }
        _ => None,
    };

    match single {
        Some(cell) => {
            runner.run(&mut kernel, &cell).await?;
        }
        None => {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                print!("--> ");
                io::stdout().flush()?;
                let Some(line) = lines.next_line().await? else {
                    println!();
                    break;
                };
                if !runner.run(&mut kernel, &line).await? {
                    return Ok(());
                }
            }
        }
    }

    kernel.session_mut().shutdown(false).await?;
    Ok(())
}

struct CellRunner<'a> {
    args: &'a Cli,
    printer: TextPrinter,
    saved: usize,
}

impl CellRunner<'_> {
    /// Returns `false` once the session has been shut down.
    async fn run(&mut self, kernel: &mut Kernel, cell: &str) -> Result<bool> {
        match kernel.execute(cell, self.args.silent).await {
            Ok(Reply::Aborted) => Ok(false),
            Ok(Reply::Ok(result)) => {
                if self.args.json {
                    println!("{}", serde_json::to_string(&result)?);
                } else if !self.args.silent {
                    self.printer.result(&result);
                }
                if let Some(dir) = &self.args.figure_dir {
                    for artifact in &result.artifacts {
                        self.saved += 1;
                        let path = printer::save_artifact(dir, self.saved, artifact)?;
                        if !self.args.json {
                            self.printer.saved(&path, artifact);
                        }
                    }
                }
                Ok(true)
            }
            Err(e @ (KernelError::Spawn { .. } | KernelError::Config(_))) => Err(e.into()),
            Err(KernelError::Terminated) => Ok(false),
            Err(e) => {
                if self.args.json {
                    let line = serde_json::json!({ "status": "error", "message": e.to_string() });
                    println!("{line}");
                } else {
                    self.printer.error(&e.to_string());
                }
                Ok(true)
            }
        }
    }
}

async fn check(cfg: &Config) {
    println!("Scilab kernel v{}", env!("CARGO_PKG_VERSION"));
    match resolve_executable(cfg) {
        Ok(path) => println!("Scilab executable: {}", path.display()),
        Err(e) => {
            println!("{}", e);
            return;
        }
    }

    println!("\nConnecting to Scilab...");
    let probe = async {
        let mut session = ScilabSession::from_config(cfg)?;
        let version = session.banner().await?;
        session.shutdown(false).await?;
        Ok::<_, KernelError>(version)
    };
    match probe.await {
        Ok(version) => {
            println!("Scilab connection established");
            println!("Scilab version {}", version);
        }
        Err(e) => println!("{}", e),
    }
}
