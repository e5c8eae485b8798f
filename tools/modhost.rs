//! Module host daemon
//!
//! Loads the modules found in the configured directory (asking for package
//! passwords on the console), serves them over HTTP and accepts operator
//! commands on stdin until `exit` or a termination signal.
//!
//! Usage:
//!   modhost [--config modhost.toml] [--port 8080] [--modules-dir Servers]

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use modhost::module::ModuleManager;
use modhost::utils::{init_logging_from_config, wait_for_shutdown_signal};
use modhost::{ConsolePrompt, Host, HostConfig};

/// Extra time given to blocking work (module stops, stdin) when the runtime exits
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(author, version, about = "Modular HTTP host")]
struct Args {
    /// Config file (TOML or JSON); written with defaults if missing
    #[arg(short, long, default_value = "modhost.toml")]
    config: PathBuf,

    /// Override the listening port
    #[arg(long)]
    port: Option<u16>,

    /// Override the modules directory
    #[arg(long)]
    modules_dir: Option<String>,

    /// Do not read operator commands from stdin
    #[arg(long)]
    no_console: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = HostConfig::load_or_create(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(port) = args.port {
        config.listen.port = port;
    }
    if let Some(dir) = args.modules_dir {
        config.modules.modules_dir = dir;
    }
    config.validate()?;
    init_logging_from_config(&config.logging);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let result = runtime.block_on(run(config, !args.no_console));
    // Module stops that outlived their timeout must not keep the process alive
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    result
}

async fn run(config: HostConfig, console: bool) -> anyhow::Result<()> {
    let host = Host::new(config);
    let serving = host.start(Box::new(ConsolePrompt)).await?;
    let report = serving.report();
    if report.failed > 0 {
        warn!(
            "{} module(s) loaded, {} failed",
            report.succeeded, report.failed
        );
        for failure in &report.failures {
            warn!("  {}: {}", failure.source, failure.error);
        }
    }
    info!("Listening on {}", serving.local_addr());

    if console {
        let manager = serving.manager();
        tokio::select! {
            _ = wait_for_shutdown_signal() => {}
            _ = console_loop(manager) => {}
        }
    } else {
        wait_for_shutdown_signal().await;
    }

    let stop = serving.shutdown().await;
    info!(
        "Stopped {} module(s), {} failed, {} timed out",
        stop.stopped,
        stop.failed.len(),
        stop.timed_out.len()
    );
    for (name, reason) in &stop.failed {
        warn!("  {} failed to stop: {}", name, reason);
    }
    for name in &stop.timed_out {
        warn!("  {} did not stop in time", name);
    }
    Ok(())
}

/// Read operator commands until `exit` or end of input
async fn console_loop(manager: Arc<ModuleManager>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                // stdin closed (daemonized); keep serving until a signal
                std::future::pending::<()>().await;
                return;
            }
            Err(e) => {
                error!("Failed to read console input: {}", e);
                std::future::pending::<()>().await;
                return;
            }
        };
        let mut words = line.split_whitespace().map(str::to_string);
        let Some(command) = words.next() else {
            continue;
        };
        let args: Vec<String> = words.collect();

        match command.to_lowercase().as_str() {
            "exit" => {
                info!("Exit requested from console");
                return;
            }
            "help" => print_help(&manager, args.first().map(String::as_str)).await,
            "modules" => {
                for module in manager.list_modules().await {
                    let state = manager.module_state(&module.base_path).await;
                    println!(
                        "{:<24} /{:<20} {:?} ({})",
                        module.name,
                        module.base_path,
                        state,
                        module.source
                    );
                }
            }
            "unload" | "restart" => {
                let Some(base_path) = args.first() else {
                    println!("usage: {} <base path>", command);
                    continue;
                };
                let result = if command.eq_ignore_ascii_case("unload") {
                    manager.unload_module(base_path).await
                } else {
                    manager.restart_module(base_path).await
                };
                if let Err(e) = result {
                    println!("{} {} failed: {}", command, base_path, e);
                }
            }
            name => {
                if let Err(e) = manager.execute_command(name, args).await {
                    println!("{}", e);
                }
            }
        }
    }
}

async fn print_help(manager: &ModuleManager, topic: Option<&str>) {
    if let Some(name) = topic {
        match manager.command_help(&name.to_lowercase()).await {
            Some(help) => println!("{}: {}", name, help),
            None => println!("unknown command: {}", name),
        }
        return;
    }
    println!("exit                 stop the host");
    println!("help [command]       list commands or show help for one");
    println!("modules              list loaded modules");
    println!("unload <base path>   stop and remove a module");
    println!("restart <base path>  stop and re-create a module");
    for name in manager.commands().await {
        let help = manager.command_help(&name).await.unwrap_or_default();
        println!("{:<20} {}", name, help);
    }
}
