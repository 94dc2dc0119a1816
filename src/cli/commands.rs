use anyhow::{Context, Result};
use colored::Colorize;
use std::io::{self, BufRead, Write};

use crate::{
    admin::{AdminApi, AdminClient},
    app::{get_config_dir, init_config, Config, DesiredState},
    network::{detect_runtime_binary, ContainerRuntime, DockerRuntime, MissingRuntime},
    observer::{HttpTraffic, RetryPolicy, StateObserver},
    remediation::RemediationEngine,
    runtime::{format_restore, Mode, Pipeline, PipelineOptions},
    snapshot::{RestoreOptions, SnapshotManager},
};

use super::{Cli, Commands, SnapshotCommands};

/// Run the selected command and return the process exit code
pub async fn handle_command(cli: &Cli, config: &Config) -> Result<i32> {
    if let Some(mode) = cli.command.mode() {
        return run_pipeline(cli, config, mode).await;
    }

    match &cli.command {
        Commands::Init => {
            println!("Initializing gateway-doctor configuration...");
            let path = init_config()?;
            println!("Configuration written to {}", path.display());
            Ok(0)
        }
        Commands::Status => show_status(config).await,
        Commands::Snapshots { command } => manage_snapshots(config, command),
        Commands::Rollback {
            snapshot_id,
            restore_env,
        } => rollback(cli, config, snapshot_id.as_deref(), *restore_env).await,
        _ => Ok(0),
    }
}

fn snapshot_manager(config: &Config) -> SnapshotManager {
    SnapshotManager::new(
        config.snapshot.backups_root.clone(),
        config.snapshot.env_files.clone(),
    )
}

fn admin_client(config: &Config) -> Result<AdminClient> {
    if config.admin.api_key.is_empty() {
        tracing::warn!("admin.api_key is empty; the admin API will likely reject requests");
    }
    AdminClient::new(&config.admin.url, &config.admin.api_key, config.timeouts.http_ms)
        .context("Failed to create admin API client")
}

/// Configured runtime binary, else whichever one is installed
fn runtime_binary(config: &Config) -> Option<&str> {
    config
        .runtime
        .binary
        .as_deref()
        .or_else(|| detect_runtime_binary())
}

fn container_runtime(config: &Config) -> Box<dyn ContainerRuntime> {
    match DockerRuntime::new(config.runtime.binary.as_deref()) {
        Ok(runtime) => Box::new(runtime),
        Err(e) => {
            tracing::warn!(error = %e, "network checks will fail");
            Box::new(MissingRuntime)
        }
    }
}

async fn run_pipeline(cli: &Cli, config: &Config, mode: Mode) -> Result<i32> {
    let desired = DesiredState::from_config(config).context("Invalid desired state")?;
    let admin = admin_client(config)?;
    let traffic = HttpTraffic::new(&config.gateway.url, config.timeouts.http_ms)
        .context("Failed to create data plane client")?;
    let runtime = container_runtime(config);
    let snapshots = snapshot_manager(config);

    let observer = StateObserver::new(
        &admin,
        &traffic,
        runtime.as_ref(),
        RetryPolicy::new(config.timeouts.retries, config.timeouts.retry_delay_ms),
        config.timeouts.dns_ms,
        config.timeouts.connect_ms,
    );
    let engine = RemediationEngine::new(&admin, runtime.as_ref(), &desired);
    let pipeline = Pipeline::new(observer, engine, &desired).with_snapshots(&snapshots);
    let options = PipelineOptions {
        mode,
        capture_snapshot: config.snapshot.capture_before_fix && !cli.no_snapshot,
    };

    let report = match mode {
        Mode::DiagnoseOnly => pipeline.run(options, false).await?,
        Mode::Fix(scope) => {
            let diagnosis = pipeline.diagnose().await;
            let pending = diagnosis.in_scope(scope);
            let approved = cli.yes || (pending > 0 && confirm(pending)?);
            pipeline.remediate(diagnosis, scope, options, approved).await?
        }
    };

    println!("{}", report.format(cli.output_format));
    Ok(report.exit_code())
}

/// Ask on stdin before writing anything
fn confirm(pending: usize) -> Result<bool> {
    eprint!("Apply {} fix(es) to the live gateway? [y/N] ", pending);
    io::stderr().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

async fn rollback(cli: &Cli, config: &Config, id: Option<&str>, restore_env: bool) -> Result<i32> {
    let manager = snapshot_manager(config);
    let snapshot_id = match id {
        Some(id) => id.to_string(),
        None => match manager.latest()? {
            Some(snapshot) => snapshot.id,
            None => anyhow::bail!(
                "No snapshots found in {}",
                manager.root().display()
            ),
        },
    };

    let admin = admin_client(config)?;
    let report = manager
        .restore(
            &admin,
            &snapshot_id,
            RestoreOptions {
                restore_env_files: restore_env,
            },
        )
        .await?;

    println!("{}", format_restore(&report, cli.output_format));
    Ok(if report.is_complete() { 0 } else { 1 })
}

fn manage_snapshots(config: &Config, command: &SnapshotCommands) -> Result<i32> {
    let manager = snapshot_manager(config);
    match command {
        SnapshotCommands::List => {
            let snapshots = manager.list()?;
            if snapshots.is_empty() {
                println!("No snapshots in {}", manager.root().display());
            }
            for snapshot in snapshots {
                let line = format!("  • {}", snapshot.summary());
                if snapshot.is_partial() {
                    println!("{}", line.yellow());
                } else {
                    println!("{}", line);
                }
            }
        }
        SnapshotCommands::Prune { keep } => {
            let removed = manager.prune(*keep)?;
            println!("Removed {} snapshot(s)", removed.len());
            for id in removed {
                println!("  • {}", id);
            }
        }
    }
    Ok(0)
}

/// Show status of the admin API, data plane, runtime and snapshots
async fn show_status(config: &Config) -> Result<i32> {
    println!("gateway-doctor Status:");
    println!();
    let mut healthy = true;

    let admin = admin_client(config)?;
    match admin.list_routes().await {
        Ok(routes) => println!(
            "  [OK] Admin API: {} ({} routes)",
            config.admin.url,
            routes.len()
        ),
        Err(e) => {
            healthy = false;
            println!("  [ERROR] Admin API: {} ({})", config.admin.url, e);
        }
    }
    match admin.list_consumers().await {
        Ok(consumers) => println!("  [OK] Consumers: {} registered", consumers.len()),
        Err(e) => {
            healthy = false;
            println!("  [ERROR] Consumers: {}", e);
        }
    }

    match runtime_binary(config) {
        Some(binary) => println!("  [OK] Container Runtime: {}", binary),
        None => println!("  [WARNING] Container Runtime: Not found (network checks unavailable)"),
    }

    match snapshot_manager(config).list() {
        Ok(snapshots) => match snapshots.last() {
            Some(latest) => println!(
                "  [OK] Snapshots: {} (latest {})",
                snapshots.len(),
                latest.id
            ),
            None => println!(
                "  [WARNING] Snapshots: none in {}",
                config.snapshot.backups_root.display()
            ),
        },
        Err(e) => println!("  [ERROR] Snapshots: {}", e),
    }

    if let Ok(dir) = get_config_dir() {
        let global = dir.join("config.toml");
        if global.exists() {
            println!("  [OK] Configuration: {}", global.display());
        } else {
            println!("  [WARNING] Configuration: {} not found", global.display());
        }
    }

    println!();
    Ok(if healthy { 0 } else { 1 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_runtime_binary_wins() {
        let mut config = Config::default();
        config.runtime.binary = Some("podman".to_string());
        assert_eq!(runtime_binary(&config), Some("podman"));

        config.runtime.binary = None;
        assert_eq!(runtime_binary(&config), detect_runtime_binary());
    }
}
