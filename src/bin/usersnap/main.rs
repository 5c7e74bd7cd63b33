use anyhow::Result;
use clap::Parser;
use env_logger::{Builder, Env};
use log::error;

use usersnap::UsersConfig;

mod cli;
mod cmd_check;
mod cmd_compact;
mod cmd_dump;
mod cmd_serve;

fn init_logger() {
    // Уровень берём из RUST_LOG, иначе дефолт — info.
    // Пример: RUST_LOG=debug usersnap serve ...
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        // Логируем ошибку и выходим с кодом 1.
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    let cfg = UsersConfig::from_env();
    match cli.cmd {
        cli::Cmd::Serve { snapshot, addr, workers, drain_timeout_ms, compact_json } => {
            let mut cfg = cfg;
            if let Some(p) = snapshot {
                cfg = cfg.with_snapshot_path(p);
            }
            if let Some(a) = addr {
                cfg = cfg.with_http_addr(a);
            }
            if let Some(n) = workers {
                cfg = cfg.with_http_workers(n);
            }
            if let Some(ms) = drain_timeout_ms {
                cfg = cfg.with_drain_timeout_ms(ms);
            }
            if compact_json {
                cfg = cfg.with_snapshot_pretty(false);
            }
            cmd_serve::exec(cfg)
        }

        cli::Cmd::Check { snapshot, json } =>
            cmd_check::exec(snapshot.unwrap_or(cfg.snapshot_path), json),

        cli::Cmd::Dump { snapshot } =>
            cmd_dump::exec(snapshot.unwrap_or(cfg.snapshot_path)),

        cli::Cmd::Compact { snapshot } =>
            cmd_compact::exec(snapshot.unwrap_or(cfg.snapshot_path), cfg.snapshot_pretty),
    }
}
