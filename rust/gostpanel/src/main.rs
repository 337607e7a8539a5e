mod cli;
mod config;
mod logging;
mod panel;
mod rules;
mod service;
mod shell;
mod store;
mod system;
mod unit;
mod web;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Args, Command};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    config::Config,
    panel::Panel,
    service::{Systemd, SyncOutcome},
    store::RuleStore,
    unit::UnitTemplate,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let apply = match &args.command {
        Some(Command::HashPassword { password }) => {
            println!("{}", config::sha256_hex(password));
            return Ok(());
        }
        Some(Command::Apply) => true,
        Some(Command::Serve) | None => false,
    };

    let mut cfg = Config::load_or_default(args.config.as_deref()).context("load config")?;
    args.apply_overrides(&mut cfg);
    logging::init(&cfg.log)?;

    // systemctl and the unit directory need root.
    if cfg.require_root && unsafe { libc::geteuid() } != 0 {
        eprintln!("gostpanel: root privileges are required (set require_root=false to skip)");
        anyhow::bail!("root privileges are required");
    }

    let store = RuleStore::new(cfg.rules_file.clone());
    info!("rules file: {}", store.path().display());
    let panel = Arc::new(Panel::new(
        store,
        UnitTemplate::from_config(&cfg.service),
        Arc::new(Systemd::from_config(&cfg.service)),
    ));

    if apply {
        let outcome = tokio::task::spawn_blocking(move || panel.apply())
            .await
            .context("apply task")??;
        match outcome {
            SyncOutcome::Stopped => info!("no rules stored; forwarder stopped and disabled"),
            SyncOutcome::Restarted { rules } => info!("forwarder restarted with {rules} rule(s)"),
        }
        return Ok(());
    }

    if cfg.auth.uses_default_password() {
        warn!("panel is using the default password; set auth.password_sha256 in the config");
    }
    let state = web::AppState {
        panel,
        auth: Arc::new(cfg.auth.clone()),
        os: Arc::from(system::detect_os()),
    };
    web::serve(state, &cfg.listen).await
}
