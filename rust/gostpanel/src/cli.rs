use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;

#[derive(Clone, Debug, Parser)]
#[command(
    name = "gostpanel",
    version,
    about = "Web panel for GOST port-forwarding rules",
    long_about = "gostpanel keeps a list of TCP/UDP/HTTP/HTTPS forwarding rules in a JSON file and \
applies them by regenerating a systemd unit for the GOST binary and restarting it.",
    after_help = r#"FILES
  Rules:  /opt/gost_web/rules.json          (--rules-file)
  Unit:   /etc/systemd/system/gost.service  (service.unit_path in --config)

EXAMPLES
  gostpanel --config /etc/gostpanel.json
  gostpanel apply
  gostpanel hash-password 's3cret'
"#
)]
pub struct Args {
    /// JSON config file; built-in defaults are used when omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Listen address, overrides `listen` from the config.
    #[arg(long)]
    pub listen: Option<String>,

    /// Rules file, overrides `rules_file` from the config.
    #[arg(long)]
    pub rules_file: Option<PathBuf>,

    /// trace|debug|info|warn|error, overrides `log.level`.
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Serve the web panel (default).
    Serve,
    /// Regenerate the unit from the stored rules, restart or stop the service, and exit.
    Apply,
    /// Print the SHA-256 hex digest to put in `auth.password_sha256`.
    HashPassword { password: String },
}

impl Args {
    /// Fold command-line overrides into a loaded config.
    pub fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(l) = &self.listen {
            cfg.listen = l.clone();
        }
        if let Some(p) = &self.rules_file {
            cfg.rules_file = p.clone();
        }
        if let Some(l) = &self.log_level {
            cfg.log.level = l.clone();
        }
    }
}
