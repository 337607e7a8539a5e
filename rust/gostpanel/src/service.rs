use anyhow::{Context, Result};
use std::{path::PathBuf, time::Duration};
use tracing::info;

use crate::config::ServiceConfig;
use crate::rules::ForwardingRule;
use crate::store::write_atomic;
use crate::{shell, unit::UnitTemplate};

/// Init-system operations on the forwarder unit.
pub trait ServiceManager: Send + Sync {
    fn install_unit(&self, contents: &str) -> Result<()>;
    fn daemon_reload(&self) -> Result<()>;
    fn enable(&self) -> Result<()>;
    fn disable(&self) -> Result<()>;
    fn restart(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn is_active(&self) -> Result<bool>;
}

/// `systemctl` against a unit file under /etc/systemd/system.
#[derive(Debug, Clone)]
pub struct Systemd {
    unit_name: String,
    unit_path: PathBuf,
    systemctl: String,
    timeout: Duration,
}

impl Systemd {
    pub fn from_config(cfg: &ServiceConfig) -> Self {
        Self {
            unit_name: cfg.unit_name.clone(),
            unit_path: cfg.unit_path.clone(),
            systemctl: cfg.systemctl.clone(),
            timeout: Duration::from_secs(cfg.command_timeout_secs.max(1)),
        }
    }

    fn systemctl(&self, verb: &str) -> Result<()> {
        shell::ok_timeout(&self.systemctl, &[verb, self.unit_name.as_str()], self.timeout)
            .with_context(|| format!("systemctl {verb} {}", self.unit_name))?;
        Ok(())
    }
}

impl ServiceManager for Systemd {
    fn install_unit(&self, contents: &str) -> Result<()> {
        write_atomic(&self.unit_path, contents.as_bytes())
            .with_context(|| format!("write unit {}", self.unit_path.display()))
    }

    fn daemon_reload(&self) -> Result<()> {
        shell::ok_timeout(&self.systemctl, &["daemon-reload"], self.timeout)
            .context("systemctl daemon-reload")?;
        Ok(())
    }

    fn enable(&self) -> Result<()> {
        self.systemctl("enable")
    }

    fn disable(&self) -> Result<()> {
        self.systemctl("disable")
    }

    fn restart(&self) -> Result<()> {
        self.systemctl("restart")
    }

    fn stop(&self) -> Result<()> {
        self.systemctl("stop")
    }

    fn is_active(&self) -> Result<bool> {
        // is-active exits 0 only for an active unit; the exit code is the answer.
        let (code, _) = shell::run_timeout(&self.systemctl, &["is-active", "--quiet", self.unit_name.as_str()], self.timeout)?;
        Ok(code == 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No rules: the unit was stopped and disabled.
    Stopped,
    /// The unit was rewritten and restarted with this many rules.
    Restarted { rules: usize },
}

/// Bring the supervised forwarder in line with `rules`.
///
/// Steps run in order and stop at the first failure. An empty rule set never
/// starts the forwarder; it is stopped and disabled instead.
pub fn sync(rules: &[ForwardingRule], template: &UnitTemplate, mgr: &dyn ServiceManager) -> Result<SyncOutcome> {
    if rules.is_empty() {
        info!("no rules left: stopping and disabling forwarder");
        mgr.stop()?;
        mgr.disable()?;
        return Ok(SyncOutcome::Stopped);
    }

    info!("applying {} rule(s) to forwarder unit", rules.len());
    mgr.install_unit(&template.render(rules))?;
    mgr.daemon_reload()?;
    mgr.enable()?;
    mgr.restart()?;
    Ok(SyncOutcome::Restarted { rules: rules.len() })
}


#[cfg(test)]
mod tests {
    use super::testing::Recorder;
    use super::*;
    use crate::rules::Protocol;
    use std::fs;
    use tempfile::TempDir;

    fn template() -> UnitTemplate {
        UnitTemplate::from_config(&ServiceConfig::default())
    }

    fn rule() -> ForwardingRule {
        ForwardingRule {
            protocol: Protocol::Tcp,
            local_addr: "127.0.0.1".into(),
            local_port: "8080".into(),
            remote_addr: "example.com".into(),
            remote_port: "80".into(),
        }
    }

    #[test]
    fn empty_rules_stop_and_disable() {
        let rec = Recorder::default();
        let out = sync(&[], &template(), &rec).unwrap();
        assert_eq!(out, SyncOutcome::Stopped);
        assert_eq!(rec.calls(), vec!["stop", "disable"]);
        assert!(rec.unit.lock().is_none());
    }

    #[test]
    fn rules_rewrite_reload_enable_restart() {
        let rec = Recorder::default();
        let out = sync(&[rule(), rule()], &template(), &rec).unwrap();
        assert_eq!(out, SyncOutcome::Restarted { rules: 2 });
        assert_eq!(rec.calls(), vec!["install", "daemon-reload", "enable", "restart"]);
        let unit = rec.unit.lock().clone().unwrap();
        assert!(unit.contains("-L tcp://127.0.0.1:8080 -F tcp://example.com:80 -L"));
    }

    #[test]
    fn first_failure_stops_the_sequence() {
        let rec = Recorder::failing("daemon-reload");
        assert!(sync(&[rule()], &template(), &rec).is_err());
        assert_eq!(rec.calls(), vec!["install", "daemon-reload"]);

        let rec = Recorder::failing("stop");
        assert!(sync(&[], &template(), &rec).is_err());
        assert_eq!(rec.calls(), vec!["stop"]);
    }

    #[test]
    fn systemd_writes_unit_and_reports_command_failure() {
        let dir = TempDir::new().unwrap();
        let cfg = ServiceConfig {
            unit_path: dir.path().join("gost.service"),
            systemctl: "false".into(),
            command_timeout_secs: 5,
            ..ServiceConfig::default()
        };
        let sd = Systemd::from_config(&cfg);
        sd.install_unit("[Unit]\n").unwrap();
        assert_eq!(fs::read_to_string(&cfg.unit_path).unwrap(), "[Unit]\n");

        let err = sd.restart().unwrap_err();
        assert!(format!("{err:#}").contains("systemctl restart gost"));
        assert!(!sd.is_active().unwrap());
    }
}
