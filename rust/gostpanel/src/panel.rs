use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    rules::{ForwardingRule, RuleError, RuleInput},
    service::{self, ServiceManager, SyncOutcome},
    store::{RuleStore, StoreError},
    unit::UnitTemplate,
};

#[derive(Debug, Error)]
pub enum PanelError {
    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Rule mutations followed by a forwarder re-sync.
///
/// `busy` serializes load -> mutate -> save -> sync so two concurrent
/// submissions can't interleave their reads and writes of the rules file.
pub struct Panel {
    store: RuleStore,
    template: UnitTemplate,
    service: Arc<dyn ServiceManager>,
    busy: Mutex<()>,
}

impl Panel {
    pub fn new(store: RuleStore, template: UnitTemplate, service: Arc<dyn ServiceManager>) -> Self {
        Self { store, template, service, busy: Mutex::new(()) }
    }

    pub fn rules(&self) -> Vec<ForwardingRule> {
        self.store.load()
    }

    pub fn add(&self, input: &RuleInput) -> Result<ForwardingRule, PanelError> {
        let rule = input.validate()?;
        let _guard = self.busy.lock();
        let rules = self.store.add(rule.clone())?;
        info!("rule added: {} -> {}", rule.listen_spec(), rule.forward_spec());
        self.sync_logged(&rules);
        Ok(rule)
    }

    pub fn delete(&self, index: usize) -> Result<ForwardingRule, PanelError> {
        let _guard = self.busy.lock();
        let (removed, rules) = self.store.remove(index).map_err(|e| {
            warn!("delete rule {index}: {e}");
            e
        })?;
        info!("rule {index} deleted: {} -> {}", removed.listen_spec(), removed.forward_spec());
        self.sync_logged(&rules);
        Ok(removed)
    }

    /// Re-sync the forwarder from the stored rules, reporting failures.
    pub fn apply(&self) -> anyhow::Result<SyncOutcome> {
        let _guard = self.busy.lock();
        let rules = self.store.load();
        service::sync(&rules, &self.template, self.service.as_ref())
    }

    pub fn service_active(&self) -> bool {
        match self.service.is_active() {
            Ok(v) => v,
            Err(e) => {
                warn!("service status: {e:#}");
                false
            }
        }
    }

    // Supervisor failures are logged only; the stored rules are already
    // authoritative and the caller still sees the mutation succeed.
    fn sync_logged(&self, rules: &[ForwardingRule]) {
        if let Err(e) = service::sync(rules, &self.template, self.service.as_ref()) {
            error!("updating forwarder service failed: {e:#}");
        }
    }
}
