use super::{LockMonitor, MonitorOptions};
use std::sync::{Arc, OnceLock};

static DEFAULT_MONITOR: OnceLock<Arc<LockMonitor>> = OnceLock::new();

/// Process-wide monitor, built from `options` on the first call.
///
/// Later calls return the same instance and ignore their `options`. Meant for
/// bootstrap code; components should take an `Arc<LockMonitor>` instead.
pub fn default_monitor(options: MonitorOptions) -> Arc<LockMonitor> {
    DEFAULT_MONITOR
        .get_or_init(|| Arc::new(LockMonitor::new(options)))
        .clone()
}
