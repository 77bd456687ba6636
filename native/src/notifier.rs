// Lifecycle acknowledgements posted to the peer outside of the
// command/reply exchange.

use crate::bridge::Bridge;
use log::debug;
use std::sync::Arc;

/// Label sent with the started acknowledgement.
pub const PLUGIN_STARTED_LABEL: &str = "BaseHeadNuendoMutex";
pub const PLUGIN_STOPPED_TEXT: &str = "SKI plugin stopped";
/// Sent in place of the path of a project that was never saved.
pub const NO_PERSISTENT_PROJECT: &str = "No active persistent project";

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCode {
    PluginStarted = 0,
    ProjectAdded = 1,
    ProjectRemoved = 2,
    ProjectActivated = 3,
    ProjectDeactivated = 4,
    PluginStopped = 5,
}

impl AckCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(AckCode::PluginStarted),
            1 => Some(AckCode::ProjectAdded),
            2 => Some(AckCode::ProjectRemoved),
            3 => Some(AckCode::ProjectActivated),
            4 => Some(AckCode::ProjectDeactivated),
            5 => Some(AckCode::PluginStopped),
            _ => None,
        }
    }
}

/// Posts lifecycle acknowledgements through a bridge.
#[derive(Clone)]
pub struct LifecycleNotifier {
    bridge: Arc<Bridge>,
}

impl LifecycleNotifier {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }

    /// Post an acknowledgement. Returns `false` when the bridge refused it
    /// because a command was in flight.
    pub fn notify(&self, code: AckCode, text: &str) -> bool {
        let posted = self.bridge.post_acknowledgement(code.code(), text);
        if !posted {
            debug!("[BRIDGE] {:?} acknowledgement refused", code);
        }
        posted
    }

    pub fn plugin_started(&self) -> bool {
        self.notify(AckCode::PluginStarted, PLUGIN_STARTED_LABEL)
    }

    pub fn project_added(&self, path: Option<&str>) -> bool {
        self.notify(AckCode::ProjectAdded, project_text(path))
    }

    pub fn project_removed(&self, path: Option<&str>) -> bool {
        self.notify(AckCode::ProjectRemoved, project_text(path))
    }

    pub fn project_activated(&self, path: Option<&str>) -> bool {
        self.notify(AckCode::ProjectActivated, project_text(path))
    }

    pub fn project_deactivated(&self, path: Option<&str>) -> bool {
        self.notify(AckCode::ProjectDeactivated, project_text(path))
    }

    /// A project is about to be saved. The peer learns its (possibly new)
    /// path through a ProjectActivated acknowledgement.
    pub fn project_saved(&self, path: Option<&str>) -> bool {
        self.notify(AckCode::ProjectActivated, project_text(path))
    }

    /// Stop answering commands, then announce the stop.
    pub fn plugin_stopped(&self) -> bool {
        self.bridge.set_shutting_down();
        self.notify(AckCode::PluginStopped, PLUGIN_STOPPED_TEXT)
    }
}

fn project_text(path: Option<&str>) -> &str {
    match path {
        Some(path) if !path.is_empty() => path,
        _ => NO_PERSISTENT_PROJECT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::ipc::testing::ScriptedTransport;
    use std::time::Duration;

    #[test]
    fn test_codes_round_trip() {
        for code in 0..=5 {
            assert_eq!(AckCode::from_code(code).map(AckCode::code), Some(code));
        }
        assert_eq!(AckCode::from_code(6), None);
        assert_eq!(AckCode::from_code(-1), None);
    }

    #[test]
    fn test_lifecycle_sequence() {
        let transport = Arc::new(ScriptedTransport::new());
        let config = BridgeConfig {
            receive_poll_ms: 2,
            send_idle_wait_ms: 2,
            shutdown_grace_ms: 500,
            ..BridgeConfig::default()
        };
        let bridge = Arc::new(Bridge::with_transport(config, transport.clone()).unwrap());
        let notifier = LifecycleNotifier::new(Arc::clone(&bridge));

        assert!(notifier.plugin_started());
        assert!(notifier.project_added(Some("/p/a.npr")));
        assert!(notifier.project_activated(None));
        assert!(notifier.plugin_stopped());
        assert!(bridge.is_shutting_down());

        assert!(bridge.flush(Duration::from_secs(2)));
        assert_eq!(
            transport.writes(),
            vec![
                "0\tBaseHeadNuendoMutex",
                "1\t/p/a.npr",
                "3\tNo active persistent project",
                "5\tSKI plugin stopped",
            ]
        );
        bridge.shutdown();
    }

    #[test]
    fn test_project_saved_reports_path_as_activated() {
        let transport = Arc::new(ScriptedTransport::new());
        let config = BridgeConfig {
            receive_poll_ms: 2,
            send_idle_wait_ms: 2,
            shutdown_grace_ms: 500,
            ..BridgeConfig::default()
        };
        let bridge = Arc::new(Bridge::with_transport(config, transport.clone()).unwrap());
        let notifier = LifecycleNotifier::new(Arc::clone(&bridge));

        assert!(notifier.project_saved(Some("/p/renamed.npr")));
        assert!(notifier.project_saved(Some("")));

        assert!(bridge.flush(Duration::from_secs(2)));
        assert_eq!(
            transport.writes(),
            vec!["3\t/p/renamed.npr", "3\tNo active persistent project"]
        );
        bridge.shutdown();
    }
}
