//! Session tuning knobs

use std::time::Duration;

use crate::library::DEFAULT_SCAN_LIMIT;


/// Default interval between position polls of the live resource.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs( 1 );


/// Configuration for a [`SessionManager`](crate::SessionManager).
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct SessionConfig {
    /// How often the live resource's position is mirrored into session state
    pub poll_interval: Duration,
    /// Maximum number of assets requested per library scan
    pub scan_limit: usize,
    /// Show a paused notification for the restored track at startup
    pub show_restored_notification: bool,
}


impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            scan_limit: DEFAULT_SCAN_LIMIT,
            show_restored_notification: true,
        }
    }
}
