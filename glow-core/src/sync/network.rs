use tokio::sync::watch;

/// Connectivity as last reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkState {
    pub is_wifi: bool,
    pub is_internet_reachable: bool,
}

impl NetworkState {
    pub const OFFLINE: NetworkState = NetworkState {
        is_wifi: false,
        is_internet_reachable: false,
    };

    pub const WIFI: NetworkState = NetworkState {
        is_wifi: true,
        is_internet_reachable: true,
    };

    pub const CELLULAR: NetworkState = NetworkState {
        is_wifi: false,
        is_internet_reachable: true,
    };

    /// Uploads only run on WiFi with a working connection.
    pub fn allows_sync(&self) -> bool {
        self.is_wifi && self.is_internet_reachable
    }
}

/// Latest network state plus change notifications. The platform layer
/// calls `set`; the sync queue subscribes.
#[derive(Clone)]
pub struct NetworkMonitor {
    tx: watch::Sender<NetworkState>,
}

impl NetworkMonitor {
    pub fn new(initial: NetworkState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> NetworkState {
        *self.tx.borrow()
    }

    pub fn set(&self, state: NetworkState) {
        self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.tx.subscribe()
    }
}
