//! Service advertisement
//!
//! The microphone announces itself as a named record under a fixed service
//! type, carrying only the port receivers should send their handshake to.

use mdns_sd::{ServiceDaemon, ServiceInfo};
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::DiscoveryError;

/// What gets advertised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub service_type: String,
    pub name: String,
    pub port: u16,
}

/// Something that can publish and withdraw a [`ServiceRecord`].
pub trait ServiceRegistry: Send + Sync {
    /// Publish `record`. Returns once the advertisement is established.
    fn register(&self, record: &ServiceRecord) -> Result<(), DiscoveryError>;

    /// Withdraw a previously registered record. Unknown records are ignored.
    fn unregister(&self, record: &ServiceRecord) -> Result<(), DiscoveryError>;
}

/// DNS-SD advertisement over multicast DNS
pub struct MdnsRegistry {
    daemon: ServiceDaemon,
    host_name: String,
    /// Full names of live registrations, keyed by instance name
    registered: Mutex<HashMap<String, String>>,
}

impl MdnsRegistry {
    pub fn new(host_name: &str) -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::Registration(e.to_string()))?;
        let host_name = if host_name.ends_with(".local.") {
            host_name.to_string()
        } else {
            format!("{}.local.", host_name.trim_end_matches('.'))
        };
        Ok(Self {
            daemon,
            host_name,
            registered: Mutex::new(HashMap::new()),
        })
    }
}

impl ServiceRegistry for MdnsRegistry {
    fn register(&self, record: &ServiceRecord) -> Result<(), DiscoveryError> {
        let info = ServiceInfo::new(
            &record.service_type,
            &record.name,
            &self.host_name,
            "",
            record.port,
            None::<HashMap<String, String>>,
        )
        .map_err(|e| DiscoveryError::Registration(e.to_string()))?
        .enable_addr_auto();

        let fullname = info.get_fullname().to_string();
        self.daemon
            .register(info)
            .map_err(|e| DiscoveryError::Registration(e.to_string()))?;

        tracing::info!("Service registered: {} on port {}", fullname, record.port);
        self.registered.lock().insert(record.name.clone(), fullname);
        Ok(())
    }

    fn unregister(&self, record: &ServiceRecord) -> Result<(), DiscoveryError> {
        let Some(fullname) = self.registered.lock().remove(&record.name) else {
            return Ok(());
        };
        self.daemon
            .unregister(&fullname)
            .map_err(|e| DiscoveryError::Registration(e.to_string()))?;
        tracing::debug!("Service unregistered: {}", fullname);
        Ok(())
    }
}

impl Drop for MdnsRegistry {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.shutdown() {
            tracing::debug!("mDNS daemon shutdown: {}", e);
        }
    }
}
