//! mDNS implementation of [`ServiceBrowser`] on top of the `mdns-sd` daemon.
//!
//! `mdns-sd` runs its own background thread and reports results on a
//! blocking channel.  For each browse we start a small pump thread that
//! forwards those results, translated to [`ServiceEvent`]s, onto a Tokio
//! channel the discovery use case can `.await`.
//!
//! # Read timeout
//!
//! The pump waits at most 500 ms for each daemon event.  On every timeout it
//! checks its `running` flag, so `stop_browse` takes effect within half a
//! second even on a silent network.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent as MdnsEvent, ServiceInfo};
use robot_core::Advertisement;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::application::discovery::{ServiceBrowser, ServiceEvent};
use crate::domain::DiscoveryError;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Browses the local network through a shared `mdns-sd` daemon.
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
    running: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl MdnsBrowser {
    /// Starts the mDNS daemon.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Unavailable`] if the daemon cannot bind its
    /// multicast sockets.
    pub fn new() -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::Unavailable(e.to_string()))?;
        Ok(Self {
            daemon,
            running: Mutex::new(HashMap::new()),
        })
    }

    fn running(&self) -> MutexGuard<'_, HashMap<String, Arc<AtomicBool>>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ServiceBrowser for MdnsBrowser {
    fn browse(
        &self,
        service_type: &str,
    ) -> Result<mpsc::UnboundedReceiver<ServiceEvent>, DiscoveryError> {
        self.stop_browse(service_type);

        let receiver = self.daemon.browse(service_type).map_err(|e| DiscoveryError::Browse {
            service_type: service_type.to_string(),
            reason: e.to_string(),
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let ty = service_type.to_string();

        std::thread::Builder::new()
            .name("robot-mdns-browse".to_string())
            .spawn(move || {
                while flag.load(Ordering::Relaxed) {
                    let event = match receiver.recv_timeout(POLL_INTERVAL) {
                        Ok(event) => event,
                        Err(_) if receiver.is_disconnected() => break,
                        Err(_) => continue,
                    };
                    let Some(event) = translate(event, &ty) else {
                        continue;
                    };
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                debug!(service_type = %ty, "mDNS pump stopped");
            })
            .map_err(|e| {
                let _ = self.daemon.stop_browse(service_type);
                DiscoveryError::Browse {
                    service_type: service_type.to_string(),
                    reason: format!("failed to spawn pump thread: {e}"),
                }
            })?;

        self.running().insert(service_type.to_string(), running);
        info!(service_type, "mDNS browse started");
        Ok(rx)
    }

    fn stop_browse(&self, service_type: &str) {
        let Some(flag) = self.running().remove(service_type) else {
            return;
        };
        flag.store(false, Ordering::Relaxed);
        if let Err(e) = self.daemon.stop_browse(service_type) {
            debug!(service_type, "mDNS stop_browse: {e}");
        }
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        for (_, flag) in self.running().drain() {
            flag.store(false, Ordering::Relaxed);
        }
        if let Err(e) = self.daemon.shutdown() {
            warn!("mDNS daemon shutdown failed: {e}");
        }
    }
}

/// Converts a daemon event into a browser event.  Progress notifications
/// (search started, name found but not yet resolved) are dropped.
fn translate(event: MdnsEvent, service_type: &str) -> Option<ServiceEvent> {
    match event {
        MdnsEvent::ServiceResolved(info) => Some(ServiceEvent::Resolved(advertisement_from(
            &info,
            service_type,
        ))),
        MdnsEvent::ServiceRemoved(ty, fullname) => Some(ServiceEvent::Removed {
            service_type: ty,
            fullname,
        }),
        _ => None,
    }
}

fn advertisement_from(info: &ServiceInfo, service_type: &str) -> Advertisement {
    let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
    addresses.sort();
    Advertisement {
        fullname: info.get_fullname().to_string(),
        addresses,
        port: info.get_port(),
        service_type: service_type.to_string(),
        server: info.get_hostname().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TY: &str = "_robot._tcp.local.";

    fn info(ip: &str) -> ServiceInfo {
        ServiceInfo::new(TY, "Mini_R17", "r17.local.", ip, 8800, None::<HashMap<String, String>>)
            .expect("service info")
    }

    #[test]
    fn test_resolved_service_maps_to_advertisement() {
        // Arrange
        let info = info("192.168.1.20");

        // Act
        let ad = advertisement_from(&info, TY);

        // Assert
        assert_eq!(ad.fullname, "Mini_R17._robot._tcp.local.");
        assert_eq!(ad.addresses, vec!["192.168.1.20".parse::<IpAddr>().unwrap()]);
        assert_eq!(ad.port, 8800);
        assert_eq!(ad.service_type, TY);
        assert_eq!(ad.server, "r17.local.");
    }

    #[test]
    fn test_removed_event_keeps_type_and_fullname() {
        let event = MdnsEvent::ServiceRemoved(TY.to_string(), format!("Mini_R17.{TY}"));

        let translated = translate(event, TY);

        assert_eq!(
            translated,
            Some(ServiceEvent::Removed {
                service_type: TY.to_string(),
                fullname: format!("Mini_R17.{TY}"),
            })
        );
    }

    #[test]
    fn test_progress_events_are_dropped() {
        assert_eq!(translate(MdnsEvent::SearchStarted(TY.to_string()), TY), None);
        assert_eq!(
            translate(MdnsEvent::ServiceFound(TY.to_string(), format!("x.{TY}")), TY),
            None
        );
    }
}
