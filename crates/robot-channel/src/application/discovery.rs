//! Discovering robots on the local network.
//!
//! # How discovery works (for beginners)
//!
//! Robots advertise their command channel with mDNS, the same mechanism
//! printers and smart speakers use to show up on a LAN without configuration.
//! Each robot family advertises under its own *service type*, for example
//! `_Mini_mini_channel_server._tcp.local.`.
//!
//! A *scan* asks the network for every instance of one service type.  While
//! the scan runs, three things can happen to a robot:
//!
//! - **found**: a name we have not seen in this scan resolves to an address.
//! - **updated**: a known name resolves again (new address, new port).
//! - **removed**: a known name announces it is leaving.
//!
//! [`DeviceDiscovery`] keeps the current set of devices and tells every
//! registered [`DeviceListener`] about each change.  [`find_by_name`] and
//! [`list_all`] are convenience wrappers that run a bounded scan and return
//! a result.
//!
//! The actual network browsing sits behind the [`ServiceBrowser`] trait so
//! tests can drive the scan with scripted events.
//!
//! [`find_by_name`]: DeviceDiscovery::find_by_name
//! [`list_all`]: DeviceDiscovery::list_all

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use robot_core::domain::device_name;
use robot_core::{Advertisement, Device, RobotFamily};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::DiscoveryError;

// ── Ports ─────────────────────────────────────────────────────────────────────

/// A change reported by the network browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// A service instance resolved (first time or again).
    Resolved(Advertisement),
    /// A service instance announced its departure.
    Removed {
        service_type: String,
        fullname: String,
    },
}

/// Source of service advertisements for one service type at a time.
#[cfg_attr(test, mockall::automock)]
pub trait ServiceBrowser: Send + Sync {
    /// Starts browsing `service_type`; events arrive on the returned channel.
    fn browse(
        &self,
        service_type: &str,
    ) -> Result<mpsc::UnboundedReceiver<ServiceEvent>, DiscoveryError>;

    /// Stops browsing `service_type`.  Safe to call when not browsing.
    fn stop_browse(&self, service_type: &str);
}

/// Receives device changes during a scan.
///
/// Callbacks run on the scan task after internal locks are released; they
/// should return quickly.
pub trait DeviceListener: Send + Sync {
    fn on_found(&self, device: &Device);
    fn on_updated(&self, _device: &Device) {}
    fn on_removed(&self, _device: &Device) {}
}

/// Handle returned by [`DeviceDiscovery::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ── Discovery state ───────────────────────────────────────────────────────────

#[derive(Default)]
struct Session {
    devices: HashMap<String, Device>,
    listeners: Vec<(ListenerId, Arc<dyn DeviceListener>)>,
}

struct ActiveScan {
    id: u64,
    service_type: String,
    pump: JoinHandle<()>,
}

struct Inner {
    browser: Arc<dyn ServiceBrowser>,
    family: Mutex<RobotFamily>,
    session: Mutex<Session>,
    scan: Mutex<Option<ActiveScan>>,
    scan_ids: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Copy)]
enum Change {
    Found,
    Updated,
    Removed,
}

impl Inner {
    fn apply(&self, event: ServiceEvent) {
        let (change, device, listeners) = match event {
            ServiceEvent::Resolved(ad) => {
                let Some(device) = Device::from_advertisement(&ad) else {
                    debug!(fullname = %ad.fullname, "advertisement without address ignored");
                    return;
                };
                let mut session = lock(&self.session);
                let change = match session.devices.insert(device.name.clone(), device.clone()) {
                    None => Change::Found,
                    Some(_) => Change::Updated,
                };
                (change, device, snapshot(&session))
            }
            ServiceEvent::Removed {
                service_type,
                fullname,
            } => {
                let name = device_name(&fullname, &service_type);
                let mut session = lock(&self.session);
                let Some(device) = session.devices.remove(name) else {
                    debug!(name, "removal of unknown device ignored");
                    return;
                };
                (Change::Removed, device, snapshot(&session))
            }
        };

        match change {
            Change::Found => info!(device = %device, "robot found"),
            Change::Updated => debug!(device = %device, "robot updated"),
            Change::Removed => info!(name = %device.name, "robot removed"),
        }
        for listener in listeners {
            match change {
                Change::Found => listener.on_found(&device),
                Change::Updated => listener.on_updated(&device),
                Change::Removed => listener.on_removed(&device),
            }
        }
    }

    /// Called by the pump when its scan ends on its own.
    fn finish_scan(&self, id: u64) {
        let mut scan = lock(&self.scan);
        if scan.as_ref().is_some_and(|active| active.id == id) {
            if let Some(active) = scan.take() {
                self.browser.stop_browse(&active.service_type);
                info!(service_type = %active.service_type, "scan finished");
            }
        }
    }

    fn stop_scan(&self) {
        let Some(active) = lock(&self.scan).take() else {
            return;
        };
        active.pump.abort();
        self.browser.stop_browse(&active.service_type);
        info!(service_type = %active.service_type, "scan stopped");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop_scan();
    }
}

fn snapshot(session: &Session) -> Vec<Arc<dyn DeviceListener>> {
    session.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
}

// ── DeviceDiscovery ───────────────────────────────────────────────────────────

/// Scans for robots and tracks the devices currently visible.
///
/// Cloning is cheap; all clones share the same scan, device set and
/// listeners.
#[derive(Clone)]
pub struct DeviceDiscovery {
    inner: Arc<Inner>,
}

impl DeviceDiscovery {
    pub fn new(browser: Arc<dyn ServiceBrowser>, family: RobotFamily) -> Self {
        Self {
            inner: Arc::new(Inner {
                browser,
                family: Mutex::new(family),
                session: Mutex::new(Session::default()),
                scan: Mutex::new(None),
                scan_ids: AtomicU64::new(1),
            }),
        }
    }

    /// Selects the family `find_by_name` and `list_all` scan for.
    pub fn set_robot_family(&self, family: RobotFamily) {
        *lock(&self.inner.family) = family;
    }

    pub fn robot_family(&self) -> RobotFamily {
        *lock(&self.inner.family)
    }

    /// Service type of the configured family.
    pub fn service_type(&self) -> &'static str {
        self.robot_family().service_type()
    }

    /// Starts a scan for `service_type`.
    ///
    /// Any scan already running is stopped and the device set is cleared.  A
    /// non-zero `duration` stops the scan automatically once it elapses; zero
    /// scans until [`stop_scan`](Self::stop_scan).
    ///
    /// Returns `false` if the browser refused to start or no Tokio runtime is
    /// available.
    pub fn start_scan(&self, service_type: &str, duration: Duration) -> bool {
        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("cannot start scan outside a Tokio runtime: {e}");
                return false;
            }
        };

        self.inner.stop_scan();
        lock(&self.inner.session).devices.clear();

        let mut events = match self.inner.browser.browse(service_type) {
            Ok(rx) => rx,
            Err(e) => {
                warn!(service_type, "scan failed to start: {e}");
                return false;
            }
        };

        let id = self.inner.scan_ids.fetch_add(1, Ordering::Relaxed);
        let deadline = (!duration.is_zero()).then(|| Instant::now() + duration);
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        // Held across the spawn so the pump cannot finish before the scan is
        // recorded.
        let mut scan = lock(&self.inner.scan);
        let pump = runtime.spawn(async move {
            loop {
                let next = match deadline {
                    Some(at) => match time::timeout_at(at, events.recv()).await {
                        Ok(event) => event,
                        Err(_) => break,
                    },
                    None => events.recv().await,
                };
                let Some(event) = next else { break };
                let Some(inner) = weak.upgrade() else { return };
                inner.apply(event);
            }
            if let Some(inner) = weak.upgrade() {
                inner.finish_scan(id);
            }
        });
        *scan = Some(ActiveScan {
            id,
            service_type: service_type.to_string(),
            pump,
        });
        info!(service_type, ?duration, "scan started");
        true
    }

    /// Stops the active scan, if any.
    pub fn stop_scan(&self) {
        self.inner.stop_scan();
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.inner.scan).is_some()
    }

    pub fn add_listener(&self, listener: Arc<dyn DeviceListener>) -> ListenerId {
        let id = ListenerId(Uuid::new_v4());
        lock(&self.inner.session).listeners.push((id, listener));
        id
    }

    /// Returns `false` if the listener was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut session = lock(&self.inner.session);
        let before = session.listeners.len();
        session.listeners.retain(|(lid, _)| *lid != id);
        session.listeners.len() != before
    }

    pub fn remove_all_listeners(&self) {
        lock(&self.inner.session).listeners.clear();
    }

    /// The devices currently visible, sorted by name.
    pub fn devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = lock(&self.inner.session).devices.values().cloned().collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices
    }

    /// Scans the configured family until a device whose name ends with `name`
    /// is found, or `timeout` elapses.
    pub async fn find_by_name(&self, name: &str, timeout: Duration) -> Option<Device> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener_id = self.add_listener(Arc::new(NameMatcher {
            suffix: name.to_string(),
            tx,
        }));

        let found = if self.start_scan(self.service_type(), timeout) {
            match time::timeout(timeout, rx.recv()).await {
                Ok(device) => device,
                Err(_) => {
                    debug!(name, ?timeout, "no matching robot before timeout");
                    None
                }
            }
        } else {
            None
        };

        self.remove_listener(listener_id);
        self.stop_scan();
        found
    }

    /// Scans the configured family for `timeout` and returns every device
    /// still present at the end, one per name, sorted by name.
    pub async fn list_all(&self, timeout: Duration) -> Vec<Device> {
        let collector = Arc::new(Collector::default());
        let listener_id = self.add_listener(Arc::clone(&collector) as Arc<dyn DeviceListener>);

        if self.start_scan(self.service_type(), timeout) {
            time::sleep(timeout).await;
        }

        self.remove_listener(listener_id);
        self.stop_scan();
        collector.sorted()
    }
}

impl fmt::Debug for DeviceDiscovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceDiscovery")
            .field("family", &self.robot_family())
            .field("scanning", &self.is_scanning())
            .finish()
    }
}

// ── Built-in listeners ────────────────────────────────────────────────────────

struct NameMatcher {
    suffix: String,
    tx: mpsc::UnboundedSender<Device>,
}

impl NameMatcher {
    fn offer(&self, device: &Device) {
        if device.name.ends_with(&self.suffix) {
            let _ = self.tx.send(device.clone());
        }
    }
}

impl DeviceListener for NameMatcher {
    fn on_found(&self, device: &Device) {
        self.offer(device);
    }

    fn on_updated(&self, device: &Device) {
        self.offer(device);
    }
}

#[derive(Default)]
struct Collector {
    seen: Mutex<HashMap<String, Device>>,
}

impl Collector {
    fn sorted(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = lock(&self.seen).values().cloned().collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices
    }
}

impl DeviceListener for Collector {
    fn on_found(&self, device: &Device) {
        lock(&self.seen).insert(device.name.clone(), device.clone());
    }

    fn on_updated(&self, device: &Device) {
        self.on_found(device);
    }

    fn on_removed(&self, device: &Device) {
        lock(&self.seen).remove(&device.name);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    const TIMEOUT: Duration = Duration::from_secs(2);

    /// Browser that replays a script on every `browse` and lets the test push
    /// further events afterwards.
    #[derive(Default)]
    struct ScriptedBrowser {
        script: Mutex<Vec<ServiceEvent>>,
        sender: Mutex<Option<mpsc::UnboundedSender<ServiceEvent>>>,
        browsed: Mutex<Vec<String>>,
        stopped: Mutex<Vec<String>>,
    }

    impl ScriptedBrowser {
        fn with_script(script: Vec<ServiceEvent>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                ..Self::default()
            })
        }

        fn push(&self, event: ServiceEvent) {
            if let Some(tx) = self.sender.lock().unwrap().as_ref() {
                tx.send(event).unwrap();
            }
        }
    }

    impl ServiceBrowser for ScriptedBrowser {
        fn browse(
            &self,
            service_type: &str,
        ) -> Result<mpsc::UnboundedReceiver<ServiceEvent>, DiscoveryError> {
            let (tx, rx) = mpsc::unbounded_channel();
            for event in self.script.lock().unwrap().iter() {
                tx.send(event.clone()).unwrap();
            }
            *self.sender.lock().unwrap() = Some(tx);
            self.browsed.lock().unwrap().push(service_type.to_string());
            Ok(rx)
        }

        fn stop_browse(&self, service_type: &str) {
            self.stopped.lock().unwrap().push(service_type.to_string());
        }
    }

    #[derive(Debug, PartialEq, Eq)]
    enum Seen {
        Found(String, u16),
        Updated(String, u16),
        Removed(String),
    }

    struct RecordingListener {
        tx: mpsc::UnboundedSender<Seen>,
    }

    impl DeviceListener for RecordingListener {
        fn on_found(&self, d: &Device) {
            let _ = self.tx.send(Seen::Found(d.name.clone(), d.port));
        }
        fn on_updated(&self, d: &Device) {
            let _ = self.tx.send(Seen::Updated(d.name.clone(), d.port));
        }
        fn on_removed(&self, d: &Device) {
            let _ = self.tx.send(Seen::Removed(d.name.clone()));
        }
    }

    fn recording(discovery: &DeviceDiscovery) -> (ListenerId, mpsc::UnboundedReceiver<Seen>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = discovery.add_listener(Arc::new(RecordingListener { tx }));
        (id, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
        time::timeout(TIMEOUT, rx.recv())
            .await
            .expect("listener event")
            .expect("channel open")
    }

    fn mini() -> &'static str {
        RobotFamily::Mini.service_type()
    }

    fn resolved(name: &str, last_octet: u8, port: u16) -> ServiceEvent {
        ServiceEvent::Resolved(Advertisement {
            fullname: format!("{name}.{}", mini()),
            addresses: vec![IpAddr::from([192, 168, 1, last_octet])],
            port,
            service_type: mini().to_string(),
            server: format!("{name}.local."),
        })
    }

    fn removed(name: &str) -> ServiceEvent {
        ServiceEvent::Removed {
            service_type: mini().to_string(),
            fullname: format!("{name}.{}", mini()),
        }
    }

    fn discovery(browser: Arc<ScriptedBrowser>) -> DeviceDiscovery {
        DeviceDiscovery::new(browser, RobotFamily::Mini)
    }

    // ── Listener notifications ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_found_updated_removed_are_reported_in_order() {
        // Arrange
        let browser = ScriptedBrowser::with_script(Vec::new());
        let discovery = discovery(Arc::clone(&browser));
        let (_, mut seen) = recording(&discovery);
        assert!(discovery.start_scan(mini(), Duration::ZERO));

        // Act
        browser.push(resolved("Mini_R17", 20, 8800));
        browser.push(resolved("Mini_R17", 21, 8801));
        browser.push(removed("Mini_R17"));

        // Assert
        assert_eq!(next(&mut seen).await, Seen::Found("Mini_R17".into(), 8800));
        assert_eq!(next(&mut seen).await, Seen::Updated("Mini_R17".into(), 8801));
        assert_eq!(next(&mut seen).await, Seen::Removed("Mini_R17".into()));
        assert!(discovery.devices().is_empty());
        discovery.stop_scan();
    }

    #[tokio::test]
    async fn test_removal_of_unknown_device_is_a_no_op() {
        // Arrange
        let browser = ScriptedBrowser::with_script(vec![removed("Ghost"), resolved("Mini_A", 2, 8800)]);
        let discovery = discovery(browser);
        let (_, mut seen) = recording(&discovery);

        // Act
        discovery.start_scan(mini(), Duration::ZERO);

        // Assert – the first thing any listener hears about is Mini_A
        assert_eq!(next(&mut seen).await, Seen::Found("Mini_A".into(), 8800));
        discovery.stop_scan();
    }

    #[tokio::test]
    async fn test_advertisement_without_address_is_ignored() {
        let no_address = ServiceEvent::Resolved(Advertisement {
            fullname: format!("Mini_X.{}", mini()),
            addresses: Vec::new(),
            port: 8800,
            service_type: mini().to_string(),
            server: "x.local.".to_string(),
        });
        let browser = ScriptedBrowser::with_script(vec![no_address, resolved("Mini_B", 3, 8800)]);
        let discovery = discovery(browser);
        let (_, mut seen) = recording(&discovery);

        discovery.start_scan(mini(), Duration::ZERO);

        assert_eq!(next(&mut seen).await, Seen::Found("Mini_B".into(), 8800));
        assert_eq!(discovery.devices().len(), 1);
        discovery.stop_scan();
    }

    #[tokio::test]
    async fn test_removed_listener_hears_nothing() {
        // Arrange
        let browser = ScriptedBrowser::with_script(Vec::new());
        let discovery = discovery(Arc::clone(&browser));
        let (gone, mut gone_rx) = recording(&discovery);
        let (_, mut kept_rx) = recording(&discovery);

        // Act
        assert!(discovery.remove_listener(gone));
        assert!(!discovery.remove_listener(gone));
        discovery.start_scan(mini(), Duration::ZERO);
        browser.push(resolved("Mini_C", 4, 8800));

        // Assert
        assert_eq!(next(&mut kept_rx).await, Seen::Found("Mini_C".into(), 8800));
        assert!(gone_rx.try_recv().is_err());
        discovery.stop_scan();
    }

    #[tokio::test]
    async fn test_remove_all_listeners() {
        let browser = ScriptedBrowser::with_script(Vec::new());
        let discovery = discovery(browser);
        let (id, _rx) = recording(&discovery);

        discovery.remove_all_listeners();

        assert!(!discovery.remove_listener(id));
    }

    // ── Scan lifecycle ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_start_scan_stops_previous_scan_and_clears_devices() {
        // Arrange
        let browser = ScriptedBrowser::with_script(vec![resolved("Mini_D", 5, 8800)]);
        let discovery = discovery(Arc::clone(&browser));
        let (_, mut seen) = recording(&discovery);
        discovery.start_scan(mini(), Duration::ZERO);
        next(&mut seen).await;
        assert_eq!(discovery.devices().len(), 1);

        // Act
        browser.script.lock().unwrap().clear();
        let edu = RobotFamily::Edu.service_type();
        assert!(discovery.start_scan(edu, Duration::ZERO));

        // Assert
        assert!(discovery.devices().is_empty());
        assert_eq!(*browser.stopped.lock().unwrap(), vec![mini().to_string()]);
        assert_eq!(
            *browser.browsed.lock().unwrap(),
            vec![mini().to_string(), edu.to_string()]
        );
        discovery.stop_scan();
    }

    #[tokio::test]
    async fn test_scan_stops_itself_after_duration() {
        // Arrange
        let browser = ScriptedBrowser::with_script(Vec::new());
        let discovery = discovery(Arc::clone(&browser));

        // Act
        assert!(discovery.start_scan(mini(), Duration::from_millis(50)));
        assert!(discovery.is_scanning());
        time::sleep(Duration::from_millis(300)).await;

        // Assert
        assert!(!discovery.is_scanning());
        assert_eq!(*browser.stopped.lock().unwrap(), vec![mini().to_string()]);
    }

    #[tokio::test]
    async fn test_stop_scan_is_idempotent() {
        let browser = ScriptedBrowser::with_script(Vec::new());
        let discovery = discovery(Arc::clone(&browser));
        discovery.start_scan(mini(), Duration::ZERO);

        discovery.stop_scan();
        discovery.stop_scan();

        assert!(!discovery.is_scanning());
        assert_eq!(browser.stopped.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_browse_failure_returns_false() {
        // Arrange
        let mut browser = MockServiceBrowser::new();
        browser.expect_browse().times(1).returning(|ty| {
            Err(DiscoveryError::Browse {
                service_type: ty.to_string(),
                reason: "no interface".to_string(),
            })
        });
        browser.expect_stop_browse().never();
        let discovery = DeviceDiscovery::new(Arc::new(browser), RobotFamily::Dedu);

        // Act
        let started = discovery.start_scan(RobotFamily::Dedu.service_type(), TIMEOUT);

        // Assert
        assert!(!started);
        assert!(!discovery.is_scanning());
    }

    #[test]
    fn test_start_scan_without_runtime_returns_false() {
        let browser = ScriptedBrowser::with_script(Vec::new());
        let discovery = discovery(Arc::clone(&browser));

        assert!(!discovery.start_scan(mini(), TIMEOUT));
        assert!(browser.browsed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_family_selects_service_type() {
        let discovery = discovery(ScriptedBrowser::with_script(Vec::new()));
        assert_eq!(discovery.service_type(), mini());

        discovery.set_robot_family(RobotFamily::Kor);

        assert_eq!(discovery.robot_family(), RobotFamily::Kor);
        assert_eq!(discovery.service_type(), "_Kor_mini_channel_server._tcp.local.");
    }

    // ── find_by_name / list_all ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_find_by_name_matches_suffix() {
        // Arrange
        let browser = ScriptedBrowser::with_script(vec![
            resolved("Mini_R11", 11, 8800),
            resolved("Mini_R17", 17, 8800),
        ]);
        let discovery = discovery(Arc::clone(&browser));

        // Act
        let device = discovery.find_by_name("R17", TIMEOUT).await;

        // Assert
        let device = device.expect("device found");
        assert_eq!(device.name, "Mini_R17");
        assert_eq!(device.address, IpAddr::from([192, 168, 1, 17]));
        assert!(!discovery.is_scanning());
        assert_eq!(browser.stopped.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_find_by_name_times_out_with_none() {
        let browser = ScriptedBrowser::with_script(vec![resolved("Mini_R11", 11, 8800)]);
        let discovery = discovery(browser);

        let device = discovery.find_by_name("R99", Duration::from_millis(100)).await;

        assert!(device.is_none());
        assert!(!discovery.is_scanning());
    }

    #[tokio::test]
    async fn test_find_by_name_removes_its_listener() {
        // Arrange
        let browser = ScriptedBrowser::with_script(vec![resolved("Mini_R17", 17, 8800)]);
        let discovery = discovery(browser);
        let (watcher, _rx) = recording(&discovery);

        // Act
        discovery.find_by_name("R17", TIMEOUT).await;

        // Assert – only the watcher is left; removing it empties the list
        assert!(discovery.remove_listener(watcher));
        assert_eq!(lock(&discovery.inner.session).listeners.len(), 0);
    }

    #[tokio::test]
    async fn test_list_all_deduplicates_and_drops_departed_devices() {
        // Arrange
        let browser = ScriptedBrowser::with_script(vec![
            resolved("Mini_B", 2, 8800),
            resolved("Mini_A", 1, 8800),
            resolved("Mini_A", 9, 8801),
            resolved("Mini_C", 3, 8800),
            removed("Mini_C"),
        ]);
        let discovery = discovery(browser);

        // Act
        let devices = discovery.list_all(Duration::from_millis(150)).await;

        // Assert
        let names: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["Mini_A", "Mini_B"]);
        assert_eq!(devices[0].port, 8801, "latest snapshot wins");
        assert!(!discovery.is_scanning());
    }

    #[tokio::test]
    async fn test_list_all_returns_empty_when_scan_cannot_start() {
        let mut browser = MockServiceBrowser::new();
        browser.expect_browse().returning(|_| Err(DiscoveryError::Unavailable("down".into())));
        let discovery = DeviceDiscovery::new(Arc::new(browser), RobotFamily::Mini);

        let devices = discovery.list_all(Duration::from_millis(10)).await;

        assert!(devices.is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let browser = ScriptedBrowser::with_script(vec![resolved("Mini_E", 6, 8800)]);
        let discovery = discovery(browser);
        let other = discovery.clone();
        let (_, mut seen) = recording(&other);

        discovery.start_scan(mini(), Duration::ZERO);
        next(&mut seen).await;

        assert!(other.is_scanning());
        assert_eq!(other.devices().len(), 1);
        other.stop_scan();
        assert!(!discovery.is_scanning());
    }
}
