//! Discovered robots and the product families that advertise them.
//!
//! Robots announce their command channel on the local network as mDNS
//! services.  Each product family uses its own service type, so a scan must be
//! told which family to look for before it starts.
//!
//! A raw advertisement names the service with the service type appended, e.g.
//! `Mini_R17._Mini_mini_channel_server._tcp.local.`.  The [`Device`] built from
//! it carries only the part in front of the type (`Mini_R17`), which is the
//! name printed on the robot.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Robot families ────────────────────────────────────────────────────────────

/// The robot product families known to this deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotFamily {
    /// Domestic education edition.
    #[default]
    Dedu,
    /// Standard edition.
    Mini,
    /// Overseas education edition.
    Edu,
    /// Korean edition.
    Kor,
}

impl RobotFamily {
    /// Every family, in declaration order.
    pub const ALL: [RobotFamily; 4] = [
        RobotFamily::Dedu,
        RobotFamily::Mini,
        RobotFamily::Edu,
        RobotFamily::Kor,
    ];

    /// The mDNS service type robots of this family advertise.
    pub fn service_type(self) -> &'static str {
        match self {
            RobotFamily::Dedu => "_Dedu_mini_channel_server._tcp.local.",
            RobotFamily::Mini => "_Mini_mini_channel_server._tcp.local.",
            RobotFamily::Edu => "_Edu_mini_channel_server._tcp.local.",
            RobotFamily::Kor => "_Kor_mini_channel_server._tcp.local.",
        }
    }

    /// Lower-case name used in config files and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            RobotFamily::Dedu => "dedu",
            RobotFamily::Mini => "mini",
            RobotFamily::Edu => "edu",
            RobotFamily::Kor => "kor",
        }
    }
}

impl fmt::Display for RobotFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a known robot family.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown robot family '{0}' (expected one of: dedu, mini, edu, kor)")]
pub struct UnknownRobotFamily(pub String);

impl FromStr for RobotFamily {
    type Err = UnknownRobotFamily;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RobotFamily::ALL
            .into_iter()
            .find(|family| family.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownRobotFamily(s.to_string()))
    }
}

// ── Advertisements ────────────────────────────────────────────────────────────

/// A resolved service advertisement, exactly as the network reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Full service instance name, including the service type suffix.
    pub fullname: String,
    /// Every address the service resolved to.
    pub addresses: Vec<IpAddr>,
    /// Port the service listens on.
    pub port: u16,
    /// Service type the advertisement was found under.
    pub service_type: String,
    /// Host name of the advertising server.
    pub server: String,
}

/// Strips the `.<service_type>` suffix from a full service instance name.
///
/// Names that do not carry the suffix are returned unchanged.
///
/// # Examples
///
/// ```rust
/// use robot_core::domain::device::device_name;
///
/// let ty = "_Mini_mini_channel_server._tcp.local.";
/// assert_eq!(device_name("Mini_R17._Mini_mini_channel_server._tcp.local.", ty), "Mini_R17");
/// assert_eq!(device_name("Mini_R17", ty), "Mini_R17");
/// ```
pub fn device_name<'a>(fullname: &'a str, service_type: &str) -> &'a str {
    match fullname.strip_suffix(service_type) {
        Some(rest) => rest.strip_suffix('.').unwrap_or(rest),
        None => fullname,
    }
}

// ── Device ────────────────────────────────────────────────────────────────────

/// An immutable snapshot of one discovered robot.
///
/// Identity is the `name`: a later snapshot with the same name replaces the
/// earlier one rather than mutating it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// Advertised name with the service type stripped.
    pub name: String,
    /// Address to open the command channel on.
    pub address: IpAddr,
    /// Advertised port.
    pub port: u16,
    /// Service type the device was found under.
    pub service_type: String,
    /// Host name of the advertising server.
    pub server: String,
}

impl Device {
    /// Builds a device from an advertisement.
    ///
    /// Returns `None` when the advertisement resolved to no address, since
    /// there would be nothing to connect to.  IPv4 addresses are preferred
    /// because robot firmware only listens on IPv4.
    pub fn from_advertisement(ad: &Advertisement) -> Option<Self> {
        let address = ad
            .addresses
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| ad.addresses.first())
            .copied()?;
        Some(Self {
            name: device_name(&ad.fullname, &ad.service_type).to_string(),
            address,
            port: ad.port,
            service_type: ad.service_type.clone(),
            server: ad.server.clone(),
        })
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}:{}, server={})",
            self.name, self.address, self.port, self.server
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
