use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::net::{lookup_host, ToSocketAddrs};
use tracing::{debug, warn};

use crate::policies::reconnection::{ReconnectionPolicy, ReconnectionSchedule};

/// Describes a database server known on `Session` startup.
///
/// The name derives from SessionBuilder's `known_node()` family of methods.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[non_exhaustive]
pub enum KnownNode {
    /// A node identified by its hostname.
    Hostname(String),
    /// A node identified by its IP address + a port.
    Address(SocketAddr),
}

struct ReconnectionState {
    schedule: ReconnectionSchedule,
    next_attempt: Option<Instant>,
}

/// A cluster member known to the session.
///
/// Hosts are owned by the session's registry; query plans and pools only hold
/// references to them. Two hosts are equal when their addresses are.
pub struct Host {
    address: SocketAddr,
    up: AtomicBool,
    reconnection_policy: Arc<dyn ReconnectionPolicy>,
    reconnection: Mutex<ReconnectionState>,
}

impl Host {
    /// Creates a host that is considered up.
    pub(crate) fn new(address: SocketAddr, reconnection_policy: Arc<dyn ReconnectionPolicy>) -> Self {
        let schedule = reconnection_policy.new_schedule();
        Self {
            address,
            up: AtomicBool::new(true),
            reconnection_policy,
            reconnection: Mutex::new(ReconnectionState {
                schedule,
                next_attempt: None,
            }),
        }
    }

    /// Address the host is reached at.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Whether the host may be used for new routing.
    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    /// When the next reconnection attempt is due, if the host is down.
    pub fn next_reconnection_attempt(&self) -> Option<Instant> {
        self.reconnection.lock().unwrap().next_attempt
    }

    /// Marks the host down and schedules the next reconnection attempt.
    /// Returns whether the host was up before.
    pub(crate) fn set_down(&self) -> bool {
        let was_up = self.up.swap(false, Ordering::AcqRel);
        let mut reconnection = self.reconnection.lock().unwrap();
        let delay = reconnection.schedule.next().unwrap_or(Duration::ZERO);
        reconnection.next_attempt = Some(Instant::now() + delay);
        debug!(host = %self.address, ?delay, "Host marked down");
        was_up
    }

    /// Marks the host up and restarts its reconnection schedule.
    /// Returns whether the host was down before.
    pub(crate) fn bring_up(&self) -> bool {
        let was_down = !self.up.swap(true, Ordering::AcqRel);
        let mut reconnection = self.reconnection.lock().unwrap();
        reconnection.schedule = self.reconnection_policy.new_schedule();
        reconnection.next_attempt = None;
        if was_down {
            debug!(host = %self.address, "Host marked up");
        }
        was_down
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("address", &self.address)
            .field("up", &self.is_up())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

/// Performs a DNS lookup with provided optional timeout.
async fn lookup_host_with_timeout(
    host: impl ToSocketAddrs,
    hostname_resolution_timeout: Option<Duration>,
) -> std::io::Result<impl Iterator<Item = SocketAddr>> {
    match hostname_resolution_timeout {
        Some(timeout) => match tokio::time::timeout(timeout, lookup_host(host)).await {
            Ok(res) => res,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("DNS lookup did not finish within {}ms", timeout.as_millis()),
            )),
        },
        None => lookup_host(host).await,
    }
}

const DEFAULT_PORT: u16 = 9042;

// Resolves a hostname, trying the default port if none was given.
// IPv4 addresses are preferred.
async fn resolve_hostname(
    hostname: &str,
    hostname_resolution_timeout: Option<Duration>,
) -> std::io::Result<SocketAddr> {
    let mut addrs: Vec<SocketAddr> =
        match lookup_host_with_timeout(hostname, hostname_resolution_timeout).await {
            Ok(addrs) => addrs.collect(),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Err(e),
            Err(e) => lookup_host_with_timeout((hostname, DEFAULT_PORT), hostname_resolution_timeout)
                .await
                .map_err(|_| e)?
                .collect(),
        };

    let v4_first = addrs.iter().position(SocketAddr::is_ipv4).unwrap_or(0);
    if addrs.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Empty address list returned by DNS for {hostname}"),
        ));
    }
    Ok(addrs.swap_remove(v4_first))
}

/// Transforms the given [`KnownNode`]s into socket addresses.
///
/// Returns the resolved addresses and the hostnames that were looked up,
/// so that the caller can report them if none resolved.
pub(crate) async fn resolve_contact_points(
    known_nodes: &[KnownNode],
    hostname_resolution_timeout: Option<Duration>,
) -> (Vec<SocketAddr>, Vec<String>) {
    let mut initial_peers: Vec<SocketAddr> = Vec::with_capacity(known_nodes.len());
    let mut hostnames: Vec<String> = Vec::new();

    for node in known_nodes {
        match node {
            KnownNode::Hostname(hostname) => hostnames.push(hostname.clone()),
            KnownNode::Address(address) => initial_peers.push(*address),
        }
    }

    let resolve_futures = hostnames.iter().map(|hostname| async move {
        match resolve_hostname(hostname, hostname_resolution_timeout).await {
            Ok(address) => Some(address),
            Err(e) => {
                warn!("Hostname resolution failed for {}: {}", hostname, &e);
                None
            }
        }
    });
    let resolved: Vec<_> = futures::future::join_all(resolve_futures).await;
    initial_peers.extend(resolved.into_iter().flatten());

    (initial_peers, hostnames)
}
