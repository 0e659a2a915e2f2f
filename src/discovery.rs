//! LAN autodiscovery: broker beacon and client probe.
//!
//! The broker broadcasts a fixed 2-byte magic on a well-known UDP port; a
//! client listens briefly and takes the source address of the first matching
//! datagram as the broker host. The beacon also keeps a second broker off
//! the network: the broker probes before binding and refuses to start when
//! one answers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::Result;

/// The beacon payload.
pub const BEACON_MAGIC: [u8; 2] = [0xCA, 0xFE];

/// Interval between beacon broadcasts.
pub const BEACON_INTERVAL: Duration = Duration::from_millis(100);

/// How long a probe listens before giving up.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// A running beacon speaker. Broadcasting stops when the handle drops.
pub struct Beacon {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Beacon {
    /// Start broadcasting the magic on the given UDP port from a background
    /// thread.
    pub fn spawn(port: u16) -> Result<Beacon> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_broadcast(true)?;
        // Same-host listeners (including this broker's own duplicate-instance
        // probe) must hear the beacon even on hosts with no broadcast-capable
        // interface, so every tick also sends a loopback copy.
        let targets = [
            SocketAddr::from((Ipv4Addr::BROADCAST, port)),
            SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        ];

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let thread = std::thread::spawn(move || {
            info!(port, "beacon started");
            while !stop_flag.load(Ordering::Relaxed) {
                for target in targets {
                    if let Err(err) = socket.send_to(&BEACON_MAGIC, target) {
                        debug!(error = %err, %target, "beacon send failed");
                    }
                }
                std::thread::sleep(BEACON_INTERVAL);
            }
            debug!("beacon stopped");
        });

        Ok(Beacon {
            stop,
            thread: Some(thread),
        })
    }
}

impl Drop for Beacon {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Listen on the beacon port for up to `timeout` and return the source
/// address of the first datagram carrying the magic, or `None` when the
/// network stays quiet.
pub fn probe(port: u16, timeout: Duration) -> Result<Option<IpAddr>> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
    socket.set_read_timeout(Some(timeout))?;

    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 16];
    loop {
        match socket.recv_from(&mut buf) {
            Ok((n, src)) if n == BEACON_MAGIC.len() && buf[..n] == BEACON_MAGIC => {
                debug!(ip = %src.ip(), "found a dsv server");
                return Ok(Some(src.ip()));
            }
            Ok((_, src)) => {
                // unrelated traffic on the port; keep listening
                debug!(ip = %src.ip(), "ignoring non-beacon datagram");
            }
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU16;

    // keep test beacons off the default port and off each other
    static NEXT_PORT: AtomicU16 = AtomicU16::new(39900);

    fn test_port() -> u16 {
        NEXT_PORT.fetch_add(1, Ordering::Relaxed)
    }

    #[test]
    fn probe_times_out_on_quiet_network() {
        let port = test_port();
        let found = probe(port, Duration::from_millis(100)).unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn probe_finds_running_beacon() {
        let port = test_port();
        let _beacon = Beacon::spawn(port).unwrap();
        let found = probe(port, PROBE_TIMEOUT).unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn beacon_stops_on_drop() {
        let port = test_port();
        {
            let _beacon = Beacon::spawn(port).unwrap();
            assert!(probe(port, PROBE_TIMEOUT).unwrap().is_some());
        }
        // drain anything already in flight, then expect silence
        std::thread::sleep(BEACON_INTERVAL * 2);
        let found = probe(port, Duration::from_millis(300)).unwrap();
        assert_eq!(found, None);
    }
}
