//! Gateway probe, duplicate detection and gratuitous announcement.

use crate::error::ActivationError;
use crate::packet::{ArpPacket, MacAddr, Operation};
use crate::transport::LinkTransport;
use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

const RECV_BUF_LEN: usize = 2048;

/// Validates an address on a link before it is used.
///
/// Every step is bounded by the same timeout, so activation takes at most
/// three timeouts. Nothing is released on failure; the caller decides.
#[derive(Debug, Clone, Copy)]
pub struct ActivationValidator {
    timeout: Duration,
}

impl Default for ActivationValidator {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl ActivationValidator {
    /// Validator with a per-step timeout
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Per-step timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs the three steps in order, stopping at the first failure.
    pub async fn activate<L>(&self, link: &L, source: Ipv4Addr, gateway: Ipv4Addr) -> Result<(), ActivationError>
    where
        L: LinkTransport + ?Sized,
    {
        debug!(interface = %link.name(), source = %source, gateway = %gateway, "Activating address");
        self.probe_gateway(link, source, gateway).await?;
        self.detect_duplicate(link, source).await?;
        self.announce(link, source).await?;
        info!(interface = %link.name(), address = %source, "Address activated");
        Ok(())
    }

    async fn probe_gateway<L>(&self, link: &L, source: Ipv4Addr, gateway: Ipv4Addr) -> Result<(), ActivationError>
    where
        L: LinkTransport + ?Sized,
    {
        let unreachable = |cause: String| ActivationError::GatewayUnreachable {
            interface: link.name().to_string(),
            source_addr: source,
            gateway,
            cause,
        };

        let request = ArpPacket::request(link.hardware_addr(), source, gateway);
        let exchange = async {
            link.send(&request.encode()).await?;
            wait_for(link, |p| p.operation == Operation::Reply && p.sender_ip == gateway).await
        };
        match timeout(self.timeout, exchange).await {
            Ok(Ok(reply)) => {
                debug!(gateway = %gateway, mac = %reply.sender_mac, "Gateway answered");
                Ok(())
            }
            Ok(Err(e)) => Err(unreachable(e.to_string())),
            Err(_) => Err(unreachable(format!("no reply within {:?}", self.timeout))),
        }
    }

    async fn detect_duplicate<L>(&self, link: &L, source: Ipv4Addr) -> Result<(), ActivationError>
    where
        L: LinkTransport + ?Sized,
    {
        let local = link.hardware_addr();
        let probe = ArpPacket::probe(local, source);
        let exchange = async {
            link.send(&probe.encode()).await?;
            wait_for(link, |p| is_conflict(p, source, local)).await
        };
        match timeout(self.timeout, exchange).await {
            // silence is the good outcome
            Err(_) => Ok(()),
            Ok(Ok(conflict)) => {
                warn!(address = %source, responder = %conflict.sender_mac, "Duplicate address detected");
                Err(ActivationError::DuplicateAddress {
                    interface: link.name().to_string(),
                    address: source,
                    responder: conflict.sender_mac,
                })
            }
            Ok(Err(e)) => Err(ActivationError::ProbeFailed {
                interface: link.name().to_string(),
                address: source,
                cause: e.to_string(),
            }),
        }
    }

    async fn announce<L>(&self, link: &L, source: Ipv4Addr) -> Result<(), ActivationError>
    where
        L: LinkTransport + ?Sized,
    {
        let failed = |cause: String| ActivationError::AnnounceFailed {
            interface: link.name().to_string(),
            address: source,
            cause,
        };
        let frame = ArpPacket::gratuitous(link.hardware_addr(), source).encode();
        match timeout(self.timeout, link.send(&frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(failed(e.to_string())),
            Err(_) => Err(failed(format!("send did not complete within {:?}", self.timeout))),
        }
    }
}

/// Whether `packet` shows another host using `address`.
pub fn is_conflict(packet: &ArpPacket, address: Ipv4Addr, local: MacAddr) -> bool {
    packet.sender_ip == address && packet.sender_mac != local
}

/// Reads frames until one matches. Frames that are not ARP or do not match
/// the current step are dropped.
async fn wait_for<L, F>(link: &L, mut matches: F) -> io::Result<ArpPacket>
where
    L: LinkTransport + ?Sized,
    F: FnMut(&ArpPacket) -> bool + Send,
{
    let mut buf = vec![0u8; RECV_BUF_LEN];
    loop {
        let len = link.recv(&mut buf).await?;
        match ArpPacket::decode(&buf[..len]) {
            Ok(packet) if matches(&packet) => return Ok(packet),
            Ok(packet) => trace!(sender = %packet.sender_ip, target = %packet.target_ip, "Ignoring ARP packet"),
            Err(e) => trace!(error = %e, "Ignoring frame"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLink;

    const LOCAL: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
    const GATEWAY_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0xfe]);
    const INTRUDER: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x66]);

    fn source() -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, 5)
    }

    fn gateway() -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, 1)
    }

    fn validator() -> ActivationValidator {
        ActivationValidator::new(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_silent_target_is_announced() {
        let link = MockLink::new("eth0", LOCAL).with_gateway(gateway(), GATEWAY_MAC);
        validator().activate(&link, source(), gateway()).await.unwrap();

        let sent = link.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0], ArpPacket::request(LOCAL, source(), gateway()));
        assert!(sent[1].is_probe());
        assert_eq!(sent[1].target_ip, source());
        assert!(sent[2].is_gratuitous());
        assert_eq!(sent[2].sender_ip, source());
        assert_eq!(sent[2].eth_dst, MacAddr::BROADCAST);
    }

    #[tokio::test]
    async fn test_duplicate_is_reported_with_responder() {
        let link = MockLink::new("eth0", LOCAL)
            .with_gateway(gateway(), GATEWAY_MAC)
            .with_duplicate(source(), INTRUDER);
        let err = validator().activate(&link, source(), gateway()).await.unwrap_err();

        match err {
            ActivationError::DuplicateAddress {
                address, responder, ..
            } => {
                assert_eq!(address, source());
                assert_eq!(responder, INTRUDER);
            }
            other => panic!("unexpected error: {other}"),
        }
        // no announcement after a conflict
        assert_eq!(link.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_gateway_stops_activation() {
        let link = MockLink::new("eth0", LOCAL);
        let err = validator().activate(&link, source(), gateway()).await.unwrap_err();

        assert_eq!(err.reason(), "GatewayUnreachable");
        assert_eq!(link.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_unrelated_replies_do_not_satisfy_gateway_probe() {
        let link = MockLink::new("eth0", LOCAL);
        let stranger = ArpPacket::request(INTRUDER, Ipv4Addr::new(10, 0, 0, 9), source());
        link.inject(&ArpPacket::reply_to(&stranger, INTRUDER, Ipv4Addr::new(10, 0, 0, 9)).encode());
        link.inject(&[0u8; 10]);

        let err = validator().activate(&link, source(), gateway()).await.unwrap_err();
        assert_eq!(err.reason(), "GatewayUnreachable");
    }

    #[tokio::test]
    async fn test_late_gateway_reply_is_ignored_by_duplicate_probe() {
        let link = MockLink::new("eth0", LOCAL).with_gateway(gateway(), GATEWAY_MAC);
        // answered early: the link's own reply is still queued once the
        // duplicate probe starts reading
        let request = ArpPacket::request(LOCAL, source(), gateway());
        link.inject(&ArpPacket::reply_to(&request, GATEWAY_MAC, gateway()).encode());

        validator().activate(&link, source(), gateway()).await.unwrap();
        let sent = link.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent[2].is_gratuitous());
    }

    #[tokio::test]
    async fn test_activation_is_bounded_by_three_timeouts() {
        let step = Duration::from_millis(100);
        let bound = step * 3 + Duration::from_millis(250);
        let validator = ActivationValidator::new(step);

        // silent target: the duplicate probe waits out its full timeout
        let link = MockLink::new("eth0", LOCAL).with_gateway(gateway(), GATEWAY_MAC);
        let started = std::time::Instant::now();
        validator.activate(&link, source(), gateway()).await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= step, "finished after {elapsed:?}");
        assert!(elapsed <= bound, "finished after {elapsed:?}");

        // silent link: fails at the first step
        let link = MockLink::new("eth0", LOCAL);
        let started = std::time::Instant::now();
        validator.activate(&link, source(), gateway()).await.unwrap_err();
        assert!(started.elapsed() <= bound);
    }

    #[tokio::test]
    async fn test_probe_send_failure_is_not_silence() {
        let link = MockLink::new("eth0", LOCAL)
            .with_gateway(gateway(), GATEWAY_MAC)
            .with_failing_probe();
        let err = validator().activate(&link, source(), gateway()).await.unwrap_err();
        assert_eq!(err.reason(), "ProbeFailed");
    }

    #[tokio::test]
    async fn test_announce_failure_is_fatal() {
        let link = MockLink::new("eth0", LOCAL)
            .with_gateway(gateway(), GATEWAY_MAC)
            .with_failing_announce();
        let err = validator().activate(&link, source(), gateway()).await.unwrap_err();
        assert_eq!(err.reason(), "AnnounceFailed");
        assert_eq!(link.sent().len(), 2);
    }

    #[test]
    fn test_own_frames_are_not_conflicts() {
        let own = ArpPacket::gratuitous(LOCAL, source());
        assert!(!is_conflict(&own, source(), LOCAL));

        let other = ArpPacket::gratuitous(INTRUDER, source());
        assert!(is_conflict(&other, source(), LOCAL));

        let probe = ArpPacket::probe(INTRUDER, source());
        assert!(!is_conflict(&probe, source(), LOCAL));
    }
}
