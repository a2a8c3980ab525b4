//! Scripted in-memory link.
//!
//! Answers gateway requests and duplicate probes the way a real segment
//! would, and records every frame it was asked to send.

use crate::packet::{ArpPacket, MacAddr};
use crate::transport::LinkTransport;
use async_trait::async_trait;
use std::io;
use std::net::Ipv4Addr;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

/// In-memory [`LinkTransport`].
#[derive(Debug)]
pub struct MockLink {
    name: String,
    mac: MacAddr,
    gateway: Option<(Ipv4Addr, MacAddr)>,
    holders: Vec<(Ipv4Addr, MacAddr)>,
    fail_probe: bool,
    fail_announce: bool,
    sent: Mutex<Vec<ArpPacket>>,
    inbound: mpsc::UnboundedSender<Vec<u8>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MockLink {
    /// Silent link: nobody answers anything.
    pub fn new(name: impl Into<String>, mac: MacAddr) -> Self {
        let (inbound, receiver) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            mac,
            gateway: None,
            holders: Vec::new(),
            fail_probe: false,
            fail_announce: false,
            sent: Mutex::new(Vec::new()),
            inbound,
            receiver: tokio::sync::Mutex::new(receiver),
        }
    }

    /// Answers requests for `ip` from `mac`.
    #[must_use]
    pub fn with_gateway(mut self, ip: Ipv4Addr, mac: MacAddr) -> Self {
        self.gateway = Some((ip, mac));
        self
    }

    /// Another host holding `ip`: answers probes for it.
    #[must_use]
    pub fn with_duplicate(mut self, ip: Ipv4Addr, mac: MacAddr) -> Self {
        self.holders.push((ip, mac));
        self
    }

    /// Sending duplicate probes fails.
    #[must_use]
    pub fn with_failing_probe(mut self) -> Self {
        self.fail_probe = true;
        self
    }

    /// Sending gratuitous announcements fails.
    #[must_use]
    pub fn with_failing_announce(mut self) -> Self {
        self.fail_announce = true;
        self
    }

    /// Queues a raw frame as if it arrived on the wire.
    pub fn inject(&self, frame: &[u8]) {
        // receiver lives as long as self
        let _ = self.inbound.send(frame.to_vec());
    }

    /// Frames sent so far, decoded
    pub fn sent(&self) -> Vec<ArpPacket> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl LinkTransport for MockLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn hardware_addr(&self) -> MacAddr {
        self.mac
    }

    async fn send(&self, frame: &[u8]) -> io::Result<()> {
        let packet = ArpPacket::decode(frame).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        if packet.is_probe() && self.fail_probe {
            return Err(io::Error::new(io::ErrorKind::NetworkDown, "probe rejected"));
        }
        if packet.is_gratuitous() && self.fail_announce {
            return Err(io::Error::new(io::ErrorKind::NetworkDown, "announce rejected"));
        }
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(packet);

        if packet.is_gratuitous() {
            return Ok(());
        }
        let responders = self.gateway.iter().chain(&self.holders);
        for (ip, mac) in responders.filter(|(ip, _)| packet.target_ip == *ip) {
            self.inject(&ArpPacket::reply_to(&packet, *mac, *ip).encode());
        }
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut receiver = self.receiver.lock().await;
        let frame = receiver
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "link closed"))?;
        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        Ok(len)
    }
}
