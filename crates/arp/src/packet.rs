//! Ethernet II + ARP frame codec.

use crate::error::FrameError;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Ethertype of ARP
pub const ETH_P_ARP: u16 = 0x0806;
/// Ethertype of IPv4, the only ARP protocol type handled
pub const ETH_P_IP: u16 = 0x0800;
/// Ethernet hardware type
pub const HTYPE_ETHERNET: u16 = 1;
/// Ethernet header plus the IPv4 ARP body
pub const FRAME_LEN: usize = 42;

const ETH_HEADER_LEN: usize = 14;

/// 48-bit hardware address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// ff:ff:ff:ff:ff:ff
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
    /// 00:00:00:00:00:00, the unknown target of a request
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    /// Raw octets
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MacAddr {
    type Err = FrameError;

    /// Accepts `:` or `-` separated hex octets.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FrameError::InvalidMac(s.to_string());
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split([':', '-']);
        for octet in &mut octets {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(MacAddr(octets))
    }
}

/// ARP operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Who-has
    Request,
    /// Is-at
    Reply,
}

impl Operation {
    fn code(self) -> u16 {
        match self {
            Operation::Request => 1,
            Operation::Reply => 2,
        }
    }
}

/// One ARP packet together with its Ethernet addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    /// Ethernet destination
    pub eth_dst: MacAddr,
    /// Ethernet source
    pub eth_src: MacAddr,
    /// Request or reply
    pub operation: Operation,
    /// Sender hardware address
    pub sender_mac: MacAddr,
    /// Sender protocol address
    pub sender_ip: Ipv4Addr,
    /// Target hardware address
    pub target_mac: MacAddr,
    /// Target protocol address
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Broadcast who-has `target_ip`, asked by `sender_ip`.
    pub fn request(local: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            eth_dst: MacAddr::BROADCAST,
            eth_src: local,
            operation: Operation::Request,
            sender_mac: local,
            sender_ip,
            target_mac: MacAddr::ZERO,
            target_ip,
        }
    }

    /// Duplicate-address probe: a request with an unspecified sender address.
    pub fn probe(local: MacAddr, target_ip: Ipv4Addr) -> Self {
        Self::request(local, Ipv4Addr::UNSPECIFIED, target_ip)
    }

    /// Gratuitous announcement of `ip`.
    pub fn gratuitous(local: MacAddr, ip: Ipv4Addr) -> Self {
        Self::request(local, ip, ip)
    }

    /// Answer to `request` from the host owning `mac`.
    pub fn reply_to(request: &ArpPacket, mac: MacAddr, ip: Ipv4Addr) -> Self {
        Self {
            eth_dst: request.sender_mac,
            eth_src: mac,
            operation: Operation::Reply,
            sender_mac: mac,
            sender_ip: ip,
            target_mac: request.sender_mac,
            target_ip: request.sender_ip,
        }
    }

    /// Whether this is a probe (sender address 0.0.0.0)
    pub fn is_probe(&self) -> bool {
        self.operation == Operation::Request && self.sender_ip.is_unspecified()
    }

    /// Whether this announces its own sender address
    pub fn is_gratuitous(&self) -> bool {
        self.operation == Operation::Request && self.sender_ip == self.target_ip && !self.sender_ip.is_unspecified()
    }

    /// Serialises the frame.
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut frame = [0u8; FRAME_LEN];
        frame[0..6].copy_from_slice(&self.eth_dst.0);
        frame[6..12].copy_from_slice(&self.eth_src.0);
        frame[12..14].copy_from_slice(&ETH_P_ARP.to_be_bytes());

        let body = &mut frame[ETH_HEADER_LEN..];
        body[0..2].copy_from_slice(&HTYPE_ETHERNET.to_be_bytes());
        body[2..4].copy_from_slice(&ETH_P_IP.to_be_bytes());
        body[4] = 6;
        body[5] = 4;
        body[6..8].copy_from_slice(&self.operation.code().to_be_bytes());
        body[8..14].copy_from_slice(&self.sender_mac.0);
        body[14..18].copy_from_slice(&self.sender_ip.octets());
        body[18..24].copy_from_slice(&self.target_mac.0);
        body[24..28].copy_from_slice(&self.target_ip.octets());
        frame
    }

    /// Parses a received frame. Trailing padding is ignored.
    pub fn decode(frame: &[u8]) -> Result<Self, FrameError> {
        if frame.len() < FRAME_LEN {
            return Err(FrameError::TooShort(frame.len()));
        }
        let be16 = |at: usize| u16::from_be_bytes([frame[at], frame[at + 1]]);
        let mac = |at: usize| {
            let mut octets = [0u8; 6];
            octets.copy_from_slice(&frame[at..at + 6]);
            MacAddr(octets)
        };
        let ipv4 = |at: usize| Ipv4Addr::new(frame[at], frame[at + 1], frame[at + 2], frame[at + 3]);

        let ethertype = be16(12);
        if ethertype != ETH_P_ARP {
            return Err(FrameError::EtherType(ethertype));
        }
        let htype = be16(14);
        if htype != HTYPE_ETHERNET {
            return Err(FrameError::HardwareType(htype));
        }
        let ptype = be16(16);
        if ptype != ETH_P_IP {
            return Err(FrameError::ProtocolType(ptype));
        }
        let (hlen, plen) = (frame[18], frame[19]);
        if hlen != 6 || plen != 4 {
            return Err(FrameError::AddressLength { hlen, plen });
        }
        let operation = match be16(20) {
            1 => Operation::Request,
            2 => Operation::Reply,
            other => return Err(FrameError::Operation(other)),
        };

        Ok(Self {
            eth_dst: mac(0),
            eth_src: mac(6),
            operation,
            sender_mac: mac(22),
            sender_ip: ipv4(28),
            target_mac: mac(32),
            target_ip: ipv4(38),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);

    #[test]
    fn test_request_layout() {
        let frame = ArpPacket::request(LOCAL, Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 1)).encode();
        assert_eq!(&frame[0..6], &[0xff; 6]);
        assert_eq!(&frame[12..14], &[0x08, 0x06]);
        assert_eq!(&frame[14..22], &[0, 1, 0x08, 0x00, 6, 4, 0, 1]);
        assert_eq!(&frame[28..32], &[10, 0, 0, 5]);
        assert_eq!(&frame[32..38], &[0; 6]);
        assert_eq!(&frame[38..42], &[10, 0, 0, 1]);
    }

    #[test]
    fn test_decode_reply_with_padding() {
        let request = ArpPacket::request(LOCAL, Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 1));
        let gw = MacAddr([0x02, 0, 0, 0, 0, 0xfe]);
        let reply = ArpPacket::reply_to(&request, gw, Ipv4Addr::new(10, 0, 0, 1));

        let mut frame = reply.encode().to_vec();
        frame.resize(60, 0);
        let decoded = ArpPacket::decode(&frame).unwrap();
        assert_eq!(decoded, reply);
        assert_eq!(decoded.target_ip, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(decoded.eth_dst, LOCAL);
    }

    #[test]
    fn test_probe_and_gratuitous_shapes() {
        let ip = Ipv4Addr::new(10, 0, 0, 5);
        let probe = ArpPacket::probe(LOCAL, ip);
        assert!(probe.is_probe());
        assert!(!probe.is_gratuitous());

        let announce = ArpPacket::gratuitous(LOCAL, ip);
        assert!(announce.is_gratuitous());
        assert_eq!(announce.eth_dst, MacAddr::BROADCAST);
        assert_eq!(announce.sender_mac, LOCAL);
    }

    #[test]
    fn test_decode_rejects_malformed_frames() {
        let good = ArpPacket::probe(LOCAL, Ipv4Addr::new(10, 0, 0, 5)).encode();

        assert_eq!(ArpPacket::decode(&good[..41]), Err(FrameError::TooShort(41)));

        let mut ipv4 = good;
        ipv4[12..14].copy_from_slice(&[0x08, 0x00]);
        assert_eq!(ArpPacket::decode(&ipv4), Err(FrameError::EtherType(0x0800)));

        let mut htype = good;
        htype[15] = 6;
        assert_eq!(ArpPacket::decode(&htype), Err(FrameError::HardwareType(6)));

        let mut ptype = good;
        ptype[16..18].copy_from_slice(&[0x86, 0xdd]);
        assert_eq!(ArpPacket::decode(&ptype), Err(FrameError::ProtocolType(0x86dd)));

        let mut lens = good;
        lens[19] = 16;
        assert_eq!(
            ArpPacket::decode(&lens),
            Err(FrameError::AddressLength { hlen: 6, plen: 16 })
        );

        let mut op = good;
        op[21] = 3;
        assert_eq!(ArpPacket::decode(&op), Err(FrameError::Operation(3)));
    }

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddr = "02:AB:cd:00:11:ff".parse().unwrap();
        assert_eq!(mac.to_string(), "02:ab:cd:00:11:ff");
        assert_eq!("02-ab-cd-00-11-ff".parse::<MacAddr>(), Ok(mac));
        assert!("02:ab:cd:00:11".parse::<MacAddr>().is_err());
        assert!("02:ab:cd:00:11:ff:00".parse::<MacAddr>().is_err());
        assert!("02:ab:cd:00:11:zz".parse::<MacAddr>().is_err());
    }
}
