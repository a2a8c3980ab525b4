//! `AF_PACKET` transport.

use crate::error::ActivationError;
use crate::packet::{ETH_P_ARP, MacAddr};
use crate::transport::LinkTransport;
use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::mem;
use std::path::PathBuf;
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tracing::debug;

/// Raw packet socket bound to one interface, receiving only ARP frames.
#[derive(Debug)]
pub struct RawLink {
    name: String,
    mac: MacAddr,
    socket: AsyncFd<Socket>,
}

impl RawLink {
    /// Opens the socket. Needs `CAP_NET_RAW` and a running tokio reactor.
    pub fn open(interface: &str) -> Result<Self, ActivationError> {
        let link_err = |source: io::Error| ActivationError::Link {
            interface: interface.to_string(),
            source,
        };

        let (ifindex, mac) = interface_info(interface).map_err(link_err)?;
        let protocol = Protocol::from(i32::from(ETH_P_ARP.to_be()));
        let socket = Socket::new(Domain::PACKET, Type::RAW, Some(protocol)).map_err(link_err)?;
        socket.bind(&link_addr(ifindex)).map_err(link_err)?;
        socket.set_nonblocking(true).map_err(link_err)?;
        let socket = AsyncFd::new(socket).map_err(link_err)?;

        debug!(interface = %interface, ifindex, mac = %mac, "Raw ARP socket opened");
        Ok(Self {
            name: interface.to_string(),
            mac,
            socket,
        })
    }
}

#[async_trait]
impl LinkTransport for RawLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn hardware_addr(&self) -> MacAddr {
        self.mac
    }

    async fn send(&self, frame: &[u8]) -> io::Result<()> {
        let written = self
            .socket
            .async_io(Interest::WRITABLE, |socket| socket.send(frame))
            .await?;
        if written == frame.len() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: {written} of {} bytes", frame.len()),
            ))
        }
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket
            .async_io(Interest::READABLE, |socket| {
                let mut socket: &Socket = socket;
                socket.read(buf)
            })
            .await
    }
}

/// Reads the interface index and hardware address from sysfs.
fn interface_info(interface: &str) -> io::Result<(i32, MacAddr)> {
    if interface.is_empty() || interface.contains('/') || interface.starts_with('.') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid interface name {interface:?}"),
        ));
    }
    let base = PathBuf::from("/sys/class/net").join(interface);

    let ifindex = std::fs::read_to_string(base.join("ifindex"))?
        .trim()
        .parse::<i32>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("ifindex: {e}")))?;
    let mac = std::fs::read_to_string(base.join("address"))?
        .parse::<MacAddr>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    Ok((ifindex, mac))
}

#[allow(unsafe_code, reason = "socket2 has no safe constructor for link-layer addresses")]
fn link_addr(ifindex: i32) -> SockAddr {
    let ll = libc::sockaddr_ll {
        sll_family: libc::AF_PACKET as libc::c_ushort,
        sll_protocol: ETH_P_ARP.to_be(),
        sll_ifindex: ifindex,
        sll_hatype: 0,
        sll_pkttype: 0,
        sll_halen: 6,
        sll_addr: [0; 8],
    };

    // SAFETY: sockaddr_storage is plain old data for which all-zero is valid,
    // it is large and aligned enough to hold a sockaddr_ll, and the length
    // passed to SockAddr::new covers exactly the initialised sockaddr_ll.
    unsafe {
        let mut storage: libc::sockaddr_storage = mem::zeroed();
        std::ptr::write(std::ptr::addr_of_mut!(storage).cast::<libc::sockaddr_ll>(), ll);
        SockAddr::new(storage, mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t)
    }
}
