// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Socket agent: owns the UDP socket. Inbound datagrams are published
//! on the incoming-payloads topic; outbound datagrams are drained from
//! the connection's egress channel. Optionally marks outbound packets
//! ECT(0) and reports observed inbound ECN codepoints.

use crate::{
    agent::{stopped, Agent, StopSignal},
    connection::{Connection, EcnCodepoint},
};
use bytes::Bytes;
use std::sync::Arc;
use tokio::net::UdpSocket;

const MAX_DATAGRAM: usize = 65_527;

#[derive(Clone, Copy, Debug, Default)]
pub struct Config {
    /// Read and write the ECN codepoint on IP packets
    pub ecn: bool,
}

pub fn spawn(conn: &Arc<Connection>, config: Config) -> Agent {
    let connection = conn.clone();
    Agent::spawn("socket", conn, move |stop| run(connection, config, stop))
}

async fn run(conn: Arc<Connection>, config: Config, mut stop: StopSignal) {
    let Some(socket) = conn.take_socket() else {
        tracing::error!("socket already taken; agent exiting");
        return;
    };
    let Some(mut egress) = conn.take_egress() else {
        tracing::error!("egress channel already taken; agent exiting");
        return;
    };

    let ecn = config.ecn && ecn::enable(&socket);

    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = stopped(&mut stop) => return,
            datagram = egress.recv() => {
                let Some(datagram) = datagram else { return };
                if let Err(error) = socket.send(&datagram).await {
                    tracing::error!(%error, len = datagram.len(), "udp send failed");
                }
            }
            received = receive(&socket, &mut buf, ecn) => {
                match received {
                    Ok((len, codepoint)) => {
                        tracing::trace!(len, "datagram received");
                        conn.topics
                            .incoming_payloads
                            .submit(Bytes::copy_from_slice(&buf[..len]));
                        if let Some(codepoint) = codepoint {
                            conn.topics.ecn_status.submit(codepoint);
                        }
                    }
                    Err(error) => {
                        tracing::error!(%error, "udp receive failed; agent exiting");
                        return;
                    }
                }
            }
        }
    }
}

async fn receive(
    socket: &UdpSocket,
    buf: &mut [u8],
    ecn: bool,
) -> std::io::Result<(usize, Option<EcnCodepoint>)> {
    if ecn {
        ecn::receive(socket, buf).await
    } else {
        let len = socket.recv(buf).await?;
        Ok((len, None))
    }
}

#[cfg(target_os = "linux")]
mod ecn {
    use super::*;
    use std::io;
    use std::os::unix::io::AsRawFd;
    use tokio::io::Interest;

    /// ECT(0) on outbound, IP_RECVTOS for inbound marks.
    pub(super) fn enable(socket: &UdpSocket) -> bool {
        let sock = socket2::SockRef::from(socket);
        let result = sock.set_recv_tos(true).and_then(|_| sock.set_tos(0b10));
        match result {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%error, "could not enable ECN; continuing without");
                false
            }
        }
    }

    pub(super) async fn receive(
        socket: &UdpSocket,
        buf: &mut [u8],
    ) -> io::Result<(usize, Option<EcnCodepoint>)> {
        loop {
            socket.readable().await?;
            match socket.try_io(Interest::READABLE, || recvmsg(socket.as_raw_fd(), buf)) {
                Ok(result) => return Ok(result),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => continue,
                Err(error) => return Err(error),
            }
        }
    }

    fn recvmsg(fd: i32, buf: &mut [u8]) -> io::Result<(usize, Option<EcnCodepoint>)> {
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut _,
            iov_len: buf.len(),
        };
        let mut control = [0u8; 64];
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr() as *mut _;
        msg.msg_controllen = control.len();

        let len = unsafe { libc::recvmsg(fd, &mut msg, 0) };
        if len < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut codepoint = None;
        let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(&msg) };
        while !cmsg.is_null() {
            let header = unsafe { &*cmsg };
            if header.cmsg_level == libc::IPPROTO_IP && header.cmsg_type == libc::IP_TOS {
                let tos = unsafe { *(libc::CMSG_DATA(cmsg) as *const u8) };
                codepoint = Some(EcnCodepoint::from_tos(tos));
            }
            cmsg = unsafe { libc::CMSG_NXTHDR(&msg, cmsg) };
        }

        Ok((len as usize, codepoint))
    }
}

#[cfg(not(target_os = "linux"))]
mod ecn {
    use super::*;
    use std::io;

    pub(super) fn enable(_socket: &UdpSocket) -> bool {
        tracing::warn!("ECN reporting is only implemented on linux");
        false
    }

    pub(super) async fn receive(
        socket: &UdpSocket,
        buf: &mut [u8],
    ) -> io::Result<(usize, Option<EcnCodepoint>)> {
        let len = socket.recv(buf).await?;
        Ok((len, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast;
    use crate::test_support::test_connection_with_peer;

    #[tokio::test]
    async fn datagrams_flow_in_both_directions() {
        let (conn, peer) = test_connection_with_peer().await;
        let mut payloads = conn.topics.incoming_payloads.subscribe();
        let egress = conn.egress_sender();

        let agent = spawn(&conn, Config::default());

        // outbound
        egress.try_send(Bytes::from_static(b"out")).unwrap();
        let mut buf = [0u8; 16];
        let len = peer.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"out");

        // inbound
        peer.send(b"in").await.unwrap();
        let payload = broadcast::next(&mut payloads, "incoming-payloads")
            .await
            .unwrap();
        assert_eq!(&payload[..], b"in");

        agent.stop();
        agent.join().await;
    }
}
