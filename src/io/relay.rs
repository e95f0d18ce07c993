use core::net::SocketAddr;

use edge_nal::{UdpReceive, UdpSend};

use log::{debug, info, warn};

use super::Error;

use crate::relay::Relay;
use crate::Packet;

/// Runs the relay on the supplied socket, cross-forwarding between the
/// broadcast client side and the unicast server side.
///
/// The socket must be bound to the LAN-facing interface on the server port
/// (usually 67) and must be able to send broadcast datagrams. Received
/// packets are decoded from `buf` and re-encoded into `out_buf` with the
/// routing fields rewritten; the two buffers must be distinct.
///
/// The future is cancel-safe: the relay holds no state, so dropping it at any
/// point loses nothing.
pub async fn run<T>(
    relay: &Relay,
    socket: &mut T,
    buf: &mut [u8],
    out_buf: &mut [u8],
) -> Result<(), Error<T::Error>>
where
    T: UdpReceive + UdpSend,
{
    info!("Relaying between clients and DHCP server {}", relay.server);

    let mut dropped: u32 = 0;

    loop {
        let (len, remote) = socket.receive(buf).await.map_err(Error::Io)?;

        let mut packet = match Packet::decode(&buf[..len]) {
            Ok(packet) => packet,
            Err(err) => {
                dropped += 1;
                warn!("Dropping malformed packet from {remote}: {err} ({dropped} dropped so far)");
                continue;
            }
        };

        let Some(dest) = relay.process(&mut packet) else {
            continue;
        };

        let dest = SocketAddr::V4(dest);
        let data = packet.encode(out_buf)?;

        debug!("Forwarding {} bytes from {remote} to {dest}", data.len());

        if let Err(err) = socket.send(dest, data).await {
            warn!("Send to {dest} failed ({err:?}), retrying once");

            if let Err(err) = socket.send(dest, data).await {
                warn!("Send to {dest} failed again ({err:?}), dropping packet");
            }
        }
    }
}
