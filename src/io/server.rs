use core::net::SocketAddr;

use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant, Timer};

use edge_nal::{UdpReceive, UdpSend};

use log::{info, warn};

use super::Error;

use crate::server::{Server, ServerOptions};
use crate::{Options, Packet};

/// How often expired leases are reclaimed, independent of request traffic.
const SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// Runs the DHCP server on the supplied socket, processing incoming requests
/// and reclaiming expired leases in between.
///
/// The socket must be bound to the server port (usually 67) and must be able
/// to send broadcast datagrams.
///
/// Dropping the future is the shutdown signal. The lease table lives in
/// `server`, not in the future, so serving can resume later with all the
/// bindings intact.
pub async fn run<T, const N: usize>(
    server: &mut Server<N>,
    server_options: &ServerOptions<'_>,
    socket: &mut T,
    buf: &mut [u8],
) -> Result<(), Error<T::Error>>
where
    T: UdpReceive + UdpSend,
{
    info!(
        "Serving requests for {}..={} on behalf of {}",
        server.range_start, server.range_end, server_options.ip
    );

    let mut dropped: u32 = 0;
    let mut sweep_at = Instant::now() + SWEEP_PERIOD;

    loop {
        match select(socket.receive(buf), Timer::at(sweep_at)).await {
            Either::First(result) => {
                let (len, remote) = result.map_err(Error::Io)?;

                let request = match Packet::decode(&buf[..len]) {
                    Ok(request) => request,
                    Err(err) => {
                        dropped += 1;
                        warn!("Dropping malformed packet from {remote}: {err} ({dropped} dropped so far)");
                        continue;
                    }
                };

                let mut opt_buf = Options::buf();

                if let Some(reply) =
                    server.handle_request(&mut opt_buf, server_options, &request, Instant::now())
                {
                    let dest = SocketAddr::V4(reply.reply_destination());
                    let data = reply.encode(buf)?;

                    // One retry; if the network is really down the client
                    // will retransmit anyway
                    if let Err(err) = socket.send(dest, data).await {
                        warn!("Send to {dest} failed ({err:?}), retrying once");

                        if let Err(err) = socket.send(dest, data).await {
                            warn!("Send to {dest} failed again ({err:?}), dropping reply");
                        }
                    }
                }
            }
            Either::Second(()) => {
                let now = Instant::now();

                server.sweep(now);
                sweep_at = now + SWEEP_PERIOD;
            }
        }
    }
}
