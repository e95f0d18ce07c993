use core::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant, Timer};

use edge_nal::{UdpReceive, UdpSend};

use log::{info, warn};

use rand_core::RngCore;

use super::Error;

use crate::client::Client;
use crate::{MessageType, Options, Packet, Settings, SERVER_PORT};

/// The retransmission schedule: 4 s doubling up to 64 s, with a ±1 s jitter
/// drawn from the client RNG.
const INITIAL_TIMEOUT: Duration = Duration::from_secs(4);
const MAX_TIMEOUT: Duration = Duration::from_secs(64);
const JITTER_MILLIS: u64 = 1000;

/// How many times a DISCOVER is retransmitted under one xid. Servers absorb
/// same-xid retransmissions, so a transaction whose OFFER got lost has to be
/// abandoned for a fresh one rather than retried forever.
const DISCOVER_RETRIES: usize = 4;

/// How many times a REQUEST is retried before discovery starts over.
const REQUEST_RETRIES: usize = 4;

/// Lease duration assumed when the server does not send option 51.
const DEFAULT_LEASE_SECS: u32 = 7200;

/// Network configuration that arrived alongside the leased address.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NetworkInfo {
    pub gateway: Option<Ipv4Addr>,
    pub subnet: Option<Ipv4Addr>,
    pub dns1: Option<Ipv4Addr>,
    pub dns2: Option<Ipv4Addr>,
}

#[derive(Debug, Clone)]
enum Reply {
    Offer(Settings),
    Ack(Settings),
    Nak,
    Timeout,
}

/// A leased address, plus what is needed to keep it alive and give it back.
///
/// The methods on this type drive the whole client lifecycle over a supplied
/// client instance and UDP socket: acquiring an address, keeping its lease up
/// to date and handing it back. Configuration is only ever surfaced once an
/// ACK arrives; when a lease is lost, everything learned with it is dropped.
///
/// The socket should be bound to the client port (usually 68) and must be
/// able to send and receive broadcast UDP packets.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Lease {
    pub ip: Ipv4Addr,
    pub server_ip: Ipv4Addr,
    pub duration: Duration,
    pub acquired: Instant,
}

impl Lease {
    /// Acquires a new lease by discovering a server and requesting an address
    /// from it, retransmitting with growing backoff until one answers.
    ///
    /// With `server`, discovery is unicast to that server instead of
    /// broadcast.
    pub async fn new<T, S>(
        client: &mut Client<T>,
        socket: &mut S,
        buf: &mut [u8],
        server: Option<Ipv4Addr>,
    ) -> Result<(Self, NetworkInfo), Error<S::Error>>
    where
        T: RngCore,
        S: UdpReceive + UdpSend,
    {
        let mut timeout = INITIAL_TIMEOUT;
        let started = Instant::now();
        let secs = move || (Instant::now() - started).as_secs() as u16;

        'init: loop {
            let xid = client.next_xid();

            // Resend the same transaction a few times, then start a fresh one
            let mut offer = None;

            for _ in 0..DISCOVER_RETRIES {
                match Self::discover(client, socket, buf, xid, secs(), server, timeout).await? {
                    Some(settings) => {
                        offer = Some(settings);
                        break;
                    }
                    None => {
                        info!("No offers received, retrying");
                        timeout = backoff(client, timeout);
                    }
                }
            }

            let Some(offer) = offer else {
                continue 'init;
            };

            let Some(server_ip) = offer.server_ip else {
                warn!("Offer for {} names no server, ignoring", offer.ip);
                continue 'init;
            };

            info!("Offered {} by server {server_ip}", offer.ip);

            for _ in 0..REQUEST_RETRIES {
                match Self::request(client, socket, buf, xid, secs(), server_ip, offer.ip, timeout)
                    .await?
                {
                    Reply::Ack(settings) => {
                        let lease = Self {
                            ip: settings.ip,
                            server_ip,
                            duration: Duration::from_secs(
                                settings.lease_time_secs.unwrap_or(DEFAULT_LEASE_SECS) as u64,
                            ),
                            acquired: Instant::now(),
                        };

                        info!("Acquired {} for {} seconds", lease.ip, lease.duration.as_secs());

                        return Ok((
                            lease,
                            NetworkInfo {
                                gateway: settings.gateway,
                                subnet: settings.subnet,
                                dns1: settings.dns1,
                                dns2: settings.dns2,
                            },
                        ));
                    }
                    Reply::Nak => {
                        warn!("Server {server_ip} refused {}, restarting", offer.ip);
                        timeout = backoff(client, timeout);
                        Timer::after(timeout).await;
                        continue 'init;
                    }
                    _ => timeout = backoff(client, timeout),
                }
            }

            // The chosen server went quiet; start over
        }
    }

    /// Keeps the lease up to date: renews at T1 (half the lease) by unicast,
    /// falls back to broadcast at T2 (7/8 of the lease), and returns once the
    /// lease is lost, either to a NAK or to expiry. The caller is expected to
    /// restart with [`Lease::new`].
    pub async fn keep<T, S>(
        &mut self,
        client: &mut Client<T>,
        socket: &mut S,
        buf: &mut [u8],
    ) -> Result<(), Error<S::Error>>
    where
        T: RngCore,
        S: UdpReceive + UdpSend,
    {
        loop {
            let now = Instant::now();
            let elapsed = now - self.acquired;

            if elapsed >= self.duration {
                warn!("Lease on {} expired", self.ip);
                break;
            }

            let t1 = self.duration / 2;
            let t2 = self.duration / 8 * 7;

            if elapsed < t1 {
                Timer::at(self.acquired + t1).await;
                continue;
            }

            // Past T2 the chosen server is presumed gone and any server on
            // the wire may extend the lease
            let rebinding = elapsed >= t2;

            match Self::renew(client, socket, buf, self.ip, self.server_ip, rebinding).await? {
                Reply::Ack(settings) => {
                    self.duration = settings
                        .lease_time_secs
                        .map(|secs| Duration::from_secs(secs as u64))
                        .unwrap_or(self.duration);
                    self.acquired = Instant::now();

                    info!("Lease on {} renewed", self.ip);
                }
                Reply::Nak => {
                    warn!("Lease on {} revoked by the server", self.ip);
                    break;
                }
                _ => {
                    // No answer; pause before the next attempt so the wire is
                    // not hammered for the whole renewal window
                    Timer::after(Duration::from_secs(60).min(self.duration / 8)).await;
                }
            }
        }

        Ok(())
    }

    /// Releases the lease back to the server that granted it, consuming it.
    pub async fn release<T, S>(
        self,
        client: &mut Client<T>,
        socket: &mut S,
        buf: &mut [u8],
    ) -> Result<(), Error<S::Error>>
    where
        T: RngCore,
        S: UdpReceive + UdpSend,
    {
        let xid = client.next_xid();

        let mut opt_buf = Options::buf();
        let request = client.release(&mut opt_buf, xid, self.ip);

        socket
            .send(
                SocketAddr::V4(SocketAddrV4::new(self.server_ip, SERVER_PORT)),
                request.encode(buf)?,
            )
            .await
            .map_err(Error::Io)?;

        info!("Released {}", self.ip);

        Ok(())
    }

    async fn discover<T, S>(
        client: &mut Client<T>,
        socket: &mut S,
        buf: &mut [u8],
        xid: u32,
        secs: u16,
        server: Option<Ipv4Addr>,
        timeout: Duration,
    ) -> Result<Option<Settings>, Error<S::Error>>
    where
        T: RngCore,
        S: UdpReceive + UdpSend,
    {
        info!("Discovering DHCP servers...");

        let mut opt_buf = Options::buf();
        let request = client.discover(&mut opt_buf, xid, secs, None);

        socket
            .send(
                SocketAddr::V4(SocketAddrV4::new(
                    server.unwrap_or(Ipv4Addr::BROADCAST),
                    SERVER_PORT,
                )),
                request.encode(buf)?,
            )
            .await
            .map_err(Error::Io)?;

        let deadline = Instant::now() + timeout;

        loop {
            match Self::wait_reply(client, socket, buf, xid, deadline).await? {
                Reply::Offer(settings) => return Ok(Some(settings)),
                Reply::Timeout => return Ok(None),
                // Stray ACKs/NAKs from an earlier transaction
                _ => continue,
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn request<T, S>(
        client: &mut Client<T>,
        socket: &mut S,
        buf: &mut [u8],
        xid: u32,
        secs: u16,
        server_ip: Ipv4Addr,
        ip: Ipv4Addr,
        timeout: Duration,
    ) -> Result<Reply, Error<S::Error>>
    where
        T: RngCore,
        S: UdpReceive + UdpSend,
    {
        info!("Requesting {ip} from server {server_ip}");

        let mut opt_buf = Options::buf();
        let request = client.request(&mut opt_buf, xid, secs, server_ip, ip);

        socket
            .send(
                SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, SERVER_PORT)),
                request.encode(buf)?,
            )
            .await
            .map_err(Error::Io)?;

        let deadline = Instant::now() + timeout;

        loop {
            match Self::wait_reply(client, socket, buf, xid, deadline).await? {
                // A late duplicate OFFER; keep waiting for the ACK
                Reply::Offer(_) => continue,
                other => return Ok(other),
            }
        }
    }

    async fn renew<T, S>(
        client: &mut Client<T>,
        socket: &mut S,
        buf: &mut [u8],
        ip: Ipv4Addr,
        server_ip: Ipv4Addr,
        rebinding: bool,
    ) -> Result<Reply, Error<S::Error>>
    where
        T: RngCore,
        S: UdpReceive + UdpSend,
    {
        info!(
            "{} lease on {ip} with server {server_ip}",
            if rebinding { "Rebinding" } else { "Renewing" }
        );

        // Every renewal is its own transaction
        let xid = client.next_xid();

        let mut opt_buf = Options::buf();
        let request = client.renew(&mut opt_buf, xid, 0, ip, rebinding);

        let dest = if rebinding {
            Ipv4Addr::BROADCAST
        } else {
            server_ip
        };

        socket
            .send(
                SocketAddr::V4(SocketAddrV4::new(dest, SERVER_PORT)),
                request.encode(buf)?,
            )
            .await
            .map_err(Error::Io)?;

        let deadline = Instant::now() + INITIAL_TIMEOUT;

        loop {
            match Self::wait_reply(client, socket, buf, xid, deadline).await? {
                Reply::Offer(_) => continue,
                other => return Ok(other),
            }
        }
    }

    /// Waits until `deadline` for a reply matching our mac and `xid`,
    /// ignoring everything else arriving on the socket in the meantime.
    async fn wait_reply<T, S>(
        client: &Client<T>,
        socket: &mut S,
        buf: &mut [u8],
        xid: u32,
        deadline: Instant,
    ) -> Result<Reply, Error<S::Error>>
    where
        T: RngCore,
        S: UdpReceive + UdpSend,
    {
        loop {
            match select(socket.receive(buf), Timer::at(deadline)).await {
                Either::First(result) => {
                    let (len, _remote) = result.map_err(Error::Io)?;

                    let Ok(reply) = Packet::decode(&buf[..len]) else {
                        continue;
                    };

                    if reply.is_for_us(&client.mac, xid) {
                        if let Some((mt, settings)) = reply.settings() {
                            match mt {
                                MessageType::Offer => return Ok(Reply::Offer(settings)),
                                MessageType::Ack => return Ok(Reply::Ack(settings)),
                                MessageType::Nak => return Ok(Reply::Nak),
                                _ => (),
                            }
                        }
                    }
                }
                Either::Second(()) => return Ok(Reply::Timeout),
            }
        }
    }
}

/// The next retransmission timeout: doubled, capped, jittered.
fn backoff<T>(client: &mut Client<T>, timeout: Duration) -> Duration
where
    T: RngCore,
{
    let next = (timeout * 2).min(MAX_TIMEOUT);
    let jitter = Duration::from_millis(client.rng.next_u32() as u64 % (2 * JITTER_MILLIS));

    next - Duration::from_millis(JITTER_MILLIS) + jitter
}
