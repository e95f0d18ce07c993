use embassy_time::{Duration, Instant};

use log::{debug, info, warn};

use super::*;

/// A single pool entry: the binding of one hardware address to one pool
/// address, together with the clock state that bounds its lifetime and the
/// transaction that created or last refreshed it.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Lease {
    mac: [u8; 16],
    xid: u32,
    start: Instant,
    duration: Duration,
}

impl Lease {
    fn expired(&self, now: Instant) -> bool {
        // A `now` behind `start` means the wall clock regressed; treat the
        // elapsed time as zero rather than reclaiming a live lease
        now > self.start && now - self.start > self.duration
    }
}

/// What an incoming packet asks the pool to do.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action<'a> {
    Discover {
        requested: Option<Ipv4Addr>,
        mac: &'a [u8; 16],
    },
    Request {
        addr: Ipv4Addr,
        mac: &'a [u8; 16],
    },
    Release {
        mac: &'a [u8; 16],
    },
    Decline {
        mac: &'a [u8; 16],
    },
}

/// Per-server configuration: identity, the network parameters handed to
/// clients, and the lease lifetime it grants.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServerOptions<'a> {
    pub ip: Ipv4Addr,
    pub gateways: &'a [Ipv4Addr],
    pub subnet: Option<Ipv4Addr>,
    pub dns: &'a [Ipv4Addr],
    pub lease_duration: Duration,
}

impl<'a> ServerOptions<'a> {
    /// Classifies an incoming packet, or decides to drop it.
    ///
    /// Replies, packets without a message type and packets naming another
    /// server in option 54 are dropped here. A REQUEST without option 54 is
    /// accepted, since renewing clients legitimately omit it.
    pub fn process<'o>(&self, request: &'o Packet<'o>) -> Option<Action<'o>> {
        if request.reply {
            return None;
        }

        let Some(message_type) = request.options.message_type() else {
            warn!("Ignoring request without a message type: {request:?}");
            return None;
        };

        if let Some(server_id) = request.options.server_identifier() {
            if server_id != self.ip {
                debug!("Ignoring {message_type} addressed to server {server_id}");
                return None;
            }
        }

        debug!("Received {message_type}: {request:?}");

        match message_type {
            MessageType::Discover => Some(Action::Discover {
                requested: request.options.requested_ip(),
                mac: &request.chaddr,
            }),
            MessageType::Request => {
                // A renewing client carries the address in `ciaddr` instead
                // of option 50
                let addr = request.options.requested_ip().unwrap_or(request.ciaddr);

                Some(Action::Request {
                    addr,
                    mac: &request.chaddr,
                })
            }
            MessageType::Release => Some(Action::Release {
                mac: &request.chaddr,
            }),
            MessageType::Decline => Some(Action::Decline {
                mac: &request.chaddr,
            }),
            other => {
                debug!("Ignoring {other}");
                None
            }
        }
    }
}

/// The lease pool of one DHCP server.
///
/// Addresses come out of the inclusive `range_start..=range_end` range and
/// are tracked in a map of at most `N` bindings. Nothing here touches a
/// socket: [`Server::handle_request`] maps one decoded packet to at most one
/// reply packet, and the surrounding loop decides where the bytes go. Every
/// public method is one atomic step over the pool, so a multi-worker
/// embedding only needs to put the whole value behind a mutex.
#[derive(Clone, Debug)]
pub struct Server<const N: usize> {
    pub range_start: Ipv4Addr,
    pub range_end: Ipv4Addr,
    pub leases: heapless::LinearMap<Ipv4Addr, Lease, N>,
}

impl<const N: usize> Server<N> {
    pub fn new(range_start: Ipv4Addr, range_end: Ipv4Addr) -> Self {
        Self {
            range_start,
            range_end,
            leases: heapless::LinearMap::new(),
        }
    }

    /// Processes one decoded request against the pool and produces the reply
    /// to send, if any.
    ///
    /// The dispatch decides which message type answers the request and which
    /// address (if any) goes into `yiaddr`; the reply packet itself is put
    /// together in one place at the bottom.
    pub fn handle_request<'o>(
        &mut self,
        opt_buf: &'o mut [DhcpOption<'o>],
        config: &'o ServerOptions<'o>,
        request: &Packet<'_>,
        now: Instant,
    ) -> Option<Packet<'o>> {
        let (message_type, ip) = match config.process(request)? {
            Action::Discover { requested: _, mac } => {
                if self.is_duplicate(mac, request.xid) {
                    debug!("Dropping retransmitted DISCOVER, xid {:08x}", request.xid);
                    return None;
                }

                // A client that held an address before gets it again, so
                // reboots are idempotent; newcomers get the lowest free
                // address
                let previous = self.renew(mac, request.xid, now);
                let addr = previous.or_else(|| {
                    let free = self.first_free()?;

                    self.assign(free, *mac, request.xid, now, config.lease_duration)
                        .then_some(free)
                });

                match addr {
                    Some(addr) => (MessageType::Offer, Some(addr)),
                    None => {
                        warn!("Address pool exhausted, refusing {:02x?}", &mac[..6]);
                        (MessageType::Nak, None)
                    }
                }
            }
            Action::Request { addr, mac } => {
                if self.lease_by_mac(mac) == Some(addr) && self.commit(addr, mac, now) {
                    (MessageType::Ack, Some(addr))
                } else {
                    warn!("Refusing REQUEST for {addr} from {:02x?}", &mac[..6]);
                    (MessageType::Nak, None)
                }
            }
            Action::Release { mac } => {
                self.release(mac);

                return None;
            }
            Action::Decline { mac } => {
                // The address may be in use elsewhere; keep the record so it
                // is not re-offered immediately
                debug!("DECLINE from {:02x?} noted", &mac[..6]);

                return None;
            }
        };

        let options = Options::reply(
            message_type,
            config.ip,
            config.lease_duration.as_secs() as u32,
            config.gateways,
            config.subnet,
            config.dns,
            opt_buf,
        );

        let reply = request.new_reply(ip, config.ip, options);

        info!("Answering with {message_type}: {reply:?}");

        Some(reply)
    }

    /// The address currently bound to `mac`, if any.
    pub fn lease_by_mac(&self, mac: &[u8; 16]) -> Option<Ipv4Addr> {
        self.leases
            .iter()
            .find_map(|(addr, lease)| (lease.mac == *mac).then_some(*addr))
    }

    /// The lowest address of the configured range not currently held by any
    /// record. The ascending scan keeps allocation reproducible.
    pub fn first_free(&self) -> Option<Ipv4Addr> {
        let start: u32 = self.range_start.into();
        let end: u32 = self.range_end.into();

        (start..=end)
            .map(Ipv4Addr::from)
            .find(|addr| !self.leases.contains_key(addr))
    }

    /// Records a fresh binding. Fails if the address is outside the range, if
    /// it is already held, if `mac` already holds another address, or if the
    /// pool is at capacity.
    pub fn assign(
        &mut self,
        addr: Ipv4Addr,
        mac: [u8; 16],
        xid: u32,
        now: Instant,
        duration: Duration,
    ) -> bool {
        let pos: u32 = addr.into();
        let start: u32 = self.range_start.into();
        let end: u32 = self.range_end.into();

        if pos < start || pos > end {
            return false;
        }

        if self.leases.contains_key(&addr) || self.lease_by_mac(&mac).is_some() {
            return false;
        }

        self.leases
            .insert(
                addr,
                Lease {
                    mac,
                    xid,
                    start: now,
                    duration,
                },
            )
            .is_ok()
    }

    /// Restarts the lease clock of an existing binding. Called on ACK so T1/T2
    /// count from the commit, not from the offer.
    pub fn commit(&mut self, addr: Ipv4Addr, mac: &[u8; 16], now: Instant) -> bool {
        match self.leases.get_mut(&addr) {
            Some(lease) if lease.mac == *mac => {
                lease.start = now;
                true
            }
            _ => false,
        }
    }

    /// Refreshes the binding held by `mac`, stamping it with the transaction
    /// that touched it, and returns the bound address.
    pub fn renew(&mut self, mac: &[u8; 16], xid: u32, now: Instant) -> Option<Ipv4Addr> {
        for (addr, lease) in self.leases.iter_mut() {
            if lease.mac == *mac {
                lease.start = now;
                lease.xid = xid;

                return Some(*addr);
            }
        }

        None
    }

    /// Drops the binding held by `mac`, freeing its address.
    pub fn release(&mut self, mac: &[u8; 16]) -> bool {
        if let Some(addr) = self.lease_by_mac(mac) {
            self.leases.remove(&addr);

            info!("Released {addr}");

            true
        } else {
            false
        }
    }

    /// Reclaims every record whose lease has run out at `now` and returns how
    /// many were reclaimed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let mut expired: heapless::Vec<Ipv4Addr, N> = heapless::Vec::new();

        for (addr, lease) in self.leases.iter() {
            if lease.expired(now) {
                // Cannot overflow: the vec is as large as the map
                let _ = expired.push(*addr);
            }
        }

        for addr in &expired {
            self.leases.remove(addr);

            info!("Lease on {addr} expired, address reclaimed");
        }

        expired.len()
    }

    /// Whether `mac` already has a record created or refreshed by this very
    /// transaction, i.e. whether the packet at hand is a retransmission.
    pub fn is_duplicate(&self, mac: &[u8; 16], xid: u32) -> bool {
        self.leases
            .iter()
            .any(|(_, lease)| lease.mac == *mac && lease.xid == xid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);
    const MAC_A: [u8; 6] = [0x00, 0x0c, 0x29, 0x3e, 0x53, 0xf7];
    const MAC_B: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];
    const XID_A: u32 = 0xA1A1A1A1;
    const XID_B: u32 = 0xB2B2B2B2;

    fn server_options() -> ServerOptions<'static> {
        static GATEWAYS: [Ipv4Addr; 1] = [SERVER_IP];
        static DNS: [Ipv4Addr; 1] = [Ipv4Addr::new(8, 8, 8, 8)];

        ServerOptions {
            ip: SERVER_IP,
            gateways: &GATEWAYS,
            subnet: Some(Ipv4Addr::new(255, 255, 255, 0)),
            dns: &DNS,
            lease_duration: Duration::from_secs(60),
        }
    }

    fn pool() -> Server<4> {
        Server::new(
            Ipv4Addr::new(192, 168, 0, 100),
            Ipv4Addr::new(192, 168, 0, 102),
        )
    }

    fn discover<'a>(
        mac: [u8; 6],
        xid: u32,
        opt_buf: &'a mut [DhcpOption<'a>],
    ) -> Packet<'a> {
        Packet::new_request(mac, xid, 0, None, Options::discover(None, opt_buf))
    }

    fn request<'a>(
        mac: [u8; 6],
        xid: u32,
        addr: Ipv4Addr,
        opt_buf: &'a mut [DhcpOption<'a>],
    ) -> Packet<'a> {
        Packet::new_request(mac, xid, 0, None, Options::request(addr, SERVER_IP, opt_buf))
    }

    fn at(secs: u64) -> Instant {
        Instant::from_secs(secs)
    }

    // The full DISCOVER/OFFER/REQUEST/ACK exchange for one client, returning
    // the address it was bound to
    fn bind<const N: usize>(
        server: &mut Server<N>,
        mac: [u8; 6],
        xid: u32,
        now: Instant,
    ) -> Option<Ipv4Addr> {
        let options = server_options();

        let mut opt_buf = Options::buf();
        let mut reply_buf = Options::buf();
        let packet = discover(mac, xid, &mut opt_buf);
        let offer = server.handle_request(&mut reply_buf, &options, &packet, now)?;

        if offer.options.message_type() != Some(MessageType::Offer) {
            return None;
        }

        let offered = offer.yiaddr;

        let mut opt_buf = Options::buf();
        let mut reply_buf = Options::buf();
        let packet = request(mac, xid, offered, &mut opt_buf);
        let ack = server.handle_request(&mut reply_buf, &options, &packet, now)?;

        (ack.options.message_type() == Some(MessageType::Ack)).then_some(ack.yiaddr)
    }

    #[test]
    fn fresh_bind_walks_the_four_steps() {
        let mut server = pool();
        let options = server_options();

        let mut opt_buf = Options::buf();
        let mut reply_buf = Options::buf();
        let packet = discover(MAC_A, XID_A, &mut opt_buf);
        let offer = server
            .handle_request(&mut reply_buf, &options, &packet, at(0))
            .unwrap();

        assert!(offer.reply);
        assert_eq!(offer.options.message_type(), Some(MessageType::Offer));
        assert_eq!(offer.yiaddr, Ipv4Addr::new(192, 168, 0, 100));
        assert_eq!(offer.xid, XID_A);
        assert_eq!(offer.siaddr, SERVER_IP);
        assert_eq!(offer.secs, 0);
        assert_eq!(offer.options.lease_time_secs(), Some(60));
        assert_eq!(offer.options.server_identifier(), Some(SERVER_IP));
        assert!(offer
            .options
            .iter()
            .any(|option| matches!(option, DhcpOption::SubnetMask(_))));
        assert!(offer
            .options
            .iter()
            .any(|option| matches!(option, DhcpOption::Router(_))));
        assert!(offer
            .options
            .iter()
            .any(|option| matches!(option, DhcpOption::DomainNameServer(_))));

        let mut opt_buf = Options::buf();
        let mut reply_buf = Options::buf();
        let packet = request(MAC_A, XID_A, offer.yiaddr, &mut opt_buf);
        let ack = server
            .handle_request(&mut reply_buf, &options, &packet, at(1))
            .unwrap();

        assert_eq!(ack.options.message_type(), Some(MessageType::Ack));
        assert_eq!(ack.yiaddr, Ipv4Addr::new(192, 168, 0, 100));
        assert_eq!(ack.options.server_identifier(), Some(SERVER_IP));
        assert!(ack
            .options
            .iter()
            .any(|option| matches!(option, DhcpOption::SubnetMask(_))));

        assert_eq!(
            server.lease_by_mac(&packet.chaddr),
            Some(Ipv4Addr::new(192, 168, 0, 100))
        );
    }

    #[test]
    fn rediscover_returns_the_previous_address() {
        let mut server = pool();

        assert_eq!(
            bind(&mut server, MAC_A, XID_A, at(0)),
            Some(Ipv4Addr::new(192, 168, 0, 100))
        );

        // Same client, new transaction: same address again
        let options = server_options();
        let mut opt_buf = Options::buf();
        let mut reply_buf = Options::buf();
        let packet = discover(MAC_A, 0x0D0D0D0D, &mut opt_buf);
        let offer = server
            .handle_request(&mut reply_buf, &options, &packet, at(10))
            .unwrap();

        assert_eq!(offer.yiaddr, Ipv4Addr::new(192, 168, 0, 100));
        assert_eq!(server.leases.len(), 1);
    }

    #[test]
    fn exhausted_pool_naks_newcomers() {
        let mut server: Server<4> = Server::new(
            Ipv4Addr::new(192, 168, 0, 100),
            Ipv4Addr::new(192, 168, 0, 100),
        );

        assert_eq!(
            bind(&mut server, MAC_A, XID_A, at(0)),
            Some(Ipv4Addr::new(192, 168, 0, 100))
        );

        let options = server_options();
        let mut opt_buf = Options::buf();
        let mut reply_buf = Options::buf();
        let packet = discover(MAC_B, XID_B, &mut opt_buf);
        let nak = server
            .handle_request(&mut reply_buf, &options, &packet, at(1))
            .unwrap();

        assert_eq!(nak.options.message_type(), Some(MessageType::Nak));
        assert_eq!(nak.yiaddr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(nak.xid, XID_B);
    }

    #[test]
    fn repeated_request_reemits_identical_ack() {
        let mut server = pool();
        let options = server_options();

        let addr = bind(&mut server, MAC_A, XID_A, at(0)).unwrap();

        let mut first = [0; 600];
        let mut second = [0; 600];

        let mut opt_buf = Options::buf();
        let mut reply_buf = Options::buf();
        let packet = request(MAC_A, XID_A, addr, &mut opt_buf);
        let first_len = {
            let ack = server
                .handle_request(&mut reply_buf, &options, &packet, at(5))
                .unwrap();
            ack.encode(&mut first).unwrap().len()
        };

        let mut opt_buf = Options::buf();
        let mut reply_buf = Options::buf();
        let packet = request(MAC_A, XID_A, addr, &mut opt_buf);
        let second_len = {
            let ack = server
                .handle_request(&mut reply_buf, &options, &packet, at(9))
                .unwrap();
            ack.encode(&mut second).unwrap().len()
        };

        assert_eq!(first[..first_len], second[..second_len]);
        assert_eq!(server.leases.len(), 1);
    }

    #[test]
    fn sweep_reclaims_expired_leases() {
        let mut server = pool();

        let addr = bind(&mut server, MAC_A, XID_A, at(0)).unwrap();
        let mac = {
            let mut mac = [0; 16];
            mac[..6].copy_from_slice(&MAC_A);
            mac
        };

        assert_eq!(server.sweep(at(59)), 0);
        assert_eq!(server.lease_by_mac(&mac), Some(addr));

        assert_eq!(server.sweep(at(61)), 1);
        assert_eq!(server.lease_by_mac(&mac), None);

        // The very same address is available for the same client again
        assert_eq!(bind(&mut server, MAC_A, 0x0E0E0E0E, at(62)), Some(addr));
    }

    #[test]
    fn sweep_is_immune_to_clock_regression() {
        let mut server = pool();

        bind(&mut server, MAC_A, XID_A, at(1000)).unwrap();

        assert_eq!(server.sweep(at(0)), 0);
        assert_eq!(server.leases.len(), 1);
    }

    #[test]
    fn retransmitted_discover_is_dropped() {
        let mut server = pool();
        let options = server_options();

        let mut opt_buf = Options::buf();
        let mut reply_buf = Options::buf();
        let packet = discover(MAC_A, XID_A, &mut opt_buf);
        assert!(server
            .handle_request(&mut reply_buf, &options, &packet, at(0))
            .is_some());

        let mut opt_buf = Options::buf();
        let mut reply_buf = Options::buf();
        let packet = discover(MAC_A, XID_A, &mut opt_buf);
        assert!(server
            .handle_request(&mut reply_buf, &options, &packet, at(1))
            .is_none());

        assert_eq!(server.leases.len(), 1);
    }

    #[test]
    fn xid_filter_follows_the_latest_transaction() {
        let mut server = pool();
        let mac = {
            let mut mac = [0; 16];
            mac[..6].copy_from_slice(&MAC_A);
            mac
        };

        assert!(server.assign(
            Ipv4Addr::new(192, 168, 0, 100),
            mac,
            XID_A,
            at(0),
            Duration::from_secs(60)
        ));
        assert!(server.is_duplicate(&mac, XID_A));

        server.renew(&mac, XID_B, at(1));
        assert!(!server.is_duplicate(&mac, XID_A));
        assert!(server.is_duplicate(&mac, XID_B));
    }

    #[test]
    fn request_for_foreign_address_naks() {
        let mut server = pool();
        let options = server_options();

        bind(&mut server, MAC_A, XID_A, at(0)).unwrap();

        // The client asks for an address it does not hold
        let mut opt_buf = Options::buf();
        let mut reply_buf = Options::buf();
        let packet = request(MAC_A, XID_A, Ipv4Addr::new(192, 168, 0, 101), &mut opt_buf);
        let nak = server
            .handle_request(&mut reply_buf, &options, &packet, at(1))
            .unwrap();

        assert_eq!(nak.options.message_type(), Some(MessageType::Nak));
    }

    #[test]
    fn request_without_prior_offer_naks() {
        let mut server = pool();
        let options = server_options();

        let mut opt_buf = Options::buf();
        let mut reply_buf = Options::buf();
        let packet = request(MAC_A, XID_A, Ipv4Addr::new(192, 168, 0, 100), &mut opt_buf);
        let nak = server
            .handle_request(&mut reply_buf, &options, &packet, at(0))
            .unwrap();

        assert_eq!(nak.options.message_type(), Some(MessageType::Nak));
        assert!(server.leases.is_empty());
    }

    #[test]
    fn renewal_request_carries_address_in_ciaddr() {
        let mut server = pool();
        let options = server_options();

        let addr = bind(&mut server, MAC_A, XID_A, at(0)).unwrap();

        // Renewal: fresh xid, `ciaddr` set, no options 50/54
        let mut opt_buf = Options::buf();
        let mut reply_buf = Options::buf();
        let packet =
            Packet::new_request(MAC_A, XID_B, 0, Some(addr), Options::renew(&mut opt_buf));
        let ack = server
            .handle_request(&mut reply_buf, &options, &packet, at(30))
            .unwrap();

        assert_eq!(ack.options.message_type(), Some(MessageType::Ack));
        assert_eq!(ack.yiaddr, addr);

        // The lease clock restarted at the renewal
        assert_eq!(server.sweep(at(61)), 0);
        assert_eq!(server.sweep(at(91)), 1);
    }

    #[test]
    fn request_addressed_to_another_server_is_dropped() {
        let mut server = pool();
        let options = server_options();

        bind(&mut server, MAC_A, XID_A, at(0)).unwrap();

        let mut opt_buf = Options::buf();
        let mut reply_buf = Options::buf();
        let packet = Packet::new_request(
            MAC_A,
            XID_A,
            0,
            None,
            Options::request(
                Ipv4Addr::new(192, 168, 0, 100),
                Ipv4Addr::new(10, 0, 0, 1),
                &mut opt_buf,
            ),
        );

        assert!(server
            .handle_request(&mut reply_buf, &options, &packet, at(1))
            .is_none());
    }

    #[test]
    fn release_frees_the_address() {
        let mut server = pool();
        let options = server_options();

        let addr = bind(&mut server, MAC_A, XID_A, at(0)).unwrap();

        let mut opt_buf = Options::buf();
        let mut reply_buf = Options::buf();
        let packet =
            Packet::new_request(MAC_A, XID_B, 0, Some(addr), Options::release(&mut opt_buf));

        // RELEASE elicits no reply and frees the slot
        assert!(server
            .handle_request(&mut reply_buf, &options, &packet, at(1))
            .is_none());
        assert!(server.leases.is_empty());

        assert_eq!(bind(&mut server, MAC_B, XID_B, at(2)), Some(addr));
    }

    #[test]
    fn assigned_addresses_stay_in_range_without_duplicates() {
        let mut server = pool();

        let a = bind(&mut server, MAC_A, XID_A, at(0)).unwrap();
        let b = bind(&mut server, MAC_B, XID_B, at(0)).unwrap();
        let c = bind(&mut server, [0x02, 0, 0, 0, 0, 0x01], 0x0C0C0C0C, at(0)).unwrap();

        let start: u32 = server.range_start.into();
        let end: u32 = server.range_end.into();

        for addr in [a, b, c] {
            let pos: u32 = addr.into();
            assert!(pos >= start && pos <= end);
        }

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn reply_routing_fields_follow_the_request() {
        let mut server = pool();
        let options = server_options();

        let mut opt_buf = Options::buf();
        let mut reply_buf = Options::buf();
        let mut packet = discover(MAC_A, XID_A, &mut opt_buf);
        packet.giaddr = Ipv4Addr::new(192, 168, 0, 2);
        packet.hops = 1;
        packet.secs = 7;

        let offer = server
            .handle_request(&mut reply_buf, &options, &packet, at(0))
            .unwrap();

        assert!(offer.reply);
        assert_eq!(offer.xid, packet.xid);
        assert_eq!(offer.chaddr, packet.chaddr);
        assert_eq!(offer.giaddr, packet.giaddr);
        assert_eq!(offer.broadcast, packet.broadcast);
        assert_eq!(offer.siaddr, SERVER_IP);
        assert_eq!(offer.secs, 0);
        assert_eq!(
            offer.reply_destination(),
            SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 2), SERVER_PORT)
        );
    }
}
