use log::debug;

use super::*;

// Requests that looped through this many relays are considered undeliverable
const MAX_HOPS: u8 = 16;

/// A stateless DHCP relay.
///
/// The relay keeps no per-transaction state: each packet carries everything
/// needed to route it. Client requests are stamped with this relay's address
/// in `giaddr` (the server routes its reply back through it) and forwarded to
/// the configured server; server replies are routed to the client side.
///
/// `xid`, `chaddr`, `yiaddr`, `sname`, `file` and the option stream pass
/// through untouched, and `hops` is only ever incremented, never decremented.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Relay {
    /// The upstream server client requests are forwarded to.
    pub server: Ipv4Addr,
    /// This relay's own reachable address, as seen by the server.
    pub ip: Ipv4Addr,
}

impl Relay {
    pub const fn new(server: Ipv4Addr, ip: Ipv4Addr) -> Self {
        Self { server, ip }
    }

    /// Rewrites the routing fields of one packet in place and returns where
    /// to forward it, or `None` to drop it.
    pub fn process(&self, packet: &mut Packet<'_>) -> Option<SocketAddrV4> {
        if packet.reply {
            Some(packet.client_destination())
        } else {
            if packet.hops >= MAX_HOPS {
                debug!("Dropping request with hop count {}", packet.hops);
                return None;
            }

            // Only the relay closest to the client stamps itself in
            if packet.giaddr.is_unspecified() {
                packet.giaddr = self.ip;
            }

            packet.hops += 1;

            Some(SocketAddrV4::new(self.server, SERVER_PORT))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use embassy_time::{Duration, Instant};

    use crate::client::Client;
    use crate::server::{Server, ServerOptions};

    use rand::rngs::mock::StepRng;

    const SERVER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);
    const RELAY_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 2);
    const MAC: [u8; 6] = [0x00, 0x0c, 0x29, 0x3e, 0x53, 0xf7];

    fn relay() -> Relay {
        Relay::new(SERVER_IP, RELAY_IP)
    }

    #[test]
    fn request_gets_giaddr_and_a_hop() {
        let client = Client::new(StepRng::new(0, 1), MAC);

        let mut opt_buf = Options::buf();
        let mut packet = client.discover(&mut opt_buf, 0x42, 0, None);

        let dest = relay().process(&mut packet).unwrap();

        assert_eq!(dest, SocketAddrV4::new(SERVER_IP, SERVER_PORT));
        assert_eq!(packet.giaddr, RELAY_IP);
        assert_eq!(packet.hops, 1);
        assert_eq!(packet.xid, 0x42);
        assert_eq!(&packet.chaddr[..6], &MAC);
    }

    #[test]
    fn existing_giaddr_is_preserved() {
        let client = Client::new(StepRng::new(0, 1), MAC);
        let first_relay = Ipv4Addr::new(10, 0, 0, 254);

        let mut opt_buf = Options::buf();
        let mut packet = client.discover(&mut opt_buf, 0x42, 0, None);
        packet.giaddr = first_relay;
        packet.hops = 1;

        relay().process(&mut packet).unwrap();

        assert_eq!(packet.giaddr, first_relay);
        assert_eq!(packet.hops, 2);
    }

    #[test]
    fn looping_request_is_dropped() {
        let client = Client::new(StepRng::new(0, 1), MAC);

        let mut opt_buf = Options::buf();
        let mut packet = client.discover(&mut opt_buf, 0x42, 0, None);
        packet.hops = 16;

        assert!(relay().process(&mut packet).is_none());
    }

    #[test]
    fn reply_goes_to_the_client_side() {
        let mut opt_buf = Options::buf();
        let request = Packet::new_request(MAC, 0x42, 0, None, Options::discover(None, &mut opt_buf));

        let mut reply_buf = Options::buf();
        let mut reply = request.new_reply(
            Some(Ipv4Addr::new(192, 168, 0, 100)),
            SERVER_IP,
            Options::reply(
                MessageType::Offer,
                SERVER_IP,
                60,
                &[],
                None,
                &[],
                &mut reply_buf,
            ),
        );
        reply.giaddr = RELAY_IP;

        let dest = relay().process(&mut reply).unwrap();

        // The relay is itself the giaddr; the reply leg uses the
        // broadcast/ciaddr rule on the client port
        assert_eq!(dest, SocketAddrV4::new(Ipv4Addr::BROADCAST, CLIENT_PORT));
        assert_eq!(reply.hops, 0);
        assert_eq!(reply.giaddr, RELAY_IP);
    }

    // The relayed exchange end to end, at the packet level: the relay stamps
    // itself in, the server routes the reply back through it, and the relayed
    // reply reaches the client unchanged where it matters
    #[test]
    fn relayed_bind_round_trip() {
        let relay = relay();
        let client = Client::new(StepRng::new(0x42, 1), MAC);
        let mut server: Server<4> = Server::new(
            Ipv4Addr::new(192, 168, 0, 100),
            Ipv4Addr::new(192, 168, 0, 102),
        );
        let server_options = ServerOptions {
            ip: SERVER_IP,
            gateways: &[SERVER_IP],
            subnet: Some(Ipv4Addr::new(255, 255, 255, 0)),
            dns: &[],
            lease_duration: Duration::from_secs(60),
        };

        // Client broadcasts a DISCOVER, the relay forwards it upstream
        let mut opt_buf = Options::buf();
        let mut discover = client.discover(&mut opt_buf, 0x42, 0, None);
        let upstream = relay.process(&mut discover).unwrap();

        assert_eq!(upstream, SocketAddrV4::new(SERVER_IP, SERVER_PORT));
        assert_eq!(discover.hops, 1);

        // The server offers and routes the reply back to the relay
        let mut reply_buf = Options::buf();
        let offer = server
            .handle_request(
                &mut reply_buf,
                &server_options,
                &discover,
                Instant::from_secs(0),
            )
            .unwrap();

        assert_eq!(offer.giaddr, RELAY_IP);
        assert_eq!(
            offer.reply_destination(),
            SocketAddrV4::new(RELAY_IP, SERVER_PORT)
        );

        // The relay hands the offer to the client with the lease intact
        let mut wire = [0; 600];
        let data = offer.encode(&mut wire).unwrap();
        let mut relayed = Packet::decode(data).unwrap();
        let downstream = relay.process(&mut relayed).unwrap();

        assert_eq!(downstream.port(), CLIENT_PORT);
        assert!(client.is_offer(&relayed, 0x42));
        assert_eq!(relayed.yiaddr, Ipv4Addr::new(192, 168, 0, 100));
        assert_eq!(relayed.options.server_identifier(), Some(SERVER_IP));
    }
}
