use rand_core::RngCore;

use super::*;

/// The client half of the exchange, without any socket attached.
///
/// The methods here produce request packets and check replies against an
/// ongoing transaction; moving the bytes is left to the io layer or to an
/// embedder's own loop.
///
/// Transaction identifiers are drawn from the owned RNG, one per transaction:
/// a DISCOVER and the REQUEST answering its OFFER share an xid, while every
/// renewal is a new transaction with a fresh xid. Retransmissions reuse the
/// xid of the transaction they retry.
pub struct Client<T> {
    pub rng: T,
    pub mac: [u8; 6],
}

impl<T> Client<T>
where
    T: RngCore,
{
    pub fn new(rng: T, mac: [u8; 6]) -> Self {
        Self { rng, mac }
    }

    /// Draws the identifier for a new transaction.
    pub fn next_xid(&mut self) -> u32 {
        self.rng.next_u32()
    }

    pub fn discover<'o>(
        &self,
        opt_buf: &'o mut [DhcpOption<'o>],
        xid: u32,
        secs: u16,
        requested: Option<Ipv4Addr>,
    ) -> Packet<'o> {
        Packet::new_request(self.mac, xid, secs, None, Options::discover(requested, opt_buf))
    }

    /// The REQUEST answering an OFFER. Carries the offered address and the
    /// chosen server in options 50/54 and keeps the OFFER's xid.
    pub fn request<'o>(
        &self,
        opt_buf: &'o mut [DhcpOption<'o>],
        xid: u32,
        secs: u16,
        server_ip: Ipv4Addr,
        ip: Ipv4Addr,
    ) -> Packet<'o> {
        Packet::new_request(
            self.mac,
            xid,
            secs,
            None,
            Options::request(ip, server_ip, opt_buf),
        )
    }

    /// A renewal (or, with `broadcast`, rebinding) REQUEST: the bound address
    /// travels in `ciaddr` and options 50/54 are omitted.
    pub fn renew<'o>(
        &self,
        opt_buf: &'o mut [DhcpOption<'o>],
        xid: u32,
        secs: u16,
        ip: Ipv4Addr,
        broadcast: bool,
    ) -> Packet<'o> {
        let mut request =
            Packet::new_request(self.mac, xid, secs, Some(ip), Options::renew(opt_buf));

        request.broadcast = broadcast;

        request
    }

    pub fn release<'o>(
        &self,
        opt_buf: &'o mut [DhcpOption<'o>],
        xid: u32,
        ip: Ipv4Addr,
    ) -> Packet<'o> {
        Packet::new_request(self.mac, xid, 0, Some(ip), Options::release(opt_buf))
    }

    pub fn is_offer(&self, reply: &Packet<'_>, xid: u32) -> bool {
        self.is_reply_for_us(reply, xid, Some(&[MessageType::Offer]))
    }

    pub fn is_ack(&self, reply: &Packet<'_>, xid: u32) -> bool {
        self.is_reply_for_us(reply, xid, Some(&[MessageType::Ack]))
    }

    pub fn is_nak(&self, reply: &Packet<'_>, xid: u32) -> bool {
        self.is_reply_for_us(reply, xid, Some(&[MessageType::Nak]))
    }

    pub fn is_reply_for_us(
        &self,
        reply: &Packet<'_>,
        xid: u32,
        expected_message_types: Option<&[MessageType]>,
    ) -> bool {
        if reply.is_for_us(&self.mac, xid) {
            if let Some(expected_message_types) = expected_message_types {
                let mt = reply.options.message_type();

                expected_message_types.iter().any(|emt| mt == Some(*emt))
            } else {
                true
            }
        } else {
            false
        }
    }
}
