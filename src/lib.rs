#![cfg_attr(not(feature = "std"), no_std)]

use core::fmt;
use core::net::{Ipv4Addr, SocketAddrV4};
use core::str::Utf8Error;

use num_enum::TryFromPrimitive;

pub mod client;
pub mod relay;
pub mod server;

#[cfg(feature = "io")]
pub mod io;

/// UDP port servers listen on. Relays address their upstream leg to this
/// port, and replies routed via a relay go back to it as well.
pub const SERVER_PORT: u16 = 67;
/// UDP port clients listen on for OFFER/ACK/NAK replies.
pub const CLIENT_PORT: u16 = 68;

#[derive(Debug)]
pub enum Error {
    /// The datagram ended in the middle of a field or option.
    Truncated,
    /// The output buffer cannot hold the encoded packet.
    NoSpace,
    /// Option 53 carried a value outside the known message types.
    UnknownMessageType(u8),
    /// An option's payload does not have the size its type dictates.
    BadOptionLength(u8),
    /// A text option holds bytes that are not UTF-8.
    BadUtf8(Utf8Error),
    /// The magic cookie in front of the option stream is wrong.
    BadCookie,
    /// The hardware address length is not the Ethernet one.
    BadHwLength(u8),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "Datagram ends mid-field"),
            Self::NoSpace => write!(f, "Out of buffer space"),
            Self::UnknownMessageType(value) => write!(f, "Unknown message type {value}"),
            Self::BadOptionLength(code) => write!(f, "Mis-sized payload for option {code}"),
            Self::BadUtf8(err) => write!(f, "Invalid UTF-8: {err}"),
            Self::BadCookie => write!(f, "Magic cookie missing or damaged"),
            Self::BadHwLength(value) => {
                write!(f, "Unsupported hardware address length {value}")
            }
        }
    }
}

impl core::error::Error for Error {}

/// The payload of option 53: which step of the exchange a packet carries.
///
/// The numeric values come from RFC 2132 section 9.6; RFC 2131 describes how
/// the steps fit together.
#[derive(Copy, Clone, PartialEq, Eq, Debug, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessageType {
    /// Client looking for servers.
    Discover = 1,

    /// Server proposing an address to a client.
    Offer = 2,

    /// Client asking for the offered address, or for a lease extension.
    Request = 3,

    /// Client reporting that the offered address is already in use.
    Decline = 4,

    /// Server committing the address and configuration to the client.
    Ack = 5,

    /// Server refusing the client's notion of its address.
    Nak = 6,

    /// Client handing an address back before its lease runs out.
    Release = 7,

    /// Client with an externally configured address asking only for
    /// configuration.
    Inform = 8,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discover => "DISCOVER",
            Self::Offer => "OFFER",
            Self::Request => "REQUEST",
            Self::Decline => "DECLINE",
            Self::Ack => "ACK",
            Self::Nak => "NAK",
            Self::Release => "RELEASE",
            Self::Inform => "INFORM",
        };

        write!(f, "{name}")
    }
}

/// DHCP Packet Structure
///
/// The fixed BOOTP header is modeled as plain fields; `sname` and `file` are
/// carried verbatim so that forwarding a decoded packet (as the relay does)
/// leaves them untouched.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Packet<'a> {
    pub reply: bool,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub broadcast: bool,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
    pub options: Options<'a>,
}

impl<'a> Packet<'a> {
    const COOKIE: [u8; 4] = [99, 130, 83, 99];

    const BOOT_REQUEST: u8 = 1; // From Client
    const BOOT_REPLY: u8 = 2; // From Server

    const HTYPE_ETHERNET: u8 = 1;
    const HLEN_ETHERNET: u8 = 6;

    // Bit 15 of the `flags` word; the only flag RFC 2131 defines
    const BROADCAST_FLAG: u16 = 0x8000;

    // The BOOTP minimum datagram size; encoding zero-fills up to it
    const MIN_LEN: usize = 300;

    pub fn new_request(
        mac: [u8; 6],
        xid: u32,
        secs: u16,
        our_ip: Option<Ipv4Addr>,
        options: Options<'a>,
    ) -> Self {
        let mut chaddr = [0; 16];
        chaddr[..6].copy_from_slice(&mac);

        Self {
            reply: false,
            hops: 0,
            xid,
            secs,
            // Without an address of our own, replies have to be broadcast
            broadcast: our_ip.is_none(),
            ciaddr: our_ip.unwrap_or(Ipv4Addr::UNSPECIFIED),
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            sname: [0; 64],
            file: [0; 128],
            options,
        }
    }

    /// Creates the reply skeleton for this request: `op` flipped, `xid`,
    /// `chaddr`, `giaddr` and the broadcast flag carried over, `siaddr`
    /// stamped with the replying server and `secs` reset.
    pub fn new_reply<'b>(
        &self,
        ip: Option<Ipv4Addr>,
        server_ip: Ipv4Addr,
        options: Options<'b>,
    ) -> Packet<'b> {
        Packet {
            reply: true,
            hops: 0,
            xid: self.xid,
            secs: 0,
            broadcast: self.broadcast,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: ip.unwrap_or(Ipv4Addr::UNSPECIFIED),
            siaddr: server_ip,
            giaddr: self.giaddr,
            chaddr: self.chaddr,
            sname: [0; 64],
            file: [0; 128],
            options,
        }
    }

    pub fn is_for_us(&self, mac: &[u8; 6], xid: u32) -> bool {
        self.reply
            && self.xid == xid
            && self.chaddr[..6] == *mac
            && self.chaddr[6..].iter().all(|&byte| byte == 0)
    }

    /// Where a reply carrying this packet's routing fields should be sent:
    /// a relay (`giaddr`) takes precedence, then the broadcast/`ciaddr` rule.
    pub fn reply_destination(&self) -> SocketAddrV4 {
        if !self.giaddr.is_unspecified() {
            SocketAddrV4::new(self.giaddr, SERVER_PORT)
        } else {
            self.client_destination()
        }
    }

    /// The client-facing leg of the reply routing rule, ignoring `giaddr`.
    /// Used by relays, which are themselves the `giaddr`.
    pub fn client_destination(&self) -> SocketAddrV4 {
        if self.broadcast || self.ciaddr.is_unspecified() {
            SocketAddrV4::new(Ipv4Addr::BROADCAST, CLIENT_PORT)
        } else {
            SocketAddrV4::new(self.ciaddr, CLIENT_PORT)
        }
    }

    pub fn settings(&self) -> Option<(MessageType, Settings)> {
        if self.reply {
            self.options.message_type().map(|mt| (mt, self.into()))
        } else {
            None
        }
    }

    /// Parses the packet from a byte slice
    pub fn decode(data: &'a [u8]) -> Result<Self, Error> {
        let mut r = Reader::new(data);

        let op = r.u8()?;
        let _htype = r.u8()?;
        let hlen = r.u8()?;
        let hops = r.u8()?;

        if hlen != Self::HLEN_ETHERNET {
            return Err(Error::BadHwLength(hlen));
        }

        let xid = r.u32()?;
        let secs = r.u16()?;
        let flags = r.u16()?;
        let ciaddr = r.addr()?;
        let yiaddr = r.addr()?;
        let siaddr = r.addr()?;
        let giaddr = r.addr()?;
        let chaddr = r.chunk()?;
        let sname = r.chunk()?;
        let file = r.chunk()?;

        if r.chunk::<4>()? != Self::COOKIE {
            return Err(Error::BadCookie);
        }

        Ok(Self {
            reply: op == Self::BOOT_REPLY,
            hops,
            xid,
            secs,
            broadcast: flags & Self::BROADCAST_FLAG != 0,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            sname,
            file,
            options: Options::validated(r.rest())?,
        })
    }

    /// Encodes the packet into the provided buf slice
    pub fn encode<'o>(&self, buf: &'o mut [u8]) -> Result<&'o [u8], Error> {
        let mut w = Writer::new(buf);

        w.put_u8(if self.reply {
            Self::BOOT_REPLY
        } else {
            Self::BOOT_REQUEST
        })?;
        w.put_u8(Self::HTYPE_ETHERNET)?;
        w.put_u8(Self::HLEN_ETHERNET)?;
        w.put_u8(self.hops)?;
        w.put_u32(self.xid)?;
        w.put_u16(self.secs)?;
        w.put_u16(if self.broadcast {
            Self::BROADCAST_FLAG
        } else {
            0
        })?;
        w.put_addr(self.ciaddr)?;
        w.put_addr(self.yiaddr)?;
        w.put_addr(self.siaddr)?;
        w.put_addr(self.giaddr)?;
        w.put(&self.chaddr)?;
        w.put(&self.sname)?;
        w.put(&self.file)?;
        w.put(&Self::COOKIE)?;

        self.options.write(&mut w)?;
        w.put_u8(OPT_END)?;
        w.fill_zero_to(Self::MIN_LEN)?;

        let len = w.written;

        Ok(&buf[..len])
    }
}

/// The network configuration carried by a server reply, in owned form.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Settings {
    pub ip: Ipv4Addr,
    pub server_ip: Option<Ipv4Addr>,
    pub lease_time_secs: Option<u32>,
    pub gateway: Option<Ipv4Addr>,
    pub subnet: Option<Ipv4Addr>,
    pub dns1: Option<Ipv4Addr>,
    pub dns2: Option<Ipv4Addr>,
}

impl From<&Packet<'_>> for Settings {
    fn from(packet: &Packet) -> Self {
        let options = &packet.options;
        let dns = options.dns_servers();

        Self {
            ip: packet.yiaddr,
            // Servers that omit option 54 still identify themselves in siaddr
            server_ip: options
                .server_identifier()
                .or((!packet.siaddr.is_unspecified()).then_some(packet.siaddr)),
            lease_time_secs: options.lease_time_secs(),
            gateway: options.routers().and_then(|list| list.iter().next()),
            subnet: options.subnet_mask(),
            dns1: dns.and_then(|list| list.iter().next()),
            dns2: dns.and_then(|list| list.iter().nth(1)),
        }
    }
}

/// The option block of one packet.
///
/// Holds either a validated region of a received datagram, or a slice of
/// variants being assembled for sending; iteration and the accessors below
/// make the two look the same.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Options<'a>(OptionsRepr<'a>);

#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum OptionsRepr<'a> {
    Wire(&'a [u8]),
    Built(&'a [DhcpOption<'a>]),
}

// Options compare by content, no matter which representation they sit in
impl PartialEq for Options<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for Options<'_> {}

impl<'a> Options<'a> {
    const REQUEST_PARAMS: &'static [u8] = &[OPT_SUBNET_MASK, OPT_ROUTER, OPT_DNS];

    pub const fn new(options: &'a [DhcpOption<'a>]) -> Self {
        Self(OptionsRepr::Built(options))
    }

    /// Scratch storage for assembling an option set; eight slots covers the
    /// largest set this crate produces.
    pub const fn buf() -> [DhcpOption<'a>; 8] {
        [DhcpOption::ParameterRequestList(&[]); 8]
    }

    /// Checks a raw option stream once, up front, so that iterating over it
    /// later cannot fail.
    fn validated(data: &'a [u8]) -> Result<Self, Error> {
        let mut reader = Reader::new(data);

        loop {
            if DhcpOption::read(&mut reader)?.is_none() {
                break;
            }
        }

        Ok(Self(OptionsRepr::Wire(data)))
    }

    pub fn discover(requested_ip: Option<Ipv4Addr>, buf: &'a mut [DhcpOption<'a>]) -> Self {
        buf[0] = DhcpOption::MessageType(MessageType::Discover);

        let mut used = 1;

        if let Some(ip) = requested_ip {
            buf[used] = DhcpOption::RequestedIpAddress(ip);
            used += 1;
        }

        Self::new(&buf[..used])
    }

    /// The option set of a REQUEST answering an OFFER: the offered address
    /// and the chosen server, so that all other servers stand down.
    pub fn request(ip: Ipv4Addr, server_ip: Ipv4Addr, buf: &'a mut [DhcpOption<'a>]) -> Self {
        buf[0] = DhcpOption::MessageType(MessageType::Request);
        buf[1] = DhcpOption::RequestedIpAddress(ip);
        buf[2] = DhcpOption::ServerIdentifier(server_ip);
        buf[3] = DhcpOption::ParameterRequestList(Self::REQUEST_PARAMS);

        Self::new(&buf[..4])
    }

    /// The option set of a renewal REQUEST. The address being extended
    /// travels in `ciaddr`, not in options 50/54.
    pub fn renew(buf: &'a mut [DhcpOption<'a>]) -> Self {
        buf[0] = DhcpOption::MessageType(MessageType::Request);

        Self::new(&buf[..1])
    }

    pub fn release(buf: &'a mut [DhcpOption<'a>]) -> Self {
        buf[0] = DhcpOption::MessageType(MessageType::Release);

        Self::new(&buf[..1])
    }

    /// The option set of a server reply.
    ///
    /// OFFER and ACK always carry the lease time and the full network
    /// configuration; NAK carries only the message type and the server
    /// identifier. Each tag is emitted at most once.
    pub fn reply(
        mt: MessageType,
        server_ip: Ipv4Addr,
        lease_duration_secs: u32,
        gateways: &'a [Ipv4Addr],
        subnet: Option<Ipv4Addr>,
        dns: &'a [Ipv4Addr],
        buf: &'a mut [DhcpOption<'a>],
    ) -> Self {
        buf[0] = DhcpOption::MessageType(mt);
        buf[1] = DhcpOption::ServerIdentifier(server_ip);

        let mut used = 2;

        if !matches!(mt, MessageType::Nak) {
            buf[used] = DhcpOption::IpAddressLeaseTime(lease_duration_secs);
            used += 1;

            if let Some(subnet) = subnet {
                buf[used] = DhcpOption::SubnetMask(subnet);
                used += 1;
            }

            if !gateways.is_empty() {
                buf[used] = DhcpOption::Router(Ipv4Addrs::new(gateways));
                used += 1;
            }

            if !dns.is_empty() {
                buf[used] = DhcpOption::DomainNameServer(Ipv4Addrs::new(dns));
                used += 1;
            }
        }

        Self::new(&buf[..used])
    }

    pub fn iter(&self) -> impl Iterator<Item = DhcpOption<'a>> + 'a {
        enum Cursor<'a> {
            Wire(Reader<'a>),
            Built(&'a [DhcpOption<'a>], usize),
        }

        let mut cursor = match self.0 {
            OptionsRepr::Wire(data) => Cursor::Wire(Reader::new(data)),
            OptionsRepr::Built(options) => Cursor::Built(options, 0),
        };

        core::iter::from_fn(move || match &mut cursor {
            Cursor::Wire(reader) => match DhcpOption::read(reader) {
                Ok(Some(option)) => Some(option),
                // The stream was checked at decode time, so this is the
                // terminator; drop whatever padding trails it
                _ => {
                    reader.rest();
                    None
                }
            },
            Cursor::Built(options, index) => {
                let option = *options.get(*index)?;
                *index += 1;

                Some(option)
            }
        })
    }

    fn write(&self, w: &mut Writer<'_>) -> Result<(), Error> {
        for option in self.iter() {
            option.write(w)?;
        }

        Ok(())
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.iter().find_map(|option| match option {
            DhcpOption::MessageType(mt) => Some(mt),
            _ => None,
        })
    }

    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.iter().find_map(|option| match option {
            DhcpOption::RequestedIpAddress(ip) => Some(ip),
            _ => None,
        })
    }

    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        self.iter().find_map(|option| match option {
            DhcpOption::ServerIdentifier(ip) => Some(ip),
            _ => None,
        })
    }

    pub fn lease_time_secs(&self) -> Option<u32> {
        self.iter().find_map(|option| match option {
            DhcpOption::IpAddressLeaseTime(secs) => Some(secs),
            _ => None,
        })
    }

    pub fn subnet_mask(&self) -> Option<Ipv4Addr> {
        self.iter().find_map(|option| match option {
            DhcpOption::SubnetMask(mask) => Some(mask),
            _ => None,
        })
    }

    pub fn routers(&self) -> Option<Ipv4Addrs<'a>> {
        self.iter().find_map(|option| match option {
            DhcpOption::Router(list) => Some(list),
            _ => None,
        })
    }

    pub fn dns_servers(&self) -> Option<Ipv4Addrs<'a>> {
        self.iter().find_map(|option| match option {
            DhcpOption::DomainNameServer(list) => Some(list),
            _ => None,
        })
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DhcpOption<'a> {
    MessageType(MessageType),
    ServerIdentifier(Ipv4Addr),
    ParameterRequestList(&'a [u8]),
    RequestedIpAddress(Ipv4Addr),
    HostName(&'a str),
    Router(Ipv4Addrs<'a>),
    DomainNameServer(Ipv4Addrs<'a>),
    IpAddressLeaseTime(u32),
    SubnetMask(Ipv4Addr),
    Message(&'a str),
    ClientIdentifier(&'a [u8]),
    Unrecognized(u8, &'a [u8]),
}

impl<'a> DhcpOption<'a> {
    /// Reads the next option off the stream: `Ok(None)` at the terminator,
    /// with pad bytes stepped over.
    fn read(reader: &mut Reader<'a>) -> Result<Option<Self>, Error> {
        loop {
            match reader.u8()? {
                OPT_END => return Ok(None),
                OPT_PAD => (),
                code => {
                    let len = reader.u8()? as usize;
                    let payload = reader.take(len)?;

                    return Self::parse(code, payload).map(Some);
                }
            }
        }
    }

    fn parse(code: u8, payload: &'a [u8]) -> Result<Self, Error> {
        let option = match code {
            OPT_MESSAGE_TYPE => {
                let value = single(code, payload)?;

                Self::MessageType(
                    MessageType::try_from(value).map_err(|_| Error::UnknownMessageType(value))?,
                )
            }
            OPT_SUBNET_MASK => Self::SubnetMask(addr4(code, payload)?),
            OPT_ROUTER => Self::Router(Ipv4Addrs::from_wire(payload)),
            OPT_DNS => Self::DomainNameServer(Ipv4Addrs::from_wire(payload)),
            OPT_HOST_NAME => Self::HostName(text(payload)?),
            OPT_REQUESTED_IP => Self::RequestedIpAddress(addr4(code, payload)?),
            OPT_LEASE_TIME => Self::IpAddressLeaseTime(u32::from_be_bytes(exact(code, payload)?)),
            OPT_SERVER_ID => Self::ServerIdentifier(addr4(code, payload)?),
            OPT_PARAM_REQUEST_LIST => Self::ParameterRequestList(payload),
            OPT_MESSAGE => Self::Message(text(payload)?),
            OPT_CLIENT_ID => Self::ClientIdentifier(payload),
            other => Self::Unrecognized(other, payload),
        };

        Ok(option)
    }

    fn write(&self, w: &mut Writer<'_>) -> Result<(), Error> {
        w.put_u8(self.code())?;

        match *self {
            Self::MessageType(mt) => w.put_payload(&[mt as u8]),
            Self::ServerIdentifier(addr)
            | Self::RequestedIpAddress(addr)
            | Self::SubnetMask(addr) => w.put_payload(&addr.octets()),
            Self::ParameterRequestList(list) => w.put_payload(list),
            Self::HostName(s) | Self::Message(s) => w.put_payload(s.as_bytes()),
            Self::Router(addrs) | Self::DomainNameServer(addrs) => {
                let count = addrs.iter().count().min(8);

                w.put_u8((count * 4) as u8)?;

                for addr in addrs.iter().take(count) {
                    w.put_addr(addr)?;
                }

                Ok(())
            }
            Self::IpAddressLeaseTime(secs) => w.put_payload(&secs.to_be_bytes()),
            Self::ClientIdentifier(id) => w.put_payload(id),
            Self::Unrecognized(_, payload) => w.put_payload(payload),
        }
    }

    pub const fn code(&self) -> u8 {
        match self {
            Self::MessageType(_) => OPT_MESSAGE_TYPE,
            Self::ServerIdentifier(_) => OPT_SERVER_ID,
            Self::ParameterRequestList(_) => OPT_PARAM_REQUEST_LIST,
            Self::RequestedIpAddress(_) => OPT_REQUESTED_IP,
            Self::HostName(_) => OPT_HOST_NAME,
            Self::Router(_) => OPT_ROUTER,
            Self::DomainNameServer(_) => OPT_DNS,
            Self::IpAddressLeaseTime(_) => OPT_LEASE_TIME,
            Self::SubnetMask(_) => OPT_SUBNET_MASK,
            Self::Message(_) => OPT_MESSAGE,
            Self::ClientIdentifier(_) => OPT_CLIENT_ID,
            Self::Unrecognized(code, _) => *code,
        }
    }
}

/// A list of IPv4 addresses inside an option, in either representation.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ipv4Addrs<'a>(AddrsRepr<'a>);

#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum AddrsRepr<'a> {
    Wire(&'a [u8]),
    Built(&'a [Ipv4Addr]),
}

// Address lists compare by content as well
impl PartialEq for Ipv4Addrs<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for Ipv4Addrs<'_> {}

impl<'a> Ipv4Addrs<'a> {
    pub const fn new(addrs: &'a [Ipv4Addr]) -> Self {
        Self(AddrsRepr::Built(addrs))
    }

    const fn from_wire(payload: &'a [u8]) -> Self {
        Self(AddrsRepr::Wire(payload))
    }

    pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> + 'a {
        let repr = self.0;
        let mut index = 0;

        core::iter::from_fn(move || {
            let addr = match repr {
                AddrsRepr::Wire(data) => {
                    let octets = data.get(index * 4..index * 4 + 4)?;

                    Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3])
                }
                AddrsRepr::Built(addrs) => *addrs.get(index)?,
            };

            index += 1;

            Some(addr)
        })
    }
}

/// Reads wire fields off the front of a byte slice, shrinking it as it goes.
struct Reader<'a>(&'a [u8]);

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self(data)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if self.0.len() < len {
            return Err(Error::Truncated);
        }

        let (head, tail) = self.0.split_at(len);
        self.0 = tail;

        Ok(head)
    }

    fn chunk<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let mut chunk = [0; N];
        chunk.copy_from_slice(self.take(N)?);

        Ok(chunk)
    }

    fn u8(&mut self) -> Result<u8, Error> {
        self.chunk::<1>().map(|[value]| value)
    }

    fn u16(&mut self) -> Result<u16, Error> {
        self.chunk().map(u16::from_be_bytes)
    }

    fn u32(&mut self) -> Result<u32, Error> {
        self.chunk().map(u32::from_be_bytes)
    }

    fn addr(&mut self) -> Result<Ipv4Addr, Error> {
        self.chunk().map(Ipv4Addr::from)
    }

    /// Hands out whatever is left and leaves the reader empty.
    fn rest(&mut self) -> &'a [u8] {
        core::mem::take(&mut self.0)
    }
}

/// Appends wire fields to a byte slice, tracking how much has been written.
struct Writer<'a> {
    free: &'a mut [u8],
    written: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self {
            free: buf,
            written: 0,
        }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if self.free.len() < bytes.len() {
            return Err(Error::NoSpace);
        }

        let free = core::mem::take(&mut self.free);
        let (head, tail) = free.split_at_mut(bytes.len());

        head.copy_from_slice(bytes);
        self.free = tail;
        self.written += bytes.len();

        Ok(())
    }

    fn put_u8(&mut self, value: u8) -> Result<(), Error> {
        self.put(&[value])
    }

    fn put_u16(&mut self, value: u16) -> Result<(), Error> {
        self.put(&value.to_be_bytes())
    }

    fn put_u32(&mut self, value: u32) -> Result<(), Error> {
        self.put(&value.to_be_bytes())
    }

    fn put_addr(&mut self, addr: Ipv4Addr) -> Result<(), Error> {
        self.put(&addr.octets())
    }

    /// Writes an option payload preceded by its length octet.
    fn put_payload(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.put_u8(payload.len() as u8)?;
        self.put(payload)
    }

    fn fill_zero_to(&mut self, target: usize) -> Result<(), Error> {
        while self.written < target {
            self.put_u8(0)?;
        }

        Ok(())
    }
}

fn exact<const N: usize>(code: u8, payload: &[u8]) -> Result<[u8; N], Error> {
    payload.try_into().map_err(|_| Error::BadOptionLength(code))
}

fn addr4(code: u8, payload: &[u8]) -> Result<Ipv4Addr, Error> {
    exact::<4>(code, payload).map(Ipv4Addr::from)
}

fn single(code: u8, payload: &[u8]) -> Result<u8, Error> {
    exact::<1>(code, payload).map(|[value]| value)
}

fn text(payload: &[u8]) -> Result<&str, Error> {
    core::str::from_utf8(payload).map_err(Error::BadUtf8)
}

// Option stream framing
const OPT_PAD: u8 = 0;
const OPT_END: u8 = 255;

// Option codes from RFC 2132
const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_DNS: u8 = 6;
const OPT_HOST_NAME: u8 = 12;
const OPT_REQUESTED_IP: u8 = 50;
const OPT_LEASE_TIME: u8 = 51;
const OPT_MESSAGE_TYPE: u8 = 53;
const OPT_SERVER_ID: u8 = 54;
const OPT_PARAM_REQUEST_LIST: u8 = 55;
const OPT_MESSAGE: u8 = 56;
const OPT_CLIENT_ID: u8 = 61;
