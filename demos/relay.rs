//! NOTE: Run this example with `sudo` (or CAP_NET_BIND_SERVICE) to be able to
//! bind to port 67. The relay should listen on the LAN-facing interface,
//! with the DHCP server reachable on another network.

use core::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use dhcp4::io::{self, SERVER_PORT};
use dhcp4::relay::Relay;

use edge_nal::UdpBind;

fn main() -> Result<(), anyhow::Error> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    futures_lite::future::block_on(run(
        Ipv4Addr::new(192, 168, 0, 1), // The upstream DHCP server
        Ipv4Addr::new(192, 168, 0, 2), // This relay's own address, stamped into giaddr
    ))
}

async fn run(server: Ipv4Addr, ip: Ipv4Addr) -> Result<(), anyhow::Error> {
    let stack = edge_nal_std::Stack::new();

    let mut socket = stack
        .bind(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            SERVER_PORT,
        )))
        .await?;

    let relay = Relay::new(server, ip);

    let mut buf = [0; 1500];
    let mut out_buf = [0; 1500];

    io::relay::run(&relay, &mut socket, &mut buf, &mut out_buf).await?;

    Ok(())
}
