//! NOTE: Run this example with `sudo` (or CAP_NET_BIND_SERVICE) to be able to
//! bind to port 68.

use core::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use dhcp4::client::Client;
use dhcp4::io::{client::Lease, CLIENT_PORT};

use edge_nal::UdpBind;

use log::info;

fn main() -> Result<(), anyhow::Error> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    futures_lite::future::block_on(run(
        [0x4c, 0xcc, 0x6a, 0xa2, 0x23, 0xf5], // Your MAC addr here; run `ip addr` to see it
    ))
}

async fn run(mac: [u8; 6]) -> Result<(), anyhow::Error> {
    let mut client = Client::new(rand::thread_rng(), mac);

    let stack = edge_nal_std::Stack::new();

    let mut socket = stack
        .bind(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            CLIENT_PORT,
        )))
        .await?;

    let mut buf = [0; 1500];

    loop {
        let (mut lease, info) = Lease::new(&mut client, &mut socket, &mut buf, None).await?;

        info!("Got lease {lease:?} with options {info:?}");

        // Blocks until the lease is lost, then the outer loop rebinds
        lease.keep(&mut client, &mut socket, &mut buf).await?;
    }
}
