//! NOTE: Run this example with `sudo` (or CAP_NET_BIND_SERVICE) to be able to
//! bind to port 67.

use core::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use dhcp4::io::{self, SERVER_PORT};
use dhcp4::server::{Server, ServerOptions};

use edge_nal::UdpBind;

use embassy_time::Duration;

fn main() -> Result<(), anyhow::Error> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    futures_lite::future::block_on(run())
}

async fn run() -> Result<(), anyhow::Error> {
    let stack = edge_nal_std::Stack::new();

    let mut socket = stack
        .bind(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            SERVER_PORT,
        )))
        .await?;

    let mut buf = [0; 1500];

    let ip = Ipv4Addr::new(192, 168, 0, 1);

    // Hands out 192.168.0.100..=192.168.0.200 for an hour at a time
    let mut server = Server::<64>::new(
        Ipv4Addr::new(192, 168, 0, 100),
        Ipv4Addr::new(192, 168, 0, 200),
    );

    let server_options = ServerOptions {
        ip,
        gateways: &[ip],
        subnet: Some(Ipv4Addr::new(255, 255, 255, 0)),
        dns: &[Ipv4Addr::new(8, 8, 8, 8)],
        lease_duration: Duration::from_secs(3600),
    };

    io::server::run(&mut server, &server_options, &mut socket, &mut buf).await?;

    Ok(())
}
