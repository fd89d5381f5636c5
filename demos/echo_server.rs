//! An echo server that logs every connect and disconnect and writes each
//! received payload back to its sender.
//!
//! Run it with:
//!
//!     cargo r --example echo_server
//!
//! And then in another terminal run the matching client:
//!
//!     cargo r --example echo_client
//!
//! Set `SOCKMUX_LOG=debug` to trace slot allocation.

use sockmux::net::{self, Hooks, Message, Server};
use sockmux::{Error, Result, error, info};

fn main() -> Result<()> {
    net::init();

    let hooks = Hooks::new()
        .on_connect(|client| {
            info!("client connected with IP: {}", client.peer_ip());
            true
        })
        .on_disconnect(|client| {
            info!("client disconnected with IP: {}", client.peer_ip());
            true
        })
        .on_client_data(|_peers, client| {
            let Ok(mut msg) = Message::with_capacity(256) else {
                return false;
            };

            match client.receive(&mut msg) {
                Ok(0) => true,
                Ok(nbytes) => {
                    info!(
                        "read {nbytes} bytes from {}: {}",
                        client.peer_ip(),
                        String::from_utf8_lossy(msg.payload()).escape_debug()
                    );
                    client.send(&msg).is_ok()
                }
                Err(Error::PeerClosed) => false,
                Err(err) => {
                    error!("receive failed: {err}");
                    false
                }
            }
        });

    let mut server = Server::create(hooks)?;
    if let Err(err) = server.listen("127.0.0.1", "4200") {
        error!("failed to bind port 4200: {err}");
        return Err(err);
    }

    info!("echo server started on {}", server.local_addr()?);

    while server.is_listening() {
        server.run()?;
    }

    server.close()?;
    net::deinit();

    Ok(())
}
