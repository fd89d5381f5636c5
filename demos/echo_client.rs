//! A client that sends "Echo!" once a second and prints whatever the peer
//! writes back, until the connection drops.
//!
//! Start the server first:
//!
//!     cargo r --example echo_server
//!
//! And then in another terminal run:
//!
//!     cargo r --example echo_client

use sockmux::net::{self, Connection, Message};
use sockmux::{Result, info};

use std::thread;
use std::time::Duration;

fn main() -> Result<()> {
    net::init();

    let mut client = Connection::create()?;
    client.connect("127.0.0.1", "4200")?;

    let msg = Message::from("Echo!");
    let mut reply = Message::with_capacity(1024)?;

    while client.is_connected() {
        if client.send(&msg).is_err() {
            break;
        }
        info!("sent: {}", msg.payload().escape_ascii());

        if client.receive(&mut reply).is_err() {
            break;
        }
        info!("received: {}", reply.payload().escape_ascii());

        thread::sleep(Duration::from_secs(1));
    }

    client.close()?;
    net::deinit();

    Ok(())
}
