//! Seam between the session and the console connection

use rcon::RconClient;

pub use rcon::{RconError as TransportError, RconEvent as TransportEvent};

/// Instructions a session gives its connection
///
/// All three are fire-and-forget; outcomes arrive as [`TransportEvent`]s on
/// the receiver handed to the session. Each `send` yields exactly one
/// [`TransportEvent::Response`], in order.
pub trait Transport {
    fn connect(&mut self);
    fn disconnect(&mut self);
    fn send(&mut self, command: &str);
}

impl Transport for RconClient {
    fn connect(&mut self) {
        RconClient::connect(self);
    }

    fn disconnect(&mut self) {
        RconClient::disconnect(self);
    }

    fn send(&mut self, command: &str) {
        RconClient::send(self, command);
    }
}
