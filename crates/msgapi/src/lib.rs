//! Websocket message protocol for IoT sensor devices and viewer sessions.
//!
//! Devices connect with the `v2.device.msg` subprotocol, prove knowledge of
//! a pre-shared key, then stream measurements and sensor changes. Viewers
//! connect with `v5.user.msg` to query values and receive pushed updates.
//!
//! # Crate Structure
//!
//! - [`transport`]: message transport abstraction (websocket, in-memory)
//! - [`envelope`]: wire envelopes, error values and command argument shapes
//! - [`server`]: negotiation, device authentication and command dispatch

/// Re-export transport types.
pub mod transport {
    pub use msgapi_transport::*;
}

/// Re-export envelope types.
pub mod envelope {
    pub use msgapi_envelope::*;
}

/// Re-export server types.
pub mod server {
    pub use msgapi_server::*;
}
