//! `fleet-transport`: the TLS listener, framed RPC codec, login gate,
//! per-connection loop, and server accept/shutdown lifecycle (spec §4.4).

pub mod connection;
pub mod listener;
pub mod login;
pub mod server;
pub mod wire;
