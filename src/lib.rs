//! tablecast - LAN Blackjack tables
//!
//! Servers announce themselves with UDP offers; players find them, connect
//! over TCP and play rounds of Blackjack using a small framed protocol.

pub mod config;
pub mod discovery;
pub mod game;
pub mod network;
pub mod protocol;
