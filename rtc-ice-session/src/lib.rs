#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod agent;
pub mod candidate;
pub mod component;
pub mod error;
pub mod manager;
pub mod network_interface;
pub mod rand;
pub mod session;
pub mod state;
pub mod stream;
pub mod stun;
pub mod transport;

pub use agent::{IceAgent, SessionListener};
pub use error::{Error, Result};
pub use manager::IceManager;
pub use session::session_config::{RelayInfo, SessionConfig, StunServerInfo};
pub use session::{IceSession, SessionEvent};
