pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod heartbeat;
pub mod hosts;
pub mod listener;
pub mod parser;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod unreceive;

pub use codec::{StompCodec, StompItem};
pub use config::Config;
pub use connection::{AckMode, Connection};
pub use error::StompError;
pub use frame::Frame;
pub use hosts::HostSpec;
pub use listener::ConnectionListener;
pub use protocol::Version;
pub use unreceive::UnreceiveOptions;
