// Core modules for the respwire client
pub mod protocol; // Framer: command encoding + incremental reply parsing
pub mod connection; // Connection: socket + read buffer + parse-driven read loop
pub mod config; // ClientConfig defaults and environment overlay
pub mod error; // ClientError / FrameError

// Re-export all public items from modules for easier access
pub use protocol::*;
pub use connection::*;
pub use config::*;
pub use error::*;

// Default server host and the conventional RESP port
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;
