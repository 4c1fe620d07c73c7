//! Pure Rust async implementation of the [Source Server Query Protocol](https://developer.valvesoftware.com/wiki/Server_queries):
//! A2S_INFO, A2S_PLAYER and A2S_RULES over UDP or TCP.
pub mod error;
pub mod info;
pub mod packet;
pub mod parse;
pub mod players;
pub mod query;
pub mod rules;
pub mod transport;

pub use error::SourceQueryError;
pub use info::ServerInfo;
pub use players::PlayersInfo;
pub use query::{QueryResult, SourceQuery};
pub use rules::RulesInfo;
pub use transport::{ClientConfig, TransportClient, TransportProtocol};
