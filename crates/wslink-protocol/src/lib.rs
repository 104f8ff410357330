//! wslink-protocol — the stateful half of the wslink engine.
//!
//! `wslink-core` defines what travels on the wire; this crate drives
//! it: reassembling frames into messages, gating them behind the
//! authentication handshake, dispatching RPC requests to registered
//! handlers, and fanning published events out to connections.
//!
//! The transport is a collaborator, not a dependency: anything that
//! can hand binary frames to [`endpoint::WsEndpoint::on_frame`] and
//! drain an outbound channel can carry this protocol.

pub mod auth;
pub mod backend;
pub mod connection;
pub mod endpoint;
pub mod protocol;
pub mod publish;
pub mod registry;
pub mod unchunker;

pub use backend::LoopbackClient;
pub use connection::ClientId;
pub use endpoint::WsEndpoint;
pub use protocol::{LinkProtocol, ServerProtocol, TokenValidator};
pub use publish::PublishManager;
pub use registry::{MethodRegistry, RpcArgs, RpcFault};
pub use unchunker::UnChunker;
