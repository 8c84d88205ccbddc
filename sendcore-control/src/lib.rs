//! Control protocol for managing a running Sendcore delivery platform instance
//!
//! This module provides an IPC mechanism using Unix domain sockets to:
//! - Manage DNS cache (list, clear, refresh, set overrides)
//! - Query queue statistics
//! - Check system health
//!
//! The protocol uses bincode for efficient serialization.

pub mod auth;
pub mod client;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod server;

pub use auth::ControlAuthConfig;
pub use client::ControlClient;
pub use error::{ControlError, Result};
pub use handler::SendcoreCommandHandler;
pub use protocol::{
    CachedMailServer, DnsCommand, DomainReputationInfo, PROTOCOL_VERSION, QueueCommand,
    QueueMessage, QueueMessageDetails, QueueStats, ReputationCommand, Request, RequestCommand,
    Response, ResponseData, ResponsePayload, SystemCommand, SystemStatus, TenantCommand,
    TenantInfo,
};
pub use server::ControlServer;

/// Default path for the control socket
pub const DEFAULT_CONTROL_SOCKET: &str = "/tmp/sendcore.sock";
