//! Error types.
//!
//! `RouteTableError` describes what went wrong talking to a routing table
//! backend. `IpamError` is what callers of the selector see: it says which
//! step of the claim protocol failed and is never used for contention, which
//! is an ordinary outcome of an attempt.

use std::net::IpAddr;

use ipnet::IpNet;

/// Failures raised by a [`RouteTable`](crate::route::RouteTable) backend
#[derive(Debug, thiserror::Error)]
pub enum RouteTableError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("could not parse output of `{command}`: {source}")]
    Parse {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown link: {0}")]
    UnknownLink(String),

    #[error("route not found: {0}")]
    NoSuchRoute(IpNet),

    #[error("route already exists: {0}")]
    RouteExists(IpNet),

    #[error("network is unreachable: {0}")]
    Unreachable(IpAddr),
}

/// Errors surfaced by address selection and release
#[derive(Debug, thiserror::Error)]
pub enum IpamError {
    /// Malformed subnet text, a requested address outside the subnet, or
    /// exclusion bounds that leave no usable address
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no directly attached interface found for {0}")]
    LinkNotFound(IpAddr),

    #[error("routing table query failed")]
    KernelQuery {
        #[source]
        source: RouteTableError,
    },

    #[error("failed to install host route {route}")]
    RouteInstall {
        route: IpNet,
        #[source]
        source: RouteTableError,
    },

    #[error("failed to remove host route {route}")]
    RouteRemove {
        route: IpNet,
        #[source]
        source: RouteTableError,
    },
}

impl IpamError {
    pub(crate) fn query(source: RouteTableError) -> Self {
        IpamError::KernelQuery { source }
    }
}
