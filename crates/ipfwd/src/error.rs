// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for forwarding-state operations.
//!
//! Store- and FIB-level operations return [`Error`] to their immediate
//! caller (a control handler); handlers translate into a protocol-level
//! [`Status`] at the dispatch boundary. Dataplane read paths never return
//! errors: a failed lookup is `None`, handled by the caller's drop path.

use crate::types::PortId;
use std::fmt;
use std::net::Ipv4Addr;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by forwarding-state operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Lookup or delete target is absent.
    NotFound,
    /// Duplicate creation attempted where upsert is not intended.
    Exists,
    /// Prefix length > 32, or the prefix has set bits beyond its length.
    InvalidPrefix { prefix: Ipv4Addr, prefixlen: u8 },
    /// Port identifier is not configured in the port table.
    InvalidPort(PortId),
    /// Malformed or unusable request input, with the precise reason.
    InvalidInput(String),
    /// A fixed-size table is exhausted (worker slots, hash buckets).
    ResourceLimit(&'static str),
    /// Internal invariant violation. Programming-error class: asserts in
    /// debug builds, logged and rejected in release builds.
    Inconsistent(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound => write!(f, "not found"),
            Error::Exists => write!(f, "already exists"),
            Error::InvalidPrefix { prefix, prefixlen } => {
                write!(
                    f,
                    "invalid prefix {}/{}: length > 32 or host bits set",
                    prefix, prefixlen
                )
            }
            Error::InvalidPort(id) => write!(f, "unknown port {}", id),
            Error::InvalidInput(reason) => write!(f, "invalid input: {}", reason),
            Error::ResourceLimit(what) => write!(f, "resource limit exceeded: {}", what),
            Error::Inconsistent(what) => write!(f, "internal inconsistency: {}", what),
        }
    }
}

impl std::error::Error for Error {}

/// Protocol-level status code crossing the dispatch boundary.
///
/// The wire encoding of requests is out of scope here; handlers return
/// `Result<Response, Status>` and the embedding API layer maps `Status`
/// onto its transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Status {
    NotFound = 1,
    Exists = 2,
    InvalidInput = 3,
    ResourceLimit = 4,
    Inconsistent = 5,
    /// No handler registered for the request opcode.
    UnknownOpcode = 6,
}

impl From<&Error> for Status {
    fn from(err: &Error) -> Self {
        match err {
            Error::NotFound => Status::NotFound,
            Error::Exists => Status::Exists,
            Error::InvalidPrefix { .. } | Error::InvalidPort(_) | Error::InvalidInput(_) => {
                Status::InvalidInput
            }
            Error::ResourceLimit(_) => Status::ResourceLimit,
            Error::Inconsistent(_) => Status::Inconsistent,
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        Status::from(&err)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::NotFound => "NOT_FOUND",
            Status::Exists => "EXISTS",
            Status::InvalidInput => "INVALID_INPUT",
            Status::ResourceLimit => "RESOURCE_LIMIT",
            Status::Inconsistent => "INCONSISTENT",
            Status::UnknownOpcode => "UNKNOWN_OPCODE",
        };
        f.write_str(name)
    }
}
