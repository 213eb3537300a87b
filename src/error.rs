//! The crate-wide error taxonomy.
//!
//! Errors are grouped by *kind*, not by the component that raised them,
//! because callers generally want to react to "my argument was wrong" or
//! "the network is down" the same way regardless of which operation hit it.
//! Transport and Kerberos mechanism errors are translated into this taxonomy
//! at the boundary; neither `ldap3::LdapError` nor a Kerberos error code ever
//! escapes this crate's public API.

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

/// A single error taxonomy covering every failure mode described in the
/// system design: configuration mistakes, absent results, protocol
/// violations, transport failures, authentication failures and a missing
/// default credential cache.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No credentials active, no server supplied where one was mandatory,
    /// or a caller argument had the wrong shape (e.g. a non-string filter
    /// attribute).
    #[error("configuration error: {0}")]
    Config(String),

    /// DC location produced zero validated servers, or a rootDSE search
    /// returned no entries.
    #[error("not found: {0}")]
    NotFound(String),

    /// A malformed Netlogon blob, a BER decode violation, a forbidden
    /// RFC-1035 pointer, a range-subtype continuation gap, or a server that
    /// refused to honor the paged-results control.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A DNS exception, a UDP socket failure, or an LDAP transport error
    /// that the transport layer could not itself recover from.
    #[error("transport error: {0}")]
    Transport(String),

    /// A Kerberos error during credential acquisition, password set or
    /// password change.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Attempted to load the default credential cache and none was
    /// readable.
    #[error("no credential cache available")]
    NoCcache,

    /// An underlying I/O error (temp file creation, atomic rename, ...)
    /// that doesn't merit its own kind.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Error {
        Error::Config(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Error {
        Error::NotFound(msg.into())
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Error {
        Error::Protocol(msg.into())
    }

    pub fn transport<S: Into<String>>(msg: S) -> Error {
        Error::Transport(msg.into())
    }

    pub fn auth<S: Into<String>>(msg: S) -> Error {
        Error::Auth(msg.into())
    }
}
