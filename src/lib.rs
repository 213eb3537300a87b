//! Active Directory discovery, locator and directory/Kerberos client core.
//!
//! This crate is deliberately narrow: it does not speak LDAP or Kerberos on
//! the wire itself. Those protocols are well-defined and already implemented
//! by mature crates; what this crate provides is the part that is specific
//! to Active Directory and not well served elsewhere:
//!
//! - [`netlogon`] / [`dns`]: turning a domain name into a short list of
//!   responsive, correctly configured domain controllers ([`locate`]).
//! - [`sandbox`]: an isolated, per-instance Kerberos configuration and
//!   credential cache that can coexist with the host's own Kerberos state.
//! - [`client`]: routing directory operations to the right domain controller
//!   connection, including AD's paged-results control and range-subtype
//!   multi-valued attribute retrieval.
//!
//! The LDAP wire transport (BER encoding, SASL/GSSAPI bind) is delegated to
//! the `ldap3` crate via the [`transport::LdapTransport`] trait; the
//! Kerberos mechanism (`kinit`-style credential acquisition, password
//! set/change, credential cache I/O) is delegated to whatever implements
//! [`kerberos::Mechanism`], with [`kerberos::SystemMechanism`] provided as a
//! thin binding to the system's `libkrb5`.

pub mod ber;
pub mod client;
pub mod config;
pub mod dn;
pub mod dns;
pub mod error;
pub mod filter;
pub mod kerberos;
pub mod locate;
pub mod netlogon;
pub mod sandbox;
pub mod telemetry;
pub mod transport;
mod util;

pub use client::{AdClient, Scheme, Scope};
pub use config::Settings;
pub use dn::DomainName;
pub use error::{Error, Result};
pub use locate::{Locator, Role};
pub use sandbox::Sandbox;
pub use util::{dn_escape, ldap_escape};
