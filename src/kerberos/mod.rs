//! The Kerberos mechanism boundary.
//!
//! `init_creds`/`set_password`/`change_password`/ccache I/O are named by
//! `spec.md` as out of scope — they are the job of a real Kerberos
//! implementation, not this crate. [`Mechanism`] is the trait that pins
//! down exactly where this crate stops and that implementation begins;
//! [`SystemMechanism`] (behind the `system-krb5` feature) is a thin
//! `extern "C"` binding to the system's own `libkrb5`, mirroring the
//! ctypes prototypes the original implementation bound by hand in
//! `ad.kerberos`.

#[cfg(feature = "system-krb5")]
mod sys;

#[cfg(feature = "system-krb5")]
pub use sys::SystemMechanism;

use std::path::Path;

use crate::error::Result;

/// Everything this crate needs from a Kerberos implementation: acquiring
/// initial credentials, setting/changing a principal's password, and
/// reading/copying credential caches.
pub trait Mechanism: Send + Sync {
    /// Acquire a TGT for `principal` using `password`, storing it in
    /// `ccache`.
    fn get_init_creds_password(&self, principal: &str, password: &str, ccache: &Path) -> Result<()>;

    /// Acquire a TGT for `principal` from `keytab` (or the system default
    /// keytab if `None`), storing it in `ccache`.
    fn get_init_creds_keytab(&self, principal: &str, keytab: Option<&Path>, ccache: &Path) -> Result<()>;

    /// Set `principal`'s password to `new_password`, authenticating with
    /// the credentials already present in `ccache`.
    fn set_password(&self, principal: &str, ccache: &Path, new_password: &str) -> Result<()>;

    /// Change `principal`'s password from `old_password` to
    /// `new_password`, without requiring a pre-existing ticket.
    fn change_password(&self, principal: &str, old_password: &str, new_password: &str) -> Result<()>;

    /// The path of the system's default credential cache.
    fn cc_default(&self) -> Result<std::path::PathBuf>;

    /// Copy every credential from `from` into `to`.
    fn cc_copy_creds(&self, from: &Path, to: &Path) -> Result<()>;

    /// The principal a credential cache's primary ticket was issued to.
    fn cc_get_principal(&self, ccache: &Path) -> Result<String>;
}

#[cfg(test)]
pub(crate) mod test_double {
    use super::*;
    use std::sync::Mutex;

    /// An in-memory `Mechanism` used by sandbox/client tests so they don't
    /// need a real KDC.
    #[derive(Default)]
    pub struct FakeMechanism {
        pub principal: Mutex<Option<String>>,
    }

    impl Mechanism for FakeMechanism {
        fn get_init_creds_password(&self, principal: &str, _password: &str, _ccache: &Path) -> Result<()> {
            *self.principal.lock().expect("lock") = Some(principal.to_string());
            Ok(())
        }

        fn get_init_creds_keytab(&self, principal: &str, _keytab: Option<&Path>, _ccache: &Path) -> Result<()> {
            *self.principal.lock().expect("lock") = Some(principal.to_string());
            Ok(())
        }

        fn set_password(&self, _principal: &str, _ccache: &Path, _new_password: &str) -> Result<()> {
            Ok(())
        }

        fn change_password(&self, _principal: &str, _old_password: &str, _new_password: &str) -> Result<()> {
            Ok(())
        }

        fn cc_default(&self) -> Result<std::path::PathBuf> {
            Ok(std::path::PathBuf::from("/tmp/fake-ccache"))
        }

        fn cc_copy_creds(&self, _from: &Path, _to: &Path) -> Result<()> {
            Ok(())
        }

        fn cc_get_principal(&self, _ccache: &Path) -> Result<String> {
            self.principal
                .lock()
                .expect("lock")
                .clone()
                .ok_or_else(|| crate::error::Error::not_found("no principal loaded"))
        }
    }
}
