//! Component D: the credential sandbox.
//!
//! An isolated, per-instance Kerberos configuration and credential cache
//! that can coexist with the host's own Kerberos state (and with other
//! `Sandbox` instances in the same process), by pushing and popping onto
//! two process-wide environment-variable stacks rather than overwriting
//! `$KRB5CCNAME`/`$KRB5_CONFIG` outright. Grounded in the original
//! implementation's `ad.core.creds.Creds`.

mod envstack;

use std::fs;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing::debug;

use crate::config::SandboxSettings;
use crate::error::{Error, Result};
use crate::kerberos::Mechanism;

fn ccache_stack() -> &'static Mutex<envstack::EnvStack> {
    static STACK: OnceLock<Mutex<envstack::EnvStack>> = OnceLock::new();
    STACK.get_or_init(|| Mutex::new(envstack::EnvStack::new("KRB5CCNAME")))
}

fn config_stack() -> &'static Mutex<envstack::EnvStack> {
    static STACK: OnceLock<Mutex<envstack::EnvStack>> = OnceLock::new();
    STACK.get_or_init(|| Mutex::new(envstack::EnvStack::new("KRB5_CONFIG")))
}

/// One isolated Kerberos identity: a private ccache, a private krb5.conf
/// listing one realm per domain this sandbox has resolved servers for, and
/// the environment-variable activation that makes `libkrb5` see them.
pub struct Sandbox {
    domain: String,
    settings: SandboxSettings,
    mechanism: Box<dyn Mechanism>,
    ccache_path: PathBuf,
    config_path: Option<PathBuf>,
    principal: Option<String>,
    domains: Vec<(String, Vec<String>)>,
    active: bool,
}

impl Sandbox {
    /// Create a sandbox for `domain`. `domain` becomes the `default_realm`
    /// of the generated krb5.conf, and the implicit domain for principals
    /// passed to [`Sandbox::acquire`] without an `@domain` suffix.
    pub fn new(domain: &str, settings: SandboxSettings, mechanism: Box<dyn Mechanism>) -> Result<Sandbox> {
        let ccache_path = fresh_temp_path("ccache")?;
        Ok(Sandbox {
            domain: domain.to_ascii_uppercase(),
            settings,
            mechanism,
            ccache_path,
            config_path: None,
            principal: None,
            domains: Vec::new(),
            active: false,
        })
    }

    /// Load credentials from the host's own default ccache into this
    /// sandbox's private one, then activate the sandbox.
    pub fn load(&mut self, servers: Vec<String>) -> Result<()> {
        let default_ccache = self.mechanism.cc_default()?;
        if !default_ccache.exists() {
            return Err(Error::NoCcache);
        }
        self.principal = Some(self.mechanism.cc_get_principal(&default_ccache)?);
        self.mechanism.cc_copy_creds(&default_ccache, &self.ccache_path)?;
        self.activate_ccache();
        self.resolve_servers_for_domain(&self.domain.clone(), servers)?;
        Ok(())
    }

    /// Acquire credentials for `principal` (either bare, taken to be in
    /// this sandbox's default domain, or `user@DOMAIN`), by password or by
    /// keytab, pinned to `servers` if given rather than re-locating them.
    pub fn acquire(
        &mut self,
        principal: &str,
        password: Option<&str>,
        keytab: Option<&Path>,
        servers: Option<Vec<String>>,
    ) -> Result<()> {
        let (user, domain) = match principal.split_once('@') {
            Some((user, domain)) => (user.to_string(), domain.to_ascii_uppercase()),
            None => (principal.to_string(), self.domain.clone()),
        };
        let full_principal = format!("{user}@{domain}");

        self.activate_ccache();
        if !self.settings.use_system_config {
            if let Some(servers) = servers {
                self.set_servers_for_domain(&domain, servers)?;
            }
        }

        match password {
            Some(password) => self
                .mechanism
                .get_init_creds_password(&full_principal, password, &self.ccache_path)?,
            None => self
                .mechanism
                .get_init_creds_keytab(&full_principal, keytab, &self.ccache_path)?,
        }
        self.principal = Some(full_principal);
        Ok(())
    }

    /// Release every credential and config this sandbox installed,
    /// restoring the environment to whatever it would have been without
    /// this sandbox.
    pub fn release(&mut self) {
        self.release_ccache();
        self.release_config();
        self.principal = None;
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Pin `domain`'s KDC/kpasswd server list in this sandbox's private
    /// krb5.conf, bypassing the locator. Used by the directory client
    /// around `set_password`/`change_password`, which must reach a
    /// specific writable DC rather than whichever one the locator would
    /// otherwise pick.
    pub fn pin_servers(&mut self, domain: &str, servers: Vec<String>) -> Result<()> {
        self.set_servers_for_domain(domain, servers)
    }

    pub fn set_password(&mut self, principal: &str, new_password: &str) -> Result<()> {
        self.mechanism.set_password(principal, &self.ccache_path, new_password)
    }

    pub fn change_password(&mut self, principal: &str, old_password: &str, new_password: &str) -> Result<()> {
        self.mechanism.change_password(principal, old_password, new_password)
    }

    fn resolve_servers_for_domain(&mut self, domain: &str, servers: Vec<String>) -> Result<()> {
        if self.settings.use_system_config {
            return Ok(());
        }
        self.set_servers_for_domain(domain, servers)
    }

    fn set_servers_for_domain(&mut self, domain: &str, servers: Vec<String>) -> Result<()> {
        if self.settings.use_system_config {
            return Ok(());
        }
        if let Some(entry) = self.domains.iter_mut().find(|(d, _)| d == domain) {
            entry.1 = servers;
        } else {
            self.domains.push((domain.to_string(), servers));
        }
        self.write_config()?;
        self.activate_config();
        Ok(())
    }

    fn write_config(&mut self) -> Result<()> {
        const KERBEROS_PORT: u16 = 88;
        const KPASSWD_PORT: u16 = 464;

        let mut contents = String::new();
        contents.push_str("# generated by adforest, do not edit\n");
        contents.push_str("[libdefaults]\n");
        contents.push_str(&format!("  default_realm = {}\n", self.domain));
        contents.push_str("  dns_lookup_kdc = false\n");
        if let Some(first) = self.settings.enctypes.first() {
            contents.push_str(&format!("  default_tgs_enctypes = {first}\n"));
            contents.push_str(&format!("  default_tkt_enctypes = {first}\n"));
        }
        contents.push_str("[realms]\n");
        for (domain, servers) in &self.domains {
            contents.push_str(&format!("  {domain} = {{\n"));
            for server in servers {
                contents.push_str(&format!("    kdc = {server}:{KERBEROS_PORT}\n"));
                contents.push_str(&format!("    kpasswd_server = {server}:{KPASSWD_PORT}\n"));
            }
            contents.push_str("  }\n");
        }

        let new_path = fresh_temp_path("krb5.conf")?;
        let tmp_path = new_path.with_extension("tmp");
        write_secure(&tmp_path, contents.as_bytes())?;
        fs::rename(&tmp_path, &new_path)?;

        let old_path = self.config_path.replace(new_path);
        if let Some(old) = old_path {
            let _ = fs::remove_file(old);
        }
        Ok(())
    }

    fn activate_ccache(&mut self) {
        ccache_stack()
            .lock()
            .expect("ccache stack mutex poisoned")
            .activate(&self.ccache_path.to_string_lossy());
        self.active = true;
        debug!(ccache = %self.ccache_path.display(), "activated credential cache");
    }

    fn release_ccache(&mut self) {
        if !self.active {
            return;
        }
        ccache_stack()
            .lock()
            .expect("ccache stack mutex poisoned")
            .release(&self.ccache_path.to_string_lossy());
        let _ = fs::remove_file(&self.ccache_path);
        self.active = false;
    }

    fn activate_config(&mut self) {
        if self.settings.use_system_config {
            return;
        }
        if let Some(path) = &self.config_path {
            config_stack()
                .lock()
                .expect("config stack mutex poisoned")
                .activate(&path.to_string_lossy());
        }
    }

    fn release_config(&mut self) {
        if self.settings.use_system_config {
            return;
        }
        if let Some(path) = self.config_path.take() {
            config_stack()
                .lock()
                .expect("config stack mutex poisoned")
                .release(&path.to_string_lossy());
            let _ = fs::remove_file(path);
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.release();
    }
}

fn fresh_temp_path(suffix: &str) -> Result<PathBuf> {
    let pid = std::process::id();
    let unique = rand::random::<u64>();
    let path = std::env::temp_dir().join(format!("adforest-{pid}-{unique}.{suffix}"));
    write_secure(&path, b"")?;
    Ok(path)
}

/// Create `path` with `mkstemp`-equivalent semantics (unique caller-chosen
/// path, exclusive creation, mode 0600) and write `contents` to it. Ccache
/// and krb5.conf files carry Kerberos credentials, so they must never be
/// created world- or group-readable even for the instant between creation
/// and the caller narrowing permissions further.
fn write_secure(path: &Path, contents: &[u8]) -> Result<()> {
    use std::io::Write;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kerberos::test_double::FakeMechanism;
    use std::sync::Mutex as StdMutex;

    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    #[test]
    fn acquiring_credentials_writes_a_config_listing_the_pinned_servers() {
        let _guard = TEST_LOCK.lock().expect("lock");
        let mut sandbox = Sandbox::new(
            "example.org",
            SandboxSettings::default(),
            Box::new(FakeMechanism::default()),
        )
        .expect("sandbox created");

        sandbox
            .acquire("alice", Some("hunter2"), None, Some(vec!["dc1.example.org".to_string()]))
            .expect("acquire succeeds");

        assert_eq!(sandbox.principal(), Some("alice@EXAMPLE.ORG"));
        let config_path = sandbox.config_path.clone().expect("config written");
        let contents = fs::read_to_string(config_path).expect("config readable");
        assert!(contents.contains("default_realm = EXAMPLE.ORG"));
        assert!(contents.contains("kdc = dc1.example.org:88"));

        sandbox.release();
    }

    #[test]
    fn release_restores_environment_and_removes_temp_files() {
        let _guard = TEST_LOCK.lock().expect("lock");
        let mut sandbox = Sandbox::new(
            "example.org",
            SandboxSettings::default(),
            Box::new(FakeMechanism::default()),
        )
        .expect("sandbox created");
        let ccache_path = sandbox.ccache_path.clone();
        sandbox
            .acquire("alice", Some("hunter2"), None, Some(vec!["dc1.example.org".to_string()]))
            .expect("acquire succeeds");
        let config_path = sandbox.config_path.clone().expect("config written");

        sandbox.release();
        assert!(!ccache_path.exists());
        assert!(!config_path.exists());
    }
}
