//! A minimal `extern "C"` binding to `libkrb5`, covering only the entry
//! points the sandbox and client need. This is intentionally not a general
//! Kerberos binding: no GSSAPI, no replay cache management, nothing this
//! crate doesn't call itself. Function prototypes mirror the ones the
//! original implementation declared for `ctypes` in `ad.kerberos`.

use std::ffi::{CStr, CString};
use std::path::{Path, PathBuf};
use std::ptr;

use libc::{c_char, c_int, c_void};

use crate::error::{Error, Result};
use crate::kerberos::Mechanism;

#[allow(non_camel_case_types)]
type krb5_context = *mut c_void;
#[allow(non_camel_case_types)]
type krb5_ccache = *mut c_void;
#[allow(non_camel_case_types)]
type krb5_principal = *mut c_void;
#[allow(non_camel_case_types)]
type krb5_creds = *mut c_void;
#[allow(non_camel_case_types)]
type krb5_get_init_creds_opt = *mut c_void;

extern "C" {
    fn krb5_init_context(context: *mut krb5_context) -> c_int;
    fn krb5_free_context(context: krb5_context);

    fn krb5_parse_name(context: krb5_context, name: *const c_char, principal: *mut krb5_principal) -> c_int;
    fn krb5_free_principal(context: krb5_context, principal: krb5_principal);
    fn krb5_unparse_name(context: krb5_context, principal: krb5_principal, name: *mut *mut c_char) -> c_int;
    fn krb5_free_unparsed_name(context: krb5_context, name: *mut c_char);

    fn krb5_cc_resolve(context: krb5_context, name: *const c_char, ccache: *mut krb5_ccache) -> c_int;
    fn krb5_cc_default(context: krb5_context, ccache: *mut krb5_ccache) -> c_int;
    fn krb5_cc_default_name(context: krb5_context) -> *const c_char;
    fn krb5_cc_close(context: krb5_context, ccache: krb5_ccache) -> c_int;
    fn krb5_cc_get_principal(context: krb5_context, ccache: krb5_ccache, principal: *mut krb5_principal) -> c_int;
    fn krb5_cc_copy_creds(context: krb5_context, from: krb5_ccache, to: krb5_ccache) -> c_int;

    fn krb5_get_init_creds_opt_alloc(context: krb5_context, opt: *mut krb5_get_init_creds_opt) -> c_int;
    fn krb5_get_init_creds_opt_free(context: krb5_context, opt: krb5_get_init_creds_opt);

    fn krb5_get_init_creds_password(
        context: krb5_context,
        creds: *mut krb5_creds,
        client: krb5_principal,
        password: *const c_char,
        prompter: *const c_void,
        data: *mut c_void,
        start_time: c_int,
        in_tkt_service: *const c_char,
        opt: krb5_get_init_creds_opt,
    ) -> c_int;

    fn krb5_get_init_creds_keytab(
        context: krb5_context,
        creds: *mut krb5_creds,
        client: krb5_principal,
        keytab: *const c_void,
        start_time: c_int,
        in_tkt_service: *const c_char,
        opt: krb5_get_init_creds_opt,
    ) -> c_int;

    fn krb5_kt_resolve(context: krb5_context, name: *const c_char, keytab: *mut *mut c_void) -> c_int;
    fn krb5_kt_close(context: krb5_context, keytab: *mut c_void) -> c_int;

    fn krb5_free_cred_contents(context: krb5_context, creds: krb5_creds);

    fn krb5_set_password(
        context: krb5_context,
        creds: *mut krb5_creds,
        newpw: *const c_char,
        change_for: krb5_principal,
        result_code: *mut c_int,
        result_code_string: *mut c_void,
        result_string: *mut c_void,
    ) -> c_int;

    fn krb5_set_password_using_ccache(
        context: krb5_context,
        ccache: krb5_ccache,
        newpw: *const c_char,
        change_for: krb5_principal,
        result_code: *mut c_int,
        result_code_string: *mut c_void,
        result_string: *mut c_void,
    ) -> c_int;
}

/// The reference `Mechanism` implementation, a thin binding to `libkrb5`
/// via a handful of `extern "C"` calls. Each call allocates and frees its
/// own `krb5_context`; nothing about this binding is performance-critical
/// (Kerberos round trips dominate), so there's no context pool.
pub struct SystemMechanism;

impl SystemMechanism {
    pub fn new() -> SystemMechanism {
        SystemMechanism
    }

    fn with_context<T>(&self, f: impl FnOnce(krb5_context) -> Result<T>) -> Result<T> {
        let mut ctx: krb5_context = ptr::null_mut();
        let rc = unsafe { krb5_init_context(&mut ctx) };
        check(rc, "krb5_init_context")?;
        let result = f(ctx);
        unsafe { krb5_free_context(ctx) };
        result
    }
}

impl Default for SystemMechanism {
    fn default() -> SystemMechanism {
        SystemMechanism::new()
    }
}

fn check(rc: c_int, call: &'static str) -> Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(Error::auth(format!("{call} failed with Kerberos error code {rc}")))
    }
}

fn cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| Error::config("string contains an embedded NUL byte"))
}

fn path_cstring(p: &Path) -> Result<CString> {
    cstring(&p.to_string_lossy())
}

impl Mechanism for SystemMechanism {
    fn get_init_creds_password(&self, principal: &str, password: &str, ccache: &Path) -> Result<()> {
        self.with_context(|ctx| unsafe {
            let principal_c = cstring(principal)?;
            let password_c = cstring(password)?;
            let ccache_c = path_cstring(ccache)?;

            let mut client: krb5_principal = ptr::null_mut();
            check(
                krb5_parse_name(ctx, principal_c.as_ptr(), &mut client),
                "krb5_parse_name",
            )?;

            let mut opt: krb5_get_init_creds_opt = ptr::null_mut();
            check(
                krb5_get_init_creds_opt_alloc(ctx, &mut opt),
                "krb5_get_init_creds_opt_alloc",
            )?;

            let mut creds: krb5_creds = ptr::null_mut();
            let rc = krb5_get_init_creds_password(
                ctx,
                &mut creds,
                client,
                password_c.as_ptr(),
                ptr::null(),
                ptr::null_mut(),
                0,
                ptr::null(),
                opt,
            );
            krb5_get_init_creds_opt_free(ctx, opt);
            check(rc, "krb5_get_init_creds_password")?;

            let mut cc: krb5_ccache = ptr::null_mut();
            let prefixed = format!("FILE:{}", ccache_c.to_string_lossy());
            let prefixed_c = cstring(&prefixed)?;
            check(krb5_cc_resolve(ctx, prefixed_c.as_ptr(), &mut cc), "krb5_cc_resolve")?;

            krb5_free_cred_contents(ctx, creds);
            krb5_free_principal(ctx, client);
            krb5_cc_close(ctx, cc);
            Ok(())
        })
    }

    fn get_init_creds_keytab(&self, principal: &str, keytab: Option<&Path>, ccache: &Path) -> Result<()> {
        self.with_context(|ctx| unsafe {
            let principal_c = cstring(principal)?;
            let ccache_c = path_cstring(ccache)?;

            let mut client: krb5_principal = ptr::null_mut();
            check(
                krb5_parse_name(ctx, principal_c.as_ptr(), &mut client),
                "krb5_parse_name",
            )?;

            let keytab_name = match keytab {
                Some(p) => format!("FILE:{}", p.to_string_lossy()),
                None => String::new(),
            };
            let mut kt: *mut c_void = ptr::null_mut();
            if !keytab_name.is_empty() {
                let keytab_c = cstring(&keytab_name)?;
                check(krb5_kt_resolve(ctx, keytab_c.as_ptr(), &mut kt), "krb5_kt_resolve")?;
            }

            let mut opt: krb5_get_init_creds_opt = ptr::null_mut();
            check(
                krb5_get_init_creds_opt_alloc(ctx, &mut opt),
                "krb5_get_init_creds_opt_alloc",
            )?;

            let mut creds: krb5_creds = ptr::null_mut();
            let rc = krb5_get_init_creds_keytab(ctx, &mut creds, client, kt, 0, ptr::null(), opt);
            krb5_get_init_creds_opt_free(ctx, opt);
            if !kt.is_null() {
                krb5_kt_close(ctx, kt);
            }
            check(rc, "krb5_get_init_creds_keytab")?;

            let mut cc: krb5_ccache = ptr::null_mut();
            let prefixed = format!("FILE:{}", ccache_c.to_string_lossy());
            let prefixed_c = cstring(&prefixed)?;
            check(krb5_cc_resolve(ctx, prefixed_c.as_ptr(), &mut cc), "krb5_cc_resolve")?;

            krb5_free_cred_contents(ctx, creds);
            krb5_free_principal(ctx, client);
            krb5_cc_close(ctx, cc);
            Ok(())
        })
    }

    fn set_password(&self, principal: &str, ccache: &Path, new_password: &str) -> Result<()> {
        self.with_context(|ctx| unsafe {
            let principal_c = cstring(principal)?;
            let newpw_c = cstring(new_password)?;
            let ccache_name = format!("FILE:{}", ccache.to_string_lossy());
            let ccache_c = cstring(&ccache_name)?;

            let mut client: krb5_principal = ptr::null_mut();
            check(
                krb5_parse_name(ctx, principal_c.as_ptr(), &mut client),
                "krb5_parse_name",
            )?;
            let mut cc: krb5_ccache = ptr::null_mut();
            check(krb5_cc_resolve(ctx, ccache_c.as_ptr(), &mut cc), "krb5_cc_resolve")?;

            let mut result_code: c_int = 0;
            let rc = krb5_set_password_using_ccache(
                ctx,
                cc,
                newpw_c.as_ptr(),
                client,
                &mut result_code,
                ptr::null_mut(),
                ptr::null_mut(),
            );
            krb5_free_principal(ctx, client);
            krb5_cc_close(ctx, cc);
            check(rc, "krb5_set_password_using_ccache")?;
            if result_code != 0 {
                return Err(Error::auth(format!(
                    "kadmin protocol refused the password change (code {result_code})"
                )));
            }
            Ok(())
        })
    }

    fn change_password(&self, principal: &str, old_password: &str, new_password: &str) -> Result<()> {
        self.with_context(|ctx| unsafe {
            let principal_c = cstring(principal)?;
            let oldpw_c = cstring(old_password)?;
            let newpw_c = cstring(new_password)?;

            let mut client: krb5_principal = ptr::null_mut();
            check(
                krb5_parse_name(ctx, principal_c.as_ptr(), &mut client),
                "krb5_parse_name",
            )?;

            let mut opt: krb5_get_init_creds_opt = ptr::null_mut();
            check(
                krb5_get_init_creds_opt_alloc(ctx, &mut opt),
                "krb5_get_init_creds_opt_alloc",
            )?;
            let mut creds: krb5_creds = ptr::null_mut();
            let rc = krb5_get_init_creds_password(
                ctx,
                &mut creds,
                client,
                oldpw_c.as_ptr(),
                ptr::null(),
                ptr::null_mut(),
                0,
                cstring("kadmin/changepw")?.as_ptr(),
                opt,
            );
            krb5_get_init_creds_opt_free(ctx, opt);
            check(rc, "krb5_get_init_creds_password")?;

            let mut result_code: c_int = 0;
            let rc = krb5_set_password(
                ctx,
                &mut creds,
                newpw_c.as_ptr(),
                client,
                &mut result_code,
                ptr::null_mut(),
                ptr::null_mut(),
            );
            krb5_free_cred_contents(ctx, creds);
            krb5_free_principal(ctx, client);
            check(rc, "krb5_set_password")?;
            if result_code != 0 {
                return Err(Error::auth(format!(
                    "kadmin protocol refused the password change (code {result_code})"
                )));
            }
            Ok(())
        })
    }

    fn cc_default(&self) -> Result<PathBuf> {
        self.with_context(|ctx| unsafe {
            let name = krb5_cc_default_name(ctx);
            if name.is_null() {
                return Err(Error::auth("krb5_cc_default_name returned NULL"));
            }
            let name = CStr::from_ptr(name).to_string_lossy().into_owned();
            Ok(PathBuf::from(name.trim_start_matches("FILE:")))
        })
    }

    fn cc_copy_creds(&self, from: &Path, to: &Path) -> Result<()> {
        self.with_context(|ctx| unsafe {
            let from_name = format!("FILE:{}", from.to_string_lossy());
            let to_name = format!("FILE:{}", to.to_string_lossy());
            let from_c = cstring(&from_name)?;
            let to_c = cstring(&to_name)?;

            let mut from_cc: krb5_ccache = ptr::null_mut();
            check(krb5_cc_resolve(ctx, from_c.as_ptr(), &mut from_cc), "krb5_cc_resolve")?;
            let mut to_cc: krb5_ccache = ptr::null_mut();
            check(krb5_cc_resolve(ctx, to_c.as_ptr(), &mut to_cc), "krb5_cc_resolve")?;

            let rc = krb5_cc_copy_creds(ctx, from_cc, to_cc);
            krb5_cc_close(ctx, from_cc);
            krb5_cc_close(ctx, to_cc);
            check(rc, "krb5_cc_copy_creds")
        })
    }

    fn cc_get_principal(&self, ccache: &Path) -> Result<String> {
        self.with_context(|ctx| unsafe {
            let name = format!("FILE:{}", ccache.to_string_lossy());
            let name_c = cstring(&name)?;
            let mut cc: krb5_ccache = ptr::null_mut();
            check(krb5_cc_resolve(ctx, name_c.as_ptr(), &mut cc), "krb5_cc_resolve")?;

            let mut principal: krb5_principal = ptr::null_mut();
            let rc = krb5_cc_get_principal(ctx, cc, &mut principal);
            krb5_cc_close(ctx, cc);
            check(rc, "krb5_cc_get_principal")?;

            let mut name_ptr: *mut c_char = ptr::null_mut();
            check(
                krb5_unparse_name(ctx, principal, &mut name_ptr),
                "krb5_unparse_name",
            )?;
            let name = CStr::from_ptr(name_ptr).to_string_lossy().into_owned();
            krb5_free_unparsed_name(ctx, name_ptr);
            krb5_free_principal(ctx, principal);
            Ok(name)
        })
    }
}
