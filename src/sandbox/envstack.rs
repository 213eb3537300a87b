//! The push/pop-or-mark-inactive algorithm behind one environment variable
//! shared by however many [`super::Sandbox`] instances are alive in this
//! process. Grounded in the original implementation's
//! `_activate_ccache`/`_release_ccache`/`_activate_config`/`_release_config`,
//! which carry the identical algorithm for two different variables
//! (`KRB5CCNAME`, `KRB5_CONFIG`) against two otherwise-identical class-level
//! dicts; here it is one generic structure parameterized by the variable
//! name, instantiated twice.

use std::collections::HashMap;
use std::env;

/// `active`: did activating `path` actually change the environment
/// variable (false if someone else's later activation overwrote it before
/// we got to release). `previous`: the value to restore the variable to
/// once every live reference above `path` in the stack has been released.
struct Frame {
    active: bool,
    previous: Option<String>,
}

pub struct EnvStack {
    var_name: &'static str,
    frames: HashMap<String, Frame>,
}

impl EnvStack {
    pub fn new(var_name: &'static str) -> EnvStack {
        EnvStack {
            var_name,
            frames: HashMap::new(),
        }
    }

    /// Point `$var_name` at `path`, unless it already does. Safe to call
    /// more than once for the same `path` (e.g. re-activating after a
    /// config file was regenerated).
    pub fn activate(&mut self, path: &str) {
        let current = env::var(self.var_name).ok();
        if current.as_deref() != Some(path) {
            // SAFETY: mutating process environment is inherently racy with
            // respect to other threads reading it concurrently; callers
            // are expected to serialize Sandbox activate/release the same
            // way the original implementation's single-threaded model did.
            unsafe {
                env::set_var(self.var_name, path);
            }
            self.frames.insert(
                path.to_string(),
                Frame {
                    active: true,
                    previous: current,
                },
            );
        }
    }

    /// Release `path`: if `$var_name` still points at it, walk down the
    /// stack restoring whichever ancestor frame is still marked active (or
    /// clearing the variable once none is). If something else has since
    /// overwritten the variable, just mark this frame inactive so a later
    /// release of *that* frame doesn't restore back to us.
    pub fn release(&mut self, path: &str) {
        let current = env::var(self.var_name).ok();
        if current.as_deref() == Some(path) {
            let mut cursor = path.to_string();
            loop {
                let frame = match self.frames.remove(&cursor) {
                    Some(f) => f,
                    None => {
                        self.set_or_clear(None);
                        break;
                    }
                };
                match frame.previous {
                    Some(prev) => {
                        let prev_active = self.frames.get(&prev).map(|f| f.active).unwrap_or(false);
                        if prev_active || !self.frames.contains_key(&prev) {
                            self.set_or_clear(Some(prev));
                            break;
                        }
                        cursor = prev;
                    }
                    None => {
                        self.set_or_clear(None);
                        break;
                    }
                }
            }
        } else {
            let previous = self.frames.remove(path).and_then(|f| f.previous);
            self.frames.insert(
                path.to_string(),
                Frame {
                    active: false,
                    previous,
                },
            );
        }
    }

    fn set_or_clear(&self, value: Option<String>) {
        // SAFETY: see `activate`.
        unsafe {
            match value {
                Some(v) => env::set_var(self.var_name, v),
                None => env::remove_var(self.var_name),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize this module's
    // tests so they don't race each other.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn activate_then_release_restores_original_value() {
        let _guard = TEST_LOCK.lock().expect("lock");
        let var = "ADFOREST_TEST_STACK_A";
        unsafe {
            env::set_var(var, "original");
        }
        let mut stack = EnvStack::new(var);
        stack.activate("sandbox-1");
        assert_eq!(env::var(var).as_deref(), Ok("sandbox-1"));
        stack.release("sandbox-1");
        assert_eq!(env::var(var).as_deref(), Ok("original"));
        unsafe {
            env::remove_var(var);
        }
    }

    #[test]
    fn nested_activations_unwind_in_order() {
        let _guard = TEST_LOCK.lock().expect("lock");
        let var = "ADFOREST_TEST_STACK_B";
        unsafe {
            env::remove_var(var);
        }
        let mut stack = EnvStack::new(var);
        stack.activate("outer");
        stack.activate("inner");
        assert_eq!(env::var(var).as_deref(), Ok("inner"));
        stack.release("inner");
        assert_eq!(env::var(var).as_deref(), Ok("outer"));
        stack.release("outer");
        assert!(env::var(var).is_err());
    }

    #[test]
    fn release_of_overwritten_frame_marks_inactive_without_touching_env() {
        let _guard = TEST_LOCK.lock().expect("lock");
        let var = "ADFOREST_TEST_STACK_C";
        unsafe {
            env::remove_var(var);
        }
        let mut stack = EnvStack::new(var);
        stack.activate("a");
        stack.activate("b"); // someone overwrites on top of "a"
        // "a" releases first even though it's no longer on top.
        stack.release("a");
        assert_eq!(env::var(var).as_deref(), Ok("b"));
        stack.release("b");
        assert!(env::var(var).is_err());
        unsafe {
            env::remove_var(var);
        }
    }
}
