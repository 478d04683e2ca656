//! Test-only helpers for mutating process-global state.
//!
//! Pair every use with `#[serial(env)]` from `serial_test`.

use std::ffi::OsString;

/// Scoped overrides of one or more environment variables.
///
/// Every touched variable is put back to its prior value, or unset, when the
/// guard drops. Restoration runs in reverse order so touching the same key
/// twice still ends at the original value.
#[derive(Debug, Default)]
pub struct EnvGuard {
    saved: Vec<(&'static str, Option<OsString>)>,
}

impl EnvGuard {
    /// Guard that sets `key` to `val`.
    #[must_use]
    pub fn set(key: &'static str, val: &str) -> Self {
        Self::default().and_set(key, val)
    }

    /// Guard that unsets `key`.
    #[must_use]
    pub fn remove(key: &'static str) -> Self {
        Self::default().and_remove(key)
    }

    /// Also set `key` to `val`.
    #[must_use]
    pub fn and_set(mut self, key: &'static str, val: &str) -> Self {
        self.save(key);
        // SAFETY: env mutation is serialized by `#[serial(env)]` on every caller.
        unsafe { std::env::set_var(key, val) };
        self
    }

    /// Also unset `key`.
    #[must_use]
    pub fn and_remove(mut self, key: &'static str) -> Self {
        self.save(key);
        // SAFETY: env mutation is serialized by `#[serial(env)]` on every caller.
        unsafe { std::env::remove_var(key) };
        self
    }

    fn save(&mut self, key: &'static str) {
        self.saved.push((key, std::env::var_os(key)));
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, prev) in self.saved.drain(..).rev() {
            // SAFETY: still inside the serialized test that created the guard.
            unsafe {
                match prev {
                    Some(v) => std::env::set_var(key, v),
                    None => std::env::remove_var(key),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEY: &str = "CRAWL_EVENTS_TEST_GUARD";

    #[test]
    #[serial(env)]
    fn restores_original_value_after_repeated_overrides() {
        let _outer = EnvGuard::set(KEY, "original");
        {
            let _g = EnvGuard::set(KEY, "first")
                .and_set(KEY, "second")
                .and_remove(KEY);
            assert!(std::env::var_os(KEY).is_none());
        }
        assert_eq!(std::env::var(KEY).as_deref(), Ok("original"));
    }

    #[test]
    #[serial(env)]
    fn unset_variable_stays_unset() {
        let _clear = EnvGuard::remove(KEY);
        {
            let _g = EnvGuard::set(KEY, "temporary");
            assert_eq!(std::env::var(KEY).as_deref(), Ok("temporary"));
        }
        assert!(std::env::var_os(KEY).is_none());
    }
}
