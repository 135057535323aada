//! Facade over the external tunnel engine
//!
//! The engine performing the DNS-tunnel transport is a black box exposing
//! three operations with a string-sentinel error convention: an empty string
//! means success, anything else is a human-readable error. [`EngineClient`]
//! converts that convention into typed results at the boundary.

use std::sync::Arc;

use crate::error::{Error, Result};

/// Operations assumed of the external tunnel engine
///
/// Implementations are synchronous: the engine performs its own background
/// work and these calls only hand over parameters or request teardown.
pub trait TunnelEngine: Send + Sync {
    /// Start the engine against the given DNS server and domain
    ///
    /// Returns an empty string on success, otherwise an error message.
    fn start_tunnel(&self, dns_server: &str, domain: &str) -> String;

    /// Stop the engine
    ///
    /// Returns an empty string on success, otherwise an error message.
    fn stop_tunnel(&self) -> String;

    /// Whether the engine is currently running
    ///
    /// Lets a host resynchronize its view after a process restart.
    fn is_running(&self) -> bool;
}

/// Typed facade over a [`TunnelEngine`]
#[derive(Clone)]
pub struct EngineClient {
    inner: Arc<dyn TunnelEngine>,
}

impl EngineClient {
    /// Wrap an engine implementation
    pub fn new(inner: Arc<dyn TunnelEngine>) -> Self {
        Self { inner }
    }

    /// Start the engine, converting the sentinel into a typed result
    pub fn start(&self, dns_server: &str, domain: &str) -> Result<()> {
        let error = self.inner.start_tunnel(dns_server, domain);
        if error.is_empty() {
            log::debug!("engine started (dns '{}', domain '{}')", dns_server, domain);
            Ok(())
        } else {
            Err(Error::EngineStartFailed(error))
        }
    }

    /// Stop the engine, best-effort
    ///
    /// Teardown must proceed regardless of the engine's answer, so failures
    /// are logged and swallowed here.
    pub fn stop(&self) {
        let error = self.inner.stop_tunnel();
        if !error.is_empty() {
            log::warn!("engine stop reported an error: {}", error);
        }
    }

    /// Whether the engine is currently running
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }
}

/// Bindings to the engine library's C exports
///
/// The engine ships as a separate library exposing a C surface mirroring
/// [`TunnelEngine`]; strings returned by the engine are freed through its
/// own allocator.
#[cfg(feature = "ffi")]
pub mod ffi {
    use std::ffi::{c_char, c_int, CStr, CString};

    use super::TunnelEngine;

    extern "C" {
        fn aura_start_tunnel(dns_server: *const c_char, domain: *const c_char) -> *mut c_char;
        fn aura_stop_tunnel() -> *mut c_char;
        fn aura_engine_running() -> c_int;
        fn aura_string_free(s: *mut c_char);
    }

    /// Engine implementation backed by the linked engine library
    #[derive(Debug, Default)]
    pub struct FfiEngine;

    impl FfiEngine {
        /// Create a new engine binding
        pub fn new() -> Self {
            Self
        }
    }

    fn take_error(ptr: *mut c_char) -> String {
        if ptr.is_null() {
            return String::new();
        }
        // SAFETY: the engine returns a NUL-terminated string that we own
        // and must release through its allocator
        let message = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
        unsafe { aura_string_free(ptr) };
        message
    }

    impl TunnelEngine for FfiEngine {
        fn start_tunnel(&self, dns_server: &str, domain: &str) -> String {
            let dns = match CString::new(dns_server) {
                Ok(s) => s,
                Err(_) => return "dns server contains an interior NUL".into(),
            };
            let domain = match CString::new(domain) {
                Ok(s) => s,
                Err(_) => return "domain contains an interior NUL".into(),
            };
            // SAFETY: both pointers are valid NUL-terminated strings for the
            // duration of the call
            take_error(unsafe { aura_start_tunnel(dns.as_ptr(), domain.as_ptr()) })
        }

        fn stop_tunnel(&self) -> String {
            // SAFETY: no arguments; the returned pointer is owned by us
            take_error(unsafe { aura_stop_tunnel() })
        }

        fn is_running(&self) -> bool {
            // SAFETY: no arguments or side effects
            unsafe { aura_engine_running() != 0 }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedEngine(&'static str);

    impl TunnelEngine for ScriptedEngine {
        fn start_tunnel(&self, _dns_server: &str, _domain: &str) -> String {
            self.0.to_string()
        }
        fn stop_tunnel(&self) -> String {
            String::new()
        }
        fn is_running(&self) -> bool {
            false
        }
    }

    #[test]
    fn empty_sentinel_is_success() {
        let client = EngineClient::new(Arc::new(ScriptedEngine("")));
        assert!(client.start("", "x.y.").is_ok());
    }

    #[test]
    fn message_sentinel_becomes_typed_error() {
        let client = EngineClient::new(Arc::new(ScriptedEngine("no route to resolver")));
        match client.start("8.8.8.8", "x.y.") {
            Err(Error::EngineStartFailed(msg)) => assert_eq!(msg, "no route to resolver"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
