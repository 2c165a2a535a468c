// src/identity/mod.rs

use std::collections::HashMap;

use crate::policy::QuotaPolicy;

/// Identifier handed out when a request carries no usable signal at all.
pub const UNRESOLVED_IDENTIFIER: &str = "unresolved";

/// Narrow projection of an inbound request.
///
/// Carries only what identifier resolution and custom key functions need:
/// method, path, selected headers, and the transport remote address. Keeps
/// the limiter decoupled from any particular web framework.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    headers: HashMap<String, String>,
    remote_addr: Option<String>,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: HashMap::new(),
            remote_addr: None,
        }
    }

    /// Attaches a header. Names are matched case-insensitively on lookup.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }
}

/// Derives the stable identifier quota is tracked against.
///
/// A policy-supplied key function fully overrides default resolution.
/// Otherwise: first entry of x-forwarded-for, then x-real-ip, then the
/// transport remote address. Missing headers never error; with no signal
/// at all the constant placeholder is returned. No I/O, no side effects.
pub fn resolve_identifier(request: &RequestInfo, policy: &QuotaPolicy) -> String {
    if let Some(key_fn) = &policy.key_fn {
        return key_fn(request);
    }

    if let Some(forwarded) = request.header("x-forwarded-for") {
        // x-forwarded-for can hold a proxy chain; the first entry is the client
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = request.header("x-real-ip") {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    if let Some(addr) = request.remote_addr() {
        return addr.to_string();
    }

    UNRESOLVED_IDENTIFIER.to_string()
}
