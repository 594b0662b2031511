/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! Connection-scoped sessions and request-scoped contexts. A session is
//! shared by every exchange on one client connection; a context lives for
//! exactly one in-flight request and is threaded explicitly through the
//! modifier pipeline.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tokio::io::{AsyncRead, AsyncWrite};

pub trait SessionStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> SessionStream for T {}

impl std::fmt::Debug for dyn SessionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionStream")
    }
}

/// A 16-character random hex id. These are randomized identifiers, not
/// universally unique ones.
fn new_id() -> anyhow::Result<String> {
    let mut buf = [0u8; 8];
    openssl::rand::rand_bytes(&mut buf).map_err(|e| anyhow!("failed to generate id: {e}"))?;
    Ok(hex::encode(buf))
}

type ValueMap = HashMap<String, Arc<dyn Any + Send + Sync>>;

/// Per-connection state: identity, TLS status, hijack state and an
/// untyped key/value store. Key names and value types are a contract
/// between cooperating modifiers, nothing is enforced here.
pub struct Session {
    id: String,
    secure: AtomicBool,
    conn: Mutex<ConnSlot>,
    vals: Mutex<ValueMap>,
}

struct ConnSlot {
    hijacked: bool,
    stream: Option<Box<dyn SessionStream>>,
}

impl Session {
    /// A new session, optionally owning the client connection. The serve
    /// loop drives connections itself and passes `None`; embedders that
    /// want modifiers to be able to take the connection attach it here.
    pub fn new(stream: Option<Box<dyn SessionStream>>) -> anyhow::Result<Self> {
        Ok(Session {
            id: new_id()?,
            secure: AtomicBool::new(false),
            conn: Mutex::new(ConnSlot {
                hijacked: false,
                stream,
            }),
            vals: Mutex::new(HashMap::new()),
        })
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_secure(&self) -> bool {
        self.secure.load(Ordering::Relaxed)
    }

    pub fn mark_secure(&self) {
        self.secure.store(true, Ordering::Relaxed);
    }

    pub fn mark_insecure(&self) {
        self.secure.store(false, Ordering::Relaxed);
    }

    /// Take control of the connection away from the proxy. Fails if the
    /// session was already hijacked. After a hijack the proxy stops
    /// driving the connection; its lifecycle belongs to the caller.
    pub fn hijack(&self) -> anyhow::Result<Box<dyn SessionStream>> {
        let mut conn = self.conn.lock().unwrap();
        if conn.hijacked {
            return Err(anyhow!("session has already been hijacked"));
        }
        let stream = conn
            .stream
            .take()
            .ok_or_else(|| anyhow!("session has no connection attached"))?;
        conn.hijacked = true;
        Ok(stream)
    }

    pub fn hijacked(&self) -> bool {
        self.conn.lock().unwrap().hijacked
    }

    pub fn set<T: Any + Send + Sync>(&self, key: &str, val: T) {
        self.vals
            .lock()
            .unwrap()
            .insert(key.to_string(), Arc::new(val));
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.vals.lock().unwrap().get(key).cloned()
    }
}

/// Per-request state bound to one in-flight exchange. Contexts share the
/// session of the connection the request arrived on and drop out of
/// existence when the exchange completes.
pub struct Context {
    session: Arc<Session>,
    id: String,
    skip_round_trip: AtomicBool,
    skip_logging: AtomicBool,
    api_request: AtomicBool,
    vals: Mutex<ValueMap>,
}

impl Context {
    pub fn new(session: Arc<Session>) -> anyhow::Result<Self> {
        Ok(Context {
            session,
            id: new_id()?,
            skip_round_trip: AtomicBool::new(false),
            skip_logging: AtomicBool::new(false),
            api_request: AtomicBool::new(false),
            vals: Mutex::new(HashMap::new()),
        })
    }

    #[inline]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Skip forwarding the current request upstream.
    pub fn skip_round_trip(&self) {
        self.skip_round_trip.store(true, Ordering::Relaxed);
    }

    pub fn skipping_round_trip(&self) -> bool {
        self.skip_round_trip.load(Ordering::Relaxed)
    }

    /// Exclude the current exchange from traffic logging.
    pub fn skip_logging(&self) {
        self.skip_logging.store(true, Ordering::Relaxed);
    }

    pub fn skipping_logging(&self) -> bool {
        self.skip_logging.load(Ordering::Relaxed)
    }

    /// Mark the request as addressed to the proxy's own API surface.
    pub fn mark_api_request(&self) {
        self.api_request.store(true, Ordering::Relaxed);
    }

    pub fn is_api_request(&self) -> bool {
        self.api_request.load(Ordering::Relaxed)
    }

    pub fn set<T: Any + Send + Sync>(&self, key: &str, val: T) {
        self.vals
            .lock()
            .unwrap()
            .insert(key.to_string(), Arc::new(val));
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.vals.lock().unwrap().get(key).cloned()
    }
}

#[cfg(test)]
impl Context {
    pub(crate) fn for_tests() -> Context {
        Context::new(Arc::new(Session::new(None).unwrap())).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_16_hex_chars() {
        let session = Session::new(None).unwrap();
        assert_eq!(session.id().len(), 16);
        assert!(session.id().bytes().all(|c| c.is_ascii_hexdigit()));

        let ctx = Context::new(Arc::new(session)).unwrap();
        assert_eq!(ctx.id().len(), 16);
        assert_ne!(ctx.id(), ctx.session().id());
    }

    #[test]
    fn hijack_only_once() {
        let stream = tokio::io::duplex(16).0;
        let session = Session::new(Some(Box::new(stream))).unwrap();
        assert!(!session.hijacked());
        assert!(session.hijack().is_ok());
        assert!(session.hijacked());
        let err = session.hijack().unwrap_err();
        assert!(err.to_string().contains("already been hijacked"));
    }

    #[test]
    fn hijack_without_connection_fails() {
        let session = Session::new(None).unwrap();
        assert!(session.hijack().is_err());
        assert!(!session.hijacked());
    }

    #[test]
    fn value_stores_are_independent() {
        let session = Arc::new(Session::new(None).unwrap());
        session.set("shared", 7u32);

        let ctx = Context::new(session.clone()).unwrap();
        ctx.set("scratch", "request-scoped".to_string());

        let v = session.get("shared").unwrap();
        assert_eq!(v.downcast_ref::<u32>(), Some(&7));
        assert!(session.get("scratch").is_none());

        let v = ctx.get("scratch").unwrap();
        assert_eq!(
            v.downcast_ref::<String>().map(String::as_str),
            Some("request-scoped")
        );
        assert!(ctx.get("shared").is_none());
    }

    #[test]
    fn secure_flag_toggles() {
        let session = Session::new(None).unwrap();
        assert!(!session.is_secure());
        session.mark_secure();
        assert!(session.is_secure());
        session.mark_insecure();
        assert!(!session.is_secure());
    }
}
