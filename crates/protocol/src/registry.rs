//! The driver registry and its mutation rules (spec.md §3, §4.6.2).

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::rc::Rc;
use std::time::Instant;

use odd_io::{Reactor, UnixSocketClient};
use tracing::warn;

use crate::client_fsm;
use crate::error::RegistryError;
use crate::filename;
use crate::pearson;

/// A sink the registry writes rendered response/diagnostic text to; the
/// line shell frontend owns the actual stdout handle (spec.md §6: "the
/// frontend supplies a writable sink for response text").
pub type Sink = Rc<dyn Fn(&str)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub name: String,
    pub arity: u8,
    pub descr: String,
}

/// Per-client protocol state, carried as the connection's `priv` slot
/// (spec.md §3's `priv`, spec.md §9's tagged-completion note).
#[derive(Default)]
pub struct DriverState {
    pub commands: Vec<CommandDescriptor>,
    pub(crate) info_received: bool,
}

pub struct DriverRecord {
    pub name: String,
    pub slot: u32,
    pub client: UnixSocketClient<DriverState>,
    /// When this record was created, used by `odd-shell`'s `list` rendering
    /// to distinguish "still connecting" from "driver never sent DRV_INFO"
    /// (`ODD_IPC_TIMEOUT_MS`, spec.md §9's open question on DRV_INFO timing).
    pub connected_at: Instant,
}

impl DriverRecord {
    /// `Some(commands)` once `DRV_INFO` has been received, `None` while
    /// still waiting on it.
    pub fn commands_if_ready(&self) -> Option<Vec<CommandDescriptor>> {
        self.client.with_priv(|p| {
            let state = p.as_ref()?;
            state.info_received.then(|| state.commands.clone())
        })
    }
}

/// `hash(name ⊕ slot) → list<DriverRecord>` (spec.md §3).
#[derive(Default)]
pub struct DriverRegistry {
    buckets: HashMap<u8, Vec<DriverRecord>>,
    suffix: String,
}

impl DriverRegistry {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self { buckets: HashMap::new(), suffix: suffix.into() }
    }

    pub fn find(&self, name: &str, slot: u32) -> Option<&DriverRecord> {
        let key = pearson::bucket_key(name, slot);
        self.buckets.get(&key)?.iter().find(|r| r.name == name && r.slot == slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DriverRecord> {
        self.buckets.values().flatten()
    }

    /// `on_created(name)` (spec.md §4.6.2): verify the entry is a socket,
    /// parse it, reject a duplicate `(name, slot)` as fatal, then connect
    /// and arm the per-client protocol reader.
    pub fn on_created(
        &mut self,
        reactor: &mut Reactor,
        base_dir: &Path,
        raw_name: &OsStr,
        respond: Sink,
    ) -> Result<(), RegistryError> {
        let Some(name_str) = raw_name.to_str() else {
            warn!("non-UTF8 socket filename ignored");
            return Ok(());
        };
        let path = base_dir.join(raw_name);
        let meta = match std::fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(_) => return Ok(()), // vanished between event and stat; delete event will follow
        };
        if !meta.file_type().is_socket() {
            return Ok(());
        }
        let parsed = match filename::parse(name_str, &self.suffix) {
            Ok(p) => p,
            Err(e) => {
                warn!(name = name_str, error = %e, "ignoring non-conforming socket filename");
                return Ok(());
            }
        };
        let key = pearson::bucket_key(&parsed.name, parsed.slot);
        if self.buckets.get(&key).is_some_and(|b| b.iter().any(|r| r.name == parsed.name && r.slot == parsed.slot)) {
            return Err(RegistryError::DuplicateDriver { name: parsed.name, slot: parsed.slot });
        }
        let peer = filename::format(&parsed.name, parsed.slot, &self.suffix);
        let client = UnixSocketClient::connect(&path, peer, reactor, move |client, reactor| {
            client.with_priv(|p| *p = Some(DriverState::default()));
            client_fsm::arm_await_signature(client, reactor, respond.clone());
        })?;
        self.buckets.entry(key).or_default().push(DriverRecord {
            name: parsed.name,
            slot: parsed.slot,
            client,
            connected_at: Instant::now(),
        });
        Ok(())
    }

    /// `on_deleted(name)` (spec.md §4.6.2): locate, deinit, and drop the
    /// record. Absence is a warning, not an error (spec.md §4.6.2 step 2).
    pub fn on_deleted(&mut self, reactor: &mut Reactor, raw_name: &OsStr) -> Result<(), RegistryError> {
        let Some(name_str) = raw_name.to_str() else { return Ok(()) };
        let parsed = match filename::parse(name_str, &self.suffix) {
            Ok(p) => p,
            Err(_) => return Ok(()), // never registered, nothing to remove
        };
        let key = pearson::bucket_key(&parsed.name, parsed.slot);
        let Some(bucket) = self.buckets.get_mut(&key) else {
            warn!(name = %parsed.name, slot = parsed.slot, "delete event for unknown driver");
            return Ok(());
        };
        let Some(idx) = bucket.iter().position(|r| r.name == parsed.name && r.slot == parsed.slot) else {
            warn!(name = %parsed.name, slot = parsed.slot, "delete event for unknown driver");
            return Ok(());
        };
        let record = bucket.remove(idx);
        record.client.deinit(reactor);
        Ok(())
    }

    /// `on_self_deleted` (spec.md §4.6.2): stop the reactor without
    /// draining pending readiness notifications.
    pub fn on_self_deleted(&self, reactor: &mut Reactor) {
        reactor.stop(false);
    }

    pub fn filename_suffix(&self) -> &str {
        &self.suffix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odd_io::Reactor;
    use std::cell::RefCell;
    use std::os::unix::net::UnixListener;

    fn pump(reactor: &mut Reactor) {
        for _ in 0..20 {
            reactor.stop(true);
            reactor.run().unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }

    #[test]
    fn non_socket_entries_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("printer.3.sock"), b"not a socket").unwrap();
        let mut registry = DriverRegistry::new("sock");
        let mut reactor = Reactor::new().unwrap();
        let sink: Sink = Rc::new(|_s: &str| {});
        registry
            .on_created(&mut reactor, dir.path(), OsStr::new("printer.3.sock"), sink)
            .unwrap();
        assert!(registry.find("printer", 3).is_none());
    }

    #[test]
    fn connects_and_registers_a_real_socket() {
        let dir = tempfile::tempdir().unwrap();
        let sock_path = dir.path().join("printer.3.sock");
        let _listener = UnixListener::bind(&sock_path).unwrap();
        let mut registry = DriverRegistry::new("sock");
        let mut reactor = Reactor::new().unwrap();
        let sink: Sink = Rc::new(|_s: &str| {});
        registry
            .on_created(&mut reactor, dir.path(), OsStr::new("printer.3.sock"), sink)
            .unwrap();
        pump(&mut reactor);
        assert!(registry.find("printer", 3).is_some());
    }

    #[test]
    fn duplicate_create_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let sock_path = dir.path().join("printer.3.sock");
        let _listener = UnixListener::bind(&sock_path).unwrap();
        let mut registry = DriverRegistry::new("sock");
        let mut reactor = Reactor::new().unwrap();
        let sink: Sink = Rc::new(|_s: &str| {});
        registry
            .on_created(&mut reactor, dir.path(), OsStr::new("printer.3.sock"), sink.clone())
            .unwrap();
        let err = registry
            .on_created(&mut reactor, dir.path(), OsStr::new("printer.3.sock"), sink)
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateDriver { .. }));
    }

    #[test]
    fn delete_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let sock_path = dir.path().join("printer.3.sock");
        let _listener = UnixListener::bind(&sock_path).unwrap();
        let mut registry = DriverRegistry::new("sock");
        let mut reactor = Reactor::new().unwrap();
        let sink: Sink = Rc::new(|_s: &str| {});
        registry.on_created(&mut reactor, dir.path(), OsStr::new("printer.3.sock"), sink).unwrap();
        pump(&mut reactor);
        registry.on_deleted(&mut reactor, OsStr::new("printer.3.sock")).unwrap();
        assert!(registry.find("printer", 3).is_none());
    }

    #[test]
    fn delete_of_unknown_driver_warns_but_does_not_error() {
        let mut registry = DriverRegistry::new("sock");
        let mut reactor = Reactor::new().unwrap();
        registry.on_deleted(&mut reactor, OsStr::new("nope.0.sock")).unwrap();
    }

    #[test]
    fn sink_receives_rendered_text() {
        let seen = Rc::new(RefCell::new(String::new()));
        let seen2 = seen.clone();
        let sink: Sink = Rc::new(move |s: &str| seen2.borrow_mut().push_str(s));
        (*sink)("hello");
        assert_eq!(*seen.borrow(), "hello");
    }
}
