//! Command dispatch (spec.md §4.6.5): translate a shell-frontend command
//! into a `DRV_COMMAND` frame and send it to the located driver.

use odd_core::MAX_COMMAND_NAME_LEN;
use odd_io::{Reactor, SendOutcome};
use tracing::warn;

use crate::client_fsm;
use crate::registry::{DriverRegistry, Sink};
use crate::wire;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The `DRV_COMMAND` frame was handed to the connection layer.
    Sent,
    /// Unknown driver, unknown command, or over-arity argument list
    /// (spec.md §4.6.5 step 1-3; spec.md §8 scenarios S3/S4).
    Invalid,
}

/// `dispatch(drv, slot, cmd_name, args)` (spec.md §4.6.5). `sink` renders
/// response text and the "repeat your command" retry hint; the caller is
/// expected to have already printed "Invalid command" on `Invalid`.
pub fn dispatch(
    registry: &DriverRegistry,
    reactor: &mut Reactor,
    drv: &str,
    slot: u32,
    cmd_name: &str,
    args: &[Vec<u8>],
    sink: Sink,
) -> DispatchOutcome {
    let Some(record) = registry.find(drv, slot) else {
        return DispatchOutcome::Invalid;
    };
    let truncated_name = &cmd_name[..cmd_name.len().min(MAX_COMMAND_NAME_LEN)];
    let cmd_idx = record
        .client
        .with_priv(|p| p.as_ref().and_then(|s| s.commands.iter().position(|c| c.name == truncated_name)));
    let Some(cmd_idx) = cmd_idx else {
        return DispatchOutcome::Invalid;
    };
    let arity_ok = record
        .client
        .with_priv(|p| p.as_ref().map(|s| args.len() <= s.commands[cmd_idx].arity as usize).unwrap_or(false));
    if !arity_ok {
        return DispatchOutcome::Invalid;
    }

    let frame = match wire::encode_drv_command(cmd_idx as u32, args) {
        Ok(f) => f,
        Err(e) => {
            warn!("failed to encode DRV_COMMAND: {e}");
            return DispatchOutcome::Invalid;
        }
    };

    let client = record.client.clone();
    let sent = client.send(
        reactor,
        move |client, reactor, outcome| match outcome {
            SendOutcome::Complete => {
                // spec.md §4.6.4: the next signature recv is armed from
                // this writer completion, not from the response reader.
                client_fsm::arm_await_signature(client, reactor, sink.clone());
            }
            SendOutcome::Error(e) => {
                warn!("command send failed: {e}, attempting one reconnect");
                if let Err(e2) = client.reconnect(reactor) {
                    warn!("reconnect failed: {e2}");
                } else {
                    client_fsm::arm_await_signature(client, reactor, sink.clone());
                }
                (*sink)("repeat your command\n> ");
            }
        },
        &frame,
    );
    match sent {
        Ok(()) => DispatchOutcome::Sent,
        Err(e) => {
            warn!("could not send DRV_COMMAND: {e}");
            DispatchOutcome::Invalid
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CommandDescriptor;
    use odd_io::UnixSocketClient;
    use std::cell::RefCell;
    use std::os::unix::net::UnixListener;
    use std::rc::Rc;

    fn pump(reactor: &mut Reactor) {
        for _ in 0..40 {
            reactor.stop(true);
            reactor.run().unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }

    fn connected_registry(dir: &tempfile::TempDir, reactor: &mut Reactor, sink: Sink) -> (DriverRegistry, UnixListener) {
        let path = dir.path().join("printer.3.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let mut registry = DriverRegistry::new("sock");
        registry
            .on_created(reactor, dir.path(), std::ffi::OsStr::new("printer.3.sock"), sink)
            .unwrap();
        pump(reactor);
        (registry, listener)
    }

    #[test]
    fn unknown_driver_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let mut reactor = Reactor::new().unwrap();
        let sink: Sink = Rc::new(|_s: &str| {});
        let (registry, _listener) = connected_registry(&dir, &mut reactor, sink.clone());
        let outcome = dispatch(&registry, &mut reactor, "nope", 0, "x", &[], sink);
        assert_eq!(outcome, DispatchOutcome::Invalid);
    }

    #[test]
    fn arity_overflow_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let mut reactor = Reactor::new().unwrap();
        let sink: Sink = Rc::new(|_s: &str| {});
        let (registry, listener) = connected_registry(&dir, &mut reactor, sink.clone());
        let (server_side, _addr) = listener.accept().unwrap();
        let commands = vec![CommandDescriptor { name: "p".into(), arity: 1, descr: "print".into() }];
        std::io::Write::write_all(&mut (&server_side), &wire::encode_drv_info(&commands).unwrap()).unwrap();
        pump(&mut reactor);

        let outcome = dispatch(
            &registry,
            &mut reactor,
            "printer",
            3,
            "p",
            &[b"a".to_vec(), b"b".to_vec()],
            sink,
        );
        assert_eq!(outcome, DispatchOutcome::Invalid);
    }

    #[test]
    fn well_formed_command_is_sent_and_response_rendered() {
        let dir = tempfile::tempdir().unwrap();
        let mut reactor = Reactor::new().unwrap();
        let seen = Rc::new(RefCell::new(String::new()));
        let seen2 = seen.clone();
        let sink: Sink = Rc::new(move |s: &str| seen2.borrow_mut().push_str(s));
        let (registry, listener) = connected_registry(&dir, &mut reactor, sink.clone());
        let (server_side, _addr) = listener.accept().unwrap();
        let commands = vec![CommandDescriptor { name: "p".into(), arity: 1, descr: "print".into() }];
        std::io::Write::write_all(&mut (&server_side), &wire::encode_drv_info(&commands).unwrap()).unwrap();
        pump(&mut reactor);

        let outcome = dispatch(&registry, &mut reactor, "printer", 3, "p", &[b"hello".to_vec()], sink);
        assert_eq!(outcome, DispatchOutcome::Sent);
        pump(&mut reactor);

        let mut got = vec![0u8; wire::signature_len() + wire::drv_command_header_len() + 1 + 5];
        std::io::Read::read_exact(&mut (&server_side), &mut got).unwrap();
        assert_eq!(got[0], wire::SIG_DRV_COMMAND);

        std::io::Write::write_all(&mut (&server_side), &wire::encode_drv_response(b"ok")).unwrap();
        pump(&mut reactor);
        assert_eq!(*seen.borrow(), "ok\n> ");
    }
}
