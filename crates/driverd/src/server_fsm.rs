//! The driver side's per-connection protocol state machine: the mirror
//! image of `odd_protocol::client_fsm`, reading `DRV_COMMAND` frames off an
//! accepted connection and replying with `DRV_RESPONSE` (spec.md §4.6.3,
//! §4.6.4). Built the same way as its shell-side counterpart — a chain of
//! `recv` completion closures with no separate state enum.

use std::os::unix::io::RawFd;
use std::rc::Rc;

use odd_io::{RecvOutcome, Reactor, SendOutcome, UnixSocketServer};
use odd_protocol::wire;
use tracing::warn;

use crate::commands::Commands;

/// Per-connection state accumulated across a `DRV_COMMAND`'s two-phase
/// argument reads.
#[derive(Default)]
pub(crate) struct PendingCommand {
    cmd_idx: u32,
    argc: u32,
    args: Vec<Vec<u8>>,
}

type Server = UnixSocketServer<PendingCommand>;

/// Entry point, called right after accept to send the unsolicited
/// `DRV_INFO` and then arm the first `recv(signature)` (spec.md §4.6.3:
/// "sent unsolicited by a driver as the first message after the client
/// connects").
pub fn on_accept(server: &Server, reactor: &mut Reactor, fd: RawFd, commands: Rc<Commands>) {
    let info = match wire::encode_drv_info(&commands.descriptors()) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("failed to encode DRV_INFO: {e}, closing connection");
            let _ = server.close_connection(reactor, fd);
            return;
        }
    };
    let commands2 = commands.clone();
    if let Err(e) = server.send(reactor, fd, &info, move |server, reactor, fd, outcome| {
        match outcome {
            SendOutcome::Complete => arm_await_signature(server, reactor, fd, commands2.clone()),
            SendOutcome::Error(e) => {
                warn!(fd, "failed to send DRV_INFO: {e}, closing connection");
                let _ = server.close_connection(reactor, fd);
            }
        }
    }) {
        warn!("failed to arm DRV_INFO send: {e}");
    }
}

fn arm_await_signature(server: &Server, reactor: &mut Reactor, fd: RawFd, commands: Rc<Commands>) {
    if let Err(e) = server.recv(reactor, fd, wire::signature_len(), move |server, reactor, fd, outcome| {
        on_signature(server, reactor, fd, outcome, commands.clone());
    }) {
        warn!("failed to arm signature recv: {e}");
    }
}

fn on_signature(server: &Server, reactor: &mut Reactor, fd: RawFd, outcome: RecvOutcome, commands: Rc<Commands>) {
    match outcome {
        RecvOutcome::Complete => {
            let byte = server.with_connection(fd, |c| {
                let b = c.recv_data()[0];
                c.mark_consumed(1);
                b
            });
            match byte {
                Some(wire::SIG_DRV_COMMAND) => arm_command_header(server, reactor, fd, commands),
                Some(other) => {
                    warn!(fd, signature = other, "unexpected signature, closing connection");
                    let _ = server.close_connection(reactor, fd);
                }
                None => {}
            }
        }
        RecvOutcome::Eof => {
            let _ = server.close_connection(reactor, fd);
        }
        RecvOutcome::Error(e) => {
            warn!(fd, "read error on signature: {e}, closing connection");
            let _ = server.close_connection(reactor, fd);
        }
    }
}

fn arm_command_header(server: &Server, reactor: &mut Reactor, fd: RawFd, commands: Rc<Commands>) {
    if let Err(e) = server.recv(reactor, fd, wire::drv_command_header_len(), move |server, reactor, fd, outcome| {
        on_command_header(server, reactor, fd, outcome, commands.clone());
    }) {
        warn!("failed to arm DRV_COMMAND header recv: {e}");
    }
}

fn on_command_header(
    server: &Server,
    reactor: &mut Reactor,
    fd: RawFd,
    outcome: RecvOutcome,
    commands: Rc<Commands>,
) {
    match outcome {
        RecvOutcome::Complete => {
            let data = server.with_connection(fd, |c| {
                let d = c.recv_data().to_vec();
                c.mark_consumed(d.len());
                d
            });
            let Some(data) = data else { return };
            match wire::decode_drv_command_header(&data) {
                Ok((cmd_idx, argc)) => {
                    server.with_connection(fd, |c| {
                        c.priv_data = Some(PendingCommand { cmd_idx, argc, args: Vec::new() });
                    });
                    arm_next_arg(server, reactor, fd, commands);
                }
                Err(e) => {
                    warn!(fd, "malformed DRV_COMMAND header: {e}, closing connection");
                    let _ = server.close_connection(reactor, fd);
                }
            }
        }
        RecvOutcome::Eof => {
            let _ = server.close_connection(reactor, fd);
        }
        RecvOutcome::Error(e) => {
            warn!(fd, "read error on DRV_COMMAND header: {e}, closing connection");
            let _ = server.close_connection(reactor, fd);
        }
    }
}

/// Arms the next argument's length-prefixed two-phase read, or moves on to
/// execution once `argc` arguments have been accumulated.
fn arm_next_arg(server: &Server, reactor: &mut Reactor, fd: RawFd, commands: Rc<Commands>) {
    let done = server
        .with_connection(fd, |c| {
            let pending = c.priv_data.as_ref()?;
            Some(pending.args.len() as u32 >= pending.argc)
        })
        .flatten()
        .unwrap_or(true);
    if done {
        execute_and_respond(server, reactor, fd, commands);
        return;
    }
    if let Err(e) = server.recv(reactor, fd, 1, move |server, reactor, fd, outcome| {
        on_arg_len(server, reactor, fd, outcome, commands.clone());
    }) {
        warn!("failed to arm argument length recv: {e}");
    }
}

fn on_arg_len(server: &Server, reactor: &mut Reactor, fd: RawFd, outcome: RecvOutcome, commands: Rc<Commands>) {
    match outcome {
        RecvOutcome::Complete => {
            let len = server.with_connection(fd, |c| {
                let len = wire::decode_arg_len(c.recv_data()[0]);
                c.mark_consumed(1);
                len
            });
            let Some(len) = len else { return };
            arm_arg_bytes(server, reactor, fd, len, commands);
        }
        RecvOutcome::Eof => {
            let _ = server.close_connection(reactor, fd);
        }
        RecvOutcome::Error(e) => {
            warn!(fd, "read error on argument length: {e}, closing connection");
            let _ = server.close_connection(reactor, fd);
        }
    }
}

fn arm_arg_bytes(server: &Server, reactor: &mut Reactor, fd: RawFd, len: usize, commands: Rc<Commands>) {
    if let Err(e) = server.recv(reactor, fd, len, move |server, reactor, fd, outcome| {
        on_arg_bytes(server, reactor, fd, outcome, commands.clone());
    }) {
        warn!("failed to arm argument bytes recv: {e}");
    }
}

fn on_arg_bytes(server: &Server, reactor: &mut Reactor, fd: RawFd, outcome: RecvOutcome, commands: Rc<Commands>) {
    match outcome {
        RecvOutcome::Complete => {
            let arg = server.with_connection(fd, |c| {
                let a = c.recv_data().to_vec();
                c.mark_consumed(a.len());
                a
            });
            let Some(arg) = arg else { return };
            server.with_connection(fd, |c| {
                if let Some(pending) = c.priv_data.as_mut() {
                    pending.args.push(arg);
                }
            });
            arm_next_arg(server, reactor, fd, commands);
        }
        RecvOutcome::Eof => {
            let _ = server.close_connection(reactor, fd);
        }
        RecvOutcome::Error(e) => {
            warn!(fd, "read error on argument bytes: {e}, closing connection");
            let _ = server.close_connection(reactor, fd);
        }
    }
}

fn execute_and_respond(server: &Server, reactor: &mut Reactor, fd: RawFd, commands: Rc<Commands>) {
    let pending = server.with_connection(fd, |c| c.priv_data.take()).flatten();
    let Some(pending) = pending else { return };
    let payload = commands
        .execute(pending.cmd_idx, &pending.args)
        .unwrap_or_else(|| b"error: unknown command".to_vec());
    let response = wire::encode_drv_response(&payload);
    let commands2 = commands.clone();
    if let Err(e) = server.send(reactor, fd, &response, move |server, reactor, fd, outcome| match outcome {
        SendOutcome::Complete => arm_await_signature(server, reactor, fd, commands2.clone()),
        SendOutcome::Error(e) => {
            warn!(fd, "failed to send DRV_RESPONSE: {e}, closing connection");
            let _ = server.close_connection(reactor, fd);
        }
    }) {
        warn!("failed to arm DRV_RESPONSE send: {e}");
    }
}
