//! The per-client protocol state machine (spec.md §4.6.4). Each phase is a
//! `recv` completion closure that decides whether to arm the next phase or
//! deliver the finished message; there is no separate state enum to drive
//! — the chain of closures *is* the state machine, per spec.md §9's note
//! that two-phase reads should be modeled as a small reader that re-arms
//! itself rather than recursing through the I/O service.

use odd_io::{Reactor, RecvOutcome, UnixSocketClient};
use tracing::warn;

use crate::registry::{DriverState, Sink};
use crate::wire;

type Client = UnixSocketClient<DriverState>;

/// Entry point: arms the `recv(sizeof signature)` that every connection
/// starts (and returns to) between messages.
pub fn arm_await_signature(client: &Client, reactor: &mut Reactor, sink: Sink) {
    let sink2 = sink.clone();
    let client2 = client.clone();
    if let Err(e) = client.recv(reactor, wire::signature_len(), move |_c, reactor, outcome| {
        on_signature(&client2, reactor, outcome, sink2.clone());
    }) {
        warn!("failed to arm signature recv: {e}");
    }
}

fn on_signature(client: &Client, reactor: &mut Reactor, outcome: RecvOutcome, sink: Sink) {
    match outcome {
        RecvOutcome::Complete => {
            let byte = client.recv_data()[0];
            client.mark_consumed(1);
            match byte {
                wire::SIG_DRV_INFO => arm_info_header(client, reactor, sink),
                wire::SIG_DRV_RESPONSE => arm_resp_header(client, reactor, sink),
                other => {
                    warn!(signature = other, peer = ?client.peer(), "unknown signature, reconnecting");
                    reconnect_or_warn(client, reactor, sink);
                }
            }
        }
        RecvOutcome::Eof => {
            warn!(peer = ?client.peer(), "peer closed connection, waiting for delete event");
        }
        RecvOutcome::Error(e) => {
            warn!(peer = ?client.peer(), "read error on signature: {e}, reconnecting");
            reconnect_or_warn(client, reactor, sink);
        }
    }
}

fn arm_info_header(client: &Client, reactor: &mut Reactor, sink: Sink) {
    let sink2 = sink.clone();
    let client2 = client.clone();
    if let Err(e) = client.recv(reactor, wire::drv_info_header_len(), move |_c, reactor, outcome| {
        on_info_header(&client2, reactor, outcome, sink2.clone());
    }) {
        warn!("failed to arm DRV_INFO header recv: {e}");
    }
}

fn on_info_header(client: &Client, reactor: &mut Reactor, outcome: RecvOutcome, sink: Sink) {
    match outcome {
        RecvOutcome::Complete => {
            let data = client.recv_data().to_vec();
            client.mark_consumed(data.len());
            match wire::decode_drv_info_count(&data) {
                Ok(count) => arm_info_tail(client, reactor, count, sink),
                Err(e) => {
                    warn!("malformed DRV_INFO header: {e}, reconnecting");
                    reconnect_or_warn(client, reactor, sink);
                }
            }
        }
        RecvOutcome::Eof => warn!(peer = ?client.peer(), "peer closed mid DRV_INFO header"),
        RecvOutcome::Error(e) => {
            warn!("read error on DRV_INFO header: {e}, reconnecting");
            reconnect_or_warn(client, reactor, sink);
        }
    }
}

fn arm_info_tail(client: &Client, reactor: &mut Reactor, count: u32, sink: Sink) {
    let tail_len = count as usize * wire::drv_info_record_len();
    let sink2 = sink.clone();
    let client2 = client.clone();
    if let Err(e) = client.recv(reactor, tail_len, move |_c, reactor, outcome| {
        on_info_tail(&client2, reactor, outcome, count, sink2.clone());
    }) {
        warn!("failed to arm DRV_INFO tail recv: {e}");
    }
}

fn on_info_tail(client: &Client, reactor: &mut Reactor, outcome: RecvOutcome, count: u32, sink: Sink) {
    match outcome {
        RecvOutcome::Complete => {
            let data = client.recv_data().to_vec();
            client.mark_consumed(data.len());
            match wire::decode_drv_info_records(&data, count) {
                Ok(commands) => {
                    client.with_priv(|p| {
                        if let Some(state) = p {
                            if state.info_received {
                                warn!(peer = ?client.peer(), "second DRV_INFO received, overwriting command table");
                            }
                            state.commands = commands;
                            state.info_received = true;
                        }
                    });
                    // Resolved Open Question (spec.md §9): re-arm here so an
                    // unsolicited second DRV_INFO is observed and discarded
                    // by on_signature's default arm rather than wedging the
                    // connection with nothing scheduled.
                    arm_await_signature(client, reactor, sink);
                }
                Err(e) => {
                    warn!("malformed DRV_INFO tail: {e}, reconnecting");
                    reconnect_or_warn(client, reactor, sink);
                }
            }
        }
        RecvOutcome::Eof => warn!(peer = ?client.peer(), "peer closed mid DRV_INFO"),
        RecvOutcome::Error(e) => {
            warn!("read error on DRV_INFO tail: {e}, reconnecting");
            reconnect_or_warn(client, reactor, sink);
        }
    }
}

fn arm_resp_header(client: &Client, reactor: &mut Reactor, sink: Sink) {
    let sink2 = sink.clone();
    let client2 = client.clone();
    if let Err(e) = client.recv(reactor, wire::drv_response_header_len(), move |_c, reactor, outcome| {
        on_resp_header(&client2, reactor, outcome, sink2.clone());
    }) {
        warn!("failed to arm DRV_RESPONSE header recv: {e}");
    }
}

fn on_resp_header(client: &Client, reactor: &mut Reactor, outcome: RecvOutcome, sink: Sink) {
    match outcome {
        RecvOutcome::Complete => {
            let data = client.recv_data().to_vec();
            client.mark_consumed(data.len());
            match wire::decode_drv_response_len(&data) {
                Ok(len) => arm_resp_tail(client, reactor, len, sink),
                Err(e) => {
                    warn!("malformed DRV_RESPONSE header: {e}, reconnecting");
                    reconnect_or_warn(client, reactor, sink);
                }
            }
        }
        RecvOutcome::Eof => warn!(peer = ?client.peer(), "peer closed mid DRV_RESPONSE header"),
        RecvOutcome::Error(e) => {
            warn!("read error on DRV_RESPONSE header: {e}, reconnecting");
            reconnect_or_warn(client, reactor, sink);
        }
    }
}

fn arm_resp_tail(client: &Client, reactor: &mut Reactor, len: u32, sink: Sink) {
    let sink2 = sink.clone();
    let client2 = client.clone();
    if let Err(e) = client.recv(reactor, len as usize, move |_c, reactor, outcome| {
        on_resp_tail(&client2, reactor, outcome, sink2.clone());
    }) {
        warn!("failed to arm DRV_RESPONSE tail recv: {e}");
    }
}

fn on_resp_tail(client: &Client, reactor: &mut Reactor, outcome: RecvOutcome, sink: Sink) {
    match outcome {
        RecvOutcome::Complete => {
            let payload = client.recv_data().to_vec();
            client.mark_consumed(payload.len());
            let text = String::from_utf8_lossy(&payload);
            (*sink)(&format!("{text}\n> "));
            // Re-arming for the *next* response is scheduled from the
            // writer completion of the next command (spec.md §4.6.4); the
            // registry stays purely reactive between commands.
        }
        RecvOutcome::Eof => warn!(peer = ?client.peer(), "peer closed mid DRV_RESPONSE"),
        RecvOutcome::Error(e) => {
            warn!("read error on DRV_RESPONSE tail: {e}, reconnecting");
            reconnect_or_warn(client, reactor, sink);
        }
    }
}

fn reconnect_or_warn(client: &Client, reactor: &mut Reactor, sink: Sink) {
    match client.reconnect(reactor) {
        Ok(()) => arm_await_signature(client, reactor, sink),
        Err(e) => warn!("reconnect failed: {e}"),
    }
}
