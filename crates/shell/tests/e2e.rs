//! End-to-end scenarios from spec.md §8 (S1-S3, S5, S6), driven through
//! `Shell`'s public library surface rather than the `oddsh` binary's stdin
//! loop (the binary's own stdin handling is the out-of-scope "external
//! collaborator" frontend per spec.md §1; this is the in-process harness
//! for everything below it).

use std::cell::RefCell;
use std::io::{Read, Write};
use std::os::unix::net::UnixListener;
use std::rc::Rc;
use std::time::Duration;

use odd_core::Config;
use odd_protocol::wire;
use odd_shell::stdin::StdinEvent;
use odd_shell::{exit_codes, Shell};

fn config_for(dir: &std::path::Path) -> Config {
    Config { base_dir: dir.to_path_buf(), socket_suffix: "sock".to_string(), info_wait: Duration::from_millis(200) }
}

fn drain(shell: &mut Shell) {
    for _ in 0..40 {
        shell.reactor_mut().stop(true);
        shell.reactor_mut().run().unwrap();
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn s1_discovery_then_list() {
    let dir = tempfile::tempdir().unwrap();
    let output = Rc::new(RefCell::new(String::new()));
    let output2 = output.clone();
    let sink: odd_protocol::Sink = Rc::new(move |s: &str| output2.borrow_mut().push_str(s));

    let mut shell = Shell::new(&config_for(dir.path()), sink).unwrap();
    assert!(shell.exit_code().is_none());

    let sock_path = dir.path().join("printer.3.sock");
    let listener = UnixListener::bind(&sock_path).unwrap();
    // The directory watcher is realtime, not polled by the test; drive
    // the reactor so the CREATE event is observed and the client connects.
    drain(&mut shell);
    let (server_side, _addr) = listener.accept().unwrap();
    let commands = vec![odd_protocol::CommandDescriptor {
        name: "p".to_string(),
        arity: 1,
        descr: "print".to_string(),
    }];
    Write::write_all(&mut (&server_side), &wire::encode_drv_info(&commands).unwrap()).unwrap();
    drain(&mut shell);

    let mut handler = shell.line_handler();
    handler(shell.reactor_mut(), StdinEvent::Line("list".to_string()));

    assert_eq!(*output.borrow(), "Driver: printer / Slot: 3 / p <arity: 1> --- print\n> ");
}

#[test]
fn s2_command_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let output = Rc::new(RefCell::new(String::new()));
    let output2 = output.clone();
    let sink: odd_protocol::Sink = Rc::new(move |s: &str| output2.borrow_mut().push_str(s));

    let mut shell = Shell::new(&config_for(dir.path()), sink).unwrap();
    let sock_path = dir.path().join("printer.3.sock");
    let listener = UnixListener::bind(&sock_path).unwrap();
    drain(&mut shell);
    let (mut server_side, _addr) = listener.accept().unwrap();
    let commands = vec![odd_protocol::CommandDescriptor {
        name: "p".to_string(),
        arity: 1,
        descr: "print".to_string(),
    }];
    Write::write_all(&mut server_side, &wire::encode_drv_info(&commands).unwrap()).unwrap();
    drain(&mut shell);

    let mut handler = shell.line_handler();
    handler(shell.reactor_mut(), StdinEvent::Line("cmd printer 3 p hello".to_string()));
    drain(&mut shell);

    let mut got = vec![0u8; wire::signature_len() + wire::drv_command_header_len() + 1 + 5];
    server_side.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
    Read::read_exact(&mut server_side, &mut got).unwrap();
    assert_eq!(got[0], wire::SIG_DRV_COMMAND);
    let (cmd_idx, argc) = wire::decode_drv_command_header(&got[1..9]).unwrap();
    assert_eq!((cmd_idx, argc), (0, 1));
    assert_eq!(&got[10..15], b"hello");

    Write::write_all(&mut server_side, &wire::encode_drv_response(b"ok")).unwrap();
    drain(&mut shell);

    assert_eq!(*output.borrow(), "ok\n> ");
}

#[test]
fn s3_unknown_driver_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let output = Rc::new(RefCell::new(String::new()));
    let output2 = output.clone();
    let sink: odd_protocol::Sink = Rc::new(move |s: &str| output2.borrow_mut().push_str(s));
    let mut shell = Shell::new(&config_for(dir.path()), sink).unwrap();

    let mut handler = shell.line_handler();
    handler(shell.reactor_mut(), StdinEvent::Line("cmd nope 0 x".to_string()));

    assert_eq!(*output.borrow(), "Invalid command\n> ");
}

#[test]
fn s5_delete_removes_driver_from_list() {
    let dir = tempfile::tempdir().unwrap();
    let output = Rc::new(RefCell::new(String::new()));
    let output2 = output.clone();
    let sink: odd_protocol::Sink = Rc::new(move |s: &str| output2.borrow_mut().push_str(s));
    let mut shell = Shell::new(&config_for(dir.path()), sink).unwrap();

    let sock_path = dir.path().join("printer.3.sock");
    let _listener = UnixListener::bind(&sock_path).unwrap();
    drain(&mut shell);

    std::fs::remove_file(&sock_path).unwrap();
    drain(&mut shell);

    let mut handler = shell.line_handler();
    handler(shell.reactor_mut(), StdinEvent::Line("list".to_string()));
    assert_eq!(*output.borrow(), "> ");
}

#[test]
fn s6_self_delete_exit_code_differs_from_orderly_eof() {
    let dir = tempfile::tempdir().unwrap();
    let sink: odd_protocol::Sink = Rc::new(|_s: &str| {});
    let mut shell = Shell::new(&config_for(dir.path()), sink).unwrap();
    drain(&mut shell);

    std::fs::remove_dir(dir.path()).unwrap();
    drain(&mut shell);

    assert_eq!(shell.exit_code(), Some(exit_codes::SELF_DELETE));
    assert_ne!(shell.exit_code(), Some(exit_codes::ORDERLY));
}
