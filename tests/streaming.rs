//! Integration tests exercising the driver end-to-end through a loopback
//! transport, covering the documented scenarios and invariants.

use grbl_rs::machines::grbl::{Grbl, GrblConfig, GrblEvent, LoopbackTransport};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

fn connected() -> (Grbl, Arc<LoopbackTransport>, mpsc::Receiver<GrblEvent>) {
    connected_with_config(GrblConfig::default())
}

fn connected_with_config(config: GrblConfig) -> (Grbl, Arc<LoopbackTransport>, mpsc::Receiver<GrblEvent>) {
    let transport = Arc::new(LoopbackTransport::new());
    let (tx, rx) = mpsc::channel();
    let grbl = Grbl::with_transport(config, Arc::clone(&transport), move |event| {
        let _ = tx.send(event);
    });
    grbl.cnect("loopback", 115_200).unwrap();
    (grbl, transport, rx)
}

fn recv_until<F: Fn(&GrblEvent) -> bool>(rx: &mpsc::Receiver<GrblEvent>, pred: F, timeout: Duration) -> GrblEvent {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        let event = rx.recv_timeout(remaining).expect("expected event before timeout");
        if pred(&event) {
            return event;
        }
    }
}

#[test]
fn boot_line_triggers_settings_and_hash_requests() {
    let (grbl, transport, rx) = connected();
    transport.push_inbound_line("Grbl 0.9j ['$' for help]");

    recv_until(&rx, |e| matches!(e, GrblEvent::Boot), Duration::from_secs(2));

    // Boot enqueues `$$` and `$#` on the priority queue; give the
    // dispatcher a moment to drive them onto the wire.
    let written = loop {
        let w = transport.take_written();
        if w.len() >= 2 {
            break w;
        }
        std::thread::sleep(Duration::from_millis(10));
    };
    assert_eq!(written[0], b"$$\n".to_vec());
    assert_eq!(written[1], b"$#\n".to_vec());

    grbl.disconnect().unwrap();
}

#[test]
fn settings_accumulate_and_finalize() {
    let (grbl, transport, rx) = connected();
    transport.push_inbound_line("$130=200.000 (x max travel, mm)");
    transport.push_inbound_line("$131=200.000 (y max travel, mm)");
    transport.push_inbound_line("ok");

    let event = recv_until(
        &rx,
        |e| matches!(e, GrblEvent::SettingsDownloaded(_)),
        Duration::from_secs(2),
    );
    match event {
        GrblEvent::SettingsDownloaded(map) => {
            assert_eq!(map.len(), 2);
            assert_eq!(map[&130].value, "200.000");
        }
        _ => unreachable!(),
    }

    grbl.disconnect().unwrap();
}

#[test]
fn stream_two_lines_completes_job_after_both_acks() {
    let (grbl, transport, rx) = connected();
    grbl.stream(vec!["G00Y3".to_string(), "".to_string()]).unwrap();

    let written = loop {
        let w = transport.take_written();
        if w.len() >= 2 {
            break w;
        }
        std::thread::sleep(Duration::from_millis(10));
    };
    assert_eq!(written[0], b"G00Y3\n".to_vec());
    assert_eq!(written[1], b"\n".to_vec());

    recv_until(
        &rx,
        |e| matches!(e, GrblEvent::LineSent { index: 1, .. }),
        Duration::from_secs(2),
    );
    recv_until(
        &rx,
        |e| matches!(e, GrblEvent::LineSent { index: 2, .. }),
        Duration::from_secs(2),
    );

    transport.push_inbound_line("ok");
    transport.push_inbound_line("ok");

    recv_until(&rx, |e| matches!(e, GrblEvent::JobCompleted), Duration::from_secs(2));

    grbl.disconnect().unwrap();
}

#[test]
fn priority_line_jumps_ahead_of_queued_stream() {
    // Small capacity so the ten queued lines can't all land on the wire at
    // once, leaving the priority line room to cut the queue.
    let mut config = GrblConfig::default();
    config.receive_buffer_capacity = 14;
    let (grbl, transport, rx) = connected_with_config(config);
    grbl.stream((0..10).map(|i| format!("G1 X{i}")).collect()).unwrap();

    // Drain every ack so the queue keeps draining and capacity frees up.
    std::thread::spawn({
        let transport = Arc::clone(&transport);
        move || {
            for _ in 0..10 {
                std::thread::sleep(Duration::from_millis(5));
                transport.push_inbound_line("ok");
            }
        }
    });

    grbl.send_immediately("G0 X200").unwrap();

    recv_until(
        &rx,
        |e| matches!(e, GrblEvent::LineSent { text, .. } if text == "G0 X200"),
        Duration::from_secs(2),
    );

    grbl.disconnect().unwrap();
}

#[test]
fn hash_state_accumulates_and_finalizes_on_prb() {
    let (grbl, transport, rx) = connected();
    grbl.request_hash_state().unwrap();

    for name in ["G54", "G55", "G56", "G57", "G58", "G59", "G28", "G30", "G92", "TLO"] {
        transport.push_inbound_line(&format!("[{name}:0.000,0.000,0.000]"));
    }
    transport.push_inbound_line("[PRB:1.000,2.000,3.000:1]");

    let event = recv_until(
        &rx,
        |e| matches!(e, GrblEvent::HashStateUpdate(_)),
        Duration::from_secs(2),
    );
    match event {
        GrblEvent::HashStateUpdate(map) => assert_eq!(map.len(), 11),
        _ => unreachable!(),
    }

    recv_until(&rx, |e| matches!(e, GrblEvent::Probe(_)), Duration::from_secs(2));

    grbl.disconnect().unwrap();
}

#[test]
fn feed_override_rewrites_f_word_on_the_wire() {
    let (grbl, transport, _rx) = connected();
    grbl.set_feed_override(true);
    grbl.request_feed(800.0);
    grbl.stream(vec!["F100 G1 X210".to_string()]).unwrap();

    let written = loop {
        let w = transport.take_written();
        if !w.is_empty() {
            break w;
        }
        std::thread::sleep(Duration::from_millis(10));
    };
    assert_eq!(written[0], b"F800 G1 X210\n".to_vec());

    grbl.disconnect().unwrap();
}

#[test]
fn pause_writes_feed_hold_and_resume_writes_cycle_start() {
    let (grbl, transport, _rx) = connected();
    grbl.stream((0..3).map(|i| format!("G1 X{i}")).collect()).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    grbl.pause().unwrap();
    let written = transport.take_written();
    assert!(written.iter().any(|b| b == &vec![b'!']));

    grbl.resume().unwrap();
    let written = transport.take_written();
    assert!(written.iter().any(|b| b == &vec![b'~']));

    grbl.disconnect().unwrap();
}

#[test]
fn disconnect_unblocks_reader_and_stops_threads() {
    let (grbl, _transport, rx) = connected();
    grbl.disconnect().unwrap();
    recv_until(&rx, |e| matches!(e, GrblEvent::Disconnected), Duration::from_secs(2));
}
