//! Minimal demo: streams a few lines of G-Code to a loopback transport in
//! dry-run mode and prints the events the driver emits. No serial hardware
//! involved; useful as a smoke test of the wiring.

use grbl_rs::machines::grbl::{Grbl, GrblConfig, GrblEvent, LoopbackTransport};
use std::sync::Arc;

fn main() {
    tracing_subscriber::fmt::init();

    let transport = Arc::new(LoopbackTransport::new());
    let loopback = Arc::clone(&transport);

    let grbl = Grbl::with_transport(GrblConfig::default(), transport, |event| {
        println!("{event:?}");
    });
    grbl.set_dry_run(true);

    grbl.cnect("loopback", 115_200).expect("cnect");
    loopback.push_inbound_line("Grbl 1.1h ['$' for help]");

    grbl.stream(vec![
        "G21".to_string(),
        "G0 X10 Y10".to_string(),
        "G1 X20 Y20 F500".to_string(),
    ])
    .expect("stream");

    grbl.poll_start();
    std::thread::sleep(std::time::Duration::from_millis(800));

    grbl.disconnect().expect("disconnect");
    println!("stats: {:?}", grbl.stats());
}
