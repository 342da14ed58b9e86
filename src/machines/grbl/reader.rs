//! The line reader thread (§4.2): owns the read loop, forwards raw lines,
//! performs no parsing of its own.

use crate::machines::grbl::event::GrblEvent;
use crate::machines::grbl::orchestrator::DispatchMsg;
use crate::machines::grbl::transport::{ReadOutcome, Transport};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;

pub(crate) fn spawn(transport: Arc<dyn Transport>, dispatch_tx: Sender<DispatchMsg>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("grbl-reader".to_string())
        .spawn(move || loop {
            match transport.read_line() {
                Ok(ReadOutcome::Line(line)) => {
                    if dispatch_tx.send(DispatchMsg::Inbound(line)).is_err() {
                        break;
                    }
                }
                Ok(ReadOutcome::Sentinel) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "line reader stopping after transport error");
                    let _ = dispatch_tx.send(DispatchMsg::Emit(GrblEvent::Log(format!(
                        "line reader stopped: {e}"
                    ))));
                    let _ = dispatch_tx.send(DispatchMsg::Emit(GrblEvent::Disconnected));
                    break;
                }
            }
        })
        .expect("failed to spawn grbl-reader thread")
}
