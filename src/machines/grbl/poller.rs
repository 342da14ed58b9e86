//! Status polling thread (§4.3). Writes `?` at a fixed cadence while
//! enabled; the same cadence also drives dry-run mode's synthetic
//! acknowledgements, since dry-run never receives real `ok`/`error` lines
//! to react to.

use crate::machines::grbl::event::GrblEvent;
use crate::machines::grbl::flow::FlowController;
use crate::machines::grbl::orchestrator::DispatchMsg;
use crate::machines::grbl::transport::Transport;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub(crate) fn spawn(
    transport: Arc<dyn Transport>,
    flow: Arc<Mutex<FlowController>>,
    dispatch_tx: Sender<DispatchMsg>,
    interval: Duration,
    enabled: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("grbl-poller".to_string())
        .spawn(move || loop {
            std::thread::sleep(interval);
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            if !enabled.load(Ordering::SeqCst) {
                continue;
            }
            if transport.write_realtime(b'?').is_err() {
                let _ = dispatch_tx.send(DispatchMsg::Emit(GrblEvent::Disconnected));
                break;
            }
            if dispatch_tx
                .send(DispatchMsg::Emit(GrblEvent::Write(vec![b'?'])))
                .is_err()
            {
                break;
            }
            if let Some(outcome) = flow.lock().dry_run_tick() {
                if dispatch_tx
                    .send(DispatchMsg::Emit(GrblEvent::ProcessedCommand {
                        index: outcome.index,
                        text: outcome.text,
                    }))
                    .is_err()
                {
                    break;
                }
                if let Some(p) = outcome.progress_percent {
                    let _ = dispatch_tx.send(DispatchMsg::Emit(GrblEvent::ProgressPercent(p)));
                }
                if outcome.job_completed {
                    let _ = dispatch_tx.send(DispatchMsg::Emit(GrblEvent::JobCompleted));
                }
            }
        })
        .expect("failed to spawn grbl-poller thread")
}
