//! `Grbl`: the public driver handle. Owns the transport, the mirrored
//! firmware state, the flow controller, and the three worker threads
//! (reader, poller, dispatcher), and exposes the command surface an
//! embedder drives a job with.
//!
//! Exactly one internal channel (`DispatchMsg`) carries every event that
//! can reach the embedder's callback, whether it originates from a parsed
//! inbound line (handled directly on the dispatcher thread) or from a
//! calling-thread API call (`stream`, `send_immediately`, ...). Only the
//! dispatcher thread ever invokes the callback, so two invocations never
//! overlap regardless of which thread produced the event.
//!
//! The same discipline holds for the transport: a calling-thread API call
//! never pulls from the flow controller and writes queued lines itself. It
//! mutates the flow controller (cheap, lock-protected) and then posts
//! `DispatchMsg::DriveSends`, so the dispatcher thread is the only one that
//! ever calls `next_sends()` followed by `transport.write()` for queued
//! lines — the two can't race and reorder what lands on the wire. Real-time
//! single-byte writes (`!`/`~`/soft-reset) are the one exception: like the
//! poller, the calling thread writes the byte directly (the transport
//! serializes concurrent writers on its own), and only the resulting
//! `Write` event is posted through the channel for the dispatcher to emit.

use crate::machines::grbl::commands::GrblQuery;
use crate::machines::grbl::config::GrblConfig;
use crate::machines::grbl::error::GrblError;
use crate::machines::grbl::event::GrblEvent;
use crate::machines::grbl::flow::{FlowController, FlowState, StreamingMode};
use crate::machines::grbl::parser::{Accumulated, ParsedLine, ResponseParser};
use crate::machines::grbl::preprocessor::{FeedOverridePreprocessor, FeedOverrideState};
use crate::machines::grbl::stats::SessionStats;
use crate::machines::grbl::state::{FirmwareState, Mode};
use crate::machines::grbl::transport::Transport;
use crate::machines::grbl::{poller, reader};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Everything the dispatcher thread needs to process, in the order it
/// arrives. `Inbound` lines are parsed inline; `Emit` carries an event
/// already assembled by some other thread; `Shutdown` ends the loop.
pub(crate) enum DispatchMsg {
    Inbound(String),
    /// Pull whatever the flow controller is ready to send right now and
    /// write/emit it. Posted by calling-thread API calls instead of driving
    /// sends themselves, so the dispatcher is the sole writer.
    DriveSends,
    Emit(GrblEvent),
    Shutdown,
}

struct ThreadHandles {
    reader: JoinHandle<()>,
    poller: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// The driver handle. Cheap to clone-share via `Arc<Grbl>` if an embedder
/// needs to call it from multiple threads; every method here takes `&self`.
pub struct Grbl {
    config: GrblConfig,
    transport: Arc<dyn Transport>,
    state: Arc<RwLock<FirmwareState>>,
    flow: Arc<Mutex<FlowController>>,
    feed_override: Arc<Mutex<FeedOverrideState>>,
    stats: Arc<Mutex<SessionStats>>,
    callback: Arc<dyn Fn(GrblEvent) + Send + Sync>,
    poll_enabled: Arc<AtomicBool>,
    poll_shutdown: Arc<AtomicBool>,
    dispatch_tx: Mutex<Option<Sender<DispatchMsg>>>,
    threads: Mutex<Option<ThreadHandles>>,
}

impl Grbl {
    /// Builds a driver around an explicit transport (the real serial
    /// backend, a [`LoopbackTransport`](crate::machines::grbl::transport::LoopbackTransport)
    /// for tests, or dry-run use).
    pub fn with_transport(
        config: GrblConfig,
        transport: Arc<dyn Transport>,
        callback: impl Fn(GrblEvent) + Send + Sync + 'static,
    ) -> Self {
        let feed_override = Arc::new(Mutex::new(FeedOverrideState::default()));
        let preprocessor = Box::new(FeedOverridePreprocessor::new(Arc::clone(&feed_override)));
        let flow = FlowController::new(config.receive_buffer_capacity, config.initial_streaming_mode, preprocessor);
        Self {
            transport,
            state: Arc::new(RwLock::new(FirmwareState::new())),
            flow: Arc::new(Mutex::new(flow)),
            feed_override,
            stats: Arc::new(Mutex::new(SessionStats::default())),
            callback: Arc::new(callback),
            poll_enabled: Arc::new(AtomicBool::new(false)),
            poll_shutdown: Arc::new(AtomicBool::new(false)),
            dispatch_tx: Mutex::new(None),
            threads: Mutex::new(None),
            config,
        }
    }

    /// Builds a driver around the real serial transport.
    #[cfg(feature = "serial")]
    pub fn new(config: GrblConfig, callback: impl Fn(GrblEvent) + Send + Sync + 'static) -> Self {
        let transport: Arc<dyn Transport> =
            Arc::new(crate::machines::grbl::transport::SerialTransport::new());
        Self::with_transport(config, transport, callback)
    }

    pub fn config(&self) -> &GrblConfig {
        &self.config
    }

    /// A point-in-time copy of the mirrored firmware state.
    pub fn state(&self) -> FirmwareState {
        self.state.read().clone()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.lock().clone()
    }

    pub fn flow_state(&self) -> FlowState {
        self.flow.lock().state()
    }

    /// Enables or disables dry-run: lines are preprocessed and accounted
    /// for in the receive-buffer bookkeeping exactly as normal, but never
    /// actually written to the transport; acknowledgements are synthesized
    /// from the poller's cadence instead.
    pub fn set_dry_run(&self, enabled: bool) {
        self.flow.lock().set_dry_run(enabled);
    }

    pub fn is_dry_run(&self) -> bool {
        self.flow.lock().is_dry_run()
    }

    /// Opens the transport and starts the reader, poller, and dispatcher
    /// threads. Polling starts disabled; call [`poll_start`](Self::poll_start)
    /// once connected.
    pub fn cnect(&self, device: &str, baud: u32) -> Result<(), GrblError> {
        if self.threads.lock().is_some() {
            return Err(GrblError::AlreadyConnected);
        }

        self.transport.open(device, baud)?;

        let (tx, rx) = mpsc::channel::<DispatchMsg>();
        self.poll_shutdown.store(false, Ordering::SeqCst);
        self.poll_enabled.store(false, Ordering::SeqCst);

        let reader_handle = reader::spawn(Arc::clone(&self.transport), tx.clone());
        let poller_handle = poller::spawn(
            Arc::clone(&self.transport),
            Arc::clone(&self.flow),
            tx.clone(),
            self.config.poll_interval,
            Arc::clone(&self.poll_enabled),
            Arc::clone(&self.poll_shutdown),
        );
        let dispatcher_handle = self.spawn_dispatcher(rx);

        *self.threads.lock() = Some(ThreadHandles {
            reader: reader_handle,
            poller: poller_handle,
            dispatcher: dispatcher_handle,
        });
        *self.dispatch_tx.lock() = Some(tx);

        Ok(())
    }

    /// Orderly shutdown: stops polling, optionally drains or discards
    /// queued work, closes the transport (unblocking the reader), joins
    /// the reader, tells the dispatcher to stop, and joins it.
    pub fn disconnect(&self) -> Result<(), GrblError> {
        let Some(handles) = self.threads.lock().take() else {
            return Err(GrblError::NotConnected);
        };

        self.poll_shutdown.store(true, Ordering::SeqCst);

        if self.config.discard_pending_writes_on_disconnect {
            self.flow.lock().reset_for_softreset();
        } else {
            let deadline = std::time::Instant::now() + self.config.disconnect_drain_timeout;
            while self.flow.lock().state() != FlowState::Idle && std::time::Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(20));
            }
        }

        self.transport.close()?;
        let _ = handles.reader.join();

        if let Some(tx) = self.dispatch_tx.lock().take() {
            let _ = tx.send(DispatchMsg::Emit(GrblEvent::Disconnected));
            let _ = tx.send(DispatchMsg::Shutdown);
        }
        let _ = handles.dispatcher.join();
        let _ = handles.poller.join();

        Ok(())
    }

    pub fn poll_start(&self) {
        self.poll_enabled.store(true, Ordering::SeqCst);
    }

    pub fn poll_stop(&self) {
        self.poll_enabled.store(false, Ordering::SeqCst);
    }

    /// Queues `line` on the PriorityQueue, ahead of anything streaming.
    pub fn send_immediately(&self, line: impl Into<String>) -> Result<(), GrblError> {
        self.flow.lock().send_immediately(line.into());
        self.notify_dispatcher(DispatchMsg::DriveSends)
    }

    /// Appends `lines` to the StreamQueue and begins (or continues)
    /// streaming.
    pub fn stream(&self, lines: Vec<String>) -> Result<(), GrblError> {
        self.flow.lock().stream(lines);
        self.notify_dispatcher(DispatchMsg::DriveSends)
    }

    /// Convenience for a single streamed line (`send_with_queue`).
    pub fn send_with_queue(&self, line: impl Into<String>) -> Result<(), GrblError> {
        self.stream(vec![line.into()])
    }

    /// Pauses streaming and writes the feed-hold real-time byte (`!`). The
    /// InflightLog is left untouched; no new lines dispatch until `resume`.
    /// A no-op (including on the wire) unless currently `Streaming`.
    pub fn pause(&self) -> Result<(), GrblError> {
        let was_streaming = self.flow.lock().state() == FlowState::Streaming;
        self.flow.lock().pause();
        if was_streaming {
            self.transport
                .write_realtime(crate::machines::grbl::commands::RealtimeByte::FeedHold.as_byte())?;
            self.notify_dispatcher(DispatchMsg::Emit(GrblEvent::Write(vec![b'!'])))?;
        }
        Ok(())
    }

    /// Resumes streaming and writes the cycle-start real-time byte (`~`),
    /// picking dispatch back up from the exact next queue position. A
    /// no-op (including on the wire) unless currently `Paused`.
    pub fn resume(&self) -> Result<(), GrblError> {
        let was_paused = self.flow.lock().state() == FlowState::Paused;
        self.flow.lock().resume();
        if was_paused {
            self.transport
                .write_realtime(crate::machines::grbl::commands::RealtimeByte::CycleStart.as_byte())?;
            self.notify_dispatcher(DispatchMsg::Emit(GrblEvent::Write(vec![b'~'])))?;
        }
        self.notify_dispatcher(DispatchMsg::DriveSends)
    }

    /// Halts streaming, stashing the unsent tail of the StreamQueue.
    pub fn halt(&self) {
        self.flow.lock().halt();
    }

    pub fn unstash(&self) -> Result<(), GrblError> {
        self.flow.lock().unstash();
        self.notify_dispatcher(DispatchMsg::DriveSends)
    }

    /// Writes the soft-reset real-time byte and clears all local queueing
    /// state; the InflightLog and `F` fully reset once `Boot` is observed
    /// (P7), but the queues are cleared immediately since nothing
    /// in-flight will ever be acknowledged after a soft reset.
    pub fn softreset(&self) -> Result<(), GrblError> {
        self.transport
            .write_realtime(crate::machines::grbl::commands::RealtimeByte::SoftReset.as_byte())?;
        self.flow.lock().reset_for_softreset();
        self.notify_dispatcher(DispatchMsg::Emit(GrblEvent::Write(vec![
            crate::machines::grbl::commands::RealtimeByte::SoftReset.as_byte(),
        ])))
    }

    pub fn set_streaming_mode(&self, mode: StreamingMode) {
        self.flow.lock().set_mode(mode);
    }

    pub fn set_feed_override(&self, enabled: bool) {
        self.feed_override.lock().enabled = enabled;
    }

    pub fn request_feed(&self, value: f64) {
        self.feed_override.lock().feed = Some(value);
    }

    pub fn request_settings(&self) -> Result<(), GrblError> {
        self.send_immediately(GrblQuery::Settings.to_string())
    }

    pub fn request_hash_state(&self) -> Result<(), GrblError> {
        self.send_immediately(GrblQuery::HashState.to_string())
    }

    pub fn request_gcode_parser_state(&self) -> Result<(), GrblError> {
        self.send_immediately(GrblQuery::GcodeParserState.to_string())
    }

    /// Posts a message to the dispatcher thread. This is the only path by
    /// which a calling thread can get an event to the embedder's callback
    /// or a queued line onto the wire; the dispatcher alone acts on it.
    fn notify_dispatcher(&self, msg: DispatchMsg) -> Result<(), GrblError> {
        match self.dispatch_tx.lock().as_ref() {
            Some(tx) => tx.send(msg).map_err(|_| GrblError::NotConnected),
            None => Err(GrblError::NotConnected),
        }
    }

    fn spawn_dispatcher(&self, rx: mpsc::Receiver<DispatchMsg>) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let flow = Arc::clone(&self.flow);
        let stats = Arc::clone(&self.stats);
        let callback = Arc::clone(&self.callback);
        let transport = Arc::clone(&self.transport);

        std::thread::Builder::new()
            .name("grbl-dispatcher".to_string())
            .spawn(move || {
                let mut parser = ResponseParser::new();
                for msg in rx {
                    match msg {
                        DispatchMsg::Shutdown => break,
                        DispatchMsg::Emit(event) => callback(event),
                        DispatchMsg::DriveSends => {
                            if let Err(e) = drive_sends_from(&transport, &flow, &stats, &callback) {
                                warn!(error = %e, "send failed while driving sends, disconnecting");
                                callback(GrblEvent::Log(format!("send failed: {e}")));
                                callback(GrblEvent::Disconnected);
                                break;
                            }
                        }
                        DispatchMsg::Inbound(line) => {
                            for event in handle_inbound_line(&mut parser, &state, &flow, &stats, &line) {
                                callback(event);
                            }
                            if let Err(e) = drive_sends_from(&transport, &flow, &stats, &callback) {
                                warn!(error = %e, "send failed after inbound line, disconnecting");
                                callback(GrblEvent::Log(format!("send failed after inbound line: {e}")));
                                callback(GrblEvent::Disconnected);
                                break;
                            }
                        }
                    }
                }
                debug!("grbl dispatcher thread exiting");
            })
            .expect("failed to spawn grbl-dispatcher thread")
    }
}

/// Free-function twin of [`Grbl::drive_sends`], used by the dispatcher
/// thread (which doesn't hold a `&Grbl`, only the shared fields it needs).
fn drive_sends_from(
    transport: &Arc<dyn Transport>,
    flow: &Mutex<FlowController>,
    stats: &Mutex<SessionStats>,
    callback: &Arc<dyn Fn(GrblEvent) + Send + Sync>,
) -> Result<(), GrblError> {
    let (items, dry_run) = {
        let mut flow = flow.lock();
        let items = flow.next_sends();
        (items, flow.is_dry_run())
    };

    for item in items {
        let mut bytes = item.text.clone().into_bytes();
        bytes.push(b'\n');

        if !dry_run {
            transport.write(&bytes)?;
        }

        stats.lock().record_sent(bytes.len());
        callback(GrblEvent::Write(bytes));
        callback(GrblEvent::LineSent {
            index: item.index,
            text: item.text,
        });
        if let Some(vars) = item.vars {
            callback(GrblEvent::VarsChange(vars));
        }
    }

    Ok(())
}

/// Classifies one inbound line and turns it into the sequence of events the
/// dispatcher should emit, applying its effects to the shared state mirror
/// and flow controller along the way.
fn handle_inbound_line(
    parser: &mut ResponseParser,
    state: &RwLock<FirmwareState>,
    flow: &Mutex<FlowController>,
    stats: &Mutex<SessionStats>,
    line: &str,
) -> Vec<GrblEvent> {
    let mut events = vec![GrblEvent::Read(line.to_string())];
    let (primary, secondary) = parser.process_line(line);

    match primary {
        ParsedLine::Ok => push_ack_events(&mut events, flow, stats, false, None),
        ParsedLine::Error(code) => push_ack_events(&mut events, flow, stats, true, Some(code)),
        ParsedLine::Alarm(code) => {
            state.write().mode = Mode::Alarm;
            events.push(GrblEvent::Alarm(code));
        }
        ParsedLine::Boot(_version) => {
            state.write().apply_boot();
            let mut f = flow.lock();
            f.send_immediately(GrblQuery::Settings.to_string());
            f.send_immediately(GrblQuery::HashState.to_string());
            drop(f);
            events.push(GrblEvent::Boot);
        }
        ParsedLine::Status {
            mode,
            machine_position,
            working_position,
            feed,
            bufsize,
        } => {
            let rx = flow.lock().rx_fill_percent();
            let result = state
                .write()
                .apply_status(mode, machine_position, working_position, feed, bufsize, rx);
            events.push(GrblEvent::StateUpdate {
                mode,
                machine_position,
                working_position,
            });
            events.push(GrblEvent::RxBufferPercent(rx));
            if result.feed_changed {
                if let Some(feed) = feed {
                    events.push(GrblEvent::FeedChange(feed));
                }
            }
            if let Some(n) = result.bufsize_changed {
                events.push(GrblEvent::BufsizeChange(n));
            }
            if result.entered_run {
                events.push(GrblEvent::Movement);
            }
            if result.left_run {
                events.push(GrblEvent::Standstill);
            }
        }
        ParsedLine::SettingLine { .. } => {}
        ParsedLine::HashLine { prefix, values } => {
            if prefix == "PRB" {
                events.push(GrblEvent::Probe(values));
            }
        }
        ParsedLine::GcodeParserState(modes) => {
            state.write().parser_modes = modes.clone();
            events.push(GrblEvent::GcodeParserStateUpdate(modes));
        }
        ParsedLine::Unknown(_) => {}
    }

    if let Some(acc) = secondary {
        match acc {
            Accumulated::SettingsDownloaded(map) => {
                state.write().settings = map.clone();
                events.push(GrblEvent::SettingsDownloaded(map));
            }
            Accumulated::HashStateUpdate(map) => {
                state.write().hash_offsets = map.clone();
                events.push(GrblEvent::HashStateUpdate(map));
            }
        }
    }

    events
}

fn push_ack_events(
    events: &mut Vec<GrblEvent>,
    flow: &Mutex<FlowController>,
    stats: &Mutex<SessionStats>,
    is_error: bool,
    code: Option<String>,
) {
    let outcome = flow.lock().acknowledge(is_error, code.clone());
    let Some(outcome) = outcome else { return };

    if is_error {
        stats.lock().record_error(code.as_deref().unwrap_or(""));
        events.push(GrblEvent::Error {
            index: outcome.index,
            text: outcome.text,
            code: code.unwrap_or_default(),
        });
    } else {
        stats.lock().record_ok();
        events.push(GrblEvent::ProcessedCommand {
            index: outcome.index,
            text: outcome.text,
        });
    }

    if let Some(p) = outcome.progress_percent {
        events.push(GrblEvent::ProgressPercent(p));
    }
    events.push(GrblEvent::RxBufferPercent(flow.lock().rx_fill_percent()));
    if outcome.job_completed {
        events.push(GrblEvent::JobCompleted);
    }
}
