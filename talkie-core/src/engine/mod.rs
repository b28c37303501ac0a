//! `Engine` — the device's session & audio coordinator.
//!
//! ## Lifecycle
//!
//! ```text
//! Engine::new(config, collaborators)   → everything wired, nothing running
//!     └─► start()                      → loops spawned, transport connecting
//!         └─► (wake word / server traffic drives DeviceState)
//!             └─► stop()               → running=false, loops drain out
//! ```
//!
//! ## Threading
//!
//! Four contexts touch the engine: the transport's receive context
//! (via [`TransportSink`]), the audio loop, the detector's callback
//! thread, and the foreground loop. Work crosses between them only as
//! queued closures or guarded state — no error ever crosses a thread
//! boundary. `DeviceState` transitions are serialized behind a
//! dedicated mutex so no two transitions are ever in flight; an event
//! arriving mid-transition simply observes the finished one.

mod loops;
#[cfg(test)]
pub(crate) mod testutil;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::audio::echo::{EchoCanceller, EchoReference};
use crate::audio::playback::PlaybackQueue;
use crate::audio::{
    AudioDecoder, AudioEncoder, CaptureDevice, CodecFactory, OpusPacket, PlaybackDevice,
};
use crate::config::EngineConfig;
use crate::dispatch::TaskQueue;
use crate::error::{Result, TalkieError};
use crate::events::{
    ConnectionEvent, Emotion, EmotionEvent, EventHub, StateEvent, TtsTextEvent,
};
use crate::protocol::control::{ControlMessage, ListenState, ListeningMode, TtsState};
use crate::protocol::envelope::{
    AccountType, BytesMsg, Envelope, Login, Msg, Payload,
};
use crate::session::SessionLink;
use crate::state::{DeviceState, StateCell};
use crate::storage::{ensure_device_id, KeyValueStore};
use crate::tools::ToolDispatcher;
use crate::transport::{Transport, TransportSink};
use crate::wake::{WakeWordDetector, WakeWordGate};

/// Opus complexity for the steady-state capture encoder. 3 keeps the
/// encode under the tick budget on small cores.
const ENCODER_COMPLEXITY: u32 = 3;

/// Everything the platform provides.
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub codec_factory: Arc<dyn CodecFactory>,
    pub capture: Arc<dyn CaptureDevice>,
    pub speaker: Arc<dyn PlaybackDevice>,
    pub wake_detector: Arc<dyn WakeWordDetector>,
    pub echo_canceller: Option<Arc<dyn EchoCanceller>>,
    pub store: Arc<dyn KeyValueStore>,
    pub tools: Option<Arc<dyn ToolDispatcher>>,
}

/// Counters for observability; never consulted by control flow.
#[derive(Default)]
pub struct EngineDiagnostics {
    pub frames_encoded: AtomicUsize,
    pub packets_played: AtomicUsize,
    pub packets_dropped_bad: AtomicUsize,
    pub pings_sent: AtomicUsize,
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub frames_encoded: usize,
    pub packets_played: usize,
    pub packets_dropped_bad: usize,
    pub pings_sent: usize,
}

impl EngineDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            packets_played: self.packets_played.load(Ordering::Relaxed),
            packets_dropped_bad: self.packets_dropped_bad.load(Ordering::Relaxed),
            pings_sent: self.pings_sent.load(Ordering::Relaxed),
        }
    }
}

/// The top-level engine handle.
///
/// `Engine` is `Send + Sync` — all interior state uses atomics, locks,
/// or queues. Wrap in `Arc` to share with the embedding application.
pub struct Engine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    weak_self: Weak<EngineInner>,
    config: EngineConfig,
    state: StateCell,
    /// Serializes transitions; `state` itself is read lock-free.
    transition_lock: Mutex<()>,
    session: SessionLink,
    fg_queue: TaskQueue,
    audio_queue: TaskQueue,
    playback: PlaybackQueue,
    /// Built lazily on the first server hello, then kept for the life
    /// of the engine (mirrors the connection-instance lifetime).
    encoder: Mutex<Option<Box<dyn AudioEncoder>>>,
    decoder: Mutex<Option<Box<dyn AudioDecoder>>>,
    codec_factory: Arc<dyn CodecFactory>,
    capture: Arc<dyn CaptureDevice>,
    speaker: Arc<dyn PlaybackDevice>,
    wake: WakeWordGate,
    echo: Mutex<EchoReference>,
    canceller: Option<Arc<dyn EchoCanceller>>,
    tools: Option<Arc<dyn ToolDispatcher>>,
    events: EventHub,
    running: AtomicBool,
    /// Wake word fired while disconnected; replay the flow after the
    /// next hello. Cleared once consumed.
    resume_wake_after_reconnect: AtomicBool,
    /// Server sent tts/stop; switch to Listening once playback drains.
    stop_speak_pending: AtomicBool,
    device_id: String,
    session_id: Mutex<String>,
    last_ping: Mutex<Instant>,
    diagnostics: EngineDiagnostics,
}

impl Engine {
    /// Wire up the engine. Nothing runs and nothing connects until
    /// [`start`](Self::start).
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Engine {
        let Collaborators {
            transport,
            codec_factory,
            capture,
            speaker,
            wake_detector,
            echo_canceller,
            store,
            tools,
        } = collaborators;

        let device_id = ensure_device_id(store.as_ref());
        let pre_roll = config.pre_roll_samples;
        let echo_capacity = config.echo_reference_samples;
        let playback_bound = config.playback_queue_packets;
        let recv_capacity = config.recv_buffer_bytes;
        let transport_handle = Arc::clone(&transport);

        let inner = Arc::new_cyclic(|weak| EngineInner {
            weak_self: weak.clone(),
            state: StateCell::new(DeviceState::Idle),
            transition_lock: Mutex::new(()),
            session: SessionLink::new(transport, recv_capacity),
            fg_queue: TaskQueue::new(),
            audio_queue: TaskQueue::new(),
            playback: PlaybackQueue::new(playback_bound),
            encoder: Mutex::new(None),
            decoder: Mutex::new(None),
            codec_factory,
            capture,
            speaker,
            wake: WakeWordGate::new(wake_detector, pre_roll),
            echo: Mutex::new(EchoReference::new(echo_capacity)),
            canceller: echo_canceller,
            tools,
            events: EventHub::new(),
            running: AtomicBool::new(false),
            resume_wake_after_reconnect: AtomicBool::new(false),
            stop_speak_pending: AtomicBool::new(false),
            device_id,
            session_id: Mutex::new(String::new()),
            last_ping: Mutex::new(Instant::now()),
            diagnostics: EngineDiagnostics::default(),
            config,
        });

        // Transport callbacks land on the engine from here on.
        transport_handle.bind(Arc::clone(&inner) as Arc<dyn TransportSink>);

        // Detection fires on the detector's thread; hop to the
        // foreground queue immediately.
        let weak = Arc::downgrade(&inner);
        inner.wake.detector().on_detected(Box::new(move |phrase| {
            if let Some(inner) = weak.upgrade() {
                inner.on_wake_detected(&phrase);
            }
        }));

        // Cleaned duplex audio re-enters the encode→send path on the
        // audio thread.
        if let Some(canceller) = &inner.canceller {
            let weak = Arc::downgrade(&inner);
            canceller.on_output(Box::new(move |pcm| {
                if let Some(inner) = weak.upgrade() {
                    let on_audio = Arc::clone(&inner);
                    inner
                        .audio_queue
                        .push(move || on_audio.encode_and_send(&pcm));
                }
            }));
        }

        Engine { inner }
    }

    /// Spawn the foreground and audio loops and begin connecting.
    ///
    /// Must be called within a tokio runtime (the loops run on
    /// blocking threads).
    ///
    /// # Errors
    /// - [`TalkieError::AlreadyRunning`] if already started.
    /// - Whatever the transport's `connect` reports.
    pub fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(TalkieError::AlreadyRunning);
        }
        info!(device_id = %self.inner.device_id, "engine starting");

        let fg = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || loops::run_foreground(fg));
        let audio = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || loops::run_audio(audio));

        if let Err(e) = self.inner.session.transport().connect() {
            self.inner.running.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    /// Stop the loops and quiesce the devices.
    ///
    /// # Errors
    /// - [`TalkieError::NotRunning`] if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return Err(TalkieError::NotRunning);
        }
        self.inner.wake.stop_detection();
        self.inner.capture.stop();
        self.inner.speaker.set_enabled(false);
        info!("engine stop requested");
        Ok(())
    }

    /// Current device state (snapshot).
    pub fn state(&self) -> DeviceState {
        self.inner.state.get()
    }

    /// Persisted device identifier.
    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    /// Enter the terminal firmware-update state. OTA mechanics are the
    /// platform's problem; the engine only quiesces audio.
    pub fn begin_upgrade(&self) {
        self.inner.transition(DeviceState::Upgrading);
    }

    /// Inject a wake-word detection, exactly as if the detector fired.
    pub fn notify_wake_word(&self, phrase: &str) {
        self.inner.on_wake_detected(phrase);
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<StateEvent> {
        self.inner.events.subscribe_state()
    }

    pub fn subscribe_tts_text(&self) -> broadcast::Receiver<TtsTextEvent> {
        self.inner.events.subscribe_tts_text()
    }

    pub fn subscribe_emotion(&self) -> broadcast::Receiver<EmotionEvent> {
        self.inner.events.subscribe_emotion()
    }

    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe_connection()
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.inner.diagnostics.snapshot()
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<EngineInner> {
        &self.inner
    }
}

impl EngineInner {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn strong(&self) -> Option<Arc<EngineInner>> {
        self.weak_self.upgrade()
    }

    fn current_session_id(&self) -> String {
        self.session_id.lock().clone()
    }

    // ── State machine ────────────────────────────────────────────────

    /// The only writer of `DeviceState`. Side effects run synchronously
    /// inside the transition and are individually idempotent; observers
    /// are notified from the foreground drain afterwards.
    pub(crate) fn transition(&self, next: DeviceState) {
        let _ordered = self.transition_lock.lock();
        let prev = self.state.get();
        if prev == next {
            return;
        }
        self.state.set(next);
        info!(from = prev.name(), to = next.name(), "device state changed");

        // Invariant: the playback queue is empty the moment any path
        // leaves Speaking — server stop, wake interrupt, disconnect.
        if prev == DeviceState::Speaking {
            let cleared = self.playback.clear();
            if cleared > 0 {
                debug!(cleared, "playback queue cleared leaving speaking");
            }
        }

        match next {
            DeviceState::Idle => {
                self.speaker.set_enabled(false);
                self.wake.start_detection();
                if let Some(canceller) = &self.canceller {
                    canceller.stop();
                }
            }
            DeviceState::Connecting => {}
            DeviceState::Speaking => {
                self.playback.clear();
                self.speaker.set_enabled(true);
                self.wake.stop_detection();
                if let Some(decoder) = self.decoder.lock().as_mut() {
                    decoder.reset_state();
                }
            }
            DeviceState::Listening => {
                self.speaker.set_enabled(false);
                self.capture.start();
                // An echo-cancelled duplex turn that is already open
                // owns the listen handshake; do not reopen it.
                let duplex_active = self
                    .canceller
                    .as_ref()
                    .is_some_and(|canceller| canceller.is_running());
                if !duplex_active {
                    let mode = if self.canceller.is_some() {
                        ListeningMode::Realtime
                    } else {
                        self.config.listening_mode
                    };
                    self.send_control(&ControlMessage::listen_start(
                        &self.current_session_id(),
                        mode,
                    ));
                    if let Some(canceller) = &self.canceller {
                        canceller.start();
                    }
                }
                // Encoder state belongs to the audio thread.
                if let Some(inner) = self.strong() {
                    self.audio_queue.push(move || {
                        if let Some(encoder) = inner.encoder.lock().as_mut() {
                            encoder.reset_state();
                        }
                    });
                }
                self.wake.stop_detection();
            }
            DeviceState::Upgrading => {
                self.wake.stop_detection();
                self.capture.stop();
                self.speaker.set_enabled(false);
                if let Some(canceller) = &self.canceller {
                    canceller.stop();
                }
            }
        }

        let tx = self.events.state_tx.clone();
        self.fg_queue.push(move || {
            let _ = tx.send(StateEvent { state: next });
        });
    }

    // ── Wake word flow ───────────────────────────────────────────────

    /// Entry point for detector callbacks; hops to the foreground
    /// queue so the flow never runs on the detector's thread.
    fn on_wake_detected(&self, phrase: &str) {
        let phrase = phrase.to_string();
        if let Some(inner) = self.strong() {
            self.fg_queue.push(move || inner.wake_flow(&phrase));
        }
    }

    fn wake_flow(&self, phrase: &str) {
        // Wake word always pre-empts playback.
        if self.state.get() == DeviceState::Speaking {
            self.abort_speaking();
        }
        if self.state.get() != DeviceState::Idle {
            return;
        }
        self.transition(DeviceState::Connecting);
        self.wake.note_detected(phrase);
        self.wake.encode_pre_roll(
            self.codec_factory.as_ref(),
            self.config.capture_sample_rate,
            self.config.frame_duration_ms,
        );
        if !self.session.is_connected() {
            // Defer: the burst flushes after the next hello.
            self.resume_wake_after_reconnect
                .store(true, Ordering::SeqCst);
            self.session.transport().reconnect();
            return;
        }
        self.flush_wake_flow();
    }

    /// Send the pre-roll burst and the detect notification, then hand
    /// the turn to the server's listening handshake.
    fn flush_wake_flow(&self) {
        for packet in self.wake.take_burst() {
            self.send_audio(packet);
        }
        let phrase = self.wake.last_phrase();
        self.send_control(&ControlMessage::listen_detect(
            &self.current_session_id(),
            &phrase,
        ));
        self.transition(DeviceState::Idle);
    }

    fn abort_speaking(&self) {
        self.transition(DeviceState::Idle);
        self.send_control(&ControlMessage::abort_wake_word(&self.current_session_id()));
    }

    // ── Outbound ─────────────────────────────────────────────────────

    fn send_control(&self, message: &ControlMessage) {
        match message.to_json() {
            Ok(text) => {
                self.session.send(&Payload::Msg(Msg { text }));
            }
            Err(e) => warn!(error = %e, "failed to serialize control message"),
        }
    }

    fn send_audio(&self, packet: OpusPacket) {
        debug_assert!(!packet.is_empty(), "audio packet must not be empty");
        if packet.is_empty() {
            return;
        }
        self.session.send(&Payload::BytesMsg(BytesMsg {
            data: packet.into_bytes(),
        }));
    }

    // ── Inbound dispatch ─────────────────────────────────────────────

    fn dispatch_envelope(&self, envelope: Envelope) {
        match Payload::decode(&envelope.proto_name, &envelope.serialized_data) {
            Ok(Some(payload)) => self.handle_payload(payload),
            Ok(None) => {
                if envelope.proto_name != "Ping" {
                    warn!(
                        proto = %envelope.proto_name,
                        method = %envelope.method,
                        "no handler for message"
                    );
                }
            }
            Err(e) => warn!(
                proto = %envelope.proto_name,
                error = %e,
                "skipping undecodable message body"
            ),
        }
    }

    fn handle_payload(&self, payload: Payload) {
        match payload {
            Payload::Ping | Payload::Login(_) => {}
            Payload::LoginResult(result) => {
                debug!(success = result.success, "login result");
            }
            Payload::Configs(configs) => {
                debug!(len = configs.json.len(), "server configs received");
            }
            Payload::AssistantConfig(hello) => match serde_json::from_str::<Value>(&hello.json) {
                Ok(value) => self.on_server_hello(&value),
                Err(e) => warn!(error = %e, "hello JSON parse error"),
            },
            Payload::Msg(msg) => self.handle_json_text(&msg.text),
            Payload::BytesMsg(bytes) => {
                if self.state.get() == DeviceState::Speaking {
                    self.playback.push(OpusPacket(bytes.data));
                } else {
                    debug!(len = bytes.data.len(), "audio packet outside speaking — dropped");
                }
            }
        }
    }

    fn handle_json_text(&self, text: &str) {
        let raw: Value = match serde_json::from_str(text) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "control JSON parse error");
                return;
            }
        };
        let message = match ControlMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "unrecognized control message — skipped");
                return;
            }
        };
        if let Some(session_id) = message.session_id() {
            *self.session_id.lock() = session_id.to_string();
        }
        self.handle_control(message, &raw);
    }

    fn handle_control(&self, message: ControlMessage, raw: &Value) {
        match message {
            ControlMessage::Tts { state, text, .. } => match state {
                TtsState::Start => self.transition(DeviceState::Speaking),
                TtsState::Stop => {
                    // Hold Speaking until the queue drains; the
                    // foreground loop completes the switch.
                    self.stop_speak_pending.store(true, Ordering::SeqCst);
                }
                TtsState::SentenceStart => {
                    if let Some(text) = text {
                        info!("<< {text}");
                        let tx = self.events.tts_tx.clone();
                        self.fg_queue.push(move || {
                            let _ = tx.send(TtsTextEvent { text });
                        });
                    }
                }
            },
            ControlMessage::Listen { state, .. } => {
                if state == ListenState::Start {
                    self.transition(DeviceState::Listening);
                } else {
                    debug!(?state, "inbound listen control ignored");
                }
            }
            ControlMessage::Llm { emotion, .. } => {
                if let Some(label) = emotion {
                    let emotion = Emotion::from_label(&label);
                    let tx = self.events.emotion_tx.clone();
                    self.fg_queue.push(move || {
                        let _ = tx.send(EmotionEvent { emotion });
                    });
                }
            }
            ControlMessage::Stt { text, .. } => {
                debug!(text = text.as_deref().unwrap_or(""), "stt result");
            }
            ControlMessage::Iot { commands, .. } => {
                debug!(?commands, "iot commands ignored");
            }
            ControlMessage::Abort { .. } => {
                debug!("inbound abort ignored");
            }
            ControlMessage::Mcp { .. } => {
                if let Some(tools) = &self.tools {
                    if let Some(reply) = tools.eval(raw) {
                        self.session.send(&Payload::Msg(Msg { text: reply }));
                    }
                }
            }
        }
    }

    // ── Handshake ────────────────────────────────────────────────────

    fn on_server_hello(&self, hello: &Value) {
        info!("server hello");
        let capture_rate = self.config.capture_sample_rate;

        if let Some(rate) = hello
            .pointer("/audio_params/sample_rate")
            .and_then(Value::as_u64)
        {
            let rate = rate as u32;
            let channels = hello
                .pointer("/audio_params/channels")
                .and_then(Value::as_u64)
                .unwrap_or(1);
            info!(rate, channels, "server audio parameters");
            self.speaker.set_sample_rate(rate);
            self.speaker.set_volume(1.0);
            if rate != capture_rate {
                if let Err(e) =
                    self.echo
                        .lock()
                        .configure(rate, capture_rate, self.config.samples_per_frame())
                {
                    warn!(error = %e, "echo reference resampler unavailable");
                }
            }
        }

        if let Some(session_id) = hello.get("session_id").and_then(Value::as_str) {
            *self.session_id.lock() = session_id.to_string();
        }

        // First hello only: codecs are never rebuilt for the life of
        // this engine instance.
        {
            let mut decoder = self.decoder.lock();
            if decoder.is_none() {
                *decoder = Some(self.codec_factory.new_decoder(
                    self.speaker.sample_rate(),
                    1,
                    self.config.frame_duration_ms,
                ));
            }
        }
        {
            let mut encoder = self.encoder.lock();
            if encoder.is_none() {
                self.capture.set_sample_rate(capture_rate);
                *encoder = Some(self.codec_factory.new_encoder(
                    capture_rate,
                    1,
                    self.config.frame_duration_ms,
                    ENCODER_COMPLEXITY,
                ));
            }
        }

        self.wake.start_detection();
        self.capture.start();
        self.speaker.set_enabled(true);

        if self
            .resume_wake_after_reconnect
            .swap(false, Ordering::SeqCst)
        {
            self.flush_wake_flow();
        }

        let tx = self.events.connection_tx.clone();
        self.fg_queue.push(move || {
            let _ = tx.send(ConnectionEvent { connected: true });
        });
    }

    // ── Loop ticks (driven by loops.rs; also called from tests) ──────

    /// One foreground iteration: drain deferred tasks, finish a
    /// pending stop-speak, keep the connection alive.
    pub(crate) fn foreground_tick(&self, wait: std::time::Duration) {
        self.fg_queue.wait(wait);
        for task in self.fg_queue.drain() {
            task();
        }
        self.poll_stop_speak();
        self.poll_keepalive();
    }

    fn poll_stop_speak(&self) {
        if !self.stop_speak_pending.load(Ordering::SeqCst) {
            return;
        }
        if self.state.get() == DeviceState::Speaking {
            if self.playback.is_empty() {
                self.stop_speak_pending.store(false, Ordering::SeqCst);
                self.transition(DeviceState::Listening);
            }
            // else: keep Speaking until the queue drains.
        } else {
            self.stop_speak_pending.store(false, Ordering::SeqCst);
        }
    }

    fn poll_keepalive(&self) {
        if !self.session.is_connected() {
            return;
        }
        let due = {
            let mut last_ping = self.last_ping.lock();
            if last_ping.elapsed() >= self.config.ping_interval {
                *last_ping = Instant::now();
                true
            } else {
                false
            }
        };
        if due {
            self.session.ping();
            self.diagnostics.pings_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// One audio iteration: deferred codec work, wake-word feed, then
    /// whichever direction the current state allows.
    pub(crate) fn audio_tick(&self) {
        for task in self.audio_queue.drain() {
            task();
        }

        let mic = self.capture.pop_frames();
        if !mic.is_empty() && self.wake.is_detection_running() {
            self.wake.feed(&mic);
        }

        match self.state.get() {
            DeviceState::Speaking => self.playback_tick(&mic),
            DeviceState::Listening => self.capture_tick(&mic),
            _ => {}
        }
    }

    fn playback_tick(&self, mic: &[i16]) {
        let Some(packet) = self.playback.pop() else {
            return;
        };
        let packet_len = packet.len();
        let pcm = {
            let mut decoder = self.decoder.lock();
            let Some(decoder) = decoder.as_mut() else {
                return;
            };
            decoder.decode(&packet)
        };
        let Some(pcm) = pcm else {
            // One bad packet must not stall the stream.
            self.diagnostics
                .packets_dropped_bad
                .fetch_add(1, Ordering::Relaxed);
            warn!(bytes = packet_len, "undecodable audio packet dropped");
            return;
        };

        if let Some(canceller) = &self.canceller {
            if canceller.is_running() {
                if let Some(pair) = self.echo.lock().interleave(mic) {
                    canceller.feed(&pair);
                }
            }
        }

        self.speaker.play(&pcm);
        self.diagnostics
            .packets_played
            .fetch_add(1, Ordering::Relaxed);

        if self.canceller.is_some() {
            self.echo.lock().record(&pcm);
        }
    }

    fn capture_tick(&self, mic: &[i16]) {
        if mic.is_empty() {
            return;
        }
        self.encode_and_send(mic);
    }

    fn encode_and_send(&self, pcm: &[i16]) {
        let packets = {
            let mut encoder = self.encoder.lock();
            let Some(encoder) = encoder.as_mut() else {
                return;
            };
            encoder.encode(pcm)
        };
        for packet in packets {
            self.diagnostics
                .frames_encoded
                .fetch_add(1, Ordering::Relaxed);
            self.send_audio(packet);
        }
    }
}

impl TransportSink for EngineInner {
    fn on_connected(&self) {
        info!("transport connected — logging in");
        self.session.reset();
        self.session.send(&Payload::Login(Login {
            account_type: AccountType::Guest,
            name: self.config.device_name.clone(),
            device_id: self.device_id.clone(),
        }));
    }

    fn on_disconnected(&self) {
        info!("transport disconnected");
        self.transition(DeviceState::Idle);
        let tx = self.events.connection_tx.clone();
        self.fg_queue.push(move || {
            let _ = tx.send(ConnectionEvent { connected: false });
        });
    }

    fn on_bytes(&self, bytes: &[u8]) {
        match self.session.ingest(bytes) {
            Ok(envelopes) => {
                for envelope in envelopes {
                    self.dispatch_envelope(envelope);
                }
            }
            Err(e) => {
                // The stream is poisoned; only a reconnect recovers.
                tracing::error!(error = %e, "fatal protocol error — forcing reconnect");
                self.session.transport().reconnect();
            }
        }
    }
}
