//! Scripted collaborators for engine tests.
//!
//! Everything here is deterministic: the fake transport delivers
//! server frames synchronously on the caller's thread (standing in for
//! the network-receive context), and tests drive the loops by calling
//! the tick functions directly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::audio::echo::EchoCanceller;
use crate::audio::{
    AudioDecoder, AudioEncoder, CaptureDevice, CodecFactory, OpusPacket, PlaybackDevice,
};
use crate::config::EngineConfig;
use crate::engine::{Collaborators, Engine};
use crate::error::Result;
use crate::protocol::envelope::{AssistantConfig, Envelope, Payload};
use crate::protocol::framing::{encode_frame, FrameAssembler};
use crate::storage::MemoryStore;
use crate::tools::ToolDispatcher;
use crate::transport::{Transport, TransportSink};
use crate::wake::WakeWordDetector;

/// First byte marking a packet the fake decoder refuses to decode.
pub const BAD_PACKET_MARKER: u8 = 0xEE;

// ── Transport ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeTransport {
    connected: AtomicBool,
    sink: Mutex<Option<Arc<dyn TransportSink>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    reconnects: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<FakeTransport> {
        Arc::new(FakeTransport::default())
    }

    fn sink(&self) -> Arc<dyn TransportSink> {
        Arc::clone(self.sink.lock().as_ref().expect("sink bound"))
    }

    /// Deliver one server payload as a framed envelope.
    pub fn server_send(&self, payload: &Payload) {
        let envelope = Envelope::wrap(payload).expect("wrap payload");
        let frame = encode_frame(&envelope).expect("encode frame");
        self.sink().on_bytes(&frame);
    }

    /// Deliver raw bytes, bypassing framing.
    pub fn server_send_raw(&self, bytes: &[u8]) {
        self.sink().on_bytes(bytes);
    }

    /// Simulate the connection dropping.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.sink().on_disconnected();
    }

    /// Everything the device sent, decoded back to payloads.
    pub fn sent_payloads(&self) -> Vec<Payload> {
        let mut assembler = FrameAssembler::new(1024 * 1024);
        let mut payloads = Vec::new();
        for frame in self.sent.lock().iter() {
            for envelope in assembler.feed(frame).expect("decode sent frame") {
                payloads.push(
                    Payload::decode(&envelope.proto_name, &envelope.serialized_data)
                        .expect("decode sent payload")
                        .expect("known payload"),
                );
            }
        }
        payloads
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}

impl Transport for FakeTransport {
    fn bind(&self, sink: Arc<dyn TransportSink>) {
        *self.sink.lock() = Some(sink);
    }

    fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        self.sink().on_connected();
        Ok(())
    }

    fn reconnect(&self) {
        // Only records the request; tests bring the link back up with
        // an explicit `connect()` when "the server" is reachable again.
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn send(&self, bytes: &[u8]) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().push(bytes.to_vec());
        true
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ── Codec ────────────────────────────────────────────────────────────

/// Encoder that coalesces input into fixed-size frames, one packet per
/// frame, each sample truncated to its low byte.
struct FrameEncoder {
    frame_samples: usize,
    buf: Vec<i16>,
    resets: Arc<AtomicUsize>,
}

impl AudioEncoder for FrameEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Vec<OpusPacket> {
        self.buf.extend_from_slice(pcm);
        let mut packets = Vec::new();
        while self.buf.len() >= self.frame_samples {
            let frame: Vec<i16> = self.buf.drain(..self.frame_samples).collect();
            packets.push(OpusPacket(frame.iter().map(|&s| s as u8).collect()));
        }
        packets
    }

    fn reset_state(&mut self) {
        self.buf.clear();
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Decoder that widens each byte back to a sample; packets starting
/// with [`BAD_PACKET_MARKER`] are reported as malformed.
struct ByteDecoder {
    resets: Arc<AtomicUsize>,
}

impl AudioDecoder for ByteDecoder {
    fn decode(&mut self, packet: &OpusPacket) -> Option<Vec<i16>> {
        if packet.0.first() == Some(&BAD_PACKET_MARKER) {
            return None;
        }
        Some(packet.0.iter().map(|&b| i16::from(b)).collect())
    }

    fn reset_state(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct ScriptedFactory {
    pub encoder_resets: Arc<AtomicUsize>,
    pub decoder_resets: Arc<AtomicUsize>,
    pub encoders_built: AtomicUsize,
    pub decoders_built: AtomicUsize,
    pub last_encoder_rate: AtomicU32,
    pub last_decoder_rate: AtomicU32,
}

impl CodecFactory for ScriptedFactory {
    fn new_encoder(
        &self,
        sample_rate: u32,
        _channels: u8,
        frame_duration_ms: u32,
        _complexity: u32,
    ) -> Box<dyn AudioEncoder> {
        self.encoders_built.fetch_add(1, Ordering::SeqCst);
        self.last_encoder_rate.store(sample_rate, Ordering::SeqCst);
        Box::new(FrameEncoder {
            frame_samples: (sample_rate / 1000) as usize * frame_duration_ms as usize,
            buf: Vec::new(),
            resets: Arc::clone(&self.encoder_resets),
        })
    }

    fn new_decoder(
        &self,
        sample_rate: u32,
        _channels: u8,
        _frame_duration_ms: u32,
    ) -> Box<dyn AudioDecoder> {
        self.decoders_built.fetch_add(1, Ordering::SeqCst);
        self.last_decoder_rate.store(sample_rate, Ordering::SeqCst);
        Box::new(ByteDecoder {
            resets: Arc::clone(&self.decoder_resets),
        })
    }
}

// ── Devices ──────────────────────────────────────────────────────────

pub struct FakeCapture {
    started: AtomicBool,
    rate: AtomicU32,
    frames: Mutex<VecDeque<Vec<i16>>>,
}

impl FakeCapture {
    pub fn new() -> Arc<FakeCapture> {
        Arc::new(FakeCapture {
            started: AtomicBool::new(false),
            rate: AtomicU32::new(16_000),
            frames: Mutex::new(VecDeque::new()),
        })
    }

    /// Script one tick's worth of microphone audio.
    pub fn push_frames(&self, pcm: Vec<i16>) {
        self.frames.lock().push_back(pcm);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

impl CaptureDevice for FakeCapture {
    fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    fn set_sample_rate(&self, rate: u32) {
        self.rate.store(rate, Ordering::SeqCst);
    }

    fn sample_rate(&self) -> u32 {
        self.rate.load(Ordering::SeqCst)
    }

    fn pop_frames(&self) -> Vec<i16> {
        self.frames.lock().pop_front().unwrap_or_default()
    }
}

pub struct FakeSpeaker {
    enabled: AtomicBool,
    rate: AtomicU32,
    pub volume: Mutex<f32>,
    pub played: Mutex<Vec<Vec<i16>>>,
    pub set_enabled_calls: AtomicUsize,
}

impl FakeSpeaker {
    pub fn new() -> Arc<FakeSpeaker> {
        Arc::new(FakeSpeaker {
            enabled: AtomicBool::new(false),
            rate: AtomicU32::new(16_000),
            volume: Mutex::new(0.0),
            played: Mutex::new(Vec::new()),
            set_enabled_calls: AtomicUsize::new(0),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn played_count(&self) -> usize {
        self.played.lock().len()
    }
}

impl PlaybackDevice for FakeSpeaker {
    fn set_enabled(&self, enabled: bool) {
        self.set_enabled_calls.fetch_add(1, Ordering::SeqCst);
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn set_volume(&self, volume: f32) {
        *self.volume.lock() = volume;
    }

    fn set_sample_rate(&self, rate: u32) {
        self.rate.store(rate, Ordering::SeqCst);
    }

    fn sample_rate(&self) -> u32 {
        self.rate.load(Ordering::SeqCst)
    }

    fn play(&self, pcm: &[i16]) {
        self.played.lock().push(pcm.to_vec());
    }
}

// ── Wake word ────────────────────────────────────────────────────────

type DetectCallback = Box<dyn Fn(String) + Send + Sync>;

#[derive(Default)]
pub struct FakeDetector {
    running: AtomicBool,
    fed_samples: AtomicUsize,
    callback: Mutex<Option<DetectCallback>>,
}

impl FakeDetector {
    pub fn new() -> Arc<FakeDetector> {
        Arc::new(FakeDetector::default())
    }

    /// Fire the detection callback, as the DSP thread would.
    pub fn trigger(&self, phrase: &str) {
        let callback = self.callback.lock();
        let callback = callback.as_ref().expect("callback wired");
        callback(phrase.to_string());
    }

    pub fn fed_samples(&self) -> usize {
        self.fed_samples.load(Ordering::SeqCst)
    }
}

impl WakeWordDetector for FakeDetector {
    fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn feed(&self, pcm: &[i16]) {
        self.fed_samples.fetch_add(pcm.len(), Ordering::SeqCst);
    }

    fn on_detected(&self, callback: DetectCallback) {
        *self.callback.lock() = Some(callback);
    }
}

// ── Echo canceller ───────────────────────────────────────────────────

type OutputCallback = Box<dyn Fn(Vec<i16>) + Send + Sync>;

#[derive(Default)]
pub struct FakeCanceller {
    running: AtomicBool,
    pub fed: Mutex<Vec<Vec<i16>>>,
    callback: Mutex<Option<OutputCallback>>,
}

impl FakeCanceller {
    pub fn new() -> Arc<FakeCanceller> {
        Arc::new(FakeCanceller::default())
    }

    /// Emit cleaned audio, as the DSP would.
    pub fn emit_output(&self, pcm: Vec<i16>) {
        let callback = self.callback.lock();
        let callback = callback.as_ref().expect("callback wired");
        callback(pcm);
    }
}

impl EchoCanceller for FakeCanceller {
    fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn feed(&self, interleaved: &[i16]) {
        self.fed.lock().push(interleaved.to_vec());
    }

    fn on_output(&self, callback: OutputCallback) {
        *self.callback.lock() = Some(callback);
    }
}

// ── Tools ────────────────────────────────────────────────────────────

pub struct EchoingTools {
    pub reply: String,
    pub seen: Mutex<Vec<serde_json::Value>>,
}

impl ToolDispatcher for EchoingTools {
    fn eval(&self, message: &serde_json::Value) -> Option<String> {
        self.seen.lock().push(message.clone());
        Some(self.reply.clone())
    }
}

// ── Harness ──────────────────────────────────────────────────────────

pub struct Harness {
    pub engine: Engine,
    pub transport: Arc<FakeTransport>,
    pub capture: Arc<FakeCapture>,
    pub speaker: Arc<FakeSpeaker>,
    pub detector: Arc<FakeDetector>,
    pub factory: Arc<ScriptedFactory>,
    pub canceller: Option<Arc<FakeCanceller>>,
}

impl Harness {
    pub fn new() -> Harness {
        Harness::build(EngineConfig::default(), false, None)
    }

    pub fn with_config(config: EngineConfig) -> Harness {
        Harness::build(config, false, None)
    }

    pub fn with_canceller() -> Harness {
        Harness::build(EngineConfig::default(), true, None)
    }

    pub fn with_tools(tools: Arc<dyn ToolDispatcher>) -> Harness {
        Harness::build(EngineConfig::default(), false, Some(tools))
    }

    fn build(
        config: EngineConfig,
        with_canceller: bool,
        tools: Option<Arc<dyn ToolDispatcher>>,
    ) -> Harness {
        let transport = FakeTransport::new();
        let capture = FakeCapture::new();
        let speaker = FakeSpeaker::new();
        let detector = FakeDetector::new();
        let factory = Arc::new(ScriptedFactory::default());
        let canceller = with_canceller.then(FakeCanceller::new);

        let engine = Engine::new(
            config,
            Collaborators {
                transport: Arc::clone(&transport) as _,
                codec_factory: Arc::clone(&factory) as _,
                capture: Arc::clone(&capture) as _,
                speaker: Arc::clone(&speaker) as _,
                wake_detector: Arc::clone(&detector) as _,
                echo_canceller: canceller
                    .clone()
                    .map(|c| c as Arc<dyn EchoCanceller>),
                store: Arc::new(MemoryStore::default()) as _,
                tools,
            },
        );

        Harness {
            engine,
            transport,
            capture,
            speaker,
            detector,
            factory,
            canceller,
        }
    }

    /// Connect and complete the server hello at the capture rate.
    pub fn connect_and_hello(&self) {
        self.connect_and_hello_with_rate(16_000);
    }

    pub fn connect_and_hello_with_rate(&self, sample_rate: u32) {
        self.transport.connect().expect("connect");
        self.server_hello(sample_rate);
    }

    pub fn server_hello(&self, sample_rate: u32) {
        let json = format!(
            r#"{{"session_id":"sess-1","audio_params":{{"sample_rate":{sample_rate},"channels":1}}}}"#
        );
        self.transport
            .server_send(&Payload::AssistantConfig(AssistantConfig { json }));
    }

    pub fn server_control(&self, json: &str) {
        self.transport
            .server_send(&Payload::Msg(crate::protocol::envelope::Msg {
                text: json.to_string(),
            }));
    }

    pub fn server_audio(&self, data: Vec<u8>) {
        self.transport
            .server_send(&Payload::BytesMsg(crate::protocol::envelope::BytesMsg {
                data,
            }));
    }

    /// Drain the foreground queue once, without blocking.
    pub fn drain_foreground(&self) {
        self.engine.inner().foreground_tick(Duration::ZERO);
    }

    pub fn tick_audio(&self) {
        self.engine.inner().audio_tick();
    }
}
