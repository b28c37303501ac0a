//! End-to-end session flows with the real foreground and audio loops
//! running. The transport, codec, and devices are scripted in-process;
//! the test thread plays the server.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use talkie_core::audio::{
    AudioDecoder, AudioEncoder, CaptureDevice, CodecFactory, OpusPacket, PlaybackDevice,
};
use talkie_core::engine::{Collaborators, Engine};
use talkie_core::error::Result;
use talkie_core::protocol::envelope::{AssistantConfig, BytesMsg, Envelope, Msg, Payload};
use talkie_core::protocol::framing::{encode_frame, FrameAssembler};
use talkie_core::storage::MemoryStore;
use talkie_core::transport::{Transport, TransportSink};
use talkie_core::wake::WakeWordDetector;
use talkie_core::{DeviceState, EngineConfig};

// ── Scripted collaborators ───────────────────────────────────────────

#[derive(Default)]
struct TestTransport {
    connected: AtomicBool,
    sink: Mutex<Option<Arc<dyn TransportSink>>>,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl TestTransport {
    fn sink(&self) -> Arc<dyn TransportSink> {
        Arc::clone(self.sink.lock().as_ref().expect("sink bound"))
    }

    fn server_send(&self, payload: &Payload) {
        let envelope = Envelope::wrap(payload).expect("wrap");
        let frame = encode_frame(&envelope).expect("encode");
        self.sink().on_bytes(&frame);
    }

    fn server_hello(&self) {
        self.server_send(&Payload::AssistantConfig(AssistantConfig {
            json: r#"{"session_id":"it-1","audio_params":{"sample_rate":16000,"channels":1}}"#
                .to_string(),
        }));
    }

    fn server_control(&self, json: &str) {
        self.server_send(&Payload::Msg(Msg {
            text: json.to_string(),
        }));
    }

    fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.sink().on_disconnected();
    }

    fn sent_payloads(&self) -> Vec<Payload> {
        let mut assembler = FrameAssembler::new(1024 * 1024);
        let mut payloads = Vec::new();
        for frame in self.sent.lock().iter() {
            for envelope in assembler.feed(frame).expect("decode") {
                payloads.push(
                    Payload::decode(&envelope.proto_name, &envelope.serialized_data)
                        .expect("decode payload")
                        .expect("known payload"),
                );
            }
        }
        payloads
    }
}

impl Transport for TestTransport {
    fn bind(&self, sink: Arc<dyn TransportSink>) {
        *self.sink.lock() = Some(sink);
    }

    fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        self.sink().on_connected();
        Ok(())
    }

    fn reconnect(&self) {
        // The test decides when the "server" is reachable again.
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

struct ChunkEncoder {
    frame_samples: usize,
    buf: Vec<i16>,
}

impl AudioEncoder for ChunkEncoder {
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
    }
}

struct WidenDecoder;

impl AudioDecoder for WidenDecoder {
    fn decode(&mut self, packet: &OpusPacket) -> Option<Vec<i16>> {
        Some(packet.0.iter().map(|&b| i16::from(b)).collect())
    }

    fn reset_state(&mut self) {}
}

struct TestCodecs;

impl CodecFactory for TestCodecs {
    fn new_encoder(
        &self,
        sample_rate: u32,
        _channels: u8,
        frame_duration_ms: u32,
        _complexity: u32,
    ) -> Box<dyn AudioEncoder> {
        Box::new(ChunkEncoder {
            frame_samples: (sample_rate / 1000) as usize * frame_duration_ms as usize,
            buf: Vec::new(),
        })
    }

    fn new_decoder(
        &self,
        _sample_rate: u32,
        _channels: u8,
        _frame_duration_ms: u32,
    ) -> Box<dyn AudioDecoder> {
        Box::new(WidenDecoder)
    }
}

struct QueueCapture {
    started: AtomicBool,
    rate: AtomicU32,
    frames: Mutex<VecDeque<Vec<i16>>>,
}

impl QueueCapture {
    fn new() -> Arc<QueueCapture> {
        Arc::new(QueueCapture {
            started: AtomicBool::new(false),
            rate: AtomicU32::new(16_000),
            frames: Mutex::new(VecDeque::new()),
        })
    }

    fn push_frames(&self, pcm: Vec<i16>) {
        self.frames.lock().push_back(pcm);
    }
}

impl CaptureDevice for QueueCapture {
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

struct CountingSpeaker {
    played: Mutex<Vec<Vec<i16>>>,
}

impl PlaybackDevice for CountingSpeaker {
    fn set_enabled(&self, _enabled: bool) {}
    fn set_volume(&self, _volume: f32) {}
    fn set_sample_rate(&self, _rate: u32) {}

    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn play(&self, pcm: &[i16]) {
        self.played.lock().push(pcm.to_vec());
    }
}

struct ManualDetector {
    running: AtomicBool,
    callback: Mutex<Option<Box<dyn Fn(String) + Send + Sync>>>,
}

impl ManualDetector {
    fn new() -> Arc<ManualDetector> {
        Arc::new(ManualDetector {
            running: AtomicBool::new(false),
            callback: Mutex::new(None),
        })
    }

    fn trigger(&self, phrase: &str) {
        let callback = self.callback.lock();
        callback.as_ref().expect("callback wired")(phrase.to_string());
    }
}

impl WakeWordDetector for ManualDetector {
    fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn feed(&self, _pcm: &[i16]) {}

    fn on_detected(&self, callback: Box<dyn Fn(String) + Send + Sync>) {
        *self.callback.lock() = Some(callback);
    }
}

struct Rig {
    engine: Engine,
    transport: Arc<TestTransport>,
    capture: Arc<QueueCapture>,
    speaker: Arc<CountingSpeaker>,
    detector: Arc<ManualDetector>,
}

fn build_rig() -> Rig {
    let transport = Arc::new(TestTransport::default());
    let capture = QueueCapture::new();
    let speaker = Arc::new(CountingSpeaker {
        played: Mutex::new(Vec::new()),
    });
    let detector = ManualDetector::new();

    let engine = Engine::new(
        EngineConfig::default(),
        Collaborators {
            transport: Arc::clone(&transport) as _,
            codec_factory: Arc::new(TestCodecs) as _,
            capture: Arc::clone(&capture) as _,
            speaker: Arc::clone(&speaker) as _,
            wake_detector: Arc::clone(&detector) as _,
            echo_canceller: None,
            store: Arc::new(MemoryStore::default()) as _,
            tools: None,
        },
    );

    Rig {
        engine,
        transport,
        capture,
        speaker,
        detector,
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn count_sent_audio(transport: &TestTransport) -> usize {
    transport
        .sent_payloads()
        .iter()
        .filter(|p| matches!(p, Payload::BytesMsg(_)))
        .count()
}

// ── Scenarios ────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn full_conversation_turn() {
    let rig = build_rig();
    rig.engine.start().expect("start");

    // Connect sent the login immediately.
    assert!(wait_until(Duration::from_secs(2), || {
        rig.transport
            .sent_payloads()
            .iter()
            .any(|p| matches!(p, Payload::Login(_)))
    }));

    // Hello brings the audio stack up.
    rig.transport.server_hello();
    assert!(wait_until(Duration::from_secs(2), || rig
        .detector
        .is_running()));

    // Wake word → detect notification, device ready for the handshake.
    rig.detector.trigger("hey talkie");
    assert!(wait_until(Duration::from_secs(2), || {
        rig.transport.sent_payloads().iter().any(|p| match p {
            Payload::Msg(msg) => msg.text.contains(r#""state":"detect""#),
            _ => false,
        })
    }));
    assert!(wait_until(Duration::from_secs(2), || {
        rig.engine.state() == DeviceState::Idle
    }));

    // Server speaks: two packets, then stop. The device must finish
    // playing both before switching to Listening.
    rig.transport
        .server_control(r#"{"session_id":"it-1","type":"tts","state":"start"}"#);
    rig.transport.server_send(&Payload::BytesMsg(BytesMsg {
        data: vec![1, 2, 3],
    }));
    rig.transport.server_send(&Payload::BytesMsg(BytesMsg {
        data: vec![4, 5, 6],
    }));
    rig.transport
        .server_control(r#"{"session_id":"it-1","type":"tts","state":"stop"}"#);

    assert!(wait_until(Duration::from_secs(2), || {
        rig.engine.state() == DeviceState::Listening
    }));
    assert_eq!(rig.speaker.played.lock().len(), 2);

    // Listening streams captured audio as binary messages.
    let audio_before = count_sent_audio(&rig.transport);
    rig.capture.push_frames(vec![5i16; 960]);
    rig.capture.push_frames(vec![6i16; 960]);
    assert!(wait_until(Duration::from_secs(2), || {
        count_sent_audio(&rig.transport) >= audio_before + 2
    }));

    rig.engine.stop().expect("stop");
}

#[tokio::test(flavor = "multi_thread")]
async fn wake_during_outage_resumes_after_reconnect() {
    let rig = build_rig();
    rig.engine.start().expect("start");
    rig.transport.server_hello();
    assert!(wait_until(Duration::from_secs(2), || rig
        .detector
        .is_running()));

    // Connection drops; device falls back to Idle.
    rig.transport.drop_connection();
    assert!(wait_until(Duration::from_secs(2), || {
        rig.engine.state() == DeviceState::Idle
    }));

    // Wake word during the outage: flow is deferred.
    rig.detector.trigger("hey talkie");
    assert!(wait_until(Duration::from_secs(2), || {
        rig.engine.state() == DeviceState::Connecting
    }));
    let detects_before = rig
        .transport
        .sent_payloads()
        .iter()
        .filter(|p| match p {
            Payload::Msg(msg) => msg.text.contains(r#""state":"detect""#),
            _ => false,
        })
        .count();
    assert_eq!(detects_before, 0);

    // Transport comes back and the hello completes: the deferred flow
    // replays on its own.
    rig.transport.connect().expect("reconnect");
    rig.transport.server_hello();
    assert!(wait_until(Duration::from_secs(2), || {
        rig.transport.sent_payloads().iter().any(|p| match p {
            Payload::Msg(msg) => msg.text.contains(r#""state":"detect""#),
            _ => false,
        })
    }));
    assert!(wait_until(Duration::from_secs(2), || {
        rig.engine.state() == DeviceState::Idle
    }));

    rig.engine.stop().expect("stop");
}

#[tokio::test(flavor = "multi_thread")]
async fn wake_interrupt_while_speaking_aborts_playback() {
    let rig = build_rig();
    rig.engine.start().expect("start");
    rig.transport.server_hello();
    assert!(wait_until(Duration::from_secs(2), || rig
        .detector
        .is_running()));

    rig.transport
        .server_control(r#"{"session_id":"it-1","type":"tts","state":"start"}"#);
    assert!(wait_until(Duration::from_secs(2), || {
        rig.engine.state() == DeviceState::Speaking
    }));

    rig.detector.trigger("hey talkie");
    assert!(wait_until(Duration::from_secs(2), || {
        rig.engine.state() == DeviceState::Idle
    }));
    assert!(wait_until(Duration::from_secs(2), || {
        rig.transport.sent_payloads().iter().any(|p| match p {
            Payload::Msg(msg) => msg.text.contains(r#""type":"abort""#),
            _ => false,
        })
    }));

    rig.engine.stop().expect("stop");
}
