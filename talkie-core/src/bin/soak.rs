//! Conversation soak harness.
//!
//! Runs the engine against an in-process scripted server over a
//! loopback transport: one wake word, then `--turns` full
//! listen→speak→listen round trips. Prints per-turn latency and the
//! engine diagnostics at the end. No audio hardware or network is
//! touched — codecs and devices are synthetic.
//!
//! ```text
//! cargo run --bin soak -- --turns 20 --packets 8
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender};
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

#[derive(Debug)]
struct Args {
    turns: usize,
    packets_per_turn: usize,
}

fn parse_args() -> std::result::Result<Args, String> {
    let mut turns = 10usize;
    let mut packets_per_turn = 8usize;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--turns" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --turns".into());
                };
                turns = v
                    .parse::<usize>()
                    .map_err(|_| "invalid value for --turns".to_string())?
                    .clamp(1, 10_000);
            }
            "--packets" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --packets".into());
                };
                packets_per_turn = v
                    .parse::<usize>()
                    .map_err(|_| "invalid value for --packets".to_string())?
                    .clamp(1, 256);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(Args {
        turns,
        packets_per_turn,
    })
}

// ── Loopback transport with a scripted server behind it ──────────────

enum ServerPhase {
    AwaitingLogin,
    Conversing,
}

struct ScriptedServer {
    phase: ServerPhase,
    assembler: FrameAssembler,
    /// Mic packets heard since the last reply.
    heard: usize,
    /// An open listening turn: mic audio counts toward the next reply.
    /// The wake-word pre-roll burst arrives before any turn opens and
    /// must not be mistaken for conversation speech.
    awaiting_speech: bool,
    turns_remaining: usize,
    packets_per_turn: usize,
}

impl ScriptedServer {
    fn handle_frame(&mut self, bytes: &[u8], replies: &mut Vec<Payload>) {
        let envelopes = match self.assembler.feed(bytes) {
            Ok(envelopes) => envelopes,
            Err(e) => {
                eprintln!("server: framing error: {e}");
                return;
            }
        };
        for envelope in envelopes {
            self.handle_envelope(&envelope, replies);
        }
    }

    fn handle_envelope(&mut self, envelope: &Envelope, replies: &mut Vec<Payload>) {
        let payload = match Payload::decode(&envelope.proto_name, &envelope.serialized_data) {
            Ok(Some(payload)) => payload,
            _ => return,
        };
        match (&self.phase, payload) {
            (ServerPhase::AwaitingLogin, Payload::Login(_)) => {
                self.phase = ServerPhase::Conversing;
                replies.push(Payload::AssistantConfig(AssistantConfig {
                    json: r#"{"session_id":"soak","audio_params":{"sample_rate":16000,"channels":1}}"#
                        .to_string(),
                }));
            }
            (ServerPhase::Conversing, Payload::Msg(msg)) => {
                // A detect notification also counts as heard speech.
                if msg.text.contains(r#""state":"detect""#) {
                    self.reply_with_tts(replies);
                }
            }
            (ServerPhase::Conversing, Payload::BytesMsg(_)) => {
                if self.awaiting_speech {
                    self.heard += 1;
                    if self.heard >= self.packets_per_turn {
                        self.reply_with_tts(replies);
                    }
                }
            }
            _ => {}
        }
    }

    fn reply_with_tts(&mut self, replies: &mut Vec<Payload>) {
        self.heard = 0;
        if self.turns_remaining == 0 {
            self.awaiting_speech = false;
            return;
        }
        self.turns_remaining -= 1;
        self.awaiting_speech = self.turns_remaining > 0;
        replies.push(Payload::Msg(Msg {
            text: r#"{"session_id":"soak","type":"tts","state":"start"}"#.to_string(),
        }));
        for i in 0..self.packets_per_turn {
            replies.push(Payload::BytesMsg(BytesMsg {
                data: vec![(i % 200) as u8; 64],
            }));
        }
        replies.push(Payload::Msg(Msg {
            text: r#"{"session_id":"soak","type":"tts","state":"stop"}"#.to_string(),
        }));
    }
}

struct LoopbackTransport {
    connected: AtomicBool,
    sink: Mutex<Option<Arc<dyn TransportSink>>>,
    to_server: Sender<Vec<u8>>,
}

impl LoopbackTransport {
    /// The server runs on its own thread, like a real peer: replies
    /// never re-enter the engine on the sending call stack.
    fn spawn(turns: usize, packets_per_turn: usize) -> Arc<LoopbackTransport> {
        let (to_server, from_device) = unbounded::<Vec<u8>>();
        let transport = Arc::new(LoopbackTransport {
            connected: AtomicBool::new(false),
            sink: Mutex::new(None),
            to_server,
        });

        let pump = Arc::clone(&transport);
        std::thread::spawn(move || {
            let mut server = ScriptedServer {
                phase: ServerPhase::AwaitingLogin,
                assembler: FrameAssembler::new(1024 * 1024),
                heard: 0,
                awaiting_speech: false,
                turns_remaining: turns,
                packets_per_turn,
            };
            while let Ok(bytes) = from_device.recv() {
                let mut replies = Vec::new();
                server.handle_frame(&bytes, &mut replies);
                let sink = pump.sink.lock().as_ref().map(Arc::clone);
                if let Some(sink) = sink {
                    for reply in replies {
                        let envelope = Envelope::wrap(&reply).expect("wrap reply");
                        let frame = encode_frame(&envelope).expect("encode reply");
                        sink.on_bytes(&frame);
                    }
                }
            }
        });

        transport
    }
}

impl Transport for LoopbackTransport {
    fn bind(&self, sink: Arc<dyn TransportSink>) {
        *self.sink.lock() = Some(sink);
    }

    fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.on_connected();
        }
        Ok(())
    }

    fn reconnect(&self) {
        let _ = self.connect();
    }

    fn send(&self, bytes: &[u8]) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        self.to_server.send(bytes.to_vec()).is_ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ── Synthetic codec and devices ──────────────────────────────────────

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

struct SyntheticCodecs;

impl CodecFactory for SyntheticCodecs {
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

/// Produces one 60 ms block of synthetic speech per pull while started.
struct ToneCapture {
    started: AtomicBool,
    rate: AtomicU32,
}

impl CaptureDevice for ToneCapture {
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
        if !self.started.load(Ordering::SeqCst) {
            return Vec::new();
        }
        let samples = (self.rate.load(Ordering::SeqCst) / 1000) as usize * 60;
        (0..samples).map(|i| ((i % 64) as i16 - 32) * 100).collect()
    }
}

struct NullSpeaker {
    samples_played: AtomicUsize,
}

impl PlaybackDevice for NullSpeaker {
    fn set_enabled(&self, _enabled: bool) {}
    fn set_volume(&self, _volume: f32) {}
    fn set_sample_rate(&self, _rate: u32) {}

    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn play(&self, pcm: &[i16]) {
        self.samples_played.fetch_add(pcm.len(), Ordering::Relaxed);
    }
}

struct ManualDetector {
    running: AtomicBool,
    callback: Mutex<Option<Box<dyn Fn(String) + Send + Sync>>>,
}

impl ManualDetector {
    fn trigger(&self, phrase: &str) {
        if let Some(callback) = self.callback.lock().as_ref() {
            callback(phrase.to_string());
        }
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

// ── Driver ───────────────────────────────────────────────────────────

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("soak: {e}");
            eprintln!("usage: soak [--turns N] [--packets N]");
            std::process::exit(1);
        }
    };

    let transport = LoopbackTransport::spawn(args.turns, args.packets_per_turn);
    let detector = Arc::new(ManualDetector {
        running: AtomicBool::new(false),
        callback: Mutex::new(None),
    });
    let speaker = Arc::new(NullSpeaker {
        samples_played: AtomicUsize::new(0),
    });

    let engine = Engine::new(
        EngineConfig::default(),
        Collaborators {
            transport: Arc::clone(&transport) as _,
            codec_factory: Arc::new(SyntheticCodecs) as _,
            capture: Arc::new(ToneCapture {
                started: AtomicBool::new(false),
                rate: AtomicU32::new(16_000),
            }) as _,
            speaker: Arc::clone(&speaker) as _,
            wake_detector: Arc::clone(&detector) as _,
            echo_canceller: None,
            store: Arc::new(MemoryStore::default()) as _,
            tools: None,
        },
    );

    let mut state_rx = engine.subscribe_state();
    engine.start().expect("engine start");

    // Give the login/hello handshake a moment, then wake the device.
    std::thread::sleep(Duration::from_millis(100));
    detector.trigger("hey talkie");

    let started = Instant::now();
    let deadline = started + Duration::from_secs(30 + args.turns as u64);
    let mut listening_entries = 0usize;
    let mut turn_latencies: VecDeque<Duration> = VecDeque::new();
    let mut last_listening = Instant::now();

    while listening_entries < args.turns {
        if Instant::now() > deadline {
            eprintln!("soak: timed out after {listening_entries}/{} turns", args.turns);
            break;
        }
        match state_rx.try_recv() {
            Ok(event) => {
                if event.state == DeviceState::Listening {
                    listening_entries += 1;
                    turn_latencies.push_back(last_listening.elapsed());
                    last_listening = Instant::now();
                }
            }
            Err(tokio::sync::broadcast::error::TryRecvError::Empty) => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::TryRecvError::Closed) => break,
        }
    }

    let elapsed = started.elapsed();
    engine.stop().expect("engine stop");

    let snapshot = engine.diagnostics_snapshot();
    let avg_turn_ms = if turn_latencies.is_empty() {
        0.0
    } else {
        turn_latencies.iter().map(Duration::as_secs_f64).sum::<f64>()
            / turn_latencies.len() as f64
            * 1000.0
    };

    println!("── soak summary ─────────────────────────────");
    println!("turns completed      {listening_entries}/{}", args.turns);
    println!("elapsed              {:.2}s", elapsed.as_secs_f64());
    println!("avg turn latency     {avg_turn_ms:.1} ms");
    println!("frames encoded       {}", snapshot.frames_encoded);
    println!("packets played       {}", snapshot.packets_played);
    println!("bad packets dropped  {}", snapshot.packets_dropped_bad);
    println!("pings sent           {}", snapshot.pings_sent);
    println!(
        "samples played       {}",
        speaker.samples_played.load(Ordering::Relaxed)
    );
}
