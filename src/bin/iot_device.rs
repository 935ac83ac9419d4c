//! IoT Device Demo
//!
//! Runs the channel router against a simulated HBM: handshake, a voice
//! session, a recognition result round trip and a prompt played back
//! through the audio streamer.

use anyhow::Result;
use crossbeam_channel::{unbounded, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hbm_channel::{
    config::ChannelConfig,
    constants::*,
    protocol::{Command, InitParam, NetConfigureStatus, RasrResult},
    simulator::{loopback, HbmConfig, SimulatedHbm},
    Admission, ChannelRouter,
};

/// PCM frame handed to the streamer per call: 20 ms at 16 kHz, 16 bit mono
const PCM_FRAME_LEN: usize = 640;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting IoT device demo, version {}", DEVICE_VERSION);

    let config = ChannelConfig::load_or_default()?;

    // The device handler runs on a router worker; replies are sent from here
    let (device_tx, device_rx) = unbounded::<(u32, Vec<u8>)>();
    let device = move |command: u32, payload: &[u8]| {
        let _ = device_tx.send((command, payload.to_vec()));
    };

    let (sender, frames) = loopback();
    let router = Arc::new(ChannelRouter::init(config, sender, device)?);
    let hbm = SimulatedHbm::spawn(frames, &router, HbmConfig::default())?;

    // Handshake
    hbm.send(Command::ChallengePack, &[]);
    let init = InitParam {
        appkey: "demo-appkey".into(),
        appsecret: "demo-appsecret".into(),
    };
    hbm.send(Command::IotInit, &init.encode());

    // Voice session: the HBM streams ADPCM faster than the main worker
    // drains it, so some of it is dropped at the memory bound
    let session_id: u32 = 42;
    hbm.send(Command::RasrStart, &session_id.to_le_bytes());
    hbm.send(Command::RasrStart, &session_id.to_le_bytes());
    let adpcm = [0x11u8; ADPCM_PACKET_LEN];
    let (mut queued, mut dropped) = (0, 0);
    for _ in 0..64 {
        match hbm.send(Command::RasrDataFeed, &adpcm) {
            Admission::Queued(_) => queued += 1,
            _ => dropped += 1,
        }
    }
    hbm.send(Command::RasrStop, &[]);
    tracing::info!("ADPCM feed: {} queued, {} dropped", queued, dropped);

    hbm.send(Command::HbmIotAsrResult, b"{\"intent\":\"light_on\"}");
    hbm.send(Command::NetConfigure, b"ssid=demo");

    let deadline = Instant::now() + Duration::from_secs(1);
    loop {
        let wait = deadline.saturating_duration_since(Instant::now());
        let (command, payload) = match device_rx.recv_timeout(wait) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match Command::from_code(command) {
            Some(Command::HbmIotAsrResult) => {
                tracing::info!("ASR result: {}", String::from_utf8_lossy(&payload));
                router.push_command(Command::HbmActionPlay.code(), &payload)?;
                router.send_rasr_result(&RasrResult {
                    vui_session_id: session_id,
                    cmd_hash_code: 0x1a2b_3c4d,
                    cmd_hash_string: "light_on".into(),
                })?;
            }
            Some(Command::NetConfigure) => {
                tracing::info!("Net configure: {}", String::from_utf8_lossy(&payload));
                router.send_net_configure_status(NetConfigureStatus::Success)?;
            }
            _ => tracing::info!("Device command {} ({} bytes)", command, payload.len()),
        }
    }

    // Play one second of a 440 Hz prompt
    let pcm = sine_pcm(440.0, 16_000, Duration::from_secs(1));
    let start = Instant::now();
    for frame in pcm.chunks(PCM_FRAME_LEN) {
        router.feed_audio_data(frame)?;
    }
    tracing::info!(
        "Streamed {} bytes of PCM in {:.1} ms",
        pcm.len(),
        start.elapsed().as_secs_f64() * 1000.0
    );

    let pool = router.pool_stats();
    tracing::info!(
        "Stats: challenge seq {}, pool {}/{} free, {} hits, {} misses",
        router.challenge_sequence(),
        pool.available,
        pool.capacity,
        pool.hits,
        pool.misses
    );

    router.shutdown();
    drop(router);
    let stats = hbm.join();

    tracing::info!(
        "HBM saw {} challenge acks, {} queries, {} PCM bytes in {} chunks, {} other packets",
        stats.challenge_acks().len(),
        stats.queries(),
        stats.audio_bytes(),
        stats.chunks().len(),
        stats.other_frames().len()
    );

    Ok(())
}

/// 16 bit little-endian mono sine
fn sine_pcm(freq: f32, sample_rate: u32, duration: Duration) -> Vec<u8> {
    let samples = (sample_rate as f32 * duration.as_secs_f32()) as usize;
    let mut pcm = Vec::with_capacity(samples * 2);
    for i in 0..samples {
        let t = i as f32 / sample_rate as f32;
        let sample = (f32::sin(2.0 * std::f32::consts::PI * freq * t) * 0.3 * i16::MAX as f32) as i16;
        pcm.extend_from_slice(&sample.to_le_bytes());
    }
    pcm
}
