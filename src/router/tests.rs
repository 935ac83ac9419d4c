use super::*;
use crate::error::{Error, TransportError};
use crate::protocol::{InitParam, DEVICE_BASE};
use crate::simulator::{loopback, HbmConfig, SimulatedHbm};
use crate::test_support::{wait_until, RecordingSender};
use crossbeam_channel::unbounded;
use std::sync::atomic::AtomicUsize;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct TestPlatform {
    reboots: Arc<AtomicUsize>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl Platform for TestPlatform {
    fn reboot(&self) {
        self.reboots.fetch_add(1, Ordering::SeqCst);
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        thread::sleep(duration);
    }
}

fn ignore_device(_command: u32, _payload: &[u8]) {}

fn recording_router() -> (ChannelRouter, Arc<RecordingSender>, TestPlatform) {
    let sender = Arc::new(RecordingSender::new());
    let platform = TestPlatform::default();
    let router = ChannelRouter::init_with_platform(
        ChannelConfig::default(),
        sender.clone(),
        ignore_device,
        platform.clone(),
    )
    .unwrap();
    (router, sender, platform)
}

fn simulated_router(
    config: ChannelConfig,
    hbm: HbmConfig,
) -> (Arc<ChannelRouter>, SimulatedHbm, TestPlatform) {
    let (sender, rx) = loopback();
    let platform = TestPlatform::default();
    let router = Arc::new(
        ChannelRouter::init_with_platform(config, sender, ignore_device, platform.clone())
            .unwrap(),
    );
    let hbm = SimulatedHbm::spawn(rx, &router, hbm).unwrap();
    (router, hbm, platform)
}

/// HBM that never plays anything back, so free space only comes from the
/// initial capacity
fn still_hbm(buffer_capacity: usize) -> HbmConfig {
    HbmConfig {
        buffer_capacity,
        drain_per_tick: 0,
        ..HbmConfig::default()
    }
}

#[test]
fn test_classify() {
    assert_eq!(QueueKind::classify(Command::IotInit.code()), QueueKind::NonBlocking);
    assert_eq!(QueueKind::classify(Command::ChallengePack.code()), QueueKind::NonBlocking);
    assert_eq!(
        QueueKind::classify(Command::DaemonRebootRequest.code()),
        QueueKind::NonBlocking
    );
    assert_eq!(QueueKind::classify(Command::RasrStart.code()), QueueKind::Main);
    assert_eq!(QueueKind::classify(Command::RasrDataFeed.code()), QueueKind::Main);
    assert_eq!(
        QueueKind::classify(Command::AudioSourceRemainLenAck.code()),
        QueueKind::Main
    );
    assert_eq!(QueueKind::classify(DEVICE_BASE), QueueKind::Main);
    assert_eq!(QueueKind::classify(DEVICE_BASE + 1), QueueKind::Device);
    assert_eq!(QueueKind::classify(4242), QueueKind::Device);
    assert_eq!(QueueKind::classify(7), QueueKind::Main);
}

#[test]
fn test_receive_reports_queue() {
    let (router, _sender, _platform) = recording_router();

    assert_eq!(
        router.receive_packet(Command::ChallengePack.code(), &[]),
        Admission::Queued(QueueKind::NonBlocking)
    );
    assert_eq!(
        router.receive_packet(Command::RasrStop.code(), &[]),
        Admission::Queued(QueueKind::Main)
    );
    assert_eq!(
        router.receive_packet(Command::NetConfigure.code(), b"ssid"),
        Admission::Queued(QueueKind::Device)
    );
}

#[test]
fn test_challenge_sequence_advances_only_on_success() {
    let (router, sender, _platform) = recording_router();
    let ack_code = Command::ChallengePackAck.code();
    let sequences = |sender: &RecordingSender| -> Vec<u32> {
        sender
            .delivered(ack_code)
            .iter()
            .map(|p| ChallengePackAck::decode(&p.payload).unwrap().sequence)
            .collect()
    };

    for _ in 0..3 {
        router.receive_packet(Command::ChallengePack.code(), &[]);
    }
    assert!(wait_until(WAIT, || sender.delivered(ack_code).len() == 3));
    assert_eq!(sequences(&sender), vec![1, 2, 3]);

    sender.set_failing(true);
    router.receive_packet(Command::ChallengePack.code(), &[]);
    assert!(wait_until(WAIT, || sender.attempts().len() == 4));
    assert_eq!(router.challenge_sequence(), 4);

    sender.set_failing(false);
    router.receive_packet(Command::ChallengePack.code(), &[]);
    assert!(wait_until(WAIT, || sender.delivered(ack_code).len() == 4));
    assert_eq!(sequences(&sender), vec![1, 2, 3, 4]);
    assert_eq!(router.challenge_sequence(), 5);

    let ack = ChallengePackAck::decode(&sender.delivered(ack_code)[0].payload).unwrap();
    assert!(ack.net_connected);
    assert_eq!(ack.version, "v4.1.0");
    assert!(sender.delivered(ack_code)[0].reliable);
}

#[test]
fn test_rasr_latch_clears_after_handling() {
    let (router, _sender, _platform) = recording_router();

    for command in [Command::RasrStart, Command::RasrStop] {
        assert!(router.receive_packet(command.code(), &7u32.to_le_bytes()).is_queued());
        assert!(wait_until(WAIT, || {
            !router.rasr_start_pending() && !router.rasr_stop_pending()
        }));
        assert!(router.receive_packet(command.code(), &[]).is_queued());
    }
}

#[test]
fn test_burst_of_starts_never_double_queues() {
    let (router, _sender, _platform) = recording_router();

    // A retransmitted start is only accepted once the previous one has been handled
    for _ in 0..500 {
        match router.receive_packet(Command::RasrStart.code(), &[]) {
            Admission::Queued(_) | Admission::Duplicate => {}
            other => panic!("unexpected admission {:?}", other),
        }
        assert!(router.pending_events(QueueKind::Main) <= 1);
    }
    assert!(wait_until(WAIT, || !router.rasr_start_pending()));
}

#[test]
fn test_adpcm_in_flight_is_bounded() {
    let (router, _sender, _platform) = recording_router();
    let chunk = [0x5au8; 128];

    let mut queued = 0usize;
    let mut dropped = 0usize;
    for _ in 0..200 {
        match router.receive_packet(Command::RasrDataFeed.code(), &chunk) {
            Admission::Queued(QueueKind::Main) => queued += 1,
            Admission::MemoryBound => dropped += 1,
            other => panic!("unexpected admission {:?}", other),
        }
        assert!(router.adpcm_in_flight() <= 16);
    }

    assert_eq!(queued + dropped, 200);
    assert!(queued >= 16);
    assert!(wait_until(WAIT, || router.adpcm_in_flight() == 0));

    let stats = router.pool_stats();
    assert_eq!(stats.hits + stats.misses, queued);
    assert!(wait_until(WAIT, || router.pool_stats().available == 16));
}

#[test]
fn test_device_commands_reach_application() {
    let (tx, rx) = unbounded();
    let device = move |command: u32, payload: &[u8]| {
        let _ = tx.send((command, payload.to_vec()));
    };
    let router = ChannelRouter::init(ChannelConfig::default(), RecordingSender::new(), device)
        .unwrap();

    router.receive_packet(Command::HbmIotAsrResult.code(), b"{\"cmd\":\"on\"}");
    router.receive_packet(Command::NetConfigureStop.code(), &[]);
    router.receive_packet(5000, &[1, 2, 3]);
    // Internal commands never reach the application
    router.receive_packet(Command::IotInit.code(), &[]);

    let received: Vec<(u32, Vec<u8>)> = (0..3).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
    assert_eq!(
        received,
        vec![
            (1001, b"{\"cmd\":\"on\"}".to_vec()),
            (1003, vec![]),
            (5000, vec![1, 2, 3]),
        ]
    );
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_malformed_and_unknown_packets_are_ignored() {
    let (router, sender, _platform) = recording_router();

    // Init payload shorter than the credentials struct
    router.receive_packet(Command::IotInit.code(), &[1, 2, 3]);
    router.receive_packet(Command::AudioSourceRemainLenAck.code(), &[1]);
    router.receive_packet(Command::HbmPlayBuzzer.code(), &[]);
    router.receive_packet(42, &[]);

    let init = InitParam {
        appkey: "key".into(),
        appsecret: "secret".into(),
    };
    router.receive_packet(Command::IotInit.code(), &init.encode());

    assert!(wait_until(WAIT, || router.pending_events(QueueKind::Main) == 0
        && router.pending_events(QueueKind::NonBlocking) == 0));
    assert!(sender.attempts().is_empty());
    assert!(router.is_initialized());
}

#[test]
fn test_reboot_request_reaches_platform() {
    let (router, _sender, platform) = recording_router();

    router.receive_packet(Command::DaemonRebootRequest.code(), &[]);
    assert!(wait_until(WAIT, || platform.reboots.load(Ordering::SeqCst) == 1));
}

#[test]
fn test_push_command() {
    let (router, sender, _platform) = recording_router();

    router.push_command(Command::HbmActionPlay.code(), b"play").unwrap();
    let sent = sender.delivered(Command::HbmActionPlay.code());
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].payload, b"play");
    assert!(sent[0].reliable);

    sender.set_failing(true);
    let err = router.push_command(Command::HbmStateCtrl.code(), &[]).unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::SendFailed(_))));
}

#[test]
fn test_outbound_reports() {
    let (router, sender, _platform) = recording_router();

    let result = RasrResult {
        vui_session_id: 9,
        cmd_hash_code: 0xdead_beef,
        cmd_hash_string: "turn_on".into(),
    };
    router.send_rasr_result(&result).unwrap();
    router
        .send_net_configure_status(NetConfigureStatus::Failure)
        .unwrap();

    let sent = sender.delivered(Command::RasrResult.code());
    assert_eq!(RasrResult::decode(&sent[0].payload).unwrap(), result);
    assert_eq!(*sent[0].payload.last().unwrap(), 0);

    let sent = sender.delivered(Command::NetConfigureStatus.code());
    assert_eq!(sent[0].payload, vec![1, 0, 0, 0]);
}

#[test]
fn test_calls_after_shutdown_are_refused() {
    let (router, sender, _platform) = recording_router();
    router.shutdown();
    router.shutdown();

    assert!(!router.is_initialized());
    assert!(matches!(
        router.push_command(Command::HbmReboot.code(), &[]),
        Err(Error::Channel(ChannelError::NotInitialized))
    ));
    assert!(matches!(
        router.feed_audio_data(&[0; 16]),
        Err(Error::Channel(ChannelError::NotInitialized))
    ));
    assert!(sender.attempts().is_empty());

    // Rejected packets must not leak admission state
    assert_eq!(router.receive_packet(Command::RasrStart.code(), &[]), Admission::Rejected);
    assert!(!router.rasr_start_pending());
    assert_eq!(
        router.receive_packet(Command::RasrDataFeed.code(), &[0; 8]),
        Admission::Rejected
    );
    assert_eq!(router.adpcm_in_flight(), 0);
}

#[test]
fn test_shutdown_handles_queued_packets() {
    let (router, sender, _platform) = recording_router();

    for _ in 0..5 {
        router.receive_packet(Command::ChallengePack.code(), &[]);
    }
    for _ in 0..10 {
        router.receive_packet(Command::RasrDataFeed.code(), &[0; 32]);
    }
    router.shutdown();

    // Challenge replies go straight to the transport, so the final drain
    // still answers them
    assert_eq!(sender.delivered(Command::ChallengePackAck.code()).len(), 5);
    assert_eq!(router.adpcm_in_flight(), 0);
    assert_eq!(router.pending_events(QueueKind::Main), 0);
    assert_eq!(router.pending_events(QueueKind::NonBlocking), 0);
}

#[test]
fn test_invalid_config_refused() {
    let mut config = ChannelConfig::default();
    config.admission.adpcm_in_flight_limit = 0;
    let result = ChannelRouter::init(config, RecordingSender::new(), ignore_device);
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_feed_rejects_empty_buffer() {
    let (router, sender, _platform) = recording_router();
    assert!(matches!(
        router.feed_audio_data(&[]),
        Err(Error::Channel(ChannelError::InvalidParam(_)))
    ));
    assert!(sender.attempts().is_empty());
}

#[test]
fn test_feed_chunks_follow_remote_capacity() {
    let (router, hbm, platform) = simulated_router(ChannelConfig::default(), still_hbm(4096));

    router.feed_audio_data(&[1; 1026]).unwrap();
    assert_eq!(hbm.stats().chunks(), vec![512, 512, 2]);
    assert_eq!(hbm.stats().queries(), 1);
    assert_eq!(router.cached_audio_remaining(), 4096 - 1026);

    // The cached capacity carries over, so no new query is needed
    router.feed_audio_data(&[2; 100]).unwrap();
    assert_eq!(hbm.stats().queries(), 1);
    assert_eq!(router.cached_audio_remaining(), 4096 - 1126);
    assert!(platform.sleeps.lock().is_empty());

    drop(router);
    let stats = hbm.join();
    assert_eq!(stats.chunks(), vec![512, 512, 2, 100]);
    assert_eq!(stats.audio_bytes(), 1126);
}

#[test]
fn test_feed_polls_when_remote_is_full() {
    let mut config = ChannelConfig::default();
    config.flow_control.poll_interval_ms = 50;
    let hbm_config = HbmConfig {
        buffer_capacity: 600,
        drain_per_tick: 600,
        tick: Duration::from_millis(5),
        answer_queries: true,
    };
    let (router, hbm, platform) = simulated_router(config, hbm_config);

    router.feed_audio_data(&[3; 1026]).unwrap();

    assert_eq!(hbm.stats().chunks(), vec![512, 88, 426]);
    assert_eq!(hbm.stats().queries(), 2);
    assert_eq!(*platform.sleeps.lock(), vec![Duration::from_millis(50)]);
    assert_eq!(router.cached_audio_remaining(), 600 - 426);
}

#[test]
fn test_feed_retries_after_missing_ack() {
    let mut config = ChannelConfig::default();
    config.flow_control.query_timeout_ms = 20;
    config.flow_control.poll_interval_ms = 5;
    let (router, hbm, _platform) = simulated_router(
        config,
        HbmConfig {
            answer_queries: false,
            ..still_hbm(4096)
        },
    );

    let feeder = {
        let router = router.clone();
        thread::spawn(move || router.feed_audio_data(&[4; 700]))
    };

    assert!(wait_until(WAIT, || hbm.stats().queries() >= 3));
    assert!(hbm.stats().chunks().is_empty());

    hbm.set_answer_queries(true);
    feeder.join().unwrap().unwrap();
    assert_eq!(hbm.stats().chunks(), vec![512, 188]);
}

#[test]
fn test_shutdown_wakes_blocked_feed() {
    let (router, hbm, _platform) = simulated_router(
        ChannelConfig::default(),
        HbmConfig {
            answer_queries: false,
            ..still_hbm(4096)
        },
    );

    let feeder = {
        let router = router.clone();
        thread::spawn(move || router.feed_audio_data(&[5; 64]))
    };
    assert!(wait_until(WAIT, || hbm.stats().queries() == 1));

    router.shutdown();
    assert!(matches!(
        feeder.join().unwrap(),
        Err(Error::Channel(ChannelError::NotInitialized))
    ));
    assert!(hbm.stats().chunks().is_empty());
}

#[test]
fn test_shutdown_during_poll_sleep_sends_no_query() {
    let mut config = ChannelConfig::default();
    config.flow_control.poll_interval_ms = 300;
    // A full HBM answers every query with 0, sending the feeder into its poll sleep
    let (router, hbm, platform) = simulated_router(config, still_hbm(0));

    let feeder = {
        let router = router.clone();
        thread::spawn(move || router.feed_audio_data(&[6; 64]))
    };
    assert!(wait_until(WAIT, || platform.sleeps.lock().len() == 1));

    let start = Instant::now();
    router.shutdown();
    assert!(matches!(
        feeder.join().unwrap(),
        Err(Error::Channel(ChannelError::NotInitialized))
    ));

    // Returns after the poll sleep, well before the 5 s ack timeout
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(hbm.stats().queries(), 1);
    assert!(hbm.stats().chunks().is_empty());
}

#[test]
fn test_malformed_length_ack_triggers_requery() {
    let mut config = ChannelConfig::default();
    config.flow_control.poll_interval_ms = 5;
    let (router, hbm, _platform) = simulated_router(
        config,
        HbmConfig {
            answer_queries: false,
            ..still_hbm(4096)
        },
    );

    let feeder = {
        let router = router.clone();
        thread::spawn(move || router.feed_audio_data(&[7; 64]))
    };
    assert!(wait_until(WAIT, || hbm.stats().queries() == 1));

    // Too short to carry a length; the feeder must not sit out the 5 s timeout
    hbm.send(Command::AudioSourceRemainLenAck, &[1]);
    assert!(wait_until(Duration::from_secs(1), || hbm.stats().queries() == 2));

    router.shutdown();
    assert!(feeder.join().unwrap().is_err());
    assert!(hbm.stats().chunks().is_empty());
}

#[test]
fn test_concurrent_feeds_do_not_interleave() {
    let (router, hbm, _platform) = simulated_router(ChannelConfig::default(), still_hbm(1 << 20));

    let feeders: Vec<_> = (0..4u8)
        .map(|i| {
            let router = router.clone();
            thread::spawn(move || router.feed_audio_data(&[i; 1100]))
        })
        .collect();
    for feeder in feeders {
        feeder.join().unwrap().unwrap();
    }

    // Each feed is 512 + 512 + 76, and feeds are serialised
    let chunks = hbm.stats().chunks();
    assert_eq!(chunks.len(), 12);
    for feed in chunks.chunks(3) {
        assert_eq!(feed, [512, 512, 76]);
    }
    assert_eq!(hbm.stats().queries(), 1);
}

#[test]
fn test_simulator_handshake() {
    let (router, hbm, _platform) = simulated_router(ChannelConfig::default(), HbmConfig::default());

    hbm.send(Command::ChallengePack, &[]);
    hbm.send(Command::ChallengePack, &[]);
    assert!(wait_until(WAIT, || hbm.stats().challenge_acks().len() == 2));

    let sequences: Vec<u32> = hbm.stats().challenge_acks().iter().map(|a| a.sequence).collect();
    assert_eq!(sequences, vec![1, 2]);
    assert_eq!(router.challenge_sequence(), 3);
}
