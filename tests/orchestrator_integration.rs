//! End-to-end runs of `BatchOrchestrator` against a scripted bot.

mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use relay_core::orchestrator::{BATCH_TIMEOUT_REASON, EXISTING_FILE_REASON};
use relay_core::transport::TransportError;
use relay_core::{
    BatchOrchestrator, ChannelObserver, FileOrganizer, OrchestratorConfig, OrganizerConfig,
    ProgressEvent, ProgressStore, RunOutcome, RunRequest, SessionTracker, TrackStatus,
    check_missing,
};
use support::{AUDIO_SIZE, FakeSource, FakeTransport, Reply, fast_config, track};
use tempfile::TempDir;

const PLAYLIST_URL: &str = "https://open.spotify.com/playlist/mix1";

struct Harness {
    dir: TempDir,
    source: Arc<FakeSource>,
    transport: Arc<FakeTransport>,
}

impl Harness {
    fn new(tracks: Vec<relay_core::Track>) -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            source: FakeSource::new("Weekend Mix", tracks),
            transport: FakeTransport::new(Duration::from_millis(20)),
        }
    }

    /// Every download takes `download_delay` before the file lands.
    fn slow_downloads(tracks: Vec<relay_core::Track>, download_delay: Duration) -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            source: FakeSource::new("Weekend Mix", tracks),
            transport: FakeTransport::with_download_delay(Duration::from_millis(20), download_delay),
        }
    }

    fn progress_path(&self) -> std::path::PathBuf {
        self.dir.path().join("progress.json")
    }

    fn output_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("music")
    }

    fn tracker(&self) -> Arc<SessionTracker> {
        Arc::new(SessionTracker::open(ProgressStore::new(self.progress_path())).unwrap())
    }

    fn orchestrator(&self, config: OrchestratorConfig) -> BatchOrchestrator {
        BatchOrchestrator::new(
            config,
            self.source.clone(),
            self.transport.clone(),
            self.tracker(),
            Arc::new(FileOrganizer::new(OrganizerConfig::new(self.output_dir()))),
        )
        .unwrap()
    }
}

fn finished(outcome: RunOutcome) -> relay_core::SessionStats {
    match outcome {
        RunOutcome::Finished(stats) => stats,
        other => panic!("expected a finished run, got {other:?}"),
    }
}

// ==================== Batch Mode Tests ====================

#[tokio::test]
async fn test_batch_run_completes_and_fails_per_reply() {
    let first = track("t1", "Artist X", "Song Y");
    let second = track("t2", "Nobody", "Missing");
    let third = track("t3", "Band Z", "Encore");
    let harness = Harness::new(vec![first.clone(), second.clone(), third.clone()]);
    harness
        .transport
        .reply(&first.url, Reply::File("Artist X - Song Y.flac".to_string()));
    harness.transport.reply(&second.url, Reply::NotFound);
    harness
        .transport
        .reply(&third.url, Reply::File("Band Z - Encore.mp3".to_string()));

    let (observer, mut events) = ChannelObserver::new();
    let orchestrator = harness
        .orchestrator(fast_config(2))
        .with_observer(Arc::new(observer));
    let stats = finished(orchestrator.run(&RunRequest::new(PLAYLIST_URL)).await.unwrap());

    assert_eq!(
        harness.transport.sent(),
        vec![first.url.clone(), second.url.clone(), third.url.clone()]
    );

    let mut order = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            ProgressEvent::TrackSent { track_id, .. } => order.push(format!("sent:{track_id}")),
            ProgressEvent::TrackCompleted { track_id, .. } => order.push(format!("done:{track_id}")),
            ProgressEvent::TrackFailed { track_id, .. } => order.push(format!("failed:{track_id}")),
            _ => {}
        }
    }
    let position = |entry: &str| order.iter().position(|e| e == entry).unwrap();
    assert!(position("sent:t3") > position("done:t1"), "order: {order:?}");
    assert!(position("sent:t3") > position("failed:t2"), "order: {order:?}");
    assert_eq!(stats.total, 3);
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 1);
    assert!(stats.is_completed);
    assert_eq!(stats.total_size_bytes, 2 * AUDIO_SIZE as u64);

    let organized = harness.output_dir().join("Artist X").join("Artist X - Song Y.flac");
    assert!(organized.is_file(), "missing {}", organized.display());
    assert!(harness.output_dir().join("Band Z").join("Band Z - Encore.mp3").is_file());

    let session = orchestrator.tracker().snapshot().unwrap();
    let failed = &session.tracks["t2"];
    assert_eq!(failed.status, TrackStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("Bot reported no results"));
}

#[tokio::test]
async fn test_silent_bot_fails_batch_with_timeout() {
    let quiet = track("q1", "Ghost", "Silence");
    let harness = Harness::new(vec![quiet.clone()]);
    harness.transport.reply(&quiet.url, Reply::Silence);

    let mut config = fast_config(5);
    config.batch_timeout = Duration::from_millis(300);
    let orchestrator = harness.orchestrator(config);
    let stats = finished(orchestrator.run(&RunRequest::new(PLAYLIST_URL)).await.unwrap());

    assert_eq!(stats.failed, 1);
    let session = orchestrator.tracker().snapshot().unwrap();
    assert_eq!(
        session.tracks["q1"].error_message.as_deref(),
        Some(BATCH_TIMEOUT_REASON)
    );
    assert_eq!(orchestrator.engine().pending_count(), 0);
}

#[tokio::test]
async fn test_rejected_send_fails_only_that_track() {
    let bad = track("b1", "Artist", "Rejected");
    let good = track("g1", "Artist", "Accepted");
    let harness = Harness::new(vec![bad.clone(), good.clone()]);
    harness.transport.fail_send(
        &bad.url,
        TransportError::Api {
            method: "sendMessage".to_string(),
            code: 400,
            description: "Bad Request: chat not found".to_string(),
        },
    );
    harness
        .transport
        .reply(&good.url, Reply::File("Artist - Accepted.flac".to_string()));

    let orchestrator = harness.orchestrator(fast_config(10));
    let stats = finished(orchestrator.run(&RunRequest::new(PLAYLIST_URL)).await.unwrap());

    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    let session = orchestrator.tracker().snapshot().unwrap();
    let reason = session.tracks["b1"].error_message.clone().unwrap();
    assert!(reason.starts_with("Failed to send to bot:"), "got {reason}");
}

#[tokio::test]
async fn test_option_prompt_is_answered_before_file() {
    let song = track("o1", "Singer", "Ballad");
    let harness = Harness::new(vec![song.clone()]);
    harness.transport.reply(
        &song.url,
        Reply::Options(
            vec!["FLAC".to_string(), "MP3 320".to_string()],
            Box::new(Reply::File("Singer - Ballad.flac".to_string())),
        ),
    );

    let orchestrator = harness.orchestrator(fast_config(1));
    let stats = finished(orchestrator.run(&RunRequest::new(PLAYLIST_URL)).await.unwrap());

    assert_eq!(stats.completed, 1);
    let selections = harness.transport.selections();
    assert_eq!(selections.len(), 1);
    assert_eq!(selections[0].1, 0);
    assert_eq!(harness.transport.downloads(), 1);
}

#[tokio::test]
async fn test_chatter_does_not_resolve_tracks() {
    let song = track("c1", "Band", "Tune");
    let harness = Harness::new(vec![song.clone()]);
    harness.transport.reply(&song.url, Reply::Text("Searching...".to_string()));

    let mut config = fast_config(1);
    config.batch_timeout = Duration::from_millis(300);
    let orchestrator = harness.orchestrator(config);
    let stats = finished(orchestrator.run(&RunRequest::new(PLAYLIST_URL)).await.unwrap());

    assert_eq!(stats.completed, 0);
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn test_option_reply_retries_flood_wait() {
    let song = track("o2", "Singer", "Encore");
    let harness = Harness::new(vec![song.clone()]);
    harness.transport.reply(
        &song.url,
        Reply::Options(
            vec!["FLAC".to_string()],
            Box::new(Reply::File("Singer - Encore.flac".to_string())),
        ),
    );
    harness.transport.fail_select(TransportError::flood_wait(1));

    let mut config = fast_config(1);
    config.flood_wait_multiplier = 1.0;
    let orchestrator = harness.orchestrator(config);
    let stats = finished(orchestrator.run(&RunRequest::new(PLAYLIST_URL)).await.unwrap());

    assert_eq!(stats.completed, 1);
    assert_eq!(harness.transport.selections().len(), 2);
}

// ==================== Send Retry Tests ====================

#[tokio::test]
async fn test_flood_wait_then_send_succeeds() {
    let song = track("f1", "Artist", "Patience");
    let harness = Harness::new(vec![song.clone()]);
    harness.transport.fail_send(&song.url, TransportError::flood_wait(1));
    harness
        .transport
        .reply(&song.url, Reply::File("Artist - Patience.flac".to_string()));

    let mut config = fast_config(1);
    config.flood_wait_multiplier = 1.0;
    let orchestrator = harness.orchestrator(config);
    let started = Instant::now();
    let stats = finished(orchestrator.run(&RunRequest::new(PLAYLIST_URL)).await.unwrap());

    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(stats.completed, 1);
    assert_eq!(harness.transport.sent(), vec![song.url.clone(), song.url.clone()]);
}

#[tokio::test]
async fn test_repeated_flood_wait_fails_track() {
    let song = track("f2", "Artist", "Throttled");
    let harness = Harness::new(vec![song.clone()]);
    for _ in 0..3 {
        harness.transport.fail_send(&song.url, TransportError::flood_wait(1));
    }

    let mut config = fast_config(1);
    config.flood_wait_multiplier = 1.0;
    let orchestrator = harness.orchestrator(config);
    let stats = finished(orchestrator.run(&RunRequest::new(PLAYLIST_URL)).await.unwrap());

    assert_eq!(stats.failed, 1);
    assert_eq!(harness.transport.sent().len(), 3);
    let session = orchestrator.tracker().snapshot().unwrap();
    let reason = session.tracks["f2"].error_message.clone().unwrap();
    assert_eq!(reason, "Failed to send to bot: flood control: retry after 1s");
    assert_eq!(orchestrator.engine().pending_count(), 0);
}

// ==================== Concurrent Download Tests ====================

#[tokio::test]
async fn test_slow_download_does_not_delay_later_replies() {
    let alpha = track("a1", "Alpha", "First Light");
    let beta = track("b1", "Beta", "Second Wind");
    let gamma = track("c1", "Gamma", "Third Eye");
    let harness = Harness::slow_downloads(
        vec![alpha.clone(), beta.clone(), gamma.clone()],
        Duration::from_millis(1000),
    );
    harness
        .transport
        .reply(&alpha.url, Reply::File("Alpha - First Light.flac".to_string()));
    harness
        .transport
        .reply(&beta.url, Reply::File("Beta - Second Wind.flac".to_string()));
    harness.transport.reply(&gamma.url, Reply::Silence);

    let mut config = fast_config(3);
    config.send_delay = Duration::from_millis(300);
    config.correlation.response_timeout = Duration::from_millis(650);
    let orchestrator = harness.orchestrator(config);
    let stats = finished(orchestrator.run(&RunRequest::new(PLAYLIST_URL)).await.unwrap());

    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 1);
    assert!(harness.output_dir().join("Alpha").join("Alpha - First Light.flac").is_file());
    assert!(harness.output_dir().join("Beta").join("Beta - Second Wind.flac").is_file());
    let session = orchestrator.tracker().snapshot().unwrap();
    assert_eq!(session.tracks["a1"].status, TrackStatus::Completed);
    assert_eq!(session.tracks["b1"].status, TrackStatus::Completed);
    assert_eq!(
        session.tracks["c1"].error_message.as_deref(),
        Some("No response from bot")
    );
}

#[tokio::test]
async fn test_download_finishing_after_batch_timeout_is_discarded() {
    let late = track("d1", "Slowpoke", "Late Arrival");
    let quiet = track("d2", "Ghost", "Nothing");
    let silent = track("d3", "Ghost", "Still Nothing");
    let harness = Harness::slow_downloads(
        vec![late.clone(), quiet.clone(), silent.clone()],
        Duration::from_millis(500),
    );
    harness
        .transport
        .reply(&late.url, Reply::File("Slowpoke - Late Arrival.flac".to_string()));
    harness.transport.reply(&quiet.url, Reply::Silence);
    harness.transport.reply(&silent.url, Reply::Silence);

    let mut config = fast_config(1);
    config.batch_timeout = Duration::from_millis(300);
    let orchestrator = harness.orchestrator(config);
    let stats = finished(orchestrator.run(&RunRequest::new(PLAYLIST_URL)).await.unwrap());

    assert_eq!(stats.completed, 0);
    assert_eq!(stats.failed, 3);
    assert_eq!(harness.transport.downloads(), 1);
    let session = orchestrator.tracker().snapshot().unwrap();
    assert_eq!(session.tracks["d1"].status, TrackStatus::Failed);
    assert_eq!(
        session.tracks["d1"].error_message.as_deref(),
        Some(BATCH_TIMEOUT_REASON)
    );
    assert!(!harness.output_dir().join("Slowpoke").exists());
    let leftovers = std::fs::read_dir(harness.output_dir().join("temp"))
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

// ==================== Sequential Mode Tests ====================

#[tokio::test]
async fn test_sequential_run_waits_for_each_track() {
    let first = track("s1", "Duo", "Opening");
    let second = track("s2", "Duo", "Closing");
    let harness = Harness::new(vec![first.clone(), second.clone()]);
    harness
        .transport
        .reply(&first.url, Reply::File("Duo - Opening.flac".to_string()));
    harness
        .transport
        .reply(&second.url, Reply::File("Duo - Closing.flac".to_string()));

    let (observer, mut events) = ChannelObserver::new();
    let orchestrator = harness
        .orchestrator(fast_config(10))
        .with_observer(Arc::new(observer));
    let mut request = RunRequest::new(PLAYLIST_URL);
    request.sequential = true;
    let stats = finished(orchestrator.run(&request).await.unwrap());
    assert_eq!(stats.completed, 2);

    let mut order = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            ProgressEvent::TrackSent { track_id, .. } => order.push(format!("sent:{track_id}")),
            ProgressEvent::TrackCompleted { track_id, .. } => order.push(format!("done:{track_id}")),
            _ => {}
        }
    }
    assert_eq!(order, vec!["sent:s1", "done:s1", "sent:s2", "done:s2"]);
}

// ==================== Resume Tests ====================

#[tokio::test]
async fn test_completed_session_is_not_sent_again() {
    let song = track("r1", "Artist", "Once");
    let harness = Harness::new(vec![song.clone()]);
    harness
        .transport
        .reply(&song.url, Reply::File("Artist - Once.flac".to_string()));

    let request = RunRequest::new(PLAYLIST_URL);
    finished(harness.orchestrator(fast_config(1)).run(&request).await.unwrap());
    let before = std::fs::read_to_string(harness.progress_path()).unwrap();

    let outcome = harness.orchestrator(fast_config(1)).run(&request).await.unwrap();
    match outcome {
        RunOutcome::AlreadyCompleted(stats) => assert_eq!(stats.completed, 1),
        other => panic!("expected AlreadyCompleted, got {other:?}"),
    }
    assert_eq!(harness.transport.sent().len(), 1);
    assert_eq!(std::fs::read_to_string(harness.progress_path()).unwrap(), before);
}

#[tokio::test]
async fn test_resume_retries_failed_tracks() {
    let song = track("f1", "Artist", "Second Chance");
    let harness = Harness::new(vec![song.clone()]);
    harness.transport.reply(&song.url, Reply::NotFound);
    harness
        .transport
        .reply(&song.url, Reply::File("Artist - Second Chance.flac".to_string()));

    let request = RunRequest::new(PLAYLIST_URL);
    let first = finished(harness.orchestrator(fast_config(1)).run(&request).await.unwrap());
    assert_eq!(first.failed, 1);

    let second = finished(harness.orchestrator(fast_config(1)).run(&request).await.unwrap());
    assert_eq!(second.completed, 1);
    assert_eq!(second.failed, 0);
    assert_eq!(harness.source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_no_resume_starts_over() {
    let song = track("n1", "Artist", "Again");
    let harness = Harness::new(vec![song.clone()]);
    harness
        .transport
        .reply(&song.url, Reply::File("Artist - Again.flac".to_string()));
    harness
        .transport
        .reply(&song.url, Reply::File("Artist - Again.flac".to_string()));

    let mut request = RunRequest::new(PLAYLIST_URL);
    finished(harness.orchestrator(fast_config(1)).run(&request).await.unwrap());
    request.resume = false;
    let stats = finished(harness.orchestrator(fast_config(1)).run(&request).await.unwrap());

    assert_eq!(stats.completed, 1);
    assert_eq!(harness.transport.sent().len(), 2);
}

// ==================== Request Option Tests ====================

#[tokio::test]
async fn test_dry_run_sends_nothing_and_persists_nothing() {
    let tracks = (1..=25)
        .map(|i| track(&format!("d{i}"), "Artist", &format!("Song {i}")))
        .collect();
    let harness = Harness::new(tracks);

    let mut request = RunRequest::new(PLAYLIST_URL);
    request.dry_run = true;
    request.start_from = 3;
    let outcome = harness.orchestrator(fast_config(5)).run(&request).await.unwrap();

    match outcome {
        RunOutcome::DryRun(listing) => {
            assert_eq!(listing.total, 23);
            assert_eq!(listing.preview.len(), 20);
            assert_eq!(listing.preview[0], "Artist - Song 3");
            assert_eq!(listing.remaining, 3);
        }
        other => panic!("expected a dry run, got {other:?}"),
    }
    assert!(harness.transport.sent().is_empty());
    assert!(!harness.progress_path().exists());
}

#[tokio::test]
async fn test_check_existing_skips_present_files() {
    let present = track("e1", "Artist X", "Song Y");
    let absent = track("e2", "Artist X", "New Song");
    let harness = Harness::new(vec![present.clone(), absent.clone()]);
    let artist_dir = harness.output_dir().join("Artist X");
    std::fs::create_dir_all(&artist_dir).unwrap();
    std::fs::write(artist_dir.join("Artist X - Song Y.mp3"), vec![1_u8; AUDIO_SIZE]).unwrap();
    harness
        .transport
        .reply(&absent.url, Reply::File("Artist X - New Song.flac".to_string()));

    let orchestrator = harness.orchestrator(fast_config(5));
    let mut request = RunRequest::new(PLAYLIST_URL);
    request.check_existing = true;
    let stats = finished(orchestrator.run(&request).await.unwrap());

    assert_eq!(harness.transport.sent(), vec![absent.url.clone()]);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.completed, 1);
    let session = orchestrator.tracker().snapshot().unwrap();
    assert_eq!(
        session.tracks["e1"].error_message.as_deref(),
        Some(EXISTING_FILE_REASON)
    );
}

#[tokio::test]
async fn test_check_missing_reports_found_and_missing() {
    let present = track("m1", "Artist X", "Song Y");
    let renamed = track("m2", "Artist X", "Other Song");
    let absent = track("m3", "Band Z", "Unreleased");
    let harness = Harness::new(vec![present.clone(), renamed.clone(), absent.clone()]);
    let artist_dir = harness.output_dir().join("Artist X");
    std::fs::create_dir_all(&artist_dir).unwrap();
    std::fs::write(artist_dir.join("Artist X - Song Y (Remastered).flac"), vec![1_u8; AUDIO_SIZE]).unwrap();
    std::fs::write(artist_dir.join("notes.txt"), b"not audio").unwrap();

    let organizer = Arc::new(FileOrganizer::new(OrganizerConfig::new(harness.output_dir())));
    let report = check_missing(
        &*harness.source,
        organizer,
        &RunRequest::new(PLAYLIST_URL),
    )
    .await
    .unwrap();

    assert_eq!(report.playlist.name, "Weekend Mix");
    assert_eq!(report.scanned_files, 1);
    assert_eq!(report.total(), 3);
    assert_eq!(report.found.len(), 1);
    assert_eq!(report.found[0].position, 1);
    assert!(report.found[0].score >= 90.0);
    let missing: Vec<usize> = report.missing.iter().map(|e| e.position).collect();
    assert_eq!(missing, vec![2, 3]);
    assert!(report.missing.iter().all(|e| e.best_match.is_some() && e.score < 90.0));

    assert!(harness.transport.sent().is_empty());
    assert!(!harness.progress_path().exists());
    assert!(!harness.output_dir().join("temp").exists());
}

#[tokio::test]
async fn test_check_missing_without_output_dir_lists_everything() {
    let tracks: Vec<_> = (1..=3)
        .map(|i| track(&format!("n{i}"), "Artist", &format!("Cut {i}")))
        .collect();
    let harness = Harness::new(tracks);
    let organizer = Arc::new(FileOrganizer::new(OrganizerConfig::new(harness.output_dir())));

    let mut request = RunRequest::new(PLAYLIST_URL);
    request.start_from = 2;
    let report = check_missing(&*harness.source, organizer, &request)
        .await
        .unwrap();

    assert_eq!(report.scanned_files, 0);
    assert!(report.found.is_empty());
    let positions: Vec<usize> = report.missing.iter().map(|e| e.position).collect();
    assert_eq!(positions, vec![2, 3]);
    assert!(report.missing.iter().all(|e| e.best_match.is_none()));
    assert!(!harness.output_dir().exists());
}

#[tokio::test]
async fn test_limit_restricts_session_tracks() {
    let tracks: Vec<_> = (1..=4)
        .map(|i| track(&format!("l{i}"), "Artist", &format!("Cut {i}")))
        .collect();
    let harness = Harness::new(tracks.clone());
    harness
        .transport
        .reply(&tracks[1].url, Reply::File("Artist - Cut 2.flac".to_string()));

    let mut request = RunRequest::new(PLAYLIST_URL);
    request.start_from = 2;
    request.limit = Some(1);
    let stats = finished(harness.orchestrator(fast_config(5)).run(&request).await.unwrap());

    assert_eq!(stats.total, 1);
    assert_eq!(harness.transport.sent(), vec![tracks[1].url.clone()]);
}
