use crate::api::spotify::{SpotifyPlaylist, SpotifyTrackRef};
use crate::api::{Format, PlaylistInfo, TrackFilesizes};
use crate::config::Settings;
use crate::downloader::artwork::ArtworkCache;
use crate::downloader::{DownloadJob, JobContext};
use crate::events::QueueEvent;
use crate::queue::item::{QueueContent, QueueItem};
use crate::queue::manager::QueueManager;
use crate::testutil::{album, gw, serve_http, CollectSink, MockBridge, MockCatalog};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn context(catalog: MockCatalog, bridge: MockBridge) -> (Arc<JobContext>, Arc<CollectSink>) {
    let sink = Arc::new(CollectSink::default());
    let client = reqwest::Client::new();
    let ctx = Arc::new(JobContext {
        catalog: Arc::new(catalog),
        bridge: Arc::new(bridge),
        events: sink.clone(),
        client: client.clone(),
        artwork: Arc::new(ArtworkCache::with_dir(
            client,
            std::env::temp_dir().join("wavedl-test-artwork"),
        )),
    });
    (ctx, sink)
}

fn test_settings(dir: &std::path::Path) -> Arc<Settings> {
    let mut settings = Settings::default();
    settings.download_location = dir.to_path_buf();
    Arc::new(settings)
}

fn track_link(id: &str) -> String {
    format!("https://www.example-music.com/track/{}", id)
}

#[tokio::test]
async fn enqueue_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut catalog = MockCatalog::with_session();
    catalog.tracks.insert("1".to_string(), gw("1", "Song", "Artist", "10"));
    let (ctx, sink) = context(catalog, MockBridge::default());
    let manager = QueueManager::new(ctx, dir.path().join("queue.json"));
    let settings = test_settings(dir.path());

    let first = manager.enqueue(&track_link("1"), 3, settings.clone()).await;
    let second = manager.enqueue(&track_link("1"), 3, settings).await;

    assert_eq!(first, vec!["track_1_3".to_string()]);
    assert!(second.is_empty());
    assert_eq!(manager.pending().await.len(), 1);
    assert_eq!(
        sink.count(|e| matches!(e, QueueEvent::AlreadyInQueue { .. })),
        1
    );
}

#[tokio::test]
async fn same_track_at_other_bitrate_is_a_new_item() {
    let dir = tempfile::tempdir().unwrap();
    let mut catalog = MockCatalog::with_session();
    catalog.tracks.insert("1".to_string(), gw("1", "Song", "Artist", "10"));
    let (ctx, _sink) = context(catalog, MockBridge::default());
    let manager = QueueManager::new(ctx, dir.path().join("queue.json"));
    let settings = test_settings(dir.path());

    manager.enqueue(&track_link("1"), 3, settings.clone()).await;
    manager.enqueue(&track_link("1"), 9, settings).await;
    assert_eq!(
        manager.pending().await,
        vec!["track_1_3".to_string(), "track_1_9".to_string()]
    );
}

#[tokio::test]
async fn bad_link_does_not_block_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let mut catalog = MockCatalog::with_session();
    catalog.tracks.insert("1".to_string(), gw("1", "Song", "Artist", "10"));
    let (ctx, sink) = context(catalog, MockBridge::default());
    let manager = QueueManager::new(ctx, dir.path().join("queue.json"));
    let settings = test_settings(dir.path());

    let links = format!("this is garbage;{}", track_link("1"));
    let added = manager.enqueue(&links, 3, settings).await;

    assert_eq!(added, vec!["track_1_3".to_string()]);
    assert_eq!(sink.resolution_codes(), vec!["invalidURL".to_string()]);
}

#[tokio::test]
async fn foreign_private_playlist_is_rejected_with_code() {
    let dir = tempfile::tempdir().unwrap();
    let mut catalog = MockCatalog::with_session();
    catalog.playlists.insert(
        "55".to_string(),
        PlaylistInfo {
            id: "55".to_string(),
            title: "Secret".to_string(),
            public: false,
            creator_id: "7".to_string(),
            creator_name: "Someone".to_string(),
            pic: None,
            pic_url: None,
            track_total: 2,
            creation_date: None,
            explicit: false,
        },
    );
    let (ctx, sink) = context(catalog, MockBridge::default());
    let manager = QueueManager::new(ctx, dir.path().join("queue.json"));
    let settings = test_settings(dir.path());

    let added = manager
        .enqueue("https://www.example-music.com/playlist/55", 3, settings)
        .await;
    assert!(added.is_empty());
    assert_eq!(
        sink.resolution_codes(),
        vec!["notYourPrivatePlaylist".to_string()]
    );
}

#[tokio::test]
async fn own_private_playlist_is_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let mut catalog = MockCatalog::with_session();
    catalog.playlists.insert(
        "55".to_string(),
        PlaylistInfo {
            id: "55".to_string(),
            title: "Mine".to_string(),
            public: false,
            creator_id: "42".to_string(),
            creator_name: "Me".to_string(),
            pic: None,
            pic_url: None,
            track_total: 2,
            creation_date: None,
            explicit: false,
        },
    );
    catalog.playlist_tracks.insert(
        "55".to_string(),
        vec![gw("1", "One", "Artist", "10"), gw("2", "Two", "Artist", "10")],
    );
    let (ctx, _sink) = context(catalog, MockBridge::default());
    let manager = QueueManager::new(ctx, dir.path().join("queue.json"));
    let settings = test_settings(dir.path());

    let added = manager
        .enqueue("https://www.example-music.com/playlist/55", 3, settings)
        .await;
    assert_eq!(added, vec!["playlist_55_3".to_string()]);
    let item = manager.item("playlist_55_3").await.unwrap();
    assert_eq!(item.size, 2);
    assert!(item.playlist_context.is_some());
}

#[tokio::test]
async fn album_track_list_is_authoritative_over_reported_total() {
    let dir = tempfile::tempdir().unwrap();
    let mut catalog = MockCatalog::with_session();
    // The public listing caps at 255; the real album has 3 tracks here.
    catalog.albums.insert("77".to_string(), album("77", "Big Box", "Artist", 255));
    catalog.album_tracks.insert(
        "77".to_string(),
        vec![
            gw("1", "One", "Artist", "77"),
            gw("2", "Two", "Artist", "77"),
            gw("3", "Three", "Artist", "77"),
        ],
    );
    let (ctx, _sink) = context(catalog, MockBridge::default());
    let manager = QueueManager::new(ctx, dir.path().join("queue.json"));
    let settings = test_settings(dir.path());

    manager
        .enqueue("https://www.example-music.com/album/77", 3, settings)
        .await;
    let item = manager.item("album_77_3").await.unwrap();
    assert_eq!(item.size, 3);
    assert_eq!(item.album_context.as_ref().unwrap().track_total, 3);
    match &item.content {
        QueueContent::Collection(tracks) => {
            let positions: Vec<_> = tracks.iter().map(|t| t.position).collect();
            assert_eq!(positions, vec![Some(1), Some(2), Some(3)]);
        }
        _ => panic!("album item should hold a collection"),
    }
}

#[tokio::test]
async fn single_track_album_becomes_a_track_item() {
    let dir = tempfile::tempdir().unwrap();
    let mut catalog = MockCatalog::with_session();
    catalog.albums.insert("88".to_string(), album("88", "One Off", "Artist", 1));
    catalog
        .album_tracks
        .insert("88".to_string(), vec![gw("9", "Only", "Artist", "88")]);
    let (ctx, _sink) = context(catalog, MockBridge::default());
    let manager = QueueManager::new(ctx, dir.path().join("queue.json"));
    let settings = test_settings(dir.path());

    let added = manager
        .enqueue("https://www.example-music.com/album/88", 3, settings)
        .await;
    assert_eq!(added, vec!["track_9_3".to_string()]);
}

#[tokio::test]
async fn spotify_links_need_a_configured_bridge() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = MockCatalog::with_session();
    let (ctx, sink) = context(catalog, MockBridge::default());
    let manager = QueueManager::new(ctx, dir.path().join("queue.json"));
    let settings = test_settings(dir.path());

    let added = manager
        .enqueue(
            "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC",
            3,
            settings,
        )
        .await;
    assert!(added.is_empty());
    assert_eq!(sink.resolution_codes(), vec!["spotifyDisabled".to_string()]);
}

#[tokio::test]
async fn not_logged_in_blocks_enqueue() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = MockCatalog::default();
    let (ctx, sink) = context(catalog, MockBridge::default());
    let manager = QueueManager::new(ctx, dir.path().join("queue.json"));
    let settings = test_settings(dir.path());

    let added = manager.enqueue(&track_link("1"), 3, settings).await;
    assert!(added.is_empty());
    assert_eq!(sink.count(|e| matches!(e, QueueEvent::LoginNeeded)), 1);
}

#[tokio::test]
async fn queue_survives_a_save_and_load_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let save_path = dir.path().join("queue.json");
    let settings = test_settings(dir.path());

    {
        let mut catalog = MockCatalog::with_session();
        catalog.tracks.insert("1".to_string(), gw("1", "One", "Artist", "10"));
        catalog.tracks.insert("2".to_string(), gw("2", "Two", "Artist", "10"));
        let (ctx, _sink) = context(catalog, MockBridge::default());
        let manager = QueueManager::new(ctx, save_path.clone());
        manager
            .enqueue(&format!("{};{}", track_link("1"), track_link("2")), 3, settings.clone())
            .await;
        manager.save().await.unwrap();
    }

    let (ctx, sink) = context(MockCatalog::with_session(), MockBridge::default());
    let manager = QueueManager::new(ctx, save_path.clone());
    assert!(manager.load().await.unwrap());
    assert_eq!(
        manager.pending().await,
        vec!["track_1_3".to_string(), "track_2_3".to_string()]
    );
    // Read once, then gone.
    assert!(!save_path.exists());
    assert_eq!(
        sink.count(|e| matches!(e, QueueEvent::QueueRestored { .. })),
        1
    );
}

#[tokio::test]
async fn interrupted_item_restores_to_the_head_with_reset_progress() {
    let dir = tempfile::tempdir().unwrap();
    let save_path = dir.path().join("queue.json");
    let settings = test_settings(dir.path());

    let active = QueueItem::new(
        "track",
        "1",
        3,
        "One".to_string(),
        "Artist".to_string(),
        None,
        QueueContent::Single(gw("1", "One", "Artist", "10")),
        settings.clone(),
    );
    active.progress.store(60, Ordering::SeqCst);
    let pending = QueueItem::new(
        "track",
        "2",
        3,
        "Two".to_string(),
        "Artist".to_string(),
        None,
        QueueContent::Single(gw("2", "Two", "Artist", "10")),
        settings,
    );
    let saved = json!({
        "queue": ["track_2_3"],
        "queueComplete": [],
        "currentItem": "track_1_3",
        "queueList": {
            "track_1_3": active.snapshot(),
            "track_2_3": pending.snapshot(),
        }
    });
    std::fs::write(&save_path, serde_json::to_string(&saved).unwrap()).unwrap();

    let (ctx, _sink) = context(MockCatalog::with_session(), MockBridge::default());
    let manager = QueueManager::new(ctx, save_path);
    assert!(manager.load().await.unwrap());
    assert_eq!(
        manager.pending().await,
        vec!["track_1_3".to_string(), "track_2_3".to_string()]
    );
    let restored = manager.item("track_1_3").await.unwrap();
    assert_eq!(restored.progress.load(Ordering::SeqCst), 0);
    assert!(!restored.is_cancelled());
}

#[tokio::test]
async fn remove_and_cancel_all_clean_the_registry() {
    let dir = tempfile::tempdir().unwrap();
    let mut catalog = MockCatalog::with_session();
    catalog.tracks.insert("1".to_string(), gw("1", "One", "Artist", "10"));
    catalog.tracks.insert("2".to_string(), gw("2", "Two", "Artist", "10"));
    let (ctx, sink) = context(catalog, MockBridge::default());
    let manager = QueueManager::new(ctx, dir.path().join("queue.json"));
    let settings = test_settings(dir.path());

    manager
        .enqueue(&format!("{};{}", track_link("1"), track_link("2")), 3, settings)
        .await;
    manager.remove("track_1_3").await;
    assert_eq!(manager.pending().await, vec!["track_2_3".to_string()]);
    assert!(manager.item("track_1_3").await.is_none());

    manager.cancel_all().await;
    assert!(manager.pending().await.is_empty());
    assert!(manager.item("track_2_3").await.is_none());
    assert_eq!(
        sink.count(|e| matches!(e, QueueEvent::RemovedAllDownloads)),
        1
    );
}

#[tokio::test]
async fn cancel_all_also_drops_finished_items() {
    let dir = tempfile::tempdir().unwrap();
    let mut catalog = MockCatalog::with_session();
    let mut sizes = TrackFilesizes::default();
    sizes.set(Format::Mp3_320, 1000);
    catalog.filesizes.insert("1".to_string(), sizes);
    catalog.tracks.insert("1".to_string(), gw("1", "Song", "Artist", "10"));
    let (ctx, _sink) = context(catalog, MockBridge::default());
    let manager = QueueManager::new(ctx, dir.path().join("queue.json"));
    let settings = test_settings(dir.path());

    manager.enqueue(&track_link("1"), 3, settings).await;
    manager.run().await;
    assert_eq!(manager.completed().await, vec!["track_1_3".to_string()]);

    manager.cancel_all().await;
    assert!(manager.pending().await.is_empty());
    assert!(manager.completed().await.is_empty());
    assert!(manager.item("track_1_3").await.is_none());
}

#[tokio::test]
async fn playlist_collection_downloads_fully_and_writes_ordered_playlist_file() {
    let dir = tempfile::tempdir().unwrap();
    let base = serve_http(200, vec![0u8; 300]).await;
    let mut catalog = MockCatalog::with_session();
    catalog.stream_base = base;
    for id in ["1", "2"] {
        let mut sizes = TrackFilesizes::default();
        sizes.set(Format::Mp3_320, 300);
        catalog.filesizes.insert(id.to_string(), sizes);
    }
    catalog.playlists.insert(
        "55".to_string(),
        PlaylistInfo {
            id: "55".to_string(),
            title: "Road Trip".to_string(),
            public: true,
            creator_id: "7".to_string(),
            creator_name: "Someone".to_string(),
            pic: None,
            pic_url: None,
            track_total: 2,
            creation_date: None,
            explicit: false,
        },
    );
    catalog.playlist_tracks.insert(
        "55".to_string(),
        vec![gw("1", "One", "Artist", "10"), gw("2", "Two", "Artist", "10")],
    );
    let (ctx, sink) = context(catalog, MockBridge::default());
    let manager = QueueManager::new(ctx, dir.path().join("queue.json"));
    let mut settings = Settings::default();
    settings.download_location = dir.path().to_path_buf();
    settings.create_m3u8_file = true;
    settings.save_artwork = false;
    settings.tags.cover = false;

    manager
        .enqueue(
            "https://www.example-music.com/playlist/55",
            3,
            Arc::new(settings),
        )
        .await;
    manager.run().await;

    let item = manager.item("playlist_55_3").await.unwrap();
    assert_eq!(item.downloaded.load(Ordering::SeqCst), item.size);
    assert_eq!(item.failed.load(Ordering::SeqCst), 0);
    assert!(item.is_finished());
    assert_eq!(item.progress.load(Ordering::SeqCst), 100);

    let playlist_dir = dir.path().join("Road Trip");
    assert!(playlist_dir.join("01 - Artist - One.mp3").exists());
    assert!(playlist_dir.join("02 - Artist - Two.mp3").exists());
    let body = std::fs::read_to_string(playlist_dir.join("playlist.m3u8")).unwrap();
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines[0], "#EXTM3U");
    assert_eq!(lines[1], "01 - Artist - One.mp3");
    assert_eq!(lines[2], "02 - Artist - Two.mp3");
    assert_eq!(
        sink.count(|e| matches!(e, QueueEvent::TrackDownloaded { .. })),
        2
    );
}

#[tokio::test]
async fn converted_playlist_keeps_its_playlist_context() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = MockCatalog::with_session();
    let mut bridge = MockBridge::default();
    bridge.enabled = true;
    bridge.playlists.insert(
        "37i9dQ".to_string(),
        SpotifyPlaylist {
            id: "37i9dQ".to_string(),
            title: "Mix".to_string(),
            owner: "Owner".to_string(),
            cover_url: Some("https://img.example/cover.jpg".to_string()),
            track_refs: vec![SpotifyTrackRef {
                artist: "A".to_string(),
                title: "One".to_string(),
                album: "X".to_string(),
                isrc: None,
            }],
        },
    );
    let (ctx, _sink) = context(catalog, bridge);
    let manager = QueueManager::new(ctx, dir.path().join("queue.json"));
    let settings = test_settings(dir.path());

    let added = manager
        .enqueue("https://open.spotify.com/playlist/37i9dQ", 3, settings)
        .await;
    assert_eq!(added, vec!["spotify_playlist_37i9dQ_3".to_string()]);
    let item = manager.item("spotify_playlist_37i9dQ_3").await.unwrap();
    let context = item.playlist_context.as_ref().unwrap();
    assert_eq!(context.title, "Mix");
    assert_eq!(context.owner, "Owner");
    assert_eq!(context.track_total, 1);
}

#[tokio::test]
async fn unreachable_stream_is_recorded_as_a_track_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut catalog = MockCatalog::with_session();
    let mut sizes = TrackFilesizes::default();
    sizes.set(Format::Mp3_320, 1000);
    catalog.filesizes.insert("1".to_string(), sizes);
    catalog.tracks.insert("1".to_string(), gw("1", "Song", "Artist", "10"));
    let (ctx, sink) = context(catalog, MockBridge::default());
    let manager = QueueManager::new(ctx, dir.path().join("queue.json"));
    let settings = test_settings(dir.path());

    manager.enqueue(&track_link("1"), 3, settings).await;
    manager.run().await;

    let item = manager.item("track_1_3").await.unwrap();
    assert_eq!(item.failed.load(Ordering::SeqCst), 1);
    assert!(item.is_finished());
    let errors = item.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, "connectionFailed");
    drop(errors);
    assert_eq!(manager.completed().await, vec!["track_1_3".to_string()]);
    assert_eq!(
        sink.count(|e| matches!(e, QueueEvent::FinishDownload { .. })),
        1
    );

    manager.clear_completed().await;
    assert!(manager.completed().await.is_empty());
    assert!(manager.item("track_1_3").await.is_none());
}

#[tokio::test]
async fn convertible_playlist_records_unmatched_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = MockCatalog::with_session();
    let (ctx, sink) = context(catalog, MockBridge::default());
    let settings = test_settings(dir.path());

    let source = SpotifyPlaylist {
        id: "sp1".to_string(),
        title: "Mix".to_string(),
        owner: "Owner".to_string(),
        cover_url: None,
        track_refs: vec![
            SpotifyTrackRef {
                artist: "A".to_string(),
                title: "One".to_string(),
                album: "X".to_string(),
                isrc: Some("ISRC1".to_string()),
            },
            SpotifyTrackRef {
                artist: "B".to_string(),
                title: "Two".to_string(),
                album: "Y".to_string(),
                isrc: None,
            },
        ],
    };
    let item = Arc::new(QueueItem::new(
        "spotify_playlist",
        "sp1",
        3,
        "Mix".to_string(),
        "Owner".to_string(),
        None,
        QueueContent::Convertible { source },
        settings,
    ));
    assert_eq!(item.size, 2);

    DownloadJob::new(ctx, item.clone()).run().await;

    assert_eq!(item.failed.load(Ordering::SeqCst), 2);
    assert!(item.is_finished());
    let errors = item.errors.lock().unwrap();
    assert!(errors.iter().all(|e| e.code == "trackNotFound"));
    drop(errors);
    assert_eq!(
        sink.count(|e| matches!(e, QueueEvent::TrackFailed { .. })),
        2
    );
}

#[tokio::test]
async fn cancelled_item_downloads_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut catalog = MockCatalog::with_session();
    catalog.albums.insert("77".to_string(), album("77", "Album", "Artist", 2));
    catalog.album_tracks.insert(
        "77".to_string(),
        vec![gw("1", "One", "Artist", "77"), gw("2", "Two", "Artist", "77")],
    );
    let (ctx, _sink) = context(catalog, MockBridge::default());
    let manager = QueueManager::new(ctx.clone(), dir.path().join("queue.json"));
    let settings = test_settings(dir.path());

    manager
        .enqueue("https://www.example-music.com/album/77", 3, settings)
        .await;
    let item = manager.item("album_77_3").await.unwrap();
    item.cancel();
    DownloadJob::new(ctx, item.clone()).run().await;

    assert_eq!(item.downloaded.load(Ordering::SeqCst), 0);
    assert_eq!(item.failed.load(Ordering::SeqCst), 0);
    assert!(item.files.lock().unwrap().is_empty());
}
