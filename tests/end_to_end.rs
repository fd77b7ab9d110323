//! End-to-end scenarios: subscription surface, poll passes, escalation

mod common;

use std::sync::Arc;

use common::{issue, release, starred, RecordingMessenger, ScriptedGitHub};
use repowatch::config::MonitorConfig;
use repowatch::dispatch::Messenger;
use repowatch::error::FetchError;
use repowatch::store::{Destination, ItemKey, Marker};
use repowatch::tokens::CredentialStore;
use repowatch::{Monitor, TokenDb, TrackerDb, WatchKind, WatchService};

struct World {
    store: Arc<TrackerDb>,
    tokens: Arc<TokenDb>,
    github: Arc<ScriptedGitHub>,
    messenger: Arc<RecordingMessenger>,
    service: WatchService,
    monitor: Monitor,
}

fn world_with(settings: MonitorConfig) -> World {
    let store = Arc::new(TrackerDb::open_in_memory().unwrap());
    let tokens = Arc::new(TokenDb::open_in_memory().unwrap());
    let github = ScriptedGitHub::new();
    let messenger = RecordingMessenger::new();

    let service = WatchService::new(Arc::clone(&store));
    let monitor = Monitor::new(
        Arc::clone(&store),
        Arc::clone(&github) as Arc<dyn repowatch::ResourceClient>,
        Arc::clone(&tokens) as Arc<dyn CredentialStore>,
        Arc::clone(&messenger) as Arc<dyn Messenger>,
        settings,
    );

    World {
        store,
        tokens,
        github,
        messenger,
        service,
        monitor,
    }
}

fn world() -> World {
    world_with(MonitorConfig::default())
}

#[tokio::test]
async fn release_watch_lifecycle() {
    let w = world();

    w.tokens.store_token(100, "ghp_alice").unwrap();
    w.service
        .subscribe(100, "rust-lang", "rust", &[WatchKind::Releases], None)
        .unwrap();

    // First pass establishes the baseline silently
    w.github
        .push_release("rust-lang", "rust", Ok(Some(release("10", "1.80.0"))));
    let summary = w.monitor.run_pass().await.unwrap();
    assert_eq!(summary.items_checked, 1);
    assert_eq!(summary.notifications_sent, 0);

    // Second pass sees a new release and notifies the subscriber's DM
    w.github
        .push_release("rust-lang", "rust", Ok(Some(release("11", "1.81.0"))));
    let summary = w.monitor.run_pass().await.unwrap();
    assert_eq!(summary.notifications_sent, 1);

    let sent = w.messenger.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, Destination::User(100));
    assert!(sent[0].1.contains("1.81.0"));
    assert!(sent[0].1.contains("rust-lang/rust"));

    // Third pass with the same release is silent
    w.github
        .push_release("rust-lang", "rust", Ok(Some(release("11", "1.81.0"))));
    let summary = w.monitor.run_pass().await.unwrap();
    assert_eq!(summary.notifications_sent, 0);
}

#[tokio::test]
async fn issue_watch_delivers_to_topic() {
    let w = world();
    let topic = Destination::Topic {
        chat_id: -1001234,
        thread_id: 42,
    };

    w.tokens.store_token(100, "ghp_alice").unwrap();
    w.service
        .subscribe(100, "tokio-rs", "tokio", &[WatchKind::Issues], Some(topic))
        .unwrap();

    w.github.push_issue("tokio-rs", "tokio", Ok(None));
    w.monitor.run_pass().await.unwrap();

    w.github.push_issue(
        "tokio-rs",
        "tokio",
        Ok(Some(issue("500", 6000, "runtime panics on shutdown"))),
    );
    let summary = w.monitor.run_pass().await.unwrap();
    assert_eq!(summary.notifications_sent, 1);

    let sent = w.messenger.sent();
    assert_eq!(sent[0].0, topic);
    assert!(sent[0].1.contains("tokio#6000"));
}

#[tokio::test]
async fn repo_gone_is_retired_after_threshold() {
    let w = world_with(MonitorConfig {
        not_found_threshold: 3,
        ..Default::default()
    });

    w.tokens.store_token(100, "ghp_alice").unwrap();
    w.tokens.store_token(200, "ghp_bob").unwrap();
    w.service
        .subscribe(100, "gone", "repo", &[WatchKind::Releases], None)
        .unwrap();
    w.service
        .subscribe(
            200,
            "gone",
            "repo",
            &[WatchKind::Releases],
            Some(Destination::Channel(-5)),
        )
        .unwrap();

    for _ in 0..3 {
        w.github.push_release("gone", "repo", Err(FetchError::NotFound));
        w.monitor.run_pass().await.unwrap();
    }

    // Exactly one final notice per destination, then the item is gone
    let sent = w.messenger.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().any(|(d, _)| *d == Destination::User(100)));
    assert!(sent.iter().any(|(d, _)| *d == Destination::Channel(-5)));
    assert!(sent.iter().all(|(_, text)| text.contains("gone/repo")));

    let key = ItemKey::Releases {
        owner: "gone".into(),
        repo: "repo".into(),
    };
    assert!(w.store.get_item(&key).unwrap().is_none());
    assert_eq!(w.service.subscription_count(100).unwrap(), 0);

    // Later passes see nothing and send nothing more
    let summary = w.monitor.run_pass().await.unwrap();
    assert_eq!(summary.items_checked, 0);
    assert_eq!(w.messenger.sent().len(), 2);
}

#[tokio::test]
async fn star_watch_full_flow() {
    let w = world();

    w.tokens.store_token(100, "ghp_octocat").unwrap();
    w.github.set_login("octocat");
    w.service.watch_stars(100, "octocat", None).unwrap();

    // Baseline: three already-starred repositories, no notifications
    w.github.push_stars(Ok(vec![
        starred("3", "c/three"),
        starred("2", "b/two"),
        starred("1", "a/one"),
    ]));
    let summary = w.monitor.run_pass().await.unwrap();
    assert_eq!(summary.notifications_sent, 0);

    // Two new stars on top, one old star withdrawn
    w.github.push_stars(Ok(vec![
        starred("5", "e/five"),
        starred("4", "d/four"),
        starred("2", "b/two"),
        starred("1", "a/one"),
    ]));
    let summary = w.monitor.run_pass().await.unwrap();
    assert_eq!(summary.notifications_sent, 2);

    // Chronological delivery: oldest new star first
    let sent = w.messenger.sent();
    assert!(sent[0].1.contains("d/four"));
    assert!(sent[1].1.contains("e/five"));

    // Baseline replaced wholesale: the unstarred repo is silently dropped
    let key = ItemKey::Stars {
        account: "octocat".into(),
    };
    let item = w.store.get_item(&key).unwrap().unwrap();
    let expected =
        Marker::StarSet(["1", "2", "4", "5"].iter().map(|s| s.to_string()).collect());
    assert_eq!(item.marker, Some(expected));
}

#[tokio::test]
async fn unsubscribed_repo_stops_being_polled() {
    let w = world_with(MonitorConfig {
        purge_every_passes: 1,
        ..Default::default()
    });

    w.tokens.store_token(100, "ghp_alice").unwrap();
    w.service
        .subscribe(
            100,
            "rust-lang",
            "rust",
            &[WatchKind::Releases, WatchKind::Issues],
            None,
        )
        .unwrap();

    assert_eq!(w.service.unsubscribe(100, "rust-lang", "rust").unwrap(), 2);

    // The orphaned items are purged during the pass; nothing is fetched
    // afterwards, so the empty script never trips a transport error.
    w.github
        .push_release("rust-lang", "rust", Err(FetchError::Transport("x".into())));
    w.github
        .push_issue("rust-lang", "rust", Err(FetchError::Transport("x".into())));
    w.monitor.run_pass().await.unwrap();

    let summary = w.monitor.run_pass().await.unwrap();
    assert_eq!(summary.items_checked, 0);
    assert_eq!(summary.failed_checks, 0);
    assert!(w.messenger.sent().is_empty());
}

#[tokio::test]
async fn mixed_items_are_isolated_within_a_pass() {
    let w = world();

    w.tokens.store_token(100, "ghp_alice").unwrap();
    w.service
        .subscribe(100, "ok", "repo", &[WatchKind::Releases], None)
        .unwrap();
    w.service
        .subscribe(100, "broken", "repo", &[WatchKind::Releases], None)
        .unwrap();

    // Baseline both, then one repo errors while the other releases
    w.github.push_release("ok", "repo", Ok(Some(release("1", "v1"))));
    w.github
        .push_release("broken", "repo", Ok(Some(release("7", "v7"))));
    w.monitor.run_pass().await.unwrap();

    w.github.push_release("ok", "repo", Ok(Some(release("2", "v2"))));
    w.github
        .push_release("broken", "repo", Err(FetchError::Transport("boom".into())));
    let summary = w.monitor.run_pass().await.unwrap();

    assert_eq!(summary.notifications_sent, 1);
    assert_eq!(summary.failed_checks, 1);

    let sent = w.messenger.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("v2"));
}
