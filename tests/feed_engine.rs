//! Feed engine behavior against scripted sources.

mod common;

use common::*;
use linkwall::channels::{FallbackPage, LiveEvent, LiveSource, SourceError};
use linkwall::config::SettingsStore;
use linkwall::feed::{FetchStatus, Sources};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn empty_mentions_engage_fallback_and_load_more_reuses_its_cursor() {
    let mentions = Arc::new(FakeMentions::default());
    let fallback = Arc::new(
        FakeFallback::default()
            .push(Ok(FallbackPage {
                messages: vec![msg(2_000, "carol", "alice look https://i.imgur.com/a.png")],
                next_cursor: Some("c1".into()),
                has_more: true,
            }))
            .push(Ok(FallbackPage {
                messages: vec![msg(1_000, "dave", "alice again https://example.com/page")],
                next_cursor: None,
                has_more: false,
            })),
    );
    let feed = feed_with(
        Sources {
            mentions: Some(mentions.clone()),
            fallback: Some(fallback.clone()),
            live: Vec::new(),
        },
        &["alice"],
        options(50),
    );

    assert_eq!(feed.load(false).await, FetchStatus::Fetched { added: 1 });
    let view = feed.view();
    assert!(view.using_fallback);
    assert!(view.has_more);
    assert_eq!(view.cards.len(), 1);
    assert_eq!(mentions.call_count(), 1);

    assert_eq!(feed.load_more().await, FetchStatus::Fetched { added: 1 });
    assert_eq!(mentions.call_count(), 1);
    let calls = fallback.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].1, None);
    assert_eq!(calls[1].1.as_deref(), Some("c1"));

    let view = feed.view();
    assert_eq!(view.cards.len(), 2);
    assert!(!view.has_more);
    assert_eq!(feed.load_more().await, FetchStatus::Exhausted);
    assert_eq!(fallback.calls().len(), 2);
}

#[tokio::test]
async fn primary_pages_advance_until_a_short_page() {
    let page: Vec<_> = (1..=3)
        .map(|i| msg(i * 1_000, "bob", &format!("alice https://example.com/{i}")))
        .collect();
    let mentions = Arc::new(FakeMentions::default().with_page("alice", page));
    let feed = feed_with(
        Sources {
            mentions: Some(mentions.clone()),
            ..Sources::default()
        },
        &["alice"],
        options(2),
    );

    assert_eq!(feed.load(false).await, FetchStatus::Fetched { added: 2 });
    assert!(feed.view().has_more);
    assert_eq!(feed.load_more().await, FetchStatus::Fetched { added: 1 });
    assert!(!feed.view().has_more);
    assert_eq!(feed.load_more().await, FetchStatus::Exhausted);

    let offsets: Vec<usize> = mentions.calls.lock().iter().map(|(_, _, o)| *o).collect();
    assert_eq!(offsets, vec![0, 2]);
    assert_eq!(feed.view().message_count, 3);
}

#[tokio::test]
async fn concurrent_trigger_is_dropped_while_a_fetch_is_in_flight() {
    let mentions = Arc::new(
        FakeMentions::default()
            .with_page("alice", vec![msg(1_000, "bob", "alice https://example.com/x")])
            .delayed(Duration::from_millis(200)),
    );
    let feed = feed_with(
        Sources {
            mentions: Some(mentions.clone()),
            ..Sources::default()
        },
        &["alice"],
        options(50),
    );

    let (first, second) = tokio::join!(feed.load(false), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(feed.is_loading());
        feed.load_more().await
    });
    assert_eq!(first, FetchStatus::Fetched { added: 1 });
    assert_eq!(second, FetchStatus::Busy);
    assert_eq!(mentions.call_count(), 1);
    assert!(!feed.is_loading());
}

#[tokio::test]
async fn results_for_replaced_terms_are_discarded() {
    let mentions = Arc::new(
        FakeMentions::default()
            .with_page("alice", vec![msg(1_000, "x", "alice https://example.com/a")])
            .with_page("bob", vec![msg(2_000, "y", "bob https://example.com/b")])
            .delayed(Duration::from_millis(150)),
    );
    let feed = feed_with(
        Sources {
            mentions: Some(mentions.clone()),
            ..Sources::default()
        },
        &["alice"],
        options(50),
    );

    let (first, second) = tokio::join!(feed.load(false), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        feed.set_terms(&terms(&["bob"])).await
    });
    assert_eq!(second, FetchStatus::Busy);
    assert_eq!(first, FetchStatus::Fetched { added: 1 });

    let view = feed.view();
    assert_eq!(view.terms, vec!["bob"]);
    assert_eq!(view.message_count, 1);
    assert_eq!(view.cards.len(), 1);
    assert_eq!(view.cards[0].owner.nick, "y");
    assert_eq!(mentions.called_terms(), vec!["alice", "bob"]);
}

#[tokio::test]
async fn one_failing_term_does_not_sink_the_others() {
    let mentions = Arc::new(
        FakeMentions::default()
            .with_page("alice", vec![msg(1_000, "x", "alice https://example.com/a")])
            .failing("bob"),
    );
    let feed = feed_with(
        Sources {
            mentions: Some(mentions),
            ..Sources::default()
        },
        &["alice", "bob"],
        options(50),
    );

    assert_eq!(feed.load(false).await, FetchStatus::Fetched { added: 1 });
    let view = feed.view();
    assert!(!view.using_fallback);
    assert_eq!(view.cards.len(), 1);
    assert!(view.error.is_none());
}

#[tokio::test]
async fn rate_limit_suspends_fallback_and_reports_retry_time() {
    let fallback = Arc::new(FakeFallback::default().push(Err(SourceError::RateLimited {
        retry_after: Duration::from_secs(60),
    })));
    let feed = feed_with(
        Sources {
            fallback: Some(fallback.clone()),
            ..Sources::default()
        },
        &[],
        options(50),
    );

    let status = feed.load(false).await;
    let FetchStatus::RateLimited { retry_at } = status else {
        panic!("expected rate limit, got {status:?}");
    };
    assert!(retry_at > linkwall::feed::now_ms());
    let error = feed.view().error.unwrap();
    assert!(error.contains("rate limited"), "{error}");

    assert_eq!(feed.load(false).await, FetchStatus::RateLimited { retry_at });
    assert_eq!(fallback.calls().len(), 1);
}

#[tokio::test]
async fn no_fallback_source_means_exhausted() {
    let feed = feed_with(
        Sources {
            mentions: Some(Arc::new(FakeMentions::default())),
            ..Sources::default()
        },
        &["alice"],
        options(50),
    );
    assert_eq!(feed.load(false).await, FetchStatus::Exhausted);
    let view = feed.view();
    assert!(!view.has_more);
    assert!(view.error.is_none());
}

#[tokio::test]
async fn silent_live_source_does_not_block_startup() {
    let feed = feed_with(
        Sources {
            mentions: Some(Arc::new(
                FakeMentions::default()
                    .with_page("alice", vec![msg(1_000, "x", "alice https://example.com/a")]),
            )),
            live: vec![Arc::new(ScriptedLive { events: Vec::new() }) as Arc<dyn LiveSource>],
            ..Sources::default()
        },
        &["alice"],
        options(50),
    );

    let status = tokio::time::timeout(Duration::from_secs(5), feed.start())
        .await
        .expect("start should not wait on a silent live source");
    assert_eq!(status, FetchStatus::Fetched { added: 1 });
    feed.shutdown();
}

#[tokio::test]
async fn live_history_and_streaming_messages_reach_the_wall() {
    let history = vec![msg(1_000, "x", "alice https://example.com/old")];
    let live = msg(5_000, "y", "alice https://example.com/new").streaming();
    let feed = feed_with(
        Sources {
            live: vec![Arc::new(ScriptedLive {
                events: vec![LiveEvent::History(history), LiveEvent::Message(live)],
            }) as Arc<dyn LiveSource>],
            ..Sources::default()
        },
        &["alice"],
        options(50),
    );

    feed.start().await;

    let mut cards = Vec::new();
    for _ in 0..50 {
        cards = feed.view().cards;
        if cards.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(cards.len(), 2);
    assert_eq!(cards[0].owner.nick, "y");
    assert!(cards[0].is_streaming);
    assert!(!cards[1].is_streaming);
    feed.shutdown();
}

#[tokio::test]
async fn moderation_actions_refilter_the_wall() {
    let mentions = Arc::new(FakeMentions::default().with_page(
        "alice",
        vec![
            msg(2_000, "troll", "alice https://example.com/spam"),
            msg(1_000, "friend", "alice https://example.com/good https://example.com/bad"),
        ],
    ));
    let feed = feed_with(
        Sources {
            mentions: Some(mentions),
            ..Sources::default()
        },
        &["alice"],
        options(50),
    );
    feed.load(false).await;
    assert_eq!(feed.view().cards.len(), 3);

    feed.ban_user("dgg", "Troll");
    assert_eq!(feed.view().cards.len(), 2);

    feed.ban_link("https://EXAMPLE.com/bad#frag");
    let view = feed.view();
    assert_eq!(view.cards.len(), 1);
    assert_eq!(view.cards[0].source_url, "https://example.com/good");

    feed.trust_user("dgg", "troll");
    let view = feed.view();
    assert_eq!(view.cards.len(), 2);
    assert!(view.cards.iter().any(|c| c.owner.nick == "troll" && c.is_trusted));

    let friend_id = view
        .cards
        .iter()
        .find(|c| c.owner.nick == "friend")
        .map(|c| c.message_id.clone())
        .unwrap();
    feed.ban_message(&friend_id);
    assert_eq!(feed.view().cards.len(), 1);

    feed.mute_user("dgg", "troll", Duration::from_secs(60));
    assert!(feed.view().cards.is_empty());
    assert_eq!(feed.view().message_count, 2);
}

#[tokio::test]
async fn scroll_far_from_the_end_does_not_fetch() {
    let page: Vec<_> = (1..=3)
        .map(|i| msg(i * 1_000, "bob", &format!("alice https://example.com/{i}")))
        .collect();
    let mentions = Arc::new(FakeMentions::default().with_page("alice", page));
    let mut opts = options(3);
    opts.load_more_threshold = 0;
    let feed = feed_with(
        Sources {
            mentions: Some(mentions.clone()),
            ..Sources::default()
        },
        &["alice"],
        opts,
    );
    feed.load(false).await;
    assert_eq!(feed.view().cards.len(), 3);

    assert_eq!(feed.on_scroll(0).await, FetchStatus::NotNeeded);
    assert_eq!(mentions.call_count(), 1);
    assert_eq!(feed.on_scroll(2).await, FetchStatus::Fetched { added: 0 });
    assert_eq!(mentions.call_count(), 2);
}

#[tokio::test]
async fn reload_card_bumps_its_nonce() {
    let mentions = Arc::new(
        FakeMentions::default()
            .with_page("alice", vec![msg(1_000, "x", "alice https://youtu.be/dQw4w9WgXcQ")]),
    );
    let feed = feed_with(
        Sources {
            mentions: Some(mentions),
            ..Sources::default()
        },
        &["alice"],
        options(50),
    );
    feed.load(false).await;
    let card = feed.view().cards[0].clone();
    assert_eq!(card.reload_nonce, 0);

    assert!(feed.reload_card(&card.id));
    assert_eq!(feed.view().cards[0].reload_nonce, 1);
    assert!(!feed.reload_card("missing"));
}

#[tokio::test]
async fn load_more_after_first_fallback_rate_limit_retries_the_first_page() {
    let fallback = Arc::new(
        FakeFallback::default()
            .push(Err(SourceError::RateLimited {
                retry_after: Duration::ZERO,
            }))
            .push(Ok(FallbackPage {
                messages: vec![msg(1_000, "carol", "hello https://example.com/late")],
                next_cursor: Some("c1".into()),
                has_more: true,
            })),
    );
    let feed = feed_with(
        Sources {
            fallback: Some(fallback.clone()),
            ..Sources::default()
        },
        &[],
        options(50),
    );

    assert!(matches!(feed.load(false).await, FetchStatus::RateLimited { .. }));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(feed.load_more().await, FetchStatus::Fetched { added: 1 });
    let calls = fallback.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].1, None);
    let view = feed.view();
    assert_eq!(view.cards.len(), 1);
    assert!(view.has_more);
    assert!(view.error.is_none());
}

#[tokio::test]
async fn failed_fallback_search_reports_and_load_more_recovers() {
    let fallback = Arc::new(
        FakeFallback::default()
            .push(Err(SourceError::Status {
                status: 500,
                body: "boom".into(),
            }))
            .push(Ok(FallbackPage {
                messages: vec![msg(1_000, "carol", "hello https://example.com/ok")],
                next_cursor: None,
                has_more: false,
            })),
    );
    let feed = feed_with(
        Sources {
            fallback: Some(fallback.clone()),
            ..Sources::default()
        },
        &[],
        options(50),
    );

    let status = feed.load(false).await;
    assert!(matches!(status, FetchStatus::Failed { .. }), "{status:?}");
    let error = feed.view().error.unwrap();
    assert!(error.starts_with("Search failed"), "{error}");
    assert!(feed.view().has_more);

    assert_eq!(feed.load_more().await, FetchStatus::Fetched { added: 1 });
    assert_eq!(fallback.calls()[1].1, None);
    let view = feed.view();
    assert_eq!(view.cards.len(), 1);
    assert!(view.error.is_none());
    assert!(!view.has_more);
}

#[tokio::test]
async fn lapsed_mute_reappears_without_another_action() {
    let mentions = Arc::new(
        FakeMentions::default()
            .with_page("alice", vec![msg(1_000, "loud", "alice https://example.com/a")]),
    );
    let feed = feed_with(
        Sources {
            mentions: Some(mentions),
            ..Sources::default()
        },
        &["alice"],
        options(50),
    );
    feed.load(false).await;
    assert_eq!(feed.view().cards.len(), 1);

    feed.mute_user("dgg", "loud", Duration::from_millis(30));
    assert!(feed.view().cards.is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(feed.view().cards.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn term_change_racing_a_finishing_fetch_is_never_lost() {
    for round in 0..40u64 {
        let mentions = Arc::new(
            FakeMentions::default()
                .with_page("alice", vec![msg(1_000, "x", "alice https://example.com/a")])
                .with_page("bob", vec![msg(2_000, "y", "bob https://example.com/b")])
                .delayed(Duration::from_millis(5)),
        );
        let feed = feed_with(
            Sources {
                mentions: Some(mentions),
                ..Sources::default()
            },
            &["alice"],
            options(50),
        );

        let loader = {
            let feed = Arc::clone(&feed);
            tokio::spawn(async move { feed.load(false).await })
        };
        let switcher = {
            let feed = Arc::clone(&feed);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_micros(round * 250)).await;
                feed.set_terms(&terms(&["bob"])).await
            })
        };
        loader.await.unwrap();
        switcher.await.unwrap();

        let view = feed.view();
        assert_eq!(view.terms, vec!["bob"]);
        assert_eq!(view.cards.len(), 1, "round {round}");
        assert_eq!(view.cards[0].owner.nick, "y");
    }
}

#[tokio::test]
async fn settings_changes_are_persisted_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let feed = Arc::new(linkwall::feed::Feed::new(
        Sources::default(),
        linkwall_core::FilterSettings::default(),
        Some(SettingsStore::new(&path)),
        options(50),
    ));

    for i in 0..10 {
        feed.ban_user("dgg", &format!("user{i}"));
    }

    let reader = SettingsStore::new(&path);
    let mut saved = linkwall_core::FilterSettings::default();
    for _ in 0..200 {
        saved = reader.load(linkwall::feed::now_ms()).unwrap();
        if saved.banned_users.len() == 10 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(saved.banned_users.len(), 10);
    assert!(saved.is_banned_user("dgg", "user9"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}
