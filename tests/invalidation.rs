mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use newsdeck::application::error::AppError;
use newsdeck::application::pagination::{PageLimits, PageRequest, PaginationResolver};
use newsdeck::application::repos::StoreError;
use newsdeck::cache::{
    BackendKind, CacheError, CacheInvalidator, CacheKeyBuilder, CacheStatus, EvictionBroadcaster,
    EvictionMessage, InvalidationError, LayeredCache, ListingWindow, MutationEvent, Namespace,
};
use newsdeck::domain::articles::{ArticleFilter, ArticleUpdate, NewArticle, SortSpec};
use time::macros::datetime;
use tokio::sync::oneshot;
use uuid::Uuid;

use common::{FlakyBackend, Harness, flaky_tier, memory_tier};

#[derive(Default)]
struct RecordingBroadcaster {
    origin: Uuid,
    failing: bool,
    sent: Mutex<Vec<EvictionMessage>>,
}

impl RecordingBroadcaster {
    fn sent(&self) -> Vec<EvictionMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EvictionBroadcaster for RecordingBroadcaster {
    fn origin(&self) -> Uuid {
        self.origin
    }

    async fn publish(&self, message: &EvictionMessage) -> Result<(), CacheError> {
        if self.failing {
            return Err(CacheError::backend("recording", "channel closed"));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

fn new_article(title: &str) -> NewArticle {
    NewArticle {
        title: title.to_string(),
        summary: String::new(),
        source: "wire".to_string(),
        url: format!("https://news.example/{title}"),
        tags: vec!["rust".to_string()],
        published_at: datetime!(2025-01-01 00:00 UTC),
    }
}

async fn list_status(h: &Harness) -> (CacheStatus, Option<u64>) {
    let page = h
        .listing
        .list(ArticleFilter::default(), SortSpec::default(), PageRequest::default())
        .await
        .unwrap();
    (page.meta.cache, page.total)
}

#[tokio::test]
async fn bulk_import_makes_the_next_listing_read_a_miss() {
    let h = Harness::new(common::articles(10));

    assert_eq!(list_status(&h).await, (CacheStatus::Miss, Some(10)));
    assert_eq!(list_status(&h).await, (CacheStatus::Hit, Some(10)));

    let imported = h
        .commands
        .import(vec![new_article("one"), new_article("two")])
        .await
        .unwrap();
    assert_eq!(imported, 2);

    assert_eq!(list_status(&h).await, (CacheStatus::Miss, Some(12)));
}

#[tokio::test]
async fn update_eviction_is_idempotent() {
    let h = Harness::new(common::articles(3));
    let id = Uuid::from_u128(2);

    assert_eq!(h.listing.get_article(id).await.unwrap().status, CacheStatus::Miss);
    assert_eq!(h.listing.get_article(id).await.unwrap().status, CacheStatus::Hit);

    let first = h.invalidator.on_article_updated(id).await;
    assert!(first.is_clean());
    // One detail entry in each of the two tiers.
    assert_eq!(first.evicted, 2);

    let second = h.invalidator.on_article_updated(id).await;
    assert!(second.is_clean());
    assert_eq!(second.evicted, 0);
    assert_eq!(second.targets, first.targets);

    assert_eq!(h.listing.get_article(id).await.unwrap().status, CacheStatus::Miss);
}

#[tokio::test]
async fn update_command_refreshes_detail_and_favorites() {
    let h = Harness::new(common::articles(3));
    let id = Uuid::from_u128(1);
    let user = Uuid::new_v4();
    h.commands.set_favorite(user, id, true).await.unwrap();

    let favorites = h
        .listing
        .favorites(user, SortSpec::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(favorites.meta.cache, CacheStatus::Miss);
    h.listing.get_article(id).await.unwrap();

    let update = ArticleUpdate {
        title: Some("Corrected headline".to_string()),
        ..Default::default()
    };
    h.commands.update(id, update).await.unwrap();

    let detail = h.listing.get_article(id).await.unwrap();
    assert_eq!(detail.status, CacheStatus::Miss);
    assert_eq!(detail.value.title, "Corrected headline");

    let favorites = h
        .listing
        .favorites(user, SortSpec::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(favorites.meta.cache, CacheStatus::Miss);
    assert_eq!(favorites.items[0].title, "Corrected headline");
}

#[tokio::test]
async fn favorite_change_only_touches_that_user() {
    let h = Harness::new(common::articles(4));
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let ids = [Uuid::from_u128(1), Uuid::from_u128(2)];
    h.commands.set_favorite(alice, ids[0], true).await.unwrap();
    h.commands.set_favorite(bob, ids[1], true).await.unwrap();

    for user in [alice, bob] {
        let flags = h.listing.favorite_flags(user, ids.to_vec()).await.unwrap();
        assert_eq!(flags.status, CacheStatus::Miss);
    }

    assert!(h.commands.set_favorite(alice, ids[1], true).await.unwrap());

    let alice_flags = h.listing.favorite_flags(alice, ids.to_vec()).await.unwrap();
    assert_eq!(alice_flags.status, CacheStatus::Miss);
    assert_eq!(alice_flags.value, ids.to_vec());

    let bob_flags = h.listing.favorite_flags(bob, ids.to_vec()).await.unwrap();
    assert_eq!(bob_flags.status, CacheStatus::Hit);
    assert_eq!(bob_flags.value, vec![ids[1]]);
}

#[tokio::test]
async fn unchanged_favorite_skips_invalidation() {
    let h = Harness::new(common::articles(2));
    let user = Uuid::new_v4();
    let id = Uuid::from_u128(1);
    h.commands.set_favorite(user, id, true).await.unwrap();
    h.listing.favorite_flags(user, vec![id]).await.unwrap();

    assert!(!h.commands.set_favorite(user, id, true).await.unwrap());
    let flags = h.listing.favorite_flags(user, vec![id]).await.unwrap();
    assert_eq!(flags.status, CacheStatus::Hit);
}

#[tokio::test]
async fn delete_drops_the_cached_detail() {
    let h = Harness::new(common::articles(3));
    let id = Uuid::from_u128(3);
    h.listing.get_article(id).await.unwrap();

    h.commands.delete(id).await.unwrap();

    assert!(matches!(
        h.listing.get_article(id).await,
        Err(AppError::NotFound)
    ));
    assert!(matches!(h.commands.delete(id).await, Err(AppError::NotFound)));
}

#[tokio::test]
async fn tag_rename_refreshes_the_tag_cloud() {
    let h = Harness::new(common::articles(6));
    let cloud = h.listing.tag_cloud().await.unwrap();
    assert_eq!(cloud.status, CacheStatus::Miss);
    assert!(cloud.value.iter().any(|t| t.tag == "rust"));

    assert_eq!(h.commands.rename_tag("Rust", "systems").await.unwrap(), 2);

    let cloud = h.listing.tag_cloud().await.unwrap();
    assert_eq!(cloud.status, CacheStatus::Miss);
    assert!(cloud.value.iter().all(|t| t.tag != "rust"));
    assert!(cloud.value.iter().any(|t| t.tag == "systems" && t.count == 2));
}

#[tokio::test]
async fn executed_plans_are_broadcast() {
    let cache = Arc::new(LayeredCache::new(vec![memory_tier("hot")]).unwrap());
    let broadcaster = Arc::new(RecordingBroadcaster {
        origin: Uuid::new_v4(),
        ..Default::default()
    });
    let keys = CacheKeyBuilder::new(common::PREFIX);
    let invalidator =
        CacheInvalidator::new(cache, keys.clone()).with_broadcaster(broadcaster.clone());

    let report = invalidator.on_tag_changed().await;
    assert!(report.broadcast);

    let sent = broadcaster.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].origin, broadcaster.origin);
    assert!(
        sent[0]
            .patterns
            .contains(&keys.namespace_pattern(Namespace::TagCloud).to_string())
    );
}

#[tokio::test]
async fn broadcast_failure_is_reported_but_evictions_still_run() {
    let cache = Arc::new(LayeredCache::new(vec![memory_tier("hot")]).unwrap());
    let keys = CacheKeyBuilder::new(common::PREFIX);
    let key = keys.tag_cloud();
    cache.set(&key, &Vec::<String>::new()).await;

    let invalidator = CacheInvalidator::new(cache.clone(), keys).with_broadcaster(Arc::new(
        RecordingBroadcaster {
            failing: true,
            ..Default::default()
        },
    ));
    let report = invalidator.on_tag_changed().await;

    assert!(!report.broadcast);
    assert_eq!(report.evicted, 1);
    assert!(matches!(
        report.errors.as_slice(),
        [InvalidationError::Broadcast(_)]
    ));
    assert!(cache.get::<Vec<String>>(&key).await.is_none());
}

#[tokio::test]
async fn remote_plans_touch_local_tiers_and_skip_own_origin() {
    let shared = Arc::new(FlakyBackend::new(BackendKind::Redis));
    let cache = Arc::new(
        LayeredCache::new(vec![memory_tier("hot"), flaky_tier("shared", shared.clone())]).unwrap(),
    );
    let keys = CacheKeyBuilder::new(common::PREFIX);
    let own = Uuid::new_v4();
    let invalidator = CacheInvalidator::new(cache.clone(), keys.clone()).with_broadcaster(
        Arc::new(RecordingBroadcaster {
            origin: own,
            ..Default::default()
        }),
    );

    let key = keys.article_detail(Uuid::from_u128(9));
    cache.set(&key, &"cached").await;
    let message = EvictionMessage {
        message_id: Uuid::new_v4(),
        origin: own,
        keys: vec![key.to_string()],
        patterns: vec![keys.namespace_pattern(Namespace::ArticleList).to_string()],
        namespaces: vec![Namespace::ArticleList],
        issued_at: time::OffsetDateTime::now_utc(),
    };

    let echoed = invalidator.apply_remote(&message).await;
    assert_eq!(echoed.evicted, 0);
    assert_eq!(
        cache.get::<String>(&key).await.unwrap().served_by.as_deref(),
        Some("hot")
    );

    let peer = EvictionMessage {
        origin: Uuid::new_v4(),
        ..message
    };
    let applied = invalidator.apply_remote(&peer).await;
    assert!(applied.is_clean());
    assert_eq!(applied.evicted, 1);
    assert!(!applied.broadcast);
    assert_eq!(
        cache.get::<String>(&key).await.unwrap().served_by.as_deref(),
        Some("shared")
    );
}

#[tokio::test]
async fn tier_failures_are_collected_and_other_tiers_still_evicted() {
    let warm = Arc::new(FlakyBackend::new(BackendKind::Memory));
    let h = Harness::with_tiers(
        common::articles(5),
        vec![memory_tier("hot"), flaky_tier("warm", warm.clone())],
    );
    list_status(&h).await;
    warm.fail();

    let report = h.invalidator.on_bulk_import().await;
    assert!(!report.is_clean());
    assert!(report.errors.iter().all(|err| matches!(
        err,
        InvalidationError::Eviction { tier, .. } if tier == "warm"
    )));
    assert!(report.evicted >= 1);

    warm.heal();
    let hot = &h.cache.tiers()[0];
    let pattern = h.keys.namespace_pattern(Namespace::ArticleList);
    assert!(hot.keys(pattern.as_str()).await.unwrap().is_empty());
}

#[tokio::test]
async fn batches_merge_into_one_plan() {
    let h = Harness::new(common::articles(3));
    let id = Uuid::from_u128(1);

    let single = h.invalidator.on_article_updated(id).await;
    let merged = h
        .invalidator
        .handle_batch([
            MutationEvent::ArticleUpdated { article_id: id },
            MutationEvent::ArticleCreated,
            MutationEvent::TagChanged,
        ])
        .await;

    // The tag sweep covers the detail key and every pattern of the update.
    assert_eq!(merged.targets, 4);
    assert!(single.targets > 0);
}

#[tokio::test]
async fn purge_clears_a_single_namespace() {
    let h = Harness::new(common::articles(4));
    list_status(&h).await;
    h.listing.tag_cloud().await.unwrap();

    let report = h.invalidator.purge_namespace(Namespace::ArticleList).await;
    assert_eq!(report.targets, 1);
    assert_eq!(report.evicted, 2);

    assert_eq!(list_status(&h).await.0, CacheStatus::Miss);
    assert_eq!(h.listing.tag_cloud().await.unwrap().status, CacheStatus::Hit);
}

#[test]
fn update_plan_sweeps_listings_and_keeps_the_detail_key() {
    let keys = CacheKeyBuilder::new(common::PREFIX);
    let plan = newsdeck::cache::EvictionPlan::from_events(
        &keys,
        [MutationEvent::ArticleUpdated {
            article_id: Uuid::from_u128(1),
        }],
    );
    insta::assert_snapshot!(
        plan.to_string(),
        @"EvictionPlan { keys: 1, patterns: 3, swept: [articles.list, tags.cloud, favorites.list] }"
    );
}

#[tokio::test]
async fn fill_that_races_a_commit_is_not_cached() {
    let h = Harness::new(common::articles(10));
    let resolver = PaginationResolver::new(h.store.clone(), PageLimits::default());
    let request = resolver.normalize(PageRequest::default());
    let filter = ArticleFilter::default().normalized();
    let window = ListingWindow {
        limit: resolver.limits().clamp(request.limit),
        page: request.page,
        after: None,
        before: None,
    };
    let key = h.keys.listing(&filter, SortSpec::default(), &window);

    let (fetched_tx, fetched_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let cache = h.cache.clone();
    let fill = tokio::spawn(async move {
        cache
            .get_or_set(&key, || async move {
                let page = resolver
                    .paginate(&filter, SortSpec::default(), &request)
                    .await?;
                let _ = fetched_tx.send(());
                let _ = release_rx.await;
                Ok::<_, StoreError>(page)
            })
            .await
    });

    fetched_rx.await.unwrap();
    h.commands.import(vec![new_article("late")]).await.unwrap();
    release_tx.send(()).unwrap();

    let filled = fill.await.unwrap().unwrap();
    assert_eq!(filled.status, CacheStatus::Miss);
    assert_eq!(filled.value.total, Some(10));

    assert_eq!(list_status(&h).await, (CacheStatus::Miss, Some(11)));
    assert_eq!(list_status(&h).await, (CacheStatus::Hit, Some(11)));
}

#[tokio::test]
async fn slow_shared_scan_still_clears_listings() {
    let shared = Arc::new(FlakyBackend::new(BackendKind::Redis));
    shared.slow_keys(Duration::from_millis(300));
    let h = Harness::with_tiers(
        common::articles(10),
        vec![memory_tier("hot"), flaky_tier("shared", shared.clone())],
    );

    assert_eq!(list_status(&h).await, (CacheStatus::Miss, Some(10)));
    assert_eq!(list_status(&h).await, (CacheStatus::Hit, Some(10)));

    let report = h.invalidator.on_bulk_import().await;
    assert!(report.is_clean(), "{:?}", report.errors);
    assert!(report.evicted >= 2);

    assert_eq!(list_status(&h).await.0, CacheStatus::Miss);
}
