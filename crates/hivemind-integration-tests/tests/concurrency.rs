//! Concurrent writers through one manager never lose updates.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::json;

use hivemind_context::{ContextUpdate, NewContext};
use hivemind_test::object;

use common::{stores, unique};

const WRITERS: usize = 32;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_tags_all_land() {
    for store in stores().await {
        let name = store.name;
        let m = Arc::new(store.manager);
        let id = m.create_context(NewContext::default()).await.unwrap();

        let tasks = (0..WRITERS).map(|i| {
            let m = Arc::clone(&m);
            let id = id.clone();
            tokio::spawn(async move { m.add_tag(&id, &format!("t{i}")).await })
        });
        let results = join_all(tasks).await;
        assert!(results.into_iter().all(|r| r.unwrap()), "{name}");

        let node = m.get_context(&id).await.unwrap();
        assert_eq!(node.tags.len(), WRITERS, "{name}");
        assert_eq!(node.version, 33, "{name}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_data_merges_all_land() {
    for store in stores().await {
        let name = store.name;
        let m = Arc::new(store.manager);
        let id = m.create_context(NewContext::default()).await.unwrap();

        let tasks = (0..WRITERS).map(|i| {
            let m = Arc::clone(&m);
            let id = id.clone();
            tokio::spawn(async move {
                m.update_context(
                    &id,
                    ContextUpdate::new().with_data(object(json!({ format!("k{i}"): i }))),
                )
                .await
            })
        });
        for result in join_all(tasks).await {
            assert!(result.unwrap(), "{name}");
        }

        let node = m.get_context(&id).await.unwrap();
        assert_eq!(node.data.len(), WRITERS, "{name}");
        assert_eq!(node.version, 33, "{name}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_entries_get_distinct_ids_and_a_full_history() {
    for store in stores().await {
        let name = store.name;
        let m = Arc::new(store.manager);
        let agent = unique("swarm");

        let tasks = (0..WRITERS).map(|i| {
            let m = Arc::clone(&m);
            let agent = agent.clone();
            tokio::spawn(async move { m.update(&agent, json!({ "i": i }), None).await })
        });
        let ids: HashSet<String> = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();
        assert_eq!(ids.len(), WRITERS, "{name}");

        let history = m.search(Some(&agent), 1_000).await;
        assert_eq!(history.len(), WRITERS, "{name}");
        let listed: HashSet<String> = history.iter().map(|e| e.context_id().to_string()).collect();
        assert_eq!(listed, ids, "{name}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_increments_are_not_lost() {
    for store in stores().await {
        let name = store.name;
        let m = Arc::new(store.manager);
        let id = m
            .create_context(NewContext::new(object(json!({ "counter": 0 }))))
            .await
            .unwrap();

        let tasks = (0..WRITERS).map(|_| {
            let m = Arc::clone(&m);
            let id = id.clone();
            tokio::spawn(async move {
                m.modify_context(&id, |node| {
                    let current = node
                        .data
                        .get("counter")
                        .and_then(serde_json::Value::as_u64)
                        .unwrap_or(0);
                    ContextUpdate::new()
                        .with_data(object(json!({ "counter": current.saturating_add(1) })))
                })
                .await
            })
        });
        for result in join_all(tasks).await {
            assert!(result.unwrap(), "{name}");
        }

        let node = m.get_context(&id).await.unwrap();
        assert_eq!(node.data["counter"], json!(WRITERS), "{name}");
        assert_eq!(node.version, 33, "{name}");
    }
}
