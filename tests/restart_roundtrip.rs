// End-to-end persistence and fan-out flow, exercised the way a process
// restart would: accumulate state, sync to disk, reopen into a fresh
// registry and keep folding.

use std::sync::Arc;

use tempfile::tempdir;
use tokio::sync::mpsc;

use pulseboard::broadcast::{Broadcaster, Envelope, ViewerConnection};
use pulseboard::library::ScriptLibrary;
use pulseboard::message::{Message, Value};
use pulseboard::profile::ProfileDefinition;
use pulseboard::registry::ProfileRegistry;
use pulseboard::storage::{ProfileStore, RocksDbProfileStore};

const SUM_SCRIPT: &str = r#"
    let sum = get("sum", 0);
    sum += message.value;
    set("sum", sum);
    title("the sum is " + sum);
"#;

fn sum_definition(id: &str) -> ProfileDefinition {
    ProfileDefinition {
        id: id.to_string(),
        eval_script: SUM_SCRIPT.to_string(),
        ..Default::default()
    }
}

fn measurement(value: i64) -> Message {
    Message {
        name: "cpu_temp".to_string(),
        timestamp: value,
        value: Some(Value::Int(value)),
    }
}

#[tokio::test]
async fn profiles_survive_a_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("profiles");

    {
        let store: Arc<RocksDbProfileStore> =
            Arc::new(RocksDbProfileStore::open(&path).unwrap());
        let registry =
            ProfileRegistry::new(store.clone(), Arc::new(ScriptLibrary::default()));

        registry.add(sum_definition("p-1")).await.unwrap();
        registry.eval_sweep(&measurement(2)).await;
        registry.eval_sweep(&measurement(3)).await;
        store.sync_all(&registry.snapshot().await).await.unwrap();
    }

    let store = Arc::new(RocksDbProfileStore::open(&path).unwrap());
    let registry = ProfileRegistry::new(store, Arc::new(ScriptLibrary::default()));
    assert_eq!(registry.load().await.unwrap(), 1);

    // The display survived the restart...
    let states = registry.list().await;
    assert_eq!(states.len(), 1);
    assert_eq!(
        states[0].display.get("title"),
        Some(&Value::Text("the sum is 5".to_string()))
    );

    // ...and so did the store: the fold continues where it left off.
    let states = registry.eval_sweep(&measurement(4)).await;
    assert_eq!(
        states[0].display.get("title"),
        Some(&Value::Text("the sum is 9".to_string()))
    );
}

#[tokio::test]
async fn viewers_get_replay_then_live_traffic_and_deletes() {
    let dir = tempdir().unwrap();
    let store = Arc::new(RocksDbProfileStore::open(dir.path()).unwrap());
    let registry = Arc::new(ProfileRegistry::new(
        store,
        Arc::new(ScriptLibrary::default()),
    ));
    let broadcaster = Broadcaster::new();

    registry.add(sum_definition("p-1")).await.unwrap();
    registry.add(sum_definition("p-2")).await.unwrap();

    // A viewer connecting with two profiles present sees exactly two
    // update envelopes before anything else.
    let (tx, mut rx) = mpsc::unbounded_channel();
    let replay: Vec<Envelope> = registry
        .list()
        .await
        .into_iter()
        .map(Envelope::update)
        .collect();
    broadcaster
        .register(ViewerConnection::new(tx), &replay)
        .await;

    for expected in ["p-1", "p-2"] {
        let frame: serde_json::Value =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["id"], expected);
        assert_eq!(frame["data"]["type"], "update");
    }

    // A measurement sweep produces one update per profile, in order.
    for state in registry.eval_sweep(&measurement(2)).await {
        broadcaster.fanout(&Envelope::update(state)).await;
    }
    for expected in ["p-1", "p-2"] {
        let frame: serde_json::Value =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["id"], expected);
        assert_eq!(frame["data"]["state"]["display"]["title"], "the sum is 2");
    }

    // Removal broadcasts exactly one delete envelope.
    assert!(registry.remove("p-2").await.unwrap());
    broadcaster.fanout(&Envelope::delete("p-2")).await;
    let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(frame["id"], "p-2");
    assert_eq!(frame["data"]["type"], "delete");

    // Removing it again is a no-op with nothing broadcast.
    assert!(!registry.remove("p-2").await.unwrap());
    for state in registry.eval_sweep(&measurement(3)).await {
        broadcaster.fanout(&Envelope::update(state)).await;
    }
    let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(frame["id"], "p-1");
    assert_eq!(frame["data"]["state"]["display"]["title"], "the sum is 5");
}
