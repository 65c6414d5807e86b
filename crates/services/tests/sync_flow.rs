use std::sync::Arc;
use std::time::Duration;

use lms_core::model::{CurriculumVersion, Exercise, ExerciseId, ProgressRecord, Section, UserId};
use lms_core::time::{fixed_now, manual_clock};
use services::{
    ChannelState, InMemoryExerciseSource, InMemoryProgressStore, LearningSession, LoopbackHub,
    RetryPolicy, SessionError, SessionParts, SyncStatus,
};
use storage::{FileStore, LocalCache};

fn id(raw: &str) -> ExerciseId {
    ExerciseId::parse(raw).unwrap()
}

fn user(raw: &str) -> UserId {
    UserId::parse(raw).unwrap()
}

fn exercises() -> InMemoryExerciseSource {
    let ex = |raw: &str, section, order| {
        Exercise::new(id(raw), raw, section, order, "body", "Estimated Time: 10-15 min").unwrap()
    };
    InMemoryExerciseSource::new().with_version(
        CurriculumVersion::Tk4,
        vec![
            ex("exercise-2", Section::Beginner, 2),
            ex("exercise-1", Section::Beginner, 1),
            ex("exercise-3", Section::Advanced, 1),
            ex("exercise-4", Section::Expert, 1),
        ],
    )
}

fn device(
    store: &InMemoryProgressStore,
    source: &InMemoryExerciseSource,
    hub: Option<&LoopbackHub>,
    cache: LocalCache,
) -> LearningSession {
    LearningSession::new(SessionParts {
        clock: manual_clock(),
        cache,
        progress_store: Arc::new(store.clone()),
        exercises: Arc::new(source.clone()),
        live: hub.map(|hub| Arc::new(hub.transport()) as Arc<dyn services::LiveTransport>),
        retry: RetryPolicy::immediate(),
        version: CurriculumVersion::Tk4,
    })
}

async fn eventually(mut check: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "condition not reached in time");
}

#[tokio::test]
async fn login_reconciles_cache_with_server() {
    let store = InMemoryProgressStore::new();
    let t1 = fixed_now();
    let t2 = t1 + chrono::Duration::minutes(10);
    store.insert(
        user("alice"),
        ProgressRecord::new([id("exercise-2")], Some(id("exercise-3")), Some(t2)),
    );
    let cache = LocalCache::in_memory();
    cache.save_progress(
        &user("alice"),
        &ProgressRecord::new([id("exercise-1")], Some(id("exercise-1")), Some(t1)),
    );

    let mut session = device(&store, &exercises(), None, cache.clone());
    let view = session.login(" alice ").await.unwrap();

    assert_eq!(view.percent, 50);
    assert_eq!(view.current, Some(id("exercise-3")));
    assert_eq!(view.next, Some(id("exercise-4")));
    assert_eq!(view.sections.len(), 3);
    assert_eq!(view.sections[0].exercises[0].id, id("exercise-1"));
    assert_eq!(view.sections[0].exercises[0].time_estimate.as_deref(), Some("10-15"));

    assert!(session.shutdown(Duration::from_secs(2)).await);
    let server = store.get(&user("alice")).unwrap();
    assert_eq!(server.completed().len(), 2);
    assert_eq!(cache.load_progress(&user("alice")), server);
}

#[tokio::test]
async fn remembered_identity_resumes_from_file_cache() {
    let dir = tempfile::tempdir().unwrap();
    let store = InMemoryProgressStore::new();
    let source = exercises();

    {
        let cache = LocalCache::new(Arc::new(FileStore::open(dir.path()).unwrap()));
        let mut session = device(&store, &source, None, cache);
        session.login("alice").await.unwrap();
        assert!(session.mark_complete("exercise-1").unwrap());
        assert!(session.shutdown(Duration::from_secs(2)).await);
    }

    let cache = LocalCache::new(Arc::new(FileStore::open(dir.path()).unwrap()));
    let mut session = device(&store, &source, None, cache);
    let view = session.start().await.unwrap().expect("identity remembered");
    assert_eq!(view.user, user("alice"));
    assert_eq!(view.completed, 1);

    assert_eq!(session.logout().await, Some(user("alice")));
    assert!(session.start().await.unwrap().is_none());
    assert!(session.view().is_none());
}

#[tokio::test]
async fn invalid_input_is_rejected_before_any_write() {
    let store = InMemoryProgressStore::new();
    let mut session = device(&store, &exercises(), None, LocalCache::in_memory());

    assert!(matches!(session.login("<a>").await, Err(SessionError::Identity(_))));
    assert!(matches!(session.mark_complete("exercise-1"), Err(SessionError::Progress(_))));

    session.login("alice").await.unwrap();
    assert!(matches!(session.mark_complete("bad id!"), Err(SessionError::Id(_))));
    assert!(matches!(session.mark_complete("exercise-9"), Err(SessionError::Progress(_))));
    assert!(matches!(session.exercise("exercise-9").await, Err(SessionError::Catalog(_))));
    assert_eq!(session.exercise("exercise-3").await.unwrap().section(), Section::Advanced);
    assert_eq!(session.progress().sync_status(), SyncStatus::Idle);
    assert!(store.get(&user("alice")).is_none());
}

#[tokio::test]
async fn completions_reach_other_devices_of_the_same_user() {
    let hub = LoopbackHub::new();
    let store = InMemoryProgressStore::new();
    let source = exercises();

    let mut laptop = device(&store, &source, Some(&hub), LocalCache::in_memory());
    let mut phone = device(&store, &source, Some(&hub), LocalCache::in_memory());
    let mut other = device(&store, &source, Some(&hub), LocalCache::in_memory());
    laptop.login("alice").await.unwrap();
    phone.login("alice").await.unwrap();
    other.login("bob").await.unwrap();
    for session in [&laptop, &phone, &other] {
        eventually(|| session.live_state() == Some(ChannelState::Connected)).await;
    }

    assert!(laptop.mark_complete("exercise-1").unwrap());
    eventually(|| phone.progress().percent_complete() == 25).await;
    assert_eq!(other.progress().percent_complete(), 0);

    assert!(laptop.shutdown(Duration::from_secs(2)).await);
    assert!(phone.shutdown(Duration::from_secs(2)).await);
    other.shutdown(Duration::from_secs(2)).await;
    assert!(store.get(&user("alice")).unwrap().is_completed(&id("exercise-1")));
}

#[tokio::test]
async fn device_catches_up_after_the_channel_drops() {
    let hub = LoopbackHub::new();
    let store = InMemoryProgressStore::new();
    let source = exercises();

    let mut laptop = device(&store, &source, Some(&hub), LocalCache::in_memory());
    let mut phone = device(&store, &source, Some(&hub), LocalCache::in_memory());
    laptop.login("alice").await.unwrap();
    phone.login("alice").await.unwrap();
    eventually(|| phone.live_state() == Some(ChannelState::Connected)).await;

    hub.set_online(false);
    eventually(|| phone.live_state() != Some(ChannelState::Connected)).await;

    laptop.mark_complete("exercise-1").unwrap();
    laptop.mark_complete("exercise-2").unwrap();
    assert!(laptop.progress().wait_synced(Duration::from_secs(2)).await);
    assert_eq!(phone.progress().percent_complete(), 0);

    hub.set_online(true);
    eventually(|| phone.progress().percent_complete() == 50).await;

    laptop.shutdown(Duration::from_secs(2)).await;
    phone.shutdown(Duration::from_secs(2)).await;
}
