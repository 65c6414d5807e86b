use std::sync::Arc;
use std::time::Duration;

use lms_core::model::{ExerciseId, ProgressEvent, UserId};
use lms_core::time::fixed_now;
use services::{ChannelEvent, ChannelState, LiveChannel, LiveEvents, LoopbackHub, RetryPolicy, TcpTransport};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

const WAIT: Duration = Duration::from_secs(2);

fn completed(exercise: &str) -> ProgressEvent {
    ProgressEvent::ExerciseCompleted {
        user_id: Some(UserId::parse("alice").unwrap()),
        exercise_id: ExerciseId::parse(exercise).unwrap(),
        at: fixed_now(),
    }
}

async fn next_remote(events: &mut LiveEvents) -> ProgressEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(ChannelEvent::Remote(event)) => return event,
                Some(ChannelEvent::Reconnected) => {}
                None => panic!("event stream ended"),
            }
        }
    })
    .await
    .expect("remote event in time")
}

#[tokio::test]
async fn loopback_delivers_to_peers_but_not_sender() {
    let hub = LoopbackHub::new();
    let (alice, mut alice_events) = LiveChannel::spawn(Arc::new(hub.transport()), RetryPolicy::immediate());
    let (peer, mut peer_events) = LiveChannel::spawn(Arc::new(hub.transport()), RetryPolicy::immediate());
    assert!(alice.wait_for(ChannelState::Connected, WAIT).await);
    assert!(peer.wait_for(ChannelState::Connected, WAIT).await);
    assert_eq!(alice_events.recv().await, Some(ChannelEvent::Reconnected));

    alice.announce(completed("exercise-1")).unwrap();
    assert_eq!(next_remote(&mut peer_events).await, completed("exercise-1"));

    hub.publish(completed("exercise-2"));
    assert_eq!(next_remote(&mut alice_events).await, completed("exercise-2"));

    alice.shutdown().await;
    peer.shutdown().await;
    assert_eq!(alice.state(), ChannelState::Closed);
    assert!(alice.announce(completed("exercise-3")).is_err());
}

#[tokio::test]
async fn announcements_made_offline_are_flushed_in_order() {
    let hub = LoopbackHub::new();
    let mut tap = hub.tap();
    hub.set_online(false);

    let (channel, _events) = LiveChannel::spawn(Arc::new(hub.transport()), RetryPolicy::immediate());
    assert!(channel.wait_for(ChannelState::Disconnected, WAIT).await);
    for exercise in ["exercise-1", "exercise-2", "exercise-3"] {
        channel.announce(completed(exercise)).unwrap();
    }

    hub.set_online(true);
    assert!(channel.wait_for(ChannelState::Connected, WAIT).await);
    for exercise in ["exercise-1", "exercise-2", "exercise-3"] {
        let seen = tokio::time::timeout(WAIT, tap.next()).await.unwrap();
        assert_eq!(seen, Some(completed(exercise)));
    }
    channel.shutdown().await;
}

#[tokio::test]
async fn channel_reconnects_after_link_loss() {
    let hub = LoopbackHub::new();
    let (channel, mut events) = LiveChannel::spawn(Arc::new(hub.transport()), RetryPolicy::immediate());
    assert_eq!(
        tokio::time::timeout(WAIT, events.recv()).await.unwrap(),
        Some(ChannelEvent::Reconnected)
    );

    hub.set_online(false);
    assert!(channel.wait_for(ChannelState::Disconnected, WAIT).await);
    hub.set_online(true);

    assert_eq!(
        tokio::time::timeout(WAIT, events.recv()).await.unwrap(),
        Some(ChannelEvent::Reconnected)
    );
    assert_eq!(channel.state(), ChannelState::Connected);
    channel.shutdown().await;
}

#[tokio::test]
async fn tcp_transport_speaks_newline_delimited_json_and_skips_bad_lines() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        write.write_all(b"not json\n\n").await.unwrap();
        write.write_all(b"\xff\xfe broken\n").await.unwrap();
        let event = serde_json::to_string(&completed("exercise-7")).unwrap();
        write.write_all(format!("{event}\n").as_bytes()).await.unwrap();

        let mut lines = BufReader::new(read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str::<ProgressEvent>(&line).unwrap()
    });

    let transport = TcpTransport::new(addr, Duration::from_secs(1));
    let (channel, mut events) = LiveChannel::spawn(Arc::new(transport), RetryPolicy::immediate());

    assert_eq!(next_remote(&mut events).await, completed("exercise-7"));
    channel.announce(completed("exercise-8")).unwrap();
    let received = tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
    assert_eq!(received, completed("exercise-8"));

    channel.shutdown().await;
}

#[tokio::test]
async fn unreachable_tcp_endpoint_keeps_retrying_until_shutdown() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let transport = TcpTransport::new(addr, Duration::from_millis(200));
    let (channel, _events) = LiveChannel::spawn(Arc::new(transport), RetryPolicy::immediate());
    channel.announce(completed("exercise-1")).unwrap();
    assert!(!channel.wait_for(ChannelState::Connected, Duration::from_millis(100)).await);

    channel.shutdown().await;
    assert_eq!(channel.state(), ChannelState::Closed);
}
