use chatwave_client::store::{to_fields, DocumentStore, Query};
use chatwave_client::{schema, ClientEvent, Directory, MessageStore, ViewPhase};
use chatwave_contracts::{email, next_event, pump_until, Harness};
use chatwave_messaging::{iso_timestamp, Conversation, ConversationId, Profile, UserId};
use chrono::{TimeZone, Utc};
use std::time::Duration;
use tokio::time::{sleep, Instant};

async fn conversation_count(harness: &Harness) -> usize {
    harness
        .store
        .query(&Query::new(schema::chats()))
        .await
        .unwrap()
        .len()
}

fn unread_of(client: &chatwave_client::ChatClient, id: &ConversationId) -> Option<usize> {
    client
        .conversations()
        .into_iter()
        .find(|summary| &summary.conversation_id == id)
        .map(|summary| summary.unread_count)
}

#[tokio::test]
async fn test_one_conversation_per_pair() {
    let harness = Harness::new();
    let mut alice = harness.signed_up("Alice").await.unwrap();
    let mut bob = harness.signed_up("Bob").await.unwrap();

    let first = alice.create_conversation(&email("Bob")).await.unwrap();
    for _ in 0..3 {
        assert_eq!(alice.create_conversation(&email("Bob")).await.unwrap(), first);
        assert_eq!(bob.create_conversation(&email("Alice")).await.unwrap(), first);
    }

    assert_eq!(conversation_count(&harness).await, 1);
}

#[tokio::test]
async fn test_concurrent_first_contact_converges() {
    let harness = Harness::new();
    let alice = harness.signed_up("Alice").await.unwrap();
    let bob = harness.signed_up("Bob").await.unwrap();
    let alice_id = alice.current_profile().unwrap().id;
    let bob_id = bob.current_profile().unwrap().id;

    let directory = Directory::new(harness.store.clone(), harness.config.avatar_base_url.clone());
    let bob_email = email("Bob");
    let alice_email = email("Alice");
    let (from_alice, from_bob) = tokio::join!(
        directory.create_or_reuse(&alice_id, &bob_email),
        directory.create_or_reuse(&bob_id, &alice_email),
    );

    assert_eq!(from_alice.unwrap(), from_bob.unwrap());
    assert_eq!(conversation_count(&harness).await, 1);
}

#[tokio::test]
async fn test_unread_count_resets_when_opened() {
    let harness = Harness::new();
    let mut alice = harness.signed_up("Alice").await.unwrap();
    let mut bob = harness.signed_up("Bob").await.unwrap();

    let id = alice.create_conversation(&email("Bob")).await.unwrap();
    for text in ["hi", "are you there?"] {
        alice.set_draft(text).await;
        alice.send_message().await.unwrap();
    }

    pump_until(&mut bob, |bob| unread_of(bob, &id) == Some(2))
        .await
        .unwrap();

    bob.select_conversation(&id).await.unwrap();
    pump_until(&mut bob, |bob| unread_of(bob, &id) == Some(0))
        .await
        .unwrap();

    // the sender's own messages never count for the sender
    pump_until(&mut alice, |alice| unread_of(alice, &id).is_some())
        .await
        .unwrap();
    assert_eq!(unread_of(&alice, &id), Some(0));
}

#[tokio::test]
async fn test_messages_arrive_in_timestamp_order() {
    let harness = Harness::new();
    let mut alice = harness.signed_up("Alice").await.unwrap();
    let mut bob = harness.signed_up("Bob").await.unwrap();

    let id = alice.create_conversation(&email("Bob")).await.unwrap();
    bob.select_conversation(&id).await.unwrap();

    for i in 0..5 {
        alice.set_draft(format!("message {i}")).await;
        alice.send_message().await.unwrap();
    }

    pump_until(&mut bob, |bob| bob.messages().len() == 5)
        .await
        .unwrap();
    let messages = bob.messages();
    assert!(messages
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp));
    let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(
        texts,
        vec!["message 0", "message 1", "message 2", "message 3", "message 4"]
    );
}

#[tokio::test]
async fn test_double_reaction_removes_it() {
    let harness = Harness::new();
    let mut alice = harness.signed_up("Alice").await.unwrap();
    let mut bob = harness.signed_up("Bob").await.unwrap();

    let id = alice.create_conversation(&email("Bob")).await.unwrap();
    alice.set_draft("react to this").await;
    let message_id = alice.send_message().await.unwrap().unwrap();
    bob.select_conversation(&id).await.unwrap();

    bob.react(&message_id, "👍").await.unwrap();
    alice.react(&message_id, "❤️").await.unwrap();
    bob.react(&message_id, "👍").await.unwrap();

    let stored = harness
        .store
        .get(&schema::message_doc(&id, &message_id))
        .await
        .unwrap()
        .unwrap();
    let message = schema::decode_message(&stored).unwrap();
    let bob_id = bob.current_profile().unwrap().id;
    let alice_id = alice.current_profile().unwrap().id;
    assert_eq!(message.reactions.get(&bob_id), None);
    assert_eq!(message.reactions.get(&alice_id), Some("❤️"));
    assert_eq!(message.reactions.len(), 1);
}

#[tokio::test]
async fn test_concurrent_reactors_keep_both_entries() {
    let harness = Harness::new();
    let mut alice = harness.signed_up("Alice").await.unwrap();
    let mut bob = harness.signed_up("Bob").await.unwrap();

    let id = alice.create_conversation(&email("Bob")).await.unwrap();
    alice.set_draft("hello").await;
    let message_id = alice.send_message().await.unwrap().unwrap();
    bob.select_conversation(&id).await.unwrap();

    let (a, b) = tokio::join!(
        alice.react(&message_id, "😂"),
        bob.react(&message_id, "😮"),
    );
    a.unwrap();
    b.unwrap();

    let stored = harness
        .store
        .get(&schema::message_doc(&id, &message_id))
        .await
        .unwrap()
        .unwrap();
    let message = schema::decode_message(&stored).unwrap();
    assert_eq!(
        message.reactions.tally(),
        vec![("😂".to_string(), 1), ("😮".to_string(), 1)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_typing_flag_clears_after_quiet_period() {
    let harness = Harness::new();
    let mut alice = harness.signed_up("Alice").await.unwrap();
    let mut bob = harness.signed_up("Bob").await.unwrap();

    let id = alice.create_conversation(&email("Bob")).await.unwrap();
    bob.select_conversation(&id).await.unwrap();
    assert!(!bob.counterpart_typing());

    alice.set_draft("h").await;
    sleep(Duration::from_secs(1)).await;
    alice.set_draft("he").await;
    sleep(Duration::from_secs(1)).await;
    alice.set_draft("hey").await;
    let last_keystroke = Instant::now();

    pump_until(&mut bob, |bob| bob.counterpart_typing())
        .await
        .unwrap();
    loop {
        if next_event(&mut bob).await.unwrap() == ClientEvent::CounterpartTyping(false) {
            break;
        }
    }

    assert!(last_keystroke.elapsed() >= harness.config.typing_quiet_period);
    assert!(!bob.counterpart_typing());
}

#[tokio::test]
async fn test_directory_sorts_by_recency_with_absent_last() {
    let harness = Harness::new();
    let viewer = UserId::from("viewer");
    let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
    let t2 = Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap();
    let t3 = Utc.with_ymd_and_hms(2024, 1, 3, 9, 0, 0).unwrap();

    for (peer, at) in [("p3", Some(t3)), ("p0", None), ("p1", Some(t1)), ("p2", Some(t2))] {
        let peer = UserId::from(peer);
        let profile = Profile::placeholder(peer.clone(), &harness.config.avatar_base_url);
        harness
            .store
            .set(&schema::user_doc(&peer), to_fields(&profile).unwrap())
            .await
            .unwrap();

        let mut conversation = Conversation::between(&viewer, &peer, t1);
        conversation.last_message_time = at.map(iso_timestamp);
        harness
            .store
            .create(
                &schema::chat_doc(&conversation.id),
                to_fields(&conversation).unwrap(),
            )
            .await
            .unwrap();
    }

    let directory = Directory::new(harness.store.clone(), harness.config.avatar_base_url.clone());
    let mut feed = directory.subscribe(&viewer).await.unwrap();
    let list = feed.next().await.unwrap().unwrap();

    let order: Vec<&str> = list
        .iter()
        .map(|summary| summary.counterpart.id.as_str())
        .collect();
    assert_eq!(order, vec!["p3", "p2", "p1", "p0"]);
}

#[tokio::test]
async fn test_end_to_end_first_message() {
    let harness = Harness::new();
    let mut alice = harness.signed_up("Alice").await.unwrap();
    let mut bob = harness.signed_up("Bob").await.unwrap();
    let bob_id = bob.current_profile().unwrap().id;

    let id = alice.create_conversation(&email("Bob")).await.unwrap();
    assert_eq!(conversation_count(&harness).await, 1);
    assert_eq!(alice.view().phase(), ViewPhase::Active);

    alice.set_draft("hi").await;
    let message_id = alice.send_message().await.unwrap().unwrap();
    assert_eq!(alice.view().draft(), "");

    pump_until(&mut bob, |bob| {
        bob.conversations().iter().any(|summary| {
            summary.conversation_id == id
                && summary.unread_count == 1
                && summary.preview(&bob_id) == "hi"
        })
    })
    .await
    .unwrap();
    let summary = bob.conversations()[0].clone();
    assert_eq!(summary.counterpart.display_name, "Alice");

    bob.select_conversation(&id).await.unwrap();
    pump_until(&mut bob, |bob| unread_of(bob, &id) == Some(0))
        .await
        .unwrap();

    let stored = harness
        .store
        .get(&schema::message_doc(&id, &message_id))
        .await
        .unwrap()
        .unwrap();
    assert!(schema::decode_message(&stored).unwrap().read);

    let messages = MessageStore::new(harness.store.clone());
    assert_eq!(
        messages
            .mark_all_read(&id, &bob_id)
            .await
            .unwrap(),
        0
    );
}
