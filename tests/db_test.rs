// Repository tests for Chatstore

use std::sync::Arc;

use chatstore::db::{
    repositories::agent::{SubAgent, SubAgentMode, DEFAULT_AGENT_NAME, DEFAULT_MODEL},
    repositories::conversation::{NewMessage, Sender, DEFAULT_TITLE},
    AgentRepository, ConnectionManager, ConversationRepository, StoreError,
};
use tempfile::TempDir;

struct Fixture {
    agents: AgentRepository,
    conversations: ConversationRepository,
    _temp: TempDir,
}

fn create_test_repos() -> Fixture {
    let temp = TempDir::new().unwrap();
    let manager = Arc::new(ConnectionManager::new(temp.path().join("test.db")));
    Fixture {
        agents: AgentRepository::new(manager.clone()),
        conversations: ConversationRepository::new(manager),
        _temp: temp,
    }
}

#[tokio::test]
async fn test_create_agent_with_defaults() {
    let f = create_test_repos();

    let id = f.agents.create(None, None, None).await.unwrap();
    let agent = f.agents.get(id).await.unwrap().unwrap();

    assert_eq!(agent.id, id);
    assert_eq!(agent.name, DEFAULT_AGENT_NAME);
    assert_eq!(agent.model, DEFAULT_MODEL);
    assert!(agent.sub_agents.is_empty());
    assert_eq!(agent.created_at, agent.updated_at);
}

#[tokio::test]
async fn test_agent_not_found() {
    let f = create_test_repos();
    assert!(f.agents.get(999).await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_agent_replaces_record() {
    let f = create_test_repos();
    let id = f.agents.create(Some("Coder".into()), None, None).await.unwrap();
    let mut agent = f.agents.get(id).await.unwrap().unwrap();
    let created_at = agent.created_at;

    agent.name = "Reviewer".into();
    agent.system_prompt = "Review code.".into();
    agent.sub_agents = vec![SubAgent { name: "linter".into(), mode: SubAgentMode::Tool }];
    let updated = f.agents.update(&agent).await.unwrap();

    let stored = f.agents.get(id).await.unwrap().unwrap();
    assert_eq!(stored, updated);
    assert_eq!(stored.name, "Reviewer");
    assert_eq!(stored.created_at, created_at);
    assert!(stored.updated_at > agent.updated_at);
}

#[tokio::test]
async fn test_update_missing_agent_is_not_found() {
    let f = create_test_repos();
    let id = f.agents.create(None, None, None).await.unwrap();
    let mut agent = f.agents.get(id).await.unwrap().unwrap();
    agent.id = id + 100;

    let err = f.agents.update(&agent).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(f.agents.get(id + 100).await.unwrap().is_none());
}

#[tokio::test]
async fn test_too_many_sub_agents_rejected() {
    let f = create_test_repos();
    let id = f.agents.create(None, None, None).await.unwrap();
    let mut agent = f.agents.get(id).await.unwrap().unwrap();
    agent.sub_agents = (0..3)
        .map(|i| SubAgent { name: format!("s{}", i), mode: SubAgentMode::Handoff })
        .collect();

    let err = f.agents.update(&agent).await.unwrap_err();
    assert!(matches!(err, StoreError::ConstraintViolation(_)));
}

#[tokio::test]
async fn test_ensure_default_seeds_once() {
    let f = create_test_repos();

    let seeded = f.agents.ensure_default().await.unwrap();
    assert_eq!(seeded.name, DEFAULT_AGENT_NAME);

    let again = f.agents.ensure_default().await.unwrap();
    assert_eq!(again.id, seeded.id);
    assert_eq!(f.agents.get_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_agents_sorted_by_updated_at_desc() {
    let f = create_test_repos();
    let a = f.agents.create(Some("a".into()), None, None).await.unwrap();
    let b = f.agents.create(Some("b".into()), None, None).await.unwrap();
    let c = f.agents.create(Some("c".into()), None, None).await.unwrap();

    let ids: Vec<i64> = f.agents.get_all().await.unwrap().iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![c, b, a]);

    let oldest = f.agents.get(a).await.unwrap().unwrap();
    f.agents.update(&oldest).await.unwrap();

    let ids: Vec<i64> = f.agents.get_all().await.unwrap().iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![a, c, b]);
}

#[tokio::test]
async fn test_delete_agent_cascades_to_conversations() {
    let f = create_test_repos();
    let doomed = f.agents.create(Some("doomed".into()), None, None).await.unwrap();
    let kept = f.agents.create(Some("kept".into()), None, None).await.unwrap();

    f.conversations.create(doomed, None).await.unwrap();
    f.conversations.create(doomed, Some("second".into())).await.unwrap();
    let survivor = f.conversations.create(kept, None).await.unwrap();

    assert_eq!(f.agents.delete(doomed).await.unwrap(), 2);

    assert!(f.agents.get_all().await.unwrap().iter().all(|a| a.id != doomed));
    assert!(f.conversations.get_by_agent(doomed).await.unwrap().is_empty());

    let remaining = f.conversations.get_all().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, survivor);
}

#[tokio::test]
async fn test_delete_last_agent_is_allowed() {
    let f = create_test_repos();
    let id = f.agents.create(None, None, None).await.unwrap();
    f.agents.delete(id).await.unwrap();
    assert!(f.agents.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_missing_agent_twice_is_not_found() {
    let f = create_test_repos();
    let id = f.agents.create(None, None, None).await.unwrap();
    f.agents.delete(id).await.unwrap();

    assert!(f.agents.delete(id).await.unwrap_err().is_not_found());
    assert!(f.agents.delete(id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_ids_are_not_reused_after_delete() {
    let f = create_test_repos();
    let first = f.agents.create(None, None, None).await.unwrap();
    f.agents.delete(first).await.unwrap();
    let second = f.agents.create(None, None, None).await.unwrap();
    assert!(second > first);
}

#[tokio::test]
async fn test_create_conversation_snapshots_agent() {
    let f = create_test_repos();
    let agent_id = f.agents.create(None, None, Some("gpt-4".into())).await.unwrap();
    let mut agent = f.agents.get(agent_id).await.unwrap().unwrap();
    agent.sub_agents = vec![SubAgent { name: "search".into(), mode: SubAgentMode::Tool }];
    f.agents.update(&agent).await.unwrap();

    let id = f.conversations.create(agent_id, None).await.unwrap();
    let conversation = f.conversations.get(id).await.unwrap().unwrap();

    assert_eq!(conversation.title, DEFAULT_TITLE);
    assert_eq!(conversation.agent_id, Some(agent_id));
    assert_eq!(conversation.model, "gpt-4");
    assert_eq!(conversation.sub_agents, agent.sub_agents);
    assert!(conversation.messages.is_empty());

    // Later agent edits do not reach the snapshot.
    agent.model = "gpt-4o".into();
    f.agents.update(&agent).await.unwrap();
    let conversation = f.conversations.get(id).await.unwrap().unwrap();
    assert_eq!(conversation.model, "gpt-4");
}

#[tokio::test]
async fn test_create_conversation_for_missing_agent() {
    let f = create_test_repos();
    let err = f.conversations.create(42, None).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(f.conversations.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_get_by_agent_contains_each_conversation() {
    let f = create_test_repos();
    let a = f.agents.create(None, None, None).await.unwrap();
    let b = f.agents.create(None, None, None).await.unwrap();

    let a1 = f.conversations.create(a, None).await.unwrap();
    let b1 = f.conversations.create(b, None).await.unwrap();
    let a2 = f.conversations.create(a, None).await.unwrap();

    let of_a: Vec<i64> = f.conversations.get_by_agent(a).await.unwrap().iter().map(|c| c.id).collect();
    assert_eq!(of_a, vec![a2, a1]);
    let of_b: Vec<i64> = f.conversations.get_by_agent(b).await.unwrap().iter().map(|c| c.id).collect();
    assert_eq!(of_b, vec![b1]);

    f.conversations.append_message(a1, NewMessage::user("bump")).await.unwrap();
    let of_a: Vec<i64> = f.conversations.get_by_agent(a).await.unwrap().iter().map(|c| c.id).collect();
    assert_eq!(of_a, vec![a1, a2]);

    f.conversations.delete(a1).await.unwrap();
    let of_a: Vec<i64> = f.conversations.get_by_agent(a).await.unwrap().iter().map(|c| c.id).collect();
    assert_eq!(of_a, vec![a2]);
}

#[tokio::test]
async fn test_append_messages_in_order() {
    let f = create_test_repos();
    let agent = f.agents.create(None, None, None).await.unwrap();
    let id = f.conversations.create(agent, None).await.unwrap();

    let mut last = f.conversations.get(id).await.unwrap().unwrap().updated_at;
    for i in 0..5 {
        let sender = if i % 2 == 0 { Sender::User } else { Sender::Agent };
        f.conversations
            .append_message(id, NewMessage { content: format!("m{}", i), sender })
            .await
            .unwrap();

        let conversation = f.conversations.get(id).await.unwrap().unwrap();
        assert!(conversation.updated_at > last);
        last = conversation.updated_at;
    }

    let conversation = f.conversations.get(id).await.unwrap().unwrap();
    let contents: Vec<&str> = conversation.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
    assert!(conversation
        .messages
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(conversation.messages.last().unwrap().timestamp, conversation.updated_at);
}

#[tokio::test]
async fn test_title_derived_from_first_user_message_once() {
    let f = create_test_repos();
    let agent = f.agents.create(None, None, None).await.unwrap();
    let id = f.conversations.create(agent, None).await.unwrap();

    f.conversations
        .append_message(id, NewMessage::user("Hello world, this is a long message exceeding thirty characters"))
        .await
        .unwrap();
    let title = f.conversations.get(id).await.unwrap().unwrap().title;
    assert_eq!(title, "Hello world, this is a long me...");

    f.conversations.append_message(id, NewMessage::user("Another question")).await.unwrap();
    assert_eq!(f.conversations.get(id).await.unwrap().unwrap().title, title);
}

#[tokio::test]
async fn test_append_to_oldest_moves_it_to_front() {
    let f = create_test_repos();
    let agent = f.agents.create(None, None, None).await.unwrap();
    let oldest = f.conversations.create(agent, None).await.unwrap();
    let middle = f.conversations.create(agent, None).await.unwrap();
    let newest = f.conversations.create(agent, None).await.unwrap();

    let ids: Vec<i64> = f.conversations.get_all().await.unwrap().iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![newest, middle, oldest]);

    f.conversations.append_message(oldest, NewMessage::user("hi")).await.unwrap();
    let ids: Vec<i64> = f.conversations.get_all().await.unwrap().iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![oldest, newest, middle]);
}

#[tokio::test]
async fn test_append_to_deleted_conversation_is_not_found() {
    let f = create_test_repos();
    let agent = f.agents.create(None, None, None).await.unwrap();
    let id = f.conversations.create(agent, None).await.unwrap();
    f.conversations.delete(id).await.unwrap();

    let err = f.conversations.append_message(id, NewMessage::user("late")).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_update_title_model_and_sub_agents() {
    let f = create_test_repos();
    let agent = f.agents.create(None, None, None).await.unwrap();
    let id = f.conversations.create(agent, None).await.unwrap();
    let before = f.conversations.get(id).await.unwrap().unwrap();

    f.conversations.update_title(id, "Renamed".into()).await.unwrap();
    f.conversations.update_model(id, "gpt-4".into()).await.unwrap();
    let subs = vec![
        SubAgent { name: "planner".into(), mode: SubAgentMode::Handoff },
        SubAgent { name: "search".into(), mode: SubAgentMode::Tool },
    ];
    f.conversations.update_sub_agents(id, subs.clone()).await.unwrap();

    let after = f.conversations.get(id).await.unwrap().unwrap();
    assert_eq!(after.title, "Renamed");
    assert_eq!(after.model, "gpt-4");
    assert_eq!(after.sub_agents, subs);
    assert_eq!(after.agent_id, before.agent_id);
    assert!(after.updated_at > before.updated_at);

    // A renamed conversation keeps its title on the first user message.
    f.conversations.append_message(id, NewMessage::user("question")).await.unwrap();
    assert_eq!(f.conversations.get(id).await.unwrap().unwrap().title, "Renamed");
}

#[tokio::test]
async fn test_updates_on_missing_conversation_are_not_found() {
    let f = create_test_repos();
    assert!(f.conversations.update_title(7, "x".into()).await.unwrap_err().is_not_found());
    assert!(f.conversations.update_model(7, "x".into()).await.unwrap_err().is_not_found());
    assert!(f.conversations.update_sub_agents(7, Vec::new()).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_delete_conversation_twice_is_not_found() {
    let f = create_test_repos();
    let agent = f.agents.create(None, None, None).await.unwrap();
    let id = f.conversations.create(agent, None).await.unwrap();

    f.conversations.delete(id).await.unwrap();
    assert!(f.conversations.delete(id).await.unwrap_err().is_not_found());
    assert!(f.conversations.delete(id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_unawaited_appends_in_one_process_both_land() {
    let f = create_test_repos();
    let agent = f.agents.create(None, None, None).await.unwrap();
    let id = f.conversations.create(agent, None).await.unwrap();

    // Each append reads and writes inside its own transaction, so on a
    // single connection both land.
    let (a, b) = tokio::join!(
        f.conversations.append_message(id, NewMessage::user("a")),
        f.conversations.append_message(id, NewMessage::agent("b")),
    );
    a.unwrap();
    b.unwrap();

    let conversation = f.conversations.get(id).await.unwrap().unwrap();
    assert_eq!(conversation.messages.len(), 2);
}
