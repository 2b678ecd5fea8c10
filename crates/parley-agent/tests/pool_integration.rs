mod support;

use parley_agent::{
    AgentError, LifecycleEvent, MessageCallbacks, SendOutcome, SessionConfig, SessionState,
};
use parley_sdk::testing::{ScriptStep, ScriptedAgentService};
use parley_sdk::{PermissionMode, ServiceEvent};
use std::sync::Arc;
use support::{Recorder, emit, pool_fixture, pool_fixture_with, recording_callbacks};

#[tokio::test(flavor = "current_thread")]
async fn events_are_tagged_per_conversation() {
    let fixture = pool_fixture(vec![
        vec![
            emit(ServiceEvent::system_init("sess-a")),
            emit(ServiceEvent::result()),
        ],
        vec![
            emit(ServiceEvent::system_init("sess-b")),
            emit(ServiceEvent::result()),
        ],
    ]);
    fixture.add_conversation("a", PermissionMode::Ask);
    fixture.add_conversation("b", PermissionMode::Ask);

    for conversation in ["a", "b"] {
        let outcome = fixture
            .pool
            .send(conversation, "hi", Vec::new(), MessageCallbacks::new())
            .await;
        assert_eq!(outcome, Ok(SendOutcome::Completed));
    }
    for conversation in ["a", "b"] {
        let session = fixture.pool.session(conversation).expect("session");
        session.wait_until_idle().await;
    }

    let sessions_a = fixture.pool.session("a").expect("session a");
    let sessions_b = fixture.pool.session("b").expect("session b");
    assert_eq!(sessions_a.external_session_id().as_deref(), Some("sess-a"));
    assert_eq!(sessions_b.external_session_id().as_deref(), Some("sess-b"));
    assert_eq!(
        fixture.emitter.events_for("b"),
        vec![
            LifecycleEvent::ProcessingStarted,
            LifecycleEvent::SessionIdChanged {
                session_id: "sess-b".to_string()
            },
            LifecycleEvent::ProcessingComplete {
                interrupted: false,
                remaining_messages: 0
            },
        ]
    );
    assert_eq!(
        fixture.pool.conversation_ids(),
        vec!["a".to_string(), "b".to_string()]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn send_to_unknown_conversation_fails() {
    let fixture = pool_fixture(Vec::new());
    let outcome = fixture
        .pool
        .send("ghost", "hi", Vec::new(), MessageCallbacks::new())
        .await;
    assert_eq!(
        outcome,
        Err(AgentError::UnknownConversation("ghost".to_string()))
    );
}

#[tokio::test(flavor = "current_thread")]
async fn delete_interrupts_and_evicts_the_session() {
    let fixture = pool_fixture(vec![vec![
        emit(ServiceEvent::system_init("sess-1")),
        ScriptStep::Hang,
    ]]);
    fixture.add_conversation("c1", PermissionMode::Ask);
    let recorder = Recorder::default();

    let ticket = fixture
        .pool
        .enqueue("c1", "long task", Vec::new(), recording_callbacks(&recorder, "A"))
        .await
        .expect("enqueue should succeed");
    let session = fixture.pool.session("c1").expect("session");
    while session.external_session_id().is_none() {
        tokio::task::yield_now().await;
    }

    assert!(fixture.pool.delete("c1").await);
    assert_eq!(ticket.wait().await, Ok(SendOutcome::Interrupted));
    assert_eq!(session.state(), SessionState::Interrupted);
    assert!(fixture.pool.session("c1").is_none());
    assert_eq!(recorder.entries(), vec!["A:interrupted"]);

    let fresh = fixture.pool.get_or_create("c1").await.expect("session");
    assert!(!Arc::ptr_eq(&fresh, &session));
}

#[tokio::test(flavor = "current_thread")]
async fn config_reload_reaches_live_and_new_sessions() {
    let fixture = pool_fixture(vec![
        vec![emit(ServiceEvent::result())],
        vec![emit(ServiceEvent::result())],
        vec![emit(ServiceEvent::result())],
    ]);
    fixture.add_conversation("live", PermissionMode::Ask);
    fixture.add_conversation("later", PermissionMode::Ask);

    fixture
        .pool
        .send("live", "one", Vec::new(), MessageCallbacks::new())
        .await
        .expect("send should succeed");

    assert!(matches!(
        fixture
            .pool
            .broadcast_config_reload(SessionConfig::default().with_model("")),
        Err(AgentError::InvalidConfiguration(_))
    ));
    fixture
        .pool
        .broadcast_config_reload(SessionConfig::default().with_model("next-model"))
        .expect("reload should succeed");

    fixture
        .pool
        .send("live", "two", Vec::new(), MessageCallbacks::new())
        .await
        .expect("send should succeed");
    fixture
        .pool
        .send("later", "three", Vec::new(), MessageCallbacks::new())
        .await
        .expect("send should succeed");

    let models: Vec<_> = fixture
        .service
        .recorded()
        .into_iter()
        .map(|exchange| exchange.model)
        .collect();
    assert_eq!(
        models,
        vec![
            SessionConfig::default().model,
            "next-model".to_string(),
            "next-model".to_string()
        ]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn set_permission_mode_creates_session_and_is_used_by_next_exchange() {
    let fixture = pool_fixture(vec![vec![emit(ServiceEvent::result())]]);
    fixture.add_conversation("c1", PermissionMode::Ask);

    fixture
        .pool
        .set_permission_mode("c1", PermissionMode::AcceptEdits)
        .await
        .expect("mode change should succeed");
    assert_eq!(
        fixture.emitter.events_for("c1"),
        vec![LifecycleEvent::ModeChanged {
            mode: PermissionMode::AcceptEdits
        }]
    );

    fixture
        .pool
        .send("c1", "edit", Vec::new(), MessageCallbacks::new())
        .await
        .expect("send should succeed");
    assert_eq!(
        fixture.service.recorded()[0].permission_mode,
        PermissionMode::AcceptEdits
    );
}

#[tokio::test(flavor = "current_thread")]
async fn interrupted_queue_resumes_in_original_order() {
    let service = ScriptedAgentService::with_exchanges(vec![vec![
        emit(ServiceEvent::system_init("sess-1")),
        ScriptStep::Hang,
    ]]);
    let fixture = pool_fixture_with(service, SessionConfig::default());
    fixture.add_conversation("c1", PermissionMode::Ask);
    let recorder = Recorder::default();

    fixture
        .pool
        .enqueue("c1", "A", Vec::new(), recording_callbacks(&recorder, "A"))
        .await
        .expect("enqueue should succeed");
    let session = fixture.pool.session("c1").expect("session");
    while session.external_session_id().is_none() {
        tokio::task::yield_now().await;
    }
    for label in ["B", "C"] {
        fixture
            .pool
            .enqueue("c1", label, Vec::new(), recording_callbacks(&recorder, label))
            .await
            .expect("enqueue should succeed");
    }

    fixture.pool.interrupt("c1").await;
    assert_eq!(session.queue_len(), 2);

    fixture.service.push_exchange(vec![
        emit(ServiceEvent::result()),
        emit(ServiceEvent::result()),
    ]);
    assert!(fixture.pool.resume_processing("c1"));
    assert_eq!(session.wait_until_idle().await, SessionState::Idle);

    assert_eq!(
        recorder.entries(),
        vec![
            "A:interrupted",
            "B:interrupted",
            "C:interrupted",
            "B:result",
            "C:result"
        ]
    );
    let resumed = &fixture.service.recorded()[1];
    assert_eq!(resumed.resume.as_deref(), Some("sess-1"));
    assert_eq!(resumed.turns.len(), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn shutdown_interrupts_every_session() {
    let fixture = pool_fixture(vec![
        vec![emit(ServiceEvent::system_init("s1")), ScriptStep::Hang],
        vec![emit(ServiceEvent::system_init("s2")), ScriptStep::Hang],
    ]);
    fixture.add_conversation("a", PermissionMode::Ask);
    fixture.add_conversation("b", PermissionMode::Ask);

    let mut tickets = Vec::new();
    for conversation in ["a", "b"] {
        tickets.push(
            fixture
                .pool
                .enqueue(conversation, "work", Vec::new(), MessageCallbacks::new())
                .await
                .expect("enqueue should succeed"),
        );
        let session = fixture.pool.session(conversation).expect("session");
        while session.external_session_id().is_none() {
            tokio::task::yield_now().await;
        }
    }

    fixture.pool.shutdown().await;
    for ticket in tickets {
        assert_eq!(ticket.wait().await, Ok(SendOutcome::Interrupted));
    }
    assert!(fixture.pool.conversation_ids().is_empty());
}
