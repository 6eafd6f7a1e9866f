//! End-to-end tests for the assistant panel.
//!
//! Each test wires a real session, context aggregator and rate limiter to a
//! scripted generation provider and an in-memory report source.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast::error::TryRecvError;

use urbaneye_assistant::{
    AssistantError, AssistantPanel, ConversationSession, ExchangeState, GenerationError,
    MessageState, Outcome, Role, ScriptedProvider, SessionConfig, SessionSnapshot,
    StaticReportSource, VoiceBridge,
};
use urbaneye_core::config::{AssistantConfig, VoiceConfig};
use urbaneye_core::{Report, UserIdentity};

// =============================================================================
// Helpers
// =============================================================================

fn citizen() -> UserIdentity {
    UserIdentity::new("Meera Iyer", "meera@example.com", "civilian")
}

fn report(category: &str, status: &str, days_ago: i64) -> Report {
    Report {
        id: None,
        category: category.to_string(),
        description: Some(format!("{} needs attention on 5th Cross", category)),
        severity: "medium".to_string(),
        status: status.to_string(),
        department: "Ward 12".to_string(),
        created_at: Utc::now().timestamp() - days_ago * 86_400,
    }
}

/// Ten reports: four resolved, three open, three in progress.
fn ten_reports() -> Vec<Report> {
    let mut reports = Vec::new();
    for i in 0..4 {
        reports.push(report("pothole", "resolved", i));
    }
    for i in 0..3 {
        reports.push(report("garbage", "open", 10 + i));
    }
    for i in 0..3 {
        reports.push(report("streetlight", "in_progress", 40 + i));
    }
    reports
}

async fn panel_with(
    provider: Arc<ScriptedProvider>,
    reports: StaticReportSource,
    config: SessionConfig,
) -> AssistantPanel {
    let session =
        ConversationSession::start(provider, Arc::new(reports), config, Some(citizen())).await;
    AssistantPanel::new(session, VoiceBridge::unsupported(VoiceConfig::default()))
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<SessionSnapshot>) -> Vec<SessionSnapshot> {
    let mut snapshots = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return snapshots,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
}

// =============================================================================
// Conversation
// =============================================================================

#[tokio::test]
async fn test_full_exchange_with_live_context() {
    let provider = Arc::new(ScriptedProvider::new([
        "You have ",
        "3 pending ",
        "reports.",
    ]));
    let panel = panel_with(
        provider.clone(),
        StaticReportSource::new(ten_reports()),
        SessionConfig::default(),
    )
    .await;
    let mut rx = panel.subscribe();

    let id = panel.send("How many of my reports are pending?").await.unwrap();

    let snapshot = panel.snapshot();
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[1].id, id);
    assert_eq!(snapshot.messages[1].text, "You have 3 pending reports.");
    assert_eq!(snapshot.messages[1].state, MessageState::Complete);
    assert!(snapshot.error.is_none());

    // The request saw the live analytics.
    let request = provider.last_request().unwrap();
    assert!(request.system_instruction.contains("Meera Iyer"));
    assert!(request.system_instruction.contains("Total reports: 10"));
    assert!(request.system_instruction.contains("Resolved: 4"));
    assert!(request.system_instruction.contains("Pending: 3"));
    assert!(request.system_instruction.contains("In progress: 3"));
    assert_eq!(request.history.len(), 1);
    assert_eq!(request.history[0].role, Role::User);

    // Observers saw the reply grow chunk by chunk before it completed.
    let snapshots = drain(&mut rx);
    let streaming_texts: Vec<String> = snapshots
        .iter()
        .filter_map(|s| s.messages.iter().find(|m| m.id == id))
        .filter(|m| m.state == MessageState::Streaming && !m.text.is_empty())
        .map(|m| m.text.clone())
        .collect();
    assert_eq!(
        streaming_texts,
        vec!["You have ", "You have 3 pending ", "You have 3 pending reports."]
    );
    let last = snapshots.last().unwrap();
    assert_eq!(last.exchange, ExchangeState::Settled(Outcome::Success));
    assert!(!last.is_streaming);
}

#[tokio::test]
async fn test_report_fetch_failure_still_answers() {
    let provider = Arc::new(ScriptedProvider::new(["Please check your Dashboard."]));
    let panel = panel_with(
        provider.clone(),
        StaticReportSource::failing(),
        SessionConfig::default(),
    )
    .await;

    panel.send("status?").await.unwrap();
    let request = provider.last_request().unwrap();
    assert!(request.system_instruction.contains("Meera Iyer"));
    assert!(request.system_instruction.contains("unavailable"));
    assert!(!request.system_instruction.contains("Total reports"));
}

#[tokio::test]
async fn test_new_user_without_reports() {
    let provider = Arc::new(ScriptedProvider::new(["Welcome!"]));
    let panel = panel_with(
        provider.clone(),
        StaticReportSource::new(Vec::new()),
        SessionConfig::default(),
    )
    .await;

    panel.send("hello").await.unwrap();
    let request = provider.last_request().unwrap();
    assert!(request.system_instruction.contains("no reports yet"));
}

#[tokio::test]
async fn test_rate_limit_blocks_twenty_first_message() {
    let provider = Arc::new(ScriptedProvider::new(["ok"]));
    let panel = panel_with(
        provider.clone(),
        StaticReportSource::new(Vec::new()),
        SessionConfig::from(&AssistantConfig::default()),
    )
    .await;

    for i in 0..20 {
        panel.send(&format!("question {}", i)).await.unwrap();
    }
    assert_eq!(panel.session().remaining(), 0);

    let err = panel.send("one more").await.unwrap_err();
    assert!(matches!(err, AssistantError::RateLimitExceeded { .. }));

    let snapshot = panel.snapshot();
    assert_eq!(snapshot.messages.len(), 40);
    assert!(snapshot.error.unwrap().starts_with("rate limit exceeded"));
    assert_eq!(provider.requests().len(), 20);
}

#[tokio::test]
async fn test_failure_then_recovery() {
    let config = SessionConfig {
        stream_timeout: Duration::from_millis(50),
        ..SessionConfig::default()
    };
    let session = ConversationSession::new(
        Arc::new(ScriptedProvider::failing(GenerationError::Network(
            "dns lookup failed".to_string(),
        ))),
        Arc::new(StaticReportSource::new(Vec::new())),
        config,
    );
    let err = session.send("hello").await.unwrap_err();
    assert!(matches!(err, AssistantError::TransportFailure(_)));

    let snapshot = session.snapshot();
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].role, Role::User);
    assert_eq!(snapshot.exchange, ExchangeState::Settled(Outcome::Failed));
    assert!(snapshot.error.unwrap().contains("dns lookup failed"));
}

#[tokio::test]
async fn test_logout_switches_to_signed_out_context() {
    let provider = Arc::new(ScriptedProvider::echo());
    let panel = panel_with(
        provider.clone(),
        StaticReportSource::new(ten_reports()),
        SessionConfig::default(),
    )
    .await;

    panel.set_identity(None).await;
    panel.send("what can you do?").await.unwrap();

    let request = provider.last_request().unwrap();
    assert!(request.system_instruction.contains("not signed in"));
    assert!(!request.system_instruction.contains("Meera Iyer"));
    assert_eq!(
        panel.snapshot().messages[1].text,
        "You said: what can you do?"
    );
}

#[tokio::test]
async fn test_login_then_quick_action_uses_live_context() {
    let provider = Arc::new(ScriptedProvider::new(["Tap Report Issue on the home screen."]));
    let session = ConversationSession::start(
        provider.clone(),
        Arc::new(StaticReportSource::new(ten_reports())),
        SessionConfig::default(),
        None,
    )
    .await;
    let panel = AssistantPanel::new(session, VoiceBridge::unsupported(VoiceConfig::default()));
    assert!(panel.session().context_block().contains("not signed in"));

    panel
        .set_credentials(Some(citizen()), Some("meera-token".to_string()))
        .await;
    assert_eq!(panel.quick_actions().len(), 4);
    panel.send_quick_action(0).await.unwrap();

    let request = provider.last_request().unwrap();
    assert!(request.system_instruction.contains("Meera Iyer"));
    assert!(request.system_instruction.contains("Total reports: 10"));
    assert_eq!(request.history[0].text, "How do I report an issue?");
    assert!(panel.quick_actions().is_empty());
}

#[tokio::test]
async fn test_reset_clears_history_between_conversations() {
    let provider = Arc::new(ScriptedProvider::new(["ok"]));
    let panel = panel_with(
        provider.clone(),
        StaticReportSource::new(Vec::new()),
        SessionConfig::default(),
    )
    .await;

    panel.send("first conversation").await.unwrap();
    panel.reset().unwrap();
    panel.send("second conversation").await.unwrap();

    let request = provider.last_request().unwrap();
    assert_eq!(request.history.len(), 1);
    assert_eq!(request.history[0].text, "second conversation");
    assert_eq!(panel.session().remaining(), 18);
}

// =============================================================================
// Voice
// =============================================================================

#[tokio::test]
async fn test_voice_unavailable_in_terminal() {
    let panel = panel_with(
        Arc::new(ScriptedProvider::new(["ok"])),
        StaticReportSource::new(Vec::new()),
        SessionConfig::default(),
    )
    .await;

    assert!(matches!(
        panel.toggle_voice_input(),
        Err(AssistantError::RecognitionUnavailable)
    ));
    let reply = panel.send("hi").await.unwrap();
    assert!(matches!(
        panel.speak(reply).await,
        Err(AssistantError::SynthesisUnavailable)
    ));
    assert_eq!(panel.speaking(), None);
}
