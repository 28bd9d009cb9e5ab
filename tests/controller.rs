//! Turn controller integration tests
//!
//! Drives whole listening sessions with scripted collaborators, no audio
//! hardware or model server needed.

use std::time::Duration;

use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mirai_assistant::journal::Journal;
use mirai_assistant::responder::APOLOGY;
use mirai_assistant::synthesis::PlaybackMode;
use mirai_assistant::{OperatingMode, TurnController, TurnState};

mod common;
use common::{
    test_config, HangingTranscriber, Heard, RecordingSynthesizer, ScriptedChatModel,
    ScriptedTranscriber,
};

struct Session {
    model: ScriptedChatModel,
    speaker: RecordingSynthesizer,
    controller: TurnController,
    token: CancellationToken,
}

fn session(script: Vec<Heard>) -> Session {
    session_with(script, RecordingSynthesizer::new(), ScriptedChatModel::new())
}

fn session_with(
    script: Vec<Heard>,
    speaker: RecordingSynthesizer,
    model: ScriptedChatModel,
) -> Session {
    let config = test_config();
    let token = CancellationToken::new();
    let controller = TurnController::new(model.responder(&config), &config)
        .with_transcriber(Box::new(ScriptedTranscriber::new(script, token.clone())))
        .with_synthesizer(Box::new(speaker.clone()));
    Session {
        model,
        speaker,
        controller,
        token,
    }
}

async fn run(session: &mut Session, mode: OperatingMode) {
    tokio::time::timeout(
        Duration::from_secs(5),
        session.controller.run(mode, &session.token),
    )
    .await
    .expect("session did not stop")
    .expect("session failed");
}

fn drain(rx: &mut mpsc::UnboundedReceiver<TurnState>) -> Vec<TurnState> {
    let mut states = Vec::new();
    while let Ok(state) = rx.try_recv() {
        states.push(state);
    }
    states
}

#[tokio::test]
async fn test_command_after_wake_word() {
    let mut s = session(vec![Heard::Text("Mirai, que horas são?")]);
    run(&mut s, OperatingMode::WakeWordListening).await;

    assert_eq!(s.model.commands(), vec!["que horas são"]);
    assert_eq!(s.speaker.spoken(), vec!["resposta 1"]);
    assert_eq!(s.speaker.modes(), vec![PlaybackMode::Blocking]);
    assert_eq!(s.controller.state(), TurnState::Idle);
    assert_eq!(s.controller.mode(), OperatingMode::Idle);
}

#[tokio::test]
async fn test_wake_word_only_uses_default_command() {
    let mut s = session(vec![Heard::Text("Mirai")]);
    run(&mut s, OperatingMode::WakeWordListening).await;

    assert_eq!(s.model.commands(), vec!["olá"]);
    assert_eq!(s.speaker.spoken().len(), 1);
}

#[tokio::test]
async fn test_ignores_speech_without_wake_word() {
    let mut s = session(vec![
        Heard::Text("bom dia"),
        Heard::Text(""),
        Heard::Text("mirai conta uma piada"),
    ]);
    run(&mut s, OperatingMode::WakeWordListening).await;

    assert_eq!(s.model.commands(), vec!["conta uma piada"]);
}

#[tokio::test]
async fn test_timeouts_restart_cycle() {
    let mut s = session(vec![
        Heard::Timeout,
        Heard::Timeout,
        Heard::Text("mirai que horas são"),
    ]);
    run(&mut s, OperatingMode::WakeWordListening).await;

    assert_eq!(s.model.call_count(), 1);
    assert_eq!(s.speaker.spoken().len(), 1);
}

#[tokio::test]
async fn test_transcription_failure_keeps_listening() {
    let mut s = session(vec![
        Heard::Failure,
        Heard::Text("mirai qual é a capital da frança"),
    ]);
    run(&mut s, OperatingMode::WakeWordListening).await;

    assert_eq!(s.model.commands(), vec!["qual é a capital da frança"]);
}

#[tokio::test]
async fn test_synthesis_failure_keeps_conversation() {
    let mut s = session_with(
        vec![Heard::Text("mirai primeira"), Heard::Text("mirai segunda")],
        RecordingSynthesizer::failing(),
        ScriptedChatModel::new(),
    );
    run(&mut s, OperatingMode::WakeWordListening).await;

    assert_eq!(s.model.commands(), vec!["primeira", "segunda"]);
    assert_eq!(s.speaker.spoken(), vec!["resposta 1", "resposta 2"]);
    // Replies still reached the history
    assert_eq!(s.controller.responder().history().len(), 4);
}

#[tokio::test]
async fn test_model_failure_is_spoken_apology() {
    let mut s = session_with(
        vec![Heard::Text("mirai que horas são")],
        RecordingSynthesizer::new(),
        ScriptedChatModel::failing_on(&[1]),
    );
    run(&mut s, OperatingMode::WakeWordListening).await;

    assert_eq!(s.speaker.spoken(), vec![APOLOGY]);
}

#[tokio::test]
async fn test_continuous_mode_skips_gate() {
    let mut s = session(vec![Heard::Text("que horas são"), Heard::Text("  ")]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    s.controller = s.controller.with_state_channel(tx);
    run(&mut s, OperatingMode::ContinuousListening).await;

    assert_eq!(s.model.commands(), vec!["que horas são"]);
    let states = drain(&mut rx);
    assert!(states.contains(&TurnState::AwaitingCommand));
    assert!(!states.contains(&TurnState::AwaitingWakeWord));
}

#[tokio::test]
async fn test_state_transitions() {
    let mut s = session(vec![Heard::Text("mirai que horas são")]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    s.controller = s.controller.with_state_channel(tx);
    run(&mut s, OperatingMode::WakeWordListening).await;

    let mut states = drain(&mut rx);
    states.dedup();
    assert_eq!(
        states,
        vec![
            TurnState::AwaitingWakeWord,
            TurnState::Processing,
            TurnState::Speaking,
            TurnState::AwaitingWakeWord,
            TurnState::Idle,
        ]
    );
}

#[tokio::test]
async fn test_calibrates_on_mode_entry() {
    let config = test_config();
    let token = CancellationToken::new();
    let transcriber = ScriptedTranscriber::new(vec![Heard::Timeout], token.clone());
    let calibrations = transcriber.calibrations();
    let mut controller = TurnController::new(ScriptedChatModel::new().responder(&config), &config)
        .with_transcriber(Box::new(transcriber));

    controller
        .run(OperatingMode::WakeWordListening, &token)
        .await
        .unwrap();

    assert_eq!(*calibrations.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_cancel_abandons_capture() {
    let config = test_config();
    let token = CancellationToken::new();
    let mut controller = TurnController::new(ScriptedChatModel::new().responder(&config), &config)
        .with_transcriber(Box::new(HangingTranscriber));

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    tokio::time::timeout(
        Duration::from_secs(5),
        controller.run(OperatingMode::WakeWordListening, &token),
    )
    .await
    .expect("cancellation was not honoured")
    .unwrap();

    assert_eq!(controller.state(), TurnState::Idle);
}

#[tokio::test]
async fn test_listening_needs_transcriber() {
    let config = test_config();
    let mut controller = TurnController::new(ScriptedChatModel::new().responder(&config), &config);
    assert!(!controller.can_listen());

    let result = controller
        .run(OperatingMode::WakeWordListening, &CancellationToken::new())
        .await;

    assert!(result.is_err());
    assert_eq!(controller.state(), TurnState::Idle);
}

#[tokio::test]
async fn test_text_mode_until_exit_word() {
    let mut s = session(Vec::new());
    let input = BufReader::new(&b"que horas sao\n\n  SAIR \nnunca chega\n"[..]);

    s.controller
        .run_text_only(input, &s.token)
        .await
        .unwrap();

    // Blank line gets the canned reply without a model call
    assert_eq!(s.model.commands(), vec!["que horas sao"]);
    assert!(s.speaker.spoken().is_empty());
    assert_eq!(s.controller.state(), TurnState::Idle);
}

#[tokio::test]
async fn test_text_mode_ends_at_eof() {
    let mut s = session(Vec::new());
    let input = BufReader::new(&b"oi\ntudo bem?"[..]);

    s.controller
        .run_text_only(input, &s.token)
        .await
        .unwrap();

    assert_eq!(s.model.commands(), vec!["oi", "tudo bem?"]);
}

#[tokio::test]
async fn test_apply_config_changes_wake_words() {
    let mut s = session(vec![
        Heard::Text("mirai que horas são"),
        Heard::Text("jarvis que horas são"),
    ]);
    let mut config = test_config();
    config.wake_words = vec!["jarvis".into()];
    config.model = "llama3".into();
    s.controller.apply_config(&config);

    run(&mut s, OperatingMode::WakeWordListening).await;

    assert_eq!(s.model.commands(), vec!["que horas são"]);
    assert_eq!(s.model.calls()[0].model, "llama3");
}

#[tokio::test]
async fn test_journal_records_turns() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = session(vec![Heard::Text("mirai que horas são")]);
    s.controller = s.controller.with_journal(Journal::new(dir.path()));

    run(&mut s, OperatingMode::WakeWordListening).await;

    let records = Journal::new(dir.path()).load_records("today");
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.mode, "wake_word");
    assert_eq!(record.transcript.as_deref(), Some("mirai que horas são"));
    assert_eq!(record.command, "que horas são");
    assert_eq!(record.reply, "resposta 1");
    assert_eq!(record.reply_kind, "answer");
    assert!(record.spoken);
    assert!(record.transcription_latency_ms.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_pause_after_speech_and_backoff_after_failure() {
    let mut config = test_config();
    config.listening.post_speech_pause_ms = 500;
    config.listening.error_backoff_ms = 2000;
    let token = CancellationToken::new();
    let transcriber = ScriptedTranscriber::new(
        vec![
            Heard::Text("mirai que horas são"),
            Heard::Failure,
            Heard::Timeout,
            Heard::Text("mirai obrigado"),
        ],
        token.clone(),
    );
    let captures = transcriber.capture_times();
    let speaker = RecordingSynthesizer::new();
    let mut controller = TurnController::new(ScriptedChatModel::new().responder(&config), &config)
        .with_transcriber(Box::new(transcriber))
        .with_synthesizer(Box::new(speaker.clone()));

    controller
        .run(OperatingMode::WakeWordListening, &token)
        .await
        .unwrap();

    let captures = captures.lock().unwrap().clone();
    let played = speaker.finished_at();
    assert_eq!(captures.len(), 5);
    assert_eq!(played.len(), 2);

    let pause = Duration::from_millis(500);
    let backoff = Duration::from_millis(2000);
    // Reply spoken, then the pause before the mic opens again
    assert!(captures[1] - played[0] >= pause);
    assert!(captures[1] - captures[0] < backoff);
    // Failed cycle waits for the backoff
    assert!(captures[2] - captures[1] >= backoff);
    // A timeout listens again right away
    assert_eq!(captures[3], captures[2]);
    assert!(captures[4] - played[1] >= pause);
}
