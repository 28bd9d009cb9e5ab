//! Language responder integration tests
//!
//! Memory bounds and soft failures against a scripted model.

use mirai_assistant::conversation::Role;
use mirai_assistant::responder::{ReplyKind, APOLOGY, NOT_UNDERSTOOD};

mod common;
use common::{test_config, ScriptedChatModel};

#[tokio::test]
async fn test_answer_is_recorded() {
    let model = ScriptedChatModel::with_replies(&["*sorri* Hai! São **três** horas."]);
    let mut responder = model.responder(&test_config());

    let reply = responder.reply("que horas são").await;

    assert_eq!(reply.kind, ReplyKind::Answer);
    assert_eq!(reply.text, "Hai! São três horas.");
    let turns: Vec<_> = responder.history().turns().collect();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role(), Role::User);
    assert_eq!(turns[0].text(), "que horas são");
    assert_eq!(turns[1].role(), Role::Assistant);
    assert_eq!(turns[1].text(), "Hai! São três horas.");
}

#[tokio::test]
async fn test_blank_input_skips_model() {
    let model = ScriptedChatModel::new();
    let mut responder = model.responder(&test_config());

    assert_eq!(responder.respond("   ").await, NOT_UNDERSTOOD);
    assert_eq!(responder.respond("").await, NOT_UNDERSTOOD);
    assert_eq!(model.call_count(), 0);
    assert!(responder.history().is_empty());
}

#[tokio::test]
async fn test_history_capped_fifo() {
    let mut config = test_config();
    config.memory.history_cap = 16;
    let model = ScriptedChatModel::new();
    let mut responder = model.responder(&config);

    for i in 1..=17 {
        responder.respond(&format!("pergunta {i}")).await;
        assert!(responder.history().len() <= 16);
    }

    assert_eq!(responder.history().len(), 16);
    let texts: Vec<&str> = responder.history().turns().map(|t| t.text()).collect();
    assert!(!texts.contains(&"pergunta 1"));
    assert_eq!(texts.last(), Some(&"resposta 17"));
    assert_eq!(texts[texts.len() - 2], "pergunta 17");
}

#[tokio::test]
async fn test_failure_keeps_user_turn_only() {
    let model = ScriptedChatModel::failing_on(&[5]);
    let mut responder = model.responder(&test_config());

    for i in 1..=4 {
        responder.respond(&format!("pergunta {i}")).await;
    }
    let reply = responder.reply("pergunta 5").await;
    assert_eq!(reply.kind, ReplyKind::Apology);
    assert_eq!(reply.text, APOLOGY);

    let last = responder.history().last().unwrap();
    assert_eq!(last.role(), Role::User);
    assert_eq!(last.text(), "pergunta 5");

    // The next answer follows the unanswered question directly
    responder.respond("pergunta 6").await;
    let turns: Vec<_> = responder.history().turns().collect();
    let fifth = turns.iter().position(|t| t.text() == "pergunta 5").unwrap();
    assert_eq!(turns[fifth + 1].role(), Role::User);
    assert_eq!(turns[fifth + 1].text(), "pergunta 6");
    assert_eq!(responder.history().len(), 11);
}

#[tokio::test]
async fn test_empty_after_cleanup_is_failure() {
    let model = ScriptedChatModel::with_replies(&["*acena* [pausa]"]);
    let mut responder = model.responder(&test_config());

    assert_eq!(responder.respond("oi").await, APOLOGY);
    assert_eq!(responder.history().len(), 1);
}

#[tokio::test]
async fn test_request_uses_context_window() {
    let mut config = test_config();
    config.memory.context_window = 4;
    config.memory.persona = Some("Você é um teste.".into());
    config.temperature = 0.7;
    config.ollama.max_tokens = 120;
    let model = ScriptedChatModel::new();
    let mut responder = model.responder(&config);

    for i in 1..=3 {
        responder.respond(&format!("pergunta {i}")).await;
    }

    let calls = model.calls();
    let last = calls.last().unwrap();
    assert_eq!(last.messages.len(), 5);
    assert_eq!(last.messages[0].role, "system");
    assert_eq!(last.messages[0].content, "Você é um teste.");
    assert_eq!(last.messages[1].content, "resposta 1");
    assert_eq!(last.messages[2].content, "pergunta 2");
    assert_eq!(last.messages[4].content, "pergunta 3");
    assert_eq!(last.model, "mistral");
    assert_eq!(last.temperature, 0.7);
    assert_eq!(last.max_tokens, 120);
}

#[tokio::test]
async fn test_reset_keeps_settings() {
    let model = ScriptedChatModel::new();
    let mut responder = model.responder(&test_config());
    responder.set_model("llama3");
    responder.set_temperature(5.0);

    responder.respond("oi").await;
    responder.reset();

    assert!(responder.history().is_empty());
    assert_eq!(responder.model(), "llama3");
    assert_eq!(responder.temperature(), 2.0);

    responder.respond("de novo").await;
    assert_eq!(model.calls().last().unwrap().messages.len(), 2);
}
