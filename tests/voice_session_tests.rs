// Integration tests for the voice session controller
//
// These tests drive full turns through a scripted backend, an in-process
// transport and a recording sink.

mod common;

use anyhow::Result;
use bytes::Bytes;
use common::*;
use eldermama_voice::audio::SilenceConfig;
use eldermama_voice::error::VoiceError;
use eldermama_voice::session::{
    CommandOutcome, SessionConfig, SessionUpdate, Speaker, VoiceSession, VoiceState,
};
use eldermama_voice::transport::SessionEvent;
use eldermama_voice::FALLBACK_REPLY;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

fn config() -> SessionConfig {
    SessionConfig {
        silence: SilenceConfig::voice_chat(),
        response_timeout: Duration::from_secs(5),
        ..SessionConfig::default()
    }
}

/// One second of speech followed by two seconds of quiet
fn spoken_turn() -> Vec<i16> {
    let mut samples = voiced(1000, 10_000);
    samples.extend(silence(2000));
    samples
}

async fn wait_state(rx: &mut watch::Receiver<VoiceState>, state: VoiceState) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("session never reached {:?}", state))
        .expect("session dropped");
}

async fn next_error(rx: &mut broadcast::Receiver<SessionUpdate>) -> VoiceError {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let SessionUpdate::Error(e) = rx.recv().await.expect("updates closed") {
                return e;
            }
        }
    })
    .await
    .expect("no error update")
}

#[tokio::test]
async fn test_full_turn_plays_reply_and_returns_idle() -> Result<()> {
    let provider = ScriptedProvider::finite(frames_of(&spoken_turn()));
    let (transport, remote) = mock_transport();
    let sink = RecordingSink::default();
    let session = VoiceSession::spawn(
        config(),
        Arc::new(provider.clone()),
        Box::new(transport),
        Box::new(sink.clone()),
    );
    let mut state = session.watch_state();

    assert_eq!(session.start().await?, CommandOutcome::Accepted);

    // Silence ends the utterance and it goes out as one WAV payload
    let sent = remote.wait_for_sent(1).await;
    assert_eq!(&sent[0][..4], b"RIFF");
    wait_state(&mut state, VoiceState::Awaiting).await;

    let reply = voiced(300, 4000);
    remote
        .emit(SessionEvent::Transcription {
            text: "hello".to_string(),
        })
        .await;
    remote
        .emit(SessionEvent::ReplyText {
            text: "hi there".to_string(),
        })
        .await;
    for frame in split_frames(&wav_bytes(&reply), 3) {
        remote.emit(SessionEvent::AudioFrame(frame)).await;
    }
    remote
        .emit(SessionEvent::Complete {
            response_text: None,
        })
        .await;

    wait_state(&mut state, VoiceState::Idle).await;

    let history = session.conversation().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].sender, Speaker::User);
    assert_eq!(history[0].text, "hello");
    assert_eq!(history[1].sender, Speaker::Ai);
    assert_eq!(history[1].text, "hi there");

    let played = sink.played();
    assert_eq!(played.len(), 1, "three frames should play as one clip");
    assert_eq!(played[0].samples, reply);

    let stats = session.get_stats().await;
    assert_eq!(stats.utterances_sent, 1);
    assert_eq!(stats.turns_completed, 1);
    assert_eq!(provider.stops(), 1, "microphone released after the turn");

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_second_start_while_recording_is_ignored() -> Result<()> {
    let provider = ScriptedProvider::holding(Vec::new());
    let (transport, remote) = mock_transport();
    let session = VoiceSession::spawn(
        config(),
        Arc::new(provider.clone()),
        Box::new(transport),
        Box::new(RecordingSink::default()),
    );

    assert_eq!(session.start().await?, CommandOutcome::Accepted);
    assert_eq!(session.start().await?, CommandOutcome::Ignored);
    assert_eq!(session.state(), VoiceState::Recording);
    assert_eq!(provider.created(), 1);
    assert_eq!(remote.connects(), 1);

    // Nothing was captured, so stopping sends nothing
    assert_eq!(session.stop().await?, CommandOutcome::Accepted);
    assert_eq!(session.state(), VoiceState::Idle);
    assert!(remote.sent().is_empty());

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_toggle_starts_and_stops() -> Result<()> {
    let provider = ScriptedProvider::holding(frames_of(&voiced(500, 10_000)));
    let (transport, remote) = mock_transport();
    let session = VoiceSession::spawn(
        config(),
        Arc::new(provider),
        Box::new(transport),
        Box::new(RecordingSink::default()),
    );

    assert_eq!(session.toggle().await?, CommandOutcome::Accepted);
    assert_eq!(session.state(), VoiceState::Recording);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.toggle().await?, CommandOutcome::Accepted);
    assert_eq!(session.state(), VoiceState::Awaiting);
    assert_eq!(remote.sent().len(), 1);

    // Mic button does nothing while waiting for the reply
    assert_eq!(session.toggle().await?, CommandOutcome::Ignored);

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_transport_close_while_awaiting_discards_partial_reply() -> Result<()> {
    let provider = ScriptedProvider::holding(frames_of(&voiced(500, 10_000)));
    let (transport, remote) = mock_transport();
    let sink = RecordingSink::default();
    let session = VoiceSession::spawn(
        config(),
        Arc::new(provider),
        Box::new(transport),
        Box::new(sink.clone()),
    );
    let mut state = session.watch_state();
    let mut updates = session.subscribe();

    session.start().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.stop().await?;
    assert_eq!(session.state(), VoiceState::Awaiting);

    let abandoned = wav_bytes(&voiced(300, 4000));
    for frame in split_frames(&abandoned, 3).into_iter().take(2) {
        remote.emit(SessionEvent::AudioFrame(frame)).await;
    }
    remote.close("server went away").await;

    let error = next_error(&mut updates).await;
    assert_eq!(error.kind(), "connection_error");
    wait_state(&mut state, VoiceState::Idle).await;

    // The next turn reconnects and plays only its own reply
    session.start().await?;
    assert_eq!(remote.connects(), 2);
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.stop().await?;

    let fresh = voiced(100, 4000);
    remote
        .emit(SessionEvent::AudioFrame(Bytes::from(wav_bytes(&fresh))))
        .await;
    remote
        .emit(SessionEvent::Complete {
            response_text: None,
        })
        .await;
    wait_state(&mut state, VoiceState::Idle).await;

    let played = sink.played();
    assert_eq!(played.len(), 1);
    assert_eq!(played[0].samples, fresh);

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_permission_denied_disables_microphone() -> Result<()> {
    let provider =
        ScriptedProvider::failing(VoiceError::PermissionDenied("user declined".to_string()));
    let (transport, remote) = mock_transport();
    let session = VoiceSession::spawn(
        config(),
        Arc::new(provider.clone()),
        Box::new(transport),
        Box::new(RecordingSink::default()),
    );
    let mut updates = session.subscribe();

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, VoiceError::PermissionDenied(_)));
    assert_eq!(next_error(&mut updates).await.kind(), "permission_denied");
    assert_eq!(session.state(), VoiceState::Idle);
    assert_eq!(provider.stops(), 1, "failed start still releases the backend");

    // Further attempts fail fast without touching the device
    let err = session.start().await.unwrap_err();
    assert!(matches!(err, VoiceError::PermissionDenied(_)));
    assert_eq!(provider.created(), 1);
    assert_eq!(remote.connects(), 0);
    assert!(session.get_stats().await.mic_disabled);

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_connect_failure_releases_microphone() -> Result<()> {
    let provider = ScriptedProvider::holding(Vec::new());
    let (transport, remote) = mock_transport();
    remote.fail_connect(VoiceError::Connection("refused".to_string()));
    let session = VoiceSession::spawn(
        config(),
        Arc::new(provider.clone()),
        Box::new(transport),
        Box::new(RecordingSink::default()),
    );

    let err = session.start().await.unwrap_err();
    assert_eq!(err.kind(), "connection_error");
    assert_eq!(session.state(), VoiceState::Idle);
    assert_eq!(provider.stops(), 1);
    assert!(!session.get_stats().await.mic_disabled);

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_response_timeout_adds_fallback_reply() -> Result<()> {
    let provider = ScriptedProvider::holding(frames_of(&voiced(500, 10_000)));
    let (transport, _remote) = mock_transport();
    let session = VoiceSession::spawn(
        SessionConfig {
            response_timeout: Duration::from_millis(200),
            ..config()
        },
        Arc::new(provider),
        Box::new(transport),
        Box::new(RecordingSink::default()),
    );
    let mut updates = session.subscribe();

    session.start().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.stop().await?;

    let error = next_error(&mut updates).await;
    assert_eq!(error, VoiceError::ResponseTimeout(200));
    assert_eq!(session.state(), VoiceState::Idle);

    let history = session.conversation().await;
    let last = history.last().expect("fallback message");
    assert_eq!(last.sender, Speaker::Ai);
    assert_eq!(last.text, FALLBACK_REPLY);

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_server_error_ends_turn() -> Result<()> {
    let provider = ScriptedProvider::holding(frames_of(&voiced(500, 10_000)));
    let (transport, remote) = mock_transport();
    let session = VoiceSession::spawn(
        config(),
        Arc::new(provider),
        Box::new(transport),
        Box::new(RecordingSink::default()),
    );
    let mut updates = session.subscribe();

    session.start().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.stop().await?;

    remote
        .emit(SessionEvent::ServerError {
            message: "Could not transcribe audio".to_string(),
        })
        .await;

    let error = next_error(&mut updates).await;
    assert_eq!(
        error,
        VoiceError::Server("Could not transcribe audio".to_string())
    );
    assert_eq!(session.state(), VoiceState::Idle);

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_continuous_mode_listens_again_after_reply() -> Result<()> {
    let provider = ScriptedProvider::holding(frames_of(&voiced(500, 10_000)));
    let (transport, remote) = mock_transport();
    let session = VoiceSession::spawn(
        SessionConfig {
            continuous: true,
            resume_delay: Duration::from_millis(50),
            ..config()
        },
        Arc::new(provider.clone()),
        Box::new(transport),
        Box::new(RecordingSink::default()),
    );
    let mut state = session.watch_state();

    session.start().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.stop().await?;

    remote
        .emit(SessionEvent::Complete {
            response_text: Some("ok".to_string()),
        })
        .await;
    // Idle is brief here; the resume timer brings the mic straight back
    wait_state(&mut state, VoiceState::Recording).await;
    assert_eq!(provider.created(), 2);
    assert_eq!(session.get_stats().await.turns_completed, 1);

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_transcription_tags_are_published() -> Result<()> {
    let provider = ScriptedProvider::holding(frames_of(&voiced(500, 10_000)));
    let (transport, remote) = mock_transport();
    let session = VoiceSession::spawn(
        config(),
        Arc::new(provider),
        Box::new(transport),
        Box::new(RecordingSink::default()),
    );
    let mut updates = session.subscribe();

    session.start().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.stop().await?;
    remote
        .emit(SessionEvent::Transcription {
            text: "I love my garden".to_string(),
        })
        .await;

    let tags = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(SessionUpdate::Tags(tags)) = updates.recv().await {
                return tags;
            }
        }
    })
    .await?;
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].label, "Gardening");

    session.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_commands_after_shutdown_report_closed_session() -> Result<()> {
    let (transport, _remote) = mock_transport();
    let session = VoiceSession::spawn(
        config(),
        Arc::new(ScriptedProvider::holding(Vec::new())),
        Box::new(transport),
        Box::new(RecordingSink::default()),
    );

    session.shutdown().await;
    assert_eq!(session.start().await, Err(VoiceError::SessionClosed));
    Ok(())
}
