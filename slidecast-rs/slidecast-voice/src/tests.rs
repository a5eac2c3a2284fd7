use super::*;
use mockito::{Matcher, Server, ServerGuard};

fn options_for(server: &ServerGuard, max_polls: u32) -> VoiceClientOptions {
    VoiceClientOptions {
        base_url: server.url(),
        cdn_url: format!("{}/cdn", server.url()),
        api_token: Some("voice-token".to_string()),
        poll_interval: Duration::from_millis(1),
        max_polls,
        request_timeout: Duration::from_secs(5),
    }
}

fn voices() -> Vec<Voice> {
    vec![
        Voice {
            model_token: "TM:cpwrmn5kwh97".to_string(),
            title: "Morgan Freeman".to_string(),
        },
        Voice {
            model_token: "TM:narrator01".to_string(),
            title: "Calm Narrator".to_string(),
        },
    ]
}

#[test]
fn find_voice_matches_titles_case_insensitively() {
    let voices = voices();
    let voice = find_voice(&voices, "  morgan freeman ").expect("voice found");
    assert_eq!(voice.model_token, "TM:cpwrmn5kwh97");
    assert!(find_voice(&voices, "Nobody").is_none());
}

#[test]
fn job_status_parses_service_values() {
    let status: JobStatus = serde_json::from_str("\"complete_success\"").expect("parse");
    assert_eq!(status, JobStatus::CompleteSuccess);
    let status: JobStatus = serde_json::from_str("\"attempt_failed\"").expect("parse");
    assert_eq!(status, JobStatus::AttemptFailed);
    let status: JobStatus = serde_json::from_str("\"something_new\"").expect("parse");
    assert_eq!(status, JobStatus::Unknown);
}

#[tokio::test]
async fn model_tokens_resolve_without_a_remote_call() {
    let server = Server::new_async().await;
    let client = VoiceClient::new(options_for(&server, 1)).expect("client");
    let token = client.resolve_speaker(" TM:abc ").await.expect("token");
    assert_eq!(token, "TM:abc");
}

#[tokio::test]
async fn speaker_titles_resolve_through_voice_list() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/tts/list")
        .with_status(200)
        .with_body(
            r#"{"success": true, "models": [
                {"model_token": "TM:cpwrmn5kwh97", "title": "Morgan Freeman", "creator_username": "x"},
                {"model_token": "TM:narrator01", "title": "Calm Narrator"}
            ]}"#,
        )
        .expect(2)
        .create_async()
        .await;

    let client = VoiceClient::new(options_for(&server, 1)).expect("client");
    let token = client.resolve_speaker("calm narrator").await.expect("resolved");
    assert_eq!(token, "TM:narrator01");

    let error = client.resolve_speaker("Nobody").await.expect_err("unknown");
    assert!(matches!(error, VoiceError::UnknownSpeaker(name) if name == "Nobody"));
    mock.assert_async().await;
}

#[tokio::test]
async fn synthesize_submits_polls_and_downloads() {
    let mut server = Server::new_async().await;
    let submit = server
        .mock("POST", "/tts/inference")
        .match_header("authorization", "voice-token")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "tts_model_token": "TM:narrator01",
            "inference_text": "Rome was not built in a day.",
        })))
        .with_status(200)
        .with_body(r#"{"success": true, "inference_job_token": "JTINF:job1"}"#)
        .create_async()
        .await;
    let poll = server
        .mock("GET", "/tts/job/JTINF:job1")
        .with_status(200)
        .with_body(
            r#"{"success": true, "state": {
                "job_token": "JTINF:job1",
                "status": "complete_success",
                "maybe_public_bucket_wav_audio_path": "/tts_inference_output/job1.wav"
            }}"#,
        )
        .create_async()
        .await;
    let download = server
        .mock("GET", "/cdn/tts_inference_output/job1.wav")
        .with_status(200)
        .with_body(b"RIFFfakewave".to_vec())
        .create_async()
        .await;

    let client = VoiceClient::new(options_for(&server, 3)).expect("client");
    let audio = client
        .synthesize("Rome was not built in a day.", "TM:narrator01")
        .await
        .expect("audio");

    assert_eq!(audio, b"RIFFfakewave");
    submit.assert_async().await;
    poll.assert_async().await;
    download.assert_async().await;
}

#[tokio::test]
async fn rate_limited_submission_is_retryable() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/tts/inference")
        .with_status(429)
        .with_body("Too many requests")
        .create_async()
        .await;

    let client = VoiceClient::new(options_for(&server, 3)).expect("client");
    let error = client
        .synthesize("Hello", "TM:narrator01")
        .await
        .expect_err("rate limited");
    assert!(error.is_retryable());
}

#[tokio::test]
async fn rejected_speaker_is_fatal() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/tts/inference")
        .with_status(400)
        .with_body(r#"{"success": false, "error_reason": "invalid model token"}"#)
        .create_async()
        .await;

    let client = VoiceClient::new(options_for(&server, 3)).expect("client");
    let error = client
        .synthesize("Hello", "TM:doesnotexist")
        .await
        .expect_err("bad speaker");
    assert!(!error.is_retryable());
}

#[tokio::test]
async fn dead_job_is_fatal() {
    let mut server = Server::new_async().await;
    let _submit = server
        .mock("POST", "/tts/inference")
        .with_status(200)
        .with_body(r#"{"success": true, "inference_job_token": "JTINF:job2"}"#)
        .create_async()
        .await;
    let _poll = server
        .mock("GET", "/tts/job/JTINF:job2")
        .with_status(200)
        .with_body(r#"{"state": {"status": "dead", "maybe_public_bucket_wav_audio_path": null}}"#)
        .create_async()
        .await;

    let client = VoiceClient::new(options_for(&server, 3)).expect("client");
    let error = client
        .synthesize("Hello", "TM:narrator01")
        .await
        .expect_err("dead job");
    assert!(!error.is_retryable());
    assert!(error.to_string().contains("Dead"));
}

#[tokio::test]
async fn unfinished_job_is_retryable_after_poll_budget() {
    let mut server = Server::new_async().await;
    let _submit = server
        .mock("POST", "/tts/inference")
        .with_status(200)
        .with_body(r#"{"success": true, "inference_job_token": "JTINF:job3"}"#)
        .create_async()
        .await;
    let poll = server
        .mock("GET", "/tts/job/JTINF:job3")
        .with_status(200)
        .with_body(r#"{"state": {"status": "pending"}}"#)
        .expect(2)
        .create_async()
        .await;

    let client = VoiceClient::new(options_for(&server, 2)).expect("client");
    let error = client
        .synthesize("Hello", "TM:narrator01")
        .await
        .expect_err("still pending");
    assert!(error.is_retryable());
    poll.assert_async().await;
}

#[tokio::test]
async fn blank_text_is_rejected_before_submission() {
    let server = Server::new_async().await;
    let client = VoiceClient::new(options_for(&server, 1)).expect("client");
    let error = client
        .synthesize("   ", "TM:narrator01")
        .await
        .expect_err("blank text");
    assert!(!error.is_retryable());
}
