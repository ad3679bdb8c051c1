//! Completion client integration tests
//!
//! Runs against a local OpenAI-compatible endpoint.

use stagebot::{CompletionClient, Error, Settings};

mod common;
use common::{MockApi, MockReply};

fn settings_for(api: &MockApi) -> Settings {
    Settings {
        api_url: api.url.clone(),
        api_key: "sk-test".to_string(),
        ..Settings::default()
    }
}

#[tokio::test]
async fn test_streamed_chunks_concatenate_to_reply() {
    let api = MockApi::start(MockReply::Stream(vec![
        "Добрый ".to_string(),
        "день".to_string(),
        ". Чем помочь?".to_string(),
    ]))
    .await;
    let client = CompletionClient::new(&settings_for(&api));
    assert!(client.supports_streaming());

    let mut chunks = Vec::new();
    let reply = client
        .send_streaming_request("привет", "be brief", |chunk, so_far| {
            chunks.push(chunk.to_string());
            assert!(so_far.ends_with(chunk));
        })
        .await
        .unwrap();

    assert_eq!(chunks, vec!["Добрый ", "день", ". Чем помочь?"]);
    assert_eq!(reply, chunks.concat());

    let body = &api.requests()[0];
    assert_eq!(body["stream"], true);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][0]["content"], "be brief");
    assert_eq!(body["messages"][1]["role"], "user");
    assert_eq!(body["messages"][1]["content"], "привет");
}

#[tokio::test]
async fn test_streamed_and_whole_replies_agree() {
    let chunks = vec!["Добрый ".to_string(), "день".to_string(), ". Чем помочь?".to_string()];
    let streaming_api = MockApi::start(MockReply::Stream(chunks.clone())).await;
    let whole_api = MockApi::start(MockReply::Json(chunks.concat())).await;

    let streamed = tokio_test::assert_ok!(
        CompletionClient::new(&settings_for(&streaming_api))
            .send_streaming_request("привет", "be brief", |_, _| {})
            .await
    );
    let whole = tokio_test::assert_ok!(
        CompletionClient::new(&settings_for(&whole_api))
            .send_request("привет", "be brief")
            .await
    );

    assert_eq!(streamed, whole);
}

#[tokio::test]
async fn test_whole_reply_and_request_shape() {
    let api = MockApi::start(MockReply::Json("Hello there.".to_string())).await;
    let settings = Settings {
        model: String::new(),
        max_tokens: Some(64),
        temperature: 0.2,
        ..settings_for(&api)
    };
    let client = CompletionClient::new(&settings);

    let reply = tokio_test::assert_ok!(client.send_request("hi", "instruction").await);
    assert_eq!(reply, "Hello there.");

    let body = &api.requests()[0];
    assert_eq!(body["stream"], false);
    assert_eq!(body["model"], "gpt-3.5-turbo");
    assert_eq!(body["max_tokens"], 64);
    assert!((body["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
}

#[tokio::test]
async fn test_max_tokens_omitted_when_unset() {
    let api = MockApi::start(MockReply::Json("ok".to_string())).await;
    let client = CompletionClient::new(&settings_for(&api));

    client.send_request("hi", "instruction").await.unwrap();
    assert!(api.requests()[0].get("max_tokens").is_none());
}

#[tokio::test]
async fn test_malformed_frame_ends_stream_early() {
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"First.\"}}]}\n\n",
        "data: {not json\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Never.\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    let api = MockApi::start(MockReply::Raw(body.to_string())).await;
    let client = CompletionClient::new(&settings_for(&api));

    let mut chunks = Vec::new();
    let reply = client
        .send_streaming_request("hi", "instruction", |chunk, _| chunks.push(chunk.to_string()))
        .await
        .unwrap();

    assert_eq!(reply, "First.");
    assert_eq!(chunks, vec!["First."]);
}

#[tokio::test]
async fn test_error_status_embeds_code_and_body() {
    let api = MockApi::start(MockReply::Status(401, "invalid api key".to_string())).await;
    let client = CompletionClient::new(&settings_for(&api));

    let err = client.send_request("hi", "instruction").await.unwrap_err();
    assert!(err.is_network());
    match &err {
        Error::Network { status, body } => {
            assert_eq!(*status, 401);
            assert!(body.contains("invalid api key"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("401"));

    let streamed = client
        .send_streaming_request("hi", "instruction", |_, _| {})
        .await
        .unwrap_err();
    assert!(matches!(streamed, Error::Network { status: 401, .. }));
}

#[tokio::test]
async fn test_missing_key_fails_before_sending() {
    let api = MockApi::start(MockReply::Json("unused".to_string())).await;
    let settings = Settings {
        api_key: String::new(),
        ..settings_for(&api)
    };
    let client = CompletionClient::new(&settings);
    assert!(!client.supports_streaming());

    let err = tokio_test::assert_err!(client.send_request("hi", "instruction").await);
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(api.request_count(), 0);
}

#[tokio::test]
async fn test_empty_choices_yield_empty_reply() {
    let api = MockApi::start(MockReply::Raw("{\"choices\": []}".to_string())).await;
    let client = CompletionClient::new(&settings_for(&api));

    let reply = client.send_request("hi", "instruction").await.unwrap();
    assert!(reply.is_empty());
}
