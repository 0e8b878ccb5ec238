//! End-to-end streaming over HTTP.

use std::time::{Instant, SystemTime};

use fieldhand_types::VisualizationKind;
use serde_json::{Value, json};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{
    PROPERTY_ID, STREAM_PATH, conversation, mount_stream, run_until_idle, sse_body,
};

fn envelope(kind: &str, data: Value) -> Value {
    json!({"type": kind, "data": data, "timestamp": "2024-05-01T10:00:00Z"})
}

#[tokio::test]
async fn streamed_answer_is_finalized_and_spoken() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        sse_body(&[
            envelope("init", json!({"message": "Starting"})),
            envelope("query-generation", json!({"step": 1, "total": 3, "message": "Writing query"})),
            envelope(
                "metadata",
                json!({
                    "interpretation": "The north field had the highest yield",
                    "visualization": {
                        "type": "bar",
                        "config": {"labels": ["north", "south"], "datasets": [{"data": [9, 4]}]}
                    }
                }),
            ),
            envelope("result", json!({"result": [{"field": "north"}, {"field": "south"}]})),
            envelope("complete", json!({})),
        ]),
    )
    .await;

    let (mut conversation, speaker) = conversation(&server);
    let id = conversation
        .submit("Which field yielded most?", SystemTime::now())
        .unwrap();
    run_until_idle(&mut conversation).await;

    let message = conversation.message(id).unwrap();
    assert!(message.is_complete());
    assert!(message.error().is_none());
    assert_eq!(message.content(), "The north field had the highest yield");
    assert_eq!(message.visualizations()[0].kind, VisualizationKind::Bar);
    assert_eq!(message.data().unwrap().len(), 2);
    assert_eq!(message.streaming_status().unwrap().events.len(), 5);
    assert_eq!(speaker.spoken(), vec!["The north field had the highest yield"]);
}

#[tokio::test]
async fn request_carries_prompt_and_property() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .and(body_json(json!({"prompt": "Soil moisture?", "propertyId": PROPERTY_ID})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(sse_body(&[envelope("complete", json!({"interpretation": "Moist"}))])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (mut conversation, _speaker) = conversation(&server);
    let id = conversation.submit("Soil moisture?", SystemTime::now()).unwrap();
    run_until_idle(&mut conversation).await;

    assert_eq!(conversation.message(id).unwrap().content(), "Moist");
}

#[tokio::test]
async fn chunked_results_are_reassembled() {
    let rows = |from: usize, to: usize| -> Value {
        (from..to).map(|i| json!({"row": i})).collect::<Vec<_>>().into()
    };
    let server = MockServer::start().await;
    mount_stream(
        &server,
        sse_body(&[
            envelope("metadata", json!({"interpretation": "250 sensor readings"})),
            envelope("results_meta", json!({"totalItems": 250, "totalChunks": 3, "chunkSize": 100})),
            envelope("results_chunk", json!({"chunkIndex": 0, "totalChunks": 3, "data": rows(0, 100)})),
            envelope("results_chunk", json!({"chunkIndex": 1, "totalChunks": 3, "data": rows(100, 200)})),
            envelope("results_chunk", json!({"chunkIndex": 2, "totalChunks": 3, "data": rows(200, 250)})),
            envelope("results_complete", json!({"totalItems": 250, "summary": "All readings"})),
            envelope("complete", json!({})),
        ]),
    )
    .await;

    let (mut conversation, _speaker) = conversation(&server);
    let id = conversation.submit("Sensor readings", SystemTime::now()).unwrap();
    run_until_idle(&mut conversation).await;

    let message = conversation.message(id).unwrap();
    let data = message.data().unwrap();
    assert_eq!(data.len(), 250);
    assert_eq!(data.result[0], json!({"row": 0}));
    assert_eq!(data.result[249], json!({"row": 249}));
    assert_eq!(data.summary.as_deref(), Some("All readings"));
    assert_eq!(message.content(), "250 sensor readings");
}

#[tokio::test]
async fn trailing_payload_finalizes_stream_without_complete() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        sse_body(&[
            envelope("analysis", json!({"message": "Analysing"})),
            json!({"interpretation": "Rain expected", "result": [{"day": "Fri"}]}),
        ]),
    )
    .await;

    let (mut conversation, speaker) = conversation(&server);
    let id = conversation.submit("Forecast", SystemTime::now()).unwrap();
    run_until_idle(&mut conversation).await;

    let message = conversation.message(id).unwrap();
    assert!(message.is_complete());
    assert_eq!(message.content(), "Rain expected");
    assert_eq!(message.data().unwrap().len(), 1);
    assert_eq!(speaker.spoken(), vec!["Rain expected"]);
}

#[tokio::test]
async fn error_envelope_marks_message_and_stays_silent() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        sse_body(&[
            envelope("metadata", json!({"interpretation": "Looking up"})),
            envelope("error", json!({"message": "Query timed out"})),
            envelope("status", json!({"message": "ignored after error"})),
        ]),
    )
    .await;

    let (mut conversation, speaker) = conversation(&server);
    let id = conversation.submit("Slow question", SystemTime::now()).unwrap();
    run_until_idle(&mut conversation).await;

    let message = conversation.message(id).unwrap();
    assert_eq!(message.error(), Some("Query timed out"));
    assert!(message.content().starts_with("Error: Query timed out"));
    assert!(speaker.spoken().is_empty());
}

#[tokio::test]
async fn unauthorized_response_explains_how_to_fix_it() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "token expired"})))
        .mount(&server)
        .await;

    let (mut conversation, speaker) = conversation(&server);
    let id = conversation.submit("Anything", SystemTime::now()).unwrap();
    run_until_idle(&mut conversation).await;

    let error = conversation.message(id).unwrap().error().unwrap().to_string();
    assert!(error.contains("Authentication failed (401)"), "{error}");
    assert!(error.contains("FIELDHAND_TOKEN"), "{error}");
    assert!(error.contains("token expired"), "{error}");
    assert!(!error.contains("test-token"), "{error}");
    assert!(speaker.spoken().is_empty());
}

#[tokio::test]
async fn stop_before_any_data_leaves_an_empty_finished_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(std::time::Duration::from_secs(2))
                .set_body_string(sse_body(&[envelope("complete", json!({"interpretation": "late"}))])),
        )
        .mount(&server)
        .await;

    let (mut conversation, speaker) = conversation(&server);
    let id = conversation.submit("Cancel me", SystemTime::now()).unwrap();
    conversation.tick(Instant::now());
    assert!(conversation.stop_streaming(Instant::now()));
    conversation.tick(Instant::now());

    let message = conversation.message(id).unwrap();
    assert!(message.is_complete());
    assert!(message.error().is_none());
    assert_eq!(message.content(), "");
    assert!(speaker.spoken().is_empty());
    assert!(!conversation.is_streaming());
}
