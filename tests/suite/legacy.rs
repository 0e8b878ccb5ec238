//! Non-streaming fallback endpoint.

use std::time::SystemTime;

use serde_json::json;

use crate::common::{conversation, mount_legacy, run_until_idle};

#[tokio::test]
async fn legacy_success_is_delivered_as_one_completion() {
    let server = wiremock::MockServer::start().await;
    mount_legacy(
        &server,
        200,
        json!({
            "success": true,
            "data": {
                "interpretation": "Barley needs nitrogen",
                "visualization": {"type": "table"},
                "result": [{"crop": "barley"}]
            }
        }),
    )
    .await;

    let (mut conversation, speaker) = conversation(&server);
    let id = conversation.submit_legacy("Fertilizer?", SystemTime::now()).unwrap();
    run_until_idle(&mut conversation).await;

    let message = conversation.message(id).unwrap();
    assert!(message.is_complete());
    assert_eq!(message.content(), "Barley needs nitrogen");
    assert_eq!(message.data().unwrap().len(), 1);
    assert_eq!(message.streaming_status().unwrap().events.len(), 1);
    assert_eq!(speaker.spoken(), vec!["Barley needs nitrogen"]);
}

#[tokio::test]
async fn legacy_failure_becomes_message_error() {
    let server = wiremock::MockServer::start().await;
    mount_legacy(
        &server,
        200,
        json!({"success": false, "message": "Property not found"}),
    )
    .await;

    let (mut conversation, speaker) = conversation(&server);
    let id = conversation.submit_legacy("Fields?", SystemTime::now()).unwrap();
    run_until_idle(&mut conversation).await;

    let message = conversation.message(id).unwrap();
    assert_eq!(message.error(), Some("Property not found"));
    assert!(speaker.spoken().is_empty());
}
