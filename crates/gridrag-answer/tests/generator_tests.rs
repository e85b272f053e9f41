use gridrag_answer::ChatCompletionsGenerator;
use gridrag_core::config::GenerationSettings;
use gridrag_core::traits::Generator;
use gridrag_core::types::GenerationRequest;
use mockito::Matcher;

fn settings(base_url: String) -> GenerationSettings {
    GenerationSettings {
        base_url,
        model: "grok-test".to_string(),
        api_key_env: "GRIDRAG_TEST_UNSET_KEY".to_string(),
        max_tokens: 64,
        temperature: 0.0,
    }
}

fn request() -> GenerationRequest {
    GenerationRequest {
        instructions: "Answer only from context.".to_string(),
        context: "[S1] SOP | - | sop@v1:0\nOpen breaker 52A.\n\n".to_string(),
        query: "How do I isolate the transformer?".to_string(),
    }
}

#[tokio::test]
async fn posts_chat_completion_and_returns_content() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer test-key")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJsonString(r#"{"model":"grok-test","max_tokens":64}"#.to_string()),
            Matcher::Regex("Open breaker 52A".to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"Open breaker 52A [S1]."}}]}"#)
        .create_async()
        .await;

    let generator = ChatCompletionsGenerator::from_settings(&settings(server.url())).with_api_key("test-key");
    let text = generator.generate(&request()).await.unwrap();
    assert_eq!(text, "Open breaker 52A [S1].");
    assert_eq!(generator.name(), "grok-test");
    mock.assert_async().await;
}

#[tokio::test]
async fn server_error_is_reported() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server.mock("POST", "/chat/completions").with_status(503).with_body("overloaded").create_async().await;

    let generator = ChatCompletionsGenerator::from_settings(&settings(server.url())).with_api_key("test-key");
    let err = generator.generate(&request()).await.unwrap_err();
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn missing_api_key_fails_without_request() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("POST", "/chat/completions").expect(0).create_async().await;

    let generator = ChatCompletionsGenerator::from_settings(&settings(server.url()));
    assert!(generator.generate(&request()).await.is_err());
    mock.assert_async().await;
}
