use opsai::api::tool_call::extract;
use opsai::api::types::{ChatResponse, Choice, Message, Usage};
use proptest::prelude::*;

fn response_with_content(content: &str) -> ChatResponse {
    ChatResponse {
        id: "prop-test".to_string(),
        object: "chat.completion".to_string(),
        created: 0,
        model: "m".to_string(),
        choices: vec![Choice {
            index: 0,
            message: Message::assistant(content),
            reasoning_content: None,
            finish_reason: Some("stop".to_string()),
        }],
        usage: Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        },
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn extract_never_panics_on_arbitrary_text(s in r"\PC*") {
        let response = response_with_content(&s);
        let _ = extract(&response, false);
    }

    #[test]
    fn extract_never_panics_with_fenced_blocks(
        prefix in r"\PC*",
        body in r"\PC*",
        suffix in r"\PC*"
    ) {
        let content = format!("{prefix}```json\n{body}\n```{suffix}");
        let response = response_with_content(&content);
        let _ = extract(&response, false);
    }

    #[test]
    fn well_formed_instruction_always_extracts(
        worker in "[a-z]{3,8}",
        action in "[a-z_]{3,12}"
    ) {
        let content = format!(r#"{{"worker":"{worker}","action":"{action}","args":{{}}}}"#);
        let response = response_with_content(&content);
        let result = extract(&response, false).unwrap();
        prop_assert_eq!(result.worker, worker);
        prop_assert_eq!(result.action, action);
        prop_assert!(!result.is_final);
    }

    #[test]
    fn trailing_comma_repair_matches_clean_parse(
        worker in "[a-z]{3,8}",
        action in "[a-z_]{3,12}"
    ) {
        let clean = format!(r#"{{"worker":"{worker}","action":"{action}","args":{{}}}}"#);
        let dirty = format!(r#"{{"worker":"{worker}","action":"{action}","args":{{}},}}"#);
        let clean_result = extract(&response_with_content(&clean), false).unwrap();
        let dirty_result = extract(&response_with_content(&dirty), false).unwrap();
        prop_assert_eq!(clean_result.worker, dirty_result.worker);
        prop_assert_eq!(clean_result.action, dirty_result.action);
    }
}
