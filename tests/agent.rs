//! Table agent loop tests with a scripted model.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use sewer_query::agent::{create_table_agent, AgentOptions, ITERATION_LIMIT_OUTPUT};
use sewer_query::models::InspectionTable;
use sewer_query::traits::{ChatMessage, LanguageModel, QueryAgent, Role};

/// Replays canned replies in order and records every conversation it sees.
struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn last_user_message(&self) -> String {
        let seen = self.seen.lock().unwrap();
        let conversation = seen.last().unwrap();
        let msg = conversation.last().unwrap();
        assert_eq!(msg.role, Role::User);
        msg.content.clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        self.seen.lock().unwrap().push(messages.to_vec());
        match self.replies.lock().unwrap().pop_front() {
            Some(reply) => Ok(reply),
            None => bail!("script exhausted"),
        }
    }
}

fn inspections() -> Arc<InspectionTable> {
    let records = vec![
        json!({"id": "A-1", "city": "Springfield", "roots": true, "length_ft": 120}),
        json!({"id": "A-2", "city": "Shelbyville", "roots": false, "length_ft": 80}),
        json!({"id": "A-3", "city": "Springfield", "roots": true, "length_ft": 40}),
    ];
    Arc::new(InspectionTable::from_records(
        records.into_iter().map(|v| v.as_object().cloned().unwrap()),
    ))
}

fn options() -> AgentOptions {
    AgentOptions {
        allow_code_execution: true,
        handle_parsing_errors: true,
        verbose: false,
        max_iterations: 5,
        max_result_rows: 20,
    }
}

#[tokio::test]
async fn action_observation_then_final_answer() {
    let model = ScriptedModel::new(&[
        r#"{"thought": "count roots", "action": {"op": "count", "where": [{"column": "roots", "op": "eq", "value": true}]}}"#,
        r#"{"thought": "got it", "final_answer": "2 inspections found roots."}"#,
    ]);
    let agent = create_table_agent(model.clone(), inspections(), options()).unwrap();

    let response = agent.invoke("How many inspections found roots?").await.unwrap();
    assert_eq!(response.output_text(), "2 inspections found roots.");
    assert_eq!(response.0["input"], "How many inspections found roots?");

    let steps = response.0["intermediate_steps"].as_array().unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0]["observation"], r#"{"count":2}"#);

    assert_eq!(model.calls(), 2);
    assert_eq!(model.last_user_message(), r#"Observation: {"count":2}"#);
}

#[tokio::test]
async fn conversation_starts_with_table_description() {
    let model = ScriptedModel::new(&[r#"{"final_answer": "3"}"#]);
    let agent = create_table_agent(model.clone(), inspections(), options()).unwrap();
    agent.invoke("How many rows?").await.unwrap();

    assert_eq!(agent.table().len(), 3);
    assert!(agent.system_prompt().contains("The table has 3 rows"));
    assert!(agent.system_prompt().contains("- city (string, 3 non-null)"));

    let seen = model.seen.lock().unwrap();
    let first = &seen[0];
    assert_eq!(first[0].role, Role::System);
    assert_eq!(first[0].content, agent.system_prompt());
    assert_eq!(first[1].content, "Question: How many rows?");
}

#[tokio::test]
async fn failed_query_is_observed_not_fatal() {
    let model = ScriptedModel::new(&[
        r#"{"action": {"op": "distinct", "column": "borough"}}"#,
        r#"{"action": {"op": "distinct", "column": "city"}}"#,
        r#"{"final_answer": "Springfield and Shelbyville"}"#,
    ]);
    let agent = create_table_agent(model.clone(), inspections(), options()).unwrap();

    let response = agent.invoke("Which cities?").await.unwrap();
    assert_eq!(response.output_text(), "Springfield and Shelbyville");

    let steps = response.0["intermediate_steps"].as_array().unwrap();
    assert!(steps[0]["observation"]
        .as_str()
        .unwrap()
        .starts_with("Error:"));
    assert!(steps[1]["observation"]
        .as_str()
        .unwrap()
        .contains("Springfield"));
}

#[tokio::test]
async fn malformed_reply_is_fed_back_when_handled() {
    let model = ScriptedModel::new(&[
        "The answer is probably three.",
        r#"{"final_answer": "3"}"#,
    ]);
    let agent = create_table_agent(model.clone(), inspections(), options()).unwrap();

    let response = agent.invoke("How many rows?").await.unwrap();
    assert_eq!(response.output_text(), "3");
    assert!(model
        .last_user_message()
        .starts_with("Invalid or incomplete response"));
    assert_eq!(response.0["intermediate_steps"][0]["action"], "_exception");
}

#[tokio::test]
async fn malformed_reply_fails_when_not_handled() {
    let model = ScriptedModel::new(&["not json at all"]);
    let agent = create_table_agent(
        model,
        inspections(),
        AgentOptions {
            handle_parsing_errors: false,
            ..options()
        },
    )
    .unwrap();

    let err = agent.invoke("How many rows?").await.unwrap_err();
    assert!(format!("{:#}", err).contains("Could not parse model output"));
}

#[tokio::test]
async fn iteration_limit_stops_the_loop() {
    let looping = r#"{"action": {"op": "schema"}}"#;
    let model = ScriptedModel::new(&[looping, looping, looping, looping]);
    let agent = create_table_agent(
        model.clone(),
        inspections(),
        AgentOptions {
            max_iterations: 3,
            ..options()
        },
    )
    .unwrap();

    let response = agent.invoke("Loop forever").await.unwrap();
    assert_eq!(response.output_text(), ITERATION_LIMIT_OUTPUT);
    assert_eq!(model.calls(), 3);
}

#[tokio::test]
async fn model_failure_propagates() {
    let model = ScriptedModel::new(&[]);
    let agent = create_table_agent(model, inspections(), options()).unwrap();

    let err = agent.invoke("anything").await.unwrap_err();
    assert!(err.to_string().contains("script exhausted"));
}

#[tokio::test]
async fn concurrent_queries_do_not_share_history() {
    let model = ScriptedModel::new(&[r#"{"final_answer": "a"}"#, r#"{"final_answer": "b"}"#]);
    let agent = Arc::new(create_table_agent(model.clone(), inspections(), options()).unwrap());

    let (a, b) = tokio::join!(agent.invoke("first"), agent.invoke("second"));
    a.unwrap();
    b.unwrap();

    for conversation in model.seen.lock().unwrap().iter() {
        assert_eq!(conversation.len(), 2);
    }
}

#[test]
fn factory_refuses_without_code_execution() {
    let model = ScriptedModel::new(&[]);
    let result = create_table_agent(
        model,
        inspections(),
        AgentOptions {
            allow_code_execution: false,
            ..options()
        },
    );
    let err = result.err().unwrap();
    assert!(err.to_string().contains("allow_code_execution"));
}
