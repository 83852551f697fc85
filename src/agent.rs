//! Table agent: a natural-language question answerer bound to one table.
//!
//! [`create_table_agent`] binds a [`LanguageModel`] to an [`InspectionTable`]
//! and returns a [`TableAgent`]. Each call to [`QueryAgent::invoke`] runs a
//! bounded reason/act loop:
//!
//! ```text
//! system prompt (table description + query language)
//! user: Question: ...
//!   ┌─▶ model reply: {"thought", "action": {...}} ──▶ query::execute ──┐
//!   └──────────────── user: Observation: {...} ◀───────────────────────┘
//! model reply: {"thought", "final_answer": "..."} ──▶ AgentResponse
//! ```
//!
//! The agent holds no per-query mutable state; the conversation lives on
//! the stack of the `invoke` call, so one agent can serve concurrent
//! requests.
//!
//! # Trust Boundary
//!
//! The agent executes whatever table queries the model proposes. The
//! factory refuses to build an agent unless `allow_code_execution` is set,
//! and the model backend must be one you trust.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::AgentConfig;
use crate::models::InspectionTable;
use crate::query::{execute, TableQuery};
use crate::traits::{AgentResponse, ChatMessage, LanguageModel, QueryAgent};

/// Output returned when the loop runs out of iterations.
pub const ITERATION_LIMIT_OUTPUT: &str = "Agent stopped due to iteration limit.";

const HEAD_ROWS_IN_PROMPT: usize = 5;
const MAX_PROMPT_ROW_CHARS: usize = 600;

/// Behaviour switches for a [`TableAgent`].
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Permit execution of model-generated table queries.
    pub allow_code_execution: bool,
    /// Feed unparseable model replies back to the model instead of failing.
    pub handle_parsing_errors: bool,
    /// Trace every step at `info` level (otherwise `debug`).
    pub verbose: bool,
    pub max_iterations: usize,
    pub max_result_rows: usize,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for AgentOptions {
    fn from(config: &AgentConfig) -> Self {
        Self {
            allow_code_execution: config.allow_code_execution,
            handle_parsing_errors: config.handle_parsing_errors,
            verbose: config.verbose,
            max_iterations: config.max_iterations,
            max_result_rows: config.max_result_rows,
        }
    }
}

/// A [`QueryAgent`] that answers questions by querying one table.
pub struct TableAgent {
    model: Arc<dyn LanguageModel>,
    table: Arc<InspectionTable>,
    options: AgentOptions,
    system_prompt: String,
}

/// Bind `model` to `table`.
///
/// # Errors
///
/// Fails when `options.allow_code_execution` is off or
/// `options.max_iterations` is zero.
pub fn create_table_agent(
    model: Arc<dyn LanguageModel>,
    table: Arc<InspectionTable>,
    options: AgentOptions,
) -> Result<TableAgent> {
    if !options.allow_code_execution {
        bail!(
            "The table agent executes queries generated by the model. \
             Set agent.allow_code_execution = true to opt in, and only do so \
             with a trusted model backend."
        );
    }
    if options.max_iterations == 0 {
        bail!("agent max_iterations must be > 0");
    }

    let system_prompt = render_system_prompt(&table);
    tracing::info!(
        model = model.model_name(),
        rows = table.len(),
        columns = table.columns().len(),
        "table agent bound"
    );

    Ok(TableAgent {
        model,
        table,
        options,
        system_prompt,
    })
}

impl TableAgent {
    pub fn table(&self) -> &InspectionTable {
        &self.table
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn trace(&self, iteration: usize, kind: &str, text: &str) {
        if self.options.verbose {
            tracing::info!(iteration, kind, "{}", text);
        } else {
            tracing::debug!(iteration, kind, "{}", text);
        }
    }
}

#[async_trait]
impl QueryAgent for TableAgent {
    async fn invoke(&self, query: &str) -> Result<AgentResponse> {
        let mut messages = vec![
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(format!("Question: {}", query)),
        ];
        let mut steps: Vec<Value> = Vec::new();

        for iteration in 1..=self.options.max_iterations {
            let reply = self.model.chat(&messages).await?;
            self.trace(iteration, "reply", &reply);

            match parse_step(&reply) {
                Ok(AgentStep::Final { thought, answer }) => {
                    if let Some(ref t) = thought {
                        self.trace(iteration, "thought", t);
                    }
                    self.trace(iteration, "final_answer", &answer);
                    return Ok(AgentResponse(json!({
                        "input": query,
                        "output": answer,
                        "intermediate_steps": steps,
                    })));
                }
                Ok(AgentStep::Action { thought, query: table_query }) => {
                    if let Some(ref t) = thought {
                        self.trace(iteration, "thought", t);
                    }
                    let observation =
                        match execute(&self.table, &table_query, self.options.max_result_rows) {
                            Ok(v) => v.to_string(),
                            Err(e) => format!("Error: {:#}", e),
                        };
                    self.trace(iteration, "observation", &observation);

                    steps.push(json!({
                        "action": table_query,
                        "observation": observation,
                    }));
                    messages.push(ChatMessage::assistant(reply));
                    messages.push(ChatMessage::user(format!("Observation: {}", observation)));
                }
                Err(e) if self.options.handle_parsing_errors => {
                    let observation = format!(
                        "Invalid or incomplete response: {:#}. Reply with a single JSON object \
                         containing either \"action\" or \"final_answer\".",
                        e
                    );
                    self.trace(iteration, "parse_error", &observation);

                    steps.push(json!({
                        "action": "_exception",
                        "observation": observation,
                    }));
                    messages.push(ChatMessage::assistant(reply));
                    messages.push(ChatMessage::user(observation));
                }
                Err(e) => {
                    return Err(e.context("Could not parse model output"));
                }
            }
        }

        tracing::warn!(
            max_iterations = self.options.max_iterations,
            "agent hit iteration limit"
        );
        Ok(AgentResponse(json!({
            "input": query,
            "output": ITERATION_LIMIT_OUTPUT,
            "intermediate_steps": steps,
        })))
    }
}

/// One decoded model turn.
#[derive(Debug, Clone, PartialEq)]
enum AgentStep {
    Action {
        thought: Option<String>,
        query: TableQuery,
    },
    Final {
        thought: Option<String>,
        answer: String,
    },
}

fn parse_step(reply: &str) -> Result<AgentStep> {
    let value = extract_json_object(reply)?;
    let thought = value
        .get("thought")
        .and_then(|t| t.as_str())
        .map(|s| s.to_string());

    if let Some(answer) = value.get("final_answer") {
        let answer = match answer {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Ok(AgentStep::Final { thought, answer });
    }

    if let Some(action) = value.get("action") {
        let query: TableQuery = serde_json::from_value(action.clone())
            .context("\"action\" is not a valid table query")?;
        return Ok(AgentStep::Action { thought, query });
    }

    bail!("reply has neither \"action\" nor \"final_answer\"")
}

/// Pull a JSON object out of a model reply, tolerating code fences and
/// prose around the object.
fn extract_json_object(reply: &str) -> Result<Value> {
    let mut s = reply.trim();
    if let Some(rest) = s.strip_prefix("```") {
        s = rest.trim_start_matches("json").trim();
        if let Some(end) = s.rfind("```") {
            s = s[..end].trim();
        }
    }

    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(s) {
        return Ok(v);
    }

    let (Some(start), Some(end)) = (s.find('{'), s.rfind('}')) else {
        bail!("reply does not contain a JSON object");
    };
    if end <= start {
        bail!("reply does not contain a JSON object");
    }
    let v: Value =
        serde_json::from_str(&s[start..=end]).context("reply contains malformed JSON")?;
    if !v.is_object() {
        bail!("reply is not a JSON object");
    }
    Ok(v)
}

fn render_system_prompt(table: &InspectionTable) -> String {
    let mut columns = String::new();
    for col in table.summary() {
        columns.push_str(&format!(
            "- {} ({}, {} non-null)\n",
            col.name, col.dtype, col.non_null
        ));
    }
    if columns.is_empty() {
        columns.push_str("(no columns)\n");
    }

    let mut head = String::new();
    for row in table.head(HEAD_ROWS_IN_PROMPT) {
        let mut line = Value::Object(row.record.clone()).to_string();
        if line.len() > MAX_PROMPT_ROW_CHARS {
            let mut cut = MAX_PROMPT_ROW_CHARS;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line.truncate(cut);
            line.push_str("...");
        }
        head.push_str(&line);
        head.push('\n');
    }
    if head.is_empty() {
        head.push_str("(table is empty)\n");
    }

    format!(
        r#"You are working with a table of sewer inspection records.
The table has {rows} rows. Columns:
{columns}
First rows (JSON):
{head}
Answer the user's question by querying the table. Each turn, reply with ONE JSON object and nothing else, in one of these shapes:
{{"thought": "<reasoning>", "action": <table query>}}
{{"thought": "<reasoning>", "final_answer": "<answer for the user>"}}

Table queries:
{{"op": "schema"}}
{{"op": "head", "n": 5}}
{{"op": "count", "where": [<condition>, ...]}}
{{"op": "select", "columns": ["col", ...], "where": [...], "limit": 20}}
{{"op": "distinct", "column": "col", "where": [...]}}
{{"op": "value_counts", "column": "col", "where": [...], "limit": 20}}
{{"op": "stats", "column": "col", "where": [...]}}

A condition is {{"column": "col", "op": "<cmp>", "value": <json>}} where <cmp> is one of
eq, ne, gt, gte, lt, lte, contains, in (value is an array), is_null, not_null (no value).
All conditions in "where" must hold. Nested fields use dotted names like "location.city".
String matching ignores case.

After each action you receive an Observation with the JSON result. Base the final answer only on observations."#,
        rows = table.len(),
        columns = columns,
        head = head,
    )
}
