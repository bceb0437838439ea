//! Request orchestration
//!
//! One [`QueryPipeline::process`] call per request, strictly sequential:
//! classify, assemble context, generate SQL, parse, sandbox, execute,
//! refine once on an empty result, format, summarize, update conversation
//! state. Per-request external-call budget: at most 3 LLM calls and 2
//! result queries; the follow-up branch uses none. Errors end the request,
//! never the session.

use std::sync::Arc;

use async_trait::async_trait;

use crate::ai::parser::{self, GeneratedQuery};
use crate::ai::prompts::{self, TranscriptChunk};
use crate::ai::{ChatOptions, LlmClient, SummaryGenerator};
use crate::chat::ConversationState;
use crate::error::PipelineError;
use crate::format::{self, FormattedPayload, ProcessingInfo};
use crate::intent::{self, Intent};
use crate::query::{sandbox, ContextProvider, QueryExecutor, QueryResult, Row};
use crate::scope::AppScope;

/// How many transcript excerpts to retrieve per request.
const TRANSCRIPT_FETCH_LIMIT: usize = 30;

/// Seam for meeting-transcript retrieval; the backing index is an external
/// collaborator, so deployments without one simply leave this unset.
#[async_trait]
pub trait TranscriptSearch: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Vec<TranscriptChunk>;
}

/// One incoming question.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub scope: AppScope,
}

/// The orchestrator. Construct once, share behind the server state.
pub struct QueryPipeline {
    llm: Arc<dyn LlmClient>,
    executor: Arc<dyn QueryExecutor>,
    context: Arc<dyn ContextProvider>,
    transcripts: Option<Arc<dyn TranscriptSearch>>,
    summaries: SummaryGenerator,
}

impl QueryPipeline {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: Arc<dyn QueryExecutor>,
        context: Arc<dyn ContextProvider>,
    ) -> Self {
        let summaries = SummaryGenerator::new(llm.clone());
        Self {
            llm,
            executor,
            context,
            transcripts: None,
            summaries,
        }
    }

    pub fn with_transcripts(mut self, transcripts: Arc<dyn TranscriptSearch>) -> Self {
        self.transcripts = Some(transcripts);
        self
    }

    /// Process one request against the caller's conversation state. The
    /// state is mutated only on a successful exchange.
    pub async fn process(
        &self,
        request: &QueryRequest,
        state: &mut ConversationState,
    ) -> Result<FormattedPayload, PipelineError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(PipelineError::Input("query must not be blank".into()));
        }
        let scope = request.scope;

        // Follow-ups about a developer already analyzed are answered from
        // the cache, no external calls at all.
        if intent::is_followup(query) {
            if let Some(payload) = self.answer_followup(query, state) {
                return Ok(payload);
            }
        }

        let transcript_chunks = match &self.transcripts {
            Some(search) => search.search(query, TRANSCRIPT_FETCH_LIMIT).await,
            None => Vec::new(),
        };

        match intent::classify(query) {
            Intent::Conversational => {
                self.converse(query, scope, state, &transcript_chunks).await
            }
            Intent::DataQuery => {
                self.run_data_query(query, scope, state, &transcript_chunks)
                    .await
            }
        }
    }

    /// Answer a pronoun follow-up from the stored analysis, if any.
    fn answer_followup(
        &self,
        query: &str,
        state: &mut ConversationState,
    ) -> Option<FormattedPayload> {
        let developer = state.resolve_developer(query)?;
        let topic = intent::followup_topic(query);
        let section = state.analysis_for(&developer)?.section(topic).to_string();
        tracing::info!("answered follow-up about {developer} from stored analysis");

        state.add_conversational_exchange(query, &section);
        let mut payload = FormattedPayload::text_response(
            query,
            "Developer Analysis (Retrieved from Storage)",
            section,
        );
        payload.processing_info = ProcessingInfo {
            model_used: "stored_analysis".to_string(),
            context_used: true,
            refinement_used: false,
            query_type: "followup".to_string(),
        };
        Some(payload)
    }

    /// The no-SQL branch: a context-aware advice answer.
    async fn converse(
        &self,
        query: &str,
        scope: AppScope,
        state: &mut ConversationState,
        transcripts: &[TranscriptChunk],
    ) -> Result<FormattedPayload, PipelineError> {
        let conversation_context = state.build_prompt_context(scope);
        let system = prompts::conversational_system(scope, &conversation_context, transcripts);

        let raw = self
            .llm
            .chat(&system, query, ChatOptions::CONVERSATIONAL)
            .await
            .map_err(|e| PipelineError::Upstream(e.to_string()))?;
        let answer = tidy_conversational(&raw);

        state.add_conversational_exchange(query, &answer);

        let mut payload = FormattedPayload::text_response(query, "AI Assistant Response", answer);
        payload.processing_info = ProcessingInfo {
            model_used: self.llm.model_name().to_string(),
            context_used: !conversation_context.is_empty(),
            refinement_used: false,
            query_type: "conversational".to_string(),
        };
        Ok(payload)
    }

    /// The data branch: generate, gate, execute, refine, format, summarize.
    async fn run_data_query(
        &self,
        query: &str,
        scope: AppScope,
        state: &mut ConversationState,
        transcripts: &[TranscriptChunk],
    ) -> Result<FormattedPayload, PipelineError> {
        let schema_context = self.context.build(scope).await;
        let conversation_context = state.build_prompt_context(scope);

        let system =
            prompts::sql_generation(scope, &schema_context, &conversation_context, transcripts);
        let raw = self
            .llm
            .chat(&system, query, ChatOptions::SQL)
            .await
            .map_err(|e| PipelineError::Upstream(e.to_string()))?;

        let outcome = parser::parse_generated(&raw)?;
        if outcome.used_fallback() {
            tracing::warn!("strict JSON parse failed; fields recovered via regex");
        }
        let mut generated = outcome.into_query();

        if generated.sql.is_empty() {
            if let Some(refusal) = &generated.refusal {
                tracing::info!("model declined to generate SQL: {refusal}");
            }
            return Err(PipelineError::EmptyGeneration);
        }

        sandbox::validate(&generated.sql)?;
        let mut result = self.executor.execute(&generated.sql).await?;

        // Exactly one refinement attempt, and only for the zero-row case.
        let mut refinement_used = false;
        if result.is_empty() {
            tracing::info!("initial query returned no rows, attempting refinement");
            if let Some((refined, refined_result)) =
                self.try_refine(query, &generated.sql, &schema_context).await
            {
                refinement_used = true;
                if !refined_result.is_empty() {
                    generated = refined;
                    result = refined_result;
                }
            }
        }

        let processing_info = ProcessingInfo {
            model_used: self.llm.model_name().to_string(),
            context_used: !conversation_context.is_empty(),
            refinement_used,
            query_type: "data_query".to_string(),
        };

        if result.is_empty() {
            let mut payload = FormattedPayload::no_results(query);
            payload.processing_info = processing_info;
            return Ok(payload);
        }

        let mut payload = format::format_results(&result, &generated, query);
        payload.summary = self
            .summarize(query, scope, state, &generated, &result, transcripts)
            .await;
        payload.processing_info = processing_info;

        let reply_for_history = payload
            .summary
            .clone()
            .unwrap_or_else(|| generated.description.clone());
        state.add_data_exchange(query, &reply_for_history);
        state.absorb_results(&result.rows);

        Ok(payload)
    }

    /// Third LLM call: a single developer gets the full cached analysis,
    /// anything else the short business summary.
    async fn summarize(
        &self,
        query: &str,
        scope: AppScope,
        state: &mut ConversationState,
        generated: &GeneratedQuery,
        result: &QueryResult,
        transcripts: &[TranscriptChunk],
    ) -> Option<String> {
        if result.row_count() == 1 {
            if let Some(developer) = extract_developer_name(&result.rows) {
                let relevant = filter_transcripts(transcripts, &developer);
                let analysis = self
                    .summaries
                    .developer_analysis(&developer, result, &relevant)
                    .await;
                let summary = analysis.summary.clone();
                state.store_analysis(&developer, analysis);
                return Some(summary);
            }
        }
        self.summaries
            .business_summary(query, result, &generated.description, scope)
            .await
    }

    async fn try_refine(
        &self,
        user_query: &str,
        failed_sql: &str,
        schema_context: &str,
    ) -> Option<(GeneratedQuery, QueryResult)> {
        let prompt = prompts::refinement(user_query, failed_sql, schema_context);
        let raw = match self
            .llm
            .chat(&prompts::refinement_system(), &prompt, ChatOptions::SQL)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!("query refinement call failed: {e}");
                return None;
            }
        };

        let refined = match parser::parse_generated(&raw) {
            Ok(outcome) => outcome.into_query(),
            Err(e) => {
                tracing::error!("refinement response unparseable: {e}");
                return None;
            }
        };
        if refined.sql.is_empty() || sandbox::validate(&refined.sql).is_err() {
            return None;
        }

        match self.executor.execute(&refined.sql).await {
            Ok(result) => Some((refined, result)),
            Err(e) => {
                tracing::error!("refined query failed to execute: {e}");
                None
            }
        }
    }
}

/// The developer a single-row result is about, if the row names one.
fn extract_developer_name(rows: &[Row]) -> Option<String> {
    let first = rows.first()?;
    ["developer", "name", "developer_name"]
        .iter()
        .find_map(|key| first.get(*key))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Keep only transcript excerpts that mention the developer.
fn filter_transcripts(chunks: &[TranscriptChunk], developer: &str) -> Vec<TranscriptChunk> {
    let lowered = developer.to_lowercase();
    let mut variations: Vec<&str> = vec![lowered.as_str()];
    variations.extend(lowered.split_whitespace());

    chunks
        .iter()
        .filter(|chunk| {
            let text = chunk.text.to_lowercase();
            variations.iter().any(|v| text.contains(v))
        })
        .cloned()
        .collect()
}

/// Strip wrapping quotes and flatten accidental numbered lists into a
/// paragraph, as the conversational prompt demands prose.
fn tidy_conversational(raw: &str) -> String {
    let mut text = raw.trim().trim_matches('"').trim().to_string();
    if text.lines().any(|l| {
        let l = l.trim_start();
        l.starts_with("1.") || l.starts_with("2.")
    }) {
        text = text
            .lines()
            .map(|l| {
                l.trim_start()
                    .trim_start_matches(|c: char| c.is_ascii_digit())
                    .trim_start_matches('.')
                    .trim_start()
            })
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::parser::ChartType;
    use crate::query::Row;
    use anyhow::Result as AnyResult;
    use serde_json::json;
    use std::sync::Mutex;

    /// Scripted LLM double: pops canned responses, records every prompt.
    struct MockLlm {
        responses: Mutex<Vec<String>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl MockLlm {
        fn new(responses: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn prompt(&self, index: usize) -> (String, String) {
            self.calls.lock().unwrap()[index].clone()
        }
    }

    #[async_trait]
    impl LlmClient for MockLlm {
        async fn chat(
            &self,
            system_prompt: &str,
            user_prompt: &str,
            _opts: ChatOptions,
        ) -> AnyResult<String> {
            self.calls
                .lock()
                .unwrap()
                .push((system_prompt.to_string(), user_prompt.to_string()));
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("mock exhausted"))
        }

        fn model_name(&self) -> &str {
            "mock-model"
        }
    }

    /// Executor spy: records SQL, pops canned result sets.
    struct SpyExecutor {
        results: Mutex<Vec<QueryResult>>,
        executed: Mutex<Vec<String>>,
    }

    impl SpyExecutor {
        fn new(results: Vec<QueryResult>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into_iter().rev().collect()),
                executed: Mutex::new(Vec::new()),
            })
        }

        fn executed_sql(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl QueryExecutor for SpyExecutor {
        async fn execute(&self, sql: &str) -> Result<QueryResult, PipelineError> {
            sandbox::validate(sql)?;
            self.executed.lock().unwrap().push(sql.to_string());
            Ok(self.results.lock().unwrap().pop().unwrap_or_default())
        }
    }

    struct StaticContext;

    #[async_trait]
    impl ContextProvider for StaticContext {
        async fn build(&self, _scope: AppScope) -> String {
            "=== CURRENT DATA CONTEXT ===\nTotal Commits: 105\n=== END CONTEXT ===".to_string()
        }
    }

    fn rows(columns: &[&str], data: Vec<Vec<serde_json::Value>>) -> QueryResult {
        let rows = data
            .into_iter()
            .map(|values| {
                let mut row = Row::new();
                for (col, value) in columns.iter().zip(values) {
                    row.insert(col.to_string(), value);
                }
                row
            })
            .collect();
        QueryResult {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    fn pipeline(llm: Arc<MockLlm>, executor: Arc<SpyExecutor>) -> QueryPipeline {
        QueryPipeline::new(llm, executor, Arc::new(StaticContext))
    }

    fn request(query: &str, scope: AppScope) -> QueryRequest {
        QueryRequest {
            query: query.to_string(),
            scope,
        }
    }

    #[tokio::test]
    async fn blank_query_is_an_input_error() {
        let llm = MockLlm::new(vec![]);
        let executor = SpyExecutor::new(vec![]);
        let p = pipeline(llm.clone(), executor.clone());
        let mut state = ConversationState::new();

        let err = p
            .process(&request("   ", AppScope::Pioneer), &mut state)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
        assert_eq!(llm.call_count(), 0);
        assert!(executor.executed_sql().is_empty());
    }

    #[tokio::test]
    async fn top_developers_produce_a_bar_payload() {
        let llm = MockLlm::new(vec![
            r#"{"sql": "SELECT d.name, COUNT(*) AS total FROM commits c JOIN developers d ON d.id = c.developer_id WHERE c.app_type = 'pioneer' AND d.app_type = 'pioneer' AND c.committed_at >= NOW() - INTERVAL '30 days' GROUP BY d.name ORDER BY total DESC LIMIT 5", "description": "Top 5 developers by commits", "chart_type": "bar"}"#,
            r#"{"summary": "Alice leads the team with 40 commits."}"#,
        ]);
        let executor = SpyExecutor::new(vec![rows(
            &["name", "total"],
            vec![
                vec![json!("Alice"), json!(40)],
                vec![json!("Bob"), json!(30)],
                vec![json!("Carol"), json!(20)],
                vec![json!("Dan"), json!(10)],
                vec![json!("Eve"), json!(5)],
            ],
        )]);
        let p = pipeline(llm.clone(), executor.clone());
        let mut state = ConversationState::new();

        let payload = p
            .process(
                &request("top 5 developers by commits", AppScope::Pioneer),
                &mut state,
            )
            .await
            .unwrap();

        assert!(payload.success);
        assert_eq!(payload.chart_type, ChartType::Bar);
        assert_eq!(payload.data["labels"].as_array().unwrap().len(), 5);
        assert_eq!(
            payload.data["datasets"][0]["data"],
            json!([40, 30, 20, 10, 5])
        );
        assert_eq!(
            payload.summary.as_deref(),
            Some("Alice leads the team with 40 commits.")
        );
        assert!(!payload.processing_info.refinement_used);
        assert_eq!(payload.processing_info.query_type, "data_query");

        // executed SQL carries the tenancy predicate
        let executed = executor.executed_sql();
        assert_eq!(executed.len(), 1);
        assert!(executed[0].contains("app_type = 'pioneer'"));

        // state picked up the developers as focus entities
        assert_eq!(state.focus().developers[0], "Alice");
        // generation + summary, no more
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn dangerous_generated_sql_never_reaches_the_executor() {
        let llm = MockLlm::new(vec![
            r#"{"sql": "DROP TABLE commits", "description": "oops", "chart_type": "table"}"#,
        ]);
        let executor = SpyExecutor::new(vec![]);
        let p = pipeline(llm.clone(), executor.clone());
        let mut state = ConversationState::new();

        let err = p
            .process(&request("show me commits", AppScope::Legacy), &mut state)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::RejectedQuery(_)));
        assert!(executor.executed_sql().is_empty());
        // the session survives the failed turn
        assert!(!state.has_context());
    }

    #[tokio::test]
    async fn empty_results_trigger_exactly_one_refinement() {
        let llm = MockLlm::new(vec![
            r#"{"sql": "SELECT name FROM developers WHERE app_type = 'pioneer'", "description": "devs", "chart_type": "table"}"#,
            r#"{"sql": "SELECT name FROM developers WHERE app_type = 'pioneer' LIMIT 10", "description": "relaxed", "chart_type": "table"}"#,
        ]);
        let executor = SpyExecutor::new(vec![
            QueryResult::default(),
            QueryResult::default(),
        ]);
        let p = pipeline(llm.clone(), executor.clone());
        let mut state = ConversationState::new();

        let payload = p
            .process(&request("list developers", AppScope::Pioneer), &mut state)
            .await
            .unwrap();

        assert!(!payload.success);
        assert_eq!(payload.error.as_deref(), Some("No results found"));
        assert!(payload.processing_info.refinement_used);
        // primary + one refined execution, never a third
        assert_eq!(executor.executed_sql().len(), 2);
        // generation + refinement calls only (no summary for empty results)
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn refined_results_are_adopted_when_non_empty() {
        let llm = MockLlm::new(vec![
            r#"{"sql": "SELECT name, total FROM x", "description": "narrow", "chart_type": "bar"}"#,
            r#"{"sql": "SELECT name, total FROM y", "description": "relaxed", "chart_type": "bar"}"#,
            r#"{"summary": "Found data after widening the window."}"#,
        ]);
        let executor = SpyExecutor::new(vec![
            QueryResult::default(),
            rows(
                &["name", "total"],
                vec![vec![json!("Alice"), json!(3)], vec![json!("Bob"), json!(1)]],
            ),
        ]);
        let p = pipeline(llm.clone(), executor.clone());
        let mut state = ConversationState::new();

        let payload = p
            .process(&request("commits last week", AppScope::Pioneer), &mut state)
            .await
            .unwrap();

        assert!(payload.success);
        assert_eq!(payload.description, "relaxed");
        assert!(payload.processing_info.refinement_used);
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn single_developer_result_caches_analysis_and_serves_followup() {
        let llm = MockLlm::new(vec![
            r#"{"sql": "SELECT d.name, COUNT(*) AS total FROM tickets t JOIN developers d ON d.id = t.developer_id WHERE t.app_type = 'pioneer' GROUP BY d.name ORDER BY total DESC LIMIT 1", "description": "Top developer by tickets", "chart_type": "table"}"#,
            r#"{"performance_summary": "Alice closed the most tickets this month.", "strengths": "Alice is thorough.", "improvements": "Alice could delegate more."}"#,
        ]);
        let executor = SpyExecutor::new(vec![rows(
            &["name", "total"],
            vec![vec![json!("Alice"), json!(12)]],
        )]);
        let p = pipeline(llm.clone(), executor.clone());
        let mut state = ConversationState::new();

        let payload = p
            .process(
                &request("top developer by tickets", AppScope::Pioneer),
                &mut state,
            )
            .await
            .unwrap();
        assert_eq!(
            payload.summary.as_deref(),
            Some("Alice closed the most tickets this month.")
        );
        assert_eq!(llm.call_count(), 2);

        // Follow-up answered from the cache: no further LLM calls.
        let followup = p
            .process(
                &request("what should they improve on?", AppScope::Pioneer),
                &mut state,
            )
            .await
            .unwrap();
        assert_eq!(followup.response.as_deref(), Some("Alice could delegate more."));
        assert_eq!(followup.processing_info.model_used, "stored_analysis");
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn focus_entities_reach_later_prompts() {
        let llm = MockLlm::new(vec![
            r#"{"sql": "SELECT d.name, COUNT(*) AS total FROM tickets t JOIN developers d ON d.id = t.developer_id WHERE t.app_type = 'pioneer' GROUP BY d.name ORDER BY total DESC LIMIT 3", "description": "Busiest developers", "chart_type": "bar"}"#,
            r#"{"summary": "Alice is busiest."}"#,
            "Pair them with a mentor and protect their focus time.",
        ]);
        let executor = SpyExecutor::new(vec![rows(
            &["name", "total"],
            vec![vec![json!("Alice"), json!(12)], vec![json!("Bob"), json!(4)]],
        )]);
        let p = pipeline(llm.clone(), executor.clone());
        let mut state = ConversationState::new();

        p.process(
            &request("top developers by tickets", AppScope::Pioneer),
            &mut state,
        )
        .await
        .unwrap();

        let payload = p
            .process(
                &request("any advice for easing her workload?", AppScope::Pioneer),
                &mut state,
            )
            .await
            .unwrap();

        assert_eq!(payload.processing_info.query_type, "conversational");
        assert!(payload.processing_info.context_used);
        // the conversational system prompt resolved the pronoun context
        let (system, _user) = llm.prompt(2);
        assert!(system.contains("Alice"));
        assert!(system.contains("pronouns"));
    }

    #[tokio::test]
    async fn conversational_branch_needs_no_executor() {
        let llm = MockLlm::new(vec!["Try shorter standups and clearer agendas."]);
        let executor = SpyExecutor::new(vec![]);
        let p = pipeline(llm.clone(), executor.clone());
        let mut state = ConversationState::new();

        let payload = p
            .process(
                &request("how do we run good standups?", AppScope::Legacy),
                &mut state,
            )
            .await
            .unwrap();

        assert_eq!(payload.chart_type, ChartType::Text);
        assert_eq!(
            payload.response.as_deref(),
            Some("Try shorter standups and clearer agendas.")
        );
        assert!(executor.executed_sql().is_empty());
        assert_eq!(state.history().count(), 1);
    }

    #[tokio::test]
    async fn model_refusal_is_an_empty_generation_error() {
        let llm = MockLlm::new(vec![r#"{"error": "Please rephrase your query"}"#]);
        let executor = SpyExecutor::new(vec![]);
        let p = pipeline(llm.clone(), executor.clone());
        let mut state = ConversationState::new();

        let err = p
            .process(&request("count the commits", AppScope::Pioneer), &mut state)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::EmptyGeneration));
    }

    #[test]
    fn tidy_flattens_numbered_lists() {
        let raw = "1. Write tests.\n2. Review often.";
        assert_eq!(tidy_conversational(raw), "Write tests. Review often.");
        assert_eq!(tidy_conversational("\"quoted\""), "quoted");
    }

    #[test]
    fn transcript_filter_matches_name_parts() {
        let chunks = vec![
            TranscriptChunk {
                text: "Alice Smith demoed the importer".into(),
                meeting_date: None,
            },
            TranscriptChunk {
                text: "Unrelated discussion".into(),
                meeting_date: None,
            },
        ];
        let filtered = filter_transcripts(&chunks, "Alice Smith");
        assert_eq!(filtered.len(), 1);
        assert!(filtered[0].text.contains("Alice"));
    }
}
