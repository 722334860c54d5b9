//! The SOTA pipeline orchestrator.
//!
//! A run walks the six [`Stage`]s in order over one transcript:
//!
//! ```text
//! search → filter → parse → analyze → synthesize → store
//! ```
//!
//! Each stage injects its instruction, runs one chat round, optionally a
//! persistence round, and then up to `max_retries - 1` validation rounds.
//! Stage failures are reported and the run moves on; only
//! [`PipelineError::is_fatal`] errors abort it. Cancellation is checked
//! between stages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use sotaforge_core::store::{collections, DocumentStore};
use sotaforge_core::transcript::{extract_sota_text, pending_tool_calls, tool_error_turn, Turn};

use crate::config::Config;
use crate::error::PipelineError;
use crate::executor::Session;
use crate::llm::ChatProvider;
use crate::progress::{ProgressSink, STATUS_CANCELLED, STATUS_COMPLETED, STATUS_FAILED};
use crate::prompts;
use crate::rate_limit::RateLimitPolicy;
use crate::tools::{ToolContext, ToolRegistry, PIPELINE_PREFIXES};
use crate::validator::validate_step;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Search,
    Filter,
    Parse,
    Analyze,
    Synthesize,
    Store,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Search,
        Stage::Filter,
        Stage::Parse,
        Stage::Analyze,
        Stage::Synthesize,
        Stage::Store,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Search => "search",
            Stage::Filter => "filter",
            Stage::Parse => "parse",
            Stage::Analyze => "analyze",
            Stage::Synthesize => "synthesize",
            Stage::Store => "store",
        }
    }

    /// Capitalized name for completion messages.
    pub fn title(&self) -> &'static str {
        match self {
            Stage::Search => "Search",
            Stage::Filter => "Filter",
            Stage::Parse => "Parse",
            Stage::Analyze => "Analyze",
            Stage::Synthesize => "Synthesize",
            Stage::Store => "Store",
        }
    }

    pub fn instruction(&self, topic: &str) -> String {
        let template = match self {
            Stage::Search => prompts::SEARCH_INSTRUCTION,
            Stage::Filter => prompts::FILTER_INSTRUCTION,
            Stage::Parse => prompts::PARSE_INSTRUCTION,
            Stage::Analyze => prompts::ANALYZE_INSTRUCTION,
            Stage::Synthesize => prompts::SYNTHESIZE_INSTRUCTION,
            Stage::Store => prompts::STORE_INSTRUCTION,
        };
        template.replace("{topic}", topic)
    }

    /// Follow-up asking the model to persist what the stage's tools only
    /// returned. Parse and analyze store on their own.
    pub fn persistence_instruction(&self) -> Option<&'static str> {
        match self {
            Stage::Search => Some(prompts::SAVE_SEARCH_INSTRUCTION),
            Stage::Filter => Some(prompts::SAVE_FILTER_INSTRUCTION),
            Stage::Synthesize => Some(prompts::SAVE_SYNTHESIZE_INSTRUCTION),
            Stage::Parse | Stage::Analyze | Stage::Store => None,
        }
    }

    pub fn validation_prompt(&self) -> &'static str {
        match self {
            Stage::Search => prompts::VALIDATE_SEARCH,
            Stage::Filter => prompts::VALIDATE_FILTER,
            Stage::Parse => prompts::VALIDATE_PARSE,
            Stage::Analyze => prompts::VALIDATE_ANALYZE,
            Stage::Synthesize => prompts::VALIDATE_SYNTHESIZE,
            Stage::Store => prompts::VALIDATE_STORE,
        }
    }

    pub fn destination(&self) -> &'static str {
        match self {
            Stage::Search => collections::RAW,
            Stage::Filter => collections::FILTERED,
            Stage::Parse => collections::PARSED,
            Stage::Analyze => collections::ANALYZED,
            Stage::Synthesize => collections::SYNTHESIZED,
            Stage::Store => collections::FINAL_SOTA,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Cooperative cancellation shared between a run and whoever started it.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-run state: the isolated store namespace, the progress queue and the
/// cancellation flag.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub store: Arc<dyn DocumentStore>,
    pub progress: ProgressSink,
    pub cancel: CancellationFlag,
}

impl RunContext {
    pub fn new(
        run_id: impl Into<String>,
        store: Arc<dyn DocumentStore>,
        progress: ProgressSink,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            store,
            progress,
            cancel: CancellationFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Result of a run.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SotaReport {
    pub topic: String,
    pub status: String,
    pub text: String,
}

/// How one stage went.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub stage: Stage,
    pub approved: bool,
    /// Validation rounds run.
    pub attempts: u32,
    /// Stage-level failures that were reported and skipped.
    pub warnings: u32,
}

pub struct Orchestrator {
    llm: Arc<dyn ChatProvider>,
    tools: Arc<ToolRegistry>,
    config: Arc<Config>,
    http: reqwest::Client,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn ChatProvider>, tools: Arc<ToolRegistry>, config: Arc<Config>) -> Self {
        Self {
            llm,
            tools,
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Run the whole pipeline for `topic`.
    ///
    /// Emits a terminal progress event in every case: `completed`,
    /// `cancelled`, or `failed` when a fatal error is returned.
    pub async fn run(&self, topic: &str, run: &RunContext) -> Result<SotaReport, PipelineError> {
        match self.run_stages(topic, run).await {
            Ok(report) => Ok(report),
            Err(e) => {
                tracing::error!(run_id = %run.run_id, error = %e, "pipeline failed");
                run.progress
                    .emit(STATUS_FAILED, format!("Pipeline failed: {}", e), "");
                Err(e)
            }
        }
    }

    async fn run_stages(&self, topic: &str, run: &RunContext) -> Result<SotaReport, PipelineError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(PipelineError::EmptyTopic);
        }

        let ctx = ToolContext::new(
            self.config.clone(),
            run.store.clone(),
            self.llm.clone(),
            run.progress.clone(),
        )
        .with_http(self.http.clone());
        let schemas = self.tools.openai_schemas(PIPELINE_PREFIXES);
        let policy = RateLimitPolicy::from_config(&self.config);
        let session = Session {
            llm: self.llm.as_ref(),
            tools: &self.tools,
            ctx: &ctx,
            schemas: &schemas,
            policy: &policy,
        };

        tracing::info!(run_id = %run.run_id, topic, "starting pipeline");
        run.progress
            .emit("started", format!("Starting SOTA pipeline for: {}", topic), "");

        let mut transcript = vec![Turn::system(prompts::ORCHESTRATOR_SYSTEM_PROMPT)];
        for stage in Stage::ALL {
            if run.cancel.is_cancelled() {
                tracing::info!(run_id = %run.run_id, next = %stage, "pipeline cancelled");
                run.progress
                    .emit(STATUS_CANCELLED, "Pipeline cancelled", stage.name());
                return Ok(SotaReport {
                    topic: topic.to_string(),
                    status: STATUS_CANCELLED.to_string(),
                    text: extract_sota_text(&transcript),
                });
            }
            if stage == Stage::Store && !self.config.pipeline.store_final_report {
                tracing::debug!("final report storage disabled, skipping store stage");
                continue;
            }

            let outcome = run_stage(
                &session,
                &mut transcript,
                stage,
                topic,
                self.config.pipeline.max_retries,
            )
            .await?;
            tracing::info!(
                stage = %outcome.stage,
                approved = outcome.approved,
                attempts = outcome.attempts,
                warnings = outcome.warnings,
                "stage finished"
            );
        }

        let text = extract_sota_text(&transcript);
        if text.is_empty() {
            tracing::warn!(run_id = %run.run_id, "no SOTA report found in transcript");
        }
        run.progress
            .emit(STATUS_COMPLETED, "SOTA pipeline completed", "");
        Ok(SotaReport {
            topic: topic.to_string(),
            status: STATUS_COMPLETED.to_string(),
            text,
        })
    }
}

/// Report a non-fatal stage failure and close any tool calls it left
/// unanswered. Fatal errors are returned.
fn absorb_stage_failure(
    session: &Session<'_>,
    transcript: &mut Vec<Turn>,
    stage: Stage,
    err: PipelineError,
) -> Result<(), PipelineError> {
    if err.is_fatal() {
        return Err(err);
    }
    tracing::warn!(stage = %stage, error = %err, "stage step failed, continuing");
    session.ctx.progress.emit(
        stage.name(),
        format!("⚠ {} step error: {}", stage.title(), err),
        stage.name(),
    );
    let message = err.to_string();
    for call in pending_tool_calls(transcript) {
        transcript.push(tool_error_turn(&call, &message));
    }
    Ok(())
}

/// Run one stage: instruction round, optional persistence round, then
/// validation while not approved and `attempt < max_retries`.
///
/// Non-approval is not an error; the stage completes with warnings.
pub async fn run_stage(
    session: &Session<'_>,
    transcript: &mut Vec<Turn>,
    stage: Stage,
    topic: &str,
    max_retries: u32,
) -> Result<StageOutcome, PipelineError> {
    let name = stage.name();
    let progress = &session.ctx.progress;
    let mut warnings = 0;

    progress.emit(name, format!("Starting {} step...", name), name);
    transcript.push(Turn::user(stage.instruction(topic)));
    if let Err(e) = session.round(transcript, name).await {
        absorb_stage_failure(session, transcript, stage, e)?;
        warnings += 1;
    }

    if let Some(persist) = stage.persistence_instruction() {
        progress.emit(name, format!("Saving {} results...", name), name);
        transcript.push(Turn::user(persist));
        if let Err(e) = session.round(transcript, name).await {
            absorb_stage_failure(session, transcript, stage, e)?;
            warnings += 1;
        }
    }

    let mut approved = false;
    let mut attempt = 1;
    while !approved && attempt < max_retries {
        progress.emit(
            name,
            format!("Validating {} results (attempt {}/{})...", name, attempt, max_retries),
            name,
        );
        match validate_step(session, transcript, stage.validation_prompt(), name).await {
            Ok(verdict) => approved = verdict,
            Err(e) => {
                absorb_stage_failure(session, transcript, stage, e)?;
                warnings += 1;
            }
        }
        attempt += 1;
    }

    if approved {
        progress.emit(name, format!("✓ {} step completed successfully", stage.title()), name);
    } else {
        progress.emit(name, format!("⚠ {} step completed with warnings", stage.title()), name);
    }

    Ok(StageOutcome {
        stage,
        approved,
        attempts: attempt - 1,
        warnings,
    })
}
