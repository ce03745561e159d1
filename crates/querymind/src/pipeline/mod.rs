//! Question in, query + rows + explanation out, either in one response or as
//! a sequence of staged events.

pub mod events;
pub mod execution;
pub mod explain;


use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::{ConnectionConfig, NormalizedRow, PooledConnection};
use crate::error::QueryError;
use crate::history::ConversationTurn;
use crate::session::SessionStore;
use crate::synth::{ComplexityProfile, QuerySynthesizer, SynthesizedQuery};

pub use events::{Phase, PhaseMachine, StagedEvent};
pub use execution::{execute_query, rollback_quietly, QueryOutcome};
pub use explain::{Explainer, FALLBACK_ANSWER};

const DEFAULT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub session_id: String,
    pub question: String,
    pub config: ConnectionConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    pub sql: SynthesizedQuery,
    pub results: Vec<NormalizedRow>,
    pub answer: String,
    pub complexity: ComplexityProfile,
}

/// How a streaming run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    /// The consumer went away; the run stopped at its next emission.
    Disconnected,
}

/// Events of one streaming run plus the task producing them. The task's
/// result carries the typed fault, if any, after the last event.
pub struct StagedRun {
    pub events: mpsc::Receiver<StagedEvent>,
    pub outcome: JoinHandle<Result<StreamOutcome, QueryError>>,
}

enum Halt {
    Disconnected,
    Failed(QueryError),
}

impl From<QueryError> for Halt {
    fn from(err: QueryError) -> Self {
        Halt::Failed(err)
    }
}

pub struct QueryPipeline {
    sessions: Arc<SessionStore>,
    synthesizer: QuerySynthesizer,
    explainer: Explainer,
    channel_capacity: usize,
}

impl QueryPipeline {
    pub fn new(sessions: Arc<SessionStore>, synthesizer: QuerySynthesizer, explainer: Explainer) -> Self {
        Self {
            sessions,
            synthesizer,
            explainer,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn synthesizer(&self) -> &QuerySynthesizer {
        &self.synthesizer
    }

    /// Synchronous mode. History is only extended after the query ran.
    pub async fn run(&self, request: &QueryRequest) -> Result<QueryAnswer, QueryError> {
        let conn = self.sessions.acquire(&request.session_id, &request.config).await?;
        let history = self.sessions.history(&request.session_id);

        let sql = self
            .synthesizer
            .synthesize(&request.question, &history, Some(&conn))
            .await?;
        let outcome = execute_on(&conn, &sql).await?;

        self.sessions
            .record_turn(&request.session_id, ConversationTurn::new(request.question.as_str(), sql.as_str()));

        let results = outcome.into_rows();
        let answer = self.explainer.explain(&request.question, sql.as_str(), &results).await;
        let complexity = sql.complexity();
        info!(
            "Answered question for session {} with {} row(s)",
            request.session_id,
            results.len()
        );

        Ok(QueryAnswer {
            sql,
            results,
            answer,
            complexity,
        })
    }

    /// Streaming mode: spawn the run and hand back its event channel.
    pub fn stream(self: &Arc<Self>, request: QueryRequest) -> StagedRun {
        let (tx, events) = mpsc::channel(self.channel_capacity);
        let pipeline = Arc::clone(self);
        let outcome = tokio::spawn(async move { pipeline.drive(request, tx).await });
        StagedRun { events, outcome }
    }

    async fn drive(
        &self,
        request: QueryRequest,
        tx: mpsc::Sender<StagedEvent>,
    ) -> Result<StreamOutcome, QueryError> {
        let mut machine = PhaseMachine::new();
        let mut conn: Option<Arc<PooledConnection>> = None;

        match self.drive_stages(&request, &mut machine, &mut conn, &tx).await {
            Ok(()) => {
                debug!("Stream for session {} completed", request.session_id);
                Ok(StreamOutcome::Completed)
            }
            Err(Halt::Disconnected) => {
                info!(
                    "Client of session {} disconnected during {:?}",
                    request.session_id,
                    machine.current()
                );
                if let Some(conn) = conn {
                    if let Ok(mut lease) = conn.lease().await {
                        rollback_quietly(lease.session()).await;
                    }
                }
                Ok(StreamOutcome::Disconnected)
            }
            Err(Halt::Failed(err)) => {
                warn!(
                    "Stream for session {} failed during {:?}: {}",
                    request.session_id,
                    machine.current(),
                    err
                );
                if let Some(event) = machine.fail(err.to_string()) {
                    let _ = tx.send(event).await;
                }
                Err(err)
            }
        }
    }

    async fn drive_stages(
        &self,
        request: &QueryRequest,
        machine: &mut PhaseMachine,
        slot: &mut Option<Arc<PooledConnection>>,
        tx: &mpsc::Sender<StagedEvent>,
    ) -> Result<(), Halt> {
        enter(machine, Phase::Preparing, tx).await?;
        let conn = self.sessions.acquire(&request.session_id, &request.config).await?;
        *slot = Some(conn.clone());

        enter(machine, Phase::Parsing, tx).await?;
        let history = self.sessions.history(&request.session_id);
        let sql = self
            .synthesizer
            .synthesize(&request.question, &history, Some(&conn))
            .await?;
        emit(tx, StagedEvent::Sql(sql.to_string())).await?;

        enter(machine, Phase::Executing, tx).await?;
        let outcome = execute_on(&conn, &sql).await?;

        enter(machine, Phase::Processing, tx).await?;
        let results = outcome.into_rows();
        emit(tx, StagedEvent::Results(results.clone())).await?;
        self.sessions
            .record_turn(&request.session_id, ConversationTurn::new(request.question.as_str(), sql.as_str()));

        enter(machine, Phase::Explaining, tx).await?;
        let mut chunks = self
            .explainer
            .explain_stream(&request.question, sql.as_str(), &results);
        while let Some(chunk) = chunks.next().await {
            emit(tx, StagedEvent::AnswerChunk(chunk)).await?;
        }

        enter(machine, Phase::Done, tx).await?;
        emit(tx, StagedEvent::Done).await
    }
}

async fn execute_on(conn: &PooledConnection, sql: &SynthesizedQuery) -> Result<QueryOutcome, QueryError> {
    let mut lease = conn.lease().await.map_err(|_| QueryError::ConnectionRequired)?;
    execute_query(lease.session(), sql.as_str()).await
}

async fn emit(tx: &mpsc::Sender<StagedEvent>, event: StagedEvent) -> Result<(), Halt> {
    tx.send(event).await.map_err(|_| Halt::Disconnected)
}

async fn enter(machine: &mut PhaseMachine, phase: Phase, tx: &mpsc::Sender<StagedEvent>) -> Result<(), Halt> {
    match machine.advance(phase) {
        Ok(event) => emit(tx, event).await,
        Err(e) => {
            error!("{}", e);
            Err(Halt::Failed(QueryError::Execution(e.to_string())))
        }
    }
}
