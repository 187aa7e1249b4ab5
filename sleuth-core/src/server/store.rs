//! In-memory threads and runs.

use crate::error::ServerError;
use crate::research::CitationSegment;
use crate::types::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub run_ids: Vec<Uuid>,
}

/// Lifecycle of a research run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl RunStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Error)
    }
}

/// One research run on a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: Uuid,
    pub thread_id: Uuid,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default)]
    pub sources: Vec<CitationSegment>,
    #[serde(default)]
    pub search_queries: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Threads and runs keyed by id.
#[derive(Debug, Default)]
pub struct ThreadStore {
    threads: HashMap<Uuid, Thread>,
    runs: HashMap<Uuid, Run>,
}

impl ThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_thread(&mut self) -> &Thread {
        let thread_id = Uuid::new_v4();
        self.threads.entry(thread_id).or_insert(Thread {
            thread_id,
            created_at: Utc::now(),
            messages: Vec::new(),
            run_ids: Vec::new(),
        })
    }

    pub fn thread(&self, thread_id: Uuid) -> Result<&Thread, ServerError> {
        self.threads
            .get(&thread_id)
            .ok_or_else(|| ServerError::ThreadNotFound {
                thread_id: thread_id.to_string(),
            })
    }

    fn thread_mut(&mut self, thread_id: Uuid) -> Result<&mut Thread, ServerError> {
        self.threads
            .get_mut(&thread_id)
            .ok_or_else(|| ServerError::ThreadNotFound {
                thread_id: thread_id.to_string(),
            })
    }

    /// Append `input` to the thread and register a pending run.
    ///
    /// Returns the run and the full thread history to research.
    pub fn start_run(
        &mut self,
        thread_id: Uuid,
        input: Vec<Message>,
    ) -> Result<(Run, Vec<Message>), ServerError> {
        let run_id = Uuid::new_v4();
        let thread = self.thread_mut(thread_id)?;
        thread.messages.extend(input);
        thread.run_ids.push(run_id);
        let history = thread.messages.clone();

        let now = Utc::now();
        let run = Run {
            run_id,
            thread_id,
            status: RunStatus::Pending,
            created_at: now,
            updated_at: now,
            answer: None,
            sources: Vec::new(),
            search_queries: Vec::new(),
            error: None,
        };
        self.runs.insert(run_id, run.clone());
        Ok((run, history))
    }

    pub fn run(&self, thread_id: Uuid, run_id: Uuid) -> Result<&Run, ServerError> {
        self.runs
            .get(&run_id)
            .filter(|r| r.thread_id == thread_id)
            .ok_or_else(|| ServerError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    fn run_mut(&mut self, run_id: Uuid) -> Result<&mut Run, ServerError> {
        self.runs
            .get_mut(&run_id)
            .ok_or_else(|| ServerError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    pub fn mark_running(&mut self, run_id: Uuid) -> Result<(), ServerError> {
        let run = self.run_mut(run_id)?;
        run.status = RunStatus::Running;
        run.updated_at = Utc::now();
        Ok(())
    }

    /// Record a successful run and append its answer to the thread.
    pub fn complete_run(
        &mut self,
        run_id: Uuid,
        answer: Message,
        sources: Vec<CitationSegment>,
        search_queries: Vec<String>,
    ) -> Result<Run, ServerError> {
        let run = self.run_mut(run_id)?;
        run.status = RunStatus::Success;
        run.updated_at = Utc::now();
        run.answer = Some(answer.content.clone());
        run.sources = sources;
        run.search_queries = search_queries;
        let (thread_id, run) = (run.thread_id, run.clone());

        self.thread_mut(thread_id)?.messages.push(answer);
        Ok(run)
    }

    pub fn fail_run(&mut self, run_id: Uuid, error: String) -> Result<Run, ServerError> {
        let run = self.run_mut(run_id)?;
        run.status = RunStatus::Error;
        run.updated_at = Utc::now();
        run.error = Some(error);
        Ok(run.clone())
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }
}
