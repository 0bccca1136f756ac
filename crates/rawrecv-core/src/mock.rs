//! Scripted collaborators for exercising the receiver without a server.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::time::Instant;

use crate::codec::StatusUpdate;
use crate::error::{Error, Result};
use crate::executor::{ApplyOutcome, Executor};
use crate::lsn::LogPosition;
use crate::message::{DataMessage, Keepalive};
use crate::transport::{ReadOutcome, Transport};

/// One scripted result of [`MockTransport::try_read`].
#[derive(Debug, Clone)]
pub enum ReadStep {
    Chunk(Bytes),
    WouldBlock,
    EndOfStream,
    Fail(String),
}

/// A mock replication stream that replays a script of reads.
///
/// Once the script is exhausted every read reports end of stream.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

#[derive(Default)]
struct TransportState {
    script: VecDeque<ReadStep>,
    /// Chunks sent to the source.
    sent: Vec<Bytes>,
    /// If set, every send fails with this error.
    fail_sends: Option<String>,
    /// If set, waiting for input fails with this error.
    fail_waits: Option<String>,
    waits: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send fail.
    pub fn failing_sends(self, error_message: impl Into<String>) -> Self {
        self.state.lock().unwrap().fail_sends = Some(error_message.into());
        self
    }

    /// Make every wait for input fail.
    pub fn failing_waits(self, error_message: impl Into<String>) -> Self {
        self.state.lock().unwrap().fail_waits = Some(error_message.into());
        self
    }

    pub fn push(&self, step: ReadStep) -> &Self {
        self.state.lock().unwrap().script.push_back(step);
        self
    }

    pub fn push_chunk(&self, chunk: impl Into<Bytes>) -> &Self {
        self.push(ReadStep::Chunk(chunk.into()))
    }

    pub fn push_keepalive(&self, end_position: u64, reply_requested: bool) -> &Self {
        self.push_chunk(
            Keepalive {
                end_position: LogPosition::new(end_position),
                send_time: 0,
                reply_requested,
            }
            .encode(),
        )
    }

    pub fn push_data(&self, start_position: u64, end_position: u64, statement: &str) -> &Self {
        self.push_chunk(
            DataMessage {
                start_position: LogPosition::new(start_position),
                end_position: LogPosition::new(end_position),
                send_time: 0,
                payload: Bytes::copy_from_slice(statement.as_bytes()),
            }
            .encode(),
        )
    }

    pub fn push_would_block(&self) -> &Self {
        self.push(ReadStep::WouldBlock)
    }

    pub fn push_end_of_stream(&self) -> &Self {
        self.push(ReadStep::EndOfStream)
    }

    pub fn push_read_failure(&self, error_message: impl Into<String>) -> &Self {
        self.push(ReadStep::Fail(error_message.into()))
    }

    /// All chunks sent so far.
    pub fn sent(&self) -> Vec<Bytes> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Sent chunks decoded as status updates.
    pub fn status_updates(&self) -> Vec<StatusUpdate> {
        self.sent()
            .iter()
            .filter_map(|chunk| StatusUpdate::decode(chunk))
            .collect()
    }

    /// Number of times the receiver waited for input.
    pub fn waits(&self) -> usize {
        self.state.lock().unwrap().waits
    }

    /// Scripted reads not yet consumed.
    pub fn remaining(&self) -> usize {
        self.state.lock().unwrap().script.len()
    }
}

impl Transport for MockTransport {
    fn try_read(&mut self) -> Result<ReadOutcome> {
        let step = self.state.lock().unwrap().script.pop_front();
        match step {
            Some(ReadStep::Chunk(chunk)) => Ok(ReadOutcome::Message(chunk)),
            Some(ReadStep::WouldBlock) => Ok(ReadOutcome::WouldBlock),
            Some(ReadStep::EndOfStream) | None => Ok(ReadOutcome::EndOfStream),
            Some(ReadStep::Fail(error)) => Err(Error::Transport(error)),
        }
    }

    fn wait_for_input(&mut self, _deadline: Instant) -> impl Future<Output = Result<bool>> + Send {
        let state = self.state.clone();
        async move {
            let mut state = state.lock().unwrap();
            state.waits += 1;

            if let Some(ref error) = state.fail_waits {
                return Err(Error::Transport(error.clone()));
            }

            Ok(!state.script.is_empty())
        }
    }

    fn send(&mut self, chunk: Bytes) -> impl Future<Output = Result<()>> + Send {
        let state = self.state.clone();
        async move {
            let mut state = state.lock().unwrap();

            if let Some(ref error) = state.fail_sends {
                return Err(Error::Transport(error.clone()));
            }

            state.sent.push(chunk);
            Ok(())
        }
    }
}

/// A call observed by [`MockExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorCall {
    Begin,
    Apply(String),
    Commit,
}

/// A mock executor that records calls and classifies statements by verb.
#[derive(Clone, Default)]
pub struct MockExecutor {
    state: Arc<Mutex<ExecutorState>>,
}

#[derive(Default)]
struct ExecutorState {
    calls: Vec<ExecutorCall>,
    /// Statements containing any of these fail.
    failing: Vec<String>,
    /// If set, commits fail with this error.
    fail_commit: Option<String>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every statement that contains `pattern`.
    pub fn failing_on(self, pattern: impl Into<String>) -> Self {
        self.state.lock().unwrap().failing.push(pattern.into());
        self
    }

    /// Make every commit fail.
    pub fn failing_commit(self, error_message: impl Into<String>) -> Self {
        self.state.lock().unwrap().fail_commit = Some(error_message.into());
        self
    }

    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Statements passed to `apply`, in order.
    pub fn applied_statements(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ExecutorCall::Apply(statement) => Some(statement),
                _ => None,
            })
            .collect()
    }

    /// Statements grouped by committed transaction.
    pub fn committed_transactions(&self) -> Vec<Vec<String>> {
        let mut transactions = Vec::new();
        let mut current = Vec::new();

        for call in self.calls() {
            match call {
                ExecutorCall::Begin => current.clear(),
                ExecutorCall::Apply(statement) => current.push(statement),
                ExecutorCall::Commit => transactions.push(std::mem::take(&mut current)),
            }
        }

        transactions
    }
}

impl Executor for MockExecutor {
    fn begin(&mut self) -> impl Future<Output = Result<()>> + Send {
        let state = self.state.clone();
        async move {
            state.lock().unwrap().calls.push(ExecutorCall::Begin);
            Ok(())
        }
    }

    fn apply(&mut self, statement: &str) -> impl Future<Output = ApplyOutcome> + Send {
        let state = self.state.clone();
        let statement = statement.to_string();
        async move {
            let mut state = state.lock().unwrap();
            let fails = state.failing.iter().any(|p| statement.contains(p.as_str()));
            let outcome = if fails {
                ApplyOutcome::Failure(format!("simulated failure: {}", statement))
            } else {
                ApplyOutcome::success(&statement)
            };
            state.calls.push(ExecutorCall::Apply(statement));
            outcome
        }
    }

    fn commit(&mut self) -> impl Future<Output = Result<()>> + Send {
        let state = self.state.clone();
        async move {
            let mut state = state.lock().unwrap();

            if let Some(ref error) = state.fail_commit {
                return Err(Error::Executor(error.clone()));
            }

            state.calls.push(ExecutorCall::Commit);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_replays_script() {
        let mut transport = MockTransport::new();
        transport.push_chunk(&b"abc"[..]).push_would_block();

        assert_eq!(transport.try_read().unwrap(), ReadOutcome::Message(Bytes::from_static(b"abc")));
        assert_eq!(transport.try_read().unwrap(), ReadOutcome::WouldBlock);
        assert_eq!(transport.try_read().unwrap(), ReadOutcome::EndOfStream);
        assert_eq!(transport.remaining(), 0);
    }

    #[tokio::test]
    async fn test_mock_transport_records_sends() {
        let mut transport = MockTransport::new();
        transport.send(Bytes::from_static(b"r")).await.unwrap();
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_executor_groups_transactions() {
        let mut executor = MockExecutor::new();
        executor.begin().await.unwrap();
        executor.apply("INSERT INTO t VALUES (1)").await;
        executor.commit().await.unwrap();
        executor.begin().await.unwrap();
        executor.commit().await.unwrap();

        assert_eq!(
            executor.committed_transactions(),
            vec![vec!["INSERT INTO t VALUES (1)".to_string()], vec![]]
        );
    }

    #[tokio::test]
    async fn test_mock_executor_failing() {
        let mut executor = MockExecutor::new().failing_on("oops").failing_commit("disk full");
        assert!(executor.apply("UPDATE oops").await.is_failure());
        assert_eq!(executor.apply("UPDATE fine").await, ApplyOutcome::Update);
        assert!(executor.commit().await.is_err());
    }
}
