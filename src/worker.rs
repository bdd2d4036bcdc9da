//! Split workers and the pool that feeds them batches of cluster ids.
//!
//! Each worker is a tokio task owning its own store connection. It only
//! talks to the outside world through two channels: commands in, replies
//! out. The messages are serde tagged so they can cross a process boundary
//! unchanged.

use crate::config::SplitOptions;
use crate::sink::OutputSink;
use crate::split::Split;
use crate::store::{ClusterStore, ConnectionParams, StoreConnector};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerCommand {
    Init {
        connection: ConnectionParams,
        options: SplitOptions,
    },
    /// Network cluster ids; `None` entries are counted but never fetched
    Batch { ids: Vec<Option<i64>> },
    Terminate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReply {
    Ready {
        worker_id: usize,
    },
    BatchResult {
        worker_id: usize,
        error: Option<String>,
        job_count: usize,
    },
    Terminated {
        worker_id: usize,
    },
    /// The worker could not continue and has exited
    Fatal {
        worker_id: usize,
        error: String,
    },
}

enum WorkerState<S> {
    Uninitialized,
    Ready { store: Arc<S>, split: Split },
    Terminated,
}

pub struct Worker<C: StoreConnector> {
    id: usize,
    connector: C,
    sink: Arc<OutputSink>,
    state: WorkerState<C::Store>,
}

impl<C: StoreConnector> Worker<C> {
    pub fn new(id: usize, connector: C, sink: Arc<OutputSink>) -> Self {
        Self {
            id,
            connector,
            sink,
            state: WorkerState::Uninitialized,
        }
    }

    pub async fn handle_init(
        &mut self,
        connection: &ConnectionParams,
        options: SplitOptions,
    ) -> WorkerReply {
        let store = match self.connector.connect(connection).await {
            Ok(store) => store,
            Err(err) => {
                error!(worker_id = self.id, "could not connect to store: {}", err);
                self.state = WorkerState::Terminated;
                return WorkerReply::Fatal {
                    worker_id: self.id,
                    error: err.to_string(),
                };
            }
        };

        if let WorkerState::Ready { store: previous, .. } = &self.state {
            previous.close().await;
        }

        self.state = WorkerState::Ready {
            store: Arc::new(store),
            split: Split::with_defaults(options, Arc::clone(&self.sink)),
        };

        debug!(worker_id = self.id, "worker ready");
        WorkerReply::Ready { worker_id: self.id }
    }

    /// Process every cluster in the batch, at most `jobs` at a time.
    /// A failing cluster never stops its siblings; the error reported is the
    /// one for the earliest failing id in the batch.
    pub async fn handle_batch(&self, ids: &[Option<i64>]) -> WorkerReply {
        let WorkerState::Ready { store, split } = &self.state else {
            warn!(worker_id = self.id, "batch received before init");
            return WorkerReply::BatchResult {
                worker_id: self.id,
                error: Some(format!("worker {} is not initialised", self.id)),
                job_count: ids.len(),
            };
        };

        let jobs = split.options().jobs.max(1);

        let pending: Vec<_> = ids
            .iter()
            .enumerate()
            .filter_map(|(position, id)| id.map(|id| (position, id)))
            .map(|(position, id)| {
                let store = Arc::clone(store);
                let split = split.clone();
                let worker_id = self.id;
                async move {
                    let result = match store.fetch_split_feat(id).await {
                        Ok(feat) => split.process(feat).await.map_err(|err| err.to_string()),
                        Err(err) if err.is_malformed() => {
                            warn!(worker_id, cluster_id = id, "skipping cluster: {}", err);
                            Ok(0)
                        }
                        Err(err) => Err(err.to_string()),
                    };
                    (position, result)
                }
            })
            .collect();

        let results: Vec<(usize, Result<usize, String>)> = futures::stream::iter(pending)
            .buffer_unordered(jobs)
            .collect()
            .await;

        let first_error = results
            .into_iter()
            .filter_map(|(position, result)| result.err().map(|err| (position, err)))
            .inspect(|(position, err)| {
                warn!(worker_id = self.id, position, "cluster failed: {}", err);
            })
            .min_by_key(|(position, _)| *position)
            .map(|(_, err)| err);

        WorkerReply::BatchResult {
            worker_id: self.id,
            error: first_error,
            job_count: ids.len(),
        }
    }

    pub async fn handle_terminate(&mut self) -> WorkerReply {
        if let WorkerState::Ready { store, .. } = &self.state {
            store.close().await;
        }
        self.state = WorkerState::Terminated;

        debug!(worker_id = self.id, "worker terminated");
        WorkerReply::Terminated { worker_id: self.id }
    }

    /// Serve commands until terminated, fatally failed or orphaned
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<WorkerCommand>,
        replies: mpsc::Sender<WorkerReply>,
    ) {
        while let Some(command) = commands.recv().await {
            let reply = match command {
                WorkerCommand::Init {
                    connection,
                    options,
                } => self.handle_init(&connection, options).await,
                WorkerCommand::Batch { ids } => self.handle_batch(&ids).await,
                WorkerCommand::Terminate => self.handle_terminate().await,
            };

            if replies.send(reply).await.is_err() {
                warn!(worker_id = self.id, "reply channel closed");
                break;
            }

            if matches!(self.state, WorkerState::Terminated) {
                break;
            }
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum PoolError {
    #[error("worker {worker_id} failed: {error}")]
    Fatal { worker_id: usize, error: String },
    #[error("worker channel closed unexpectedly")]
    ChannelClosed,
    #[error("worker task panicked: {0}")]
    WorkerPanicked(String),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoolSummary {
    pub batches: usize,
    pub jobs: usize,
    pub errors: Vec<String>,
}

/// Split a list of cluster ids into batches of at most `size`
pub fn chunk_batches(ids: &[i64], size: usize) -> Vec<Vec<Option<i64>>> {
    ids.chunks(size.max(1))
        .map(|chunk| chunk.iter().copied().map(Some).collect())
        .collect()
}

pub struct WorkerPool {
    commands: Vec<mpsc::Sender<WorkerCommand>>,
    replies: mpsc::Receiver<WorkerReply>,
    tasks: JoinSet<()>,
}

impl WorkerPool {
    /// Spawn `size` workers and wait until every one of them is connected
    pub async fn start<C: StoreConnector>(
        size: usize,
        connector: C,
        connection: ConnectionParams,
        options: SplitOptions,
        sink: Arc<OutputSink>,
    ) -> Result<Self, PoolError> {
        let size = size.max(1);
        let (reply_tx, replies) = mpsc::channel(size * 2);
        let mut tasks = JoinSet::new();
        let mut commands = Vec::with_capacity(size);

        for worker_id in 0..size {
            let (command_tx, command_rx) = mpsc::channel(2);
            let worker = Worker::new(worker_id, connector.clone(), Arc::clone(&sink));
            tasks.spawn(worker.run(command_rx, reply_tx.clone()));
            commands.push(command_tx);
        }
        drop(reply_tx);

        let mut pool = Self {
            commands,
            replies,
            tasks,
        };

        for worker_id in 0..size {
            pool.send(
                worker_id,
                WorkerCommand::Init {
                    connection: connection.clone(),
                    options: options.clone(),
                },
            )
            .await?;
        }

        let mut ready = 0;
        while ready < size {
            match pool.replies.recv().await {
                Some(WorkerReply::Ready { .. }) => ready += 1,
                Some(WorkerReply::Fatal { worker_id, error }) => {
                    pool.shutdown().await;
                    return Err(PoolError::Fatal { worker_id, error });
                }
                Some(other) => debug!(?other, "unexpected reply during start up"),
                None => return Err(PoolError::ChannelClosed),
            }
        }

        info!(workers = size, "worker pool ready");
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.commands.len()
    }

    async fn send(&self, worker_id: usize, command: WorkerCommand) -> Result<(), PoolError> {
        let sender = self
            .commands
            .get(worker_id)
            .ok_or(PoolError::ChannelClosed)?;
        sender
            .send(command)
            .await
            .map_err(|_| PoolError::ChannelClosed)
    }

    /// Hand out batches to whichever worker reports back first until all
    /// batches are done
    pub async fn run(
        &mut self,
        batches: impl IntoIterator<Item = Vec<Option<i64>>>,
    ) -> Result<PoolSummary, PoolError> {
        let mut batches = batches.into_iter();
        let mut summary = PoolSummary::default();
        let mut in_flight = 0;

        for worker_id in 0..self.size() {
            let Some(ids) = batches.next() else {
                break;
            };
            self.send(worker_id, WorkerCommand::Batch { ids }).await?;
            in_flight += 1;
        }

        while in_flight > 0 {
            let reply = tokio::select! {
                biased;
                reply = self.replies.recv() => reply,
                Some(joined) = self.tasks.join_next() => {
                    if let Err(err) = joined {
                        error!("worker task panicked: {}", err);
                        return Err(PoolError::WorkerPanicked(err.to_string()));
                    }
                    // a worker that exited cleanly has already sent its last reply
                    continue;
                }
            };

            match reply {
                Some(WorkerReply::BatchResult {
                    worker_id,
                    error,
                    job_count,
                }) => {
                    in_flight -= 1;
                    summary.batches += 1;
                    summary.jobs += job_count;

                    if let Some(error) = error {
                        warn!(worker_id, "batch finished with error: {}", error);
                        summary.errors.push(error);
                    }

                    if let Some(ids) = batches.next() {
                        self.send(worker_id, WorkerCommand::Batch { ids }).await?;
                        in_flight += 1;
                    }

                    if summary.batches % 100 == 0 {
                        info!(batches = summary.batches, jobs = summary.jobs, "progress");
                    }
                }
                Some(WorkerReply::Fatal { worker_id, error }) => {
                    return Err(PoolError::Fatal { worker_id, error });
                }
                Some(other) => debug!(?other, "unexpected reply while running"),
                None => return Err(self.closed_cause().await),
            }
        }

        Ok(summary)
    }

    /// Every worker dropped its reply sender; a panicking task drops it too
    async fn closed_cause(&mut self) -> PoolError {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                error!("worker task panicked: {}", err);
                return PoolError::WorkerPanicked(err.to_string());
            }
        }
        PoolError::ChannelClosed
    }

    /// Terminate every worker and wait for their tasks to finish
    pub async fn shutdown(mut self) {
        for sender in &self.commands {
            // a worker that already exited has dropped its receiver
            let _ = sender.send(WorkerCommand::Terminate).await;
        }
        self.commands.clear();

        while let Some(reply) = self.replies.recv().await {
            if let WorkerReply::Terminated { worker_id } = reply {
                debug!(worker_id, "worker stopped");
            }
        }

        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                error!("worker task panicked: {}", err);
            }
        }
    }
}
