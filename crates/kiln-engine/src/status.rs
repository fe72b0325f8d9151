use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use kiln_builder::LogSink;
use kiln_bus::{stream_key, LogStream};
use kiln_domain::{Condition, OrgId, ResourceKind};
use kiln_store::StatusPatch;

use crate::config::EngineConfig;
use crate::service::ResourceService;

enum Command {
    Condition(Condition),
    Finalize(Condition, oneshot::Sender<()>),
}

/// Per-task status loop: ingests worker log bytes, publishes them to the live
/// stream, keeps a bounded line tail, periodically persists the tail plus the
/// liveness heartbeat, and writes conditions through the service with
/// identical-write suppression.
///
/// `finalize` drains pending logs, forces a last flush, writes the terminal
/// condition and closes the stream with the sentinel; anything arriving after
/// that is dropped.
pub(crate) struct StatusUpdater {
    sink: LogSink,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl StatusUpdater {
    pub(crate) fn spawn(
        service: Arc<ResourceService>,
        stream: Arc<dyn LogStream>,
        org_id: OrgId,
        kind: ResourceKind,
        name: String,
        config: EngineConfig,
    ) -> Self {
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            service,
            stream,
            key: stream_key(kind, &org_id, &name),
            org_id,
            kind,
            name,
            max_lines: config.log_tail_lines,
            tail: VecDeque::new(),
            partial: String::new(),
            tail_dirty: false,
            last_written: None,
            flush_interval: config.last_seen_interval,
        };
        tokio::spawn(worker.run(log_rx, cmd_rx));
        StatusUpdater { sink: LogSink::new(log_tx), cmd_tx }
    }

    pub(crate) fn sink(&self) -> LogSink {
        self.sink.clone()
    }

    /// Write-through condition update; identical consecutive writes are
    /// suppressed.
    pub(crate) fn update_condition(&self, condition: Condition) {
        let _ = self.cmd_tx.send(Command::Condition(condition));
    }

    /// Terminal condition write plus teardown. Resolves once the final flush
    /// and the stream close are done.
    pub(crate) async fn finalize(self, condition: Condition) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Finalize(condition, tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

struct Worker {
    service: Arc<ResourceService>,
    stream: Arc<dyn LogStream>,
    key: String,
    org_id: OrgId,
    kind: ResourceKind,
    name: String,
    max_lines: usize,
    tail: VecDeque<String>,
    partial: String,
    tail_dirty: bool,
    last_written: Option<Condition>,
    flush_interval: std::time::Duration,
}

impl Worker {
    async fn run(
        mut self,
        mut log_rx: mpsc::UnboundedReceiver<Vec<u8>>,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut flush = tokio::time::interval(self.flush_interval);
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The interval's first tick fires immediately, which seeds the
        // heartbeat right at task start — a resource can only sit without
        // lastSeen while no worker ever owned it.

        loop {
            tokio::select! {
                Some(chunk) = log_rx.recv() => self.ingest(chunk).await,
                _ = flush.tick() => self.flush().await,
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Condition(condition)) => self.write_condition(condition).await,
                    Some(Command::Finalize(condition, ack)) => {
                        // Drain whatever the task logged before it finished.
                        while let Ok(chunk) = log_rx.try_recv() {
                            self.ingest(chunk).await;
                        }
                        self.tail_dirty = true;
                        self.flush().await;
                        self.write_condition(condition).await;
                        if let Err(e) = self.stream.close(&self.key).await {
                            warn!(key = %self.key, error = %e, "failed to close log stream");
                        }
                        let _ = ack.send(());
                        return;
                    }
                    None => return,
                },
            }
        }
    }

    async fn ingest(&mut self, chunk: Vec<u8>) {
        if let Err(e) = self.stream.append(&self.key, chunk.clone()).await {
            warn!(key = %self.key, error = %e, "failed to append to log stream");
        }
        self.partial.push_str(&String::from_utf8_lossy(&chunk));
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            self.tail.push_back(line.trim_end_matches('\n').to_string());
            while self.tail.len() > self.max_lines {
                self.tail.pop_front();
            }
            self.tail_dirty = true;
        }
    }

    /// Persist the bounded tail and refresh the heartbeat. A missing row
    /// means the resource was deleted mid-run; the loop keeps going and the
    /// task's cancellation signal tears it down.
    async fn flush(&mut self) {
        if self.tail_dirty {
            let mut tail: String = self
                .tail
                .iter()
                .map(|l| l.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            if !tail.is_empty() {
                tail.push('\n');
            }
            let patch = StatusPatch::default().with_log_tail(tail);
            match self
                .service
                .patch_status(&self.org_id, self.kind, &self.name, patch)
                .await
            {
                Ok(_) => self.tail_dirty = false,
                Err(e) => debug!(name = %self.name, error = %e, "log tail flush skipped"),
            }
        }
        if let Err(e) = self
            .service
            .update_last_seen(&self.org_id, self.kind, &self.name, Utc::now())
            .await
        {
            debug!(name = %self.name, error = %e, "heartbeat skipped");
        }
    }

    async fn write_condition(&mut self, condition: Condition) {
        if self.last_written.as_ref() == Some(&condition) {
            return;
        }
        match self
            .service
            .patch_status(
                &self.org_id,
                self.kind,
                &self.name,
                StatusPatch::condition(condition.clone()),
            )
            .await
        {
            Ok(_) => self.last_written = Some(condition),
            Err(e) => warn!(name = %self.name, error = %e, "condition write failed"),
        }
    }
}
