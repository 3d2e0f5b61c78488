use crate::catchup::{
    CatchUpReply, CatchUpSession, CatchUpSummary, EntrySink, ReplicationRequest,
    ReplicationRequestHandler,
};
use crate::log_reader::LogStreamReader;
use tdm_core::{PartitionId, Result, TandemError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub struct CatchUpCall {
    pub request: ReplicationRequest,
    pub reply_tx: oneshot::Sender<Result<CatchUpReply>>,
}

/// Owns one partition's request handler and serves requests strictly one at
/// a time on a blocking worker thread.
pub struct CatchUpActor<R> {
    partition: PartitionId,
    handler: ReplicationRequestHandler<R>,
    request_rx: mpsc::Receiver<CatchUpCall>,
}

impl<R> CatchUpActor<R>
where
    R: LogStreamReader + Send + 'static,
{
    pub fn new(
        partition: PartitionId,
        handler: ReplicationRequestHandler<R>,
        request_rx: mpsc::Receiver<CatchUpCall>,
    ) -> Self {
        Self {
            partition,
            handler,
            request_rx,
        }
    }

    /// Create the channel, spawn the actor and return a handle to it.
    pub fn start(
        partition: PartitionId,
        handler: ReplicationRequestHandler<R>,
        channel_capacity: usize,
    ) -> (CatchUpHandle, JoinHandle<()>) {
        let (tx, rx) = create_catch_up_channel(channel_capacity);
        let actor = Self::new(partition, handler, rx);
        (CatchUpHandle { request_tx: tx }, actor.spawn())
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::task::spawn_blocking(move || self.run_blocking())
    }

    /// Serve requests until every handle is dropped.
    pub fn run_blocking(mut self) {
        tracing::info!(
            target: "tandem::catchup",
            partition = self.partition.get(),
            buffer_capacity = self.handler.buffer_capacity(),
            "Catch-up actor started"
        );

        while let Some(call) = self.request_rx.blocking_recv() {
            let result = self.handler.handle(&call.request);
            if let Err(e) = &result {
                tracing::warn!(
                    target: "tandem::catchup",
                    partition = self.partition.get(),
                    from_position = call.request.from_position,
                    error = %e,
                    "Catch-up request failed"
                );
            }
            let _ = call.reply_tx.send(result);
        }

        tracing::info!(
            target: "tandem::catchup",
            partition = self.partition.get(),
            "Catch-up actor shutting down"
        );
    }

    #[inline]
    #[must_use]
    pub fn partition(&self) -> PartitionId {
        self.partition
    }
}

/// Async client for a running [`CatchUpActor`].
#[derive(Debug, Clone)]
pub struct CatchUpHandle {
    request_tx: mpsc::Sender<CatchUpCall>,
}

impl CatchUpHandle {
    pub async fn request(&self, request: ReplicationRequest) -> Result<CatchUpReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(CatchUpCall { request, reply_tx })
            .await
            .map_err(|_| TandemError::ChannelDisconnected("catch-up actor"))?;
        reply_rx
            .await
            .map_err(|_| TandemError::ChannelDisconnected("catch-up reply"))?
    }

    /// Run `session` to completion against the actor, appending to `sink`.
    pub async fn catch_up<S>(
        &self,
        session: &mut CatchUpSession,
        sink: &mut S,
    ) -> Result<CatchUpSummary>
    where
        S: EntrySink + ?Sized,
    {
        while !session.is_done() {
            let reply = self.request(session.next_request()).await?;
            session.accept_reply(&reply, sink)?;
        }
        Ok(session.summary())
    }
}

pub fn create_catch_up_channel(
    buffer_size: usize,
) -> (mpsc::Sender<CatchUpCall>, mpsc::Receiver<CatchUpCall>) {
    mpsc::channel(buffer_size)
}
