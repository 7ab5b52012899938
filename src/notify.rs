//! Fire-and-forget notifications about student status changes.
//!
//! [`Notifier::emit`] never blocks and never fails from the caller's point of view:
//! messages go onto a channel and a worker task hands them to the sink.

use crate::{data::student::StudentStatus, error::MatriculaResult};
use async_trait::async_trait;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub student_id: Uuid,
    pub nome: String,
    pub from: StudentStatus,
    pub to: StudentStatus,
}

#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn deliver(&self, change: &StatusChange) -> MatriculaResult<()>;
}

/// Writes each change to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, change: &StatusChange) -> MatriculaResult<()> {
        info!(
            student_id = %change.student_id,
            nome = %change.nome,
            from = %change.from,
            to = %change.to,
            "Student status changed"
        );
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Notifier {
    sender: UnboundedSender<StatusChange>,
}

impl Notifier {
    /// Starts the delivery worker. Must be called inside a tokio runtime.
    pub fn spawn(sink: impl NotificationSink) -> Self {
        let (sender, mut receiver) = unbounded_channel::<StatusChange>();

        tokio::spawn(async move {
            while let Some(change) = receiver.recv().await {
                if let Err(e) = sink.deliver(&change).await {
                    warn!(?e, student_id = %change.student_id, "Unable to deliver status notification");
                }
            }
            debug!("Notification worker stopped");
        });

        Self { sender }
    }

    pub fn emit(&self, change: StatusChange) {
        if let Err(e) = self.sender.send(change) {
            warn!(student_id = %e.0.student_id, "Notification worker is gone, dropping status notification");
        }
    }
}
