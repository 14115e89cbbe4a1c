use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("sync queue is full")]
    QueueFull,

    #[error("worker channel closed")]
    ChannelClosed,
}
