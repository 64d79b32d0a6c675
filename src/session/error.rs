use thiserror::Error;

/// Problems with a start response that keep it from becoming a session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("start response has no deadline_timestamp")]
    MissingDeadline,

    #[error("deadline_timestamp {0} is not a valid unix time")]
    InvalidDeadline(i64),
}

#[derive(Error, Debug)]
pub enum WizardError {
    #[error("wizard session has expired")]
    SessionExpired,

    #[error("step {step} is outside 0..={steps_max}")]
    StepOutOfRange { step: usize, steps_max: usize },

    #[error("cannot go back from the current step")]
    BackDisabled,

    #[error("deadline watchdog needs a tokio runtime")]
    NoRuntime,

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("failed to persist wizard session: {0:#}")]
    Storage(#[from] anyhow::Error),
}
