//! Multi-step wizard sessions with a server-imposed deadline.

pub mod clock;
pub mod error;
pub mod navigation;
pub mod payload;
pub mod steps;
pub mod store;
pub mod watchdog;
pub mod wizard;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{PayloadError, WizardError};
pub use navigation::{Navigator, Route};
pub use payload::{EnrollmentPayload, PasswordResetPayload, SessionPayload, SessionStart};
pub use steps::{EnrollmentStep, PasswordResetStep, WizardStep};
pub use store::{DeviceState, PersistedSession, SessionPatch, SessionStore, SNAPSHOT_VERSION};
pub use watchdog::{DeadlineWatchdog, WatchdogState};
pub use wizard::WizardSession;
