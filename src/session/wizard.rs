//! A wizard session: persisted store, deadline watchdog and navigation
//! wired together for one flow.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Duration;

use super::clock::{humanize_remaining, Clock};
use super::error::WizardError;
use super::navigation::{Navigator, Route};
use super::payload::{SessionPayload, SessionStart};
use super::steps::WizardStep;
use super::store::{DeviceState, PersistedSession, SessionPatch, SessionStore};
use super::watchdog::{DeadlineWatchdog, WatchdogState};
use crate::storage::SessionStorage;

fn lock(store: &Mutex<SessionStore>) -> MutexGuard<'_, SessionStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct WizardSession<S: WizardStep> {
    store: Arc<Mutex<SessionStore>>,
    watchdog: DeadlineWatchdog,
    navigator: Navigator,
    clock: Arc<dyn Clock>,
    _steps: PhantomData<S>,
}

impl<S: WizardStep> std::fmt::Debug for WizardSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WizardSession")
            .field("store", &*lock(&self.store))
            .field("watchdog", &self.watchdog)
            .field("route", &self.navigator.current())
            .finish_non_exhaustive()
    }
}

impl<S: WizardStep> WizardSession<S> {
    /// Rehydrate the session stored under `key` and check its deadline.
    ///
    /// A session whose deadline already passed is reset and the navigator is
    /// sent to [`Route::SessionExpired`] before this returns.
    pub fn open(
        key: &str,
        storage: Arc<dyn SessionStorage>,
        navigator: Navigator,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, WizardError> {
        let store = SessionStore::rehydrate(key, S::steps_max(), storage)?;
        let mut session = Self {
            store: Arc::new(Mutex::new(store)),
            watchdog: DeadlineWatchdog::new(),
            navigator,
            clock,
            _steps: PhantomData,
        };
        session.evaluate()?;
        Ok(session)
    }

    /// Begin a new session from a validated start response
    pub fn start(&mut self, start: SessionStart) -> Result<WatchdogState, WizardError> {
        // the previous session's timer must not fire into the new one
        self.watchdog.cancel();
        lock(&self.store).init(start.payload, start.deadline)?;
        self.evaluate()
    }

    /// Re-arm the watchdog against the stored deadline
    pub fn evaluate(&mut self) -> Result<WatchdogState, WizardError> {
        let deadline = lock(&self.store).session_end();
        let store = Arc::clone(&self.store);
        let navigator = self.navigator.clone();

        self.watchdog.arm(deadline, self.clock.now(), move || {
            navigator.navigate(Route::SessionExpired);
            let mut store = lock(&store);
            if let Err(e) = store.reset() {
                tracing::warn!(key = %store.key(), error = %e, "failed to reset expired session");
            }
        })
    }

    fn ensure_live(&mut self) -> Result<(), WizardError> {
        match self.evaluate()? {
            WatchdogState::Expired => Err(WizardError::SessionExpired),
            WatchdogState::Inert | WatchdogState::Armed(_) => Ok(()),
        }
    }

    /// Advance one step. `Ok(false)` when already on the last step.
    pub fn next(&mut self) -> Result<bool, WizardError> {
        self.ensure_live()?;
        Ok(lock(&self.store).next()?)
    }

    /// Go back one step. `Ok(false)` when already on the first step.
    pub fn previous(&mut self) -> Result<bool, WizardError> {
        self.ensure_live()?;
        Ok(lock(&self.store).previous()?)
    }

    /// Jump to `step`
    pub fn go_to(&mut self, step: S) -> Result<(), WizardError> {
        self.ensure_live()?;
        let index = step.index();
        let mut store = lock(&self.store);
        if store.go_to(index)? {
            Ok(())
        } else {
            Err(WizardError::StepOutOfRange {
                step: index,
                steps_max: store.steps_max(),
            })
        }
    }

    pub fn set_state(&mut self, patch: SessionPatch) -> Result<(), WizardError> {
        Ok(lock(&self.store).set_state(patch)?)
    }

    pub fn set_device(&mut self, device: DeviceState) -> Result<(), WizardError> {
        self.set_state(SessionPatch {
            device: Some(Some(device)),
            ..SessionPatch::default()
        })
    }

    /// Cancel the watchdog and clear the session
    pub fn reset(&mut self) -> Result<(), WizardError> {
        self.watchdog.cancel();
        Ok(lock(&self.store).reset()?)
    }

    /// Finish the flow: clear the session and navigate to [`Route::Completed`]
    pub fn complete(&mut self) -> Result<(), WizardError> {
        self.reset()?;
        self.navigator.navigate(Route::Completed);
        Ok(())
    }

    pub fn step_index(&self) -> usize {
        lock(&self.store).step()
    }

    /// The step to render; `None` when the stored index has no registered step
    pub fn current_step(&self) -> Option<S> {
        S::at(self.step_index())
    }

    pub fn payload(&self) -> Option<SessionPayload> {
        lock(&self.store).payload().cloned()
    }

    pub fn device(&self) -> Option<DeviceState> {
        lock(&self.store).device().cloned()
    }

    pub fn is_started(&self) -> bool {
        lock(&self.store).payload().is_some()
    }

    pub fn snapshot(&self) -> PersistedSession {
        lock(&self.store).snapshot()
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn watchdog_armed(&self) -> bool {
        self.watchdog.is_armed()
    }

    /// Time until the deadline; negative once it has passed
    pub fn time_left(&self) -> Option<Duration> {
        let end = lock(&self.store).session_end()?;
        Some(end - self.clock.now())
    }

    pub fn time_left_display(&self) -> String {
        humanize_remaining(self.time_left())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::enrollment_response;
    use crate::session::clock::FixedClock;
    use crate::session::steps::EnrollmentStep;
    use crate::storage::MemoryStorage;
    use chrono::{TimeZone, Utc};

    const KEY: &str = "enrollment-storage";

    fn setup() -> (MemoryStorage, Navigator, FixedClock) {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap());
        (MemoryStorage::new(), Navigator::new(Route::Enrollment), clock)
    }

    fn open(
        storage: &MemoryStorage,
        nav: &Navigator,
        clock: &FixedClock,
    ) -> WizardSession<EnrollmentStep> {
        WizardSession::open(
            KEY,
            Arc::new(storage.clone()),
            nav.clone(),
            Arc::new(clock.clone()),
        )
        .unwrap()
    }

    fn start_in(clock: &FixedClock, secs: i64) -> SessionStart {
        let deadline = clock.now() + Duration::seconds(secs);
        SessionStart::try_from(enrollment_response(Some(deadline.timestamp()))).unwrap()
    }

    #[tokio::test]
    async fn test_open_empty_session() {
        let (storage, nav, clock) = setup();
        let session = open(&storage, &nav, &clock);

        assert!(!session.is_started());
        assert_eq!(session.current_step(), Some(EnrollmentStep::Welcome));
        assert_eq!(session.time_left_display(), "not set");
        assert!(!session.watchdog_armed());
    }

    #[tokio::test]
    async fn test_start_arms_watchdog() {
        let (storage, nav, clock) = setup();
        let mut session = open(&storage, &nav, &clock);

        let state = session.start(start_in(&clock, 600)).unwrap();
        assert_eq!(state, WatchdogState::Armed(std::time::Duration::from_secs(600)));
        assert!(session.watchdog_armed());
        assert_eq!(session.time_left_display(), "10 minutes");
    }

    /// Storage that can be switched to refuse writes
    #[derive(Clone, Default)]
    struct FlakyStorage {
        inner: MemoryStorage,
        refuse_writes: Arc<std::sync::atomic::AtomicBool>,
    }

    impl SessionStorage for FlakyStorage {
        fn load(&self, key: &str) -> anyhow::Result<Option<String>> {
            self.inner.load(key)
        }

        fn save(&self, key: &str, value: &str) -> anyhow::Result<()> {
            if self.refuse_writes.load(std::sync::atomic::Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            self.inner.save(key, value)
        }

        fn remove(&self, key: &str) -> anyhow::Result<()> {
            self.inner.remove(key)
        }
    }

    #[tokio::test]
    async fn test_restart_cancels_old_timer_before_init() {
        let (_storage, nav, clock) = setup();
        let storage = FlakyStorage::default();
        let mut session: WizardSession<EnrollmentStep> = WizardSession::open(
            KEY,
            Arc::new(storage.clone()),
            nav.clone(),
            Arc::new(clock.clone()),
        )
        .unwrap();
        session.start(start_in(&clock, 600)).unwrap();
        assert!(session.watchdog_armed());

        storage
            .refuse_writes
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let err = session.start(start_in(&clock, 900)).unwrap_err();
        assert!(matches!(err, WizardError::Storage(_)));
        assert!(!session.watchdog_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_pending_deadline() {
        let (storage, nav, clock) = setup();
        let mut session = open(&storage, &nav, &clock);
        session.start(start_in(&clock, 10)).unwrap();
        session.start(start_in(&clock, 600)).unwrap();

        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        assert_eq!(nav.current(), Route::Enrollment);
        assert!(session.is_started());
    }

    #[tokio::test]
    async fn test_step_operations_on_expired_session() {
        let (storage, nav, clock) = setup();
        let mut session = open(&storage, &nav, &clock);
        session.start(start_in(&clock, 60)).unwrap();
        session.next().unwrap();

        clock.advance(Duration::seconds(61));
        let err = session.next().unwrap_err();
        assert!(matches!(err, WizardError::SessionExpired));
        assert_eq!(nav.current(), Route::SessionExpired);
        assert_eq!(session.step_index(), 0);
        assert!(!session.is_started());
    }

    #[tokio::test]
    async fn test_go_to_and_back() {
        let (storage, nav, clock) = setup();
        let mut session = open(&storage, &nav, &clock);
        session.start(start_in(&clock, 600)).unwrap();

        session.go_to(EnrollmentStep::Device).unwrap();
        assert_eq!(session.current_step(), Some(EnrollmentStep::Device));
        assert!(session.previous().unwrap());
        assert_eq!(session.current_step(), Some(EnrollmentStep::Password));
    }

    #[tokio::test]
    async fn test_complete_navigates_and_clears() {
        let (storage, nav, clock) = setup();
        let mut session = open(&storage, &nav, &clock);
        session.start(start_in(&clock, 600)).unwrap();
        session.go_to(EnrollmentStep::Finish).unwrap();

        session.complete().unwrap();
        assert_eq!(nav.current(), Route::Completed);
        assert!(!session.watchdog_armed());
        assert_eq!(session.snapshot().step, 0);
        assert!(session.snapshot().payload.is_none());
    }

    #[tokio::test]
    async fn test_reopen_past_deadline_expires_immediately() {
        let (storage, nav, clock) = setup();
        {
            let mut session = open(&storage, &nav, &clock);
            session.start(start_in(&clock, 120)).unwrap();
            session.next().unwrap();
        }

        clock.advance(Duration::minutes(5));
        let session = open(&storage, &nav, &clock);
        assert_eq!(nav.current(), Route::SessionExpired);
        assert!(!session.is_started());
        assert_eq!(session.step_index(), 0);
    }
}
