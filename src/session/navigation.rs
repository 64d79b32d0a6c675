//! Routes outside the wizard steps and the channel that announces them.

use std::fmt;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Home,
    Enrollment,
    PasswordReset,
    /// Terminal: the session deadline passed
    SessionExpired,
    /// Terminal: the flow finished
    Completed,
    /// Terminal: the start token was rejected
    LinkInvalid,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Home => "/",
            Route::Enrollment => "/enrollment",
            Route::PasswordReset => "/password-reset",
            Route::SessionExpired => "/session-end",
            Route::Completed => "/finish",
            Route::LinkInvalid => "/link-invalid",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Route::SessionExpired | Route::Completed | Route::LinkInvalid
        )
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Current-route holder. Clones share the channel.
#[derive(Debug, Clone)]
pub struct Navigator {
    tx: watch::Sender<Route>,
}

impl Navigator {
    pub fn new(initial: Route) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> Route {
        *self.tx.borrow()
    }

    /// Replace the current route. Navigating to the current route does not
    /// notify subscribers. Returns whether the route changed.
    pub fn navigate(&self, route: Route) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == route {
                false
            } else {
                *current = route;
                true
            }
        });
        if changed {
            tracing::info!(route = %route, "navigated");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<Route> {
        self.tx.subscribe()
    }
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new(Route::Home)
    }
}
