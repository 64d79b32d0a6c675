//! Step registries and step-index arithmetic.
//!
//! A wizard is a fixed, ordered list of steps. The store only keeps the
//! index; the flow's step enum maps the index back to the screen to show.
//! Moving past either end saturates rather than wrapping or failing.

/// An ordered set of wizard screens
pub trait WizardStep: Copy + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    /// All steps, in display order
    fn all() -> &'static [Self];

    fn label(&self) -> &'static str;

    /// The user may not step back from this screen
    fn back_disabled(&self) -> bool {
        false
    }

    /// Navigation controls are not shown on this screen
    fn controls_hidden(&self) -> bool {
        false
    }

    /// Highest valid step index
    fn steps_max() -> usize {
        Self::all().len().saturating_sub(1)
    }

    fn index(&self) -> usize {
        Self::all()
            .iter()
            .position(|s| s == self)
            .unwrap_or_default()
    }

    /// Step registered at `index`; `None` when out of range so callers
    /// render nothing instead of failing
    fn at(index: usize) -> Option<Self> {
        Self::all().get(index).copied()
    }
}

/// `step + 1`, saturating at `steps_max`
pub fn next_index(step: usize, steps_max: usize) -> usize {
    if step < steps_max {
        step + 1
    } else {
        step
    }
}

/// `step - 1`, saturating at 0
pub fn previous_index(step: usize) -> usize {
    step.saturating_sub(1)
}

/// Guarded jump: `Some(target)` only when it lies within `0..=steps_max`
pub fn checked_index(target: usize, steps_max: usize) -> Option<usize> {
    (target <= steps_max).then_some(target)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentStep {
    Welcome,
    DataVerification,
    Password,
    Device,
    Finish,
}

impl WizardStep for EnrollmentStep {
    fn all() -> &'static [Self] {
        &[
            EnrollmentStep::Welcome,
            EnrollmentStep::DataVerification,
            EnrollmentStep::Password,
            EnrollmentStep::Device,
            EnrollmentStep::Finish,
        ]
    }

    fn label(&self) -> &'static str {
        match self {
            EnrollmentStep::Welcome => "Welcome",
            EnrollmentStep::DataVerification => "Data verification",
            EnrollmentStep::Password => "Create password",
            EnrollmentStep::Device => "Configure VPN device",
            EnrollmentStep::Finish => "Finish",
        }
    }

    fn back_disabled(&self) -> bool {
        matches!(
            self,
            EnrollmentStep::Welcome | EnrollmentStep::Device | EnrollmentStep::Finish
        )
    }

    fn controls_hidden(&self) -> bool {
        matches!(self, EnrollmentStep::Finish)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordResetStep {
    Email,
    LinkSent,
    Password,
    Success,
    Failure,
}

impl WizardStep for PasswordResetStep {
    fn all() -> &'static [Self] {
        &[
            PasswordResetStep::Email,
            PasswordResetStep::LinkSent,
            PasswordResetStep::Password,
            PasswordResetStep::Success,
            PasswordResetStep::Failure,
        ]
    }

    fn label(&self) -> &'static str {
        match self {
            PasswordResetStep::Email => "Enter email",
            PasswordResetStep::LinkSent => "Link sent",
            PasswordResetStep::Password => "Choose new password",
            PasswordResetStep::Success => "Password changed",
            PasswordResetStep::Failure => "Link invalid",
        }
    }

    fn back_disabled(&self) -> bool {
        !matches!(self, PasswordResetStep::LinkSent)
    }

    fn controls_hidden(&self) -> bool {
        matches!(
            self,
            PasswordResetStep::Success | PasswordResetStep::Failure
        )
    }
}
