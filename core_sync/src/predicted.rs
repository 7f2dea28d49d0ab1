//! Local prediction overlay over an authoritative value.

/// Outcome of reconciling a holder against a server-confirmed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome<T> {
    /// No local prediction was pending; the value simply updated.
    Applied,
    /// The pending prediction matched the server.
    Confirmed,
    /// The pending prediction disagreed and was overwritten.
    Corrected { discarded: T },
}

/// One mutable property as the client shows it: the last server-confirmed
/// value plus an optional local overlay awaiting confirmation.
///
/// Readers always see the overlay while one is pending. The confirmed value
/// underneath only ever moves on server authority.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Predicted<T> {
    confirmed: T,
    overlay: Option<T>,
}

impl<T: Clone + PartialEq> Predicted<T> {
    pub fn new(confirmed: T) -> Self {
        Self {
            confirmed,
            overlay: None,
        }
    }

    /// Value presentation should display.
    pub fn value(&self) -> &T {
        self.overlay.as_ref().unwrap_or(&self.confirmed)
    }

    pub fn confirmed(&self) -> &T {
        &self.confirmed
    }

    pub fn is_predicted(&self) -> bool {
        self.overlay.is_some()
    }

    /// Installs a local overlay. Returns `true` when the overlay is new or
    /// changed and therefore needs a correction deadline; re-predicting the
    /// identical still-pending value changes nothing.
    #[must_use]
    pub fn predict(&mut self, value: T) -> bool {
        if self.overlay.as_ref() == Some(&value) {
            return false;
        }
        self.overlay = Some(value);
        true
    }

    /// Reconciles against a server-confirmed value. The server value always
    /// becomes the new confirmed state; any pending overlay is consumed.
    pub fn confirm(&mut self, server: T) -> ConfirmOutcome<T> {
        let outcome = match self.overlay.take() {
            None => ConfirmOutcome::Applied,
            Some(predicted) if predicted == server => ConfirmOutcome::Confirmed,
            Some(predicted) => ConfirmOutcome::Corrected {
                discarded: predicted,
            },
        };
        self.confirmed = server;
        outcome
    }

    /// Expires the overlay without new server input, reverting to the stored
    /// confirmed value. Returns the discarded prediction when it differed.
    pub fn settle(&mut self) -> Option<T> {
        let predicted = self.overlay.take()?;
        if predicted == self.confirmed {
            None
        } else {
            Some(predicted)
        }
    }
}
