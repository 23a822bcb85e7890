use std::sync::{Arc, Mutex, PoisonError};

/// Single-slot cell holding the authorization code delivered to the listener.
///
/// One handle lives in the listener's router state, another in the waiting
/// caller. The first offered code wins; later ones are ignored.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationCapture {
    slot: Arc<Mutex<Option<String>>>,
}

impl AuthorizationCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `code` if the slot is still empty. Returns `true` when stored.
    pub fn offer(&self, code: &str) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }
        *slot = Some(code.to_string());
        true
    }

    pub fn get(&self) -> Option<String> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_set(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
