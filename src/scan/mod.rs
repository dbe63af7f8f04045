/// Collapses bursts of recognition events from a live capture stream into a
/// single logical scan per arm cycle.
#[derive(Debug, Default)]
pub struct ScanGuard {
    armed: bool,
    dropped: u64,
}

impl ScanGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self) {
        self.armed = true;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Number of recognition events dropped since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Feed one recognition event. Returns the code only for the first event
    /// after `arm()`; the guard disarms itself on that event.
    pub fn on_recognized(&mut self, code: &str) -> Option<String> {
        if !self.armed {
            self.dropped += 1;
            tracing::debug!(dropped = self.dropped, "Dropping recognition event, guard not armed");
            return None;
        }
        self.armed = false;
        Some(code.to_string())
    }
}
