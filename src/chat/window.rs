/// Sliding-buffer state for one open chat: remembers where the previous
/// context window started so the whole history is not re-tokenized on
/// every turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextWindowState {
    /// Oldest message index included in the last computed window. `None`
    /// until the window has filled at least once.
    pub last_included_index: Option<usize>,
}

impl ContextWindowState {
    /// Start index to feed the next prompt build.
    pub fn start_index(&self) -> usize {
        self.last_included_index.unwrap_or(0)
    }

    /// Records a newly computed window start. The index only moves forward:
    /// history is append-only, so under a fixed budget the window can never
    /// slide back.
    pub fn record(&mut self, included_from: usize) {
        match self.last_included_index {
            Some(previous) if previous >= included_from => {}
            _ => self.last_included_index = Some(included_from),
        }
    }
}
