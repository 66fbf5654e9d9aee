/// Text of the assistant turn currently being streamed.
///
/// Reset when the user interrupts, flushed when the turn completes.
#[derive(Debug, Default, Clone)]
pub struct ResponseAccumulator {
    text: String,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &str) {
        self.text.push_str(delta);
    }

    /// Discard partial text of an interrupted turn.
    pub fn reset(&mut self) {
        self.text.clear();
    }

    /// Take the completed turn's text, leaving the accumulator empty.
    pub fn flush(&mut self) -> String {
        std::mem::take(&mut self.text)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}
