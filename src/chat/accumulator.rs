//! Accumulates the in-progress assistant reply.

use crate::chat::frame::StreamFrame;

/// Output of the accumulator for the rendering layer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AccumulatorOutput {
    /// Live partial text to render.
    Partial(String),
    /// Final content of the reply.
    Complete(String),
}

/// Buffers deltas for one reply.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    accumulated: String,
    active: bool,
    rendered: bool,
}

impl StreamAccumulator {
    /// Create an idle accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new reply, discarding anything left from a previous one.
    pub fn begin(&mut self) {
        self.accumulated.clear();
        self.active = true;
        self.rendered = false;
    }

    /// Drop the in-progress reply without emitting anything.
    pub fn reset(&mut self) {
        self.accumulated.clear();
        self.active = false;
        self.rendered = false;
    }

    /// Whether a reply is in progress.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Current partial text.
    #[must_use]
    pub fn partial(&self) -> &str {
        &self.accumulated
    }

    /// Apply one frame.
    ///
    /// A completion is always preceded by at least one `Partial`, even when no
    /// delta arrived. Frames received while inactive are ignored.
    pub fn push(&mut self, frame: StreamFrame) -> Vec<AccumulatorOutput> {
        if !self.active {
            return Vec::new();
        }

        match frame {
            StreamFrame::Delta(delta) => {
                self.accumulated.push_str(&delta);
                self.rendered = true;
                vec![AccumulatorOutput::Partial(self.accumulated.clone())]
            }
            StreamFrame::Done => {
                let mut out = Vec::with_capacity(2);
                if !self.rendered {
                    out.push(AccumulatorOutput::Partial(self.accumulated.clone()));
                }
                out.push(AccumulatorOutput::Complete(std::mem::take(
                    &mut self.accumulated,
                )));
                self.reset();
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(text: &str) -> StreamFrame {
        StreamFrame::Delta(text.to_string())
    }

    #[test]
    fn test_live_render_sequence() {
        let mut acc = StreamAccumulator::new();
        acc.begin();
        assert_eq!(
            acc.push(delta("Hi")),
            vec![AccumulatorOutput::Partial("Hi".to_string())]
        );
        assert_eq!(
            acc.push(delta(" there")),
            vec![AccumulatorOutput::Partial("Hi there".to_string())]
        );
        assert_eq!(
            acc.push(StreamFrame::Done),
            vec![AccumulatorOutput::Complete("Hi there".to_string())]
        );
        assert!(!acc.is_active());
        assert!(acc.partial().is_empty());
    }

    #[test]
    fn test_final_value_is_concatenation() {
        let pieces = ["a", "bc", "", "def", " ", "\u{e9}"];
        let mut acc = StreamAccumulator::new();
        acc.begin();
        for piece in pieces {
            acc.push(delta(piece));
        }
        let out = acc.push(StreamFrame::Done);
        assert_eq!(
            out.last(),
            Some(&AccumulatorOutput::Complete(pieces.concat()))
        );
    }

    #[test]
    fn test_completion_without_deltas_renders_empty_first() {
        let mut acc = StreamAccumulator::new();
        acc.begin();
        assert_eq!(
            acc.push(StreamFrame::Done),
            vec![
                AccumulatorOutput::Partial(String::new()),
                AccumulatorOutput::Complete(String::new()),
            ]
        );
    }

    #[test]
    fn test_inactive_ignores_frames() {
        let mut acc = StreamAccumulator::new();
        assert!(acc.push(delta("late")).is_empty());
        acc.begin();
        acc.push(StreamFrame::Done);
        assert!(acc.push(delta("after")).is_empty());
    }
}
