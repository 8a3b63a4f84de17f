//! Processing metrics overlay.

pub const OVERLAY_LABEL: &str = "WASM Processing";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingOverlay {
    visible: bool,
    frames: u64,
}

impl ProcessingOverlay {
    pub fn new(visible: bool) -> Self {
        Self { visible, frames: 0 }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Hide the overlay for the rest of the player's life.
    pub fn dismiss(&mut self) {
        self.visible = false;
    }

    pub fn update(&mut self, frames: u64) {
        self.frames = frames;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn label(&self) -> &'static str {
        OVERLAY_LABEL
    }

    /// e.g. `12,345 frames`
    pub fn frames_text(&self) -> String {
        format!("{} frames", group_thousands(self.frames))
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, "0 frames")]
    #[case(999, "999 frames")]
    #[case(1_000, "1,000 frames")]
    #[case(1_234_567, "1,234,567 frames")]
    fn frame_text_is_grouped(#[case] frames: u64, #[case] expected: &str) {
        let mut overlay = ProcessingOverlay::new(true);
        overlay.update(frames);
        assert_eq!(overlay.frames_text(), expected);
    }

    #[test]
    fn dismissed_overlay_keeps_counting() {
        let mut overlay = ProcessingOverlay::new(true);
        overlay.dismiss();
        overlay.update(42);
        assert!(!overlay.is_visible());
        assert_eq!(overlay.frames(), 42);
        assert_eq!(overlay.label(), "WASM Processing");
    }
}
