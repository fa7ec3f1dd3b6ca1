//! Text width measurement used when a text annotation is committed.

/// Measures the rendered width of a single line of text.
pub trait TextMeasurer {
    fn measure(&self, text: &str, font_size: f64) -> f64;
}

/// Approximates every character with the same advance.
#[derive(Debug, Clone, Copy)]
pub struct FixedAdvanceMeasurer {
    /// Advance per character as a fraction of the font size.
    pub advance_ratio: f64,
}

impl Default for FixedAdvanceMeasurer {
    fn default() -> Self {
        Self { advance_ratio: 0.55 }
    }
}

impl TextMeasurer for FixedAdvanceMeasurer {
    fn measure(&self, text: &str, font_size: f64) -> f64 {
        text.chars().count() as f64 * font_size * self.advance_ratio
    }
}
