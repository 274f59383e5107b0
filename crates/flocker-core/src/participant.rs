use serde::{Deserialize, Serialize};

/// Opaque, server-issued session identifier (UUID v4 string).
pub type SessionId = String;

/// Maximum display name length in bytes after trimming.
pub const MAX_DISPLAY_NAME_LEN: usize = 32;

/// Emote shown above a participant's avatar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emote {
    #[default]
    None,
    Exclaim,
    Plus,
    X,
    Question,
}

impl Emote {
    pub fn is_none(self) -> bool {
        self == Self::None
    }
}

/// Arena coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// A participant in the experiment room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: SessionId,
    pub display_name: String,
    pub color: String,
    pub is_informed: bool,
    pub position: Position,
    pub current_emote: Emote,
    pub connected: bool,
    /// Epoch milliseconds of the last accepted command or connection change.
    pub last_active_at: u64,
    pub ready: bool,
}

/// Color-blind friendly palette, assigned first-unused.
pub const PALETTE: &[&str] = &[
    "#E69F00", // orange
    "#56B4E9", // sky blue
    "#009E73", // bluish green
    "#F0E442", // yellow
    "#0072B2", // blue
    "#D55E00", // vermillion
    "#CC79A7", // reddish purple
    "#999999", // grey
];

/// Deterministic fallback once the palette is exhausted. Steps the hue by the
/// golden angle so consecutive joiners stay visually distinct.
pub fn fallback_color(seq: u64) -> String {
    let hue = (seq.wrapping_mul(137)) % 360;
    format!("hsl({hue}, 70%, 60%)")
}

/// Pick the first palette color not in `used`, else a fallback from `seq`.
pub fn pick_color(used: &[&str], seq: u64) -> String {
    PALETTE
        .iter()
        .find(|c| !used.contains(*c))
        .map(|c| (*c).to_string())
        .unwrap_or_else(|| fallback_color(seq))
}

/// Trim and validate a display name. Returns `None` when unusable.
pub fn sanitize_display_name(raw: &str) -> Option<String> {
    let name = raw.trim();
    if name.is_empty() || name.len() > MAX_DISPLAY_NAME_LEN || name.chars().any(|c| c.is_control())
    {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_color_skips_used() {
        let used = ["#E69F00", "#56B4E9"];
        assert_eq!(pick_color(&used, 2), "#009E73");
    }

    #[test]
    fn pick_color_falls_back_when_exhausted() {
        let color = pick_color(PALETTE, 8);
        assert!(color.starts_with("hsl("), "got {color}");
        assert_eq!(color, fallback_color(8));
    }

    #[test]
    fn fallback_colors_differ_for_neighbours() {
        assert_ne!(fallback_color(8), fallback_color(9));
    }

    #[test]
    fn display_name_validation() {
        assert_eq!(sanitize_display_name("  Ana "), Some("Ana".to_string()));
        assert_eq!(sanitize_display_name("   "), None);
        assert_eq!(sanitize_display_name("a\u{0007}b"), None);
        assert_eq!(sanitize_display_name(&"x".repeat(33)), None);
        assert!(sanitize_display_name(&"x".repeat(32)).is_some());
    }

    #[test]
    fn position_finiteness() {
        assert!(Position::new(1.0, 2.0).is_finite());
        assert!(!Position::new(f64::NAN, 2.0).is_finite());
        assert!(!Position::new(1.0, f64::INFINITY).is_finite());
    }
}
