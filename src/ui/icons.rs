//! Shared UI icons and emojis.
//!
//! Common emoji constants used across the UI for consistent visual styling,
//! with plain-text fallbacks for terminals without emoji support.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Activity indicators
pub static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
pub static BLOCKER: Emoji<'_, '_> = Emoji("🚧 ", "[BLOCKED]");
pub static PIVOT: Emoji<'_, '_> = Emoji("🔄 ", "[PIVOT]");
pub static REVIEW: Emoji<'_, '_> = Emoji("🔍 ", "[REVIEW]");
