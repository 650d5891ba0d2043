//! Shared UI icons and emojis.
//!
//! This module provides common emoji constants used across the UI components
//! for consistent visual styling.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP]");

// Execution indicators
pub static WORKER: Emoji<'_, '_> = Emoji("🤖 ", "[>]");
pub static ACTION: Emoji<'_, '_> = Emoji("🔧 ", "·");
pub static RETRY: Emoji<'_, '_> = Emoji("🔁 ", "[RETRY]");

// Intervention indicators
pub static LOOP: Emoji<'_, '_> = Emoji("🌀 ", "[LOOP]");
pub static BOUNDARY: Emoji<'_, '_> = Emoji("🚧 ", "[LIMIT]");
pub static ESCALATE: Emoji<'_, '_> = Emoji("🙋 ", "[ASK]");
pub static REPLAN: Emoji<'_, '_> = Emoji("🔄 ", "[REPLAN]");
