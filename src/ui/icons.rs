//! Shared UI icons, with plain-text fallbacks for dumb terminals.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static STOP: Emoji<'_, '_> = Emoji("⏹️  ", "[STOP]");

// Conversation
pub static QUESTION: Emoji<'_, '_> = Emoji("❓ ", "[?]");
pub static ASSISTANT: Emoji<'_, '_> = Emoji("💬 ", ">");

// Work
pub static PHASE: Emoji<'_, '_> = Emoji("🔄 ", "[PHASE]");
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static TOOL: Emoji<'_, '_> = Emoji("🔧 ", "-");
pub static FILE_NEW: Emoji<'_, '_> = Emoji("📄 ", "+");
