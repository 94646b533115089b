//! Rendering of ranked matches into an annotated context block.
//!
//! Each document becomes:
//!
//! ```text
//! [[DOC 1 | CONFIDENCE:HIGH | SCORE:0.87 | TITLE:Ledger basics]]
//! <content>
//! ```
//!
//! Blocks are joined with [`DOC_SEPARATOR`]. An empty list renders
//! [`NO_CONTEXT_MARKER`] instead.

use crate::confidence::Thresholds;
use crate::models::DocumentMatch;

/// Separator placed between rendered documents.
pub const DOC_SEPARATOR: &str = "\n\n---\n\n";

/// Heading placed above the rendered documents.
pub const CONTEXT_HEADER: &str = "CONTEXT DOCUMENTS (from the knowledge base, annotated):";

/// Emitted when nothing was retrieved. The generation step must fall back
/// to cautious, general reasoning instead of inventing specifics.
pub const NO_CONTEXT_MARKER: &str = "No explicit context was confidently retrieved from the \
knowledge base for this query. If the user asks for specific details you don't see in your \
context, say you don't know and stay high-level.";

/// Render the annotated context block for `matches`.
///
/// Pure: the same matches and thresholds always produce the same string.
pub fn render_context(matches: &[DocumentMatch], thresholds: &Thresholds) -> String {
    if matches.is_empty() {
        return NO_CONTEXT_MARKER.to_string();
    }

    let blocks: Vec<String> = matches
        .iter()
        .enumerate()
        .map(|(i, m)| render_document(i + 1, m, thresholds))
        .collect();

    format!("{}\n\n{}", CONTEXT_HEADER, blocks.join(DOC_SEPARATOR))
}

fn render_document(ordinal: usize, m: &DocumentMatch, thresholds: &Thresholds) -> String {
    let tier = thresholds.tier_for_match(m);
    let score = match m.genuine_similarity() {
        Some(s) => format!("{:.2}", s),
        None => "n/a".to_string(),
    };
    let title = m.title.as_deref().unwrap_or("unknown");

    format!(
        "[[DOC {} | CONFIDENCE:{} | SCORE:{} | TITLE:{}]]\n{}",
        ordinal,
        tier.label(),
        score,
        title,
        m.content
    )
}
