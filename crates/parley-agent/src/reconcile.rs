//! Reconstructs full assistant text from partial deltas.

use std::collections::HashMap;
use tracing::debug;

/// Position of a message in the batch currently streaming.
pub type SlotIndex = usize;
pub type BlockIndex = usize;

/// What still has to be delivered once the final text of a block arrives.
///
/// Totals cover everything the slot produced for the block so far, including
/// earlier assistant messages of the same reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reconciled {
    /// Streaming already delivered the final text, or more.
    Nothing,
    /// Streaming undershot. `total` is the streamed text plus `suffix`.
    Suffix { suffix: String, total: String },
    /// Nothing was streamed for this message, or the streamed text disagrees
    /// with a final text of the same length. Carries the corrected total.
    Full(String),
}

#[derive(Debug, Default)]
struct BlockText {
    text: String,
    /// Byte offset where the current assistant message starts.
    message_start: usize,
}

/// Accumulated delta text keyed by `(slot, content block)`. Entries live until
/// their slot's result clears them.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    entries: HashMap<(SlotIndex, BlockIndex), BlockText>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta and return the accumulated total for the block.
    pub fn push_delta(&mut self, slot: SlotIndex, block: BlockIndex, delta: &str) -> &str {
        let entry = self.entries.entry((slot, block)).or_default();
        entry.text.push_str(delta);
        entry.text.as_str()
    }

    pub fn streamed(&self, slot: SlotIndex, block: BlockIndex) -> Option<&str> {
        self.entries.get(&(slot, block)).map(|entry| entry.text.as_str())
    }

    /// Compare the final text of one assistant message with what was streamed
    /// for it. Deltas of the next message in the slot extend the same total.
    pub fn reconcile(&mut self, slot: SlotIndex, block: BlockIndex, final_text: &str) -> Reconciled {
        let entry = self.entries.entry((slot, block)).or_default();
        let start = entry.message_start;
        let streamed = &entry.text[start..];

        let outcome = if final_text.is_empty() || streamed == final_text {
            Reconciled::Nothing
        } else if streamed.is_empty() {
            entry.text.push_str(final_text);
            Reconciled::Full(entry.text.clone())
        } else if streamed.len() < final_text.len() && final_text.starts_with(streamed) {
            let suffix = final_text[streamed.len()..].to_string();
            entry.text.push_str(&suffix);
            Reconciled::Suffix {
                suffix,
                total: entry.text.clone(),
            }
        } else if streamed.len() == final_text.len() {
            entry.text.truncate(start);
            entry.text.push_str(final_text);
            Reconciled::Full(entry.text.clone())
        } else {
            debug!(
                slot,
                block,
                streamed = streamed.len(),
                final_len = final_text.len(),
                "streamed text differs from final text; keeping streamed text"
            );
            Reconciled::Nothing
        };
        entry.message_start = entry.text.len();
        outcome
    }

    pub fn clear_slot(&mut self, slot: SlotIndex) {
        self.entries.retain(|(entry_slot, _), _| *entry_slot != slot);
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
