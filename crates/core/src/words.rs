/// Count words as whitespace-separated runs.  Punctuation sticks to its word,
/// so `"it's done."` is two words.
pub fn count_words(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Word counts for one editor change, measured from the removed and inserted
/// text of the change region.  Both sides are non-negative; replacing a word
/// with another word counts as one added and one deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditDelta {
    pub words_added: u64,
    pub words_deleted: u64,
}

impl EditDelta {
    pub fn from_change(removed: &str, inserted: &str) -> Self {
        Self {
            words_added: count_words(inserted),
            words_deleted: count_words(removed),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words_added == 0 && self.words_deleted == 0
    }

    pub fn merge(&mut self, other: EditDelta) {
        self.words_added += other.words_added;
        self.words_deleted += other.words_deleted;
    }
}
