//! In-memory BM25 index built per query session.
//!
//! The fusion technique builds one of these over its vector candidate set
//! and scores the query against it. Okapi BM25 with k1 = 1.5, b = 0.75;
//! tokenization is unicode-aware (lowercased alphanumeric runs), so CJK
//! and accented text tokenize sensibly without a language-specific
//! segmenter.

use std::collections::HashMap;

const K1: f32 = 1.5;
const B: f32 = 0.75;

/// Lowercased alphanumeric tokens of `text`.
///
/// Splits on every non-alphanumeric scalar; `char::is_alphanumeric` is
/// unicode-aware so this handles non-ASCII scripts.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[derive(Debug, Clone)]
struct Posting {
    doc: u32,
    term_frequency: u32,
}

/// A request-scoped BM25 index over a small candidate set.
///
/// Documents are addressed by the index they were added with; callers keep
/// their own mapping back to chunk ids.
#[derive(Debug, Default)]
pub struct LexicalIndex {
    postings: HashMap<String, Vec<Posting>>,
    doc_lengths: Vec<u32>,
    total_length: u64,
}

impl LexicalIndex {
    /// Build an index over the given texts, in order.
    pub fn build<S: AsRef<str>>(texts: &[S]) -> Self {
        let mut index = Self::default();
        for text in texts {
            index.add(text.as_ref());
        }
        index
    }

    fn add(&mut self, text: &str) {
        let doc = self.doc_lengths.len() as u32;
        let tokens = tokenize(text);
        self.doc_lengths.push(tokens.len() as u32);
        self.total_length += tokens.len() as u64;

        let mut frequencies: HashMap<String, u32> = HashMap::new();
        for token in tokens {
            *frequencies.entry(token).or_insert(0) += 1;
        }
        for (term, term_frequency) in frequencies {
            self.postings.entry(term).or_default().push(Posting { doc, term_frequency });
        }
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    /// Whether the index holds no documents.
    pub fn is_empty(&self) -> bool {
        self.doc_lengths.is_empty()
    }

    /// BM25 score of `query` against every indexed document.
    ///
    /// Returns one score per document, aligned with insertion order.
    /// Documents sharing no term with the query score 0.
    pub fn scores(&self, query: &str) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.doc_lengths.len()];
        if self.doc_lengths.is_empty() {
            return scores;
        }

        let n = self.doc_lengths.len() as f32;
        let avgdl = (self.total_length as f32 / n).max(1.0);

        for token in tokenize(query) {
            let Some(postings) = self.postings.get(&token) else { continue };
            let df = postings.len() as f32;
            // IDF: ln((N - df + 0.5) / (df + 0.5) + 1)
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for posting in postings {
                let dl = self.doc_lengths[posting.doc as usize] as f32;
                let tf = posting.term_frequency as f32;
                let tf_norm = (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * dl / avgdl));
                scores[posting.doc as usize] += idf * tf_norm;
            }
        }

        scores
    }
}
