//! Incremental sentence segmentation over a live token stream.
//!
//! Fragments are appended to one growing buffer. Only the newly appended
//! bytes are scanned for terminators; every terminator cuts the buffer
//! (terminator included) into the next [`Sentence`]. Whatever is left
//! stays buffered until more text arrives or the stream ends.

use serde::Serialize;

const TERMINATORS: [char; 3] = ['.', '!', '?'];

/// One complete unit of generated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sentence {
    pub index: usize,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
    next_index: usize,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment and return every sentence it completes, in order.
    pub fn push(&mut self, fragment: &str) -> Vec<Sentence> {
        let mut sentences = Vec::new();
        // the buffer holds no terminator before this point
        let mut scan_from = self.buffer.len();
        self.buffer.push_str(fragment);

        while let Some(offset) = self.buffer[scan_from..].find(TERMINATORS) {
            // terminators are ASCII, so +1 stays on a char boundary
            let cut = scan_from + offset + 1;
            let head: String = self.buffer.drain(..cut).collect();
            sentences.push(self.next_sentence(head.trim()));
            scan_from = 0;
        }
        sentences
    }

    /// Close the stream, emitting the trailing partial sentence if it has
    /// any non-whitespace content.
    pub fn finish(&mut self) -> Option<Sentence> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(self.next_sentence(rest))
        }
    }

    /// Number of sentences emitted so far.
    pub fn emitted(&self) -> usize {
        self.next_index
    }

    /// Text received but not yet part of an emitted sentence.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn next_sentence(&mut self, text: &str) -> Sentence {
        let sentence = Sentence {
            index: self.next_index,
            text: text.to_string(),
        };
        self.next_index += 1;
        sentence
    }
}

/// Segment a complete fragment sequence in one go.
pub fn segment_all<I, S>(fragments: I) -> Vec<Sentence>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut segmenter = SentenceSegmenter::new();
    let mut sentences: Vec<Sentence> = fragments
        .into_iter()
        .flat_map(|f| segmenter.push(f.as_ref()))
        .collect();
    sentences.extend(segmenter.finish());
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(sentences: &[Sentence]) -> Vec<&str> {
        sentences.iter().map(|s| s.text.as_str()).collect()
    }

    #[test]
    fn test_fragments_split_across_terminator() {
        let sentences = segment_all(["Nice ", "move", ". ", "Truly", " ", "awful. "]);
        assert_eq!(texts(&sentences), vec!["Nice move.", "Truly awful."]);
        assert_eq!(sentences[0].index, 0);
        assert_eq!(sentences[1].index, 1);
    }

    #[test]
    fn test_multiple_terminators_in_one_fragment() {
        let mut segmenter = SentenceSegmenter::new();
        let sentences = segmenter.push("Check! Really? Wow. And");
        assert_eq!(texts(&sentences), vec!["Check!", "Really?", "Wow."]);
        assert_eq!(segmenter.pending(), " And");
        let last = segmenter.finish().unwrap();
        assert_eq!(last, Sentence { index: 3, text: "And".into() });
    }

    #[test]
    fn test_terminator_arrives_alone() {
        let mut segmenter = SentenceSegmenter::new();
        assert!(segmenter.push("Blunder").is_empty());
        assert!(segmenter.push("").is_empty());
        let sentences = segmenter.push("!");
        assert_eq!(texts(&sentences), vec!["Blunder!"]);
    }

    #[test]
    fn test_whitespace_residual_not_emitted() {
        let mut segmenter = SentenceSegmenter::new();
        segmenter.push("Done.");
        segmenter.push("  \n ");
        assert!(segmenter.finish().is_none());
        assert_eq!(segmenter.emitted(), 1);
    }

    #[test]
    fn test_empty_stream() {
        assert!(segment_all(Vec::<String>::new()).is_empty());
        assert!(segment_all(["", "   "]).is_empty());
    }

    #[test]
    fn test_punctuation_only_fragments_count() {
        // each terminator produces its own sentence
        let sentences = segment_all(["Wait", "...", " what?"]);
        assert_eq!(texts(&sentences), vec!["Wait.", ".", ".", "what?"]);
    }

    #[test]
    fn test_non_ascii_text() {
        let sentences = segment_all(["Très ", "bien… ", "non? ", "Échec"]);
        assert_eq!(texts(&sentences), vec!["Très bien… non?", "Échec"]);
    }

    #[test]
    fn test_finish_twice_is_empty() {
        let mut segmenter = SentenceSegmenter::new();
        segmenter.push("Partial");
        assert!(segmenter.finish().is_some());
        assert!(segmenter.finish().is_none());
    }

    /// Concatenating the sentences gives back the input modulo the
    /// whitespace trimmed around each sentence.
    #[test]
    fn test_concatenation_preserves_content() {
        let cases: Vec<Vec<&str>> = vec![
            vec!["Nice ", "move", ". ", "Truly", " ", "awful. "],
            vec!["A.B.C", "!", "?", " d e f"],
            vec!["no terminator at all"],
            vec!["", ".", "", " x "],
            vec!["Queen", " takes", " pawn?! ", "Bold.", "  Very bold"],
        ];
        for fragments in cases {
            let input: String = fragments.concat();
            let sentences = segment_all(&fragments);
            let strip = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
            let joined: String = sentences.iter().map(|s| s.text.as_str()).collect();
            assert_eq!(strip(&joined), strip(&input), "fragments: {fragments:?}");
        }
    }

    /// `k` terminators yield `k` sentences, plus one when a non-blank tail
    /// remains; indices are contiguous from zero.
    #[test]
    fn test_sentence_count_matches_terminators() {
        let cases: Vec<Vec<&str>> = vec![
            vec!["One. Two! Three?"],
            vec!["One. Two! Three? ", "tail"],
            vec!["?", "!", "."],
            vec!["tail only"],
            vec!["x.", "  "],
        ];
        for fragments in cases {
            let input: String = fragments.concat();
            let k = input.chars().filter(|c| TERMINATORS.contains(c)).count();
            let tail = input
                .rfind(TERMINATORS)
                .map(|i| &input[i + 1..])
                .unwrap_or(&input)
                .trim()
                .len();
            let expected = k + usize::from(tail > 0);

            let sentences = segment_all(&fragments);
            assert_eq!(sentences.len(), expected, "fragments: {fragments:?}");
            for (i, s) in sentences.iter().enumerate() {
                assert_eq!(s.index, i);
            }
        }
    }
}
