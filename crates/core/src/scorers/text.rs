use super::{MetricsMap, Scorer, to_score, unit, wrong_stream};
use crate::error::ScorerError;
use crate::ingest::SessionStream;
use crate::session::{DEFAULT_TOPIC, Domain};
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use serde::Serialize;

const MIN_WORDS: usize = 5;
const LONG_WORD_CHARS: usize = 8;

// Addressing the class directly or inclusively.
const ENGAGING_PRONOUNS: [&str; 8] = ["you", "your", "yours", "we", "us", "our", "let's", "lets"];

// Words too common to say anything about whether a topic was covered.
const STOP_WORDS: [&str; 12] = [
    "the", "and", "for", "with", "from", "into", "about", "intro", "introduction", "basics",
    "general", "lesson",
];

/// Scores the transcript for vocabulary depth, how much the teacher engages
/// the class, and how closely the talk tracks the session topic.
pub struct TextScorer {
    matcher: SkimMatcherV2,
    /// Minimum skim score for a topic term that is not spoken word for word
    /// to count as mentioned. Only terms of [`FUZZY_MIN_CHARS`] or more are
    /// fuzzily matched.
    pub match_threshold: i64,
}

/// Shorter terms only count when spoken as a whole word.
pub const FUZZY_MIN_CHARS: usize = 5;

/// Which topic terms the transcript mentions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicCoverage {
    pub matched: Vec<String>,
    pub missed: Vec<String>,
}

impl TopicCoverage {
    pub fn ratio(&self) -> f64 {
        let total = self.matched.len() + self.missed.len();
        if total == 0 {
            return 0.0;
        }
        self.matched.len() as f64 / total as f64
    }
}

impl Default for TextScorer {
    fn default() -> Self {
        Self {
            matcher: SkimMatcherV2::default(),
            match_threshold: 70,
        }
    }
}

impl Scorer for TextScorer {
    fn domain(&self) -> Domain {
        Domain::Text
    }

    fn score(&self, stream: &SessionStream, topic: &str) -> Result<MetricsMap, ScorerError> {
        let SessionStream::Transcript(transcript) = stream else {
            return Err(wrong_stream(Domain::Text, stream));
        };
        self.score_text(&transcript.text, topic)
    }
}

impl TextScorer {
    pub fn score_text(&self, text: &str, topic: &str) -> Result<MetricsMap, ScorerError> {
        let words = tokenize(text);
        if words.len() < MIN_WORDS {
            return Err(ScorerError::insufficient(
                Domain::Text,
                format!("{} word(s) in transcript", words.len()),
            ));
        }
        let total = words.len() as f64;

        let long_words = words.iter().filter(|w| w.chars().count() >= LONG_WORD_CHARS).count();
        let mut unique = words.clone();
        unique.sort_unstable();
        unique.dedup();
        let type_token = unique.len() as f64 / total;
        let depth = 0.5 * unit(long_words as f64 / total, 0.2) + 0.5 * unit(type_token, 0.6);

        let sentences = split_sentences(text);
        let questions = sentences.iter().filter(|s| s.ends_with('?')).count();
        let question_share = questions as f64 / sentences.len().max(1) as f64;
        let pronouns = words
            .iter()
            .filter(|w| ENGAGING_PRONOUNS.contains(&w.as_str()))
            .count();
        let interaction =
            0.6 * unit(question_share, 0.25) + 0.4 * unit(pronouns as f64 / total, 0.05);

        let relevance = self.topic_relevance(text, topic);

        tracing::debug!(
            "Text: {} words, {} sentences ({questions} questions), topic coverage {relevance:.2}",
            words.len(),
            sentences.len()
        );

        Ok(MetricsMap::from([
            ("technical_depth".to_string(), to_score(depth)),
            ("interaction_index".to_string(), to_score(interaction)),
            ("topic_relevance".to_string(), to_score(relevance)),
        ]))
    }

    /// Share of topic terms mentioned in the transcript. Zero when there is
    /// no meaningful topic to check against.
    pub fn topic_relevance(&self, text: &str, topic: &str) -> f64 {
        self.topic_coverage(text, topic)
            .map_or(0.0, |coverage| coverage.ratio())
    }

    /// Splits the topic terms into those the transcript mentions and those it
    /// does not. `None` for the default topic or a topic with no usable terms.
    pub fn topic_coverage(&self, text: &str, topic: &str) -> Option<TopicCoverage> {
        if topic.trim().eq_ignore_ascii_case(DEFAULT_TOPIC) {
            return None;
        }
        let terms = topic_terms(topic);
        if terms.is_empty() {
            return None;
        }

        let sentences: Vec<String> = split_sentences(text)
            .iter()
            .map(|s| s.to_lowercase())
            .collect();
        let words = tokenize(text);

        let (matched, missed): (Vec<String>, Vec<String>) = terms.into_iter().partition(|term| {
            words.iter().any(|word| is_word_hit(word, term))
                || (term.chars().count() >= FUZZY_MIN_CHARS
                    && sentences.iter().any(|sentence| {
                        self.matcher.fuzzy_match(sentence, term).unwrap_or(0)
                            > self.match_threshold
                    }))
        });
        Some(TopicCoverage { matched, missed })
    }
}

/// `word` is `term` itself or its plural or possessive form.
fn is_word_hit(word: &str, term: &str) -> bool {
    word == term
        || ["'s", "s", "es"]
            .iter()
            .any(|suffix| word.strip_suffix(suffix) == Some(term))
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

fn split_sentences(text: &str) -> Vec<&str> {
    text.split_inclusive(['.', '?', '!'])
        .map(str::trim)
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .collect()
}

fn topic_terms(topic: &str) -> Vec<String> {
    let mut terms: Vec<String> = tokenize(topic)
        .into_iter()
        .filter(|t| t.chars().count() >= 3 && !STOP_WORDS.contains(&t.as_str()))
        .collect();
    terms.sort_unstable();
    terms.dedup();
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    const LESSON: &str = "Today we explore photosynthesis. \
        Plants convert sunlight into chemical energy. Chlorophyll absorbs light in the leaves. \
        Can you tell me where glucose is produced? \
        Let's think about what happens at night. What do you think the plant needs?";

    #[test]
    fn interactive_lesson_scores_interaction() {
        let metrics = TextScorer::default().score_text(LESSON, "Photosynthesis").unwrap();

        assert!(metrics["interaction_index"] > 50.0, "{metrics:?}");
        assert!(metrics["technical_depth"] > 0.0);
        assert_eq!(metrics["topic_relevance"], 100.0);
    }

    #[test]
    fn monologue_without_questions_scores_low_interaction() {
        let text = "The mitochondria is the powerhouse. The nucleus stores genetic material. \
            The membrane regulates transport.";
        let metrics = TextScorer::default().score_text(text, "Cell biology").unwrap();
        assert_eq!(metrics["interaction_index"], 0.0);
    }

    #[test]
    fn off_topic_transcript_has_no_relevance() {
        let scorer = TextScorer::default();
        assert_eq!(scorer.topic_relevance(LESSON, "Quadratic equations"), 0.0);
    }

    #[test]
    fn general_topic_has_no_relevance() {
        let scorer = TextScorer::default();
        assert_eq!(scorer.topic_relevance(LESSON, DEFAULT_TOPIC), 0.0);
        assert_eq!(scorer.topic_relevance(LESSON, "  "), 0.0);
    }

    #[test]
    fn short_topic_terms_match_as_whole_words() {
        let scorer = TextScorer::default();
        let dna = "Today we study DNA replication. The DNA molecule copies itself. \
            Each strand is a template.";
        assert_eq!(scorer.topic_relevance(dna, "DNA"), 1.0);

        let sun = "The Sun is a star. Light from the sun reaches us in eight minutes.";
        assert_eq!(scorer.topic_relevance(sun, "Sun"), 1.0);

        let ohm = "Ohm's law links voltage and current. The law holds for resistors.";
        assert_eq!(scorer.topic_relevance(ohm, "Ohm's law"), 1.0);
    }

    #[test]
    fn short_terms_are_not_fuzzily_matched() {
        let scorer = TextScorer::default();
        let text = "Students noticed the sunset over the bay. Nobody mentioned anything else.";
        assert_eq!(scorer.topic_relevance(text, "Sun"), 0.0);
    }

    #[test]
    fn coverage_lists_matched_and_missed_terms() {
        let scorer = TextScorer::default();
        let coverage = scorer
            .topic_coverage("Cells divide by mitosis. Each cell copies its DNA.", "DNA and meiosis")
            .unwrap();

        assert_eq!(coverage.matched, vec!["dna".to_string()]);
        assert_eq!(coverage.missed, vec!["meiosis".to_string()]);
        assert_eq!(coverage.ratio(), 0.5);
        assert!(scorer.topic_coverage(LESSON, DEFAULT_TOPIC).is_none());
    }

    #[test]
    fn plural_and_possessive_forms_count() {
        assert!(is_word_hit("fractions", "fraction"));
        assert!(is_word_hit("ohm's", "ohm"));
        assert!(is_word_hit("classes", "class"));
        assert!(!is_word_hit("sunday", "sun"));
    }

    #[test]
    fn topic_terms_skip_stop_words() {
        assert_eq!(
            topic_terms("Introduction to the Water Cycle"),
            vec!["cycle".to_string(), "water".to_string()]
        );
    }

    #[test]
    fn short_transcript_is_insufficient() {
        let err = TextScorer::default().score_text("Hello class.", "General").unwrap_err();
        assert!(matches!(err, ScorerError::InsufficientData { domain: Domain::Text, .. }));
    }

    #[test]
    fn metrics_stay_in_range() {
        let metrics = TextScorer::default()
            .score_text("you you you you you? you? you? you?", "you")
            .unwrap();
        for value in metrics.values() {
            assert!((0.0..=100.0).contains(value), "{metrics:?}");
        }
    }
}
