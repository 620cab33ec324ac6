use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use super::{FeatureVector, ProviderError, SearchMethod};

pub const PADDING_INDEX: u32 = 0;

/// Source of next-word log probabilities for a partial caption.
pub trait StepScorer {
    /// `prefix` starts with the start token. The result is indexed by word id.
    fn next_word_log_probs(&self, features: &FeatureVector, prefix: &[u32]) -> Result<Vec<f32>, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct TokenizerFile {
    word_index: HashMap<String, u32>,
    #[serde(default = "default_start_token")]
    start_token: String,
    #[serde(default = "default_end_token")]
    end_token: String,
    #[serde(default = "default_max_length")]
    max_length: usize,
}

fn default_start_token() -> String {
    "startseq".to_string()
}

fn default_end_token() -> String {
    "endseq".to_string()
}

fn default_max_length() -> usize {
    34
}

#[derive(Debug, Clone)]
pub struct Vocabulary {
    words: HashMap<u32, String>,
    index: HashMap<String, u32>,
    start: u32,
    end: u32,
    max_length: usize,
}

impl Vocabulary {
    pub fn from_file(path: &Path) -> Result<Self, ProviderError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ProviderError> {
        let file: TokenizerFile =
            serde_json::from_str(raw).map_err(|e| ProviderError::Load(format!("Invalid tokenizer file: {}", e)))?;

        if file.word_index.values().any(|&index| index == PADDING_INDEX) {
            return Err(ProviderError::Load("word index 0 is reserved for padding".to_string()));
        }
        if file.max_length == 0 {
            return Err(ProviderError::Load("max_length must be positive".to_string()));
        }
        let lookup = |token: &str| {
            file.word_index
                .get(token)
                .copied()
                .ok_or_else(|| ProviderError::Load(format!("token {:?} missing from word_index", token)))
        };
        let start = lookup(&file.start_token)?;
        let end = lookup(&file.end_token)?;

        let words = file
            .word_index
            .iter()
            .map(|(word, &index)| (index, word.clone()))
            .collect();

        Ok(Self {
            words,
            index: file.word_index,
            start,
            end,
            max_length: file.max_length,
        })
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Highest word id plus one, i.e. the decoder's output width.
    pub fn size(&self) -> usize {
        self.words.keys().max().map_or(1, |&max| max as usize + 1)
    }

    pub fn word_id(&self, word: &str) -> Option<u32> {
        self.index.get(word).copied()
    }

    /// Joins the words of a token sequence, dropping control tokens.
    pub fn decode(&self, tokens: &[u32]) -> String {
        tokens
            .iter()
            .filter(|&&t| t != self.start && t != self.end && t != PADDING_INDEX)
            .filter_map(|t| self.words.get(t))
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub fn generate<S: StepScorer + ?Sized>(
    scorer: &S,
    vocabulary: &Vocabulary,
    features: &FeatureVector,
    method: SearchMethod,
) -> Result<String, ProviderError> {
    let tokens = match method {
        SearchMethod::Greedy => greedy_search(scorer, vocabulary, features)?,
        SearchMethod::Beam { width } => beam_search(scorer, vocabulary, features, width)?,
    };
    Ok(vocabulary.decode(&tokens))
}

pub fn greedy_search<S: StepScorer + ?Sized>(
    scorer: &S,
    vocabulary: &Vocabulary,
    features: &FeatureVector,
) -> Result<Vec<u32>, ProviderError> {
    let mut tokens = vec![vocabulary.start()];
    while tokens.len() < vocabulary.max_length() {
        let log_probs = scorer.next_word_log_probs(features, &tokens)?;
        let next = top_k(&log_probs, 1)
            .first()
            .map(|&(word, _)| word)
            .ok_or_else(|| ProviderError::Inference("decoder returned no scores".to_string()))?;
        if next == vocabulary.end() {
            break;
        }
        tokens.push(next);
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
struct Beam {
    tokens: Vec<u32>,
    score: f32,
    finished: bool,
}

pub fn beam_search<S: StepScorer + ?Sized>(
    scorer: &S,
    vocabulary: &Vocabulary,
    features: &FeatureVector,
    width: usize,
) -> Result<Vec<u32>, ProviderError> {
    // No step can yield more live candidates than there are words.
    let width = width.clamp(1, vocabulary.size());
    let mut beams = vec![Beam {
        tokens: vec![vocabulary.start()],
        score: 0.0,
        finished: false,
    }];

    for _ in 1..vocabulary.max_length() {
        if beams.iter().all(|beam| beam.finished) {
            break;
        }

        let mut candidates = Vec::with_capacity(beams.len() * width);
        for beam in &beams {
            if beam.finished {
                candidates.push(beam.clone());
                continue;
            }
            let log_probs = scorer.next_word_log_probs(features, &beam.tokens)?;
            for (word, log_prob) in top_k(&log_probs, width) {
                let finished = word == vocabulary.end();
                let mut tokens = beam.tokens.clone();
                if !finished {
                    tokens.push(word);
                }
                candidates.push(Beam {
                    tokens,
                    score: beam.score + log_prob,
                    finished,
                });
            }
        }
        if candidates.is_empty() {
            return Err(ProviderError::Inference("decoder returned no scores".to_string()));
        }

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(width);
        beams = candidates;
    }

    beams
        .into_iter()
        .max_by(|a, b| a.score.total_cmp(&b.score))
        .map(|beam| beam.tokens)
        .ok_or_else(|| ProviderError::Inference("beam search produced no candidates".to_string()))
}

/// Mean log probability of `words` following the start token, scored one forced step at a time.
/// Words unknown to the vocabulary are skipped.
pub fn mean_log_prob<S: StepScorer + ?Sized>(
    scorer: &S,
    vocabulary: &Vocabulary,
    features: &FeatureVector,
    words: &[&str],
) -> Result<Option<f32>, ProviderError> {
    let mut tokens = vec![vocabulary.start()];
    let mut total = 0.0f32;
    let mut scored = 0usize;

    for word in words {
        let Some(id) = vocabulary.word_id(&word.to_lowercase()) else {
            continue;
        };
        if tokens.len() >= vocabulary.max_length() {
            break;
        }
        let log_probs = scorer.next_word_log_probs(features, &tokens)?;
        total += log_probs.get(id as usize).copied().unwrap_or(f32::NEG_INFINITY);
        scored += 1;
        tokens.push(id);
    }

    Ok((scored > 0).then(|| total / scored as f32))
}

fn top_k(log_probs: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut ranked: Vec<(u32, f32)> = log_probs
        .iter()
        .enumerate()
        .skip(PADDING_INDEX as usize + 1)
        .filter(|(_, p)| !p.is_nan())
        .map(|(i, &p)| (i as u32, p))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const TOKENIZER: &str = r#"{
        "word_index": {"startseq": 1, "endseq": 2, "a": 3, "b": 4, "c": 5},
        "max_length": 6
    }"#;

    /// Next-word distribution keyed on the last token of the prefix.
    struct TableScorer {
        table: HashMap<u32, Vec<f32>>,
        calls: Cell<usize>,
    }

    impl TableScorer {
        fn new(rows: &[(u32, [f32; 6])]) -> Self {
            let table = rows
                .iter()
                .map(|(last, probs)| (*last, probs.iter().map(|p| p.ln()).collect()))
                .collect();
            Self {
                table,
                calls: Cell::new(0),
            }
        }
    }

    impl StepScorer for TableScorer {
        fn next_word_log_probs(&self, _features: &FeatureVector, prefix: &[u32]) -> Result<Vec<f32>, ProviderError> {
            self.calls.set(self.calls.get() + 1);
            let last = prefix.last().copied().unwrap_or_default();
            self.table
                .get(&last)
                .cloned()
                .ok_or_else(|| ProviderError::Inference(format!("no row for {}", last)))
        }
    }

    fn features() -> FeatureVector {
        FeatureVector::from(vec![0.0; 4])
    }

    // Greedy commits to "a" (0.5) and then ends (0.4): 0.20 overall.
    // Beam search keeps "b" (0.4) which ends with 0.9: 0.36 overall.
    fn garden_path() -> TableScorer {
        TableScorer::new(&[
            (1, [0.0, 0.0, 0.1, 0.5, 0.4, 0.0]),
            (3, [0.0, 0.0, 0.4, 0.0, 0.3, 0.3]),
            (4, [0.0, 0.0, 0.9, 0.05, 0.0, 0.05]),
            (5, [0.0, 0.0, 1.0, 0.0, 0.0, 0.0]),
        ])
    }

    #[test]
    fn vocabulary_loads_and_decodes() {
        let vocab = Vocabulary::from_json(TOKENIZER).unwrap();
        assert_eq!(vocab.start(), 1);
        assert_eq!(vocab.end(), 2);
        assert_eq!(vocab.size(), 6);
        assert_eq!(vocab.max_length(), 6);
        assert_eq!(vocab.decode(&[1, 3, 5, 2]), "a c");
    }

    #[test]
    fn vocabulary_requires_control_tokens() {
        let err = Vocabulary::from_json(r#"{"word_index": {"a": 1}}"#).unwrap_err();
        assert!(err.to_string().contains("startseq"));
        assert!(Vocabulary::from_json(r#"{"word_index": {"startseq": 0, "endseq": 1}}"#).is_err());
    }

    #[test]
    fn greedy_takes_the_locally_best_word() {
        let vocab = Vocabulary::from_json(TOKENIZER).unwrap();
        let caption = generate(&garden_path(), &vocab, &features(), SearchMethod::Greedy).unwrap();
        assert_eq!(caption, "a");
    }

    #[test]
    fn beam_search_recovers_the_better_sequence() {
        let vocab = Vocabulary::from_json(TOKENIZER).unwrap();
        let caption = generate(&garden_path(), &vocab, &features(), SearchMethod::Beam { width: 2 }).unwrap();
        assert_eq!(caption, "b");
    }

    #[test]
    fn beam_width_one_matches_greedy() {
        let vocab = Vocabulary::from_json(TOKENIZER).unwrap();
        let scorer = garden_path();
        let greedy = greedy_search(&scorer, &vocab, &features()).unwrap();
        let beam = beam_search(&scorer, &vocab, &features(), 1).unwrap();
        assert_eq!(greedy, beam);
    }

    #[test]
    fn decoding_stops_at_max_length() {
        let vocab = Vocabulary::from_json(TOKENIZER).unwrap();
        // Never emits the end token.
        let scorer = TableScorer::new(&[
            (1, [0.0, 0.0, 0.0, 1.0, 0.0, 0.0]),
            (3, [0.0, 0.0, 0.0, 1.0, 0.0, 0.0]),
            (4, [0.0, 0.0, 0.0, 1.0, 0.0, 0.0]),
            (5, [0.0, 0.0, 0.0, 1.0, 0.0, 0.0]),
        ]);
        let greedy = greedy_search(&scorer, &vocab, &features()).unwrap();
        assert_eq!(greedy.len(), vocab.max_length());
        let beam = beam_search(&scorer, &vocab, &features(), 3).unwrap();
        assert_eq!(beam.len(), vocab.max_length());
    }

    #[test]
    fn finished_beams_are_not_rescored() {
        let vocab = Vocabulary::from_json(TOKENIZER).unwrap();
        let scorer = garden_path();
        beam_search(&scorer, &vocab, &features(), 2).unwrap();
        // One call for the start token, one for each of the two live beams.
        assert_eq!(scorer.calls.get(), 3);
    }

    #[test]
    fn forced_score_averages_word_log_probs() {
        let vocab = Vocabulary::from_json(TOKENIZER).unwrap();
        let scorer = garden_path();
        let mean = mean_log_prob(&scorer, &vocab, &features(), &["B", "zebra", "c"])
            .unwrap()
            .unwrap();
        let expected = (0.4f32.ln() + 0.05f32.ln()) / 2.0;
        assert!((mean - expected).abs() < 1e-5);
        assert!(mean_log_prob(&scorer, &vocab, &features(), &[]).unwrap().is_none());
    }

    #[test]
    fn huge_beam_width_is_bounded_by_vocabulary() {
        let vocab = Vocabulary::from_json(TOKENIZER).unwrap();
        for width in [usize::MAX / 2, 1usize << 36, usize::MAX] {
            let caption = generate(&garden_path(), &vocab, &features(), SearchMethod::Beam { width }).unwrap();
            assert_eq!(caption, "b");
        }
    }

    #[test]
    fn scorer_errors_propagate() {
        let vocab = Vocabulary::from_json(TOKENIZER).unwrap();
        let scorer = TableScorer::new(&[]);
        assert!(generate(&scorer, &vocab, &features(), SearchMethod::Greedy).is_err());
    }
}
