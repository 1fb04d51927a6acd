use anyhow::{bail, format_err, Error};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Largest number of stages a vocabulary can hold; stage codes are `u16`.
pub const MAX_STAGES: usize = u16::MAX as usize + 1;

/// A fixed, ordered vocabulary of developmental stages. The position of a stage in the
/// vocabulary is its rank along the expected differentiation order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct StageVocabulary {
    levels: Vec<String>,
}

impl StageVocabulary {
    /// Create a vocabulary from stage names, earliest stage first.
    pub fn new(levels: Vec<String>) -> Result<StageVocabulary, Error> {
        if levels.is_empty() {
            bail!("stage vocabulary is empty");
        }
        if levels.len() > MAX_STAGES {
            bail!(
                "{} distinct stages exceed the limit of {}; is the stage column the right one?",
                levels.len(),
                MAX_STAGES
            );
        }
        let mut seen = HashSet::new();
        for level in &levels {
            if level.is_empty() {
                bail!("stage vocabulary contains an empty stage name");
            }
            if !seen.insert(level.as_str()) {
                bail!("stage '{}' appears more than once in the vocabulary", level);
            }
        }
        Ok(StageVocabulary { levels })
    }

    /// Build a vocabulary from the order in which stages first appear in `labels`.
    /// Only meaningful when the labels happen to be sorted by stage.
    pub fn infer_from_labels<S: AsRef<str>>(labels: &[S]) -> Result<StageVocabulary, Error> {
        let mut seen = HashSet::new();
        let mut levels: Vec<String> = Vec::new();
        for label in labels {
            let label = label.as_ref();
            if seen.insert(label) {
                levels.push(label.to_string());
            }
        }
        StageVocabulary::new(levels)
    }

    /// Position of `stage` in the vocabulary.
    pub fn position(&self, stage: &str) -> Option<usize> {
        self.levels.iter().position(|l| l == stage)
    }

    /// Stage names, earliest first.
    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Always false for a constructed vocabulary.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

impl TryFrom<Vec<String>> for StageVocabulary {
    type Error = Error;

    fn try_from(levels: Vec<String>) -> Result<Self, Self::Error> {
        StageVocabulary::new(levels)
    }
}

impl From<StageVocabulary> for Vec<String> {
    fn from(vocab: StageVocabulary) -> Self {
        vocab.levels
    }
}

/// Per-cell stage labels, stored as codes into a `StageVocabulary`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageLabels {
    vocabulary: StageVocabulary,
    codes: Vec<u16>,
}

impl StageLabels {
    /// Encode string labels. Fails on the first label that is not part of `vocabulary`.
    pub fn from_strings<S: AsRef<str>>(vocabulary: StageVocabulary, labels: &[S]) -> Result<StageLabels, Error> {
        let codes = labels
            .iter()
            .enumerate()
            .map(|(cell, label)| {
                let label = label.as_ref();
                vocabulary.position(label).and_then(|p| u16::try_from(p).ok()).ok_or_else(|| {
                    format_err!(
                        "cell {} has stage '{}', which is not in the vocabulary {:?}",
                        cell,
                        label,
                        vocabulary.levels()
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StageLabels { vocabulary, codes })
    }

    /// The vocabulary the codes refer to.
    pub fn vocabulary(&self) -> &StageVocabulary {
        &self.vocabulary
    }

    /// Stage name of `cell`.
    pub fn stage_of(&self, cell: usize) -> &str {
        &self.vocabulary.levels[self.codes[cell] as usize]
    }

    /// Stage rank of `cell`: 0 for the earliest stage.
    pub fn code_of(&self, cell: usize) -> usize {
        self.codes[cell] as usize
    }

    /// Stage ranks of all cells.
    pub fn codes(&self) -> impl Iterator<Item = usize> + '_ {
        self.codes.iter().map(|&c| c as usize)
    }

    /// Indices of the cells labelled `stage`, in cell order. None if the stage is unknown.
    pub fn cells_in_stage(&self, stage: &str) -> Option<Vec<usize>> {
        let code = self.vocabulary.position(stage)? as u16;
        Some(
            self.codes
                .iter()
                .enumerate()
                .filter(|&(_, &c)| c == code)
                .map(|(i, _)| i)
                .collect(),
        )
    }

    /// Number of cells per stage, in vocabulary order.
    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.vocabulary.len()];
        for &c in &self.codes {
            counts[c as usize] += 1;
        }
        counts
    }

    /// Restrict to the given cells, in the given order.
    pub fn select(&self, cells: &[usize]) -> StageLabels {
        StageLabels {
            vocabulary: self.vocabulary.clone(),
            codes: cells.iter().map(|&c| self.codes[c]).collect(),
        }
    }

    /// Number of labelled cells.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// True if no cells are labelled.
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn vocab() -> StageVocabulary {
        StageVocabulary::new(vec!["zygote".to_string(), "2cell".to_string(), "4cell".to_string()]).unwrap()
    }

    #[test]
    fn test_vocabulary_rejects_duplicates() {
        assert!(StageVocabulary::new(vec![]).is_err());
        assert!(StageVocabulary::new(vec!["a".to_string(), "a".to_string()]).is_err());
        assert_eq!(vocab().position("4cell"), Some(2));
        assert_eq!(vocab().position("8cell"), None);
    }

    #[test]
    fn test_infer_from_labels() {
        let v = StageVocabulary::infer_from_labels(&["b", "b", "a", "c", "a"]).unwrap();
        assert_eq!(v.levels(), &["b", "a", "c"]);

        // a per-cell id column mistaken for stages
        let ids: Vec<String> = (0..MAX_STAGES + 1).map(|i| format!("cell{i}")).collect();
        let err = StageVocabulary::infer_from_labels(&ids).unwrap_err();
        assert!(err.to_string().contains("65537 distinct stages"));
        assert!(StageVocabulary::infer_from_labels(&ids[..MAX_STAGES]).is_ok());
    }

    #[test]
    fn test_labels() {
        let labels = StageLabels::from_strings(vocab(), &["2cell", "zygote", "2cell", "4cell"]).unwrap();
        assert_eq!(labels.len(), 4);
        assert_eq!(labels.stage_of(0), "2cell");
        assert_eq!(labels.code_of(3), 2);
        assert_eq!(labels.counts(), vec![1, 2, 1]);
        assert_eq!(labels.cells_in_stage("2cell"), Some(vec![0, 2]));
        assert_eq!(labels.cells_in_stage("16cell"), None);
        assert_eq!(labels.select(&[3, 1]).codes().collect::<Vec<_>>(), vec![2, 0]);

        let err = StageLabels::from_strings(vocab(), &["zygote", "blast"]).unwrap_err();
        assert!(err.to_string().contains("blast"));
    }
}
