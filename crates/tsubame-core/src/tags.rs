//! # Tag Alphabet
//!
//! The label set of a CRF model. Real labels occupy indices `0..L`; two
//! synthetic sentinels follow them: BOS at `L` and EOS at `L + 1`. The
//! sentinels only anchor the dynamic programs and are never predicted.
//!
//! Label names follow the BIO scheme (`B-PER`, `I-PER`, `O`), which is
//! what [`TagSet::is_valid_transition`] uses to derive well-formedness
//! constraints.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TsubameError};

/// The role a label name plays in the BIO scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind<'a> {
    /// `B-X`: first token of an entity of type `X`.
    Begin(&'a str),
    /// `I-X`: continuation of an entity of type `X`.
    Inside(&'a str),
    /// `O`: not part of any entity.
    Outside,
    /// Anything else (single-token labels such as `PER` or `YEAR`).
    Single(&'a str),
}

impl<'a> TagKind<'a> {
    /// Classify a label name.
    pub fn parse(label: &'a str) -> Self {
        if label == "O" {
            TagKind::Outside
        } else if let Some(entity) = label.strip_prefix("B-") {
            TagKind::Begin(entity)
        } else if let Some(entity) = label.strip_prefix("I-") {
            TagKind::Inside(entity)
        } else {
            TagKind::Single(label)
        }
    }

    /// Entity type carried by this label, if any.
    pub fn entity_type(&self) -> Option<&'a str> {
        match *self {
            TagKind::Begin(e) | TagKind::Inside(e) | TagKind::Single(e) => Some(e),
            TagKind::Outside => None,
        }
    }
}

/// Fixed label alphabet extended with BOS/EOS sentinels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet {
    labels: Vec<String>,
}

impl TagSet {
    /// Display name of the begin-of-sequence sentinel.
    pub const BOS_LABEL: &'static str = "<BOS>";
    /// Display name of the end-of-sequence sentinel.
    pub const EOS_LABEL: &'static str = "<EOS>";

    /// Create a tag set from real label names.
    ///
    /// Fails on an empty list, duplicate names, or names that collide with
    /// the sentinels.
    pub fn new<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(TsubameError::InvalidLabel(
                "tag set must contain at least one label".into(),
            ));
        }
        for (i, label) in labels.iter().enumerate() {
            if label == Self::BOS_LABEL || label == Self::EOS_LABEL {
                return Err(TsubameError::InvalidLabel(format!(
                    "{label} is reserved for a sentinel"
                )));
            }
            if labels[..i].contains(label) {
                return Err(TsubameError::InvalidLabel(format!(
                    "duplicate label {label}"
                )));
            }
        }
        Ok(Self { labels })
    }

    /// The CoNLL-2003 BIO alphabet in its conventional index order.
    pub fn conll() -> Self {
        Self {
            labels: [
                "O", "B-ORG", "B-MISC", "B-PER", "I-PER", "B-LOC", "I-ORG", "I-MISC", "I-LOC",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }

    /// Number of real labels (L).
    pub fn num_labels(&self) -> usize {
        self.labels.len()
    }

    /// Size of the extended alphabet (L + 2).
    pub fn size(&self) -> usize {
        self.labels.len() + 2
    }

    /// Index of the BOS sentinel.
    pub fn bos(&self) -> usize {
        self.labels.len()
    }

    /// Index of the EOS sentinel.
    pub fn eos(&self) -> usize {
        self.labels.len() + 1
    }

    /// Whether `idx` is a real (predictable) label.
    pub fn is_real(&self, idx: usize) -> bool {
        idx < self.labels.len()
    }

    /// Real label names in index order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Name of the label at `idx`, including the sentinels.
    pub fn name(&self, idx: usize) -> Option<&str> {
        if idx == self.bos() {
            Some(Self::BOS_LABEL)
        } else if idx == self.eos() {
            Some(Self::EOS_LABEL)
        } else {
            self.labels.get(idx).map(String::as_str)
        }
    }

    /// Index of a real label by name.
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// Map label names to indices, failing on the first unknown name.
    pub fn encode<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|n| {
                let n = n.as_ref();
                self.index_of(n)
                    .ok_or_else(|| TsubameError::InvalidLabel(format!("unknown label {n}")))
            })
            .collect()
    }

    /// Map indices back to label names.
    pub fn decode(&self, indices: &[usize]) -> Result<Vec<String>> {
        indices
            .iter()
            .map(|&i| {
                self.labels
                    .get(i)
                    .cloned()
                    .ok_or_else(|| TsubameError::InvalidLabel(format!("index {i}")))
            })
            .collect()
    }

    /// Index of the `O` label, if the alphabet has one.
    pub fn outside(&self) -> Option<usize> {
        self.labels
            .iter()
            .position(|l| TagKind::parse(l) == TagKind::Outside)
    }

    /// Check if the BIO scheme allows `from` to be immediately followed by `to`.
    ///
    /// Only real labels and BOS are meaningful predecessors. An inside label
    /// `I-X` may follow `B-X` or `I-X` and nothing else (in particular not
    /// BOS). Nothing may transition into BOS or out of EOS.
    pub fn is_valid_transition(&self, from: usize, to: usize) -> bool {
        if to == self.bos() || from == self.eos() {
            return false;
        }
        let Some(to_name) = self.labels.get(to) else {
            // Into EOS: any real label may end a sequence.
            return to == self.eos() && from != self.bos();
        };
        match TagKind::parse(to_name) {
            TagKind::Inside(entity) => match self.labels.get(from).map(|n| TagKind::parse(n)) {
                Some(TagKind::Begin(e)) | Some(TagKind::Inside(e)) => e == entity,
                _ => false,
            },
            _ => true,
        }
    }
}

impl Default for TagSet {
    fn default() -> Self {
        Self::conll()
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.labels.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_indices() {
        let tags = TagSet::conll();
        assert_eq!(tags.num_labels(), 9);
        assert_eq!(tags.size(), 11);
        assert_eq!(tags.bos(), 9);
        assert_eq!(tags.eos(), 10);
        assert!(!tags.is_real(tags.bos()));
        assert_eq!(tags.name(tags.eos()), Some(TagSet::EOS_LABEL));
    }

    #[test]
    fn test_encode_decode() {
        let tags = TagSet::conll();
        let idx = tags.encode(&["B-PER", "I-PER", "O"]).unwrap();
        assert_eq!(idx, vec![3, 4, 0]);
        assert_eq!(tags.decode(&idx).unwrap(), vec!["B-PER", "I-PER", "O"]);
        assert!(tags.encode(&["B-FOO"]).is_err());
        assert!(tags.decode(&[tags.bos()]).is_err());
    }

    #[test]
    fn test_rejects_bad_alphabets() {
        assert!(TagSet::new(Vec::<String>::new()).is_err());
        assert!(TagSet::new(["O", "O"]).is_err());
        assert!(TagSet::new(["O", "<BOS>"]).is_err());
    }

    #[test]
    fn test_tag_kind() {
        assert_eq!(TagKind::parse("B-LOC"), TagKind::Begin("LOC"));
        assert_eq!(TagKind::parse("I-LOC"), TagKind::Inside("LOC"));
        assert_eq!(TagKind::parse("O"), TagKind::Outside);
        assert_eq!(TagKind::parse("PER").entity_type(), Some("PER"));
    }

    #[test]
    fn test_valid_transitions() {
        let tags = TagSet::conll();
        let b_per = tags.index_of("B-PER").unwrap();
        let i_per = tags.index_of("I-PER").unwrap();
        let o = tags.index_of("O").unwrap();

        assert!(tags.is_valid_transition(b_per, i_per));
        assert!(tags.is_valid_transition(i_per, i_per));
        assert!(tags.is_valid_transition(o, b_per));
        assert!(tags.is_valid_transition(tags.bos(), b_per));
        assert!(tags.is_valid_transition(i_per, tags.eos()));
    }

    #[test]
    fn test_invalid_transitions() {
        let tags = TagSet::conll();
        let b_per = tags.index_of("B-PER").unwrap();
        let i_per = tags.index_of("I-PER").unwrap();
        let i_loc = tags.index_of("I-LOC").unwrap();
        let o = tags.index_of("O").unwrap();

        assert!(!tags.is_valid_transition(o, i_per));
        assert!(!tags.is_valid_transition(b_per, i_loc));
        assert!(!tags.is_valid_transition(tags.bos(), i_per));
        assert!(!tags.is_valid_transition(o, tags.bos()));
        assert!(!tags.is_valid_transition(tags.eos(), o));
    }
}
