pub mod sequence;

pub use sequence::{LabeledSequence, TokenSequence};
