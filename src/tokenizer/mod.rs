//! Text analysis used to turn document fields into index terms

mod tokenizer;

pub use tokenizer::*;
