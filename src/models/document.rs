use serde::{Deserialize, Serialize};

/// How a field participates in the index
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Analyzed into terms and stored
    Text,
    /// Indexed as a single untouched term and stored
    Keyword,
    /// Stored only
    Stored,
}

/// A named document field
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub kind: FieldKind,
}

/// Content handed to the index by an interpreter
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub fields: Vec<Field>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an analyzed field
    pub fn with_text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_field(name, value, FieldKind::Text)
    }

    /// Add a single-term field
    pub fn with_keyword(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_field(name, value, FieldKind::Keyword)
    }

    /// Add a stored-only field
    pub fn with_stored(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_field(name, value, FieldKind::Stored)
    }

    pub fn with_field(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        kind: FieldKind,
    ) -> Self {
        self.fields.push(Field {
            name: name.into(),
            value: value.into(),
            kind,
        });
        self
    }

    /// First value of the named field
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
