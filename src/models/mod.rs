pub mod document;
pub mod event;
pub mod file;
pub mod indexable;

pub use document::{Document, Field, FieldKind};
pub use event::{max_version, UpdateEvent};
pub use file::FileInterpreter;
pub use indexable::{
    BoxedIndexable, Indexable, IndexableDocument, IndexableInterpreter, IndexingReq,
};
