//! Append-only analyzed document content
//!
//! A `ContentStore` holds the stored fields of every document ever added to a
//! segment together with a term -> docno posting map. Deletions are tracked
//! outside the store so that immutable content can be shared between readers
//! while delete sets evolve.
//!
//! Content lives in reference-counted chunks. Cloning a store only clones the
//! chunk list, and appending to a store whose tail chunk is shared starts a
//! new chunk instead of copying the old ones. Adjacent chunks of similar size
//! are folded together so lookups touch a logarithmic number of chunks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use super::types::{decode_uid, encode_uid, DocNo, Uid, DELETED_UID, UID_FIELD};
use crate::error::{Result, RtIndexError};
use crate::models::{Document, FieldKind};
use crate::tokenizer::Analyzer;

/// Build the posting key of a term within a field
pub fn term_key(field: &str, term: &str) -> String {
    format!("{}:{}", field, term)
}

/// A stored field value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredField {
    pub name: String,
    pub value: Vec<u8>,
}

/// Stored form of one document, including the embedded uid stamp
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub fields: Vec<StoredField>,
}

impl StoredDocument {
    /// Raw value of the first field with this name
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_slice())
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Embedded uid, `DELETED_UID` when the document carries no stamp
    pub fn uid(&self) -> Uid {
        self.get(UID_FIELD)
            .and_then(decode_uid)
            .unwrap_or(DELETED_UID)
    }

    fn heap_size(&self) -> usize {
        self.fields
            .iter()
            .map(|f| f.name.len() + f.value.len())
            .sum::<usize>()
            + std::mem::size_of::<StoredDocument>()
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedContent {
    docs: Vec<StoredDocument>,
    postings: Vec<(String, Vec<u32>)>,
}

/// Documents with chunk-local ordinals
#[derive(Clone, Debug, Default)]
struct ContentChunk {
    docs: Vec<StoredDocument>,
    postings: HashMap<String, RoaringBitmap>,
    size_bytes: usize,
}

impl ContentChunk {
    fn len(&self) -> u32 {
        self.docs.len() as u32
    }

    fn add_posting(&mut self, key: String, local: u32) {
        let bitmap = self.postings.entry(key).or_default();
        if bitmap.insert(local) {
            self.size_bytes += 4;
        }
    }

    fn push(&mut self, doc: StoredDocument) -> u32 {
        let local = self.len();
        self.size_bytes += doc.heap_size();
        self.docs.push(doc);
        local
    }

    /// Append every document of `other`, shifting its ordinals past ours
    fn extend_from(&mut self, other: &ContentChunk) {
        let shift = self.len();
        for doc in &other.docs {
            self.push(doc.clone());
        }
        for (key, bitmap) in &other.postings {
            for local in bitmap.iter() {
                self.add_posting(key.clone(), shift + local);
            }
        }
    }
}

/// Append-only document content with an inverted term map
#[derive(Clone, Debug, Default)]
pub struct ContentStore {
    chunks: Vec<Arc<ContentChunk>>,
    /// First docno of each chunk
    starts: Vec<u32>,
    max_doc: u32,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tail chunk for appending, started fresh if the current one is shared
    fn tail_mut(&mut self) -> (u32, &mut ContentChunk) {
        let shared = match self.chunks.last_mut() {
            Some(last) => Arc::get_mut(last).is_none(),
            None => true,
        };
        if shared {
            self.chunks.push(Arc::new(ContentChunk::default()));
            self.starts.push(self.max_doc);
        }
        let idx = self.chunks.len() - 1;
        (self.starts[idx], Arc::make_mut(&mut self.chunks[idx]))
    }

    /// Analyze and append a document stamped with `uid`
    pub fn add_document(&mut self, doc: &Document, uid: Uid, analyzer: &dyn Analyzer) -> DocNo {
        let mut stored = StoredDocument {
            fields: Vec::with_capacity(doc.fields.len() + 1),
        };
        stored.fields.push(StoredField {
            name: UID_FIELD.to_string(),
            value: encode_uid(uid),
        });

        let mut keys = Vec::new();
        for field in &doc.fields {
            match field.kind {
                FieldKind::Text => keys.extend(
                    analyzer
                        .analyze(&field.value)
                        .into_iter()
                        .map(|term| term_key(&field.name, &term)),
                ),
                FieldKind::Keyword => keys.push(term_key(&field.name, &field.value)),
                FieldKind::Stored => {}
            }
            stored.fields.push(StoredField {
                name: field.name.clone(),
                value: field.value.as_bytes().to_vec(),
            });
        }

        let (start, tail) = self.tail_mut();
        let local = tail.push(stored);
        for key in keys {
            tail.add_posting(key, local);
        }
        self.max_doc += 1;
        DocNo::new(start + local)
    }

    /// Append every document of `other` that is not in `deleted`.
    ///
    /// Returns the new docno of each source docno (`None` for dropped documents).
    pub fn append_live(&mut self, other: &ContentStore, deleted: &RoaringBitmap) -> Vec<Option<DocNo>> {
        let mut remap = Vec::with_capacity(other.max_doc as usize);
        let (start, tail) = self.tail_mut();
        let first_local = tail.len();
        for (i, doc) in other.docs().enumerate() {
            if deleted.contains(i as u32) {
                remap.push(None);
                continue;
            }
            let local = tail.push(doc.clone());
            remap.push(Some(DocNo::new(start + local)));
        }

        for (chunk, &chunk_start) in other.chunks.iter().zip(&other.starts) {
            for (key, bitmap) in &chunk.postings {
                for local in bitmap.iter() {
                    if let Some(Some(new_docno)) = remap.get((chunk_start + local) as usize) {
                        tail.add_posting(key.clone(), new_docno.as_u32() - start);
                    }
                }
            }
        }

        let appended = tail.len() - first_local;
        self.max_doc += appended;
        remap
    }

    /// Take over the chunks of `other` without copying their documents
    pub fn append(&mut self, other: ContentStore) {
        for chunk in other.chunks {
            if chunk.len() == 0 {
                continue;
            }
            self.starts.push(self.max_doc);
            self.max_doc += chunk.len();
            self.chunks.push(chunk);
            self.fold_tail();
        }
    }

    /// Merge the last two chunks while the older one is at most twice the newer
    fn fold_tail(&mut self) {
        while self.chunks.len() >= 2 {
            let n = self.chunks.len();
            if self.chunks[n - 2].len() > 2 * self.chunks[n - 1].len() {
                break;
            }
            let (Some(newer), Some(older)) = (self.chunks.pop(), self.chunks.pop()) else {
                break;
            };
            self.starts.pop();
            let mut merged = Arc::try_unwrap(older).unwrap_or_else(|shared| (*shared).clone());
            merged.extend_from(&newer);
            self.chunks.push(Arc::new(merged));
        }
    }

    /// Number of chunks backing this store
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn docs(&self) -> impl Iterator<Item = &StoredDocument> + '_ {
        self.chunks.iter().flat_map(|chunk| chunk.docs.iter())
    }

    /// Number of documents ever added, deleted or not
    pub fn max_doc(&self) -> u32 {
        self.max_doc
    }

    pub fn is_empty(&self) -> bool {
        self.max_doc == 0
    }

    pub fn document(&self, docno: DocNo) -> Option<&StoredDocument> {
        let global = docno.as_u32();
        if global >= self.max_doc {
            return None;
        }
        let idx = self.starts.partition_point(|&start| start <= global).checked_sub(1)?;
        self.chunks[idx].docs.get((global - self.starts[idx]) as usize)
    }

    /// Uid embedded in the document at `docno`
    pub fn uid(&self, docno: DocNo) -> Uid {
        self.document(docno)
            .map(StoredDocument::uid)
            .unwrap_or(DELETED_UID)
    }

    /// Dense uid array in physical document order
    pub fn scan_uids(&self) -> Vec<Uid> {
        self.docs().map(StoredDocument::uid).collect()
    }

    /// Documents containing the term key
    pub fn postings(&self, key: &str) -> Option<RoaringBitmap> {
        let mut found: Option<RoaringBitmap> = None;
        for (chunk, &start) in self.chunks.iter().zip(&self.starts) {
            if let Some(local) = chunk.postings.get(key) {
                let out = found.get_or_insert_with(RoaringBitmap::new);
                if start == 0 {
                    *out |= local;
                } else {
                    out.extend(local.iter().map(|d| start + d));
                }
            }
        }
        found
    }

    /// Distinct term keys
    pub fn term_count(&self) -> usize {
        if let [only] = self.chunks.as_slice() {
            return only.postings.len();
        }
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.postings.keys())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Approximate heap size in bytes
    pub fn size_bytes(&self) -> usize {
        self.chunks.iter().map(|chunk| chunk.size_bytes).sum()
    }

    /// Serialize the content for a sub-segment file
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut merged: HashMap<&str, Vec<u32>> = HashMap::new();
        for (chunk, &start) in self.chunks.iter().zip(&self.starts) {
            for (key, bitmap) in &chunk.postings {
                merged
                    .entry(key.as_str())
                    .or_default()
                    .extend(bitmap.iter().map(|d| start + d));
            }
        }
        let mut postings: Vec<(String, Vec<u32>)> = merged
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        postings.sort_by(|a, b| a.0.cmp(&b.0));

        let persisted = PersistedContent {
            docs: self.docs().cloned().collect(),
            postings,
        };
        Ok(bincode::serialize(&persisted)?)
    }

    /// Deserialize content written by `to_bytes`
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let persisted: PersistedContent = bincode::deserialize(data)?;
        let max_doc = persisted.docs.len() as u32;

        let mut chunk = ContentChunk::default();
        for doc in persisted.docs {
            chunk.push(doc);
        }
        for (key, docnos) in persisted.postings {
            if let Some(bad) = docnos.iter().find(|&&d| d >= max_doc) {
                return Err(RtIndexError::CorruptionSuspected(format!(
                    "posting {} for term {} beyond max_doc {}",
                    bad, key, max_doc
                )));
            }
            chunk.size_bytes += key.len() + docnos.len() * 4;
            chunk.postings.insert(key, docnos.into_iter().collect());
        }

        let mut store = ContentStore::new();
        if max_doc > 0 {
            store.chunks.push(Arc::new(chunk));
            store.starts.push(0);
            store.max_doc = max_doc;
        }
        Ok(store)
    }
}
