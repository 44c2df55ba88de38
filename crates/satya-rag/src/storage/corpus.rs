//! In-process document store.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

use super::CorpusReader;
use crate::processing::TextChunker;
use crate::types::ChunkRef;

#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub chunk: ChunkRef,
    pub heading: Option<String>,
}

pub struct InMemoryCorpus {
    documents: BTreeMap<String, Document>,
    chunks: Vec<StoredChunk>,
    chunker: TextChunker,
}

impl InMemoryCorpus {
    pub fn new(chunker: TextChunker) -> Self {
        Self {
            documents: BTreeMap::new(),
            chunks: Vec::new(),
            chunker,
        }
    }

    /// Store a document and chunk it. Returns the number of chunks added.
    pub fn add_document(
        &mut self,
        id: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<usize> {
        let id = id.into();
        if self.documents.contains_key(&id) {
            bail!("document '{}' is already in the corpus", id);
        }
        let text = text.into();

        let chunks = self.chunker.chunk(&text);
        let added = chunks.len();
        self.chunks.extend(chunks.into_iter().map(|c| StoredChunk {
            chunk: ChunkRef {
                corpus_id: id.clone(),
                span: c.span,
            },
            heading: c.heading,
        }));

        tracing::debug!(doc = %id, chunks = added, bytes = text.len(), "Document added");
        self.documents.insert(
            id.clone(),
            Document {
                id,
                title: title.into(),
                text,
            },
        );
        Ok(added)
    }

    /// Load every `.txt` and `.md` file under `dir`. Corpus ids are paths
    /// relative to `dir` with `/` separators.
    pub fn from_dir(dir: &Path, chunker: TextChunker) -> Result<Self> {
        let mut corpus = Self::new(chunker);

        let mut paths: Vec<_> = WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable corpus entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("txt") | Some("md")
                )
            })
            .collect();
        paths.sort();

        for path in paths {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let relative = path.strip_prefix(dir).unwrap_or(&path);
            let id = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let title = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| id.clone());
            corpus.add_document(id, title, text)?;
        }

        tracing::info!(
            dir = %dir.display(),
            documents = corpus.documents.len(),
            chunks = corpus.chunks.len(),
            "Corpus loaded"
        );
        Ok(corpus)
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    pub fn chunks(&self) -> &[StoredChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Exact slice of the source document covered by `chunk`.
    pub fn slice(&self, chunk: &ChunkRef) -> Result<&str> {
        let doc = self
            .documents
            .get(&chunk.corpus_id)
            .ok_or_else(|| anyhow!("unknown corpus id '{}'", chunk.corpus_id))?;
        doc.text
            .get(chunk.span.start..chunk.span.end)
            .ok_or_else(|| anyhow!("span {} is outside document text", chunk))
    }
}

impl Default for InMemoryCorpus {
    fn default() -> Self {
        Self::new(TextChunker::default())
    }
}

#[async_trait]
impl CorpusReader for InMemoryCorpus {
    async fn chunk_text(&self, chunk: &ChunkRef) -> Result<String> {
        self.slice(chunk).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chunk_text_resolves_exact_slice() {
        let mut corpus = InMemoryCorpus::default();
        let added = corpus
            .add_document("auth.md", "auth", "Module X handles authentication.")
            .unwrap();
        assert_eq!(added, 1);

        let chunk = corpus.chunks()[0].chunk.clone();
        assert_eq!(
            corpus.chunk_text(&chunk).await.unwrap(),
            "Module X handles authentication."
        );
        assert!(corpus
            .chunk_text(&ChunkRef::new("auth.md", 0, 999))
            .await
            .is_err());
        assert!(corpus.chunk_text(&ChunkRef::new("nope", 0, 1)).await.is_err());
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let mut corpus = InMemoryCorpus::default();
        corpus.add_document("a", "a", "first text").unwrap();
        assert!(corpus.add_document("a", "a", "second text").is_err());
    }

    #[test]
    fn test_from_dir_reads_text_and_markdown_only() {
        let dir = std::env::temp_dir().join(format!("satya-corpus-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("a.txt"), "Module X handles authentication.").unwrap();
        std::fs::write(dir.join("nested").join("b.md"), "# B\nThe cafeteria serves lunch.").unwrap();
        std::fs::write(dir.join("c.bin"), "ignored").unwrap();

        let corpus = InMemoryCorpus::from_dir(&dir, TextChunker::default()).unwrap();
        let ids: Vec<&str> = corpus.documents().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a.txt", "nested/b.md"]);
        assert_eq!(corpus.document("nested/b.md").unwrap().title, "b");

        std::fs::remove_dir_all(&dir).ok();
    }
}
