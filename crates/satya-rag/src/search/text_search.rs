//! Lexical (BM25) search over chunk text, backed by an in-RAM tantivy index.

use anyhow::{Context, Result};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{self, Schema, Value as TantivyValue, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};

use super::SearchHit;
use crate::rag::text::tokenize;
use crate::types::ChunkRef;

pub struct TextSearch {
    index: Index,
    reader: IndexReader,
    writer: parking_lot::Mutex<IndexWriter>,
    corpus_id_field: schema::Field,
    start_field: schema::Field,
    end_field: schema::Field,
    text_field: schema::Field,
    title_field: schema::Field,
}

impl TextSearch {
    fn build_schema() -> (
        Schema,
        schema::Field,
        schema::Field,
        schema::Field,
        schema::Field,
        schema::Field,
    ) {
        let mut sb = Schema::builder();
        let corpus_id_field = sb.add_text_field("corpus_id", STRING | STORED);
        let start_field = sb.add_u64_field("start", STORED);
        let end_field = sb.add_u64_field("end", STORED);
        let text_field = sb.add_text_field("text", TEXT);
        let title_field = sb.add_text_field("title", TEXT);
        (
            sb.build(),
            corpus_id_field,
            start_field,
            end_field,
            text_field,
            title_field,
        )
    }

    pub fn in_memory() -> Result<Self> {
        let (schema, corpus_id_field, start_field, end_field, text_field, title_field) =
            Self::build_schema();
        let index = Index::create_in_ram(schema);

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create Tantivy reader")?;

        let writer = index
            .writer_with_num_threads(1, 50_000_000)
            .context("Failed to create Tantivy writer")?;

        Ok(Self {
            index,
            reader,
            writer: parking_lot::Mutex::new(writer),
            corpus_id_field,
            start_field,
            end_field,
            text_field,
            title_field,
        })
    }

    pub fn index_chunk(&self, chunk: &ChunkRef, text: &str, title: &str) -> Result<()> {
        let writer = self.writer.lock();
        writer.add_document(doc!(
            self.corpus_id_field => chunk.corpus_id.as_str(),
            self.start_field => chunk.span.start as u64,
            self.end_field => chunk.span.end as u64,
            self.text_field => text,
            self.title_field => title,
        ))?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.commit().context("Tantivy commit failed")?;
        self.reader.reload()?;
        Ok(())
    }

    /// Free-text query. Query syntax is stripped first so user input can never
    /// fail to parse; a query with no searchable terms returns nothing.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let terms = tokenize(query);
        if terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let query_parser =
            QueryParser::for_index(&self.index, vec![self.text_field, self.title_field]);
        let parsed_query = query_parser.parse_query(&terms.join(" "))?;
        let top_docs = searcher.search(&parsed_query, &TopDocs::with_limit(k))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc = searcher.doc::<TantivyDocument>(doc_address)?;
            let corpus_id = doc
                .get_first(self.corpus_id_field)
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let start = doc.get_first(self.start_field).and_then(|v| v.as_u64());
            let end = doc.get_first(self.end_field).and_then(|v| v.as_u64());

            match (corpus_id, start, end) {
                (Some(id), Some(start), Some(end)) => {
                    results.push(SearchHit::new(
                        ChunkRef::new(id, start as usize, end as usize),
                        score,
                    ));
                }
                _ => tracing::warn!(?doc_address, "Indexed chunk is missing stored fields"),
            }
        }

        Ok(results)
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bm25_finds_matching_chunk() {
        let search = TextSearch::in_memory().unwrap();
        let a = ChunkRef::new("auth.md", 0, 33);
        let b = ChunkRef::new("lunch.md", 0, 35);
        search
            .index_chunk(&a, "Module X handles authentication.", "auth")
            .unwrap();
        search
            .index_chunk(&b, "The cafeteria serves lunch at noon.", "lunch")
            .unwrap();
        search.commit().unwrap();
        assert_eq!(search.num_docs(), 2);

        let hits = search.search("What does module X do?", 5).unwrap();
        assert_eq!(hits[0].chunk, a);
        assert!(hits.iter().all(|h| h.chunk != b));
    }

    #[test]
    fn test_query_syntax_is_neutralised() {
        let search = TextSearch::in_memory().unwrap();
        search
            .index_chunk(&ChunkRef::new("d", 0, 10), "title: (broken", "")
            .unwrap();
        search.commit().unwrap();
        assert!(search.search("title: (broken\"", 5).is_ok());
        assert!(search.search("?!", 5).unwrap().is_empty());
    }
}
