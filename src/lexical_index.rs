use std::{
    collections::HashSet,
    path::Path,
    sync::Mutex,
};

use tantivy::{
    DocAddress,
    Index,
    IndexReader,
    IndexWriter,
    TantivyDocument,
    Term,
    collector::{Count, DocSetCollector, TopDocs},
    doc,
    query::{BooleanQuery, BoostQuery, ConstScoreQuery, Occur, Query, TermQuery, TermSetQuery},
    schema::*,
    tokenizer::{
        Language,
        LowerCaser,
        RegexTokenizer,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
        TokenStream,
    },
};

use crate::{chunk::Chunk, error::Result, index_db::DocumentSummary, scope::DocScope};

/// Field names used in the schema.
pub mod fields {
    pub const CHUNK_ID: &str = "chunk_id";
    pub const DOC_ID: &str = "doc_id";
    pub const KIND: &str = "kind";
    pub const TEXT: &str = "text";
    pub const TEXT_EXACT: &str = "text_exact";
    pub const HEADINGS: &str = "headings";
    pub const NAME: &str = "name";
}

const KIND_CHUNK: &str = "chunk";
const KIND_DOCUMENT: &str = "document";

const STEM_TOKENIZER: &str = "en_stem";
const EXACT_TOKENIZER: &str = "exact";
/// Words, optionally joined by `-`, `.` or `/`, so codes like `ISO-26262`,
/// `v1.2` and `A/B` stay one token.
const EXACT_PATTERN: &str = r"[\p{L}\p{N}]+(?:[-./][\p{L}\p{N}]+)*";

const HEADINGS_BOOST: f32 = 1.5;
const NAME_BOOST: f32 = 2.0;
const WRITER_MEMORY: usize = 50_000_000;

/// A chunk matched by a lexical query.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub chunk_id: String,
    pub doc_id: String,
    pub score: f32,
}

/// A document matched by a catalog query.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogHit {
    pub doc_id: String,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LexicalStats {
    pub chunks: u64,
    pub documents: u64,
}

#[derive(Clone, Copy)]
struct SchemaFields {
    chunk_id: Field,
    doc_id: Field,
    kind: Field,
    text: Field,
    text_exact: Field,
    headings: Field,
    name: Field,
}

/// BM25 index over chunk text, plus a small catalog of document summaries.
///
/// Chunk and document records share one Tantivy index and are told apart
/// by the `kind` field.
pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
    writer: Mutex<Option<IndexWriter>>,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let chunk_id = builder.add_text_field(fields::CHUNK_ID, STRING | STORED);
    let doc_id = builder.add_text_field(fields::DOC_ID, STRING | STORED | FAST);
    let kind = builder.add_text_field(fields::KIND, STRING | STORED);

    let analyzed = |tokenizer: &str| {
        TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(tokenizer)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
    };
    let text = builder.add_text_field(fields::TEXT, analyzed(STEM_TOKENIZER));
    let text_exact = builder.add_text_field(fields::TEXT_EXACT, analyzed(EXACT_TOKENIZER));
    let headings = builder.add_text_field(fields::HEADINGS, analyzed(STEM_TOKENIZER));
    let name = builder.add_text_field(fields::NAME, analyzed(STEM_TOKENIZER).set_stored());

    let schema = builder.build();
    let fields = SchemaFields {
        chunk_id,
        doc_id,
        kind,
        text,
        text_exact,
        headings,
        name,
    };
    (schema, fields)
}

fn register_tokenizers(index: &Index) -> Result<()> {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(Language::English))
        .build();
    index.tokenizers().register(STEM_TOKENIZER, en_stem);

    let exact = TextAnalyzer::builder(RegexTokenizer::new(EXACT_PATTERN)?)
        .filter(RemoveLongFilter::limit(64))
        .filter(LowerCaser)
        .build();
    index.tokenizers().register(EXACT_TOKENIZER, exact);
    Ok(())
}

impl LexicalIndex {
    /// Open or create a lexical index at the given directory.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (schema, fields) = build_schema();

        let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        let index = if Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
        {
            Index::open(mmap_dir)?
        } else {
            Index::create(mmap_dir, schema, tantivy::IndexSettings::default())?
        };

        Self::from_index(index, fields)
    }

    /// Create an in-memory index (for testing).
    pub fn open_in_ram() -> Result<Self> {
        let (schema, fields) = build_schema();
        Self::from_index(Index::create_in_ram(schema), fields)
    }

    fn from_index(index: Index, fields: SchemaFields) -> Result<Self> {
        register_tokenizers(&index)?;
        let reader = index.reader()?;
        Ok(Self {
            index,
            reader,
            fields,
            writer: Mutex::new(None),
        })
    }

    /// Run `f` against the (lazily created) writer and commit.
    fn write(&self, f: impl FnOnce(&IndexWriter, SchemaFields) -> Result<()>) -> Result<()> {
        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            *guard = Some(self.index.writer(WRITER_MEMORY)?);
        }
        if let Some(writer) = guard.as_mut() {
            f(writer, self.fields)?;
            writer.commit()?;
        }
        drop(guard);
        self.reader.reload()?;
        Ok(())
    }

    /// Index chunk text, replacing any existing rows for the same chunk IDs.
    pub fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        self.write(|writer, f| {
            for chunk in chunks {
                writer.delete_term(Term::from_field_text(f.chunk_id, &chunk.chunk_id));
                writer.add_document(doc!(
                    f.chunk_id => chunk.chunk_id.as_str(),
                    f.doc_id => chunk.doc_id.as_str(),
                    f.kind => KIND_CHUNK,
                    f.text => chunk.text.as_str(),
                    f.text_exact => chunk.text.as_str(),
                    f.headings => chunk.heading_path.join(" "),
                ))?;
            }
            Ok(())
        })
    }

    /// Index document summaries for the catalog router.
    pub fn upsert_documents(&self, docs: &[DocumentSummary]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        self.write(|writer, f| {
            for d in docs {
                writer.delete_query(document_query(f, &d.doc_id))?;
                writer.add_document(doc!(
                    f.doc_id => d.doc_id.as_str(),
                    f.kind => KIND_DOCUMENT,
                    f.name => d.name.as_str(),
                    f.text => d.summary.as_str(),
                    f.text_exact => format!("{}\n{}", d.name, d.summary),
                ))?;
            }
            Ok(())
        })
    }

    pub fn delete_chunks(&self, chunk_ids: &[String]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        self.write(|writer, f| {
            for id in chunk_ids {
                writer.delete_term(Term::from_field_text(f.chunk_id, id));
            }
            Ok(())
        })
    }

    pub fn delete_documents(&self, doc_ids: &[String]) -> Result<()> {
        if doc_ids.is_empty() {
            return Ok(());
        }
        self.write(|writer, f| {
            for id in doc_ids {
                writer.delete_query(document_query(f, id))?;
            }
            Ok(())
        })
    }

    /// Drop every record.
    pub fn clear(&self) -> Result<()> {
        self.write(|writer, _| {
            writer.delete_all_documents()?;
            Ok(())
        })
    }

    /// BM25 search over chunk text and headings, restricted to `scope`.
    ///
    /// Results are ordered by score descending, then `chunk_id` ascending.
    pub fn search(&self, query: &str, limit: usize, scope: &DocScope) -> Result<Vec<LexicalHit>> {
        if limit == 0 || scope.is_empty() {
            return Ok(Vec::new());
        }
        let f = self.fields;

        let mut clauses = self.term_clauses(f.text, query, 1.0)?;
        clauses.extend(self.term_clauses(f.text_exact, query, 1.0)?);
        clauses.extend(self.term_clauses(f.headings, query, HEADINGS_BOOST)?);
        if clauses.is_empty() {
            return Ok(Vec::new());
        }

        let mut must: Vec<(Occur, Box<dyn Query>)> = vec![
            (Occur::Must, Box::new(BooleanQuery::new(clauses))),
            (Occur::Must, filter(kind_query(f, KIND_CHUNK))),
        ];
        if let DocScope::Only(ids) = scope {
            let terms = ids.iter().map(|id| Term::from_field_text(f.doc_id, id));
            must.push((Occur::Must, filter(Box::new(TermSetQuery::new(terms)))));
        }

        let hits = self.run(&BooleanQuery::new(must), limit, |doc| {
            (extract_text(doc, f.chunk_id), extract_text(doc, f.doc_id))
        })?;
        let mut hits: Vec<LexicalHit> = hits
            .into_iter()
            .map(|(score, (chunk_id, doc_id))| LexicalHit {
                chunk_id,
                doc_id,
                score,
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        Ok(hits)
    }

    /// BM25 search over document names and summaries.
    pub fn search_catalog(&self, query: &str, limit: usize) -> Result<Vec<CatalogHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let f = self.fields;

        let mut clauses = self.term_clauses(f.name, query, NAME_BOOST)?;
        clauses.extend(self.term_clauses(f.text, query, 1.0)?);
        clauses.extend(self.term_clauses(f.text_exact, query, 1.0)?);
        if clauses.is_empty() {
            return Ok(Vec::new());
        }

        let query = BooleanQuery::new(vec![
            (Occur::Must, Box::new(BooleanQuery::new(clauses))),
            (Occur::Must, filter(kind_query(f, KIND_DOCUMENT))),
        ]);
        let mut hits: Vec<CatalogHit> = self
            .run(&query, limit, |doc| extract_text(doc, f.doc_id))?
            .into_iter()
            .map(|(score, doc_id)| CatalogHit { doc_id, score })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.doc_id.cmp(&b.doc_id)));
        Ok(hits)
    }

    /// Every chunk ID currently in the index.
    pub fn chunk_ids(&self) -> Result<HashSet<String>> {
        self.reader.reload()?;
        let searcher = self.reader.searcher();
        let addresses = searcher.search(&*kind_query(self.fields, KIND_CHUNK), &DocSetCollector)?;
        let mut ids = HashSet::with_capacity(addresses.len());
        for address in addresses {
            let doc: TantivyDocument = searcher.doc(address)?;
            ids.insert(extract_text(&doc, self.fields.chunk_id));
        }
        Ok(ids)
    }

    pub fn stats(&self) -> Result<LexicalStats> {
        self.reader.reload()?;
        let searcher = self.reader.searcher();
        Ok(LexicalStats {
            chunks: searcher.search(&*kind_query(self.fields, KIND_CHUNK), &Count)? as u64,
            documents: searcher.search(&*kind_query(self.fields, KIND_DOCUMENT), &Count)? as u64,
        })
    }

    /// One `Should` clause per distinct analyzed query term on `field`.
    fn term_clauses(
        &self,
        field: Field,
        query: &str,
        boost: f32,
    ) -> Result<Vec<(Occur, Box<dyn Query>)>> {
        let mut analyzer = self.index.tokenizer_for_field(field)?;
        let mut stream = analyzer.token_stream(query);
        let mut seen = HashSet::new();
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        while stream.advance() {
            let token = stream.token().text.clone();
            if !seen.insert(token.clone()) {
                continue;
            }
            let term = TermQuery::new(
                Term::from_field_text(field, &token),
                IndexRecordOption::WithFreqs,
            );
            let clause: Box<dyn Query> = if boost == 1.0 {
                Box::new(term)
            } else {
                Box::new(BoostQuery::new(Box::new(term), boost))
            };
            clauses.push((Occur::Should, clause));
        }
        Ok(clauses)
    }

    fn run<T>(
        &self,
        query: &dyn Query,
        limit: usize,
        extract: impl Fn(&TantivyDocument) -> T,
    ) -> Result<Vec<(f32, T)>> {
        self.reader.reload()?;
        let searcher = self.reader.searcher();
        let top: Vec<(f32, DocAddress)> =
            searcher.search(query, &TopDocs::with_limit(limit))?;
        let mut out = Vec::with_capacity(top.len());
        for (score, address) in top {
            let doc: TantivyDocument = searcher.doc(address)?;
            out.push((score, extract(&doc)));
        }
        Ok(out)
    }
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex").finish_non_exhaustive()
    }
}

fn kind_query(f: SchemaFields, kind: &str) -> Box<dyn Query> {
    Box::new(TermQuery::new(
        Term::from_field_text(f.kind, kind),
        IndexRecordOption::Basic,
    ))
}

fn document_query(f: SchemaFields, doc_id: &str) -> Box<dyn Query> {
    Box::new(BooleanQuery::new(vec![
        (Occur::Must, kind_query(f, KIND_DOCUMENT)),
        (
            Occur::Must,
            Box::new(TermQuery::new(
                Term::from_field_text(f.doc_id, doc_id),
                IndexRecordOption::Basic,
            )),
        ),
    ]))
}

/// Wrap a restriction so it does not contribute to the score.
fn filter(query: Box<dyn Query>) -> Box<dyn Query> {
    Box::new(ConstScoreQuery::new(query, 0.0))
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Locator, Modality, SourceInfo};

    fn chunk(doc_id: &str, offset: u64, headings: &[&str], text: &str) -> Chunk {
        Chunk::new(
            doc_id,
            Modality::Text,
            offset,
            SourceInfo {
                converted_path: format!("{doc_id}.md"),
                name: doc_id.to_string(),
                file_type: "md".into(),
            },
            Locator::Lines { start: 1, end: 1 },
            headings.iter().map(|h| h.to_string()).collect(),
            text.to_string(),
        )
    }

    fn summary(doc_id: &str, name: &str, text: &str) -> DocumentSummary {
        DocumentSummary {
            doc_id: doc_id.into(),
            source_path: format!("{name}.pdf"),
            name: name.into(),
            file_type: "pdf".into(),
            duration_ms: None,
            chunk_count: 1,
            summary: text.into(),
            indexed_at: 0,
        }
    }

    fn ids(hits: &[LexicalHit]) -> Vec<&str> {
        hits.iter().map(|h| h.chunk_id.as_str()).collect()
    }

    #[test]
    fn stemming_works() {
        let idx = LexicalIndex::open_in_ram().unwrap();
        let c = chunk("d1", 0, &[], "the runners were running quickly");
        idx.upsert_chunks(std::slice::from_ref(&c)).unwrap();

        let hits = idx.search("run", 10, &DocScope::All).unwrap();
        assert_eq!(ids(&hits), vec![c.chunk_id.as_str()]);
    }

    #[test]
    fn exact_codes_match() {
        let idx = LexicalIndex::open_in_ram().unwrap();
        let a = chunk("d1", 0, &[], "compliance with ISO-26262 is mandatory");
        let b = chunk("d1", 1, &[], "the iso standard and 26262 other things");
        idx.upsert_chunks(&[a.clone(), b.clone()]).unwrap();

        let hits = idx.search("ISO-26262", 10, &DocScope::All).unwrap();
        assert_eq!(hits[0].chunk_id, a.chunk_id);
    }

    #[test]
    fn special_characters_do_not_break_queries() {
        let idx = LexicalIndex::open_in_ram().unwrap();
        idx.upsert_chunks(&[chunk("d1", 0, &[], "A/B testing results")]).unwrap();
        assert_eq!(idx.search("A/B (test) \"+\"", 10, &DocScope::All).unwrap().len(), 1);
        assert!(idx.search("   ", 10, &DocScope::All).unwrap().is_empty());
    }

    #[test]
    fn headings_boost() {
        let idx = LexicalIndex::open_in_ram().unwrap();
        let a = chunk("d1", 0, &["Budget"], "budget numbers for the year");
        let b = chunk("d2", 0, &["Intro"], "numbers for the budget year");
        idx.upsert_chunks(&[a.clone(), b]).unwrap();

        let hits = idx.search("budget", 10, &DocScope::All).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, a.chunk_id);
    }

    #[test]
    fn scope_filters() {
        let idx = LexicalIndex::open_in_ram().unwrap();
        let a = chunk("d1", 0, &[], "hello from one");
        let b = chunk("d2", 0, &[], "hello from two");
        idx.upsert_chunks(&[a, b.clone()]).unwrap();

        assert_eq!(idx.search("hello", 10, &DocScope::All).unwrap().len(), 2);
        let only = DocScope::Only(["d2".to_string()].into());
        assert_eq!(ids(&idx.search("hello", 10, &only).unwrap()), vec![b.chunk_id.as_str()]);
        let none = DocScope::Only(Default::default());
        assert!(idx.search("hello", 10, &none).unwrap().is_empty());
    }

    #[test]
    fn upsert_replaces_and_delete_removes() {
        let idx = LexicalIndex::open_in_ram().unwrap();
        let mut c = chunk("d1", 0, &[], "old content");
        idx.upsert_chunks(std::slice::from_ref(&c)).unwrap();
        c.text = "new content".into();
        idx.upsert_chunks(std::slice::from_ref(&c)).unwrap();

        assert_eq!(idx.search("content", 10, &DocScope::All).unwrap().len(), 1);
        assert!(idx.search("old", 10, &DocScope::All).unwrap().is_empty());
        assert_eq!(idx.chunk_ids().unwrap(), HashSet::from([c.chunk_id.clone()]));

        idx.delete_chunks(&[c.chunk_id.clone()]).unwrap();
        assert!(idx.chunk_ids().unwrap().is_empty());
    }

    #[test]
    fn catalog_is_separate_from_chunks() {
        let idx = LexicalIndex::open_in_ram().unwrap();
        idx.upsert_chunks(&[chunk("d1", 0, &[], "quarterly revenue")]).unwrap();
        idx.upsert_documents(&[
            summary("d1", "finance-report", "Revenue; Costs\nquarterly revenue"),
            summary("d2", "team-handbook", "Onboarding\nwelcome aboard"),
        ])
        .unwrap();

        let stats = idx.stats().unwrap();
        assert_eq!(stats, LexicalStats { chunks: 1, documents: 2 });

        let hits = idx.search_catalog("handbook onboarding", 10).unwrap();
        assert_eq!(hits[0].doc_id, "d2");
        // Chunk searches never see catalog records.
        assert_eq!(idx.search("onboarding", 10, &DocScope::All).unwrap().len(), 0);

        idx.delete_documents(&["d2".to_string()]).unwrap();
        assert!(idx.search_catalog("handbook", 10).unwrap().is_empty());
        assert_eq!(idx.stats().unwrap().chunks, 1);
    }

    #[test]
    fn disk_persistence() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("tantivy");
        let c = chunk("d1", 0, &[], "persistent data");
        {
            let idx = LexicalIndex::open(&dir).unwrap();
            idx.upsert_chunks(std::slice::from_ref(&c)).unwrap();
        }
        let idx = LexicalIndex::open(&dir).unwrap();
        let hits = idx.search("persistent", 10, &DocScope::All).unwrap();
        assert_eq!(ids(&hits), vec![c.chunk_id.as_str()]);
        assert!(idx.chunk_ids().unwrap().contains(&c.chunk_id));
    }
}
