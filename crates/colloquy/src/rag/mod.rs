//! Retrieval-augmented generation: chunking and indexing documents, and
//! pulling back the chunks most relevant to a query.
//!
//! Retrieval is best-effort by contract. Failures propagate out of this
//! module, but the coordinator treats them as "no augmentation", never as a
//! fatal error for the surrounding chat turn.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::EngineError;
use crate::model::ModelCode;
use crate::providers::factory::ResolveTransport;

pub type KnowledgeBaseId = u64;
pub type DocumentId = u64;

pub const CHUNK_TOKENS: usize = 512;
pub const CHUNK_OVERLAP: usize = 64;

#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    pub id: KnowledgeBaseId,
    pub name: String,
    pub embedding_model: ModelCode,
    pub top_k: usize,
    /// Maximum-distance-fraction cutoff: chunks scoring below `1 - top_p`
    /// are discarded. Not a nucleus-sampling parameter despite the name.
    pub top_p: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeDocument {
    pub id: DocumentId,
    pub base_id: KnowledgeBaseId,
    pub title: String,
    pub chunk_count: usize,
}

/// An embedded slice of a document. Created once at indexing time and
/// immutable afterwards; deleting the parent document cascades.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeChunk {
    pub document_id: DocumentId,
    pub seq: usize,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: HashMap<String, String>,
}

/// Resolves a knowledge-base id to its definition. Implemented by the host
/// application's settings repository; tests use a map.
pub trait KnowledgeBaseLookup: Send + Sync {
    fn get(&self, id: KnowledgeBaseId) -> Option<KnowledgeBase>;
}

impl KnowledgeBaseLookup for HashMap<KnowledgeBaseId, KnowledgeBase> {
    fn get(&self, id: KnowledgeBaseId) -> Option<KnowledgeBase> {
        HashMap::get(self, &id).cloned()
    }
}

/// Vector store contract: k-NN restricted to one knowledge base.
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    async fn insert_chunks(
        &self,
        base: KnowledgeBaseId,
        chunks: Vec<KnowledgeChunk>,
    ) -> Result<(), EngineError>;

    async fn delete_document(&self, document: DocumentId) -> Result<(), EngineError>;

    /// The `k` nearest chunks by cosine similarity, scoped to `base`.
    /// Returned in arbitrary order.
    async fn knn(
        &self,
        base: KnowledgeBaseId,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<(KnowledgeChunk, f32)>, EngineError>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Fixed-size overlapping windows over whitespace tokens.
pub fn chunk_text(text: &str, chunk_tokens: usize, overlap: usize) -> Vec<String> {
    assert!(overlap < chunk_tokens);
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return vec![];
    }
    let step = chunk_tokens - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_tokens).min(tokens.len());
        chunks.push(tokens[start..end].join(" "));
        if end == tokens.len() {
            break;
        }
        start += step;
    }
    chunks
}

pub struct RagEngine {
    index: std::sync::Arc<dyn KnowledgeIndex>,
    resolver: std::sync::Arc<dyn ResolveTransport>,
}

impl RagEngine {
    pub fn new(
        index: std::sync::Arc<dyn KnowledgeIndex>,
        resolver: std::sync::Arc<dyn ResolveTransport>,
    ) -> Self {
        Self { index, resolver }
    }

    /// Split `text` into overlapping chunks, embed each through the base's
    /// embedding model, and persist the chunks keyed to `document`.
    pub async fn index_document(
        &self,
        base: &KnowledgeBase,
        mut document: KnowledgeDocument,
        text: &str,
    ) -> Result<KnowledgeDocument, EngineError> {
        let pieces = chunk_text(text, CHUNK_TOKENS, CHUNK_OVERLAP);
        if pieces.is_empty() {
            document.chunk_count = 0;
            return Ok(document);
        }

        let transport = self.resolver.resolve(&base.embedding_model.provider)?;
        let embeddings = transport
            .embeddings(&base.embedding_model.code, pieces.clone())
            .await
            .map_err(|e| EngineError::Retrieval(e.to_string()))?;
        if embeddings.len() != pieces.len() {
            return Err(EngineError::Retrieval(format!(
                "Embedding count mismatch: {} chunks, {} vectors",
                pieces.len(),
                embeddings.len()
            )));
        }

        let chunks: Vec<KnowledgeChunk> = pieces
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(seq, (text, embedding))| KnowledgeChunk {
                document_id: document.id,
                seq,
                text,
                embedding,
                metadata: HashMap::from([("title".to_string(), document.title.clone())]),
            })
            .collect();

        document.chunk_count = chunks.len();
        debug!(
            document = document.id,
            chunks = document.chunk_count,
            "indexed document"
        );
        self.index.insert_chunks(base.id, chunks).await?;
        Ok(document)
    }

    pub async fn delete_document(&self, document: DocumentId) -> Result<(), EngineError> {
        self.index.delete_document(document).await
    }

    /// Embed `query` and return the chunks scoring at or above `1 - top_p`,
    /// at most `top_k` of them. Unsorted by contract; callers sort by
    /// descending score if they care.
    pub async fn retrieve_related_chunks(
        &self,
        base: &KnowledgeBase,
        query: &str,
    ) -> Result<Vec<(KnowledgeChunk, f32)>, EngineError> {
        let transport = self.resolver.resolve(&base.embedding_model.provider)?;
        let mut vectors = transport
            .embeddings(&base.embedding_model.code, vec![query.to_string()])
            .await
            .map_err(|e| EngineError::Retrieval(e.to_string()))?;
        let query_embedding = vectors
            .pop()
            .ok_or_else(|| EngineError::Retrieval("Empty embedding response".to_string()))?;

        let neighbors = self
            .index
            .knn(base.id, &query_embedding, base.top_k)
            .await?;
        let cutoff = 1.0 - base.top_p;
        Ok(neighbors
            .into_iter()
            .filter(|(_, score)| *score >= cutoff)
            .collect())
    }
}

/// In-memory vector index. The mobile host swaps in its on-device store;
/// tests and small corpora run on this one.
#[derive(Default)]
pub struct MemoryKnowledgeIndex {
    bases: Mutex<HashMap<KnowledgeBaseId, Vec<KnowledgeChunk>>>,
}

impl MemoryKnowledgeIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KnowledgeIndex for MemoryKnowledgeIndex {
    async fn insert_chunks(
        &self,
        base: KnowledgeBaseId,
        chunks: Vec<KnowledgeChunk>,
    ) -> Result<(), EngineError> {
        let mut bases = self.bases.lock().await;
        bases.entry(base).or_default().extend(chunks);
        Ok(())
    }

    async fn delete_document(&self, document: DocumentId) -> Result<(), EngineError> {
        let mut bases = self.bases.lock().await;
        for chunks in bases.values_mut() {
            chunks.retain(|c| c.document_id != document);
        }
        Ok(())
    }

    async fn knn(
        &self,
        base: KnowledgeBaseId,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<(KnowledgeChunk, f32)>, EngineError> {
        let bases = self.bases.lock().await;
        let mut scored: Vec<(KnowledgeChunk, f32)> = bases
            .get(&base)
            .map(|chunks| {
                chunks
                    .iter()
                    .map(|c| (c.clone(), cosine_similarity(embedding, &c.embedding)))
                    .collect()
            })
            .unwrap_or_default();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::builtin_provider;
    use crate::model::ProviderRef;
    use crate::providers::mock::MockTransport;
    use std::sync::Arc;

    fn chunk(doc: DocumentId, seq: usize, embedding: Vec<f32>) -> KnowledgeChunk {
        KnowledgeChunk {
            document_id: doc,
            seq,
            text: format!("chunk {seq}"),
            embedding,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn chunking_overlaps_and_covers_the_tail() {
        let words: Vec<String> = (0..1100).map(|i| format!("w{i}")).collect();
        let text = words.join(" ");
        let chunks = chunk_text(&text, CHUNK_TOKENS, CHUNK_OVERLAP);
        // 512, then steps of 448: 0..512, 448..960, 896..1100.
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].ends_with("w511"));
        assert!(chunks[1].starts_with("w448"));
        assert!(chunks[2].ends_with("w1099"));
    }

    #[test]
    fn chunking_empty_text_yields_nothing() {
        assert!(chunk_text("   ", CHUNK_TOKENS, CHUNK_OVERLAP).is_empty());
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn knn_scopes_to_the_requested_base() {
        let index = MemoryKnowledgeIndex::new();
        index
            .insert_chunks(1, vec![chunk(10, 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        index
            .insert_chunks(2, vec![chunk(20, 0, vec![1.0, 0.0])])
            .await
            .unwrap();

        let hits = index.knn(1, &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.document_id, 10);
    }

    #[tokio::test]
    async fn deleting_a_document_cascades_to_chunks() {
        let index = MemoryKnowledgeIndex::new();
        index
            .insert_chunks(
                1,
                vec![chunk(10, 0, vec![1.0, 0.0]), chunk(11, 0, vec![1.0, 0.0])],
            )
            .await
            .unwrap();
        index.delete_document(10).await.unwrap();
        let hits = index.knn(1, &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.document_id, 11);
    }

    fn embedding_base() -> KnowledgeBase {
        let provider = ProviderRef::Builtin(builtin_provider("openai").unwrap());
        KnowledgeBase {
            id: 1,
            name: "docs".to_string(),
            embedding_model: ModelCode::new("text-embedding-3-small", provider).unwrap(),
            top_k: 5,
            top_p: 0.2,
        }
    }

    fn engine_with(transport: MockTransport, index: Arc<MemoryKnowledgeIndex>) -> RagEngine {
        let resolver = Arc::new(crate::providers::mock::FixedResolver(Arc::new(transport)));
        RagEngine::new(index, resolver)
    }

    #[tokio::test]
    async fn retrieval_filters_by_distance_cutoff() {
        // top_p = 0.2 means the cutoff is 0.8: a chunk scoring 0.75 is
        // excluded, one scoring 0.82 is included.
        let index = Arc::new(MemoryKnowledgeIndex::new());
        index
            .insert_chunks(
                1,
                vec![
                    chunk(10, 0, vec![0.82, (1.0f32 - 0.82 * 0.82).sqrt()]),
                    chunk(10, 1, vec![0.75, (1.0f32 - 0.75 * 0.75).sqrt()]),
                ],
            )
            .await
            .unwrap();

        let transport = MockTransport::new().embedding_for("what is colloquy?", vec![1.0, 0.0]);
        let engine = engine_with(transport, index);
        let hits = engine
            .retrieve_related_chunks(&embedding_base(), "what is colloquy?")
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.seq, 0);
        assert!(hits[0].1 > 0.8);
    }

    #[tokio::test]
    async fn embedding_failure_propagates_to_caller() {
        let index = Arc::new(MemoryKnowledgeIndex::new());
        let mut transport = MockTransport::new();
        transport.fail_embeddings = true;
        let engine = engine_with(transport, index);
        let err = engine
            .retrieve_related_chunks(&embedding_base(), "query")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Retrieval(_)));
    }

    #[tokio::test]
    async fn indexing_embeds_every_chunk() {
        let index = Arc::new(MemoryKnowledgeIndex::new());
        let engine = engine_with(MockTransport::new(), index.clone());
        let words: Vec<String> = (0..600).map(|i| format!("w{i}")).collect();
        let doc = KnowledgeDocument {
            id: 7,
            base_id: 1,
            title: "manual".to_string(),
            chunk_count: 0,
        };
        let doc = engine
            .index_document(&embedding_base(), doc, &words.join(" "))
            .await
            .unwrap();
        assert_eq!(doc.chunk_count, 2);
        let stored = index.knn(1, &[0.5, 0.5, 0.5, 0.5], 10).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].0.metadata.get("title").unwrap(), "manual");
    }
}
