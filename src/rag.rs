use crate::chat::{Answer, AnswerCallback, ChatHandler, ChatResponse, Fragment};
use crate::config::PipelineConfig;
use crate::crawler::PathCrawler;
use crate::database::{ScoredChunk, VectorStore};
use crate::embeddings::Embedder;
use crate::indexer::Indexer;
use crate::ingest::IngestionRunner;
use crate::progress;
use crate::retriever::Retriever;
use anyhow::{Context, Result};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use futures::FutureExt;
use log::info;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Turns are dropped from the prompt beyond this many.
const MAX_HISTORY: usize = 5;

/// Produces answer text for a prompt
#[allow(async_fn_in_trait)]
pub trait Generator {
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Answer text in pieces, as the model produces it
    async fn generate_stream(&self, prompt: &str) -> Result<BoxStream<'static, Result<String>>>;
}

/// What an indexing run did, for the console summary
#[derive(Debug)]
pub struct IndexReport {
    pub files: usize,
    pub documents: usize,
    /// Failed paths, one per line, if any
    pub failures: Option<String>,
    pub chunks: usize,
    pub batches: usize,
}

/// Crawl `root`, load and chunk every document, then embed and store the
/// chunks.
///
/// A missing root or a failed batch ends the run; files that cannot be
/// loaded are listed in the report.
pub async fn index_folder<E: Embedder, S: VectorStore>(
    root: &Path,
    embedder: &E,
    store: &S,
    pipeline: &PipelineConfig,
) -> Result<IndexReport> {
    info!("Indexing {}", root.display());

    let crawler = PathCrawler::new();
    let spinner = progress::spinner("Scanning");
    let task_spinner = spinner.clone();
    let task_root = root.to_path_buf();
    let paths = tokio::task::spawn_blocking(move || crawler.crawl(&task_root, &task_spinner))
        .await
        .context("Crawl task failed")??;
    spinner.finish();
    let files = paths.len();

    let loading = progress::bar("Loading", files as u64);
    let report = IngestionRunner::new(pipeline.load_workers)
        .run(paths, &loading)
        .await;
    loading.finish();

    let chunks = pipeline.chunker.chunk(&report.documents);
    info!(
        "Split {} documents into {} chunks",
        report.documents.len(),
        chunks.len()
    );

    let indexing = progress::bar("Indexing", chunks.len() as u64);
    let summary = Indexer::new(embedder, store, pipeline.batch_size)
        .index(&chunks, &indexing)
        .await?;
    indexing.finish();

    Ok(IndexReport {
        files,
        documents: report.documents.len(),
        failures: report.failure_summary(),
        chunks: summary.chunks,
        batches: summary.batches,
    })
}

/// One answered question, kept for follow-ups
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
    pub sources: Vec<String>,
}

/// RAG (Retrieval-Augmented Generation) engine
pub struct RagEngine<'a, E, S, G> {
    retriever: Retriever<'a, E, S>,
    generator: G,
    top_k: usize,
    stream: bool,
    history: Arc<Mutex<Vec<ChatTurn>>>,
}

impl<'a, E: Embedder, S: VectorStore, G: Generator> RagEngine<'a, E, S, G> {
    /// Create a new RAG engine
    pub fn new(embedder: &'a E, store: &'a S, generator: G, pipeline: &PipelineConfig) -> Self {
        RagEngine {
            retriever: Retriever::new(embedder, store),
            generator,
            top_k: pipeline.top_k,
            stream: pipeline.stream,
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answered turns so far, oldest first
    pub fn history(&self) -> Vec<ChatTurn> {
        self.history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    fn build_prompt(&self, question: &str, chunks: &[ScoredChunk]) -> String {
        let mut prompt = String::from(
            "Answer the question using only the context below. \
             If the context does not contain the answer, say that you don't know.\n\n",
        );

        if let Ok(history) = self.history.lock() {
            if !history.is_empty() {
                prompt.push_str("Conversation so far:\n");
                for turn in history.iter() {
                    prompt.push_str(&format!("Human: {}\nAI: {}\n", turn.question, turn.answer));
                }
                prompt.push('\n');
            }
        }

        let context = chunks
            .iter()
            .map(|chunk| chunk.content.as_str())
            .collect::<Vec<&str>>()
            .join("\n\n");
        prompt.push_str(&format!("Context: {}\n\nQuestion: {}", context, question));
        prompt
    }

    fn remember(&self, question: &str, sources: Vec<String>) -> AnswerCallback {
        let history = self.history.clone();
        let question = question.to_string();
        Box::new(move |answer: String| {
            async move {
                let mut history = history
                    .lock()
                    .map_err(|_| anyhow::anyhow!("Conversation history is poisoned"))?;
                history.push(ChatTurn {
                    question,
                    answer,
                    sources,
                });
                let excess = history.len().saturating_sub(MAX_HISTORY);
                history.drain(..excess);
                Ok::<(), anyhow::Error>(())
            }
            .boxed()
        })
    }
}

impl<'a, E: Embedder, S: VectorStore, G: Generator> ChatHandler for RagEngine<'a, E, S, G> {
    async fn respond(&self, question: &str) -> Result<ChatResponse> {
        let chunks = self.retriever.retrieve(question, self.top_k).await?;
        let sources = distinct_sources(&chunks);
        let prompt = self.build_prompt(question, &chunks);
        let on_answer = Some(self.remember(question, sources.clone()));

        if self.stream {
            let context = Fragment::Context(chunks.into_iter().map(|c| c.metadata).collect());
            let answer = self
                .generator
                .generate_stream(&prompt)
                .await
                .context("Failed to start answer stream")?
                .map_ok(Fragment::Answer);

            Ok(ChatResponse {
                answer: Answer::Stream(stream::once(async { Ok(context) }).chain(answer).boxed()),
                sources: None,
                on_answer,
            })
        } else {
            let answer = self
                .generator
                .generate(&prompt)
                .await
                .context("Failed to generate answer")?;

            Ok(ChatResponse {
                answer: Answer::Text(answer),
                sources: Some(sources),
                on_answer,
            })
        }
    }
}

/// Sources of `chunks` in rank order, without repeats
fn distinct_sources(chunks: &[ScoredChunk]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for chunk in chunks {
        if !sources.contains(&chunk.metadata.source) {
            sources.push(chunk.metadata.source.clone());
        }
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{spawn_line_reader, ChatLoop, ChatState};
    use crate::database::IndexEntry;
    use crate::embeddings::Embedding;
    use std::cell::RefCell;
    use std::fs;
    use tempfile::TempDir;

    struct LengthEmbedder;

    impl Embedder for LengthEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            Ok(texts
                .iter()
                .map(|t| Embedding {
                    values: vec![t.chars().count() as f32],
                })
                .collect())
        }
    }

    /// Keeps everything and returns the first `k` entries on query
    #[derive(Default)]
    struct MemoryStore {
        entries: RefCell<Vec<IndexEntry>>,
    }

    impl VectorStore for MemoryStore {
        async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
            self.entries.borrow_mut().extend_from_slice(entries);
            Ok(())
        }

        async fn query(&self, _vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
            Ok(self
                .entries
                .borrow()
                .iter()
                .take(k)
                .map(|e| ScoredChunk {
                    content: e.content.clone(),
                    metadata: e.metadata.clone(),
                    score: 1.0,
                })
                .collect())
        }
    }

    /// Answers with a canned reply and records the prompts it saw
    #[derive(Default)]
    struct EchoGenerator {
        prompts: Arc<Mutex<Vec<String>>>,
    }

    impl Generator for EchoGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("It is about notes.".to_string())
        }

        async fn generate_stream(&self, prompt: &str) -> Result<BoxStream<'static, Result<String>>> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let pieces: Vec<Result<String>> =
                vec![Ok("It is ".to_string()), Ok("about notes.".to_string())];
            Ok(stream::iter(pieces).boxed())
        }
    }

    fn stored(store: &MemoryStore, texts: &[(&str, &str)]) {
        for (i, (source, text)) in texts.iter().enumerate() {
            store.entries.borrow_mut().push(IndexEntry {
                id: i.to_string(),
                vector: Embedding { values: vec![0.0] },
                content: text.to_string(),
                metadata: crate::document::Metadata::new(*source),
            });
        }
    }

    #[tokio::test]
    async fn test_index_folder_end_to_end() {
        let dir = TempDir::new().unwrap();
        let notes = dir.path().join("notes.txt");
        fs::write(&notes, "x".repeat(1200)).unwrap();
        fs::write(dir.path().join("ignored.md"), "not indexed").unwrap();

        let store = MemoryStore::default();
        let report = index_folder(dir.path(), &LengthEmbedder, &store, &PipelineConfig::default())
            .await
            .unwrap();

        assert_eq!(report.files, 1);
        assert_eq!(report.documents, 1);
        assert_eq!(report.chunks, 3);
        assert_eq!(report.batches, 1);
        assert!(report.failures.is_none());

        let entries = store.entries.borrow();
        assert_eq!(entries.len(), 3);
        for entry in entries.iter() {
            assert_eq!(entry.metadata.source, notes.display().to_string());
            assert!(entry.content.chars().count() <= 500);
        }
    }

    #[tokio::test]
    async fn test_index_folder_missing_root() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::default();
        let err = index_folder(
            &dir.path().join("nope"),
            &LengthEmbedder,
            &store,
            &PipelineConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_streamed_answer_starts_with_context() {
        let store = MemoryStore::default();
        stored(&store, &[("a.txt", "alpha"), ("b.txt", "beta"), ("a.txt", "gamma")]);
        let engine = RagEngine::new(
            &LengthEmbedder,
            &store,
            EchoGenerator::default(),
            &PipelineConfig::default(),
        );

        let response = engine.respond("what?").await.unwrap();
        let Answer::Stream(stream) = response.answer else {
            panic!("expected a streamed answer");
        };
        let fragments: Vec<Fragment> = stream.try_collect().await.unwrap();
        assert!(matches!(&fragments[0], Fragment::Context(docs) if docs.len() == 3));
        assert_eq!(fragments[1], Fragment::Answer("It is ".to_string()));
        assert_eq!(fragments.len(), 3);
    }

    #[tokio::test]
    async fn test_plain_answer_cites_distinct_sources() {
        let store = MemoryStore::default();
        stored(&store, &[("a.txt", "alpha"), ("b.txt", "beta"), ("a.txt", "gamma")]);
        let pipeline = PipelineConfig {
            stream: false,
            ..PipelineConfig::default()
        };
        let generator = EchoGenerator::default();
        let prompts = generator.prompts.clone();
        let engine = RagEngine::new(&LengthEmbedder, &store, generator, &pipeline);

        let response = engine.respond("what?").await.unwrap();
        assert_eq!(
            response.sources,
            Some(vec!["a.txt".to_string(), "b.txt".to_string()])
        );
        let prompt = prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("Context: alpha\n\nbeta\n\ngamma"));
        assert!(prompt.ends_with("Question: what?"));
    }

    #[tokio::test]
    async fn test_history_feeds_the_next_prompt() {
        let store = MemoryStore::default();
        stored(&store, &[("notes.txt", "some notes")]);
        let generator = EchoGenerator::default();
        let prompts = generator.prompts.clone();
        let engine = RagEngine::new(&LengthEmbedder, &store, generator, &PipelineConfig::default());

        let mut output = Vec::new();
        let lines = spawn_line_reader(&b"what is this?\nand then?\n"[..]);
        let mut chat = ChatLoop::new(lines, &mut output, &engine);
        chat.run(std::future::pending()).await.unwrap();
        assert_eq!(chat.state(), ChatState::Cancelled);
        drop(chat);

        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("Sources:\n  - notes.txt\nAnswer: It is about notes.\n"));

        let history = engine.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].question, "what is this?");
        assert_eq!(history[0].answer, "It is about notes.");
        assert_eq!(history[0].sources, vec!["notes.txt".to_string()]);

        let prompts = prompts.lock().unwrap();
        assert!(!prompts[0].contains("Conversation so far"));
        assert!(prompts[1].contains("Human: what is this?\nAI: It is about notes.\n"));
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let store = MemoryStore::default();
        let engine = RagEngine::new(
            &LengthEmbedder,
            &store,
            EchoGenerator::default(),
            &PipelineConfig::default(),
        );

        for i in 0..(MAX_HISTORY + 2) {
            let callback = engine.remember(&format!("q{}", i), Vec::new());
            callback(format!("a{}", i)).await.unwrap();
        }
        let history = engine.history();
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history[0].question, "q2");
    }
}
