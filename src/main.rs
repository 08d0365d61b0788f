use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::io::BufReader;

use folder_rag::chat::{spawn_line_reader, ChatLoop};
use folder_rag::config::{Config, EmbeddingConfig, StoreConfig};
use folder_rag::database::{QdrantStore, StoreBackend};
use folder_rag::embeddings::EmbeddingBackend;
use folder_rag::gemini::GeminiClient;
use folder_rag::openai::OpenAiEmbeddings;
use folder_rag::pinecone::PineconeStore;
use folder_rag::rag::{index_folder, RagEngine};

/// Index a folder of documents into a vector store and chat with it
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl FOLDER_PATH, then embed and store every document
    Index,
    /// Ask questions about the indexed documents
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    // Loads .env before reading the environment
    let config = Config::from_env().context("Invalid configuration")?;

    let embedder = match &config.embedding {
        EmbeddingConfig::OpenAi(openai) => {
            EmbeddingBackend::OpenAi(OpenAiEmbeddings::new(openai.clone()))
        }
        EmbeddingConfig::Gemini(gemini) => {
            EmbeddingBackend::Gemini(GeminiClient::new(gemini.clone()))
        }
    };

    match args.command {
        Command::Index => {
            let root = config.require_folder()?;
            let store = open_store(&config).await?;

            let report = index_folder(root, &embedder, &store, &config.pipeline)
                .await
                .context("Indexing failed")?;

            println!("Files found:      {}", report.files);
            println!("Documents loaded: {}", report.documents);
            println!("Chunks stored:    {}", report.chunks);
            println!("Batches:          {}", report.batches);
            if let Some(failures) = report.failures {
                println!("{}", failures);
            }
            info!("Indexing finished");
        }
        Command::Chat => {
            let generator = GeminiClient::new(config.require_gemini()?.clone());
            let store = open_store(&config).await?;
            let engine = RagEngine::new(&embedder, &store, generator, &config.pipeline);

            println!(
                "Ask about the documents in {}. Press Ctrl-C to quit.",
                config.index_name
            );
            let lines = spawn_line_reader(BufReader::new(std::io::stdin()));
            let mut chat = ChatLoop::new(lines, std::io::stdout(), &engine);
            chat.run(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Cannot listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            })
            .await
            .context("Error in chat loop")?;
        }
    }

    Ok(())
}

async fn open_store(config: &Config) -> Result<StoreBackend> {
    let store = match &config.store {
        StoreConfig::Pinecone(pinecone) => StoreBackend::Pinecone(
            PineconeStore::open(pinecone.clone(), &config.index_name)
                .await
                .context("Failed to open Pinecone index")?,
        ),
        StoreConfig::Qdrant(qdrant) => StoreBackend::Qdrant(
            QdrantStore::open(qdrant.clone(), &config.index_name)
                .await
                .context("Failed to initialize Qdrant client")?,
        ),
    };
    Ok(store)
}
