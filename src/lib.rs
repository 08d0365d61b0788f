pub mod chat;
pub mod chunking;
pub mod config;
pub mod crawler;
pub mod database;
pub mod document;
pub mod docx;
pub mod embeddings;
pub mod error;
pub mod gemini;
pub mod indexer;
pub mod ingest;
pub mod openai;
pub mod pdf;
pub mod pinecone;
pub mod progress;
pub mod rag;
pub mod retriever;
