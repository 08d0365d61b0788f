use crate::document::Metadata;
use crate::error::ChatTurnError;
use anyhow::Result;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use log::{debug, error, info};
use std::future::Future;
use std::io::{self, BufRead, Write};
use std::thread;
use tokio::sync::mpsc;

/// One piece of a streamed answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// Plain text, printed as-is
    Text(String),
    /// Text of the final answer; the first one is prefixed with `Answer: `
    Answer(String),
    /// Documents the answer is based on
    Context(Vec<Metadata>),
}

pub enum Answer {
    Text(String),
    Stream(BoxStream<'static, Result<Fragment>>),
}

/// Called once with the full answer text after it has been printed.
pub type AnswerCallback = Box<dyn FnOnce(String) -> BoxFuture<'static, Result<()>> + Send>;

pub struct ChatResponse {
    pub answer: Answer,
    /// Printed after the answer when present
    pub sources: Option<Vec<String>>,
    pub on_answer: Option<AnswerCallback>,
}

impl ChatResponse {
    pub fn text(answer: impl Into<String>) -> Self {
        ChatResponse {
            answer: Answer::Text(answer.into()),
            sources: None,
            on_answer: None,
        }
    }
}

/// Produces the answer to one question.
#[allow(async_fn_in_trait)]
pub trait ChatHandler {
    async fn respond(&self, question: &str) -> Result<ChatResponse>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    AwaitingInput,
    Dispatching,
    Responding,
    Cancelled,
}

/// Lines of operator input, in the order they were typed.
pub type InputLines = mpsc::Receiver<io::Result<String>>;

/// Read `input` line by line on a dedicated thread.
///
/// The thread is detached: a read still blocked when the chat ends does not
/// keep the runtime from shutting down.
pub fn spawn_line_reader<R: BufRead + Send + 'static>(mut input: R) -> InputLines {
    let (sender, receiver) = mpsc::channel(16);
    thread::spawn(move || loop {
        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                if sender.blocking_send(Ok(line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = sender.blocking_send(Err(e));
                break;
            }
        }
    });
    receiver
}

/// Terminal conversation: read a question, print the answer, repeat until
/// interrupted or the input ends.
pub struct ChatLoop<'h, W, H> {
    input: InputLines,
    output: W,
    handler: &'h H,
    state: ChatState,
}

impl<'h, W, H> ChatLoop<'h, W, H>
where
    W: Write,
    H: ChatHandler,
{
    pub fn new(input: InputLines, output: W, handler: &'h H) -> Self {
        ChatLoop {
            input,
            output,
            handler,
            state: ChatState::AwaitingInput,
        }
    }

    pub fn state(&self) -> ChatState {
        self.state
    }

    /// Run until `shutdown` resolves or input reaches end of file.
    ///
    /// Failed turns are printed and the loop keeps going; only broken input
    /// or output is returned as an error.
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) -> io::Result<()> {
        tokio::pin!(shutdown);
        info!("Chat session started");

        loop {
            self.state = ChatState::AwaitingInput;
            write!(self.output, "Human: ")?;
            self.output.flush()?;

            let read = tokio::select! {
                _ = &mut shutdown => None,
                line = self.input.recv() => line,
            };
            let Some(line) = read else {
                break;
            };
            let line = line?;

            let question = line.trim();
            if question.is_empty() {
                continue;
            }

            self.state = ChatState::Dispatching;
            debug!("Question: {}", question);
            let outcome = tokio::select! {
                _ = &mut shutdown => None,
                outcome = self.turn(question) => Some(outcome),
            };

            match outcome {
                None => break,
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    error!("Chat turn failed: {}", e);
                    writeln!(self.output, "Error: {}", e)?;
                }
            }
        }

        self.state = ChatState::Cancelled;
        writeln!(self.output)?;
        writeln!(self.output, "Goodbye!")?;
        self.output.flush()?;
        info!("Chat session ended");
        Ok(())
    }

    async fn turn(&mut self, question: &str) -> Result<(), ChatTurnError> {
        let response = self
            .handler
            .respond(question)
            .await
            .map_err(ChatTurnError::Handler)?;
        self.state = ChatState::Responding;

        let text = match response.answer {
            Answer::Text(text) => {
                let text = text.trim_start();
                writeln!(self.output, "AI: {}", text)?;
                text.to_string()
            }
            Answer::Stream(stream) => self.print_stream(stream).await?,
        };

        if let Some(sources) = response.sources.filter(|s| !s.is_empty()) {
            writeln!(self.output, "Sources:")?;
            for source in sources {
                writeln!(self.output, "  - {}", source)?;
            }
        }
        self.output.flush()?;

        if let Some(on_answer) = response.on_answer {
            on_answer(text).await.map_err(ChatTurnError::Callback)?;
        }
        Ok(())
    }

    /// Print fragments as they arrive and return the accumulated text.
    async fn print_stream(
        &mut self,
        mut stream: BoxStream<'static, Result<Fragment>>,
    ) -> Result<String, ChatTurnError> {
        write!(self.output, "AI: ")?;
        self.output.flush()?;

        let mut full = String::new();
        let mut answer_started = false;
        let mut at_line_start = false;

        while let Some(fragment) = stream.next().await {
            let fragment = match fragment {
                Ok(fragment) => fragment,
                Err(e) => {
                    if !at_line_start {
                        writeln!(self.output)?;
                    }
                    return Err(ChatTurnError::Stream(e));
                }
            };

            match fragment {
                Fragment::Text(text) => {
                    write!(self.output, "{}", text)?;
                    at_line_start = text.ends_with('\n');
                    full.push_str(&text);
                }
                Fragment::Answer(text) => {
                    if !answer_started {
                        write!(self.output, "Answer: ")?;
                        answer_started = true;
                    }
                    write!(self.output, "{}", text)?;
                    at_line_start = text.ends_with('\n');
                    full.push_str(&text);
                }
                Fragment::Context(documents) => {
                    if !at_line_start {
                        writeln!(self.output)?;
                    }
                    writeln!(self.output, "Sources:")?;
                    for metadata in &documents {
                        writeln!(self.output, "  - {}", metadata.source)?;
                    }
                    at_line_start = true;
                }
            }
            self.output.flush()?;
        }

        if !at_line_start {
            writeln!(self.output)?;
        }
        Ok(full)
    }
}
