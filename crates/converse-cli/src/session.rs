use anyhow::Result;
use console::style;
use converse::chat::{ChatCallbacks, ChatFinish, ChatOutcome, ChatRequest, ChatService};
use converse::models::message::{ChatTurn, Role};
use converse::placeholder::UserContext;
use converse::providers::base::ChatStreamEvent;
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::prompt::{InputType, Prompt};
use crate::session::session_file::{load_messages, persist_messages};

pub mod session_file;

pub struct Session<'a> {
    service: ChatService,
    agent_id: String,
    user: UserContext,
    prompt: Box<dyn Prompt + 'a>,
    session_file: PathBuf,
    messages: Vec<ChatTurn>,
}

impl<'a> Session<'a> {
    pub fn new(
        service: ChatService,
        agent_id: impl Into<String>,
        prompt: Box<impl Prompt + 'a>,
        session_file: PathBuf,
    ) -> Self {
        Session {
            service,
            agent_id: agent_id.into(),
            user: UserContext::default(),
            prompt,
            session_file,
            messages: Vec::new(),
        }
    }

    pub fn with_user(mut self, user: UserContext) -> Self {
        self.user = user;
        self
    }

    /// Continue the conversation recorded in the session file, if any
    pub fn resume(mut self) -> Result<Self> {
        self.messages = load_messages(&self.session_file)?;
        for message in &self.messages {
            self.prompt.render(message);
        }
        Ok(self)
    }

    pub async fn start(&mut self) -> Result<()> {
        self.prompt.render(&notice(&format!(
            "Starting session. Recording to {}",
            self.session_file.display()
        )));
        self.prompt.ready();

        loop {
            let input = self.prompt.get_input()?;
            match input.input_type {
                InputType::Message => {
                    if let Some(content) = &input.content {
                        self.messages.push(ChatTurn::user().with_text(content));
                        persist_messages(&self.session_file, &self.messages)?;
                    }
                }
                InputType::Exit => break,
                InputType::AskAgain => continue,
            }

            self.prompt.show_busy();
            let outcome = self.reply(ChatCallbacks::new()).await;
            self.prompt.hide_busy();
            if let Some(turn) = self.settle(outcome)? {
                self.prompt.render(&turn);
            }
        }
        self.close_session();
        Ok(())
    }

    /// Answer a single message, streaming the reply to stdout
    pub async fn headless_start(&mut self, initial_message: String) -> Result<()> {
        self.messages.push(ChatTurn::user().with_text(initial_message));
        persist_messages(&self.session_file, &self.messages)?;

        let callbacks = ChatCallbacks::new().on_message(|event| {
            if let ChatStreamEvent::Text(text) = event {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }
        });
        let outcome = self.reply(callbacks).await;
        if let Some(turn) = self.settle(outcome)? {
            println!();
            for tool in &turn.tools {
                println!(
                    "{} {}.{} {}",
                    style("Tool call:").cyan().bold(),
                    tool.identifier,
                    tool.api_name,
                    style(&tool.arguments).dim()
                );
            }
        }
        Ok(())
    }

    pub fn messages(&self) -> &[ChatTurn] {
        &self.messages
    }

    async fn reply(&mut self, mut callbacks: ChatCallbacks) -> ChatOutcome {
        let mut request = ChatRequest::new(&self.agent_id, self.messages.clone());
        request.user = self.user.clone();
        request.session_id = self
            .session_file
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned());

        let cancel = CancellationToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };
        let outcome = self
            .service
            .create_assistant_message(request, &mut callbacks, cancel)
            .await;
        interrupt.abort();
        outcome
    }

    /// Record the outcome in the history. Returns the new assistant turn, if any.
    fn settle(&mut self, outcome: ChatOutcome) -> Result<Option<ChatTurn>> {
        match outcome {
            ChatOutcome::Finished(finish) => {
                let turn = assistant_turn(&finish);
                // Tool calls are never executed here, so they stay out of the history
                let mut recorded = turn.clone();
                recorded.tools.clear();
                self.messages.push(recorded);
                persist_messages(&self.session_file, &self.messages)?;
                Ok(Some(turn))
            }
            ChatOutcome::Errored(error) => {
                self.prompt.render_error(&error);
                Ok(None)
            }
            ChatOutcome::Aborted => {
                // Reset the conversation to before the interrupted user message
                while let Some(message) = self.messages.pop() {
                    if message.role == Role::User {
                        break;
                    }
                }
                persist_messages(&self.session_file, &self.messages)?;
                self.prompt.render(&notice(
                    "Interrupt: Resetting conversation to before the last sent message...",
                ));
                Ok(None)
            }
        }
    }

    fn close_session(&mut self) {
        self.prompt.render(&notice(&format!(
            "Closing session. Recorded to {}",
            self.session_file.display()
        )));
        self.prompt.close();
    }
}

fn assistant_turn(finish: &ChatFinish) -> ChatTurn {
    let completion = &finish.completion;
    let mut turn = ChatTurn::assistant().with_text(completion.content.clone());
    turn.reasoning = completion.reasoning.clone();
    turn.tools = finish.tool_calls.clone();
    turn
}

fn notice(content: &str) -> ChatTurn {
    ChatTurn::system().with_text(content)
}
