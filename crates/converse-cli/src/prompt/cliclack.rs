use std::io::{self, Write};

use anyhow::Result;
use cliclack::{input, spinner, ProgressBar};
use console::style;
use converse::errors::ChatError;
use converse::models::message::{ChatTurn, Role};

use super::{Input, InputType, Prompt};

pub struct CliclackPrompt {
    spinner: Option<ProgressBar>,
    input_mode: InputMode,
    show_reasoning: bool,
}

enum InputMode {
    Singleline,
    Multiline,
}

impl CliclackPrompt {
    pub fn new() -> Self {
        CliclackPrompt {
            spinner: None,
            input_mode: InputMode::Multiline,
            show_reasoning: false,
        }
    }
}

impl Default for CliclackPrompt {
    fn default() -> Self {
        Self::new()
    }
}

fn print_tool_call(name: &str, arguments: &str) {
    let pretty = serde_json::from_str::<serde_json::Value>(arguments)
        .and_then(|value| serde_json::to_string_pretty(&value))
        .unwrap_or_else(|_| arguments.to_string());
    println!("{} {}", style("Tool call:").cyan().bold(), style(name).cyan());
    println!("{}", style(pretty).dim());
}

impl Prompt for CliclackPrompt {
    fn render(&mut self, message: &ChatTurn) {
        if self.show_reasoning {
            if let Some(reasoning) = message.reasoning.as_ref().and_then(|r| r.content.as_deref()) {
                println!("{}", style(reasoning).dim().italic());
            }
        }

        match message.role {
            Role::System => println!("{}", style(message.text()).dim()),
            _ => println!("{}", message.text()),
        }
        for tool in &message.tools {
            print_tool_call(&format!("{}.{}", tool.identifier, tool.api_name), &tool.arguments);
        }

        println!();
        let _ = io::stdout().flush();
    }

    fn render_error(&mut self, error: &ChatError) {
        let provider = error
            .provider
            .as_deref()
            .map(|p| format!(" ({})", p))
            .unwrap_or_default();
        eprintln!(
            "{} {}",
            style(format!("{}{}:", error.error_type, provider)).red().bold(),
            error.message
        );
    }

    fn show_busy(&mut self) {
        let busy = spinner();
        busy.start("awaiting reply");
        self.spinner = Some(busy);
    }

    fn hide_busy(&mut self) {
        if let Some(busy) = self.spinner.take() {
            busy.stop("");
        }
    }

    fn get_input(&mut self) -> Result<Input> {
        let mut input = input("Message:                  [Help: /?]").placeholder("");
        match self.input_mode {
            InputMode::Multiline => input = input.multiline(),
            InputMode::Singleline => (),
        }
        let message_text: String = input.interact()?;
        let message_text = message_text.trim().to_string();

        if message_text.eq_ignore_ascii_case("/exit") || message_text.eq_ignore_ascii_case("/quit")
        {
            Ok(Input {
                input_type: InputType::Exit,
                content: None,
            })
        } else if message_text.eq_ignore_ascii_case("/m") {
            self.input_mode = InputMode::Multiline;
            self.get_input()
        } else if message_text.eq_ignore_ascii_case("/s") {
            self.input_mode = InputMode::Singleline;
            self.get_input()
        } else if message_text.eq_ignore_ascii_case("/r") {
            self.show_reasoning = !self.show_reasoning;
            println!(
                "Reasoning display {}",
                if self.show_reasoning { "on" } else { "off" }
            );
            self.get_input()
        } else if message_text.eq_ignore_ascii_case("/?") {
            println!("Commands:");
            println!("/exit - Exit the session");
            println!("/m - Switch to multiline input mode");
            println!("/s - Switch to singleline input mode");
            println!("/r - Toggle display of model reasoning");
            println!("/? - Display this help message");
            println!("Ctrl+C - Cancel the reply in progress (resets the conversation to before the interrupted message)");
            self.get_input()
        } else if message_text.is_empty() {
            Ok(Input {
                input_type: InputType::AskAgain,
                content: None,
            })
        } else {
            Ok(Input {
                input_type: InputType::Message,
                content: Some(message_text),
            })
        }
    }

    fn close(&self) {
        // No cleanup required
    }

    #[cfg(test)]
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
