use anyhow::{bail, Result};
use std::io::Read;

use crate::commands::session::build_session;
use crate::configuration::Settings;

/// Answer one message and exit. Reads stdin when no text is given.
pub async fn execute(settings: Settings, text: Option<String>, name: Option<String>) -> Result<()> {
    let text = match text {
        Some(text) => text,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    if text.trim().is_empty() {
        bail!("Nothing to send: pass --text or pipe a message on stdin");
    }

    let mut session = build_session(&settings, name, false)?;
    session.headless_start(text.trim().to_string()).await
}
