use anyhow::Result;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use converse::models::message::ChatTurn;

use crate::configuration::config_dir;

pub fn ensure_session_dir() -> Result<PathBuf> {
    let session_dir = config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
        .join("sessions");

    if !session_dir.exists() {
        fs::create_dir_all(&session_dir)?;
    }

    Ok(session_dir)
}

pub fn session_path(session_dir: &Path, name: &str) -> PathBuf {
    session_dir.join(format!("{}.jsonl", name))
}

/// Read a recorded session, one turn per line. A missing file is an empty session.
pub fn load_messages(session_file: &Path) -> Result<Vec<ChatTurn>> {
    if !session_file.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(session_file)?);
    let mut messages = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        messages.push(serde_json::from_str(&line)?);
    }
    Ok(messages)
}

pub fn persist_messages(session_file: &Path, messages: &[ChatTurn]) -> Result<()> {
    let file = File::create(session_file)?; // Create or truncate the file
    let mut writer = std::io::BufWriter::new(file);

    for message in messages {
        serde_json::to_writer(&mut writer, &message)?;
        writeln!(writer)?;
    }

    writer.flush()?;
    Ok(())
}
