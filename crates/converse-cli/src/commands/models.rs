use anyhow::Result;
use console::style;
use converse::registry::capability::{CapabilityRegistry, ModelCard};

fn abilities(card: &ModelCard) -> String {
    let flags = [
        (card.abilities.vision, "vision"),
        (card.abilities.video, "video"),
        (card.abilities.function_call, "tools"),
        (card.abilities.reasoning, "reasoning"),
    ];
    flags
        .iter()
        .filter(|(enabled, _)| *enabled)
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// List the catalog entries known for `provider`
pub fn execute(provider: &str) -> Result<()> {
    let registry = CapabilityRegistry::builtin(&[])?;
    let catalog = registry.snapshot();
    let cards = catalog.models_for(provider);
    if cards.is_empty() {
        println!("No catalog entries for provider {}", style(provider).bold());
        return Ok(());
    }

    for card in cards {
        let window = card
            .context_window_tokens
            .map(|tokens| format!("{}k", tokens / 1000))
            .unwrap_or_default();
        println!(
            "{} {} {} {}",
            style(&card.id).bold(),
            style(card.display_name.as_deref().unwrap_or_default()).dim(),
            window,
            style(abilities(card)).cyan()
        );
    }
    Ok(())
}
