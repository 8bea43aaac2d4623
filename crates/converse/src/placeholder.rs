//! `{{variable}}` substitution in message text.
use chrono::{DateTime, Local};
use lazy_static::lazy_static;
use rand::Rng;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").unwrap();
}

pub type VariableGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Named generators consulted for each `{{name}}` token
#[derive(Clone, Default)]
pub struct VariableGenerators {
    generators: HashMap<String, VariableGenerator>,
}

impl fmt::Debug for VariableGenerators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.generators.keys().collect();
        names.sort();
        f.debug_struct("VariableGenerators")
            .field("names", &names)
            .finish()
    }
}

/// Ambient values exposed to templates alongside the clock and random generators
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    pub username: Option<String>,
    pub nickname: Option<String>,
    pub language: Option<String>,
    pub model: Option<String>,
    pub provider: Option<String>,
}

impl VariableGenerators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, name: impl Into<String>, generator: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.insert(name, generator);
        self
    }

    pub fn insert<F>(&mut self, name: impl Into<String>, generator: F)
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.generators.insert(name.into(), Arc::new(generator));
    }

    pub fn get(&self, name: &str) -> Option<&VariableGenerator> {
        self.generators.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    /// The standard registry: clock, random values, and user/session facts
    pub fn standard(user: &UserContext) -> Self {
        let mut generators = Self::new();
        clock_generators(&mut generators);
        random_generators(&mut generators);

        let username = user.username.clone().unwrap_or_else(|| "User".to_string());
        let nickname = user.nickname.clone().unwrap_or_else(|| username.clone());
        let facts = [
            ("username", username),
            ("nickname", nickname),
            ("language", user.language.clone().unwrap_or_else(|| "en-US".to_string())),
            ("platform", std::env::consts::OS.to_string()),
            ("model", user.model.clone().unwrap_or_default()),
            ("provider", user.provider.clone().unwrap_or_default()),
        ];
        for (name, value) in facts {
            generators.insert(name, move || value.clone());
        }
        generators
    }

    /// Replace known `{{name}}` tokens. Unknown names are left untouched.
    pub fn substitute(&self, text: &str) -> String {
        if !text.contains("{{") {
            return text.to_string();
        }
        PLACEHOLDER
            .replace_all(text, |caps: &Captures| match self.get(&caps[1]) {
                Some(generator) => generator(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

fn now() -> DateTime<Local> {
    Local::now()
}

fn clock_generators(generators: &mut VariableGenerators) {
    generators.insert("date", || now().format("%Y-%m-%d").to_string());
    generators.insert("time", || now().format("%H:%M:%S").to_string());
    generators.insert("datetime", || now().format("%Y-%m-%d %H:%M:%S").to_string());
    generators.insert("year", || now().format("%Y").to_string());
    generators.insert("month", || now().format("%m").to_string());
    generators.insert("day", || now().format("%d").to_string());
    generators.insert("weekday", || now().format("%A").to_string());
    generators.insert("hour", || now().format("%H").to_string());
    generators.insert("minute", || now().format("%M").to_string());
    generators.insert("second", || now().format("%S").to_string());
    generators.insert("iso", || chrono::Utc::now().to_rfc3339());
    generators.insert("timestamp", || chrono::Utc::now().timestamp_millis().to_string());
}

fn random_generators(generators: &mut VariableGenerators) {
    generators.insert("random", || rand::thread_rng().gen_range(1..=100).to_string());
    generators.insert("random_int", || {
        rand::thread_rng().gen_range(1..=1000).to_string()
    });
    generators.insert("random_float", || {
        format!("{:.2}", rand::thread_rng().gen_range(0.0..100.0))
    });
    generators.insert("random_hex", || {
        format!("{:06x}", rand::thread_rng().gen_range(0..0x1000000u32))
    });
    generators.insert("uuid", || uuid::Uuid::new_v4().to_string());
    generators.insert("uuid_short", || {
        uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> VariableGenerators {
        VariableGenerators::new()
            .with("username", || "TestUser".to_string())
            .with("date", || "2023-12-25".to_string())
    }

    #[test]
    fn test_known_variables() {
        assert_eq!(
            fixed().substitute("Hello {{username}}, today is {{date}}"),
            "Hello TestUser, today is 2023-12-25"
        );
    }

    #[test]
    fn test_unknown_variable_left_verbatim() {
        assert_eq!(
            fixed().substitute("Value: {{missing_var}} for {{username}}"),
            "Value: {{missing_var}} for TestUser"
        );
    }

    #[test]
    fn test_whitespace_inside_braces() {
        assert_eq!(fixed().substitute("Hi {{ username }}"), "Hi TestUser");
    }

    #[test]
    fn test_text_without_tokens_is_unchanged() {
        assert_eq!(fixed().substitute("no tokens { here }"), "no tokens { here }");
    }

    #[test]
    fn test_standard_registry() {
        let generators = VariableGenerators::standard(&UserContext {
            username: Some("Ada".to_string()),
            ..Default::default()
        });

        assert_eq!(generators.substitute("{{username}}/{{nickname}}"), "Ada/Ada");
        let date = generators.substitute("{{date}}");
        assert_eq!(date.len(), 10);
        assert_eq!(generators.substitute("{{uuid_short}}").len(), 8);
        let random: u32 = generators.substitute("{{random}}").parse().unwrap();
        assert!((1..=100).contains(&random));
    }
}
