use std::sync::Mutex;

use serde::{Deserialize, Serialize};

pub type Err = anyhow::Error;
pub type Res<T> = Result<T, Err>;
pub type Void = Res<()>;

/// A single labelled value on a reply card (e.g., `Owner`, `Last Sale`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardField {
    pub name: String,
    pub value: String,
}

/// A rich reply card describing one item of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Card {
    pub title: String,
    pub url: String,
    pub color: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub fields: Vec<CardField>,
}

impl Card {
    /// Append a field when a value is present.
    pub fn push_field(&mut self, name: &str, value: Option<String>) {
        if let Some(value) = value {
            self.fields.push(CardField { name: name.to_string(), value });
        }
    }
}

/// User-facing progress and error lines collected while resolving one request.
///
/// Kept apart from `tracing` diagnostics: these lines describe what happened to
/// the user's trigger rather than to the process. Shared by reference across
/// concurrently joined fetches.
#[derive(Debug, Default)]
pub struct FetchLog {
    lines: Mutex<Vec<String>>,
}

impl FetchLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: impl Into<String>) {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).push(line.into());
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }
}
