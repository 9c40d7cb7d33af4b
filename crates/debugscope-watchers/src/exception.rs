//! Exception and error watcher

use debugscope_core::{Entry, EntryType, content::ExceptionContent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;

use crate::{Watcher, batch_or_new, default_true, log::default_max_context_size_kb, sanitize, stack};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Exception classes that are never recorded
    #[serde(default)]
    pub ignore_classes: Vec<String>,

    #[serde(default = "default_max_context_size_kb")]
    pub max_context_size_kb: usize,
}

impl Default for ExceptionWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ignore_classes: Vec::new(),
            max_context_size_kb: default_max_context_size_kb(),
        }
    }
}

/// An error with its cause chain
#[derive(Debug, Clone)]
pub struct ExceptionData {
    pub batch_id: Option<String>,
    pub class: String,
    pub message: String,
    pub stack: String,
    /// Explicit location; parsed from `stack` when absent
    pub file: Option<String>,
    pub line: Option<u32>,
    pub context: Option<Value>,
    pub previous: Option<Box<ExceptionData>>,
    /// Raised outside any handler (panics, unhandled task failures)
    pub uncaught: bool,
}

impl ExceptionData {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            batch_id: None,
            class: class.into(),
            message: message.into(),
            stack: String::new(),
            file: None,
            line: None,
            context: None,
            previous: None,
            uncaught: false,
        }
    }

    pub fn with_previous(mut self, previous: ExceptionData) -> Self {
        self.previous = Some(Box::new(previous));
        self
    }

    /// Build from an error value, following `source()` for the `previous` chain
    ///
    /// A backtrace is attached when capture is enabled (`RUST_BACKTRACE`).
    /// Trait objects carry no concrete type name, so their class comes from
    /// the `Debug` output instead.
    pub fn from_error<E: StdError + ?Sized>(error: &E) -> Self {
        let backtrace = Backtrace::capture();
        let stack = match backtrace.status() {
            BacktraceStatus::Captured => backtrace.to_string(),
            _ => String::new(),
        };

        let type_name = std::any::type_name::<E>();
        let class = if type_name.contains("dyn ") {
            debug_class(error)
        } else {
            short_type_name(type_name)
        };

        let mut data = Self::new(class, error.to_string());
        data.stack = stack;
        data.previous = error.source().map(|source| Box::new(Self::from_source(source)));
        data
    }

    fn from_source(error: &(dyn StdError + 'static)) -> Self {
        let mut data = Self::new(debug_class(error), error.to_string());
        data.previous = error.source().map(|source| Box::new(Self::from_source(source)));
        data
    }
}

/// `core::num::ParseIntError` -> `ParseIntError`, `my::Error<T>` -> `Error`
fn short_type_name(full: &str) -> String {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

// The Debug output of most error types starts with the type or variant name.
fn debug_class<E: StdError + ?Sized>(error: &E) -> String {
    let debug = format!("{:?}", error);
    let ident: String = debug
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        "Error".to_string()
    } else {
        ident
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExceptionWatcher {
    config: ExceptionWatcherConfig,
}

impl ExceptionWatcher {
    pub fn new(config: ExceptionWatcherConfig) -> Self {
        Self { config }
    }

    fn content(&self, data: ExceptionData) -> ExceptionContent {
        let (parsed_file, parsed_line) = if data.file.is_none() && data.line.is_none() {
            stack::parse_location(&data.stack)
        } else {
            (None, None)
        };
        let max_kb = self.config.max_context_size_kb;

        ExceptionContent {
            class: data.class,
            message: data.message,
            stack: data.stack,
            file: data.file.or(parsed_file),
            line: data.line.or(parsed_line),
            context: data.context.map(|c| sanitize::truncate_value(c, max_kb)),
            previous: data.previous.map(|p| Box::new(self.content(*p))),
        }
    }
}

impl Watcher for ExceptionWatcher {
    type Input = ExceptionData;

    fn entry_type(&self) -> EntryType {
        EntryType::Exception
    }

    fn record(&self, input: ExceptionData) -> Option<Entry> {
        if !self.config.enabled || self.config.ignore_classes.contains(&input.class) {
            return None;
        }

        let mut tags = vec![format!("exception:{}", input.class)];
        if input.uncaught {
            tags.push("uncaught".to_string());
        }

        let batch_id = batch_or_new(input.batch_id.clone());
        let content = self.content(input);

        Some(
            Entry::new(EntryType::Exception, batch_id, sanitize::to_value_safe(&content))
                .with_tags(tags),
        )
    }
}
