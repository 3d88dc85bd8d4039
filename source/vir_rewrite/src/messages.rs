use crate::tokens::{Token, TokenX};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Every node carries exactly one token, which doubles as its span
pub type Span = Token;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageLevel {
    Error,
    Warning,
    /// informational messages, shown as hover text by editors
    Info,
    Note,
}

#[derive(Debug, Clone)]
pub struct MessageLabel {
    pub span: Span,
    pub note: String,
}

/// If you just want to build a simple message, see the builders below.
///
/// A Message should typically have at least one 'span' which represents
/// the primary point described, plus optional labels on secondary spans.
/// `source` names the rewriter (or other component) that produced the message.
#[derive(Debug, Clone)]
pub struct MessageX {
    pub level: MessageLevel,
    pub note: String,
    pub spans: Vec<Span>,          // "primary" spans
    pub labels: Vec<MessageLabel>, // additional spans, with string annotations
    pub help: Option<String>,
    pub source: Option<&'static str>,
}

pub type Message = Rc<MessageX>;

pub trait Diagnostics {
    /// Display or record the corresponding message
    fn report(&mut self, msg: &Message);
}

/// Diagnostics sink that keeps every message, in order
#[derive(Debug, Default)]
pub struct CollectedDiagnostics {
    pub messages: Vec<Message>,
}

impl Diagnostics for CollectedDiagnostics {
    fn report(&mut self, msg: &Message) {
        self.messages.push(msg.clone());
    }
}

impl CollectedDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, level: MessageLevel) -> usize {
        self.messages.iter().filter(|m| m.level == level).count()
    }

    pub fn notes_at(&self, level: MessageLevel) -> Vec<&str> {
        self.messages.iter().filter(|m| m.level == level).map(|m| m.note.as_str()).collect()
    }
}

/// A reporter scoped to one component: every message it forwards is tagged with `source`.
pub struct Reporter<'a> {
    diagnostics: &'a mut dyn Diagnostics,
    source: &'static str,
    errors: usize,
    report_hover: bool,
}

impl<'a> Reporter<'a> {
    pub fn new(diagnostics: &'a mut dyn Diagnostics, source: &'static str) -> Self {
        Reporter { diagnostics, source, errors: 0, report_hover: true }
    }

    pub fn with_hover_text(mut self, report_hover: bool) -> Self {
        self.report_hover = report_hover;
        self
    }

    /// Same sink, different source tag
    pub fn scoped(&mut self, source: &'static str) -> Reporter<'_> {
        Reporter { diagnostics: &mut *self.diagnostics, source, errors: 0, report_hover: self.report_hover }
    }

    /// Run `f` with a reporter tagged `source`; errors it reports count toward this reporter
    pub fn with_source<R>(&mut self, source: &'static str, f: impl FnOnce(&mut Reporter<'_>) -> R) -> R {
        let mut scoped = self.scoped(source);
        let result = f(&mut scoped);
        let errors = scoped.errors;
        self.errors += errors;
        result
    }

    pub fn report(&mut self, msg: Message) {
        if msg.level == MessageLevel::Info && !self.report_hover {
            return;
        }
        if msg.level == MessageLevel::Error {
            self.errors += 1;
        }
        let msg = if msg.source.is_none() {
            let mut m = (*msg).clone();
            m.source = Some(self.source);
            Rc::new(m)
        } else {
            msg
        };
        tracing::trace!(source = self.source, level = ?msg.level, "{}", msg.note);
        self.diagnostics.report(&msg);
    }

    pub fn error<S: Into<String>>(&mut self, span: &Span, note: S) {
        self.report(error(span, note));
    }

    pub fn warning<S: Into<String>>(&mut self, span: &Span, note: S) {
        self.report(warning(span, note));
    }

    pub fn info<S: Into<String>>(&mut self, span: &Span, note: S) {
        self.report(info(span, note));
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn source(&self) -> &'static str {
        self.source
    }
}

// Basic Message constructors

/// Basic message, with a note and a single span to be highlighted
pub fn message<S: Into<String>>(level: MessageLevel, note: S, span: &Span) -> Message {
    Rc::new(MessageX {
        level,
        note: note.into(),
        spans: vec![span.clone()],
        labels: Vec::new(),
        help: None,
        source: None,
    })
}

/// Bare message without any span
pub fn message_bare<S: Into<String>>(level: MessageLevel, note: S) -> Message {
    Rc::new(MessageX {
        level,
        note: note.into(),
        spans: vec![],
        labels: Vec::new(),
        help: None,
        source: None,
    })
}

// Convenience functions

pub fn note<S: Into<String>>(span: &Span, note: S) -> Message {
    message(MessageLevel::Note, note, span)
}

pub fn info<S: Into<String>>(span: &Span, note: S) -> Message {
    message(MessageLevel::Info, note, span)
}

pub fn warning<S: Into<String>>(span: &Span, note: S) -> Message {
    message(MessageLevel::Warning, note, span)
}

pub fn error_bare<S: Into<String>>(note: S) -> Message {
    message_bare(MessageLevel::Error, note)
}

pub fn error<S: Into<String>>(span: &Span, note: S) -> Message {
    message(MessageLevel::Error, note, span)
}

/// Prepend the error with "Internal Error".
/// Internal errors indicate a broken invariant in the rewriting pipeline, not a user mistake;
/// they abort processing of the program.
pub fn internal_error<S: Into<String>>(span: &Span, note: S) -> Message {
    let msg = format!("Internal Error: {:}", note.into());
    message(MessageLevel::Error, msg, span)
}

/// Error message with a span to be highlighted, and a label for that span
pub fn error_with_label<S: Into<String>, T: Into<String>>(
    span: &Span,
    note: S,
    label: T,
) -> Message {
    Rc::new(MessageX {
        level: MessageLevel::Error,
        note: note.into(),
        spans: vec![span.clone()],
        labels: vec![MessageLabel { span: span.clone(), note: label.into() }],
        help: None,
        source: None,
    })
}

// Add additional stuff with the "builders" below.

impl MessageX {
    /// Add a new primary span
    pub fn primary_span(&self, span: &Span) -> Message {
        let mut e = self.clone();
        e.spans.push(span.clone());
        Rc::new(e)
    }

    /// Add a secondary span to be highlighted, with a label
    pub fn secondary_label<S: Into<String>>(&self, span: &Span, label: S) -> Message {
        let mut e = self.clone();
        e.labels.push(MessageLabel { span: span.clone(), note: label.into() });
        Rc::new(e)
    }

    pub fn help(&self, help: impl Into<String>) -> Message {
        let mut e = self.clone();
        e.help = Some(help.into());
        Rc::new(e)
    }

    pub fn first_span(&self) -> Option<&Span> {
        self.spans.first()
    }
}

impl std::fmt::Display for MessageX {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.level {
            MessageLevel::Error => "Error",
            MessageLevel::Warning => "Warning",
            MessageLevel::Info => "Info",
            MessageLevel::Note => "Note",
        };
        match self.spans.first() {
            Some(span) => write!(f, "{}: {}: {}", span, level, self.note)?,
            None => write!(f, "{}: {}", level, self.note)?,
        }
        for label in &self.labels {
            write!(f, "\n  {}: {}", label.span, label.note)?;
        }
        if let Some(help) = &self.help {
            write!(f, "\n  help: {}", help)?;
        }
        Ok(())
    }
}

pub fn no_span() -> Span {
    TokenX::none()
}
