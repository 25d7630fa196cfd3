//! Domain error types.

/// A parse error with position information for reference and condition text.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Top-level error type for stratlab.
///
/// Configuration errors (unknown indicator, malformed tree, bad bars, bad
/// config) fail a run outright. Undefined indicator values are never errors;
/// they make the affected condition false.
#[derive(Debug, thiserror::Error)]
pub enum StratlabError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    RuleParse(#[from] ParseError),

    /// A parse error inside a rule document, with the text it came from.
    #[error("rule node '{node}': {source}")]
    RuleSyntax {
        node: String,
        text: String,
        #[source]
        source: ParseError,
    },

    #[error("unknown indicator '{name}'")]
    UnknownIndicator { name: String },

    #[error("invalid rule tree at node '{node}': {reason}")]
    InvalidTree { node: String, reason: String },

    #[error("invalid bar sequence at index {index}: {reason}")]
    InvalidBars { index: usize, reason: String },

    #[error("no data for {symbol}")]
    NoData { symbol: String },

    #[error("insufficient data: have {bars} bars, rule needs {required} to warm up")]
    InsufficientData { bars: usize, required: usize },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StratlabError {
    pub(crate) fn invalid_tree(node: &str, reason: impl Into<String>) -> Self {
        StratlabError::InvalidTree {
            node: node.to_string(),
            reason: reason.into(),
        }
    }

    /// Attach the node id and source text to a bare parse error.
    pub(crate) fn in_text(self, node: &str, text: &str) -> Self {
        match self {
            StratlabError::RuleParse(source) => StratlabError::RuleSyntax {
                node: node.to_string(),
                text: text.to_string(),
                source,
            },
            other => other,
        }
    }

    /// Caret rendering for parse errors that carry their text.
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            StratlabError::RuleSyntax { text, source, .. } => {
                Some(source.display_with_context(text))
            }
            _ => None,
        }
    }

    /// True for errors caused by the rule or its configuration rather than
    /// by the data it runs over.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StratlabError::ConfigParse { .. }
                | StratlabError::ConfigMissing { .. }
                | StratlabError::ConfigInvalid { .. }
                | StratlabError::RuleParse(_)
                | StratlabError::RuleSyntax { .. }
                | StratlabError::UnknownIndicator { .. }
                | StratlabError::InvalidTree { .. }
                | StratlabError::InvalidBars { .. }
        )
    }
}

impl From<&StratlabError> for std::process::ExitCode {
    fn from(err: &StratlabError) -> Self {
        let code: u8 = match err {
            StratlabError::Io(_) => 1,
            StratlabError::ConfigParse { .. }
            | StratlabError::ConfigMissing { .. }
            | StratlabError::ConfigInvalid { .. } => 2,
            StratlabError::Data { .. } | StratlabError::Json(_) => 3,
            StratlabError::RuleParse(_)
            | StratlabError::RuleSyntax { .. }
            | StratlabError::UnknownIndicator { .. }
            | StratlabError::InvalidTree { .. } => 4,
            StratlabError::NoData { .. }
            | StratlabError::InsufficientData { .. }
            | StratlabError::InvalidBars { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
