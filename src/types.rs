#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// WordPress taxonomy a term belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermKind {
    Tag,
    Category,
}

impl TermKind {
    /// REST route segment for this taxonomy.
    pub fn route(&self) -> &'static str {
        match self {
            TermKind::Tag => "tags",
            TermKind::Category => "categories",
        }
    }
}

impl std::fmt::Display for TermKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TermKind::Tag => f.write_str("tag"),
            TermKind::Category => f.write_str("category"),
        }
    }
}
