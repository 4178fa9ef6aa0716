use std::{
    fmt,
    io::Write,
    ops::Range,
    path::{Path, PathBuf},
};

/// The failure classes a load can end with. Every one of them is terminal for
/// the call that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ErrorKind {
    /// The inventory, config or vars file can't be read.
    #[strum(serialize = "not-found")]
    NotFound,
    /// The content isn't valid syntax for the detected grammar.
    #[strum(serialize = "parse")]
    Parse,
    /// The content parsed but describes an invalid inventory.
    #[strum(serialize = "schema")]
    Schema,
    /// The extension config file is inconsistent.
    #[strum(serialize = "config")]
    Config,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorLocation {
    pub path: PathBuf,
    pub line_content: String,
    /// 1-based
    pub line: usize,
    /// 1-based
    pub column: usize,
    /// length of the highlighted range, at least 1
    pub width: usize,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<ErrorLocation>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Schema, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn with_location(mut self, location: ErrorLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Attaches the location of `span` inside `origin`, unless the error
    /// already points somewhere.
    pub fn with_origin(mut self, origin: &Origin, span: &Option<Range<usize>>) -> Self {
        if self.location.is_none() {
            self.location = span.as_ref().map(|span| origin.location(span.clone()));
        }
        self
    }

    pub fn err<T>(self) -> Result<T, Error> {
        Err(self)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_parse(&self) -> bool {
        self.kind == ErrorKind::Parse
    }

    pub fn is_schema(&self) -> bool {
        self.kind == ErrorKind::Schema
    }

    pub fn is_config(&self) -> bool {
        self.kind == ErrorKind::Config
    }

    pub fn from_hcl(e: hcl_edit::parser::Error, path: PathBuf) -> Error {
        let location = e.location();
        Error {
            kind: ErrorKind::Parse,
            message: e.message().to_string(),
            location: Some(ErrorLocation {
                path,
                line_content: e.line().to_string(),
                line: location.line(),
                column: location.column(),
                width: 1,
            }),
        }
    }

    pub fn from_yaml(e: serde_yaml::Error, origin: &Origin) -> Error {
        let location = e.location().map(|l| origin.location_at(l.line(), l.column()));
        // serde_yaml appends " at line X column Y" to its message
        let message = e.to_string();
        let message = match message.find(" at line ") {
            Some(i) if location.is_some() => message[..i].to_string(),
            _ => message,
        };
        Error {
            kind: ErrorKind::Parse,
            message,
            location,
        }
    }

    /// Renders the error with the offending line and a caret underneath.
    pub fn render(&self) -> String {
        let mut out = format!("error[{}]: {}\n", self.kind, self.message);
        if let Some(location) = &self.location {
            let gutter = location.line.to_string().len();
            let pad = " ".repeat(gutter);
            out.push_str(&format!(
                "{pad}--> {}:{}:{}\n",
                location.path.to_string_lossy(),
                location.line,
                location.column
            ));
            out.push_str(&format!("{pad} |\n"));
            out.push_str(&format!("{} | {}\n", location.line, location.line_content));
            out.push_str(&format!(
                "{pad} | {}{}\n",
                " ".repeat(location.column.saturating_sub(1)),
                "^".repeat(location.width.max(1))
            ));
        }
        out
    }

    pub fn report_stderr(&self) {
        let _ = std::io::stderr().write_all(self.render().as_bytes());
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(
                f,
                "{} error: {} ({}:{}:{})",
                self.kind,
                self.message,
                location.path.to_string_lossy(),
                location.line,
                location.column
            ),
            None => write!(f, "{} error: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for Error {}

/// The text of one source file together with where it came from, so that
/// errors can point back into it.
#[derive(Debug, Clone)]
pub struct Origin {
    pub cwd: PathBuf,
    pub path: PathBuf,
    pub data: String,
}

impl Origin {
    pub fn new(path: PathBuf, data: String) -> Self {
        let cwd = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default();
        Self { cwd, path, data }
    }

    pub fn read(path: &Path) -> Result<Self, Error> {
        if !path.is_file() {
            return Error::not_found(format!("{} doesn't exist", path.to_string_lossy())).err();
        }
        let data = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::InvalidData => {
                Error::parse(format!("{} isn't UTF-8 text: {e}", path.to_string_lossy()))
            }
            _ => Error::not_found(format!("can't read {} error: {e}", path.to_string_lossy())),
        })?;
        Ok(Self::new(path.to_path_buf(), data))
    }

    pub fn error(
        &self,
        kind: ErrorKind,
        message: impl Into<String>,
        span: &Option<Range<usize>>,
    ) -> Error {
        Error::new(kind, message).with_origin(self, span)
    }

    pub fn error_at_line(&self, kind: ErrorKind, message: impl Into<String>, line: usize) -> Error {
        Error::new(kind, message).with_location(self.location_at(line, 1))
    }

    /// Location of a byte range. Ranges past the end are clamped.
    pub fn location(&self, span: Range<usize>) -> ErrorLocation {
        let start = span.start.min(self.data.len());
        let before = &self.data[..start];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let column = before[line_start..].chars().count() + 1;
        let line_content = self.line(line);
        let remaining = line_content.chars().count().saturating_sub(column - 1);
        let width = span.end.saturating_sub(span.start).clamp(1, remaining.max(1));
        ErrorLocation {
            path: self.path.clone(),
            line_content,
            line,
            column,
            width,
        }
    }

    /// Location of a 1-based line and column.
    pub fn location_at(&self, line: usize, column: usize) -> ErrorLocation {
        let line_content = self.line(line);
        let width = line_content
            .chars()
            .count()
            .saturating_sub(column.saturating_sub(1))
            .max(1);
        ErrorLocation {
            path: self.path.clone(),
            line_content,
            line,
            column: column.max(1),
            width: if column <= 1 { width } else { 1 },
        }
    }

    fn line(&self, line: usize) -> String {
        self.data
            .lines()
            .nth(line.saturating_sub(1))
            .unwrap_or_default()
            .trim_end_matches('\r')
            .to_string()
    }
}
