use std::collections::HashSet;

use invload_common::{
    error::{Error, ErrorKind, Origin},
    value::{VarMap, VarValue},
};

use crate::group::{ChildRef, HostEntry, RawInventory};

use super::range::expand_host_pattern;

const PORT_VAR: &str = "ansible_port";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum SectionKind {
    Hosts,
    Vars,
    Children,
}

struct Section {
    group: String,
    kind: SectionKind,
}

pub fn parse(origin: &Origin) -> Result<RawInventory, Error> {
    let mut parser = IniParser {
        origin,
        raw: RawInventory::new(),
        section: None,
        seen: HashSet::new(),
    };

    let mut offset = 0;
    for line in origin.data.split('\n') {
        let line_start = offset;
        offset += line.len() + 1;
        parser.parse_line(line_start, line.trim_end_matches('\r'))?;
    }

    Ok(parser.raw)
}

struct IniParser<'a> {
    origin: &'a Origin,
    raw: RawInventory,
    section: Option<Section>,
    seen: HashSet<(String, SectionKind)>,
}

impl IniParser<'_> {
    fn parse_line(&mut self, line_start: usize, line: &str) -> Result<(), Error> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            return Ok(());
        }
        let indent = line.len() - line.trim_start().len();

        if trimmed.starts_with('[') {
            return self.parse_header(line_start + indent, trimmed);
        }

        let Some((group, kind)) = self.section.as_ref().map(|s| (s.group.clone(), s.kind)) else {
            return self.parse_host_line("all", line_start, line);
        };
        match kind {
            SectionKind::Hosts => self.parse_host_line(&group, line_start, line),
            SectionKind::Vars => self.parse_var_line(&group, line_start + indent, trimmed),
            SectionKind::Children => self.parse_child_line(&group, line_start, line),
        }
    }

    fn parse_header(&mut self, start: usize, header: &str) -> Result<(), Error> {
        let Some(close) = header.find(']') else {
            return self
                .error(ErrorKind::Parse, "section header is missing ]", start, header.len())
                .err();
        };
        let rest = header[close + 1..].trim_start();
        if !rest.is_empty() && !rest.starts_with('#') && !rest.starts_with(';') {
            let at = start + header.len() - rest.len();
            return self
                .error(ErrorKind::Parse, "unexpected text after section header", at, rest.len())
                .err();
        }

        let inner = header[1..close].trim();
        let (name, kind) = match inner.rsplit_once(':') {
            Some((name, "vars")) => (name, SectionKind::Vars),
            Some((name, "children")) => (name, SectionKind::Children),
            Some((_, suffix)) => {
                return self
                    .error(
                        ErrorKind::Parse,
                        format!("unknown section type {suffix}, expected vars or children"),
                        start,
                        close + 1,
                    )
                    .err();
            }
            None => (inner, SectionKind::Hosts),
        };
        if !valid_group_name(name) {
            return self
                .error(
                    ErrorKind::Parse,
                    format!("invalid group name {name:?}"),
                    start,
                    close + 1,
                )
                .err();
        }

        if !self.seen.insert((name.to_string(), kind)) {
            return self
                .error(
                    ErrorKind::Schema,
                    format!("section [{inner}] is defined twice"),
                    start,
                    close + 1,
                )
                .err();
        }

        let location = self.origin.location(start..start + close + 1);
        self.raw.entry(name, Some(location));
        self.section = Some(Section {
            group: name.to_string(),
            kind,
        });
        Ok(())
    }

    fn parse_host_line(&mut self, group: &str, line_start: usize, line: &str) -> Result<(), Error> {
        let tokens = tokenize(line)
            .map_err(|at| self.error(ErrorKind::Parse, "unterminated quote", line_start + at, 1))?;
        let Some((pattern_at, pattern)) = tokens.first().copied() else {
            return Ok(());
        };
        let pattern_span = line_start + pattern_at..line_start + pattern_at + pattern.len();

        let (pattern, port) = split_port(pattern);
        let port = port
            .map(|port| {
                port.parse::<u16>().map_err(|_| {
                    self.error(
                        ErrorKind::Parse,
                        format!("invalid port {port} for host {pattern}"),
                        pattern_span.start + pattern.len() + 1,
                        port.len(),
                    )
                })
            })
            .transpose()?;

        let names = expand_host_pattern(pattern).map_err(|e| {
            self.error(ErrorKind::Parse, e, pattern_span.start, pattern.len())
        })?;

        let mut vars = VarMap::new();
        for (at, token) in &tokens[1..] {
            let at = line_start + at;
            let Some((key, value)) = token.split_once('=') else {
                return self
                    .error(
                        ErrorKind::Parse,
                        format!("expected key=value after host {pattern}, found {token}"),
                        at,
                        token.len(),
                    )
                    .err();
            };
            if key.is_empty() {
                return self
                    .error(ErrorKind::Parse, "variable name is empty", at, token.len())
                    .err();
            }
            if vars.contains_key(key) {
                return self
                    .error(
                        ErrorKind::Schema,
                        format!("variable {key} is set twice for host {pattern}"),
                        at,
                        key.len(),
                    )
                    .err();
            }
            vars.insert(key.to_string(), literal(value));
        }
        if let Some(port) = port {
            vars.entry(PORT_VAR.to_string())
                .or_insert_with(|| VarValue::from(i64::from(port)));
        }

        let location = self.origin.location(pattern_span);
        let group_location = if group == "all" && !self.raw.contains("all") {
            Some(location.clone())
        } else {
            None
        };
        let group = self.raw.entry(group, group_location);
        for name in names {
            group.add_host(HostEntry {
                name,
                vars: vars.clone(),
                location: Some(location.clone()),
            })?;
        }
        Ok(())
    }

    fn parse_var_line(&mut self, group: &str, start: usize, line: &str) -> Result<(), Error> {
        let Some((key, value)) = line.split_once('=') else {
            return self
                .error(
                    ErrorKind::Parse,
                    format!("expected key=value in [{group}:vars]"),
                    start,
                    line.len(),
                )
                .err();
        };
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return self
                .error(
                    ErrorKind::Parse,
                    format!("invalid variable name {key:?}"),
                    start,
                    line.len(),
                )
                .err();
        }

        let location = self.origin.location(start..start + key.len());
        self.raw.entry(group, None).set_var(
            key,
            VarValue::String(string_value(value.trim())),
            Some(location),
        )
    }

    fn parse_child_line(&mut self, group: &str, line_start: usize, line: &str) -> Result<(), Error> {
        let tokens = tokenize(line)
            .map_err(|at| self.error(ErrorKind::Parse, "unterminated quote", line_start + at, 1))?;
        let (at, name) = match tokens.as_slice() {
            [] => return Ok(()),
            [(at, name)] => (line_start + at, *name),
            [_, (at, extra), ..] => {
                return self
                    .error(
                        ErrorKind::Parse,
                        format!("expected one group name per line in [{group}:children]"),
                        line_start + at,
                        extra.len(),
                    )
                    .err();
            }
        };
        if !valid_group_name(name) {
            return self
                .error(
                    ErrorKind::Parse,
                    format!("invalid group name {name:?}"),
                    at,
                    name.len(),
                )
                .err();
        }

        let location = self.origin.location(at..at + name.len());
        self.raw.entry(group, None).add_child(ChildRef {
            name: name.to_string(),
            location: Some(location),
        })
    }

    fn error(&self, kind: ErrorKind, msg: impl Into<String>, start: usize, len: usize) -> Error {
        self.origin.error(kind, msg, &Some(start..start + len.max(1)))
    }
}

fn valid_group_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ':' | '[' | ']' | '=' | '"' | '\''))
}

/// Splits a line on whitespace, keeping quoted runs together and stopping at
/// a `#` that starts a token. Returns byte offsets with each token, or the
/// offset of an unterminated quote.
/// Splits `host:port`. Colons inside a range and bare IPv6 addresses are left
/// alone.
fn split_port(pattern: &str) -> (&str, Option<&str>) {
    let mut depth = 0usize;
    let mut colons = Vec::new();
    for (i, c) in pattern.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ':' if depth == 0 => colons.push(i),
            _ => {}
        }
    }
    match colons.as_slice() {
        [at] => {
            let port = &pattern[at + 1..];
            if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
                (&pattern[..*at], Some(port))
            } else {
                (pattern, None)
            }
        }
        _ => (pattern, None),
    }
}

fn tokenize(line: &str) -> Result<Vec<(usize, &str)>, usize> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let mut quote: Option<(char, usize)> = None;
    let mut escaped = false;

    for (i, c) in line.char_indices() {
        if let Some((q, _)) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' && q == '"' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                tokens.push((s, &line[s..i]));
            }
            continue;
        }
        if start.is_none() {
            if c == '#' {
                break;
            }
            start = Some(i);
        }
        if c == '"' || c == '\'' {
            quote = Some((c, i));
        }
    }

    if let Some((_, at)) = quote {
        return Err(at);
    }
    if let Some(s) = start {
        tokens.push((s, &line[s..]));
    }
    Ok(tokens)
}

fn unquote(s: &str) -> Option<String> {
    let mut chars = s.chars();
    let first = chars.next()?;
    let last = chars.next_back()?;
    if first != last || !matches!(first, '"' | '\'') {
        return None;
    }
    let inner = &s[1..s.len() - 1];
    if first == '\'' {
        return Some(inner.to_string());
    }

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Some(out)
}

/// Value of a `[group:vars]` entry: always a string, quotes removed.
fn string_value(value: &str) -> String {
    if let Some(s) = unquote(value) {
        return s;
    }
    let end = [" #", "\t#", " ;", "\t;"]
        .iter()
        .filter_map(|marker| value.find(marker))
        .min()
        .unwrap_or(value.len());
    value[..end].trim_end().to_string()
}

/// Value of an inline host variable, typed the way a literal would be.
fn literal(value: &str) -> VarValue {
    if let Some(s) = unquote(value) {
        return VarValue::String(s);
    }
    match value {
        "true" | "True" => return VarValue::Bool(true),
        "false" | "False" => return VarValue::Bool(false),
        _ => {}
    }

    let digits = value.strip_prefix(['-', '+']).unwrap_or(value);
    let plain_int = !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
        && (digits == "0" || !digits.starts_with('0'));
    if plain_int {
        if let Ok(i) = value.parse::<i64>() {
            return VarValue::Number(i.into());
        }
    }

    let float_like = digits.chars().any(|c| c.is_ascii_digit())
        && digits.contains(['.', 'e', 'E'])
        && digits
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '-' | '+'));
    if float_like {
        if let Some(v) = value.parse::<f64>().ok().and_then(VarValue::from_f64) {
            return v;
        }
    }

    VarValue::String(value.to_string())
}
