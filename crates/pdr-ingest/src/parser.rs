//! PDR parser
//!
//! A PDR is a PVL (Parameter Value Language) label:
//!
//! ```text
//! ORIGINATING_SYSTEM = DAAC;
//! TOTAL_FILE_COUNT = 2;
//! OBJECT = FILE_GROUP;
//!   DATA_TYPE = MOD09GQ;
//!   OBJECT = FILE_SPEC;
//!     DIRECTORY_ID = /MODOPS/MODAPS/EDC/CUMULUS/FPROC/DATA;
//!     FILE_ID = MOD09GQ.A2017224.h09v02.006.2017227165020.hdf;
//!     FILE_SIZE = 17865615;
//!     FILE_CKSUM_TYPE = CKSUM;
//!     FILE_CKSUM_VALUE = 4208254019;
//!   END_OBJECT = FILE_SPEC;
//! END_OBJECT = FILE_GROUP;
//! ```
//!
//! Each top-level `FILE_GROUP` becomes one granule and each nested
//! `FILE_SPEC` one file. Parsing is pure; any structural or field error
//! rejects the whole manifest.

use pdr_common::checksum::ChecksumType;
use pdr_common::types::{Granule, GranuleFile, ParseResult};
use tracing::warn;

use crate::error::{IngestError, IngestResult};

const FILE_GROUP: &str = "FILE_GROUP";
const FILE_SPEC: &str = "FILE_SPEC";

/// Parse PDR text into granules
pub fn parse_pdr(text: &str, manifest_name: &str) -> IngestResult<ParseResult> {
    parse_document(text).map_err(|reason| IngestError::manifest_format(manifest_name, reason))
}

fn parse_document(text: &str) -> Result<ParseResult, String> {
    let statements = split_statements(text)?;
    let root = build_tree(&statements)?;

    let granules = root
        .children
        .iter()
        .filter(|block| block.is(FILE_GROUP))
        .map(granule_from_group)
        .collect::<Result<Vec<_>, _>>()?;

    if granules.is_empty() {
        return Err("PDR contains no FILE_GROUP objects".to_string());
    }

    let result = ParseResult::from_granules(granules)
        .ok_or_else(|| format!("total FILE_SIZE of the PDR exceeds {} bytes", u64::MAX))?;

    if let Some(declared) = root.attr("TOTAL_FILE_COUNT") {
        match declared.parse::<usize>() {
            Ok(count) if count == result.files_count => {},
            Ok(count) => warn!(
                declared = count,
                parsed = result.files_count,
                "TOTAL_FILE_COUNT does not match the number of FILE_SPEC objects"
            ),
            Err(_) => warn!(value = declared, "TOTAL_FILE_COUNT is not an integer"),
        }
    }

    Ok(result)
}

// ============================================================================
// Lexing
// ============================================================================

struct Statement {
    line: usize,
    text: String,
}

/// Split the label into `;`-terminated statements, dropping `/* */` comments
fn split_statements(text: &str) -> Result<Vec<Statement>, String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut line = 1;
    let mut start_line = 1;
    let mut quote: Option<char> = None;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\n' => {
                line += 1;
                current.push(c);
            },
            '"' | '\'' if quote.is_none() => {
                quote = Some(c);
                current.push(c);
            },
            c if quote == Some(c) => {
                quote = None;
                current.push(c);
            },
            '/' if quote.is_none() && chars.peek() == Some(&'*') => {
                chars.next();
                let comment_line = line;
                let mut prev = '\0';
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                    }
                    if prev == '*' && c == '/' {
                        closed = true;
                        break;
                    }
                    prev = c;
                }
                if !closed {
                    return Err(format!("line {}: unterminated comment", comment_line));
                }
                current.push(' ');
            },
            ';' if quote.is_none() => {
                let text = current.trim();
                if !text.is_empty() {
                    statements.push(Statement {
                        line: start_line,
                        text: text.to_string(),
                    });
                }
                current.clear();
            },
            _ => current.push(c),
        }

        if current.trim().is_empty() {
            start_line = line;
        }
    }

    if quote.is_some() {
        return Err(format!("line {}: unterminated quoted value", start_line));
    }

    let trailing = current.trim();
    if !trailing.is_empty() {
        return Err(format!("line {}: statement `{}` is missing ';'", start_line, trailing));
    }

    Ok(statements)
}

// ============================================================================
// Tree building
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Object,
    Group,
}

impl BlockKind {
    fn keyword(self) -> &'static str {
        match self {
            BlockKind::Object => "OBJECT",
            BlockKind::Group => "GROUP",
        }
    }
}

enum Token {
    Begin { kind: BlockKind, name: String },
    End { kind: BlockKind, name: Option<String> },
    Attr { key: String, value: String },
    EndOfLabel,
}

#[derive(Debug)]
struct Block {
    kind: BlockKind,
    name: String,
    line: usize,
    attrs: Vec<(String, String)>,
    children: Vec<Block>,
}

impl Block {
    fn new(kind: BlockKind, name: impl Into<String>, line: usize) -> Self {
        Self {
            kind,
            name: name.into(),
            line,
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// First value of an attribute, keys compared upper-cased
    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn tokenize(statement: &Statement) -> Result<Token, String> {
    let (key, value) = match statement.text.split_once('=') {
        Some((key, value)) => (key.trim().to_uppercase(), Some(unquote(value.trim()))),
        None => (statement.text.trim().to_uppercase(), None),
    };

    let token = match (key.as_str(), value) {
        ("END", None) => Token::EndOfLabel,
        ("OBJECT", Some(name)) | ("GROUP", Some(name)) if !name.is_empty() => Token::Begin {
            kind: if key == "OBJECT" { BlockKind::Object } else { BlockKind::Group },
            name,
        },
        ("OBJECT", _) | ("GROUP", _) => {
            return Err(format!("line {}: {} without a name", statement.line, key));
        },
        ("END_OBJECT", name) => Token::End {
            kind: BlockKind::Object,
            name: name.filter(|n| !n.is_empty()),
        },
        ("END_GROUP", name) => Token::End {
            kind: BlockKind::Group,
            name: name.filter(|n| !n.is_empty()),
        },
        (_, Some(value)) if is_valid_key(&key) => Token::Attr {
            key: key.clone(),
            value,
        },
        _ => {
            return Err(format!(
                "line {}: expected `KEY = VALUE`, found `{}`",
                statement.line, statement.text
            ));
        },
    };

    Ok(token)
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' || first == b'\'') && first == last {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

fn build_tree(statements: &[Statement]) -> Result<Block, String> {
    let mut stack = vec![Block::new(BlockKind::Object, "ROOT", 0)];

    for statement in statements {
        match tokenize(statement)? {
            Token::EndOfLabel => break,
            Token::Begin { kind, name } => stack.push(Block::new(kind, name, statement.line)),
            Token::End { kind, name } => {
                if stack.len() == 1 {
                    return Err(format!(
                        "line {}: END_{} without a matching {}",
                        statement.line,
                        kind.keyword(),
                        kind.keyword()
                    ));
                }
                let Some(block) = stack.pop() else {
                    return Err(format!("line {}: unbalanced block", statement.line));
                };
                if block.kind != kind {
                    return Err(format!(
                        "line {}: END_{} closes {} = {} opened on line {}",
                        statement.line,
                        kind.keyword(),
                        block.kind.keyword(),
                        block.name,
                        block.line
                    ));
                }
                if let Some(name) = name {
                    if !block.is(&name) {
                        return Err(format!(
                            "line {}: END_{} = {} closes {} = {}",
                            statement.line,
                            kind.keyword(),
                            name,
                            block.kind.keyword(),
                            block.name
                        ));
                    }
                }
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(block);
                }
            },
            Token::Attr { key, value } => {
                if let Some(current) = stack.last_mut() {
                    current.attrs.push((key, value));
                }
            },
        }
    }

    if stack.len() > 1 {
        let open = &stack[stack.len() - 1];
        return Err(format!(
            "unterminated {} = {} opened on line {}",
            open.kind.keyword(),
            open.name,
            open.line
        ));
    }

    stack.pop().ok_or_else(|| "empty document".to_string())
}

// ============================================================================
// Interpretation
// ============================================================================

fn granule_from_group(group: &Block) -> Result<Granule, String> {
    let data_type = group
        .attr("DATA_TYPE")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("FILE_GROUP on line {} is missing DATA_TYPE", group.line))?;

    let data_version = group.attr("DATA_VERSION").map(str::to_string);

    let files = group
        .children
        .iter()
        .filter(|block| block.is(FILE_SPEC))
        .map(file_from_spec)
        .collect::<Result<Vec<_>, _>>()?;

    if files.is_empty() {
        return Err(format!(
            "FILE_GROUP {} on line {} has no FILE_SPEC objects",
            data_type, group.line
        ));
    }

    Granule::new(data_type, data_version, files).ok_or_else(|| {
        format!(
            "FILE_GROUP {} on line {}: total FILE_SIZE exceeds {} bytes",
            data_type,
            group.line,
            u64::MAX
        )
    })
}

fn file_from_spec(spec: &Block) -> Result<GranuleFile, String> {
    let required = |key: &str| {
        spec.attr(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| format!("FILE_SPEC on line {} is missing {}", spec.line, key))
    };

    let name = required("FILE_ID")?;
    let path = required("DIRECTORY_ID")?;
    let size = required("FILE_SIZE")?;

    let file_size = size
        .parse::<u64>()
        .map_err(|_| format!("FILE_SIZE `{}` of {} is not a non-negative integer", size, name))?;

    let (checksum_type, checksum_value) =
        match (spec.attr("FILE_CKSUM_TYPE"), spec.attr("FILE_CKSUM_VALUE")) {
            (Some(kind), Some(value)) => {
                let kind = kind
                    .parse::<ChecksumType>()
                    .map_err(|_| format!("unsupported checksum type `{}` for {}", kind, name))?;
                (Some(kind), Some(value.to_string()))
            },
            (None, None) => (None, None),
            _ => {
                return Err(format!(
                    "FILE_CKSUM_TYPE and FILE_CKSUM_VALUE must appear together for {}",
                    name
                ));
            },
        };

    Ok(GranuleFile {
        name: name.to_string(),
        path: path.to_string(),
        file_size,
        checksum_type,
        checksum_value,
    })
}
