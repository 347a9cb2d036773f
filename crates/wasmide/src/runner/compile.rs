//! Compilation step for submitted programs
//!
//! Turns WebAssembly text into a validated binary module, or into every
//! diagnostic explaining why it could not.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};
use wast::Wat;
use wast::core::{FuncKind, Module, ModuleField, ModuleKind};
use wast::parser::{self, Parse, ParseBuffer, Parser};
use wast::token::Span;

use crate::runner::CompileError;
use crate::types::{BinaryModule, Diagnostic};

static MODULE_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(\s*module\s+\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("module declaration pattern should compile")
});

/// Extract the declared module name from source text
pub fn extract_module_name(source: &str) -> Option<&str> {
    MODULE_DECLARATION
        .captures(source)
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str())
}

/// Source text of one submission with its declared module name
#[derive(Debug, Clone)]
pub struct CompilationUnit<'a> {
    name: &'a str,
    source: &'a str,
    /// Byte range of the `(module $Name` declaration
    declaration: Range<usize>,
}

impl<'a> CompilationUnit<'a> {
    /// Identify the module declared in `source`
    pub fn from_source(source: &'a str) -> Result<Self, CompileError> {
        let captures = MODULE_DECLARATION
            .captures(source)
            .ok_or(CompileError::InputRejected)?;
        let (Some(declaration), Some(name)) = (captures.get(0), captures.get(1)) else {
            return Err(CompileError::InputRejected);
        };

        Ok(Self {
            name: name.as_str(),
            source,
            declaration: declaration.range(),
        })
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    /// 1-based line of the module declaration
    pub fn declaration_line(&self) -> usize {
        line_at(self.source, self.declaration.start)
    }

    fn body_start(&self) -> usize {
        self.declaration.end
    }
}

/// Compiler output keyed by module name, scoped to one compile call
#[derive(Debug, Default)]
struct ModuleStore {
    outputs: HashMap<String, Vec<u8>>,
}

impl ModuleStore {
    fn put(&mut self, name: &str, bytes: Vec<u8>) {
        self.outputs.insert(name.to_owned(), bytes);
    }

    fn take(&mut self, name: &str) -> Option<Vec<u8>> {
        self.outputs.remove(name)
    }
}

/// Compile submitted source into a validated binary module
#[instrument(skip(source), fields(len = source.len()))]
pub fn compile(source: &str) -> Result<BinaryModule, CompileError> {
    let unit = CompilationUnit::from_source(source)?;
    debug!(module = unit.name(), "compiling");

    let mut store = ModuleStore::default();
    compile_unit(&unit, &mut store)?;

    let bytes = store.take(unit.name()).ok_or_else(|| {
        CompileError::Diagnostics(vec![Diagnostic::error(
            unit.declaration_line(),
            format!("no output produced for module ${}", unit.name()),
        )])
    })?;

    debug!(module = unit.name(), len = bytes.len(), "compilation complete");
    Ok(BinaryModule::new(unit.name(), bytes))
}

struct Encoded {
    bytes: Vec<u8>,
    /// Spans of defined (non-imported) functions, in index order
    functions: Vec<Span>,
}

enum Failure {
    Parse(wast::Error),
    Encode(wast::Error),
    NotAModule,
}

fn compile_unit(unit: &CompilationUnit<'_>, store: &mut ModuleStore) -> Result<(), CompileError> {
    let encoded = match parse_and_encode(unit.source()) {
        Ok(encoded) => encoded,
        Err(Failure::Parse(err)) => {
            debug!("parse failed, checking fields individually");
            return Err(CompileError::Diagnostics(field_diagnostics(unit, &err)));
        }
        Err(Failure::Encode(err)) => {
            return Err(CompileError::Diagnostics(vec![diagnostic_at(
                unit.source(),
                &err,
            )]));
        }
        Err(Failure::NotAModule) => {
            return Err(CompileError::Diagnostics(vec![Diagnostic::error(
                unit.declaration_line(),
                "expected a core module",
            )]));
        }
    };

    if let Err(err) = wasmparser::Validator::new().validate_all(&encoded.bytes) {
        let line = function_line(unit.source(), &encoded, err.offset())
            .unwrap_or_else(|| unit.declaration_line());
        return Err(CompileError::Diagnostics(vec![Diagnostic::error(
            line,
            err.message(),
        )]));
    }

    store.put(unit.name(), encoded.bytes);
    Ok(())
}

fn parse_and_encode(source: &str) -> Result<Encoded, Failure> {
    let buffer = ParseBuffer::new(source).map_err(Failure::Parse)?;
    let mut wat = parser::parse::<Wat>(&buffer).map_err(Failure::Parse)?;
    let functions = match &wat {
        Wat::Module(module) => defined_functions(module),
        _ => return Err(Failure::NotAModule),
    };
    let bytes = wat.encode().map_err(Failure::Encode)?;
    Ok(Encoded { bytes, functions })
}

fn defined_functions(module: &Module<'_>) -> Vec<Span> {
    match &module.kind {
        ModuleKind::Text(fields) => fields
            .iter()
            .filter_map(|field| match field {
                ModuleField::Func(func) if matches!(func.kind, FuncKind::Inline { .. }) => {
                    Some(func.span)
                }
                _ => None,
            })
            .collect(),
        ModuleKind::Binary(_) => Vec::new(),
    }
}

/// Line of the function whose body holds `offset`
fn function_line(source: &str, encoded: &Encoded, offset: usize) -> Option<usize> {
    let bodies = wasmparser::Parser::new(0)
        .parse_all(&encoded.bytes)
        .filter_map(|payload| match payload {
            Ok(wasmparser::Payload::CodeSectionEntry(body)) => Some(body.range()),
            _ => None,
        });

    bodies
        .zip(&encoded.functions)
        .find(|(range, _)| range.contains(&offset))
        .map(|(_, span)| span.linecol_in(source).0 + 1)
}

/// Re-parse each top-level field on its own so every broken field is reported
fn field_diagnostics(unit: &CompilationUnit<'_>, whole: &wast::Error) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for field in top_level_fields(unit.source(), unit.body_start()) {
        let isolated = isolate(unit.source(), &field);
        if let Err(err) = parse_field(&isolated) {
            diagnostics.push(diagnostic_at(&isolated, &err));
        }
    }

    if diagnostics.is_empty() {
        diagnostics.push(diagnostic_at(unit.source(), whole));
    }
    diagnostics
}

fn parse_field(text: &str) -> parser::Result<()> {
    let buffer = ParseBuffer::new(text)?;
    parser::parse::<Field<'_>>(&buffer)?;
    Ok(())
}

/// A single parenthesized module field
struct Field<'a>(#[allow(dead_code)] ModuleField<'a>);

impl<'a> Parse<'a> for Field<'a> {
    fn parse(parser: Parser<'a>) -> parser::Result<Self> {
        parser.parens(|p| p.parse()).map(Field)
    }
}

fn diagnostic_at(text: &str, err: &wast::Error) -> Diagnostic {
    let (line, _) = err.span().linecol_in(text);
    Diagnostic::error(line + 1, err.message())
}

fn line_at(source: &str, offset: usize) -> usize {
    let end = offset.min(source.len());
    source.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
}

/// Byte ranges of the parenthesized fields directly inside the module body.
///
/// Strings and comments are skipped. A field left open at end of input runs
/// to the end.
fn top_level_fields(source: &str, body_start: usize) -> Vec<Range<usize>> {
    let bytes = source.as_bytes();
    let mut fields = Vec::new();
    let mut depth = 0usize;
    let mut start = body_start;
    let mut i = body_start;

    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i = skip_string(bytes, i);
                continue;
            }
            b';' if bytes.get(i + 1) == Some(&b';') => {
                i = skip_line_comment(bytes, i);
                continue;
            }
            b'(' if bytes.get(i + 1) == Some(&b';') => {
                i = skip_block_comment(bytes, i);
                continue;
            }
            b'(' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b')' => {
                if depth == 0 {
                    // closes the module itself
                    break;
                }
                depth -= 1;
                if depth == 0 {
                    fields.push(start..i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }

    if depth > 0 {
        fields.push(start..bytes.len());
    }
    fields
}

fn skip_string(bytes: &[u8], open: usize) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |len| start + len)
}

fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"(;") {
            depth += 1;
            i += 2;
        } else if bytes[i..].starts_with(b";)") {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return i;
            }
        } else {
            i += 1;
        }
    }
    bytes.len()
}

/// Blank everything outside `field`, keeping newlines so lines still line up
fn isolate(source: &str, field: &Range<usize>) -> String {
    source
        .char_indices()
        .map(|(i, c)| {
            if field.contains(&i) || c == '\n' {
                c
            } else {
                ' '
            }
        })
        .collect()
}
