//! Synthetic exception contexts used to fill the failure headers.
//!
//! Each context is produced by actually failing through a fixed chain of
//! nested calls: the throw site creates the failure and every level records
//! its own frame while the error propagates back up. Messages of the same
//! kind therefore share one identical, call-site accurate stack.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::CatalogError;

/// Number of nested `level` calls between the handler entry and the throw
/// site.
pub const CHAIN_DEPTH: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExceptionKind {
    InvalidOperation,
    ArgumentError,
    Timeout,
}

impl ExceptionKind {
    /// Round-robin order used by the standard catalog.
    pub const ALL: [ExceptionKind; 3] = [
        ExceptionKind::InvalidOperation,
        ExceptionKind::ArgumentError,
        ExceptionKind::Timeout,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExceptionKind::InvalidOperation => "invalid-operation",
            ExceptionKind::ArgumentError => "argument",
            ExceptionKind::Timeout => "timeout",
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            ExceptionKind::InvalidOperation => "System.InvalidOperationException",
            ExceptionKind::ArgumentError => "System.ArgumentException",
            ExceptionKind::Timeout => "System.TimeoutException",
        }
    }

    pub fn default_message(self) -> &'static str {
        match self {
            ExceptionKind::InvalidOperation => {
                "Operation is not valid due to the current state of the object."
            }
            ExceptionKind::ArgumentError => "Value does not fall within the expected range.",
            ExceptionKind::Timeout => "The operation has timed out.",
        }
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExceptionKind {
    type Err = CatalogError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        ExceptionKind::ALL
            .into_iter()
            .find(|kind| {
                normalized == kind.as_str() || normalized == kind.type_name().to_ascii_lowercase()
            })
            .or(match normalized.as_str() {
                "invalidoperation" | "invalid_operation" => Some(ExceptionKind::InvalidOperation),
                "argumenterror" | "argument_error" | "argument-error" => {
                    Some(ExceptionKind::ArgumentError)
                }
                _ => None,
            })
            .ok_or_else(|| CatalogError::UnknownKind(raw.to_string()))
    }
}

/// One captured failure: kind, message and the frames recorded while it
/// propagated, throw site first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionContext {
    kind: ExceptionKind,
    message: String,
    stack_frames: Vec<String>,
    source: String,
}

impl ExceptionContext {
    pub fn kind(&self) -> ExceptionKind {
        self.kind
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn stack_frames(&self) -> &[String] {
        &self.stack_frames
    }

    /// Deepest frame, where the failure was raised.
    pub fn throw_site(&self) -> &str {
        self.stack_frames
            .first()
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Frames of the nested call chain, innermost first.
    pub fn chain_frames(&self) -> &[String] {
        self.stack_frames.get(1..).unwrap_or_default()
    }

    pub fn stack_text(&self) -> String {
        self.stack_frames.join("\n")
    }

    /// `Type: message` followed by the stack, the shape consumers expect in
    /// the stack-trace header.
    pub fn full_text(&self) -> String {
        format!(
            "{}: {}\n{}",
            self.type_name(),
            self.message,
            self.stack_text()
        )
    }
}

#[derive(Debug)]
struct SyntheticFailure {
    kind: ExceptionKind,
    frames: Vec<String>,
}

impl SyntheticFailure {
    fn raise(kind: ExceptionKind, site: String) -> Self {
        Self {
            kind,
            frames: vec![site],
        }
    }

    fn unwound(mut self, frame: String) -> Self {
        self.frames.push(frame);
        self
    }
}

type Raised = Result<Infallible, SyntheticFailure>;

/// Frame for the enclosing function, named from the function item itself.
macro_rules! frame {
    ($function:ident) => {
        format!(
            "   at {}() in {}:line {}",
            std::any::type_name_of_val(&$function),
            file!(),
            line!()
        )
    };
}

/// Raises `kind` through the call chain and captures the resulting context.
pub fn build(kind: ExceptionKind) -> ExceptionContext {
    let failure = match level1(kind) {
        Ok(never) => match never {},
        Err(failure) => failure,
    };
    ExceptionContext {
        kind: failure.kind,
        message: failure.kind.default_message().to_string(),
        stack_frames: failure.frames,
        source: env!("CARGO_PKG_NAME").to_string(),
    }
}

#[inline(never)]
fn level1(kind: ExceptionKind) -> Raised {
    level2(kind).map_err(|f| f.unwound(frame!(level1)))
}

#[inline(never)]
fn level2(kind: ExceptionKind) -> Raised {
    level3(kind).map_err(|f| f.unwound(frame!(level2)))
}

#[inline(never)]
fn level3(kind: ExceptionKind) -> Raised {
    level4(kind).map_err(|f| f.unwound(frame!(level3)))
}

#[inline(never)]
fn level4(kind: ExceptionKind) -> Raised {
    level5(kind).map_err(|f| f.unwound(frame!(level4)))
}

#[inline(never)]
fn level5(kind: ExceptionKind) -> Raised {
    level6(kind).map_err(|f| f.unwound(frame!(level5)))
}

#[inline(never)]
fn level6(kind: ExceptionKind) -> Raised {
    match kind {
        ExceptionKind::InvalidOperation => throw_invalid_operation(),
        ExceptionKind::ArgumentError => throw_argument(),
        ExceptionKind::Timeout => throw_timeout(),
    }
    .map_err(|f| f.unwound(frame!(level6)))
}

#[inline(never)]
fn throw_invalid_operation() -> Raised {
    Err(SyntheticFailure::raise(
        ExceptionKind::InvalidOperation,
        frame!(throw_invalid_operation),
    ))
}

#[inline(never)]
fn throw_argument() -> Raised {
    Err(SyntheticFailure::raise(
        ExceptionKind::ArgumentError,
        frame!(throw_argument),
    ))
}

#[inline(never)]
fn throw_timeout() -> Raised {
    Err(SyntheticFailure::raise(
        ExceptionKind::Timeout,
        frame!(throw_timeout),
    ))
}

/// Contexts built once per kind and selected round-robin by message ordinal.
#[derive(Debug, Clone)]
pub struct ExceptionCatalog {
    contexts: Vec<Arc<ExceptionContext>>,
}

impl ExceptionCatalog {
    /// All three kinds in [`ExceptionKind::ALL`] order.
    pub fn standard() -> Self {
        Self {
            contexts: ExceptionKind::ALL
                .into_iter()
                .map(|kind| Arc::new(build(kind)))
                .collect(),
        }
    }

    pub fn new(kinds: &[ExceptionKind]) -> Result<Self, CatalogError> {
        Self::with_factory(kinds, build)
    }

    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, CatalogError> {
        let kinds = names
            .iter()
            .map(|name| name.as_ref().parse())
            .collect::<Result<Vec<ExceptionKind>, _>>()?;
        Self::new(&kinds)
    }

    /// Builds the catalog with a custom factory. The factory runs at most once
    /// per distinct kind; repeated kinds share the cached context.
    pub fn with_factory<F>(kinds: &[ExceptionKind], mut factory: F) -> Result<Self, CatalogError>
    where
        F: FnMut(ExceptionKind) -> ExceptionContext,
    {
        if kinds.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut cache: BTreeMap<ExceptionKind, Arc<ExceptionContext>> = BTreeMap::new();
        let contexts = kinds
            .iter()
            .map(|kind| {
                cache
                    .entry(*kind)
                    .or_insert_with(|| Arc::new(factory(*kind)))
                    .clone()
            })
            .collect();
        Ok(Self { contexts })
    }

    pub fn select(&self, ordinal: u64) -> &Arc<ExceptionContext> {
        let index = (ordinal % self.contexts.len() as u64) as usize;
        &self.contexts[index]
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn kinds(&self) -> Vec<ExceptionKind> {
        self.contexts.iter().map(|ctx| ctx.kind()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_stack_ends_at_throw_site() {
        let ctx = build(ExceptionKind::Timeout);
        assert_eq!(ctx.kind(), ExceptionKind::Timeout);
        assert!(ctx.throw_site().contains("throw_timeout()"));
        assert_eq!(ctx.chain_frames().len(), CHAIN_DEPTH);
        assert_eq!(ctx.stack_frames().len(), CHAIN_DEPTH + 1);

        let expected = ["level6", "level5", "level4", "level3", "level2", "level1"];
        for (frame, level) in ctx.chain_frames().iter().zip(expected) {
            assert!(frame.contains(&format!("::{level}()")), "{frame}");
            assert!(frame.starts_with("   at datagen_core::exceptions::"));
        }
    }

    #[test]
    fn frames_name_the_functions_that_ran() {
        use std::any::type_name_of_val;

        let ctx = build(ExceptionKind::Timeout);
        let expected = [
            type_name_of_val(&throw_timeout),
            type_name_of_val(&level6),
            type_name_of_val(&level5),
            type_name_of_val(&level4),
            type_name_of_val(&level3),
            type_name_of_val(&level2),
            type_name_of_val(&level1),
        ];
        assert_eq!(ctx.stack_frames().len(), expected.len());
        for (frame, symbol) in ctx.stack_frames().iter().zip(expected) {
            assert!(
                frame.starts_with(&format!("   at {symbol}() in ")),
                "{frame} does not name {symbol}"
            );
            assert!(frame.contains("exceptions.rs:line "), "{frame}");
        }

        let argument = build(ExceptionKind::ArgumentError);
        assert!(
            argument
                .throw_site()
                .starts_with(&format!("   at {}()", type_name_of_val(&throw_argument)))
        );
    }

    #[test]
    fn each_kind_has_its_own_type_and_site() {
        let invalid = build(ExceptionKind::InvalidOperation);
        let argument = build(ExceptionKind::ArgumentError);
        assert_eq!(invalid.type_name(), "System.InvalidOperationException");
        assert_eq!(argument.type_name(), "System.ArgumentException");
        assert!(invalid.throw_site().contains("throw_invalid_operation()"));
        assert!(argument.throw_site().contains("throw_argument()"));
        assert_eq!(invalid.chain_frames(), argument.chain_frames());
        assert_eq!(argument.source(), "datagen-core");
    }

    #[test]
    fn builds_are_identical_per_kind() {
        assert_eq!(
            build(ExceptionKind::Timeout),
            build(ExceptionKind::Timeout)
        );
    }

    #[test]
    fn full_text_leads_with_type_and_message() {
        let ctx = build(ExceptionKind::Timeout);
        let text = ctx.full_text();
        assert!(text.starts_with("System.TimeoutException: The operation has timed out.\n   at "));
        assert_eq!(text.lines().count(), CHAIN_DEPTH + 2);
    }

    #[test]
    fn parses_kind_names() {
        assert_eq!(
            "timeout".parse::<ExceptionKind>().unwrap(),
            ExceptionKind::Timeout
        );
        assert_eq!(
            "System.ArgumentException".parse::<ExceptionKind>().unwrap(),
            ExceptionKind::ArgumentError
        );
        assert_eq!(
            " Invalid-Operation ".parse::<ExceptionKind>().unwrap(),
            ExceptionKind::InvalidOperation
        );
        assert_eq!(
            "nullref".parse::<ExceptionKind>().unwrap_err(),
            CatalogError::UnknownKind("nullref".into())
        );
    }

    #[test]
    fn catalog_round_robins_in_order() {
        let catalog = ExceptionCatalog::standard();
        let picked: Vec<_> = (0..6).map(|i| catalog.select(i).kind()).collect();
        assert_eq!(
            picked,
            vec![
                ExceptionKind::InvalidOperation,
                ExceptionKind::ArgumentError,
                ExceptionKind::Timeout,
                ExceptionKind::InvalidOperation,
                ExceptionKind::ArgumentError,
                ExceptionKind::Timeout,
            ]
        );
        assert!(Arc::ptr_eq(catalog.select(0), catalog.select(3)));
    }

    #[test]
    fn factory_runs_once_per_kind() {
        let mut calls = Vec::new();
        let catalog = ExceptionCatalog::with_factory(
            &[
                ExceptionKind::Timeout,
                ExceptionKind::Timeout,
                ExceptionKind::ArgumentError,
            ],
            |kind| {
                calls.push(kind);
                build(kind)
            },
        )
        .unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(
            calls,
            vec![ExceptionKind::Timeout, ExceptionKind::ArgumentError]
        );
        assert!(Arc::ptr_eq(catalog.select(0), catalog.select(1)));
    }

    #[test]
    fn catalog_rejects_unknown_or_empty() {
        assert_eq!(
            ExceptionCatalog::from_names(&["timeout", "segfault"]).unwrap_err(),
            CatalogError::UnknownKind("segfault".into())
        );
        assert_eq!(
            ExceptionCatalog::new(&[]).unwrap_err(),
            CatalogError::Empty
        );
    }
}
