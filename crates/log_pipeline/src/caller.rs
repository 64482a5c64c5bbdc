//! Locating the code that called into the logger.
//!
//! The resolver walks the current stack and skips every frame whose source file belongs to this
//! crate or to the runtimes it calls through (`tracing`, the stack walker itself, the standard
//! library). The first remaining frame is the caller. Frames are identified by instruction
//! address, so a stack trace can later be rebuilt starting exactly at the caller no matter how
//! many library frames lie between.

use std::{fmt, path::Path};

use crate::attr::{Attr, Value};

/// Rendered in place of a stack trace when no caller frame could be resolved.
pub const STACK_UNAVAILABLE: &str =
    "stack trace not available, caller frame could not be resolved";

const MAX_STACK_FRAMES: usize = 32;

const ANCHOR_IP: &str = "ip";
const ANCHOR_SYMBOL: &str = "symbol";

/// Path fragments of sources that never count as the caller, besides this crate's own `src/`.
const RUNTIME_FRAGMENTS: [&str; 5] = [
    "/backtrace-0.",
    "/tracing-core-",
    "/tracing-subscriber-",
    "/tracing-0.",
    "/rustc/",
];

/// Whether `path` belongs to the logging library or a runtime it calls through.
///
/// Matches this crate's `src/` directory in both workspace and registry layouts. Files under
/// `tests/` are not library frames.
pub fn is_library_frame(path: &str) -> bool {
    let own_sources = concat!(env!("CARGO_PKG_NAME"), "/src/");
    let registry_sources = concat!(
        "/",
        env!("CARGO_PKG_NAME"),
        "-",
        env!("CARGO_PKG_VERSION"),
        "/src/"
    );
    path.starts_with(own_sources)
        || path.contains(&format!("/{own_sources}"))
        || path.contains(registry_sources)
        || RUNTIME_FRAGMENTS
            .iter()
            .any(|fragment| path.contains(fragment))
}

/// Identifies one symbol of one stack frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameAnchor {
    ip: usize,
    symbol: usize,
}

impl FrameAnchor {
    pub(crate) fn to_value(self) -> Value {
        Value::Group(vec![
            Attr::new(ANCHOR_IP, self.ip),
            Attr::new(ANCHOR_SYMBOL, self.symbol),
        ])
    }

    pub(crate) fn from_value(value: &Value) -> Option<Self> {
        let Value::Group(attrs) = value else {
            return None;
        };
        let field = |key: &str| {
            attrs.iter().find_map(|attr| match attr.value() {
                Value::Uint(value) if attr.key() == key => usize::try_from(*value).ok(),
                _ => None,
            })
        };
        Some(Self {
            ip: field(ANCHOR_IP)?,
            symbol: field(ANCHOR_SYMBOL)?,
        })
    }
}

/// The resolved caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    file: String,
    line: u32,
    anchor: FrameAnchor,
}

impl Caller {
    /// Source file of the caller.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Source line of the caller.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Where a stack trace starting at the caller begins.
    pub fn anchor(&self) -> FrameAnchor {
        self.anchor
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// A formatted stack trace, or the knowledge that none could be built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StackTrace {
    /// One `"function\n\tfile:line\n"` entry per frame, innermost first.
    Frames(Vec<String>),
    /// No caller frame was found.
    Unavailable,
}

impl StackTrace {
    /// The trace as a single string.
    pub fn render(&self) -> String {
        match self {
            Self::Frames(frames) => frames.concat(),
            Self::Unavailable => STACK_UNAVAILABLE.to_string(),
        }
    }

    /// The individual frames; the placeholder is the only entry of an unavailable trace.
    pub fn into_frames(self) -> Vec<String> {
        match self {
            Self::Frames(frames) => frames,
            Self::Unavailable => vec![STACK_UNAVAILABLE.to_string()],
        }
    }
}

/// Walks the stack to find the caller of the logger.
#[derive(Clone, Copy)]
pub struct CallerResolver {
    skip: fn(&str) -> bool,
}

impl fmt::Debug for CallerResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerResolver").finish_non_exhaustive()
    }
}

impl Default for CallerResolver {
    fn default() -> Self {
        Self {
            skip: is_library_frame,
        }
    }
}

fn normalize(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

impl CallerResolver {
    /// Creates a resolver skipping every frame whose file path satisfies `skip`.
    ///
    /// Paths use `/` as separator on every platform.
    pub fn with_skip(skip: fn(&str) -> bool) -> Self {
        Self { skip }
    }

    /// Finds the first frame outside the library.
    pub fn locate(&self) -> Option<Caller> {
        let mut caller = None;
        backtrace::trace(|frame| {
            let ip = frame.ip().addr();
            let mut symbol = 0;
            backtrace::resolve_frame(frame, |resolved| {
                if caller.is_none() {
                    if let (Some(file), Some(line)) = (resolved.filename(), resolved.lineno()) {
                        let file = normalize(file);
                        if !(self.skip)(&file) {
                            caller = Some(Caller {
                                file,
                                line,
                                anchor: FrameAnchor { ip, symbol },
                            });
                        }
                    }
                }
                symbol += 1;
            });
            caller.is_none()
        });
        caller
    }

    /// Builds a stack trace of at most 32 entries, starting at `anchor`.
    ///
    /// Must be called while the anchored frame is still on the stack.
    pub fn stack_from(&self, anchor: FrameAnchor) -> StackTrace {
        let mut frames = Vec::new();
        let mut started = false;
        backtrace::trace(|frame| {
            let ip = frame.ip().addr();
            if !started && ip != anchor.ip {
                return true;
            }
            let mut symbol = 0;
            backtrace::resolve_frame(frame, |resolved| {
                if started || symbol >= anchor.symbol {
                    started = true;
                    if frames.len() < MAX_STACK_FRAMES {
                        let name = resolved
                            .name()
                            .map_or_else(|| "unknown".to_string(), |name| format!("{name:#}"));
                        let file = resolved.filename().map(normalize).unwrap_or_default();
                        let line = resolved.lineno().unwrap_or_default();
                        frames.push(format!("{name}\n\t{file}:{line}\n"));
                    }
                }
                symbol += 1;
            });
            frames.len() < MAX_STACK_FRAMES
        });
        if frames.is_empty() {
            StackTrace::Unavailable
        } else {
            StackTrace::Frames(frames)
        }
    }

    /// Locates the caller and builds the stack trace from it.
    pub fn capture(&self) -> StackTrace {
        self.locate()
            .map_or(StackTrace::Unavailable, |caller| self.stack_from(caller.anchor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_sources_are_skipped_but_tests_are_not() {
        assert!(is_library_frame(
            "/home/dev/repo/crates/log_pipeline/src/handler/stack.rs"
        ));
        assert!(is_library_frame(&format!(
            "/home/dev/.cargo/registry/src/index/log_pipeline-{}/src/logger.rs",
            env!("CARGO_PKG_VERSION")
        )));
        assert!(is_library_frame(
            "/rustc/0123456789abcdef/library/core/src/ops/function.rs"
        ));
        assert!(!is_library_frame(
            "/home/dev/repo/crates/log_pipeline/tests/caller.rs"
        ));
        assert!(!is_library_frame("/home/dev/repo/crates/app/src/main.rs"));
    }

    #[test]
    fn anchors_survive_the_marker_value() {
        let anchor = FrameAnchor { ip: 4096, symbol: 2 };
        assert_eq!(FrameAnchor::from_value(&anchor.to_value()), Some(anchor));
        assert_eq!(FrameAnchor::from_value(&Value::from("x")), None);
    }

    #[test]
    fn resolver_that_skips_everything_finds_nothing() {
        let resolver = CallerResolver::with_skip(|_| true);
        assert_eq!(resolver.locate(), None);
        assert_eq!(resolver.capture().render(), STACK_UNAVAILABLE);
    }
}
