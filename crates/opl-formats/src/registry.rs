//! The format registry (spec §6's identification policy): try every known
//! handler, commit to the first unambiguous `Yes`, and otherwise hand back
//! every `Maybe` so a caller (or a human) can pick.

use crate::handler::{Content, FormatHandler, Identification, Validity};

/// Outcome of running every registered handler's `identify` over one file.
pub struct IdentifyReport {
    /// The handler index that returned `Yes`, if any handler did.
    pub confirmed: Option<usize>,
    /// Every handler's verdict, in registration order — the full audit
    /// trail, not just the winner.
    pub verdicts: Vec<(usize, Identification)>,
}

/// An ordered collection of format handlers. Order matters only as a
/// tiebreaker among handlers that all return `Maybe` for the same file;
/// more structurally specific formats (a length-prefixed header) should be
/// registered before looser ones (a bare record stream).
pub struct Registry {
    handlers: Vec<Box<dyn FormatHandler>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { handlers: Vec::new() }
    }

    /// The full set of formats this crate knows, in specificity order:
    /// type-1 variants (which carry a length header) before the type-0
    /// variants they could otherwise be mistaken for.
    pub fn with_builtin_formats() -> Self {
        let mut registry = Registry::new();
        registry.register(Box::new(crate::imf::ImfType1::standard()));
        registry.register(Box::new(crate::imf::ImfType1::wolfenstein()));
        registry.register(Box::new(crate::imf::ImfType0::standard()));
        registry.register(Box::new(crate::imf::ImfType0::wolfenstein()));
        registry.register(Box::new(crate::imf::ImfType0::duke_nukem_2()));
        registry.register(Box::new(crate::dro::Dro));
        registry.register(Box::new(crate::sbi::Sbi));
        registry.register(Box::new(crate::mid::MidType1));
        registry
    }

    pub fn register(&mut self, handler: Box<dyn FormatHandler>) {
        self.handlers.push(handler);
    }

    pub fn handlers(&self) -> &[Box<dyn FormatHandler>] {
        &self.handlers
    }

    pub fn by_id(&self, id: &str) -> Option<&dyn FormatHandler> {
        self.handlers.iter().find(|h| h.metadata().id == id).map(|h| h.as_ref())
    }

    /// Run every handler's `identify` and commit to the first `Yes`
    /// encountered in registration order. If none is unambiguous, every
    /// verdict is still reported so a caller can fall back to asking the
    /// user, the way the spec's own worked example (IMF vs. Duke Nukem
    /// II) expects.
    pub fn identify(&self, content: &Content, filename: &str) -> IdentifyReport {
        let verdicts: Vec<(usize, Identification)> = self
            .handlers
            .iter()
            .enumerate()
            .map(|(i, h)| (i, h.identify(content, filename)))
            .collect();
        let confirmed = verdicts.iter().find(|(_, id)| id.valid == Validity::Yes).map(|(i, _)| *i);
        IdentifyReport { confirmed, verdicts }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::with_builtin_formats()
    }
}
