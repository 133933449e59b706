//! Pointer-path expressions
//!
//! A pointer path is the symbolic chain trainers pass around as
//! `"game.dll"+1F4680,1C,C`: an optional module anchor, then offsets that
//! are applied between pointer-sized reads. Expressions are parsed once
//! into a [`PointerPath`] and reused; resolution against a live process
//! happens in [`ProcessMemory::evaluate`](crate::process::ProcessMemory::evaluate).

mod offset;
mod parse;

pub use offset::PointerOffset;
pub use parse::PathParseError;

/// A parsed pointer-path expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerPath {
    /// Module anchor: name plus the offset added to the module base.
    /// `None` means the first entry of `offsets` is an absolute address.
    module: Option<(String, PointerOffset)>,
    offsets: Vec<PointerOffset>,
}

impl PointerPath {
    /// Parse an expression string
    pub fn parse(expression: &str) -> Result<Self, PathParseError> {
        parse::parse_expression(expression)
    }

    /// A path that is a plain absolute address
    pub fn address(address: u64) -> Self {
        Self {
            module: None,
            offsets: vec![PointerOffset::from(address)],
        }
    }

    /// A path anchored at `module` + `offset`, before any dereference
    pub fn module_offset(module: &str, offset: PointerOffset) -> Self {
        Self {
            module: Some((module.to_string(), offset)),
            offsets: Vec::new(),
        }
    }

    /// Append a dereference-then-add step
    pub fn then(mut self, offset: impl Into<PointerOffset>) -> Self {
        self.offsets.push(offset.into());
        self
    }

    /// The module anchor, if the path has one
    pub fn module(&self) -> Option<(&str, PointerOffset)> {
        self.module
            .as_ref()
            .map(|(name, offset)| (name.as_str(), *offset))
    }

    /// The pointer offsets applied after the anchor
    pub fn offsets(&self) -> &[PointerOffset] {
        &self.offsets
    }

    /// Whether any component only fits a 64-bit address space
    pub fn requires_64_bit(&self) -> bool {
        self.module
            .as_ref()
            .is_some_and(|(_, offset)| offset.is_strictly_64_bit())
            || self.offsets.iter().any(PointerOffset::is_strictly_64_bit)
    }
}

impl std::str::FromStr for PointerPath {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for PointerPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut offsets = self.offsets.iter();
        match &self.module {
            Some((name, offset)) => {
                write!(f, "\"{name}\"")?;
                if offset.magnitude() != 0 {
                    if offset.is_negative() {
                        write!(f, "{offset}")?;
                    } else {
                        write!(f, "+{offset}")?;
                    }
                }
            }
            None => {
                // The invariant guarantees a non-negative first offset
                let first = offsets.next().expect("absolute path has a first offset");
                write!(f, "{first}")?;
            }
        }
        for offset in offsets {
            write!(f, ",{offset}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_module_path() {
        let path = PointerPath::parse("\"game.dll\"+1F4684-4,18+4,C").unwrap();
        assert_eq!(path.to_string(), "\"game.dll\"+1F4680,1C,C");
    }

    #[test]
    fn test_display_absolute_path() {
        let path = PointerPath::parse("182F3593120").unwrap();
        assert_eq!(path.to_string(), "182F3593120");
    }

    #[test]
    fn test_roundtrip_reparses_identically() {
        for expr in [
            "\"game.dll\"+1F4684-4,18+4,C",
            "\"game.dll\"-10,4",
            "game.dll,8,-C",
            "182F3593120",
            "400000+8,C,10",
        ] {
            let parsed = PointerPath::parse(expr).unwrap();
            let reparsed = PointerPath::parse(&parsed.to_string()).unwrap();
            assert_eq!(parsed, reparsed, "round-trip of {expr:?}");
        }
    }

    #[test]
    fn test_builder_matches_parsed() {
        let built = PointerPath::module_offset("game.dll", PointerOffset::from(0x1F4680u64))
            .then(0x1Cu64)
            .then(0xCu64);
        let parsed = PointerPath::parse("\"game.dll\"+1F4680,1C,C").unwrap();
        assert_eq!(built, parsed);
    }

    #[test]
    fn test_requires_64_bit() {
        assert!(PointerPath::parse("182F3593120").unwrap().requires_64_bit());
        assert!(!PointerPath::parse("\"game.dll\"+4,8").unwrap().requires_64_bit());
        assert!(PointerPath::parse("\"game.dll\"+100000000,8")
            .unwrap()
            .requires_64_bit());
    }
}
