//! Member selectors: textual references to methods, fields and call sites.
//!
//! A selector has the shape `[Lowner;|owner.][name][quantifier][(desc)|:desc]
//! [->tail]`, every part optional. Parsing is lenient; [`MemberSelector::validate`]
//! reports the first malformed component with its original input attached.

use core::fmt;

use weave_tree::Insn;
use weave_types::{JavaType, MethodDescriptor};

/// Which promotion a defaulted quantifier receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectContext {
    /// Selecting declared members: default promotes to exactly one.
    Member,
    /// Selecting instructions: default promotes to any count.
    Instruction,
}

/// Match-count bounds attached to a selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quantifier {
    /// No quantifier written; promotion depends on [`SelectContext`].
    #[default]
    Default,
    /// Explicit `{min, max}` bounds; `*` is `{0,}`, `+` is `{1,}`.
    Bounded {
        /// Minimum match count.
        min: usize,
        /// Maximum match count, unbounded when `None`.
        max: Option<usize>,
    },
}

impl Quantifier {
    /// The `*` quantifier.
    pub const ANY: Quantifier = Quantifier::Bounded { min: 0, max: None };

    /// Lower bound after context promotion.
    pub fn min(&self, context: SelectContext) -> usize {
        match self {
            Quantifier::Default => match context {
                SelectContext::Member => 1,
                SelectContext::Instruction => 0,
            },
            Quantifier::Bounded { min, .. } => *min,
        }
    }

    /// Upper bound after context promotion, `None` for unbounded.
    pub fn max(&self, context: SelectContext) -> Option<usize> {
        match self {
            Quantifier::Default => match context {
                SelectContext::Member => Some(1),
                SelectContext::Instruction => None,
            },
            Quantifier::Bounded { max, .. } => *max,
        }
    }

    /// `true` when `count` sits inside the (promoted) bounds.
    pub fn accepts(&self, count: usize, context: SelectContext) -> bool {
        count >= self.min(context)
            && self.max(context).map_or(true, |max| count <= max)
    }
}

impl fmt::Display for Quantifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantifier::Default => Ok(()),
            Quantifier::Bounded { min: 0, max: None } => write!(f, "*"),
            Quantifier::Bounded { min: 1, max: None } => write!(f, "+"),
            Quantifier::Bounded {
                min,
                max: Some(max),
            } if min == max => write!(f, "{{{min}}}"),
            Quantifier::Bounded { min, max: None } => write!(f, "{{{min},}}"),
            Quantifier::Bounded {
                min: 0,
                max: Some(max),
            } => write!(f, "{{,{max}}}"),
            Quantifier::Bounded {
                min,
                max: Some(max),
            } => write!(f, "{{{min},{max}}}"),
        }
    }
}

/// Result of matching a selector against a concrete member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchResult {
    /// At least one present component disagrees.
    None,
    /// All present components agree ignoring ASCII case.
    CaseInsensitive,
    /// All present components agree exactly.
    Exact,
}

impl MatchResult {
    /// `true` for any non-`None` result.
    pub fn is_match(self) -> bool {
        self != MatchResult::None
    }
}

/// A selector component failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    /// The owner part contains illegal characters.
    #[error("invalid owner {owner:?} in selector {input:?}")]
    InvalidOwner {
        /// Original selector text.
        input: String,
        /// The offending owner.
        owner: String,
    },
    /// The name part contains illegal characters.
    #[error("invalid name {name:?} in selector {input:?}")]
    InvalidName {
        /// Original selector text.
        input: String,
        /// The offending name.
        name: String,
    },
    /// The descriptor part is not a valid type or method descriptor.
    #[error("invalid descriptor {desc:?} in selector {input:?}")]
    InvalidDescriptor {
        /// Original selector text.
        input: String,
        /// The offending descriptor.
        desc: String,
    },
    /// The quantifier failed to parse.
    #[error("invalid quantifier in selector {input:?}")]
    InvalidQuantifier {
        /// Original selector text.
        input: String,
    },
}

/// An immutable reference to a member or call site, with match-count
/// bounds. Absent components match anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSelector {
    owner: Option<String>,
    name: Option<String>,
    desc: Option<String>,
    quantifier: Quantifier,
    quantifier_err: bool,
    tail: Option<Box<MemberSelector>>,
    input: String,
}

impl MemberSelector {
    /// Build a selector from explicit components.
    pub fn new(
        owner: Option<&str>,
        name: Option<&str>,
        desc: Option<&str>,
    ) -> Self {
        Self {
            owner: owner.map(Into::into),
            name: name.map(Into::into),
            desc: desc.map(Into::into),
            quantifier: Quantifier::Default,
            quantifier_err: false,
            tail: None,
            input: String::new(),
        }
    }

    /// Parse a textual selector. Structural problems are retained and
    /// reported by [`validate`](Self::validate) rather than failing here.
    pub fn parse(input: &str) -> Self {
        let stripped: String = input.chars().filter(|c| !c.is_whitespace()).collect();
        let mut selector = Self::parse_stripped(&stripped);
        selector.input = input.into();
        selector
    }

    fn parse_stripped(text: &str) -> Self {
        let (head, tail) = match text.find("->") {
            Some(pos) => (
                &text[..pos],
                Some(Box::new(Self::parse_stripped(&text[pos + 2..]))),
            ),
            None => (text, None),
        };

        // Descriptor: either parenthesised method form or `:desc`.
        let (before, desc) = if let Some(paren) = head.find('(') {
            (&head[..paren], Some(head[paren..].to_string()))
        } else if let Some(colon) = head.find(':') {
            (&head[..colon], Some(head[colon + 1..].to_string()))
        } else {
            (head, None)
        };

        // Owner: explicit `L...;` form, else dotted prefix.
        let (owner, rest) = if let Some(semi) = before.strip_prefix('L').and_then(|r| {
            r.find(';').map(|semi| (r[..semi].to_string(), &r[semi + 1..]))
        }) {
            let (owner, rest) = semi;
            (Some(owner.replace('.', "/")), rest)
        } else if let Some(dot) = before.rfind('.') {
            (
                Some(before[..dot].replace('.', "/")),
                &before[dot + 1..],
            )
        } else {
            (None, before)
        };

        let (name_part, quantifier, quantifier_err) = Self::split_quantifier(rest);
        let name = match name_part {
            "" => None,
            name => Some(name.to_string()),
        };

        Self {
            owner,
            name,
            desc,
            quantifier,
            quantifier_err,
            tail,
            input: text.into(),
        }
    }

    fn split_quantifier(rest: &str) -> (&str, Quantifier, bool) {
        if let Some(name) = rest.strip_suffix('*') {
            return (name, Quantifier::ANY, false);
        }
        if let Some(name) = rest.strip_suffix('+') {
            return (name, Quantifier::Bounded { min: 1, max: None }, false);
        }
        if rest.ends_with('}') {
            if let Some(brace) = rest.rfind('{') {
                let body = &rest[brace + 1..rest.len() - 1];
                let name = &rest[..brace];
                return match Self::parse_range(body) {
                    Some(quantifier) => (name, quantifier, false),
                    None => (name, Quantifier::Default, true),
                };
            }
            return (rest, Quantifier::Default, true);
        }
        (rest, Quantifier::Default, false)
    }

    fn parse_range(body: &str) -> Option<Quantifier> {
        match body.split_once(',') {
            None => {
                let n = body.parse().ok()?;
                Some(Quantifier::Bounded {
                    min: n,
                    max: Some(n),
                })
            }
            Some((min, "")) => Some(Quantifier::Bounded {
                min: min.parse().ok()?,
                max: None,
            }),
            Some(("", max)) => Some(Quantifier::Bounded {
                min: 0,
                max: Some(max.parse().ok()?),
            }),
            Some((min, max)) => {
                let min = min.parse().ok()?;
                let max = max.parse().ok()?;
                (min <= max).then_some(Quantifier::Bounded {
                    min,
                    max: Some(max),
                })
            }
        }
    }

    /// The owner component, internal form.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// The name component.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The descriptor component.
    pub fn desc(&self) -> Option<&str> {
        self.desc.as_deref()
    }

    /// The attached quantifier.
    pub fn quantifier(&self) -> Quantifier {
        self.quantifier
    }

    /// The chained selector after `->`, evaluated by the caller.
    pub fn tail(&self) -> Option<&MemberSelector> {
        self.tail.as_deref()
    }

    /// Match against a concrete member. Comparison is null-permissive in
    /// both directions: an absent selector component matches any value and
    /// an absent query component matches any selector.
    pub fn matches(
        &self,
        owner: Option<&str>,
        name: Option<&str>,
        desc: Option<&str>,
    ) -> MatchResult {
        let mut level = MatchResult::Exact;
        for (ours, theirs) in [
            (self.owner.as_deref(), owner),
            (self.name.as_deref(), name),
            (self.desc.as_deref(), desc),
        ] {
            match (ours, theirs) {
                (Some(a), Some(b)) if a == b => {}
                (Some(a), Some(b)) if a.eq_ignore_ascii_case(b) => {
                    level = MatchResult::CaseInsensitive;
                }
                (Some(_), Some(_)) => return MatchResult::None,
                _ => {}
            }
        }
        level
    }

    /// Match against a method-invocation or field-access instruction.
    pub fn matches_insn(&self, insn: &Insn) -> bool {
        match insn {
            Insn::Method {
                owner, name, desc, ..
            }
            | Insn::Field {
                owner, name, desc, ..
            } => self
                .matches(Some(owner), Some(name), Some(desc))
                .is_match(),
            Insn::InvokeDynamic { name, desc } => {
                self.matches(None, Some(name), Some(desc)).is_match()
            }
            _ => false,
        }
    }

    /// Sanity-check every component, reporting the first failure.
    pub fn validate(&self) -> Result<(), SelectorError> {
        if self.quantifier_err {
            return Err(SelectorError::InvalidQuantifier {
                input: self.input.clone(),
            });
        }
        if let Some(owner) = &self.owner {
            let ok = !owner.is_empty()
                && owner
                    .chars()
                    .all(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '/'));
            if !ok {
                return Err(SelectorError::InvalidOwner {
                    input: self.input.clone(),
                    owner: owner.clone(),
                });
            }
        }
        if let Some(name) = &self.name {
            let bare = name
                .strip_prefix('<')
                .and_then(|n| n.strip_suffix('>'))
                .unwrap_or(name);
            let ok = !bare.is_empty()
                && bare
                    .chars()
                    .all(|c| c.is_alphanumeric() || matches!(c, '_' | '$'));
            if !ok {
                return Err(SelectorError::InvalidName {
                    input: self.input.clone(),
                    name: name.clone(),
                });
            }
        }
        if let Some(desc) = &self.desc {
            let ok = if desc.starts_with('(') {
                MethodDescriptor::parse(desc).is_ok()
            } else {
                JavaType::parse(desc).is_ok()
            };
            if !ok {
                return Err(SelectorError::InvalidDescriptor {
                    input: self.input.clone(),
                    desc: desc.clone(),
                });
            }
        }
        if let Some(tail) = &self.tail {
            tail.validate()?;
        }
        Ok(())
    }

    /// Copy of this selector with a different owner.
    pub fn with_owner(&self, owner: Option<&str>) -> Self {
        Self {
            owner: owner.map(Into::into),
            ..self.clone()
        }
    }

    /// Copy of this selector with a different descriptor.
    pub fn with_desc(&self, desc: Option<&str>) -> Self {
        Self {
            desc: desc.map(Into::into),
            ..self.clone()
        }
    }

    /// Copy of this selector with the name remapped, optionally moving the
    /// owner at the same time.
    pub fn remapped(&self, name: &str, owner: Option<&str>) -> Self {
        Self {
            name: Some(name.into()),
            owner: owner.map(Into::into).or_else(|| self.owner.clone()),
            ..self.clone()
        }
    }
}

impl fmt::Display for MemberSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(owner) = &self.owner {
            write!(f, "L{owner};")?;
        }
        if let Some(name) = &self.name {
            f.write_str(name)?;
        }
        write!(f, "{}", self.quantifier)?;
        if let Some(desc) = &self.desc {
            if desc.starts_with('(') {
                f.write_str(desc)?;
            } else {
                write!(f, ":{desc}")?;
            }
        }
        if let Some(tail) = &self.tail {
            write!(f, "->{tail}")?;
        }
        Ok(())
    }
}
