//! Injection points: strategies that select instructions inside a target
//! method.
//!
//! A leaf point carries an [`AtCode`] naming the scan strategy plus its
//! parameters; composites combine leaf results as sets. Resolvers are
//! stateless and may be reused across any number of methods.

mod resolvers;

use std::collections::HashMap;

use weave_tree::{InsnId, Opcode};

use crate::selector::MemberSelector;
use crate::target::Target;

/// Scan strategy shortcut codes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display, strum::EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AtCode {
    /// First real instruction of the body.
    Head,
    /// Last matching return.
    Tail,
    /// Every matching return.
    Return,
    /// Matching method invocations.
    Invoke,
    /// Matching invocations preceded by a string constant.
    #[strum(serialize = "INVOKE_STRING")]
    InvokeString,
    /// Matching `new` allocations.
    New,
    /// Matching field accesses.
    Field,
    /// Matching conditional jumps.
    Jump,
}

/// Post-resolution node displacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shift {
    /// No displacement.
    #[default]
    None,
    /// One instruction earlier.
    Before,
    /// One instruction later.
    After,
    /// An explicit displacement.
    By(isize),
}

impl Shift {
    /// The displacement in instruction positions.
    pub fn offset(self) -> isize {
        match self {
            Shift::None => 0,
            Shift::Before => -1,
            Shift::After => 1,
            Shift::By(offset) => offset,
        }
    }
}

/// A leaf injection point: one scan strategy with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AtPoint {
    /// The scan strategy.
    pub code: AtCode,
    /// Member selector for strategies that match members.
    pub selector: Option<MemberSelector>,
    /// Pick only the nth match; `None` collects all.
    pub ordinal: Option<usize>,
    /// Restrict matches to one opcode.
    pub opcode: Option<Opcode>,
    /// Free-form named arguments (e.g. `ldc` for `INVOKE_STRING`).
    pub args: HashMap<String, String>,
    /// Author-facing identifier for diagnostics.
    pub id: Option<String>,
    /// Name of the slice restricting the scan range.
    pub slice: Option<String>,
    /// Node displacement applied after the scan.
    pub shift: Shift,
}

impl AtPoint {
    /// A bare point with the given code and no parameters.
    pub fn of(code: AtCode) -> Self {
        Self {
            code,
            selector: None,
            ordinal: None,
            opcode: None,
            args: HashMap::new(),
            id: None,
            slice: None,
            shift: Shift::None,
        }
    }

    /// Attach a target selector, builder-style.
    pub fn with_selector(mut self, selector: MemberSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Attach an ordinal, builder-style.
    pub fn with_ordinal(mut self, ordinal: usize) -> Self {
        self.ordinal = Some(ordinal);
        self
    }

    /// Attach a shift, builder-style.
    pub fn with_shift(mut self, shift: Shift) -> Self {
        self.shift = shift;
        self
    }
}

/// Failure while resolving an injection point. Display-only: the injector
/// layer folds it into its own error with the handler context attached.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum PointError {
    /// `TAIL` requires at least one matching return.
    #[display(fmt = "TAIL found no matching return opcode")]
    NoReturn,
    /// The point names a slice the injector does not declare.
    #[display(fmt = "unknown slice {_0:?}")]
    UnknownSlice(String),
    /// The selector's quantifier rejected the total match count.
    #[display(fmt = "selector matched {count} instruction(s), outside quantifier bounds")]
    QuantifierBounds {
        /// Observed match count.
        count: usize,
    },
    /// The strategy requires a selector and none was given.
    #[display(fmt = "injection point {_0} requires a target selector")]
    MissingSelector(AtCode),
}

/// A named instruction sub-range restricting a resolver's scan.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Slice {
    /// Slice identifier; the empty string is the anonymous default slice.
    pub id: String,
    /// Range start, inclusive; method head when absent.
    pub from: Option<InjectionPoint>,
    /// Range end, inclusive; method end when absent.
    pub to: Option<InjectionPoint>,
}

impl Slice {
    /// Resolve this slice to a `[from, to]` index range over the target's
    /// instruction list.
    pub fn resolve_range(&self, target: &Target) -> Result<(usize, usize), PointError> {
        let full = (0, target.method.instructions.len().saturating_sub(1));
        let no_slices = HashMap::new();

        let from = match &self.from {
            Some(point) => point
                .find_in_range(target, full, &no_slices)?
                .first()
                .and_then(|id| target.method.instructions.index_of(*id))
                .unwrap_or(0),
            None => 0,
        };
        let to = match &self.to {
            Some(point) => point
                .find_in_range(target, full, &no_slices)?
                .last()
                .and_then(|id| target.method.instructions.index_of(*id))
                .unwrap_or(full.1),
            None => full.1,
        };
        Ok((from, to.max(from)))
    }
}

/// An injection point: a leaf strategy or a composite over other points.
#[derive(Debug, Clone, PartialEq)]
pub enum InjectionPoint {
    /// A leaf strategy.
    At(AtPoint),
    /// Order-preserving set union of the component results.
    Union(Vec<InjectionPoint>),
    /// Nodes present in every component's result.
    Intersection(Vec<InjectionPoint>),
    /// The inner result displaced by a fixed offset.
    Shift(Box<InjectionPoint>, isize),
}

impl InjectionPoint {
    /// Shorthand for a bare leaf point.
    pub fn of(code: AtCode) -> Self {
        InjectionPoint::At(AtPoint::of(code))
    }

    /// Resolve this point against a target method.
    pub fn find(
        &self,
        target: &Target,
        slices: &HashMap<String, Slice>,
    ) -> Result<Vec<InsnId>, PointError> {
        let full = (0, target.method.instructions.len().saturating_sub(1));
        self.find_in_range(target, full, slices)
    }

    fn find_in_range(
        &self,
        target: &Target,
        range: (usize, usize),
        slices: &HashMap<String, Slice>,
    ) -> Result<Vec<InsnId>, PointError> {
        match self {
            InjectionPoint::At(point) => {
                let range = match &point.slice {
                    Some(name) => slices
                        .get(name)
                        .ok_or_else(|| PointError::UnknownSlice(name.clone()))?
                        .resolve_range(target)?,
                    None => range,
                };
                let nodes = resolvers::find(point, target, range)?;
                Ok(apply_shift(target, nodes, point.shift.offset()))
            }
            InjectionPoint::Union(points) => {
                let mut nodes = Vec::new();
                for point in points {
                    for id in point.find_in_range(target, range, slices)? {
                        if !nodes.contains(&id) {
                            nodes.push(id);
                        }
                    }
                }
                Ok(nodes)
            }
            InjectionPoint::Intersection(points) => {
                let mut iter = points.iter();
                let mut nodes = match iter.next() {
                    Some(point) => point.find_in_range(target, range, slices)?,
                    None => return Ok(Vec::new()),
                };
                for point in iter {
                    let other = point.find_in_range(target, range, slices)?;
                    nodes.retain(|id| other.contains(id));
                }
                Ok(nodes)
            }
            InjectionPoint::Shift(inner, offset) => {
                let nodes = inner.find_in_range(target, range, slices)?;
                Ok(apply_shift(target, nodes, *offset))
            }
        }
    }
}

/// Displace each node by `offset` positions; nodes that fall outside the
/// method are dropped.
fn apply_shift(target: &Target, nodes: Vec<InsnId>, offset: isize) -> Vec<InsnId> {
    if offset == 0 {
        return nodes;
    }
    nodes
        .into_iter()
        .filter_map(|id| target.method.instructions.offset_from(id, offset))
        .collect()
}
