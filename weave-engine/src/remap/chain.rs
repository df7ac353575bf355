//! Composition of name/descriptor remappers.

/// One obfuscation-mapping provider. Every operation defaults to the
/// identity; returning the input unchanged means "no mapping here".
pub trait Remapper {
    /// Map a class internal name.
    fn map_type(&self, name: &str) -> String {
        name.into()
    }

    /// Reverse-map a class internal name.
    fn unmap_type(&self, name: &str) -> String {
        name.into()
    }

    /// Map a field name.
    fn map_field(&self, owner: &str, name: &str, desc: &str) -> String {
        let _ = (owner, desc);
        name.into()
    }

    /// Map a method name.
    fn map_method(&self, owner: &str, name: &str, desc: &str) -> String {
        let _ = (owner, desc);
        name.into()
    }

    /// Map every class name inside a descriptor.
    fn map_desc(&self, desc: &str) -> String {
        desc.into()
    }

    /// Reverse-map every class name inside a descriptor.
    fn unmap_desc(&self, desc: &str) -> String {
        desc.into()
    }
}

/// An ordered chain of remappers.
///
/// Each operation walks the chain in registration order; an element whose
/// answer differs from its input "wins", and iteration continues with the
/// winning value so that stacked mappings compose.
#[derive(Default)]
pub struct RemapperChain {
    remappers: Vec<Box<dyn Remapper>>,
}

impl core::fmt::Debug for RemapperChain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RemapperChain")
            .field("len", &self.remappers.len())
            .finish()
    }
}

impl RemapperChain {
    /// An empty chain; every operation is the identity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a remapper to the end of the chain.
    pub fn add(&mut self, remapper: Box<dyn Remapper>) -> &mut Self {
        self.remappers.push(remapper);
        self
    }

    /// Number of registered remappers.
    pub fn len(&self) -> usize {
        self.remappers.len()
    }

    /// `true` when no remappers are registered.
    pub fn is_empty(&self) -> bool {
        self.remappers.is_empty()
    }

    fn fold(&self, input: &str, op: impl Fn(&dyn Remapper, &str) -> String) -> String {
        let mut current = input.to_string();
        for remapper in &self.remappers {
            let mapped = op(remapper.as_ref(), &current);
            if mapped != current {
                current = mapped;
            }
        }
        current
    }

    /// Map a class internal name through the chain.
    pub fn map_type(&self, name: &str) -> String {
        self.fold(name, |r, n| r.map_type(n))
    }

    /// Reverse-map a class internal name through the chain.
    pub fn unmap_type(&self, name: &str) -> String {
        self.fold(name, |r, n| r.unmap_type(n))
    }

    /// Map a field name through the chain.
    pub fn map_field(&self, owner: &str, name: &str, desc: &str) -> String {
        self.fold(name, |r, n| r.map_field(owner, n, desc))
    }

    /// Map a method name through the chain.
    pub fn map_method(&self, owner: &str, name: &str, desc: &str) -> String {
        self.fold(name, |r, n| r.map_method(owner, n, desc))
    }

    /// Map a descriptor through the chain.
    pub fn map_desc(&self, desc: &str) -> String {
        self.fold(desc, |r, d| r.map_desc(d))
    }

    /// Reverse-map a descriptor through the chain.
    pub fn unmap_desc(&self, desc: &str) -> String {
        self.fold(desc, |r, d| r.unmap_desc(d))
    }
}
