//! The global class-metadata cache and its hierarchy queries.

use std::collections::HashMap;

use tracing::warn;
use weave_tree::{ClassNode, ClassSource};
use weave_types::{JavaType, OBJECT_INTERNAL_NAME};

use crate::meta::{ClassMeta, MemberMeta, MixinMeta};

/// Whether hierarchy walks may cross into the mixin parallel hierarchy,
/// and for how long. At each step the permission decays: `Immediate`
/// allows only the first step, `Super` widens to `All` after the first
/// step, `All` stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traversal {
    /// Never look at mixins.
    None,
    /// Mixins of the starting class only.
    Immediate,
    /// Mixins of every class above the start, not the start itself.
    Super,
    /// Mixins at every step.
    All,
}

impl Traversal {
    /// The permission carried into the next hierarchy step.
    pub fn next(self) -> Self {
        match self {
            Traversal::Immediate | Traversal::None => Traversal::None,
            Traversal::Super | Traversal::All => Traversal::All,
        }
    }

    /// `true` when mixin targets may be consulted at this step.
    pub fn allows_mixins(self) -> bool {
        matches!(self, Traversal::Immediate | Traversal::All)
    }
}

/// Whether a member search includes the starting class itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    /// Search the start and everything above it.
    AllClasses,
    /// Search strictly above the start.
    SuperclassesOnly,
}

/// Member-lookup filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupFlags {
    /// Admit private members.
    pub include_private: bool,
    /// Admit static members.
    pub include_static: bool,
}

impl Default for LookupFlags {
    fn default() -> Self {
        Self {
            include_private: true,
            include_static: true,
        }
    }
}

impl LookupFlags {
    fn admits(&self, member: &MemberMeta) -> bool {
        if !self.include_private
            && member.access.visibility() == weave_types::Visibility::Private
        {
            return false;
        }
        if !self.include_static && member.is_static() {
            return false;
        }
        true
    }
}

/// The process-wide metadata cache. Entries are built lazily on first
/// lookup and never evicted; a failed load is cached as absent so the
/// provider is only consulted once per name.
#[derive(Debug, Default)]
pub struct MetaCache {
    classes: HashMap<String, Option<ClassMeta>>,
    mixins: HashMap<String, MixinMeta>,
}

impl MetaCache {
    /// A cache preloaded with the `java/lang/Object` record.
    pub fn new() -> Self {
        let mut cache = Self::default();
        cache
            .classes
            .insert(OBJECT_INTERNAL_NAME.into(), Some(ClassMeta::object()));
        cache
    }

    /// Look up a record, loading it through the provider on first miss.
    pub fn for_name(&mut self, name: &str, source: &dyn ClassSource) -> Option<&ClassMeta> {
        self.ensure(name, source);
        self.get(name)
    }

    /// Load a record if not yet cached; `true` when the class is present.
    pub fn ensure(&mut self, name: &str, source: &dyn ClassSource) -> bool {
        if !self.classes.contains_key(name) {
            let loaded = source.class_node(name).map(|node| ClassMeta::from_class_node(&node));
            if loaded.is_none() {
                warn!(class = name, "class not found, caching negative entry");
            }
            self.classes.insert(name.into(), loaded);
        }
        matches!(self.classes.get(name), Some(Some(_)))
    }

    /// Construct a record from an already-parsed tree. Idempotent: an
    /// existing record wins.
    pub fn from_class_node(&mut self, node: &ClassNode) -> &ClassMeta {
        if !matches!(self.classes.get(&node.name), Some(Some(_))) {
            let mut meta = ClassMeta::from_class_node(node);
            // Back-link mixins registered before this record existed.
            let mut linked: Vec<String> = self
                .mixins
                .values()
                .filter(|mixin| mixin.targets_class(&node.name))
                .map(|mixin| mixin.name.clone())
                .collect();
            linked.sort();
            meta.mixins = linked;
            meta.is_mixin = self.mixins.contains_key(&node.name);
            self.classes.insert(node.name.clone(), Some(meta));
        }
        self.classes
            .get(&node.name)
            .and_then(Option::as_ref)
            .expect("record just inserted")
    }

    /// The record for a value type: arrays unwrap to their element type,
    /// primitives answer nothing.
    pub fn for_type(&mut self, ty: &JavaType, source: &dyn ClassSource) -> Option<&ClassMeta> {
        match ty.element_type() {
            JavaType::Object(name) => {
                let name = name.clone();
                self.for_name(&name, source)
            }
            _ => None,
        }
    }

    /// Cached lookup without loading.
    pub fn get(&self, name: &str) -> Option<&ClassMeta> {
        self.classes.get(name).and_then(Option::as_ref)
    }

    /// Mutable cached lookup without loading.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut ClassMeta> {
        self.classes.get_mut(name).and_then(Option::as_mut)
    }

    /// Register mixin metadata and link it to every declared target.
    pub fn register_mixin(&mut self, meta: MixinMeta) {
        let mixin_name = meta.name.clone();
        let targets: Vec<String> = meta.targets().map(Into::into).collect();
        self.mixins.insert(mixin_name.clone(), meta);

        if let Some(record) = self.get_mut(&mixin_name) {
            record.is_mixin = true;
        }
        for target in targets {
            if let Some(record) = self.get_mut(&target) {
                if !record.mixins.contains(&mixin_name) {
                    record.mixins.push(mixin_name.clone());
                }
            }
        }
    }

    /// Metadata for a registered mixin class.
    pub fn mixin(&self, name: &str) -> Option<&MixinMeta> {
        self.mixins.get(name)
    }

    /// All registered mixins targeting `target`, unordered.
    pub fn mixins_for(&self, target: &str) -> Vec<&MixinMeta> {
        self.mixins
            .values()
            .filter(|meta| meta.targets_class(target))
            .collect()
    }

    /// `true` when `super_name` appears in the hierarchy above `name`.
    pub fn has_super(
        &mut self,
        name: &str,
        super_name: &str,
        traversal: Traversal,
        source: &dyn ClassSource,
    ) -> bool {
        self.find_super(name, super_name, traversal, true, source)
            .is_some()
    }

    /// Walk the hierarchy above `name` looking for `super_name`, answering
    /// the matched name. Missing links degrade to a warning and a `None`.
    pub fn find_super(
        &mut self,
        name: &str,
        super_name: &str,
        traversal: Traversal,
        include_interfaces: bool,
        source: &dyn ClassSource,
    ) -> Option<String> {
        let mut current = name.to_string();
        let mut traversal = traversal;

        loop {
            let Some(meta) = self.for_name(&current, source) else {
                warn!(class = current, "hierarchy walk hit unresolvable link");
                return None;
            };

            let superclass = meta.superclass.clone();
            let interfaces = meta.interfaces.clone();
            let mixins = if traversal.allows_mixins() {
                meta.mixins.clone()
            } else {
                Vec::new()
            };

            if superclass.as_deref() == Some(super_name) {
                return Some(super_name.into());
            }
            if include_interfaces {
                if interfaces.iter().any(|itf| itf == super_name) {
                    return Some(super_name.into());
                }
                for itf in &interfaces {
                    if self
                        .find_super(itf, super_name, Traversal::None, true, source)
                        .is_some()
                    {
                        return Some(super_name.into());
                    }
                }
            }
            // Mixins targeting this class act as synthetic parents.
            if mixins.iter().any(|mixin| mixin == super_name) {
                return Some(super_name.into());
            }

            match superclass {
                Some(superclass) => {
                    current = superclass;
                    traversal = traversal.next();
                }
                None => return None,
            }
        }
    }

    /// Find the first visible method in the hierarchy of `name`.
    ///
    /// Resolution order per step: declared methods, mixin-merged parallel
    /// hierarchy (when the traversal allows), then interfaces recursively.
    /// Members found via an interface are marked `from_interface`.
    pub fn find_method_in_hierarchy(
        &mut self,
        name: &str,
        method: &str,
        desc: &str,
        search: SearchType,
        traversal: Traversal,
        flags: LookupFlags,
        source: &dyn ClassSource,
    ) -> Option<MemberMeta> {
        let mut current = name.to_string();
        let mut traversal = traversal;
        let mut skip_members = search == SearchType::SuperclassesOnly;

        loop {
            let Some(meta) = self.for_name(&current, source) else {
                warn!(class = current, "method lookup hit unresolvable link");
                return None;
            };

            let superclass = meta.superclass.clone();
            let interfaces = meta.interfaces.clone();
            let mixins = if traversal.allows_mixins() {
                meta.mixins.clone()
            } else {
                Vec::new()
            };

            if !skip_members {
                if let Some(member) = meta.method(method, desc) {
                    if flags.admits(member) {
                        let mut member = member.clone();
                        member.owner = current.clone();
                        return Some(member);
                    }
                }

                for mixin in &mixins {
                    let found = self
                        .for_name(mixin, source)
                        .and_then(|meta| meta.method(method, desc))
                        .filter(|member| flags.admits(member))
                        .cloned();
                    if let Some(mut member) = found {
                        member.owner = mixin.clone();
                        return Some(member);
                    }
                }

                for itf in &interfaces {
                    if let Some(mut member) = self.find_method_in_hierarchy(
                        itf,
                        method,
                        desc,
                        SearchType::AllClasses,
                        Traversal::None,
                        flags,
                        source,
                    ) {
                        member.from_interface = true;
                        return Some(member);
                    }
                }
            }

            match superclass {
                Some(superclass) => {
                    current = superclass;
                    traversal = traversal.next();
                    skip_members = false;
                }
                None => return None,
            }
        }
    }

    /// Find the first field in the hierarchy of `name`.
    pub fn find_field_in_hierarchy(
        &mut self,
        name: &str,
        field: &str,
        desc: Option<&str>,
        search: SearchType,
        source: &dyn ClassSource,
    ) -> Option<MemberMeta> {
        let mut current = name.to_string();
        let mut skip_members = search == SearchType::SuperclassesOnly;

        loop {
            let meta = self.for_name(&current, source)?;
            let superclass = meta.superclass.clone();

            if !skip_members {
                if let Some(member) = meta.field(field, desc) {
                    let mut member = member.clone();
                    member.owner = current.clone();
                    return Some(member);
                }
            }

            match superclass {
                Some(superclass) => {
                    current = superclass;
                    skip_members = false;
                }
                None => return None,
            }
        }
    }

    /// The nearest common superclass of `a` and `b`. Interfaces and
    /// non-converging walks answer `java/lang/Object`.
    pub fn common_super(
        &mut self,
        a: &str,
        b: &str,
        include_interfaces: bool,
        source: &dyn ClassSource,
    ) -> String {
        if a == b {
            return a.into();
        }
        let a_is_interface = self.for_name(a, source).map_or(false, ClassMeta::is_interface);
        let b_is_interface = self.for_name(b, source).map_or(false, ClassMeta::is_interface);
        if a_is_interface || b_is_interface {
            return OBJECT_INTERNAL_NAME.into();
        }

        let mut candidate = a.to_string();
        loop {
            if candidate == b
                || self.has_super(b, &candidate, Traversal::None, source)
                || (include_interfaces
                    && self
                        .find_super(b, &candidate, Traversal::None, true, source)
                        .is_some())
            {
                return candidate;
            }
            match self
                .for_name(&candidate, source)
                .and_then(|meta| meta.superclass.clone())
            {
                Some(superclass) => candidate = superclass,
                None => return OBJECT_INTERNAL_NAME.into(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use weave_tree::{MethodNode, NullSource};
    use weave_types::Access;

    /// A class source over in-memory trees that counts provider hits.
    #[derive(Default)]
    struct MapSource {
        classes: HashMap<String, ClassNode>,
        hits: RefCell<HashMap<String, usize>>,
    }

    impl MapSource {
        fn with(mut self, node: ClassNode) -> Self {
            self.classes.insert(node.name.clone(), node);
            self
        }

        fn hits(&self, name: &str) -> usize {
            self.hits.borrow().get(name).copied().unwrap_or(0)
        }
    }

    impl ClassSource for MapSource {
        fn class_node(&self, internal_name: &str) -> Option<ClassNode> {
            *self
                .hits
                .borrow_mut()
                .entry(internal_name.into())
                .or_default() += 1;
            self.classes.get(internal_name).cloned()
        }
    }

    fn class(name: &str, superclass: &str) -> ClassNode {
        let mut node = ClassNode::new(name);
        node.super_name = Some(superclass.into());
        node
    }

    fn hierarchy() -> MapSource {
        let mut base = class("a/Base", OBJECT_INTERNAL_NAME);
        base.methods
            .push(MethodNode::new(Access::PUBLIC, "work", "()V"));
        base.methods
            .push(MethodNode::new(Access::PRIVATE, "secret", "()V"));

        let mut iface = ClassNode::new("a/Marker");
        iface.access = Access::PUBLIC | Access::INTERFACE | Access::ABSTRACT;
        iface
            .methods
            .push(MethodNode::new(Access::PUBLIC | Access::ABSTRACT, "mark", "()V"));

        let mut mid = class("a/Mid", "a/Base");
        mid.interfaces.push("a/Marker".into());

        MapSource::default()
            .with(base)
            .with(iface)
            .with(mid)
            .with(class("a/Leaf", "a/Mid"))
            .with(class("a/Other", "a/Base"))
    }

    #[test]
    fn negative_entries_are_cached() {
        let source = MapSource::default();
        let mut cache = MetaCache::new();
        assert!(cache.for_name("a/Missing", &source).is_none());
        assert!(cache.for_name("a/Missing", &source).is_none());
        assert_eq!(source.hits("a/Missing"), 1);
    }

    #[test]
    fn object_never_hits_the_provider() {
        let source = MapSource::default();
        let mut cache = MetaCache::new();
        assert!(cache.for_name(OBJECT_INTERNAL_NAME, &source).is_some());
        assert_eq!(source.hits(OBJECT_INTERNAL_NAME), 0);
    }

    #[test]
    fn has_super_walks_classes_and_interfaces() {
        let source = hierarchy();
        let mut cache = MetaCache::new();
        assert!(cache.has_super("a/Leaf", "a/Base", Traversal::None, &source));
        assert!(cache.has_super("a/Leaf", "a/Marker", Traversal::None, &source));
        assert!(cache.has_super("a/Leaf", OBJECT_INTERNAL_NAME, Traversal::None, &source));
        assert!(!cache.has_super("a/Base", "a/Leaf", Traversal::None, &source));
    }

    #[test]
    fn method_lookup_walks_and_filters() {
        let source = hierarchy();
        let mut cache = MetaCache::new();

        let found = cache
            .find_method_in_hierarchy(
                "a/Leaf",
                "work",
                "()V",
                SearchType::AllClasses,
                Traversal::None,
                LookupFlags::default(),
                &source,
            )
            .expect("inherited method resolves");
        assert_eq!(found.owner, "a/Base");

        let hidden = cache.find_method_in_hierarchy(
            "a/Leaf",
            "secret",
            "()V",
            SearchType::AllClasses,
            Traversal::None,
            LookupFlags {
                include_private: false,
                include_static: true,
            },
            &source,
        );
        assert!(hidden.is_none());
    }

    #[test]
    fn interface_resolution_marks_source() {
        let source = hierarchy();
        let mut cache = MetaCache::new();
        let found = cache
            .find_method_in_hierarchy(
                "a/Leaf",
                "mark",
                "()V",
                SearchType::AllClasses,
                Traversal::None,
                LookupFlags::default(),
                &source,
            )
            .expect("interface method resolves");
        assert!(found.from_interface);
        assert_eq!(found.owner, "a/Marker");
    }

    #[test]
    fn common_super_of_siblings() {
        let source = hierarchy();
        let mut cache = MetaCache::new();
        assert_eq!(
            cache.common_super("a/Leaf", "a/Other", false, &source),
            "a/Base"
        );
        assert_eq!(
            cache.common_super("a/Marker", "a/Leaf", false, &source),
            OBJECT_INTERNAL_NAME
        );
        assert_eq!(cache.common_super("a/Leaf", "a/Leaf", false, &source), "a/Leaf");
    }

    #[test]
    fn mixins_act_as_synthetic_parents_when_traversal_allows() {
        let source = hierarchy().with({
            let mut node = class("a/MixinBase", OBJECT_INTERNAL_NAME);
            node.methods
                .push(MethodNode::new(Access::PUBLIC, "added", "()V"));
            node
        });
        let mut cache = MetaCache::new();
        cache.ensure("a/Base", &source);
        cache.register_mixin(MixinMeta {
            name: "a/MixinBase".into(),
            priority: MixinMeta::DEFAULT_PRIORITY,
            declared_targets: vec!["a/Base".into()],
            soft_targets: Vec::new(),
            compat_level: 6,
            visibility: weave_types::Visibility::Package,
            interface_only: false,
            pseudo: false,
            config: "test".into(),
        });

        let found = cache.find_method_in_hierarchy(
            "a/Base",
            "added",
            "()V",
            SearchType::AllClasses,
            Traversal::Immediate,
            LookupFlags::default(),
            &source,
        );
        assert_eq!(found.expect("merged member visible").owner, "a/MixinBase");

        let hidden = cache.find_method_in_hierarchy(
            "a/Base",
            "added",
            "()V",
            SearchType::AllClasses,
            Traversal::None,
            LookupFlags::default(),
            &source,
        );
        assert!(hidden.is_none());
    }

    #[test]
    fn for_type_unwraps_arrays_and_rejects_primitives() {
        let source = hierarchy();
        let mut cache = MetaCache::new();
        let array = JavaType::parse("[[La/Base;").expect("valid");
        assert!(cache.for_type(&array, &source).is_some());
        assert!(cache.for_type(&JavaType::Int, &NullSource).is_none());
    }
}
