//! Synthetic argument-bundle classes for modify-args handlers.
//!
//! One class is generated per unique argument descriptor. The class boxes
//! the intercepted arguments into an `Object[]` held by the `Args` base
//! class; the handler mutates the bundle and the call site unpacks it.

use std::collections::HashMap;

use itertools::Itertools;
use weave_tree::{ClassNode, Insn, MethodNode, Opcode};
use weave_types::{Access, JavaType, MethodDescriptor, CTOR_NAME};

use crate::error::{MixinError, Result};

/// Internal name of the runtime `Args` base class.
pub const ARGS_BASE_CLASS: &str = "weave/args/Args";

/// Name prefix of generated bundle classes.
const CLASS_PREFIX: &str = "weave/synthetic/args/Args$";

/// Name and descriptor of the boxed-values field on the base class.
const VALUES_FIELD: (&str, &str) = ("values", "[Ljava/lang/Object;");

/// Registry record for one generated class.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticClassInfo {
    /// Internal name of the generated class.
    pub name: String,
    /// Mixin that first requested the class.
    pub mixin: Option<String>,
    /// Bundled argument types.
    pub arg_types: Vec<JavaType>,
    /// The normalised (void-return) descriptor keying this class.
    pub desc: String,
    /// How many call sites load the class.
    pub loads: usize,
}

/// Allocates and lazily emits argument-bundle classes. Lookup is keyed by
/// the descriptor normalised to a void return; once assigned, a name is
/// stable for the session.
#[derive(Debug, Default)]
pub struct ArgsClassGenerator {
    by_desc: HashMap<String, usize>,
    classes: Vec<SyntheticClassInfo>,
}

impl ArgsClassGenerator {
    /// The bundle class name for a call-site descriptor, allocating on
    /// first sight.
    pub fn class_for(&mut self, desc: &MethodDescriptor, mixin: Option<&str>) -> String {
        let key = desc.normalised().descriptor();
        match self.by_desc.get(&key) {
            Some(&index) => {
                self.classes[index].loads += 1;
                self.classes[index].name.clone()
            }
            None => {
                let name = format!("{CLASS_PREFIX}{}", self.classes.len() + 1);
                self.classes.push(SyntheticClassInfo {
                    name: name.clone(),
                    mixin: mixin.map(Into::into),
                    arg_types: desc.args.clone(),
                    desc: key.clone(),
                    loads: 1,
                });
                self.by_desc.insert(key, self.classes.len() - 1);
                name
            }
        }
    }

    /// `true` when `name` belongs to this registry's namespace.
    pub fn is_synthetic(&self, name: &str) -> bool {
        name.starts_with(CLASS_PREFIX)
    }

    /// Registry record for a generated name.
    pub fn info(&self, name: &str) -> Option<&SyntheticClassInfo> {
        self.classes.iter().find(|info| info.name == name)
    }

    /// All registry records, in allocation order.
    pub fn classes(&self) -> &[SyntheticClassInfo] {
        &self.classes
    }

    /// Emit the class tree for a previously assigned name.
    pub fn generate(&self, name: &str) -> Result<ClassNode> {
        let info = self
            .info(name)
            .ok_or_else(|| MixinError::SyntheticCollision { name: name.into() })?;

        let mut node = ClassNode::new(name.to_string());
        node.access = Access::PUBLIC | Access::FINAL | Access::SYNTHETIC;
        node.super_name = Some(ARGS_BASE_CLASS.into());

        node.methods.push(Self::ctor(name));
        node.methods.push(Self::factory(name, &info.arg_types));
        for (index, ty) in info.arg_types.iter().enumerate() {
            node.methods.push(Self::getter(index, ty));
        }
        node.methods.push(Self::set_method(&info.arg_types));
        node.methods.push(Self::set_all_method(&info.arg_types));
        node.methods.push(Self::to_string_method(&info.arg_types));
        Ok(node)
    }

    /// `private <init>([Ljava/lang/Object;)V` forwarding to the base.
    fn ctor(_name: &str) -> MethodNode {
        let mut method = MethodNode::new(
            Access::PRIVATE,
            CTOR_NAME,
            "([Ljava/lang/Object;)V",
        );
        method.instructions.extend(vec![
            Insn::var(Opcode::Aload, 0),
            Insn::var(Opcode::Aload, 1),
            Insn::invoke(
                Opcode::Invokespecial,
                ARGS_BASE_CLASS,
                CTOR_NAME,
                "([Ljava/lang/Object;)V",
            ),
            Insn::op(Opcode::Return),
        ]);
        method.max_stack = 2;
        method.max_locals = 2;
        method
    }

    /// `public static of(Ts)LArgs$N;` boxing every argument.
    fn factory(name: &str, types: &[JavaType]) -> MethodNode {
        let mut desc = String::from("(");
        for ty in types {
            desc.push_str(&ty.descriptor());
        }
        desc.push_str(&format!(")L{name};"));

        let mut method = MethodNode::new(Access::PUBLIC | Access::STATIC, "of", desc);
        let slots = slot_map(types);

        method.instructions.extend(vec![
            Insn::Type {
                op: Opcode::New,
                desc: name.into(),
            },
            Insn::op(Opcode::Dup),
            Insn::push_int(types.len() as i32),
            Insn::Type {
                op: Opcode::Anewarray,
                desc: "java/lang/Object".into(),
            },
        ]);
        for (index, ty) in types.iter().enumerate() {
            method.instructions.push(Insn::op(Opcode::Dup));
            method.instructions.push(Insn::push_int(index as i32));
            method
                .instructions
                .push(Insn::var(Opcode::load_for(ty), slots[index]));
            if let Some(boxed) = ty.boxed_name() {
                method.instructions.push(Insn::invoke(
                    Opcode::Invokestatic,
                    boxed,
                    "valueOf",
                    format!("({})L{boxed};", ty.descriptor()),
                ));
            }
            method.instructions.push(Insn::op(Opcode::Aastore));
        }
        method.instructions.extend(vec![
            Insn::invoke(
                Opcode::Invokespecial,
                name,
                CTOR_NAME,
                "([Ljava/lang/Object;)V",
            ),
            Insn::op(Opcode::Areturn),
        ]);
        method.max_stack = 7;
        method.max_locals = types.iter().map(JavaType::size).sum::<usize>().max(1);
        method
    }

    /// `public $<n>()T` reading and unboxing one bundled value. Getters
    /// are public because every call site lives in a foreign class.
    fn getter(index: usize, ty: &JavaType) -> MethodNode {
        let mut method = MethodNode::new(
            Access::PUBLIC | Access::SYNTHETIC,
            format!("${index}"),
            format!("(){}", ty.descriptor()),
        );
        method.instructions.extend(vec![
            Insn::var(Opcode::Aload, 0),
            Insn::field(Opcode::Getfield, ARGS_BASE_CLASS, VALUES_FIELD.0, VALUES_FIELD.1),
            Insn::push_int(index as i32),
            Insn::op(Opcode::Aaload),
        ]);
        match ty.boxed_name() {
            Some(boxed) => {
                let (unbox, unbox_desc) = ty.unbox_method().expect("primitive unboxes");
                method.instructions.push(Insn::Type {
                    op: Opcode::Checkcast,
                    desc: boxed.into(),
                });
                method
                    .instructions
                    .push(Insn::invoke(Opcode::Invokevirtual, boxed, unbox, unbox_desc));
            }
            None => {
                if let Some(reference) = ty.reference_name() {
                    method.instructions.push(Insn::Type {
                        op: Opcode::Checkcast,
                        desc: reference,
                    });
                }
            }
        }
        method
            .instructions
            .push(Insn::op(Opcode::return_for(ty)));
        method.max_stack = 2 + ty.size();
        method.max_locals = 1;
        method
    }

    /// `public set(ILjava/lang/Object;)V` with per-index checked stores.
    fn set_method(types: &[JavaType]) -> MethodNode {
        let mut method =
            MethodNode::new(Access::PUBLIC, "set", "(ILjava/lang/Object;)V");
        let store = method.new_label();
        let default = method.new_label();
        let case_labels: Vec<_> = types.iter().map(|_| method.new_label()).collect();

        method.instructions.push(Insn::var(Opcode::Iload, 1));
        method.instructions.push(Insn::Switch {
            keys: (0..types.len() as i32).collect(),
            labels: case_labels.clone(),
            default,
        });

        for (index, ty) in types.iter().enumerate() {
            method.instructions.push(Insn::Label(case_labels[index]));
            method.instructions.push(Insn::var(Opcode::Aload, 2));
            push_checked_cast(&mut method, ty);
            method.instructions.push(Insn::Jump {
                op: Opcode::Goto,
                label: store,
            });
        }

        method.instructions.push(Insn::Label(default));
        push_throw(
            &mut method,
            "java/lang/IndexOutOfBoundsException",
            "argument index out of range",
        );

        // Common store block; the checked value is on the stack.
        method.instructions.push(Insn::Label(store));
        method.instructions.extend(vec![
            Insn::var(Opcode::Aload, 0),
            Insn::field(Opcode::Getfield, ARGS_BASE_CLASS, VALUES_FIELD.0, VALUES_FIELD.1),
            Insn::op(Opcode::Swap),
            Insn::var(Opcode::Iload, 1),
            Insn::op(Opcode::Swap),
            Insn::op(Opcode::Aastore),
            Insn::op(Opcode::Return),
        ]);
        method.max_stack = 4;
        method.max_locals = 3;
        method
    }

    /// `public setAll([Ljava/lang/Object;)V` with length and type checks.
    fn set_all_method(types: &[JavaType]) -> MethodNode {
        let mut method =
            MethodNode::new(Access::PUBLIC, "setAll", "([Ljava/lang/Object;)V");
        let length_ok = method.new_label();

        method.instructions.extend(vec![
            Insn::var(Opcode::Aload, 1),
            Insn::op(Opcode::Arraylength),
            Insn::push_int(types.len() as i32),
            Insn::Jump {
                op: Opcode::IfIcmpeq,
                label: length_ok,
            },
        ]);
        push_throw(
            &mut method,
            "java/lang/IllegalArgumentException",
            "wrong number of arguments",
        );
        method.instructions.push(Insn::Label(length_ok));

        for (index, ty) in types.iter().enumerate() {
            method.instructions.extend(vec![
                Insn::var(Opcode::Aload, 0),
                Insn::field(Opcode::Getfield, ARGS_BASE_CLASS, VALUES_FIELD.0, VALUES_FIELD.1),
                Insn::push_int(index as i32),
                Insn::var(Opcode::Aload, 1),
                Insn::push_int(index as i32),
                Insn::op(Opcode::Aaload),
            ]);
            push_checked_cast(&mut method, ty);
            method.instructions.push(Insn::op(Opcode::Aastore));
        }
        method.instructions.push(Insn::op(Opcode::Return));
        method.max_stack = 6;
        method.max_locals = 2;
        method
    }

    /// `public toString()Ljava/lang/String;` naming the bundled types.
    fn to_string_method(types: &[JavaType]) -> MethodNode {
        let mut method =
            MethodNode::new(Access::PUBLIC, "toString", "()Ljava/lang/String;");
        let rendered = format!(
            "Args({})",
            types.iter().map(JavaType::descriptor).join(",")
        );
        method.instructions.extend(vec![
            Insn::Ldc(weave_tree::Constant::String(rendered)),
            Insn::op(Opcode::Areturn),
        ]);
        method.max_stack = 1;
        method.max_locals = 1;
        method
    }
}

/// Local slot per value for a parameter list starting at slot 0.
fn slot_map(types: &[JavaType]) -> Vec<usize> {
    let mut slots = Vec::with_capacity(types.len());
    let mut slot = 0;
    for ty in types {
        slots.push(slot);
        slot += ty.size();
    }
    slots
}

/// Cast the `Object` on the stack to the slot type; a primitive slot also
/// rejects null.
fn push_checked_cast(method: &mut MethodNode, ty: &JavaType) {
    match ty.boxed_name() {
        Some(boxed) => {
            let non_null = method.new_label();
            method.instructions.push(Insn::op(Opcode::Dup));
            method.instructions.push(Insn::Jump {
                op: Opcode::Ifnonnull,
                label: non_null,
            });
            push_throw(
                method,
                "java/lang/IllegalArgumentException",
                "cannot store null in a primitive slot",
            );
            method.instructions.push(Insn::Label(non_null));
            method.instructions.push(Insn::Type {
                op: Opcode::Checkcast,
                desc: boxed.into(),
            });
        }
        None => {
            if let Some(reference) = ty.reference_name() {
                method.instructions.push(Insn::Type {
                    op: Opcode::Checkcast,
                    desc: reference,
                });
            }
        }
    }
}

fn push_throw(method: &mut MethodNode, exception: &str, message: &str) {
    method.instructions.extend(vec![
        Insn::Type {
            op: Opcode::New,
            desc: exception.into(),
        },
        Insn::op(Opcode::Dup),
        Insn::Ldc(weave_tree::Constant::String(message.into())),
        Insn::invoke(
            Opcode::Invokespecial,
            exception,
            CTOR_NAME,
            "(Ljava/lang/String;)V",
        ),
        Insn::op(Opcode::Athrow),
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(text: &str) -> MethodDescriptor {
        MethodDescriptor::parse(text).expect("valid descriptor")
    }

    #[test]
    fn names_are_stable_and_keyed_by_normalised_descriptor() {
        let mut generator = ArgsClassGenerator::default();
        let first = generator.class_for(&desc("(IDLjava/lang/String;)V"), Some("a/MixinA"));
        // Same arguments, different return type: same class.
        let second = generator.class_for(&desc("(IDLjava/lang/String;)I"), Some("a/MixinB"));
        assert_eq!(first, second);
        assert_eq!(generator.classes().len(), 1);
        assert_eq!(generator.classes()[0].loads, 2);

        let third = generator.class_for(&desc("(I)V"), None);
        assert_ne!(first, third);
        assert!(generator.is_synthetic(&third));
    }

    #[test]
    fn generated_class_has_full_member_set() {
        let mut generator = ArgsClassGenerator::default();
        let name = generator.class_for(&desc("(IDLjava/lang/String;)V"), None);
        let node = generator.generate(&name).expect("generates");

        assert_eq!(node.super_name.as_deref(), Some(ARGS_BASE_CLASS));
        assert!(node.method(CTOR_NAME, "([Ljava/lang/Object;)V").is_some());
        assert!(node
            .method("of", &format!("(IDLjava/lang/String;)L{name};"))
            .is_some());
        assert!(node.method("$0", "()I").is_some());
        assert!(node.method("$1", "()D").is_some());
        assert!(node.method("$2", "()Ljava/lang/String;").is_some());
        assert!(node.method("set", "(ILjava/lang/Object;)V").is_some());
        assert!(node.method("setAll", "([Ljava/lang/Object;)V").is_some());
        assert!(node.method("toString", "()Ljava/lang/String;").is_some());
    }

    #[test]
    fn primitive_getter_unboxes() {
        let mut generator = ArgsClassGenerator::default();
        let name = generator.class_for(&desc("(J)V"), None);
        let node = generator.generate(&name).expect("generates");
        let getter = node.method("$0", "()J").expect("long getter");
        let has_unbox = getter.instructions.iter_insns().any(|(_, insn)| {
            matches!(
                insn,
                Insn::Method { owner, name, .. }
                    if owner == "java/lang/Long" && name == "longValue"
            )
        });
        assert!(has_unbox);
    }

    #[test]
    fn unknown_name_is_a_collision_error() {
        let generator = ArgsClassGenerator::default();
        assert!(matches!(
            generator.generate("weave/synthetic/args/Args$9"),
            Err(MixinError::SyntheticCollision { .. })
        ));
    }
}
