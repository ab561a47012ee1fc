//! Stage 2: flatten the object graph into global slots.
//!
//! The instance tree is walked from the root; every reachable
//! (instance, data slot) pair becomes one named global, addressed by its
//! dotted path (`sub.weight`). Because each class is instantiated at most
//! once, every method body can be rewritten in place:
//!
//! - `get_slot` of a submodule vanishes; the receiver map tracks which
//!   instance the result named
//! - `get_slot` of data becomes `global.get` (mutable slot read as a
//!   reference) or `global.read` (value reads, and frozen slots bridged
//!   through `from_value` when a reference was expected)
//! - `set_slot` becomes `global.set`, bridging reference-typed stores
//!   through `to_value`
//! - calls drop their receiver and target the instance-qualified name
//!
//! Methods of the root instance keep their bare names and become public
//! when exported; everything else is private. Afterwards the hierarchy is
//! gone and no class type remains.

use rustc_hash::{FxHashMap, FxHashSet};
use tensile_core::hierarchy::ObjectGraph;
use tensile_core::ir::{DomTree, Function, GlobalSlot, OpKind, Program, Visibility};
use tensile_core::{
    BlockId, ClassId, Diagnostic, FuncId, OpId, SourceLoc, SymbolHash, TensorMeta, Type, ValueId,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalizeStats {
    pub instances_flattened: usize,
    pub slots_created: usize,
    pub functions_removed: usize,
}

#[derive(Debug)]
pub struct GlobalizeOutput {
    pub program: Program,
    pub stats: GlobalizeStats,
}

/// One node of the instantiation tree.
struct Instance {
    class: ClassId,
    /// Dotted path from the root; empty for the root itself.
    path: String,
}

/// What a `(instance path, slot name)` pair resolves to.
enum SlotTarget {
    Submodule { child_path: String },
    Data { symbol: SymbolHash, ty: Type, mutable: bool },
}

/// Immutable context shared by every method rewrite.
struct FlattenCx {
    slot_info: FxHashMap<(String, String), SlotTarget>,
    /// Old function name -> instance-qualified name, for call rewriting.
    renamed: FxHashMap<String, String>,
}

fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}.{child}")
    }
}

fn instance_display(path: &str) -> &str {
    if path.is_empty() { "<root>" } else { path }
}

/// The value-flavored storage type of a data slot declaration.
fn storage_type(decl_ty: &Type, loc: SourceLoc, subject: &str) -> Result<Type, Diagnostic> {
    if decl_ty.contains_class() {
        return Err(Diagnostic::structural(loc, subject, "data slot type contains an object"));
    }
    let ty = match decl_ty {
        Type::Tensor(meta) => Type::ValueTensor(meta.clone()),
        other => other.clone(),
    };
    if ty.contains_ref_tensor() {
        return Err(Diagnostic::structural(loc, subject, "data slot type must be value-typed"));
    }
    Ok(ty)
}

pub struct ObjectGraphFlattener {
    program: Program,
}

impl ObjectGraphFlattener {
    pub fn new(program: Program) -> ObjectGraphFlattener {
        ObjectGraphFlattener { program }
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn run(mut self) -> Result<GlobalizeOutput, Diagnostic> {
        let Some(graph) = self.program.hierarchy.take() else {
            return Ok(GlobalizeOutput { program: self.program, stats: GlobalizeStats::default() });
        };

        let instances = collect_instances(&graph)?;
        let slots_created = self.create_slots(&graph, &instances)?;
        let renames = self.plan_renames(&graph, &instances)?;

        let cx = FlattenCx {
            slot_info: build_slot_info(&graph, &instances),
            renamed: renames
                .iter()
                .map(|(&id, (new_name, _))| {
                    (self.program.function(id).name.clone(), new_name.clone())
                })
                .collect(),
        };

        for instance in &instances {
            let class = graph.class(instance.class);
            for method in &class.methods {
                let apply_refinements = instance.path.is_empty() && method.exported;
                let func = self.program.function_mut(method.func);
                rewrite_method(func, &cx, &instance.path, &class.name)?;
                if apply_refinements {
                    apply_argument_refinements(func, &method.arg_refinements)?;
                }
            }
        }
        self.validate_free_functions(&graph)?;

        for (&func_id, (new_name, visibility)) in &renames {
            let func = self.program.function_mut(func_id);
            func.name = new_name.clone();
            func.symbol = SymbolHash::function(new_name);
            func.visibility = *visibility;
        }

        let functions_removed = self.remove_orphan_methods(&graph, &instances);
        self.check_name_collisions()?;

        Ok(GlobalizeOutput {
            program: self.program,
            stats: GlobalizeStats {
                instances_flattened: instances.len(),
                slots_created,
                functions_removed,
            },
        })
    }

    fn create_slots(
        &mut self,
        graph: &ObjectGraph,
        instances: &[Instance],
    ) -> Result<usize, Diagnostic> {
        let mut count = 0;
        for instance in instances {
            let class = graph.class(instance.class);
            for slot in class.data_slots() {
                let name = join_path(&instance.path, &slot.name);
                let ty = storage_type(&slot.ty, slot.loc, &name)?;
                let Some(initializer) = slot.initializer.clone() else {
                    return Err(Diagnostic::structural(
                        slot.loc,
                        &name,
                        "data slot has no initializer",
                    ));
                };
                self.program.add_slot(GlobalSlot {
                    symbol: SymbolHash::slot(&name),
                    name,
                    ty,
                    initializer,
                    mutable: slot.mutable,
                    loc: slot.loc,
                });
                count += 1;
            }
        }
        Ok(count)
    }

    /// Decide each method function's post-flattening name and visibility.
    fn plan_renames(
        &self,
        graph: &ObjectGraph,
        instances: &[Instance],
    ) -> Result<FxHashMap<FuncId, (String, Visibility)>, Diagnostic> {
        let mut renames = FxHashMap::default();
        for instance in instances {
            let class = graph.class(instance.class);
            for method in &class.methods {
                if method.func.index() >= self.program.functions.len() {
                    return Err(Diagnostic::structural(
                        method.loc,
                        &class.name,
                        format!("method `{}` refers to a missing function", method.name),
                    ));
                }
                let name = join_path(&instance.path, &method.name);
                let visibility = if instance.path.is_empty() && method.exported {
                    Visibility::Public
                } else {
                    Visibility::Private
                };
                renames.insert(method.func, (name, visibility));
            }
        }
        Ok(renames)
    }

    /// Functions outside the hierarchy must not traffic in objects.
    fn validate_free_functions(&self, graph: &ObjectGraph) -> Result<(), Diagnostic> {
        for id in self.program.func_ids() {
            if graph.owner_of(id).is_some() {
                continue;
            }
            let func = self.program.function(id);
            for &param in func.params() {
                if func.value(param).ty.contains_class() {
                    return Err(Diagnostic::structural(
                        func.loc,
                        &func.name,
                        "function outside the object hierarchy takes an object parameter",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Drop method functions of classes the root never instantiates.
    fn remove_orphan_methods(&mut self, graph: &ObjectGraph, instances: &[Instance]) -> usize {
        let instantiated: FxHashSet<ClassId> = instances.iter().map(|i| i.class).collect();
        let keep: FxHashSet<FuncId> = instances
            .iter()
            .flat_map(|i| graph.class(i.class).methods.iter().map(|m| m.func))
            .collect();
        let mut drop: FxHashSet<FuncId> = FxHashSet::default();
        for class_id in graph.class_ids() {
            if instantiated.contains(&class_id) {
                continue;
            }
            for method in &graph.class(class_id).methods {
                if !keep.contains(&method.func) {
                    drop.insert(method.func);
                }
            }
        }
        if drop.is_empty() {
            return 0;
        }
        self.program.functions = std::mem::take(&mut self.program.functions)
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !drop.contains(&FuncId::new(*i as u32)))
            .map(|(_, f)| f)
            .collect();
        drop.len()
    }

    fn check_name_collisions(&self) -> Result<(), Diagnostic> {
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        for func in &self.program.functions {
            if !seen.insert(&func.name) {
                return Err(Diagnostic::structural(
                    func.loc,
                    &func.name,
                    "duplicate function name after flattening",
                ));
            }
        }
        Ok(())
    }
}

/// DFS over the instantiation tree. Rejects recursion and any class
/// reachable along two paths; both break the one-instance-per-class rule
/// the in-place rewrite depends on.
fn collect_instances(graph: &ObjectGraph) -> Result<Vec<Instance>, Diagnostic> {
    let mut instances = Vec::new();
    let mut visited: FxHashSet<ClassId> = FxHashSet::default();
    let mut on_stack: FxHashSet<ClassId> = FxHashSet::default();
    visit_instance(graph, graph.root, String::new(), &mut visited, &mut on_stack, &mut instances)?;
    Ok(instances)
}

fn visit_instance(
    graph: &ObjectGraph,
    class: ClassId,
    path: String,
    visited: &mut FxHashSet<ClassId>,
    on_stack: &mut FxHashSet<ClassId>,
    out: &mut Vec<Instance>,
) -> Result<(), Diagnostic> {
    let decl = graph.class(class);
    if on_stack.contains(&class) {
        return Err(Diagnostic::aliasing(decl.loc, &decl.name, "class instantiated recursively"));
    }
    if !visited.insert(class) {
        return Err(Diagnostic::aliasing(
            decl.loc,
            &decl.name,
            "class instantiated more than once; submodules may not be shared",
        ));
    }
    on_stack.insert(class);
    out.push(Instance { class, path: path.clone() });
    for slot in decl.submodule_slots() {
        let Some(child_name) = slot.submodule_class() else {
            continue;
        };
        let Some(child) = graph.find_class(child_name) else {
            return Err(Diagnostic::structural(
                slot.loc,
                &decl.name,
                format!("submodule slot `{}` names unknown class `{child_name}`", slot.name),
            ));
        };
        visit_instance(graph, child, join_path(&path, &slot.name), visited, on_stack, out)?;
    }
    on_stack.remove(&class);
    Ok(())
}

fn build_slot_info(
    graph: &ObjectGraph,
    instances: &[Instance],
) -> FxHashMap<(String, String), SlotTarget> {
    let mut info = FxHashMap::default();
    for instance in instances {
        let class = graph.class(instance.class);
        for slot in &class.slots {
            let key = (instance.path.clone(), slot.name.clone());
            let target = if slot.is_submodule() {
                SlotTarget::Submodule { child_path: join_path(&instance.path, &slot.name) }
            } else {
                let name = join_path(&instance.path, &slot.name);
                // Type errors surface in create_slots; fall back to the
                // declared type here so the map stays total.
                let ty = storage_type(&slot.ty, slot.loc, &name)
                    .unwrap_or_else(|_| slot.ty.clone());
                SlotTarget::Data {
                    symbol: SymbolHash::slot(&name),
                    ty,
                    mutable: slot.mutable,
                }
            };
            info.insert(key, target);
        }
    }
    info
}

/// Rewrite one method body against its unique instance.
fn rewrite_method(
    func: &mut Function,
    cx: &FlattenCx,
    inst_path: &str,
    class_name: &str,
) -> Result<(), Diagnostic> {
    // Receiver map: which instance each class-typed value names.
    let mut object_of: FxHashMap<ValueId, String> = FxHashMap::default();

    let params = func.params().to_vec();
    let Some(&self_param) = params.first() else {
        return Err(Diagnostic::structural(
            func.loc,
            &func.name,
            "method function has no receiver parameter",
        ));
    };
    if func.value(self_param).ty != Type::Class(class_name.to_string()) {
        return Err(Diagnostic::structural(
            func.loc,
            &func.name,
            format!("receiver parameter is not `class<{class_name}>`"),
        ));
    }
    for &param in &params[1..] {
        if func.value(param).ty.contains_class() {
            return Err(Diagnostic::structural(
                func.loc,
                &func.name,
                "object parameter beyond the receiver",
            ));
        }
    }
    object_of.insert(self_param, inst_path.to_string());

    // Dominators-first order so slot-derived receivers are mapped before
    // any use; leftover unreachable blocks follow.
    let order: Vec<BlockId> = {
        let dom = DomTree::build(func);
        let mut order = dom.rpo().to_vec();
        let seen: FxHashSet<BlockId> = order.iter().copied().collect();
        for b in 0..func.blocks.len() {
            let id = BlockId::new(b as u32);
            if !seen.contains(&id) {
                order.push(id);
            }
        }
        order
    };

    for &block in &order {
        let ops: Vec<OpId> = func.block(block).ops.clone();
        for op in ops {
            match func.op(op).kind.clone() {
                OpKind::GetSlot(slot_name) => {
                    rewrite_get_slot(func, cx, &mut object_of, block, op, &slot_name)?;
                }
                OpKind::SetSlot(slot_name) => {
                    rewrite_set_slot(func, cx, &object_of, block, op, &slot_name)?;
                }
                OpKind::Call(callee) => {
                    rewrite_call(func, cx, &object_of, op, &callee)?;
                }
                _ => {}
            }
        }
    }

    func.block_mut(BlockId::ENTRY).params.remove(0);
    Ok(())
}

fn resolve_receiver(
    func: &Function,
    object_of: &FxHashMap<ValueId, String>,
    op: OpId,
    what: &str,
) -> Result<String, Diagnostic> {
    let operation = func.op(op);
    let Some(path) = operation
        .operands
        .first()
        .and_then(|receiver| object_of.get(receiver))
    else {
        return Err(Diagnostic::structural(
            operation.loc,
            &func.name,
            format!("{what} receiver does not resolve to an instance"),
        ));
    };
    Ok(path.clone())
}

fn rewrite_get_slot(
    func: &mut Function,
    cx: &FlattenCx,
    object_of: &mut FxHashMap<ValueId, String>,
    block: BlockId,
    op: OpId,
    slot_name: &str,
) -> Result<(), Diagnostic> {
    let loc = func.op(op).loc;
    let path = resolve_receiver(func, object_of, op, &format!("`get_slot \"{slot_name}\"`"))?;
    let Some(target) = cx.slot_info.get(&(path.clone(), slot_name.to_string())) else {
        return Err(Diagnostic::structural(
            loc,
            &func.name,
            format!("no slot `{slot_name}` on instance `{}`", instance_display(&path)),
        ));
    };
    match target {
        SlotTarget::Submodule { child_path } => {
            object_of.insert(func.op(op).result(0), child_path.clone());
            func.erase_op(op);
        }
        SlotTarget::Data { symbol, mutable, .. } => {
            let result = func.op(op).result(0);
            match func.value(result).ty.clone() {
                Type::Tensor(_) if *mutable => {
                    // The handle tracks the slot's storage.
                    func.op_mut(op).kind = OpKind::GlobalGet(*symbol);
                    func.op_mut(op).operands.clear();
                }
                Type::Tensor(meta) => {
                    // Frozen contents never change: snapshot once and wrap
                    // in fresh storage for the reference-typed user.
                    let Some(index) = func.op_index(block, op) else {
                        return Err(Diagnostic::internal(
                            loc,
                            &func.name,
                            "operation left its block during rewriting",
                        ));
                    };
                    let read = func.insert_op(
                        block,
                        index,
                        OpKind::GlobalRead(*symbol),
                        vec![],
                        vec![Type::ValueTensor(meta)],
                        loc,
                    );
                    let snapshot = func.op(read).result(0);
                    func.op_mut(op).kind = OpKind::FromValue;
                    func.op_mut(op).operands = vec![snapshot];
                }
                _ => {
                    func.op_mut(op).kind = OpKind::GlobalRead(*symbol);
                    func.op_mut(op).operands.clear();
                }
            }
        }
    }
    Ok(())
}

fn rewrite_set_slot(
    func: &mut Function,
    cx: &FlattenCx,
    object_of: &FxHashMap<ValueId, String>,
    block: BlockId,
    op: OpId,
    slot_name: &str,
) -> Result<(), Diagnostic> {
    let loc = func.op(op).loc;
    let path = resolve_receiver(func, object_of, op, &format!("`set_slot \"{slot_name}\"`"))?;
    let Some(target) = cx.slot_info.get(&(path.clone(), slot_name.to_string())) else {
        return Err(Diagnostic::structural(
            loc,
            &func.name,
            format!("no slot `{slot_name}` on instance `{}`", instance_display(&path)),
        ));
    };
    let SlotTarget::Data { symbol, ty: slot_ty, mutable } = target else {
        return Err(Diagnostic::structural(
            loc,
            &func.name,
            format!("cannot overwrite submodule slot `{slot_name}`"),
        ));
    };
    if !mutable {
        return Err(Diagnostic::structural(
            loc,
            &func.name,
            format!("store to frozen slot `{}`", join_path(&path, slot_name)),
        ));
    }

    let Some(mut index) = func.op_index(block, op) else {
        return Err(Diagnostic::internal(loc, &func.name, "operation left its block during rewriting"));
    };
    let mut stored = func.op(op).operand(1);
    if let Type::Tensor(meta) = func.value(stored).ty.clone() {
        let snapshot = func.insert_op(
            block,
            index,
            OpKind::ToValue,
            vec![stored],
            vec![Type::ValueTensor(meta)],
            loc,
        );
        stored = func.op(snapshot).result(0);
        index += 1;
    }
    if !func.value(stored).ty.is_refinement_of(slot_ty) {
        let (Type::ValueTensor(_), Type::ValueTensor(slot_meta)) =
            (&func.value(stored).ty, slot_ty)
        else {
            return Err(Diagnostic::structural(
                loc,
                &func.name,
                format!("stored value does not match the type of slot `{}`",
                    join_path(&path, slot_name)),
            ));
        };
        let cast = func.insert_op(
            block,
            index,
            OpKind::ValueCast(slot_meta.clone()),
            vec![stored],
            vec![slot_ty.clone()],
            loc,
        );
        stored = func.op(cast).result(0);
    }
    func.op_mut(op).kind = OpKind::GlobalSet(*symbol);
    func.op_mut(op).operands = vec![stored];
    Ok(())
}

fn rewrite_call(
    func: &mut Function,
    cx: &FlattenCx,
    object_of: &FxHashMap<ValueId, String>,
    op: OpId,
    callee: &str,
) -> Result<(), Diagnostic> {
    let has_receiver = func
        .op(op)
        .operands
        .first()
        .is_some_and(|&v| matches!(func.value(v).ty, Type::Class(_)));
    if !has_receiver {
        return Ok(());
    }
    let loc = func.op(op).loc;
    resolve_receiver(func, object_of, op, &format!("`call @{callee}`"))?;
    let Some(new_name) = cx.renamed.get(callee) else {
        return Err(Diagnostic::structural(
            loc,
            &func.name,
            format!("call to `{callee}` passes a receiver but targets no method"),
        ));
    };
    func.op_mut(op).kind = OpKind::Call(new_name.clone());
    func.op_mut(op).operands.remove(0);
    Ok(())
}

/// Exported root methods may promise shapes for their tensor arguments;
/// the promise must refine what the signature already says.
fn apply_argument_refinements(
    func: &mut Function,
    refinements: &[Option<TensorMeta>],
) -> Result<(), Diagnostic> {
    if refinements.is_empty() {
        return Ok(());
    }
    let params = func.params().to_vec();
    if refinements.len() != params.len() {
        return Err(Diagnostic::structural(
            func.loc,
            &func.name,
            format!(
                "{} argument refinement(s) for {} parameter(s)",
                refinements.len(),
                params.len()
            ),
        ));
    }
    for (&param, refinement) in params.iter().zip(refinements) {
        let Some(meta) = refinement else {
            continue;
        };
        let refined = Type::ValueTensor(meta.clone());
        if !refined.is_refinement_of(&func.value(param).ty) {
            return Err(Diagnostic::structural(
                func.loc,
                &func.name,
                "argument refinement does not refine the declared parameter type",
            ));
        }
        func.value_mut(param).ty = refined;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensile_core::ir::{FuncBuilder, ProgramBuilder, VerifyConfig, verify_program};
    use tensile_core::{ConstValue, DType, DiagnosticKind, TensorLit};

    fn loc() -> SourceLoc {
        SourceLoc::unknown()
    }

    fn splat(dims: &[i64], value: f64) -> ConstValue {
        ConstValue::Tensor(TensorLit::splat(dims, DType::F32, value))
    }

    /// Root { bias, sub: Child { weight } } with forward calling into the
    /// child, as the preparer leaves it (calls carry their receiver).
    fn two_level_program() -> Program {
        let mut pb = ProgramBuilder::new();

        let mut child_fwd = FuncBuilder::new("Child::forward", Visibility::Private, loc());
        let child_self = child_fwd.param(Type::Class("Child".into()));
        let x = child_fwd.param(Type::vtensor(&[4], DType::F32));
        child_fwd.results(vec![Type::vtensor(&[4], DType::F32)]);
        let w = child_fwd.op1(
            OpKind::GetSlot("weight".into()),
            vec![child_self],
            Type::vtensor(&[4], DType::F32),
            loc(),
        );
        let y = child_fwd.op1(OpKind::Mul, vec![x, w], Type::vtensor(&[4], DType::F32), loc());
        child_fwd.ret(vec![y], loc());
        let child_fwd_id = pb.add_function(child_fwd.finish());

        let mut fwd = FuncBuilder::new("Root::forward", Visibility::Private, loc());
        let root_self = fwd.param(Type::Class("Root".into()));
        let x = fwd.param(Type::vtensor(&[4], DType::F32));
        fwd.results(vec![Type::vtensor(&[4], DType::F32)]);
        let sub = fwd.op1(
            OpKind::GetSlot("sub".into()),
            vec![root_self],
            Type::Class("Child".into()),
            loc(),
        );
        let mid = fwd.op1(
            OpKind::Call("Child::forward".into()),
            vec![sub, x],
            Type::vtensor(&[4], DType::F32),
            loc(),
        );
        let bias = fwd.op1(
            OpKind::GetSlot("bias".into()),
            vec![root_self],
            Type::vtensor(&[4], DType::F32),
            loc(),
        );
        let out = fwd.op1(OpKind::Add, vec![mid, bias], Type::vtensor(&[4], DType::F32), loc());
        fwd.ret(vec![out], loc());
        let fwd_id = pb.add_function(fwd.finish());

        let child = pb.declare_class("Child", loc());
        pb.add_data_slot(
            child,
            "weight",
            Type::vtensor(&[4], DType::F32),
            splat(&[4], 2.0),
            false,
            loc(),
        );
        pb.add_method(child, "forward", child_fwd_id, false, vec![], loc());

        let root = pb.declare_class("Root", loc());
        pb.add_data_slot(
            root,
            "bias",
            Type::vtensor(&[4], DType::F32),
            splat(&[4], 1.0),
            false,
            loc(),
        );
        pb.add_submodule_slot(root, "sub", "Child", loc());
        pb.add_method(root, "forward", fwd_id, true, vec![], loc());
        pb.set_root(root);
        pb.finish()
    }

    #[test]
    fn flattens_two_level_tree() {
        let out = ObjectGraphFlattener::new(two_level_program()).run().unwrap();
        assert_eq!(out.stats.instances_flattened, 2);
        assert_eq!(out.stats.slots_created, 2);

        let mut program = out.program;
        assert!(program.hierarchy.is_none());
        let names: Vec<&str> = program.globals.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"bias"));
        assert!(names.contains(&"sub.weight"));

        let fwd = program.find_function("forward").expect("root method keeps its bare name");
        assert!(program.function(fwd).is_public());
        let sub_fwd = program.find_function("sub.forward").expect("child method is path-qualified");
        assert!(!program.function(sub_fwd).is_public());

        // The call lost its receiver and targets the qualified name.
        let f = program.function(fwd);
        let call = f
            .blocks
            .iter()
            .flat_map(|b| &b.ops)
            .find(|&&op| matches!(f.op(op).kind, OpKind::Call(_)))
            .copied()
            .expect("call survives");
        assert_eq!(f.op(call).kind, OpKind::Call("sub.forward".into()));
        assert_eq!(f.op(call).operands.len(), 1);

        program.compact().unwrap();
        verify_program(&program, &VerifyConfig::flattened()).unwrap();
    }

    #[test]
    fn shared_submodule_is_rejected() {
        let mut pb = ProgramBuilder::new();
        let shared = pb.declare_class("Shared", loc());
        pb.add_data_slot(shared, "w", Type::vtensor(&[2], DType::F32), splat(&[2], 0.0), false, loc());
        let root = pb.declare_class("Root", loc());
        pb.add_submodule_slot(root, "a", "Shared", loc());
        pb.add_submodule_slot(root, "b", "Shared", loc());
        pb.set_root(root);

        let err = ObjectGraphFlattener::new(pb.finish()).run().unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::Aliasing);
        assert!(err.message.contains("more than once"));
    }

    #[test]
    fn recursive_instantiation_is_rejected() {
        let mut pb = ProgramBuilder::new();
        let root = pb.declare_class("Root", loc());
        pb.add_submodule_slot(root, "inner", "Root", loc());
        pb.set_root(root);

        let err = ObjectGraphFlattener::new(pb.finish()).run().unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::Aliasing);
        assert!(err.message.contains("recursively"));
    }

    #[test]
    fn missing_initializer_is_rejected() {
        use tensile_core::hierarchy::{ClassDecl, ObjectGraph, SlotDecl};
        let mut root = ClassDecl::new("Root", loc());
        root.slots.push(SlotDecl {
            name: "w".into(),
            ty: Type::vtensor(&[2], DType::F32),
            initializer: None,
            mutable: false,
            loc: loc(),
        });
        let mut program = Program::new();
        program.hierarchy = Some(ObjectGraph { classes: vec![root], root: ClassId::new(0) });

        let err = ObjectGraphFlattener::new(program).run().unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::Structural);
        assert!(err.message.contains("no initializer"));
    }

    #[test]
    fn mutable_tensor_slot_reads_as_reference() {
        let mut pb = ProgramBuilder::new();

        let mut step = FuncBuilder::new("Root::step", Visibility::Private, loc());
        let root_self = step.param(Type::Class("Root".into()));
        step.results(vec![]);
        let acc = step.op1(
            OpKind::GetSlot("acc".into()),
            vec![root_self],
            Type::Tensor(TensorMeta::concrete(&[2], DType::F32)),
            loc(),
        );
        let snap = step.op1(OpKind::ToValue, vec![acc], Type::vtensor(&[2], DType::F32), loc());
        step.op(OpKind::SetSlot("acc".into()), vec![root_self, snap], vec![], loc());
        step.ret(vec![], loc());
        let step_id = pb.add_function(step.finish());

        let root = pb.declare_class("Root", loc());
        pb.add_data_slot(root, "acc", Type::vtensor(&[2], DType::F32), splat(&[2], 0.0), true, loc());
        pb.add_method(root, "step", step_id, true, vec![], loc());
        pb.set_root(root);

        let out = ObjectGraphFlattener::new(pb.finish()).run().unwrap();
        let mut program = out.program;
        let step = program.find_function("step").unwrap();
        let f = program.function(step);
        let kinds: Vec<_> = f.blocks[0].ops.iter().map(|&op| f.op(op).kind.opcode()).collect();
        assert!(kinds.contains(&tensile_core::ir::Opcode::GlobalGet));
        assert!(kinds.contains(&tensile_core::ir::Opcode::GlobalSet));

        program.compact().unwrap();
        verify_program(&program, &VerifyConfig::flattened()).unwrap();
    }

    #[test]
    fn argument_refinements_narrow_public_params() {
        let mut pb = ProgramBuilder::new();
        let mut fwd = FuncBuilder::new("Root::forward", Visibility::Private, loc());
        let _self_param = fwd.param(Type::Class("Root".into()));
        let x = fwd.param(Type::vtensor_unknown());
        fwd.results(vec![Type::vtensor_unknown()]);
        let y = fwd.op1(OpKind::Relu, vec![x], Type::vtensor_unknown(), loc());
        fwd.ret(vec![y], loc());
        let fwd_id = pb.add_function(fwd.finish());

        let root = pb.declare_class("Root", loc());
        pb.add_method(
            root,
            "forward",
            fwd_id,
            true,
            vec![Some(TensorMeta::concrete(&[8], DType::F32))],
            loc(),
        );
        pb.set_root(root);

        let out = ObjectGraphFlattener::new(pb.finish()).run().unwrap();
        let program = out.program;
        let fwd = program.find_function("forward").unwrap();
        let f = program.function(fwd);
        assert_eq!(f.param_types(), vec![Type::vtensor(&[8], DType::F32)]);
    }
}
