//! Prototype resolution and generic instantiation.
//!
//! A generic declaration is never analyzed as written. Each distinct list of
//! type arguments clones the declaration and resolves it again with the type
//! parameters bound, producing an ordinary struct type or function.

use super::analyzer::{Analyzer, GenericEnv, PendingBody};
use super::symbols::GlobalSymbol;
use super::types::{AggregateType, Field, Primitive, SymbolType, TypeId, TypeTable};
use super::FunctionInstance;
use crate::ast::{FunctionId, Prototype, PrototypeKind};
use crate::lexer::Span;

impl Analyzer<'_> {
    /// Resolves a prototype under the current function's type bindings.
    pub(super) fn resolve_proto(&mut self, proto: &Prototype) -> TypeId {
        let env = std::mem::take(&mut self.ctx.env);
        let ty = self.resolve_proto_in(proto, &env);
        self.ctx.env = env;
        ty
    }

    /// Resolves a prototype to a type, reporting unknown names.
    pub(super) fn resolve_proto_in(&mut self, proto: &Prototype, env: &GenericEnv) -> TypeId {
        match &proto.kind {
            PrototypeKind::Function { params, ret } => {
                let params = params
                    .iter()
                    .map(|p| self.resolve_proto_in(p, env))
                    .collect();
                let ret = match ret {
                    Some(ret) => self.resolve_proto_in(ret, env),
                    None => self.unit.types.primitive(Primitive::Void),
                };
                self.unit.types.function(params, ret)
            }
            PrototypeKind::Named { name, args } => {
                let resolved: Vec<TypeId> =
                    args.iter().map(|a| self.resolve_proto_in(a, env)).collect();
                self.resolve_named(name, resolved, env, proto.span)
            }
        }
    }

    fn resolve_named(
        &mut self,
        name: &str,
        args: Vec<TypeId>,
        env: &GenericEnv,
        span: Span,
    ) -> TypeId {
        if let Some(bound) = env.get(name) {
            if args.is_empty() {
                return *bound;
            }
            return self.arity_error(name, 0, args.len(), span);
        }
        if let Some(prim) = Primitive::from_name(name) {
            if args.is_empty() {
                return self.unit.types.primitive(prim);
            }
            return self.arity_error(name, 0, args.len(), span);
        }
        if name == "array" {
            return match args.as_slice() {
                [element] => self.unit.types.array_of(*element),
                _ => self.arity_error(name, 1, args.len(), span),
            };
        }
        match self.unit.symbols.get(name).cloned() {
            Some(GlobalSymbol::Type(id)) => {
                if args.is_empty() {
                    id
                } else {
                    self.arity_error(name, 0, args.len(), span)
                }
            }
            Some(GlobalSymbol::GenericType(template)) => {
                let expected = self.struct_templates[template].type_params.len();
                if args.len() != expected {
                    return self.arity_error(name, expected, args.len(), span);
                }
                self.instantiate_struct(template, args)
            }
            _ => {
                self.unit.fatal(span, format!("unknown type '{}'", name));
                TypeTable::UNKNOWN
            }
        }
    }

    fn arity_error(&mut self, name: &str, expected: usize, found: usize, span: Span) -> TypeId {
        self.unit.fatal(
            span,
            format!(
                "type '{}' takes {} type argument(s), found {}",
                name, expected, found
            ),
        );
        TypeTable::UNKNOWN
    }

    /// Returns the aggregate for `template<args>`, defining it on first use.
    fn instantiate_struct(&mut self, template: usize, args: Vec<TypeId>) -> TypeId {
        let name = self.struct_templates[template].name.clone();
        if let Some(id) = self.unit.types.find_aggregate(&name, &args) {
            return id;
        }
        let env: GenericEnv = self.struct_templates[template]
            .type_params
            .iter()
            .cloned()
            .zip(args.iter().copied())
            .collect();
        let id = self.unit.types.intern(SymbolType::Aggregate(AggregateType {
            name,
            args,
            base: None,
            fields: Vec::new(),
        }));
        self.aggregate_sources.insert(id, (template, env));
        self.ensure_defined(id);
        id
    }

    /// Resolves the base and fields of an aggregate, base first.
    pub(super) fn ensure_defined(&mut self, id: TypeId) {
        if self.defined.contains(&id) {
            return;
        }
        let Some((template, env)) = self.aggregate_sources.get(&id).cloned() else {
            return;
        };
        let decl = self.struct_templates[template].clone();
        if !self.defining.insert(id) {
            self.unit.fatal(
                decl.span,
                format!("'{}' inherits from itself", decl.name),
            );
            return;
        }

        let mut fields: Vec<Field> = Vec::new();
        let mut base = None;
        if let Some(proto) = &decl.base {
            let base_id = self.resolve_proto_in(proto, &env);
            if self.unit.types.as_aggregate(base_id).is_some() {
                self.ensure_defined(base_id);
                if let Some(agg) = self.unit.types.as_aggregate(base_id) {
                    fields.extend(agg.fields.iter().cloned());
                }
                base = Some(base_id);
            } else if base_id != TypeTable::UNKNOWN {
                let shown = self.unit.types.display(base_id);
                self.unit.fatal(
                    proto.span,
                    format!("'{}' cannot inherit from '{}'", decl.name, shown),
                );
            }
        }

        for field in &decl.fields {
            if fields.iter().any(|f| f.name == field.name) {
                self.unit.fatal(
                    field.span,
                    format!("duplicate field '{}' in '{}'", field.name, decl.name),
                );
                continue;
            }
            let ty = self.resolve_proto_in(&field.proto, &env);
            self.require_value_type(ty, field.span);
            fields.push(Field {
                name: field.name.clone(),
                ty,
            });
        }

        self.unit.types.define_aggregate(id, base, fields);
        self.defining.remove(&id);
        self.defined.insert(id);
    }

    /// Returns the function for `template<args>`, queueing its body on
    /// first use.
    pub(super) fn instantiate_function(
        &mut self,
        template: usize,
        args: Vec<TypeId>,
        span: Span,
    ) -> Option<FunctionId> {
        let decl = &self.fn_templates[template];
        if args.len() != decl.type_params.len() {
            let (name, expected) = (decl.name.clone(), decl.type_params.len());
            self.unit.fatal(
                span,
                format!(
                    "'{}' takes {} type argument(s), found {}",
                    name,
                    expected,
                    args.len()
                ),
            );
            return None;
        }
        let key = (template, args);
        if let Some(id) = self.instances.get(&key) {
            return Some(*id);
        }
        let (template, args) = key;

        let decl = self.fn_templates[template].clone();
        let env: GenericEnv = decl
            .type_params
            .iter()
            .cloned()
            .zip(args.iter().copied())
            .collect();
        let (params, ret) = self.signature(&decl, &env);

        let shown: Vec<String> = args.iter().map(|a| self.unit.types.display(*a)).collect();
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(FunctionInstance {
            name: format!("{}<{}>", decl.name, shown.join(", ")),
            params,
            ret,
            body: Vec::new(),
            is_init: false,
            span: decl.span,
        });
        self.instances.insert((template, args), id);
        self.pending.push_back(PendingBody { id, decl, env });
        Some(id)
    }

    /// Binds type parameters by matching a parameter prototype against the
    /// type of the corresponding argument.
    pub(super) fn unify(
        &self,
        proto: &Prototype,
        found: TypeId,
        params: &[String],
        bound: &mut GenericEnv,
    ) {
        let types = &self.unit.types;
        match &proto.kind {
            PrototypeKind::Named { name, args } => {
                if args.is_empty() && params.contains(name) {
                    bound.entry(name.clone()).or_insert(found);
                    return;
                }
                match types.get(found) {
                    SymbolType::Array(element) if name == "array" && args.len() == 1 => {
                        self.unify(&args[0], *element, params, bound);
                    }
                    SymbolType::Aggregate(agg) if agg.name == *name && agg.args.len() == args.len() => {
                        for (arg, ty) in args.iter().zip(agg.args.clone()) {
                            self.unify(arg, ty, params, bound);
                        }
                    }
                    _ => {}
                }
            }
            PrototypeKind::Function { params: protos, ret } => {
                if let SymbolType::Function { params: tys, ret: ret_ty } = types.get(found) {
                    for (p, t) in protos.iter().zip(tys.clone()) {
                        self.unify(p, t, params, bound);
                    }
                    if let Some(ret) = ret {
                        self.unify(ret, *ret_ty, params, bound);
                    }
                }
            }
        }
    }
}
