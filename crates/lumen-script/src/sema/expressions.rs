//! Expression typing and binding resolution.

use rustc_hash::FxHashSet;

use super::analyzer::{Analyzer, GenericEnv};
use super::symbols::GlobalSymbol;
use super::types::{Primitive, SymbolType, TypeId, TypeTable};
use crate::ast::*;
use crate::lexer::Span;

impl Analyzer<'_> {
    /// Types `expr`, annotating it and everything below it.
    ///
    /// `expected` is a hint used by untyped literals and array literals;
    /// callers still check assignability themselves.
    pub(super) fn expr(&mut self, expr: &mut Expression, expected: Option<TypeId>) -> TypeId {
        let span = expr.span;
        let ty = match &mut expr.kind {
            ExprKind::Literal(literal) => self.literal(literal, expected, span),
            ExprKind::Identifier(ident) => self.identifier(ident, span),
            ExprKind::Binary(binary) => self.binary(binary, expected, span),
            ExprKind::Unary(unary) => self.unary(unary, expected, span),
            ExprKind::Update(update) => {
                let ty = self.place(&mut update.argument);
                if ty != TypeTable::UNKNOWN && !self.unit.types.is_numeric(ty) {
                    let shown = self.unit.types.display(ty);
                    self.unit
                        .fatal(span, format!("cannot increment or decrement '{}'", shown));
                }
                ty
            }
            ExprKind::Assign(assign) => self.assign(assign),
            ExprKind::Call(call) => self.call(call, span),
            ExprKind::Member(member) => self.member(member, span),
            ExprKind::Index(index) => self.index(index, span),
            ExprKind::Cast(cast) => self.cast(cast, span),
            ExprKind::Array(elements) => self.array(elements, expected, span),
            ExprKind::New(new) => self.new_struct(new, span),
            ExprKind::Template(template) => self.template_value(template, span),
            ExprKind::Invalid => TypeTable::UNKNOWN,
        };
        expr.ty = Some(ty);
        ty
    }

    /// Types a branch or loop condition.
    pub(super) fn condition(&mut self, expr: &mut Expression) {
        let bool_ty = self.unit.types.primitive(Primitive::Bool);
        let ty = self.expr(expr, Some(bool_ty));
        if self.unit.types.is(ty, Primitive::Void) {
            self.unit.fatal(expr.span, "a void value cannot be used as a condition");
        }
    }

    fn prim(&self, prim: Primitive) -> TypeId {
        self.unit.types.primitive(prim)
    }

    // ========================================================================
    // Literals and names
    // ========================================================================

    fn literal(&mut self, literal: &Literal, expected: Option<TypeId>, span: Span) -> TypeId {
        match literal {
            Literal::Integer(value) => self.integer_type(*value, expected, span),
            Literal::Float(_) => {
                let wants_f32 = expected.is_some_and(|t| self.unit.types.is(t, Primitive::F32));
                self.prim(if wants_f32 { Primitive::F32 } else { Primitive::F64 })
            }
            Literal::String(_) => self.prim(Primitive::Str),
            Literal::Bool(_) => self.prim(Primitive::Bool),
            Literal::None => self.prim(Primitive::Any),
        }
    }

    /// Picks the type of an integer literal: the expected numeric type if
    /// there is one, else the smallest of `i32`, `i64`, `u64` that fits.
    fn integer_type(&mut self, value: i128, expected: Option<TypeId>, span: Span) -> TypeId {
        let wanted = expected
            .and_then(|t| self.unit.types.as_primitive(t))
            .filter(|p| p.is_numeric());
        match wanted {
            Some(prim) if prim.is_float() => self.prim(prim),
            Some(prim) => {
                if let Some((min, max)) = prim.int_range() {
                    if value < min || value > max {
                        self.unit.fatal(
                            span,
                            format!("literal {} is out of range for '{}'", value, prim.name()),
                        );
                    }
                }
                self.prim(prim)
            }
            None => {
                let prim = if i32::try_from(value).is_ok() {
                    Primitive::I32
                } else if i64::try_from(value).is_ok() {
                    Primitive::I64
                } else {
                    Primitive::U64
                };
                self.prim(prim)
            }
        }
    }

    fn identifier(&mut self, ident: &mut Identifier, span: Span) -> TypeId {
        if let Some(local) = self.ctx.scopes.lookup(&ident.name) {
            ident.binding = Some(Binding::Local(local.id));
            ident.constant = local.constant.clone();
            return local.ty;
        }

        match self.unit.symbols.get(&ident.name).cloned() {
            Some(GlobalSymbol::Variable {
                id, ty, constant, ..
            }) => {
                ident.binding = Some(Binding::Global(id));
                ident.constant = constant;
                ty
            }
            Some(GlobalSymbol::Function { id }) => {
                ident.binding = Some(Binding::Function(id));
                self.function_type(id)
            }
            Some(GlobalSymbol::Native { id, ty }) => {
                ident.binding = Some(Binding::Native(id));
                ty
            }
            Some(GlobalSymbol::GenericFunction(_)) => {
                self.unit.fatal(
                    span,
                    format!(
                        "generic function '{}' needs type arguments ('{}::<...>')",
                        ident.name, ident.name
                    ),
                );
                TypeTable::UNKNOWN
            }
            Some(GlobalSymbol::Type(_) | GlobalSymbol::GenericType(_)) => {
                self.unit
                    .fatal(span, format!("'{}' is a type, not a value", ident.name));
                TypeTable::UNKNOWN
            }
            None => {
                self.unit
                    .fatal(span, format!("undefined identifier '{}'", ident.name));
                TypeTable::UNKNOWN
            }
        }
    }

    fn function_type(&mut self, id: FunctionId) -> TypeId {
        let function = &self.functions[id.0 as usize];
        let (params, ret) = (function.params.clone(), function.ret);
        self.unit.types.function(params, ret)
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn binary(
        &mut self,
        binary: &mut BinaryExpression,
        expected: Option<TypeId>,
        span: Span,
    ) -> TypeId {
        let bool_ty = self.prim(Primitive::Bool);

        if binary.operator.is_logical() {
            for side in [&mut binary.left, &mut binary.right] {
                let ty = self.expr(side, Some(bool_ty));
                if ty != TypeTable::UNKNOWN && ty != bool_ty {
                    let shown = self.unit.types.display(ty);
                    self.unit.fatal(
                        side.span,
                        format!(
                            "operator '{}' expects 'bool', found '{}'",
                            binary.operator.symbol(),
                            shown
                        ),
                    );
                }
            }
            return bool_ty;
        }

        let hint = if binary.operator.is_comparison() {
            None
        } else {
            expected
        };
        let (left, right) = self.operands(&mut binary.left, &mut binary.right, hint);
        if left == TypeTable::UNKNOWN || right == TypeTable::UNKNOWN {
            return if binary.operator.is_comparison() {
                bool_ty
            } else {
                TypeTable::UNKNOWN
            };
        }

        match self.binary_result(binary.operator, left, right) {
            Some(ty) => ty,
            None => {
                self.operator_mismatch(binary.operator, left, right, span);
                if binary.operator.is_comparison() {
                    bool_ty
                } else {
                    TypeTable::UNKNOWN
                }
            }
        }
    }

    /// Types both operands so that an untyped literal adopts the type of
    /// the other side.
    fn operands(
        &mut self,
        left: &mut Expression,
        right: &mut Expression,
        hint: Option<TypeId>,
    ) -> (TypeId, TypeId) {
        if is_untyped_literal(left) && !is_untyped_literal(right) {
            let r = self.expr(right, hint);
            let l = self.expr(left, Some(r));
            (l, r)
        } else {
            let l = self.expr(left, hint);
            let r = self.expr(right, Some(l));
            (l, r)
        }
    }

    /// Result type of a non-logical binary operator, or `None` if the
    /// operand types do not support it.
    pub(super) fn binary_result(
        &self,
        operator: BinaryOperator,
        left: TypeId,
        right: TypeId,
    ) -> Option<TypeId> {
        use BinaryOperator::*;

        let types = &self.unit.types;
        let bool_ty = types.primitive(Primitive::Bool);
        let same = left == right;
        let integer = types.as_primitive(left).is_some_and(Primitive::is_integer);

        let ok = match operator {
            Eq | Ne => types.is_assignable(left, right) || types.is_assignable(right, left),
            Lt | Le | Gt | Ge => same && (types.is_numeric(left) || types.is_integral(left)),
            Add => same && (types.is_numeric(left) || types.is(left, Primitive::Str)),
            Sub | Mul | Div | Rem => same && types.is_numeric(left),
            BitAnd | BitOr | BitXor => same && (types.is_integral(left) || left == bool_ty),
            Shl | Shr => same && integer,
            And | Or => left == bool_ty && right == bool_ty,
        };

        match (ok, operator.is_comparison()) {
            (false, _) => None,
            (true, true) => Some(bool_ty),
            (true, false) => Some(left),
        }
    }

    fn operator_mismatch(&mut self, operator: BinaryOperator, left: TypeId, right: TypeId, span: Span) {
        let (l, r) = (self.unit.types.display(left), self.unit.types.display(right));
        self.unit.fatal(
            span,
            format!(
                "operator '{}' cannot be applied to '{}' and '{}'",
                operator.symbol(),
                l,
                r
            ),
        );
    }

    fn unary(&mut self, unary: &mut UnaryExpression, expected: Option<TypeId>, span: Span) -> TypeId {
        match unary.operator {
            UnaryOperator::Minus => {
                // `-128` must be range checked as a whole.
                if let ExprKind::Literal(Literal::Integer(value)) = unary.argument.kind {
                    let ty = self.integer_type(-value, expected, span);
                    unary.argument.ty = Some(ty);
                    return ty;
                }
                let ty = self.expr(&mut unary.argument, expected);
                self.require_unary(ty, "-", span, |types, t| types.is_numeric(t))
            }
            UnaryOperator::Not => {
                let bool_ty = self.prim(Primitive::Bool);
                let ty = self.expr(&mut unary.argument, Some(bool_ty));
                self.require_unary(ty, "!", span, |_, t| t == bool_ty)
            }
            UnaryOperator::BitNot => {
                let ty = self.expr(&mut unary.argument, expected);
                self.require_unary(ty, "~", span, |types, t| {
                    types.as_primitive(t).is_some_and(Primitive::is_integer)
                })
            }
        }
    }

    fn require_unary(
        &mut self,
        ty: TypeId,
        symbol: &str,
        span: Span,
        accepts: impl Fn(&TypeTable, TypeId) -> bool,
    ) -> TypeId {
        if ty == TypeTable::UNKNOWN || accepts(&self.unit.types, ty) {
            return ty;
        }
        let shown = self.unit.types.display(ty);
        self.unit.fatal(
            span,
            format!("operator '{}' cannot be applied to '{}'", symbol, shown),
        );
        TypeTable::UNKNOWN
    }

    // ========================================================================
    // Places and assignment
    // ========================================================================

    /// Types an assignment target and checks that it can be written.
    fn place(&mut self, target: &mut Expression) -> TypeId {
        let ty = self.expr(target, None);
        let span = target.span;
        match &target.kind {
            ExprKind::Identifier(ident) => {
                let mutable = match ident.binding {
                    Some(Binding::Local(_)) => self
                        .ctx
                        .scopes
                        .lookup(&ident.name)
                        .map(|local| local.mutable),
                    Some(Binding::Global(_)) => match self.unit.symbols.get(&ident.name) {
                        Some(GlobalSymbol::Variable { mutable, .. }) => Some(*mutable),
                        _ => None,
                    },
                    Some(Binding::Function(_) | Binding::Native(_)) => Some(false),
                    None => return ty,
                };
                if mutable == Some(false) {
                    self.unit
                        .fatal(span, format!("cannot assign to constant '{}'", ident.name));
                }
            }
            ExprKind::Member(member) => match member.access {
                Some(MemberAccess::Field(_)) | None => {}
                Some(_) => self.unit.fatal(
                    span,
                    format!("cannot assign to '{}'", member.property),
                ),
            },
            ExprKind::Index(_) => {}
            _ => self.unit.fatal(span, "invalid assignment target"),
        }
        ty
    }

    fn assign(&mut self, assign: &mut AssignExpression) -> TypeId {
        let target = self.place(&mut assign.target);
        let value = self.expr(&mut assign.value, Some(target));
        match assign.operator.binary() {
            None => {
                self.expect_assignable(value, target, assign.value.span);
            }
            Some(operator) => {
                if target != TypeTable::UNKNOWN
                    && value != TypeTable::UNKNOWN
                    && self.binary_result(operator, target, value).is_none()
                {
                    self.operator_mismatch(operator, target, value, assign.value.span);
                }
            }
        }
        target
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn call(&mut self, call: &mut CallExpression, span: Span) -> TypeId {
        let generic = match &call.callee.kind {
            ExprKind::Identifier(ident) if self.ctx.scopes.lookup(&ident.name).is_none() => {
                match self.unit.symbols.get(&ident.name) {
                    Some(GlobalSymbol::GenericFunction(template)) => Some(*template),
                    _ => None,
                }
            }
            _ => None,
        };
        if let Some(template) = generic {
            return self.generic_call(template, call, span);
        }

        let callee_ty = self.expr(&mut call.callee, None);
        let target = match &call.callee.kind {
            ExprKind::Identifier(Identifier {
                binding: Some(Binding::Function(id)),
                ..
            }) => CallTarget::Function(*id),
            ExprKind::Identifier(Identifier {
                binding: Some(Binding::Native(id)),
                ..
            }) => CallTarget::Native(*id),
            ExprKind::Template(TemplateExpression {
                function: Some(id), ..
            }) => CallTarget::Function(*id),
            _ => CallTarget::Indirect,
        };

        let SymbolType::Function { params, ret } = self.unit.types.get(callee_ty).clone() else {
            if callee_ty != TypeTable::UNKNOWN {
                let shown = self.unit.types.display(callee_ty);
                self.unit
                    .fatal(call.callee.span, format!("'{}' is not callable", shown));
            }
            for argument in &mut call.arguments {
                self.expr(argument, None);
            }
            return TypeTable::UNKNOWN;
        };

        self.arguments(&mut call.arguments, &params, span);
        call.target = Some(target);
        ret
    }

    fn arguments(&mut self, arguments: &mut [Expression], params: &[TypeId], span: Span) {
        if arguments.len() != params.len() {
            self.unit.fatal(
                span,
                format!(
                    "expected {} argument(s), found {}",
                    params.len(),
                    arguments.len()
                ),
            );
        }
        for (index, argument) in arguments.iter_mut().enumerate() {
            let expected = params.get(index).copied();
            let found = self.expr(argument, expected);
            if let Some(expected) = expected {
                self.expect_assignable(found, expected, argument.span);
            }
        }
    }

    /// Calls a generic function without explicit type arguments, inferring
    /// them from the argument types.
    fn generic_call(&mut self, template: usize, call: &mut CallExpression, span: Span) -> TypeId {
        let decl = self.fn_templates[template].clone();
        if call.arguments.len() != decl.params.len() {
            self.unit.fatal(
                span,
                format!(
                    "'{}' expects {} argument(s), found {}",
                    decl.name,
                    decl.params.len(),
                    call.arguments.len()
                ),
            );
            for argument in &mut call.arguments {
                self.expr(argument, None);
            }
            return TypeTable::UNKNOWN;
        }

        let mut bound = GenericEnv::default();
        for (param, argument) in decl.params.iter().zip(call.arguments.iter_mut()) {
            if mentions(&param.proto, &decl.type_params) {
                let found = self.expr(argument, None);
                self.unify(&param.proto, found, &decl.type_params, &mut bound);
            } else {
                let expected = self.resolve_proto_in(&param.proto, &GenericEnv::default());
                self.expr(argument, Some(expected));
            }
        }

        let mut args = Vec::with_capacity(decl.type_params.len());
        for name in &decl.type_params {
            match bound.get(name) {
                Some(ty) => args.push(*ty),
                None => {
                    self.unit.fatal(
                        span,
                        format!(
                            "cannot infer type argument '{}' of '{}'",
                            name, decl.name
                        ),
                    );
                    return TypeTable::UNKNOWN;
                }
            }
        }

        let Some(id) = self.instantiate_function(template, args, span) else {
            return TypeTable::UNKNOWN;
        };
        let function = &self.functions[id.0 as usize];
        let (params, ret) = (function.params.clone(), function.ret);
        for (argument, expected) in call.arguments.iter().zip(&params) {
            let found = argument.ty.unwrap_or(TypeTable::UNKNOWN);
            self.expect_assignable(found, *expected, argument.span);
        }

        if let ExprKind::Identifier(ident) = &mut call.callee.kind {
            ident.binding = Some(Binding::Function(id));
        }
        call.callee.ty = Some(self.unit.types.function(params, ret));
        call.target = Some(CallTarget::Function(id));
        ret
    }

    fn template_value(&mut self, template: &mut TemplateExpression, span: Span) -> TypeId {
        let index = match self.unit.symbols.get(&template.name) {
            Some(GlobalSymbol::GenericFunction(index)) => *index,
            _ => {
                self.unit.fatal(
                    span,
                    format!("'{}' is not a generic function", template.name),
                );
                return TypeTable::UNKNOWN;
            }
        };
        let args = template
            .args
            .iter()
            .map(|proto| self.resolve_proto(proto))
            .collect();
        let Some(id) = self.instantiate_function(index, args, span) else {
            return TypeTable::UNKNOWN;
        };
        template.function = Some(id);
        self.function_type(id)
    }

    // ========================================================================
    // Aggregates
    // ========================================================================

    fn member(&mut self, member: &mut MemberExpression, span: Span) -> TypeId {
        if let Some(enum_ty) = self.enum_named(&member.object) {
            member.object.ty = Some(enum_ty);
            let SymbolType::Enum(e) = self.unit.types.get(enum_ty) else {
                return TypeTable::UNKNOWN;
            };
            return match e.members.iter().find(|(name, _)| *name == member.property) {
                Some((_, value)) => {
                    member.access = Some(MemberAccess::EnumMember(*value));
                    enum_ty
                }
                None => {
                    let name = e.name.clone();
                    self.unit.fatal(
                        span,
                        format!("enum '{}' has no member '{}'", name, member.property),
                    );
                    TypeTable::UNKNOWN
                }
            };
        }

        let object = self.expr(&mut member.object, None);
        let i32_ty = self.prim(Primitive::I32);
        let resolved = match self.unit.types.get(object) {
            SymbolType::Unknown => return TypeTable::UNKNOWN,
            SymbolType::Array(_) if member.property == "len" => {
                Some((MemberAccess::ArrayLength, i32_ty))
            }
            SymbolType::Primitive(Primitive::Str) if member.property == "len" => {
                Some((MemberAccess::StringLength, i32_ty))
            }
            SymbolType::Aggregate(agg) => agg
                .field_index(&member.property)
                .map(|index| (MemberAccess::Field(index as u16), agg.fields[index].ty)),
            _ => None,
        };
        match resolved {
            Some((access, ty)) => {
                member.access = Some(access);
                ty
            }
            None => {
                let shown = self.unit.types.display(object);
                self.unit.fatal(
                    span,
                    format!("type '{}' has no member '{}'", shown, member.property),
                );
                TypeTable::UNKNOWN
            }
        }
    }

    /// Returns the enum type if `object` is a bare enum name.
    fn enum_named(&self, object: &Expression) -> Option<TypeId> {
        let ExprKind::Identifier(ident) = &object.kind else {
            return None;
        };
        if self.ctx.scopes.lookup(&ident.name).is_some() {
            return None;
        }
        match self.unit.symbols.get(&ident.name) {
            Some(GlobalSymbol::Type(id))
                if matches!(self.unit.types.get(*id), SymbolType::Enum(_)) =>
            {
                Some(*id)
            }
            _ => None,
        }
    }

    fn index(&mut self, index: &mut IndexExpression, span: Span) -> TypeId {
        let object = self.expr(&mut index.object, None);
        let i32_ty = self.prim(Primitive::I32);
        let position = self.expr(&mut index.index, Some(i32_ty));
        if position != TypeTable::UNKNOWN && !self.unit.types.is_integral(position) {
            let shown = self.unit.types.display(position);
            self.unit.fatal(
                index.index.span,
                format!("array index must be an integer, found '{}'", shown),
            );
        }
        match self.unit.types.element(object) {
            Some(element) => element,
            None if object == TypeTable::UNKNOWN => TypeTable::UNKNOWN,
            None => {
                let shown = self.unit.types.display(object);
                self.unit
                    .fatal(span, format!("type '{}' cannot be indexed", shown));
                TypeTable::UNKNOWN
            }
        }
    }

    fn cast(&mut self, cast: &mut CastExpression, span: Span) -> TypeId {
        let target = self.resolve_proto(&cast.proto);
        let source = self.expr(&mut cast.expression, None);
        if !self.castable(source, target) {
            let (from, to) = (
                self.unit.types.display(source),
                self.unit.types.display(target),
            );
            self.unit
                .fatal(span, format!("cannot cast '{}' to '{}'", from, to));
        }
        target
    }

    fn castable(&self, from: TypeId, to: TypeId) -> bool {
        let types = &self.unit.types;
        let scalar = |t: TypeId| types.is_numeric(t) || types.is_integral(t) || types.is(t, Primitive::Bool);
        from == to
            || from == TypeTable::UNKNOWN
            || to == TypeTable::UNKNOWN
            || (scalar(from) && scalar(to))
            || types.is(from, Primitive::Any)
            || types.is(to, Primitive::Any)
            || types.extends(from, to)
            || types.extends(to, from)
    }

    fn array(&mut self, elements: &mut [Expression], expected: Option<TypeId>, span: Span) -> TypeId {
        let mut element = expected.and_then(|t| self.unit.types.element(t));
        for item in elements.iter_mut() {
            let found = self.expr(item, element);
            match element {
                Some(expected) => {
                    self.expect_assignable(found, expected, item.span);
                }
                None => {
                    self.require_value_type(found, item.span);
                    element = Some(found);
                }
            }
        }
        match element {
            Some(element) => self.unit.types.array_of(element),
            None => {
                self.unit
                    .fatal(span, "cannot infer the element type of an empty array");
                TypeTable::UNKNOWN
            }
        }
    }

    fn new_struct(&mut self, new: &mut NewExpression, span: Span) -> TypeId {
        let ty = self.resolve_proto(&new.proto);
        let Some(agg) = self.unit.types.as_aggregate(ty).cloned() else {
            if ty != TypeTable::UNKNOWN {
                let shown = self.unit.types.display(ty);
                self.unit
                    .fatal(span, format!("'{}' is not a struct type", shown));
            }
            for field in &mut new.fields {
                self.expr(&mut field.value, None);
            }
            return TypeTable::UNKNOWN;
        };

        let mut seen = FxHashSet::default();
        for field in &mut new.fields {
            match agg.field_index(&field.name) {
                Some(index) => {
                    if !seen.insert(index) {
                        self.unit.fatal(
                            field.span,
                            format!("field '{}' is initialized twice", field.name),
                        );
                    }
                    field.index = Some(index);
                    let expected = agg.fields[index].ty;
                    let found = self.expr(&mut field.value, Some(expected));
                    self.expect_assignable(found, expected, field.value.span);
                }
                None => {
                    let shown = self.unit.types.display(ty);
                    self.unit.fatal(
                        field.span,
                        format!("struct '{}' has no field '{}'", shown, field.name),
                    );
                    self.expr(&mut field.value, None);
                }
            }
        }
        new.fields.sort_by_key(|field| field.index.unwrap_or(usize::MAX));
        ty
    }
}

/// Numeric literal whose type is still open.
fn is_untyped_literal(expr: &Expression) -> bool {
    match &expr.kind {
        ExprKind::Literal(Literal::Integer(_) | Literal::Float(_)) => true,
        ExprKind::Unary(UnaryExpression {
            operator: UnaryOperator::Minus,
            argument,
        }) => is_untyped_literal(argument),
        _ => false,
    }
}

/// Returns true if `proto` refers to any of the type parameters.
fn mentions(proto: &Prototype, params: &[String]) -> bool {
    match &proto.kind {
        PrototypeKind::Named { name, args } => {
            (args.is_empty() && params.contains(name)) || args.iter().any(|a| mentions(a, params))
        }
        PrototypeKind::Function { params: ps, ret } => {
            ps.iter().any(|p| mentions(p, params))
                || ret.as_ref().is_some_and(|r| mentions(r, params))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::*;
    use crate::diagnostics::Severity;
    use crate::lexer::Scanner;
    use crate::parser::Parser;
    use crate::sema::{Analyzer, Module, Primitive};
    use crate::unit::CompilationUnit;

    fn analyze(src: &str) -> (Module, CompilationUnit) {
        let mut unit = CompilationUnit::new("test.lm");
        let stream = Scanner::analyze(src, &mut unit);
        let program = Parser::parse(stream, &mut unit);
        let module = Analyzer::analyze(program, &mut unit);
        (module, unit)
    }

    fn fatal(src: &str) -> String {
        let (_, unit) = analyze(src);
        unit.diagnostics()
            .iter()
            .find(|d| d.severity == Severity::Fatal)
            .map(|d| d.message.clone())
            .unwrap_or_else(|| panic!("expected a fatal diagnostic for {:?}", src))
    }

    fn ok(src: &str) -> (Module, CompilationUnit) {
        let (module, unit) = analyze(src);
        assert!(!unit.has_fatal(), "{:#?}", unit.diagnostics());
        (module, unit)
    }

    /// Type of the initializer of the first `let` in the initializer.
    fn init_type(src: &str) -> String {
        let (module, unit) = ok(src);
        let Some(Statement::Let(decl)) = module.functions[0].body.first() else {
            panic!("expected let");
        };
        unit.types.display(decl.init.as_ref().unwrap().ty.unwrap())
    }

    #[test]
    fn test_literal_defaults_and_adoption() {
        assert_eq!(init_type("let a = 1;"), "i32");
        assert_eq!(init_type("let a = 1.5;"), "f64");
        assert_eq!(init_type("let a = 5000000000;"), "i64");
        assert_eq!(init_type("let a: u8 = 200;"), "u8");
        assert_eq!(init_type("let a: f32 = 2;"), "f32");
        assert_eq!(init_type("let a: i8 = -128;"), "i8");
    }

    #[test]
    fn test_literal_adopts_other_operand() {
        let (module, unit) = ok("let x: u16 = 3; let y = 1 + x;");
        let Statement::Let(decl) = &module.functions[0].body[1] else {
            panic!("expected let");
        };
        assert_eq!(unit.types.display(decl.ty.unwrap()), "u16");
    }

    #[test]
    fn test_literal_out_of_range() {
        assert!(fatal("let a: u8 = 256;").contains("out of range"));
        assert!(fatal("let a: u8 = -1;").contains("out of range"));
    }

    #[test]
    fn test_undefined_identifier() {
        assert_eq!(fatal("let a = b;"), "undefined identifier 'b'");
    }

    #[test]
    fn test_type_mismatch() {
        assert!(fatal("let a: i32 = \"s\";").contains("type mismatch"));
        assert!(fatal("let a = 1 + 2.0;").contains("cannot be applied"));
        assert!(fatal("let a = true && 1;").contains("expects 'bool'"));
    }

    #[test]
    fn test_string_concat_and_len() {
        assert_eq!(init_type("let s = \"a\" + \"b\";"), "string");
        assert_eq!(init_type("let n = \"abc\".len;"), "i32");
    }

    #[test]
    fn test_const_assignment_is_fatal() {
        assert!(fatal("const a = 1; a = 2;").contains("cannot assign to constant 'a'"));
        assert!(fatal("fn f() { const a = 1; a++; }").contains("constant"));
    }

    #[test]
    fn test_const_literal_is_recorded() {
        let (module, _) = ok("fn f() -> i32 { const k = 7; return k; }");
        let Statement::Return(ret) = &module.functions[1].body[1] else {
            panic!("expected return");
        };
        let ExprKind::Identifier(ident) = &ret.argument.as_ref().unwrap().kind else {
            panic!("expected identifier");
        };
        assert_eq!(ident.constant, Some(Literal::Integer(7)));
    }

    #[test]
    fn test_calls_resolve_targets() {
        let (module, _) = ok("fn add(a: i32, b: i32) -> i32 { return a + b; } let r = add(1, 2);");
        let Statement::Let(decl) = &module.functions[0].body[0] else {
            panic!("expected let");
        };
        let ExprKind::Call(call) = &decl.init.as_ref().unwrap().kind else {
            panic!("expected call");
        };
        assert_eq!(call.target, Some(CallTarget::Function(FunctionId(1))));
    }

    #[test]
    fn test_call_arity() {
        assert!(fatal("fn f(a: i32) {} f();").contains("expected 1 argument(s), found 0"));
    }

    #[test]
    fn test_indirect_call_through_function_value() {
        let (module, _) = ok(
            "fn twice(x: i32) -> i32 { return x * 2; } \
             fn apply(f: fn(i32) -> i32, v: i32) -> i32 { return f(v); } \
             let r = apply(twice, 4);",
        );
        let Statement::Return(ret) = &module.functions[2].body[0] else {
            panic!("expected return");
        };
        let ExprKind::Call(call) = &ret.argument.as_ref().unwrap().kind else {
            panic!("expected call");
        };
        assert_eq!(call.target, Some(CallTarget::Indirect));
    }

    #[test]
    fn test_generic_inference_and_instances() {
        let (module, _) = ok(
            "fn id<T>(x: T) -> T { return x; } \
             let a = id(5); let b = id(2.5); let c = id::<i32>(7);",
        );
        // init + id<i32> + id<f64>; the explicit id::<i32> reuses the instance.
        assert_eq!(module.functions.len(), 3);
        let names: Vec<_> = module.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["<init>", "id<i32>", "id<f64>"]);
    }

    #[test]
    fn test_generic_inference_failure() {
        assert!(fatal("fn make<T>() -> T { return none; } let a = make();").contains("cannot infer"));
    }

    #[test]
    fn test_generic_struct_instantiation() {
        let (_, unit) = ok(
            "struct Box<T> { value: T; } \
             let b = new Box<i32> { value: 3 }; \
             let v: i32 = b.value;",
        );
        let id = unit.types.find_aggregate("Box", &[unit.types.primitive(Primitive::I32)]);
        assert!(id.is_some());
    }

    #[test]
    fn test_new_struct_fields() {
        assert!(fatal("struct P { x: i32; } let p = new P { y: 1 };").contains("no field 'y'"));
        assert!(fatal("struct P { x: i32; } let p = new P { x: 1, x: 2 };").contains("twice"));
        let (module, _) = ok("struct P { x: i32; y: i32; } let p = new P { y: 1, x: 2 };");
        let Statement::Let(decl) = &module.functions[0].body[0] else {
            panic!("expected let");
        };
        let ExprKind::New(new) = &decl.init.as_ref().unwrap().kind else {
            panic!("expected new");
        };
        assert_eq!(new.fields[0].name, "x");
    }

    #[test]
    fn test_enum_member_access() {
        let (module, _) = ok("enum Color { Red, Green = 4 } let c = Color.Green;");
        let Statement::Let(decl) = &module.functions[0].body[0] else {
            panic!("expected let");
        };
        let ExprKind::Member(member) = &decl.init.as_ref().unwrap().kind else {
            panic!("expected member");
        };
        assert_eq!(member.access, Some(MemberAccess::EnumMember(4)));
        assert!(fatal("enum Color { Red } let c = Color.Blue;").contains("no member 'Blue'"));
    }

    #[test]
    fn test_arrays() {
        assert_eq!(init_type("let a = [1, 2, 3];"), "array<i32>");
        assert_eq!(init_type("let a: array<u8> = [1, 2];"), "array<u8>");
        assert!(fatal("let a = [];").contains("empty array"));
        assert!(fatal("let a = [1, true];").contains("type mismatch"));
    }

    #[test]
    fn test_casts() {
        assert_eq!(init_type("let a = 3.7 as i32;"), "i32");
        assert!(fatal("struct P { x: i32; } let p = new P { x: 1 }; let b = p as i32;")
            .contains("cannot cast"));
    }

    #[test]
    fn test_derived_struct_is_assignable_to_base() {
        ok("struct Shape { x: f32; } struct Circle : Shape { r: f32; } \
            fn area(s: Shape) -> f32 { return s.x; } \
            let c = new Circle { x: 1.0, r: 2.0 }; let a = area(c);");
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!(fatal("let a: Foo = none;"), "unknown type 'Foo'");
    }
}
