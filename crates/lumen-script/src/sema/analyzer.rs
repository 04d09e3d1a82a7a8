//! Declaration passes, statement checking and module assembly.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use super::scope::{Declared, LocalSymbol, ScopeArena};
use super::symbols::GlobalSymbol;
use super::types::{EnumType, Primitive, SymbolType, TypeId, TypeTable};
use super::{FunctionInstance, GlobalInfo, Module, NativeInfo};
use crate::ast::*;
use crate::lexer::Span;
use crate::optimizer::{literal_value, value_literal};
use crate::unit::CompilationUnit;

/// Type parameter bindings active while resolving a generic body.
pub(super) type GenericEnv = FxHashMap<String, TypeId>;

/// A function body waiting to be analyzed.
pub(super) struct PendingBody {
    pub id: FunctionId,
    pub decl: FunctionDeclaration,
    pub env: GenericEnv,
}

/// Per-function analysis state.
#[derive(Default)]
pub(super) struct FunctionContext {
    pub ret: TypeId,
    pub scopes: ScopeArena,
    pub next_local: u32,
    pub loops: u32,
    pub env: GenericEnv,
    pub is_init: bool,
}

/// The semantic analyzer.
pub struct Analyzer<'u> {
    pub(super) unit: &'u mut CompilationUnit,
    pub(super) functions: Vec<FunctionInstance>,
    pub(super) globals: Vec<GlobalInfo>,
    pub(super) natives: Vec<NativeInfo>,
    pub(super) fn_templates: Vec<FunctionDeclaration>,
    pub(super) struct_templates: Vec<StructDeclaration>,
    /// Generic function instances by template and arguments
    pub(super) instances: FxHashMap<(usize, Vec<TypeId>), FunctionId>,
    /// Where each aggregate's fields come from
    pub(super) aggregate_sources: FxHashMap<TypeId, (usize, GenericEnv)>,
    pub(super) defining: FxHashSet<TypeId>,
    pub(super) defined: FxHashSet<TypeId>,
    pub(super) pending: VecDeque<PendingBody>,
    pub(super) ctx: FunctionContext,
}

impl<'u> Analyzer<'u> {
    /// Creates an analyzer reporting into `unit`.
    pub fn new(unit: &'u mut CompilationUnit) -> Self {
        let void = unit.types.primitive(Primitive::Void);
        Self {
            unit,
            functions: vec![FunctionInstance {
                name: "<init>".to_string(),
                params: Vec::new(),
                ret: void,
                body: Vec::new(),
                is_init: true,
                span: Span::default(),
            }],
            globals: Vec::new(),
            natives: Vec::new(),
            fn_templates: Vec::new(),
            struct_templates: Vec::new(),
            instances: FxHashMap::default(),
            aggregate_sources: FxHashMap::default(),
            defining: FxHashSet::default(),
            defined: FxHashSet::default(),
            pending: VecDeque::new(),
            ctx: FunctionContext::default(),
        }
    }

    /// Analyzes `program` with no host declarations.
    pub fn analyze(program: Program, unit: &mut CompilationUnit) -> Module {
        Analyzer::new(unit).run(program)
    }

    /// Declares a host function. `proto` must be a function prototype.
    pub fn declare_native(&mut self, name: &str, proto: &Prototype) -> Option<NativeId> {
        let ty = self.resolve_proto(proto);
        let SymbolType::Function { params, ret } = self.unit.types.get(ty).clone() else {
            self.unit
                .fatal(proto.span, format!("native '{}' must have a function prototype", name));
            return None;
        };
        let id = NativeId(self.natives.len() as u32);
        if let Err(previous) = self
            .unit
            .symbols
            .declare(name, GlobalSymbol::Native { id, ty }, proto.span)
        {
            self.duplicate(name, proto.span, previous);
            return None;
        }
        self.natives.push(NativeInfo {
            name: name.to_string(),
            params,
            ret,
        });
        Some(id)
    }

    /// Declares a host-supplied global variable.
    pub fn declare_native_global(
        &mut self,
        name: &str,
        proto: &Prototype,
        mutable: bool,
    ) -> Option<GlobalId> {
        let ty = self.resolve_proto(proto);
        let id = GlobalId(self.globals.len() as u32);
        let symbol = GlobalSymbol::Variable {
            id,
            ty,
            mutable,
            constant: None,
        };
        if let Err(previous) = self.unit.symbols.declare(name, symbol, proto.span) {
            self.duplicate(name, proto.span, previous);
            return None;
        }
        self.globals.push(GlobalInfo {
            name: name.to_string(),
            ty,
            mutable,
            native: true,
        });
        Some(id)
    }

    /// Runs every pass and assembles the module.
    pub fn run(mut self, program: Program) -> Module {
        let mut concrete = Vec::new();
        let mut struct_ids = Vec::new();
        let mut init_body = Vec::new();

        // Pass 1: make every module-level type and function name known.
        for item in program.body {
            match item {
                Statement::Function(decl) => {
                    if let Some(id) = self.declare_function(&decl) {
                        concrete.push((id, decl));
                    } else if !decl.type_params.is_empty() {
                        self.fn_templates.push(decl);
                    }
                }
                Statement::Struct(decl) => {
                    if let Some(id) = self.declare_struct(decl) {
                        struct_ids.push(id);
                    }
                }
                Statement::Enum(decl) => self.declare_enum(&decl),
                other => init_body.push(other),
            }
        }

        // Pass 2: struct layouts and function signatures.
        for id in struct_ids {
            self.ensure_defined(id);
        }
        for (id, decl) in concrete {
            let env = GenericEnv::default();
            let (params, ret) = self.signature(&decl, &env);
            let function = &mut self.functions[id.0 as usize];
            function.params = params;
            function.ret = ret;
            self.pending.push_back(PendingBody { id, decl, env });
        }

        // Pass 3: the module initializer, which declares the globals.
        self.ctx = FunctionContext {
            ret: self.unit.types.primitive(Primitive::Void),
            is_init: true,
            ..FunctionContext::default()
        };
        self.ctx.scopes.open();
        for statement in &mut init_body {
            self.statement(statement);
        }
        self.functions[0].body = init_body;

        // Pass 4: function bodies, including instances requested on the way.
        while let Some(pending) = self.pending.pop_front() {
            self.function_body(pending);
        }

        debug!(
            functions = self.functions.len(),
            globals = self.globals.len(),
            natives = self.natives.len(),
            types = self.unit.types.len(),
            "analyzed module"
        );

        Module {
            functions: self.functions,
            globals: self.globals,
            natives: self.natives,
        }
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    /// Declares a function name. Returns the id of a non-generic function.
    fn declare_function(&mut self, decl: &FunctionDeclaration) -> Option<FunctionId> {
        if !decl.type_params.is_empty() {
            let symbol = GlobalSymbol::GenericFunction(self.fn_templates.len());
            if let Err(previous) = self.unit.symbols.declare(&decl.name, symbol, decl.span) {
                self.duplicate(&decl.name, decl.span, previous);
            }
            return None;
        }
        let id = FunctionId(self.functions.len() as u32);
        let symbol = GlobalSymbol::Function { id };
        if let Err(previous) = self.unit.symbols.declare(&decl.name, symbol, decl.span) {
            self.duplicate(&decl.name, decl.span, previous);
            return None;
        }
        self.functions.push(FunctionInstance {
            name: decl.name.clone(),
            params: Vec::new(),
            ret: TypeTable::UNKNOWN,
            body: Vec::new(),
            is_init: false,
            span: decl.span,
        });
        Some(id)
    }

    fn declare_struct(&mut self, decl: StructDeclaration) -> Option<TypeId> {
        let index = self.struct_templates.len();
        let (symbol, id) = if decl.type_params.is_empty() {
            let id = self.unit.types.intern(SymbolType::Aggregate(super::AggregateType {
                name: decl.name.clone(),
                args: Vec::new(),
                base: None,
                fields: Vec::new(),
            }));
            (GlobalSymbol::Type(id), Some(id))
        } else {
            (GlobalSymbol::GenericType(index), None)
        };
        if let Err(previous) = self.unit.symbols.declare(&decl.name, symbol, decl.span) {
            self.duplicate(&decl.name, decl.span, previous);
            return None;
        }
        if let Some(id) = id {
            self.aggregate_sources.insert(id, (index, GenericEnv::default()));
        }
        self.struct_templates.push(decl);
        id
    }

    /// Declares an enum, numbering members without initializers from the
    /// previous member's value plus one. Values are `i32`.
    fn declare_enum(&mut self, decl: &EnumDeclaration) {
        let mut members: Vec<(String, i64)> = Vec::new();
        let mut next: i64 = 0;

        for member in &decl.members {
            if members.iter().any(|(name, _)| *name == member.name) {
                self.unit.fatal(
                    member.span,
                    format!("duplicate enumerator '{}' in '{}'", member.name, decl.name),
                );
                continue;
            }
            let value = match &member.initializer {
                None => next,
                Some(init) => match enum_constant(init) {
                    Some(value) => value,
                    None => {
                        self.unit.error(
                            member.span,
                            format!(
                                "initializer of enumerator '{}' is not a constant; using {}",
                                member.name, next
                            ),
                        );
                        next
                    }
                },
            };
            let value = if i32::try_from(value).is_ok() {
                value
            } else {
                let fallback = i64::from(next as i32);
                self.unit.error(
                    member.span,
                    format!(
                        "value {} of enumerator '{}' does not fit in i32; using {}",
                        value, member.name, fallback
                    ),
                );
                fallback
            };
            members.push((member.name.clone(), value));
            next = value.wrapping_add(1);
        }

        let id = self.unit.types.intern(SymbolType::Enum(EnumType {
            name: decl.name.clone(),
            members,
        }));
        if let Err(previous) = self
            .unit
            .symbols
            .declare(&decl.name, GlobalSymbol::Type(id), decl.span)
        {
            self.duplicate(&decl.name, decl.span, previous);
        }
    }

    /// Resolves a function's parameter and return types under `env`.
    pub(super) fn signature(
        &mut self,
        decl: &FunctionDeclaration,
        env: &GenericEnv,
    ) -> (Vec<TypeId>, TypeId) {
        let params = decl
            .params
            .iter()
            .map(|param| {
                let ty = self.resolve_proto_in(&param.proto, env);
                self.require_value_type(ty, param.span);
                ty
            })
            .collect();
        let ret = match &decl.return_type {
            Some(proto) => self.resolve_proto_in(proto, env),
            None => self.unit.types.primitive(Primitive::Void),
        };
        (params, ret)
    }

    fn function_body(&mut self, pending: PendingBody) {
        let PendingBody { id, mut decl, env } = pending;
        let function = &self.functions[id.0 as usize];
        let params = function.params.clone();

        self.ctx = FunctionContext {
            ret: function.ret,
            env,
            ..FunctionContext::default()
        };

        self.ctx.scopes.open();
        for (param, ty) in decl.params.iter().zip(params) {
            self.declare_local(&param.name, ty, true, None, param.span);
        }
        self.ctx.scopes.open();
        for statement in &mut decl.body.body {
            self.statement(statement);
        }
        self.ctx.scopes.close();
        self.ctx.scopes.close();

        self.functions[id.0 as usize].body = decl.body.body;
    }

    // ========================================================================
    // Statements
    // ========================================================================

    pub(super) fn statement(&mut self, statement: &mut Statement) {
        match statement {
            Statement::Function(decl) => self.nested_declaration(&decl.name, decl.span),
            Statement::Struct(decl) => self.nested_declaration(&decl.name, decl.span),
            Statement::Enum(decl) => self.nested_declaration(&decl.name, decl.span),
            Statement::Let(decl) => self.let_statement(decl),
            Statement::Expression(stmt) => {
                self.expr(&mut stmt.expression, None);
            }
            Statement::Block(block) => self.scoped_block(&mut block.body),
            Statement::If(stmt) => {
                self.condition(&mut stmt.test);
                self.scoped(&mut stmt.consequent);
                if let Some(alternate) = &mut stmt.alternate {
                    self.scoped(alternate);
                }
            }
            Statement::While(stmt) => {
                self.condition(&mut stmt.test);
                self.ctx.loops += 1;
                self.scoped(&mut stmt.body);
                self.ctx.loops -= 1;
            }
            Statement::For(stmt) => {
                self.ctx.scopes.open();
                if let Some(init) = &mut stmt.init {
                    self.statement(init);
                }
                if let Some(test) = &mut stmt.test {
                    self.condition(test);
                }
                if let Some(update) = &mut stmt.update {
                    self.expr(update, None);
                }
                self.ctx.loops += 1;
                self.scoped(&mut stmt.body);
                self.ctx.loops -= 1;
                self.ctx.scopes.close();
            }
            Statement::Break(span) => self.loop_exit("break", *span),
            Statement::Continue(span) => self.loop_exit("continue", *span),
            Statement::Return(stmt) => self.return_statement(stmt),
            Statement::Throw(stmt) => {
                let ty = self.expr(&mut stmt.argument, None);
                if self.unit.types.is(ty, Primitive::Void) {
                    self.unit.fatal(stmt.argument.span, "cannot throw a void value");
                }
            }
            Statement::Try(stmt) => {
                self.scoped_block(&mut stmt.block.body);
                if let Some(handler) = &mut stmt.handler {
                    self.ctx.scopes.open();
                    if let Some(name) = &handler.param {
                        let any = self.unit.types.primitive(Primitive::Any);
                        let name = name.clone();
                        handler.local = Some(self.declare_local(&name, any, true, None, handler.span));
                    }
                    self.scoped_block(&mut handler.body.body);
                    self.ctx.scopes.close();
                }
            }
            Statement::Empty(_) | Statement::Invalid(_) => {}
        }
    }

    fn loop_exit(&mut self, keyword: &str, span: Span) {
        if self.ctx.loops == 0 {
            self.unit
                .fatal(span, format!("'{}' outside of a loop", keyword));
        }
    }

    fn nested_declaration(&mut self, name: &str, span: Span) {
        self.unit.fatal(
            span,
            format!("'{}' must be declared at module level", name),
        );
    }

    fn scoped(&mut self, statement: &mut Statement) {
        self.ctx.scopes.open();
        match statement {
            Statement::Block(block) => {
                for statement in &mut block.body {
                    self.statement(statement);
                }
            }
            other => self.statement(other),
        }
        self.ctx.scopes.close();
    }

    fn scoped_block(&mut self, body: &mut [Statement]) {
        self.ctx.scopes.open();
        for statement in body {
            self.statement(statement);
        }
        self.ctx.scopes.close();
    }

    fn let_statement(&mut self, decl: &mut LetStatement) {
        let declared = decl.proto.as_ref().map(|proto| self.resolve_proto(proto));
        if let Some(ty) = declared {
            self.require_value_type(ty, decl.span);
        }

        let ty = match (declared, &mut decl.init) {
            (Some(ty), Some(init)) => {
                let found = self.expr(init, Some(ty));
                self.expect_assignable(found, ty, init.span);
                ty
            }
            (Some(ty), None) => {
                if !decl.mutable {
                    self.unit.fatal(
                        decl.span,
                        format!("constant '{}' must be initialized", decl.name),
                    );
                }
                ty
            }
            (None, Some(init)) => {
                let found = self.expr(init, None);
                if self.unit.types.is(found, Primitive::Void) {
                    self.unit.fatal(
                        init.span,
                        format!("cannot initialize '{}' with a void value", decl.name),
                    );
                    TypeTable::UNKNOWN
                } else {
                    found
                }
            }
            (None, None) => {
                self.unit.fatal(
                    decl.span,
                    format!("cannot infer the type of '{}' without an initializer", decl.name),
                );
                TypeTable::UNKNOWN
            }
        };

        let constant = if decl.mutable {
            None
        } else {
            decl.init
                .as_ref()
                .and_then(|init| init.as_literal())
                .and_then(|literal| self.converted_constant(literal, ty))
        };
        decl.ty = Some(ty);

        if self.ctx.is_init && self.ctx.scopes.depth() == 1 {
            let id = GlobalId(self.globals.len() as u32);
            let symbol = GlobalSymbol::Variable {
                id,
                ty,
                mutable: decl.mutable,
                constant,
            };
            if let Err(previous) = self.unit.symbols.declare(&decl.name, symbol, decl.span) {
                self.duplicate(&decl.name, decl.span, previous);
                return;
            }
            self.globals.push(GlobalInfo {
                name: decl.name.clone(),
                ty,
                mutable: decl.mutable,
                native: false,
            });
            decl.target = Some(VarTarget::Global(id));
        } else {
            let id = self.declare_local(&decl.name, ty, decl.mutable, constant, decl.span);
            decl.target = Some(VarTarget::Local(id));
        }
    }

    fn return_statement(&mut self, stmt: &mut ReturnStatement) {
        let ret = self.ctx.ret;
        let returns_void = self.unit.types.is(ret, Primitive::Void);
        match &mut stmt.argument {
            Some(argument) => {
                let found = self.expr(argument, Some(ret));
                if returns_void {
                    self.unit
                        .fatal(argument.span, "a void function cannot return a value");
                } else {
                    self.expect_assignable(found, ret, argument.span);
                }
            }
            None if !returns_void => {
                let expected = self.unit.types.display(ret);
                self.unit.fatal(
                    stmt.span,
                    format!("missing return value of type '{}'", expected),
                );
            }
            None => {}
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Declares a local in the innermost scope and returns its slot id.
    pub(super) fn declare_local(
        &mut self,
        name: &str,
        ty: TypeId,
        mutable: bool,
        constant: Option<Literal>,
        span: Span,
    ) -> LocalId {
        let id = LocalId(self.ctx.next_local);
        self.ctx.next_local += 1;
        let symbol = LocalSymbol {
            id,
            ty,
            mutable,
            constant,
            span,
        };
        match self.ctx.scopes.declare(name, symbol) {
            Declared::Fresh => {}
            Declared::Shadows(previous) => self.unit.warning(
                span,
                format!(
                    "'{}' shadows a variable declared at line {}",
                    name, previous.line
                ),
            ),
            Declared::Duplicate(previous) => self.duplicate(name, span, previous),
        }
        id
    }

    pub(super) fn duplicate(&mut self, name: &str, span: Span, previous: Span) {
        self.unit.fatal(
            span,
            format!(
                "duplicate declaration of '{}' (first declared at line {})",
                name, previous.line
            ),
        );
    }

    /// The literal a constant of type `ty` holds at runtime.
    fn converted_constant(&self, literal: &Literal, ty: TypeId) -> Option<Literal> {
        match literal {
            Literal::String(_) => Some(literal.clone()),
            _ => literal_value(literal, self.unit.types.tag(ty)?).and_then(value_literal),
        }
    }

    pub(super) fn require_value_type(&mut self, ty: TypeId, span: Span) {
        if self.unit.types.is(ty, Primitive::Void) {
            self.unit.fatal(span, "'void' is not a value type");
        }
    }

    /// Reports a mismatch unless `found` may be stored as `expected`.
    pub(super) fn expect_assignable(&mut self, found: TypeId, expected: TypeId, span: Span) -> bool {
        if self.unit.types.is_assignable(found, expected) {
            return true;
        }
        let (expected, found) = (
            self.unit.types.display(expected),
            self.unit.types.display(found),
        );
        self.unit.fatal(
            span,
            format!("type mismatch: expected '{}', found '{}'", expected, found),
        );
        false
    }
}

/// Value of an enum initializer that is a literal integer constant.
fn enum_constant(init: &Expression) -> Option<i64> {
    match &init.kind {
        ExprKind::Literal(Literal::Integer(v)) => i64::try_from(*v).ok(),
        ExprKind::Unary(UnaryExpression {
            operator: UnaryOperator::Minus,
            argument,
        }) => match &argument.kind {
            ExprKind::Literal(Literal::Integer(v)) => i64::try_from(-*v).ok(),
            _ => None,
        },
        _ => None,
    }
}
