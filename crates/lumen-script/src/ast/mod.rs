//! Abstract Syntax Tree (AST) definitions.
//!
//! The tree is produced by the parser and then annotated in place by the
//! semantic analyzer: every [`Expression`] gains a resolved type, identifiers
//! gain a [`Binding`], calls a [`CallTarget`], and declarations the slot they
//! occupy. Later stages read those annotations and never re-resolve names.

use crate::lexer::Span;
use crate::runtime::{ArithOp, CompareOp};
use crate::sema::TypeId;

/// Index of a local variable slot inside one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(pub u32);

/// Index of a module-level variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(pub u32);

/// Index of a concrete function in the analyzed module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

/// Index of a declared native function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeId(pub u32);

/// A complete script.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    /// Top-level declarations and statements, in source order
    pub body: Vec<Statement>,
}

// ============================================================================
// Statements
// ============================================================================

/// A statement or declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `fn name<T>(params) -> ret { ... }`
    Function(FunctionDeclaration),
    /// `struct Name<T> : Base { field: proto; }`
    Struct(StructDeclaration),
    /// `enum Name { A, B = 5 }`
    Enum(EnumDeclaration),
    /// `let` / `const`
    Let(LetStatement),
    /// Expression followed by `;`
    Expression(ExpressionStatement),
    /// `{ ... }`
    Block(BlockStatement),
    /// `if (test) a else b`
    If(IfStatement),
    /// `while (test) body`
    While(WhileStatement),
    /// `for (init; test; update) body`
    For(ForStatement),
    /// `break;`
    Break(Span),
    /// `continue;`
    Continue(Span),
    /// `return expr?;`
    Return(ReturnStatement),
    /// `throw expr;`
    Throw(ThrowStatement),
    /// `try { } catch (e) { }`
    Try(TryStatement),
    /// `;`
    Empty(Span),
    /// Placeholder for a statement that failed to parse
    Invalid(Span),
}

impl Statement {
    /// Source span of the statement.
    pub fn span(&self) -> Span {
        match self {
            Statement::Function(s) => s.span,
            Statement::Struct(s) => s.span,
            Statement::Enum(s) => s.span,
            Statement::Let(s) => s.span,
            Statement::Expression(s) => s.span,
            Statement::Block(s) => s.span,
            Statement::If(s) => s.span,
            Statement::While(s) => s.span,
            Statement::For(s) => s.span,
            Statement::Return(s) => s.span,
            Statement::Throw(s) => s.span,
            Statement::Try(s) => s.span,
            Statement::Break(span)
            | Statement::Continue(span)
            | Statement::Empty(span)
            | Statement::Invalid(span) => *span,
        }
    }
}

/// A function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Parameter name
    pub name: String,
    /// Declared type
    pub proto: Prototype,
    /// Source span
    pub span: Span,
}

/// A function declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    /// Function name
    pub name: String,
    /// Generic parameter names
    pub type_params: Vec<String>,
    /// Parameters
    pub params: Vec<Parameter>,
    /// Declared return type; `void` when absent
    pub return_type: Option<Prototype>,
    /// Function body
    pub body: BlockStatement,
    /// Source span
    pub span: Span,
}

/// A struct field declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDeclaration {
    /// Field name
    pub name: String,
    /// Field type
    pub proto: Prototype,
    /// Source span
    pub span: Span,
}

/// A struct declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct StructDeclaration {
    /// Struct name
    pub name: String,
    /// Generic parameter names
    pub type_params: Vec<String>,
    /// Declared base type
    pub base: Option<Prototype>,
    /// Own fields (base fields are added by the analyzer)
    pub fields: Vec<FieldDeclaration>,
    /// Source span
    pub span: Span,
}

/// One enumerator.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumMember {
    /// Member name
    pub name: String,
    /// Explicit initializer
    pub initializer: Option<Expression>,
    /// Source span
    pub span: Span,
}

/// An enum declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumDeclaration {
    /// Enum name
    pub name: String,
    /// Members in source order
    pub members: Vec<EnumMember>,
    /// Source span
    pub span: Span,
}

/// Where a declared variable lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarTarget {
    /// Function-local slot
    Local(LocalId),
    /// Module-level slot
    Global(GlobalId),
}

/// `let` or `const` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct LetStatement {
    /// Variable name
    pub name: String,
    /// False for `const`
    pub mutable: bool,
    /// Declared type
    pub proto: Option<Prototype>,
    /// Initializer
    pub init: Option<Expression>,
    /// Source span
    pub span: Span,
    /// Resolved storage, set by the analyzer
    pub target: Option<VarTarget>,
    /// Resolved type, set by the analyzer
    pub ty: Option<TypeId>,
}

/// An expression evaluated for its effects.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionStatement {
    /// The expression
    pub expression: Expression,
    /// Source span
    pub span: Span,
}

/// A braced block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockStatement {
    /// Statements in order
    pub body: Vec<Statement>,
    /// Source span
    pub span: Span,
}

/// `if` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct IfStatement {
    /// Condition
    pub test: Expression,
    /// Then branch
    pub consequent: Box<Statement>,
    /// Else branch
    pub alternate: Option<Box<Statement>>,
    /// Source span
    pub span: Span,
}

/// `while` loop.
#[derive(Debug, Clone, PartialEq)]
pub struct WhileStatement {
    /// Condition
    pub test: Expression,
    /// Loop body
    pub body: Box<Statement>,
    /// Source span
    pub span: Span,
}

/// `for` loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ForStatement {
    /// `let` or expression statement run once
    pub init: Option<Box<Statement>>,
    /// Condition; absent means always true
    pub test: Option<Expression>,
    /// Expression run after each iteration
    pub update: Option<Expression>,
    /// Loop body
    pub body: Box<Statement>,
    /// Source span
    pub span: Span,
}

/// `return` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStatement {
    /// Returned value
    pub argument: Option<Expression>,
    /// Source span
    pub span: Span,
}

/// `throw` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrowStatement {
    /// Thrown value
    pub argument: Expression,
    /// Source span
    pub span: Span,
}

/// `catch` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    /// Name bound to the exception
    pub param: Option<String>,
    /// Handler body
    pub body: BlockStatement,
    /// Slot of the bound exception, set by the analyzer
    pub local: Option<LocalId>,
    /// Source span
    pub span: Span,
}

/// `try` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct TryStatement {
    /// Guarded block
    pub block: BlockStatement,
    /// Handler; without one the block runs unguarded
    pub handler: Option<CatchClause>,
    /// Source span
    pub span: Span,
}

// ============================================================================
// Prototypes (type annotations)
// ============================================================================

/// A type annotation, validated by the analyzer.
#[derive(Debug, Clone, PartialEq)]
pub struct Prototype {
    /// Shape of the annotation
    pub kind: PrototypeKind,
    /// Source span
    pub span: Span,
}

/// Shape of a type annotation.
#[derive(Debug, Clone, PartialEq)]
pub enum PrototypeKind {
    /// `name` or `name<args>`
    Named {
        /// Type name
        name: String,
        /// Generic arguments
        args: Vec<Prototype>,
    },
    /// `fn(params) -> ret`
    Function {
        /// Parameter types
        params: Vec<Prototype>,
        /// Return type
        ret: Option<Box<Prototype>>,
    },
}

impl Prototype {
    /// Builds a plain named prototype.
    pub fn named(name: impl Into<String>, span: Span) -> Self {
        Self {
            kind: PrototypeKind::Named {
                name: name.into(),
                args: Vec::new(),
            },
            span,
        }
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    /// Variant payload
    pub kind: ExprKind,
    /// Source span
    pub span: Span,
    /// Resolved type, set by the analyzer
    pub ty: Option<TypeId>,
}

impl Expression {
    /// Creates an unannotated expression.
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            span,
            ty: None,
        }
    }

    /// Returns the literal if this expression is one.
    pub fn as_literal(&self) -> Option<&Literal> {
        match &self.kind {
            ExprKind::Literal(lit) => Some(lit),
            _ => None,
        }
    }
}

/// Expression variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Literal value
    Literal(Literal),
    /// Name reference
    Identifier(Identifier),
    /// Binary operator
    Binary(BinaryExpression),
    /// Prefix unary operator
    Unary(UnaryExpression),
    /// `++` / `--`
    Update(UpdateExpression),
    /// `=` and compound assignment
    Assign(AssignExpression),
    /// Function call
    Call(CallExpression),
    /// `object.property`
    Member(MemberExpression),
    /// `object[index]`
    Index(IndexExpression),
    /// `expression as proto`
    Cast(CastExpression),
    /// `[a, b, c]`
    Array(Vec<Expression>),
    /// `new Type { field: value }`
    New(NewExpression),
    /// `name::<args>`
    Template(TemplateExpression),
    /// Placeholder for an expression that failed to parse
    Invalid,
}

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Integer, typed by context
    Integer(i128),
    /// Float, typed by context
    Float(f64),
    /// String
    String(String),
    /// Boolean
    Bool(bool),
    /// The empty value
    None,
}

/// What an identifier resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Function-local slot
    Local(LocalId),
    /// Module-level slot
    Global(GlobalId),
    /// Script function used as a value
    Function(FunctionId),
    /// Native function used as a value
    Native(NativeId),
}

/// An identifier reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Identifier {
    /// The name
    pub name: String,
    /// Resolution, set by the analyzer
    pub binding: Option<Binding>,
    /// Value of a `const` with a literal initializer
    pub constant: Option<Literal>,
}

impl Identifier {
    /// Creates an unresolved identifier.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binding: None,
            constant: None,
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `&&`
    And,
    /// `||`
    Or,
}

impl BinaryOperator {
    /// Returns true for comparison operators.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::Ne
                | BinaryOperator::Lt
                | BinaryOperator::Le
                | BinaryOperator::Gt
                | BinaryOperator::Ge
        )
    }

    /// Returns true for `&&` and `||`.
    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }

    /// Source symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Rem => "%",
            BinaryOperator::BitAnd => "&",
            BinaryOperator::BitOr => "|",
            BinaryOperator::BitXor => "^",
            BinaryOperator::Shl => "<<",
            BinaryOperator::Shr => ">>",
            BinaryOperator::Eq => "==",
            BinaryOperator::Ne => "!=",
            BinaryOperator::Lt => "<",
            BinaryOperator::Le => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::Ge => ">=",
            BinaryOperator::And => "&&",
            BinaryOperator::Or => "||",
        }
    }
}

/// Binary expression.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpression {
    /// Operator
    pub operator: BinaryOperator,
    /// Left operand
    pub left: Box<Expression>,
    /// Right operand
    pub right: Box<Expression>,
}

/// Prefix unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    /// `-`
    Minus,
    /// `!`
    Not,
    /// `~`
    BitNot,
}

/// Unary expression.
#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpression {
    /// Operator
    pub operator: UnaryOperator,
    /// Operand
    pub argument: Box<Expression>,
}

/// `++` or `--`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateOperator {
    /// `++`
    Increment,
    /// `--`
    Decrement,
}

/// Increment/decrement expression.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateExpression {
    /// Operator
    pub operator: UpdateOperator,
    /// True for `++x`, false for `x++`
    pub prefix: bool,
    /// Place being updated
    pub argument: Box<Expression>,
}

/// Assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignOperator {
    /// `=`
    Assign,
    /// `+=`
    Add,
    /// `-=`
    Sub,
    /// `*=`
    Mul,
    /// `/=`
    Div,
    /// `%=`
    Rem,
}

impl BinaryOperator {
    /// The runtime arithmetic operation, for non-comparison operators.
    pub fn arith(self) -> Option<ArithOp> {
        Some(match self {
            BinaryOperator::Add => ArithOp::Add,
            BinaryOperator::Sub => ArithOp::Sub,
            BinaryOperator::Mul => ArithOp::Mul,
            BinaryOperator::Div => ArithOp::Div,
            BinaryOperator::Rem => ArithOp::Rem,
            BinaryOperator::BitAnd => ArithOp::BitAnd,
            BinaryOperator::BitOr => ArithOp::BitOr,
            BinaryOperator::BitXor => ArithOp::BitXor,
            BinaryOperator::Shl => ArithOp::Shl,
            BinaryOperator::Shr => ArithOp::Shr,
            _ => return None,
        })
    }

    /// The runtime comparison, for comparison operators.
    pub fn compare(self) -> Option<CompareOp> {
        Some(match self {
            BinaryOperator::Eq => CompareOp::Eq,
            BinaryOperator::Ne => CompareOp::Ne,
            BinaryOperator::Lt => CompareOp::Lt,
            BinaryOperator::Le => CompareOp::Le,
            BinaryOperator::Gt => CompareOp::Gt,
            BinaryOperator::Ge => CompareOp::Ge,
            _ => return None,
        })
    }
}

impl AssignOperator {
    /// The binary operator a compound assignment applies.
    pub fn binary(self) -> Option<BinaryOperator> {
        Some(match self {
            AssignOperator::Assign => return None,
            AssignOperator::Add => BinaryOperator::Add,
            AssignOperator::Sub => BinaryOperator::Sub,
            AssignOperator::Mul => BinaryOperator::Mul,
            AssignOperator::Div => BinaryOperator::Div,
            AssignOperator::Rem => BinaryOperator::Rem,
        })
    }
}

/// Assignment expression.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignExpression {
    /// Operator
    pub operator: AssignOperator,
    /// Place being assigned
    pub target: Box<Expression>,
    /// New value
    pub value: Box<Expression>,
}

/// How a call is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    /// Direct call of a script function
    Function(FunctionId),
    /// Direct call of a native function
    Native(NativeId),
    /// Call through a function value
    Indirect,
}

/// Call expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpression {
    /// Callee
    pub callee: Box<Expression>,
    /// Arguments
    pub arguments: Vec<Expression>,
    /// Dispatch, set by the analyzer
    pub target: Option<CallTarget>,
}

/// Resolved meaning of a `.property` access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberAccess {
    /// Struct field by layout index
    Field(u16),
    /// `array.len`
    ArrayLength,
    /// `string.len`
    StringLength,
    /// `Enum.Member`
    EnumMember(i64),
}

/// Member access expression.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberExpression {
    /// Object
    pub object: Box<Expression>,
    /// Property name
    pub property: String,
    /// Resolution, set by the analyzer
    pub access: Option<MemberAccess>,
}

/// Index expression.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexExpression {
    /// Indexed array
    pub object: Box<Expression>,
    /// Index
    pub index: Box<Expression>,
}

/// Cast expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CastExpression {
    /// Converted value
    pub expression: Box<Expression>,
    /// Target type
    pub proto: Prototype,
}

/// One `field: value` in a `new` expression.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInit {
    /// Field name
    pub name: String,
    /// Value
    pub value: Expression,
    /// Layout index, set by the analyzer
    pub index: Option<usize>,
    /// Source span
    pub span: Span,
}

/// Struct construction.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExpression {
    /// Constructed type
    pub proto: Prototype,
    /// Field initializers; the analyzer sorts them into layout order
    pub fields: Vec<FieldInit>,
}

/// Explicit generic instantiation `name::<args>`.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateExpression {
    /// Generic function name
    pub name: String,
    /// Type arguments
    pub args: Vec<Prototype>,
    /// Instantiated function, set by the analyzer
    pub function: Option<FunctionId>,
}
