//! Expression compilation.
//!
//! Every expression leaves exactly one value on the stack, except calls of
//! `void` functions, which leave none. Assignments and updates in statement
//! position are compiled by [`Compiler::effect`] and leave nothing either.
//!
//! ## Places
//!
//! | Place | Read | Write |
//! |-------|------|-------|
//! | local | `LoadLocal` | `StoreLocal` |
//! | global | `LoadGlobal` | `StoreGlobal` |
//! | `s.f` | `GetField` | `SetField` (struct, value) |
//! | `a[i]` | `GetIndex` | `SetIndex` (array, index, value) |
//!
//! `SetField` and `SetIndex` consume their operands, so when the stored
//! value is also the expression's result it is parked in a scratch register
//! and reloaded.

use super::{CResult, CodegenError, Compiler};
use crate::ast::*;
use crate::bytecode::{Instruction, StaticObject};
use crate::optimizer::literal_value;
use crate::runtime::{ArithOp, Tag, Value};

/// Scratch register for values that must survive a field or element store.
const SCRATCH_REGISTER: u8 = 2;

/// A resolved assignment target.
enum Place {
    Local(u16),
    Global(u32),
    Field(u16),
    Element,
}

impl Compiler<'_> {
    /// Compiles an expression for its value.
    pub(super) fn expression(&mut self, expr: &Expression) -> CResult<()> {
        match &expr.kind {
            ExprKind::Literal(literal) => self.literal(literal, expr)?,
            ExprKind::Identifier(ident) => self.identifier(ident)?,
            ExprKind::Binary(binary) => self.binary(binary)?,
            ExprKind::Unary(unary) => {
                self.expression(&unary.argument)?;
                self.emit(match unary.operator {
                    UnaryOperator::Minus => Instruction::Neg,
                    UnaryOperator::Not => Instruction::Not,
                    UnaryOperator::BitNot => Instruction::BitNot,
                });
            }
            ExprKind::Update(update) => self.update(update, expr, true)?,
            ExprKind::Assign(assign) => self.assign(assign, true)?,
            ExprKind::Call(call) => self.call(call)?,
            ExprKind::Member(member) => match member.access {
                Some(MemberAccess::Field(index)) => {
                    self.expression(&member.object)?;
                    self.emit(Instruction::GetField(index));
                }
                Some(MemberAccess::ArrayLength | MemberAccess::StringLength) => {
                    self.expression(&member.object)?;
                    self.emit(Instruction::Len);
                }
                Some(MemberAccess::EnumMember(value)) => {
                    self.emit(Instruction::Push(Value::I32(value as i32)));
                }
                None => return Err(self.unresolved("member access")),
            },
            ExprKind::Index(index) => {
                self.expression(&index.object)?;
                self.expression(&index.index)?;
                self.emit(Instruction::GetIndex);
            }
            ExprKind::Cast(cast) => {
                self.expression(&cast.expression)?;
                let target = expr.ty.and_then(|ty| self.types.tag(ty));
                let source = cast.expression.ty.and_then(|ty| self.types.tag(ty));
                match target {
                    Some(tag) if source != Some(tag) => {
                        self.emit(Instruction::Convert(tag));
                    }
                    _ => {}
                }
            }
            ExprKind::Array(elements) => {
                let count = u16::try_from(elements.len())
                    .map_err(|_| CodegenError::TooManyElements(self.function.clone()))?;
                for element in elements {
                    self.expression(element)?;
                }
                self.emit(Instruction::NewArray(count));
            }
            ExprKind::New(new) => self.new_struct(new, expr)?,
            ExprKind::Template(template) => {
                let id = template
                    .function
                    .ok_or_else(|| self.unresolved("generic instance"))?;
                let id = self.function_static(id);
                self.emit(Instruction::LoadStatic(id));
            }
            ExprKind::Invalid => return Err(self.unresolved("expression")),
        }
        Ok(())
    }

    /// Compiles an expression for its side effects only.
    pub(super) fn effect(&mut self, expr: &Expression) -> CResult<()> {
        match &expr.kind {
            ExprKind::Assign(assign) => self.assign(assign, false),
            ExprKind::Update(update) => self.update(update, expr, false),
            _ => {
                self.expression(expr)?;
                if !self.is_void(expr.ty) {
                    self.emit(Instruction::Pop);
                }
                Ok(())
            }
        }
    }

    fn literal(&mut self, literal: &Literal, expr: &Expression) -> CResult<()> {
        let value = match literal {
            Literal::String(s) => {
                let id = self.build.intern(StaticObject::String(s.clone()));
                self.emit(Instruction::LoadStatic(id));
                return Ok(());
            }
            Literal::Bool(b) => Value::Bool(*b),
            Literal::None => Value::None,
            Literal::Integer(_) | Literal::Float(_) => {
                let tag = expr
                    .ty
                    .and_then(|ty| self.types.tag(ty))
                    .ok_or_else(|| self.unresolved("literal type"))?;
                literal_value(literal, tag).ok_or_else(|| self.unresolved("literal type"))?
            }
        };
        self.emit(Instruction::Push(value));
        Ok(())
    }

    fn identifier(&mut self, ident: &Identifier) -> CResult<()> {
        let instruction = match ident.binding {
            Some(Binding::Local(id)) => Instruction::LoadLocal(self.local_slot(id)?),
            Some(Binding::Global(id)) => Instruction::LoadGlobal(id.0),
            Some(Binding::Function(id)) => Instruction::LoadStatic(self.function_static(id)),
            Some(Binding::Native(id)) => Instruction::LoadStatic(self.native_static(id)),
            None => return Err(self.unresolved("identifier")),
        };
        self.emit(instruction);
        Ok(())
    }

    fn local_slot(&self, id: LocalId) -> CResult<u16> {
        self.scope.slot(id).ok_or_else(|| self.unresolved("local"))
    }

    fn binary(&mut self, binary: &BinaryExpression) -> CResult<()> {
        match binary.operator {
            BinaryOperator::And | BinaryOperator::Or => {
                // The left value is the result when it decides the outcome.
                let end = self.new_label();
                self.expression(&binary.left)?;
                self.emit(Instruction::Dup);
                if binary.operator == BinaryOperator::And {
                    self.emit(Instruction::TestZero);
                }
                self.emit(Instruction::JumpIfTrue(end));
                self.emit(Instruction::Pop);
                self.expression(&binary.right)?;
                self.place(end);
            }
            operator => {
                self.expression(&binary.left)?;
                self.expression(&binary.right)?;
                let instruction = match (operator.arith(), operator.compare()) {
                    (Some(op), _) => Instruction::Arith(op),
                    (_, Some(op)) => Instruction::Compare(op),
                    (None, None) => return Err(self.unresolved("operator")),
                };
                self.emit(instruction);
            }
        }
        Ok(())
    }

    fn call(&mut self, call: &CallExpression) -> CResult<()> {
        let argc = u8::try_from(call.arguments.len())
            .map_err(|_| CodegenError::TooManyArguments(self.function.clone()))?;
        let target = call.target.ok_or_else(|| self.unresolved("call target"))?;
        if target == CallTarget::Indirect {
            self.expression(&call.callee)?;
        }
        for argument in &call.arguments {
            self.expression(argument)?;
        }
        self.emit(match target {
            CallTarget::Function(id) => Instruction::Call {
                function: self.function_static(id),
                argc,
            },
            CallTarget::Native(id) => Instruction::Call {
                function: self.native_static(id),
                argc,
            },
            CallTarget::Indirect => Instruction::CallValue(argc),
        });
        Ok(())
    }

    fn new_struct(&mut self, new: &NewExpression, expr: &Expression) -> CResult<()> {
        let ty = expr.ty.ok_or_else(|| self.unresolved("struct type"))?;
        let aggregate = self
            .types
            .as_aggregate(ty)
            .ok_or_else(|| self.unresolved("struct type"))?;
        let members: Vec<_> = aggregate.fields.iter().map(|f| f.name.clone()).collect();
        let field_types: Vec<_> = aggregate.fields.iter().map(|f| f.ty).collect();

        for (slot, field_ty) in field_types.into_iter().enumerate() {
            match new.fields.iter().find(|init| init.index == Some(slot)) {
                Some(init) => self.expression(&init.value)?,
                None => self.default_value(field_ty),
            }
        }
        let descriptor = self.build.intern(StaticObject::Aggregate {
            name: self.types.display(ty),
            members,
        });
        self.emit(Instruction::NewStruct(descriptor));
        Ok(())
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    /// Pushes the operands a place needs before its value (struct, or array
    /// and index) and resolves it.
    fn place_operands(&mut self, target: &Expression) -> CResult<Place> {
        match &target.kind {
            ExprKind::Identifier(ident) => match ident.binding {
                Some(Binding::Local(id)) => Ok(Place::Local(self.local_slot(id)?)),
                Some(Binding::Global(id)) => Ok(Place::Global(id.0)),
                _ => Err(self.unresolved("assignment target")),
            },
            ExprKind::Member(member) => match member.access {
                Some(MemberAccess::Field(index)) => {
                    self.expression(&member.object)?;
                    Ok(Place::Field(index))
                }
                _ => Err(self.unresolved("assignment target")),
            },
            ExprKind::Index(index) => {
                self.expression(&index.object)?;
                self.expression(&index.index)?;
                Ok(Place::Element)
            }
            _ => Err(self.unresolved("assignment target")),
        }
    }

    /// Reads the current value of a place whose operands are on the stack,
    /// keeping the operands.
    fn read_place(&mut self, place: &Place) {
        match *place {
            Place::Local(slot) => {
                self.emit(Instruction::LoadLocal(slot));
            }
            Place::Global(id) => {
                self.emit(Instruction::LoadGlobal(id));
            }
            Place::Field(index) => {
                self.emit(Instruction::Dup);
                self.emit(Instruction::GetField(index));
            }
            Place::Element => {
                self.emit(Instruction::Dup2);
                self.emit(Instruction::GetIndex);
            }
        }
    }

    /// Stores the top value into a place, optionally leaving it as the result.
    fn write_place(&mut self, place: &Place, keep: bool) {
        match *place {
            Place::Local(slot) => {
                if keep {
                    self.emit(Instruction::Dup);
                }
                self.emit(Instruction::StoreLocal(slot));
            }
            Place::Global(id) => {
                if keep {
                    self.emit(Instruction::Dup);
                }
                self.emit(Instruction::StoreGlobal(id));
            }
            Place::Field(_) | Place::Element => {
                if keep {
                    self.emit(Instruction::Dup);
                    self.emit(Instruction::StoreReg(SCRATCH_REGISTER));
                }
                self.emit(match *place {
                    Place::Field(index) => Instruction::SetField(index),
                    _ => Instruction::SetIndex,
                });
                if keep {
                    self.emit(Instruction::LoadReg(SCRATCH_REGISTER));
                }
            }
        }
    }

    fn assign(&mut self, assign: &AssignExpression, keep: bool) -> CResult<()> {
        let place = self.place_operands(&assign.target)?;
        match assign.operator.binary().and_then(BinaryOperator::arith) {
            Some(op) => {
                self.read_place(&place);
                self.expression(&assign.value)?;
                self.emit(Instruction::Arith(op));
            }
            None => self.expression(&assign.value)?,
        }
        self.write_place(&place, keep);
        Ok(())
    }

    fn update(&mut self, update: &UpdateExpression, expr: &Expression, keep: bool) -> CResult<()> {
        let one = expr
            .ty
            .and_then(|ty| self.types.tag(ty))
            .and_then(unit_value)
            .ok_or_else(|| self.unresolved("update operand type"))?;
        let op = match update.operator {
            UpdateOperator::Increment => ArithOp::Add,
            UpdateOperator::Decrement => ArithOp::Sub,
        };

        let place = self.place_operands(&update.argument)?;
        self.read_place(&place);
        if keep && !update.prefix {
            // Park the old value; the store below consumes the new one.
            self.park(&place);
            self.emit(Instruction::Push(one));
            self.emit(Instruction::Arith(op));
            self.write_place(&place, false);
            self.unpark(&place);
        } else {
            self.emit(Instruction::Push(one));
            self.emit(Instruction::Arith(op));
            self.write_place(&place, keep);
        }
        Ok(())
    }

    /// Keeps a copy of the top value for after a store.
    fn park(&mut self, place: &Place) {
        match place {
            Place::Local(_) | Place::Global(_) => {
                // Stays on the stack below the new value.
                self.emit(Instruction::Dup);
            }
            Place::Field(_) | Place::Element => {
                self.emit(Instruction::Dup);
                self.emit(Instruction::StoreReg(SCRATCH_REGISTER));
            }
        }
    }

    fn unpark(&mut self, place: &Place) {
        if matches!(place, Place::Field(_) | Place::Element) {
            self.emit(Instruction::LoadReg(SCRATCH_REGISTER));
        }
    }
}

/// The value `1` of a numeric tag.
fn unit_value(tag: Tag) -> Option<Value> {
    if tag.is_integer() {
        Value::from_i128(tag, 1)
    } else if tag.is_float() {
        Value::from_f64(tag, 1.0)
    } else {
        None
    }
}
