//! Statement compilation.
//!
//! | Statement | Key Operations | Notes |
//! |-----------|----------------|-------|
//! | `let` local | initializer | The pushed value becomes the slot |
//! | `let` global | `StoreGlobal` | Only in the module initializer |
//! | `if/else` | `TestZero`, `JumpIfTrue`, `Jump` | Specialized on known conditions |
//! | `while` / `for` | `TestZero`, `JumpIfTrue`, `Jump` (back) | Same specialization |
//! | `break/continue` | `TryEnd`*, `PopN`, `Jump` | Unwinds to the loop's depth |
//! | `return` | `TryEnd`*, `Ret` / `RetVoid` | The frame pops the locals |
//! | `throw` | `Throw` | |
//! | `try/catch` | `TryBegin`, `TryEnd`, `LoadReg 1` | Handler address is a label static |
//!
//! ## While Loop
//!
//! ```text
//! unknown condition        known true             known false
//! top:                     top:
//!   [condition]              [condition; Pop]?      [condition; Pop]?
//!   TestZero                 [body]
//!   JumpIfTrue break         PopN locals
//!   [body]                   Jump top
//!   PopN locals            break:
//!   Jump top
//! break:
//! ```
//!
//! The bracketed condition of a known loop is only emitted when it may have
//! side effects.

use super::{CResult, CodegenError, Compiler};
use crate::ast::*;
use crate::bytecode::{Instruction, StaticObject};
use crate::optimizer::Tribool;

/// Register the VM stores a caught exception in.
pub(super) const EXCEPTION_REGISTER: u8 = 1;

impl Compiler<'_> {
    pub(super) fn statement(&mut self, statement: &Statement) -> CResult<()> {
        match statement {
            Statement::Let(decl) => self.let_statement(decl)?,
            Statement::Expression(stmt) => self.effect(&stmt.expression)?,
            Statement::Block(block) => self.block(&block.body)?,
            Statement::If(stmt) => self.if_statement(stmt)?,
            Statement::While(stmt) => self.while_statement(stmt)?,
            Statement::For(stmt) => self.for_statement(stmt)?,
            Statement::Break(_) => self.loop_jump(true)?,
            Statement::Continue(_) => self.loop_jump(false)?,
            Statement::Return(stmt) => {
                if let Some(argument) = &stmt.argument {
                    self.expression(argument)?;
                }
                for _ in 0..self.scope.tries() {
                    self.emit(Instruction::TryEnd);
                }
                self.emit(match stmt.argument {
                    Some(_) => Instruction::Ret,
                    None => Instruction::RetVoid,
                });
            }
            Statement::Throw(stmt) => {
                self.expression(&stmt.argument)?;
                self.emit(Instruction::Throw);
            }
            Statement::Try(stmt) => self.try_statement(stmt)?,
            // Declarations are hoisted to module level by the analyzer.
            Statement::Function(_)
            | Statement::Struct(_)
            | Statement::Enum(_)
            | Statement::Empty(_)
            | Statement::Invalid(_) => {}
        }
        Ok(())
    }

    fn let_statement(&mut self, decl: &LetStatement) -> CResult<()> {
        match &decl.init {
            Some(init) => self.expression(init)?,
            None => {
                let ty = decl.ty.ok_or_else(|| self.unresolved("variable type"))?;
                self.default_value(ty);
            }
        }
        match decl.target {
            Some(VarTarget::Local(id)) => {
                self.scope
                    .declare(id)
                    .ok_or_else(|| CodegenError::TooManyLocals(self.function.clone()))?;
            }
            Some(VarTarget::Global(id)) => {
                self.emit(Instruction::StoreGlobal(id.0));
            }
            None => return Err(self.unresolved("variable")),
        }
        Ok(())
    }

    fn block(&mut self, body: &[Statement]) -> CResult<()> {
        self.scope.begin_block();
        for statement in body {
            self.statement(statement)?;
        }
        let count = self.scope.end_block();
        self.pop_locals(count);
        Ok(())
    }

    /// Compiles a branch or loop body in its own block.
    fn scoped(&mut self, statement: &Statement) -> CResult<()> {
        match statement {
            Statement::Block(block) => self.block(&block.body),
            other => self.block(std::slice::from_ref(other)),
        }
    }

    /// Evaluates a known condition only for its side effects.
    fn known_condition(&mut self, test: &Expression) -> CResult<()> {
        if test.may_have_side_effects() {
            self.effect(test)?;
        }
        Ok(())
    }

    fn if_statement(&mut self, stmt: &IfStatement) -> CResult<()> {
        match stmt.test.is_true() {
            Tribool::True => {
                self.known_condition(&stmt.test)?;
                self.scoped(&stmt.consequent)
            }
            Tribool::False => {
                self.known_condition(&stmt.test)?;
                match &stmt.alternate {
                    Some(alternate) => self.scoped(alternate),
                    None => Ok(()),
                }
            }
            Tribool::Unknown => {
                let otherwise = self.new_label();
                self.expression(&stmt.test)?;
                self.emit(Instruction::TestZero);
                self.emit(Instruction::JumpIfTrue(otherwise));
                self.scoped(&stmt.consequent)?;
                match &stmt.alternate {
                    Some(alternate) => {
                        let end = self.new_label();
                        self.emit(Instruction::Jump(end));
                        self.place(otherwise);
                        self.scoped(alternate)?;
                        self.place(end);
                    }
                    None => self.place(otherwise),
                }
                Ok(())
            }
        }
    }

    fn while_statement(&mut self, stmt: &WhileStatement) -> CResult<()> {
        self.conditional_loop(Some(&stmt.test), &stmt.body, None)
    }

    fn for_statement(&mut self, stmt: &ForStatement) -> CResult<()> {
        self.scope.begin_block();
        if let Some(init) = &stmt.init {
            self.statement(init)?;
        }
        self.conditional_loop(stmt.test.as_ref(), &stmt.body, stmt.update.as_ref())?;
        let count = self.scope.end_block();
        self.pop_locals(count);
        Ok(())
    }

    /// Shared `while`/`for` emission. A missing test is known true.
    fn conditional_loop(
        &mut self,
        test: Option<&Expression>,
        body: &Statement,
        update: Option<&Expression>,
    ) -> CResult<()> {
        let known = test.map_or(Tribool::True, Expression::is_true);
        if known == Tribool::False {
            if let Some(test) = test {
                self.known_condition(test)?;
            }
            return Ok(());
        }

        let top = self.new_label();
        let exit = self.new_label();
        let next = if update.is_some() { self.new_label() } else { top };

        self.place(top);
        match (known, test) {
            (Tribool::Unknown, Some(test)) => {
                self.expression(test)?;
                self.emit(Instruction::TestZero);
                self.emit(Instruction::JumpIfTrue(exit));
            }
            (_, Some(test)) => self.known_condition(test)?,
            (_, None) => {}
        }

        self.scope.push_loop(exit, next);
        let body = self.scoped(body);
        self.scope.pop_loop();
        body?;

        if let Some(update) = update {
            self.place(next);
            self.effect(update)?;
        }
        self.emit(Instruction::Jump(top));
        self.place(exit);
        Ok(())
    }

    fn loop_jump(&mut self, is_break: bool) -> CResult<()> {
        let target = self
            .scope
            .innermost_loop()
            .ok_or_else(|| self.unresolved("loop target"))?;
        for _ in target.tries..self.scope.tries() {
            self.emit(Instruction::TryEnd);
        }
        let count = self.scope.depth() - target.depth;
        self.pop_locals(count);
        self.emit(Instruction::Jump(if is_break {
            target.break_label
        } else {
            target.continue_label
        }));
        Ok(())
    }

    fn try_statement(&mut self, stmt: &TryStatement) -> CResult<()> {
        let Some(handler) = &stmt.handler else {
            return self.block(&stmt.block.body);
        };

        let catch = self.new_label();
        let end = self.new_label();
        let address = self.build.intern(StaticObject::Label(catch));

        self.emit(Instruction::TryBegin(address));
        self.scope.enter_try();
        let guarded = self.block(&stmt.block.body);
        self.scope.exit_try();
        guarded?;
        self.emit(Instruction::TryEnd);
        self.emit(Instruction::Jump(end));

        // The VM enters here with the stack cut back to the try's height.
        self.place(catch);
        self.scope.begin_block();
        if let Some(local) = handler.local {
            self.emit(Instruction::LoadReg(EXCEPTION_REGISTER));
            self.scope
                .declare(local)
                .ok_or_else(|| CodegenError::TooManyLocals(self.function.clone()))?;
        }
        for statement in &handler.body.body {
            self.statement(statement)?;
        }
        let count = self.scope.end_block();
        self.pop_locals(count);
        self.place(end);
        Ok(())
    }
}
