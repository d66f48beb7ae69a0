//! Rewriting of arbitrarily nested constraints into conjunctions of flat
//! constraints.
//!
//! A constraint is flat when it has one of the following forms, in which `l`
//! and `l'` denote leaves and `f` denotes a flat Boolean expression that is not
//! a leaf:
//! - a Boolean leaf `l`,
//! - a Boolean operator over leaves, e.g. `or(l, l', ...)`,
//! - a comparison between leaves `l ⊙ l'`,
//! - a comparison `e ⊙ l` where `e` is an integer operator or global function
//!   over leaves,
//! - a reification `f == l`, or a half-reification `l -> f` or `f -> l`,
//! - a natively supported global constraint over leaves.
//!
//! Nested subexpressions are replaced by auxiliary variables, which are defined
//! by additional flat constraints.

use tracing::trace;

use crate::{
	backend::Vocabulary,
	decompose::{decompose_constraint, decompose_function},
	expression::{Comparison, Expr, GlobalConstraint, Operator, OperatorName, Relation},
	model::{VarArena, VarOrigin},
	ReformulationError,
};

/// Rewrites constraints into flat constraints for a target with a given
/// [`Vocabulary`].
pub(crate) struct Flattener<'a> {
	/// Arena in which auxiliary variables are created.
	arena: &'a mut VarArena,
	/// The operators and global constraints accepted by the target.
	vocab: &'a Vocabulary,
}

impl<'a> Flattener<'a> {
	/// Create a new flattener that registers auxiliary variables in `arena`.
	pub(crate) fn new(arena: &'a mut VarArena, vocab: &'a Vocabulary) -> Self {
		Self { arena, vocab }
	}

	/// Whether an expression is flat and only uses the vocabulary of the target.
	fn accepts(&self, expr: &Expr) -> bool {
		is_flat(expr) && self.in_vocabulary(expr)
	}

	/// Create an auxiliary variable to represent a flat expression, unless it is a
	/// leaf already.
	fn auxiliary(&mut self, flat: Expr, out: &mut Vec<Expr>) -> Expr {
		if flat.is_leaf() {
			return flat;
		}
		let var = if flat.is_bool() {
			Expr::BoolVar(self.arena.new_bool(VarOrigin::Auxiliary))
		} else {
			let (lb, ub) = self.arena.bounds(&flat);
			Expr::IntVar(self.arena.new_int(lb, ub, VarOrigin::Auxiliary))
		};
		out.push(Expr::Comparison(Comparison::new(
			Relation::Eq,
			flat,
			var.clone(),
		)));
		var
	}

	/// Rewrite a Boolean expression into a flat Boolean expression (possibly a
	/// leaf) that can be used in a reification.
	fn bool_expr(&mut self, expr: &Expr, out: &mut Vec<Expr>) -> Result<Expr, ReformulationError> {
		match expr {
			_ if expr.is_leaf() => Ok(expr.clone()),
			Expr::Operator(op) => {
				self.check_operator(op.name)?;
				match op.name {
					OperatorName::Not => match &op.args[0] {
						Expr::Comparison(_) => self.bool_expr(&op.args[0].negate()?, out),
						arg => self.leaf(arg, out)?.negate(),
					},
					OperatorName::And
					| OperatorName::Or
					| OperatorName::Xor
					| OperatorName::Implies => {
						let args = self.leaves(&op.args, out)?;
						Ok(Expr::Operator(Operator::new(op.name, args)))
					}
					_ => Err(not_boolean(expr)),
				}
			}
			Expr::Comparison(c) => self.comparison(c.relation, &c.lhs, &c.rhs, out),
			Expr::Global(g) if g.name.is_boolean() => {
				let args = self.leaves(&g.args, out)?;
				let global = GlobalConstraint { name: g.name, args };
				if self.vocab.supports_global(g.name) {
					return Ok(Expr::Global(global));
				}
				// Auxiliary variables are defined unconditionally, only the checks are
				// reified
				let decomposition = decompose_constraint(self.arena, &global)?;
				for con in &decomposition.definitions {
					self.constraint(con, out)?;
				}
				self.bool_expr(&Expr::all(decomposition.checks)?, out)
			}
			_ => Err(not_boolean(expr)),
		}
	}

	/// Ensure that the operator is part of the vocabulary of the target.
	fn check_operator(&self, name: OperatorName) -> Result<(), ReformulationError> {
		if self.vocab.supports_operator(name) {
			Ok(())
		} else {
			Err(ReformulationError::UnsupportedExpression {
				name: name.symbol().to_owned(),
			})
		}
	}

	/// Rewrite a comparison into the flat form `l ⊙ l'` or `e ⊙ l`.
	fn comparison(
		&mut self,
		relation: Relation,
		lhs: &Expr,
		rhs: &Expr,
		out: &mut Vec<Expr>,
	) -> Result<Expr, ReformulationError> {
		let lhs = self.num_expr(lhs, out)?;
		let rhs = self.num_expr(rhs, out)?;
		let (relation, lhs, rhs) = if rhs.is_leaf() {
			(relation, lhs, rhs)
		} else if lhs.is_leaf() {
			(relation.mirror(), rhs, lhs)
		} else {
			let rhs = self.auxiliary(rhs, out);
			(relation, lhs, rhs)
		};
		Ok(Expr::compare(relation, lhs, rhs))
	}

	/// Rewrite a top-level comparison.
	fn comparison_constraint(
		&mut self,
		c: &Comparison,
		out: &mut Vec<Expr>,
	) -> Result<(), ReformulationError> {
		let (lhs, rhs) = (&*c.lhs, &*c.rhs);
		if matches!(c.relation, Relation::Eq | Relation::Ne)
			&& lhs.is_bool()
			&& rhs.is_bool()
			&& !(lhs.is_leaf() && rhs.is_leaf())
		{
			return self.reification(c.relation, lhs, rhs, out);
		}
		if c.relation == Relation::Eq {
			// An integer global function equated to a leaf is decomposed onto the
			// leaf directly
			for (f, target) in [(lhs, rhs), (rhs, lhs)] {
				if let Expr::Global(g) = f {
					if !g.name.is_boolean()
						&& !self.vocab.supports_global(g.name)
						&& target.is_leaf()
					{
						let args = self.leaves(&g.args, out)?;
						let global = GlobalConstraint { name: g.name, args };
						for con in decompose_function(self.arena, &global, target)? {
							self.constraint(&con, out)?;
						}
						return Ok(());
					}
				}
			}
		}
		let flat = self.comparison(c.relation, lhs, rhs, out)?;
		self.constraint(&flat, out)
	}

	/// Rewrite a top-level constraint, adding the resulting flat constraints to
	/// `out`.
	fn constraint(&mut self, expr: &Expr, out: &mut Vec<Expr>) -> Result<(), ReformulationError> {
		if self.accepts(expr) {
			out.push(expr.clone());
			return Ok(());
		}
		match expr {
			Expr::Operator(op) => self.operator_constraint(op, out),
			Expr::Comparison(c) => self.comparison_constraint(c, out),
			Expr::Global(g) if g.name.is_boolean() => {
				let args = self.leaves(&g.args, out)?;
				let global = GlobalConstraint { name: g.name, args };
				if self.vocab.supports_global(g.name) {
					out.push(Expr::Global(global));
					return Ok(());
				}
				let decomposition = decompose_constraint(self.arena, &global)?;
				for con in decomposition.definitions.iter().chain(&decomposition.checks) {
					self.constraint(con, out)?;
				}
				Ok(())
			}
			_ => Err(not_boolean(expr)),
		}
	}

	/// Flatten a Boolean-valued constraint, returning flat constraints whose
	/// conjunction is equivalent to it.
	///
	/// Constraints that define auxiliary variables precede the constraints that
	/// use them.
	pub(crate) fn flatten(&mut self, constraint: &Expr) -> Result<Vec<Expr>, ReformulationError> {
		let mut out = Vec::new();
		self.constraint(constraint, &mut out)?;
		for con in &out {
			trace!(constraint = %con, "flat constraint");
		}
		Ok(out)
	}

	/// Whether all operators and global constraints in the expression are part
	/// of the vocabulary.
	fn in_vocabulary(&self, expr: &Expr) -> bool {
		match expr {
			Expr::Operator(op) => {
				self.vocab.supports_operator(op.name)
					&& op.args.iter().all(|a| self.in_vocabulary(a))
			}
			Expr::Comparison(c) => self.in_vocabulary(&c.lhs) && self.in_vocabulary(&c.rhs),
			Expr::Global(g) => self.vocab.supports_global(g.name),
			_ => true,
		}
	}

	/// Rewrite an expression into a leaf, introducing an auxiliary variable when
	/// necessary.
	fn leaf(&mut self, expr: &Expr, out: &mut Vec<Expr>) -> Result<Expr, ReformulationError> {
		if expr.is_leaf() {
			return Ok(expr.clone());
		}
		let flat = if expr.is_bool() {
			self.bool_expr(expr, out)?
		} else {
			self.num_expr(expr, out)?
		};
		Ok(self.auxiliary(flat, out))
	}

	/// Rewrite a list of expressions into leaves.
	fn leaves(
		&mut self,
		exprs: &[Expr],
		out: &mut Vec<Expr>,
	) -> Result<Vec<Expr>, ReformulationError> {
		exprs.iter().map(|e| self.leaf(e, out)).collect()
	}

	/// Rewrite an integer expression into a leaf, or an operator or (natively
	/// supported) global function over leaves.
	fn num_expr(&mut self, expr: &Expr, out: &mut Vec<Expr>) -> Result<Expr, ReformulationError> {
		if expr.is_leaf() {
			return Ok(expr.clone());
		}
		if expr.is_bool() {
			return self.leaf(expr, out);
		}
		match expr {
			Expr::Operator(op) => {
				self.check_operator(op.name)?;
				let args = self.leaves(&op.args, out)?;
				Ok(Expr::Operator(Operator {
					name: op.name,
					args,
					weights: op.weights.clone(),
				}))
			}
			Expr::Global(g) => {
				let args = self.leaves(&g.args, out)?;
				let global = GlobalConstraint { name: g.name, args };
				if self.vocab.supports_global(g.name) {
					return Ok(Expr::Global(global));
				}
				let (lb, ub) = self.arena.bounds(&Expr::Global(global.clone()));
				let target = Expr::IntVar(self.arena.new_int(lb, ub, VarOrigin::Auxiliary));
				for con in decompose_function(self.arena, &global, &target)? {
					self.constraint(&con, out)?;
				}
				Ok(target)
			}
			_ => Err(ReformulationError::malformed(
				expr.to_string(),
				"expected an integer expression",
			)),
		}
	}

	/// Rewrite a top-level Boolean operator.
	fn operator_constraint(
		&mut self,
		op: &Operator,
		out: &mut Vec<Expr>,
	) -> Result<(), ReformulationError> {
		self.check_operator(op.name)?;
		match op.name {
			OperatorName::And => {
				for arg in &op.args {
					self.constraint(arg, out)?;
				}
			}
			OperatorName::Not => {
				let negated = op.args[0].negate()?;
				if matches!(&negated, Expr::Operator(o) if o.name == OperatorName::Not) {
					// Global constraints are reified, and the indicator negated
					let leaf = self.leaf(&op.args[0], out)?;
					out.push(leaf.negate()?);
				} else {
					self.constraint(&negated, out)?;
				}
			}
			OperatorName::Implies => {
				let (a, b) = (&op.args[0], &op.args[1]);
				let (a, b) = if a.is_leaf() {
					(a.clone(), self.bool_expr(b, out)?)
				} else if b.is_leaf() {
					(self.bool_expr(a, out)?, b.clone())
				} else {
					let a = self.leaf(a, out)?;
					(a, self.bool_expr(b, out)?)
				};
				out.push(Expr::Operator(Operator::new(OperatorName::Implies, vec![a, b])));
			}
			OperatorName::Or | OperatorName::Xor => {
				let args = self.leaves(&op.args, out)?;
				out.push(Expr::Operator(Operator::new(op.name, args)));
			}
			_ => return Err(not_boolean(&Expr::Operator(op.clone()))),
		}
		Ok(())
	}

	/// Rewrite a top-level Boolean (in)equality where at least one side is not
	/// a leaf.
	fn reification(
		&mut self,
		relation: Relation,
		lhs: &Expr,
		rhs: &Expr,
		out: &mut Vec<Expr>,
	) -> Result<(), ReformulationError> {
		let (f, b) = if rhs.is_leaf() {
			(lhs, rhs.clone())
		} else if lhs.is_leaf() {
			(rhs, lhs.clone())
		} else {
			(lhs, self.leaf(rhs, out)?)
		};
		let b = if relation == Relation::Ne { b.negate()? } else { b };
		match b {
			Expr::Bool(true) => self.constraint(f, out),
			Expr::Bool(false) => self.constraint(&f.negate()?, out),
			b => {
				let f = self.bool_expr(f, out)?;
				out.push(Expr::Comparison(Comparison::new(Relation::Eq, f, b)));
				Ok(())
			}
		}
	}
}

/// Whether an expression is a flat constraint.
pub(crate) fn is_flat(expr: &Expr) -> bool {
	match expr {
		Expr::Bool(_) | Expr::BoolVar(_) | Expr::NegBoolVar(_) => true,
		Expr::Int(_) | Expr::IntVar(_) => false,
		Expr::Operator(op) if op.name == OperatorName::Implies => {
			let (a, b) = (&op.args[0], &op.args[1]);
			(a.is_leaf() && (b.is_leaf() || is_flat_bool(b))) || (b.is_leaf() && is_flat_bool(a))
		}
		Expr::Operator(op) => {
			op.name.is_boolean()
				&& op.name != OperatorName::Not
				&& op.args.iter().all(Expr::is_leaf)
		}
		Expr::Global(g) => g.name.is_boolean() && g.args.iter().all(Expr::is_leaf),
		Expr::Comparison(c) => {
			if !c.rhs.is_leaf() {
				false
			} else if c.lhs.is_leaf() {
				true
			} else if c.lhs.is_bool() {
				c.relation == Relation::Eq
					&& c.rhs.is_bool()
					&& !c.rhs.is_const()
					&& is_flat_bool(&c.lhs)
			} else {
				is_flat_num(&c.lhs)
			}
		}
	}
}

/// Whether an expression is a flat Boolean expression that is not a leaf.
fn is_flat_bool(expr: &Expr) -> bool {
	match expr {
		Expr::Operator(op) => {
			op.name.is_boolean()
				&& op.name != OperatorName::Not
				&& op.args.iter().all(Expr::is_leaf)
		}
		Expr::Comparison(c) => c.rhs.is_leaf() && (c.lhs.is_leaf() || is_flat_num(&c.lhs)),
		Expr::Global(g) => g.name.is_boolean() && g.args.iter().all(Expr::is_leaf),
		_ => false,
	}
}

/// Whether an expression is an integer operator or global function over
/// leaves.
fn is_flat_num(expr: &Expr) -> bool {
	match expr {
		Expr::Operator(op) => !op.name.is_boolean() && op.args.iter().all(Expr::is_leaf),
		Expr::Global(g) => !g.name.is_boolean() && g.args.iter().all(Expr::is_leaf),
		_ => false,
	}
}

/// Error used when an integer expression is used where a constraint is
/// expected.
fn not_boolean(expr: &Expr) -> ReformulationError {
	ReformulationError::malformed(expr.to_string(), "expected a Boolean expression")
}
