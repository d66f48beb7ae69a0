//! Module containing the central data structure to formulate a problem
//! instance: its decision variables and the constraints over them.

use std::{
	cmp::Ordering,
	fmt::{self, Display},
};

use index_vec::{define_index_type, IndexVec};
use itertools::Itertools;
use pindakaas::{ClauseDatabase, ClauseDatabaseTools, Cnf, Lit as RawLit, VarRange};
use tracing::{debug, instrument};

use crate::{
	backend::{Clause, Vocabulary},
	encode::{EncodeConfig, Encoder, EncodingLog, IndicatorMap},
	expression::{Expr, GlobalName, Operator, OperatorName},
	flatten::Flattener,
	IntVal, ReformulationError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Reference to a Boolean decision variable in a [`Model`], together with the
/// literal that represents it in the encoding.
pub struct BoolVar(pub(crate) VarRef, pub(crate) RawLit);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Reference to a decision variable in a [`Model`].
pub enum Decision {
	/// Reference to a Boolean decision variable.
	Bool(BoolVar),
	/// Reference to an integer decision variable.
	Int(IntVar),
}

#[derive(Clone, Debug, Default)]
/// Record of the constraints of a [`Model`] that have been flattened by
/// [`Model::flatten`].
struct FlatLog {
	/// The vocabulary for which the constraints were flattened.
	vocab: Vocabulary,
	/// The number of model constraints that have been flattened.
	constraints: usize,
	/// The flat constraints generated so far.
	exprs: Vec<Expr>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Reference to an integer decision variable in a [`Model`].
pub struct IntVar(pub(crate) VarRef);

#[derive(Clone, Debug, Default)]
/// A formulation of a problem instance in terms of decision variables and
/// constraints.
///
/// Constraints are stored as they are given. They are flattened and encoded
/// when [`Model::encode`] is called, which only processes the constraints that
/// were added since the previous call.
pub struct Model {
	/// Definitions of all variables, including auxiliary and indicator
	/// variables.
	pub(crate) arena: VarArena,
	/// The constraints that have been added to the model.
	pub(crate) constraints: Vec<Expr>,
	/// Record of the flattening generated so far.
	flat: FlatLog,
	/// Record of the encoding generated so far.
	pub(crate) log: EncodingLog,
	/// The value of every variable in the last solution found.
	pub(crate) values: IndexVec<VarRef, Option<IntVal>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Result of a solving attempt
pub enum SolveResult {
	/// The solver has found a solution.
	Satisfied,
	/// The solver has proven that the problem is unsatisfiable.
	Unsatisfiable,
	/// The solver that no more solutions can be found.
	Complete,
	/// The solver was interrupted before a result could be reached.
	Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(variant_size_differences, reason = "`Int` cannot be as smal as `Bool`")]
/// The value of a decision variable in a solution.
pub enum Value {
	/// A Boolean value.
	Bool(bool),
	/// An integer value.
	Int(IntVal),
}

#[derive(Clone, Debug, Default)]
/// Dense storage of the definitions of all variables of a [`Model`].
pub(crate) struct VarArena {
	/// Variable definitions, indexed by their reference.
	vars: IndexVec<VarRef, VarDef>,
	/// Source of the propositional variables of Boolean variables and of the
	/// auxiliary variables of the encoding.
	cnf: Cnf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Definition of a variable in a [`VarArena`].
pub(crate) struct VarDef {
	/// The kind of the variable, and its domain.
	pub(crate) kind: VarKind,
	/// The reason the variable was created.
	pub(crate) origin: VarOrigin,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// The kind of a variable, and its domain.
pub(crate) enum VarKind {
	/// A Boolean variable, and the literal that represents it.
	Bool(RawLit),
	/// An integer variable with an inclusive domain.
	Int {
		/// Lower bound.
		lb: IntVal,
		/// Upper bound.
		ub: IntVal,
	},
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// The reason a variable was created.
pub(crate) enum VarOrigin {
	/// Created by the user of the [`Model`].
	User,
	/// Introduced by flattening, decomposition, or encoding.
	Auxiliary,
	/// An indicator variable `x == v` of an integer variable `x`.
	Indicator,
}

define_index_type! {
	/// Reference to a variable in a [`Model`], shared by Boolean and integer
	/// variables.
	pub struct VarRef = u32;
}

impl Display for BoolVar {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "b{}", self.0.index())
	}
}

impl From<BoolVar> for RawLit {
	fn from(value: BoolVar) -> Self {
		value.1
	}
}

impl Ord for BoolVar {
	fn cmp(&self, other: &Self) -> Ordering {
		self.0.cmp(&other.0)
	}
}

impl PartialOrd for BoolVar {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Decision {
	/// The reference to the variable in the [`Model`].
	pub(crate) fn var_ref(self) -> VarRef {
		match self {
			Decision::Bool(BoolVar(r, _)) | Decision::Int(IntVar(r)) => r,
		}
	}
}

impl From<BoolVar> for Decision {
	fn from(value: BoolVar) -> Self {
		Decision::Bool(value)
	}
}

impl From<IntVar> for Decision {
	fn from(value: IntVar) -> Self {
		Decision::Int(value)
	}
}

impl Display for IntVar {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "x{}", self.0.index())
	}
}

impl Model {
	/// Add a constraint to the model.
	///
	/// The constraint must be Boolean-valued and may only refer to variables of
	/// this model.
	pub fn add(&mut self, constraint: impl Into<Expr>) -> Result<(), ReformulationError> {
		let constraint = constraint.into();
		if !constraint.is_bool() {
			return Err(ReformulationError::malformed(
				constraint.to_string(),
				"a constraint must be Boolean-valued",
			));
		}
		let mut foreign = false;
		constraint.visit_vars(&mut |d| foreign |= d.var_ref().index() >= self.arena.len());
		if foreign {
			return Err(ReformulationError::malformed(
				constraint.to_string(),
				"refers to a variable that does not belong to this model",
			));
		}
		self.constraints.push(constraint);
		Ok(())
	}

	/// Get the value of a Boolean variable in the last solution found.
	pub fn bool_value(&self, var: BoolVar) -> Option<bool> {
		self.raw_value(var.0).map(|v| v != 0)
	}

	/// Clear the values of the last solution found.
	pub(crate) fn clear_values(&mut self) {
		self.values = IndexVec::new();
	}

	/// The clauses of the encoding generated so far.
	pub fn clauses(&self) -> &[Clause] {
		self.log.clauses()
	}

	/// The constraints that have been added to the model.
	pub fn constraints(&self) -> &[Expr] {
		&self.constraints
	}

	#[instrument(level = "debug", skip_all, fields(constraints = self.constraints.len()))]
	/// Encode all constraints that have been added since the last call into
	/// clauses.
	///
	/// The indicator variables of all integer variables created by the user are
	/// created eagerly. Indicator variables that already exist are reused. When
	/// an error occurs, the encoding is returned to the state it had before the
	/// call.
	pub fn encode(&mut self, config: &EncodeConfig) -> Result<(), ReformulationError> {
		let checkpoint = self.log.checkpoint(&self.arena);
		let first = self.log.encoded_constraints();
		let mut encoder = Encoder::new(&mut self.arena, &mut self.log, config);
		let result = encoder.encode_user_vars().and_then(|()| {
			self.constraints
				.iter()
				.enumerate()
				.skip(first)
				.try_for_each(|(i, con)| encoder.encode_model_constraint(i, con))
		});
		if result.is_err() {
			debug!("roll back partial encoding");
			self.log.rollback(&mut self.arena, checkpoint);
		}
		result
	}

	/// The record of the encoding generated so far.
	pub fn encoding_log(&self) -> &EncodingLog {
		&self.log
	}

	#[instrument(level = "debug", skip_all, fields(constraints = self.constraints.len()))]
	/// Flatten the constraints that have been added since the last call for a
	/// target that natively supports the given vocabulary, and return the new
	/// flat constraints.
	///
	/// Auxiliary variables that are introduced are added to the model, but the
	/// constraints of the model are left unchanged. Flattening for a different
	/// vocabulary than the previous call starts again from the first
	/// constraint. When an error occurs, the auxiliary variables of the call are
	/// removed again.
	pub fn flatten(&mut self, vocab: &Vocabulary) -> Result<Vec<Expr>, ReformulationError> {
		if self.flat.vocab != *vocab {
			if self.flat.constraints > 0 {
				debug!("flatten again for a different vocabulary");
			}
			self.flat = FlatLog {
				vocab: *vocab,
				..FlatLog::default()
			};
		}
		let checkpoint = self.log.checkpoint(&self.arena);
		let mut flattener = Flattener::new(&mut self.arena, vocab);
		let mut flat = Vec::new();
		let result: Result<(), ReformulationError> = self.constraints[self.flat.constraints..]
			.iter()
			.try_for_each(|con| {
				flat.extend(flattener.flatten(con)?);
				Ok(())
			});
		if let Err(err) = result {
			debug!("roll back partial flattening");
			self.log.rollback(&mut self.arena, checkpoint);
			return Err(err);
		}
		self.flat.constraints = self.constraints.len();
		self.flat.exprs.extend(flat.iter().cloned());
		Ok(flat)
	}

	/// The flat constraints generated by [`Model::flatten`] so far.
	pub fn flattened(&self) -> &[Expr] {
		&self.flat.exprs
	}

	/// The indicator variables created so far.
	pub fn indicators(&self) -> &IndicatorMap {
		self.log.indicators()
	}

	/// The (inclusive) domain of an integer variable.
	pub fn int_bounds(&self, var: IntVar) -> (IntVal, IntVal) {
		self.arena.int_bounds(var)
	}

	/// Get the value of an integer variable in the last solution found.
	pub fn int_value(&self, var: IntVar) -> Option<IntVal> {
		self.raw_value(var.0)
	}

	/// Create a new Boolean decision variable.
	pub fn new_bool_var(&mut self) -> BoolVar {
		self.arena.new_bool(VarOrigin::User)
	}

	/// Create `len` new Boolean decision variables.
	pub fn new_bool_vars(&mut self, len: usize) -> Vec<BoolVar> {
		(0..len).map(|_| self.new_bool_var()).collect()
	}

	/// Create a new integer decision variable with the (inclusive) domain
	/// `lb..=ub`.
	///
	/// An empty domain is reported when the model is encoded.
	pub fn new_int_var(&mut self, lb: IntVal, ub: IntVal) -> IntVar {
		self.arena.new_int(lb, ub, VarOrigin::User)
	}

	/// Create `len` new integer decision variables with the (inclusive) domain
	/// `lb..=ub`.
	pub fn new_int_vars(&mut self, len: usize, lb: IntVal, ub: IntVal) -> Vec<IntVar> {
		(0..len).map(|_| self.new_int_var(lb, ub)).collect()
	}

	/// Get the raw value of a variable, with Booleans as `0` and `1`.
	fn raw_value(&self, var: VarRef) -> Option<IntVal> {
		self.values.get(var).copied().flatten()
	}

	/// Set the values of the last solution found.
	pub(crate) fn set_values(&mut self, values: IndexVec<VarRef, Option<IntVal>>) {
		self.values = values;
	}

	/// Get the value of a decision variable in the last solution found.
	pub fn value(&self, var: Decision) -> Option<Value> {
		match var {
			Decision::Bool(b) => self.bool_value(b).map(Value::Bool),
			Decision::Int(i) => self.int_value(i).map(Value::Int),
		}
	}

	/// Evaluate an expression in the last solution found.
	///
	/// Boolean results are represented as `0` and `1`.
	pub fn value_of(&self, expr: &Expr) -> Option<IntVal> {
		expr.evaluate(&|d: Decision| self.raw_value(d.var_ref()))
	}
}

impl Value {
	/// The Boolean value, if the value is Boolean.
	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Value::Bool(b) => Some(*b),
			Value::Int(_) => None,
		}
	}

	/// The integer value, if the value is an integer.
	pub fn as_int(&self) -> Option<IntVal> {
		match self {
			Value::Int(i) => Some(*i),
			Value::Bool(_) => None,
		}
	}
}

impl Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Value::Bool(b) => write!(f, "{b}"),
			Value::Int(i) => write!(f, "{i}"),
		}
	}
}

impl VarArena {
	/// Compute (possibly loose) inclusive bounds on the values that an
	/// expression can take. Boolean-valued expressions are bounded by `0..=1`.
	pub(crate) fn bounds(&self, expr: &Expr) -> (IntVal, IntVal) {
		match expr {
			Expr::Bool(b) => (IntVal::from(*b), IntVal::from(*b)),
			Expr::Int(i) => (*i, *i),
			Expr::IntVar(v) => self.int_bounds(*v),
			Expr::Operator(op) if !op.name.is_boolean() => self.operator_bounds(op),
			Expr::Global(g) if !g.name.is_boolean() => {
				let array = match g.name {
					GlobalName::Element => &g.args[..g.args.len().saturating_sub(1)],
					_ => &g.args[..],
				};
				let bounds = array.iter().map(|a| self.bounds(a));
				let hull = match g.name {
					GlobalName::Minimum => bounds.reduce(|(l, u), (al, au)| (l.min(al), u.min(au))),
					GlobalName::Maximum => bounds.reduce(|(l, u), (al, au)| (l.max(al), u.max(au))),
					_ => bounds.reduce(|(l, u), (al, au)| (l.min(al), u.max(au))),
				};
				hull.unwrap_or((0, 0))
			}
			_ => (0, 1),
		}
	}

	/// Bounds of an integer variable. Boolean variables are bounded by `0..=1`.
	pub(crate) fn int_bounds(&self, var: IntVar) -> (IntVal, IntVal) {
		match self.vars[var.0].kind {
			VarKind::Int { lb, ub } => (lb, ub),
			VarKind::Bool(_) => (0, 1),
		}
	}

	/// Iterate over the references and definitions of all variables.
	pub(crate) fn iter(&self) -> impl Iterator<Item = (VarRef, &VarDef)> + '_ {
		self.vars.iter_enumerated()
	}

	/// The number of variables.
	pub(crate) fn len(&self) -> usize {
		self.vars.len()
	}

	/// Create a new Boolean variable, represented by a new literal.
	pub(crate) fn new_bool(&mut self, origin: VarOrigin) -> BoolVar {
		let lit = self.cnf.new_lit();
		let r = self.vars.push(VarDef {
			kind: VarKind::Bool(lit),
			origin,
		});
		BoolVar(r, lit)
	}

	/// Create a new integer variable with the inclusive domain `lb..=ub`.
	pub(crate) fn new_int(&mut self, lb: IntVal, ub: IntVal, origin: VarOrigin) -> IntVar {
		IntVar(self.vars.push(VarDef {
			kind: VarKind::Int { lb, ub },
			origin,
		}))
	}

	/// Reserve `len` propositional variables that do not represent a variable of
	/// the arena.
	pub(crate) fn new_var_range(&mut self, len: usize) -> VarRange {
		self.cnf.new_var_range(len)
	}

	/// The number of propositional variables used by the encoding so far.
	pub(crate) fn num_lit_vars(&self) -> usize {
		self.cnf.variables()
	}

	/// Bounds of an integer-valued operator.
	fn operator_bounds(&self, op: &Operator) -> (IntVal, IntVal) {
		let args: Vec<_> = op.args.iter().map(|a| self.bounds(a)).collect();
		let corners = |a: (IntVal, IntVal), b: (IntVal, IntVal)| {
			[
				a.0.saturating_mul(b.0),
				a.0.saturating_mul(b.1),
				a.1.saturating_mul(b.0),
				a.1.saturating_mul(b.1),
			]
			.into_iter()
			.minmax()
			.into_option()
			.unwrap_or((0, 0))
		};
		let add = |(l, u): (IntVal, IntVal), (al, au): (IntVal, IntVal)| {
			(l.saturating_add(al), u.saturating_add(au))
		};
		match op.name {
			OperatorName::Sum => args.into_iter().fold((0, 0), add),
			OperatorName::WeightedSum => op
				.weights
				.iter()
				.zip(args)
				.map(|(&w, a)| corners((w, w), a))
				.fold((0, 0), add),
			OperatorName::Sub => (
				args[0].0.saturating_sub(args[1].1),
				args[0].1.saturating_sub(args[1].0),
			),
			OperatorName::Neg => (args[0].1.saturating_neg(), args[0].0.saturating_neg()),
			OperatorName::Mul => corners(args[0], args[1]),
			OperatorName::Abs => {
				let (lb, ub) = args[0];
				if lb >= 0 {
					(lb, ub)
				} else if ub <= 0 {
					(ub.saturating_neg(), lb.saturating_neg())
				} else {
					(0, ub.max(lb.saturating_neg()))
				}
			}
			// Non-monotonic operators are bounded by enumerating their arguments
			OperatorName::Div | OperatorName::Mod | OperatorName::Pow => args
				.iter()
				.map(|&(lb, ub)| lb..=ub)
				.multi_cartesian_product()
				.filter_map(|vals| op.apply(&vals))
				.minmax()
				.into_option()
				.unwrap_or((0, 0)),
			_ => (0, 1),
		}
	}

	/// Remove all variables created after the first `len`.
	///
	/// The propositional variables of removed variables are not reused.
	pub(crate) fn truncate(&mut self, len: usize) {
		self.vars.truncate(len);
	}
}

#[cfg(test)]
mod tests {
	use expect_test::expect;
	use tracing_test::traced_test;

	use crate::{
		expression::{Expr, OperatorName},
		model::{Decision, Model, Value},
		EncodeConfig, ReformulationError,
	};

	#[test]
	#[traced_test]
	fn test_bounds() {
		let mut prb = Model::default();
		let x = prb.new_int_var(-2, 3);
		let y = prb.new_int_var(1, 4);
		let b = prb.new_bool_var();
		let bounds = |e: Expr| prb.arena.bounds(&e);

		assert_eq!(bounds(x + y), (-1, 7));
		assert_eq!(bounds(x - y), (-6, 2));
		assert_eq!(bounds(x * y), (-8, 12));
		assert_eq!(bounds(-x), (-3, 2));
		assert_eq!(bounds(x + b), (-2, 4));
		assert_eq!(
			bounds(Expr::weighted_sum(vec![2, -3], vec![x.into(), y.into()]).unwrap()),
			(-16, 3)
		);
		assert_eq!(
			bounds(Expr::operator(OperatorName::Abs, vec![x.into()]).unwrap()),
			(0, 3)
		);
		assert_eq!(
			bounds(Expr::operator(OperatorName::Div, vec![x.into(), y.into()]).unwrap()),
			(-2, 3)
		);
		assert_eq!(
			bounds(Expr::operator(OperatorName::Mod, vec![y.into(), x.into()]).unwrap()),
			(0, 2)
		);
		assert_eq!(bounds(crate::minimum([x, y]).unwrap()), (-2, 3));
		assert_eq!(bounds(crate::maximum([x, y]).unwrap()), (1, 4));
		assert_eq!(
			bounds(crate::element([Expr::Int(7), x.into()], y).unwrap()),
			(-2, 7)
		);
		assert_eq!(bounds(x.lt(y)), (0, 1));
	}

	#[test]
	#[traced_test]
	fn test_add_validation() {
		let mut prb = Model::default();
		let x = prb.new_int_var(0, 3);
		let err = prb.add(x + 1).unwrap_err();
		expect!["malformed expression `sum(x0, 1)`: a constraint must be Boolean-valued"]
			.assert_eq(&err.to_string());

		let mut other = Model::default();
		let _ = other.new_int_var(0, 1);
		let z = other.new_int_var(0, 1);
		assert!(matches!(
			prb.add(z.eq(1)),
			Err(ReformulationError::MalformedExpression { .. })
		));
		assert!(prb.constraints().is_empty());
	}

	#[test]
	#[traced_test]
	fn test_invalid_domain() {
		let mut prb = Model::default();
		let x = prb.new_int_var(0, 3);
		let y = prb.new_int_var(5, 4);
		prb.add(x.gt(1)).unwrap();
		assert_eq!(
			prb.encode(&EncodeConfig::default()),
			Err(ReformulationError::InvalidDomain {
				var: y,
				lb: 5,
				ub: 4
			})
		);
		assert!(prb.clauses().is_empty());
		assert!(prb.indicators().is_empty());
	}

	#[test]
	#[traced_test]
	fn test_values_before_solving() {
		let mut prb = Model::default();
		let x = prb.new_int_var(0, 3);
		let b = prb.new_bool_var();
		assert_eq!(prb.int_value(x), None);
		assert_eq!(prb.value(Decision::Bool(b)), None);
		assert_eq!(prb.value_of(&Expr::Int(3)), Some(3));
		assert_eq!(Value::Int(-3).to_string(), "-3");
		assert_eq!(Value::Bool(true).as_bool(), Some(true));
		assert_eq!(Value::Int(2).as_bool(), None);
		assert_eq!(Value::Int(2).as_int(), Some(2));
	}
}
