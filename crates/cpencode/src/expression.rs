//! Symbolic representation of the constraints in a [`crate::Model`]: constants,
//! variables, operators, comparisons and global constraints.
//!
//! Every expression is either a *leaf* (a constant or a variable reference) or
//! an interior node. Interior nodes are validated against a fixed table of
//! signatures when they are created, so that the later stages of the pipeline
//! only ever see expressions with the right number and kind of arguments.

use std::{
	fmt::{self, Display},
	ops::{Add, Mul, Neg, Not, Sub},
	str::FromStr,
};

use itertools::Itertools;

use crate::{
	model::{BoolVar, Decision, IntVar},
	IntVal, ReformulationError,
};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
/// A comparison between two expressions.
pub struct Comparison {
	/// The relation that is required to hold.
	pub(crate) relation: Relation,
	/// Left-hand side of the comparison.
	pub(crate) lhs: Box<Expr>,
	/// Right-hand side of the comparison.
	pub(crate) rhs: Box<Expr>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[allow(
	variant_size_differences,
	reason = "leaves are much smaller than interior nodes, boxing them would cost more"
)]
/// A (possibly nested) symbolic expression over the variables of a
/// [`crate::Model`].
pub enum Expr {
	/// A Boolean constant.
	Bool(bool),
	/// An integer constant.
	Int(IntVal),
	/// A reference to a Boolean decision variable.
	BoolVar(BoolVar),
	/// The negation of a Boolean decision variable.
	NegBoolVar(BoolVar),
	/// A reference to an integer decision variable.
	IntVar(IntVar),
	/// An arithmetic or logical operator applied to its arguments.
	Operator(Operator),
	/// A comparison between two expressions.
	Comparison(Comparison),
	/// A global constraint (or global function) over its arguments.
	Global(GlobalConstraint),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
/// A global constraint, or integer-valued global function, applied to a list of
/// arguments.
///
/// The arguments are stored as one flat list, with a fixed layout for each
/// [`GlobalName`]:
/// - `element`: the array followed by the index,
/// - `cumulative`: starts, durations, ends and demands (each of length `n`)
///   followed by the capacity,
/// - all others: their arguments in order.
pub struct GlobalConstraint {
	/// The kind of global constraint.
	pub(crate) name: GlobalName,
	/// The arguments of the constraint.
	pub(crate) args: Vec<Expr>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// The global constraints known to the expression model.
pub enum GlobalName {
	/// All arguments take pairwise different values.
	AllDifferent,
	/// All arguments take the same value.
	AllEqual,
	/// The arguments form the successor array of a single Hamiltonian cycle.
	Circuit,
	/// The resource usage of a set of tasks never exceeds a capacity.
	Cumulative,
	/// The element of an array selected by an index.
	Element,
	/// The largest of the arguments.
	Maximum,
	/// The smallest of the arguments.
	Minimum,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
/// An operator applied to an ordered list of arguments.
pub struct Operator {
	/// The operator that is applied.
	pub(crate) name: OperatorName,
	/// The arguments of the operator.
	pub(crate) args: Vec<Expr>,
	/// The weight of each argument, only used by [`OperatorName::WeightedSum`].
	pub(crate) weights: Vec<IntVal>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// The operators known to the expression model.
///
/// The order of the variants is the order of [`OPERATOR_TABLE`].
pub enum OperatorName {
	/// Conjunction.
	And,
	/// Disjunction.
	Or,
	/// Exclusive disjunction (odd parity).
	Xor,
	/// Implication.
	Implies,
	/// Boolean negation.
	Not,
	/// Sum of the arguments.
	Sum,
	/// Sum of the arguments, each multiplied by a constant weight.
	WeightedSum,
	/// Subtraction.
	Sub,
	/// Integer negation.
	Neg,
	/// Multiplication.
	Mul,
	/// Integer division, rounding toward zero.
	Div,
	/// Remainder of the integer division, taking the sign of the dividend.
	Mod,
	/// Exponentiation with a non-negative exponent.
	Pow,
	/// Absolute value.
	Abs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Signature of an operator, used to validate operators on creation.
pub(crate) struct OperatorSignature {
	/// The operator that this signature describes.
	pub(crate) name: OperatorName,
	/// Name used to display (and parse) the operator.
	pub(crate) symbol: &'static str,
	/// The exact number of arguments, or `None` when the operator accepts any
	/// non-zero number of arguments.
	pub(crate) arity: Option<usize>,
	/// Whether the operator is Boolean-valued.
	pub(crate) boolean: bool,
	/// Whether all arguments must be Boolean-valued.
	pub(crate) bool_args: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// The relation of a [`Comparison`].
pub enum Relation {
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
}

/// The signatures of all operators, indexed by [`OperatorName`].
pub(crate) static OPERATOR_TABLE: [OperatorSignature; 14] = [
	OperatorSignature::new(OperatorName::And, "and", None, true, true),
	OperatorSignature::new(OperatorName::Or, "or", None, true, true),
	OperatorSignature::new(OperatorName::Xor, "xor", None, true, true),
	OperatorSignature::new(OperatorName::Implies, "->", Some(2), true, true),
	OperatorSignature::new(OperatorName::Not, "not", Some(1), true, true),
	OperatorSignature::new(OperatorName::Sum, "sum", None, false, false),
	OperatorSignature::new(OperatorName::WeightedSum, "wsum", None, false, false),
	OperatorSignature::new(OperatorName::Sub, "sub", Some(2), false, false),
	OperatorSignature::new(OperatorName::Neg, "neg", Some(1), false, false),
	OperatorSignature::new(OperatorName::Mul, "mul", Some(2), false, false),
	OperatorSignature::new(OperatorName::Div, "div", Some(2), false, false),
	OperatorSignature::new(OperatorName::Mod, "mod", Some(2), false, false),
	OperatorSignature::new(OperatorName::Pow, "pow", Some(2), false, false),
	OperatorSignature::new(OperatorName::Abs, "abs", Some(1), false, false),
];

impl Comparison {
	/// Create a comparison without any folding.
	pub(crate) fn new(relation: Relation, lhs: Expr, rhs: Expr) -> Self {
		Self {
			relation,
			lhs: Box::new(lhs),
			rhs: Box::new(rhs),
		}
	}

	/// The left-hand side of the comparison.
	pub fn lhs(&self) -> &Expr {
		&self.lhs
	}

	/// The relation that is required to hold.
	pub fn relation(&self) -> Relation {
		self.relation
	}

	/// The right-hand side of the comparison.
	pub fn rhs(&self) -> &Expr {
		&self.rhs
	}
}

impl Display for Comparison {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "({} {} {})", self.lhs, self.relation, self.rhs)
	}
}

impl Expr {
	/// Create the conjunction of the given Boolean expressions.
	///
	/// Constants are folded immediately: the result is `false` as soon as one
	/// of the expressions is `false`, `true` when no expressions remain, and the
	/// remaining expression itself when only one remains.
	pub fn all(exprs: impl IntoIterator<Item = Expr>) -> Result<Expr, ReformulationError> {
		Self::fold_connective(OperatorName::And, exprs)
	}

	/// Create the disjunction of the given Boolean expressions.
	///
	/// Constants are folded immediately: the result is `true` as soon as one of
	/// the expressions is `true`, `false` when no expressions remain, and the
	/// remaining expression itself when only one remains.
	pub fn any(exprs: impl IntoIterator<Item = Expr>) -> Result<Expr, ReformulationError> {
		Self::fold_connective(OperatorName::Or, exprs)
	}

	/// Create a comparison between `lhs` and `rhs`.
	///
	/// A comparison between two constants is folded into a Boolean constant.
	pub fn compare(relation: Relation, lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Expr {
		let (lhs, rhs) = (lhs.into(), rhs.into());
		match (lhs.as_const(), rhs.as_const()) {
			(Some(l), Some(r)) => Expr::Bool(relation.holds(l, r)),
			_ => Expr::Comparison(Comparison::new(relation, lhs, rhs)),
		}
	}

	/// Create the comparison `self == rhs`.
	pub fn eq(self, rhs: impl Into<Expr>) -> Expr {
		Self::compare(Relation::Eq, self, rhs)
	}

	/// Compute the value of the expression under the given valuation of its
	/// variables.
	///
	/// Boolean values are represented as `0` and `1`. The result is `None` when
	/// a variable has no value, or when the expression is undefined (e.g.
	/// division by zero, or an element index out of range). Undefinedness
	/// propagates to all enclosing expressions.
	pub fn evaluate<F: Fn(Decision) -> Option<IntVal>>(&self, valuation: &F) -> Option<IntVal> {
		match self {
			Expr::Bool(b) => Some(IntVal::from(*b)),
			Expr::Int(i) => Some(*i),
			Expr::BoolVar(v) => valuation(Decision::Bool(*v)),
			Expr::NegBoolVar(v) => valuation(Decision::Bool(*v)).map(|x| 1 - x),
			Expr::IntVar(v) => valuation(Decision::Int(*v)),
			Expr::Operator(op) => {
				let vals: Vec<_> = op
					.args
					.iter()
					.map(|arg| arg.evaluate(valuation))
					.collect::<Option<_>>()?;
				op.apply(&vals)
			}
			Expr::Comparison(c) => {
				let lhs = c.lhs.evaluate(valuation)?;
				let rhs = c.rhs.evaluate(valuation)?;
				Some(IntVal::from(c.relation.holds(lhs, rhs)))
			}
			Expr::Global(g) => {
				let vals: Vec<_> = g
					.args
					.iter()
					.map(|arg| arg.evaluate(valuation))
					.collect::<Option<_>>()?;
				g.apply(&vals)
			}
		}
	}

	/// Fold a sequence of Boolean expressions into a conjunction or disjunction.
	fn fold_connective(
		name: OperatorName,
		exprs: impl IntoIterator<Item = Expr>,
	) -> Result<Expr, ReformulationError> {
		// The constant that decides the connective
		let decisive = name == OperatorName::Or;
		let mut args = Vec::new();
		for e in exprs {
			if !e.is_bool() {
				return Err(ReformulationError::malformed(
					name.symbol(),
					format!("argument `{e}` is not Boolean-valued"),
				));
			}
			match e {
				Expr::Bool(b) if b == decisive => return Ok(Expr::Bool(decisive)),
				Expr::Bool(_) => {}
				e => args.push(e),
			}
		}
		Ok(match args.len() {
			0 => Expr::Bool(!decisive),
			1 => args.pop().unwrap_or(Expr::Bool(!decisive)),
			_ => Expr::Operator(Operator::new(name, args)),
		})
	}

	/// Create the comparison `self >= rhs`.
	pub fn ge(self, rhs: impl Into<Expr>) -> Expr {
		Self::compare(Relation::Ge, self, rhs)
	}

	/// Create a global constraint, validating its argument layout.
	///
	/// See [`GlobalConstraint`] for the layout of the arguments. The free
	/// functions [`crate::all_different`], [`crate::element`],
	/// [`crate::cumulative`], etc. provide a more structured interface.
	pub fn global(name: GlobalName, args: Vec<Expr>) -> Result<Expr, ReformulationError> {
		let malformed = |reason: &str| Err(ReformulationError::malformed(name.symbol(), reason));
		match name {
			GlobalName::AllDifferent | GlobalName::AllEqual => {}
			GlobalName::Circuit | GlobalName::Maximum | GlobalName::Minimum => {
				if args.is_empty() {
					return malformed("expected at least one argument");
				}
			}
			GlobalName::Element => {
				if args.len() < 2 {
					return malformed("expected a non-empty array and an index");
				}
			}
			GlobalName::Cumulative => {
				if args.len() < 5 || (args.len() - 1) % 4 != 0 {
					return malformed(
						"expected four lists of equal, non-zero length and a capacity",
					);
				}
				let n = (args.len() - 1) / 4;
				let negative = |e: &Expr| matches!(e, Expr::Int(v) if *v < 0);
				if args[n..2 * n].iter().chain(&args[3 * n..4 * n]).any(negative) {
					return malformed("durations and demands must be non-negative");
				}
			}
		}
		Ok(Expr::Global(GlobalConstraint { name, args }))
	}

	/// Create the comparison `self > rhs`.
	pub fn gt(self, rhs: impl Into<Expr>) -> Expr {
		Self::compare(Relation::Gt, self, rhs)
	}

	/// Create the implication `self -> rhs`.
	///
	/// Constant operands are folded immediately: `true -> b` is `b`, `false ->
	/// b` and `a -> true` are `true`, and `a -> false` is the negation of `a`.
	pub fn implies(self, rhs: impl Into<Expr>) -> Result<Expr, ReformulationError> {
		let rhs = rhs.into();
		for e in [&self, &rhs] {
			if !e.is_bool() {
				return Err(ReformulationError::malformed(
					OperatorName::Implies.symbol(),
					format!("argument `{e}` is not Boolean-valued"),
				));
			}
		}
		match (&self, &rhs) {
			(Expr::Bool(true), _) => Ok(rhs),
			(Expr::Bool(false), _) | (_, Expr::Bool(true)) => Ok(Expr::Bool(true)),
			(_, Expr::Bool(false)) => self.negate(),
			_ => Ok(Expr::Operator(Operator::new(
				OperatorName::Implies,
				vec![self, rhs],
			))),
		}
	}

	/// Return the value of the expression if it is a constant.
	pub(crate) fn as_const(&self) -> Option<IntVal> {
		match self {
			Expr::Bool(b) => Some(IntVal::from(*b)),
			Expr::Int(i) => Some(*i),
			_ => None,
		}
	}

	/// Whether the expression is Boolean-valued, i.e. whether it can be used as a
	/// constraint.
	pub fn is_bool(&self) -> bool {
		match self {
			Expr::Bool(_) | Expr::BoolVar(_) | Expr::NegBoolVar(_) | Expr::Comparison(_) => true,
			Expr::Int(_) | Expr::IntVar(_) => false,
			Expr::Operator(op) => op.name.is_boolean(),
			Expr::Global(g) => g.name.is_boolean(),
		}
	}

	/// Whether the expression is a constant.
	pub fn is_const(&self) -> bool {
		matches!(self, Expr::Bool(_) | Expr::Int(_))
	}

	/// Whether the expression is a leaf: a constant or a (negated) variable.
	pub fn is_leaf(&self) -> bool {
		matches!(
			self,
			Expr::Bool(_) | Expr::Int(_) | Expr::BoolVar(_) | Expr::NegBoolVar(_) | Expr::IntVar(_)
		)
	}

	/// Create the comparison `self <= rhs`.
	pub fn le(self, rhs: impl Into<Expr>) -> Expr {
		Self::compare(Relation::Le, self, rhs)
	}

	/// Create the comparison `self < rhs`.
	pub fn lt(self, rhs: impl Into<Expr>) -> Expr {
		Self::compare(Relation::Lt, self, rhs)
	}

	/// Create the comparison `self != rhs`.
	pub fn ne(self, rhs: impl Into<Expr>) -> Expr {
		Self::compare(Relation::Ne, self, rhs)
	}

	/// Create the negation of a Boolean expression.
	///
	/// The negation is pushed inward where possible: comparisons flip their
	/// relation, conjunctions and disjunctions are swapped (De Morgan), `a -> b`
	/// becomes `a and not b`, and exclusive disjunctions negate their first
	/// argument. Boolean global constraints are wrapped in `not`.
	pub fn negate(&self) -> Result<Expr, ReformulationError> {
		let negate_all =
			|args: &[Expr]| args.iter().map(Expr::negate).collect::<Result<Vec<_>, _>>();
		match self {
			Expr::Bool(b) => Ok(Expr::Bool(!b)),
			Expr::BoolVar(v) => Ok(Expr::NegBoolVar(*v)),
			Expr::NegBoolVar(v) => Ok(Expr::BoolVar(*v)),
			Expr::Comparison(c) => Ok(Expr::Comparison(Comparison {
				relation: c.relation.negate(),
				lhs: c.lhs.clone(),
				rhs: c.rhs.clone(),
			})),
			Expr::Operator(op) => match op.name {
				OperatorName::Not => Ok(op.args[0].clone()),
				OperatorName::And => Expr::any(negate_all(&op.args)?),
				OperatorName::Or => Expr::all(negate_all(&op.args)?),
				OperatorName::Implies => Expr::all([op.args[0].clone(), op.args[1].negate()?]),
				OperatorName::Xor => {
					let mut args = op.args.clone();
					args[0] = args[0].negate()?;
					Ok(Expr::Operator(Operator::new(OperatorName::Xor, args)))
				}
				_ => Err(ReformulationError::malformed(
					OperatorName::Not.symbol(),
					format!("cannot negate integer expression `{self}`"),
				)),
			},
			Expr::Global(g) if g.name.is_boolean() => Ok(Expr::Operator(Operator::new(
				OperatorName::Not,
				vec![self.clone()],
			))),
			Expr::Int(_) | Expr::IntVar(_) | Expr::Global(_) => Err(ReformulationError::malformed(
				OperatorName::Not.symbol(),
				format!("cannot negate integer expression `{self}`"),
			)),
		}
	}

	/// Create an operator, validating the number and kind of its arguments.
	///
	/// Unlike [`Expr::all`] and [`Expr::any`], no constant folding takes place.
	/// Weighted sums are created using [`Expr::weighted_sum`].
	pub fn operator(name: OperatorName, args: Vec<Expr>) -> Result<Expr, ReformulationError> {
		if name == OperatorName::WeightedSum {
			return Err(ReformulationError::malformed(
				name.symbol(),
				"weighted sums require weights",
			));
		}
		let sig = name.signature();
		Self::check_args(sig, &args)?;
		Ok(Expr::Operator(Operator::new(name, args)))
	}

	/// Check the arguments of an operator against its signature.
	fn check_args(sig: &OperatorSignature, args: &[Expr]) -> Result<(), ReformulationError> {
		match sig.arity {
			Some(n) if args.len() != n => {
				return Err(ReformulationError::malformed(
					sig.symbol,
					format!("expected {n} argument(s), found {}", args.len()),
				));
			}
			None if args.is_empty() => {
				return Err(ReformulationError::malformed(
					sig.symbol,
					"expected at least one argument",
				));
			}
			_ => {}
		}
		if sig.bool_args {
			if let Some(arg) = args.iter().find(|a| !a.is_bool()) {
				return Err(ReformulationError::malformed(
					sig.symbol,
					format!("argument `{arg}` is not Boolean-valued"),
				));
			}
		}
		Ok(())
	}

	/// Call `f` for every variable that occurs in the expression.
	pub(crate) fn visit_vars<F: FnMut(Decision)>(&self, f: &mut F) {
		match self {
			Expr::Bool(_) | Expr::Int(_) => {}
			Expr::BoolVar(v) | Expr::NegBoolVar(v) => f(Decision::Bool(*v)),
			Expr::IntVar(v) => f(Decision::Int(*v)),
			Expr::Operator(Operator { args, .. }) | Expr::Global(GlobalConstraint { args, .. }) => {
				for arg in args {
					arg.visit_vars(f);
				}
			}
			Expr::Comparison(c) => {
				c.lhs.visit_vars(f);
				c.rhs.visit_vars(f);
			}
		}
	}

	/// Create a weighted sum `weights[0] * args[0] + ... + weights[n-1] *
	/// args[n-1]`.
	pub fn weighted_sum(weights: Vec<IntVal>, args: Vec<Expr>) -> Result<Expr, ReformulationError> {
		let sig = OperatorName::WeightedSum.signature();
		Self::check_args(sig, &args)?;
		if weights.len() != args.len() {
			return Err(ReformulationError::malformed(
				sig.symbol,
				format!(
					"expected one weight per argument, found {} weights for {} arguments",
					weights.len(),
					args.len()
				),
			));
		}
		Ok(Expr::Operator(Operator {
			name: OperatorName::WeightedSum,
			args,
			weights,
		}))
	}

	/// Create the exclusive disjunction of the given Boolean expressions.
	pub fn xor(args: Vec<Expr>) -> Result<Expr, ReformulationError> {
		Self::operator(OperatorName::Xor, args)
	}
}

impl<R: Into<Expr>> Add<R> for Expr {
	type Output = Expr;

	fn add(self, rhs: R) -> Expr {
		let rhs = rhs.into();
		match self {
			Expr::Operator(Operator {
				name: OperatorName::Sum,
				mut args,
				..
			}) => {
				args.push(rhs);
				Expr::Operator(Operator::new(OperatorName::Sum, args))
			}
			lhs => Expr::Operator(Operator::new(OperatorName::Sum, vec![lhs, rhs])),
		}
	}
}

impl Display for Expr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Expr::Bool(b) => write!(f, "{b}"),
			Expr::Int(i) => write!(f, "{i}"),
			Expr::BoolVar(v) => write!(f, "{v}"),
			Expr::NegBoolVar(v) => write!(f, "!{v}"),
			Expr::IntVar(v) => write!(f, "{v}"),
			Expr::Operator(op) => write!(f, "{op}"),
			Expr::Comparison(c) => write!(f, "{c}"),
			Expr::Global(g) => write!(f, "{g}"),
		}
	}
}

impl From<bool> for Expr {
	fn from(value: bool) -> Self {
		Expr::Bool(value)
	}
}

impl From<BoolVar> for Expr {
	fn from(value: BoolVar) -> Self {
		Expr::BoolVar(value)
	}
}

impl From<Decision> for Expr {
	fn from(value: Decision) -> Self {
		match value {
			Decision::Bool(v) => Expr::BoolVar(v),
			Decision::Int(v) => Expr::IntVar(v),
		}
	}
}

impl From<i32> for Expr {
	fn from(value: i32) -> Self {
		Expr::Int(IntVal::from(value))
	}
}

impl From<IntVal> for Expr {
	fn from(value: IntVal) -> Self {
		Expr::Int(value)
	}
}

impl From<IntVar> for Expr {
	fn from(value: IntVar) -> Self {
		Expr::IntVar(value)
	}
}

impl<R: Into<Expr>> Mul<R> for Expr {
	type Output = Expr;

	fn mul(self, rhs: R) -> Expr {
		Expr::Operator(Operator::new(OperatorName::Mul, vec![self, rhs.into()]))
	}
}

impl Neg for Expr {
	type Output = Expr;

	fn neg(self) -> Expr {
		Expr::Operator(Operator::new(OperatorName::Neg, vec![self]))
	}
}

impl<R: Into<Expr>> Sub<R> for Expr {
	type Output = Expr;

	fn sub(self, rhs: R) -> Expr {
		Expr::Operator(Operator::new(OperatorName::Sub, vec![self, rhs.into()]))
	}
}

impl GlobalConstraint {
	/// Compute the value of the global constraint given the values of its
	/// arguments, or `None` if the value is undefined.
	pub(crate) fn apply(&self, vals: &[IntVal]) -> Option<IntVal> {
		match self.name {
			GlobalName::AllDifferent => Some(IntVal::from(vals.iter().all_unique())),
			GlobalName::AllEqual => Some(IntVal::from(vals.iter().all_equal())),
			GlobalName::Circuit => Some(IntVal::from(circuit_holds(vals))),
			GlobalName::Cumulative => Some(IntVal::from(cumulative_holds(vals))),
			GlobalName::Element => {
				let (index, array) = vals.split_last()?;
				let index = usize::try_from(*index).ok()?;
				array.get(index).copied()
			}
			GlobalName::Maximum => vals.iter().copied().max(),
			GlobalName::Minimum => vals.iter().copied().min(),
		}
	}

	/// The arguments of the global constraint.
	pub fn args(&self) -> &[Expr] {
		&self.args
	}

	/// The kind of global constraint.
	pub fn name(&self) -> GlobalName {
		self.name
	}
}

impl Display for GlobalConstraint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let list = |args: &[Expr]| format!("[{}]", args.iter().format(", "));
		let name = self.name.symbol();
		match self.name {
			GlobalName::Element => {
				let (index, array) = self.args.split_last().ok_or(fmt::Error)?;
				write!(f, "{name}({}, {index})", list(array))
			}
			GlobalName::Cumulative => {
				let n = self.args.len() / 4;
				write!(
					f,
					"{name}({}, {}, {}, {}, {})",
					list(&self.args[..n]),
					list(&self.args[n..2 * n]),
					list(&self.args[2 * n..3 * n]),
					list(&self.args[3 * n..4 * n]),
					self.args[4 * n]
				)
			}
			_ => write!(f, "{name}({})", self.args.iter().format(", ")),
		}
	}
}

impl GlobalName {
	/// Bit used to represent the global constraint in a set of names.
	pub(crate) const fn bit(self) -> u32 {
		1 << self as u32
	}

	/// Whether the global constraint is Boolean-valued (a constraint), rather than
	/// integer-valued (a function).
	pub fn is_boolean(self) -> bool {
		!matches!(
			self,
			GlobalName::Element | GlobalName::Maximum | GlobalName::Minimum
		)
	}

	/// Name used to display (and parse) the global constraint.
	pub fn symbol(self) -> &'static str {
		match self {
			GlobalName::AllDifferent => "alldifferent",
			GlobalName::AllEqual => "allequal",
			GlobalName::Circuit => "circuit",
			GlobalName::Cumulative => "cumulative",
			GlobalName::Element => "element",
			GlobalName::Maximum => "max",
			GlobalName::Minimum => "min",
		}
	}
}

impl FromStr for GlobalName {
	type Err = ReformulationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		use GlobalName::*;

		[
			AllDifferent,
			AllEqual,
			Circuit,
			Cumulative,
			Element,
			Maximum,
			Minimum,
		]
		.into_iter()
		.find(|g| g.symbol() == s)
		.ok_or_else(|| ReformulationError::UnsupportedExpression { name: s.to_owned() })
	}
}

impl Operator {
	/// Create an operator without validating its arguments.
	pub(crate) fn new(name: OperatorName, args: Vec<Expr>) -> Self {
		Self {
			name,
			args,
			weights: Vec::new(),
		}
	}

	/// Compute the value of the operator given the values of its arguments, or
	/// `None` if the value is undefined or does not fit in an [`IntVal`].
	pub(crate) fn apply(&self, vals: &[IntVal]) -> Option<IntVal> {
		use OperatorName::*;

		match self.name {
			And => Some(IntVal::from(vals.iter().all(|&v| v != 0))),
			Or => Some(IntVal::from(vals.iter().any(|&v| v != 0))),
			Xor => Some(IntVal::from(vals.iter().filter(|&&v| v != 0).count() % 2 == 1)),
			Implies => Some(IntVal::from(vals[0] == 0 || vals[1] != 0)),
			Not => Some(IntVal::from(vals[0] == 0)),
			Sum => vals.iter().try_fold(0, |acc: IntVal, &v| acc.checked_add(v)),
			WeightedSum => self
				.weights
				.iter()
				.zip(vals)
				.try_fold(0, |acc: IntVal, (&w, &v)| acc.checked_add(w.checked_mul(v)?)),
			Sub => vals[0].checked_sub(vals[1]),
			Neg => vals[0].checked_neg(),
			Mul => vals[0].checked_mul(vals[1]),
			Div => vals[0].checked_div(vals[1]),
			Mod => vals[0].checked_rem(vals[1]),
			Pow => u32::try_from(vals[1])
				.ok()
				.and_then(|exp| vals[0].checked_pow(exp)),
			Abs => vals[0].checked_abs(),
		}
	}

	/// The arguments of the operator.
	pub fn args(&self) -> &[Expr] {
		&self.args
	}

	/// The operator that is applied.
	pub fn name(&self) -> OperatorName {
		self.name
	}

	/// The weights of a weighted sum (empty for all other operators).
	pub fn weights(&self) -> &[IntVal] {
		&self.weights
	}
}

impl Display for Operator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.name {
			OperatorName::Implies => write!(f, "({} -> {})", self.args[0], self.args[1]),
			OperatorName::WeightedSum => write!(
				f,
				"wsum([{}], [{}])",
				self.weights.iter().format(", "),
				self.args.iter().format(", ")
			),
			name => write!(f, "{}({})", name.symbol(), self.args.iter().format(", ")),
		}
	}
}

impl OperatorName {
	/// All operators, in the order of [`OPERATOR_TABLE`].
	pub const ALL: [OperatorName; 14] = [
		OperatorName::And,
		OperatorName::Or,
		OperatorName::Xor,
		OperatorName::Implies,
		OperatorName::Not,
		OperatorName::Sum,
		OperatorName::WeightedSum,
		OperatorName::Sub,
		OperatorName::Neg,
		OperatorName::Mul,
		OperatorName::Div,
		OperatorName::Mod,
		OperatorName::Pow,
		OperatorName::Abs,
	];

	/// Bit used to represent the operator in a set of names.
	pub(crate) const fn bit(self) -> u32 {
		1 << self as u32
	}

	/// Whether the operator is Boolean-valued.
	pub fn is_boolean(self) -> bool {
		self.signature().boolean
	}

	/// The signature of the operator.
	pub(crate) fn signature(self) -> &'static OperatorSignature {
		&OPERATOR_TABLE[self as usize]
	}

	/// Name used to display (and parse) the operator.
	pub fn symbol(self) -> &'static str {
		self.signature().symbol
	}
}

impl Display for OperatorName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.symbol())
	}
}

impl FromStr for OperatorName {
	type Err = ReformulationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		OPERATOR_TABLE
			.iter()
			.find(|sig| sig.symbol == s)
			.map(|sig| sig.name)
			.ok_or_else(|| ReformulationError::UnsupportedExpression { name: s.to_owned() })
	}
}

impl OperatorSignature {
	/// Create a new entry for the [`OPERATOR_TABLE`].
	const fn new(
		name: OperatorName,
		symbol: &'static str,
		arity: Option<usize>,
		boolean: bool,
		bool_args: bool,
	) -> Self {
		Self {
			name,
			symbol,
			arity,
			boolean,
			bool_args,
		}
	}
}

impl Relation {
	/// Whether the relation holds between `lhs` and `rhs`.
	pub fn holds(self, lhs: IntVal, rhs: IntVal) -> bool {
		match self {
			Relation::Eq => lhs == rhs,
			Relation::Ne => lhs != rhs,
			Relation::Lt => lhs < rhs,
			Relation::Le => lhs <= rhs,
			Relation::Gt => lhs > rhs,
			Relation::Ge => lhs >= rhs,
		}
	}

	/// The relation that holds for `rhs ⊙ lhs` exactly when `self` holds for
	/// `lhs ⊙ rhs`.
	pub fn mirror(self) -> Relation {
		match self {
			Relation::Lt => Relation::Gt,
			Relation::Le => Relation::Ge,
			Relation::Gt => Relation::Lt,
			Relation::Ge => Relation::Le,
			r => r,
		}
	}

	/// The relation that holds exactly when `self` does not.
	pub fn negate(self) -> Relation {
		match self {
			Relation::Eq => Relation::Ne,
			Relation::Ne => Relation::Eq,
			Relation::Lt => Relation::Ge,
			Relation::Le => Relation::Gt,
			Relation::Gt => Relation::Le,
			Relation::Ge => Relation::Lt,
		}
	}

	/// Symbol used to display (and parse) the relation.
	pub fn symbol(self) -> &'static str {
		match self {
			Relation::Eq => "==",
			Relation::Ne => "!=",
			Relation::Lt => "<",
			Relation::Le => "<=",
			Relation::Gt => ">",
			Relation::Ge => ">=",
		}
	}
}

impl Display for Relation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.symbol())
	}
}

impl FromStr for Relation {
	type Err = ReformulationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		use Relation::*;

		[Eq, Ne, Lt, Le, Gt, Ge]
			.into_iter()
			.find(|r| r.symbol() == s)
			.ok_or_else(|| ReformulationError::UnsupportedExpression { name: s.to_owned() })
	}
}

impl IntVar {
	/// Create the comparison `self == rhs`.
	pub fn eq(self, rhs: impl Into<Expr>) -> Expr {
		Expr::from(self).eq(rhs)
	}

	/// Create the comparison `self >= rhs`.
	pub fn ge(self, rhs: impl Into<Expr>) -> Expr {
		Expr::from(self).ge(rhs)
	}

	/// Create the comparison `self > rhs`.
	pub fn gt(self, rhs: impl Into<Expr>) -> Expr {
		Expr::from(self).gt(rhs)
	}

	/// Create the comparison `self <= rhs`.
	pub fn le(self, rhs: impl Into<Expr>) -> Expr {
		Expr::from(self).le(rhs)
	}

	/// Create the comparison `self < rhs`.
	pub fn lt(self, rhs: impl Into<Expr>) -> Expr {
		Expr::from(self).lt(rhs)
	}

	/// Create the comparison `self != rhs`.
	pub fn ne(self, rhs: impl Into<Expr>) -> Expr {
		Expr::from(self).ne(rhs)
	}
}

impl<R: Into<Expr>> Add<R> for IntVar {
	type Output = Expr;

	fn add(self, rhs: R) -> Expr {
		Expr::from(self) + rhs
	}
}

impl<R: Into<Expr>> Mul<R> for IntVar {
	type Output = Expr;

	fn mul(self, rhs: R) -> Expr {
		Expr::from(self) * rhs
	}
}

impl Neg for IntVar {
	type Output = Expr;

	fn neg(self) -> Expr {
		-Expr::from(self)
	}
}

impl<R: Into<Expr>> Sub<R> for IntVar {
	type Output = Expr;

	fn sub(self, rhs: R) -> Expr {
		Expr::from(self) - rhs
	}
}

impl BoolVar {
	/// Create the implication `self -> rhs`.
	pub fn implies(self, rhs: impl Into<Expr>) -> Result<Expr, ReformulationError> {
		Expr::from(self).implies(rhs)
	}
}

impl Not for BoolVar {
	type Output = Expr;

	fn not(self) -> Expr {
		Expr::NegBoolVar(self)
	}
}

/// Whether `succ` is the successor array of a single cycle visiting all nodes.
fn circuit_holds(succ: &[IntVal]) -> bool {
	let n = succ.len();
	let mut visited = vec![false; n];
	let mut cur = 0;
	for _ in 0..n {
		if visited[cur] {
			return false;
		}
		visited[cur] = true;
		match usize::try_from(succ[cur]) {
			Ok(next) if next < n => cur = next,
			_ => return false,
		}
	}
	cur == 0
}

/// Whether the tasks described by the flat `cumulative` argument values are
/// consistent and never exceed the capacity.
///
/// Every time point from the earliest start up to and including the latest end
/// is checked.
fn cumulative_holds(vals: &[IntVal]) -> bool {
	let n = vals.len() / 4;
	let (tasks, capacity) = vals.split_at(4 * n);
	let [capacity] = capacity else {
		return false;
	};
	let (start, rest) = tasks.split_at(n);
	let (duration, rest) = rest.split_at(n);
	let (end, demand) = rest.split_at(n);
	for i in 0..n {
		if duration[i] < 0 || demand[i] < 0 || start[i].checked_add(duration[i]) != Some(end[i]) {
			return false;
		}
	}
	let (Some(&lb), Some(&ub)) = (start.iter().min(), end.iter().max()) else {
		return false;
	};
	(lb..=ub).all(|t| {
		let load = (0..n)
			.filter(|&i| start[i] <= t && t < end[i])
			.fold(0, |acc: IntVal, i| acc.saturating_add(demand[i]));
		load <= *capacity
	})
}

#[cfg(test)]
mod tests {
	use expect_test::expect;
	use tracing_test::traced_test;

	use crate::{
		expression::{Expr, GlobalName, OperatorName, Relation, OPERATOR_TABLE},
		model::Model,
		ReformulationError,
	};

	#[test]
	#[traced_test]
	fn test_operator_table_order() {
		for (i, name) in OperatorName::ALL.into_iter().enumerate() {
			assert_eq!(OPERATOR_TABLE[i].name, name);
			assert_eq!(name.symbol().parse::<OperatorName>(), Ok(name));
		}
		assert_eq!(
			"foo".parse::<OperatorName>(),
			Err(ReformulationError::UnsupportedExpression {
				name: "foo".to_owned()
			})
		);
		assert_eq!("max".parse::<GlobalName>(), Ok(GlobalName::Maximum));
		assert!("nvalue".parse::<GlobalName>().is_err());
		assert_eq!("<=".parse::<Relation>(), Ok(Relation::Le));
	}

	#[test]
	#[traced_test]
	fn test_implies_folding() {
		let mut prb = Model::default();
		let a = prb.new_bool_var();
		let b = prb.new_bool_var();

		assert_eq!(Expr::Bool(true).implies(b), Ok(Expr::BoolVar(b)));
		assert_eq!(Expr::Bool(false).implies(b), Ok(Expr::Bool(true)));
		assert_eq!(a.implies(true), Ok(Expr::Bool(true)));
		assert_eq!(a.implies(false), Ok(!a));
		expect!["(b0 -> b1)"].assert_eq(&a.implies(b).unwrap().to_string());

		let x = prb.new_int_var(0, 3);
		assert!(matches!(
			a.implies(x),
			Err(ReformulationError::MalformedExpression { .. })
		));
	}

	#[test]
	#[traced_test]
	fn test_all_any_short_circuit() {
		let mut prb = Model::default();
		let a = prb.new_bool_var();
		let b = prb.new_bool_var();
		let x = prb.new_int_var(0, 3);

		assert_eq!(Expr::all([a.into(), false.into(), b.into()]), Ok(Expr::Bool(false)));
		assert_eq!(Expr::all([true.into(), a.into()]), Ok(Expr::BoolVar(a)));
		assert_eq!(Expr::all([]), Ok(Expr::Bool(true)));
		assert_eq!(Expr::any([a.into(), true.into()]), Ok(Expr::Bool(true)));
		assert_eq!(Expr::any([false.into(), false.into()]), Ok(Expr::Bool(false)));
		assert_eq!(Expr::any([]), Ok(Expr::Bool(false)));
		expect!["or(b0, (x2 > 1))"].assert_eq(
			&Expr::any([a.into(), false.into(), x.gt(1)])
				.unwrap()
				.to_string(),
		);
		assert!(Expr::all([a.into(), x.into()]).is_err());
	}

	#[test]
	#[traced_test]
	fn test_malformed_operators() {
		let mut prb = Model::default();
		let a = prb.new_bool_var();
		let x = prb.new_int_var(0, 3);

		let err = Expr::operator(OperatorName::Mul, vec![x.into()]).unwrap_err();
		expect!["malformed expression `mul`: expected 2 argument(s), found 1"]
			.assert_eq(&err.to_string());
		let err = Expr::operator(OperatorName::And, vec![a.into(), x.into()]).unwrap_err();
		expect!["malformed expression `and`: argument `x1` is not Boolean-valued"]
			.assert_eq(&err.to_string());
		assert!(Expr::operator(OperatorName::Sum, vec![]).is_err());
		assert!(Expr::operator(OperatorName::WeightedSum, vec![x.into()]).is_err());
		assert!(Expr::weighted_sum(vec![1, 2], vec![x.into()]).is_err());
		assert!(Expr::global(GlobalName::Element, vec![x.into()]).is_err());
		assert!(Expr::global(GlobalName::Minimum, vec![]).is_err());
		assert!(Expr::from(x).negate().is_err());
		// Boolean arguments are allowed in arithmetic
		assert!(Expr::operator(OperatorName::Sum, vec![a.into(), x.into()]).is_ok());
	}

	#[test]
	#[traced_test]
	fn test_negate() {
		let mut prb = Model::default();
		let a = prb.new_bool_var();
		let b = prb.new_bool_var();
		let x = prb.new_int_var(0, 3);

		let f = Expr::all([a.into(), x.lt(2)]).unwrap();
		expect!["or(!b0, (x2 >= 2))"].assert_eq(&f.negate().unwrap().to_string());
		let f = a.implies(b).unwrap();
		expect!["and(b0, !b1)"].assert_eq(&f.negate().unwrap().to_string());
		let f = Expr::xor(vec![a.into(), b.into()]).unwrap();
		expect!["xor(!b0, b1)"].assert_eq(&f.negate().unwrap().to_string());
		let f = crate::all_different([x.into(), Expr::from(a)]).unwrap();
		expect!["not(alldifferent(x2, b0))"].assert_eq(&f.negate().unwrap().to_string());
		assert_eq!(f.negate().unwrap().negate(), Ok(f));
	}

	#[test]
	#[traced_test]
	fn test_evaluate() {
		let mut prb = Model::default();
		let x = prb.new_int_var(-5, 5);
		let y = prb.new_int_var(-5, 5);
		let eval = |e: &Expr, vx, vy| {
			e.evaluate(&|d| match d {
				crate::Decision::Int(v) if v == x => Some(vx),
				crate::Decision::Int(v) if v == y => Some(vy),
				_ => None,
			})
		};
		let div = Expr::operator(OperatorName::Div, vec![x.into(), y.into()]).unwrap();
		let rem = Expr::operator(OperatorName::Mod, vec![x.into(), y.into()]).unwrap();
		let pow = Expr::operator(OperatorName::Pow, vec![x.into(), y.into()]).unwrap();
		let abs = Expr::operator(OperatorName::Abs, vec![x - y]).unwrap();

		assert_eq!(eval(&div, 7, 2), Some(3));
		assert_eq!(eval(&div, -7, 2), Some(-3));
		assert_eq!(eval(&div, 7, 0), None);
		assert_eq!(eval(&rem, -7, 2), Some(-1));
		assert_eq!(eval(&rem, 7, 0), None);
		assert_eq!(eval(&pow, 2, 3), Some(8));
		assert_eq!(eval(&pow, 2, -1), None);
		assert_eq!(eval(&abs, 1, 4), Some(3));
		// undefinedness propagates through the enclosing constraint
		assert_eq!(eval(&div.clone().eq(1).negate().unwrap(), 1, 0), None);
		assert_eq!(eval(&(x * 3).le(y + 2), 1, 1), Some(1));

		let elem = crate::element([Expr::Int(4), Expr::Int(6)], y).unwrap();
		assert_eq!(eval(&elem, 0, 1), Some(6));
		assert_eq!(eval(&elem, 0, 2), None);
	}

	#[test]
	#[traced_test]
	fn test_display() {
		let mut prb = Model::default();
		let a = prb.new_bool_var();
		let xs = prb.new_int_vars(3, 0, 4);

		let wsum = Expr::weighted_sum(vec![2, -1], vec![xs[0].into(), a.into()]).unwrap();
		expect!["(wsum([2, -1], [x1, b0]) <= x3)"].assert_eq(&wsum.le(xs[2]).to_string());
		let cum = crate::cumulative(
			[xs[0], xs[1]],
			[Expr::Int(2), Expr::Int(1)],
			[xs[1], xs[2]],
			[Expr::Int(1), Expr::Int(1)],
			Expr::Int(1),
		)
		.unwrap();
		expect!["cumulative([x1, x2], [2, 1], [x2, x3], [1, 1], 1)"].assert_eq(&cum.to_string());
		let elem = crate::element(xs.clone(), Expr::Int(1)).unwrap();
		expect!["(element([x1, x2, x3], 1) == neg(x1))"]
			.assert_eq(&Expr::compare(Relation::Eq, elem, -xs[0]).to_string());
		expect!["(sum(x1, x2, 3) != 1)"].assert_eq(&(xs[0] + xs[1] + 3).ne(1).to_string());
	}
}
