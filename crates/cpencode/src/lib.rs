//! # cpencode - Constraint models restated for restricted solvers
//!
//! cpencode takes constraint models written in a high-level language of
//! integer and Boolean decision variables, arithmetic, logic, comparisons and
//! global constraints, and restates them in the much smaller language accepted
//! by a target solver. The pipeline consists of three stages:
//!
//! - *flattening* rewrites arbitrarily nested expressions into conjunctions of
//!   flat constraints, introducing auxiliary variables for nested
//!   subexpressions,
//! - *decomposition* replaces global constraints that the target does not
//!   support natively by equivalent primitive constraints,
//! - *encoding* maps integer variables to one-hot sets of Boolean indicator
//!   variables and turns every flat constraint into clauses.
//!
//! The resulting clauses are handed to a [`SatBackend`] by a [`Solver`], which
//! keeps the encoding incremental: constraints added after a solve only cause
//! the new clauses to be posted, and earlier indicator variables are reused.
//! Solutions of the backend are translated back into values of the original
//! variables.

pub mod backend;
pub(crate) mod decompose;
pub mod encode;
pub mod expression;
pub(crate) mod extract;
pub(crate) mod flatten;
pub mod model;
pub mod solver;

use std::iter::once;

use itertools::Itertools;
use thiserror::Error;

pub use pindakaas::Lit as RawLit;

pub use crate::{
	backend::{Clause, SatBackend, Vocabulary},
	encode::{EncodeConfig, EncodingLog, IndicatorMap, Indicators, LogEntry},
	expression::{
		Comparison, Expr, GlobalConstraint, GlobalName, Operator, OperatorName, Relation,
	},
	model::{BoolVar, Decision, IntVar, Model, SolveResult, Value, VarRef},
	solver::Solver,
};

/// Type alias for an parameter integer value.
pub type IntVal = i64;

#[derive(Error, Clone, Debug, PartialEq, Eq)]
/// Error type used when a constraint model cannot be restated for the target
/// solver.
pub enum ReformulationError {
	#[error("malformed expression `{name}`: {reason}")]
	/// Error used when an expression does not satisfy the signature of its
	/// operator or global constraint, or is used in a position where it cannot
	/// occur (e.g. an integer expression used as a constraint).
	MalformedExpression {
		/// Name of the offending operator, global constraint, or expression.
		name: String,
		/// Description of the problem.
		reason: String,
	},
	#[error("`{name}` is not supported by the target")]
	/// Error used when an operator, global constraint, or construct is not part
	/// of the vocabulary of the target and cannot be rewritten.
	UnsupportedExpression {
		/// Name of the unsupported operator or global constraint.
		name: String,
	},
	#[error("integer variable {var} has an empty domain [{lb}, {ub}]")]
	/// Error used when an integer variable is encoded whose lower bound exceeds
	/// its upper bound.
	InvalidDomain {
		/// The integer variable with the empty domain.
		var: IntVar,
		/// Lower bound of the domain.
		lb: IntVal,
		/// Upper bound of the domain.
		ub: IntVal,
	},
	#[error("integer variable {var} has {true_count} true indicators, expected exactly one")]
	/// Error used when a satisfying assignment reported by a backend does not
	/// make exactly one indicator variable of an integer variable true.
	EncodingInvariantViolation {
		/// The integer variable whose indicators are inconsistent.
		var: IntVar,
		/// The number of indicators that were true.
		true_count: usize,
	},
}

impl ReformulationError {
	/// Create a [`ReformulationError::MalformedExpression`] error.
	pub(crate) fn malformed(name: impl Into<String>, reason: impl Into<String>) -> Self {
		Self::MalformedExpression {
			name: name.into(),
			reason: reason.into(),
		}
	}
}

/// Create a constraint that enforces that all given expressions take pairwise
/// different values.
pub fn all_different<E: Into<Expr>>(
	args: impl IntoIterator<Item = E>,
) -> Result<Expr, ReformulationError> {
	Expr::global(GlobalName::AllDifferent, args.into_iter().map_into().collect())
}

/// Create a constraint that enforces that all given expressions take the same
/// value.
pub fn all_equal<E: Into<Expr>>(
	args: impl IntoIterator<Item = E>,
) -> Result<Expr, ReformulationError> {
	Expr::global(GlobalName::AllEqual, args.into_iter().map_into().collect())
}

/// Create a constraint that enforces that `succ` is the successor array of a
/// single cycle visiting every node `0..succ.len()` exactly once.
pub fn circuit<E: Into<Expr>>(
	succ: impl IntoIterator<Item = E>,
) -> Result<Expr, ReformulationError> {
	Expr::global(GlobalName::Circuit, succ.into_iter().map_into().collect())
}

/// Create a constraint that enforces that tasks, running from `starts[i]` for
/// `durations[i]` time units until `ends[i]` while using `demands[i]` of a
/// resource, never together use more than `capacity` of the resource.
pub fn cumulative<S, D, E, H>(
	starts: impl IntoIterator<Item = S>,
	durations: impl IntoIterator<Item = D>,
	ends: impl IntoIterator<Item = E>,
	demands: impl IntoIterator<Item = H>,
	capacity: impl Into<Expr>,
) -> Result<Expr, ReformulationError>
where
	S: Into<Expr>,
	D: Into<Expr>,
	E: Into<Expr>,
	H: Into<Expr>,
{
	let starts: Vec<Expr> = starts.into_iter().map_into().collect();
	let durations: Vec<Expr> = durations.into_iter().map_into().collect();
	let ends: Vec<Expr> = ends.into_iter().map_into().collect();
	let demands: Vec<Expr> = demands.into_iter().map_into().collect();
	let n = starts.len();
	if durations.len() != n || ends.len() != n || demands.len() != n {
		return Err(ReformulationError::malformed(
			GlobalName::Cumulative.symbol(),
			format!(
				"expected lists of equal length, found {n} starts, {} durations, {} ends, and \
				 {} demands",
				durations.len(),
				ends.len(),
				demands.len()
			),
		));
	}
	Expr::global(
		GlobalName::Cumulative,
		starts
			.into_iter()
			.chain(durations)
			.chain(ends)
			.chain(demands)
			.chain(once(capacity.into()))
			.collect(),
	)
}

/// Create an integer expression that takes the value of `array[index]`.
///
/// The expression is undefined when `index` is outside `0..array.len()`.
pub fn element<E: Into<Expr>>(
	array: impl IntoIterator<Item = E>,
	index: impl Into<Expr>,
) -> Result<Expr, ReformulationError> {
	Expr::global(
		GlobalName::Element,
		array
			.into_iter()
			.map_into()
			.chain(once(index.into()))
			.collect(),
	)
}

/// Create an integer expression that takes the largest value of the given
/// expressions.
pub fn maximum<E: Into<Expr>>(
	args: impl IntoIterator<Item = E>,
) -> Result<Expr, ReformulationError> {
	Expr::global(GlobalName::Maximum, args.into_iter().map_into().collect())
}

/// Create an integer expression that takes the smallest value of the given
/// expressions.
pub fn minimum<E: Into<Expr>>(
	args: impl IntoIterator<Item = E>,
) -> Result<Expr, ReformulationError> {
	Expr::global(GlobalName::Minimum, args.into_iter().map_into().collect())
}
