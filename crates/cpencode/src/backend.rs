//! Interface between the encoding of a [`crate::Model`] and the solvers that
//! receive it.
//!
//! A target is described by two things: the [`Vocabulary`] of operators and
//! global constraints that it accepts natively, and, for clause-based targets,
//! a [`SatBackend`]: a `pindakaas` clause database that can be solved under
//! assumptions, such as [`pindakaas::solver::cadical::Cadical`].

use pindakaas::{solver::SolveAssuming, ClauseDatabase, Lit as RawLit};

use crate::expression::{GlobalName, OperatorName};

/// Type alias for a disjunction of literals.
pub type Clause = Vec<RawLit>;

/// A clause-based (SAT) solver that receives the encoding of a
/// [`crate::Model`].
///
/// Backends are used incrementally: clauses are only ever added, and
/// [`SolveAssuming::solve_assuming`] can be called any number of times in
/// between. The variables of the encoding are reserved in the backend using
/// [`ClauseDatabase::new_var_range`] before they are used, so a backend must
/// not contain any variables of its own when it is handed to a
/// [`crate::Solver`].
pub trait SatBackend: ClauseDatabase + SolveAssuming {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// The operators and global constraints that a target accepts natively.
///
/// Flattening leaves natively supported global constraints intact, and
/// decomposes all others. Operators that are not supported cannot be rewritten,
/// and are reported as [`crate::ReformulationError::UnsupportedExpression`].
pub struct Vocabulary {
	/// Set of supported operators, one bit per [`OperatorName`].
	operators: u32,
	/// Set of supported global constraints, one bit per [`GlobalName`].
	globals: u32,
}

impl<S: ClauseDatabase + SolveAssuming> SatBackend for S {}

impl Vocabulary {
	/// Vocabulary of a clause-based target: all logical and arithmetic operators
	/// can be encoded, but no global constraint is supported natively.
	pub const BOOLEAN: Vocabulary = Vocabulary {
		operators: Self::mask_operators(&OperatorName::ALL),
		globals: 0,
	};

	/// Vocabulary of a target that natively supports all operators and global
	/// constraints.
	pub const GLOBAL: Vocabulary = Vocabulary {
		operators: Self::mask_operators(&OperatorName::ALL),
		globals: GlobalName::AllDifferent.bit()
			| GlobalName::AllEqual.bit()
			| GlobalName::Circuit.bit()
			| GlobalName::Cumulative.bit()
			| GlobalName::Element.bit()
			| GlobalName::Maximum.bit()
			| GlobalName::Minimum.bit(),
	};

	/// Vocabulary of a linear target: logical operators and (weighted) sums, but
	/// no multiplication, division, or global constraints.
	pub const LINEAR: Vocabulary = Vocabulary {
		operators: Self::mask_operators(&[
			OperatorName::And,
			OperatorName::Or,
			OperatorName::Xor,
			OperatorName::Implies,
			OperatorName::Not,
			OperatorName::Sum,
			OperatorName::WeightedSum,
			OperatorName::Sub,
			OperatorName::Neg,
		]),
		globals: 0,
	};

	/// Compute the set of bits for the given operators.
	const fn mask_operators(ops: &[OperatorName]) -> u32 {
		let mut mask = 0;
		let mut i = 0;
		while i < ops.len() {
			mask |= ops[i].bit();
			i += 1;
		}
		mask
	}

	/// Whether the global constraint is supported natively.
	pub fn supports_global(&self, name: GlobalName) -> bool {
		self.globals & name.bit() != 0
	}

	/// Whether the operator is supported.
	pub fn supports_operator(&self, name: OperatorName) -> bool {
		self.operators & name.bit() != 0
	}

	/// Change the vocabulary to natively support the given global constraint.
	pub fn with_global(mut self, name: GlobalName) -> Self {
		self.globals |= name.bit();
		self
	}

	/// Change the vocabulary to support the given operator.
	pub fn with_operator(mut self, name: OperatorName) -> Self {
		self.operators |= name.bit();
		self
	}
}

impl Default for Vocabulary {
	fn default() -> Self {
		Self::BOOLEAN
	}
}

#[cfg(test)]
mod tests {
	use pindakaas::Lit as RawLit;
	use tracing_test::traced_test;

	use crate::{
		backend::Vocabulary,
		expression::{GlobalName, OperatorName},
		model::Model,
	};

	#[test]
	#[traced_test]
	fn test_bool_var_lits() {
		let mut prb = Model::default();
		let a = prb.new_bool_var();
		let x = prb.new_int_var(0, 3);
		let b = prb.new_bool_var();
		// integer variables are not represented by a literal of their own
		assert_eq!(i32::from(RawLit::from(a)), 1);
		assert_eq!(i32::from(!RawLit::from(b)), -2);
		assert_eq!(RawLit::from(b), !!RawLit::from(b));
		assert_eq!(prb.int_bounds(x), (0, 3));
	}

	#[test]
	#[traced_test]
	fn test_vocabulary() {
		let vocab = Vocabulary::LINEAR;
		assert!(vocab.supports_operator(OperatorName::WeightedSum));
		assert!(!vocab.supports_operator(OperatorName::Mul));
		assert!(!vocab.supports_global(GlobalName::AllDifferent));
		let vocab = vocab
			.with_operator(OperatorName::Mul)
			.with_global(GlobalName::AllDifferent);
		assert!(vocab.supports_operator(OperatorName::Mul));
		assert!(vocab.supports_global(GlobalName::AllDifferent));
		assert!(!vocab.supports_global(GlobalName::Circuit));
		assert!(OperatorName::ALL
			.iter()
			.all(|&op| Vocabulary::BOOLEAN.supports_operator(op)));
		assert!(Vocabulary::GLOBAL.supports_global(GlobalName::Minimum));
	}
}
