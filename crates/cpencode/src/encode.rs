//! Direct (one-hot) encoding of integer variables and flat constraints into
//! clauses over Boolean variables.
//!
//! Every integer variable `x` with domain `lb..=ub` is represented by one
//! indicator variable `[x == v]` per value `v`, of which exactly one is true.
//! Flat constraints are encoded by excluding the combinations of indicator
//! values that violate them. Boolean variables take the values `0` and `1`, and
//! are used directly.
//!
//! The encoding is incremental: everything that is generated is appended to an
//! [`EncodingLog`], and indicator variables are created at most once per
//! integer variable.

use std::{collections::BTreeMap, iter::once, ops::Range};

use itertools::Itertools;
use pindakaas::{
	propositional_logic::{Formula, TseitinEncoder},
	CardinalityOne, ClauseDatabase, Encoder as _, LadderEncoder, LimitComp, Lit as RawLit,
	PairwiseEncoder, Unsatisfiable, VarRange,
};
use tracing::{debug, trace, warn};

use crate::{
	backend::{Clause, Vocabulary},
	expression::{Comparison, Expr, Operator, OperatorName, Relation},
	flatten::Flattener,
	model::{BoolVar, IntVar, VarArena, VarKind, VarOrigin},
	IntVal, ReformulationError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// A literal in a clause under construction, which might already be known to
/// be true or false.
enum Atom {
	/// A literal whose value is known.
	Fixed(bool),
	/// A literal whose value is decided by the solver.
	Lit(RawLit),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Position in an [`EncodingLog`] (and the variable arena) to which a failed
/// encoding is rolled back.
pub(crate) struct Checkpoint {
	/// The number of log entries.
	entries: usize,
	/// The number of clauses.
	clauses: usize,
	/// The number of encoded constraints.
	constraints: usize,
	/// The number of variables in the arena.
	vars: usize,
}

#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
/// Configuration object for the encoding of a [`crate::Model`].
pub struct EncodeConfig {
	/// The largest domain size for which the exactly-one constraint of the
	/// indicator variables uses pairwise exclusion.
	pairwise_limit: Option<usize>,
}

/// Translates flat constraints into clauses, appending them to an
/// [`EncodingLog`].
///
/// The encoder is itself a clause database, so that `pindakaas` encoders can
/// add their clauses to the log directly.
pub(crate) struct Encoder<'a> {
	/// Arena in which indicator and auxiliary variables are created.
	arena: &'a mut VarArena,
	/// The log to which the encoding is appended.
	log: &'a mut EncodingLog,
	/// Configuration of the encoding.
	config: &'a EncodeConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// Append-only record of the encoding of a [`crate::Model`].
///
/// The log remembers the clauses generated for every indicator set and every
/// encoded constraint, so that later calls to [`crate::Model::encode`] only
/// generate what is new.
pub struct EncodingLog {
	/// What was generated, in order.
	entries: Vec<LogEntry>,
	/// The indicator variables of all encoded integer variables.
	indicators: IndicatorMap,
	/// All clauses generated so far.
	clauses: Vec<Clause>,
	/// The number of model constraints that have been encoded.
	constraints: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// The indicator variables of the integer variables that have been encoded.
pub struct IndicatorMap {
	/// Indicators of each encoded integer variable.
	map: BTreeMap<IntVar, Indicators>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
/// The indicator variables `[x == v]` of an integer variable `x`, one for every
/// value `v` of its domain.
pub struct Indicators {
	/// The smallest value of the domain.
	lb: IntVal,
	/// Indicator variables, where `vars[i]` represents `x == lb + i`.
	vars: Vec<BoolVar>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
/// Entry in an [`EncodingLog`].
pub enum LogEntry {
	/// Indicator variables and their exactly-one constraint were created for an
	/// integer variable.
	Indicators {
		/// The integer variable.
		var: IntVar,
		/// The clauses of the exactly-one constraint.
		clauses: Range<usize>,
	},
	/// A constraint of the model was encoded.
	Constraint {
		/// Position of the constraint in the model.
		index: usize,
		/// The clauses generated for the constraint, including those of indicator
		/// sets created while encoding it.
		clauses: Range<usize>,
	},
}

impl Atom {
	/// The negation of the atom.
	fn negate(self) -> Atom {
		match self {
			Atom::Fixed(b) => Atom::Fixed(!b),
			Atom::Lit(l) => Atom::Lit(!l),
		}
	}
}

impl EncodeConfig {
	/// The default largest domain size for which the exactly-one constraint of
	/// the indicator variables uses pairwise exclusion.
	pub const DEFAULT_PAIRWISE_LIMIT: usize = 16;

	/// Get the largest domain size for which the exactly-one constraint of the
	/// indicator variables uses pairwise exclusion. Larger domains use the ladder
	/// encoding.
	pub fn pairwise_limit(&self) -> usize {
		self.pairwise_limit.unwrap_or(Self::DEFAULT_PAIRWISE_LIMIT)
	}

	/// Change the largest domain size for which the exactly-one constraint of the
	/// indicator variables uses pairwise exclusion.
	pub fn with_pairwise_limit(mut self, limit: usize) -> Self {
		self.pairwise_limit = Some(limit);
		self
	}
}

impl<'a> Encoder<'a> {
	/// Create a new encoder that appends to `log`.
	pub(crate) fn new(
		arena: &'a mut VarArena,
		log: &'a mut EncodingLog,
		config: &'a EncodeConfig,
	) -> Self {
		Self { arena, log, config }
	}

	/// Translate a leaf taking the value `val` into an atom.
	///
	/// The indicators of integer variables must have been created using
	/// [`Self::domain`].
	fn atom(&self, leaf: &Expr, val: IntVal) -> Result<Atom, ReformulationError> {
		Ok(match leaf {
			Expr::Bool(b) => Atom::Fixed(IntVal::from(*b) == val),
			Expr::Int(i) => Atom::Fixed(*i == val),
			Expr::BoolVar(v) | Expr::NegBoolVar(v) => {
				let lit = if matches!(leaf, Expr::NegBoolVar(_)) {
					!RawLit::from(*v)
				} else {
					RawLit::from(*v)
				};
				match val {
					1 => Atom::Lit(lit),
					0 => Atom::Lit(!lit),
					_ => Atom::Fixed(false),
				}
			}
			Expr::IntVar(v) => {
				let Some(ind) = self.log.indicators.get(*v) else {
					return Err(ReformulationError::malformed(
						leaf.to_string(),
						"integer variable used before its indicators were created",
					));
				};
				ind.get(val)
					.map_or(Atom::Fixed(false), |b| Atom::Lit(b.into()))
			}
			_ => return Err(expected_leaf(leaf)),
		})
	}

	/// The values that a leaf can take. Creates the indicators of integer
	/// variables when they do not exist yet.
	fn domain(&mut self, leaf: &Expr) -> Result<Vec<IntVal>, ReformulationError> {
		match leaf {
			Expr::IntVar(v) => {
				self.ensure_indicators(*v)?;
				let (lb, ub) = self.arena.int_bounds(*v);
				Ok((lb..=ub).collect())
			}
			Expr::Bool(_) | Expr::Int(_) | Expr::BoolVar(_) | Expr::NegBoolVar(_) => {
				let (lb, ub) = self.arena.bounds(leaf);
				Ok((lb..=ub).collect())
			}
			_ => Err(expected_leaf(leaf)),
		}
	}

	/// Add the clause `cond -> atoms[0] \/ atoms[1] \/ ...` to the log.
	///
	/// Atoms that are known to be false are left out, and nothing is added when
	/// one of the atoms is known to be true.
	fn emit(&mut self, cond: &[RawLit], atoms: impl IntoIterator<Item = Atom>) {
		let mut clause: Clause = cond.iter().map(|&l| !l).collect();
		for atom in atoms {
			match atom {
				Atom::Fixed(true) => return,
				Atom::Fixed(false) => {}
				Atom::Lit(l) => clause.push(l),
			}
		}
		self.push_clause(clause);
	}

	/// Encode a comparison `e ⊙ l`, where `e` is an integer operator over leaves,
	/// by enumerating the value combinations of the arguments of `e`.
	///
	/// Combinations for which `e` is undefined are excluded regardless of the
	/// condition.
	fn encode_arithmetic(
		&mut self,
		cond: &[RawLit],
		relation: Relation,
		op: &Operator,
		rhs: &Expr,
	) -> Result<(), ReformulationError> {
		let domains = op
			.args
			.iter()
			.map(|a| self.domain(a))
			.collect::<Result<Vec<_>, _>>()?;
		let rhs_domain = self.domain(rhs)?;
		let implied = relation == Relation::Eq && !rhs.is_const();
		let mut tuples = 0_usize;
		for vals in domains
			.iter()
			.map(|d| d.iter().copied())
			.multi_cartesian_product()
		{
			tuples += 1;
			let premise = op
				.args
				.iter()
				.zip(&vals)
				.map(|(a, &v)| self.atom(a, v).map(Atom::negate))
				.collect::<Result<Vec<_>, _>>()?;
			match op.apply(&vals) {
				None => self.emit(&[], premise),
				Some(r) if implied => {
					let a = self.atom(rhs, r)?;
					self.emit(cond, premise.into_iter().chain(once(a)));
				}
				Some(r) => {
					for &w in &rhs_domain {
						if !relation.holds(r, w) {
							let a = self.atom(rhs, w)?.negate();
							self.emit(cond, premise.iter().copied().chain(once(a)));
						}
					}
				}
			}
		}
		trace!(operator = %op.name, tuples, "encode arithmetic comparison");
		Ok(())
	}

	/// Encode a comparison `l ⊙ l'` between two leaves.
	fn encode_binary(
		&mut self,
		cond: &[RawLit],
		relation: Relation,
		lhs: &Expr,
		rhs: &Expr,
	) -> Result<(), ReformulationError> {
		let lhs_domain = self.domain(lhs)?;
		let rhs_domain = self.domain(rhs)?;
		let (relation, var, var_domain, val) = match (lhs.as_const(), rhs.as_const()) {
			(_, Some(c)) => (relation, lhs, lhs_domain, c),
			(Some(c), None) => (relation.mirror(), rhs, rhs_domain, c),
			(None, None) => {
				for (v, w) in lhs_domain.iter().cartesian_product(&rhs_domain) {
					if !relation.holds(*v, *w) {
						let atoms = [
							self.atom(lhs, *v)?.negate(),
							self.atom(rhs, *w)?.negate(),
						];
						self.emit(cond, atoms);
					}
				}
				return Ok(());
			}
		};
		match relation {
			Relation::Eq => {
				let a = self.atom(var, val)?;
				self.emit(cond, [a]);
			}
			Relation::Ne => {
				let a = self.atom(var, val)?.negate();
				self.emit(cond, [a]);
			}
			_ => {
				let atoms = var_domain
					.into_iter()
					.filter(|&v| relation.holds(v, val))
					.map(|v| self.atom(var, v))
					.collect::<Result<Vec<_>, _>>()?;
				self.emit(cond, atoms);
			}
		}
		Ok(())
	}

	/// Encode a flat comparison under the condition `cond`.
	fn encode_comparison(
		&mut self,
		cond: &[RawLit],
		c: &Comparison,
	) -> Result<(), ReformulationError> {
		let (lhs, rhs) = (&*c.lhs, &*c.rhs);
		if !rhs.is_leaf() {
			return Err(ReformulationError::malformed(
				c.to_string(),
				"expected a flat comparison",
			));
		}
		if lhs.is_leaf() {
			return self.encode_binary(cond, c.relation, lhs, rhs);
		}
		if lhs.is_bool() {
			// Reification `f == l` (or `f != l`)
			if !rhs.is_bool() {
				return Err(ReformulationError::malformed(
					c.to_string(),
					"a Boolean expression can only be reified by a Boolean",
				));
			}
			let guard = match c.relation {
				Relation::Eq => self.atom(rhs, 1)?,
				Relation::Ne => self.atom(rhs, 0)?,
				_ => {
					return Err(ReformulationError::malformed(
						c.to_string(),
						"Boolean expressions can only be compared for (in)equality",
					))
				}
			};
			let negated = lhs.negate()?;
			self.encode_under(cond, guard, lhs)?;
			return self.encode_under(cond, guard.negate(), &negated);
		}
		match lhs {
			Expr::Operator(op) => self.encode_arithmetic(cond, c.relation, op, rhs),
			Expr::Global(g) => Err(ReformulationError::UnsupportedExpression {
				name: g.name.symbol().to_owned(),
			}),
			_ => Err(ReformulationError::malformed(
				c.to_string(),
				"expected a flat comparison",
			)),
		}
	}

	/// Encode a flat constraint, which only has to hold when all literals in
	/// `cond` are true.
	pub(crate) fn encode_constraint(
		&mut self,
		cond: &[RawLit],
		expr: &Expr,
	) -> Result<(), ReformulationError> {
		match expr {
			Expr::Bool(_) | Expr::BoolVar(_) | Expr::NegBoolVar(_) => {
				let a = self.atom(expr, 1)?;
				self.emit(cond, [a]);
				Ok(())
			}
			Expr::Operator(op) => self.encode_operator(cond, op),
			Expr::Comparison(c) => self.encode_comparison(cond, c),
			Expr::Global(g) => Err(ReformulationError::UnsupportedExpression {
				name: g.name.symbol().to_owned(),
			}),
			Expr::Int(_) | Expr::IntVar(_) => Err(ReformulationError::malformed(
				expr.to_string(),
				"expected a Boolean expression",
			)),
		}
	}

	/// Flatten and encode a constraint of the model, recording the result in the
	/// log.
	pub(crate) fn encode_model_constraint(
		&mut self,
		index: usize,
		constraint: &Expr,
	) -> Result<(), ReformulationError> {
		let start = self.log.clauses.len();
		let flat = Flattener::new(&mut *self.arena, &Vocabulary::BOOLEAN).flatten(constraint)?;
		for con in &flat {
			self.encode_constraint(&[], con)?;
		}
		let end = self.log.clauses.len();
		debug!(
			index,
			constraint = %constraint,
			flat = flat.len(),
			clauses = end - start,
			"encode constraint"
		);
		self.log.entries.push(LogEntry::Constraint {
			index,
			clauses: start..end,
		});
		self.log.constraints += 1;
		Ok(())
	}

	/// Encode a flat Boolean operator under the condition `cond`.
	fn encode_operator(
		&mut self,
		cond: &[RawLit],
		op: &Operator,
	) -> Result<(), ReformulationError> {
		match op.name {
			OperatorName::And => {
				for arg in &op.args {
					self.encode_constraint(cond, arg)?;
				}
				Ok(())
			}
			OperatorName::Or => {
				let atoms = op
					.args
					.iter()
					.map(|a| self.atom(a, 1))
					.collect::<Result<Vec<_>, _>>()?;
				self.emit(cond, atoms);
				Ok(())
			}
			OperatorName::Not => {
				let a = self.atom(&op.args[0], 0)?;
				self.emit(cond, [a]);
				Ok(())
			}
			OperatorName::Implies => {
				let (a, b) = (&op.args[0], &op.args[1]);
				if a.is_leaf() {
					let guard = self.atom(a, 1)?;
					self.encode_under(cond, guard, b)
				} else {
					// `f -> l` is encoded as `not l -> not f`
					let guard = self.atom(b, 0)?;
					self.encode_under(cond, guard, &a.negate()?)
				}
			}
			OperatorName::Xor => self.encode_xor(cond, &op.args),
			_ => Err(ReformulationError::malformed(
				op.to_string(),
				"expected a Boolean expression",
			)),
		}
	}

	/// Encode a flat constraint that only has to hold when `guard` (and all
	/// literals in `cond`) are true.
	fn encode_under(
		&mut self,
		cond: &[RawLit],
		guard: Atom,
		expr: &Expr,
	) -> Result<(), ReformulationError> {
		match guard {
			Atom::Fixed(false) => Ok(()),
			Atom::Fixed(true) => self.encode_constraint(cond, expr),
			Atom::Lit(l) => {
				let cond: Vec<RawLit> = cond.iter().copied().chain(once(l)).collect();
				self.encode_constraint(&cond, expr)
			}
		}
	}

	/// Create the indicators for all integer variables created by the user that
	/// have not been encoded yet.
	pub(crate) fn encode_user_vars(&mut self) -> Result<(), ReformulationError> {
		let pending: Vec<IntVar> = self
			.arena
			.iter()
			.filter(|(_, def)| {
				def.origin == VarOrigin::User && matches!(def.kind, VarKind::Int { .. })
			})
			.map(|(r, _)| IntVar(r))
			.filter(|v| self.log.indicators.get(*v).is_none())
			.collect();
		for var in pending {
			self.ensure_indicators(var)?;
		}
		Ok(())
	}

	/// Encode the exclusive disjunction of Boolean leaves under the condition
	/// `cond`.
	fn encode_xor(&mut self, cond: &[RawLit], args: &[Expr]) -> Result<(), ReformulationError> {
		let mut parity = false;
		let mut lits = Vec::new();
		for arg in args {
			match self.atom(arg, 1)? {
				Atom::Fixed(b) => parity ^= b,
				Atom::Lit(l) => lits.push(l),
			}
		}
		let Some(first) = lits.first_mut() else {
			if !parity {
				self.emit(cond, []);
			}
			return Ok(());
		};
		if parity {
			// The literals must have even parity
			*first = !*first;
		}
		let xor = Formula::Xor(lits.into_iter().map(Formula::Atom).collect());
		let formula = if cond.is_empty() {
			xor
		} else {
			Formula::Or(
				cond.iter()
					.map(|&c| Formula::Atom(!c))
					.chain(once(xor))
					.collect(),
			)
		};
		let result = TseitinEncoder.encode(self, &formula);
		self.record(result);
		Ok(())
	}

	/// Create the indicator variables of an integer variable and their
	/// exactly-one constraint, unless they exist already.
	fn ensure_indicators(&mut self, var: IntVar) -> Result<(), ReformulationError> {
		if self.log.indicators.get(var).is_some() {
			return Ok(());
		}
		let (lb, ub) = self.arena.int_bounds(var);
		if lb > ub {
			return Err(ReformulationError::InvalidDomain { var, lb, ub });
		}
		let start = self.log.clauses.len();
		let vars: Vec<BoolVar> = (lb..=ub)
			.map(|_| self.arena.new_bool(VarOrigin::Indicator))
			.collect();
		// at least one
		self.push_clause(vars.iter().map(|&v| RawLit::from(v)));
		// at most one
		let amo = CardinalityOne {
			lits: vars.iter().map(|&v| v.into()).collect(),
			cmp: LimitComp::LessEq,
		};
		let (strategy, result) = if vars.len() <= self.config.pairwise_limit().max(1) {
			("pairwise", PairwiseEncoder::default().encode(self, &amo))
		} else {
			("ladder", LadderEncoder::default().encode(self, &amo))
		};
		self.record(result);
		debug!(var = %var, lb, ub, amo = strategy, "create indicator variables");
		let _ = self
			.log
			.indicators
			.map
			.insert(var, Indicators { lb, vars });
		self.log.entries.push(LogEntry::Indicators {
			var,
			clauses: start..self.log.clauses.len(),
		});
		Ok(())
	}

	/// Append a clause to the log, leaving out repeated literals.
	fn push_clause(&mut self, clause: impl IntoIterator<Item = RawLit>) {
		let clause: Clause = clause.into_iter().unique().collect();
		if clause.is_empty() {
			warn!("encoding contains a trivially unsatisfiable (empty) clause");
		}
		self.log.clauses.push(clause);
	}

	/// Record the outcome of a `pindakaas` encoder. An encoding that was found to
	/// be trivially unsatisfiable is recorded as the empty clause.
	fn record(&mut self, result: Result<(), Unsatisfiable>) {
		if result.is_err() {
			self.push_clause([]);
		}
	}
}

impl ClauseDatabase for Encoder<'_> {
	fn add_clause_from_slice(&mut self, clause: &[RawLit]) -> Result<(), Unsatisfiable> {
		self.push_clause(clause.iter().copied());
		Ok(())
	}

	fn new_var_range(&mut self, len: usize) -> VarRange {
		self.arena.new_var_range(len)
	}
}

impl EncodingLog {
	/// Create a checkpoint of the current state of the log and `arena`.
	pub(crate) fn checkpoint(&self, arena: &VarArena) -> Checkpoint {
		Checkpoint {
			entries: self.entries.len(),
			clauses: self.clauses.len(),
			constraints: self.constraints,
			vars: arena.len(),
		}
	}

	/// All clauses generated so far.
	pub fn clauses(&self) -> &[Clause] {
		&self.clauses
	}

	/// The number of model constraints that have been encoded.
	pub fn encoded_constraints(&self) -> usize {
		self.constraints
	}

	/// What was generated so far, in order.
	pub fn entries(&self) -> &[LogEntry] {
		&self.entries
	}

	/// The indicator variables of all encoded integer variables.
	pub fn indicators(&self) -> &IndicatorMap {
		&self.indicators
	}

	/// Return the log and `arena` to the state of the checkpoint.
	pub(crate) fn rollback(&mut self, arena: &mut VarArena, checkpoint: Checkpoint) {
		for entry in self.entries.drain(checkpoint.entries..) {
			if let LogEntry::Indicators { var, .. } = entry {
				let _ = self.indicators.map.remove(&var);
			}
		}
		self.clauses.truncate(checkpoint.clauses);
		self.constraints = checkpoint.constraints;
		arena.truncate(checkpoint.vars);
	}
}

impl IndicatorMap {
	/// The indicators of an integer variable, if it has been encoded.
	pub fn get(&self, var: IntVar) -> Option<&Indicators> {
		self.map.get(&var)
	}

	/// Whether no integer variable has been encoded.
	pub fn is_empty(&self) -> bool {
		self.map.is_empty()
	}

	/// Iterate over the encoded integer variables and their indicators.
	pub fn iter(&self) -> impl Iterator<Item = (IntVar, &Indicators)> + '_ {
		self.map.iter().map(|(&v, ind)| (v, ind))
	}

	/// The number of encoded integer variables.
	pub fn len(&self) -> usize {
		self.map.len()
	}
}

impl Indicators {
	/// The indicator variable `[x == val]`, or `None` if `val` is not in the
	/// domain.
	pub fn get(&self, val: IntVal) -> Option<BoolVar> {
		let i = usize::try_from(val.checked_sub(self.lb)?).ok()?;
		self.vars.get(i).copied()
	}

	/// Whether the domain is empty.
	pub fn is_empty(&self) -> bool {
		self.vars.is_empty()
	}

	/// Iterate over the values of the domain and their indicator variables.
	pub fn iter(&self) -> impl Iterator<Item = (IntVal, BoolVar)> + '_ {
		self.vars
			.iter()
			.enumerate()
			.map(|(i, &b)| (self.lb + i as IntVal, b))
	}

	/// The number of values in the domain.
	pub fn len(&self) -> usize {
		self.vars.len()
	}
}

/// Error used when an expression that is not a leaf is found where a leaf is
/// expected.
fn expected_leaf(expr: &Expr) -> ReformulationError {
	ReformulationError::malformed(expr.to_string(), "expected a variable or constant")
}
