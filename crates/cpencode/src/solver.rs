//! Incremental solving of a [`Model`] using a clause-based [`SatBackend`].

use delegate::delegate;
use pindakaas::{
	solver::{FailedAssumtions, SolveResult as SatSolveResult},
	Lit as RawLit,
};
use tracing::{debug, instrument, warn};

use crate::{
	backend::{Clause, SatBackend},
	encode::EncodeConfig,
	expression::Expr,
	extract::extract,
	model::{BoolVar, Decision, IntVar, Model, SolveResult, Value},
	IntVal, ReformulationError,
};

#[derive(Debug)]
/// A [`Model`] connected to a [`SatBackend`].
///
/// Each call to [`Solver::solve`] encodes the constraints that were added since
/// the previous call, posts only the new clauses to the backend, and
/// translates a satisfying assignment back into values of the decision
/// variables of the model.
///
/// The literals of the encoding are numbered by the model, so the backend must
/// not create variables of its own.
pub struct Solver<B> {
	/// The model being solved.
	model: Model,
	/// The backend that receives the clauses.
	backend: B,
	/// Configuration of the encoding.
	config: EncodeConfig,
	/// The number of clauses of the encoding posted to the backend.
	posted: usize,
	/// The number of propositional variables reserved in the backend.
	reserved: usize,
	/// Whether the backend found a trivial conflict while clauses were added.
	conflict: bool,
	/// The assumptions that caused the last call to
	/// [`Solver::solve_assuming`] to be unsatisfiable.
	core: Vec<RawLit>,
}

impl<B: SatBackend> Solver<B> {
	delegate! {
		to self.model {
			/// Add a constraint to the model. It is encoded at the next call to
			/// [`Solver::solve`].
			pub fn add(&mut self, constraint: impl Into<Expr>) -> Result<(), ReformulationError>;
			/// Get the value of a Boolean variable in the last solution found.
			pub fn bool_value(&self, var: BoolVar) -> Option<bool>;
			/// Get the value of an integer variable in the last solution found.
			pub fn int_value(&self, var: IntVar) -> Option<IntVal>;
			/// Create a new Boolean decision variable.
			pub fn new_bool_var(&mut self) -> BoolVar;
			/// Create a new integer decision variable with the (inclusive) domain
			/// `lb..=ub`.
			pub fn new_int_var(&mut self, lb: IntVal, ub: IntVal) -> IntVar;
			/// Get the value of a decision variable in the last solution found.
			pub fn value(&self, var: Decision) -> Option<Value>;
			/// Evaluate an expression in the last solution found.
			pub fn value_of(&self, expr: &Expr) -> Option<IntVal>;
		}
	}

	/// Find all solutions with regard to a list of given variables.
	/// The given closure will be called with the values of `vars` for each
	/// solution found.
	///
	/// WARNING: This method will add additional clauses into the backend to
	/// prevent the same solution from being generated twice. These clauses are
	/// not part of the encoding of the model, and remain in the backend.
	pub fn all_solutions(
		&mut self,
		vars: &[Decision],
		mut on_sol: impl FnMut(&[Value]),
	) -> Result<SolveResult, ReformulationError> {
		let mut num_sol = 0;
		loop {
			match self.solve()? {
				SolveResult::Satisfied => {
					num_sol += 1;
					let vals = vars
						.iter()
						.map(|&v| self.model.value(v).ok_or_else(|| no_value(v)))
						.collect::<Result<Vec<_>, _>>()?;
					on_sol(&vals);
					let nogood = self.nogood(vars)?;
					if nogood.is_empty() || self.backend.add_clause_from_slice(&nogood).is_err() {
						return Ok(SolveResult::Complete);
					}
				}
				SolveResult::Unknown if num_sol > 0 => return Ok(SolveResult::Satisfied),
				status => {
					debug!(num_sol, "all solutions found");
					return Ok(if num_sol > 0 {
						SolveResult::Complete
					} else {
						status
					});
				}
			}
		}
	}

	/// Access the backend.
	pub fn backend(&self) -> &B {
		&self.backend
	}

	/// Wrapper function for `all_solutions` that collects all solutions and
	/// returns them in a vector of solution values.
	///
	/// WARNING: This method will add additional clauses into the backend to
	/// prevent the same solution from being generated twice. These clauses are
	/// not part of the encoding of the model, and remain in the backend.
	pub fn get_all_solutions(
		&mut self,
		vars: &[Decision],
	) -> Result<(SolveResult, Vec<Vec<Value>>), ReformulationError> {
		let mut solutions = Vec::new();
		let status = self.all_solutions(vars, |sol| solutions.push(sol.to_vec()))?;
		Ok((status, solutions))
	}

	/// Deconstruct the Solver object and return the model and the backend.
	pub fn into_parts(self) -> (Model, B) {
		(self.model, self.backend)
	}

	/// Access the model.
	pub fn model(&self) -> &Model {
		&self.model
	}

	/// The assumptions that caused the last call to [`Solver::solve_assuming`]
	/// to be unsatisfiable. Empty when the last call found a solution, or when
	/// the model is unsatisfiable regardless of the assumptions.
	pub fn get_core(&self) -> &[RawLit] {
		&self.core
	}

	/// Create a solver that encodes `model` into clauses for `backend`.
	pub fn new(model: Model, backend: B) -> Self {
		Self {
			model,
			backend,
			config: EncodeConfig::default(),
			posted: 0,
			reserved: 0,
			conflict: false,
			core: Vec::new(),
		}
	}

	/// Clause that excludes the values that `vars` take in the last solution
	/// found.
	fn nogood(&self, vars: &[Decision]) -> Result<Clause, ReformulationError> {
		vars.iter()
			.map(|&var| match var {
				Decision::Bool(b) => {
					let val = self.model.bool_value(b).ok_or_else(|| no_value(var))?;
					let lit = RawLit::from(b);
					Ok(if val { !lit } else { lit })
				}
				Decision::Int(x) => {
					let val = self.model.int_value(x).ok_or_else(|| no_value(var))?;
					self.model
						.indicators()
						.get(x)
						.and_then(|ind| ind.get(val))
						.map(|b| !RawLit::from(b))
						.ok_or_else(|| {
							ReformulationError::malformed(
								x.to_string(),
								"integer variable is not encoded",
							)
						})
				}
			})
			.collect()
	}

	/// Try and find a solution to the model.
	pub fn solve(&mut self) -> Result<SolveResult, ReformulationError> {
		self.solve_assuming([])
	}

	#[instrument(level = "debug", skip_all)]
	/// Try and find a solution to the model in which all `assumptions` are true.
	///
	/// The assumptions only hold for this call. When no solution is found, the
	/// values of the previous solution are cleared.
	pub fn solve_assuming(
		&mut self,
		assumptions: impl IntoIterator<Item = RawLit>,
	) -> Result<SolveResult, ReformulationError> {
		let assumptions: Vec<RawLit> = assumptions.into_iter().collect();
		self.core.clear();
		self.model.encode(&self.config)?;

		let vars = self.model.arena.num_lit_vars();
		if vars > self.reserved {
			let _ = self.backend.new_var_range(vars - self.reserved);
			self.reserved = vars;
		}
		let clauses = &self.model.clauses()[self.posted..];
		for clause in clauses {
			if self.backend.add_clause_from_slice(clause).is_err() {
				self.conflict = true;
			}
		}
		debug!(
			new_clauses = clauses.len(),
			assumptions = assumptions.len(),
			"post encoding to backend"
		);
		self.posted = self.model.clauses().len();
		if self.conflict {
			warn!("backend found the encoding to be unsatisfiable");
			self.model.clear_values();
			return Ok(SolveResult::Unsatisfiable);
		}

		match self.backend.solve_assuming(assumptions.iter().copied()) {
			SatSolveResult::Satisfied(sol) => {
				let values = extract(&self.model.arena, self.model.indicators(), &sol)?;
				self.model.set_values(values);
				Ok(SolveResult::Satisfied)
			}
			SatSolveResult::Unsatisfiable(fail) => {
				self.core = assumptions.into_iter().filter(|&l| fail.fail(l)).collect();
				debug!(core = self.core.len(), "no solution");
				self.model.clear_values();
				Ok(SolveResult::Unsatisfiable)
			}
			SatSolveResult::Unknown => {
				self.model.clear_values();
				Ok(SolveResult::Unknown)
			}
		}
	}

	/// Change the configuration used to encode the model.
	pub fn with_encode_config(mut self, config: EncodeConfig) -> Self {
		self.config = config;
		self
	}
}

/// Error used when a decision variable has no value in the last solution.
fn no_value(var: Decision) -> ReformulationError {
	let name = match var {
		Decision::Bool(b) => b.to_string(),
		Decision::Int(x) => x.to_string(),
	};
	ReformulationError::malformed(name, "variable has no value in the solution")
}
